//! Batch entry points: run every stage and hand back the assembled output.
//!
//! [`process_batch`] waits for the whole batch. Use
//! [`crate::stream::process_stream`] to receive progress and previews as
//! events instead of callbacks.
//!
//! The print ledger is borrowed mutably for the whole call but only read
//! until assembly has finished; the labels that made it onto a sheet are
//! recorded at the very end and returned in [`BatchOutput::new_hashes`].

use crate::config::PipelineConfig;
use crate::error::LabelError;
use crate::ledger::PrintLedger;
use crate::model::{BatchInput, ExtractedFields, ExtractionStrategy, RawDocument, ShipmentUnit};
use crate::output::{BatchOutput, BatchSummary, PageRole, PageStatus};
use crate::pipeline::assemble::assemble;
use crate::pipeline::encode;
use crate::pipeline::enrich::Enricher;
use crate::pipeline::extract::FieldExtractor;
use crate::pipeline::pair::pair;
use crate::pipeline::raster::{Rasterizer, ZplRasterizer};
use crate::pipeline::render::{render_pages, CancelToken};
use crate::pipeline::segment::segment;
use crate::warnings::{WarningKind, WarningLog};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Output of the synchronous stages, before anything is rendered.
#[derive(Debug, Clone)]
pub struct PreparedBatch {
    pub documents: Vec<RawDocument>,
    pub fields: Vec<ExtractedFields>,
    pub units: Vec<ShipmentUnit>,
    pub warnings: WarningLog,
    pub malformed_documents: usize,
    pub unresolved_labels: usize,
    pub unresolved_skus: usize,
    pub orphan_invoices: usize,
    pub excluded_invoices: usize,
    pub embedded_invoices_detected: bool,
}

/// Segment, extract, enrich and pair.
///
/// # Errors
/// [`LabelError::FatalInputEmpty`] when the markup holds no complete
/// document. Everything else is recorded as a warning.
pub fn prepare_batch(input: &BatchInput, config: &PipelineConfig) -> Result<PreparedBatch, LabelError> {
    let mut warnings = WarningLog::new();

    // ── Step 1: Segment ──────────────────────────────────────────────────
    let seg = segment(&input.markup);
    for _ in 0..seg.malformed {
        warnings.push(
            WarningKind::MalformedDocumentBoundary,
            "A document without an end marker was dropped",
        );
    }
    if seg.documents.is_empty() {
        return Err(LabelError::FatalInputEmpty {
            malformed: seg.malformed,
        });
    }
    let documents = seg.documents;

    // ── Step 2: Extract ──────────────────────────────────────────────────
    let patterns = &config.patterns;
    for (name, p) in [
        ("fallback SKU", &patterns.fallback_sku),
        ("fallback quantity", &patterns.fallback_quantity),
        ("order reference", &patterns.order_reference),
    ] {
        if let crate::config::FieldPattern::Disabled { source, reason } = p {
            warnings.push(
                WarningKind::ExtractionAmbiguous,
                format!("The {name} pattern {source:?} is disabled: {reason}"),
            );
        }
    }
    let extractor = FieldExtractor::new(patterns);
    let fields: Vec<ExtractedFields> = documents.iter().map(|d| extractor.extract(d)).collect();

    // ── Step 3: Enrich ───────────────────────────────────────────────────
    let enricher = Enricher::new(&input.sku_links, &input.orders);
    let enrichments: Vec<_> = fields.iter().map(|f| enricher.enrich(f)).collect();

    // ── Step 4: Pair ─────────────────────────────────────────────────────
    let mut pairing = pair(&documents, &fields, &enrichments, config.pairing);
    warnings.merge(std::mem::take(&mut pairing.warnings));

    for unit in &pairing.units {
        let label = &fields[unit.label_doc];
        if label.strategy == ExtractionStrategy::NoMatch {
            warnings.push(
                WarningKind::ExtractionAmbiguous,
                format!("Label document {} yielded no line items", unit.label_doc),
            );
        }
    }
    let mut unresolved_skus = 0;
    for line in pairing.units.iter().flat_map(|u| &u.enriched_lines) {
        if !line.is_linked() {
            unresolved_skus += 1;
            warnings.push(
                WarningKind::UnresolvedSku,
                format!("SKU {:?} has no catalog link", line.sku),
            );
        }
    }

    info!(
        "Prepared {} documents into {} shipment units",
        documents.len(),
        pairing.units.len()
    );
    Ok(PreparedBatch {
        documents,
        fields,
        units: pairing.units,
        warnings,
        malformed_documents: seg.malformed,
        unresolved_labels: pairing.unresolved_labels,
        unresolved_skus,
        orphan_invoices: pairing.orphan_invoices,
        excluded_invoices: pairing.excluded_invoices,
        embedded_invoices_detected: pairing.embedded_invoices_detected,
    })
}

/// Run a whole batch with the built-in rasterizer.
///
/// # Returns
/// `Ok(BatchOutput)` even when some pages failed to render (check
/// `output.summary.failed_pages`).
///
/// # Errors
/// Only [`LabelError::FatalInputEmpty`]: there was nothing to process.
pub async fn process_batch(
    input: &BatchInput,
    ledger: &mut PrintLedger,
    config: &PipelineConfig,
) -> Result<BatchOutput, LabelError> {
    let rasterizer = Arc::new(ZplRasterizer::new(config.max_canvas_pixels));
    process_batch_with(input, ledger, config, rasterizer, &CancelToken::new()).await
}

/// [`process_batch`] with a caller-supplied rasterizer and cancel token.
///
/// After cancellation the output holds the pages rendered so far, assembled
/// as a partial document, and `summary.cancelled` is set.
pub async fn process_batch_with(
    input: &BatchInput,
    ledger: &mut PrintLedger,
    config: &PipelineConfig,
    rasterizer: Arc<dyn Rasterizer>,
    cancel: &CancelToken,
) -> Result<BatchOutput, LabelError> {
    let start = Instant::now();
    let PreparedBatch {
        documents,
        units,
        mut warnings,
        malformed_documents,
        unresolved_labels,
        unresolved_skus,
        orphan_invoices,
        excluded_invoices,
        embedded_invoices_detected,
        ..
    } = prepare_batch(input, config)?;

    // ── Step 5: Render (ledger read-only) ────────────────────────────────
    let render_start = Instant::now();
    let outcome = render_pages(&units, &documents, ledger, rasterizer, config, cancel).await;
    let failed_pages = outcome
        .pages
        .iter()
        .filter(|p| p.status == PageStatus::Failed)
        .inspect(|p| {
            let detail = p.error.as_ref().map(|e| e.to_string()).unwrap_or_default();
            warnings.push(WarningKind::RenderFailure, detail);
        })
        .count();
    info!(
        "Rendered {} pages in {}ms ({} failed)",
        outcome.pages.len(),
        render_start.elapsed().as_millis(),
        failed_pages
    );

    // ── Step 6: Assemble ─────────────────────────────────────────────────
    let assembly = assemble(&outcome.pages, &units, &config.layout);

    // ── Step 7: Record printed labels ────────────────────────────────────
    let mut new_hashes = Vec::new();
    for placement in assembly.document.placements() {
        if placement.role != PageRole::Label || placement.raster.is_none() {
            continue;
        }
        let hash = &units[placement.shipment_unit_index].content_hash;
        if ledger.record(hash) {
            new_hashes.push(hash.clone());
        }
    }

    let summary = BatchSummary {
        documents: documents.len(),
        malformed_documents,
        shipment_units: units.len(),
        unresolved_labels,
        unresolved_skus,
        skipped_invoices: assembly.skipped_invoices,
        excluded_invoices,
        orphan_invoices,
        rendered_pages: outcome
            .pages
            .iter()
            .filter(|p| p.status == PageStatus::Ok)
            .count(),
        failed_pages,
        reprints: outcome
            .pages
            .iter()
            .filter(|p| p.role == PageRole::Label && p.already_printed)
            .count(),
        sheets: assembly.document.page_count(),
        embedded_invoices_detected,
        cancelled: outcome.cancelled,
        warnings: warnings.into_vec(),
    };
    info!(
        "Batch complete: {} units, {} sheets, {} new labels, {}ms total",
        summary.shipment_units,
        summary.sheets,
        new_hashes.len(),
        start.elapsed().as_millis()
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_complete(&summary);
    }

    Ok(BatchOutput {
        document: assembly.document,
        units,
        pages: outcome.pages,
        summary,
        new_hashes,
    })
}

/// Run a batch and write every sheet as `page-NNNN.png` plus a
/// `manifest.json` into `dir`.
///
/// The manifest is written to a temporary file in `dir` and renamed into
/// place, so a reader never sees a partial one.
pub async fn process_batch_to_dir(
    input: &BatchInput,
    ledger: &mut PrintLedger,
    config: &PipelineConfig,
    dir: impl AsRef<Path>,
) -> Result<BatchOutput, LabelError> {
    let output = process_batch(input, ledger, config).await?;
    let dir = dir.as_ref();

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| LabelError::OutputWriteFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;

    let sheet = output.document.sheet;
    for page in &output.document.pages {
        let page = page.clone();
        let number = page.number;
        let png = tokio::task::spawn_blocking(move || encode::encode_png(&page.compose(&sheet)))
            .await
            .map_err(|e| LabelError::Internal(format!("Compose task panicked: {}", e)))?
            .map_err(|e| LabelError::EncodeFailed {
                page: number,
                detail: e.to_string(),
            })?;
        let path = dir.join(format!("page-{number:04}.png"));
        tokio::fs::write(&path, &png)
            .await
            .map_err(|e| LabelError::OutputWriteFailed { path, source: e })?;
    }
    debug!("Wrote {} sheets to {}", output.document.page_count(), dir.display());

    let manifest = output
        .document
        .manifest()
        .map_err(|e| LabelError::Internal(format!("Manifest serialisation failed: {}", e)))?;
    write_atomic(dir, "manifest.json", manifest.as_bytes())?;

    Ok(output)
}

/// Synchronous wrapper around [`process_batch`].
///
/// Creates a temporary tokio runtime internally.
pub fn process_batch_sync(
    input: &BatchInput,
    ledger: &mut PrintLedger,
    config: &PipelineConfig,
) -> Result<BatchOutput, LabelError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| LabelError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(process_batch(input, ledger, config))
}

/// Write `bytes` to `dir/name` via a temp file in the same directory.
pub fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<(), LabelError> {
    let path = dir.join(name);
    let write_err = |source| LabelError::OutputWriteFailed {
        path: path.clone(),
        source,
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(bytes).map_err(write_err)?;
    tmp.persist(&path).map_err(|e| write_err(e.error))?;
    Ok(())
}
