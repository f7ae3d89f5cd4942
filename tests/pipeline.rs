//! Integration tests for the whole batch pipeline.
//!
//! Everything runs on synthetic ZPL through the built-in rasterizer, except
//! where a test needs to control rendering (cancellation).
//!
//! Run with:
//!   RUST_LOG=labelpress=debug cargo test --test pipeline -- --nocapture

use futures::StreamExt;
use labelpress::{
    prepare_batch, process_batch, process_batch_with, process_stream, BatchInput,
    BatchProgressCallback, CancelToken, LabelError, LayoutConfig, PageGeometry, PageRole,
    PageStatus, PairLayout, PairingMode, PipelineConfig, PipelineEvent, PrintLedger,
    ProcessingMode, RasterError, Rasterizer, SkuLink, SkuLinkTable, WarningKind, ZplRasterizer,
};
use std::sync::{Arc, Mutex};

// ── Test helpers ─────────────────────────────────────────────────────────────

fn invoice(n: usize) -> String {
    format!("^XA^CF0,30^FO40,40^FDDANFE^FS^FO40,90^FDMercado Livre^FS^FO40,140^FDPedido 20000{n:04}^FS^XZ")
}

fn label(n: usize) -> String {
    format!(
        "^XA^CF0,30^FO40,40^FDMercado Envios^FS\
         ^FO40,90^FDPedido 20000{n:04}^FS\
         ^FO40,140^FDMUG-{n} - Caneca {n} - 1 UN^FS\
         ^BY2^FO40,300^BCN,120,N^FD20000{n:04}^FS^XZ"
    )
}

fn blob(units: usize) -> String {
    (0..units)
        .map(|n| format!("{}\n{}\n", invoice(n), label(n)))
        .collect()
}

/// Route pipeline logs to the test harness. Safe to call from every test.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn quick_config() -> labelpress::PipelineConfigBuilder {
    init_tracing();
    PipelineConfig::builder().chunk_pause_ms(0).chunk_size(4)
}

#[derive(Default)]
struct Recorder {
    progress: Mutex<Vec<(usize, usize)>>,
}

impl BatchProgressCallback for Recorder {
    fn on_progress(&self, completed: usize, total: usize, _message: &str) {
        self.progress.lock().unwrap().push((completed, total));
    }
}

// ── Modes ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn fast_mode_never_renders_invoices() {
    let config = quick_config()
        .mode(ProcessingMode::FastLabelOnly)
        .build()
        .unwrap();
    let mut ledger = PrintLedger::new();
    let out = process_batch(&BatchInput::new(blob(10)), &mut ledger, &config)
        .await
        .unwrap();

    assert_eq!(out.summary.shipment_units, 10);
    for page in &out.pages {
        match page.role {
            PageRole::Invoice => {
                assert_eq!(page.status, PageStatus::Skipped);
                assert!(page.raster.is_none());
            }
            PageRole::Label => assert_ne!(page.status, PageStatus::Skipped),
        }
    }
    assert_eq!(out.summary.skipped_invoices, 10);
    assert_eq!(out.summary.sheets, 10);
    assert!(out
        .document
        .placements()
        .all(|p| p.role == PageRole::Label));
}

#[tokio::test]
async fn label_only_pairing_excludes_invoices() {
    let config = quick_config()
        .pairing(PairingMode::LabelOnly)
        .build()
        .unwrap();
    let mut ledger = PrintLedger::new();
    let out = process_batch(&BatchInput::new(blob(3)), &mut ledger, &config)
        .await
        .unwrap();

    assert_eq!(out.summary.shipment_units, 3);
    assert_eq!(out.summary.excluded_invoices, 3);
    assert!(out.units.iter().all(|u| u.invoice_doc.is_none()));
    assert_eq!(out.pages.len(), 3);
}

#[tokio::test]
async fn vertical_layout_shares_one_sheet_per_unit() {
    let layout = LayoutConfig {
        pair_layout: PairLayout::Vertical,
        ..LayoutConfig::default()
    };
    let config = quick_config().layout(layout).build().unwrap();
    let mut ledger = PrintLedger::new();
    let out = process_batch(&BatchInput::new(blob(3)), &mut ledger, &config)
        .await
        .unwrap();

    assert_eq!(out.summary.sheets, 3);
    for page in &out.document.pages {
        assert_eq!(page.placements.len(), 2);
        assert_eq!(page.placements[0].role, PageRole::Invoice);
        assert_eq!(page.placements[1].role, PageRole::Label);
    }
}

#[tokio::test]
async fn markerless_documents_pair_by_position() {
    let markup = "^XA^FO20,20^FDfolha 1^FS^XZ\n^XA^FO20,20^FDfolha 2^FS^XZ\n\
                  ^XA^FO20,20^FDfolha 3^FS^XZ\n^XA^FO20,20^FDfolha 4^FS^XZ";
    let config = quick_config().build().unwrap();
    let prepared = prepare_batch(&BatchInput::new(markup), &config).unwrap();

    let pairs: Vec<_> = prepared
        .units
        .iter()
        .map(|u| (u.invoice_doc, u.label_doc))
        .collect();
    assert_eq!(pairs, vec![(Some(0), 1), (Some(2), 3)]);

    let mut ledger = PrintLedger::new();
    let out = process_batch(&BatchInput::new(markup), &mut ledger, &config)
        .await
        .unwrap();
    assert_eq!(out.summary.shipment_units, 2);
    assert_eq!(out.pages.len(), 4);
}

// ── Print ledger ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn rerun_flags_reprints_without_growing_ledger() {
    let config = quick_config().build().unwrap();
    let input = BatchInput::new(blob(4));
    let mut ledger = PrintLedger::new();

    let first = process_batch(&input, &mut ledger, &config).await.unwrap();
    assert_eq!(first.new_hashes.len(), 4);
    assert_eq!(first.summary.reprints, 0);
    assert_eq!(ledger.len(), 4);

    let second = process_batch(&input, &mut ledger, &config).await.unwrap();
    let third = process_batch(&input, &mut ledger, &config).await.unwrap();
    for out in [&second, &third] {
        assert!(out.new_hashes.is_empty());
        assert_eq!(out.summary.reprints, 4);
        assert!(out
            .document
            .placements()
            .filter(|p| p.role == PageRole::Label)
            .all(|p| p.reprint));
    }
    assert_eq!(ledger.len(), 4);
}

#[tokio::test]
async fn seeded_ledger_marks_known_labels() {
    let config = quick_config().build().unwrap();
    let input = BatchInput::new(blob(2));
    let prepared = prepare_batch(&input, &config).unwrap();

    let mut ledger = PrintLedger::new();
    ledger.record(&prepared.units[0].content_hash);
    let out = process_batch(&input, &mut ledger, &config).await.unwrap();

    assert_eq!(out.summary.reprints, 1);
    assert_eq!(out.new_hashes, vec![prepared.units[1].content_hash.clone()]);
}

// ── Rendering order and progress ─────────────────────────────────────────────

#[tokio::test]
async fn pages_keep_plan_order_and_progress_is_monotonic() {
    let recorder = Arc::new(Recorder::default());
    let config = quick_config()
        .chunk_size(3)
        .concurrency(3)
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let mut ledger = PrintLedger::new();
    let out = process_batch(&BatchInput::new(blob(5)), &mut ledger, &config)
        .await
        .unwrap();

    let slots: Vec<usize> = out.pages.iter().map(|p| p.slot).collect();
    assert_eq!(slots, (0..10).collect::<Vec<_>>());

    let progress = recorder.progress.lock().unwrap().clone();
    assert_eq!(progress.len(), 4);
    assert!(progress.windows(2).all(|w| w[0].0 < w[1].0));
    assert_eq!(progress.last(), Some(&(10, 10)));
}

/// Cancels the shared token the first time it is asked to draw anything.
struct CancelOnFirstPage {
    token: CancelToken,
    inner: ZplRasterizer,
}

impl Rasterizer for CancelOnFirstPage {
    fn rasterize(
        &self,
        markup: &str,
        geometry: &PageGeometry,
    ) -> Result<image::GrayImage, RasterError> {
        self.token.cancel();
        self.inner.rasterize(markup, geometry)
    }
}

#[tokio::test]
async fn cancellation_keeps_finished_chunks() {
    let config = quick_config().chunk_size(2).build().unwrap();
    let token = CancelToken::new();
    let rasterizer = Arc::new(CancelOnFirstPage {
        token: token.clone(),
        inner: ZplRasterizer::default(),
    });
    let mut ledger = PrintLedger::new();
    let out = process_batch_with(
        &BatchInput::new(blob(4)),
        &mut ledger,
        &config,
        rasterizer,
        &token,
    )
    .await
    .unwrap();

    assert!(out.summary.cancelled);
    assert_eq!(out.pages.len(), 2);
    assert_eq!(out.summary.sheets, 2);
    assert_eq!(out.new_hashes.len(), 1);
}

// ── Extraction end to end ────────────────────────────────────────────────────

#[tokio::test]
async fn fallback_fields_reach_the_footer() {
    let markup = format!(
        "{}\n^XA^FO40,40^FDSKU: ABC-1^FS^FO40,90^FDQTD: 3^FS^XZ",
        invoice(0)
    );
    let mut links = SkuLinkTable::new();
    links.insert(
        "ABC-1",
        SkuLink {
            master_sku: "KIT-ABC".into(),
            multiplier: 2.0,
            display_name: Some("Kit Canecas".into()),
        },
    );
    let config = quick_config().build().unwrap();
    let mut ledger = PrintLedger::new();
    let out = process_batch(&BatchInput::new(markup).with_sku_links(links), &mut ledger, &config)
        .await
        .unwrap();

    assert_eq!(out.units.len(), 1);
    let line = &out.units[0].enriched_lines[0];
    assert_eq!(line.sku, "ABC-1");
    assert_eq!(line.units(), 6.0);

    let footer = out
        .document
        .placements()
        .find_map(|p| p.footer.as_ref())
        .expect("label footer");
    assert_eq!(footer.columns[0].lines, vec!["KIT-ABC - Kit Canecas - 6 UN"]);
    assert_eq!(out.summary.unresolved_skus, 0);
}

#[tokio::test]
async fn truncated_trailing_document_is_dropped_with_warning() {
    let markup = format!("{}^XA^FO40,40^FDMercado Envios", blob(2));
    let config = quick_config().build().unwrap();
    let mut ledger = PrintLedger::new();
    let out = process_batch(&BatchInput::new(markup), &mut ledger, &config)
        .await
        .unwrap();

    assert_eq!(out.summary.documents, 4);
    assert_eq!(out.summary.malformed_documents, 1);
    assert_eq!(out.summary.shipment_units, 2);
    assert!(out
        .summary
        .warnings
        .iter()
        .any(|w| w.kind == WarningKind::MalformedDocumentBoundary));
}

#[tokio::test]
async fn empty_input_is_fatal() {
    let config = quick_config().build().unwrap();
    let mut ledger = PrintLedger::new();
    let err = process_batch(&BatchInput::new("^XA^FDnever closed"), &mut ledger, &config)
        .await
        .unwrap_err();
    assert!(matches!(err, LabelError::FatalInputEmpty { malformed: 1 }));
    assert!(ledger.is_empty());
}

// ── Streaming ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn stream_hands_back_updated_ledger() {
    let config = quick_config().build().unwrap();
    let mut events = process_stream(BatchInput::new(blob(3)), PrintLedger::new(), config);

    let mut last = None;
    while let Some(event) = events.next().await {
        assert!(last.as_ref().is_none_or(|e: &PipelineEvent| !e.is_terminal()));
        last = Some(event);
    }
    match last {
        Some(PipelineEvent::Done { output, ledger }) => {
            assert_eq!(output.new_hashes.len(), 3);
            assert_eq!(ledger.len(), 3);
        }
        other => panic!("expected Done, got {other:?}"),
    }
}
