//! Rendering stage: rasterise every page of the batch with bounded
//! concurrency.
//!
//! ## Page plan
//!
//! Each shipment unit contributes its invoice page (if it has one) and then
//! its label page. A page's position in that plan is its *slot*; results are
//! written into a slot vector allocated up front, so completion order inside
//! a chunk never changes output order.
//!
//! ## Chunks
//!
//! Pages are rasterised `chunk_size` at a time, at most `concurrency` in
//! flight, each inside `spawn_blocking` because rasterisation is CPU-bound.
//! Rasters held in memory therefore scale with the chunk, not the batch.
//! Between chunks the stage sleeps for `chunk_pause_ms` and checks the
//! [`CancelToken`]; a chunk that has started always finishes.
//!
//! In fast mode invoice pages are marked `Skipped` before the first chunk and
//! never reach the rasterizer.

use crate::config::{PipelineConfig, ProcessingMode};
use crate::error::PageError;
use crate::ledger::PrintLedger;
use crate::model::{RawDocument, ShipmentUnit};
use crate::output::{PageRole, PageStatus, RenderedPage};
use crate::pipeline::encode;
use crate::pipeline::raster::Rasterizer;
use futures::stream::{self, StreamExt};
use image::GrayImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cooperative cancellation, checked between chunks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Pages produced by [`render_pages`].
#[derive(Debug, Clone, Default)]
pub struct RenderOutcome {
    /// Settled pages in plan order. Shorter than the plan when cancelled.
    pub pages: Vec<RenderedPage>,
    pub cancelled: bool,
}

/// One entry of the page plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedPage {
    pub slot: usize,
    pub shipment_unit_index: usize,
    pub role: PageRole,
    pub document: usize,
}

/// Invoice page (if any) then label page, unit by unit.
pub fn plan(units: &[ShipmentUnit]) -> Vec<PlannedPage> {
    let mut out = Vec::with_capacity(units.len() * 2);
    for (u, unit) in units.iter().enumerate() {
        let pages = unit
            .invoice_doc
            .map(|d| (PageRole::Invoice, d))
            .into_iter()
            .chain(std::iter::once((PageRole::Label, unit.label_doc)));
        for (role, document) in pages {
            out.push(PlannedPage {
                slot: out.len(),
                shipment_unit_index: u,
                role,
                document,
            });
        }
    }
    out
}

/// Rasterise the page plan of `units`.
///
/// Never fails as a whole: a page whose rasterisation errors, panics or
/// times out is returned with `status = Failed`.
pub async fn render_pages(
    units: &[ShipmentUnit],
    documents: &[RawDocument],
    ledger: &PrintLedger,
    rasterizer: Arc<dyn Rasterizer>,
    config: &PipelineConfig,
    cancel: &CancelToken,
) -> RenderOutcome {
    let planned = plan(units);
    let total = planned.len();
    let cb = config.progress_callback.clone();
    if let Some(ref cb) = cb {
        cb.on_batch_start(total, config.mode);
    }

    let mut slots: Vec<Option<RenderedPage>> = vec![None; total];
    let page = |p: &PlannedPage| RenderedPage {
        slot: p.slot,
        shipment_unit_index: p.shipment_unit_index,
        role: p.role,
        raster: None,
        status: PageStatus::Skipped,
        error: None,
        already_printed: p.role == PageRole::Label
            && ledger.is_printed(&units[p.shipment_unit_index].content_hash),
    };

    // ── Fast mode: settle invoice pages without rasterising ──────────────
    let mut jobs = Vec::with_capacity(total);
    let mut completed = 0;
    for p in &planned {
        if config.mode == ProcessingMode::FastLabelOnly && p.role == PageRole::Invoice {
            slots[p.slot] = Some(page(p));
            completed += 1;
        } else {
            jobs.push(*p);
        }
    }
    if completed > 0 {
        debug!("Skipped {} invoice pages (fast mode)", completed);
        if let Some(ref cb) = cb {
            cb.on_progress(completed, total, &format!("{completed} invoice pages skipped"));
        }
    }

    // ── Chunked rasterisation ────────────────────────────────────────────
    let chunk_size = config.chunk_size.max(1);
    let chunk_count = jobs.len().div_ceil(chunk_size);
    let mut cancelled = false;
    for (ci, chunk) in jobs.chunks(chunk_size).enumerate() {
        if ci > 0 && config.chunk_pause_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.chunk_pause_ms)).await;
        }
        if cancel.is_cancelled() {
            info!("Rendering cancelled after {}/{} pages", completed, total);
            cancelled = true;
            break;
        }

        let results: Vec<(usize, Result<GrayImage, PageError>)> =
            stream::iter(chunk.iter().copied().map(|p| {
                let rasterizer = Arc::clone(&rasterizer);
                let markup = documents[p.document].markup.clone();
                let geometry = config.layout.label;
                let slot = p.slot;
                let timeout_secs = config.render_timeout_secs;
                async move {
                    let handle =
                        tokio::task::spawn_blocking(move || rasterizer.rasterize(&markup, &geometry));
                    let joined = match timeout_secs {
                        Some(secs) => {
                            match tokio::time::timeout(Duration::from_secs(secs), handle).await {
                                Ok(joined) => joined,
                                Err(_) => return (slot, Err(PageError::Timeout { slot, secs })),
                            }
                        }
                        None => handle.await,
                    };
                    let result = match joined {
                        Ok(Ok(img)) => Ok(img),
                        Ok(Err(e)) => Err(PageError::RenderFailed {
                            slot,
                            detail: e.to_string(),
                        }),
                        Err(e) => Err(PageError::Panicked {
                            slot,
                            detail: e.to_string(),
                        }),
                    };
                    (slot, result)
                }
            }))
            .buffer_unordered(config.concurrency.max(1))
            .collect()
            .await;

        for (slot, result) in results {
            let mut rendered = page(&planned[slot]);
            match result {
                Ok(img) => {
                    rendered.status = PageStatus::Ok;
                    rendered.raster = Some(Arc::new(img));
                    if let (true, Some(cb)) = (config.emit_previews, &cb) {
                        match encode::preview(&rendered) {
                            Some(Ok(preview)) => cb.on_preview(&preview),
                            Some(Err(e)) => warn!("Preview for page {} failed: {}", slot, e),
                            None => {}
                        }
                    }
                }
                Err(e) => {
                    warn!("{}", e);
                    if let Some(ref cb) = cb {
                        cb.on_page_error(slot, total, &e.to_string());
                    }
                    rendered.status = PageStatus::Failed;
                    rendered.error = Some(e);
                }
            }
            slots[slot] = Some(rendered);
        }

        completed += chunk.len();
        debug!("Chunk {}/{} done ({}/{})", ci + 1, chunk_count, completed, total);
        if let Some(ref cb) = cb {
            cb.on_progress(
                completed,
                total,
                &format!("chunk {}/{}", ci + 1, chunk_count),
            );
        }
    }

    RenderOutcome {
        pages: slots.into_iter().flatten().collect(),
        cancelled,
    }
}
