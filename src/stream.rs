//! Streaming batch API: observe a batch as events instead of callbacks.
//!
//! [`process_stream`] runs the batch on a spawned task and yields
//! [`PipelineEvent`]s in the order they happen: one `Start`, any number of
//! `Progress` and `Preview` events, and exactly one terminal `Done` or
//! `Error`. Nothing is emitted after the terminal event.
//!
//! The ledger is moved into the task and handed back with `Done`, already
//! updated with the labels printed by this batch.
//!
//! Dropping the stream cancels the batch: rendering stops before the next
//! chunk. A panic inside the batch task surfaces as a final `Error` event.

use crate::config::{PipelineConfig, ProcessingMode};
use crate::ledger::PrintLedger;
use crate::model::BatchInput;
use crate::output::{BatchOutput, BatchSummary, PagePreview};
use crate::pipeline::raster::ZplRasterizer;
use crate::pipeline::render::CancelToken;
use crate::process::process_batch_with;
use crate::progress::{BatchProgressCallback, ProgressCallback};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tracing::{debug, warn};

/// One observable step of a running batch.
#[derive(Debug)]
pub enum PipelineEvent {
    /// Rendering is about to begin for `total` page slots.
    Start { total: usize },
    Progress {
        completed: usize,
        total: usize,
        message: String,
    },
    /// Only emitted when [`PipelineConfig::emit_previews`] is set.
    Preview(PagePreview),
    Done {
        output: Box<BatchOutput>,
        ledger: PrintLedger,
    },
    Error { message: String },
}

impl PipelineEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineEvent::Done { .. } | PipelineEvent::Error { .. })
    }
}

/// A boxed stream of pipeline events.
pub type EventStream = Pin<Box<dyn Stream<Item = PipelineEvent> + Send>>;

/// Forwards callback events into the channel, then to the caller's callback.
///
/// Cancels the batch once the receiving stream has been dropped.
struct ChannelCallback {
    tx: UnboundedSender<PipelineEvent>,
    inner: Option<ProgressCallback>,
    cancel: CancelToken,
}

impl ChannelCallback {
    fn send(&self, event: PipelineEvent) {
        if self.tx.send(event).is_err() && !self.cancel.is_cancelled() {
            debug!("Event stream dropped, cancelling batch");
            self.cancel.cancel();
        }
    }
}

impl BatchProgressCallback for ChannelCallback {
    fn on_batch_start(&self, total_pages: usize, mode: ProcessingMode) {
        self.send(PipelineEvent::Start { total: total_pages });
        if let Some(ref cb) = self.inner {
            cb.on_batch_start(total_pages, mode);
        }
    }

    fn on_progress(&self, completed: usize, total: usize, message: &str) {
        self.send(PipelineEvent::Progress {
            completed,
            total,
            message: message.to_string(),
        });
        if let Some(ref cb) = self.inner {
            cb.on_progress(completed, total, message);
        }
    }

    fn on_preview(&self, preview: &PagePreview) {
        self.send(PipelineEvent::Preview(preview.clone()));
        if let Some(ref cb) = self.inner {
            cb.on_preview(preview);
        }
    }

    fn on_page_error(&self, slot: usize, total: usize, error: &str) {
        if let Some(ref cb) = self.inner {
            cb.on_page_error(slot, total, error);
        }
    }

    fn on_batch_complete(&self, summary: &BatchSummary) {
        if let Some(ref cb) = self.inner {
            cb.on_batch_complete(summary);
        }
    }
}

/// Run a batch in the background and stream its events.
///
/// Must be called from within a tokio runtime. Any progress callback already
/// set on `config` keeps receiving its calls.
pub fn process_stream(input: BatchInput, ledger: PrintLedger, config: PipelineConfig) -> EventStream {
    process_stream_with(input, ledger, config, CancelToken::new())
}

/// [`process_stream`] with a caller-held cancel token.
///
/// The token is also cancelled when the returned stream is dropped.
pub fn process_stream_with(
    input: BatchInput,
    ledger: PrintLedger,
    mut config: PipelineConfig,
    cancel: CancelToken,
) -> EventStream {
    let (tx, rx) = unbounded_channel();
    let forward = ChannelCallback {
        tx: tx.clone(),
        inner: config.progress_callback.take(),
        cancel: cancel.clone(),
    };
    config.progress_callback = Some(Arc::new(forward));

    let batch = tokio::spawn(async move {
        let mut ledger = ledger;
        let rasterizer = Arc::new(ZplRasterizer::new(config.max_canvas_pixels));
        let result = process_batch_with(&input, &mut ledger, &config, rasterizer, &cancel).await;
        (result, ledger)
        // `config` drops here with the forwarding sender.
    });

    tokio::spawn(async move {
        let event = match batch.await {
            Ok((Ok(output), ledger)) => PipelineEvent::Done {
                output: Box::new(output),
                ledger,
            },
            Ok((Err(e), _)) => {
                warn!("Batch failed: {}", e);
                PipelineEvent::Error {
                    message: e.to_string(),
                }
            }
            Err(e) => {
                warn!("Batch task failed: {}", e);
                PipelineEvent::Error {
                    message: format!("Batch task failed: {e}"),
                }
            }
        };
        let _ = tx.send(event);
    });

    Box::pin(UnboundedReceiverStream::new(rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PairingMode;
    use futures::StreamExt;
    use std::sync::Mutex;
    use std::time::Duration;

    const BLOB: &str = "^XA^FO20,20^FDDANFE^FS^XZ\n\
        ^XA^FO20,20^FDMercado Envios^FS^FO20,60^FDMUG-01 - Mug - 1 UN^FS^XZ";

    #[tokio::test]
    async fn stream_ends_with_done() {
        let config = PipelineConfig::builder()
            .chunk_pause_ms(0)
            .emit_previews(true)
            .build()
            .unwrap();
        let events: Vec<_> = process_stream(BatchInput::new(BLOB), PrintLedger::new(), config)
            .collect()
            .await;

        assert!(matches!(events.first(), Some(PipelineEvent::Start { total: 2 })));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert_eq!(
            events.iter().filter(|e| matches!(e, PipelineEvent::Preview(_))).count(),
            2
        );
        match events.last() {
            Some(PipelineEvent::Done { output, ledger }) => {
                assert_eq!(output.summary.shipment_units, 1);
                assert_eq!(ledger.len(), 1);
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_input_yields_only_error() {
        let events: Vec<_> = process_stream(
            BatchInput::new("no labels here"),
            PrintLedger::new(),
            PipelineConfig::default(),
        )
        .collect()
        .await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], PipelineEvent::Error { .. }));
    }

    #[derive(Default)]
    struct Watch {
        max_completed: Mutex<usize>,
        finished: Mutex<Option<BatchSummary>>,
    }

    impl BatchProgressCallback for Watch {
        fn on_progress(&self, completed: usize, _total: usize, _message: &str) {
            let mut max = self.max_completed.lock().unwrap();
            *max = (*max).max(completed);
        }

        fn on_batch_complete(&self, summary: &BatchSummary) {
            *self.finished.lock().unwrap() = Some(summary.clone());
        }
    }

    #[tokio::test]
    async fn dropping_the_stream_cancels_rendering() {
        let labels: String = (0..40)
            .map(|n| format!("^XA^FO20,20^FDMercado Envios^FS^FO20,60^FDMUG-{n} - Mug - 1 UN^FS^XZ\n"))
            .collect();
        let watch = Arc::new(Watch::default());
        let config = PipelineConfig::builder()
            .pairing(PairingMode::LabelOnly)
            .chunk_size(2)
            .chunk_pause_ms(10)
            .progress_callback(watch.clone())
            .build()
            .unwrap();
        let token = CancelToken::new();
        let mut events =
            process_stream_with(BatchInput::new(labels), PrintLedger::new(), config, token.clone());

        assert!(matches!(events.next().await, Some(PipelineEvent::Start { total: 40 })));
        drop(events);

        let summary = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if let Some(summary) = watch.finished.lock().unwrap().clone() {
                    return summary;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("batch should settle after the stream is dropped");

        assert!(token.is_cancelled());
        assert!(summary.cancelled);
        assert!(*watch.max_completed.lock().unwrap() <= 4);
    }

    struct PanicOnStart;

    impl BatchProgressCallback for PanicOnStart {
        fn on_batch_start(&self, _total_pages: usize, _mode: ProcessingMode) {
            panic!("callback exploded");
        }
    }

    #[tokio::test]
    async fn panicking_batch_ends_with_error() {
        let config = PipelineConfig::builder()
            .chunk_pause_ms(0)
            .progress_callback(Arc::new(PanicOnStart))
            .build()
            .unwrap();
        let events: Vec<_> = process_stream(BatchInput::new(BLOB), PrintLedger::new(), config)
            .collect()
            .await;

        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        match events.last() {
            Some(PipelineEvent::Error { message }) => assert!(message.contains("Batch task failed")),
            other => panic!("expected Error, got {other:?}"),
        }
    }
}
