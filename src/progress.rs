//! Progress-callback trait for batch rendering events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events while the render stage works through its chunks. Callers that
//! prefer a channel can use [`crate::stream::process_stream`], which is
//! built on top of this trait.
//!
//! # Example
//!
//! ```rust
//! use labelpress::{BatchProgressCallback, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct LastCount(AtomicUsize);
//!
//! impl BatchProgressCallback for LastCount {
//!     fn on_progress(&self, completed: usize, total: usize, message: &str) {
//!         self.0.store(completed, Ordering::SeqCst);
//!         eprintln!("{completed}/{total} {message}");
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(LastCount(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::config::ProcessingMode;
use crate::output::{BatchSummary, PagePreview};
use std::sync::Arc;

/// Called by the pipeline as it renders a batch.
///
/// All methods have default no-op implementations. Page-level methods may be
/// called from different tasks within a chunk; `on_progress` is called from
/// the driving task only, once per chunk, with a strictly increasing
/// `completed` count.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before the first chunk.
    ///
    /// * `total_pages` — pages in the render plan, skipped ones included
    fn on_batch_start(&self, total_pages: usize, mode: ProcessingMode) {
        let _ = (total_pages, mode);
    }

    /// Called after every chunk.
    ///
    /// * `completed` — pages settled so far (rendered, failed or skipped)
    /// * `total`     — pages in the plan
    /// * `message`   — short human-readable status line
    fn on_progress(&self, completed: usize, total: usize, message: &str) {
        let _ = (completed, total, message);
    }

    /// Called with a PNG preview of each rendered page when previews are on.
    fn on_preview(&self, preview: &PagePreview) {
        let _ = preview;
    }

    /// Called when a single page fails.
    fn on_page_error(&self, slot: usize, total: usize, error: &str) {
        let _ = (slot, total, error);
    }

    /// Called once after assembly. Nothing is reported after this.
    fn on_batch_complete(&self, summary: &BatchSummary) {
        let _ = summary;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TrackingCallback {
        started_total: AtomicUsize,
        last_completed: AtomicUsize,
        errors: AtomicUsize,
    }

    impl BatchProgressCallback for TrackingCallback {
        fn on_batch_start(&self, total_pages: usize, _mode: ProcessingMode) {
            self.started_total.store(total_pages, Ordering::SeqCst);
        }

        fn on_progress(&self, completed: usize, _total: usize, _message: &str) {
            self.last_completed.store(completed, Ordering::SeqCst);
        }

        fn on_page_error(&self, _slot: usize, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(5, ProcessingMode::Full);
        cb.on_progress(2, 5, "chunk 1/3");
        cb.on_page_error(3, 5, "boom");
        cb.on_batch_complete(&BatchSummary::default());
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback {
            started_total: AtomicUsize::new(0),
            last_completed: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
        };
        tracker.on_batch_start(4, ProcessingMode::FastLabelOnly);
        tracker.on_progress(2, 4, "");
        tracker.on_page_error(1, 4, "bad graphic");
        tracker.on_progress(4, 4, "");

        assert_eq!(tracker.started_total.load(Ordering::SeqCst), 4);
        assert_eq!(tracker.last_completed.load(Ordering::SeqCst), 4);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_batch_start(10, ProcessingMode::Full);
        cb.on_progress(10, 10, "done");
    }
}
