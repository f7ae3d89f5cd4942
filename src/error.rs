//! Error types for the labelpress library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`LabelError`] — **Fatal**: the batch cannot proceed at all (nothing to
//!   process, bad configuration, unreadable input file). Returned as
//!   `Err(LabelError)` from the top-level `process*` functions.
//!
//! * [`PageError`] — **Non-fatal**: a single page failed to rasterise but all
//!   other pages are fine. Stored inside [`crate::output::RenderedPage`] so the
//!   assembler can draw a placeholder instead of losing the page slot.
//!
//! * [`RasterError`] — what a [`crate::pipeline::raster::Rasterizer`] returns
//!   for one page. The render stage wraps it into a [`PageError`].
//!
//! Everything else the pipeline recovers from (malformed boundaries, missing
//! invoices, unresolved SKUs) is a warning, see [`crate::warnings`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the labelpress library.
#[derive(Debug, Error)]
pub enum LabelError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The markup is empty or contains no complete `^XA … ^XZ` document.
    #[error("Input contains no valid label documents ({malformed} malformed segment(s) discarded)")]
    FatalInputEmpty { malformed: usize },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write an output page or manifest.
    #[error("Failed to write output '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A page image could not be encoded.
    #[error("Failed to encode page {page}: {detail}")]
    EncodeFailed { page: usize, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// `slot` is the 0-based position of the page in the render plan.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The rasterizer returned an error.
    #[error("Page {slot}: rasterisation failed: {detail}")]
    RenderFailed { slot: usize, detail: String },

    /// The rasterizer did not finish within the configured timeout.
    #[error("Page {slot}: rasterisation timed out after {secs}s")]
    Timeout { slot: usize, secs: u64 },

    /// The blocking rasterisation task panicked.
    #[error("Page {slot}: rasterisation task panicked: {detail}")]
    Panicked { slot: usize, detail: String },
}

impl PageError {
    pub fn slot(&self) -> usize {
        match self {
            PageError::RenderFailed { slot, .. }
            | PageError::Timeout { slot, .. }
            | PageError::Panicked { slot, .. } => *slot,
        }
    }
}

/// Errors raised by a rasterizer for one document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RasterError {
    /// The document has no drawable commands.
    #[error("document has no ^XA … ^XZ content")]
    EmptyMarkup,

    /// The requested canvas exceeds the configured pixel budget.
    #[error("canvas {width}x{height} exceeds the limit of {limit} pixels")]
    CanvasTooLarge { width: u32, height: u32, limit: u64 },

    /// A `^GF` graphic field could not be decoded.
    #[error("invalid graphic field: {0}")]
    InvalidGraphic(String),

    /// A custom rasterizer failed for its own reasons.
    #[error("{0}")]
    Backend(String),
}
