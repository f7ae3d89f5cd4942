//! # labelpress
//!
//! Turn a marketplace's concatenated ZPL shipping-label export into
//! printable sheets, with invoices paired to their labels and product
//! footers drawn under each label.
//!
//! ## Why this crate?
//!
//! Marketplace sellers download hundreds of labels as a single ZPL blob:
//! invoices (DANFE) and shipping labels interleaved, sometimes with the
//! invoice embedded in the label, sometimes truncated at the end. Printing
//! that blob as-is loses the product information the packer needs and
//! reprints labels that already went out. This crate splits the blob,
//! reads each document, links SKUs to the catalog, pairs invoices with
//! labels, rasterises the pages in bounded chunks and lays them out on
//! sheets, while a content-hash ledger flags reprints.
//!
//! ## Pipeline Overview
//!
//! ```text
//! ZPL blob
//!  │
//!  ├─ 1. Segment   split on ^XA … ^XZ, drop unclosed documents
//!  ├─ 2. Extract   order reference, SKU lines, invoice markers, marketplace
//!  ├─ 3. Enrich    SKU-link multipliers and known orders
//!  ├─ 4. Pair      invoice + label → shipment units
//!  ├─ 5. Render    chunked rasterisation (CPU-bound, spawn_blocking)
//!  └─ 6. Assemble  sheets, footers, reprint marks, manifest
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use labelpress::{process_batch, BatchInput, PipelineConfig, PrintLedger};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let markup = std::fs::read_to_string("labels.zpl")?;
//!     let config = PipelineConfig::default();
//!     let mut ledger = PrintLedger::new();
//!     let output = process_batch(&BatchInput::new(markup), &mut ledger, &config).await?;
//!     println!("{} sheets, {} reprints",
//!         output.summary.sheets,
//!         output.summary.reprints);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `labelpress` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! labelpress = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod ledger;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod stream;
pub mod warnings;
pub mod zpl;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ExtractionPatterns, FieldPattern, FooterConfig, FooterPosition, LayoutConfig, Orientation,
    PageGeometry, PairLayout, PairingMode, PipelineConfig, PipelineConfigBuilder, ProcessingMode,
    TextAlign,
};
pub use error::{LabelError, PageError, RasterError};
pub use ledger::{content_hash, PrintLedger, PrintLedgerEntry};
pub use model::{
    BatchInput, EnrichedLine, ExtractedFields, LineItem, MarketplaceKind, OrderBook, OrderRecord,
    RawDocument, ShipmentUnit, SkuLink, SkuLinkTable,
};
pub use output::{
    AssembledDocument, AssembledPage, BatchOutput, BatchSummary, PagePreview, PageRole, PageStatus,
    Placement, RenderedPage,
};
pub use pipeline::raster::{Rasterizer, ZplRasterizer};
pub use pipeline::render::CancelToken;
pub use process::{
    prepare_batch, process_batch, process_batch_sync, process_batch_to_dir, process_batch_with,
};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use stream::{process_stream, process_stream_with, EventStream, PipelineEvent};
pub use warnings::{BatchWarning, PairingIssue, WarningKind};
