//! Pipeline stages for label batch processing.
//!
//! Each submodule implements exactly one transformation step. Everything up
//! to pairing is synchronous and cheap; rendering is the only concurrent
//! stage.
//!
//! ## Data Flow
//!
//! ```text
//! markup ──▶ segment ──▶ extract ──▶ enrich ──▶ pair ──▶ render ──▶ assemble
//!           (^XA…^XZ)    (fields)    (SKU links) (units)  (rasters)  (sheets)
//! ```
//!
//! 1. [`segment`]  — split the blob into documents, dropping unclosed ones
//! 2. [`extract`]  — order reference, SKU lines, markers and marketplace
//! 3. [`enrich`]   — SKU-link multipliers and known-order context
//! 4. [`pair`]     — classify documents and group invoice + label into units
//! 5. [`render`]   — chunked, bounded-concurrency rasterisation through a
//!    [`raster::Rasterizer`]; previews go through [`encode`]
//! 6. [`assemble`] — place pages on sheets with footer overlays

pub mod assemble;
pub mod encode;
pub mod enrich;
pub mod extract;
pub mod pair;
pub mod raster;
pub mod render;
pub mod segment;
