//! Output types: rendered pages, the assembled document and batch summaries.

use crate::config::PageGeometry;
use crate::error::PageError;
use crate::model::ShipmentUnit;
use crate::warnings::BatchWarning;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which document of a shipment unit a page shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageRole {
    Invoice,
    Label,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageStatus {
    Ok,
    /// Not rasterised on purpose (invoice pages in fast mode).
    Skipped,
    Failed,
}

/// One page of the render plan.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// Position in the render plan.
    pub slot: usize,
    pub shipment_unit_index: usize,
    pub role: PageRole,
    pub raster: Option<Arc<GrayImage>>,
    pub status: PageStatus,
    pub error: Option<PageError>,
    /// The label's content hash was already in the print ledger.
    pub already_printed: bool,
}

/// A rendered page encoded for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagePreview {
    pub slot: usize,
    pub shipment_unit_index: usize,
    pub role: PageRole,
    pub width: u32,
    pub height: u32,
    /// `data:image/png;base64,…`
    pub data_uri: String,
}

/// Axis-aligned rectangle in sheet pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// One column of footer text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FooterColumn {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub lines: Vec<String>,
}

/// Footer text laid out for one label, ready to be drawn by a printer driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FooterOverlay {
    pub area: Rect,
    pub columns: Vec<FooterColumn>,
    pub font_family: String,
    pub font_size: f32,
    /// Distance between baselines in pixels.
    pub line_height: f32,
    pub alignment: crate::config::TextAlign,
}

/// A page image (or its placeholder) placed on a sheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Placement {
    pub shipment_unit_index: usize,
    pub role: PageRole,
    /// The slot reserved for this page on the sheet.
    pub slot: Rect,
    /// Where the raster is drawn inside the slot.
    pub raster_rect: Rect,
    #[serde(skip)]
    pub raster: Option<Arc<GrayImage>>,
    /// Set for pages that failed to render; drawn as a visible placeholder.
    pub error: Option<String>,
    pub footer: Option<FooterOverlay>,
    pub reprint: bool,
}

impl Placement {
    pub fn is_placeholder(&self) -> bool {
        self.raster.is_none()
    }
}

/// One output sheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssembledPage {
    /// 1-based sheet number.
    pub number: usize,
    pub placements: Vec<Placement>,
}

/// The print-ready artifact of a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssembledDocument {
    pub sheet: PageGeometry,
    pub pages: Vec<AssembledPage>,
}

impl AssembledDocument {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn placements(&self) -> impl Iterator<Item = &Placement> {
        self.pages.iter().flat_map(|p| p.placements.iter())
    }
}

/// Counts and warnings for one batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub documents: usize,
    pub malformed_documents: usize,
    pub shipment_units: usize,
    /// Units whose label yielded no line items.
    pub unresolved_labels: usize,
    /// Line items without a SKU link.
    pub unresolved_skus: usize,
    /// Invoice pages not rasterised in fast mode.
    pub skipped_invoices: usize,
    /// Invoice documents left out by label-only pairing.
    pub excluded_invoices: usize,
    /// Invoice documents with no label to pair with.
    pub orphan_invoices: usize,
    pub rendered_pages: usize,
    pub failed_pages: usize,
    /// Labels already present in the print ledger.
    pub reprints: usize,
    pub sheets: usize,
    /// At least one label embeds its invoice; callers may turn off
    /// "include invoice".
    pub embedded_invoices_detected: bool,
    /// Rendering stopped early on request.
    pub cancelled: bool,
    pub warnings: Vec<BatchWarning>,
}

/// Everything a batch hands back to the caller.
#[derive(Debug, Clone)]
pub struct BatchOutput {
    pub document: AssembledDocument,
    pub units: Vec<ShipmentUnit>,
    pub pages: Vec<RenderedPage>,
    pub summary: BatchSummary,
    /// Content hashes added to the ledger by this batch, for persistence.
    pub new_hashes: Vec<String>,
}
