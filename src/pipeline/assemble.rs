//! Document assembly: place rendered pages on output sheets and attach
//! footer overlays to labels.
//!
//! Inclusion depends only on `include_invoice` and page status; footer
//! settings move the raster inside its slot but never change which pages
//! appear or where their slots are. A failed page keeps its slot and is drawn
//! as a placeholder so sheet order stays aligned with the physical stock.

use crate::config::{FooterConfig, FooterPosition, LayoutConfig, PageGeometry, PairLayout};
use crate::model::{EnrichedLine, ShipmentUnit};
use crate::output::{
    AssembledDocument, AssembledPage, FooterColumn, FooterOverlay, PageRole, PageStatus,
    Placement, Rect, RenderedPage,
};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use tracing::debug;

/// Result of [`assemble`].
#[derive(Debug, Clone)]
pub struct Assembly {
    pub document: AssembledDocument,
    /// Invoice pages left out because fast mode never rendered them.
    pub skipped_invoices: usize,
}

/// Lay out `pages` (in plan order) on sheets.
pub fn assemble(pages: &[RenderedPage], units: &[ShipmentUnit], layout: &LayoutConfig) -> Assembly {
    let sheet = layout.sheet;
    let mut skipped_invoices = 0;
    let mut sheets: Vec<Vec<Placement>> = Vec::new();
    let mut current_unit = None;

    for page in pages {
        if page.status == PageStatus::Skipped {
            if page.role == PageRole::Invoice {
                skipped_invoices += 1;
            }
            continue;
        }
        if page.role == PageRole::Invoice && !layout.include_invoice {
            continue;
        }
        let Some(unit) = units.get(page.shipment_unit_index) else {
            continue;
        };

        let slot = slot_rect(&sheet, layout.pair_layout, page.role);
        let placement = place(page, unit, slot, layout);
        let shares_sheet = layout.pair_layout != PairLayout::Separate
            && current_unit == Some(page.shipment_unit_index)
            && page.role == PageRole::Label;
        match sheets.last_mut() {
            Some(last) if shares_sheet => last.push(placement),
            _ => sheets.push(vec![placement]),
        }
        current_unit = Some(page.shipment_unit_index);
    }

    let pages: Vec<AssembledPage> = sheets
        .into_iter()
        .enumerate()
        .map(|(i, placements)| AssembledPage {
            number: i + 1,
            placements,
        })
        .collect();
    debug!(
        "Assembled {} sheets ({} invoice pages skipped)",
        pages.len(),
        skipped_invoices
    );
    Assembly {
        document: AssembledDocument { sheet, pages },
        skipped_invoices,
    }
}

/// Slot of a page on its sheet. Paired layouts give the invoice the first
/// half and the label the second, whether or not the invoice is present.
fn slot_rect(sheet: &PageGeometry, layout: PairLayout, role: PageRole) -> Rect {
    let (w, h) = (sheet.width_px(), sheet.height_px());
    match (layout, role) {
        (PairLayout::Separate, _) => Rect { x: 0, y: 0, width: w, height: h },
        (PairLayout::Vertical, PageRole::Invoice) => Rect { x: 0, y: 0, width: w, height: h / 2 },
        (PairLayout::Vertical, PageRole::Label) => Rect {
            x: 0,
            y: h / 2,
            width: w,
            height: h - h / 2,
        },
        (PairLayout::Horizontal, PageRole::Invoice) => Rect { x: 0, y: 0, width: w / 2, height: h },
        (PairLayout::Horizontal, PageRole::Label) => Rect {
            x: w / 2,
            y: 0,
            width: w - w / 2,
            height: h,
        },
    }
}

fn place(page: &RenderedPage, unit: &ShipmentUnit, slot: Rect, layout: &LayoutConfig) -> Placement {
    let footer_cfg = &layout.footer;
    let footer = (page.role == PageRole::Label && footer_cfg.enabled)
        .then(|| footer_overlay(unit, slot, footer_cfg))
        .flatten();

    let raster_area = match (&footer, footer_cfg.position) {
        (Some(_), FooterPosition::Below) => {
            let band = band_height(slot, footer_cfg);
            Rect { height: slot.height - band, ..slot }
        }
        (Some(_), FooterPosition::Above) => {
            let band = band_height(slot, footer_cfg);
            Rect {
                y: slot.y + band,
                height: slot.height - band,
                ..slot
            }
        }
        _ => slot,
    };

    let raster_rect = match &page.raster {
        Some(img) => fit(img.width(), img.height(), raster_area),
        None => raster_area,
    };
    let error = match page.status {
        PageStatus::Failed => Some(
            page.error
                .as_ref()
                .map_or_else(|| "rendering failed".to_string(), |e| e.to_string()),
        ),
        _ => None,
    };

    Placement {
        shipment_unit_index: page.shipment_unit_index,
        role: page.role,
        slot,
        raster_rect,
        raster: page.raster.clone(),
        error,
        footer,
        reprint: layout.mark_reprints && page.already_printed,
    }
}

fn band_height(slot: Rect, footer: &FooterConfig) -> u32 {
    footer.band_height_px.min(slot.height / 2)
}

/// Largest rectangle with the raster's aspect ratio, centred in `area`.
fn fit(width: u32, height: u32, area: Rect) -> Rect {
    if width == 0 || height == 0 || area.width == 0 || area.height == 0 {
        return area;
    }
    let scale = (area.width as f64 / width as f64).min(area.height as f64 / height as f64);
    let w = ((width as f64 * scale).round() as u32).clamp(1, area.width);
    let h = ((height as f64 * scale).round() as u32).clamp(1, area.height);
    Rect {
        x: area.x + (area.width - w) / 2,
        y: area.y + (area.height - h) / 2,
        width: w,
        height: h,
    }
}

/// Footer for one label: one template line per enriched line, split into
/// columns of `lines_per_column`. `None` when the label has no lines.
pub fn footer_overlay(unit: &ShipmentUnit, slot: Rect, cfg: &FooterConfig) -> Option<FooterOverlay> {
    if unit.enriched_lines.is_empty() {
        return None;
    }
    let template = cfg.template_for(unit.marketplace);
    let lines: Vec<String> = unit
        .enriched_lines
        .iter()
        .map(|line| footer_line(template, line, unit))
        .collect();

    let area = match cfg.position {
        FooterPosition::Below => {
            let band = band_height(slot, cfg);
            Rect {
                y: slot.y + slot.height - band,
                height: band,
                ..slot
            }
        }
        FooterPosition::Above => Rect {
            height: band_height(slot, cfg),
            ..slot
        },
        FooterPosition::Custom { x, y } => {
            let (x, y) = (x.min(slot.width), y.min(slot.height));
            Rect {
                x: slot.x + x,
                y: slot.y + y,
                width: slot.width - x,
                height: slot.height - y,
            }
        }
    };

    let per_column = cfg.lines_per_column.max(1);
    let column_count = lines.len().div_ceil(per_column) as u32;
    let column_width = area.width / column_count.max(1);
    let columns = lines
        .chunks(per_column)
        .enumerate()
        .map(|(c, chunk)| FooterColumn {
            x: area.x + c as u32 * column_width,
            y: area.y,
            width: column_width,
            lines: chunk.to_vec(),
        })
        .collect();

    Some(FooterOverlay {
        area,
        columns,
        font_family: cfg.font_family.clone(),
        font_size: cfg.font_size,
        line_height: cfg.font_size * cfg.line_spacing,
        alignment: cfg.alignment,
    })
}

/// Fill a footer template for one line.
///
/// `{sku}` is the master SKU when the line is linked, `{qty}` the shipped
/// unit count (`quantity * multiplier`). Substitution is a single pass, so
/// braces inside substituted values are printed as they are. Unknown
/// placeholders are kept verbatim.
pub fn footer_line(template: &str, line: &EnrichedLine, unit: &ShipmentUnit) -> String {
    let value = |key: &str| -> Option<String> {
        match key {
            "sku" => Some(
                line.resolved_master_sku
                    .as_deref()
                    .unwrap_or(&line.sku)
                    .to_string(),
            ),
            "name" => Some(line.display_name.clone().unwrap_or_default()),
            "qty" => Some(format_quantity(line.units())),
            "order" => Some(unit.order_reference.clone().unwrap_or_default()),
            "buyer" => Some(
                unit.order
                    .as_ref()
                    .and_then(|o| o.buyer_name.clone())
                    .unwrap_or_default(),
            ),
            _ => None,
        }
    };

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}').and_then(|close| Some((close, value(&after[..close])?))) {
            Some((close, v)) => {
                out.push_str(&v);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// `2` for whole numbers, up to three decimals otherwise.
pub fn format_quantity(q: f64) -> String {
    let rounded = (q * 1000.0).round() / 1000.0;
    format!("{rounded}")
}

impl AssembledPage {
    /// Rasterise the sheet: page rasters scaled into place, failed pages as
    /// crossed boxes and a corner mark on reprints. Footer text is left to
    /// whatever prints the overlay.
    pub fn compose(&self, sheet: &PageGeometry) -> GrayImage {
        let mut canvas = GrayImage::from_pixel(sheet.width_px(), sheet.height_px(), Luma([255]));
        for p in &self.placements {
            let r = p.raster_rect;
            match &p.raster {
                Some(img) if r.width > 0 && r.height > 0 => {
                    let scaled = if (img.width(), img.height()) == (r.width, r.height) {
                        (**img).clone()
                    } else {
                        imageops::resize(&**img, r.width, r.height, FilterType::Triangle)
                    };
                    imageops::overlay(&mut canvas, &scaled, r.x as i64, r.y as i64);
                }
                Some(_) => {}
                None => draw_placeholder(&mut canvas, r),
            }
            if p.reprint {
                let side = (p.slot.width.min(p.slot.height) / 12).max(4);
                fill(
                    &mut canvas,
                    Rect {
                        x: p.slot.x + p.slot.width.saturating_sub(side),
                        y: p.slot.y,
                        width: side,
                        height: side,
                    },
                );
            }
        }
        canvas
    }
}

impl AssembledDocument {
    /// JSON description of every sheet, without pixel data.
    pub fn manifest(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn fill(canvas: &mut GrayImage, r: Rect) {
    for y in r.y..(r.y + r.height).min(canvas.height()) {
        for x in r.x..(r.x + r.width).min(canvas.width()) {
            canvas.put_pixel(x, y, Luma([0]));
        }
    }
}

fn draw_placeholder(canvas: &mut GrayImage, r: Rect) {
    if r.width == 0 || r.height == 0 {
        return;
    }
    let t = 3u32.min(r.width).min(r.height);
    fill(canvas, Rect { height: t, ..r });
    fill(canvas, Rect { y: r.y + r.height - t, height: t, ..r });
    fill(canvas, Rect { width: t, ..r });
    fill(canvas, Rect { x: r.x + r.width - t, width: t, ..r });

    let steps = r.width.max(r.height);
    for i in 0..steps {
        let x = r.x + (i as u64 * r.width as u64 / steps as u64) as u32;
        let y = r.y + (i as u64 * r.height as u64 / steps as u64) as u32;
        let y2 = r.y + r.height - 1 - (y - r.y);
        for (px, py) in [(x, y), (x, y2)] {
            if px < canvas.width() && py < canvas.height() {
                canvas.put_pixel(px, py, Luma([0]));
            }
        }
    }
}
