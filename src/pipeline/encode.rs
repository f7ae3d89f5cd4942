//! Image encoding: `GrayImage` → PNG bytes, and PNG → base64 data URI for
//! previews.
//!
//! PNG because labels are bilevel: it is lossless and compresses a mostly
//! white page to a few kilobytes, where JPEG would smear barcode edges.

use crate::output::{PagePreview, RenderedPage};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{GrayImage, ImageFormat};
use std::io::Cursor;
use tracing::debug;

/// Encode a page raster as PNG.
pub fn encode_png(img: &GrayImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}

/// `data:image/png;base64,…` for a page raster.
pub fn data_uri(img: &GrayImage) -> Result<String, image::ImageError> {
    let png = encode_png(img)?;
    let b64 = STANDARD.encode(&png);
    debug!("Encoded {}x{} preview → {} bytes base64", img.width(), img.height(), b64.len());
    Ok(format!("data:image/png;base64,{b64}"))
}

/// Preview for a rendered page. `None` when the page has no raster.
pub fn preview(page: &RenderedPage) -> Option<Result<PagePreview, image::ImageError>> {
    let raster = page.raster.as_ref()?;
    Some(data_uri(raster).map(|data_uri| PagePreview {
        slot: page.slot,
        shipment_unit_index: page.shipment_unit_index,
        role: page.role,
        width: raster.width(),
        height: raster.height(),
        data_uri,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{PageRole, PageStatus};
    use image::Luma;
    use std::sync::Arc;

    #[test]
    fn encode_small_image() {
        let img = GrayImage::from_pixel(10, 10, Luma([0]));
        let uri = data_uri(&img).expect("encode should succeed");
        let b64 = uri
            .strip_prefix("data:image/png;base64,")
            .expect("data uri prefix");
        let decoded = STANDARD.decode(b64).expect("valid base64");
        let back = image::load_from_memory(&decoded).expect("valid png").to_luma8();
        assert_eq!(back, img);
    }

    #[test]
    fn preview_needs_a_raster() {
        let mut page = RenderedPage {
            slot: 3,
            shipment_unit_index: 1,
            role: PageRole::Label,
            raster: None,
            status: PageStatus::Failed,
            error: None,
            already_printed: false,
        };
        assert!(preview(&page).is_none());

        page.raster = Some(Arc::new(GrayImage::new(4, 2)));
        page.status = PageStatus::Ok;
        let p = preview(&page).unwrap().unwrap();
        assert_eq!((p.slot, p.width, p.height), (3, 4, 2));
    }
}
