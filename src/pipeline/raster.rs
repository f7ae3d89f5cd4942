//! Preview rasterisation of one ZPL document into a grayscale image.
//!
//! [`Rasterizer`] is the seam the render stage drives; it is blocking and is
//! always called from `spawn_blocking`. [`ZplRasterizer`] covers the command
//! subset found on marketplace labels and DANFE pages:
//!
//! | Command            | Effect                                             |
//! |--------------------|----------------------------------------------------|
//! | `^PW` `^LL`        | canvas width / length (else the page geometry)     |
//! | `^LH`              | label home offset                                  |
//! | `^FO` `^FT`        | field origin (`^FT` is a baseline)                 |
//! | `^A` `^CF`         | font height and width                              |
//! | `^FD` `^FV` `^FH`  | field data, optionally hex-escaped                 |
//! | `^FR`              | draw the field inverted                            |
//! | `^GB`              | box or filled rectangle                            |
//! | `^BY` `^B*`        | barcode module width / height, barcode field       |
//! | `^GF`              | graphic field, ASCII hex (compressed) or `:B64:`   |
//!
//! Text is drawn as one block per glyph and barcodes as a bar pattern derived
//! from the field bytes. That is enough to tell labels apart on screen; it is
//! not meant to be scanned.

use crate::config::PageGeometry;
use crate::error::RasterError;
use crate::zpl::{self, Command};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{GrayImage, Luma};
use tracing::debug;

const INK: u8 = 0;
const PAPER: u8 = 255;

/// Turns one document's markup into a page image.
pub trait Rasterizer: Send + Sync {
    fn rasterize(&self, markup: &str, geometry: &PageGeometry) -> Result<GrayImage, RasterError>;
}

/// Built-in preview rasterizer.
#[derive(Debug, Clone)]
pub struct ZplRasterizer {
    max_canvas_pixels: u64,
}

impl Default for ZplRasterizer {
    fn default() -> Self {
        Self::new(16_000_000)
    }
}

impl ZplRasterizer {
    pub fn new(max_canvas_pixels: u64) -> Self {
        Self { max_canvas_pixels }
    }
}

impl Rasterizer for ZplRasterizer {
    fn rasterize(&self, markup: &str, geometry: &PageGeometry) -> Result<GrayImage, RasterError> {
        let cmds = zpl::commands(markup);
        if !cmds
            .iter()
            .any(|c| matches!(c.code.as_str(), "FD" | "FV" | "GB" | "GF"))
        {
            return Err(RasterError::EmptyMarkup);
        }

        let width = last_positive(&cmds, "PW").unwrap_or_else(|| geometry.width_px());
        let height = last_positive(&cmds, "LL").unwrap_or_else(|| geometry.height_px());
        if width as u64 * height as u64 > self.max_canvas_pixels {
            return Err(RasterError::CanvasTooLarge {
                width,
                height,
                limit: self.max_canvas_pixels,
            });
        }

        let mut painter = Painter::new(width, height);
        for cmd in &cmds {
            painter.apply(cmd)?;
        }
        debug!("Rasterised {} commands onto {}x{}", cmds.len(), width, height);
        Ok(painter.canvas)
    }
}

fn last_positive(cmds: &[Command<'_>], code: &str) -> Option<u32> {
    cmds.iter()
        .rev()
        .filter(|c| c.is(code))
        .find_map(|c| c.int_arg(0))
        .filter(|v| *v > 0)
        .map(|v| v.min(u32::MAX as i64) as u32)
}

#[derive(Debug, Clone, Copy)]
struct Barcode {
    height: i64,
}

/// Per-document drawing state.
struct Painter {
    canvas: GrayImage,
    home: (i64, i64),
    origin: (i64, i64),
    baseline: bool,
    font: (i64, i64),
    default_font: (i64, i64),
    module: i64,
    bar_height: i64,
    barcode: Option<Barcode>,
    reverse: bool,
    hex: Option<char>,
}

impl Painter {
    fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: GrayImage::from_pixel(width, height, Luma([PAPER])),
            home: (0, 0),
            origin: (0, 0),
            baseline: false,
            font: (30, 0),
            default_font: (30, 0),
            module: 2,
            bar_height: 10,
            barcode: None,
            reverse: false,
            hex: None,
        }
    }

    fn apply(&mut self, cmd: &Command<'_>) -> Result<(), RasterError> {
        match cmd.code.as_str() {
            "LH" => self.home = (cmd.int_arg(0).unwrap_or(0), cmd.int_arg(1).unwrap_or(0)),
            "FO" | "FT" => {
                self.origin = (cmd.int_arg(0).unwrap_or(0), cmd.int_arg(1).unwrap_or(0));
                self.baseline = cmd.is("FT");
            }
            "CF" => {
                let h = cmd.int_arg(1).filter(|v| *v > 0).unwrap_or(self.default_font.0);
                let w = cmd.int_arg(2).filter(|v| *v >= 0).unwrap_or(0);
                self.default_font = (h, w);
                self.font = self.default_font;
            }
            "A" => {
                let h = cmd.int_arg(1).filter(|v| *v > 0).unwrap_or(self.default_font.0);
                let w = cmd.int_arg(2).filter(|v| *v >= 0).unwrap_or(0);
                self.font = (h, w);
            }
            "BY" => {
                if let Some(m) = cmd.int_arg(0).filter(|v| (1..=10).contains(v)) {
                    self.module = m;
                }
                if let Some(h) = cmd.int_arg(2).filter(|v| *v > 0) {
                    self.bar_height = h;
                }
            }
            "FH" => self.hex = Some(cmd.params.trim().chars().next().unwrap_or('_')),
            "FR" => self.reverse = true,
            "GB" => self.graphic_box(cmd),
            "GF" => self.graphic_field(cmd.params)?,
            "FD" | "FV" => {
                let raw = cmd.params.trim_end_matches(['\r', '\n']);
                let text = match self.hex {
                    Some(ind) => zpl::decode_field_hex(raw, ind),
                    None => raw.to_string(),
                };
                match self.barcode {
                    Some(bc) => self.bars(&text, bc),
                    None => self.text(&text),
                }
            }
            "FS" => {
                self.barcode = None;
                self.reverse = false;
                self.hex = None;
                self.font = self.default_font;
            }
            _ if cmd.is_barcode() => {
                let height_arg = if cmd.is("B3") { 2 } else { 1 };
                let height = cmd
                    .int_arg(height_arg)
                    .filter(|v| *v > 0)
                    .unwrap_or(self.bar_height);
                self.barcode = Some(Barcode { height });
            }
            _ => {}
        }
        Ok(())
    }

    fn at(&self) -> (i64, i64) {
        (self.home.0 + self.origin.0, self.home.1 + self.origin.1)
    }

    fn text(&mut self, text: &str) {
        let (h, w) = self.font;
        let advance = if w > 0 { w } else { (h * 3 / 5).max(1) };
        let (x0, mut y) = self.at();
        if self.baseline {
            y -= h;
        }
        let inset_x = (advance / 6).max(1);
        let inset_y = (h / 8).max(1);
        let mut x = x0;
        for line in text.split("\\&") {
            for ch in line.chars() {
                if !ch.is_whitespace() {
                    self.fill(
                        x + inset_x,
                        y + inset_y,
                        advance - 2 * inset_x,
                        h - 2 * inset_y,
                    );
                }
                x += advance;
            }
            x = x0;
            y += h;
        }
    }

    fn bars(&mut self, data: &str, barcode: Barcode) {
        let (mut x, mut y) = self.at();
        if self.baseline {
            y -= barcode.height;
        }
        let m = self.module;
        let guard = [true, false, true, true];
        let bits = data
            .bytes()
            .flat_map(|b| (0..8).rev().map(move |i| b >> i & 1 == 1));
        for bar in guard.into_iter().chain(bits).chain(guard.into_iter().rev()) {
            if bar {
                self.fill(x, y, m, barcode.height);
            }
            x += m;
        }
    }

    /// `^GBw,h,t,c`: outline of thickness `t`; a thickness of at least half
    /// the short side fills the box.
    fn graphic_box(&mut self, cmd: &Command<'_>) {
        let t = cmd.int_arg(2).filter(|v| *v > 0).unwrap_or(1);
        let w = cmd.int_arg(0).unwrap_or(t).max(t);
        let h = cmd.int_arg(1).unwrap_or(t).max(t);
        let white = cmd
            .args()
            .get(3)
            .is_some_and(|c| c.eq_ignore_ascii_case("W"));
        let (x, y) = self.at();
        let shade = |p: &mut Self, x: i64, y: i64, w: i64, h: i64| {
            if white {
                p.paint(x, y, w, h, |_| PAPER)
            } else {
                p.fill(x, y, w, h)
            }
        };
        if t * 2 >= w.min(h) {
            shade(self, x, y, w, h);
        } else {
            shade(self, x, y, w, t);
            shade(self, x, y + h - t, w, t);
            shade(self, x, y, t, h);
            shade(self, x + w - t, y, t, h);
        }
    }

    fn graphic_field(&mut self, params: &str) -> Result<(), RasterError> {
        let limit = self.canvas.width().div_ceil(8) as usize * self.canvas.height() as usize;
        let (bytes_per_row, bitmap) = decode_graphic(params, limit)?;
        let (x0, y0) = self.at();
        for (row, chunk) in bitmap.chunks(bytes_per_row).enumerate() {
            for (byte_idx, &byte) in chunk.iter().enumerate() {
                for bit in 0..8 {
                    if byte >> (7 - bit) & 1 == 1 {
                        let x = x0 + (byte_idx * 8 + bit) as i64;
                        self.fill(x, y0 + row as i64, 1, 1);
                    }
                }
            }
        }
        Ok(())
    }

    fn fill(&mut self, x: i64, y: i64, w: i64, h: i64) {
        if self.reverse {
            self.paint(x, y, w, h, |v| PAPER - v);
        } else {
            self.paint(x, y, w, h, |_| INK);
        }
    }

    fn paint(&mut self, x: i64, y: i64, w: i64, h: i64, f: impl Fn(u8) -> u8) {
        let (cw, ch) = (self.canvas.width() as i64, self.canvas.height() as i64);
        let (x1, y1) = ((x + w).min(cw), (y + h).min(ch));
        for py in y.max(0)..y1 {
            for px in x.max(0)..x1 {
                let p = self.canvas.get_pixel_mut(px as u32, py as u32);
                p.0[0] = f(p.0[0]);
            }
        }
    }
}

/// Decode `^GF` parameters into `(bytes_per_row, bitmap)`.
///
/// Only format `A` is supported. The data is either ASCII hex with ZPL
/// run-length compression or a `:B64:` base64 block. Declared sizes above
/// `max_bytes` are rejected before anything is allocated.
pub fn decode_graphic(params: &str, max_bytes: usize) -> Result<(usize, Vec<u8>), RasterError> {
    let mut parts = params.splitn(5, ',');
    let mut next = || parts.next().map(str::trim).unwrap_or("");
    let format = next();
    let total: usize = next().parse().unwrap_or(0);
    let _field = next();
    let bytes_per_row: usize = next().parse().unwrap_or(0);
    let data = next();

    if !format.eq_ignore_ascii_case("A") {
        return Err(RasterError::InvalidGraphic(format!(
            "unsupported format {format:?}"
        )));
    }
    if total == 0 || bytes_per_row == 0 {
        return Err(RasterError::InvalidGraphic(format!(
            "bad size: {total} bytes, {bytes_per_row} per row"
        )));
    }
    if total > max_bytes || bytes_per_row > max_bytes {
        return Err(RasterError::InvalidGraphic(format!(
            "declared size {total} bytes ({bytes_per_row} per row) exceeds the canvas limit of {max_bytes}"
        )));
    }

    let mut bitmap = if let Some(b64) = data.strip_prefix(":B64:") {
        let payload = b64.split(':').next().unwrap_or("");
        STANDARD
            .decode(payload)
            .map_err(|e| RasterError::InvalidGraphic(e.to_string()))?
    } else if data.starts_with(":Z64:") {
        return Err(RasterError::InvalidGraphic(
            ":Z64: compressed graphics are not supported".into(),
        ));
    } else {
        decode_ascii_hex(data, bytes_per_row, total.div_ceil(bytes_per_row))?
    };
    bitmap.resize(total, 0);
    Ok((bytes_per_row, bitmap))
}

/// ZPL ASCII hex with compression: `G`–`Y` repeat the next digit 1–19 times,
/// `g`–`z` add 20–400, `,` pads the row with zeros, `!` with ones and `:`
/// repeats the previous row. Decoding stops after `max_rows` rows.
fn decode_ascii_hex(
    data: &str,
    bytes_per_row: usize,
    max_rows: usize,
) -> Result<Vec<u8>, RasterError> {
    let row_digits = bytes_per_row * 2;
    let mut rows: Vec<Vec<u8>> = Vec::new();
    let mut row: Vec<u8> = Vec::with_capacity(row_digits);
    let mut repeat = 0usize;

    let finish_row = |row: &mut Vec<u8>, rows: &mut Vec<Vec<u8>>| {
        row.resize(row_digits, 0);
        rows.push(std::mem::replace(row, Vec::with_capacity(row_digits)));
    };

    for c in data.chars().filter(|c| !c.is_whitespace()) {
        if rows.len() >= max_rows {
            break;
        }
        match c {
            'G'..='Y' => repeat += (c as usize) - ('G' as usize) + 1,
            'g'..='z' => repeat += ((c as usize) - ('g' as usize) + 1) * 20,
            ',' | '!' => {
                let fill = if c == '!' { 0xF } else { 0 };
                row.resize(row_digits, fill);
                finish_row(&mut row, &mut rows);
                repeat = 0;
            }
            ':' => {
                if !row.is_empty() {
                    finish_row(&mut row, &mut rows);
                }
                let prev = rows.last().cloned().unwrap_or_else(|| vec![0; row_digits]);
                rows.push(prev);
                repeat = 0;
            }
            _ => {
                let digit = c.to_digit(16).ok_or_else(|| {
                    RasterError::InvalidGraphic(format!("unexpected character {c:?}"))
                })? as u8;
                for _ in 0..repeat.max(1) {
                    row.push(digit);
                    if row.len() == row_digits {
                        finish_row(&mut row, &mut rows);
                        if rows.len() >= max_rows {
                            break;
                        }
                    }
                }
                repeat = 0;
            }
        }
    }
    if !row.is_empty() && rows.len() < max_rows {
        finish_row(&mut row, &mut rows);
    }

    Ok(rows
        .into_iter()
        .flat_map(|r| r.chunks(2).map(|p| p[0] << 4 | p[1]).collect::<Vec<u8>>())
        .collect())
}
