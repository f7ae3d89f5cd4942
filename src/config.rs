//! Configuration types for a label batch.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. Patterns are compiled once, when they are
//! set, so extraction never has to deal with a pattern string. A pattern that
//! fails to compile (or is empty) becomes a disabled [`FieldPattern`]: it is
//! reported once and then simply never matches.
//!
//! Layout and footer settings derive serde so a caller can keep them in a
//! JSON file next to its other settings.

use crate::error::LabelError;
use crate::model::MarketplaceKind;
use crate::progress::ProgressCallback;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

// ── Default patterns ─────────────────────────────────────────────────────

pub const DEFAULT_ORDER_REFERENCE_PATTERN: &str =
    r"(?i)\b(?:pedido|venda|order|pack\s*id)\b[^0-9A-Za-z]{0,6}([0-9A-Za-z]{6,24})";
pub const DEFAULT_FALLBACK_SKU_PATTERN: &str =
    r"(?i)\bSKU\b\s*[:#-]?\s*([A-Za-z0-9][A-Za-z0-9._/-]*)";
pub const DEFAULT_FALLBACK_QUANTITY_PATTERN: &str =
    r"(?i)\b(?:QTD|QTDE|QUANTIDADE|QTY)\b\.?\s*[:#-]?\s*([0-9]+(?:[.,][0-9]+)?)";
pub const DEFAULT_INVOICE_MARKER_PATTERN: &str =
    r"(?i)\bDANFE\b|DOCUMENTO\s+AUXILIAR\s+DA\s+NOTA\s+FISCAL";
pub const DEFAULT_EMBEDDED_INVOICE_PATTERN: &str =
    r"(?i)DANFE\s+SIMPLIFICAD[OA]|DANFE\s+ETIQUETA";
pub const DEFAULT_MERCADO_LIVRE_SIGNAL: &str =
    r"(?i)mercado\s*livre|mercado\s*envios|\bpack\s*id\b";
pub const DEFAULT_SHOPEE_SIGNAL: &str = r"(?i)\bshopee\b|\bSPX\b|\bBR[0-9]{12,14}[A-Z]?\b";

/// A pattern compiled at configuration time.
#[derive(Debug, Clone)]
pub enum FieldPattern {
    Compiled(Regex),
    /// The configured source was empty or invalid; never matches.
    Disabled { source: String, reason: String },
}

impl FieldPattern {
    /// Compile `source`. Never fails: bad input yields [`FieldPattern::Disabled`].
    pub fn compile(source: &str) -> Self {
        if source.trim().is_empty() {
            return FieldPattern::Disabled {
                source: source.to_string(),
                reason: "empty pattern".into(),
            };
        }
        match Regex::new(source) {
            Ok(re) => FieldPattern::Compiled(re),
            Err(e) => {
                warn!("Pattern {:?} is invalid and will be disabled: {}", source, e);
                FieldPattern::Disabled {
                    source: source.to_string(),
                    reason: e.to_string(),
                }
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, FieldPattern::Compiled(_))
    }

    pub fn is_match(&self, text: &str) -> bool {
        match self {
            FieldPattern::Compiled(re) => re.is_match(text),
            FieldPattern::Disabled { .. } => false,
        }
    }

    /// Every match in order: capture group 1 when the pattern has one,
    /// otherwise the whole match.
    pub fn values(&self, text: &str) -> Vec<String> {
        let FieldPattern::Compiled(re) = self else {
            return Vec::new();
        };
        re.captures_iter(text)
            .filter_map(|caps| caps.get(1).or_else(|| caps.get(0)))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn first_value(&self, text: &str) -> Option<String> {
        self.values(text).into_iter().next()
    }
}

/// Every pattern the extractor and classifier consult.
#[derive(Debug, Clone)]
pub struct ExtractionPatterns {
    pub order_reference: FieldPattern,
    pub fallback_sku: FieldPattern,
    pub fallback_quantity: FieldPattern,
    pub invoice_marker: FieldPattern,
    pub embedded_invoice: FieldPattern,
    pub mercado_livre_signal: FieldPattern,
    pub shopee_signal: FieldPattern,
}

impl Default for ExtractionPatterns {
    fn default() -> Self {
        Self {
            order_reference: FieldPattern::compile(DEFAULT_ORDER_REFERENCE_PATTERN),
            fallback_sku: FieldPattern::compile(DEFAULT_FALLBACK_SKU_PATTERN),
            fallback_quantity: FieldPattern::compile(DEFAULT_FALLBACK_QUANTITY_PATTERN),
            invoice_marker: FieldPattern::compile(DEFAULT_INVOICE_MARKER_PATTERN),
            embedded_invoice: FieldPattern::compile(DEFAULT_EMBEDDED_INVOICE_PATTERN),
            mercado_livre_signal: FieldPattern::compile(DEFAULT_MERCADO_LIVRE_SIGNAL),
            shopee_signal: FieldPattern::compile(DEFAULT_SHOPEE_SIGNAL),
        }
    }
}

impl ExtractionPatterns {
    /// Whether the fallback pair can produce anything at all.
    pub fn fallback_enabled(&self) -> bool {
        self.fallback_sku.is_enabled() && self.fallback_quantity.is_enabled()
    }
}

// ── Modes ────────────────────────────────────────────────────────────────

/// What the render stage rasterises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProcessingMode {
    /// Invoice and label pages.
    #[default]
    Full,
    /// Label pages only; invoice pages are marked skipped without rendering.
    FastLabelOnly,
}

/// How documents are grouped into shipment units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PairingMode {
    /// Invoice followed by its label.
    #[default]
    Paired,
    /// Every label is its own unit; invoice documents are left out.
    LabelOnly,
}

// ── Geometry & layout ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

/// Physical page size and resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageGeometry {
    pub width_mm: f32,
    pub height_mm: f32,
    pub dpi: u32,
    #[serde(default)]
    pub orientation: Orientation,
}

impl Default for PageGeometry {
    /// 100 × 150 mm thermal label at 203 dpi (8 dots/mm).
    fn default() -> Self {
        Self {
            width_mm: 100.0,
            height_mm: 150.0,
            dpi: 203,
            orientation: Orientation::Portrait,
        }
    }
}

impl PageGeometry {
    pub fn a4(dpi: u32) -> Self {
        Self {
            width_mm: 210.0,
            height_mm: 297.0,
            dpi,
            orientation: Orientation::Portrait,
        }
    }

    fn mm_to_px(&self, mm: f32) -> u32 {
        (mm / 25.4 * self.dpi as f32).round().max(1.0) as u32
    }

    /// Width in pixels after orientation is applied.
    pub fn width_px(&self) -> u32 {
        match self.orientation {
            Orientation::Portrait => self.mm_to_px(self.width_mm),
            Orientation::Landscape => self.mm_to_px(self.height_mm),
        }
    }

    /// Height in pixels after orientation is applied.
    pub fn height_px(&self) -> u32 {
        match self.orientation {
            Orientation::Portrait => self.mm_to_px(self.height_mm),
            Orientation::Landscape => self.mm_to_px(self.width_mm),
        }
    }
}

/// How an invoice and its label share output sheets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PairLayout {
    /// Every page on its own sheet.
    #[default]
    Separate,
    /// Invoice on the top half, label on the bottom half.
    Vertical,
    /// Invoice on the left half, label on the right half.
    Horizontal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TextAlign {
    #[default]
    Left,
    Center,
    Right,
}

/// Where the footer sits relative to the label raster.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum FooterPosition {
    #[default]
    Below,
    Above,
    /// Absolute offset inside the label slot, in pixels.
    Custom { x: u32, y: u32 },
}

/// Footer text drawn under (or over) each label.
///
/// Templates accept `{sku}`, `{name}`, `{qty}`, `{order}` and `{buyer}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FooterConfig {
    pub enabled: bool,
    pub default_template: String,
    /// Per-marketplace overrides of `default_template`.
    pub templates: BTreeMap<MarketplaceKind, String>,
    pub font_family: String,
    /// Font size in pixels.
    pub font_size: f32,
    /// Line height as a multiple of `font_size`.
    pub line_spacing: f32,
    pub alignment: TextAlign,
    pub position: FooterPosition,
    /// Lines per column before wrapping into another column.
    pub lines_per_column: usize,
    /// Height reserved for the footer band in `Below`/`Above` positions.
    pub band_height_px: u32,
}

impl Default for FooterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_template: "{sku} - {name} - {qty} UN".into(),
            templates: BTreeMap::new(),
            font_family: "DejaVu Sans Mono".into(),
            font_size: 22.0,
            line_spacing: 1.2,
            alignment: TextAlign::Left,
            position: FooterPosition::Below,
            lines_per_column: 4,
            band_height_px: 120,
        }
    }
}

impl FooterConfig {
    pub fn template_for(&self, marketplace: MarketplaceKind) -> &str {
        self.templates
            .get(&marketplace)
            .map(String::as_str)
            .unwrap_or(&self.default_template)
    }
}

/// Output document layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Output sheet geometry.
    pub sheet: PageGeometry,
    /// Geometry the rasterizer draws each document at.
    pub label: PageGeometry,
    pub pair_layout: PairLayout,
    /// Put invoice pages in the output. Independent of [`ProcessingMode`].
    pub include_invoice: bool,
    /// Add a reprint marker to labels already in the print ledger.
    pub mark_reprints: bool,
    pub footer: FooterConfig,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            sheet: PageGeometry::default(),
            label: PageGeometry::default(),
            pair_layout: PairLayout::default(),
            include_invoice: true,
            mark_reprints: true,
            footer: FooterConfig::default(),
        }
    }
}

// ── Pipeline config ──────────────────────────────────────────────────────

/// Configuration for one label batch.
///
/// # Example
/// ```rust
/// use labelpress::{PipelineConfig, ProcessingMode};
///
/// let config = PipelineConfig::builder()
///     .mode(ProcessingMode::FastLabelOnly)
///     .chunk_size(32)
///     .concurrency(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.chunk_size, 32);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    pub mode: ProcessingMode,
    pub pairing: PairingMode,

    /// Pages per render chunk. Default: 24.
    ///
    /// Memory held by in-flight rasters is proportional to this, not to the
    /// batch size.
    pub chunk_size: usize,

    /// Pages rasterised at once inside a chunk. Default: 4.
    pub concurrency: usize,

    /// Pause between chunks in milliseconds. Default: 50.
    pub chunk_pause_ms: u64,

    /// Per-page rasterisation timeout. A timed-out page is marked failed.
    pub render_timeout_secs: Option<u64>,

    /// Emit a PNG preview event for every rendered page. Default: false.
    pub emit_previews: bool,

    /// Largest canvas the built-in rasterizer will allocate. Default: 16 Mpx.
    pub max_canvas_pixels: u64,

    pub patterns: ExtractionPatterns,
    pub layout: LayoutConfig,

    /// Optional progress callback, see [`crate::progress`].
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: ProcessingMode::default(),
            pairing: PairingMode::default(),
            chunk_size: 24,
            concurrency: 4,
            chunk_pause_ms: 50,
            render_timeout_secs: None,
            emit_previews: false,
            max_canvas_pixels: 16_000_000,
            patterns: ExtractionPatterns::default(),
            layout: LayoutConfig::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("mode", &self.mode)
            .field("pairing", &self.pairing)
            .field("chunk_size", &self.chunk_size)
            .field("concurrency", &self.concurrency)
            .field("chunk_pause_ms", &self.chunk_pause_ms)
            .field("render_timeout_secs", &self.render_timeout_secs)
            .field("emit_previews", &self.emit_previews)
            .field("max_canvas_pixels", &self.max_canvas_pixels)
            .field("patterns", &self.patterns)
            .field("layout", &self.layout)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn mode(mut self, mode: ProcessingMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn pairing(mut self, pairing: PairingMode) -> Self {
        self.config.pairing = pairing;
        self
    }

    pub fn chunk_size(mut self, n: usize) -> Self {
        self.config.chunk_size = n.max(1);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn chunk_pause_ms(mut self, ms: u64) -> Self {
        self.config.chunk_pause_ms = ms;
        self
    }

    pub fn render_timeout_secs(mut self, secs: u64) -> Self {
        self.config.render_timeout_secs = Some(secs.max(1));
        self
    }

    pub fn emit_previews(mut self, v: bool) -> Self {
        self.config.emit_previews = v;
        self
    }

    pub fn max_canvas_pixels(mut self, px: u64) -> Self {
        self.config.max_canvas_pixels = px.max(10_000);
        self
    }

    pub fn order_reference_pattern(mut self, pattern: &str) -> Self {
        self.config.patterns.order_reference = FieldPattern::compile(pattern);
        self
    }

    pub fn fallback_sku_pattern(mut self, pattern: &str) -> Self {
        self.config.patterns.fallback_sku = FieldPattern::compile(pattern);
        self
    }

    pub fn fallback_quantity_pattern(mut self, pattern: &str) -> Self {
        self.config.patterns.fallback_quantity = FieldPattern::compile(pattern);
        self
    }

    pub fn invoice_marker_pattern(mut self, pattern: &str) -> Self {
        self.config.patterns.invoice_marker = FieldPattern::compile(pattern);
        self
    }

    pub fn embedded_invoice_pattern(mut self, pattern: &str) -> Self {
        self.config.patterns.embedded_invoice = FieldPattern::compile(pattern);
        self
    }

    pub fn marketplace_signal(mut self, marketplace: MarketplaceKind, pattern: &str) -> Self {
        let compiled = FieldPattern::compile(pattern);
        match marketplace {
            MarketplaceKind::MercadoLivre => self.config.patterns.mercado_livre_signal = compiled,
            MarketplaceKind::Shopee => self.config.patterns.shopee_signal = compiled,
            MarketplaceKind::Unknown => {}
        }
        self
    }

    pub fn layout(mut self, layout: LayoutConfig) -> Self {
        self.config.layout = layout;
        self
    }

    pub fn include_invoice(mut self, v: bool) -> Self {
        self.config.layout.include_invoice = v;
        self
    }

    pub fn footer(mut self, footer: FooterConfig) -> Self {
        self.config.layout.footer = footer;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, LabelError> {
        let c = &self.config;
        for (name, g) in [("sheet", &c.layout.sheet), ("label", &c.layout.label)] {
            if !(72..=600).contains(&g.dpi) {
                return Err(LabelError::InvalidConfig(format!(
                    "{name} DPI must be 72–600, got {}",
                    g.dpi
                )));
            }
            if !(g.width_mm.is_finite() && g.width_mm > 0.0)
                || !(g.height_mm.is_finite() && g.height_mm > 0.0)
            {
                return Err(LabelError::InvalidConfig(format!(
                    "{name} size must be positive, got {}x{} mm",
                    g.width_mm, g.height_mm
                )));
            }
        }
        let footer = &c.layout.footer;
        if footer.lines_per_column == 0 {
            return Err(LabelError::InvalidConfig(
                "Footer lines_per_column must be ≥ 1".into(),
            ));
        }
        if !(footer.font_size.is_finite() && footer.font_size > 0.0) {
            return Err(LabelError::InvalidConfig(format!(
                "Footer font size must be positive, got {}",
                footer.font_size
            )));
        }
        Ok(self.config)
    }
}
