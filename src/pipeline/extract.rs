//! Field extraction: read order reference and SKU lines from one document.
//!
//! Two tiers, tried in order:
//!
//! 1. **Primary** — field lines shaped `"<SKU> - <description> - <qty> UN"`.
//!    Unambiguous, so it wins whenever it yields anything.
//! 2. **Fallback** — the configured SKU and quantity patterns, matched over
//!    the whole document text and zipped positionally up to the shorter list.
//!
//! A quantity that does not parse, or parses to zero, a negative number or
//! NaN, drops its line only. Duplicate SKUs stay separate lines.

use crate::config::ExtractionPatterns;
use crate::model::{ExtractedFields, ExtractionStrategy, LineItem, MarketplaceKind, RawDocument};
use crate::zpl;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static RE_PRIMARY_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?P<sku>\S+)\s+-\s+(?P<desc>.+?)\s+-\s+(?P<qty>[0-9]+(?:[.,][0-9]+)?)\s*(?i:UN)\b",
    )
    .unwrap()
});

/// Parse a quantity token, accepting a comma decimal separator.
///
/// Returns `None` unless the value is finite and strictly positive.
pub fn parse_quantity(token: &str) -> Option<f64> {
    token
        .trim()
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|q| q.is_finite() && *q > 0.0)
}

/// Extracts [`ExtractedFields`] using a fixed set of compiled patterns.
pub struct FieldExtractor<'a> {
    patterns: &'a ExtractionPatterns,
}

impl<'a> FieldExtractor<'a> {
    pub fn new(patterns: &'a ExtractionPatterns) -> Self {
        Self { patterns }
    }

    pub fn extract(&self, doc: &RawDocument) -> ExtractedFields {
        let text = zpl::plain_text(&doc.markup);

        let mut strategy = ExtractionStrategy::Primary;
        let mut line_items = primary_lines(&text);
        if line_items.is_empty() {
            line_items = self.fallback_lines(&text);
            strategy = if line_items.is_empty() {
                ExtractionStrategy::NoMatch
            } else {
                ExtractionStrategy::Fallback
            };
        }

        let p = self.patterns;
        let ml = p.mercado_livre_signal.is_match(&text);
        let shopee = p.shopee_signal.is_match(&text);
        let (marketplace, conflicting_signals) = match (ml, shopee) {
            (true, false) => (MarketplaceKind::MercadoLivre, false),
            (false, true) => (MarketplaceKind::Shopee, false),
            (true, true) => (MarketplaceKind::Unknown, true),
            (false, false) => (MarketplaceKind::Unknown, false),
        };
        let has_embedded_invoice_marker = p.embedded_invoice.is_match(&text);
        let has_invoice_marker = !has_embedded_invoice_marker && p.invoice_marker.is_match(&text);

        let fields = ExtractedFields {
            document_index: doc.index as usize,
            order_reference: p.order_reference.first_value(&text),
            line_items,
            marketplace,
            conflicting_signals,
            has_embedded_invoice_marker,
            has_invoice_marker,
            strategy,
        };
        debug!(
            "Document {}: {:?}, {} line(s), order {:?}, {:?}",
            doc.index,
            fields.strategy,
            fields.line_items.len(),
            fields.order_reference,
            fields.marketplace
        );
        fields
    }

    fn fallback_lines(&self, text: &str) -> Vec<LineItem> {
        if !self.patterns.fallback_enabled() {
            return Vec::new();
        }
        let skus = self.patterns.fallback_sku.values(text);
        let quantities = self.patterns.fallback_quantity.values(text);
        skus.into_iter()
            .zip(quantities)
            .filter_map(|(sku, qty)| {
                parse_quantity(&qty).map(|quantity| LineItem {
                    sku,
                    quantity,
                    description: None,
                })
            })
            .collect()
    }
}

/// Primary tier over every line of every text field. `\&` is the ZPL
/// field-block line break.
fn primary_lines(text: &str) -> Vec<LineItem> {
    text.split('\n')
        .flat_map(|field| field.split("\\&"))
        .filter_map(|line| {
            let caps = RE_PRIMARY_LINE.captures(line)?;
            let quantity = parse_quantity(&caps["qty"])?;
            Some(LineItem {
                sku: caps["sku"].to_string(),
                quantity,
                description: Some(caps["desc"].trim().to_string()),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldPattern, PipelineConfig};

    fn raw(markup: &str) -> RawDocument {
        RawDocument {
            index: 0,
            markup: markup.to_string(),
        }
    }

    #[test]
    fn primary_format() {
        let patterns = ExtractionPatterns::default();
        let fields =
            FieldExtractor::new(&patterns).extract(&raw("^XA^FD1234-SKU - Blue Mug - 2 UN^FS^XZ"));
        assert_eq!(fields.strategy, ExtractionStrategy::Primary);
        assert_eq!(fields.line_items.len(), 1);
        assert_eq!(fields.line_items[0].sku, "1234-SKU");
        assert_eq!(fields.line_items[0].quantity, 2.0);
        assert_eq!(fields.line_items[0].description.as_deref(), Some("Blue Mug"));
    }

    #[test]
    fn primary_comma_decimal_and_field_block_lines() {
        let patterns = ExtractionPatterns::default();
        let doc = raw("^XA^FB700,3^FDA1 - Cup - 1,5 UN\\&B2 - Plate - Set - 4 un^FS^XZ");
        let fields = FieldExtractor::new(&patterns).extract(&doc);
        assert_eq!(fields.line_items.len(), 2);
        assert_eq!(fields.line_items[0].quantity, 1.5);
        assert_eq!(fields.line_items[1].sku, "B2");
        assert_eq!(fields.line_items[1].description.as_deref(), Some("Plate - Set"));
        assert_eq!(fields.line_items[1].quantity, 4.0);
    }

    #[test]
    fn duplicate_skus_are_not_summed() {
        let patterns = ExtractionPatterns::default();
        let doc = raw("^XA^FDX1 - Mug - 1 UN^FS^FDX1 - Mug - 2 UN^FS^XZ");
        let fields = FieldExtractor::new(&patterns).extract(&doc);
        assert_eq!(fields.line_items.len(), 2);
    }

    #[test]
    fn zero_quantity_line_is_dropped() {
        let patterns = ExtractionPatterns::default();
        let doc = raw("^XA^FDX1 - Mug - 0 UN^FS^FDX2 - Cup - 3 UN^FS^XZ");
        let fields = FieldExtractor::new(&patterns).extract(&doc);
        assert_eq!(fields.line_items.len(), 1);
        assert_eq!(fields.line_items[0].sku, "X2");
    }

    #[test]
    fn fallback_with_default_patterns() {
        let patterns = ExtractionPatterns::default();
        let doc = raw("^XA^FDSKU: ABC-1^FS^FDQTD: 3^FS^XZ");
        let fields = FieldExtractor::new(&patterns).extract(&doc);
        assert_eq!(fields.strategy, ExtractionStrategy::Fallback);
        assert_eq!(fields.line_items.len(), 1);
        assert_eq!(fields.line_items[0].sku, "ABC-1");
        assert_eq!(fields.line_items[0].quantity, 3.0);
    }

    #[test]
    fn fallback_with_configured_patterns() {
        let config = PipelineConfig::builder()
            .fallback_sku_pattern(r"\b[A-Z]{3}-\d\b")
            .fallback_quantity_pattern(r"x(\d+)")
            .build()
            .unwrap();
        let doc = raw("^XA^FDItem ABC-1 x3^FS^XZ");
        let fields = FieldExtractor::new(&config.patterns).extract(&doc);
        assert_eq!(fields.line_items.len(), 1);
        assert_eq!(fields.line_items[0].sku, "ABC-1");
        assert_eq!(fields.line_items[0].quantity, 3.0);
    }

    #[test]
    fn fallback_zips_to_shorter_list_and_skips_bad_quantities() {
        let mut patterns = ExtractionPatterns::default();
        patterns.fallback_quantity = FieldPattern::compile(r"Q=(\S+)");
        let doc = raw("^XA^FDSKU A^FS^FDSKU B^FS^FDSKU C^FS^FDQ=2^FS^FDQ=abc^FS^XZ");
        let fields = FieldExtractor::new(&patterns).extract(&doc);
        assert_eq!(fields.line_items.len(), 1);
        assert_eq!(fields.line_items[0].sku, "A");
    }

    #[test]
    fn invalid_fallback_pattern_degrades_to_no_items() {
        let mut patterns = ExtractionPatterns::default();
        patterns.fallback_sku = FieldPattern::compile("(((");
        let doc = raw("^XA^FDSKU: ABC-1^FS^FDQTD: 3^FS^XZ");
        let fields = FieldExtractor::new(&patterns).extract(&doc);
        assert!(fields.line_items.is_empty());
        assert_eq!(fields.strategy, ExtractionStrategy::NoMatch);
    }

    #[test]
    fn order_reference_and_markers() {
        let patterns = ExtractionPatterns::default();
        let label = raw("^XA^FDMercado Envios^FS^FDPack ID: 2000005551234^FS^XZ");
        let fields = FieldExtractor::new(&patterns).extract(&label);
        assert_eq!(fields.order_reference.as_deref(), Some("2000005551234"));
        assert!(fields.is_mercado_livre());
        assert!(!fields.has_invoice_marker);

        let invoice = raw("^XA^FDDANFE^FS^FDDocumento Auxiliar da Nota Fiscal^FS^XZ");
        let fields = FieldExtractor::new(&patterns).extract(&invoice);
        assert!(fields.has_invoice_marker);
        assert!(!fields.has_embedded_invoice_marker);
        assert!(fields.order_reference.is_none());

        let embedded = raw("^XA^FDShopee^FS^FDDANFE SIMPLIFICADO^FS^XZ");
        let fields = FieldExtractor::new(&patterns).extract(&embedded);
        assert!(fields.has_embedded_invoice_marker);
        assert!(!fields.has_invoice_marker);
        assert_eq!(fields.marketplace, MarketplaceKind::Shopee);
    }

    #[test]
    fn conflicting_marketplace_signals() {
        let patterns = ExtractionPatterns::default();
        let doc = raw("^XA^FDShopee^FS^FDMercado Livre^FS^XZ");
        let fields = FieldExtractor::new(&patterns).extract(&doc);
        assert_eq!(fields.marketplace, MarketplaceKind::Unknown);
        assert!(fields.conflicting_signals);
    }

    #[test]
    fn hex_encoded_fields_are_decoded_before_matching() {
        let patterns = ExtractionPatterns::default();
        let doc = raw("^XA^FH^FDCX_2D9 - Ta_C3_A7a - 2 UN^FS^XZ");
        let fields = FieldExtractor::new(&patterns).extract(&doc);
        assert_eq!(fields.line_items[0].sku, "CX-9");
        assert_eq!(fields.line_items[0].description.as_deref(), Some("Taça"));
    }

    #[test]
    fn parse_quantity_rules() {
        assert_eq!(parse_quantity("2"), Some(2.0));
        assert_eq!(parse_quantity("2,5"), Some(2.5));
        assert_eq!(parse_quantity("0"), None);
        assert_eq!(parse_quantity("-1"), None);
        assert_eq!(parse_quantity("NaN"), None);
        assert_eq!(parse_quantity("abc"), None);
    }
}
