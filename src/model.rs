//! Input and intermediate data types shared by the pipeline stages.
//!
//! ```text
//! markup ──▶ RawDocument ──▶ ExtractedFields ──▶ EnrichedLine ──▶ ShipmentUnit
//!           (segment)        (extract)           (enrich)          (pair)
//! ```
//!
//! Everything here is plain data. Stages never mutate what an earlier stage
//! produced; they build the next type instead.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// One `^XA … ^XZ` document cut out of the raw markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDocument {
    /// Dense 0-based position in the segmented batch.
    pub index: u32,
    /// Markup including the start and end markers.
    pub markup: String,
}

/// Marketplace a document was produced by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum MarketplaceKind {
    MercadoLivre,
    Shopee,
    #[default]
    Unknown,
}

impl MarketplaceKind {
    pub fn is_known(self) -> bool {
        self != MarketplaceKind::Unknown
    }
}

/// Which extraction tier produced the line items of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractionStrategy {
    /// `"<SKU> - <description> - <qty> UN"` blocks.
    Primary,
    /// Configured SKU / quantity patterns zipped positionally.
    Fallback,
    /// Neither tier produced a line item.
    NoMatch,
}

/// One SKU/quantity line read from a label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub sku: String,
    /// Always finite and strictly positive.
    pub quantity: f64,
    /// Free-text description when the primary pattern matched.
    pub description: Option<String>,
}

/// Structured data read from one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub document_index: usize,
    pub order_reference: Option<String>,
    pub line_items: Vec<LineItem>,
    /// Marketplace detected from signal patterns.
    pub marketplace: MarketplaceKind,
    /// Signals of more than one marketplace matched the same document.
    pub conflicting_signals: bool,
    /// The document is a label that already contains its invoice.
    pub has_embedded_invoice_marker: bool,
    /// The document looks like a stand-alone invoice (DANFE) page.
    pub has_invoice_marker: bool,
    pub strategy: ExtractionStrategy,
}

impl ExtractedFields {
    pub fn is_mercado_livre(&self) -> bool {
        self.marketplace == MarketplaceKind::MercadoLivre
    }

    /// True when the document carries any sign of being a label.
    pub fn has_label_signal(&self) -> bool {
        !self.line_items.is_empty()
            || self.order_reference.is_some()
            || self.has_embedded_invoice_marker
    }
}

/// Link from a marketplace SKU to an internal master product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkuLink {
    pub master_sku: String,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default)]
    pub display_name: Option<String>,
}

fn default_multiplier() -> f64 {
    1.0
}

/// Read-only snapshot of the product catalog's SKU links for one batch.
///
/// Multipliers that are not finite and strictly positive are replaced with
/// `1.0` on insertion so every downstream unit count stays meaningful.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "HashMap<String, SkuLink>")]
pub struct SkuLinkTable {
    links: HashMap<String, SkuLink>,
}

impl SkuLinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, sku: impl Into<String>, mut link: SkuLink) {
        let sku = sku.into();
        if !link.multiplier.is_finite() || link.multiplier <= 0.0 {
            warn!(
                "SKU link {} → {} has invalid multiplier {}; using 1",
                sku, link.master_sku, link.multiplier
            );
            link.multiplier = 1.0;
        }
        self.links.insert(sku, link);
    }

    pub fn get(&self, sku: &str) -> Option<&SkuLink> {
        self.links.get(sku)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl From<HashMap<String, SkuLink>> for SkuLinkTable {
    fn from(raw: HashMap<String, SkuLink>) -> Self {
        let mut table = SkuLinkTable::new();
        for (sku, link) in raw {
            table.insert(sku, link);
        }
        table
    }
}

/// A known order, as supplied by the order-sheet importer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_reference: String,
    #[serde(default)]
    pub buyer_name: Option<String>,
    #[serde(default)]
    pub shipping_method: Option<String>,
    #[serde(default)]
    pub marketplace: Option<MarketplaceKind>,
    /// Any other spreadsheet columns the caller wants available.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// Known orders keyed by order reference.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "Vec<OrderRecord>")]
pub struct OrderBook {
    orders: HashMap<String, OrderRecord>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: OrderRecord) {
        self.orders.insert(record.order_reference.clone(), record);
    }

    pub fn get(&self, order_reference: &str) -> Option<&OrderRecord> {
        self.orders.get(order_reference)
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

impl From<Vec<OrderRecord>> for OrderBook {
    fn from(records: Vec<OrderRecord>) -> Self {
        let mut book = OrderBook::new();
        for r in records {
            book.insert(r);
        }
        book
    }
}

/// A line item after SKU-link resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedLine {
    pub sku: String,
    pub quantity: f64,
    pub resolved_master_sku: Option<String>,
    /// Link multiplier, exactly `1.0` when unresolved.
    pub multiplier: f64,
    pub display_name: Option<String>,
}

impl EnrichedLine {
    /// Shipped-unit count: `quantity * multiplier`.
    pub fn units(&self) -> f64 {
        self.quantity * self.multiplier
    }

    /// False when the SKU still needs manual linking.
    pub fn is_linked(&self) -> bool {
        self.resolved_master_sku.is_some()
    }
}

/// One package to ship: an optional invoice page and its label page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentUnit {
    /// Index of the invoice document, `None` in label-only pairing.
    pub invoice_doc: Option<usize>,
    /// Index of the label document.
    pub label_doc: usize,
    pub marketplace: MarketplaceKind,
    pub enriched_lines: Vec<EnrichedLine>,
    /// SHA-256 hex digest of the label document markup.
    pub content_hash: String,
    pub order_reference: Option<String>,
    /// Matching order record, used only for footer context.
    pub order: Option<OrderRecord>,
}

impl ShipmentUnit {
    /// True when the label yielded no line items.
    pub fn is_unresolved(&self) -> bool {
        self.enriched_lines.is_empty()
    }
}

/// Everything the core needs from the caller for one batch.
#[derive(Debug, Clone, Default)]
pub struct BatchInput {
    pub markup: String,
    pub sku_links: SkuLinkTable,
    pub orders: OrderBook,
}

impl BatchInput {
    pub fn new(markup: impl Into<String>) -> Self {
        Self {
            markup: markup.into(),
            ..Self::default()
        }
    }

    pub fn with_sku_links(mut self, sku_links: SkuLinkTable) -> Self {
        self.sku_links = sku_links;
        self
    }

    pub fn with_orders(mut self, orders: OrderBook) -> Self {
        self.orders = orders;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_multiplier_is_replaced() {
        let mut table = SkuLinkTable::new();
        table.insert(
            "A",
            SkuLink {
                master_sku: "M".into(),
                multiplier: f64::NAN,
                display_name: None,
            },
        );
        table.insert(
            "B",
            SkuLink {
                master_sku: "M".into(),
                multiplier: -2.0,
                display_name: None,
            },
        );
        assert_eq!(table.get("A").unwrap().multiplier, 1.0);
        assert_eq!(table.get("B").unwrap().multiplier, 1.0);
    }

    #[test]
    fn sku_links_deserialise_from_map() {
        let json = r#"{"KIT-2": {"master_sku": "MUG", "multiplier": 2}, "MUG-1": {"master_sku": "MUG"}}"#;
        let table: SkuLinkTable = serde_json::from_str(json).expect("parse");
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("KIT-2").unwrap().multiplier, 2.0);
        assert_eq!(table.get("MUG-1").unwrap().multiplier, 1.0);
    }

    #[test]
    fn order_book_deserialises_from_list() {
        let json = r#"[{"order_reference": "2000001", "buyer_name": "Ana"}]"#;
        let book: OrderBook = serde_json::from_str(json).expect("parse");
        assert_eq!(book.get("2000001").unwrap().buyer_name.as_deref(), Some("Ana"));
    }

    #[test]
    fn enriched_units() {
        let line = EnrichedLine {
            sku: "KIT".into(),
            quantity: 3.0,
            resolved_master_sku: Some("MUG".into()),
            multiplier: 2.0,
            display_name: None,
        };
        assert_eq!(line.units(), 6.0);
        assert!(line.is_linked());
    }
}
