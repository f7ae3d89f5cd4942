//! Enrichment: resolve extracted SKUs against the catalog and attach order data.
//!
//! The link table and order book are read-only snapshots taken at batch
//! start. Order data only feeds footer context; it never replaces a line
//! item read from the label.

use crate::model::{EnrichedLine, ExtractedFields, OrderBook, OrderRecord, SkuLinkTable};
use tracing::debug;

/// Enriched view of one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enrichment {
    pub lines: Vec<EnrichedLine>,
    pub order: Option<OrderRecord>,
}

impl Enrichment {
    /// Lines whose SKU has no catalog link.
    pub fn unresolved_skus(&self) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .filter(|l| !l.is_linked())
            .map(|l| l.sku.as_str())
    }
}

pub struct Enricher<'a> {
    links: &'a SkuLinkTable,
    orders: &'a OrderBook,
}

impl<'a> Enricher<'a> {
    pub fn new(links: &'a SkuLinkTable, orders: &'a OrderBook) -> Self {
        Self { links, orders }
    }

    pub fn enrich(&self, fields: &ExtractedFields) -> Enrichment {
        let lines = fields
            .line_items
            .iter()
            .map(|item| match self.links.get(&item.sku) {
                Some(link) => EnrichedLine {
                    sku: item.sku.clone(),
                    quantity: item.quantity,
                    resolved_master_sku: Some(link.master_sku.clone()),
                    multiplier: link.multiplier,
                    display_name: link
                        .display_name
                        .clone()
                        .or_else(|| item.description.clone()),
                },
                None => EnrichedLine {
                    sku: item.sku.clone(),
                    quantity: item.quantity,
                    resolved_master_sku: None,
                    multiplier: 1.0,
                    display_name: item.description.clone(),
                },
            })
            .collect::<Vec<_>>();

        let order = fields
            .order_reference
            .as_deref()
            .and_then(|r| self.orders.get(r))
            .cloned();

        debug!(
            "Document {}: {}/{} SKU(s) linked, order {}",
            fields.document_index,
            lines.iter().filter(|l| l.is_linked()).count(),
            lines.len(),
            if order.is_some() { "known" } else { "unknown" }
        );
        Enrichment { lines, order }
    }
}
