//! Classifier/Pairer: decide what each document is, then group documents
//! into [`ShipmentUnit`]s.
//!
//! Classification looks at one document at a time. Pairing is positional
//! (invoice slot, then label slot) and walks the sequence with a cursor,
//! making every decision per document, so a batch where only some labels
//! embed their invoice is handled label by label. Every fallback is recorded as a
//! [`WarningKind::PairingInconsistent`] warning; nothing is dropped except
//! invoice documents that have no label to go with.

use crate::config::PairingMode;
use crate::ledger::content_hash;
use crate::model::{ExtractedFields, MarketplaceKind, RawDocument, ShipmentUnit};
use crate::pipeline::enrich::Enrichment;
use crate::warnings::{PairingIssue, WarningKind, WarningLog};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Invoice,
    Label,
    /// No invoice marker and no sign of being a label.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub role: Role,
    pub marketplace: MarketplaceKind,
    /// More than one marketplace matched.
    pub conflicting: bool,
}

pub fn classify(fields: &ExtractedFields) -> Classification {
    let role = if fields.has_embedded_invoice_marker {
        Role::Label
    } else if fields.has_invoice_marker {
        Role::Invoice
    } else if fields.has_label_signal() {
        Role::Label
    } else {
        Role::Unknown
    };
    Classification {
        role,
        marketplace: fields.marketplace,
        conflicting: fields.conflicting_signals,
    }
}

/// Result of pairing one batch.
#[derive(Debug, Clone, Default)]
pub struct PairingOutcome {
    pub units: Vec<ShipmentUnit>,
    pub warnings: WarningLog,
    /// Units whose label has no line items.
    pub unresolved_labels: usize,
    pub orphan_invoices: usize,
    /// Invoice documents left out in label-only mode.
    pub excluded_invoices: usize,
    pub embedded_invoices_detected: bool,
}

/// Group documents into shipment units.
///
/// `fields` and `enrichments` are indexed like `documents`.
pub fn pair(
    documents: &[RawDocument],
    fields: &[ExtractedFields],
    enrichments: &[Enrichment],
    mode: PairingMode,
) -> PairingOutcome {
    let classes: Vec<Classification> = fields.iter().map(classify).collect();
    let mut builder = Builder {
        documents,
        fields,
        enrichments,
        classes: &classes,
        out: PairingOutcome::default(),
    };

    match mode {
        PairingMode::LabelOnly => builder.label_only(),
        PairingMode::Paired => builder.paired(),
    }

    let mut out = builder.out;
    out.unresolved_labels = out.units.iter().filter(|u| u.is_unresolved()).count();
    debug!(
        "Paired {} documents into {} units ({} unresolved, {} orphan invoices, {} excluded)",
        documents.len(),
        out.units.len(),
        out.unresolved_labels,
        out.orphan_invoices,
        out.excluded_invoices
    );
    out
}

struct Builder<'a> {
    documents: &'a [RawDocument],
    fields: &'a [ExtractedFields],
    enrichments: &'a [Enrichment],
    classes: &'a [Classification],
    out: PairingOutcome,
}

impl Builder<'_> {
    fn label_only(&mut self) {
        for i in 0..self.documents.len() {
            if self.fields[i].has_embedded_invoice_marker {
                self.out.embedded_invoices_detected = true;
            }
            if self.classes[i].role == Role::Invoice {
                self.out.excluded_invoices += 1;
            } else {
                self.push_unit(None, i);
            }
        }
    }

    /// Positional pairing: the document at the cursor is the invoice
    /// candidate for the one after it. Classification only moves the cursor
    /// off that rhythm on a positive signal: an embedded invoice, an invoice
    /// marker where the label should be, or conflicting marketplaces.
    fn paired(&mut self) {
        let n = self.documents.len();
        let mut i = 0;
        while i < n {
            if self.fields[i].has_embedded_invoice_marker {
                self.out.embedded_invoices_detected = true;
                self.issue(
                    PairingIssue::EmbeddedInvoice,
                    format!(
                        "Document {i} already contains its invoice; printing it label-only \
                         (consider turning off \"include invoice\")"
                    ),
                );
                self.push_unit(None, i);
                i += 1;
                continue;
            }

            let label = i + 1;
            let label_fits = label < n
                && !self.fields[label].has_embedded_invoice_marker
                && self.classes[label].role != Role::Invoice;
            if !label_fits {
                self.unpaired(i);
                i += 1;
                continue;
            }

            if conflicts(&self.classes[i], &self.classes[label]) {
                self.issue(
                    PairingIssue::MarketplaceConflict,
                    format!(
                        "Documents {i} and {label} carry conflicting marketplace signals; \
                         label printed without its invoice"
                    ),
                );
                self.out.orphan_invoices += 1;
                self.push_unit(None, label);
            } else {
                self.push_unit(Some(i), label);
            }
            i += 2;
        }
    }

    /// A document in the invoice slot with no label after it.
    fn unpaired(&mut self, i: usize) {
        if self.classes[i].role == Role::Invoice {
            self.issue(
                PairingIssue::OrphanInvoice,
                format!("Invoice document {i} has no label after it"),
            );
            self.out.orphan_invoices += 1;
        } else {
            self.issue(
                PairingIssue::MissingInvoice,
                format!("Label document {i} has no invoice before it; printing it label-only"),
            );
            self.push_unit(None, i);
        }
    }

    fn issue(&mut self, issue: PairingIssue, message: String) {
        self.out
            .warnings
            .push(WarningKind::PairingInconsistent(issue), message);
    }

    fn push_unit(&mut self, invoice: Option<usize>, label: usize) {
        let label_class = self.classes[label];
        let marketplace = match invoice {
            Some(inv) if !label_class.marketplace.is_known() => self.classes[inv].marketplace,
            _ => label_class.marketplace,
        };
        let enrichment = &self.enrichments[label];
        let order_reference = self.fields[label]
            .order_reference
            .clone()
            .or_else(|| invoice.and_then(|inv| self.fields[inv].order_reference.clone()));
        let order = enrichment
            .order
            .clone()
            .or_else(|| invoice.and_then(|inv| self.enrichments[inv].order.clone()));

        self.out.units.push(ShipmentUnit {
            invoice_doc: invoice,
            label_doc: label,
            marketplace,
            enriched_lines: enrichment.lines.clone(),
            content_hash: content_hash(&self.documents[label].markup),
            order_reference,
            order,
        });
    }
}

fn conflicts(invoice: &Classification, label: &Classification) -> bool {
    let both_known = invoice.marketplace.is_known() && label.marketplace.is_known();
    invoice.conflicting || label.conflicting || (both_known && invoice.marketplace != label.marketplace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractionPatterns;
    use crate::model::{OrderBook, SkuLinkTable};
    use crate::pipeline::enrich::Enricher;
    use crate::pipeline::extract::FieldExtractor;
    use crate::pipeline::segment::segment;

    const INVOICE: &str = "^XA^FDDANFE^FS^FDMercado Livre^FS^XZ";
    const SHOPEE_INVOICE: &str = "^XA^FDDANFE^FS^FDShopee^FS^XZ";
    const EMBEDDED: &str = "^XA^FDDANFE SIMPLIFICADO^FS^FDShopee^FS^FDE1 - Cup - 1 UN^FS^XZ";
    const UNKNOWN: &str = "^XA^FDhello^FS^XZ";

    fn label(sku: &str) -> String {
        format!("^XA^FDMercado Envios^FS^FD{sku} - Mug - 1 UN^FS^XZ")
    }

    fn run(blob: &str, mode: PairingMode) -> PairingOutcome {
        let docs = segment(blob).documents;
        let patterns = ExtractionPatterns::default();
        let extractor = FieldExtractor::new(&patterns);
        let fields: Vec<_> = docs.iter().map(|d| extractor.extract(d)).collect();
        let links = SkuLinkTable::new();
        let orders = OrderBook::new();
        let enricher = Enricher::new(&links, &orders);
        let enrichments: Vec<_> = fields.iter().map(|f| enricher.enrich(f)).collect();
        pair(&docs, &fields, &enrichments, mode)
    }

    #[test]
    fn invoice_then_label_pairs() {
        let blob = format!("{INVOICE}{}{INVOICE}{}", label("A"), label("B"));
        let out = run(&blob, PairingMode::Paired);
        assert_eq!(out.units.len(), 2);
        assert_eq!(out.units[0].invoice_doc, Some(0));
        assert_eq!(out.units[0].label_doc, 1);
        assert_eq!(out.units[1].invoice_doc, Some(2));
        assert_eq!(out.units[1].label_doc, 3);
        assert_eq!(out.units[0].marketplace, MarketplaceKind::MercadoLivre);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn embedded_invoice_degrades_and_warns_once() {
        let blob = format!("{EMBEDDED}{EMBEDDED}{INVOICE}{}", label("A"));
        let out = run(&blob, PairingMode::Paired);
        assert_eq!(out.units.len(), 3);
        assert_eq!(out.units[0].invoice_doc, None);
        assert_eq!(out.units[1].invoice_doc, None);
        assert_eq!(out.units[2].invoice_doc, Some(2));
        assert!(out.embedded_invoices_detected);
        let kind = WarningKind::PairingInconsistent(PairingIssue::EmbeddedInvoice);
        assert_eq!(out.warnings.occurrences(kind), 2);
        assert_eq!(out.warnings.clone().into_vec().len(), 1);
    }

    #[test]
    fn missing_and_orphan_invoices() {
        let blob = format!("{}{INVOICE}{INVOICE}", label("A"));
        let out = run(&blob, PairingMode::Paired);
        assert_eq!(out.units.len(), 1);
        assert_eq!(out.units[0].invoice_doc, None);
        assert_eq!(out.orphan_invoices, 2);
        assert!(out
            .warnings
            .contains(WarningKind::PairingInconsistent(PairingIssue::MissingInvoice)));
        assert!(out
            .warnings
            .contains(WarningKind::PairingInconsistent(PairingIssue::OrphanInvoice)));
    }

    #[test]
    fn marketplace_conflict_falls_back_to_label_only() {
        let blob = format!("{SHOPEE_INVOICE}{}", label("A"));
        let out = run(&blob, PairingMode::Paired);
        assert_eq!(out.units.len(), 1);
        assert_eq!(out.units[0].invoice_doc, None);
        assert_eq!(out.units[0].label_doc, 1);
        assert_eq!(out.orphan_invoices, 1);
        assert!(out
            .warnings
            .contains(WarningKind::PairingInconsistent(PairingIssue::MarketplaceConflict)));
    }

    #[test]
    fn unclassifiable_document_is_kept_as_label() {
        let out = run(UNKNOWN, PairingMode::Paired);
        assert_eq!(out.units.len(), 1);
        assert_eq!(out.units[0].marketplace, MarketplaceKind::Unknown);
        assert_eq!(out.unresolved_labels, 1);
    }

    #[test]
    fn unknown_before_label_is_treated_as_invoice() {
        let blob = format!("{UNKNOWN}{}", label("A"));
        let out = run(&blob, PairingMode::Paired);
        assert_eq!(out.units.len(), 1);
        assert_eq!(out.units[0].invoice_doc, Some(0));
    }

    #[test]
    fn documents_without_markers_pair_by_position() {
        let blob = "^XA^FDNota fiscal 1^FS^XZ^XA^FDEtiqueta 1^FS^XZ\
                    ^XA^FDNota fiscal 2^FS^XZ^XA^FDEtiqueta 2^FS^XZ";
        let out = run(blob, PairingMode::Paired);
        let pairs: Vec<_> = out.units.iter().map(|u| (u.invoice_doc, u.label_doc)).collect();
        assert_eq!(pairs, vec![(Some(0), 1), (Some(2), 3)]);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn invoice_with_order_reference_still_pairs() {
        let blob = format!("^XA^FDPedido 200000001^FS^XZ{}", label("A"));
        let out = run(&blob, PairingMode::Paired);
        assert_eq!(out.units.len(), 1);
        assert_eq!(out.units[0].invoice_doc, Some(0));
        assert_eq!(out.units[0].label_doc, 1);
        assert_eq!(out.units[0].order_reference.as_deref(), Some("200000001"));
    }

    #[test]
    fn invoice_in_label_slot_shifts_the_rhythm() {
        let blob = format!("{}{INVOICE}{}", label("A"), label("B"));
        let out = run(&blob, PairingMode::Paired);
        let pairs: Vec<_> = out.units.iter().map(|u| (u.invoice_doc, u.label_doc)).collect();
        assert_eq!(pairs, vec![(None, 0), (Some(1), 2)]);
        assert!(out
            .warnings
            .contains(WarningKind::PairingInconsistent(PairingIssue::MissingInvoice)));
    }

    #[test]
    fn label_only_mode_excludes_invoices() {
        let blob = format!("{INVOICE}{}{INVOICE}{}", label("A"), label("B"));
        let out = run(&blob, PairingMode::LabelOnly);
        assert_eq!(out.units.len(), 2);
        assert!(out.units.iter().all(|u| u.invoice_doc.is_none()));
        assert_eq!(out.excluded_invoices, 2);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn hash_depends_on_label_only_and_is_deterministic() {
        let a = run(&format!("{INVOICE}{}", label("A")), PairingMode::Paired);
        let b = run(&format!("{SHOPEE_INVOICE}{}", label("A")), PairingMode::Paired);
        let c = run(&label("A"), PairingMode::LabelOnly);
        assert_eq!(a.units[0].content_hash, b.units[0].content_hash);
        assert_eq!(a.units[0].content_hash, c.units[0].content_hash);

        let blob = format!("{INVOICE}{}{}", label("A"), label("B"));
        assert_eq!(
            run(&blob, PairingMode::Paired).units,
            run(&blob, PairingMode::Paired).units
        );
    }
}
