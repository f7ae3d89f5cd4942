//! Batch-level warnings.
//!
//! Every recoverable condition in the pipeline is recorded here instead of
//! being returned as an error. The log keeps one entry per [`WarningKind`]
//! with an occurrence count and the first message seen, so a batch of two
//! thousand labels that all lack an invoice produces a single notice rather
//! than two thousand.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// Why a pairing decision fell back to label-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PairingIssue {
    /// The label document already embeds its invoice (e.g. a simplified DANFE).
    EmbeddedInvoice,
    /// A label had no preceding invoice document.
    MissingInvoice,
    /// An invoice had no following label document.
    OrphanInvoice,
    /// Invoice and label carry signals from different marketplaces.
    MarketplaceConflict,
}

/// The kind of a recovered condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WarningKind {
    /// A document was missing its end marker and was dropped.
    MalformedDocumentBoundary,
    /// A configured pattern is invalid, or a label yielded no line items.
    ExtractionAmbiguous,
    /// A SKU has no catalog link.
    UnresolvedSku,
    /// A pairing fell back to label-only, or an invoice was left unpaired.
    PairingInconsistent(PairingIssue),
    /// A single page failed to rasterise.
    RenderFailure,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarningKind::MalformedDocumentBoundary => f.write_str("malformed document boundary"),
            WarningKind::ExtractionAmbiguous => f.write_str("extraction ambiguous"),
            WarningKind::UnresolvedSku => f.write_str("unresolved SKU"),
            WarningKind::PairingInconsistent(issue) => {
                write!(f, "pairing inconsistent ({issue:?})")
            }
            WarningKind::RenderFailure => f.write_str("render failure"),
        }
    }
}

/// One aggregated warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchWarning {
    pub kind: WarningKind,
    /// How many times the condition occurred in the batch.
    pub occurrences: usize,
    /// The first message recorded for this kind.
    pub message: String,
}

/// Deduplicating warning collector.
#[derive(Debug, Clone, Default)]
pub struct WarningLog {
    entries: BTreeMap<WarningKind, BatchWarning>,
}

impl WarningLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one occurrence. Only the first occurrence of a kind is logged.
    pub fn push(&mut self, kind: WarningKind, message: impl Into<String>) {
        match self.entries.get_mut(&kind) {
            Some(entry) => entry.occurrences += 1,
            None => {
                let message = message.into();
                warn!("{}: {}", kind, message);
                self.entries.insert(
                    kind,
                    BatchWarning {
                        kind,
                        occurrences: 1,
                        message,
                    },
                );
            }
        }
    }

    pub fn contains(&self, kind: WarningKind) -> bool {
        self.entries.contains_key(&kind)
    }

    pub fn occurrences(&self, kind: WarningKind) -> usize {
        self.entries.get(&kind).map_or(0, |e| e.occurrences)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fold another log into this one, keeping the earliest message per kind.
    pub fn merge(&mut self, other: WarningLog) {
        for (kind, warning) in other.entries {
            match self.entries.get_mut(&kind) {
                Some(entry) => entry.occurrences += warning.occurrences,
                None => {
                    self.entries.insert(kind, warning);
                }
            }
        }
    }

    pub fn into_vec(self) -> Vec<BatchWarning> {
        self.entries.into_values().collect()
    }
}
