//! Content-addressed print history.
//!
//! A label is identified by the SHA-256 of its markup. The ledger is seeded
//! from the caller's persisted history, read during rendering to flag
//! reprints, and appended to only after a batch has been assembled. It is an
//! ordinary value owned by the caller: the pipeline borrows it shared while
//! rendering and mutably only afterwards, so no entry can appear mid-batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Stable hex digest of a label document.
pub fn content_hash(markup: &str) -> String {
    hex::encode(Sha256::digest(markup.as_bytes()))
}

/// One printed label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintLedgerEntry {
    pub content_hash: String,
    pub first_seen_at: DateTime<Utc>,
}

/// Append-only set of printed content hashes.
#[derive(Debug, Clone, Default)]
pub struct PrintLedger {
    entries: HashMap<String, DateTime<Utc>>,
    seeded: usize,
}

impl PrintLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from persisted history. Duplicate hashes keep their earliest time.
    pub fn from_history(history: impl IntoIterator<Item = PrintLedgerEntry>) -> Self {
        let mut entries: HashMap<String, DateTime<Utc>> = HashMap::new();
        for entry in history {
            entries
                .entry(entry.content_hash)
                .and_modify(|t| {
                    if entry.first_seen_at < *t {
                        *t = entry.first_seen_at;
                    }
                })
                .or_insert(entry.first_seen_at);
        }
        let seeded = entries.len();
        Self { entries, seeded }
    }

    pub fn is_printed(&self, hash: &str) -> bool {
        self.entries.contains_key(hash)
    }

    /// Record a hash now. Returns `false` when it was already present.
    pub fn record(&mut self, hash: &str) -> bool {
        self.record_at(hash, Utc::now())
    }

    pub fn record_at(&mut self, hash: &str, at: DateTime<Utc>) -> bool {
        if self.entries.contains_key(hash) {
            return false;
        }
        self.entries.insert(hash.to_string(), at);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries added since the ledger was seeded.
    pub fn recorded_since_seed(&self) -> usize {
        self.entries.len() - self.seeded
    }

    /// All entries, oldest first (ties broken by hash).
    pub fn entries(&self) -> Vec<PrintLedgerEntry> {
        let mut out: Vec<PrintLedgerEntry> = self
            .entries
            .iter()
            .map(|(hash, at)| PrintLedgerEntry {
                content_hash: hash.clone(),
                first_seen_at: *at,
            })
            .collect();
        out.sort_by(|a, b| {
            a.first_seen_at
                .cmp(&b.first_seen_at)
                .then_with(|| a.content_hash.cmp(&b.content_hash))
        });
        out
    }
}
