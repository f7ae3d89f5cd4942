//! Segmenter: cut a raw markup blob into `^XA … ^XZ` documents.
//!
//! A start marker that is followed by another start marker before any end
//! marker, or that is never closed, marks a malformed document. It is
//! dropped and counted; documents before and after it are kept. Text
//! outside the markers is ignored and whitespace-only documents are dropped.

use crate::model::RawDocument;
use tracing::{debug, warn};

const START: &str = "^XA";
const END: &str = "^XZ";

/// Result of segmenting one blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segmentation {
    pub documents: Vec<RawDocument>,
    /// Documents dropped for a missing end marker.
    pub malformed: usize,
}

/// Split `markup` into documents, preserving order.
pub fn segment(markup: &str) -> Segmentation {
    // Markers are ASCII, so an upper-cased copy keeps byte offsets aligned.
    let upper = markup.to_ascii_uppercase();
    let mut out = Segmentation::default();
    let mut cursor = 0;

    while let Some(found) = upper[cursor..].find(START) {
        let start = cursor + found;
        let body_from = start + START.len();
        let next_start = upper[body_from..].find(START).map(|p| body_from + p);
        let next_end = upper[body_from..].find(END).map(|p| body_from + p);

        match (next_end, next_start) {
            (Some(end), ns) if ns.is_none_or(|s| end < s) => {
                let stop = end + END.len();
                let body = &markup[body_from..end];
                if body.trim().is_empty() {
                    debug!("Dropping empty document at byte {}", start);
                } else {
                    out.documents.push(RawDocument {
                        index: out.documents.len() as u32,
                        markup: markup[start..stop].to_string(),
                    });
                }
                cursor = stop;
            }
            (_, Some(s)) => {
                warn!(
                    "Document at byte {} has no end marker before the next document; dropped",
                    start
                );
                out.malformed += 1;
                cursor = s;
            }
            (_, None) => {
                warn!("Trailing document at byte {} has no end marker; dropped", start);
                out.malformed += 1;
                break;
            }
        }
    }

    debug!(
        "Segmented {} documents ({} malformed)",
        out.documents.len(),
        out.malformed
    );
    out
}
