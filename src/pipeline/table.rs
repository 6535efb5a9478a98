//! Sentinel extraction: pull the CSV body out of a free-form model response.
//!
//! The model is asked to wrap its CSV between two `<*>` markers, but it is
//! a non-deterministic upstream: it may add commentary around the markers,
//! repeat them, or forget them altogether. Extraction therefore never fails.
//! It yields [`TableText::Clean`] when a well-ordered marker pair exists and
//! [`TableText::Degraded`] (the whole response) otherwise.

use crate::prompts::SENTINEL;
use serde::{Deserialize, Serialize};

/// Text judged to hold the table, tagged by how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableText {
    /// Substring between the first and last sentinel.
    Clean(String),
    /// Markers missing or misordered; the full raw response.
    Degraded(String),
}

impl TableText {
    pub fn as_str(&self) -> &str {
        match self {
            TableText::Clean(s) | TableText::Degraded(s) => s,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, TableText::Degraded(_))
    }
}

/// Locate the first and last sentinel and return the text between them.
///
/// Stray sentinels inside the selected region are removed as well.
pub fn extract_table_text(response: &str) -> TableText {
    let start = response.find(SENTINEL);
    let end = response.rfind(SENTINEL);

    match (start, end) {
        (Some(s), Some(e)) if e > s => {
            let inner = &response[s + SENTINEL.len()..e];
            TableText::Clean(inner.replace(SENTINEL, ""))
        }
        _ => TableText::Degraded(response.to_string()),
    }
}
