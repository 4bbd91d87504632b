//! Persisted hydration error records.
//!
//! Field names are camelCase on disk so stored records keep the same shape as
//! the reports that travel over the relay.

use hydrascope_relay_protocol::DiffSegment;
use serde::{Deserialize, Serialize};

/// Number of characters of the initial subtree kept as a list preview.
pub const BRIEF_CHARS: usize = 100;

// ═══════════════════════════════════════════════════════════════════════════════
// Records
// ═══════════════════════════════════════════════════════════════════════════════

/// The divergent subtree pair plus its formatted line diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffResult {
    pub initial_root_html: String,
    pub hydrated_root_html: String,
    pub line_diff: Vec<DiffSegment>,
}

/// One confirmed mismatch. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HydrationErrorRecord {
    pub id: String,
    pub url: String,
    pub origin: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub brief: String,
    pub initial_html_full: String,
    pub post_hydration_html_full: String,
    pub diff_result: DiffResult,
}

impl HydrationErrorRecord {
    pub fn summary(&self) -> HydrationErrorSummary {
        HydrationErrorSummary {
            id: self.id.clone(),
            url: self.url.clone(),
            timestamp: self.timestamp,
            origin: self.origin.clone(),
            brief: brief_of(&self.diff_result.initial_root_html),
        }
    }
}

/// List entry for one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HydrationErrorSummary {
    pub id: String,
    pub url: String,
    pub timestamp: i64,
    pub origin: String,
    pub brief: String,
}

/// All summaries recorded for one origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorList {
    pub origin: String,
    pub errors: Vec<HydrationErrorSummary>,
    /// Last modification, milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// First [`BRIEF_CHARS`] characters, never splitting a code point.
pub fn brief_of(html: &str) -> String {
    html.chars().take(BRIEF_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydrascope_relay_protocol::DiffKind;

    #[test]
    fn brief_is_truncated_by_characters() {
        let long = "é".repeat(150);
        let brief = brief_of(&long);
        assert_eq!(brief.chars().count(), 100);
        assert_eq!(brief_of("<p>x</p>"), "<p>x</p>");
    }

    #[test]
    fn record_serializes_camel_case() {
        let record = HydrationErrorRecord {
            id: "id-1".to_string(),
            url: "https://a.example/x".to_string(),
            origin: "https://a.example".to_string(),
            timestamp: 1,
            brief: "<span>X</span>".to_string(),
            initial_html_full: String::new(),
            post_hydration_html_full: String::new(),
            diff_result: DiffResult {
                initial_root_html: "<span>X</span>".to_string(),
                hydrated_root_html: "<span>Y</span>".to_string(),
                line_diff: vec![DiffSegment::new(DiffKind::Removed, "<span>X</span>")],
            },
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["diffResult"]["initialRootHtml"], "<span>X</span>");
        assert_eq!(json["initialHtmlFull"], "");
        assert_eq!(json["diffResult"]["lineDiff"][0]["kind"], "removed");

        let summary = record.summary();
        assert_eq!(summary.brief, "<span>X</span>");
        assert_eq!(summary.origin, "https://a.example");
    }
}
