//! Line-level rendering of a hydration mismatch.

use crate::dom::strip_fragment_comments;
use crate::error::Result;
use crate::format::HtmlFormatter;
use hydrascope_relay_protocol::{DiffKind, DiffSegment};
use similar::{ChangeTag, TextDiff};

/// Mismatched subtrees after comment stripping, plus their line diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HydrationDiff {
    pub initial_root: String,
    pub hydrated_root: String,
    pub line_diff: Vec<DiffSegment>,
}

/// Diffs two formatted strings line by line.
///
/// Adjacent changes of the same kind are merged into one segment, and the
/// empty line produced by a trailing newline is not emitted.
pub fn diff_lines(old: &str, new: &str) -> Vec<DiffSegment> {
    let diff = TextDiff::from_lines(old, new);
    let mut groups: Vec<(DiffKind, Vec<&str>)> = Vec::new();

    for change in diff.iter_all_changes() {
        let kind = match change.tag() {
            ChangeTag::Equal => DiffKind::Unchanged,
            ChangeTag::Delete => DiffKind::Removed,
            ChangeTag::Insert => DiffKind::Added,
        };
        let line = strip_line_ending(change.value());

        match groups.last_mut() {
            Some((last_kind, lines)) if *last_kind == kind => lines.push(line),
            _ => groups.push((kind, vec![line])),
        }
    }

    groups
        .into_iter()
        .map(|(kind, lines)| DiffSegment::new(kind, lines.join("\n")))
        .collect()
}

/// Strips comments from both fragments, formats them and diffs the result.
pub fn render_hydration_diff(
    initial_root_html: &str,
    hydrated_root_html: &str,
    formatter: &dyn HtmlFormatter,
) -> Result<HydrationDiff> {
    let initial_root = strip_fragment_comments(initial_root_html);
    let hydrated_root = strip_fragment_comments(hydrated_root_html);

    let formatted_initial = formatter.format(&initial_root)?;
    let formatted_hydrated = formatter.format(&hydrated_root)?;

    Ok(HydrationDiff {
        line_diff: diff_lines(&formatted_initial, &formatted_hydrated),
        initial_root,
        hydrated_root,
    })
}

/// True when the diff contains no additions or removals.
pub fn is_unchanged(segments: &[DiffSegment]) -> bool {
    segments
        .iter()
        .all(|segment| segment.kind == DiffKind::Unchanged)
}

fn strip_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::IndentFormatter;

    #[test]
    fn identical_fragments_only_have_unchanged_segments() {
        let html = r#"<div id="a"><span>X</span><p>text</p></div>"#;
        let rendered =
            render_hydration_diff(html, html, &IndentFormatter::default()).expect("render");
        assert_eq!(rendered.line_diff.len(), 1);
        assert!(is_unchanged(&rendered.line_diff));
        assert_eq!(
            rendered.line_diff[0].text,
            "<div id=\"a\">\n  <span>X</span>\n  <p>text</p>\n</div>"
        );
    }

    #[test]
    fn single_line_change_splits_into_groups() {
        let old = "<div>\n  <span>X</span>\n</div>\n";
        let new = "<div>\n  <span>Y</span>\n</div>\n";
        assert_eq!(
            diff_lines(old, new),
            vec![
                DiffSegment::new(DiffKind::Unchanged, "<div>"),
                DiffSegment::new(DiffKind::Removed, "  <span>X</span>"),
                DiffSegment::new(DiffKind::Added, "  <span>Y</span>"),
                DiffSegment::new(DiffKind::Unchanged, "</div>"),
            ]
        );
    }

    #[test]
    fn adjacent_runs_of_one_kind_are_merged() {
        let old = "a\nb\nc\n";
        let new = "a\nx\ny\nz\n";
        let segments = diff_lines(old, new);
        let kinds: Vec<DiffKind> = segments.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![DiffKind::Unchanged, DiffKind::Removed, DiffKind::Added]
        );
        assert_eq!(segments[1].text, "b\nc");
        assert_eq!(segments[2].text, "x\ny\nz");
    }

    #[test]
    fn blank_lines_inside_a_run_survive() {
        let segments = diff_lines("a\n\nb\n", "a\n\nb\n");
        assert_eq!(segments, vec![DiffSegment::new(DiffKind::Unchanged, "a\n\nb")]);
    }

    #[test]
    fn comments_are_stripped_before_formatting() {
        let initial = r#"<div><!--$--><span>X</span><!--/$--></div>"#;
        let hydrated = r#"<div><span>Y</span></div>"#;
        let rendered =
            render_hydration_diff(initial, hydrated, &IndentFormatter::default()).expect("render");
        assert_eq!(rendered.initial_root, "<div><span>X</span></div>");
        assert_eq!(rendered.hydrated_root, "<div><span>Y</span></div>");
        assert!(!is_unchanged(&rendered.line_diff));
        assert!(rendered
            .line_diff
            .iter()
            .all(|segment| !segment.text.contains("<!--")));
    }
}
