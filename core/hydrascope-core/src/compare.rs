//! First-divergence tree comparison between a server snapshot and the
//! hydrated document.
//!
//! This is a locator, not an exhaustive diff: it walks both mount subtrees
//! depth-first, left to right, and reports the smallest subtree pair where the
//! two trees first disagree.

use crate::dom::{parse_document, Element};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HydrationComparison {
    Equal,
    Mismatch {
        initial_root_html: String,
        hydrated_root_html: String,
    },
}

impl HydrationComparison {
    pub fn is_equal(&self) -> bool {
        matches!(self, HydrationComparison::Equal)
    }

    fn mismatch(initial: &Element, hydrated: &Element) -> Self {
        HydrationComparison::Mismatch {
            initial_root_html: initial.outer_html(),
            hydrated_root_html: hydrated.outer_html(),
        }
    }
}

/// Compares two element subtrees assumed to share a mount point.
pub fn compare_root(initial: &Element, hydrated: &Element) -> HydrationComparison {
    if initial.child_element_count() != hydrated.child_element_count() {
        tracing::debug!(
            initial = initial.child_element_count(),
            hydrated = hydrated.child_element_count(),
            tag = %initial.name,
            "Child element count differs"
        );
        return HydrationComparison::mismatch(initial, hydrated);
    }

    for (initial_child, hydrated_child) in initial.element_children().zip(hydrated.element_children()) {
        if initial_child.name != hydrated_child.name || initial_child.id() != hydrated_child.id() {
            tracing::debug!(
                initial_tag = %initial_child.name,
                hydrated_tag = %hydrated_child.name,
                initial_id = initial_child.id(),
                hydrated_id = hydrated_child.id(),
                "Child tag or id differs"
            );
            return HydrationComparison::mismatch(initial_child, hydrated_child);
        }

        let child_result = compare_root(initial_child, hydrated_child);
        if !child_result.is_equal() {
            return child_result;
        }
    }

    if initial.text_content() != hydrated.text_content() {
        return HydrationComparison::mismatch(initial, hydrated);
    }

    HydrationComparison::Equal
}

/// Compares the mount subtrees of two full documents.
///
/// Returns `None` when the mount element is missing from either snapshot; the
/// check is skipped rather than reported as equal or mismatched.
pub fn hydration_diff(
    initial_html: &str,
    hydrated_html: &str,
    mount_id: &str,
) -> Option<HydrationComparison> {
    let initial_doc = parse_document(initial_html);
    let hydrated_doc = parse_document(hydrated_html);

    let (initial_root, hydrated_root) = match (
        initial_doc.find_by_id(mount_id),
        hydrated_doc.find_by_id(mount_id),
    ) {
        (Some(initial), Some(hydrated)) => (initial, hydrated),
        (initial, hydrated) => {
            tracing::info!(
                mount_id,
                initial_found = initial.is_some(),
                hydrated_found = hydrated.is_some(),
                "Mount element missing; skipping hydration diff"
            );
            return None;
        }
    };

    Some(compare_root(initial_root, hydrated_root))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: &str) -> String {
        format!("<!doctype html><html><head></head><body>{}</body></html>", body)
    }

    #[test]
    fn identical_structure_is_equal() {
        let html = page(r#"<div id="__next"><header id="top"><a>Home</a></header><main><p>Hello</p></main></div>"#);
        assert_eq!(
            hydration_diff(&html, &html, "__next"),
            Some(HydrationComparison::Equal)
        );
    }

    #[test]
    fn leaf_text_difference_reports_smallest_ancestor_pair() {
        let initial = Element::new("div")
            .with_attr("id", "a")
            .with_child(Element::new("span").with_text("X"));
        let hydrated = Element::new("div")
            .with_attr("id", "a")
            .with_child(Element::new("span").with_text("Y"));

        assert_eq!(
            compare_root(&initial, &hydrated),
            HydrationComparison::Mismatch {
                initial_root_html: "<span>X</span>".to_string(),
                hydrated_root_html: "<span>Y</span>".to_string(),
            }
        );
    }

    #[test]
    fn deep_text_difference_stops_at_deepest_element() {
        let initial = page(r#"<div id="__next"><section><ul><li>1</li><li>2</li></ul></section></div>"#);
        let hydrated = page(r#"<div id="__next"><section><ul><li>1</li><li>3</li></ul></section></div>"#);

        match hydration_diff(&initial, &hydrated, "__next") {
            Some(HydrationComparison::Mismatch {
                initial_root_html,
                hydrated_root_html,
            }) => {
                assert_eq!(initial_root_html, "<li>2</li>");
                assert_eq!(hydrated_root_html, "<li>3</li>");
            }
            other => panic!("expected mismatch, got {:?}", other),
        }
    }

    #[test]
    fn child_count_difference_reports_whole_roots() {
        let initial = Element::new("ul").with_child(Element::new("li"));
        let hydrated = Element::new("ul")
            .with_child(Element::new("li"))
            .with_child(Element::new("li"));

        assert_eq!(
            compare_root(&initial, &hydrated),
            HydrationComparison::Mismatch {
                initial_root_html: "<ul><li></li></ul>".to_string(),
                hydrated_root_html: "<ul><li></li><li></li></ul>".to_string(),
            }
        );
    }

    #[test]
    fn tag_difference_reports_child_pair() {
        let initial = Element::new("div").with_child(Element::new("p").with_text("x"));
        let hydrated = Element::new("div").with_child(Element::new("span").with_text("x"));

        assert_eq!(
            compare_root(&initial, &hydrated),
            HydrationComparison::Mismatch {
                initial_root_html: "<p>x</p>".to_string(),
                hydrated_root_html: "<span>x</span>".to_string(),
            }
        );
    }

    #[test]
    fn id_difference_reports_child_pair() {
        let initial = Element::new("div").with_child(Element::new("p").with_attr("id", "one"));
        let hydrated = Element::new("div").with_child(Element::new("p").with_attr("id", "two"));

        match compare_root(&initial, &hydrated) {
            HydrationComparison::Mismatch {
                initial_root_html, ..
            } => assert_eq!(initial_root_html, r#"<p id="one"></p>"#),
            other => panic!("expected mismatch, got {:?}", other),
        }
    }

    #[test]
    fn first_divergence_wins_left_to_right() {
        let initial = Element::new("div")
            .with_child(Element::new("a").with_text("1"))
            .with_child(Element::new("b").with_text("2"));
        let hydrated = Element::new("div")
            .with_child(Element::new("a").with_text("one"))
            .with_child(Element::new("b").with_text("two"));

        match compare_root(&initial, &hydrated) {
            HydrationComparison::Mismatch {
                initial_root_html, ..
            } => assert_eq!(initial_root_html, "<a>1</a>"),
            other => panic!("expected mismatch, got {:?}", other),
        }
    }

    #[test]
    fn direct_text_difference_on_root_is_caught() {
        let initial = Element::new("p").with_text("Rendered at 10:00");
        let hydrated = Element::new("p").with_text("Rendered at 10:01");
        assert!(!compare_root(&initial, &hydrated).is_equal());
    }

    #[test]
    fn attribute_only_difference_is_ignored() {
        let initial = Element::new("div").with_child(Element::new("p").with_attr("class", "a"));
        let hydrated = Element::new("div").with_child(Element::new("p").with_attr("class", "b"));
        assert!(compare_root(&initial, &hydrated).is_equal());
    }

    #[test]
    fn comment_difference_is_ignored() {
        let initial = Element::new("div").with_comment("$").with_text("x");
        let hydrated = Element::new("div").with_text("x");
        assert!(compare_root(&initial, &hydrated).is_equal());
    }

    #[test]
    fn deeply_nested_documents_compare_without_overflow() {
        let nested = format!(
            r#"<div id="__next">{}<b>1</b>{}</div>"#,
            "<div>".repeat(3000),
            "</div>".repeat(3000)
        );
        let html = page(&nested);
        assert!(matches!(
            hydration_diff(&html, &html, "__next"),
            Some(HydrationComparison::Equal)
        ));
    }

    #[test]
    fn missing_mount_yields_no_result() {
        let with_mount = page(r#"<div id="__next"></div>"#);
        let without_mount = page("<div></div>");
        assert_eq!(hydration_diff(&with_mount, &without_mount, "__next"), None);
        assert_eq!(hydration_diff(&without_mount, &with_mount, "__next"), None);
        assert_eq!(hydration_diff("", "", "__next"), None);
    }
}
