//! Canonical HTML formatting ahead of line diffing.
//!
//! The line diff is only meaningful when equal markup always formats to equal
//! text, so any [`HtmlFormatter`] must be deterministic. [`IndentFormatter`]
//! is the built-in implementation: one tag or text run per line, whitespace in
//! text collapsed, nesting shown by indentation.

use crate::dom::{parse_fragment, DomNode, Element};
use crate::error::Result;

pub trait HtmlFormatter: Send + Sync {
    fn format(&self, html: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct IndentFormatter {
    indent: usize,
}

impl Default for IndentFormatter {
    fn default() -> Self {
        Self { indent: 2 }
    }
}

impl IndentFormatter {
    pub fn with_indent(indent: usize) -> Self {
        Self { indent }
    }

    fn write_nodes(&self, nodes: &[DomNode], depth: usize, out: &mut String) {
        for node in nodes {
            match node {
                DomNode::Element(element) => self.write_element(element, depth, out),
                DomNode::Text(text) => {
                    let collapsed = collapse_whitespace(text);
                    if !collapsed.is_empty() {
                        self.write_line(depth, &escape_text(&collapsed), out);
                    }
                }
                DomNode::Comment(text) => {
                    self.write_line(depth, &format!("<!--{}-->", text.trim()), out);
                }
            }
        }
    }

    fn write_element(&self, element: &Element, depth: usize, out: &mut String) {
        let open = open_tag(element);
        if element.is_void() {
            self.write_line(depth, &open, out);
            return;
        }

        let close = format!("</{}>", element.name);

        if matches!(element.name.as_str(), "script" | "style") {
            let raw = element.text_content();
            let lines: Vec<&str> = raw.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
            if lines.is_empty() {
                self.write_line(depth, &format!("{}{}", open, close), out);
                return;
            }
            self.write_line(depth, &open, out);
            for line in lines {
                self.write_line(depth + 1, line, out);
            }
            self.write_line(depth, &close, out);
            return;
        }

        if let Some(text) = inline_text(element) {
            self.write_line(depth, &format!("{}{}{}", open, escape_text(&text), close), out);
            return;
        }

        self.write_line(depth, &open, out);
        self.write_nodes(&element.children, depth + 1, out);
        self.write_line(depth, &close, out);
    }

    fn write_line(&self, depth: usize, content: &str, out: &mut String) {
        out.extend(std::iter::repeat(' ').take(depth * self.indent));
        out.push_str(content);
        out.push('\n');
    }
}

impl HtmlFormatter for IndentFormatter {
    fn format(&self, html: &str) -> Result<String> {
        let nodes = parse_fragment(html);
        let mut out = String::new();
        self.write_nodes(&nodes, 0, &mut out);
        Ok(out)
    }
}

/// Elements whose children are only text print on a single line.
fn inline_text(element: &Element) -> Option<String> {
    if element.children.is_empty() {
        return Some(String::new());
    }
    let mut text = String::new();
    for child in &element.children {
        match child {
            DomNode::Text(value) => text.push_str(value),
            _ => return None,
        }
    }
    Some(collapse_whitespace(&text))
}

fn open_tag(element: &Element) -> String {
    let mut tag = format!("<{}", element.name);
    for (name, value) in &element.attributes {
        tag.push(' ');
        tag.push_str(name);
        tag.push_str("=\"");
        tag.push_str(&value.replace('&', "&amp;").replace('"', "&quot;"));
        tag.push('"');
    }
    tag.push('>');
    tag
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
