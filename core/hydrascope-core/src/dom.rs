//! Owned DOM snapshot model.
//!
//! Documents are parsed with `scraper` (html5ever) and copied into a small
//! owned tree so snapshots can be compared, mutated (comment stripping) and
//! re-serialized without holding on to the parser's arena.

use scraper::{ElementRef, Html, Node};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Elements nested deeper than this are kept, but without their children.
pub const MAX_DOM_DEPTH: usize = 256;

// Children of these are serialized verbatim.
const RAW_TEXT_ELEMENTS: &[&str] = &[
    "script",
    "style",
    "xmp",
    "iframe",
    "noembed",
    "noframes",
    "plaintext",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomNode {
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<DomNode>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().to_ascii_lowercase(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(DomNode::Element(child));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(DomNode::Text(text.into()));
        self
    }

    pub fn with_comment(mut self, text: impl Into<String>) -> Self {
        self.children.push(DomNode::Comment(text.into()));
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// The `id` attribute, empty when absent (matches `Element.id`).
    pub fn id(&self) -> &str {
        self.attr("id").unwrap_or("")
    }

    pub fn element_children(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|child| match child {
            DomNode::Element(element) => Some(element),
            _ => None,
        })
    }

    pub fn child_element_count(&self) -> usize {
        self.element_children().count()
    }

    /// Concatenated descendant text, comments excluded.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }

    /// Depth-first, document-order lookup by `id`, including `self`.
    pub fn find_by_id(&self, id: &str) -> Option<&Element> {
        if self.attr("id") == Some(id) {
            return Some(self);
        }
        self.element_children()
            .find_map(|child| child.find_by_id(id))
    }

    /// Removes every comment node in this subtree.
    pub fn strip_comments(&mut self) {
        self.children
            .retain(|child| !matches!(child, DomNode::Comment(_)));
        for child in &mut self.children {
            if let DomNode::Element(element) = child {
                element.strip_comments();
            }
        }
    }

    pub fn outer_html(&self) -> String {
        let mut out = String::new();
        write_element(self, &mut out);
        out
    }

    pub fn is_void(&self) -> bool {
        VOID_ELEMENTS.contains(&self.name.as_str())
    }
}

/// Parses a full document and returns its `<html>` element.
pub fn parse_document(html: &str) -> Element {
    let document = Html::parse_document(html);
    convert_root(document.root_element())
}

/// Parses a fragment in body context and returns its top-level nodes.
pub fn parse_fragment(html: &str) -> Vec<DomNode> {
    let fragment = Html::parse_fragment(html);
    convert_root(fragment.root_element()).children
}

/// Serializes a node list the way `innerHTML` would.
pub fn serialize_nodes(nodes: &[DomNode]) -> String {
    let mut out = String::new();
    for node in nodes {
        write_node(node, false, &mut out);
    }
    out
}

/// Parses `html` as a fragment, drops comments and re-serializes it.
pub fn strip_fragment_comments(html: &str) -> String {
    let mut nodes = parse_fragment(html);
    nodes.retain(|node| !matches!(node, DomNode::Comment(_)));
    for node in &mut nodes {
        if let DomNode::Element(element) = node {
            element.strip_comments();
        }
    }
    serialize_nodes(&nodes)
}

fn convert_root(root: ElementRef<'_>) -> Element {
    let mut truncated = false;
    let converted = convert_element(root, 0, &mut truncated);
    if truncated {
        tracing::warn!(
            max_depth = MAX_DOM_DEPTH,
            "Markup nests too deeply; ignoring content below the depth limit"
        );
    }
    converted
}

fn convert_element(element: ElementRef<'_>, depth: usize, truncated: &mut bool) -> Element {
    let value = element.value();
    let mut converted = Element {
        name: value.name().to_string(),
        attributes: value
            .attrs()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect(),
        children: Vec::new(),
    };
    if depth >= MAX_DOM_DEPTH {
        *truncated |= element.children().next().is_some();
        return converted;
    }

    for child in element.children() {
        let node = match child.value() {
            Node::Element(_) => ElementRef::wrap(child)
                .map(|el| DomNode::Element(convert_element(el, depth + 1, truncated))),
            Node::Text(text) => Some(DomNode::Text(text.text.to_string())),
            Node::Comment(comment) => Some(DomNode::Comment(comment.comment.to_string())),
            _ => None,
        };
        if let Some(node) = node {
            converted.children.push(node);
        }
    }

    converted
}

fn collect_text(element: &Element, out: &mut String) {
    for child in &element.children {
        match child {
            DomNode::Text(text) => out.push_str(text),
            DomNode::Element(element) => collect_text(element, out),
            DomNode::Comment(_) => {}
        }
    }
}

fn is_raw_text(name: &str) -> bool {
    RAW_TEXT_ELEMENTS.contains(&name)
}

fn write_node(node: &DomNode, raw_parent: bool, out: &mut String) {
    match node {
        DomNode::Element(element) => write_element(element, out),
        DomNode::Text(text) if raw_parent => out.push_str(text),
        DomNode::Text(text) => escape_text(text, out),
        DomNode::Comment(text) => {
            out.push_str("<!--");
            out.push_str(text);
            out.push_str("-->");
        }
    }
}

fn write_element(element: &Element, out: &mut String) {
    out.push('<');
    out.push_str(&element.name);
    for (name, value) in &element.attributes {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        escape_attr(value, out);
        out.push('"');
    }
    out.push('>');

    if element.is_void() {
        return;
    }

    let raw = is_raw_text(&element.name);
    for child in &element.children {
        write_node(child, raw, out);
    }
    out.push_str("</");
    out.push_str(&element.name);
    out.push('>');
}

fn escape_text(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(ch),
        }
    }
}

fn escape_attr(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(ch),
        }
    }
}
