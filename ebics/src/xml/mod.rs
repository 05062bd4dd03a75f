//! Owned XML element tree used for every envelope and payload.
//!
//! Envelopes are composed bottom-up from [`Element`] values and serialized
//! once. Parsed documents come back as the same tree, with each element's
//! namespace URI resolved so lookups can be namespace-qualified.

mod c14n;
mod parse;

use std::fmt::{self, Write as _};

pub use c14n::{canonicalize, canonicalize_authenticated, find_with_scope, NamespaceScope};
pub use parse::parse;

pub const XMLDSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    #[error("xml syntax error: {0}")]
    Syntax(String),
    #[error("document is not valid UTF-8")]
    Encoding,
    #[error("closing tag `{found}` does not match `{expected}`")]
    Unbalanced { expected: String, found: String },
    #[error("undeclared namespace prefix `{0}`")]
    UnknownPrefix(String),
    #[error("unknown entity reference `&{0};`")]
    Entity(String),
    #[error("document has no root element")]
    NoRoot,
}

/// Qualified name as written in the document, `prefix:local`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QName {
    pub prefix: Option<String>,
    pub local: String,
}

impl QName {
    pub fn parse(name: &str) -> Self {
        match name.split_once(':') {
            Some((prefix, local)) => QName {
                prefix: Some(prefix.to_string()),
                local: local.to_string(),
            },
            None => QName {
                prefix: None,
                local: name.to_string(),
            },
        }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(prefix) => write!(f, "{}:{}", prefix, self.local),
            None => f.write_str(&self.local),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

/// A namespace declaration carried by an element (`xmlns` / `xmlns:p`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Namespace {
    pub prefix: Option<String>,
    pub uri: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Element {
    pub name: QName,
    pub namespaces: Vec<Namespace>,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
    /// Namespace URI resolved by the parser; `None` for elements built in memory.
    pub namespace: Option<String>,
}

impl Element {
    pub fn new(name: &str) -> Self {
        Element {
            name: QName::parse(name),
            ..Default::default()
        }
    }

    /// Element with a single text child, the most common leaf shape.
    pub fn leaf(name: &str, text: impl Into<String>) -> Self {
        Element::new(name).text(text)
    }

    pub fn declare(mut self, prefix: Option<&str>, uri: &str) -> Self {
        self.namespaces.push(Namespace {
            prefix: prefix.map(str::to_string),
            uri: uri.to_string(),
        });
        self
    }

    pub fn attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attributes.push(Attribute {
            name: QName::parse(name),
            value: value.into(),
        });
        self
    }

    pub fn child(mut self, element: Element) -> Self {
        self.children.push(Node::Element(element));
        self
    }

    pub fn maybe(self, element: Option<Element>) -> Self {
        match element {
            Some(element) => self.child(element),
            None => self,
        }
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    pub fn push(&mut self, element: Element) {
        self.children.push(Node::Element(element));
    }

    pub fn insert(&mut self, index: usize, element: Element) {
        self.children.insert(index, Node::Element(element));
    }

    /// Attribute value by local name.
    pub fn attribute(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.local == local)
            .map(|a| a.value.as_str())
    }

    pub fn is_authenticated(&self) -> bool {
        self.attributes
            .iter()
            .any(|a| a.name.prefix.is_none() && a.name.local == "authenticate" && a.value == "true")
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            Node::Text(_) => None,
        })
    }

    /// First child element with the given local name, any namespace.
    pub fn first(&self, local: &str) -> Option<&Element> {
        self.elements().find(|e| e.name.local == local)
    }

    /// First child element with the given namespace URI and local name.
    pub fn first_ns(&self, namespace: &str, local: &str) -> Option<&Element> {
        self.elements()
            .find(|e| e.name.local == local && e.namespace.as_deref() == Some(namespace))
    }

    /// Follows a chain of namespace-qualified child lookups.
    pub fn path_ns(&self, namespace: &str, path: &[&str]) -> Option<&Element> {
        path.iter()
            .try_fold(self, |element, local| element.first_ns(namespace, local))
    }

    /// Position of the first child element with the given local name.
    pub fn position(&self, local: &str) -> Option<usize> {
        self.children
            .iter()
            .position(|node| matches!(node, Node::Element(e) if e.name.local == local))
    }

    /// Concatenated text of this element and all its descendants.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for node in &self.children {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Element(element) => element.collect_text(out),
            }
        }
    }

    pub fn write_to(&self, out: &mut String) {
        out.push('<');
        let _ = write!(out, "{}", self.name);
        for ns in &self.namespaces {
            match &ns.prefix {
                Some(prefix) => {
                    let _ = write!(out, " xmlns:{}=\"", prefix);
                }
                None => out.push_str(" xmlns=\""),
            }
            escape_attribute(&ns.uri, out);
            out.push('"');
        }
        for attribute in &self.attributes {
            let _ = write!(out, " {}=\"", attribute.name);
            escape_attribute(&attribute.value, out);
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for node in &self.children {
            match node {
                Node::Text(text) => escape_text(text, out),
                Node::Element(element) => element.write_to(out),
            }
        }
        let _ = write!(out, "</{}>", self.name);
    }
}

/// A complete XML document: a root element plus the standard declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Document {
    pub root: Element,
}

impl Document {
    pub fn new(root: Element) -> Self {
        Document { root }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, XmlError> {
        let text = std::str::from_utf8(bytes).map_err(|_| XmlError::Encoding)?;
        parse(text)
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        self.root.write_to(&mut out);
        out
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_xml().into_bytes()
    }
}

// Carriage returns are written as references so they survive a reparse.
fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            c => out.push(c),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            c => out.push(c),
        }
    }
}
