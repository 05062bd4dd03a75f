//! Inclusive canonical XML 1.0 (REC-xml-c14n-20010315, without comments).
//!
//! Only what EBICS documents use is covered: elements, attributes, namespace
//! declarations and text. The apex element of a canonicalized subtree renders
//! every namespace binding in scope at its position; descendants render only
//! the bindings that change relative to their parent.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use super::{escape_attribute, escape_text, Element, Node, XML_NS};

/// In-scope namespace bindings keyed by prefix, `""` standing for the
/// default namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NamespaceScope {
    bindings: BTreeMap<String, String>,
}

impl NamespaceScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope seen by the children of `element`.
    pub fn extended(&self, element: &Element) -> Self {
        let mut scope = self.clone();
        for ns in &element.namespaces {
            scope
                .bindings
                .insert(ns.prefix.clone().unwrap_or_default(), ns.uri.clone());
        }
        scope
    }

    pub fn resolve(&self, prefix: Option<&str>) -> Option<&str> {
        match prefix {
            Some("xml") => Some(XML_NS),
            prefix => self
                .bindings
                .get(prefix.unwrap_or(""))
                .map(String::as_str)
                .filter(|uri| !uri.is_empty()),
        }
    }
}

/// Canonical form of `element` and its subtree, given the bindings
/// inherited from its ancestors.
pub fn canonicalize(element: &Element, inherited: &NamespaceScope) -> String {
    let scope = inherited.extended(element);
    let rendered: Vec<(&str, &str)> = scope
        .bindings
        .iter()
        .filter(|(prefix, uri)| !(prefix.is_empty() && uri.is_empty()))
        .map(|(prefix, uri)| (prefix.as_str(), uri.as_str()))
        .collect();
    let mut out = String::new();
    write_element(element, &scope, &rendered, &mut out);
    out
}

/// Concatenated canonical form of every element carrying
/// `authenticate="true"`, in document order. Nested matches are
/// canonicalized again on their own, as an XPath node-set walk would.
pub fn canonicalize_authenticated(root: &Element) -> Vec<u8> {
    let mut out = String::new();
    collect_authenticated(root, &NamespaceScope::new(), &mut out);
    out.into_bytes()
}

fn collect_authenticated(element: &Element, inherited: &NamespaceScope, out: &mut String) {
    if element.is_authenticated() {
        out.push_str(&canonicalize(element, inherited));
    }
    let scope = inherited.extended(element);
    for child in element.elements() {
        collect_authenticated(child, &scope, out);
    }
}

/// Finds the first element (depth-first) matching `predicate`, together
/// with the scope inherited from its ancestors.
pub fn find_with_scope<'a>(
    root: &'a Element,
    predicate: &dyn Fn(&Element) -> bool,
) -> Option<(&'a Element, NamespaceScope)> {
    fn walk<'a>(
        element: &'a Element,
        inherited: &NamespaceScope,
        predicate: &dyn Fn(&Element) -> bool,
    ) -> Option<(&'a Element, NamespaceScope)> {
        if predicate(element) {
            return Some((element, inherited.clone()));
        }
        let scope = inherited.extended(element);
        element
            .elements()
            .find_map(|child| walk(child, &scope, predicate))
    }
    walk(root, &NamespaceScope::new(), predicate)
}

fn write_element(element: &Element, scope: &NamespaceScope, namespaces: &[(&str, &str)], out: &mut String) {
    let _ = write!(out, "<{}", element.name);
    for (prefix, uri) in namespaces {
        if prefix.is_empty() {
            out.push_str(" xmlns=\"");
        } else {
            let _ = write!(out, " xmlns:{}=\"", prefix);
        }
        escape_attribute(uri, out);
        out.push('"');
    }

    let mut attributes: Vec<(&str, &str, String, &str)> = element
        .attributes
        .iter()
        .map(|a| {
            let uri = a
                .name
                .prefix
                .as_deref()
                .and_then(|p| scope.resolve(Some(p)))
                .unwrap_or("");
            (uri, a.name.local.as_str(), a.name.to_string(), a.value.as_str())
        })
        .collect();
    attributes.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
    for (_, _, qualified, value) in attributes {
        let _ = write!(out, " {}=\"", qualified);
        escape_attribute(value, out);
        out.push('"');
    }
    out.push('>');

    for node in &element.children {
        match node {
            Node::Text(text) => escape_text(text, out),
            Node::Element(child) => {
                let child_scope = scope.extended(child);
                let changed = changed_bindings(scope, &child_scope);
                write_element(child, &child_scope, &changed, out);
            }
        }
    }
    let _ = write!(out, "</{}>", element.name);
}

fn changed_bindings<'a>(parent: &NamespaceScope, child: &'a NamespaceScope) -> Vec<(&'a str, &'a str)> {
    child
        .bindings
        .iter()
        .filter(|(prefix, uri)| {
            let before = parent.bindings.get(prefix.as_str()).map(String::as_str);
            if prefix.is_empty() && uri.is_empty() {
                // xmlns="" only matters when it undeclares a non-empty default
                return matches!(before, Some(b) if !b.is_empty());
            }
            before != Some(uri.as_str())
        })
        .map(|(prefix, uri)| (prefix.as_str(), uri.as_str()))
        .collect()
}
