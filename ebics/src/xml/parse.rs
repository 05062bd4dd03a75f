use xmlparser::{ElementEnd, Token, Tokenizer};

use super::{Attribute, Document, Element, Namespace, Node, QName, XmlError, XML_NS};

/// Parses a document into an owned tree, resolving element namespaces.
///
/// Whitespace between elements is kept as text nodes: canonicalization does
/// not drop it, so neither may the parser.
pub fn parse(text: &str) -> Result<Document, XmlError> {
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    for token in Tokenizer::from(text) {
        match token.map_err(|e| XmlError::Syntax(e.to_string()))? {
            Token::ElementStart { prefix, local, .. } => {
                let name = QName {
                    prefix: non_empty(prefix.as_str()),
                    local: local.to_string(),
                };
                stack.push(Element {
                    name,
                    ..Default::default()
                });
            }
            Token::Attribute {
                prefix,
                local,
                value,
                ..
            } => {
                let Some(current) = stack.last_mut() else {
                    return Err(XmlError::Syntax("attribute outside of an element".into()));
                };
                let value = unescape(&normalize_attribute(value.as_str()))?;
                match (prefix.as_str(), local.as_str()) {
                    ("", "xmlns") => current.namespaces.push(Namespace {
                        prefix: None,
                        uri: value,
                    }),
                    ("xmlns", prefix) => current.namespaces.push(Namespace {
                        prefix: Some(prefix.to_string()),
                        uri: value,
                    }),
                    (prefix, local) => current.attributes.push(Attribute {
                        name: QName {
                            prefix: non_empty(prefix),
                            local: local.to_string(),
                        },
                        value,
                    }),
                }
            }
            Token::ElementEnd { end, .. } => match end {
                ElementEnd::Open => {
                    let namespace = resolve_current(&stack)?;
                    if let Some(current) = stack.last_mut() {
                        current.namespace = namespace;
                    }
                }
                ElementEnd::Empty => {
                    let namespace = resolve_current(&stack)?;
                    let mut element = stack
                        .pop()
                        .ok_or_else(|| XmlError::Syntax("empty tag outside of an element".into()))?;
                    element.namespace = namespace;
                    attach(&mut stack, &mut root, element)?;
                }
                ElementEnd::Close(prefix, local) => {
                    let element = stack.pop().ok_or_else(|| XmlError::Unbalanced {
                        expected: String::new(),
                        found: local.to_string(),
                    })?;
                    let found = QName {
                        prefix: non_empty(prefix.as_str()),
                        local: local.to_string(),
                    };
                    if found != element.name {
                        return Err(XmlError::Unbalanced {
                            expected: element.name.to_string(),
                            found: found.to_string(),
                        });
                    }
                    attach(&mut stack, &mut root, element)?;
                }
            },
            Token::Text { text } => {
                if let Some(current) = stack.last_mut() {
                    let text = unescape(&normalize_newlines(text.as_str()))?;
                    push_text(current, text);
                }
            }
            Token::Cdata { text, .. } => {
                if let Some(current) = stack.last_mut() {
                    push_text(current, normalize_newlines(text.as_str()));
                }
            }
            // declaration, comments, processing instructions and DTD parts carry no data
            _ => {}
        }
    }

    if let Some(open) = stack.pop() {
        return Err(XmlError::Unbalanced {
            expected: open.name.to_string(),
            found: String::new(),
        });
    }
    root.map(Document::new).ok_or(XmlError::NoRoot)
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(Node::Element(element));
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(XmlError::Syntax("more than one root element".into())),
    }
}

fn push_text(element: &mut Element, text: String) {
    if let Some(Node::Text(previous)) = element.children.last_mut() {
        previous.push_str(&text);
    } else {
        element.children.push(Node::Text(text));
    }
}

/// Resolves the namespace URI of the innermost open element.
fn resolve_current(stack: &[Element]) -> Result<Option<String>, XmlError> {
    let Some(current) = stack.last() else {
        return Ok(None);
    };
    let prefix = current.name.prefix.as_deref();
    if prefix == Some("xml") {
        return Ok(Some(XML_NS.to_string()));
    }
    for element in stack.iter().rev() {
        if let Some(ns) = element
            .namespaces
            .iter()
            .rev()
            .find(|ns| ns.prefix.as_deref() == prefix)
        {
            return Ok((!ns.uri.is_empty()).then(|| ns.uri.clone()));
        }
    }
    match prefix {
        Some(prefix) => Err(XmlError::UnknownPrefix(prefix.to_string())),
        None => Ok(None),
    }
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn normalize_attribute(value: &str) -> String {
    normalize_newlines(value).replace(['\t', '\n'], " ")
}

fn unescape(text: &str) -> Result<String, XmlError> {
    if !text.contains('&') {
        return Ok(text.to_string());
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after
            .find(';')
            .ok_or_else(|| XmlError::Entity(after.chars().take(8).collect()))?;
        let entity = &after[..end];
        let c = match entity {
            "amp" => '&',
            "lt" => '<',
            "gt" => '>',
            "quot" => '"',
            "apos" => '\'',
            _ => {
                let code = if let Some(hex) = entity.strip_prefix("#x") {
                    u32::from_str_radix(hex, 16).ok()
                } else if let Some(dec) = entity.strip_prefix('#') {
                    dec.parse::<u32>().ok()
                } else {
                    None
                };
                code.and_then(char::from_u32)
                    .ok_or_else(|| XmlError::Entity(entity.to_string()))?
            }
        };
        out.push(c);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
