//! Namespace-aware element tree built on quick-xml.
//!
//! Only what SAML processing needs: elements, attributes, text. Comments and
//! processing instructions are dropped; DOCTYPE declarations are rejected so
//! entity expansion can never happen. Line endings and attribute whitespace
//! are normalized as an XML processor must before the tree is built.

use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::error::ProtocolError;

/// Namespace bound to the reserved `xml` prefix.
pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// A non-namespace attribute with its value unescaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Prefix, if the attribute name was qualified.
    pub prefix: Option<String>,
    /// Local name.
    pub local: String,
    /// Unescaped value.
    pub value: String,
}

/// Element or text content.
#[derive(Debug, Clone)]
pub enum Node {
    /// Child element.
    Element(Element),
    /// Character data (already unescaped).
    Text(String),
}

/// Parsed element.
#[derive(Debug, Clone)]
pub struct Element {
    /// Prefix of the element name.
    pub prefix: Option<String>,
    /// Local name.
    pub local: String,
    /// Namespace bindings in scope at this element, keyed by prefix
    /// (`""` for the default namespace). Includes inherited bindings.
    pub namespaces: BTreeMap<String, String>,
    /// Attributes other than namespace declarations, in document order.
    pub attributes: Vec<Attribute>,
    /// Children in document order.
    pub children: Vec<Node>,
}

impl Element {
    /// Qualified name as written.
    pub fn qname(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{p}:{}", self.local),
            None => self.local.clone(),
        }
    }

    /// Namespace URI of this element, if bound.
    pub fn namespace(&self) -> Option<&str> {
        let key = self.prefix.as_deref().unwrap_or("");
        self.namespaces
            .get(key)
            .map(String::as_str)
            .filter(|ns| !ns.is_empty())
    }

    /// True if this element has the given namespace and local name.
    pub fn is(&self, namespace: &str, local: &str) -> bool {
        self.local == local && self.namespace() == Some(namespace)
    }

    /// Value of an unprefixed attribute.
    pub fn attr(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.prefix.is_none() && a.local == local)
            .map(|a| a.value.as_str())
    }

    /// Direct child elements.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// Direct children with the given name.
    pub fn children_named<'a>(
        &'a self,
        namespace: &'a str,
        local: &'a str,
    ) -> impl Iterator<Item = &'a Element> + 'a {
        self.elements().filter(move |e| e.is(namespace, local))
    }

    /// First direct child with the given name.
    pub fn child(&self, namespace: &str, local: &str) -> Option<&Element> {
        self.elements().find(|e| e.is(namespace, local))
    }

    /// Concatenated direct text content.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|n| match n {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// Direct text content with surrounding whitespace removed.
    pub fn trimmed_text(&self) -> String {
        self.text().trim().to_string()
    }

    /// Count of descendants (not including self) with the given name.
    pub fn count_descendants(&self, namespace: &str, local: &str) -> usize {
        self.elements()
            .map(|e| usize::from(e.is(namespace, local)) + e.count_descendants(namespace, local))
            .sum()
    }

    /// Replace all text children with a single text node.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.children.retain(|n| matches!(n, Node::Element(_)));
        self.children.push(Node::Text(text.into()));
    }

    /// Find an element (self or descendant) whose `ID` attribute matches.
    pub fn find_by_id_mut(&mut self, id: &str) -> Option<&mut Element> {
        if self.attr("ID") == Some(id) {
            return Some(self);
        }
        for child in self.children.iter_mut() {
            if let Node::Element(e) = child {
                if let Some(found) = e.find_by_id_mut(id) {
                    return Some(found);
                }
            }
        }
        None
    }
}

/// Parse a complete document and return its root element.
pub fn parse(xml: &str) -> Result<Element, ProtocolError> {
    let xml = normalize_line_endings(xml);
    let mut reader = Reader::from_str(&xml);
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                let element = open_element(&start, stack.last())?;
                stack.push(element);
            }
            Event::Empty(start) => {
                let element = open_element(&start, stack.last())?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| malformed("unexpected closing tag"))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                let text = text.unescape()?;
                push_text(&mut stack, &text)?;
            }
            Event::CData(data) => {
                let text = std::str::from_utf8(&data)
                    .map_err(|_| malformed("CDATA is not valid UTF-8"))?
                    .to_string();
                push_text(&mut stack, &text)?;
            }
            Event::DocType(_) => return Err(malformed("DOCTYPE is not allowed")),
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(malformed("unclosed element"));
    }
    root.ok_or_else(|| malformed("empty document"))
}

/// CRLF and lone CR become LF (XML 1.0 end-of-line handling).
fn normalize_line_endings(xml: &str) -> Cow<'_, str> {
    if xml.contains('\r') {
        Cow::Owned(xml.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(xml)
    }
}

/// Literal tab, CR and LF in an attribute value become spaces; character
/// references such as `&#10;` survive the unescape that follows.
fn attribute_value(raw: &[u8]) -> Result<String, ProtocolError> {
    let raw = std::str::from_utf8(raw).map_err(|_| malformed("attribute value is not valid UTF-8"))?;
    let normalized = raw.replace(['\t', '\n', '\r'], " ");
    unescape(&normalized)
        .map(Cow::into_owned)
        .map_err(|e| ProtocolError::MalformedXml(e.to_string()))
}

fn malformed(reason: &str) -> ProtocolError {
    ProtocolError::MalformedXml(reason.to_string())
}

fn split_qname(name: &str) -> (Option<String>, String) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix.to_string()), local.to_string()),
        None => (None, name.to_string()),
    }
}

fn open_element(start: &BytesStart<'_>, parent: Option<&Element>) -> Result<Element, ProtocolError> {
    let mut namespaces = parent.map(|p| p.namespaces.clone()).unwrap_or_default();
    let mut attributes = Vec::new();

    for attr in start.attributes() {
        let attr = attr.map_err(|e| ProtocolError::MalformedXml(e.to_string()))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|_| malformed("attribute name is not valid UTF-8"))?
            .to_string();
        let value = attribute_value(&attr.value)?;

        if key == "xmlns" {
            namespaces.insert(String::new(), value);
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            namespaces.insert(prefix.to_string(), value);
        } else {
            let (prefix, local) = split_qname(&key);
            attributes.push(Attribute {
                prefix,
                local,
                value,
            });
        }
    }

    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|_| malformed("element name is not valid UTF-8"))?
        .to_string();
    let (prefix, local) = split_qname(&name);

    Ok(Element {
        prefix,
        local,
        namespaces,
        attributes,
        children: Vec::new(),
    })
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), ProtocolError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(Node::Element(element));
            Ok(())
        }
        None if root.is_some() => Err(malformed("multiple root elements")),
        None => {
            *root = Some(element);
            Ok(())
        }
    }
}

fn push_text(stack: &mut [Element], text: &str) -> Result<(), ProtocolError> {
    match stack.last_mut() {
        Some(parent) => {
            if let Some(Node::Text(previous)) = parent.children.last_mut() {
                previous.push_str(text);
            } else {
                parent.children.push(Node::Text(text.to_string()));
            }
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(malformed("text outside the root element")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMLP: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
    const SAML: &str = "urn:oasis:names:tc:SAML:2.0:assertion";

    #[test]
    fn parses_namespaces_and_attributes() {
        let xml = r#"<?xml version="1.0"?>
<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="_r1" Version="2.0">
  <saml:Issuer xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion">https://idp &amp; co</saml:Issuer>
</samlp:Response>"#;
        let root = parse(xml).unwrap();
        assert!(root.is(SAMLP, "Response"));
        assert_eq!(root.attr("ID"), Some("_r1"));

        let issuer = root.child(SAML, "Issuer").unwrap();
        assert_eq!(issuer.trimmed_text(), "https://idp & co");
        // inherited binding is visible on the child
        assert_eq!(issuer.namespaces.get("samlp").map(String::as_str), Some(SAMLP));
    }

    #[test]
    fn default_namespace_applies_to_unprefixed_elements() {
        let root = parse(r#"<EntityDescriptor xmlns="urn:oasis:names:tc:SAML:2.0:metadata"/>"#).unwrap();
        assert!(root.is("urn:oasis:names:tc:SAML:2.0:metadata", "EntityDescriptor"));
    }

    #[test]
    fn rejects_doctype() {
        let xml = r#"<!DOCTYPE foo [<!ENTITY x "boom">]><foo>&x;</foo>"#;
        assert!(matches!(parse(xml), Err(ProtocolError::MalformedXml(_))));
    }

    #[test]
    fn rejects_broken_documents() {
        assert!(parse("").is_err());
        assert!(parse("<a><b></a>").is_err());
        assert!(parse("<a></a><b/>").is_err());
        assert!(parse("<a>").is_err());
        assert!(parse("junk<a/>").is_err());
    }

    #[test]
    fn normalizes_line_endings() {
        let root = parse("<a>\r\n  one\r\n  two\rthree\r\n</a>").unwrap();
        assert_eq!(root.text(), "\n  one\n  two\nthree\n");
    }

    #[test]
    fn normalizes_attribute_whitespace() {
        let root = parse("<a v=\"x\ty\r\nz\" w=\"p&#10;q\"/>").unwrap();
        assert_eq!(root.attr("v"), Some("x y z"));
        // character references are kept
        assert_eq!(root.attr("w"), Some("p\nq"));
    }

    #[test]
    fn counts_nested_descendants() {
        let xml = r#"<r xmlns:s="urn:x"><s:A><s:A/></s:A><s:B/></r>"#;
        let root = parse(xml).unwrap();
        assert_eq!(root.count_descendants("urn:x", "A"), 2);
    }

    #[test]
    fn finds_element_by_id() {
        let mut root = parse(r#"<r ID="a"><c ID="b"><d ID="c"/></c></r>"#).unwrap();
        assert_eq!(root.find_by_id_mut("c").map(|e| e.local.clone()), Some("d".into()));
        assert!(root.find_by_id_mut("missing").is_none());
    }
}
