//! Exclusive XML canonicalization (xml-exc-c14n, without comments).
//!
//! An element subtree of a parsed [`Element`] tree is first rendered as a
//! standalone document: the excluded descendant (enveloped-signature
//! transform) is dropped and only namespaces visibly utilized by an element
//! or its attributes are declared, at the outermost element that uses them.
//! The canonical bytes are then produced by `xml_canonicalization`.

use std::collections::{BTreeMap, BTreeSet};
use xml_canonicalization::Canonicalizer;

use super::tree::{Element, Node, XML_NS};
use crate::error::ProtocolError;

/// Canonical form of `element` and its descendants.
pub fn canonicalize(element: &Element) -> Result<String, ProtocolError> {
    canonicalize_excluding(element, None)
}

/// Canonical form of `element`, omitting the `excluded` descendant
/// (enveloped-signature transform). `excluded` is matched by identity.
pub fn canonicalize_excluding(
    element: &Element,
    excluded: Option<&Element>,
) -> Result<String, ProtocolError> {
    exclusive_c14n(&render(element, excluded))
}

/// Standalone serialization of `element`; parses back to an equivalent tree.
pub fn serialize(element: &Element) -> String {
    render(element, None)
}

fn render(element: &Element, excluded: Option<&Element>) -> String {
    let mut out = String::new();
    write_element(&mut out, element, &BTreeMap::new(), excluded);
    out
}

fn exclusive_c14n(xml: &str) -> Result<String, ProtocolError> {
    let mut output = Vec::new();
    Canonicalizer::read_from_str(xml)
        .write_to_writer(&mut output)
        .canonicalize(false) // Exclusive C14N without comments
        .map_err(|e| ProtocolError::MalformedXml(format!("canonicalization failed: {e}")))?;

    String::from_utf8(output)
        .map_err(|e| ProtocolError::MalformedXml(format!("canonical form is not UTF-8: {e}")))
}

fn write_element(
    out: &mut String,
    element: &Element,
    rendered: &BTreeMap<String, String>,
    excluded: Option<&Element>,
) {
    let mut in_output = rendered.clone();
    let qname = element.qname();

    out.push('<');
    out.push_str(&qname);

    let mut utilized = BTreeSet::new();
    utilized.insert(element.prefix.clone().unwrap_or_default());
    for attr in &element.attributes {
        if let Some(prefix) = &attr.prefix {
            if prefix != "xml" {
                utilized.insert(prefix.clone());
            }
        }
    }

    for prefix in utilized {
        let uri = element.namespaces.get(&prefix).cloned().unwrap_or_default();
        let current = in_output.get(&prefix).cloned().unwrap_or_default();
        if uri == current || (uri.is_empty() && !prefix.is_empty()) {
            continue;
        }
        if prefix.is_empty() {
            out.push_str(" xmlns=\"");
        } else {
            out.push_str(" xmlns:");
            out.push_str(&prefix);
            out.push_str("=\"");
        }
        out.push_str(&escape_attr(&uri));
        out.push('"');
        in_output.insert(prefix, uri);
    }

    let mut attributes: Vec<_> = element
        .attributes
        .iter()
        .map(|a| {
            let ns = match a.prefix.as_deref() {
                None => "",
                Some("xml") => XML_NS,
                Some(p) => element.namespaces.get(p).map(String::as_str).unwrap_or(""),
            };
            (ns, a)
        })
        .collect();
    attributes.sort_by(|(ns_a, a), (ns_b, b)| (*ns_a, &a.local).cmp(&(*ns_b, &b.local)));

    for (_, attr) in attributes {
        out.push(' ');
        if let Some(prefix) = &attr.prefix {
            out.push_str(prefix);
            out.push(':');
        }
        out.push_str(&attr.local);
        out.push_str("=\"");
        out.push_str(&escape_attr(&attr.value));
        out.push('"');
    }
    out.push('>');

    for child in &element.children {
        match child {
            Node::Text(text) => out.push_str(&escape_text(text)),
            Node::Element(child) => {
                if excluded.is_some_and(|ex| std::ptr::eq(ex, child)) {
                    continue;
                }
                write_element(out, child, &in_output, excluded);
            }
        }
    }

    out.push_str("</");
    out.push_str(&qname);
    out.push('>');
}

/// Escape character data.
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape an attribute value.
pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::tree::parse;

    #[test]
    fn sorts_attributes_and_expands_empty_elements() {
        let root = parse(r#"<a z="1" b="2"><e/></a>"#).unwrap();
        assert_eq!(canonicalize(&root).unwrap(), r#"<a b="2" z="1"><e></e></a>"#);
    }

    #[test]
    fn renders_only_utilized_namespaces() {
        let xml = r#"<p:Outer xmlns:p="urn:p" xmlns:unused="urn:u"><q:Inner xmlns:q="urn:q" p:attr="v"/></p:Outer>"#;
        let root = parse(xml).unwrap();
        assert_eq!(
            canonicalize(&root).unwrap(),
            r#"<p:Outer xmlns:p="urn:p"><q:Inner xmlns:q="urn:q" p:attr="v"></q:Inner></p:Outer>"#
        );

        // subtree pulls in the ancestor binding it uses
        let inner = root.elements().next().unwrap();
        assert_eq!(
            canonicalize(inner).unwrap(),
            r#"<q:Inner xmlns:p="urn:p" xmlns:q="urn:q" p:attr="v"></q:Inner>"#
        );
    }

    #[test]
    fn escapes_text_and_attributes() {
        let root = parse("<a v=\"x&quot;&lt;\">1 &lt; 2 &amp; 3 &gt; 2</a>").unwrap();
        assert_eq!(
            canonicalize(&root).unwrap(),
            "<a v=\"x&quot;&lt;\">1 &lt; 2 &amp; 3 &gt; 2</a>"
        );
    }

    #[test]
    fn excludes_the_given_child() {
        let root = parse("<a><sig>x</sig><b>y</b></a>").unwrap();
        let sig = root.elements().next().unwrap();
        assert_eq!(canonicalize_excluding(&root, Some(sig)).unwrap(), "<a><b>y</b></a>");
    }

    #[test]
    fn canonical_form_is_stable_under_reparse() {
        let xml = r#"<s:A xmlns:s="urn:s" ID="_1"><s:B  Name="x" >text</s:B><s:C/></s:A>"#;
        let once = canonicalize(&parse(xml).unwrap()).unwrap();
        let twice = canonicalize(&parse(&once).unwrap()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn serialized_form_canonicalizes_like_the_tree() {
        let xml = "<p:A xmlns:p=\"urn:p\" xmlns:q=\"urn:q\" b=\"1\" a=\"&#9;x\"><q:B>t &amp; u</q:B></p:A>";
        let root = parse(xml).unwrap();
        let reparsed = parse(&serialize(&root)).unwrap();
        assert_eq!(canonicalize(&root).unwrap(), canonicalize(&reparsed).unwrap());
    }

    #[test]
    fn line_endings_do_not_change_the_canonical_form() {
        let lf = "<a v=\"1\">line1\nline2</a>";
        let crlf = lf.replace('\n', "\r\n");
        assert_eq!(
            canonicalize(&parse(lf).unwrap()).unwrap(),
            canonicalize(&parse(&crlf).unwrap()).unwrap()
        );
    }
}
