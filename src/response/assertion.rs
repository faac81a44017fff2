//! Validated assertion contents.

use chrono::{DateTime, Utc};

use crate::error::ProtocolError;
use crate::xml::{Element, SAML_NS};

/// A SAML attribute with all of its values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamlAttribute {
    /// `Name` of the attribute.
    pub name: String,
    /// `FriendlyName`, if given.
    pub friendly_name: Option<String>,
    /// Values in document order. SAML allows multi-valued attributes.
    pub values: Vec<String>,
}

/// Identity statement extracted from a validated Response.
///
/// Ephemeral: it only lives long enough to create a session.
#[derive(Debug, Clone)]
pub struct Assertion {
    /// Assertion `ID`.
    pub id: String,
    /// Issuing IdP entity ID.
    pub issuer: String,
    /// Subject NameID value.
    pub subject: String,
    /// NameID format.
    pub name_id_format: Option<String>,
    /// AuthnStatement `SessionIndex` (for Single Logout).
    pub session_index: Option<String>,
    /// Attribute statements, flattened.
    pub attributes: Vec<SamlAttribute>,
    /// Start of the validity window.
    pub not_before: Option<DateTime<Utc>>,
    /// Effective end of validity: the earliest of Conditions `NotOnOrAfter`,
    /// bearer SubjectConfirmationData `NotOnOrAfter` and AuthnStatement
    /// `SessionNotOnOrAfter`.
    pub not_on_or_after: Option<DateTime<Utc>>,
    /// All audiences named in AudienceRestrictions.
    pub audiences: Vec<String>,
    /// Request ID this answers; `None` for IdP-initiated logins.
    pub in_response_to: Option<String>,
    /// Relay state recorded with the matching AuthnRequest.
    pub relay_state: Option<String>,
    /// `ID` of the element whose signature was verified.
    pub signature_reference: String,
}

impl Assertion {
    /// Read the identity fields of an `saml:Assertion` element.
    ///
    /// Nothing is validated here beyond presence and syntax; correlation,
    /// relay state and signature reference are filled in by the validator.
    pub(crate) fn from_element(element: &Element) -> Result<Self, ProtocolError> {
        let id = element
            .attr("ID")
            .ok_or(ProtocolError::MissingElement("Assertion ID"))?
            .to_string();
        let issuer = element
            .child(SAML_NS, "Issuer")
            .ok_or(ProtocolError::MissingElement("Assertion Issuer"))?
            .trimmed_text();

        let name_id = element
            .child(SAML_NS, "Subject")
            .and_then(|s| s.child(SAML_NS, "NameID"))
            .ok_or(ProtocolError::MissingElement("NameID"))?;
        let subject = name_id.trimmed_text();
        if subject.is_empty() {
            return Err(ProtocolError::MissingElement("NameID"));
        }

        let conditions = element.child(SAML_NS, "Conditions");
        let not_before = conditions
            .and_then(|c| c.attr("NotBefore"))
            .map(parse_instant)
            .transpose()?;

        let authn = element.child(SAML_NS, "AuthnStatement");
        let not_on_or_after = earliest([
            conditions
                .and_then(|c| c.attr("NotOnOrAfter"))
                .map(parse_instant)
                .transpose()?,
            authn
                .and_then(|a| a.attr("SessionNotOnOrAfter"))
                .map(parse_instant)
                .transpose()?,
        ]);

        let audiences = conditions
            .into_iter()
            .flat_map(|c| c.children_named(SAML_NS, "AudienceRestriction"))
            .flat_map(|r| r.children_named(SAML_NS, "Audience"))
            .map(Element::trimmed_text)
            .collect();

        let attributes = element
            .children_named(SAML_NS, "AttributeStatement")
            .flat_map(|s| s.children_named(SAML_NS, "Attribute"))
            .filter_map(|attr| {
                let name = attr.attr("Name")?.to_string();
                Some(SamlAttribute {
                    name,
                    friendly_name: attr.attr("FriendlyName").map(str::to_string),
                    values: attr
                        .children_named(SAML_NS, "AttributeValue")
                        .map(Element::trimmed_text)
                        .collect(),
                })
            })
            .collect();

        Ok(Self {
            id,
            issuer,
            subject,
            name_id_format: name_id.attr("Format").map(str::to_string),
            session_index: authn
                .and_then(|a| a.attr("SessionIndex"))
                .map(str::to_string),
            attributes,
            not_before,
            not_on_or_after,
            audiences,
            in_response_to: None,
            relay_state: None,
            signature_reference: String::new(),
        })
    }

    /// Look up an attribute by `Name` or `FriendlyName`.
    pub fn attribute(&self, name: &str) -> Option<&SamlAttribute> {
        self.attributes
            .iter()
            .find(|a| a.name == name || a.friendly_name.as_deref() == Some(name))
    }

    /// First value of an attribute.
    pub fn first_value(&self, name: &str) -> Option<&str> {
        self.attribute(name)
            .and_then(|a| a.values.first())
            .map(String::as_str)
    }
}

/// Parse an `xs:dateTime` instant.
pub(crate) fn parse_instant(value: &str) -> Result<DateTime<Utc>, ProtocolError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| ProtocolError::MalformedXml(format!("invalid timestamp {value:?}")))
}

/// Earliest of the given instants, ignoring absent ones.
pub(crate) fn earliest<const N: usize>(
    instants: [Option<DateTime<Utc>>; N],
) -> Option<DateTime<Utc>> {
    instants.into_iter().flatten().min()
}
