//! SAML Response validation.
//!
//! Checks run in a fixed order and stop at the first failure:
//! structure, status, issuer, signature, destination, validity window,
//! audience, subject confirmation, and finally request correlation. The
//! correlation step is the only one with a side effect (the pending request
//! is consumed), so a rejected Response never uses up a request ID.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::debug;

use super::assertion::{earliest, parse_instant, Assertion};
use super::replay::AssertionReplayCache;
use crate::clock::SharedClock;
use crate::error::ProtocolError;
use crate::metadata::MetadataStore;
use crate::request::PendingRequestStore;
use crate::signature::{signature_of, verify_enveloped};
use crate::xml::{parse, Element, SAMLP_NS, SAML_NS};

const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";
const BEARER: &str = "urn:oasis:names:tc:SAML:2.0:cm:bearer";

/// Validates inbound Responses against the current IdP metadata.
pub struct ResponseValidator {
    metadata: Arc<MetadataStore>,
    pending: Arc<dyn PendingRequestStore>,
    replay: AssertionReplayCache,
    clock: SharedClock,
    entity_id: String,
    clock_skew: Duration,
    allow_idp_initiated: bool,
}

impl ResponseValidator {
    /// Validator for the SP `entity_id`.
    pub fn new(
        metadata: Arc<MetadataStore>,
        pending: Arc<dyn PendingRequestStore>,
        clock: SharedClock,
        entity_id: String,
        clock_skew: Duration,
        allow_idp_initiated: bool,
    ) -> Self {
        Self {
            metadata,
            pending,
            replay: AssertionReplayCache::new(),
            clock,
            entity_id,
            clock_skew,
            allow_idp_initiated,
        }
    }

    /// Decode the base64 `SAMLResponse` form value, then [`validate`](Self::validate).
    pub fn validate_encoded(
        &self,
        saml_response: &str,
        expected_destination: &str,
    ) -> Result<Assertion, ProtocolError> {
        let compact: String = saml_response
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let bytes = STANDARD.decode(compact)?;
        let xml = String::from_utf8(bytes)
            .map_err(|_| ProtocolError::MalformedXml("response is not valid UTF-8".into()))?;
        self.validate(&xml, expected_destination)
    }

    /// Validate a raw Response document addressed to `expected_destination`.
    pub fn validate(
        &self,
        raw_xml: &str,
        expected_destination: &str,
    ) -> Result<Assertion, ProtocolError> {
        let now = self.clock.now();
        let response = parse(raw_xml)?;
        if !response.is(SAMLP_NS, "Response") {
            return Err(ProtocolError::MalformedXml("not a SAML Response".into()));
        }
        if response.attr("Version").is_some_and(|v| v != "2.0") {
            return Err(ProtocolError::MalformedXml("unsupported SAML version".into()));
        }
        let response_id = response
            .attr("ID")
            .ok_or(ProtocolError::MissingElement("Response ID"))?;

        check_status(&response)?;

        let metadata = self
            .metadata
            .current()
            .map_err(|_| ProtocolError::IssuerUnknown("no IdP metadata loaded".into()))?;

        if let Some(issuer) = response.child(SAML_NS, "Issuer") {
            let issuer = issuer.trimmed_text();
            if issuer != metadata.entity_id {
                return Err(ProtocolError::IssuerUnknown(issuer));
            }
        }

        let element = single_assertion(&response)?;
        let mut assertion = Assertion::from_element(element)?;
        if assertion.issuer != metadata.entity_id {
            return Err(ProtocolError::IssuerUnknown(assertion.issuer));
        }

        // Signature: the Response, the Assertion, or both; at least one.
        let response_signed = signature_of(&response).is_some();
        let assertion_signed = signature_of(element).is_some();
        if !response_signed && !assertion_signed {
            return Err(ProtocolError::SignatureInvalid(
                "neither response nor assertion is signed".into(),
            ));
        }
        if response_signed {
            verify_enveloped(&response, &metadata.certificates, now)?;
        }
        if assertion_signed {
            verify_enveloped(element, &metadata.certificates, now)?;
        }
        assertion.signature_reference = if assertion_signed {
            assertion.id.clone()
        } else {
            response_id.to_string()
        };

        if let Some(destination) = response.attr("Destination") {
            if destination != expected_destination {
                return Err(ProtocolError::DestinationMismatch {
                    expected: expected_destination.to_string(),
                    actual: destination.to_string(),
                });
            }
        }

        let in_response_to = response.attr("InResponseTo").map(str::to_string);
        let confirmation_expiry =
            self.check_subject_confirmation(element, expected_destination, in_response_to.as_deref(), now)?;
        assertion.not_on_or_after = earliest([assertion.not_on_or_after, confirmation_expiry]);

        if let Some(not_before) = assertion.not_before {
            if now + self.clock_skew < not_before {
                return Err(ProtocolError::NotYetValid);
            }
        }
        if let Some(not_on_or_after) = assertion.not_on_or_after {
            if now >= not_on_or_after + self.clock_skew {
                return Err(ProtocolError::Expired);
            }
        }

        self.check_audience(element)?;

        // Correlation last: consuming the request is the only side effect.
        match in_response_to {
            Some(request_id) => {
                let request = self
                    .pending
                    .consume(&request_id, now)
                    .ok_or(ProtocolError::ReplayedRequestId)?;
                assertion.relay_state = request.relay_state;
                assertion.in_response_to = Some(request_id);
            }
            None => {
                if !self.allow_idp_initiated {
                    return Err(ProtocolError::Unsolicited);
                }
                let expires_at = assertion
                    .not_on_or_after
                    .ok_or(ProtocolError::MissingElement("NotOnOrAfter"))?;
                if !self
                    .replay
                    .check_and_insert(&assertion.id, expires_at + self.clock_skew, now)
                {
                    return Err(ProtocolError::ReplayedRequestId);
                }
            }
        }

        debug!(
            assertion_id = %assertion.id,
            signed = %assertion.signature_reference,
            "SAML response validated"
        );
        Ok(assertion)
    }

    /// Drop replay records for assertions that can no longer validate.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        self.replay.evict_expired(now)
    }

    /// Every AudienceRestriction must name this SP, and there must be one.
    fn check_audience(&self, assertion: &Element) -> Result<(), ProtocolError> {
        let restrictions: Vec<Vec<String>> = assertion
            .child(SAML_NS, "Conditions")
            .into_iter()
            .flat_map(|c| c.children_named(SAML_NS, "AudienceRestriction"))
            .map(|r| {
                r.children_named(SAML_NS, "Audience")
                    .map(Element::trimmed_text)
                    .collect()
            })
            .collect();

        let satisfied = !restrictions.is_empty()
            && restrictions
                .iter()
                .all(|audiences| audiences.iter().any(|a| *a == self.entity_id));
        if satisfied {
            Ok(())
        } else {
            Err(ProtocolError::AudienceMismatch {
                expected: self.entity_id.clone(),
                actual: restrictions.into_iter().flatten().collect(),
            })
        }
    }

    /// Find a usable bearer confirmation and return its `NotOnOrAfter`.
    fn check_subject_confirmation(
        &self,
        assertion: &Element,
        expected_destination: &str,
        in_response_to: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ProtocolError> {
        let confirmations: Vec<&Element> = assertion
            .child(SAML_NS, "Subject")
            .into_iter()
            .flat_map(|s| s.children_named(SAML_NS, "SubjectConfirmation"))
            .filter(|c| c.attr("Method") == Some(BEARER))
            .collect();

        let mut last_error = ProtocolError::MissingElement("SubjectConfirmation");
        for confirmation in confirmations {
            let Some(data) = confirmation.child(SAML_NS, "SubjectConfirmationData") else {
                return Ok(None);
            };
            match self.check_confirmation_data(data, expected_destination, in_response_to, now) {
                Ok(expiry) => return Ok(expiry),
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }

    fn check_confirmation_data(
        &self,
        data: &Element,
        expected_destination: &str,
        in_response_to: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ProtocolError> {
        if let Some(recipient) = data.attr("Recipient") {
            if recipient != expected_destination {
                return Err(ProtocolError::DestinationMismatch {
                    expected: expected_destination.to_string(),
                    actual: recipient.to_string(),
                });
            }
        }
        if let Some(id) = data.attr("InResponseTo") {
            if Some(id) != in_response_to {
                return Err(ProtocolError::MalformedXml(
                    "subject confirmation answers a different request".into(),
                ));
            }
        }
        let expiry = data.attr("NotOnOrAfter").map(parse_instant).transpose()?;
        if let Some(expiry) = expiry {
            if now >= expiry + self.clock_skew {
                return Err(ProtocolError::Expired);
            }
        }
        Ok(expiry)
    }
}

fn check_status(response: &Element) -> Result<(), ProtocolError> {
    let code = response
        .child(SAMLP_NS, "Status")
        .and_then(|s| s.child(SAMLP_NS, "StatusCode"))
        .ok_or(ProtocolError::MissingElement("StatusCode"))?;
    let value = code.attr("Value").unwrap_or_default();
    if value == STATUS_SUCCESS {
        return Ok(());
    }

    let detail = code
        .child(SAMLP_NS, "StatusCode")
        .and_then(|c| c.attr("Value"))
        .map(|sub| format!("{value} ({sub})"))
        .unwrap_or_else(|| value.to_string());
    Err(ProtocolError::StatusNotSuccess(detail))
}

/// The one and only Assertion, as a direct child of the Response.
fn single_assertion(response: &Element) -> Result<&Element, ProtocolError> {
    if response.child(SAML_NS, "EncryptedAssertion").is_some() {
        return Err(ProtocolError::MalformedXml(
            "encrypted assertions are not supported".into(),
        ));
    }

    let mut direct = response.children_named(SAML_NS, "Assertion");
    let assertion = direct
        .next()
        .ok_or(ProtocolError::MissingElement("Assertion"))?;

    // Any other Assertion anywhere in the document is a wrapping attempt.
    if direct.next().is_some() || response.count_descendants(SAML_NS, "Assertion") != 1 {
        return Err(ProtocolError::MalformedXml(
            "response must contain exactly one assertion".into(),
        ));
    }
    Ok(assertion)
}
