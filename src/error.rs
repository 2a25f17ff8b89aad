//! Error types for inbound WS-Security processing.
//!
//! Two orthogonal taxonomies:
//!
//! - [`ProcessingError`]: a security-header operation failed structurally or
//!   cryptographically. The message is rejected outright.
//! - [`PolicyViolation`]: every operation succeeded, but the accumulated
//!   results do not satisfy the resolved security policy.
//!
//! Both are fatal to the current message and propagate to the caller as a
//! [`SecurityFault`]; nothing is retried or recovered locally.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::results::ResultKind;

/// Structural or cryptographic failure while processing a security header.
///
/// Any of these aborts the processing pass; partial results are discarded.
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    #[error("bad signature ({element}): {detail}")]
    BadSignature { element: String, detail: String },

    #[error("decryption failure ({element}): {detail}")]
    DecryptionFailure { element: String, detail: String },

    #[error("unknown credential '{identifier}'")]
    UnknownCredential { identifier: String },

    #[error("authentication failure for '{username}'")]
    AuthenticationFailure { username: String },

    #[error("malformed token ({element}): {detail}")]
    MalformedToken { element: String, detail: String },

    #[error("unsupported security header element '{element}'")]
    UnsupportedElement { element: String },

    #[error("credential lookup for '{identifier}' exceeded the configured timeout")]
    CredentialTimeout { identifier: String },
}

impl ProcessingError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedDocument(_) => "MALFORMED_DOCUMENT",
            Self::BadSignature { .. } => "BAD_SIGNATURE",
            Self::DecryptionFailure { .. } => "DECRYPTION_FAILURE",
            Self::UnknownCredential { .. } => "UNKNOWN_CREDENTIAL",
            Self::AuthenticationFailure { .. } => "AUTHENTICATION_FAILURE",
            Self::MalformedToken { .. } => "MALFORMED_TOKEN",
            Self::UnsupportedElement { .. } => "UNSUPPORTED_ELEMENT",
            Self::CredentialTimeout { .. } => "CREDENTIAL_TIMEOUT",
        }
    }

    /// Identifier of the offending element, when one is known.
    pub fn element(&self) -> Option<&str> {
        match self {
            Self::BadSignature { element, .. }
            | Self::DecryptionFailure { element, .. }
            | Self::MalformedToken { element, .. }
            | Self::UnsupportedElement { element } => Some(element),
            _ => None,
        }
    }
}

/// Codes for policy violations detected by the results validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyViolationCode {
    /// The binding's key-establishment constraints were not met
    BindingMismatch,
    /// A required token kind is absent from the results
    MissingToken,
    /// Signed or encrypted coverage is missing required message parts
    InsufficientCoverage,
    /// Header element ordering contradicts the layout rule
    LayoutMismatch,
    /// Timestamp absent, stale, or not yet valid
    StaleOrMissingTimestamp,
    /// An operation used an algorithm outside the allowed suite
    DisallowedAlgorithm,
}

impl PolicyViolationCode {
    /// Get the string code for this violation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BindingMismatch => "BINDING_MISMATCH",
            Self::MissingToken => "MISSING_TOKEN",
            Self::InsufficientCoverage => "INSUFFICIENT_COVERAGE",
            Self::LayoutMismatch => "LAYOUT_MISMATCH",
            Self::StaleOrMissingTimestamp => "STALE_OR_MISSING_TIMESTAMP",
            Self::DisallowedAlgorithm => "DISALLOWED_ALGORITHM",
        }
    }
}

/// A policy violation: operations verified fine but the result sequence does
/// not satisfy the resolved policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyViolation {
    /// Violation code
    pub code: PolicyViolationCode,
    /// Human-readable message
    pub message: String,
    /// Offending element or token identifier, if applicable
    pub location: Option<String>,
}

impl PolicyViolation {
    /// Create a new violation.
    pub fn new(code: PolicyViolationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            location: None,
        }
    }

    /// Create a violation with a location hint.
    pub fn with_location(
        code: PolicyViolationCode,
        message: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            location: Some(location.into()),
        }
    }

    /// Violation for a required token kind absent from the results.
    pub fn missing_token(kind: ResultKind) -> Self {
        Self::with_location(
            PolicyViolationCode::MissingToken,
            format!("required token kind {kind:?} not present in security results"),
            format!("{kind:?}"),
        )
    }
}

impl std::fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)
    }
}

/// Final verdict for a rejected message.
#[derive(Error, Debug)]
pub enum SecurityFault {
    /// A header operation failed; see [`ProcessingError`].
    #[error("security processing failed: {0}")]
    Processing(#[from] ProcessingError),

    /// Operations succeeded but the policy was not satisfied.
    #[error("policy violation: {0}")]
    Policy(PolicyViolation),
}

impl SecurityFault {
    /// Stable machine-readable code for this fault.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Processing(e) => e.code(),
            Self::Policy(v) => v.code.as_str(),
        }
    }
}

impl From<PolicyViolation> for SecurityFault {
    fn from(v: PolicyViolation) -> Self {
        Self::Policy(v)
    }
}

/// SOAP version to render a fault body for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoapFaultVersion {
    Soap11,
    Soap12,
}

/// Render a SOAP Fault body for a rejected message.
///
/// Fault *delivery* (status codes, transport headers) stays with the calling
/// engine; this only produces the XML body carrying the fault code and
/// diagnostic string.
pub fn soap_fault_response(fault: &SecurityFault, version: SoapFaultVersion) -> String {
    match version {
        SoapFaultVersion::Soap11 => soap_11_fault(fault),
        SoapFaultVersion::Soap12 => soap_12_fault(fault),
    }
}

fn fault_detail(fault: &SecurityFault) -> String {
    match fault {
        SecurityFault::Processing(e) => match e.element() {
            Some(el) => format!(
                "        <sec:error code=\"{}\" element=\"{}\">{}</sec:error>",
                e.code(),
                xml_escape(el),
                xml_escape(&e.to_string())
            ),
            None => format!(
                "        <sec:error code=\"{}\">{}</sec:error>",
                e.code(),
                xml_escape(&e.to_string())
            ),
        },
        SecurityFault::Policy(v) => match &v.location {
            Some(loc) => format!(
                "        <sec:violation code=\"{}\" location=\"{}\">{}</sec:violation>",
                v.code.as_str(),
                xml_escape(loc),
                xml_escape(&v.message)
            ),
            None => format!(
                "        <sec:violation code=\"{}\">{}</sec:violation>",
                v.code.as_str(),
                xml_escape(&v.message)
            ),
        },
    }
}

fn soap_11_fault(fault: &SecurityFault) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <soap:Fault>
      <faultcode>soap:Client</faultcode>
      <faultstring>[{}] {}</faultstring>
      <detail>
        <sec:fault xmlns:sec="urn:wsse-engine:security">
{}
        </sec:fault>
      </detail>
    </soap:Fault>
  </soap:Body>
</soap:Envelope>"#,
        fault.code(),
        xml_escape(&fault.to_string()),
        fault_detail(fault)
    )
}

fn soap_12_fault(fault: &SecurityFault) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope">
  <soap:Body>
    <soap:Fault>
      <soap:Code>
        <soap:Value>soap:Sender</soap:Value>
      </soap:Code>
      <soap:Reason>
        <soap:Text xml:lang="en">[{}] {}</soap:Text>
      </soap:Reason>
      <soap:Detail>
        <sec:fault xmlns:sec="urn:wsse-engine:security">
{}
        </sec:fault>
      </soap:Detail>
    </soap:Fault>
  </soap:Body>
</soap:Envelope>"#,
        fault.code(),
        xml_escape(&fault.to_string()),
        fault_detail(fault)
    )
}

pub(crate) fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_error_codes() {
        let e = ProcessingError::BadSignature {
            element: "sig-1".to_string(),
            detail: "digest mismatch".to_string(),
        };
        assert_eq!(e.code(), "BAD_SIGNATURE");
        assert_eq!(e.element(), Some("sig-1"));

        let e = ProcessingError::CredentialTimeout {
            identifier: "session-1".to_string(),
        };
        assert_eq!(e.code(), "CREDENTIAL_TIMEOUT");
        assert!(e.element().is_none());
    }

    #[test]
    fn test_policy_violation_code_as_str() {
        assert_eq!(
            PolicyViolationCode::LayoutMismatch.as_str(),
            "LAYOUT_MISMATCH"
        );
        assert_eq!(
            PolicyViolationCode::StaleOrMissingTimestamp.as_str(),
            "STALE_OR_MISSING_TIMESTAMP"
        );
    }

    #[test]
    fn test_missing_token_carries_kind() {
        let v = PolicyViolation::missing_token(ResultKind::UsernameToken);
        assert_eq!(v.code, PolicyViolationCode::MissingToken);
        assert!(v.message.contains("UsernameToken"));
        assert_eq!(v.location.as_deref(), Some("UsernameToken"));
    }

    #[test]
    fn test_soap_11_fault_rendering() {
        let fault = SecurityFault::Processing(ProcessingError::DecryptionFailure {
            element: "enc-1".to_string(),
            detail: "aead tag mismatch".to_string(),
        });
        let body = soap_fault_response(&fault, SoapFaultVersion::Soap11);
        assert!(body.contains("http://schemas.xmlsoap.org/soap/envelope/"));
        assert!(body.contains("DECRYPTION_FAILURE"));
        assert!(body.contains("enc-1"));
    }

    #[test]
    fn test_soap_12_fault_rendering() {
        let fault = SecurityFault::Policy(PolicyViolation::new(
            PolicyViolationCode::BindingMismatch,
            "signature not bound to the shared secret",
        ));
        let body = soap_fault_response(&fault, SoapFaultVersion::Soap12);
        assert!(body.contains("http://www.w3.org/2003/05/soap-envelope"));
        assert!(body.contains("soap:Sender"));
        assert!(body.contains("BINDING_MISMATCH"));
    }

    #[test]
    fn test_fault_escapes_markup() {
        let fault = SecurityFault::Processing(ProcessingError::MalformedDocument(
            "<evil> & sons".to_string(),
        ));
        let body = soap_fault_response(&fault, SoapFaultVersion::Soap11);
        assert!(body.contains("&lt;evil&gt; &amp; sons"));
    }
}
