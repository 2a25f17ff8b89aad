//! Typed outcomes of security-header operations.
//!
//! Processing a header produces one [`SecurityResult`] per verified
//! operation, collected into a [`ResultSequence`] that mirrors the header's
//! document order. The sequence is append-only; the validator relies on it
//! never being reordered.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a verified security operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResultKind {
    Timestamp,
    UsernameToken,
    Signature,
    SignatureConfirmation,
    EncryptedKey,
    EncryptedParts,
    SignedParts,
    DerivedKeyToken,
    SamlToken,
}

/// The token, certificate, or principal an operation was performed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultSubject {
    /// No key material involved (timestamps, confirmations)
    None,
    /// Authenticated username
    Principal { username: String },
    /// A shared secret established out of band, looked up by token id
    SharedSecret { token_id: String },
    /// A key derived from a base secret; `root_id` names the original secret
    DerivedKey { token_id: String, root_id: String },
    /// An asymmetric key, possibly carried by a certificate
    Certificate {
        key_id: String,
        subject_dn: Option<String>,
        trusted: bool,
    },
}

impl ResultSubject {
    /// The identifier of the underlying secret, tracing derived keys back to
    /// the secret they were derived from.
    pub fn root_id(&self) -> Option<&str> {
        match self {
            Self::SharedSecret { token_id } => Some(token_id),
            Self::DerivedKey { root_id, .. } => Some(root_id),
            Self::Certificate { key_id, .. } => Some(key_id),
            _ => None,
        }
    }
}

/// One verified operation outcome. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityResult {
    /// What kind of operation this records
    pub kind: ResultKind,
    /// Key material or principal involved
    pub subject: ResultSubject,
    /// Element identifiers and local names the operation applied to.
    /// Never empty for Signature and EncryptedParts results.
    pub covered_elements: BTreeSet<String>,
    /// Algorithm URI the operation used, when one applies
    pub algorithm: Option<String>,
    /// Timestamp instants, for [`ResultKind::Timestamp`] results
    pub timestamp_created: Option<DateTime<Utc>>,
    pub timestamp_expires: Option<DateTime<Utc>>,
}

impl SecurityResult {
    /// A result with no coverage, algorithm, or instants.
    pub fn new(kind: ResultKind, subject: ResultSubject) -> Self {
        Self {
            kind,
            subject,
            covered_elements: BTreeSet::new(),
            algorithm: None,
            timestamp_created: None,
            timestamp_expires: None,
        }
    }

    /// Attach the algorithm URI used by the operation.
    pub fn with_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.algorithm = Some(algorithm.into());
        self
    }

    /// Attach covered element identifiers.
    pub fn with_covered(mut self, covered: BTreeSet<String>) -> Self {
        self.covered_elements = covered;
        self
    }

    /// A Timestamp result recording the parsed instants.
    pub fn timestamp(created: DateTime<Utc>, expires: Option<DateTime<Utc>>) -> Self {
        Self {
            kind: ResultKind::Timestamp,
            subject: ResultSubject::None,
            covered_elements: BTreeSet::new(),
            algorithm: None,
            timestamp_created: Some(created),
            timestamp_expires: expires,
        }
    }
}

/// Append-only, insertion-ordered sequence of results for one message.
///
/// Order mirrors the security header's document order and is the sole input
/// the validator uses for layout checks; it is never sorted or rewritten.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSequence {
    results: Vec<SecurityResult>,
}

impl ResultSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a result; there is deliberately no way to insert or reorder.
    pub fn push(&mut self, result: SecurityResult) {
        self.results.push(result);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SecurityResult> {
        self.results.iter()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// All results of the given kind, in sequence order.
    pub fn of_kind(&self, kind: ResultKind) -> impl Iterator<Item = &SecurityResult> {
        self.results.iter().filter(move |r| r.kind == kind)
    }

    /// First result of the given kind, if any.
    pub fn first_of_kind(&self, kind: ResultKind) -> Option<&SecurityResult> {
        self.results.iter().find(|r| r.kind == kind)
    }

    /// Position of the first result of the given kind.
    pub fn position_of(&self, kind: ResultKind) -> Option<usize> {
        self.results.iter().position(|r| r.kind == kind)
    }
}

impl<'a> IntoIterator for &'a ResultSequence {
    type Item = &'a SecurityResult;
    type IntoIter = std::slice::Iter<'a, SecurityResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}
