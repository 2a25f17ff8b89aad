//! Resolved security policy model.
//!
//! A [`SecurityPolicy`] is the in-memory form of a WS-SecurityPolicy binding
//! assertion set, produced by an external policy-resolution step. It is
//! constructed once per security configuration and read concurrently by many
//! message validations; nothing in this crate mutates it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::results::ResultKind;

/// How keys are established for a message exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Binding {
    /// Single shared secret covers signing and encryption
    #[default]
    Symmetric,
    /// Separate signing and encryption key pairs, certificate trust
    Asymmetric,
    /// Trust delegated to the transport channel
    Transport,
}

/// Required relative ordering of security header children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Layout {
    /// Fixed canonical ordering of token kinds
    Strict,
    /// No ordering constraint
    #[default]
    Lax,
    /// Timestamp, if present, must come first
    LaxTimestampFirst,
    /// Timestamp, if present, must come last
    LaxTimestampLast,
}

/// Message parts that must be signed or encrypted.
///
/// Parts are matched against covered-element identifiers, which record both
/// wsu:Id values and resolved local names, so `Body` and `#body-1` styles
/// both work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PartsRequirement {
    /// Whether coverage is required at all
    pub required: bool,
    /// Element names or ids that must be covered
    pub parts: BTreeSet<String>,
}

impl PartsRequirement {
    /// Requirement covering the given parts.
    pub fn of<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: true,
            parts: parts.into_iter().map(Into::into).collect(),
        }
    }
}

/// Allowed algorithm URIs per operation class. An empty set leaves that
/// class unconstrained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AlgorithmSuite {
    pub signature: BTreeSet<String>,
    pub encryption: BTreeSet<String>,
    pub key_wrap: BTreeSet<String>,
    pub key_derivation: BTreeSet<String>,
}

impl AlgorithmSuite {
    fn allows(set: &BTreeSet<String>, algorithm: &str) -> bool {
        set.is_empty() || set.contains(algorithm)
    }

    pub fn allows_signature(&self, algorithm: &str) -> bool {
        Self::allows(&self.signature, algorithm)
    }

    pub fn allows_encryption(&self, algorithm: &str) -> bool {
        Self::allows(&self.encryption, algorithm)
    }

    pub fn allows_key_wrap(&self, algorithm: &str) -> bool {
        Self::allows(&self.key_wrap, algorithm)
    }

    pub fn allows_key_derivation(&self, algorithm: &str) -> bool {
        Self::allows(&self.key_derivation, algorithm)
    }
}

/// Read-only per-operation policy snapshot consumed by the validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityPolicy {
    /// Key-establishment binding
    pub binding: Binding,
    /// Header layout rule
    pub layout: Layout,
    /// Token kinds that must appear in the results
    pub required_tokens: BTreeSet<ResultKind>,
    /// Message parts that must be signed
    pub signed_parts: PartsRequirement,
    /// Message parts that must be encrypted
    pub encrypted_parts: PartsRequirement,
    /// Whether a Timestamp result must be present and fresh
    pub require_timestamp: bool,
    /// Allowed clock skew, in seconds, when judging timestamp freshness
    pub freshness_window_secs: u64,
    /// Allowed algorithms per operation class
    pub algorithms: AlgorithmSuite,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            binding: Binding::default(),
            layout: Layout::default(),
            required_tokens: BTreeSet::new(),
            signed_parts: PartsRequirement::default(),
            encrypted_parts: PartsRequirement::default(),
            require_timestamp: false,
            freshness_window_secs: 300,
            algorithms: AlgorithmSuite::default(),
        }
    }
}

impl SecurityPolicy {
    /// Policy requiring the given token kinds on top of defaults.
    pub fn requiring<I>(kinds: I) -> Self
    where
        I: IntoIterator<Item = ResultKind>,
    {
        Self {
            required_tokens: kinds.into_iter().collect(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = SecurityPolicy::default();
        assert_eq!(policy.binding, Binding::Symmetric);
        assert_eq!(policy.layout, Layout::Lax);
        assert!(!policy.require_timestamp);
        assert_eq!(policy.freshness_window_secs, 300);
        assert!(policy.required_tokens.is_empty());
    }

    #[test]
    fn test_empty_algorithm_suite_allows_everything() {
        let suite = AlgorithmSuite::default();
        assert!(suite.allows_signature("urn:any"));
        assert!(suite.allows_encryption("urn:any"));
    }

    #[test]
    fn test_populated_algorithm_suite_restricts() {
        let suite = AlgorithmSuite {
            signature: ["urn:sig-a".to_string()].into_iter().collect(),
            ..Default::default()
        };
        assert!(suite.allows_signature("urn:sig-a"));
        assert!(!suite.allows_signature("urn:sig-b"));
        // Other classes stay unconstrained.
        assert!(suite.allows_encryption("urn:enc-x"));
    }

    #[test]
    fn test_parts_requirement_of() {
        let parts = PartsRequirement::of(["Body"]);
        assert!(parts.required);
        assert!(parts.parts.contains("Body"));
    }

    #[test]
    fn test_policy_serde_round_trip() {
        let policy = SecurityPolicy {
            binding: Binding::Asymmetric,
            layout: Layout::LaxTimestampFirst,
            required_tokens: [ResultKind::Timestamp, ResultKind::Signature]
                .into_iter()
                .collect(),
            signed_parts: PartsRequirement::of(["Body"]),
            require_timestamp: true,
            ..Default::default()
        };
        let yaml = serde_yaml::to_string(&policy).unwrap();
        let parsed: SecurityPolicy = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, policy);
    }
}
