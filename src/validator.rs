//! Policy-based validation of security results.
//!
//! [`PolicyValidator`] is a pure decision function over the ordered result
//! sequence produced by the processor: it mutates nothing and is idempotent.
//! Checks run in a fixed order (binding, required tokens, coverage, layout,
//! freshness, algorithm suite) and the first violation wins, since later
//! checks are meaningless once the binding itself is wrong. [`diagnose`]
//! runs every check for a full report.
//!
//! [`diagnose`]: PolicyValidator::diagnose

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::error::{PolicyViolation, PolicyViolationCode};
use crate::policy::{Binding, Layout, SecurityPolicy};
use crate::results::{ResultKind, ResultSequence, ResultSubject, SecurityResult};

/// Validates result sequences against one resolved policy.
///
/// Constructed once per security configuration and reused read-only across
/// messages.
#[derive(Debug, Clone)]
pub struct PolicyValidator {
    policy: SecurityPolicy,
}

impl PolicyValidator {
    pub fn new(policy: SecurityPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// Validate against the wall clock.
    pub fn validate(&self, results: &ResultSequence) -> Result<(), PolicyViolation> {
        self.validate_at(results, Utc::now())
    }

    /// Validate with an explicit `now`, for deterministic freshness checks.
    pub fn validate_at(
        &self,
        results: &ResultSequence,
        now: DateTime<Utc>,
    ) -> Result<(), PolicyViolation> {
        self.check_binding(results)?;
        self.check_required_tokens(results)?;
        self.check_coverage(results)?;
        self.check_layout(results)?;
        self.check_freshness(results, now)?;
        self.check_algorithms(results)?;
        debug!(results = results.len(), "policy satisfied");
        Ok(())
    }

    /// Run every check and report all violations, in check order.
    pub fn diagnose(&self, results: &ResultSequence, now: DateTime<Utc>) -> Vec<PolicyViolation> {
        [
            self.check_binding(results),
            self.check_required_tokens(results),
            self.check_coverage(results),
            self.check_layout(results),
            self.check_freshness(results, now),
            self.check_algorithms(results),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect()
    }

    // -- 1. binding ---------------------------------------------------------

    fn check_binding(&self, results: &ResultSequence) -> Result<(), PolicyViolation> {
        match self.policy.binding {
            Binding::Symmetric => self.check_symmetric_binding(results),
            Binding::Asymmetric => self.check_asymmetric_binding(results),
            Binding::Transport => Ok(()),
        }
    }

    fn check_symmetric_binding(&self, results: &ResultSequence) -> Result<(), PolicyViolation> {
        let signatures: Vec<&SecurityResult> = results.of_kind(ResultKind::Signature).collect();
        if signatures.len() != 1 {
            return Err(PolicyViolation::new(
                PolicyViolationCode::BindingMismatch,
                format!(
                    "symmetric binding requires exactly one signature, found {}",
                    signatures.len()
                ),
            ));
        }

        let signature = signatures[0];
        let root = match &signature.subject {
            ResultSubject::SharedSecret { .. } | ResultSubject::DerivedKey { .. } => {
                signature.subject.root_id().unwrap_or_default().to_string()
            }
            other => {
                return Err(PolicyViolation::new(
                    PolicyViolationCode::BindingMismatch,
                    format!("signature not keyed by the shared secret (subject {other:?})"),
                ))
            }
        };

        for result in results
            .iter()
            .filter(|r| matches!(r.kind, ResultKind::EncryptedKey | ResultKind::EncryptedParts))
        {
            if result.subject.root_id() != Some(root.as_str()) {
                return Err(PolicyViolation::with_location(
                    PolicyViolationCode::BindingMismatch,
                    format!(
                        "encryption used a different secret than the signature ('{}')",
                        root
                    ),
                    result.subject.root_id().unwrap_or("unknown").to_string(),
                ));
            }
        }
        Ok(())
    }

    fn check_asymmetric_binding(&self, results: &ResultSequence) -> Result<(), PolicyViolation> {
        let signatures: Vec<&SecurityResult> = results.of_kind(ResultKind::Signature).collect();
        if signatures.is_empty() {
            return Err(PolicyViolation::new(
                PolicyViolationCode::BindingMismatch,
                "asymmetric binding requires a signature",
            ));
        }

        let mut signature_key_ids = Vec::new();
        for signature in &signatures {
            match &signature.subject {
                ResultSubject::Certificate {
                    key_id, trusted, ..
                } => {
                    if !trusted {
                        return Err(PolicyViolation::with_location(
                            PolicyViolationCode::BindingMismatch,
                            "signature certificate does not chain to a configured trust anchor",
                            key_id.clone(),
                        ));
                    }
                    signature_key_ids.push(key_id.clone());
                }
                other => {
                    return Err(PolicyViolation::new(
                        PolicyViolationCode::BindingMismatch,
                        format!("signature not keyed by a certificate (subject {other:?})"),
                    ))
                }
            }
        }

        // The encryption key pair must be distinct from the signing key pair.
        for result in results.of_kind(ResultKind::EncryptedKey) {
            if let ResultSubject::Certificate { key_id, .. } = &result.subject {
                if signature_key_ids.iter().any(|sig_id| sig_id == key_id) {
                    return Err(PolicyViolation::with_location(
                        PolicyViolationCode::BindingMismatch,
                        "encryption and signature must use distinct keys",
                        key_id.clone(),
                    ));
                }
            }
        }
        Ok(())
    }

    // -- 2. required tokens -------------------------------------------------

    fn check_required_tokens(&self, results: &ResultSequence) -> Result<(), PolicyViolation> {
        for kind in &self.policy.required_tokens {
            if results.first_of_kind(*kind).is_none() {
                return Err(PolicyViolation::missing_token(*kind));
            }
        }
        Ok(())
    }

    // -- 3. coverage --------------------------------------------------------

    fn check_coverage(&self, results: &ResultSequence) -> Result<(), PolicyViolation> {
        if self.policy.signed_parts.required {
            self.check_parts_covered(
                results,
                &[ResultKind::Signature, ResultKind::SignedParts],
                &self.policy.signed_parts.parts,
                "signed",
            )?;
        }
        if self.policy.encrypted_parts.required {
            self.check_parts_covered(
                results,
                &[ResultKind::EncryptedParts],
                &self.policy.encrypted_parts.parts,
                "encrypted",
            )?;
        }
        Ok(())
    }

    fn check_parts_covered(
        &self,
        results: &ResultSequence,
        kinds: &[ResultKind],
        required: &std::collections::BTreeSet<String>,
        verb: &str,
    ) -> Result<(), PolicyViolation> {
        for part in required {
            let covered = results
                .iter()
                .filter(|r| kinds.contains(&r.kind))
                .any(|r| r.covered_elements.contains(part));
            if !covered {
                return Err(PolicyViolation::with_location(
                    PolicyViolationCode::InsufficientCoverage,
                    format!("required part '{part}' is not {verb}"),
                    part.clone(),
                ));
            }
        }
        Ok(())
    }

    // -- 4. layout ----------------------------------------------------------

    fn check_layout(&self, results: &ResultSequence) -> Result<(), PolicyViolation> {
        match self.policy.layout {
            Layout::Lax => Ok(()),
            Layout::LaxTimestampFirst => {
                match results.position_of(ResultKind::Timestamp) {
                    Some(0) | None => Ok(()),
                    Some(position) => Err(PolicyViolation::new(
                        PolicyViolationCode::LayoutMismatch,
                        format!(
                            "timestamp must be the first security element, found at position {position}"
                        ),
                    )),
                }
            }
            Layout::LaxTimestampLast => match results.position_of(ResultKind::Timestamp) {
                None => Ok(()),
                Some(position) if position + 1 == results.len() => Ok(()),
                Some(position) => Err(PolicyViolation::new(
                    PolicyViolationCode::LayoutMismatch,
                    format!(
                        "timestamp must be the last security element, found at position {position}"
                    ),
                )),
            },
            Layout::Strict => {
                let mut previous: Option<(ResultKind, u8)> = None;
                for result in results {
                    let rank = strict_rank(result.kind);
                    if let Some((previous_kind, previous_rank)) = previous {
                        if rank < previous_rank {
                            return Err(PolicyViolation::new(
                                PolicyViolationCode::LayoutMismatch,
                                format!(
                                    "strict layout: {:?} may not follow {:?}",
                                    result.kind, previous_kind
                                ),
                            ));
                        }
                    }
                    if previous.map_or(true, |(_, r)| rank >= r) {
                        previous = Some((result.kind, rank));
                    }
                }
                Ok(())
            }
        }
    }

    // -- 5. freshness -------------------------------------------------------

    fn check_freshness(
        &self,
        results: &ResultSequence,
        now: DateTime<Utc>,
    ) -> Result<(), PolicyViolation> {
        if !self.policy.require_timestamp {
            return Ok(());
        }

        let timestamp = results.first_of_kind(ResultKind::Timestamp).ok_or_else(|| {
            PolicyViolation::new(
                PolicyViolationCode::StaleOrMissingTimestamp,
                "timestamp required but not present",
            )
        })?;

        let window = Duration::seconds(self.policy.freshness_window_secs as i64);

        if let Some(created) = timestamp.timestamp_created {
            if now < created - window {
                return Err(PolicyViolation::new(
                    PolicyViolationCode::StaleOrMissingTimestamp,
                    format!("timestamp not yet valid (created {created})"),
                ));
            }
        }

        // Inclusive boundary: a message expiring exactly now is still valid.
        if let Some(expires) = timestamp.timestamp_expires {
            if now > expires + window {
                return Err(PolicyViolation::new(
                    PolicyViolationCode::StaleOrMissingTimestamp,
                    format!("timestamp expired at {expires}"),
                ));
            }
        }
        Ok(())
    }

    // -- 6. algorithm suite -------------------------------------------------

    fn check_algorithms(&self, results: &ResultSequence) -> Result<(), PolicyViolation> {
        let suite = &self.policy.algorithms;
        for result in results {
            let Some(algorithm) = result.algorithm.as_deref() else {
                continue;
            };
            let allowed = match result.kind {
                ResultKind::Signature | ResultKind::SignedParts => {
                    suite.allows_signature(algorithm)
                }
                ResultKind::EncryptedParts => suite.allows_encryption(algorithm),
                ResultKind::EncryptedKey => suite.allows_key_wrap(algorithm),
                ResultKind::DerivedKeyToken => suite.allows_key_derivation(algorithm),
                _ => true,
            };
            if !allowed {
                return Err(PolicyViolation::with_location(
                    PolicyViolationCode::DisallowedAlgorithm,
                    format!("algorithm '{algorithm}' not allowed for {:?}", result.kind),
                    algorithm.to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Canonical rank for the strict layout: timestamps, then identity tokens,
/// then key material, then encryption, then signatures, then confirmations.
fn strict_rank(kind: ResultKind) -> u8 {
    match kind {
        ResultKind::Timestamp => 0,
        ResultKind::UsernameToken | ResultKind::SamlToken => 1,
        ResultKind::EncryptedKey | ResultKind::DerivedKeyToken => 2,
        ResultKind::EncryptedParts => 3,
        ResultKind::Signature | ResultKind::SignedParts => 4,
        ResultKind::SignatureConfirmation => 5,
    }
}
