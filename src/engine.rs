//! Inbound security engine facade.
//!
//! Ties the pieces together the way a message-processing engine consumes
//! them: resolve crypto providers once from configuration, then for each
//! message parse the raw document, run the security-header processor, and
//! check the results against the policy. The caller owns fault delivery;
//! [`fault_response`] renders a SOAP Fault body for it.

use tracing::{debug, warn};

use crate::config::{ConfigError, EngineConfig};
use crate::crypto::BindingStrategy;
use crate::document::{SoapVersion, WorkingDocument};
use crate::error::{soap_fault_response, SecurityFault, SoapFaultVersion};
use crate::policy::SecurityPolicy;
use crate::processor::SecurityHeaderProcessor;
use crate::resolver::CredentialResolver;
use crate::results::{ResultKind, ResultSequence, ResultSubject};
use crate::store::TokenStore;
use crate::validator::PolicyValidator;

/// Outcome of a successfully verified inbound message.
#[derive(Debug)]
pub struct InboundOutcome {
    /// Working document with all ciphertext replaced by plaintext
    pub document: WorkingDocument,
    /// Ordered security results, for callers that inspect them further
    pub results: ResultSequence,
    /// Authenticated principal from a UsernameToken, if one was verified
    pub principal: Option<String>,
}

/// Verifies inbound messages against one policy and crypto configuration.
///
/// Construction resolves keystores and the binding strategy once; each
/// [`process_inbound`] call is an independent, sequential pipeline pass.
/// The engine itself is immutable across messages; the only shared mutable
/// state is the optional nonce replay cache, which is internally
/// synchronized.
///
/// [`process_inbound`]: SecurityEngine::process_inbound
pub struct SecurityEngine {
    processing: crate::config::ProcessingConfig,
    strategy: BindingStrategy,
    validator: PolicyValidator,
    nonce_cache: Option<TokenStore>,
}

impl SecurityEngine {
    /// Resolve providers and build an engine for the given policy.
    pub fn new(config: &EngineConfig, policy: SecurityPolicy) -> Result<Self, ConfigError> {
        let providers = config.provider_resolver()?;
        let strategy = providers.resolve(
            policy.binding,
            &config.crypto.signature_keystore,
            config.crypto.encryption_keystore.as_deref(),
        )?;
        let nonce_cache = config
            .processing
            .reject_nonce_replay
            .then(TokenStore::new);

        Ok(Self {
            processing: config.processing.clone(),
            strategy,
            validator: PolicyValidator::new(policy),
            nonce_cache,
        })
    }

    pub fn policy(&self) -> &SecurityPolicy {
        self.validator.policy()
    }

    /// Process one inbound message: parse, verify the security header in
    /// document order, then validate the results against the policy.
    ///
    /// On success the returned document has its encrypted content replaced
    /// by plaintext. On failure the message must be rejected; partial
    /// results are never exposed.
    pub fn process_inbound(
        &self,
        raw: &[u8],
        resolver: &dyn CredentialResolver,
    ) -> Result<InboundOutcome, SecurityFault> {
        let mut document = WorkingDocument::parse_with_depth_limit(
            raw,
            self.processing.max_document_depth,
        )
        .map_err(|e| {
            warn!(code = e.code(), "rejecting unparseable document");
            SecurityFault::Processing(e)
        })?;

        let mut processor = SecurityHeaderProcessor::new(&self.strategy, &self.processing);
        if let Some(cache) = &self.nonce_cache {
            processor = processor.with_nonce_cache(cache);
        }

        let results = processor.process(&mut document, resolver).map_err(|e| {
            warn!(code = e.code(), element = ?e.element(), "security processing failed");
            SecurityFault::Processing(e)
        })?;

        self.validator.validate(&results).map_err(|violation| {
            warn!(
                code = violation.code.as_str(),
                location = ?violation.location,
                "policy not satisfied"
            );
            SecurityFault::Policy(violation)
        })?;

        let principal = results
            .of_kind(ResultKind::UsernameToken)
            .find_map(|r| match &r.subject {
                ResultSubject::Principal { username } => Some(username.clone()),
                _ => None,
            });

        debug!(
            results = results.len(),
            principal = ?principal,
            "inbound message accepted"
        );

        Ok(InboundOutcome {
            document,
            results,
            principal,
        })
    }
}

/// Render a SOAP Fault body for a rejected message, defaulting to SOAP 1.1
/// when the version could not be detected.
pub fn fault_response(fault: &SecurityFault, version: Option<SoapVersion>) -> String {
    let fault_version = match version {
        Some(SoapVersion::Soap12) => SoapFaultVersion::Soap12,
        _ => SoapFaultVersion::Soap11,
    };
    soap_fault_response(fault, fault_version)
}
