//! Inbound security-header processing.
//!
//! [`SecurityHeaderProcessor::process`] walks the `wsse:Security` children
//! strictly in document order and applies the matching operation to each,
//! accumulating an ordered [`ResultSequence`]. Order matters: decryption
//! replaces ciphertext in the working document, and a later signature may
//! only verify against the decrypted content. The pass is all-or-nothing:
//! the first failure discards every accumulated result.
//!
//! Key material flows through a per-pass registry: unwrapped
//! content-encryption keys and derived keys are registered under their
//! element ids and picked up by later signatures and reference lists. The
//! registry dies with the pass; the only cross-message state is the injected
//! [`TokenStore`] behind the credential resolver, which this module reads
//! but never mutates (aside from the optional nonce replay cache).

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Instant;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::{ProcessingConfig, UnknownElementPolicy};
use crate::crypto::{self, algorithms, BindingStrategy, Keystore, SignatureKey};
use crate::document::{WorkingDocument, XmlElement, DS_NS, XENC_NS};
use crate::error::ProcessingError;
use crate::header::{
    classify_security_header, DerivedKeyTokenElement, EncryptedKeyElement, KeyReference,
    PasswordType, SecurityHeaderChild, SignatureElement, TimestampToken, UsernameTokenElement,
};
use crate::resolver::{CredentialClaim, CredentialResolver, ResolveError, Secret};
use crate::results::{ResultKind, ResultSequence, ResultSubject, SecurityResult};
use crate::store::{TokenEntry, TokenStore};

/// A key established earlier in the pass, addressable by element id.
#[derive(Debug, Clone)]
struct RegisteredKey {
    secret: Vec<u8>,
    subject: ResultSubject,
}

/// Mutable state for one processing pass.
#[derive(Default)]
struct PassState {
    /// element id -> key registered by EncryptedKey / DerivedKeyToken
    registry: HashMap<String, RegisteredKey>,
    /// BinarySecurityToken id -> DER certificate
    certificates: HashMap<String, Vec<u8>>,
    /// EncryptedKey ids that decrypted nothing and were never referenced
    unused_encrypted_keys: HashSet<String>,
    seen_timestamp: bool,
}

impl PassState {
    fn register_key(&mut self, id: Option<&str>, key: RegisteredKey) {
        if let Some(id) = id {
            self.registry.insert(id.to_string(), key);
        }
    }

    /// Look up a registered key, marking its source EncryptedKey as used.
    fn use_key(&mut self, id: &str) -> Option<RegisteredKey> {
        let key = self.registry.get(id).cloned();
        if key.is_some() {
            self.unused_encrypted_keys.remove(id);
        }
        key
    }
}

/// Walks a security header and produces the ordered result sequence.
pub struct SecurityHeaderProcessor<'a> {
    strategy: &'a BindingStrategy,
    config: &'a ProcessingConfig,
    nonce_cache: Option<&'a TokenStore>,
}

impl<'a> SecurityHeaderProcessor<'a> {
    pub fn new(strategy: &'a BindingStrategy, config: &'a ProcessingConfig) -> Self {
        Self {
            strategy,
            config,
            nonce_cache: None,
        }
    }

    /// Attach a nonce replay cache; only consulted when
    /// `reject_nonce_replay` is set.
    pub fn with_nonce_cache(mut self, cache: &'a TokenStore) -> Self {
        self.nonce_cache = Some(cache);
        self
    }

    /// Process the document's security header in document order.
    ///
    /// A document without a security header yields an empty sequence;
    /// whether that is acceptable is the policy validator's call.
    pub fn process(
        &self,
        document: &mut WorkingDocument,
        resolver: &dyn CredentialResolver,
    ) -> Result<ResultSequence, ProcessingError> {
        let children = match document.security_header() {
            Some(security) => classify_security_header(security)?,
            None => {
                debug!("no security header present, empty result sequence");
                return Ok(ResultSequence::new());
            }
        };

        let mut results = ResultSequence::new();
        let mut state = PassState::default();

        for child in children {
            match child {
                SecurityHeaderChild::Timestamp(ts) => {
                    self.process_timestamp(&ts, &mut state, &mut results)?;
                }
                SecurityHeaderChild::UsernameToken(token) => {
                    self.process_username_token(&token, resolver, &mut results)?;
                }
                SecurityHeaderChild::BinarySecurityToken(bst) => {
                    let der = BASE64.decode(bst.data.as_bytes()).map_err(|e| {
                        ProcessingError::MalformedToken {
                            element: bst
                                .id
                                .clone()
                                .unwrap_or_else(|| "BinarySecurityToken".to_string()),
                            detail: format!("bad base64 token data: {e}"),
                        }
                    })?;
                    if let Some(id) = &bst.id {
                        state.certificates.insert(id.clone(), der);
                    }
                }
                SecurityHeaderChild::EncryptedKey(ek) => {
                    self.process_encrypted_key(&ek, document, resolver, &mut state, &mut results)?;
                }
                SecurityHeaderChild::ReferenceList(data_refs) => {
                    self.process_reference_list(&data_refs, document, &mut state, &mut results)?;
                }
                SecurityHeaderChild::DerivedKeyToken(dk) => {
                    self.process_derived_key_token(&dk, resolver, &mut state, &mut results)?;
                }
                SecurityHeaderChild::Signature(sig) => {
                    self.process_signature(&sig, document, resolver, &mut state, &mut results)?;
                }
                SecurityHeaderChild::SignatureConfirmation(confirmation) => {
                    let mut result =
                        SecurityResult::new(ResultKind::SignatureConfirmation, ResultSubject::None);
                    if let Some(value) = confirmation.value {
                        result
                            .covered_elements
                            .insert(format!("confirmed:{value}"));
                    }
                    results.push(result);
                }
                SecurityHeaderChild::SamlAssertion(assertion) => {
                    let mut result =
                        SecurityResult::new(ResultKind::SamlToken, ResultSubject::None);
                    if let Some(id) = assertion.assertion_id {
                        result.covered_elements.insert(id);
                    }
                    results.push(result);
                }
                SecurityHeaderChild::Unknown { name } => match self.config.unknown_elements {
                    UnknownElementPolicy::Strict => {
                        return Err(ProcessingError::UnsupportedElement { element: name });
                    }
                    UnknownElementPolicy::Permissive => {
                        warn!(element = %name, "skipping unknown security header element");
                    }
                },
            }
        }

        if let Some(id) = state.unused_encrypted_keys.iter().next() {
            return Err(ProcessingError::MalformedToken {
                element: id.clone(),
                detail: "EncryptedKey decrypts nothing and is never referenced".to_string(),
            });
        }

        debug!(results = results.len(), "security header processed");
        Ok(results)
    }

    // -- timestamp ----------------------------------------------------------

    fn process_timestamp(
        &self,
        ts: &TimestampToken,
        state: &mut PassState,
        results: &mut ResultSequence,
    ) -> Result<(), ProcessingError> {
        let label = ts.id.clone().unwrap_or_else(|| "Timestamp".to_string());
        if state.seen_timestamp {
            return Err(ProcessingError::MalformedToken {
                element: label,
                detail: "more than one Timestamp in the security header".to_string(),
            });
        }
        state.seen_timestamp = true;

        let created = parse_instant(&ts.created, &label)?;
        let expires = match &ts.expires {
            Some(text) => Some(parse_instant(text, &label)?),
            None => None,
        };
        if let Some(exp) = expires {
            if exp < created {
                return Err(ProcessingError::MalformedToken {
                    element: label,
                    detail: "Expires precedes Created".to_string(),
                });
            }
        }

        // Freshness is judged later by the validator from the recorded
        // instants; only structural problems abort here.
        results.push(SecurityResult::timestamp(created, expires));
        Ok(())
    }

    // -- username token -----------------------------------------------------

    fn process_username_token(
        &self,
        token: &UsernameTokenElement,
        resolver: &dyn CredentialResolver,
        results: &mut ResultSequence,
    ) -> Result<(), ProcessingError> {
        let label = token
            .id
            .clone()
            .unwrap_or_else(|| "UsernameToken".to_string());

        let secret = self.resolve_with_deadline(
            resolver,
            &CredentialClaim::Username(token.username.clone()),
        )?;
        let expected_password = match secret {
            Secret::Password(p) => p,
            Secret::Key(_) => {
                return Err(ProcessingError::UnknownCredential {
                    identifier: token.username.clone(),
                })
            }
        };

        if self.config.reject_nonce_replay {
            if let (Some(cache), Some(nonce)) = (self.nonce_cache, &token.nonce) {
                let cache_key = format!("nonce:{}:{}", token.username, nonce);
                let entry =
                    TokenEntry::with_ttl(Vec::new(), self.config.nonce_cache_ttl_secs as i64);
                if !cache.put_if_absent(cache_key, entry) {
                    return Err(ProcessingError::AuthenticationFailure {
                        username: token.username.clone(),
                    });
                }
            }
        }

        let presented = token.password.as_deref().filter(|p| !p.is_empty()).ok_or(
            ProcessingError::MalformedToken {
                element: label.clone(),
                detail: "UsernameToken without Password".to_string(),
            },
        )?;

        let authentic = match token.password_type {
            PasswordType::Text => {
                crypto::constant_time_eq(presented.as_bytes(), expected_password.as_bytes())
            }
            PasswordType::Digest => {
                let nonce_b64 = token.nonce.as_deref().ok_or_else(|| {
                    ProcessingError::MalformedToken {
                        element: label.clone(),
                        detail: "digest password without Nonce".to_string(),
                    }
                })?;
                let created = token.created.as_deref().ok_or_else(|| {
                    ProcessingError::MalformedToken {
                        element: label.clone(),
                        detail: "digest password without Created".to_string(),
                    }
                })?;
                let nonce = BASE64.decode(nonce_b64.as_bytes()).map_err(|e| {
                    ProcessingError::MalformedToken {
                        element: label.clone(),
                        detail: format!("bad base64 nonce: {e}"),
                    }
                })?;
                let expected = crypto::password_digest(&nonce, created, &expected_password);
                crypto::constant_time_eq(presented.as_bytes(), expected.as_bytes())
            }
        };

        if !authentic {
            return Err(ProcessingError::AuthenticationFailure {
                username: token.username.clone(),
            });
        }

        debug!(username = %token.username, "username token verified");
        results.push(SecurityResult::new(
            ResultKind::UsernameToken,
            ResultSubject::Principal {
                username: token.username.clone(),
            },
        ));
        Ok(())
    }

    // -- encrypted keys and data --------------------------------------------

    fn process_encrypted_key(
        &self,
        ek: &EncryptedKeyElement,
        document: &mut WorkingDocument,
        resolver: &dyn CredentialResolver,
        state: &mut PassState,
        results: &mut ResultSequence,
    ) -> Result<(), ProcessingError> {
        let label = ek.id.clone().unwrap_or_else(|| "EncryptedKey".to_string());

        let (kek_subject, content_key) = match self.strategy {
            BindingStrategy::Symmetric { keystore } => {
                let (secret, subject) =
                    self.resolve_symmetric_key(&ek.key_info, keystore, resolver, state, &label)?;
                if ek.algorithm != algorithms::ENC_AES256_GCM {
                    return Err(ProcessingError::DecryptionFailure {
                        element: label,
                        detail: format!(
                            "key-wrap algorithm '{}' not usable with the symmetric binding",
                            ek.algorithm
                        ),
                    });
                }
                let wrapped = decode_b64(&ek.cipher_value, &label)?;
                let cek = crypto::aes256_gcm_open(&secret, &wrapped).map_err(|e| {
                    ProcessingError::DecryptionFailure {
                        element: label.clone(),
                        detail: e.to_string(),
                    }
                })?;
                (subject, cek)
            }
            BindingStrategy::Asymmetric { encryption, .. } => {
                if ek.algorithm != algorithms::KW_RSA_OAEP {
                    return Err(ProcessingError::DecryptionFailure {
                        element: label,
                        detail: format!(
                            "key-wrap algorithm '{}' not usable with the asymmetric binding",
                            ek.algorithm
                        ),
                    });
                }
                let (key_id, private_key) = match &ek.key_info {
                    KeyReference::KeyIdentifier { value } => (
                        value.clone(),
                        encryption.private_key(value).ok_or_else(|| {
                            ProcessingError::UnknownCredential {
                                identifier: value.clone(),
                            }
                        })?,
                    ),
                    _ => (
                        label.clone(),
                        encryption.any_private_key().ok_or_else(|| {
                            ProcessingError::UnknownCredential {
                                identifier: "decryption key".to_string(),
                            }
                        })?,
                    ),
                };
                let wrapped = decode_b64(&ek.cipher_value, &label)?;
                let cek = crypto::rsa_oaep_decrypt(private_key, &wrapped).map_err(|e| {
                    ProcessingError::DecryptionFailure {
                        element: label.clone(),
                        detail: e.to_string(),
                    }
                })?;
                (
                    ResultSubject::Certificate {
                        key_id,
                        subject_dn: None,
                        trusted: true,
                    },
                    cek,
                )
            }
            BindingStrategy::Transport => {
                return Err(ProcessingError::UnsupportedElement {
                    element: format!("{label} (no crypto providers under the transport binding)"),
                })
            }
        };

        state.register_key(
            ek.id.as_deref(),
            RegisteredKey {
                secret: content_key.clone(),
                subject: kek_subject.clone(),
            },
        );

        let mut covered = BTreeSet::new();
        let mut data_algorithm = None;
        for data_id in &ek.data_references {
            let (ids, algorithm) = self.decrypt_data_element(document, data_id, &content_key)?;
            covered.extend(ids);
            data_algorithm.get_or_insert(algorithm);
        }

        if covered.is_empty() {
            if let Some(id) = &ek.id {
                state.unused_encrypted_keys.insert(id.clone());
            } else {
                return Err(ProcessingError::MalformedToken {
                    element: label,
                    detail: "EncryptedKey without Id decrypts nothing and cannot be referenced"
                        .to_string(),
                });
            }
        }

        results.push(
            SecurityResult::new(ResultKind::EncryptedKey, kek_subject.clone())
                .with_algorithm(ek.algorithm.clone())
                .with_covered(covered.clone()),
        );

        if !covered.is_empty() {
            let mut parts = SecurityResult::new(ResultKind::EncryptedParts, kek_subject)
                .with_covered(covered);
            if let Some(algorithm) = data_algorithm {
                parts = parts.with_algorithm(algorithm);
            }
            results.push(parts);
        }
        Ok(())
    }

    fn process_reference_list(
        &self,
        data_refs: &[String],
        document: &mut WorkingDocument,
        state: &mut PassState,
        results: &mut ResultSequence,
    ) -> Result<(), ProcessingError> {
        if matches!(self.strategy, BindingStrategy::Transport) {
            return Err(ProcessingError::UnsupportedElement {
                element: "ReferenceList (no crypto providers under the transport binding)"
                    .to_string(),
            });
        }

        for data_id in data_refs {
            // The EncryptedData's own KeyInfo must point at a key registered
            // earlier in the pass.
            let key_ref = {
                let element = document.find_by_id(data_id).ok_or_else(|| {
                    ProcessingError::DecryptionFailure {
                        element: data_id.clone(),
                        detail: "no EncryptedData with this id".to_string(),
                    }
                })?;
                parse_encrypted_data(element)?.key_info
            };
            let registered = match &key_ref {
                KeyReference::Reference { uri } => state.use_key(uri),
                KeyReference::KeyIdentifier { value } => state.use_key(value),
                KeyReference::None => None,
            }
            .ok_or_else(|| ProcessingError::DecryptionFailure {
                element: data_id.clone(),
                detail: "no established key for this EncryptedData".to_string(),
            })?;

            let (covered, algorithm) =
                self.decrypt_data_element(document, data_id, &registered.secret)?;
            results.push(
                SecurityResult::new(ResultKind::EncryptedParts, registered.subject.clone())
                    .with_algorithm(algorithm)
                    .with_covered(covered),
            );
        }
        Ok(())
    }

    /// Decrypt one EncryptedData element and splice the plaintext back into
    /// the working document. This is the pass's single mutation point.
    fn decrypt_data_element(
        &self,
        document: &mut WorkingDocument,
        data_id: &str,
        key: &[u8],
    ) -> Result<(BTreeSet<String>, String), ProcessingError> {
        let info = {
            let element = document.find_by_id(data_id).ok_or_else(|| {
                ProcessingError::DecryptionFailure {
                    element: data_id.to_string(),
                    detail: "no EncryptedData with this id".to_string(),
                }
            })?;
            parse_encrypted_data(element)?
        };

        if info.algorithm != algorithms::ENC_AES256_GCM {
            return Err(ProcessingError::DecryptionFailure {
                element: data_id.to_string(),
                detail: format!("unsupported data encryption algorithm '{}'", info.algorithm),
            });
        }

        let ciphertext = decode_b64(&info.cipher_value, data_id)?;
        let plaintext = crypto::aes256_gcm_open(key, &ciphertext).map_err(|e| {
            ProcessingError::DecryptionFailure {
                element: data_id.to_string(),
                detail: e.to_string(),
            }
        })?;

        let fragment =
            WorkingDocument::parse_with_depth_limit(&plaintext, self.config.max_document_depth)
                .map_err(|e| ProcessingError::DecryptionFailure {
                    element: data_id.to_string(),
                    detail: format!("decrypted content is not well-formed XML: {e}"),
                })?;

        let replacement = fragment.root;
        let mut covered: BTreeSet<String> = BTreeSet::new();
        covered.insert(data_id.to_string());
        covered.insert(replacement.local_name.clone());
        if let Some(id) = replacement.id() {
            covered.insert(id.to_string());
        }

        document.replace_by_id(data_id, replacement);
        debug!(element = %data_id, "ciphertext replaced with decrypted content");
        Ok((covered, info.algorithm))
    }

    // -- derived keys -------------------------------------------------------

    fn process_derived_key_token(
        &self,
        dk: &DerivedKeyTokenElement,
        resolver: &dyn CredentialResolver,
        state: &mut PassState,
        results: &mut ResultSequence,
    ) -> Result<(), ProcessingError> {
        let label = dk
            .id
            .clone()
            .unwrap_or_else(|| "DerivedKeyToken".to_string());

        if matches!(self.strategy, BindingStrategy::Transport) {
            return Err(ProcessingError::UnsupportedElement {
                element: format!("{label} (no crypto providers under the transport binding)"),
            });
        }

        let (base_secret, base_subject) = self.resolve_base_secret(dk, resolver, state, &label)?;

        let nonce = match &dk.nonce {
            Some(b64) => decode_b64(b64, &label)?,
            None => Vec::new(),
        };
        let default_label = "WS-SecureConversationWS-SecureConversation";
        let derivation_label = dk.label.as_deref().unwrap_or(default_label);

        let derived = crypto::derive_key(
            &dk.algorithm,
            &base_secret,
            derivation_label.as_bytes(),
            &nonce,
            dk.offset,
            dk.length,
        )
        .map_err(|e| ProcessingError::MalformedToken {
            element: label.clone(),
            detail: e.to_string(),
        })?;

        let root_id = base_subject
            .root_id()
            .unwrap_or(&label)
            .to_string();
        let subject = ResultSubject::DerivedKey {
            token_id: label.clone(),
            root_id,
        };

        state.register_key(
            dk.id.as_deref(),
            RegisteredKey {
                secret: derived,
                subject: subject.clone(),
            },
        );

        results.push(
            SecurityResult::new(ResultKind::DerivedKeyToken, subject)
                .with_algorithm(dk.algorithm.clone()),
        );
        Ok(())
    }

    fn resolve_base_secret(
        &self,
        dk: &DerivedKeyTokenElement,
        resolver: &dyn CredentialResolver,
        state: &mut PassState,
        label: &str,
    ) -> Result<(Vec<u8>, ResultSubject), ProcessingError> {
        let reference = match &dk.base {
            KeyReference::Reference { uri } => uri,
            KeyReference::KeyIdentifier { value } => value,
            KeyReference::None => {
                return Err(ProcessingError::MalformedToken {
                    element: label.to_string(),
                    detail: "DerivedKeyToken without a base token reference".to_string(),
                })
            }
        };

        if let Some(registered) = state.use_key(reference) {
            return Ok((registered.secret, registered.subject));
        }

        match self.strategy {
            BindingStrategy::Symmetric { keystore } => {
                let (secret, subject) = self.resolve_symmetric_key(
                    &KeyReference::KeyIdentifier {
                        value: reference.clone(),
                    },
                    keystore,
                    resolver,
                    state,
                    label,
                )?;
                Ok((secret, subject))
            }
            _ => Err(ProcessingError::UnknownCredential {
                identifier: reference.clone(),
            }),
        }
    }

    // -- signatures ---------------------------------------------------------

    fn process_signature(
        &self,
        sig: &SignatureElement,
        document: &WorkingDocument,
        resolver: &dyn CredentialResolver,
        state: &mut PassState,
        results: &mut ResultSequence,
    ) -> Result<(), ProcessingError> {
        let label = sig.id.clone().unwrap_or_else(|| "Signature".to_string());

        if sig.references.is_empty() {
            return Err(ProcessingError::MalformedToken {
                element: label,
                detail: "Signature covers no elements".to_string(),
            });
        }

        let (key, subject) = self.resolve_signature_key(sig, resolver, state, &label)?;

        let mut covered = BTreeSet::new();
        for reference in &sig.references {
            let element = document.find_by_id(&reference.uri).ok_or_else(|| {
                ProcessingError::BadSignature {
                    element: label.clone(),
                    detail: format!("referenced element '#{}' not found", reference.uri),
                }
            })?;
            let canonical = element.canonical_bytes();
            let actual = crypto::digest(&reference.digest_method, &canonical).map_err(|e| {
                ProcessingError::BadSignature {
                    element: label.clone(),
                    detail: e.to_string(),
                }
            })?;
            let expected = decode_b64(&reference.digest_value, &label)?;
            if !crypto::constant_time_eq(&actual, &expected) {
                return Err(ProcessingError::BadSignature {
                    element: label.clone(),
                    detail: format!("digest mismatch for '#{}'", reference.uri),
                });
            }
            covered.insert(reference.uri.clone());
            covered.insert(element.local_name.clone());
        }

        let signature_value = decode_b64(&sig.signature_value, &label)?;
        crypto::verify_signature_value(
            &sig.signature_method,
            &key,
            &sig.signed_info_canonical,
            &signature_value,
        )
        .map_err(|e| ProcessingError::BadSignature {
            element: label.clone(),
            detail: e.to_string(),
        })?;

        debug!(signature = %label, covered = covered.len(), "signature verified");
        results.push(
            SecurityResult::new(ResultKind::Signature, subject)
                .with_algorithm(sig.signature_method.clone())
                .with_covered(covered),
        );
        Ok(())
    }

    fn resolve_signature_key(
        &self,
        sig: &SignatureElement,
        resolver: &dyn CredentialResolver,
        state: &mut PassState,
        label: &str,
    ) -> Result<(SignatureKey, ResultSubject), ProcessingError> {
        match self.strategy {
            BindingStrategy::Symmetric { keystore } => {
                let (secret, subject) =
                    self.resolve_symmetric_key(&sig.key_info, keystore, resolver, state, label)?;
                Ok((SignatureKey::Hmac(secret), subject))
            }
            BindingStrategy::Asymmetric { signature, .. } => {
                self.resolve_asymmetric_signature_key(sig, signature, state, label)
            }
            BindingStrategy::Transport => Err(ProcessingError::UnsupportedElement {
                element: format!("{label} (no crypto providers under the transport binding)"),
            }),
        }
    }

    fn resolve_asymmetric_signature_key(
        &self,
        sig: &SignatureElement,
        keystore: &Keystore,
        state: &mut PassState,
        label: &str,
    ) -> Result<(SignatureKey, ResultSubject), ProcessingError> {
        match &sig.key_info {
            KeyReference::Reference { uri } => {
                let der = state.certificates.get(uri).cloned().ok_or_else(|| {
                    ProcessingError::UnknownCredential {
                        identifier: uri.clone(),
                    }
                })?;
                let info = keystore.evaluate_certificate(&der).map_err(|e| {
                    ProcessingError::MalformedToken {
                        element: uri.clone(),
                        detail: e.to_string(),
                    }
                })?;
                Ok((
                    SignatureKey::RsaSpki(info.spki_der),
                    ResultSubject::Certificate {
                        key_id: uri.clone(),
                        subject_dn: Some(info.subject),
                        trusted: info.trusted,
                    },
                ))
            }
            KeyReference::KeyIdentifier { value } => {
                let spki = keystore.verification_key(value).ok_or_else(|| {
                    ProcessingError::UnknownCredential {
                        identifier: value.clone(),
                    }
                })?;
                // A key configured in the trust store is trusted by definition.
                Ok((
                    SignatureKey::RsaSpki(spki.to_vec()),
                    ResultSubject::Certificate {
                        key_id: value.clone(),
                        subject_dn: None,
                        trusted: true,
                    },
                ))
            }
            KeyReference::None => Err(ProcessingError::MalformedToken {
                element: label.to_string(),
                detail: "Signature without key information".to_string(),
            }),
        }
    }

    /// Resolve a symmetric secret: registry first (keys established earlier
    /// in the pass), then the keystore, then the session's credential
    /// resolver.
    fn resolve_symmetric_key(
        &self,
        key_ref: &KeyReference,
        keystore: &Keystore,
        resolver: &dyn CredentialResolver,
        state: &mut PassState,
        label: &str,
    ) -> Result<(Vec<u8>, ResultSubject), ProcessingError> {
        let identifier = match key_ref {
            KeyReference::Reference { uri } => uri,
            KeyReference::KeyIdentifier { value } => value,
            KeyReference::None => {
                return Err(ProcessingError::MalformedToken {
                    element: label.to_string(),
                    detail: "missing key reference".to_string(),
                })
            }
        };

        if let Some(registered) = state.use_key(identifier) {
            return Ok((registered.secret, registered.subject));
        }

        if let Some(secret) = keystore.symmetric_key(identifier) {
            return Ok((
                secret.to_vec(),
                ResultSubject::SharedSecret {
                    token_id: identifier.clone(),
                },
            ));
        }

        let secret = self.resolve_with_deadline(
            resolver,
            &CredentialClaim::TokenId(identifier.clone()),
        )?;
        match secret {
            Secret::Key(key) => Ok((
                key,
                ResultSubject::SharedSecret {
                    token_id: identifier.clone(),
                },
            )),
            Secret::Password(_) => Err(ProcessingError::UnknownCredential {
                identifier: identifier.clone(),
            }),
        }
    }

    // -- shared helpers -----------------------------------------------------

    /// Resolve a credential, bounding the lookup by the configured timeout.
    /// A resolver-reported timeout and an observed deadline breach both map
    /// to `CredentialTimeout`.
    fn resolve_with_deadline(
        &self,
        resolver: &dyn CredentialResolver,
        claim: &CredentialClaim,
    ) -> Result<Secret, ProcessingError> {
        let timeout = self.config.credential_timeout();
        let started = Instant::now();
        let outcome = resolver.resolve(claim, timeout);
        if started.elapsed() > timeout {
            return Err(ProcessingError::CredentialTimeout {
                identifier: claim.identifier().to_string(),
            });
        }
        outcome.map_err(|e| match e {
            ResolveError::Unknown => ProcessingError::UnknownCredential {
                identifier: claim.identifier().to_string(),
            },
            ResolveError::Timeout => ProcessingError::CredentialTimeout {
                identifier: claim.identifier().to_string(),
            },
        })
    }
}

/// Parsed pieces of an `xenc:EncryptedData` element.
struct EncryptedDataInfo {
    algorithm: String,
    cipher_value: String,
    key_info: KeyReference,
}

fn parse_encrypted_data(element: &XmlElement) -> Result<EncryptedDataInfo, ProcessingError> {
    let label = element
        .id()
        .map(str::to_string)
        .unwrap_or_else(|| element.qualified_name());

    if !element.is(XENC_NS, "EncryptedData") {
        return Err(ProcessingError::DecryptionFailure {
            element: label,
            detail: "referenced element is not an EncryptedData".to_string(),
        });
    }

    let algorithm = element
        .find_child(XENC_NS, "EncryptionMethod")
        .and_then(|e| e.attribute("Algorithm").map(str::to_string))
        .ok_or_else(|| ProcessingError::MalformedToken {
            element: label.clone(),
            detail: "EncryptedData without EncryptionMethod".to_string(),
        })?;

    let cipher_value = element
        .find_child(XENC_NS, "CipherData")
        .and_then(|cd| cd.child_text(XENC_NS, "CipherValue"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ProcessingError::MalformedToken {
            element: label.clone(),
            detail: "EncryptedData without CipherValue".to_string(),
        })?;

    let key_info = element
        .find_child(DS_NS, "KeyInfo")
        .map(crate::header::parse_key_reference)
        .unwrap_or(KeyReference::None);

    Ok(EncryptedDataInfo {
        algorithm,
        cipher_value,
        key_info,
    })
}

fn parse_instant(text: &str, label: &str) -> Result<DateTime<Utc>, ProcessingError> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ProcessingError::MalformedToken {
            element: label.to_string(),
            detail: format!("bad timestamp value '{text}'"),
        })
}

fn decode_b64(value: &str, label: &str) -> Result<Vec<u8>, ProcessingError> {
    BASE64
        .decode(value.as_bytes())
        .map_err(|e| ProcessingError::MalformedToken {
            element: label.to_string(),
            detail: format!("bad base64 value: {e}"),
        })
}
