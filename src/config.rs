//! Configuration types for the inbound security engine.
//!
//! Everything is serde-friendly and YAML-expressible with per-section
//! defaults. Key material is carried base64-encoded and resolved into
//! [`Keystore`]s once, at engine construction.

use std::collections::HashMap;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{CryptoError, CryptoProviderResolver, Keystore};

/// Configuration problems detected at engine construction.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("keystore '{keystore}': bad key material for '{entry}': {detail}")]
    BadKeyMaterial {
        keystore: String,
        entry: String,
        detail: String,
    },

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// How to treat unrecognized security-header children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnknownElementPolicy {
    /// Reject the message (default)
    #[default]
    Strict,
    /// Skip the element and continue
    Permissive,
}

/// Processing-pass settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Unknown header child handling
    pub unknown_elements: UnknownElementPolicy,

    /// Upper bound for a single credential lookup, in milliseconds
    pub credential_timeout_ms: u64,

    /// Maximum XML nesting depth accepted from the wire
    pub max_document_depth: u32,

    /// Reject UsernameToken nonces that were already seen
    pub reject_nonce_replay: bool,

    /// How long seen nonces stay in the replay cache, in seconds
    pub nonce_cache_ttl_secs: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            unknown_elements: UnknownElementPolicy::Strict,
            credential_timeout_ms: 5_000,
            max_document_depth: 64,
            reject_nonce_replay: false,
            nonce_cache_ttl_secs: 300,
        }
    }
}

impl ProcessingConfig {
    /// Credential lookup deadline as a [`Duration`].
    pub fn credential_timeout(&self) -> Duration {
        Duration::from_millis(self.credential_timeout_ms)
    }
}

/// Which keystores back the resolved binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Keystore for signature verification (and, for the symmetric binding,
    /// all key material)
    pub signature_keystore: String,

    /// Separate keystore for key-transport decryption (asymmetric binding);
    /// falls back to the signature keystore when absent
    pub encryption_keystore: Option<String>,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            signature_keystore: "default".to_string(),
            encryption_keystore: None,
        }
    }
}

/// Base64-encoded key material for one named keystore.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KeystoreConfig {
    /// token id -> base64 symmetric key
    pub symmetric_keys: HashMap<String, String>,
    /// alias -> base64 SPKI DER public key
    pub verification_keys: HashMap<String, String>,
    /// alias -> base64 PKCS#8 DER private key
    pub private_keys: HashMap<String, String>,
    /// base64 DER trust-anchor certificates
    pub trusted_certs: Vec<String>,
}

impl KeystoreConfig {
    /// Decode the base64 material into a resolved [`Keystore`].
    pub fn build(&self, name: &str) -> Result<Keystore, ConfigError> {
        let decode = |entry: &str, value: &str| {
            BASE64
                .decode(value)
                .map_err(|e| ConfigError::BadKeyMaterial {
                    keystore: name.to_string(),
                    entry: entry.to_string(),
                    detail: e.to_string(),
                })
        };

        let mut keystore = Keystore::new();
        for (id, value) in &self.symmetric_keys {
            keystore.add_symmetric_key(id.clone(), decode(id, value)?);
        }
        for (alias, value) in &self.verification_keys {
            keystore.add_verification_key(alias.clone(), decode(alias, value)?);
        }
        for (alias, value) in &self.private_keys {
            keystore.add_private_key(alias.clone(), decode(alias, value)?);
        }
        for (index, value) in self.trusted_certs.iter().enumerate() {
            keystore.add_trusted_cert(decode(&format!("trusted_certs[{index}]"), value)?);
        }
        Ok(keystore)
    }
}

/// Full engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Processing-pass settings
    pub processing: ProcessingConfig,

    /// Keystore selection per binding
    pub crypto: CryptoConfig,

    /// Named keystores with base64 key material
    pub keystores: HashMap<String, KeystoreConfig>,
}

impl EngineConfig {
    /// Resolve all configured keystores into a provider resolver.
    pub fn provider_resolver(&self) -> Result<CryptoProviderResolver, ConfigError> {
        let mut resolver = CryptoProviderResolver::new();
        for (name, keystore_config) in &self.keystores {
            resolver = resolver.with_keystore(name.clone(), keystore_config.build(name)?);
        }
        Ok(resolver)
    }
}
