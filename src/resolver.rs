//! Credential resolution for security-header processing.
//!
//! The processor never owns passwords or session keys; it asks an injected
//! [`CredentialResolver`] for them. For the symmetric binding the claim is a
//! token identifier looked up in a [`TokenStore`]; for username tokens it is
//! a username handed to an external password callback.
//!
//! Resolvers receive the configured timeout and are expected to bound any
//! blocking lookup themselves; the processor additionally converts an
//! observed deadline breach into a credential-timeout error.

use std::time::Duration;

use crate::store::TokenStore;

/// What the message claims to hold a credential for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialClaim {
    /// UsernameToken principal
    Username(String),
    /// Security-context/session token identifier
    TokenId(String),
}

impl CredentialClaim {
    /// The identifier string inside the claim.
    pub fn identifier(&self) -> &str {
        match self {
            Self::Username(s) | Self::TokenId(s) => s,
        }
    }
}

/// A resolved secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Secret {
    /// Cleartext password for digest or plaintext comparison
    Password(String),
    /// Symmetric key bytes
    Key(Vec<u8>),
}

/// Why resolution failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError {
    /// No credential exists for the claim
    Unknown,
    /// The lookup could not complete within the allowed time
    Timeout,
}

/// Contract for credential lookups during one processing pass.
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, claim: &CredentialClaim, timeout: Duration) -> Result<Secret, ResolveError>;
}

/// Password source callback for username claims.
pub type PasswordLookup = dyn Fn(&str) -> Option<String> + Send + Sync;

/// Resolver backed by a [`TokenStore`] for token-id claims and an optional
/// password callback for username claims.
pub struct TokenStoreResolver {
    store: TokenStore,
    passwords: Option<Box<PasswordLookup>>,
}

impl TokenStoreResolver {
    pub fn new(store: TokenStore) -> Self {
        Self {
            store,
            passwords: None,
        }
    }

    /// Attach a password source for username claims.
    pub fn with_passwords<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.passwords = Some(Box::new(lookup));
        self
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }
}

impl CredentialResolver for TokenStoreResolver {
    fn resolve(&self, claim: &CredentialClaim, _timeout: Duration) -> Result<Secret, ResolveError> {
        match claim {
            CredentialClaim::TokenId(id) => self
                .store
                .get(id)
                .map(|entry| Secret::Key(entry.secret))
                .ok_or(ResolveError::Unknown),
            CredentialClaim::Username(name) => match &self.passwords {
                Some(lookup) => lookup(name)
                    .map(Secret::Password)
                    .ok_or(ResolveError::Unknown),
                None => Err(ResolveError::Unknown),
            },
        }
    }
}
