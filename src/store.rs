//! Concurrency-safe store of established security tokens.
//!
//! Holds secrets negotiated out of band (e.g. a security-context session
//! key) keyed by token identifier. Handles are cheap clones sharing one map;
//! all operations go through a single lock, so operations on the same
//! identifier are linearizable: a `remove` followed by a `get` from any
//! thread never observes the removed entry.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// One stored token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEntry {
    /// Symmetric key bytes or credential reference
    pub secret: Vec<u8>,
    /// When the token was established
    pub issued_at: DateTime<Utc>,
    /// When the token stops being served; `None` never expires
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenEntry {
    /// Entry issued now with no expiry.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            issued_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Entry issued now, expiring after `ttl_secs`.
    pub fn with_ttl(secret: Vec<u8>, ttl_secs: i64) -> Self {
        let now = Utc::now();
        Self {
            secret,
            issued_at: now,
            expires_at: Some(now + chrono::Duration::seconds(ttl_secs)),
        }
    }

    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if exp <= now)
    }
}

/// Keyed store of security tokens shared by concurrent message validations.
#[derive(Debug, Clone, Default)]
pub struct TokenStore {
    entries: Arc<RwLock<HashMap<String, TokenEntry>>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a live entry. Expired entries are invisible and removed.
    pub fn get(&self, id: &str) -> Option<TokenEntry> {
        let now = Utc::now();
        {
            let entries = self.entries.read();
            match entries.get(id) {
                Some(entry) if !entry.is_expired_at(now) => return Some(entry.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // Entry exists but expired: purge it under the write lock.
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get(id) {
            if entry.is_expired_at(now) {
                entries.remove(id);
            } else {
                return Some(entry.clone());
            }
        }
        None
    }

    /// Store an entry, replacing any previous one under the same identifier.
    /// There is never more than one live entry per identifier.
    pub fn put(&self, id: impl Into<String>, entry: TokenEntry) {
        self.entries.write().insert(id.into(), entry);
    }

    /// Store an entry only if no live entry exists for the identifier.
    /// Returns true when the entry was inserted. Used as a replay cache.
    pub fn put_if_absent(&self, id: impl Into<String>, entry: TokenEntry) -> bool {
        let id = id.into();
        let now = Utc::now();
        let mut entries = self.entries.write();
        match entries.get(&id) {
            Some(existing) if !existing.is_expired_at(now) => false,
            _ => {
                entries.insert(id, entry);
                true
            }
        }
    }

    /// Remove and return the entry, if present.
    pub fn remove(&self, id: &str) -> Option<TokenEntry> {
        self.entries.write().remove(id)
    }

    /// Drop all expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired_at(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
