//! Persisted personal access token records.
//!
//! In-house tokens stay valid only while the store holds a record of
//! `(principal, sha256(token))`. Revoking a token deletes its record.
//!
//! # Thread Safety
//!
//! Stores are shared across concurrent verifications and must be `Send + Sync`.
//! The verifier issues a single `exists` call per token and never retries.

use std::collections::HashSet;
use std::future::Future;
use std::sync::RwLock;

use sha2::{Digest, Sha256};

/// SHA-256 digest of a raw token string.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenHash([u8; 32]);

impl TokenHash {
    /// Hash the raw token exactly as presented.
    #[must_use]
    pub fn of_token(raw_token: &str) -> Self {
        Self(Sha256::digest(raw_token.as_bytes()).into())
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse 64 hex digits.
    #[must_use]
    pub fn from_hex(value: &str) -> Option<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(value, &mut bytes).ok()?;
        Some(Self(bytes))
    }
}

impl std::fmt::Debug for TokenHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TokenHash({})", self.to_hex())
    }
}

/// A persisted token record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PersistedTokenRecord {
    pub principal: String,
    pub token_hash: TokenHash,
}

impl PersistedTokenRecord {
    #[must_use]
    pub fn new(principal: impl Into<String>, token_hash: TokenHash) -> Self {
        Self {
            principal: principal.into(),
            token_hash,
        }
    }

    /// Record for a raw token issued to `principal`.
    #[must_use]
    pub fn for_token(principal: impl Into<String>, raw_token: &str) -> Self {
        Self::new(principal, TokenHash::of_token(raw_token))
    }

    /// Parse `principal:<64 hex digits>`.
    ///
    /// The principal may itself contain `:`; the hash is taken after the last one.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let (principal, hash) = value.rsplit_once(':')?;
        if principal.is_empty() {
            return None;
        }
        Some(Self::new(principal, TokenHash::from_hex(hash)?))
    }
}

/// Error returned when the store cannot answer a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store is unreachable or failed the query.
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(reason) => write!(f, "token store unavailable: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Lookup of persisted token records.
pub trait PersistedTokenStore: Send + Sync {
    /// Whether a record `{principal, token_hash}` exists.
    fn exists(
        &self,
        principal: &str,
        token_hash: &TokenHash,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

/// A [`PersistedTokenStore`] held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    records: RwLock<HashSet<PersistedTokenRecord>>,
}

impl InMemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_records(records: impl IntoIterator<Item = PersistedTokenRecord>) -> Self {
        Self {
            records: RwLock::new(records.into_iter().collect()),
        }
    }

    /// Add a record. Returns `false` if it was already present.
    ///
    /// # Errors
    /// Returns `StoreError::Unavailable` if the lock is poisoned.
    pub fn insert(&self, record: PersistedTokenRecord) -> Result<bool, StoreError> {
        let mut records = self.records.write().map_err(|_| lock_poisoned())?;
        Ok(records.insert(record))
    }

    /// Remove a record. Returns `false` if it was not present.
    ///
    /// # Errors
    /// Returns `StoreError::Unavailable` if the lock is poisoned.
    pub fn revoke(&self, principal: &str, token_hash: &TokenHash) -> Result<bool, StoreError> {
        let mut records = self.records.write().map_err(|_| lock_poisoned())?;
        Ok(records.remove(&PersistedTokenRecord::new(principal, *token_hash)))
    }

    /// Number of stored records.
    ///
    /// # Errors
    /// Returns `StoreError::Unavailable` if the lock is poisoned.
    pub fn len(&self) -> Result<usize, StoreError> {
        let records = self.records.read().map_err(|_| lock_poisoned())?;
        Ok(records.len())
    }

    /// # Errors
    /// Returns `StoreError::Unavailable` if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

impl PersistedTokenStore for InMemoryTokenStore {
    async fn exists(&self, principal: &str, token_hash: &TokenHash) -> Result<bool, StoreError> {
        let records = self.records.read().map_err(|_| lock_poisoned())?;
        Ok(records.contains(&PersistedTokenRecord::new(principal, *token_hash)))
    }
}

fn lock_poisoned() -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}
