//! Cache of the identity provider's signing keys, keyed by `kid`.
//!
//! # Thread Safety
//!
//! The key map is an immutable [`KeySnapshot`] behind an `ArcSwap`. Readers load
//! the current snapshot without locking and never wait for a refresh. A refresh
//! builds a complete new snapshot and publishes it with a single store, so a
//! reader sees either every key of one refresh or every key of the next.
//!
//! Refreshes are idempotent and may run concurrently; the last one to finish wins.
//!
//! # Invariants
//!
//! - The published snapshot is the result of the most recently completed refresh.
//! - A refresh that fails, including one where a single key does not decode,
//!   leaves the published snapshot untouched.
//! - `resolve` looks up a key at most [`MAX_RESOLVE_ATTEMPTS`] times and refreshes
//!   after every miss.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::time::MissedTickBehavior;

use super::PublicKey;
use super::fetcher::{FetchError, KeySetFetcher};
use super::jwk::build_public_key;

/// Lookups a single `resolve` call makes before giving up.
pub const MAX_RESOLVE_ATTEMPTS: usize = 3;

/// Shortest period the background refresh runs at.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// The keys published by one refresh.
#[derive(Debug, Default)]
pub struct KeySnapshot {
    keys: HashMap<String, PublicKey>,
}

impl KeySnapshot {
    #[must_use]
    pub fn get(&self, key_id: &str) -> Option<&PublicKey> {
        self.keys.get(key_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key ids in unspecified order.
    pub fn key_ids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }
}

/// Error returned when a key id is still unknown after every attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyNotFound {
    pub key_id: String,
    pub attempts: usize,
}

impl std::fmt::Display for KeyNotFound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "public key with kid = {} not found after {} attempts",
            self.key_id, self.attempts
        )
    }
}

impl std::error::Error for KeyNotFound {}

/// Process-wide map from key id to provider public key.
pub struct OidcKeyCache<F> {
    fetcher: F,
    snapshot: ArcSwap<KeySnapshot>,
}

impl<F: KeySetFetcher> OidcKeyCache<F> {
    /// Create an empty cache. It fills on the first refresh.
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            snapshot: ArcSwap::from_pointee(KeySnapshot::default()),
        }
    }

    /// The currently published snapshot.
    pub fn snapshot(&self) -> Arc<KeySnapshot> {
        self.snapshot.load_full()
    }

    /// Look a key up in the current snapshot without refreshing.
    pub fn lookup(&self, key_id: &str) -> Option<PublicKey> {
        self.snapshot.load().get(key_id).cloned()
    }

    /// Replace the snapshot with the provider's current key set.
    ///
    /// # Errors
    /// Returns the fetch failure, or `FetchError::InvalidKey` for the first key
    /// that does not decode. The previous snapshot stays published on error.
    pub async fn refresh(&self) -> Result<(), FetchError> {
        let entries = self.fetcher.fetch_current_keys().await?;

        let mut keys = HashMap::with_capacity(entries.len());
        for entry in entries {
            let key = build_public_key(&entry.modulus, &entry.exponent).map_err(|source| {
                FetchError::InvalidKey {
                    key_id: entry.key_id.clone(),
                    source,
                }
            })?;
            keys.insert(entry.key_id, key);
        }

        let count = keys.len();
        self.snapshot.store(Arc::new(KeySnapshot { keys }));
        tracing::info!("Refreshed OIDC signing keys: {count} keys published");

        Ok(())
    }

    /// Find the key for `key_id`, refreshing after each miss.
    ///
    /// # Errors
    /// Returns `KeyNotFound` after [`MAX_RESOLVE_ATTEMPTS`] misses.
    pub async fn resolve(&self, key_id: &str) -> Result<PublicKey, KeyNotFound> {
        for attempt in 1..=MAX_RESOLVE_ATTEMPTS {
            if let Some(key) = self.lookup(key_id) {
                return Ok(key);
            }

            tracing::info!(
                "Retry retrieving public key from OIDC (kid={key_id}, attempt {attempt})"
            );
            if let Err(e) = self.refresh().await {
                tracing::warn!("OIDC key refresh failed: {e}");
            }
        }

        Err(KeyNotFound {
            key_id: key_id.to_string(),
            attempts: MAX_RESOLVE_ATTEMPTS,
        })
    }
}

impl<F: KeySetFetcher + 'static> OidcKeyCache<F> {
    /// Refresh the cache every `interval` on a background task.
    ///
    /// The task holds a weak reference and exits once the cache is dropped.
    /// Intervals shorter than [`MIN_REFRESH_INTERVAL`] are raised to it.
    pub fn spawn_refresh_task(
        cache: &Arc<Self>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let cache = Arc::downgrade(cache);
        let interval = interval.max(MIN_REFRESH_INTERVAL);
        tokio::spawn(async move {
            refresh_loop(cache, interval).await;
        })
    }
}

async fn refresh_loop<F: KeySetFetcher>(cache: Weak<OidcKeyCache<F>>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; startup already refreshed.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let Some(cache) = cache.upgrade() else {
            break;
        };

        if let Err(e) = cache.refresh().await {
            tracing::warn!("Scheduled OIDC key refresh failed: {e}");
        }
    }
}
