//! Fetching the identity provider's current signing keys.

use std::future::Future;
use std::time::Duration;

use super::jwk::{DecodeError, JsonWebKeySet, SigningKeyEntry};

/// Timeout applied to a single key-set request.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest key-set document accepted, in bytes.
pub const MAX_KEY_SET_BYTES: usize = 256 * 1024;

/// Error returned when the provider's key set cannot be obtained or used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The request could not be sent or the connection failed.
    Transport(String),
    /// The provider answered with a non-success status.
    Status(u16),
    /// The response body is not a key-set document.
    Body(String),
    /// The response body exceeds [`MAX_KEY_SET_BYTES`].
    BodyTooLarge(usize),
    /// A published key could not be decoded.
    InvalidKey {
        /// `kid` of the offending key.
        key_id: String,
        /// Why decoding failed.
        source: DecodeError,
    },
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(reason) => write!(f, "key set request failed: {reason}"),
            Self::Status(status) => write!(f, "key set endpoint returned status {status}"),
            Self::Body(reason) => write!(f, "invalid key set document: {reason}"),
            Self::BodyTooLarge(limit) => {
                write!(f, "key set document exceeds {limit} bytes")
            }
            Self::InvalidKey { key_id, source } => {
                write!(f, "invalid published key '{key_id}': {source}")
            }
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidKey { source, .. } => Some(source),
            Self::Transport(_) | Self::Status(_) | Self::Body(_) | Self::BodyTooLarge(_) => None,
        }
    }
}

/// Source of the provider's current signing keys.
pub trait KeySetFetcher: Send + Sync {
    /// Every RSA signing key the provider currently publishes.
    fn fetch_current_keys(
        &self,
    ) -> impl Future<Output = Result<Vec<SigningKeyEntry>, FetchError>> + Send;
}

/// Fetches a JWKS document over HTTP.
#[derive(Debug, Clone)]
pub struct HttpKeySetFetcher {
    client: reqwest::Client,
    jwks_url: String,
}

impl HttpKeySetFetcher {
    /// Create a fetcher for `jwks_url` with [`FETCH_TIMEOUT`].
    ///
    /// # Errors
    /// Returns `FetchError::Transport` if the HTTP client cannot be built.
    pub fn new(jwks_url: impl Into<String>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self::with_client(client, jwks_url))
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client, jwks_url: impl Into<String>) -> Self {
        Self {
            client,
            jwks_url: jwks_url.into(),
        }
    }

    #[must_use]
    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }
}

impl KeySetFetcher for HttpKeySetFetcher {
    async fn fetch_current_keys(&self) -> Result<Vec<SigningKeyEntry>, FetchError> {
        let mut response = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?
        {
            if body.len() + chunk.len() > MAX_KEY_SET_BYTES {
                return Err(FetchError::BodyTooLarge(MAX_KEY_SET_BYTES));
            }
            body.extend_from_slice(&chunk);
        }

        let jwks: JsonWebKeySet =
            serde_json::from_slice(&body).map_err(|e| FetchError::Body(e.to_string()))?;

        Ok(jwks.signing_entries())
    }
}
