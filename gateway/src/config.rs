//! Gateway configuration module.
//!
//! This module provides configuration loading for the gateway's token
//! authentication from environment variables.
//!
//! # Environment Variables
//!
//! - `GATEWAY_JWT_IN_HOUSE_PRIVATE_KEY`: PEM-encoded PKCS1 RSA private key for in-house tokens
//! - `GATEWAY_JWT_IN_HOUSE_PRIVATE_KEY_FILE`: Path to a file holding the same key (used when the
//!   variable above is unset)
//! - `GATEWAY_OIDC_CLIENT_ID`: Client identifier expected in the `aud` claim (required)
//! - `GATEWAY_OIDC_URL`: Issuer URL expected in the `iss` claim (required)
//! - `GATEWAY_OIDC_JWKS_URL`: Key-set endpoint (default: `{GATEWAY_OIDC_URL}/protocol/openid-connect/certs`)
//! - `GATEWAY_OIDC_REFRESH_INTERVAL_SECS`: Background key refresh period, `0` disables it (default: `300`)
//! - `GATEWAY_AUTH_MODE`: `in-house` or `oidc` (default: `in-house`)
//! - `GATEWAY_PAT_RECORDS`: Comma-separated `principal:sha256hex` personal access token records
//!
//! # Invariants
//!
//! - A missing private key is not a load error. It is carried as an empty string and
//!   turns into a fail-closed in-house signing key.
//! - `oidc_client_id` and `oidc_url` are never empty.

use std::path::PathBuf;
use std::time::Duration;

use crate::auth::{PersistedTokenRecord, TokenOrigin};

/// Gateway configuration.
///
/// # Post-conditions
///
/// - `oidc_jwks_url` is always set, derived from `oidc_url` when not configured
#[derive(Clone)]
pub struct GatewayConfig {
    /// PEM text of the in-house signing key. Empty when not configured.
    pub in_house_private_key: String,
    /// Expected `aud` claim of OIDC tokens.
    pub oidc_client_id: String,
    /// Expected `iss` claim of OIDC tokens.
    pub oidc_url: String,
    /// Where the provider publishes its current signing keys.
    pub oidc_jwks_url: String,
    /// Period of the background key refresh. Zero disables it.
    pub refresh_interval: Duration,
    /// Which verification strategy the binary applies to incoming tokens.
    pub auth_mode: TokenOrigin,
    /// Personal access token records seeded into the in-memory store.
    pub pat_records: Vec<PersistedTokenRecord>,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field(
                "in_house_private_key",
                &if self.in_house_private_key.is_empty() {
                    "<unset>"
                } else {
                    "<redacted>"
                },
            )
            .field("oidc_client_id", &self.oidc_client_id)
            .field("oidc_url", &self.oidc_url)
            .field("oidc_jwks_url", &self.oidc_jwks_url)
            .field("refresh_interval", &self.refresh_interval)
            .field("auth_mode", &self.auth_mode)
            .field("pat_records", &self.pat_records.len())
            .finish()
    }
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable is missing.
    MissingEnvVar(String),
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
    /// No private key material was configured.
    MissingKeyMaterial,
    /// The private key material could not be decoded.
    MalformedKeyMaterial(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingEnvVar(name) => {
                write!(f, "missing required environment variable: {name}")
            }
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
            Self::MissingKeyMaterial => write!(f, "private key material is not configured"),
            Self::MalformedKeyMaterial(reason) => {
                write!(f, "malformed private key material: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

const PRIVATE_KEY_VAR: &str = "GATEWAY_JWT_IN_HOUSE_PRIVATE_KEY";
const PRIVATE_KEY_FILE_VAR: &str = "GATEWAY_JWT_IN_HOUSE_PRIVATE_KEY_FILE";
const CLIENT_ID_VAR: &str = "GATEWAY_OIDC_CLIENT_ID";
const OIDC_URL_VAR: &str = "GATEWAY_OIDC_URL";
const JWKS_URL_VAR: &str = "GATEWAY_OIDC_JWKS_URL";
const REFRESH_INTERVAL_VAR: &str = "GATEWAY_OIDC_REFRESH_INTERVAL_SECS";
const AUTH_MODE_VAR: &str = "GATEWAY_AUTH_MODE";
const PAT_RECORDS_VAR: &str = "GATEWAY_PAT_RECORDS";

impl GatewayConfig {
    /// Default background refresh period in seconds.
    pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 300;
    /// Path appended to the issuer URL when no key-set endpoint is configured.
    pub const DEFAULT_JWKS_PATH: &'static str = "/protocol/openid-connect/certs";

    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// See [`GatewayConfig::from_vars`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `GATEWAY_OIDC_CLIENT_ID` or `GATEWAY_OIDC_URL` is not set or is empty
    /// - the private key file cannot be read
    /// - `GATEWAY_OIDC_REFRESH_INTERVAL_SECS`, `GATEWAY_AUTH_MODE` or
    ///   `GATEWAY_PAT_RECORDS` is set but not parseable
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let in_house_private_key = Self::load_private_key(&lookup)?;
        let oidc_client_id = Self::load_required(&lookup, CLIENT_ID_VAR)?;
        let oidc_url = Self::load_required(&lookup, OIDC_URL_VAR)?;
        let oidc_jwks_url = lookup(JWKS_URL_VAR)
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| {
                format!(
                    "{}{}",
                    oidc_url.trim_end_matches('/'),
                    Self::DEFAULT_JWKS_PATH
                )
            });
        let refresh_interval = Self::load_refresh_interval(&lookup)?;
        let auth_mode = Self::load_auth_mode(&lookup)?;
        let pat_records = Self::load_pat_records(&lookup)?;

        Ok(Self {
            in_house_private_key,
            oidc_client_id,
            oidc_url,
            oidc_jwks_url,
            refresh_interval,
            auth_mode,
            pat_records,
        })
    }

    /// Load the in-house private key text, inline or from a file.
    ///
    /// Returns an empty string if neither variable is set.
    fn load_private_key(lookup: &impl Fn(&str) -> Option<String>) -> Result<String, ConfigError> {
        if let Some(pem) = lookup(PRIVATE_KEY_VAR).filter(|pem| !pem.is_empty()) {
            return Ok(pem);
        }
        let Some(path) = lookup(PRIVATE_KEY_FILE_VAR).filter(|path| !path.is_empty()) else {
            return Ok(String::new());
        };
        let path = PathBuf::from(path);
        std::fs::read_to_string(&path).map_err(|e| ConfigError::InvalidValue {
            name: PRIVATE_KEY_FILE_VAR.to_string(),
            message: format!("cannot read '{}': {e}", path.display()),
        })
    }

    fn load_required(
        lookup: &impl Fn(&str) -> Option<String>,
        name: &str,
    ) -> Result<String, ConfigError> {
        let value = lookup(name).ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))?;

        if value.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: name.to_string(),
                message: "must not be empty".to_string(),
            });
        }

        Ok(value)
    }

    fn load_refresh_interval(
        lookup: &impl Fn(&str) -> Option<String>,
    ) -> Result<Duration, ConfigError> {
        match lookup(REFRESH_INTERVAL_VAR) {
            Some(value) => value
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| ConfigError::InvalidValue {
                    name: REFRESH_INTERVAL_VAR.to_string(),
                    message: format!("'{value}' is not a whole number of seconds"),
                }),
            None => Ok(Duration::from_secs(Self::DEFAULT_REFRESH_INTERVAL_SECS)),
        }
    }

    fn load_auth_mode(
        lookup: &impl Fn(&str) -> Option<String>,
    ) -> Result<TokenOrigin, ConfigError> {
        match lookup(AUTH_MODE_VAR) {
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                name: AUTH_MODE_VAR.to_string(),
                message: format!("'{value}' is not one of 'in-house', 'oidc'"),
            }),
            None => Ok(TokenOrigin::InHouse),
        }
    }

    fn load_pat_records(
        lookup: &impl Fn(&str) -> Option<String>,
    ) -> Result<Vec<PersistedTokenRecord>, ConfigError> {
        let Some(value) = lookup(PAT_RECORDS_VAR) else {
            return Ok(Vec::new());
        };
        value
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                PersistedTokenRecord::parse(entry).ok_or_else(|| ConfigError::InvalidValue {
                    name: PAT_RECORDS_VAR.to_string(),
                    message: "entries must look like 'principal:<64 hex digits>'".to_string(),
                })
            })
            .collect()
    }
}
