//! JSON Web Key decoding.
//!
//! Turns the modulus/exponent pair an identity provider publishes for each
//! of its RSA signing keys into a [`PublicKey`].
//!
//! # Invariants
//! - Decoding is pure: the same inputs always produce the same key.
//! - Exponents wider than 64 bits are rejected, never truncated.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rsa::BigUint;
use serde::{Deserialize, Serialize};

use super::PublicKey;

/// Width in bytes of the integer a public exponent is read into.
pub const EXPONENT_WIDTH: usize = 8;

/// Error returned when a published key cannot be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// A field is not valid unpadded base64url.
    Encoding {
        /// `n` or `e`.
        field: &'static str,
        /// Decoder message.
        reason: String,
    },
    /// The modulus decoded to zero bytes.
    EmptyModulus,
    /// The exponent decoded to zero bytes.
    EmptyExponent,
    /// The exponent is wider than [`EXPONENT_WIDTH`] bytes.
    ExponentTooLarge(usize),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encoding { field, reason } => {
                write!(f, "invalid base64url in '{field}': {reason}")
            }
            Self::EmptyModulus => write!(f, "modulus is empty"),
            Self::EmptyExponent => write!(f, "exponent is empty"),
            Self::ExponentTooLarge(len) => {
                write!(
                    f,
                    "exponent is {len} bytes, at most {EXPONENT_WIDTH} are supported"
                )
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// One key of a provider key-set document.
///
/// Only the members needed to pick and build RSA signing keys are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKey {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub use_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

/// A provider key-set document (`{"keys": [...]}`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<JsonWebKey>,
}

/// A published RSA signing key, still base64url encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningKeyEntry {
    pub key_id: String,
    pub modulus: String,
    pub exponent: String,
}

impl JsonWebKeySet {
    /// The RSA signature keys of this set.
    ///
    /// Keys of other types, encryption keys and keys without a `kid` cannot
    /// sign tokens we accept and are skipped. An RSA key with a missing `n`
    /// or `e` is kept with an empty value so that building it fails and the
    /// refresh that fetched it is rejected as a whole.
    #[must_use]
    pub fn signing_entries(self) -> Vec<SigningKeyEntry> {
        self.keys
            .into_iter()
            .filter(|key| key.kty == "RSA")
            .filter(|key| key.use_field.as_deref() != Some("enc"))
            .filter_map(|key| {
                let Some(key_id) = key.kid else {
                    tracing::debug!("skipping published RSA key without kid");
                    return None;
                };
                Some(SigningKeyEntry {
                    key_id,
                    modulus: key.n.unwrap_or_default(),
                    exponent: key.e.unwrap_or_default(),
                })
            })
            .collect()
    }
}

/// Build a public key from a base64url modulus and exponent.
///
/// The modulus is read as a big-endian unsigned integer. The exponent is
/// left-padded with zero bytes to [`EXPONENT_WIDTH`] and read as a
/// big-endian `u64`, so the common three byte `AQAB` decodes to 65537.
///
/// # Errors
/// Returns `DecodeError` if either value is not unpadded base64url, is empty,
/// or the exponent is wider than 64 bits.
pub fn build_public_key(
    modulus_b64url: &str,
    exponent_b64url: &str,
) -> Result<PublicKey, DecodeError> {
    let modulus = decode_field("n", modulus_b64url)?;
    if modulus.is_empty() {
        return Err(DecodeError::EmptyModulus);
    }
    let exponent = exponent_from_be_bytes(&decode_field("e", exponent_b64url)?)?;

    Ok(PublicKey::new(BigUint::from_bytes_be(&modulus), exponent))
}

/// Read a big-endian exponent of at most [`EXPONENT_WIDTH`] bytes.
///
/// # Errors
/// Returns `DecodeError::EmptyExponent` or `DecodeError::ExponentTooLarge`.
pub fn exponent_from_be_bytes(bytes: &[u8]) -> Result<u64, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::EmptyExponent);
    }
    if bytes.len() > EXPONENT_WIDTH {
        return Err(DecodeError::ExponentTooLarge(bytes.len()));
    }

    let mut padded = [0u8; EXPONENT_WIDTH];
    padded[EXPONENT_WIDTH - bytes.len()..].copy_from_slice(bytes);
    Ok(u64::from_be_bytes(padded))
}

fn decode_field(field: &'static str, value: &str) -> Result<Vec<u8>, DecodeError> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| DecodeError::Encoding {
            field,
            reason: e.to_string(),
        })
}
