//! In-house signing key material.
//!
//! # Pre-conditions
//! - The configured key is a PEM block labelled `RSA PRIVATE KEY` holding a PKCS1 key.
//!
//! # Post-conditions
//! - Only the public half of the key is kept after loading.
//!
//! # Invariants
//! - A missing or malformed key is never replaced by a default key. It is kept as
//!   [`InHouseSigningKey::Unavailable`] and every in-house verification fails closed.

use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::{RsaPrivateKey, RsaPublicKey};

use super::{PublicKey, RejectedReason};
use crate::config::ConfigError;

/// PEM label of a PKCS1 RSA private key.
pub const PRIVATE_KEY_LABEL: &str = "RSA PRIVATE KEY";

/// Parse PEM-armored PKCS1 private key text.
///
/// Keys coming from single-line environment variables often carry escaped
/// `\n` sequences instead of line breaks; those are unescaped first. Only the
/// first PEM block is read. Text around it, such as the `Bag Attributes`
/// header `openssl pkcs12` writes, is ignored.
///
/// # Errors
/// Returns `ConfigError::MissingKeyMaterial` if the text is empty and
/// `ConfigError::MalformedKeyMaterial` if there is no complete PEM block, the
/// first block carries another label, or it does not hold a valid PKCS1 key.
pub fn load_private_key(pem: &str) -> Result<RsaPrivateKey, ConfigError> {
    let pem = pem.trim();
    if pem.is_empty() {
        return Err(ConfigError::MissingKeyMaterial);
    }

    let pem = if pem.contains('\n') {
        pem.to_string()
    } else {
        pem.replace("\\n", "\n")
    };

    let (label, block) = first_pem_block(&pem).ok_or_else(|| {
        ConfigError::MalformedKeyMaterial("no complete PEM block found".to_string())
    })?;
    if label != PRIVATE_KEY_LABEL {
        return Err(ConfigError::MalformedKeyMaterial(format!(
            "expected a PEM block labelled '{PRIVATE_KEY_LABEL}', found '{label}'"
        )));
    }

    RsaPrivateKey::from_pkcs1_pem(block)
        .map_err(|e| ConfigError::MalformedKeyMaterial(format!("cannot parse PKCS1 key: {e}")))
}

/// The label and full text of the first `BEGIN`/`END` block in `text`.
fn first_pem_block(text: &str) -> Option<(&str, &str)> {
    const BEGIN: &str = "-----BEGIN ";
    const DASHES: &str = "-----";

    let start = text.find(BEGIN)?;
    let label_start = start + BEGIN.len();
    let label_len = text[label_start..].find(DASHES)?;
    let label = &text[label_start..label_start + label_len];

    let end_marker = format!("-----END {label}-----");
    let end = label_start + text[label_start..].find(&end_marker)? + end_marker.len();
    Some((label, &text[start..end]))
}

/// The key in-house tokens are verified against.
#[derive(Debug, Clone)]
pub enum InHouseSigningKey {
    /// The configured key loaded; holds its public half.
    Available(PublicKey),
    /// The configured key could not be loaded.
    Unavailable(ConfigError),
}

impl InHouseSigningKey {
    /// Load the in-house key from configuration.
    ///
    /// Failures are logged here once; callers observe them as
    /// `RejectedReason::SigningKeyUnavailable` on every verification.
    #[must_use]
    pub fn from_pem(pem: &str) -> Self {
        let loaded = load_private_key(pem).and_then(|private_key| {
            PublicKey::from_rsa(&RsaPublicKey::from(&private_key))
                .map_err(|e| ConfigError::MalformedKeyMaterial(e.to_string()))
        });

        match loaded {
            Ok(public_key) => {
                tracing::info!("In-house JWT signing key loaded");
                Self::Available(public_key)
            }
            Err(e) => {
                tracing::error!(
                    "In-house JWT signing key unavailable, in-house tokens will be rejected: {e}"
                );
                Self::Unavailable(e)
            }
        }
    }

    #[must_use]
    pub const fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    /// The verification key, or a fail-closed rejection.
    ///
    /// # Errors
    /// Returns `RejectedReason::SigningKeyUnavailable` if the key did not load.
    pub const fn public_key(&self) -> Result<&PublicKey, RejectedReason> {
        match self {
            Self::Available(key) => Ok(key),
            Self::Unavailable(_) => Err(RejectedReason::SigningKeyUnavailable),
        }
    }
}
