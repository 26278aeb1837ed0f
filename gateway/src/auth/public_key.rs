//! RSA verification keys.
//!
//! Both trust models end in the same place: an RSA modulus and public
//! exponent that a token signature is checked against. In-house keys are
//! derived from the configured private key; OIDC keys are built from the
//! provider's published key set.

use jsonwebtoken::DecodingKey;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPublicKey};

use super::jwk::{DecodeError, exponent_from_be_bytes};

/// An RSA public key as published or derived, before it is handed to the
/// signature check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    modulus: BigUint,
    exponent: u64,
}

impl PublicKey {
    #[must_use]
    pub const fn new(modulus: BigUint, exponent: u64) -> Self {
        Self { modulus, exponent }
    }

    /// Take the public half of an `rsa` key.
    ///
    /// # Errors
    /// Returns `DecodeError::ExponentTooLarge` if the exponent does not fit in 64 bits.
    pub fn from_rsa(key: &RsaPublicKey) -> Result<Self, DecodeError> {
        let exponent = exponent_from_be_bytes(&key.e().to_bytes_be())?;
        Ok(Self::new(key.n().clone(), exponent))
    }

    #[must_use]
    pub const fn modulus(&self) -> &BigUint {
        &self.modulus
    }

    #[must_use]
    pub const fn exponent(&self) -> u64 {
        self.exponent
    }

    /// Key in the form `jsonwebtoken` verifies signatures with.
    #[must_use]
    pub fn decoding_key(&self) -> DecodingKey {
        let exponent = self.exponent.to_be_bytes();
        let significant = exponent
            .iter()
            .position(|byte| *byte != 0)
            .unwrap_or(exponent.len() - 1);
        DecodingKey::from_rsa_raw_components(&self.modulus.to_bytes_be(), &exponent[significant..])
    }
}
