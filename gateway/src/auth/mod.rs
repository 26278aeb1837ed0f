//! Token authentication.
//!
//! Tokens are compact-serialized RS256/RS384/RS512 JWTs from one of two trust
//! models: personal access tokens issued by the gateway (in-house) and tokens
//! issued by an external OIDC provider.
//!
//! # Pre-conditions
//! - The caller selects the trust model for each token.
//!
//! # Post-conditions
//! - A token is accepted only after its signature verifies against the key its
//!   trust model resolved.
//!
//! # Invariants
//! - Published provider keys are replaced as a whole snapshot, never piecemeal.
//! - A missing in-house key rejects every in-house token.

pub mod claims;
pub mod fetcher;
pub mod jwk;
pub mod key_cache;
pub mod key_material;
pub mod public_key;
pub mod rejection;
pub mod token_store;
pub mod verifier;

pub use claims::{TokenClaims, TokenHeader};
pub use fetcher::{FetchError, HttpKeySetFetcher, KeySetFetcher};
pub use jwk::{DecodeError, JsonWebKeySet, SigningKeyEntry, build_public_key};
pub use key_cache::{KeyNotFound, KeySnapshot, OidcKeyCache};
pub use key_material::{InHouseSigningKey, load_private_key};
pub use public_key::PublicKey;
pub use rejection::RejectedReason;
pub use token_store::{
    InMemoryTokenStore, PersistedTokenRecord, PersistedTokenStore, StoreError, TokenHash,
};
pub use verifier::{
    InHouseStrategy, OidcStrategy, Principal, TokenOrigin, TokenVerificationStrategy,
    TokenVerifier, authenticate_with, check_signing_method,
};
