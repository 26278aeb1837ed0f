//! Shared fixtures for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use rsa::RsaPrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;

use crate::auth::{FetchError, KeySetFetcher, PublicKey, SigningKeyEntry, build_public_key};

/// 2048-bit PKCS#1 key used to sign every test token.
pub const FIXTURE_PRIVATE_KEY_PEM: &str = include_str!("../../tests/fixtures/rsa_private_key.pem");

/// Public half of [`FIXTURE_PRIVATE_KEY_PEM`] in SPKI form.
pub const FIXTURE_PUBLIC_KEY_PEM: &str = include_str!("../../tests/fixtures/rsa_public_key.pem");

/// Modulus of the fixture key as it appears in a JWKS `n` member.
pub const FIXTURE_MODULUS_B64URL: &str = "xq83nCd8AqH5n40dEBMElbaJd2gFWu6bjhNzyp9562dpf454BUSN0uF-g3i1yzcwdvADTiuExKN1u_IoGURxVCa0JTzAPJw6_JIoyOZnHZCoarcgQQqZ56_udkSQ2NssrwGSQjOwxMrgIdH6XeLgGqVN4BoEEI-gpaQZa7rSytU5RFSGOnZWO2Vwgs1OBxiOiYg1gzA1spJXQhxcBWw_v-YrUFtjxBKsG1UrWbnHbgciiN5U2v51Yztjo8A1T-o9eIG90jVo3EhS2qhbzd8mLAsEhjV1sP8GItjfdfwXpXT7q2QG99W3PM75-HdwGLvJIrkED7YRj4CpMkz6F1etaw";

pub fn fixture_private_key() -> RsaPrivateKey {
    RsaPrivateKey::from_pkcs1_pem(FIXTURE_PRIVATE_KEY_PEM).expect("fixture key parses")
}

pub fn fixture_public_key() -> PublicKey {
    build_public_key(FIXTURE_MODULUS_B64URL, "AQAB").expect("fixture modulus decodes")
}

/// The fixture key as a provider would publish it under `key_id`.
pub fn fixture_signing_entry(key_id: &str) -> SigningKeyEntry {
    SigningKeyEntry {
        key_id: key_id.to_string(),
        modulus: FIXTURE_MODULUS_B64URL.to_string(),
        exponent: "AQAB".to_string(),
    }
}

/// Sign `claims` with the fixture key using RS256.
pub fn sign_token(claims: &serde_json::Value, key_id: Option<&str>) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = key_id.map(str::to_string);
    let key = EncodingKey::from_rsa_pem(FIXTURE_PRIVATE_KEY_PEM.as_bytes()).expect("fixture key");
    encode(&header, claims, &key).expect("token signs")
}

pub fn encode_segment(value: &serde_json::Value) -> String {
    URL_SAFE_NO_PAD.encode(serde_json::to_vec(value).expect("json serializes"))
}

/// A token with the given header and payload and an empty signature.
pub fn unsigned_token(header: &serde_json::Value, payload: &serde_json::Value) -> String {
    format!("{}.{}.", encode_segment(header), encode_segment(payload))
}

/// Replace the first signature character so the signature no longer matches.
pub fn tamper_signature(token: &str) -> String {
    let (signed, signature) = token.rsplit_once('.').expect("three segments");
    let replacement = if signature.starts_with('A') { 'B' } else { 'A' };
    format!("{signed}.{replacement}{}", &signature[1..])
}

pub fn in_one_hour() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock after epoch")
        .as_secs()
        + 3600
}

/// Publishes a fixed key set and counts how often it was asked.
pub struct CountingFetcher {
    entries: Vec<SigningKeyEntry>,
    calls: AtomicUsize,
}

impl CountingFetcher {
    pub fn new(entries: Vec<SigningKeyEntry>) -> Self {
        Self {
            entries,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl KeySetFetcher for Arc<CountingFetcher> {
    async fn fetch_current_keys(&self) -> Result<Vec<SigningKeyEntry>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.entries.clone())
    }
}
