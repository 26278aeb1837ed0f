//! Unverified token header and claims.
//!
//! Verification has to decide which key to check a signature with before the
//! signature can be checked, so the header and payload are read first without
//! trusting them. Nothing parsed here is authoritative until the signature
//! check in [`super::verifier`] passes.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::RejectedReason;

/// The token header fields verification dispatches on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenHeader {
    /// Declared signing algorithm (`alg`).
    #[serde(rename = "alg")]
    pub algorithm: String,
    /// Key-id of the signing key (`kid`).
    #[serde(rename = "kid", default)]
    pub key_id: Option<String>,
}

impl TokenHeader {
    /// Read the header of a compact-serialized token.
    ///
    /// # Errors
    /// Returns `RejectedReason::MalformedToken` if the token is not three
    /// segments or the header is not base64url JSON with an `alg` member.
    pub fn parse(raw_token: &str) -> Result<Self, RejectedReason> {
        let (header, _, _) = split_token(raw_token)?;
        decode_segment(header)
    }
}

/// `aud` may be a single string or an array of strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

#[derive(Deserialize)]
struct Payload {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    aud: Option<Audience>,
    #[serde(default)]
    iss: Option<String>,
}

/// Claims and header fields of a token, not yet verified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenClaims {
    /// `sub`; an empty string is treated as absent.
    pub subject: Option<String>,
    /// `aud`, normalized to a list.
    pub audience: Vec<String>,
    /// `iss`.
    pub issuer: Option<String>,
    /// Header `kid`.
    pub key_id: Option<String>,
    /// Header `alg`.
    pub algorithm: String,
}

impl TokenClaims {
    /// Read header and payload of a token.
    ///
    /// # Errors
    /// Returns `RejectedReason::MalformedToken` if either segment cannot be decoded.
    pub fn parse_unverified(raw_token: &str) -> Result<Self, RejectedReason> {
        let header = TokenHeader::parse(raw_token)?;
        Self::with_header(header, raw_token)
    }

    /// Read the payload of a token whose header was already parsed.
    ///
    /// # Errors
    /// Returns `RejectedReason::MalformedToken` if the payload cannot be decoded.
    pub fn with_header(header: TokenHeader, raw_token: &str) -> Result<Self, RejectedReason> {
        let (_, payload, _) = split_token(raw_token)?;
        let payload: Payload = decode_segment(payload)?;

        let audience = match payload.aud {
            None => Vec::new(),
            Some(Audience::One(aud)) => vec![aud],
            Some(Audience::Many(aud)) => aud,
        };

        Ok(Self {
            subject: payload.sub.filter(|sub| !sub.is_empty()),
            audience,
            issuer: payload.iss,
            key_id: header.key_id,
            algorithm: header.algorithm,
        })
    }

    /// Whether `aud` names `client_id`.
    #[must_use]
    pub fn audience_contains(&self, client_id: &str) -> bool {
        self.audience.iter().any(|aud| aud == client_id)
    }
}

fn split_token(raw_token: &str) -> Result<(&str, &str, &str), RejectedReason> {
    let mut segments = raw_token.split('.');
    match (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) {
        (Some(header), Some(payload), Some(signature), None) => Ok((header, payload, signature)),
        _ => Err(RejectedReason::MalformedToken),
    }
}

fn decode_segment<T: DeserializeOwned>(segment: &str) -> Result<T, RejectedReason> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| RejectedReason::MalformedToken)?;
    serde_json::from_slice(&bytes).map_err(|_| RejectedReason::MalformedToken)
}
