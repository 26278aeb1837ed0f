//! Request-facing verification failures.
//!
//! Every variant is safe to return to a caller and to write to an audit log.
//! None of them carries key material or raw token text.

/// Why a token was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectedReason {
    /// The token declares a signing algorithm other than RS256/RS384/RS512.
    UnsupportedMethod(String),
    /// The token is not three base64url JSON segments.
    MalformedToken,
    /// The `sub` claim is missing or empty.
    MissingSubject,
    /// The token header carries no `kid`.
    MissingKeyId,
    /// The `aud` claim does not name the configured client.
    AudienceMismatch,
    /// The `iss` claim is not the configured provider.
    IssuerMismatch,
    /// No published provider key has this `kid`.
    UnknownSigningKey(String),
    /// No persisted record matches the subject and token hash.
    TokenNotRecognized,
    /// The persisted token store could not be queried.
    StoreUnavailable,
    /// The in-house signing key is not configured or did not load.
    SigningKeyUnavailable,
    /// The signature does not match the resolved key.
    InvalidSignature,
    /// The `exp` claim is in the past.
    TokenExpired,
    /// The `nbf` claim is in the future.
    TokenNotYetValid,
}

impl RejectedReason {
    /// Stable identifier for audit logs and API responses.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedMethod(_) => "unsupported_method",
            Self::MalformedToken => "malformed_token",
            Self::MissingSubject => "missing_subject",
            Self::MissingKeyId => "missing_key_id",
            Self::AudienceMismatch => "audience_mismatch",
            Self::IssuerMismatch => "issuer_mismatch",
            Self::UnknownSigningKey(_) => "unknown_signing_key",
            Self::TokenNotRecognized => "token_not_recognized",
            Self::StoreUnavailable => "store_unavailable",
            Self::SigningKeyUnavailable => "signing_key_unavailable",
            Self::InvalidSignature => "invalid_signature",
            Self::TokenExpired => "token_expired",
            Self::TokenNotYetValid => "token_not_yet_valid",
        }
    }
}

impl std::fmt::Display for RejectedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedMethod(alg) => write!(f, "unexpected signing method: {alg}"),
            Self::MalformedToken => write!(f, "malformed token"),
            Self::MissingSubject => write!(f, "missing 'sub' claim"),
            Self::MissingKeyId => write!(f, "missing 'kid' header"),
            Self::AudienceMismatch => write!(f, "'aud' claim does not match"),
            Self::IssuerMismatch => write!(f, "'iss' claim does not match"),
            Self::UnknownSigningKey(kid) => write!(f, "public key with kid = {kid} not found"),
            Self::TokenNotRecognized => write!(f, "token not recognized"),
            Self::StoreUnavailable => write!(f, "token store unavailable"),
            Self::SigningKeyUnavailable => write!(f, "signing key unavailable"),
            Self::InvalidSignature => write!(f, "invalid token signature"),
            Self::TokenExpired => write!(f, "token has expired"),
            Self::TokenNotYetValid => write!(f, "token is not yet valid"),
        }
    }
}

impl std::error::Error for RejectedReason {}
