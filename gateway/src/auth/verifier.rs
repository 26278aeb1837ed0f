//! Token verification.
//!
//! A token moves through `Unverified -> MethodChecked -> ClaimsChecked ->
//! KeySourceResolved -> Accepted | Rejected`. Nothing is persisted between calls.
//!
//! Two strategies decide where the verification key comes from:
//!
//! - [`InHouseStrategy`]: the token must be recorded in the persisted token
//!   store under its subject; the key is the configured in-house key.
//! - [`OidcStrategy`]: audience and issuer must match the configured provider;
//!   the key is the provider key named by the header `kid`.
//!
//! Callers pick the strategy explicitly, by endpoint or configured mode.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use jsonwebtoken::{Algorithm, Validation, decode};

use super::claims::{TokenClaims, TokenHeader};
use super::fetcher::KeySetFetcher;
use super::key_cache::OidcKeyCache;
use super::key_material::InHouseSigningKey;
use super::token_store::{PersistedTokenStore, TokenHash};
use super::{PublicKey, RejectedReason};

/// Which trust model vouched for a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenOrigin {
    InHouse,
    Oidc,
}

impl std::fmt::Display for TokenOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InHouse => write!(f, "in-house"),
            Self::Oidc => write!(f, "oidc"),
        }
    }
}

impl FromStr for TokenOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in-house" => Ok(Self::InHouse),
            "oidc" => Ok(Self::Oidc),
            other => Err(format!("unknown token origin: {other}")),
        }
    }
}

/// The identity behind an accepted token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    pub origin: TokenOrigin,
}

/// Check that the token declares an RSA PKCS#1 v1.5 signature.
///
/// # Errors
/// Returns `RejectedReason::UnsupportedMethod` with the declared algorithm otherwise.
pub fn check_signing_method(algorithm: &str) -> Result<Algorithm, RejectedReason> {
    match algorithm {
        "RS256" => Ok(Algorithm::RS256),
        "RS384" => Ok(Algorithm::RS384),
        "RS512" => Ok(Algorithm::RS512),
        other => Err(RejectedReason::UnsupportedMethod(other.to_string())),
    }
}

/// Where the verification key for a token comes from.
pub trait TokenVerificationStrategy: Send + Sync {
    /// The trust model this strategy implements.
    fn origin(&self) -> TokenOrigin;

    /// Run the origin-specific checks and return the key to verify the signature with.
    fn resolve_key(
        &self,
        raw_token: &str,
        claims: &TokenClaims,
    ) -> impl Future<Output = Result<PublicKey, RejectedReason>> + Send;
}

/// Personal access tokens issued by the gateway itself.
pub struct InHouseStrategy<S> {
    signing_key: Arc<InHouseSigningKey>,
    store: Arc<S>,
}

impl<S> InHouseStrategy<S> {
    pub const fn new(signing_key: Arc<InHouseSigningKey>, store: Arc<S>) -> Self {
        Self { signing_key, store }
    }
}

impl<S: PersistedTokenStore> TokenVerificationStrategy for InHouseStrategy<S> {
    fn origin(&self) -> TokenOrigin {
        TokenOrigin::InHouse
    }

    async fn resolve_key(
        &self,
        raw_token: &str,
        claims: &TokenClaims,
    ) -> Result<PublicKey, RejectedReason> {
        tracing::info!("Validating JWT token for in-house flow");
        check_signing_method(&claims.algorithm)?;
        let public_key = self.signing_key.public_key()?;

        let token_hash = TokenHash::of_token(raw_token);
        let subject = claims
            .subject
            .as_deref()
            .ok_or(RejectedReason::MissingSubject)?;

        match self.store.exists(subject, &token_hash).await {
            Ok(true) => Ok(public_key.clone()),
            Ok(false) => Err(RejectedReason::TokenNotRecognized),
            Err(e) => {
                tracing::warn!("Persisted token lookup failed: {e}");
                Err(RejectedReason::StoreUnavailable)
            }
        }
    }
}

/// Tokens issued by the configured OIDC provider.
pub struct OidcStrategy<F> {
    client_id: String,
    issuer: String,
    keys: Arc<OidcKeyCache<F>>,
}

impl<F> OidcStrategy<F> {
    pub fn new(
        client_id: impl Into<String>,
        issuer: impl Into<String>,
        keys: Arc<OidcKeyCache<F>>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            issuer: issuer.into(),
            keys,
        }
    }
}

impl<F: KeySetFetcher> TokenVerificationStrategy for OidcStrategy<F> {
    fn origin(&self) -> TokenOrigin {
        TokenOrigin::Oidc
    }

    async fn resolve_key(
        &self,
        _raw_token: &str,
        claims: &TokenClaims,
    ) -> Result<PublicKey, RejectedReason> {
        tracing::info!("Validating JWT token for OIDC flow");
        check_signing_method(&claims.algorithm)?;

        if !claims.audience_contains(&self.client_id) {
            return Err(RejectedReason::AudienceMismatch);
        }
        if claims.issuer.as_deref() != Some(self.issuer.as_str()) {
            return Err(RejectedReason::IssuerMismatch);
        }
        if claims.subject.is_none() {
            return Err(RejectedReason::MissingSubject);
        }

        let key_id = claims
            .key_id
            .as_deref()
            .ok_or(RejectedReason::MissingKeyId)?;
        self.keys
            .resolve(key_id)
            .await
            .map_err(|e| RejectedReason::UnknownSigningKey(e.key_id))
    }
}

/// Verify a token end to end with one strategy.
///
/// The header is checked before the payload is read, so a token declaring an
/// unsupported method is rejected whatever its payload holds.
///
/// # Errors
/// Returns the first `RejectedReason` the token runs into.
pub async fn authenticate_with<T: TokenVerificationStrategy>(
    strategy: &T,
    raw_token: &str,
) -> Result<Principal, RejectedReason> {
    let header = TokenHeader::parse(raw_token)?;
    let algorithm = check_signing_method(&header.algorithm)?;
    let claims = TokenClaims::with_header(header, raw_token)?;

    let key = strategy.resolve_key(raw_token, &claims).await?;
    verify_signature(raw_token, &key, algorithm)?;

    let subject = claims.subject.ok_or(RejectedReason::MissingSubject)?;
    Ok(Principal {
        subject,
        origin: strategy.origin(),
    })
}

/// Check the signature and the `exp`/`nbf` time claims.
///
/// Audience and issuer are strategy concerns and are not re-checked here.
fn verify_signature(
    raw_token: &str,
    key: &PublicKey,
    algorithm: Algorithm,
) -> Result<(), RejectedReason> {
    let mut validation = Validation::new(algorithm);
    validation.required_spec_claims.clear();
    validation.validate_aud = false;
    validation.validate_nbf = true;

    decode::<serde_json::Value>(raw_token, &key.decoding_key(), &validation)
        .map(|_| ())
        .map_err(map_jwt_error)
}

/// Maps jsonwebtoken errors to a rejection reason.
fn map_jwt_error(error: jsonwebtoken::errors::Error) -> RejectedReason {
    use jsonwebtoken::errors::ErrorKind;

    match error.kind() {
        ErrorKind::InvalidSignature => RejectedReason::InvalidSignature,
        ErrorKind::ExpiredSignature => RejectedReason::TokenExpired,
        ErrorKind::ImmatureSignature => RejectedReason::TokenNotYetValid,
        _ => RejectedReason::MalformedToken,
    }
}

/// Both verification strategies behind one handle.
pub struct TokenVerifier<S, F> {
    in_house: InHouseStrategy<S>,
    oidc: OidcStrategy<F>,
}

impl<S: PersistedTokenStore, F: KeySetFetcher> TokenVerifier<S, F> {
    pub const fn new(in_house: InHouseStrategy<S>, oidc: OidcStrategy<F>) -> Self {
        Self { in_house, oidc }
    }

    /// Resolve the key for an in-house token.
    ///
    /// # Errors
    /// See [`InHouseStrategy`].
    pub async fn verify_in_house(
        &self,
        raw_token: &str,
        claims: &TokenClaims,
    ) -> Result<PublicKey, RejectedReason> {
        self.in_house.resolve_key(raw_token, claims).await
    }

    /// Resolve the key for an OIDC token.
    ///
    /// # Errors
    /// See [`OidcStrategy`].
    pub async fn verify_oidc(
        &self,
        raw_token: &str,
        claims: &TokenClaims,
    ) -> Result<PublicKey, RejectedReason> {
        self.oidc.resolve_key(raw_token, claims).await
    }

    /// Verify a token end to end under the trust model the caller selected.
    ///
    /// # Errors
    /// Returns the reason the token was rejected.
    pub async fn authenticate(
        &self,
        origin: TokenOrigin,
        raw_token: &str,
    ) -> Result<Principal, RejectedReason> {
        let result = match origin {
            TokenOrigin::InHouse => authenticate_with(&self.in_house, raw_token).await,
            TokenOrigin::Oidc => authenticate_with(&self.oidc, raw_token).await,
        };

        match &result {
            Ok(principal) => {
                tracing::debug!("Accepted {origin} token for '{}'", principal.subject);
            }
            Err(reason) => {
                tracing::warn!("Rejected {origin} token: {}", reason.code());
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::auth::token_store::{InMemoryTokenStore, PersistedTokenRecord, StoreError};
    use crate::testing::{self, CountingFetcher};

    const CLIENT_ID: &str = "telemetry-gateway";
    const ISSUER: &str = "https://idp.example.com/realms/main";

    fn in_house(
        key: InHouseSigningKey,
        store: InMemoryTokenStore,
    ) -> InHouseStrategy<InMemoryTokenStore> {
        InHouseStrategy::new(Arc::new(key), Arc::new(store))
    }

    fn fixture_in_house(records: Vec<PersistedTokenRecord>) -> InHouseStrategy<InMemoryTokenStore> {
        in_house(
            InHouseSigningKey::from_pem(testing::FIXTURE_PRIVATE_KEY_PEM),
            InMemoryTokenStore::from_records(records),
        )
    }

    fn oidc(fetcher: Arc<CountingFetcher>) -> OidcStrategy<Arc<CountingFetcher>> {
        OidcStrategy::new(CLIENT_ID, ISSUER, Arc::new(OidcKeyCache::new(fetcher)))
    }

    fn oidc_claims() -> serde_json::Value {
        json!({
            "sub": "alice",
            "aud": CLIENT_ID,
            "iss": ISSUER,
            "exp": testing::in_one_hour(),
        })
    }

    struct FailingStore;

    impl PersistedTokenStore for FailingStore {
        async fn exists(&self, _: &str, _: &TokenHash) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    #[test]
    fn test_check_signing_method() {
        assert_eq!(check_signing_method("RS256"), Ok(Algorithm::RS256));
        assert_eq!(check_signing_method("RS384"), Ok(Algorithm::RS384));
        assert_eq!(check_signing_method("RS512"), Ok(Algorithm::RS512));
        for alg in ["none", "HS256", "PS256", "ES256", "rs256", ""] {
            assert_eq!(
                check_signing_method(alg),
                Err(RejectedReason::UnsupportedMethod(alg.to_string()))
            );
        }
    }

    #[test]
    fn test_token_origin_round_trip() {
        assert_eq!("in-house".parse(), Ok(TokenOrigin::InHouse));
        assert_eq!("oidc".parse(), Ok(TokenOrigin::Oidc));
        assert!("pat".parse::<TokenOrigin>().is_err());
        assert_eq!(TokenOrigin::InHouse.to_string(), "in-house");
    }

    #[tokio::test]
    async fn test_in_house_recognized_token_returns_key() {
        let token = testing::sign_token(&json!({ "sub": "alice" }), None);
        let strategy = fixture_in_house(vec![PersistedTokenRecord::for_token("alice", &token)]);
        let claims = TokenClaims::parse_unverified(&token).expect("claims");

        let key = strategy.resolve_key(&token, &claims).await;

        assert_eq!(key, Ok(testing::fixture_public_key()));
    }

    #[tokio::test]
    async fn test_in_house_unrecorded_token_rejected() {
        let token = testing::sign_token(&json!({ "sub": "alice" }), None);
        let other = testing::sign_token(&json!({ "sub": "alice", "jti": "2" }), None);
        let strategy = fixture_in_house(vec![PersistedTokenRecord::for_token("alice", &other)]);
        let claims = TokenClaims::parse_unverified(&token).expect("claims");

        assert_eq!(
            strategy.resolve_key(&token, &claims).await,
            Err(RejectedReason::TokenNotRecognized)
        );
    }

    #[tokio::test]
    async fn test_in_house_record_of_other_principal_rejected() {
        let token = testing::sign_token(&json!({ "sub": "alice" }), None);
        let strategy = fixture_in_house(vec![PersistedTokenRecord::for_token("bob", &token)]);
        let claims = TokenClaims::parse_unverified(&token).expect("claims");

        assert_eq!(
            strategy.resolve_key(&token, &claims).await,
            Err(RejectedReason::TokenNotRecognized)
        );
    }

    #[tokio::test]
    async fn test_in_house_missing_subject() {
        let token = testing::sign_token(&json!({ "scope": "ingest" }), None);
        let strategy = fixture_in_house(Vec::new());
        let claims = TokenClaims::parse_unverified(&token).expect("claims");

        assert_eq!(
            strategy.resolve_key(&token, &claims).await,
            Err(RejectedReason::MissingSubject)
        );
    }

    #[tokio::test]
    async fn test_in_house_ignores_key_id() {
        let token = testing::sign_token(&json!({ "sub": "alice" }), Some("unrelated-kid"));
        let strategy = fixture_in_house(vec![PersistedTokenRecord::for_token("alice", &token)]);

        let principal = authenticate_with(&strategy, &token).await;

        assert_eq!(principal.map(|p| p.subject), Ok("alice".to_string()));
    }

    #[tokio::test]
    async fn test_in_house_store_failure() {
        let token = testing::sign_token(&json!({ "sub": "alice" }), None);
        let strategy = InHouseStrategy::new(
            Arc::new(InHouseSigningKey::from_pem(testing::FIXTURE_PRIVATE_KEY_PEM)),
            Arc::new(FailingStore),
        );
        let claims = TokenClaims::parse_unverified(&token).expect("claims");

        assert_eq!(
            strategy.resolve_key(&token, &claims).await,
            Err(RejectedReason::StoreUnavailable)
        );
    }

    #[tokio::test]
    async fn test_in_house_fails_closed_without_key() {
        let token = testing::sign_token(&json!({ "sub": "alice" }), None);
        let strategy = in_house(
            InHouseSigningKey::from_pem(""),
            InMemoryTokenStore::from_records([PersistedTokenRecord::for_token("alice", &token)]),
        );
        let claims = TokenClaims::parse_unverified(&token).expect("claims");

        for _ in 0..3 {
            assert_eq!(
                strategy.resolve_key(&token, &claims).await,
                Err(RejectedReason::SigningKeyUnavailable)
            );
            assert_eq!(
                authenticate_with(&strategy, &token).await,
                Err(RejectedReason::SigningKeyUnavailable)
            );
        }
    }

    #[tokio::test]
    async fn test_oidc_audience_mismatch_skips_key_lookup() {
        let fetcher = Arc::new(CountingFetcher::new(Vec::new()));
        let strategy = oidc(Arc::clone(&fetcher));
        let mut payload = oidc_claims();
        payload["aud"] = json!("someone-else");
        let token = testing::sign_token(&payload, Some("k1"));
        let claims = TokenClaims::parse_unverified(&token).expect("claims");

        assert_eq!(
            strategy.resolve_key(&token, &claims).await,
            Err(RejectedReason::AudienceMismatch)
        );
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_oidc_issuer_mismatch_skips_key_lookup() {
        let fetcher = Arc::new(CountingFetcher::new(Vec::new()));
        let strategy = oidc(Arc::clone(&fetcher));
        let mut payload = oidc_claims();
        payload["iss"] = json!("https://evil.example.com");
        let token = testing::sign_token(&payload, Some("k1"));
        let claims = TokenClaims::parse_unverified(&token).expect("claims");

        assert_eq!(
            strategy.resolve_key(&token, &claims).await,
            Err(RejectedReason::IssuerMismatch)
        );
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_oidc_missing_subject_and_kid() {
        let fetcher = Arc::new(CountingFetcher::new(Vec::new()));
        let strategy = oidc(Arc::clone(&fetcher));

        let mut payload = oidc_claims();
        payload.as_object_mut().expect("object").remove("sub");
        let token = testing::sign_token(&payload, Some("k1"));
        let claims = TokenClaims::parse_unverified(&token).expect("claims");
        assert_eq!(
            strategy.resolve_key(&token, &claims).await,
            Err(RejectedReason::MissingSubject)
        );

        let token = testing::sign_token(&oidc_claims(), None);
        let claims = TokenClaims::parse_unverified(&token).expect("claims");
        assert_eq!(
            strategy.resolve_key(&token, &claims).await,
            Err(RejectedReason::MissingKeyId)
        );
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_oidc_unknown_kid() {
        let fetcher = Arc::new(CountingFetcher::new(vec![testing::fixture_signing_entry("k1")]));
        let strategy = oidc(Arc::clone(&fetcher));
        let token = testing::sign_token(&oidc_claims(), Some("k2"));
        let claims = TokenClaims::parse_unverified(&token).expect("claims");

        assert_eq!(
            strategy.resolve_key(&token, &claims).await,
            Err(RejectedReason::UnknownSigningKey("k2".to_string()))
        );
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_oidc_resolves_published_key() {
        let fetcher = Arc::new(CountingFetcher::new(vec![testing::fixture_signing_entry("k1")]));
        let strategy = oidc(Arc::clone(&fetcher));
        let token = testing::sign_token(&oidc_claims(), Some("k1"));

        let principal = authenticate_with(&strategy, &token).await;

        assert_eq!(
            principal,
            Ok(Principal {
                subject: "alice".to_string(),
                origin: TokenOrigin::Oidc,
            })
        );
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_none_algorithm_rejected_before_claims() {
        let header = testing::encode_segment(&json!({ "alg": "none", "typ": "JWT" }));
        let token = format!("{header}.not-json-at-all.");
        let strategy = fixture_in_house(Vec::new());

        assert_eq!(
            authenticate_with(&strategy, &token).await,
            Err(RejectedReason::UnsupportedMethod("none".to_string()))
        );
    }

    #[tokio::test]
    async fn test_strategy_checks_method_on_given_claims() {
        let fetcher = Arc::new(CountingFetcher::new(Vec::new()));
        let strategy = oidc(Arc::clone(&fetcher));
        let claims = TokenClaims {
            subject: Some("alice".to_string()),
            audience: vec![CLIENT_ID.to_string()],
            issuer: Some(ISSUER.to_string()),
            key_id: Some("k1".to_string()),
            algorithm: "HS256".to_string(),
        };

        assert_eq!(
            strategy.resolve_key("a.b.c", &claims).await,
            Err(RejectedReason::UnsupportedMethod("HS256".to_string()))
        );
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_tampered_signature_rejected() {
        let token = testing::sign_token(&json!({ "sub": "alice" }), None);
        let tampered = testing::tamper_signature(&token);
        let strategy = fixture_in_house(vec![PersistedTokenRecord::for_token("alice", &tampered)]);

        assert_eq!(
            authenticate_with(&strategy, &tampered).await,
            Err(RejectedReason::InvalidSignature)
        );
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let token = testing::sign_token(&json!({ "sub": "alice", "exp": 1_000_000 }), None);
        let strategy = fixture_in_house(vec![PersistedTokenRecord::for_token("alice", &token)]);

        assert_eq!(
            authenticate_with(&strategy, &token).await,
            Err(RejectedReason::TokenExpired)
        );
    }

    #[tokio::test]
    async fn test_not_yet_valid_token_rejected() {
        let token = testing::sign_token(
            &json!({ "sub": "alice", "nbf": testing::in_one_hour() }),
            None,
        );
        let strategy = fixture_in_house(vec![PersistedTokenRecord::for_token("alice", &token)]);

        assert_eq!(
            authenticate_with(&strategy, &token).await,
            Err(RejectedReason::TokenNotYetValid)
        );
    }

    #[tokio::test]
    async fn test_verifier_dispatches_by_origin() {
        let in_house_token = testing::sign_token(&json!({ "sub": "svc-ingest" }), None);
        let oidc_token = testing::sign_token(&oidc_claims(), Some("k1"));
        let fetcher = Arc::new(CountingFetcher::new(vec![testing::fixture_signing_entry("k1")]));
        let verifier = TokenVerifier::new(
            fixture_in_house(vec![PersistedTokenRecord::for_token(
                "svc-ingest",
                &in_house_token,
            )]),
            oidc(Arc::clone(&fetcher)),
        );

        assert_eq!(
            verifier
                .authenticate(TokenOrigin::InHouse, &in_house_token)
                .await
                .map(|p| p.origin),
            Ok(TokenOrigin::InHouse)
        );
        assert_eq!(
            verifier
                .authenticate(TokenOrigin::Oidc, &oidc_token)
                .await
                .map(|p| p.origin),
            Ok(TokenOrigin::Oidc)
        );
        // An OIDC token is not a recorded personal access token.
        assert_eq!(
            verifier.authenticate(TokenOrigin::InHouse, &oidc_token).await,
            Err(RejectedReason::TokenNotRecognized)
        );
        // A personal access token carries no provider audience.
        assert_eq!(
            verifier.authenticate(TokenOrigin::Oidc, &in_house_token).await,
            Err(RejectedReason::AudienceMismatch)
        );

        let claims = TokenClaims::parse_unverified(&oidc_token).expect("claims");
        assert!(verifier.verify_oidc(&oidc_token, &claims).await.is_ok());
        assert_eq!(
            verifier.verify_in_house(&oidc_token, &claims).await,
            Err(RejectedReason::TokenNotRecognized)
        );
    }
}
