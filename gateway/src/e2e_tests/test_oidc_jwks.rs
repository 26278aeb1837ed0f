//! OIDC verification against a local key-set endpoint.
//!
//! The endpoint binds to 127.0.0.1:0 and serves a document the test can swap,
//! so key rotation and provider outages are reproduced without a real provider.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;

use super::helpers::{self, CLIENT_ID, ISSUER, JwksServer, Published};
use crate::auth::fetcher::MAX_KEY_SET_BYTES;
use crate::auth::{
    FetchError, HttpKeySetFetcher, InHouseSigningKey, InHouseStrategy, InMemoryTokenStore,
    KeySetFetcher, OidcKeyCache, OidcStrategy, Principal, RejectedReason, TokenOrigin,
    TokenVerifier,
};
use crate::testing;

type Verifier = TokenVerifier<InMemoryTokenStore, HttpKeySetFetcher>;

fn verifier(keys: &Arc<OidcKeyCache<HttpKeySetFetcher>>) -> Verifier {
    TokenVerifier::new(
        InHouseStrategy::new(
            Arc::new(InHouseSigningKey::from_pem("")),
            Arc::new(InMemoryTokenStore::new()),
        ),
        OidcStrategy::new(CLIENT_ID, ISSUER, Arc::clone(keys)),
    )
}

fn cache_for(server: &JwksServer) -> Arc<OidcKeyCache<HttpKeySetFetcher>> {
    let fetcher = HttpKeySetFetcher::new(server.url()).expect("client builds");
    Arc::new(OidcKeyCache::new(fetcher))
}

#[tokio::test]
async fn fetcher_reads_published_keys() {
    let server = JwksServer::start(helpers::jwks(&["k1", "k2"])).await;
    let fetcher = HttpKeySetFetcher::new(server.url()).expect("client builds");

    let entries = fetcher.fetch_current_keys().await.expect("fetch succeeds");

    let kids: Vec<_> = entries.iter().map(|e| e.key_id.as_str()).collect();
    assert_eq!(kids, ["k1", "k2"]);
    assert_eq!(server.requests(), 1);
}

#[tokio::test]
async fn fetcher_reports_error_status() {
    let server = JwksServer::start(helpers::jwks(&[])).await;
    server.publish(Published::Failure(StatusCode::SERVICE_UNAVAILABLE));
    let fetcher = HttpKeySetFetcher::new(server.url()).expect("client builds");

    assert_eq!(
        fetcher.fetch_current_keys().await,
        Err(FetchError::Status(503))
    );
}

#[tokio::test]
async fn fetcher_rejects_non_jwks_body() {
    let server = JwksServer::start(serde_json::json!({ "issuer": ISSUER })).await;
    let fetcher = HttpKeySetFetcher::new(server.url()).expect("client builds");

    assert!(matches!(
        fetcher.fetch_current_keys().await,
        Err(FetchError::Body(_))
    ));
}

#[tokio::test]
async fn fetcher_rejects_oversized_document() {
    let kids: Vec<String> = (0..1000).map(|i| format!("k{i}")).collect();
    let kid_refs: Vec<&str> = kids.iter().map(String::as_str).collect();
    let document = helpers::jwks(&kid_refs);
    assert!(document.to_string().len() > MAX_KEY_SET_BYTES);

    let server = JwksServer::start(document).await;
    let keys = cache_for(&server);
    assert!(keys.refresh().await.is_err());

    let fetcher = HttpKeySetFetcher::new(server.url()).expect("client builds");
    assert_eq!(
        fetcher.fetch_current_keys().await,
        Err(FetchError::BodyTooLarge(MAX_KEY_SET_BYTES))
    );
    assert!(keys.snapshot().is_empty());
}

#[tokio::test]
async fn accepts_token_signed_by_published_key() {
    let server = JwksServer::start(helpers::jwks(&["k1"])).await;
    let keys = cache_for(&server);
    let verifier = verifier(&keys);
    let token = testing::sign_token(&helpers::oidc_claims("alice"), Some("k1"));

    let principal = verifier.authenticate(TokenOrigin::Oidc, &token).await;

    assert_eq!(
        principal,
        Ok(Principal {
            subject: "alice".to_string(),
            origin: TokenOrigin::Oidc,
        })
    );
    // First use fetched the set; the second is served from the snapshot.
    assert!(verifier.authenticate(TokenOrigin::Oidc, &token).await.is_ok());
    assert_eq!(server.requests(), 1);
}

#[tokio::test]
async fn unknown_kid_rejected_after_bounded_refreshes() {
    let server = JwksServer::start(helpers::jwks(&["k1"])).await;
    let keys = cache_for(&server);
    let verifier = verifier(&keys);
    let token = testing::sign_token(&helpers::oidc_claims("alice"), Some("retired"));

    assert_eq!(
        verifier.authenticate(TokenOrigin::Oidc, &token).await,
        Err(RejectedReason::UnknownSigningKey("retired".to_string()))
    );
    assert_eq!(server.requests(), 3);
}

#[tokio::test]
async fn rotated_key_picked_up_on_miss() {
    let server = JwksServer::start(helpers::jwks(&["k1"])).await;
    let keys = cache_for(&server);
    keys.refresh().await.expect("warm-up");
    let verifier = verifier(&keys);

    server.publish(Published::Document(helpers::jwks(&["k2"])));
    let token = testing::sign_token(&helpers::oidc_claims("bob"), Some("k2"));

    assert_eq!(
        verifier
            .authenticate(TokenOrigin::Oidc, &token)
            .await
            .map(|p| p.subject),
        Ok("bob".to_string())
    );
    assert_eq!(keys.snapshot().key_ids().collect::<Vec<_>>(), ["k2"]);
}

#[tokio::test]
async fn provider_outage_keeps_last_snapshot() {
    let server = JwksServer::start(helpers::jwks(&["k1"])).await;
    let keys = cache_for(&server);
    keys.refresh().await.expect("warm-up");

    server.publish(Published::Failure(StatusCode::BAD_GATEWAY));
    assert_eq!(keys.refresh().await, Err(FetchError::Status(502)));

    let verifier = verifier(&keys);
    let token = testing::sign_token(&helpers::oidc_claims("alice"), Some("k1"));
    assert!(verifier.authenticate(TokenOrigin::Oidc, &token).await.is_ok());
}

#[tokio::test]
async fn invalid_published_key_aborts_refresh() {
    let server = JwksServer::start(helpers::jwks(&["k1"])).await;
    let keys = cache_for(&server);
    keys.refresh().await.expect("warm-up");

    let mut broken = helpers::jwks(&["k1", "k2"]);
    broken["keys"][1]["n"] = serde_json::json!("");
    server.publish(Published::Document(broken));

    assert!(matches!(
        keys.refresh().await,
        Err(FetchError::InvalidKey { key_id, .. }) if key_id == "k2"
    ));
    assert_eq!(keys.snapshot().key_ids().collect::<Vec<_>>(), ["k1"]);
}

#[tokio::test]
async fn background_refresh_follows_rotation() {
    let server = JwksServer::start(helpers::jwks(&["k1"])).await;
    let keys = cache_for(&server);
    keys.refresh().await.expect("warm-up");
    let task = OidcKeyCache::spawn_refresh_task(&keys, Duration::from_millis(1000));

    server.publish(Published::Document(helpers::jwks(&["k2"])));

    let mut rotated = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if keys.lookup("k2").is_some() {
            rotated = true;
            break;
        }
    }
    assert!(rotated, "refresh task never installed the rotated key");
    assert!(keys.lookup("k1").is_none());

    task.abort();
}

#[tokio::test]
async fn claim_checks_run_before_key_fetch() {
    let server = JwksServer::start(helpers::jwks(&["k1"])).await;
    let keys = cache_for(&server);
    let verifier = verifier(&keys);

    let mut wrong_issuer = helpers::oidc_claims("alice");
    wrong_issuer["iss"] = serde_json::json!("https://other.example.com");
    let token = testing::sign_token(&wrong_issuer, Some("k1"));

    assert_eq!(
        verifier.authenticate(TokenOrigin::Oidc, &token).await,
        Err(RejectedReason::IssuerMismatch)
    );
    assert_eq!(server.requests(), 0);
}
