//! Common helpers for end-to-end tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing::get};
use serde_json::{Value, json};

use crate::testing;

pub const CLIENT_ID: &str = "telemetry-gateway";
pub const ISSUER: &str = "https://idp.example.com/realms/main";

pub fn oidc_claims(subject: &str) -> Value {
    json!({
        "sub": subject,
        "aud": ["account", CLIENT_ID],
        "iss": ISSUER,
        "exp": testing::in_one_hour(),
    })
}

/// A JWKS document publishing the fixture key under each of `key_ids`.
pub fn jwks(key_ids: &[&str]) -> Value {
    let keys: Vec<Value> = key_ids
        .iter()
        .map(|kid| {
            json!({
                "kty": "RSA",
                "kid": kid,
                "alg": "RS256",
                "use": "sig",
                "n": testing::FIXTURE_MODULUS_B64URL,
                "e": "AQAB",
            })
        })
        .collect();
    json!({ "keys": keys })
}

/// What the local provider answers with.
#[derive(Clone)]
pub enum Published {
    Document(Value),
    Failure(StatusCode),
}

/// A local key-set endpoint whose document can be swapped between requests.
#[derive(Clone)]
pub struct JwksServer {
    pub addr: SocketAddr,
    published: Arc<RwLock<Published>>,
    requests: Arc<AtomicUsize>,
}

impl JwksServer {
    pub const PATH: &'static str = "/protocol/openid-connect/certs";

    pub async fn start(document: Value) -> Self {
        let published = Arc::new(RwLock::new(Published::Document(document)));
        let requests = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(Self::PATH, get(serve_published))
            .with_state((Arc::clone(&published), Arc::clone(&requests)));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app.into_make_service()).await;
        });

        Self {
            addr,
            published,
            requests,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}{}", self.addr, Self::PATH)
    }

    pub fn publish(&self, published: Published) {
        *self.published.write().unwrap() = published;
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

async fn serve_published(
    State((published, requests)): State<(Arc<RwLock<Published>>, Arc<AtomicUsize>)>,
) -> Response {
    requests.fetch_add(1, Ordering::SeqCst);
    let current = published.read().unwrap().clone();
    match current {
        Published::Document(document) => Json(document).into_response(),
        Published::Failure(status) => status.into_response(),
    }
}
