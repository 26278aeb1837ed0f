#![cfg_attr(not(test), deny(clippy::unwrap_used))]
use std::sync::Arc;

use gateway::auth::{
    HttpKeySetFetcher, InHouseSigningKey, InHouseStrategy, InMemoryTokenStore, OidcKeyCache,
    OidcStrategy, TokenOrigin, TokenVerifier,
};
use gateway::config::GatewayConfig;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Logs go to stderr so stdout carries only verdicts.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gateway=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        "Loaded configuration: auth_mode={}, oidc_url={}, jwks_url={}, pat_records={}",
        config.auth_mode,
        config.oidc_url,
        config.oidc_jwks_url,
        config.pat_records.len()
    );

    let signing_key = Arc::new(InHouseSigningKey::from_pem(&config.in_house_private_key));
    let store = Arc::new(InMemoryTokenStore::from_records(config.pat_records.clone()));

    let fetcher = match HttpKeySetFetcher::new(config.oidc_jwks_url.clone()) {
        Ok(fetcher) => fetcher,
        Err(e) => {
            tracing::error!("Failed to build key set client: {e}");
            std::process::exit(1);
        }
    };
    let keys = Arc::new(OidcKeyCache::new(fetcher));

    let _refresh_task = if config.auth_mode == TokenOrigin::Oidc {
        // A failed warm-up is not fatal; the first unknown kid refreshes again.
        if let Err(e) = keys.refresh().await {
            tracing::warn!("Initial key set fetch failed: {e}");
        }
        (!config.refresh_interval.is_zero())
            .then(|| OidcKeyCache::spawn_refresh_task(&keys, config.refresh_interval))
    } else {
        None
    };

    let verifier = TokenVerifier::new(
        InHouseStrategy::new(signing_key, store),
        OidcStrategy::new(config.oidc_client_id.clone(), config.oidc_url.clone(), keys),
    );

    if let Err(e) = serve_stdin(&verifier, config.auth_mode).await {
        tracing::error!("I/O error: {e}");
        std::process::exit(1);
    }
}

/// Verify one token per input line and print the verdict.
async fn serve_stdin<S, F>(
    verifier: &TokenVerifier<S, F>,
    origin: TokenOrigin,
) -> std::io::Result<()>
where
    S: gateway::auth::PersistedTokenStore,
    F: gateway::auth::KeySetFetcher,
{
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let token = line.trim();
        if token.is_empty() {
            continue;
        }
        let verdict = match verifier.authenticate(origin, token).await {
            Ok(principal) => format!("accepted {}\n", principal.subject),
            Err(reason) => format!("rejected {}\n", reason.code()),
        };
        stdout.write_all(verdict.as_bytes()).await?;
        stdout.flush().await?;
    }

    Ok(())
}
