#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

// Life of a token:
// 1. Caller picks the trust model (in-house personal access token or OIDC)
// 2. Header is read; anything but RS256/RS384/RS512 is rejected
// 3. Strategy checks claims and resolves the verification key:
//     - In-house: configured key, token must be on record for its subject
//     - OIDC: provider key by `kid`, refreshed on miss
// 4. Signature and time claims are checked
//
// System components:
//  - Persisted token store
//  - Provider key cache with background refresh
//  - Verifier

pub mod auth;
pub mod config;
mod e2e_tests;
#[cfg(test)]
mod testing;
