//! End-to-end tests through `TokenVerifier`.
//!
//! OIDC suites run against a local key-set endpoint; in-house suites run
//! against an in-memory token store.

#![cfg(test)]

mod helpers;

mod test_in_house;
mod test_oidc_jwks;
