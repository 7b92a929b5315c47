//! Nullable infrastructure for deterministic testing.
//!
//! Every external collaborator of the service (store, ledger, oracles) sits
//! behind a trait. This module provides test-friendly implementations that:
//! - keep everything in memory
//! - can be steered programmatically (queued rejections, failing oracles)
//! - never touch the filesystem or network
//!
//! Usage: hand them to [`FungibleTokenService::with_collaborators`](crate::ft::FungibleTokenService::with_collaborators)
//! in place of the sled store, the HTTP ledger and the HTTP oracles, or let
//! [`Harness`] do the wiring.

pub mod harness;
pub mod ledger;
pub mod oracle;
pub mod store;

pub use harness::{service_config, Harness};
pub use ledger::NullLedger;
pub use oracle::{NullOracle, OracleMode};
pub use store::MemoryStore;

use crate::token::VerifierTemplates;

/// Small, distinct stand-ins for the verifier templates.
///
/// The service never interprets template bytes, so any non-empty code works
/// for exercising transaction assembly.
pub fn templates() -> VerifierTemplates {
    VerifierTemplates::new(
        b"genesis-verifier".to_vec(),
        b"token-verifier".to_vec(),
        [
            b"route-check-3-3".to_vec(),
            b"route-check-6-6".to_vec(),
            b"route-check-10-10".to_vec(),
            b"route-check-3-100".to_vec(),
            b"route-check-20-3".to_vec(),
        ],
    )
}
