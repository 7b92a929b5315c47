// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # SFT Protocol — Core Library
//!
//! Issuance and transfer of fungible tokens that live entirely inside the
//! locking scripts of a UTXO ledger. Every token output carries its own
//! state (name, symbol, decimals, owner, amount, lineage id) in a fixed
//! trailer after the verifier code, and every spend must convince that
//! verifier, with help from oracle attestations, that no tokens were
//! conjured along the way.
//!
//! ## Architecture
//!
//! Leaves first:
//!
//! - **config** — protocol constants and the runtime `ServiceConfig`.
//! - **error** — `FtError`, the one error type callers match on.
//! - **crypto** — secp256k1 keys, HASH160, base58check addresses.
//! - **ledger** — transactions, scripts, sighash, fees, the ledger client.
//! - **token** — the metadata codec and verifier templates.
//! - **oracle** — attestation requests to the oracle roster.
//! - **utxo** — leasing spendable outputs to concurrent operations.
//! - **storage** — the sled-backed durable store.
//! - **ft** — transaction assembly and the `genesis`/`issue`/`transfer` service.
//! - **nullables** — in-memory collaborators for deterministic tests.
//!
//! ## Design Philosophy
//!
//! 1. Token conservation is checked before anything is signed.
//! 2. Attestations are gathered before any funding is reserved or anything
//!    is broadcast.
//! 3. Every reservation is settled on every exit path, cancellation included.
//! 4. If it touches money, it has tests. Plural.

pub mod config;
pub mod crypto;
pub mod error;
pub mod ft;
pub mod ledger;
pub mod nullables;
pub mod oracle;
pub mod storage;
pub mod token;
pub mod utxo;

pub use error::{FtError, FtResult};
pub use ft::FungibleTokenService;
