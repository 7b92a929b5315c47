//! # Ledger Plumbing
//!
//! Everything needed to talk to a UTXO ledger without knowing anything
//! about tokens:
//!
//! - **types** — transaction ids and outpoints.
//! - **transaction** — the wire format.
//! - **script** — pushes, script numbers, P2PKH.
//! - **sighash** — BIP143/FORKID preimages and the shape commitment.
//! - **fee** — fee rate, per-token surcharge, dust.
//! - **draft** — draft → sealed → finished assembly.
//! - **client** / **http** — the `LedgerClient` seam and its HTTP implementation.

pub mod client;
pub mod draft;
pub mod fee;
pub mod http;
pub mod script;
pub mod sighash;
pub mod transaction;
pub mod types;

pub use client::LedgerClient;
pub use draft::{SealedTransaction, TxDraft};
pub use fee::{dust_threshold, FeePolicy, FeeRate};
pub use http::HttpLedgerClient;
pub use sighash::ShapeCommitment;
pub use transaction::{Transaction, TxInput, TxOutput};
pub use types::{OutPoint, TxId};
