//! # Fungible Token Operations
//!
//! Where the protocol's correctness lives.
//!
//! - **proof** — unlock argument lists for genesis, token and route-check
//!   contracts.
//! - **builder** — the four transaction shapes, as pure functions of
//!   reserved inputs and attestations.
//! - **service** — `genesis` / `issue` / `transfer`: input validation,
//!   attestation, leasing, broadcast and persistence around the builder.

pub mod builder;
pub mod proof;
pub mod service;

pub use builder::{
    BuiltTransaction, IssueTransaction, Payee, RouteCheckTransaction, TransactionBuilder,
    TransferTransaction,
};
pub use service::{
    Collaborators, FungibleTokenService, GenesisReceipt, IssueReceipt, Receiver, TransferReceipt,
};
