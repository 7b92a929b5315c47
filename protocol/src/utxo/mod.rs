//! # Spendable Outputs
//!
//! The records the service persists and the machinery that hands them out
//! to concurrent operations without double-spending.

pub mod lease;
pub mod store;
pub mod types;

pub use lease::{FloorAlert, PoolReplenisher, Reservation, Shortfall, UtxoLeaseManager};
pub use store::{token_owner_key, IssuerRecordStore, PersistedUtxoStore};
pub use types::{
    FundingUtxo, IssuerRecord, IssuerUpdate, LeasedUtxo, Lineage, TokenUtxo, UtxoPatch,
};
