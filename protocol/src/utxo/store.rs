//! Persistence seams.
//!
//! The lease manager and the service only ever talk to these traits. The
//! sled-backed [`FtDb`](crate::storage::FtDb) implements them for production,
//! [`MemoryStore`](crate::nullables::MemoryStore) for tests.

use crate::error::FtResult;
use crate::ledger::{OutPoint, TxId};

use super::types::{IssuerRecord, IssuerUpdate, UtxoPatch};

/// Utxos grouped by owner key.
///
/// Funding utxos are keyed by the service address, token utxos by
/// [`token_owner_key`].
pub trait PersistedUtxoStore<U>: Send + Sync {
    fn list(&self, owner: &str) -> FtResult<Vec<U>>;

    fn insert(&self, owner: &str, utxos: &[U]) -> FtResult<()>;

    /// Removing an absent utxo is not an error.
    fn remove(&self, owner: &str, outpoint: &OutPoint) -> FtResult<()>;

    fn update(&self, owner: &str, outpoint: &OutPoint, patch: &UtxoPatch) -> FtResult<()>;
}

pub trait IssuerRecordStore: Send + Sync {
    fn get(&self, genesis_id: &TxId) -> FtResult<Option<IssuerRecord>>;

    fn insert(&self, record: &IssuerRecord) -> FtResult<()>;

    /// Fails with `UnknownGenesis` when no record exists.
    fn update(&self, genesis_id: &TxId, update: IssuerUpdate) -> FtResult<IssuerRecord>;
}

/// Owner key for the token utxos of one address under one genesis.
pub fn token_owner_key(genesis_id: &TxId, address: &str) -> String {
    format!("ft:{}:{}", genesis_id, address)
}
