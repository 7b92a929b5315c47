//! # FtDb — Persistent Storage Engine
//!
//! The durable half of the service, built on sled's embedded key-value
//! store. Leased utxos and issuer records survive restarts here; everything
//! else is rebuilt from them.
//!
//! ## Tree Layout
//!
//! | Tree      | Key                                         | Value                  |
//! |-----------|---------------------------------------------|------------------------|
//! | `utxos`   | `owner` ‖ `0x00` ‖ `txid` (32B) ‖ `index` (4B BE) | `bincode(U)`     |
//! | `issuers` | `genesis txid` (32B)                        | `bincode(IssuerRecord)`|
//!
//! Owner keys are printable strings and never contain `0x00`, so a prefix
//! scan over `owner ‖ 0x00` returns exactly one owner's utxos, in outpoint
//! order.
//!
//! Funding utxos and token utxos share the `utxos` tree; their owner keys
//! never collide (addresses vs. `ft:`-prefixed keys).

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Batch, Db, Tree};
use std::path::Path;
use tracing::debug;

use crate::error::{FtError, FtResult};
use crate::ledger::{OutPoint, TxId};
use crate::utxo::{
    IssuerRecord, IssuerRecordStore, IssuerUpdate, LeasedUtxo, PersistedUtxoStore, UtxoPatch,
};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("key not found: {0}")]
    NotFound(String),
}

pub type DbResult<T> = Result<T, DbError>;

impl From<DbError> for FtError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(key) => FtError::UnknownGenesis(key),
            other => FtError::Persistence(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

fn owner_prefix(owner: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(owner.len() + 1);
    key.extend_from_slice(owner.as_bytes());
    key.push(0);
    key
}

fn utxo_key(owner: &str, outpoint: &OutPoint) -> Vec<u8> {
    let mut key = owner_prefix(owner);
    key.extend_from_slice(outpoint.txid.as_bytes());
    key.extend_from_slice(&outpoint.index.to_be_bytes());
    key
}

fn encode<T: Serialize>(value: &T) -> DbResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| DbError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    bincode::deserialize(bytes).map_err(|e| DbError::Serialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// FtDb
// ---------------------------------------------------------------------------

/// Persistent store for leased utxos and issuer records.
///
/// # Thread Safety
///
/// sled trees support concurrent reads and serialized writes; `FtDb` is
/// cheap to clone and can be shared behind an `Arc` without extra locking.
#[derive(Debug, Clone)]
pub struct FtDb {
    db: Db,
    utxos: Tree,
    issuers: Tree,
}

impl FtDb {
    /// Open or create a database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A database that disappears when dropped. For tests.
    pub fn open_temporary() -> DbResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let utxos = db.open_tree("utxos")?;
        let issuers = db.open_tree("issuers")?;
        Ok(Self { db, utxos, issuers })
    }

    /// Flush dirty pages to disk.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }

    pub fn utxo_count(&self) -> usize {
        self.utxos.len()
    }

    pub fn issuer_count(&self) -> usize {
        self.issuers.len()
    }

    /// Every issuer record, in genesis id order.
    pub fn issuers(&self) -> DbResult<Vec<IssuerRecord>> {
        self.issuers
            .iter()
            .values()
            .map(|v| decode(&v?))
            .collect()
    }
}

impl<U> PersistedUtxoStore<U> for FtDb
where
    U: LeasedUtxo + Serialize + DeserializeOwned,
{
    fn list(&self, owner: &str) -> FtResult<Vec<U>> {
        let mut out = Vec::new();
        for entry in self.utxos.scan_prefix(owner_prefix(owner)) {
            let (_, value) = entry.map_err(DbError::from)?;
            out.push(decode(&value)?);
        }
        Ok(out)
    }

    fn insert(&self, owner: &str, utxos: &[U]) -> FtResult<()> {
        let mut batch = Batch::default();
        for utxo in utxos {
            batch.insert(utxo_key(owner, &utxo.outpoint()), encode(utxo)?);
        }
        self.utxos.apply_batch(batch).map_err(DbError::from)?;
        debug!(owner, count = utxos.len(), "utxos persisted");
        Ok(())
    }

    fn remove(&self, owner: &str, outpoint: &OutPoint) -> FtResult<()> {
        self.utxos.remove(utxo_key(owner, outpoint)).map_err(DbError::from)?;
        Ok(())
    }

    fn update(&self, owner: &str, outpoint: &OutPoint, patch: &UtxoPatch) -> FtResult<()> {
        let key = utxo_key(owner, outpoint);
        let current = self
            .utxos
            .get(&key)
            .map_err(DbError::from)?
            .ok_or_else(|| FtError::Persistence(format!("utxo {} not stored for {}", outpoint, owner)))?;
        let mut utxo: U = decode(&current)?;
        patch.apply(&mut utxo);
        self.utxos.insert(key, encode(&utxo)?).map_err(DbError::from)?;
        Ok(())
    }
}

impl IssuerRecordStore for FtDb {
    fn get(&self, genesis_id: &TxId) -> FtResult<Option<IssuerRecord>> {
        match self.issuers.get(genesis_id.as_bytes()).map_err(DbError::from)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn insert(&self, record: &IssuerRecord) -> FtResult<()> {
        self.issuers
            .insert(record.genesis_id.as_bytes(), encode(record)?)
            .map_err(DbError::from)?;
        Ok(())
    }

    fn update(&self, genesis_id: &TxId, update: IssuerUpdate) -> FtResult<IssuerRecord> {
        let mut record = IssuerRecordStore::get(self, genesis_id)?
            .ok_or_else(|| DbError::NotFound(genesis_id.to_string()))?;
        update.apply(&mut record);
        IssuerRecordStore::insert(self, &record)?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenMetadata;
    use crate::utxo::{FundingUtxo, Lineage, TokenUtxo};
    use chrono::Utc;

    fn funding(n: u8, index: u32) -> FundingUtxo {
        FundingUtxo::new(OutPoint::new(TxId::from_bytes([n; 32]), index), 1000 + n as u64)
    }

    fn lineage() -> Lineage {
        Lineage {
            raw_tx: vec![1, 2, 3],
            prev_outpoint: OutPoint::new(TxId::from_bytes([9; 32]), 1),
            prev_raw_tx: vec![4, 5],
        }
    }

    fn record() -> IssuerRecord {
        IssuerRecord {
            genesis_id: TxId::from_bytes([5; 32]),
            name: "Coin".into(),
            symbol: "COIN".into(),
            decimals: 2,
            genesis_outpoint: OutPoint::new(TxId::from_bytes([5; 32]), 0),
            genesis_value: 300,
            genesis_script: vec![0x51],
            lineage: lineage(),
            issued: 0,
            closed: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_utxos_are_partitioned_by_owner() {
        let db = FtDb::open_temporary().unwrap();
        PersistedUtxoStore::insert(&db, "alice", &[funding(1, 0), funding(2, 0)]).unwrap();
        PersistedUtxoStore::insert(&db, "alice2", &[funding(3, 0)]).unwrap();
        let alice: Vec<FundingUtxo> = PersistedUtxoStore::list(&db, "alice").unwrap();
        let alice2: Vec<FundingUtxo> = PersistedUtxoStore::list(&db, "alice2").unwrap();
        assert_eq!(alice.len(), 2);
        assert_eq!(alice2.len(), 1);
        assert_eq!(db.utxo_count(), 3);
    }

    #[test]
    fn test_remove_and_update() {
        let db = FtDb::open_temporary().unwrap();
        let a = funding(1, 0);
        let b = funding(1, 1);
        PersistedUtxoStore::insert(&db, "o", &[a.clone(), b.clone()]).unwrap();
        PersistedUtxoStore::<FundingUtxo>::remove(&db, "o", &a.outpoint).unwrap();
        PersistedUtxoStore::<FundingUtxo>::update(
            &db,
            "o",
            &b.outpoint,
            &UtxoPatch { retry_depth: Some(3) },
        )
        .unwrap();
        let left: Vec<FundingUtxo> = PersistedUtxoStore::list(&db, "o").unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].retry_depth, 3);
        // Removing twice is fine.
        PersistedUtxoStore::<FundingUtxo>::remove(&db, "o", &a.outpoint).unwrap();
    }

    #[test]
    fn test_update_missing_utxo_fails() {
        let db = FtDb::open_temporary().unwrap();
        let err = PersistedUtxoStore::<FundingUtxo>::update(
            &db,
            "o",
            &funding(1, 0).outpoint,
            &UtxoPatch::default(),
        )
        .unwrap_err();
        assert!(matches!(err, FtError::Persistence(_)));
    }

    #[test]
    fn token_utxo_survives_storage() {
        let db = FtDb::open_temporary().unwrap();
        let token = TokenUtxo {
            outpoint: OutPoint::new(TxId::from_bytes([8; 32]), 1),
            value: 354,
            locking_script: vec![0xab; 40],
            metadata: TokenMetadata::genesis("Coin", "COIN", 2).mint([1; 20], [2; 20], 1000),
            lineage: lineage(),
            retry_depth: 0,
        };
        PersistedUtxoStore::insert(&db, "ft:x:y", &[token.clone()]).unwrap();
        let back: Vec<TokenUtxo> = PersistedUtxoStore::list(&db, "ft:x:y").unwrap();
        assert_eq!(back, vec![token]);
    }

    #[test]
    fn test_issuer_record_lifecycle() {
        let db = FtDb::open_temporary().unwrap();
        let rec = record();
        assert!(IssuerRecordStore::get(&db, &rec.genesis_id).unwrap().is_none());
        IssuerRecordStore::insert(&db, &rec).unwrap();

        let new_outpoint = OutPoint::new(TxId::from_bytes([6; 32]), 0);
        let updated = IssuerRecordStore::update(
            &db,
            &rec.genesis_id,
            IssuerUpdate {
                genesis: Some((new_outpoint, 300, vec![0x52], lineage())),
                issued: 1000,
            },
        )
        .unwrap();
        assert_eq!(updated.genesis_outpoint, new_outpoint);
        let stored = IssuerRecordStore::get(&db, &rec.genesis_id).unwrap().unwrap();
        assert_eq!(stored.issued, 1000);
        assert!(!stored.closed);

        let closed = IssuerRecordStore::update(
            &db,
            &rec.genesis_id,
            IssuerUpdate { genesis: None, issued: 1500 },
        )
        .unwrap();
        assert!(closed.closed);
        assert_eq!(db.issuers().unwrap().len(), 1);
    }

    #[test]
    fn test_update_unknown_issuer() {
        let db = FtDb::open_temporary().unwrap();
        let err = IssuerRecordStore::update(
            &db,
            &TxId::from_bytes([1; 32]),
            IssuerUpdate { genesis: None, issued: 0 },
        )
        .unwrap_err();
        assert!(matches!(err, FtError::UnknownGenesis(_)));
    }

    #[test]
    fn reopen_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = FtDb::open(dir.path()).unwrap();
            PersistedUtxoStore::insert(&db, "o", &[funding(1, 0)]).unwrap();
            IssuerRecordStore::insert(&db, &record()).unwrap();
            db.flush().unwrap();
        }
        let db = FtDb::open(dir.path()).unwrap();
        let utxos: Vec<FundingUtxo> = PersistedUtxoStore::list(&db, "o").unwrap();
        assert_eq!(utxos.len(), 1);
        assert_eq!(db.issuer_count(), 1);
    }
}
