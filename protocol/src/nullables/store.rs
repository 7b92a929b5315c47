//! Nullable store — both persistence traits over in-memory maps.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::error::{FtError, FtResult};
use crate::ledger::{OutPoint, TxId};
use crate::utxo::{
    IssuerRecord, IssuerRecordStore, IssuerUpdate, LeasedUtxo, PersistedUtxoStore, UtxoPatch,
};

/// In-memory stand-in for [`FtDb`](crate::storage::FtDb).
///
/// Utxos are held bincode-encoded so one store can serve every utxo kind,
/// the same way the sled store does. Listing returns outpoint order.
#[derive(Default)]
pub struct MemoryStore {
    utxos: Mutex<HashMap<String, BTreeMap<OutPoint, Vec<u8>>>>,
    issuers: Mutex<HashMap<TxId, IssuerRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of utxos stored under `owner`.
    pub fn count(&self, owner: &str) -> usize {
        self.utxos.lock().get(owner).map_or(0, BTreeMap::len)
    }

    /// Every owner key with at least one utxo.
    pub fn owners(&self) -> Vec<String> {
        let utxos = self.utxos.lock();
        let mut owners: Vec<String> =
            utxos.iter().filter(|(_, m)| !m.is_empty()).map(|(k, _)| k.clone()).collect();
        owners.sort();
        owners
    }

    /// Clear all state.
    pub fn reset(&self) {
        self.utxos.lock().clear();
        self.issuers.lock().clear();
    }
}

fn encode<T: Serialize>(value: &T) -> FtResult<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> FtResult<T> {
    Ok(bincode::deserialize(bytes)?)
}

impl<U> PersistedUtxoStore<U> for MemoryStore
where
    U: LeasedUtxo + Serialize + DeserializeOwned,
{
    fn list(&self, owner: &str) -> FtResult<Vec<U>> {
        let utxos = self.utxos.lock();
        match utxos.get(owner) {
            Some(map) => map.values().map(|v| decode(v)).collect(),
            None => Ok(Vec::new()),
        }
    }

    fn insert(&self, owner: &str, utxos: &[U]) -> FtResult<()> {
        let encoded = utxos
            .iter()
            .map(|u| Ok((u.outpoint(), encode(u)?)))
            .collect::<FtResult<Vec<_>>>()?;
        self.utxos.lock().entry(owner.to_string()).or_default().extend(encoded);
        Ok(())
    }

    fn remove(&self, owner: &str, outpoint: &OutPoint) -> FtResult<()> {
        if let Some(map) = self.utxos.lock().get_mut(owner) {
            map.remove(outpoint);
        }
        Ok(())
    }

    fn update(&self, owner: &str, outpoint: &OutPoint, patch: &UtxoPatch) -> FtResult<()> {
        let mut utxos = self.utxos.lock();
        let slot = utxos
            .get_mut(owner)
            .and_then(|m| m.get_mut(outpoint))
            .ok_or_else(|| FtError::Persistence(format!("utxo {} not stored for {}", outpoint, owner)))?;
        let mut utxo: U = decode(slot)?;
        patch.apply(&mut utxo);
        *slot = encode(&utxo)?;
        Ok(())
    }
}

impl IssuerRecordStore for MemoryStore {
    fn get(&self, genesis_id: &TxId) -> FtResult<Option<IssuerRecord>> {
        Ok(self.issuers.lock().get(genesis_id).cloned())
    }

    fn insert(&self, record: &IssuerRecord) -> FtResult<()> {
        self.issuers.lock().insert(record.genesis_id, record.clone());
        Ok(())
    }

    fn update(&self, genesis_id: &TxId, update: IssuerUpdate) -> FtResult<IssuerRecord> {
        let mut issuers = self.issuers.lock();
        let record = issuers
            .get_mut(genesis_id)
            .ok_or_else(|| FtError::UnknownGenesis(genesis_id.to_string()))?;
        update.apply(record);
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utxo::FundingUtxo;

    #[test]
    fn list_is_outpoint_ordered() {
        let store = MemoryStore::new();
        let hi = FundingUtxo::new(OutPoint::new(TxId::from_bytes([9; 32]), 0), 1);
        let lo = FundingUtxo::new(OutPoint::new(TxId::from_bytes([1; 32]), 0), 2);
        PersistedUtxoStore::insert(&store, "o", &[hi.clone(), lo.clone()]).unwrap();
        let listed: Vec<FundingUtxo> = PersistedUtxoStore::list(&store, "o").unwrap();
        assert_eq!(listed, vec![lo, hi]);
        assert_eq!(store.count("o"), 2);
        assert_eq!(store.owners(), vec!["o".to_string()]);
    }

    #[test]
    fn unknown_issuer_update_fails() {
        let store = MemoryStore::new();
        let err = IssuerRecordStore::update(
            &store,
            &TxId::from_bytes([1; 32]),
            IssuerUpdate { genesis: None, issued: 0 },
        )
        .unwrap_err();
        assert!(matches!(err, FtError::UnknownGenesis(_)));
    }
}
