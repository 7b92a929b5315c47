//! Nullable ledger — accept broadcasts into memory instead of a network.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

use crate::error::{FtError, FtResult, Rejection};
use crate::ledger::script::p2pkh_locking_script;
use crate::ledger::{LedgerClient, OutPoint, Transaction, TxId, TxInput, TxOutput};
use crate::utxo::FundingUtxo;

/// A test ledger that records every accepted transaction.
///
/// Rejections can be queued with [`reject_next`](Self::reject_next) or
/// [`reject_after`](Self::reject_after); each queued reason refuses exactly
/// one later broadcast.
#[derive(Default)]
pub struct NullLedger {
    transactions: Mutex<HashMap<TxId, Vec<u8>>>,
    broadcasts: Mutex<Vec<TxId>>,
    /// (broadcasts still to accept first, reason)
    rejections: Mutex<VecDeque<(usize, String)>>,
    minted: Mutex<u32>,
}

impl NullLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next broadcast with `reason`.
    pub fn reject_next(&self, reason: impl Into<String>) {
        self.reject_after(0, reason);
    }

    /// Accept `accepted` more broadcasts, then refuse one with `reason`.
    pub fn reject_after(&self, accepted: usize, reason: impl Into<String>) {
        self.rejections.lock().push_back((accepted, reason.into()));
    }

    fn take_rejection(&self) -> Option<String> {
        let mut queue = self.rejections.lock();
        match queue.front_mut() {
            Some((0, _)) => queue.pop_front().map(|(_, reason)| reason),
            Some((remaining, _)) => {
                *remaining -= 1;
                None
            }
            None => None,
        }
    }

    /// Create a transaction paying `values` to `pubkey_hash` and record it
    /// as known. Returns the new outputs as funding utxos.
    ///
    /// The transaction spends a made-up coinbase-like outpoint, so it is
    /// unique per call.
    pub fn fund(&self, pubkey_hash: &[u8; 20], values: &[u64]) -> Vec<FundingUtxo> {
        let nonce = {
            let mut minted = self.minted.lock();
            *minted += 1;
            *minted
        };
        let mut tx = Transaction::new();
        let mut source = TxInput::new(OutPoint::new(TxId::ZERO, nonce));
        source.script_sig = nonce.to_le_bytes().to_vec();
        tx.inputs.push(source);
        let lock = p2pkh_locking_script(pubkey_hash);
        for value in values {
            tx.outputs.push(TxOutput::new(*value, lock.clone()));
        }
        let txid = tx.txid();
        self.transactions.lock().insert(txid, tx.serialize());
        values
            .iter()
            .enumerate()
            .map(|(i, value)| FundingUtxo::new(OutPoint::new(txid, i as u32), *value))
            .collect()
    }

    /// Ids of accepted broadcasts, oldest first.
    pub fn broadcasts(&self) -> Vec<TxId> {
        self.broadcasts.lock().clone()
    }

    /// A known transaction, parsed.
    pub fn transaction(&self, txid: &TxId) -> Option<Transaction> {
        let raw = self.transactions.lock().get(txid).cloned()?;
        Transaction::from_bytes(&raw).ok()
    }

    /// The most recently accepted broadcast, parsed.
    pub fn last_broadcast(&self) -> Option<Transaction> {
        let txid = *self.broadcasts.lock().last()?;
        self.transaction(&txid)
    }
}

#[async_trait]
impl LedgerClient for NullLedger {
    async fn get_raw_transaction(&self, txid: &TxId) -> FtResult<Vec<u8>> {
        self.transactions
            .lock()
            .get(txid)
            .cloned()
            .ok_or_else(|| FtError::Ledger(format!("transaction {} not found", txid)))
    }

    async fn broadcast(&self, raw_tx: &[u8]) -> FtResult<TxId> {
        if let Some(reason) = self.take_rejection() {
            return Err(FtError::BroadcastRejected(Rejection::new(reason)));
        }
        let tx = Transaction::from_bytes(raw_tx)
            .map_err(|e| FtError::BroadcastRejected(Rejection::new(format!("TX decode failed: {}", e))))?;
        let txid = tx.txid();
        self.transactions.lock().insert(txid, raw_tx.to_vec());
        self.broadcasts.lock().push(txid);
        Ok(txid)
    }
}
