//! The ledger, as seen by the service: fetch raw transactions, broadcast
//! new ones.

use async_trait::async_trait;

use super::types::TxId;
use crate::error::FtResult;

/// Read/write access to the UTXO ledger.
///
/// `broadcast` fails with [`FtError::BroadcastRejected`](crate::error::FtError::BroadcastRejected)
/// when the ledger refuses the transaction, and with
/// [`FtError::Ledger`](crate::error::FtError::Ledger) on transport trouble.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Raw bytes of a known transaction.
    async fn get_raw_transaction(&self, txid: &TxId) -> FtResult<Vec<u8>>;

    /// Submit raw bytes. Returns the id the ledger reports.
    async fn broadcast(&self, raw_tx: &[u8]) -> FtResult<TxId>;
}
