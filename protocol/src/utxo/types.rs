//! Spendable outputs and issuer records as the service persists them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::{OutPoint, TxId};
use crate::oracle::{OutputRef, SpendingTxRef};
use crate::token::TokenMetadata;

/// Anything a [`UtxoLeaseManager`](super::lease::UtxoLeaseManager) can lease.
pub trait LeasedUtxo: Clone + Send + Sync + 'static {
    fn outpoint(&self) -> OutPoint;

    /// What a reservation accumulates: satoshis for funding, token units for
    /// tokens.
    fn lease_value(&self) -> u64;

    fn retry_depth(&self) -> u32;

    fn set_retry_depth(&mut self, depth: u32);
}

/// A plain P2PKH output owned by the service key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingUtxo {
    pub outpoint: OutPoint,
    pub value: u64,
    #[serde(default)]
    pub retry_depth: u32,
}

impl FundingUtxo {
    pub fn new(outpoint: OutPoint, value: u64) -> Self {
        Self { outpoint, value, retry_depth: 0 }
    }
}

impl LeasedUtxo for FundingUtxo {
    fn outpoint(&self) -> OutPoint {
        self.outpoint
    }

    fn lease_value(&self) -> u64 {
        self.value
    }

    fn retry_depth(&self) -> u32 {
        self.retry_depth
    }

    fn set_retry_depth(&mut self, depth: u32) {
        self.retry_depth = depth;
    }
}

/// Where a contract output came from: its own transaction, and the output
/// that transaction spent along the same lineage.
///
/// This is exactly what an oracle needs for `attest_spend(prev, this tx)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    /// Raw transaction containing the output.
    pub raw_tx: Vec<u8>,
    /// The lineage output that transaction spent.
    pub prev_outpoint: OutPoint,
    /// Raw transaction containing `prev_outpoint`.
    pub prev_raw_tx: Vec<u8>,
}

impl Lineage {
    pub fn prev_ref(&self) -> OutputRef {
        OutputRef { outpoint: self.prev_outpoint, raw_tx: self.prev_raw_tx.clone() }
    }

    pub fn spending_ref(&self, txid: TxId) -> SpendingTxRef {
        SpendingTxRef { txid, raw_tx: self.raw_tx.clone() }
    }
}

/// A token contract output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUtxo {
    pub outpoint: OutPoint,
    /// Satoshis locked in the output.
    pub value: u64,
    pub locking_script: Vec<u8>,
    pub metadata: TokenMetadata,
    pub lineage: Lineage,
    #[serde(default)]
    pub retry_depth: u32,
}

impl TokenUtxo {
    pub fn amount(&self) -> u64 {
        self.metadata.amount
    }
}

impl LeasedUtxo for TokenUtxo {
    fn outpoint(&self) -> OutPoint {
        self.outpoint
    }

    fn lease_value(&self) -> u64 {
        self.metadata.amount
    }

    fn retry_depth(&self) -> u32 {
        self.retry_depth
    }

    fn set_retry_depth(&mut self, depth: u32) {
        self.retry_depth = depth;
    }
}

/// Fields of a persisted utxo that may change in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoPatch {
    pub retry_depth: Option<u32>,
}

impl UtxoPatch {
    pub fn apply<U: LeasedUtxo>(&self, utxo: &mut U) {
        if let Some(depth) = self.retry_depth {
            utxo.set_retry_depth(depth);
        }
    }
}

// ---------------------------------------------------------------------------
// Issuer records
// ---------------------------------------------------------------------------

/// One token type's issuance state. Each issue moves the genesis contract
/// forward by one transaction; the record follows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerRecord {
    /// Id of the genesis transaction. Also the token id's txid.
    pub genesis_id: TxId,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    /// The live genesis contract output.
    pub genesis_outpoint: OutPoint,
    pub genesis_value: u64,
    pub genesis_script: Vec<u8>,
    pub lineage: Lineage,
    /// Total units issued so far.
    pub issued: u64,
    /// Set once an issue declined to renew the genesis output.
    pub closed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IssuerRecord {
    /// The current genesis output, as oracles need to see it.
    pub fn genesis_ref(&self) -> OutputRef {
        OutputRef { outpoint: self.genesis_outpoint, raw_tx: self.lineage.raw_tx.clone() }
    }
}

/// Changes applied to an issuer record after a successful issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerUpdate {
    /// New live genesis output, or `None` when issuance was closed.
    pub genesis: Option<(OutPoint, u64, Vec<u8>, Lineage)>,
    pub issued: u64,
}

impl IssuerUpdate {
    pub fn apply(self, record: &mut IssuerRecord) {
        match self.genesis {
            Some((outpoint, value, script, lineage)) => {
                record.genesis_outpoint = outpoint;
                record.genesis_value = value;
                record.genesis_script = script;
                record.lineage = lineage;
            }
            None => record.closed = true,
        }
        record.issued = self.issued;
        record.updated_at = Utc::now();
    }
}
