//! Nullable oracle — deterministic attestations with lineage checks.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::{ORACLE_ROSTER_SIZE, RABIN_SIG_LEN};
use crate::crypto::hash::sha256;
use crate::error::{FtError, FtResult};
use crate::ledger::Transaction;
use crate::oracle::{OracleAttestation, OracleEndpoint, OutputRef, RabinSignature, SpendingTxRef};

/// How a [`NullOracle`] answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleMode {
    Sign,
    Unreachable,
    Reject(String),
}

/// A test oracle.
///
/// It signs only what a real oracle would: raw transactions must hash to the
/// ids they are presented under, and a spending transaction must actually
/// spend the referenced output. The "signature" is a digest of the payload
/// and the oracle index, so distinct oracles produce distinct signatures.
pub struct NullOracle {
    index: usize,
    mode: Mutex<OracleMode>,
    calls: AtomicUsize,
}

impl NullOracle {
    pub fn new(index: usize) -> Self {
        Self { index, mode: Mutex::new(OracleMode::Sign), calls: AtomicUsize::new(0) }
    }

    pub fn set_mode(&self, mode: OracleMode) {
        *self.mode.lock() = mode;
    }

    /// Attestation requests received so far, answered or not.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// A full roster of signing oracles, plus typed handles to steer them.
    pub fn roster() -> (Vec<Arc<dyn OracleEndpoint>>, Vec<Arc<NullOracle>>) {
        let handles: Vec<Arc<NullOracle>> =
            (0..ORACLE_ROSTER_SIZE).map(|i| Arc::new(NullOracle::new(i))).collect();
        let roster = handles.iter().map(|h| h.clone() as Arc<dyn OracleEndpoint>).collect();
        (roster, handles)
    }

    fn gate(&self) -> FtResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &*self.mode.lock() {
            OracleMode::Sign => Ok(()),
            OracleMode::Unreachable => Err(FtError::OracleUnreachable {
                index: self.index,
                reason: "connection refused".into(),
            }),
            OracleMode::Reject(reason) => {
                Err(FtError::OracleRejected { index: self.index, reason: reason.clone() })
            }
        }
    }

    fn reject(&self, reason: impl Into<String>) -> FtError {
        FtError::OracleRejected { index: self.index, reason: reason.into() }
    }

    fn parse(&self, raw: &[u8]) -> FtResult<Transaction> {
        Transaction::from_bytes(raw).map_err(|e| self.reject(format!("bad raw tx: {}", e)))
    }

    fn check_output(&self, output: &OutputRef) -> FtResult<()> {
        let tx = self.parse(&output.raw_tx)?;
        if tx.txid() != output.outpoint.txid {
            return Err(self.reject(format!("raw tx is not {}", output.outpoint.txid)));
        }
        if output.outpoint.index as usize >= tx.outputs.len() {
            return Err(self.reject(format!("no output {}", output.outpoint)));
        }
        Ok(())
    }

    fn sign(&self, payload: Vec<u8>) -> OracleAttestation {
        let mut material = payload.clone();
        material.push(self.index as u8);
        let digest = sha256(&material);
        let mut sig = [0u8; RABIN_SIG_LEN];
        for (chunk, byte) in sig.chunks_mut(32).zip(0u8..) {
            chunk.copy_from_slice(&digest);
            chunk[0] ^= byte;
        }
        OracleAttestation {
            oracle_index: self.index,
            payload,
            signature: RabinSignature::from_le_bytes(sig),
            padding: vec![self.index as u8, 0x00],
        }
    }
}

#[async_trait]
impl OracleEndpoint for NullOracle {
    async fn attest_existence(&self, output: &OutputRef) -> FtResult<OracleAttestation> {
        self.gate()?;
        self.check_output(output)?;
        Ok(self.sign(output.outpoint.to_bytes().to_vec()))
    }

    async fn attest_spend(
        &self,
        prev: &OutputRef,
        spending: &SpendingTxRef,
    ) -> FtResult<OracleAttestation> {
        self.gate()?;
        self.check_output(prev)?;
        let by = self.parse(&spending.raw_tx)?;
        if by.txid() != spending.txid {
            return Err(self.reject(format!("raw tx is not {}", spending.txid)));
        }
        if !by.inputs.iter().any(|i| i.prev_out == prev.outpoint) {
            return Err(self.reject(format!("{} does not spend {}", spending.txid, prev.outpoint)));
        }
        let mut payload = prev.outpoint.to_bytes().to_vec();
        payload.extend_from_slice(spending.txid.as_bytes());
        Ok(self.sign(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{OutPoint, TxId, TxInput, TxOutput};

    fn funding_tx() -> Transaction {
        let mut tx = Transaction::new();
        tx.inputs.push(TxInput::new(OutPoint::new(TxId::ZERO, 0)));
        tx.outputs.push(TxOutput::new(500, vec![0x51]));
        tx
    }

    #[tokio::test]
    async fn spend_must_be_real() {
        let oracle = NullOracle::new(1);
        let prev_tx = funding_tx();
        let prev = OutputRef { outpoint: OutPoint::new(prev_tx.txid(), 0), raw_tx: prev_tx.serialize() };

        let mut by = Transaction::new();
        by.inputs.push(TxInput::new(prev.outpoint));
        let spending = SpendingTxRef { txid: by.txid(), raw_tx: by.serialize() };
        let att = oracle.attest_spend(&prev, &spending).await.unwrap();
        assert_eq!(att.oracle_index, 1);
        assert_eq!(att.payload.len(), 68);

        let unrelated = Transaction::new();
        let bad = SpendingTxRef { txid: unrelated.txid(), raw_tx: unrelated.serialize() };
        assert!(matches!(
            oracle.attest_spend(&prev, &bad).await,
            Err(FtError::OracleRejected { index: 1, .. })
        ));
    }

    #[tokio::test]
    async fn modes_are_honored() {
        let oracle = NullOracle::new(2);
        let tx = funding_tx();
        let out = OutputRef { outpoint: OutPoint::new(tx.txid(), 0), raw_tx: tx.serialize() };
        oracle.set_mode(OracleMode::Unreachable);
        assert!(matches!(
            oracle.attest_existence(&out).await,
            Err(FtError::OracleUnreachable { index: 2, .. })
        ));
        oracle.set_mode(OracleMode::Sign);
        assert!(oracle.attest_existence(&out).await.is_ok());
        assert_eq!(oracle.calls(), 2);
    }

    #[tokio::test]
    async fn signatures_differ_per_oracle() {
        let tx = funding_tx();
        let out = OutputRef { outpoint: OutPoint::new(tx.txid(), 0), raw_tx: tx.serialize() };
        let a = NullOracle::new(0).attest_existence(&out).await.unwrap();
        let b = NullOracle::new(1).attest_existence(&out).await.unwrap();
        assert_eq!(a.payload, b.payload);
        assert_ne!(a.signature, b.signature);
    }
}
