//! Two-phase transaction assembly.
//!
//! A [`TxDraft`] collects inputs and outputs. Sealing it computes the fee,
//! appends change and freezes the shape, yielding a [`SealedTransaction`].
//! From then on only unlocking scripts can be written, so every preimage
//! taken from the sealed transaction stays valid until it is finished.
//!
//! ```text
//!   TxDraft ──seal(fee policy, change script)──▶ SealedTransaction ──finish()──▶ Transaction
//!    add inputs/outputs                           preimage / sign / unlock
//! ```

use super::fee::{dust_threshold, FeePolicy};
use super::script::p2pkh_unlocking_script;
use super::sighash::ShapeCommitment;
use super::transaction::{Transaction, TxInput, TxOutput};
use super::types::{OutPoint, TxId};
use crate::config::{P2PKH_INPUT_SIZE, P2PKH_SCRIPT_LEN};
use crate::crypto::keys::SigningContext;
use crate::error::{FtError, FtResult};

/// How an input will be unlocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpendKind {
    P2pkh,
    Contract,
}

/// The output an input spends.
#[derive(Debug, Clone)]
struct SpentOutput {
    value: u64,
    locking_script: Vec<u8>,
    kind: SpendKind,
}

/// An unsealed transaction.
#[derive(Debug, Clone, Default)]
pub struct TxDraft {
    tx: Transaction,
    spent: Vec<SpentOutput>,
}

impl TxDraft {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an input spending a P2PKH output. Returns the input index.
    pub fn spend_p2pkh(&mut self, outpoint: OutPoint, value: u64, locking_script: Vec<u8>) -> usize {
        self.spend(outpoint, value, locking_script, SpendKind::P2pkh)
    }

    /// Add an input spending a contract output. Returns the input index.
    pub fn spend_contract(&mut self, outpoint: OutPoint, value: u64, locking_script: Vec<u8>) -> usize {
        self.spend(outpoint, value, locking_script, SpendKind::Contract)
    }

    fn spend(&mut self, outpoint: OutPoint, value: u64, locking_script: Vec<u8>, kind: SpendKind) -> usize {
        self.tx.inputs.push(TxInput::new(outpoint));
        self.spent.push(SpentOutput { value, locking_script, kind });
        self.tx.inputs.len() - 1
    }

    /// Append an output. Returns its index.
    pub fn add_output(&mut self, value: u64, script_pubkey: Vec<u8>) -> u32 {
        self.tx.outputs.push(TxOutput::new(value, script_pubkey));
        (self.tx.outputs.len() - 1) as u32
    }

    pub fn input_value(&self) -> u64 {
        self.spent.iter().map(|s| s.value).sum()
    }

    pub fn output_value(&self) -> u64 {
        self.tx.total_output_value()
    }

    /// Size estimate: signed P2PKH inputs count as 148 bytes, contract
    /// inputs as if their unlocking script were empty.
    pub fn estimated_size(&self) -> u64 {
        let p2pkh_inputs = self.spent.iter().filter(|s| s.kind == SpendKind::P2pkh).count() as u64;
        // An empty script_sig already contributes 41 bytes per input.
        self.tx.size() as u64 + p2pkh_inputs * (P2PKH_INPUT_SIZE - 41)
    }

    /// Compute the fee, append change to `change_script` when it clears
    /// dust, and freeze the shape.
    ///
    /// `token_inputs`/`token_outputs` feed the per-token-IO surcharge.
    pub fn seal(
        mut self,
        policy: &FeePolicy,
        token_inputs: usize,
        token_outputs: usize,
        change_script: Vec<u8>,
    ) -> FtResult<SealedTransaction> {
        let available = self.input_value();
        let committed = self.output_value();

        let change_output_size = TxOutput::new(0, change_script.clone()).size() as u64;
        let base_size = self.estimated_size();
        let fee_without_change = policy.fee(base_size, token_inputs, token_outputs);
        let fee_with_change = policy.fee(base_size + change_output_size, token_inputs, token_outputs);

        let required = committed.saturating_add(fee_without_change);
        if available < required {
            return Err(FtError::InsufficientFunds { required, available });
        }

        let mut change = None;
        let fee = match available.checked_sub(committed + fee_with_change) {
            Some(amount) if amount >= dust_threshold(P2PKH_SCRIPT_LEN) => {
                let index = self.add_output(amount, change_script);
                change = Some((index, amount));
                fee_with_change
            }
            // Sub-dust change is folded into the fee.
            _ => available - committed,
        };

        let commitment = ShapeCommitment::new(&self.tx);
        Ok(SealedTransaction { tx: self.tx, spent: self.spent, commitment, fee, change })
    }
}

/// A transaction whose inputs, outputs and fee are final.
#[derive(Debug, Clone)]
pub struct SealedTransaction {
    tx: Transaction,
    spent: Vec<SpentOutput>,
    commitment: ShapeCommitment,
    fee: u64,
    change: Option<(u32, u64)>,
}

impl SealedTransaction {
    pub fn commitment(&self) -> &ShapeCommitment {
        &self.commitment
    }

    pub fn fee(&self) -> u64 {
        self.fee
    }

    /// Index and value of the change output, if one was added.
    pub fn change(&self) -> Option<(u32, u64)> {
        self.change
    }

    pub fn outputs(&self) -> &[TxOutput] {
        &self.tx.outputs
    }

    fn spent(&self, input: usize) -> FtResult<&SpentOutput> {
        self.spent.get(input).ok_or_else(|| {
            FtError::InvalidRequest(format!("input {} out of range", input))
        })
    }

    pub fn preimage(&self, input: usize) -> FtResult<Vec<u8>> {
        let spent = self.spent(input)?;
        self.commitment.preimage(input, &spent.locking_script, spent.value)
    }

    pub fn sighash(&self, input: usize) -> FtResult<[u8; 32]> {
        let spent = self.spent(input)?;
        self.commitment.digest(input, &spent.locking_script, spent.value)
    }

    /// Sign `input` with `ctx`. Returns the signature with its sighash byte.
    pub fn signature(&self, input: usize, ctx: &SigningContext) -> FtResult<Vec<u8>> {
        let digest = self.sighash(input)?;
        Ok(ctx.sign_digest(&digest)?)
    }

    pub fn set_unlocking_script(&mut self, input: usize, script: Vec<u8>) -> FtResult<()> {
        let slot = self.tx.inputs.get_mut(input).ok_or_else(|| {
            FtError::InvalidRequest(format!("input {} out of range", input))
        })?;
        slot.script_sig = script;
        Ok(())
    }

    /// Sign every P2PKH input with `ctx`.
    pub fn sign_p2pkh_inputs(&mut self, ctx: &SigningContext) -> FtResult<()> {
        for input in 0..self.spent.len() {
            if self.spent[input].kind != SpendKind::P2pkh {
                continue;
            }
            let signature = self.signature(input, ctx)?;
            self.set_unlocking_script(input, p2pkh_unlocking_script(&signature, ctx.public_key()))?;
        }
        Ok(())
    }

    /// Release the transaction. Every input must have been unlocked.
    pub fn finish(self) -> FtResult<(Transaction, TxId)> {
        if let Some(i) = self.tx.inputs.iter().position(|i| i.script_sig.is_empty()) {
            return Err(FtError::InvalidRequest(format!("input {} was never unlocked", i)));
        }
        let txid = self.tx.txid();
        Ok((self.tx, txid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Network;
    use crate::ledger::fee::FeeRate;
    use crate::ledger::script::p2pkh_locking_script;

    fn policy(rate: f64) -> FeePolicy {
        FeePolicy::new(FeeRate::new(rate).unwrap(), 3840)
    }

    fn op(n: u8) -> OutPoint {
        OutPoint::new(TxId::from_bytes([n; 32]), 0)
    }

    #[test]
    fn test_change_added_when_above_dust() {
        let ctx = SigningContext::generate(Network::Testnet);
        let lock = p2pkh_locking_script(ctx.pubkey_hash());
        let mut d = TxDraft::new();
        d.spend_p2pkh(op(1), 100_000, lock.clone());
        d.add_output(1000, vec![0x51]);
        let sealed = d.seal(&policy(1.0), 0, 0, lock).unwrap();
        let (index, change) = sealed.change().unwrap();
        assert_eq!(index, 1);
        assert_eq!(100_000 - 1000 - sealed.fee(), change);
    }

    #[test]
    fn test_sub_dust_change_folded_into_fee() {
        let lock = p2pkh_locking_script(&[0u8; 20]);
        let mut d = TxDraft::new();
        d.spend_p2pkh(op(1), 1300, lock.clone());
        d.add_output(1000, vec![0x51]);
        let sealed = d.seal(&policy(1.0), 0, 0, lock).unwrap();
        assert!(sealed.change().is_none());
        assert_eq!(sealed.fee(), 300);
    }

    #[test]
    fn test_insufficient_funds_reports_amounts() {
        let lock = p2pkh_locking_script(&[0u8; 20]);
        let mut d = TxDraft::new();
        d.spend_p2pkh(op(1), 500, lock.clone());
        d.add_output(1000, vec![0x51]);
        match d.seal(&policy(1.0), 0, 0, lock) {
            Err(FtError::InsufficientFunds { required, available }) => {
                assert_eq!(available, 500);
                assert!(required > 1000);
            }
            other => panic!("expected InsufficientFunds, got {:?}", other.map(|s| s.fee())),
        }
    }

    #[test]
    fn token_surcharge_raises_fee() {
        let lock = p2pkh_locking_script(&[0u8; 20]);
        let mut d = TxDraft::new();
        d.spend_contract(op(1), 10_000_000, vec![0x51; 100]);
        let plain = d.clone().seal(&policy(0.5), 0, 0, lock.clone()).unwrap().fee();
        let surcharged = d.seal(&policy(0.5), 1, 2, lock).unwrap().fee();
        assert_eq!(surcharged - plain, (0.5f64 * 3.0 * 3840.0).ceil() as u64);
    }

    #[test]
    fn test_finish_requires_all_inputs_unlocked() {
        let ctx = SigningContext::generate(Network::Testnet);
        let lock = p2pkh_locking_script(ctx.pubkey_hash());
        let mut d = TxDraft::new();
        d.spend_p2pkh(op(1), 100_000, lock.clone());
        d.spend_contract(op(2), 1000, vec![0x51]);
        let mut sealed = d.seal(&policy(0.5), 1, 0, lock).unwrap();
        sealed.sign_p2pkh_inputs(&ctx).unwrap();
        assert!(sealed.clone().finish().is_err());
        let preimage = sealed.preimage(1).unwrap();
        sealed.set_unlocking_script(1, preimage.clone()).unwrap();
        // Preimages survive unlocking.
        assert_eq!(sealed.preimage(1).unwrap(), preimage);
        let (tx, txid) = sealed.finish().unwrap();
        assert_eq!(tx.txid(), txid);
    }
}
