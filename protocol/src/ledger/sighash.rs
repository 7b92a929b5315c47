//! Signature preimages (BIP143 with FORKID).
//!
//! Contract verifiers re-derive the preimage on chain, so every proof we
//! assemble carries it verbatim. The three midstate hashes depend only on
//! the transaction's shape: which outpoints it spends, their sequence
//! numbers, and the complete output list. We compute them once per sealed
//! transaction and reuse them for every input. Unlocking scripts are not
//! part of any of them, so filling inputs in never invalidates a
//! preimage computed earlier.

use super::transaction::Transaction;
use super::types::OutPoint;
use super::transaction::write_varint;
use crate::config::SIGHASH_ALL_FORKID;
use crate::crypto::hash::double_sha256;
use crate::error::{FtError, FtResult};

/// The shape of a transaction, frozen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeCommitment {
    version: u32,
    lock_time: u32,
    prevouts: Vec<OutPoint>,
    sequences: Vec<u32>,
    hash_prevouts: [u8; 32],
    hash_sequence: [u8; 32],
    hash_outputs: [u8; 32],
}

impl ShapeCommitment {
    pub fn new(tx: &Transaction) -> Self {
        let prevouts: Vec<OutPoint> = tx.inputs.iter().map(|i| i.prev_out).collect();
        let sequences: Vec<u32> = tx.inputs.iter().map(|i| i.sequence).collect();

        let mut buf = Vec::with_capacity(prevouts.len() * 36);
        for p in &prevouts {
            buf.extend_from_slice(&p.to_bytes());
        }
        let hash_prevouts = double_sha256(&buf);

        let mut buf = Vec::with_capacity(sequences.len() * 4);
        for s in &sequences {
            buf.extend_from_slice(&s.to_le_bytes());
        }
        let hash_sequence = double_sha256(&buf);

        let mut buf = Vec::new();
        for o in &tx.outputs {
            buf.extend_from_slice(&o.value.to_le_bytes());
            write_varint(&mut buf, o.script_pubkey.len() as u64);
            buf.extend_from_slice(&o.script_pubkey);
        }
        let hash_outputs = double_sha256(&buf);

        Self {
            version: tx.version,
            lock_time: tx.lock_time,
            prevouts,
            sequences,
            hash_prevouts,
            hash_sequence,
            hash_outputs,
        }
    }

    /// Concatenated outpoints of all inputs. Token verifiers receive this
    /// to locate the route-check input.
    pub fn prevouts_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.prevouts.len() * 36);
        for p in &self.prevouts {
            out.extend_from_slice(&p.to_bytes());
        }
        out
    }

    pub fn input_count(&self) -> usize {
        self.prevouts.len()
    }

    /// Preimage for `input_index`, which spends an output locked by
    /// `script_code` holding `value` satoshis.
    pub fn preimage(&self, input_index: usize, script_code: &[u8], value: u64) -> FtResult<Vec<u8>> {
        let outpoint = self.prevouts.get(input_index).ok_or_else(|| {
            FtError::InvalidRequest(format!(
                "input {} out of range for {} inputs",
                input_index,
                self.prevouts.len()
            ))
        })?;
        let sequence = self.sequences[input_index];

        let mut out = Vec::with_capacity(156 + script_code.len() + 5);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.hash_prevouts);
        out.extend_from_slice(&self.hash_sequence);
        out.extend_from_slice(&outpoint.to_bytes());
        write_varint(&mut out, script_code.len() as u64);
        out.extend_from_slice(script_code);
        out.extend_from_slice(&value.to_le_bytes());
        out.extend_from_slice(&sequence.to_le_bytes());
        out.extend_from_slice(&self.hash_outputs);
        out.extend_from_slice(&self.lock_time.to_le_bytes());
        out.extend_from_slice(&SIGHASH_ALL_FORKID.to_le_bytes());
        Ok(out)
    }

    /// Digest to sign for `input_index`.
    pub fn digest(&self, input_index: usize, script_code: &[u8], value: u64) -> FtResult<[u8; 32]> {
        Ok(double_sha256(&self.preimage(input_index, script_code, value)?))
    }
}
