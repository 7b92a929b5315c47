//! Ledger transactions in their wire format.
//!
//! ```text
//! version(4 LE) | varint n_in | inputs | varint n_out | outputs | lock_time(4 LE)
//! input  = prev txid(32) | prev index(4 LE) | varint len | script_sig | sequence(4 LE)
//! output = value(8 LE) | varint len | script_pubkey
//! ```
//!
//! The txid is the double SHA-256 of the serialization, so anything that
//! changes a byte here changes the id. Unlocking scripts included.

use serde::{Deserialize, Serialize};

use super::types::{OutPoint, TxId};
use crate::config::{DEFAULT_SEQUENCE, TX_VERSION};
use crate::crypto::hash::double_sha256;
use crate::error::{FtError, FtResult};

// ---------------------------------------------------------------------------
// Varints
// ---------------------------------------------------------------------------

pub fn write_varint(out: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => out.push(n as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&n.to_le_bytes());
        }
    }
}

pub fn varint_len(n: u64) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Cursor over a byte slice that fails with a ledger error instead of panicking.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> FtResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                FtError::Ledger(format!(
                    "malformed transaction: wanted {} bytes at offset {}, have {}",
                    n,
                    self.pos,
                    self.data.len()
                ))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32_le(&mut self) -> FtResult<u32> {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(b))
    }

    fn u64_le(&mut self) -> FtResult<u64> {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(b))
    }

    fn varint(&mut self) -> FtResult<u64> {
        let first = self.take(1)?[0];
        Ok(match first {
            0xfd => {
                let mut b = [0u8; 2];
                b.copy_from_slice(self.take(2)?);
                u16::from_le_bytes(b) as u64
            }
            0xfe => self.u32_le()? as u64,
            0xff => self.u64_le()?,
            n => n as u64,
        })
    }

    fn var_bytes(&mut self) -> FtResult<Vec<u8>> {
        let len = self.varint()?;
        let len = usize::try_from(len)
            .map_err(|_| FtError::Ledger("malformed transaction: length overflow".into()))?;
        Ok(self.take(len)?.to_vec())
    }

    fn finished(&self) -> bool {
        self.pos == self.data.len()
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub prev_out: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl TxInput {
    /// Unsigned input spending `prev_out`.
    pub fn new(prev_out: OutPoint) -> Self {
        Self { prev_out, script_sig: Vec::new(), sequence: DEFAULT_SEQUENCE }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

impl TxOutput {
    pub fn new(value: u64, script_pubkey: Vec<u8>) -> Self {
        Self { value, script_pubkey }
    }

    /// Serialized size of this output.
    pub fn size(&self) -> usize {
        8 + varint_len(self.script_pubkey.len() as u64) + self.script_pubkey.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
}

impl Default for Transaction {
    fn default() -> Self {
        Self { version: TX_VERSION, inputs: Vec::new(), outputs: Vec::new(), lock_time: 0 }
    }
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        out.extend_from_slice(&self.version.to_le_bytes());
        write_varint(&mut out, self.inputs.len() as u64);
        for input in &self.inputs {
            out.extend_from_slice(&input.prev_out.to_bytes());
            write_varint(&mut out, input.script_sig.len() as u64);
            out.extend_from_slice(&input.script_sig);
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }
        write_varint(&mut out, self.outputs.len() as u64);
        for output in &self.outputs {
            out.extend_from_slice(&output.value.to_le_bytes());
            write_varint(&mut out, output.script_pubkey.len() as u64);
            out.extend_from_slice(&output.script_pubkey);
        }
        out.extend_from_slice(&self.lock_time.to_le_bytes());
        out
    }

    /// Parse wire bytes. Trailing garbage is an error.
    pub fn from_bytes(data: &[u8]) -> FtResult<Self> {
        let mut r = Reader::new(data);
        let version = r.u32_le()?;
        let n_in = r.varint()?;
        let mut inputs = Vec::new();
        for _ in 0..n_in {
            let mut txid = [0u8; 32];
            txid.copy_from_slice(r.take(32)?);
            let index = r.u32_le()?;
            let script_sig = r.var_bytes()?;
            let sequence = r.u32_le()?;
            inputs.push(TxInput {
                prev_out: OutPoint::new(TxId::from_bytes(txid), index),
                script_sig,
                sequence,
            });
        }
        let n_out = r.varint()?;
        let mut outputs = Vec::new();
        for _ in 0..n_out {
            let value = r.u64_le()?;
            let script_pubkey = r.var_bytes()?;
            outputs.push(TxOutput { value, script_pubkey });
        }
        let lock_time = r.u32_le()?;
        if !r.finished() {
            return Err(FtError::Ledger("malformed transaction: trailing bytes".into()));
        }
        Ok(Self { version, inputs, outputs, lock_time })
    }

    pub fn from_hex(s: &str) -> FtResult<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| FtError::Ledger(format!("malformed transaction hex: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.serialize())
    }

    pub fn txid(&self) -> TxId {
        TxId::from_bytes(double_sha256(&self.serialize()))
    }

    /// Serialized size in bytes.
    pub fn size(&self) -> usize {
        let inputs: usize = self
            .inputs
            .iter()
            .map(|i| 36 + varint_len(i.script_sig.len() as u64) + i.script_sig.len() + 4)
            .sum();
        let outputs: usize = self.outputs.iter().map(TxOutput::size).sum();
        4 + varint_len(self.inputs.len() as u64)
            + inputs
            + varint_len(self.outputs.len() as u64)
            + outputs
            + 4
    }

    pub fn output(&self, index: u32) -> FtResult<&TxOutput> {
        self.outputs.get(index as usize).ok_or_else(|| {
            FtError::Ledger(format!(
                "transaction {} has no output {}",
                self.txid(),
                index
            ))
        })
    }

    pub fn total_output_value(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).sum()
    }
}
