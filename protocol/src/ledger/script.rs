//! Script assembly helpers.
//!
//! We never execute scripts; we only build them. [`ScriptBuilder`] emits
//! minimal pushes so that what we hash locally is byte-for-byte what the
//! ledger will hash.

use crate::config::ADDRESS_HASH_LEN;

pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1NEGATE: u8 = 0x4f;
pub const OP_1: u8 = 0x51;
pub const OP_RETURN: u8 = 0x6a;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;

/// Bytes of push header needed in front of `len` bytes of data.
pub fn push_header_len(len: usize) -> usize {
    match len {
        0..=0x4b => 1,
        0x4c..=0xff => 2,
        0x100..=0xffff => 3,
        _ => 5,
    }
}

/// Minimal little-endian sign-magnitude encoding of a script number.
pub fn encode_script_num(value: i64) -> Vec<u8> {
    encode_magnitude(value.unsigned_abs(), value < 0)
}

/// Script number for an unsigned value. Values with the top bit set get a
/// trailing 0x00 so they stay positive.
pub fn encode_script_uint(value: u64) -> Vec<u8> {
    encode_magnitude(value, false)
}

fn encode_magnitude(mut abs: u64, negative: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    while abs > 0 {
        out.push((abs & 0xff) as u8);
        abs >>= 8;
    }
    // Top bit is the sign; add a byte if the magnitude already uses it.
    if out.last().map_or(false, |b| b & 0x80 != 0) {
        out.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        if let Some(last) = out.last_mut() {
            *last |= 0x80;
        }
    }
    out
}

/// Incremental script writer.
#[derive(Debug, Clone, Default)]
pub struct ScriptBuilder {
    bytes: Vec<u8>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { bytes: Vec::with_capacity(capacity) }
    }

    pub fn opcode(mut self, op: u8) -> Self {
        self.bytes.push(op);
        self
    }

    /// Append raw bytes without a push header.
    pub fn raw(mut self, data: &[u8]) -> Self {
        self.bytes.extend_from_slice(data);
        self
    }

    /// Push `data` using the smallest push opcode that fits.
    pub fn push(mut self, data: &[u8]) -> Self {
        let len = data.len();
        match len {
            0..=0x4b => self.bytes.push(len as u8),
            0x4c..=0xff => {
                self.bytes.push(OP_PUSHDATA1);
                self.bytes.push(len as u8);
            }
            0x100..=0xffff => {
                self.bytes.push(OP_PUSHDATA2);
                self.bytes.extend_from_slice(&(len as u16).to_le_bytes());
            }
            _ => {
                self.bytes.push(OP_PUSHDATA4);
                self.bytes.extend_from_slice(&(len as u32).to_le_bytes());
            }
        }
        self.bytes.extend_from_slice(data);
        self
    }

    /// Push an integer as a script number, using OP_0..OP_16 where possible.
    pub fn int(mut self, value: i64) -> Self {
        match value {
            0 => {
                self.bytes.push(OP_0);
                self
            }
            -1 => {
                self.bytes.push(OP_1NEGATE);
                self
            }
            1..=16 => {
                self.bytes.push(OP_1 + (value as u8 - 1));
                self
            }
            _ => self.push(&encode_script_num(value)),
        }
    }

    /// Push an amount or satoshi value. Never negative, whatever its top bit.
    pub fn uint(mut self, value: u64) -> Self {
        match value {
            0 => {
                self.bytes.push(OP_0);
                self
            }
            1..=16 => {
                self.bytes.push(OP_1 + (value as u8 - 1));
                self
            }
            _ => self.push(&encode_script_uint(value)),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// `OP_DUP OP_HASH160 <hash> OP_EQUALVERIFY OP_CHECKSIG`
pub fn p2pkh_locking_script(pubkey_hash: &[u8; ADDRESS_HASH_LEN]) -> Vec<u8> {
    ScriptBuilder::with_capacity(25)
        .opcode(OP_DUP)
        .opcode(OP_HASH160)
        .push(pubkey_hash)
        .opcode(OP_EQUALVERIFY)
        .opcode(OP_CHECKSIG)
        .into_bytes()
}

/// `<sig> <pubkey>`
pub fn p2pkh_unlocking_script(signature: &[u8], public_key: &[u8]) -> Vec<u8> {
    ScriptBuilder::with_capacity(signature.len() + public_key.len() + 2)
        .push(signature)
        .push(public_key)
        .into_bytes()
}
