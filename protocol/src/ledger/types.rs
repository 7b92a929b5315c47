//! Identifiers for things that live on the ledger.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::FtError;

// ---------------------------------------------------------------------------
// TxId
// ---------------------------------------------------------------------------

/// A transaction id.
///
/// Stored in internal byte order, i.e. exactly the double-SHA-256 output.
/// The hex form everybody prints (explorers, APIs, logs) is the byte-reversed
/// one, and that is what `Display`, `FromStr` and serde use.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxId([u8; 32]);

impl TxId {
    /// All zeroes. Used as the placeholder token id before first issuance.
    pub const ZERO: TxId = TxId([0u8; 32]);

    /// Wrap internal-order bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Internal-order bytes, as they appear inside serialized transactions.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse the conventional reversed hex form.
    pub fn from_hex(s: &str) -> Result<Self, FtError> {
        let raw = hex::decode(s.trim())
            .map_err(|e| FtError::InvalidRequest(format!("txid {}: {}", s, e)))?;
        if raw.len() != 32 {
            return Err(FtError::InvalidRequest(format!(
                "txid {}: expected 32 bytes, got {}",
                s,
                raw.len()
            )));
        }
        let mut bytes = [0u8; 32];
        for (i, b) in raw.iter().rev().enumerate() {
            bytes[i] = *b;
        }
        Ok(Self(bytes))
    }

    /// The conventional reversed hex form.
    pub fn to_hex(&self) -> String {
        let mut reversed = self.0;
        reversed.reverse();
        hex::encode(reversed)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", self.to_hex())
    }
}

impl FromStr for TxId {
    type Err = FtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for TxId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TxId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// OutPoint
// ---------------------------------------------------------------------------

/// A reference to one output of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: TxId,
    pub index: u32,
}

impl OutPoint {
    pub fn new(txid: TxId, index: u32) -> Self {
        Self { txid, index }
    }

    /// Wire form: 32 internal-order txid bytes then the index, little-endian.
    pub fn to_bytes(&self) -> [u8; 36] {
        let mut out = [0u8; 36];
        out[..32].copy_from_slice(self.txid.as_bytes());
        out[32..].copy_from_slice(&self.index.to_le_bytes());
        out
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}
