//! Attestation data types.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::RABIN_SIG_LEN;
use crate::error::{FtError, FtResult};
use crate::ledger::{OutPoint, TxId};

// ---------------------------------------------------------------------------
// RabinSignature
// ---------------------------------------------------------------------------

/// A Rabin signature: an unsigned integer of at most 128 bytes.
///
/// Oracles hand it over as big-endian hex; proofs carry it little-endian at
/// exactly 128 bytes. The value is stored little-endian and every boundary
/// crossing names its byte order explicitly.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RabinSignature([u8; RABIN_SIG_LEN]);

impl RabinSignature {
    pub const ZERO: RabinSignature = RabinSignature([0u8; RABIN_SIG_LEN]);

    pub fn from_le_bytes(bytes: [u8; RABIN_SIG_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse big-endian hex as returned by oracle services. Shorter values
    /// are zero-extended; values wider than 128 bytes are rejected.
    pub fn from_be_hex(s: &str) -> FtResult<Self> {
        let s = s.trim();
        let padded;
        let s = if s.len() % 2 == 1 {
            padded = format!("0{}", s);
            padded.as_str()
        } else {
            s
        };
        let be = hex::decode(s)
            .map_err(|e| FtError::InvalidRequest(format!("signature is not hex: {}", e)))?;
        let significant = be.iter().position(|b| *b != 0).map_or(&be[..0], |p| &be[p..]);
        if significant.len() > RABIN_SIG_LEN {
            return Err(FtError::InvalidRequest(format!(
                "signature is {} bytes, limit is {}",
                significant.len(),
                RABIN_SIG_LEN
            )));
        }
        let mut le = [0u8; RABIN_SIG_LEN];
        for (i, b) in significant.iter().rev().enumerate() {
            le[i] = *b;
        }
        Ok(Self(le))
    }

    /// Fixed-width little-endian serialization used inside proofs.
    pub fn to_le_bytes(&self) -> [u8; RABIN_SIG_LEN] {
        self.0
    }

    pub fn to_be_bytes(&self) -> [u8; RABIN_SIG_LEN] {
        let mut be = self.0;
        be.reverse();
        be
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Debug for RabinSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let be = self.to_be_bytes();
        let start = be.iter().position(|b| *b != 0).unwrap_or(be.len());
        write!(f, "RabinSignature(0x{})", hex::encode(&be[start..]))
    }
}

// ---------------------------------------------------------------------------
// References handed to oracles
// ---------------------------------------------------------------------------

/// An output plus the raw transaction that created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRef {
    pub outpoint: OutPoint,
    pub raw_tx: Vec<u8>,
}

/// The transaction that spent some output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendingTxRef {
    pub txid: TxId,
    pub raw_tx: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Attestations
// ---------------------------------------------------------------------------

/// One oracle's signed statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleAttestation {
    /// Roster position of the signer.
    pub oracle_index: usize,
    /// The signed message.
    pub payload: Vec<u8>,
    pub signature: RabinSignature,
    pub padding: Vec<u8>,
}
