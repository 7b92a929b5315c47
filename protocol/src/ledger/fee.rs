//! Fees and dust.

use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_FEE_RATE, DEFAULT_TOKEN_IO_SIZE};
use crate::error::{FtError, FtResult};

/// Minimum value an output locked by a script of `script_len` bytes must
/// carry to be relayed: `3 * floor(250 * (len + 9 + 148) / 1000)`.
pub fn dust_threshold(script_len: usize) -> u64 {
    3 * ((250 * (script_len as u64 + 9 + 148)) / 1000)
}

/// Satoshis per byte.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeRate(f64);

impl FeeRate {
    pub fn new(sats_per_byte: f64) -> FtResult<Self> {
        if !sats_per_byte.is_finite() || sats_per_byte < 0.0 {
            return Err(FtError::Configuration(format!(
                "invalid fee rate {}",
                sats_per_byte
            )));
        }
        Ok(Self(sats_per_byte))
    }

    pub fn sats_per_byte(&self) -> f64 {
        self.0
    }

    /// Fee for `bytes`, rounded up.
    pub fn fee_for(&self, bytes: u64) -> u64 {
        (self.0 * bytes as f64).ceil() as u64
    }
}

impl Default for FeeRate {
    fn default() -> Self {
        Self(DEFAULT_FEE_RATE)
    }
}

/// Fee rate plus the per-token-IO surcharge.
///
/// The estimator sizes contract inputs with empty unlocking scripts; the
/// surcharge stands in for the proof bytes that will be appended.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeePolicy {
    pub rate: FeeRate,
    pub token_io_size: u64,
}

impl FeePolicy {
    pub fn new(rate: FeeRate, token_io_size: u64) -> Self {
        Self { rate, token_io_size }
    }

    /// `ceil(rate * (estimated_size + token_io_size * (token_inputs + token_outputs)))`
    pub fn fee(&self, estimated_size: u64, token_inputs: usize, token_outputs: usize) -> u64 {
        let surcharge = self.token_io_size * (token_inputs + token_outputs) as u64;
        self.rate.fee_for(estimated_size + surcharge)
    }
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self { rate: FeeRate::default(), token_io_size: DEFAULT_TOKEN_IO_SIZE }
    }
}
