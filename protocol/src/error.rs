//! Error types for the fungible token service.
//!
//! Every fallible operation in the crate returns an [`FtError`]. The enum is
//! exhaustive over the failure modes callers are expected to tell apart:
//! missing money, missing tokens, oracle trouble, ledger rejections and
//! persistence faults.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::MEMPOOL_CHAIN_TOO_LONG;
use crate::ledger::TxId;

/// Convenience alias used across the crate.
pub type FtResult<T> = Result<T, FtError>;

/// A broadcast refusal, carrying the ledger's reason text verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub reason: String,
}

/// Coarse classification of a [`Rejection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// The unconfirmed ancestor chain of some input is too long. Retrying
    /// the same utxos later is expected to work.
    MempoolChainTooLong,
    Other,
}

impl Rejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }

    pub fn kind(&self) -> RejectionKind {
        if self.reason.contains(MEMPOOL_CHAIN_TOO_LONG) {
            RejectionKind::MempoolChainTooLong
        } else {
            RejectionKind::Other
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Errors surfaced by the token engine.
#[derive(Debug, Error)]
pub enum FtError {
    /// Configuration is invalid (oracle roster, fee rate, templates).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The funding pool cannot cover the estimated cost.
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        /// Satoshis needed.
        required: u64,
        /// Satoshis the pool could offer.
        available: u64,
    },

    /// The sender's token utxos cannot cover the requested amount.
    #[error("insufficient token balance: required {required}, available {available}")]
    InsufficientTokenBalance {
        /// Token units requested.
        required: u64,
        /// Token units the sender holds.
        available: u64,
    },

    /// No route-check variant accommodates this many inputs and outputs.
    #[error("unsupported cardinality: {inputs} token inputs, {outputs} token outputs")]
    UnsupportedCardinality {
        /// Number of token inputs selected.
        inputs: usize,
        /// Number of token outputs required, change included.
        outputs: usize,
    },

    /// An oracle could not be reached.
    #[error("oracle {index} unreachable: {reason}")]
    OracleUnreachable {
        /// Roster position of the oracle.
        index: usize,
        /// Transport-level error text.
        reason: String,
    },

    /// An oracle answered but refused to sign.
    #[error("oracle {index} rejected the request: {reason}")]
    OracleRejected {
        /// Roster position of the oracle.
        index: usize,
        /// Error text returned by the oracle.
        reason: String,
    },

    /// The ledger refused a transaction.
    #[error("broadcast rejected: {0}")]
    BroadcastRejected(Rejection),

    /// A contract trailer could not be decoded or encoded.
    #[error("malformed metadata: {0}")]
    MalformedMetadata(String),

    /// Durable storage failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Ledger transport or transaction parsing failed.
    #[error("ledger error: {0}")]
    Ledger(String),

    /// No issuer record exists for the genesis id.
    #[error("unknown genesis: {0}")]
    UnknownGenesis(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Caller supplied arguments that can never succeed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The route-check transaction is on the ledger but the transfer that
    /// should spend it failed. The route-check output is left dangling.
    #[error("transfer incomplete: route-check {route_check_txid} broadcast, transfer failed: {source}")]
    TransferIncomplete {
        /// Id of the already broadcast route-check transaction.
        route_check_txid: TxId,
        /// Why the second phase failed.
        #[source]
        source: Box<FtError>,
    },
}

impl FtError {
    /// True when this error (or the failure it wraps) is a ledger refusal
    /// caused by an over-long unconfirmed chain.
    pub fn is_mempool_chain_too_long(&self) -> bool {
        match self {
            FtError::BroadcastRejected(rejection) => {
                rejection.kind() == RejectionKind::MempoolChainTooLong
            }
            FtError::TransferIncomplete { source, .. } => source.is_mempool_chain_too_long(),
            _ => false,
        }
    }

    /// Stable short name, used for metric labels and API error codes.
    pub fn kind_name(&self) -> &'static str {
        match self {
            FtError::Configuration(_) => "configuration",
            FtError::InsufficientFunds { .. } => "insufficient_funds",
            FtError::InsufficientTokenBalance { .. } => "insufficient_token_balance",
            FtError::UnsupportedCardinality { .. } => "unsupported_cardinality",
            FtError::OracleUnreachable { .. } => "oracle_unreachable",
            FtError::OracleRejected { .. } => "oracle_rejected",
            FtError::BroadcastRejected(_) => "broadcast_rejected",
            FtError::MalformedMetadata(_) => "malformed_metadata",
            FtError::Persistence(_) => "persistence",
            FtError::Ledger(_) => "ledger",
            FtError::UnknownGenesis(_) => "unknown_genesis",
            FtError::InvalidAddress(_) => "invalid_address",
            FtError::InvalidKey(_) => "invalid_key",
            FtError::InvalidRequest(_) => "invalid_request",
            FtError::TransferIncomplete { .. } => "transfer_incomplete",
        }
    }

    /// True when the caller, not the service, is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            FtError::InsufficientTokenBalance { .. }
                | FtError::UnsupportedCardinality { .. }
                | FtError::UnknownGenesis(_)
                | FtError::InvalidAddress(_)
                | FtError::InvalidKey(_)
                | FtError::InvalidRequest(_)
        )
    }
}

impl From<sled::Error> for FtError {
    fn from(err: sled::Error) -> Self {
        FtError::Persistence(err.to_string())
    }
}

impl From<bincode::Error> for FtError {
    fn from(err: bincode::Error) -> Self {
        FtError::Persistence(format!("serialization: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_classifies_chain_too_long() {
        let r = Rejection::new("258: txn-mempool-conflict too-long-mempool-chain");
        assert_eq!(r.kind(), RejectionKind::MempoolChainTooLong);
        assert_eq!(Rejection::new("bad-txns-inputs-spent").kind(), RejectionKind::Other);
    }

    #[test]
    fn chain_too_long_seen_through_transfer_incomplete() {
        let inner = FtError::BroadcastRejected(Rejection::new("too-long-mempool-chain"));
        let err = FtError::TransferIncomplete {
            route_check_txid: TxId::from_bytes([7u8; 32]),
            source: Box::new(inner),
        };
        assert!(err.is_mempool_chain_too_long());
        assert_eq!(err.kind_name(), "transfer_incomplete");
    }

    #[test]
    fn test_display_carries_amounts() {
        let err = FtError::InsufficientFunds { required: 1000, available: 10 };
        let text = err.to_string();
        assert!(text.contains("1000"));
        assert!(text.contains("10"));
        assert!(!err.is_client_error());
    }
}
