//! # Protocol Configuration & Constants
//!
//! Every magic number of the token protocol lives here. The trailer widths,
//! the oracle quorum, the fee heuristics: if a number shows up in a locking
//! script or a fee calculation, it is defined in this file and nowhere else.
//!
//! The second half of the module is the runtime [`ServiceConfig`]: the
//! knobs an operator actually turns (network, fee rate, oracle roster,
//! endpoints, verifier templates). The node binary loads it from TOML; tests
//! build it by hand.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{FtError, FtResult};

// ---------------------------------------------------------------------------
// Network Identifiers
// ---------------------------------------------------------------------------

/// Which ledger the service talks to. Address and WIF version bytes differ
/// between the two, everything else is identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    /// Version byte prepended to a P2PKH address payload.
    pub fn address_version(self) -> u8 {
        match self {
            Network::Mainnet => MAINNET_ADDRESS_VERSION,
            Network::Testnet => TESTNET_ADDRESS_VERSION,
        }
    }

    /// Version byte prepended to a WIF private key payload.
    pub fn wif_version(self) -> u8 {
        match self {
            Network::Mainnet => MAINNET_WIF_VERSION,
            Network::Testnet => TESTNET_WIF_VERSION,
        }
    }

    /// Inverse of [`address_version`](Self::address_version).
    pub fn from_address_version(version: u8) -> Option<Self> {
        match version {
            MAINNET_ADDRESS_VERSION => Some(Network::Mainnet),
            TESTNET_ADDRESS_VERSION => Some(Network::Testnet),
            _ => None,
        }
    }

    /// Inverse of [`wif_version`](Self::wif_version).
    pub fn from_wif_version(version: u8) -> Option<Self> {
        match version {
            MAINNET_WIF_VERSION => Some(Network::Mainnet),
            TESTNET_WIF_VERSION => Some(Network::Testnet),
            _ => None,
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Testnet => write!(f, "testnet"),
        }
    }
}

impl std::str::FromStr for Network {
    type Err = FtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            other => Err(FtError::Configuration(format!("unknown network {:?}", other))),
        }
    }
}

pub const MAINNET_ADDRESS_VERSION: u8 = 0x00;
pub const TESTNET_ADDRESS_VERSION: u8 = 0x6f;
pub const MAINNET_WIF_VERSION: u8 = 0x80;
pub const TESTNET_WIF_VERSION: u8 = 0xef;

// ---------------------------------------------------------------------------
// Token Metadata Layout
// ---------------------------------------------------------------------------

/// The 8-byte tag closing every contract trailer. Anything else is not ours.
pub const PROTOCOL_TAG: &[u8; 8] = b"sensible";

/// Token type written into the trailer. Only fungible tokens exist here.
pub const TOKEN_TYPE_FUNGIBLE: u32 = 1;

pub const CODE_HASH_LEN: usize = 20;
pub const TOKEN_NAME_LEN: usize = 20;
pub const TOKEN_SYMBOL_LEN: usize = 10;
pub const DECIMALS_LEN: usize = 1;
pub const ADDRESS_HASH_LEN: usize = 20;
pub const TOKEN_AMOUNT_LEN: usize = 8;
/// Reversed 32-byte txid followed by a little-endian 4-byte output index.
pub const TOKEN_ID_LEN: usize = 36;
pub const GENESIS_FLAG_LEN: usize = 1;
pub const TOKEN_TYPE_LEN: usize = 4;
pub const PROTOCOL_TAG_LEN: usize = 8;

/// Trailer width of a genesis output: no verifier code hash.
pub const GENESIS_TRAILER_LEN: usize = TOKEN_NAME_LEN
    + TOKEN_SYMBOL_LEN
    + DECIMALS_LEN
    + ADDRESS_HASH_LEN
    + TOKEN_AMOUNT_LEN
    + TOKEN_ID_LEN
    + GENESIS_FLAG_LEN
    + TOKEN_TYPE_LEN
    + PROTOCOL_TAG_LEN;

/// Trailer width of a token output: genesis layout plus the verifier code hash.
pub const TOKEN_TRAILER_LEN: usize = CODE_HASH_LEN + GENESIS_TRAILER_LEN;

// ---------------------------------------------------------------------------
// Oracle Parameters
// ---------------------------------------------------------------------------

/// Number of oracles configured in the roster.
pub const ORACLE_ROSTER_SIZE: usize = 3;

/// Number of oracles whose signatures every proof carries.
pub const ORACLE_QUORUM: usize = 2;

/// Rabin signatures are serialized into proofs at exactly this width.
pub const RABIN_SIG_LEN: usize = 128;

// ---------------------------------------------------------------------------
// Ledger & Fee Parameters
// ---------------------------------------------------------------------------

/// SIGHASH_ALL | SIGHASH_FORKID.
pub const SIGHASH_ALL_FORKID: u32 = 0x41;

/// Sequence number used on every input we create.
pub const DEFAULT_SEQUENCE: u32 = 0xffff_ffff;

pub const TX_VERSION: u32 = 1;

/// Size assumed for a signed P2PKH input when estimating fees.
pub const P2PKH_INPUT_SIZE: u64 = 148;

/// Length of a P2PKH locking script.
pub const P2PKH_SCRIPT_LEN: usize = 25;

/// Default fee rate in satoshis per byte.
pub const DEFAULT_FEE_RATE: f64 = 0.5;

/// Extra bytes charged per token input and per token output. Contract
/// unlocking scripts are huge and the estimator never sees them.
pub const DEFAULT_TOKEN_IO_SIZE: u64 = 3840;

/// Size hints used to size funding reservations before the transaction
/// exists. Deliberately generous; surplus comes back as change.
pub const GENESIS_SIZE_HINT: u64 = 4200;
pub const ISSUE_SIZE_HINT: u64 = 16_000;
pub const ROUTE_CHECK_SIZE_HINT: u64 = 8_000;
pub const TRANSFER_SIZE_HINT: u64 = 24_000;

/// Rejection substring meaning the ledger refused an over-long unconfirmed
/// ancestor chain. Utxos hit by it are deprioritized, not discarded.
pub const MEMPOOL_CHAIN_TOO_LONG: &str = "too-long-mempool-chain";

/// Below this many available funding utxos the replenisher raises an alarm.
pub const DEFAULT_POOL_FLOOR: usize = 5;

// ---------------------------------------------------------------------------
// Runtime Configuration
// ---------------------------------------------------------------------------

/// One member of the oracle roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Base URL of the signer, e.g. `https://oracle-1.example`.
    pub api_prefix: String,
}

/// Hex-encoded verifier code used to instantiate contract scripts.
///
/// These are opaque byte strings: the service never interprets them, it only
/// hashes them and concatenates trailers onto them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub genesis: String,
    pub token: String,
    pub route_check_3_to_3: String,
    pub route_check_6_to_6: String,
    pub route_check_10_to_10: String,
    pub route_check_3_to_100: String,
    pub route_check_20_to_3: String,
}

/// Everything the fungible token service needs to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub network: Network,

    /// Satoshis per byte.
    #[serde(default = "default_fee_rate")]
    pub fee_rate: f64,

    #[serde(default = "default_token_io_size")]
    pub token_io_size: u64,

    /// WIF of the issuer key. Also pays for and receives change of every
    /// transaction the service builds.
    pub issuer_wif: String,

    /// Base URL of the ledger API.
    pub ledger_api: String,

    /// Exactly three oracle endpoints.
    pub oracles: Vec<OracleConfig>,

    /// The two roster positions used for every proof.
    #[serde(default = "default_selected_oracles")]
    pub selected_oracles: [usize; ORACLE_QUORUM],

    pub templates: TemplateConfig,

    /// Directory of the sled database.
    pub db_path: PathBuf,

    #[serde(default = "default_pool_floor")]
    pub pool_floor: usize,
}

fn default_fee_rate() -> f64 {
    DEFAULT_FEE_RATE
}

fn default_token_io_size() -> u64 {
    DEFAULT_TOKEN_IO_SIZE
}

fn default_selected_oracles() -> [usize; ORACLE_QUORUM] {
    [0, 1]
}

fn default_pool_floor() -> usize {
    DEFAULT_POOL_FLOOR
}

impl ServiceConfig {
    /// Reject configurations that would only fail later, mid-transaction.
    pub fn validate(&self) -> FtResult<()> {
        if !self.fee_rate.is_finite() || self.fee_rate < 0.0 {
            return Err(FtError::Configuration(format!(
                "fee rate must be a non-negative number, got {}",
                self.fee_rate
            )));
        }
        if self.oracles.len() != ORACLE_ROSTER_SIZE {
            return Err(FtError::Configuration(format!(
                "oracle roster must have exactly {} entries, got {}",
                ORACLE_ROSTER_SIZE,
                self.oracles.len()
            )));
        }
        validate_oracle_selection(&self.selected_oracles, self.oracles.len())?;
        if self.ledger_api.trim().is_empty() {
            return Err(FtError::Configuration("ledger_api is empty".into()));
        }
        Ok(())
    }
}

/// Selected oracle positions must be distinct and inside the roster.
pub fn validate_oracle_selection(selected: &[usize; ORACLE_QUORUM], roster_len: usize) -> FtResult<()> {
    for &index in selected {
        if index >= roster_len {
            return Err(FtError::Configuration(format!(
                "selected oracle {} is outside the roster of {}",
                index, roster_len
            )));
        }
    }
    if selected[0] == selected[1] {
        return Err(FtError::Configuration(format!(
            "selected oracles must be distinct, got {:?}",
            selected
        )));
    }
    Ok(())
}
