//! # Addresses
//!
//! Base58check-encoded P2PKH addresses. An address is a network version
//! byte plus a 20-byte public key hash; the string form appends a 4-byte
//! double-SHA-256 checksum and runs the lot through base58.
//!
//! Parsing checks the network. A testnet address handed to a mainnet service
//! is rejected rather than silently accepted: tokens sent there would be
//! unspendable on the ledger we actually broadcast to.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::config::{Network, ADDRESS_HASH_LEN};
use crate::crypto::hash::double_sha256;
use crate::error::{FtError, FtResult};

/// Encode `payload` with a trailing 4-byte checksum, base58.
pub fn encode_check(payload: &[u8]) -> String {
    let checksum = double_sha256(payload);
    let mut data = Vec::with_capacity(payload.len() + 4);
    data.extend_from_slice(payload);
    data.extend_from_slice(&checksum[..4]);
    bs58::encode(data).into_string()
}

/// Decode a base58check string and verify its checksum. Returns the payload
/// without the checksum.
pub fn decode_check(encoded: &str) -> Option<Vec<u8>> {
    let data = bs58::decode(encoded).into_vec().ok()?;
    if data.len() < 5 {
        return None;
    }
    let (payload, checksum) = data.split_at(data.len() - 4);
    if double_sha256(payload)[..4] != *checksum {
        return None;
    }
    Some(payload.to_vec())
}

/// A P2PKH address on a specific network.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    network: Network,
    hash: [u8; ADDRESS_HASH_LEN],
}

impl Address {
    pub fn from_pubkey_hash(network: Network, hash: [u8; ADDRESS_HASH_LEN]) -> Self {
        Self { network, hash }
    }

    /// Parse any well-formed address regardless of network.
    pub fn parse(encoded: &str) -> FtResult<Self> {
        let payload = decode_check(encoded.trim())
            .ok_or_else(|| FtError::InvalidAddress(format!("{}: bad base58check", encoded)))?;
        if payload.len() != 1 + ADDRESS_HASH_LEN {
            return Err(FtError::InvalidAddress(format!(
                "{}: expected {} byte payload, got {}",
                encoded,
                1 + ADDRESS_HASH_LEN,
                payload.len()
            )));
        }
        let network = Network::from_address_version(payload[0]).ok_or_else(|| {
            FtError::InvalidAddress(format!("{}: unknown version byte {:#04x}", encoded, payload[0]))
        })?;
        let mut hash = [0u8; ADDRESS_HASH_LEN];
        hash.copy_from_slice(&payload[1..]);
        Ok(Self { network, hash })
    }

    /// Parse and require a specific network.
    pub fn parse_for(encoded: &str, network: Network) -> FtResult<Self> {
        let address = Self::parse(encoded)?;
        if address.network != network {
            return Err(FtError::InvalidAddress(format!(
                "{} is a {} address, service runs on {}",
                encoded, address.network, network
            )));
        }
        Ok(address)
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// The 20-byte public key hash.
    pub fn hash(&self) -> &[u8; ADDRESS_HASH_LEN] {
        &self.hash
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut payload = Vec::with_capacity(1 + ADDRESS_HASH_LEN);
        payload.push(self.network.address_version());
        payload.extend_from_slice(&self.hash);
        f.write_str(&encode_check(&payload))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = FtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
