//! # Key Management
//!
//! secp256k1 keys for the issuer and for token senders.
//!
//! A [`SigningContext`] is what the transaction builder holds while it signs:
//! the private key, the network it was imported for, and the derived public
//! key and address. Keys arrive as WIF strings (that is what operators paste
//! into configs and what callers send with a transfer) and never leave the
//! process in any form.
//!
//! ## Security considerations
//!
//! - Signatures are RFC6979 deterministic and normalized to low-S, which
//!   the ledger requires for standardness.
//! - Key bytes are never logged. `Debug` prints the address only.

use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use std::fmt;
use thiserror::Error;

use crate::config::{Network, SIGHASH_ALL_FORKID};
use crate::crypto::address::{decode_check, encode_check, Address};
use crate::crypto::hash::hash160;
use crate::error::FtError;

/// Errors that can occur during key operations.
///
/// Intentionally vague about the key material itself.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("malformed WIF string")]
    MalformedWif,

    #[error("unknown WIF version byte {0:#04x}")]
    UnknownNetwork(u8),

    #[error("invalid secret key: not a valid secp256k1 scalar")]
    InvalidSecretKey,

    #[error("signing failed: {0}")]
    SigningFailed(String),
}

impl From<KeyError> for FtError {
    fn from(err: KeyError) -> Self {
        FtError::InvalidKey(err.to_string())
    }
}

/// A secp256k1 private key bound to a network.
///
/// # Examples
///
/// ```
/// use sft_protocol::config::Network;
/// use sft_protocol::crypto::keys::SigningContext;
///
/// let ctx = SigningContext::generate(Network::Testnet);
/// let again = SigningContext::from_wif(&ctx.to_wif()).unwrap();
/// assert_eq!(ctx.address(), again.address());
/// ```
#[derive(Clone)]
pub struct SigningContext {
    key: SigningKey,
    network: Network,
    public_key: [u8; 33],
    pubkey_hash: [u8; 20],
}

impl SigningContext {
    /// Fresh key from the OS RNG.
    pub fn generate(network: Network) -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng), network)
    }

    /// Import a compressed-key WIF. The network is taken from the version byte.
    pub fn from_wif(wif: &str) -> Result<Self, KeyError> {
        let payload = decode_check(wif.trim()).ok_or(KeyError::MalformedWif)?;
        // version(1) + key(32) + compression flag(1)
        if payload.len() != 34 || payload[33] != 0x01 {
            return Err(KeyError::MalformedWif);
        }
        let network =
            Network::from_wif_version(payload[0]).ok_or(KeyError::UnknownNetwork(payload[0]))?;
        let key = SigningKey::from_slice(&payload[1..33]).map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_signing_key(key, network))
    }

    /// Import from raw secret bytes.
    pub fn from_secret_bytes(bytes: &[u8; 32], network: Network) -> Result<Self, KeyError> {
        let key = SigningKey::from_slice(bytes).map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_signing_key(key, network))
    }

    fn from_signing_key(key: SigningKey, network: Network) -> Self {
        let mut public_key = [0u8; 33];
        public_key.copy_from_slice(key.verifying_key().to_encoded_point(true).as_bytes());
        let pubkey_hash = hash160(&public_key);
        Self { key, network, public_key, pubkey_hash }
    }

    /// Export as a compressed-key WIF.
    pub fn to_wif(&self) -> String {
        let mut payload = Vec::with_capacity(34);
        payload.push(self.network.wif_version());
        payload.extend_from_slice(&self.key.to_bytes());
        payload.push(0x01);
        encode_check(&payload)
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// SEC1 compressed public key.
    pub fn public_key(&self) -> &[u8; 33] {
        &self.public_key
    }

    pub fn pubkey_hash(&self) -> &[u8; 20] {
        &self.pubkey_hash
    }

    pub fn address(&self) -> Address {
        Address::from_pubkey_hash(self.network, self.pubkey_hash)
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        self.key.verifying_key()
    }

    /// Sign a 32-byte sighash digest. Returns the DER signature followed by
    /// the sighash type byte, ready to push into an unlocking script.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<Vec<u8>, KeyError> {
        let signature: Signature = self
            .key
            .sign_prehash(digest)
            .map_err(|e| KeyError::SigningFailed(e.to_string()))?;
        let signature = signature.normalize_s().unwrap_or(signature);
        let mut out = signature.to_der().as_bytes().to_vec();
        out.push(SIGHASH_ALL_FORKID as u8);
        Ok(out)
    }
}

impl fmt::Debug for SigningContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningContext")
            .field("address", &self.address().to_string())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::signature::hazmat::PrehashVerifier;

    const KEY_ONE_WIF: &str = "KwDiBf89QgGbjEhKnhXJuH7LrciVrZi3qYjgd9M7rFU73sVHnoWn";

    #[test]
    fn test_known_wif_imports() {
        let ctx = SigningContext::from_wif(KEY_ONE_WIF).unwrap();
        assert_eq!(ctx.network(), Network::Mainnet);
        assert_eq!(ctx.address().to_string(), "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH");
        assert_eq!(ctx.to_wif(), KEY_ONE_WIF);
    }

    #[test]
    fn test_secret_bytes_match_wif() {
        let mut secret = [0u8; 32];
        secret[31] = 1;
        let ctx = SigningContext::from_secret_bytes(&secret, Network::Mainnet).unwrap();
        assert_eq!(ctx.to_wif(), KEY_ONE_WIF);
    }

    #[test]
    fn test_garbage_wif_rejected() {
        assert!(matches!(SigningContext::from_wif("not-a-key"), Err(KeyError::MalformedWif)));
    }

    #[test]
    fn test_zero_scalar_rejected() {
        assert!(SigningContext::from_secret_bytes(&[0u8; 32], Network::Testnet).is_err());
    }

    #[test]
    fn signature_verifies_and_carries_sighash_byte() {
        let ctx = SigningContext::generate(Network::Testnet);
        let digest = crate::crypto::double_sha256(b"preimage");
        let sig = ctx.sign_digest(&digest).unwrap();
        assert_eq!(*sig.last().unwrap(), 0x41);
        let der = Signature::from_der(&sig[..sig.len() - 1]).unwrap();
        assert!(der.normalize_s().is_none(), "signature should already be low-S");
        ctx.verifying_key().verify_prehash(&digest, &der).unwrap();
    }

    #[test]
    fn debug_hides_secret() {
        let ctx = SigningContext::from_wif(KEY_ONE_WIF).unwrap();
        let text = format!("{:?}", ctx);
        assert!(text.contains("1BgGZ9"));
        assert!(!text.contains(KEY_ONE_WIF));
    }
}
