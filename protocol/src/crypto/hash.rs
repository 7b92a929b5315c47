//! # Hashing Utilities
//!
//! The three digests the ledger speaks:
//!
//! - **SHA-256** for signature preimage components.
//! - **double SHA-256** for transaction ids and sighash digests.
//! - **HASH160** (RIPEMD-160 over SHA-256) for address hashes and verifier
//!   code hashes.
//!
//! All of them return fixed-size arrays. Callers that want a `Vec` can call
//! `.to_vec()`; most of them don't.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// SHA-256 of the input.
///
/// # Example
///
/// ```
/// use sft_protocol::crypto::sha256;
///
/// let hash = sha256(b"sensible");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut output = [0u8; 32];
    output.copy_from_slice(&Sha256::digest(data));
    output
}

/// SHA-256 applied twice. Transaction ids and BIP143 digests use this.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// RIPEMD-160 of SHA-256. 20 bytes, the size of every address hash and
/// every verifier code hash in a trailer.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let mut output = [0u8; 20];
    output.copy_from_slice(&Ripemd160::digest(sha256(data)));
    output
}

/// Double SHA-256 over the concatenation of several slices, without
/// building the concatenation first.
pub fn double_sha256_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let mut first = [0u8; 32];
    first.copy_from_slice(&hasher.finalize());
    sha256(&first)
}
