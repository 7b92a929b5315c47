//! # Cryptographic Primitives
//!
//! The ledger fixes our choices here: secp256k1 ECDSA for signatures,
//! double SHA-256 for ids and sighash digests, HASH160 for addresses and
//! code hashes, base58check for the human-facing encodings.
//!
//! Everything is a thin wrapper around audited RustCrypto implementations.
//! Nothing in this module knows about tokens.

pub mod address;
pub mod hash;
pub mod keys;

pub use address::Address;
pub use hash::{double_sha256, hash160, sha256};
pub use keys::{KeyError, SigningContext};
