//! # Oracle Attestations
//!
//! Token lineage cannot be checked by a verifier script alone: a script sees
//! the transaction spending it, not the history behind it. Independent
//! oracles fill the gap by signing statements of the form "output X was
//! spent by transaction Y" (or "output X exists"), and verifiers check those
//! Rabin signatures on chain.
//!
//! - **types** — the fixed-width signature type and the attestation record.
//! - **client** — the `OracleEndpoint` seam, the coordinating
//!   `OracleSignatureClient`, and packing into verifier argument arrays.
//! - **http** — satotx-style HTTP signers.

pub mod client;
pub mod http;
pub mod types;

pub use client::{AttestationPair, OracleEndpoint, OracleSignatureClient, PackedAttestations};
pub use http::SatotxEndpoint;
pub use types::{OracleAttestation, OutputRef, RabinSignature, SpendingTxRef};
