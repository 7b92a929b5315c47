//! # Token Scripts
//!
//! The on-chain data model of the fungible token protocol: the metadata
//! trailer every contract output carries, and the verifier templates those
//! outputs are built from.

pub mod metadata;
pub mod templates;

pub use metadata::{
    code_hash, code_part, contract_script, decode, encode, replace_metadata, MetadataKind,
    TokenId, TokenMetadata,
};
pub use templates::{RouteCheckVariant, VerifierCode, VerifierTemplates};
