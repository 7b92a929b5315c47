//! # Storage Module
//!
//! Durable state for the service: leased utxos and issuer records, in a
//! sled database.
//!
//! ```text
//! db.rs — FtDb: sled trees, bincode values, the two store traits
//! ```
//!
//! Bincode for on-disk serialization: compact, fast, deterministic. JSON is
//! for the API.

pub mod db;

pub use db::{DbError, DbResult, FtDb};
