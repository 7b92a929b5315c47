//! Verifier templates and the route-check ladder.
//!
//! A template is opaque verifier bytecode supplied by configuration. The
//! service never looks inside; it prefixes constructor data where a
//! contract needs it, appends trailers, and hashes the result.

use std::fmt;

use crate::config::TemplateConfig;
use crate::crypto::hash::hash160;
use crate::error::{FtError, FtResult};
use crate::ledger::script::ScriptBuilder;

// ---------------------------------------------------------------------------
// Route-check variants
// ---------------------------------------------------------------------------

/// Route-check verifier sizes, named by (max token inputs, max token outputs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteCheckVariant {
    In3Out3,
    In6Out6,
    In10Out10,
    In3Out100,
    In20Out3,
}

impl RouteCheckVariant {
    /// Tried in this order; the first that fits wins.
    pub const LADDER: [RouteCheckVariant; 5] = [
        RouteCheckVariant::In3Out3,
        RouteCheckVariant::In6Out6,
        RouteCheckVariant::In10Out10,
        RouteCheckVariant::In3Out100,
        RouteCheckVariant::In20Out3,
    ];

    /// (max inputs, max outputs)
    pub fn capacity(self) -> (usize, usize) {
        match self {
            RouteCheckVariant::In3Out3 => (3, 3),
            RouteCheckVariant::In6Out6 => (6, 6),
            RouteCheckVariant::In10Out10 => (10, 10),
            RouteCheckVariant::In3Out100 => (3, 100),
            RouteCheckVariant::In20Out3 => (20, 3),
        }
    }

    pub fn fits(self, inputs: usize, outputs: usize) -> bool {
        let (max_in, max_out) = self.capacity();
        inputs <= max_in && outputs <= max_out
    }

    /// First variant on the ladder accommodating `inputs` token inputs and
    /// `outputs` token outputs (change output included).
    pub fn select(inputs: usize, outputs: usize) -> FtResult<Self> {
        Self::LADDER
            .into_iter()
            .find(|v| v.fits(inputs, outputs))
            .ok_or(FtError::UnsupportedCardinality { inputs, outputs })
    }

    fn position(self) -> usize {
        match self {
            RouteCheckVariant::In3Out3 => 0,
            RouteCheckVariant::In6Out6 => 1,
            RouteCheckVariant::In10Out10 => 2,
            RouteCheckVariant::In3Out100 => 3,
            RouteCheckVariant::In20Out3 => 4,
        }
    }
}

impl fmt::Display for RouteCheckVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (i, o) = self.capacity();
        write!(f, "{}to{}", i, o)
    }
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// A piece of verifier bytecode and its HASH160.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierCode {
    code: Vec<u8>,
    hash: [u8; 20],
}

impl VerifierCode {
    pub fn new(code: Vec<u8>) -> Self {
        let hash = hash160(&code);
        Self { code, hash }
    }

    fn from_hex(field: &str, s: &str) -> FtResult<Self> {
        let code = hex::decode(s.trim())
            .map_err(|e| FtError::Configuration(format!("template {}: {}", field, e)))?;
        if code.is_empty() {
            return Err(FtError::Configuration(format!("template {} is empty", field)));
        }
        Ok(Self::new(code))
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn hash(&self) -> &[u8; 20] {
        &self.hash
    }

    /// Template with constructor parameters pushed in front.
    pub fn instantiate(&self, params: &[&[u8]]) -> Vec<u8> {
        let mut builder = ScriptBuilder::new();
        for p in params {
            builder = builder.push(p);
        }
        builder.raw(&self.code).into_bytes()
    }
}

/// The full set of verifier templates the service builds scripts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierTemplates {
    genesis: VerifierCode,
    token: VerifierCode,
    route_checks: [VerifierCode; 5],
}

impl VerifierTemplates {
    pub fn new(genesis: Vec<u8>, token: Vec<u8>, route_checks: [Vec<u8>; 5]) -> Self {
        Self {
            genesis: VerifierCode::new(genesis),
            token: VerifierCode::new(token),
            route_checks: route_checks.map(VerifierCode::new),
        }
    }

    pub fn from_config(cfg: &TemplateConfig) -> FtResult<Self> {
        Ok(Self {
            genesis: VerifierCode::from_hex("genesis", &cfg.genesis)?,
            token: VerifierCode::from_hex("token", &cfg.token)?,
            route_checks: [
                VerifierCode::from_hex("route_check_3_to_3", &cfg.route_check_3_to_3)?,
                VerifierCode::from_hex("route_check_6_to_6", &cfg.route_check_6_to_6)?,
                VerifierCode::from_hex("route_check_10_to_10", &cfg.route_check_10_to_10)?,
                VerifierCode::from_hex("route_check_3_to_100", &cfg.route_check_3_to_100)?,
                VerifierCode::from_hex("route_check_20_to_3", &cfg.route_check_20_to_3)?,
            ],
        })
    }

    pub fn genesis(&self) -> &VerifierCode {
        &self.genesis
    }

    pub fn token(&self) -> &VerifierCode {
        &self.token
    }

    pub fn route_check(&self, variant: RouteCheckVariant) -> &VerifierCode {
        &self.route_checks[variant.position()]
    }
}
