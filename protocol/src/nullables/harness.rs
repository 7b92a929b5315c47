//! A service wired entirely to nullables.

use std::path::PathBuf;
use std::sync::Arc;

use super::{templates, MemoryStore, NullLedger, NullOracle};
use crate::config::{
    Network, OracleConfig, ServiceConfig, TemplateConfig, DEFAULT_TOKEN_IO_SIZE,
};
use crate::crypto::SigningContext;
use crate::error::FtResult;
use crate::ft::{Collaborators, FungibleTokenService};
use crate::token::RouteCheckVariant;
use crate::utxo::FundingUtxo;

/// A testnet config for `issuer`. Endpoints point nowhere; templates match
/// [`templates()`].
pub fn service_config(issuer: &SigningContext) -> ServiceConfig {
    let t = templates();
    let route = |v| hex::encode(t.route_check(v).code());
    ServiceConfig {
        network: issuer.network(),
        fee_rate: 0.5,
        token_io_size: DEFAULT_TOKEN_IO_SIZE,
        issuer_wif: issuer.to_wif(),
        ledger_api: "http://127.0.0.1:9".into(),
        oracles: (0..3).map(|i| OracleConfig { api_prefix: format!("http://127.0.0.1:9/{}", i) }).collect(),
        selected_oracles: [0, 1],
        templates: TemplateConfig {
            genesis: hex::encode(t.genesis().code()),
            token: hex::encode(t.token().code()),
            route_check_3_to_3: route(RouteCheckVariant::In3Out3),
            route_check_6_to_6: route(RouteCheckVariant::In6Out6),
            route_check_10_to_10: route(RouteCheckVariant::In10Out10),
            route_check_3_to_100: route(RouteCheckVariant::In3Out100),
            route_check_20_to_3: route(RouteCheckVariant::In20Out3),
        },
        db_path: PathBuf::from("unused"),
        pool_floor: 1,
    }
}

/// Service plus handles on every nullable behind it.
pub struct Harness {
    pub service: FungibleTokenService,
    pub issuer: SigningContext,
    pub ledger: Arc<NullLedger>,
    pub oracles: Vec<Arc<NullOracle>>,
    pub store: Arc<MemoryStore>,
}

impl Harness {
    /// A testnet service with an empty funding pool.
    pub fn new() -> FtResult<Self> {
        Self::with_store(Arc::new(MemoryStore::new()), SigningContext::generate(Network::Testnet))
    }

    /// A service over an existing store and issuer, as after a restart.
    pub fn with_store(store: Arc<MemoryStore>, issuer: SigningContext) -> FtResult<Self> {
        let ledger = Arc::new(NullLedger::new());
        let (roster, oracles) = NullOracle::roster();
        let service = FungibleTokenService::with_collaborators(
            &service_config(&issuer),
            Collaborators {
                ledger: ledger.clone(),
                oracles: roster,
                templates: templates(),
                funding_store: store.clone(),
                token_store: store.clone(),
                issuers: store.clone(),
            },
        )?;
        Ok(Self { service, issuer, ledger, oracles, store })
    }

    /// Pay `values` to the issuer on the null ledger and deposit the outputs.
    pub fn fund(&self, values: &[u64]) -> FtResult<Vec<FundingUtxo>> {
        let utxos = self.ledger.fund(self.issuer.pubkey_hash(), values);
        self.service.deposit_funding(utxos.clone())?;
        Ok(utxos)
    }
}
