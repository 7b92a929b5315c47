//! # Fungible Token Service
//!
//! The three operations the outside world sees: `genesis`, `issue` and
//! `transfer`. Each one follows the same discipline:
//!
//! 1. Validate caller input. Nothing is reserved yet.
//! 2. Gather oracle attestations. Still nothing reserved for issues; token
//!    inputs are held for transfers since the attestations are about them.
//! 3. Reserve funding, build, broadcast, then persist what the transaction
//!    created. The lease manager settles the reservation on every exit path.
//!
//! A transfer is two transactions: the route check, then the transfer that
//! spends it. Once the route check is on the ledger there is no undoing it,
//! so a failure in the second phase is reported as `TransferIncomplete`.
//!
//! ## Concurrency
//!
//! Operations run concurrently. They share the funding pool (leased) and
//! per-owner token pools (leased). Issues against one genesis id are
//! serialized by a per-genesis async lock: every issue spends the output the
//! previous one created.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::builder::{check_same_token, BuiltTransaction, Payee, TransactionBuilder};
use crate::config::{Network, ServiceConfig, ADDRESS_HASH_LEN};
use crate::crypto::{Address, SigningContext};
use crate::error::{FtError, FtResult};
use crate::ledger::{FeePolicy, FeeRate, HttpLedgerClient, LedgerClient, OutPoint, TxId};
use crate::oracle::{AttestationPair, OracleEndpoint, OracleSignatureClient, SatotxEndpoint};
use crate::storage::FtDb;
use crate::token::{decode, RouteCheckVariant, VerifierTemplates};
use crate::utxo::{
    token_owner_key, FloorAlert, FundingUtxo, IssuerRecord, IssuerRecordStore, IssuerUpdate,
    LeasedUtxo, Lineage, PersistedUtxoStore, PoolReplenisher, Shortfall, TokenUtxo, UtxoLeaseManager,
};

// ---------------------------------------------------------------------------
// Requests and receipts
// ---------------------------------------------------------------------------

/// One requested transfer output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receiver {
    pub address: String,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenesisReceipt {
    pub genesis_id: TxId,
    pub fee: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueReceipt {
    pub transaction_id: TxId,
    /// Output index of the minted token.
    pub token_index: u32,
    /// Whether a renewed genesis output allows further issues.
    pub genesis_renewed: bool,
    pub fee: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReceipt {
    pub transaction_id: TxId,
    pub route_check_id: TxId,
    /// Token outputs created, implicit change included.
    pub outputs: usize,
    /// Fees of both transactions.
    pub fee: u64,
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// The external collaborators of the service.
pub struct Collaborators {
    pub ledger: Arc<dyn LedgerClient>,
    /// The full oracle roster, in roster order.
    pub oracles: Vec<Arc<dyn OracleEndpoint>>,
    pub templates: VerifierTemplates,
    pub funding_store: Arc<dyn PersistedUtxoStore<FundingUtxo>>,
    pub token_store: Arc<dyn PersistedUtxoStore<TokenUtxo>>,
    pub issuers: Arc<dyn IssuerRecordStore>,
}

impl Collaborators {
    /// Production collaborators: sled at `db_path`, HTTP ledger and oracles.
    pub fn from_config(config: &ServiceConfig) -> FtResult<Self> {
        let db = Arc::new(FtDb::open(&config.db_path)?);
        let oracles = config
            .oracles
            .iter()
            .enumerate()
            .map(|(index, oracle)| {
                Ok(Arc::new(SatotxEndpoint::new(&oracle.api_prefix, index)?) as Arc<dyn OracleEndpoint>)
            })
            .collect::<FtResult<Vec<_>>>()?;
        Ok(Self {
            ledger: Arc::new(HttpLedgerClient::new(&config.ledger_api)?),
            oracles,
            templates: VerifierTemplates::from_config(&config.templates)?,
            funding_store: db.clone(),
            token_store: db.clone(),
            issuers: db,
        })
    }
}

/// Issues and transfers fungible tokens on behalf of one issuer key.
pub struct FungibleTokenService {
    network: Network,
    issuer: Arc<SigningContext>,
    builder: TransactionBuilder,
    ledger: Arc<dyn LedgerClient>,
    oracles: OracleSignatureClient,
    issuers: Arc<dyn IssuerRecordStore>,
    token_store: Arc<dyn PersistedUtxoStore<TokenUtxo>>,
    funding: UtxoLeaseManager<FundingUtxo>,
    token_pools: DashMap<String, Arc<UtxoLeaseManager<TokenUtxo>>>,
    issue_locks: DashMap<TxId, Arc<tokio::sync::Mutex<()>>>,
}

impl FungibleTokenService {
    /// Validate `config` and wire up the production collaborators.
    pub fn from_config(config: &ServiceConfig) -> FtResult<Self> {
        config.validate()?;
        Self::with_collaborators(config, Collaborators::from_config(config)?)
    }

    /// Wire the service to explicit collaborators. `config.templates`,
    /// `config.ledger_api` and `config.oracles` are ignored in favor of
    /// `collaborators`.
    pub fn with_collaborators(config: &ServiceConfig, collaborators: Collaborators) -> FtResult<Self> {
        let issuer = Arc::new(SigningContext::from_wif(&config.issuer_wif)?);
        if issuer.network() != config.network {
            return Err(FtError::Configuration(format!(
                "issuer key is for {}, service runs on {}",
                issuer.network(),
                config.network
            )));
        }
        let policy = FeePolicy::new(FeeRate::new(config.fee_rate)?, config.token_io_size);
        let oracles = OracleSignatureClient::new(collaborators.oracles, config.selected_oracles)?;
        let replenisher: Arc<dyn PoolReplenisher> = Arc::new(FloorAlert { floor: config.pool_floor });
        let funding = UtxoLeaseManager::load(
            issuer.address().to_string(),
            collaborators.funding_store,
            Shortfall::Funds,
        )?
        .with_replenisher(replenisher);

        info!(
            network = %config.network,
            issuer = %issuer.address(),
            funding_utxos = funding.available_len(),
            funding_value = funding.available_value(),
            "fungible token service ready"
        );

        Ok(Self {
            network: config.network,
            builder: TransactionBuilder::new(Arc::new(collaborators.templates), policy, issuer.clone()),
            issuer,
            ledger: collaborators.ledger,
            oracles,
            issuers: collaborators.issuers,
            token_store: collaborators.token_store,
            funding,
            token_pools: DashMap::new(),
            issue_locks: DashMap::new(),
        })
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Address of the issuer key, which also owns the funding pool.
    pub fn address(&self) -> Address {
        self.issuer.address()
    }

    pub fn funding_pool(&self) -> &UtxoLeaseManager<FundingUtxo> {
        &self.funding
    }

    /// Add externally created outputs paying the issuer address to the pool.
    pub fn deposit_funding(&self, utxos: Vec<FundingUtxo>) -> FtResult<()> {
        self.funding.deposit(utxos)
    }

    pub fn issuer_record(&self, genesis_id: &TxId) -> FtResult<IssuerRecord> {
        self.issuers
            .get(genesis_id)?
            .ok_or_else(|| FtError::UnknownGenesis(genesis_id.to_string()))
    }

    /// Unreserved token units held by `address` under `genesis_id`.
    ///
    /// Answered from the store when no pool is loaded for the owner, so
    /// balance queries never load pools.
    pub fn token_balance(&self, genesis_id: &TxId, address: &str) -> FtResult<u64> {
        let address = Address::parse_for(address, self.network)?;
        let key = token_owner_key(genesis_id, &address.to_string());
        if let Some(pool) = self.token_pools.get(&key) {
            return Ok(pool.available_value());
        }
        Ok(self.token_store.list(&key)?.iter().map(LeasedUtxo::lease_value).sum())
    }

    /// Number of token pools held in memory.
    pub fn loaded_token_pools(&self) -> usize {
        self.token_pools.len()
    }

    /// The pool is loaded while its map entry is held, so a concurrent
    /// `deposit_tokens` for the same owner waits until it can see the pool.
    fn token_pool(&self, genesis_id: &TxId, address: &str) -> FtResult<Arc<UtxoLeaseManager<TokenUtxo>>> {
        let key = token_owner_key(genesis_id, address);
        match self.token_pools.entry(key) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let pool = Arc::new(UtxoLeaseManager::load(
                    entry.key().clone(),
                    self.token_store.clone(),
                    Shortfall::TokenBalance,
                )?);
                entry.insert(pool.clone());
                Ok(pool)
            }
        }
    }

    /// Hand new token outputs to their owners' pools, or straight to the
    /// store for owners whose pool is not loaded.
    fn deposit_tokens(&self, genesis_id: &TxId, utxos: Vec<TokenUtxo>) -> FtResult<()> {
        let mut by_owner: BTreeMap<[u8; ADDRESS_HASH_LEN], Vec<TokenUtxo>> = BTreeMap::new();
        for utxo in utxos {
            by_owner.entry(utxo.metadata.owner).or_default().push(utxo);
        }
        for (owner, utxos) in by_owner {
            let address = Address::from_pubkey_hash(self.network, owner).to_string();
            let key = token_owner_key(genesis_id, &address);
            // Holding the entry keeps a concurrent pool load from missing
            // the store write.
            match self.token_pools.entry(key) {
                Entry::Occupied(pool) => pool.get().deposit(utxos)?,
                Entry::Vacant(entry) => self.token_store.insert(entry.key(), &utxos)?,
            }
        }
        Ok(())
    }

    fn deposit_change(&self, built: &BuiltTransaction) -> FtResult<()> {
        match &built.change {
            Some(change) => self.funding.deposit(vec![change.clone()]),
            None => Ok(()),
        }
    }

    async fn broadcast(&self, built: &BuiltTransaction) -> FtResult<TxId> {
        let reported = self.ledger.broadcast(&built.raw).await?;
        if reported != built.txid {
            warn!(computed = %built.txid, reported = %reported, "ledger reported a different txid");
        }
        info!(txid = %built.txid, fee = built.fee, size = built.raw.len(), "transaction broadcast");
        Ok(built.txid)
    }

    // -----------------------------------------------------------------------
    // Genesis
    // -----------------------------------------------------------------------

    /// Create a new token type. Its genesis id is the genesis transaction id.
    pub async fn genesis(&self, name: &str, symbol: &str, decimals: u8) -> FtResult<GenesisReceipt> {
        let script = self.builder.genesis_script(name, symbol, decimals)?;
        let estimate = self.builder.genesis_estimate(&script);

        let receipt = self
            .funding
            .with_reservation(estimate, |funding| async move {
                let source = funding
                    .first()
                    .map(|u| u.outpoint)
                    .ok_or_else(|| FtError::InsufficientFunds { required: estimate, available: 0 })?;
                let source_raw = self.ledger.get_raw_transaction(&source.txid).await?;

                let built = self.builder.genesis(&funding, script)?;
                self.broadcast(&built).await?;
                self.deposit_change(&built)?;

                let output = built.tx.output(0)?;
                let now = Utc::now();
                self.issuers.insert(&IssuerRecord {
                    genesis_id: built.txid,
                    name: name.to_string(),
                    symbol: symbol.to_string(),
                    decimals,
                    genesis_outpoint: OutPoint::new(built.txid, 0),
                    genesis_value: output.value,
                    genesis_script: output.script_pubkey.clone(),
                    lineage: Lineage {
                        raw_tx: built.raw.clone(),
                        prev_outpoint: source,
                        prev_raw_tx: source_raw,
                    },
                    issued: 0,
                    closed: false,
                    created_at: now,
                    updated_at: now,
                })?;
                Ok(GenesisReceipt { genesis_id: built.txid, fee: built.fee })
            })
            .await?;

        info!(genesis_id = %receipt.genesis_id, token_name = name, symbol, decimals, "token genesis created");
        Ok(receipt)
    }

    // -----------------------------------------------------------------------
    // Issue
    // -----------------------------------------------------------------------

    /// Mint `amount` new units to `recipient`. With `allow_further` unset
    /// the genesis contract is not renewed and the token is closed for
    /// issuance.
    ///
    /// The first issue has no lineage to prove, so its unlock carries the
    /// sentinel attestation. It still asks the selected oracles to attest
    /// that the genesis output exists unspent, and that answer gates the
    /// issue: an unreachable or refusing oracle aborts before any funding
    /// is reserved.
    pub async fn issue(
        &self,
        genesis_id: &TxId,
        amount: u64,
        recipient: &str,
        allow_further: bool,
    ) -> FtResult<IssueReceipt> {
        if amount == 0 {
            return Err(FtError::InvalidRequest("issue amount must be positive".into()));
        }
        let recipient = Address::parse_for(recipient, self.network)?;

        // Unknown ids never get a lock entry.
        self.issuer_record(genesis_id)?;
        let lock = self.issue_locks.entry(*genesis_id).or_default().clone();
        let _serialized = lock.lock().await;

        let record = self.issuer_record(genesis_id)?;
        if record.closed {
            return Err(FtError::InvalidRequest(format!("issuance of {} is closed", genesis_id)));
        }
        let issued = record.issued.checked_add(amount).ok_or_else(|| {
            FtError::InvalidRequest(format!("issuing {} would overflow the supply", amount))
        })?;

        let first_issue = decode(&record.genesis_script)?.token_id.is_placeholder();
        let attestation = if first_issue {
            // Availability gate only; the result is not part of the unlock.
            self.oracles.attest_existence(&record.genesis_ref()).await?;
            AttestationPair::sentinel(self.oracles.selected())
        } else {
            self.oracles
                .attest_spend(
                    &record.lineage.prev_ref(),
                    &record.lineage.spending_ref(record.genesis_outpoint.txid),
                )
                .await?
        };

        let estimate = self.builder.issue_estimate(&record, allow_further);
        let record = &record;
        let attestation = &attestation;
        let receipt = self
            .funding
            .with_reservation(estimate, |funding| async move {
                let issue = self.builder.issue(
                    record,
                    &funding,
                    attestation,
                    *recipient.hash(),
                    amount,
                    allow_further,
                )?;
                self.broadcast(&issue.built).await?;
                self.deposit_change(&issue.built)?;

                let genesis = issue
                    .genesis
                    .clone()
                    .map(|(outpoint, value, script)| (outpoint, value, script, issue.lineage.clone()));
                self.issuers.update(genesis_id, IssuerUpdate { genesis, issued })?;
                let token_index = issue.token.outpoint.index;
                self.deposit_tokens(genesis_id, vec![issue.token])?;

                Ok(IssueReceipt {
                    transaction_id: issue.built.txid,
                    token_index,
                    genesis_renewed: issue.genesis.is_some(),
                    fee: issue.built.fee,
                })
            })
            .await?;

        info!(
            genesis_id = %genesis_id,
            txid = %receipt.transaction_id,
            amount,
            recipient = %recipient,
            renewed = receipt.genesis_renewed,
            "tokens issued"
        );
        Ok(receipt)
    }

    // -----------------------------------------------------------------------
    // Transfer
    // -----------------------------------------------------------------------

    /// Move tokens from the holder of `sender_wif` to `receivers`. Any
    /// surplus of the selected inputs returns to the sender as change.
    pub async fn transfer(
        &self,
        genesis_id: &TxId,
        sender_wif: &str,
        receivers: &[Receiver],
    ) -> FtResult<TransferReceipt> {
        let sender = SigningContext::from_wif(sender_wif)?;
        if sender.network() != self.network {
            return Err(FtError::InvalidKey(format!(
                "sender key is for {}, service runs on {}",
                sender.network(),
                self.network
            )));
        }
        if receivers.is_empty() {
            return Err(FtError::InvalidRequest("transfer needs at least one receiver".into()));
        }
        let mut payees = Vec::with_capacity(receivers.len() + 1);
        let mut total = 0u64;
        for receiver in receivers {
            if receiver.amount == 0 {
                return Err(FtError::InvalidRequest(format!(
                    "amount for {} must be positive",
                    receiver.address
                )));
            }
            let address = Address::parse_for(&receiver.address, self.network)?;
            total = total
                .checked_add(receiver.amount)
                .ok_or_else(|| FtError::InvalidRequest("transfer total overflows".into()))?;
            payees.push(Payee { pubkey_hash: *address.hash(), amount: receiver.amount });
        }
        self.issuer_record(genesis_id)?;

        let pool = self.token_pool(genesis_id, &sender.address().to_string())?;
        let preview = pool.preview(total)?;
        let held: u64 = preview.iter().map(TokenUtxo::amount).sum();
        RouteCheckVariant::select(preview.len(), payees.len() + usize::from(held > total))?;

        let sender = &sender;
        let payees = &payees;
        let receipt = pool
            .with_reservation(total, |inputs| async move {
                self.transfer_reserved(genesis_id, sender, inputs, payees, total).await
            })
            .await?;

        info!(
            genesis_id = %genesis_id,
            txid = %receipt.transaction_id,
            route_check = %receipt.route_check_id,
            amount = total,
            outputs = receipt.outputs,
            "tokens transferred"
        );
        Ok(receipt)
    }

    async fn transfer_reserved(
        &self,
        genesis_id: &TxId,
        sender: &SigningContext,
        inputs: Vec<TokenUtxo>,
        requested: &[Payee],
        total: u64,
    ) -> FtResult<TransferReceipt> {
        let held: u64 = inputs.iter().map(TokenUtxo::amount).sum();
        let mut payees = requested.to_vec();
        if held > total {
            payees.push(Payee { pubkey_hash: *sender.pubkey_hash(), amount: held - total });
        }
        let variant = RouteCheckVariant::select(inputs.len(), payees.len())?;
        let first = check_same_token(&inputs)?;
        if first.metadata.token_id.txid != *genesis_id {
            return Err(FtError::InvalidRequest(format!(
                "token {} does not descend from genesis {}",
                first.outpoint, genesis_id
            )));
        }

        let attestations = try_join_all(inputs.iter().map(|utxo| {
            let prev = utxo.lineage.prev_ref();
            let spending = utxo.lineage.spending_ref(utxo.outpoint.txid);
            async move { self.oracles.attest_spend(&prev, &spending).await }
        }))
        .await?;

        let inputs = &inputs;
        let payees = &payees;

        // Phase 1: route check.
        let route_check = self
            .funding
            .with_reservation(self.builder.route_check_estimate(variant, payees.len()), |funding| async move {
                let route_check = self.builder.route_check(variant, inputs, payees, &funding)?;
                self.broadcast(&route_check.built).await?;
                self.deposit_change(&route_check.built)?;
                Ok(route_check)
            })
            .await?;
        let route_check_id = route_check.built.txid;

        // Phase 2: the transfer itself.
        let attestations = &attestations;
        let route_check = &route_check;
        let transfer = self
            .funding
            .with_reservation(self.builder.transfer_estimate(inputs, payees.len()), |funding| async move {
                let transfer =
                    self.builder.transfer(sender, inputs, attestations, route_check, payees, &funding)?;
                self.broadcast(&transfer.built).await?;
                self.deposit_change(&transfer.built)?;
                self.deposit_tokens(genesis_id, transfer.outputs.clone())?;
                Ok(transfer)
            })
            .await
            .map_err(|source| {
                warn!(route_check = %route_check_id, error = %source, "transfer failed after route check broadcast");
                FtError::TransferIncomplete { route_check_txid: route_check_id, source: Box::new(source) }
            })?;

        Ok(TransferReceipt {
            transaction_id: transfer.built.txid,
            route_check_id,
            outputs: transfer.outputs.len(),
            fee: route_check.built.fee + transfer.built.fee,
        })
    }
}

impl std::fmt::Debug for FungibleTokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FungibleTokenService")
            .field("network", &self.network)
            .field("issuer", &self.issuer)
            .field("funding", &self.funding)
            .field("token_pools", &self.token_pools.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nullables::Harness;
    use crate::token::TokenMetadata;

    fn token(genesis_id: TxId, owner: [u8; ADDRESS_HASH_LEN], n: u8, amount: u64) -> TokenUtxo {
        TokenUtxo {
            outpoint: OutPoint::new(TxId::from_bytes([n; 32]), 0),
            value: 135,
            locking_script: vec![0x51],
            metadata: TokenMetadata::genesis("Coin", "COIN", 2).mint([0; 20], owner, amount),
            lineage: Lineage { raw_tx: vec![], prev_outpoint: OutPoint::new(genesis_id, 0), prev_raw_tx: vec![] },
            retry_depth: 0,
        }
    }

    #[test]
    fn balance_queries_do_not_load_pools() {
        let harness = Harness::new().unwrap();
        let genesis = TxId::from_bytes([1; 32]);
        let service = &harness.service;

        for _ in 0..50 {
            let address = SigningContext::generate(Network::Testnet).address().to_string();
            assert_eq!(service.token_balance(&genesis, &address).unwrap(), 0);
        }
        assert_eq!(service.loaded_token_pools(), 0);

        let owner = SigningContext::generate(Network::Testnet);
        service.deposit_tokens(&genesis, vec![token(genesis, *owner.pubkey_hash(), 9, 40)]).unwrap();
        assert_eq!(service.token_balance(&genesis, &owner.address().to_string()).unwrap(), 40);
        assert_eq!(service.loaded_token_pools(), 0);
    }

    #[tokio::test]
    async fn unknown_genesis_gets_no_issue_lock() {
        let harness = Harness::new().unwrap();
        let unknown = TxId::from_bytes([2; 32]);
        let recipient = harness.issuer.address().to_string();
        for _ in 0..10 {
            let err = harness.service.issue(&unknown, 5, &recipient, true).await.unwrap_err();
            assert!(matches!(err, FtError::UnknownGenesis(_)));
        }
        assert!(harness.service.issue_locks.is_empty());
    }

    #[test]
    fn deposits_racing_a_pool_load_stay_visible() {
        let harness = Harness::new().unwrap();
        let service = &harness.service;
        let genesis = TxId::from_bytes([3; 32]);

        for round in 0..64u8 {
            let owner = SigningContext::generate(Network::Testnet);
            let address = owner.address().to_string();
            let barrier = std::sync::Barrier::new(2);
            let pool = std::thread::scope(|s| {
                s.spawn(|| {
                    barrier.wait();
                    service
                        .deposit_tokens(&genesis, vec![token(genesis, *owner.pubkey_hash(), round, 7)])
                        .unwrap();
                });
                let loader = s.spawn(|| {
                    barrier.wait();
                    service.token_pool(&genesis, &address).unwrap()
                });
                loader.join().unwrap()
            });
            assert_eq!(pool.available_value(), 7, "round {}", round);
        }
    }
}
