//! # Transaction Builder
//!
//! Assembles the four protocol transactions from reserved inputs and
//! gathered attestations. Nothing in here performs I/O: the service
//! reserves, attests and broadcasts; the builder only decides bytes.
//!
//! ```text
//! genesis      funding...                          → genesis contract, change
//! issue        genesis contract, funding...        → [renewed genesis], token, change
//! route check  funding...                          → route-check contract, change
//! transfer     token..., funding..., route check   → token × (payees + change), change
//! ```
//!
//! Every shape follows the same recipe: draft, seal (fee and change are now
//! final), take preimages from the sealed shape, sign, attach proofs,
//! finish. Contract outputs carry exactly their dust threshold.

use std::sync::Arc;

use tracing::debug;

use super::proof::{GenesisUnlock, RouteCheckUnlock, TokenUnlock};
use crate::config::{
    ADDRESS_HASH_LEN, GENESIS_SIZE_HINT, ISSUE_SIZE_HINT,
    ROUTE_CHECK_SIZE_HINT, TOKEN_TRAILER_LEN, TRANSFER_SIZE_HINT,
};
use crate::crypto::hash::hash160;
use crate::crypto::keys::SigningContext;
use crate::error::{FtError, FtResult};
use crate::ledger::script::{p2pkh_locking_script, push_header_len, ScriptBuilder, OP_RETURN};
use crate::ledger::{
    dust_threshold, FeePolicy, OutPoint, SealedTransaction, Transaction, TxDraft, TxId,
};
use crate::oracle::{AttestationPair, PackedAttestations};
use crate::token::{
    code_hash, contract_script, decode, replace_metadata, RouteCheckVariant, TokenId,
    TokenMetadata, VerifierTemplates,
};
use crate::utxo::{FundingUtxo, IssuerRecord, Lineage, TokenUtxo};

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A finished transaction, ready to broadcast.
#[derive(Debug, Clone)]
pub struct BuiltTransaction {
    pub tx: Transaction,
    pub txid: TxId,
    pub raw: Vec<u8>,
    pub fee: u64,
    /// Change back to the service key, if any survived dust.
    pub change: Option<FundingUtxo>,
}

#[derive(Debug, Clone)]
pub struct IssueTransaction {
    pub built: BuiltTransaction,
    /// The renewed genesis output, unless issuance was closed.
    pub genesis: Option<(OutPoint, u64, Vec<u8>)>,
    pub token: TokenUtxo,
    /// Lineage of everything this issue created.
    pub lineage: Lineage,
}

#[derive(Debug, Clone)]
pub struct RouteCheckTransaction {
    pub built: BuiltTransaction,
    pub variant: RouteCheckVariant,
    pub outpoint: OutPoint,
    pub value: u64,
    pub script: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct TransferTransaction {
    pub built: BuiltTransaction,
    /// One per payee, in payee order.
    pub outputs: Vec<TokenUtxo>,
}

/// One token output of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payee {
    pub pubkey_hash: [u8; ADDRESS_HASH_LEN],
    pub amount: u64,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builds protocol transactions for one issuer key.
///
/// The issuer key also owns the funding pool: it signs every funding input
/// and receives every change output.
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    templates: Arc<VerifierTemplates>,
    policy: FeePolicy,
    issuer: Arc<SigningContext>,
}

impl TransactionBuilder {
    pub fn new(templates: Arc<VerifierTemplates>, policy: FeePolicy, issuer: Arc<SigningContext>) -> Self {
        Self { templates, policy, issuer }
    }

    pub fn policy(&self) -> &FeePolicy {
        &self.policy
    }

    pub fn issuer(&self) -> &SigningContext {
        &self.issuer
    }

    fn funding_script(&self) -> Vec<u8> {
        p2pkh_locking_script(self.issuer.pubkey_hash())
    }

    fn spend_funding(&self, draft: &mut TxDraft, funding: &[FundingUtxo]) {
        let lock = self.funding_script();
        for utxo in funding {
            draft.spend_p2pkh(utxo.outpoint, utxo.value, lock.clone());
        }
    }

    fn release(&self, sealed: SealedTransaction) -> FtResult<BuiltTransaction> {
        let fee = sealed.fee();
        let change = sealed.change();
        let (tx, txid) = sealed.finish()?;
        let raw = tx.serialize();
        let change = change.map(|(index, value)| FundingUtxo::new(OutPoint::new(txid, index), value));
        Ok(BuiltTransaction { tx, txid, raw, fee, change })
    }

    // -----------------------------------------------------------------------
    // Genesis
    // -----------------------------------------------------------------------

    /// The genesis contract script for a new token, bound to the issuer key.
    pub fn genesis_script(&self, name: &str, symbol: &str, decimals: u8) -> FtResult<Vec<u8>> {
        let code = self.templates.genesis().instantiate(&[self.issuer.public_key().as_slice()]);
        contract_script(&code, &TokenMetadata::genesis(name, symbol, decimals))
    }

    /// Funding to reserve for a genesis carrying `script`.
    pub fn genesis_estimate(&self, script: &[u8]) -> u64 {
        self.policy.rate.fee_for(GENESIS_SIZE_HINT) + dust_threshold(script.len())
    }

    pub fn genesis(&self, funding: &[FundingUtxo], script: Vec<u8>) -> FtResult<BuiltTransaction> {
        let mut draft = TxDraft::new();
        self.spend_funding(&mut draft, funding);
        draft.add_output(dust_threshold(script.len()), script);
        let mut sealed = draft.seal(&self.policy, 0, 0, self.funding_script())?;
        sealed.sign_p2pkh_inputs(&self.issuer)?;
        self.release(sealed)
    }

    // -----------------------------------------------------------------------
    // Issue
    // -----------------------------------------------------------------------

    fn token_value_estimate(&self) -> u64 {
        let len = self.templates.token().code().len() + 1 + push_header_len(TOKEN_TRAILER_LEN) + TOKEN_TRAILER_LEN;
        dust_threshold(len)
    }

    /// Funding to reserve for an issue against `record`.
    pub fn issue_estimate(&self, record: &IssuerRecord, allow_further: bool) -> u64 {
        let genesis = if allow_further { dust_threshold(record.genesis_script.len()) } else { 0 };
        self.policy.rate.fee_for(ISSUE_SIZE_HINT + 2 * self.policy.token_io_size)
            + genesis
            + self.token_value_estimate()
    }

    /// Spend the live genesis output of `record`, minting `amount` to
    /// `recipient`.
    ///
    /// `attestation` proves custody of the previous genesis output; on the
    /// first issue it is the sentinel pair.
    pub fn issue(
        &self,
        record: &IssuerRecord,
        funding: &[FundingUtxo],
        attestation: &AttestationPair,
        recipient: [u8; ADDRESS_HASH_LEN],
        amount: u64,
        allow_further: bool,
    ) -> FtResult<IssueTransaction> {
        let mut renewed_meta = decode(&record.genesis_script)?;
        if !renewed_meta.is_genesis() {
            return Err(FtError::MalformedMetadata(format!(
                "issuer record {} does not point at a genesis output",
                record.genesis_id
            )));
        }
        if renewed_meta.token_id.is_placeholder() {
            renewed_meta.token_id = TokenId::from(record.genesis_outpoint);
        }
        let renewed_script = replace_metadata(&record.genesis_script, &renewed_meta)?;
        // Every renewed genesis script is identical from here on, so its
        // hash pins the whole token lineage.
        let verifier_code_hash = hash160(&renewed_script);

        let token_meta = renewed_meta.mint(verifier_code_hash, recipient, amount);
        let token_script = contract_script(self.templates.token().code(), &token_meta)?;
        let token_value = dust_threshold(token_script.len());

        let mut draft = TxDraft::new();
        let genesis_input =
            draft.spend_contract(record.genesis_outpoint, record.genesis_value, record.genesis_script.clone());
        self.spend_funding(&mut draft, funding);
        let genesis_output = if allow_further {
            let value = dust_threshold(renewed_script.len());
            Some((draft.add_output(value, renewed_script.clone()), value))
        } else {
            None
        };
        let token_index = draft.add_output(token_value, token_script.clone());

        let mut sealed = draft.seal(&self.policy, 1, 1, self.funding_script())?;
        sealed.sign_p2pkh_inputs(&self.issuer)?;
        let unlock = GenesisUnlock {
            preimage: sealed.preimage(genesis_input)?,
            issuer_signature: sealed.signature(genesis_input, &self.issuer)?,
            attestation,
            genesis_value: genesis_output.map_or(0, |(_, value)| value),
            token_script: &token_script,
            token_value,
            change_pubkey_hash: *self.issuer.pubkey_hash(),
            change_value: sealed.change().map_or(0, |(_, value)| value),
        }
        .to_script();
        sealed.set_unlocking_script(genesis_input, unlock)?;

        let built = self.release(sealed)?;
        let lineage = Lineage {
            raw_tx: built.raw.clone(),
            prev_outpoint: record.genesis_outpoint,
            prev_raw_tx: record.lineage.raw_tx.clone(),
        };
        let token = TokenUtxo {
            outpoint: OutPoint::new(built.txid, token_index),
            value: token_value,
            locking_script: token_script,
            metadata: token_meta,
            lineage: lineage.clone(),
            retry_depth: 0,
        };
        let genesis = genesis_output
            .map(|(index, value)| (OutPoint::new(built.txid, index), value, renewed_script));
        debug!(txid = %built.txid, token_index, amount, renewed = genesis.is_some(), "issue assembled");
        Ok(IssueTransaction { built, genesis, token, lineage })
    }

    // -----------------------------------------------------------------------
    // Route check
    // -----------------------------------------------------------------------

    /// `amounts ‖ owners ‖ n ‖ token code hash ‖ token id`
    fn route_check_data(inputs: &[TokenUtxo], payees: &[Payee]) -> FtResult<Vec<u8>> {
        let first = inputs
            .first()
            .ok_or_else(|| FtError::InvalidRequest("route check needs token inputs".into()))?;
        let count = u8::try_from(payees.len()).map_err(|_| FtError::UnsupportedCardinality {
            inputs: inputs.len(),
            outputs: payees.len(),
        })?;
        let mut data = Vec::with_capacity(payees.len() * 28 + 1 + 20 + 36);
        for payee in payees {
            data.extend_from_slice(&payee.amount.to_le_bytes());
        }
        for payee in payees {
            data.extend_from_slice(&payee.pubkey_hash);
        }
        data.push(count);
        data.extend_from_slice(&code_hash(&first.locking_script)?);
        data.extend_from_slice(&first.metadata.token_id.to_bytes());
        Ok(data)
    }

    /// Funding to reserve for a route check of `variant` over `payees` outputs.
    pub fn route_check_estimate(&self, variant: RouteCheckVariant, payees: usize) -> u64 {
        let code = self.templates.route_check(variant).code().len();
        let data = payees * 28 + 1 + 20 + 36;
        self.policy.rate.fee_for(ROUTE_CHECK_SIZE_HINT)
            + dust_threshold(code + 1 + push_header_len(data) + data)
    }

    pub fn route_check(
        &self,
        variant: RouteCheckVariant,
        inputs: &[TokenUtxo],
        payees: &[Payee],
        funding: &[FundingUtxo],
    ) -> FtResult<RouteCheckTransaction> {
        let data = Self::route_check_data(inputs, payees)?;
        let script = ScriptBuilder::new()
            .raw(self.templates.route_check(variant).code())
            .opcode(OP_RETURN)
            .push(&data)
            .into_bytes();
        let value = dust_threshold(script.len());

        let mut draft = TxDraft::new();
        self.spend_funding(&mut draft, funding);
        let index = draft.add_output(value, script.clone());
        let mut sealed = draft.seal(&self.policy, 0, 0, self.funding_script())?;
        sealed.sign_p2pkh_inputs(&self.issuer)?;
        let built = self.release(sealed)?;
        let outpoint = OutPoint::new(built.txid, index);
        debug!(txid = %built.txid, %variant, payees = payees.len(), "route check assembled");
        Ok(RouteCheckTransaction { built, variant, outpoint, value, script })
    }

    // -----------------------------------------------------------------------
    // Transfer
    // -----------------------------------------------------------------------

    /// Funding to reserve for a transfer of `inputs` token inputs to `payees`.
    pub fn transfer_estimate(&self, inputs: &[TokenUtxo], payees: usize) -> u64 {
        let io = (inputs.len() + payees) as u64;
        let outputs = inputs.first().map_or(0, |u| dust_threshold(u.locking_script.len())) * payees as u64;
        self.policy.rate.fee_for(TRANSFER_SIZE_HINT + io * self.policy.token_io_size) + outputs
    }

    /// Spend `inputs` (owned by `sender`) and the route-check output into
    /// one token output per payee.
    ///
    /// `attestations[i]` must prove the parent spend of `inputs[i]`.
    pub fn transfer(
        &self,
        sender: &SigningContext,
        inputs: &[TokenUtxo],
        attestations: &[AttestationPair],
        route_check: &RouteCheckTransaction,
        payees: &[Payee],
        funding: &[FundingUtxo],
    ) -> FtResult<TransferTransaction> {
        let first = check_same_token(inputs)?;
        if attestations.len() != inputs.len() {
            return Err(FtError::InvalidRequest(format!(
                "{} attestations for {} token inputs",
                attestations.len(),
                inputs.len()
            )));
        }
        let input_total: u64 = inputs.iter().map(TokenUtxo::amount).sum();
        let output_total: u64 = payees.iter().map(|p| p.amount).sum();
        if input_total != output_total {
            return Err(FtError::InvalidRequest(format!(
                "token inputs hold {}, outputs assign {}",
                input_total, output_total
            )));
        }
        let parents = inputs
            .iter()
            .map(|u| parent_state(&u.lineage))
            .collect::<FtResult<Vec<_>>>()?;

        let mut draft = TxDraft::new();
        for utxo in inputs {
            draft.spend_contract(utxo.outpoint, utxo.value, utxo.locking_script.clone());
        }
        self.spend_funding(&mut draft, funding);
        let route_input =
            draft.spend_contract(route_check.outpoint, route_check.value, route_check.script.clone());

        let mut outputs = Vec::with_capacity(payees.len());
        for payee in payees {
            let metadata = first.metadata.reassign(payee.pubkey_hash, payee.amount);
            let script = replace_metadata(&first.locking_script, &metadata)?;
            let value = dust_threshold(script.len());
            let index = draft.add_output(value, script.clone());
            outputs.push((index, value, script, metadata));
        }

        let mut sealed = draft.seal(&self.policy, inputs.len(), payees.len(), self.funding_script())?;
        sealed.sign_p2pkh_inputs(&self.issuer)?;

        let prevouts = sealed.commitment().prevouts_bytes();
        for (i, (attestation, (prev_owner, prev_amount))) in attestations.iter().zip(&parents).enumerate() {
            let unlock = TokenUnlock {
                preimage: sealed.preimage(i)?,
                prevouts: &prevouts,
                attestation,
                route_check_input: route_input as u32,
                route_check_raw_tx: &route_check.built.raw,
                route_check_output: route_check.outpoint.index,
                token_outputs: payees.len(),
                prev_owner: *prev_owner,
                prev_amount: *prev_amount,
                sender_public_key: sender.public_key(),
                sender_signature: sealed.signature(i, sender)?,
            }
            .to_script();
            sealed.set_unlocking_script(i, unlock)?;
        }

        let packed = PackedAttestations::pack(attestations)?;
        let owners: Vec<[u8; ADDRESS_HASH_LEN]> = inputs.iter().map(|u| u.metadata.owner).collect();
        let amounts: Vec<u64> = inputs.iter().map(TokenUtxo::amount).collect();
        let values: Vec<u64> = outputs.iter().map(|(_, value, _, _)| *value).collect();
        let oracle_indices = attestations.first().map_or([0, 1], AttestationPair::indices);
        let unlock = RouteCheckUnlock {
            preimage: sealed.preimage(route_input)?,
            token_inputs: inputs.len(),
            token_script: &first.locking_script,
            prevouts: &prevouts,
            attestations: &packed,
            oracle_indices,
            input_owners: &owners,
            input_amounts: &amounts,
            output_values: &values,
            change_value: sealed.change().map_or(0, |(_, value)| value),
            change_pubkey_hash: *self.issuer.pubkey_hash(),
        }
        .to_script();
        sealed.set_unlocking_script(route_input, unlock)?;

        let built = self.release(sealed)?;
        let lineage = Lineage {
            raw_tx: built.raw.clone(),
            prev_outpoint: first.outpoint,
            prev_raw_tx: first.lineage.raw_tx.clone(),
        };
        let outputs = outputs
            .into_iter()
            .map(|(index, value, locking_script, metadata)| TokenUtxo {
                outpoint: OutPoint::new(built.txid, index),
                value,
                locking_script,
                metadata,
                lineage: lineage.clone(),
                retry_depth: 0,
            })
            .collect();
        debug!(txid = %built.txid, inputs = inputs.len(), payees = payees.len(), "transfer assembled");
        Ok(TransferTransaction { built, outputs })
    }
}

/// Owner and amount recorded in the output `lineage` descends from. A
/// genesis parent has neither and yields zeros.
fn parent_state(lineage: &Lineage) -> FtResult<([u8; ADDRESS_HASH_LEN], u64)> {
    let parent = Transaction::from_bytes(&lineage.prev_raw_tx)?;
    let output = parent.output(lineage.prev_outpoint.index)?;
    let meta = decode(&output.script_pubkey)?;
    Ok((meta.owner, meta.amount))
}

/// All inputs must descend from one genesis and run the same token code.
pub(crate) fn check_same_token(inputs: &[TokenUtxo]) -> FtResult<&TokenUtxo> {
    let first = inputs
        .first()
        .ok_or_else(|| FtError::InvalidRequest("transfer needs at least one token input".into()))?;
    let first_code = code_hash(&first.locking_script)?;
    for utxo in &inputs[1..] {
        if utxo.metadata.token_id != first.metadata.token_id
            || utxo.metadata.verifier_code_hash != first.metadata.verifier_code_hash
            || code_hash(&utxo.locking_script)? != first_code
        {
            return Err(FtError::InvalidRequest(format!(
                "token input {} does not belong to the same token as {}",
                utxo.outpoint, first.outpoint
            )));
        }
    }
    Ok(first)
}
