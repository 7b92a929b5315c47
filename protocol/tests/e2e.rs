//! End-to-end tests for the token service.
//!
//! Every test drives a real `FungibleTokenService` wired to the nullables:
//! an in-memory ledger that records what gets broadcast, three in-memory
//! oracles, and an in-memory store. Assertions look at the transactions the
//! ledger accepted, the stored utxos and the issuer records, never at
//! service internals.
//!
//! Each test builds its own harness. No shared state, no ordering
//! dependencies.

use std::sync::Arc;

use sft_protocol::config::Network;
use sft_protocol::crypto::SigningContext;
use sft_protocol::ft::{Collaborators, FungibleTokenService, Receiver};
use sft_protocol::ledger::{Transaction, TxId};
use sft_protocol::nullables::{self, service_config, Harness, MemoryStore, NullLedger, NullOracle, OracleMode};
use sft_protocol::storage::FtDb;
use sft_protocol::token::metadata::{decode, TokenMetadata};
use sft_protocol::utxo::{FundingUtxo, LeasedUtxo, PersistedUtxoStore};
use sft_protocol::FtError;

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

const FUNDING: u64 = 200_000;

/// A harness with `utxos` funding outputs and a fresh token already created.
async fn setup(utxos: usize) -> (Harness, TxId) {
    let harness = Harness::new().expect("harness");
    harness.fund(&vec![FUNDING; utxos]).expect("fund");
    let genesis = harness.service.genesis("Coin", "COIN", 2).await.expect("genesis");
    (harness, genesis.genesis_id)
}

fn holder() -> SigningContext {
    SigningContext::generate(Network::Testnet)
}

fn address_of(ctx: &SigningContext) -> String {
    ctx.address().to_string()
}

fn token_at(tx: &Transaction, index: usize) -> TokenMetadata {
    decode(&tx.outputs[index].script_pubkey).expect("token trailer")
}

fn stored_funding(harness: &Harness) -> Vec<FundingUtxo> {
    let store: &dyn PersistedUtxoStore<FundingUtxo> = harness.store.as_ref();
    store.list(&address_of(&harness.issuer)).expect("list funding")
}

/// Issue `amounts` to `owner` one by one, keeping issuance open.
async fn issue_each(harness: &Harness, genesis: &TxId, owner: &SigningContext, amounts: &[u64]) {
    for amount in amounts {
        harness
            .service
            .issue(genesis, *amount, &address_of(owner), true)
            .await
            .expect("issue");
    }
}

// ---------------------------------------------------------------------------
// Genesis and issue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn genesis_then_closing_issue() {
    let (harness, genesis) = setup(1).await;
    let alice = holder();

    let record = harness.service.issuer_record(&genesis).expect("record");
    assert_eq!(record.symbol, "COIN");
    assert_eq!(record.issued, 0);
    let genesis_meta = decode(&record.genesis_script).expect("genesis trailer");
    assert!(genesis_meta.token_id.is_placeholder());

    let receipt = harness
        .service
        .issue(&genesis, 1000, &address_of(&alice), false)
        .await
        .expect("issue");
    assert!(!receipt.genesis_renewed);
    assert_eq!(receipt.token_index, 0);

    let tx = harness.ledger.transaction(&receipt.transaction_id).expect("issue tx");
    assert_eq!(tx.inputs[0].prev_out, record.genesis_outpoint);
    let token = token_at(&tx, 0);
    assert_eq!(token.amount, 1000);
    assert_eq!(&token.owner, alice.pubkey_hash());
    assert_eq!(token.name, "Coin");
    assert_eq!(token.decimals, 2);
    assert_eq!(token.token_id.txid, genesis);
    assert_eq!(token.token_id.index, 0);

    let record = harness.service.issuer_record(&genesis).expect("record");
    assert!(record.closed);
    assert_eq!(record.issued, 1000);
    assert_eq!(harness.service.token_balance(&genesis, &address_of(&alice)).unwrap(), 1000);

    let again = harness.service.issue(&genesis, 1, &address_of(&alice), true).await;
    assert!(matches!(again, Err(FtError::InvalidRequest(_))));
}

#[tokio::test]
async fn renewed_genesis_supports_further_issues() {
    let (harness, genesis) = setup(1).await;
    let alice = holder();

    let first = harness
        .service
        .issue(&genesis, 500, &address_of(&alice), true)
        .await
        .expect("first issue");
    assert!(first.genesis_renewed);
    assert_eq!(first.token_index, 1);
    let tx = harness.ledger.transaction(&first.transaction_id).unwrap();
    let renewed = token_at(&tx, 0);
    assert!(renewed.is_genesis());
    assert_eq!(renewed.token_id.txid, genesis);
    assert_eq!(token_at(&tx, 1).amount, 500);

    let calls_before: usize = harness.oracles.iter().map(|o| o.calls()).sum();
    let second = harness
        .service
        .issue(&genesis, 250, &address_of(&alice), true)
        .await
        .expect("second issue");
    let calls_after: usize = harness.oracles.iter().map(|o| o.calls()).sum();
    assert_eq!(calls_after - calls_before, 2);

    let tx = harness.ledger.transaction(&second.transaction_id).unwrap();
    assert_eq!(tx.inputs[0].prev_out.txid, first.transaction_id);
    assert_eq!(token_at(&tx, 1).token_id, renewed.token_id);

    let record = harness.service.issuer_record(&genesis).unwrap();
    assert_eq!(record.issued, 750);
    assert!(!record.closed);
    assert_eq!(record.genesis_outpoint.txid, second.transaction_id);
    assert_eq!(harness.service.token_balance(&genesis, &address_of(&alice)).unwrap(), 750);
}

#[tokio::test]
async fn concurrent_issues_on_one_genesis_serialize() {
    let (harness, genesis) = setup(4).await;
    let alice = address_of(&holder());

    let (a, b) = tokio::join!(
        harness.service.issue(&genesis, 10, &alice, true),
        harness.service.issue(&genesis, 20, &alice, true),
    );
    let (a, b) = (a.expect("issue a"), b.expect("issue b"));
    assert_ne!(a.transaction_id, b.transaction_id);

    let record = harness.service.issuer_record(&genesis).unwrap();
    assert_eq!(record.issued, 30);
    assert_eq!(harness.service.token_balance(&genesis, &alice).unwrap(), 30);
}

#[tokio::test]
async fn genesis_without_funding_broadcasts_nothing() {
    let harness = Harness::new().unwrap();
    let err = harness.service.genesis("Coin", "COIN", 2).await.unwrap_err();
    assert!(matches!(err, FtError::InsufficientFunds { available: 0, .. }));
    assert!(harness.ledger.broadcasts().is_empty());
}

#[tokio::test]
async fn issue_rejects_bad_input() {
    let (harness, genesis) = setup(1).await;
    let alice = address_of(&holder());

    let unknown = TxId::from_bytes([9; 32]);
    let err = harness.service.issue(&unknown, 10, &alice, true).await.unwrap_err();
    assert!(matches!(err, FtError::UnknownGenesis(_)));

    let err = harness.service.issue(&genesis, 10, "not-an-address", true).await.unwrap_err();
    assert!(matches!(err, FtError::InvalidAddress(_)));

    let mainnet = address_of(&SigningContext::generate(Network::Mainnet));
    let err = harness.service.issue(&genesis, 10, &mainnet, true).await.unwrap_err();
    assert!(matches!(err, FtError::InvalidAddress(_)));

    let err = harness.service.issue(&genesis, 0, &alice, true).await.unwrap_err();
    assert!(matches!(err, FtError::InvalidRequest(_)));

    assert_eq!(harness.ledger.broadcasts().len(), 1);
}

#[tokio::test]
async fn chain_too_long_bumps_funding_depth_once() {
    let (harness, genesis) = setup(1).await;
    let before = stored_funding(&harness);
    assert_eq!(before.len(), 1);
    assert_eq!(before[0].retry_depth(), 0);

    harness.ledger.reject_next("66: too-long-mempool-chain");
    let err = harness
        .service
        .issue(&genesis, 10, &address_of(&holder()), true)
        .await
        .unwrap_err();
    assert!(err.is_mempool_chain_too_long());

    let after = stored_funding(&harness);
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].outpoint, before[0].outpoint);
    assert_eq!(after[0].retry_depth(), 1);
    assert_eq!(harness.service.funding_pool().snapshot()[0].retry_depth(), 1);

    let record = harness.service.issuer_record(&genesis).unwrap();
    assert_eq!(record.issued, 0);
}

#[tokio::test]
async fn other_rejections_leave_depth_alone() {
    let (harness, genesis) = setup(1).await;
    harness.ledger.reject_next("258: txn-mempool-conflict");
    let err = harness
        .service
        .issue(&genesis, 10, &address_of(&holder()), true)
        .await
        .unwrap_err();
    assert!(matches!(err, FtError::BroadcastRejected(_)));
    assert_eq!(stored_funding(&harness)[0].retry_depth(), 0);
    assert_eq!(harness.service.funding_pool().available_len(), 1);
}

#[tokio::test]
async fn oracle_failure_happens_before_any_broadcast() {
    let (harness, genesis) = setup(1).await;
    harness.oracles[0].set_mode(OracleMode::Unreachable);
    let err = harness
        .service
        .issue(&genesis, 10, &address_of(&holder()), true)
        .await
        .unwrap_err();
    assert!(matches!(err, FtError::OracleUnreachable { index: 0, .. }));
    assert_eq!(harness.ledger.broadcasts().len(), 1);
    assert_eq!(harness.service.funding_pool().reserved_len(), 0);
}

// ---------------------------------------------------------------------------
// Transfer
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transfer_with_change() {
    let (harness, genesis) = setup(3).await;
    let sender = holder();
    let recipient = holder();
    assert_eq!(harness.service.token_balance(&genesis, &address_of(&sender)).unwrap(), 0);
    issue_each(&harness, &genesis, &sender, &[30, 50]).await;

    let receipt = harness
        .service
        .transfer(
            &genesis,
            &sender.to_wif(),
            &[Receiver { address: address_of(&recipient), amount: 40 }],
        )
        .await
        .expect("transfer");
    assert_eq!(receipt.outputs, 2);

    let broadcasts = harness.ledger.broadcasts();
    assert_eq!(broadcasts.len(), 5);
    assert_eq!(broadcasts[3], receipt.route_check_id);
    assert_eq!(broadcasts[4], receipt.transaction_id);

    let tx = harness.ledger.transaction(&receipt.transaction_id).unwrap();
    // two token inputs, funding, then the route check output
    assert_eq!(tx.inputs.len(), 4);
    assert_eq!(tx.inputs.last().unwrap().prev_out.txid, receipt.route_check_id);
    let paid = token_at(&tx, 0);
    let change = token_at(&tx, 1);
    assert_eq!((paid.owner, paid.amount), (*recipient.pubkey_hash(), 40));
    assert_eq!((change.owner, change.amount), (*sender.pubkey_hash(), 40));
    assert_eq!(paid.token_id, change.token_id);

    assert_eq!(harness.service.token_balance(&genesis, &address_of(&sender)).unwrap(), 40);
    assert_eq!(harness.service.token_balance(&genesis, &address_of(&recipient)).unwrap(), 40);
}

#[tokio::test]
async fn received_tokens_can_be_passed_on() {
    let (harness, genesis) = setup(4).await;
    let alice = holder();
    let bob = holder();
    let carol = holder();
    issue_each(&harness, &genesis, &alice, &[100]).await;

    harness
        .service
        .transfer(&genesis, &alice.to_wif(), &[Receiver { address: address_of(&bob), amount: 100 }])
        .await
        .expect("alice to bob");
    let receipt = harness
        .service
        .transfer(
            &genesis,
            &bob.to_wif(),
            &[
                Receiver { address: address_of(&carol), amount: 60 },
                Receiver { address: address_of(&alice), amount: 40 },
            ],
        )
        .await
        .expect("bob to carol and alice");
    assert_eq!(receipt.outputs, 2);

    assert_eq!(harness.service.token_balance(&genesis, &address_of(&bob)).unwrap(), 0);
    assert_eq!(harness.service.token_balance(&genesis, &address_of(&carol)).unwrap(), 60);
    assert_eq!(harness.service.token_balance(&genesis, &address_of(&alice)).unwrap(), 40);
}

#[tokio::test]
async fn insufficient_token_balance() {
    let (harness, genesis) = setup(2).await;
    let sender = holder();
    issue_each(&harness, &genesis, &sender, &[30, 50]).await;
    let broadcasts = harness.ledger.broadcasts().len();

    let err = harness
        .service
        .transfer(&genesis, &sender.to_wif(), &[Receiver { address: address_of(&holder()), amount: 81 }])
        .await
        .unwrap_err();
    assert!(matches!(err, FtError::InsufficientTokenBalance { required: 81, available: 80 }));
    assert_eq!(harness.ledger.broadcasts().len(), broadcasts);
    assert_eq!(harness.service.token_balance(&genesis, &address_of(&sender)).unwrap(), 80);
}

#[tokio::test]
async fn too_many_inputs_is_unsupported() {
    let (harness, genesis) = setup(2).await;
    let sender = holder();
    issue_each(&harness, &genesis, &sender, &[1; 21]).await;
    let broadcasts = harness.ledger.broadcasts().len();

    let err = harness
        .service
        .transfer(&genesis, &sender.to_wif(), &[Receiver { address: address_of(&holder()), amount: 21 }])
        .await
        .unwrap_err();
    assert!(matches!(err, FtError::UnsupportedCardinality { inputs: 21, outputs: 1 }));
    assert_eq!(harness.ledger.broadcasts().len(), broadcasts);
    assert_eq!(harness.service.funding_pool().reserved_len(), 0);
}

#[tokio::test]
async fn transfer_validates_request() {
    let (harness, genesis) = setup(1).await;
    let sender = holder();
    let to = address_of(&holder());

    let err = harness.service.transfer(&genesis, "garbage", &[Receiver { address: to.clone(), amount: 1 }]).await;
    assert!(matches!(err, Err(FtError::InvalidKey(_))));

    let mainnet = SigningContext::generate(Network::Mainnet);
    let err = harness.service.transfer(&genesis, &mainnet.to_wif(), &[Receiver { address: to.clone(), amount: 1 }]).await;
    assert!(matches!(err, Err(FtError::InvalidKey(_))));

    let err = harness.service.transfer(&genesis, &sender.to_wif(), &[]).await;
    assert!(matches!(err, Err(FtError::InvalidRequest(_))));

    let err = harness.service.transfer(&genesis, &sender.to_wif(), &[Receiver { address: to.clone(), amount: 0 }]).await;
    assert!(matches!(err, Err(FtError::InvalidRequest(_))));

    let unknown = TxId::from_bytes([3; 32]);
    let err = harness.service.transfer(&unknown, &sender.to_wif(), &[Receiver { address: to, amount: 1 }]).await;
    assert!(matches!(err, Err(FtError::UnknownGenesis(_))));
}

#[tokio::test]
async fn unreachable_oracle_aborts_transfer_cleanly() {
    let (harness, genesis) = setup(2).await;
    let sender = holder();
    issue_each(&harness, &genesis, &sender, &[70]).await;
    let broadcasts = harness.ledger.broadcasts().len();

    harness.oracles[1].set_mode(OracleMode::Unreachable);
    let err = harness
        .service
        .transfer(&genesis, &sender.to_wif(), &[Receiver { address: address_of(&holder()), amount: 20 }])
        .await
        .unwrap_err();
    assert!(matches!(err, FtError::OracleUnreachable { index: 1, .. }));
    assert_eq!(harness.ledger.broadcasts().len(), broadcasts);
    assert_eq!(harness.service.token_balance(&genesis, &address_of(&sender)).unwrap(), 70);
    assert_eq!(harness.service.funding_pool().reserved_len(), 0);
}

#[tokio::test]
async fn rejected_transfer_after_route_check_is_incomplete() {
    let (harness, genesis) = setup(2).await;
    let sender = holder();
    issue_each(&harness, &genesis, &sender, &[70]).await;

    harness.ledger.reject_after(1, "66: too-long-mempool-chain");
    let err = harness
        .service
        .transfer(&genesis, &sender.to_wif(), &[Receiver { address: address_of(&holder()), amount: 20 }])
        .await
        .unwrap_err();
    let route_check = match &err {
        FtError::TransferIncomplete { route_check_txid, .. } => *route_check_txid,
        other => panic!("expected TransferIncomplete, got {:?}", other),
    };
    assert!(err.is_mempool_chain_too_long());
    assert_eq!(harness.ledger.broadcasts().last(), Some(&route_check));

    // The token input was not spent and went back to the sender's pool.
    let sender_addr = address_of(&sender);
    assert_eq!(harness.service.token_balance(&genesis, &sender_addr).unwrap(), 70);
    assert_eq!(harness.service.funding_pool().reserved_len(), 0);
}

#[tokio::test]
async fn concurrent_transfers_share_the_funding_pool() {
    let (harness, genesis) = setup(6).await;
    let alice = holder();
    let bob = holder();
    issue_each(&harness, &genesis, &alice, &[10]).await;
    issue_each(&harness, &genesis, &bob, &[20]).await;
    let carol = address_of(&holder());

    let (alice_wif, bob_wif) = (alice.to_wif(), bob.to_wif());
    let to_carol_10 = [Receiver { address: carol.clone(), amount: 10 }];
    let to_carol_20 = [Receiver { address: carol.clone(), amount: 20 }];
    let (a, b) = tokio::join!(
        harness.service.transfer(&genesis, &alice_wif, &to_carol_10),
        harness.service.transfer(&genesis, &bob_wif, &to_carol_20),
    );
    a.expect("alice transfer");
    b.expect("bob transfer");

    let spent: Vec<_> = harness
        .ledger
        .broadcasts()
        .iter()
        .filter_map(|txid| harness.ledger.transaction(txid))
        .flat_map(|tx| tx.inputs.into_iter().map(|i| i.prev_out))
        .collect();
    let mut unique = spent.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), spent.len(), "an outpoint was spent twice");
    assert_eq!(harness.service.token_balance(&genesis, &carol).unwrap(), 30);
}

// ---------------------------------------------------------------------------
// Restart
// ---------------------------------------------------------------------------

#[tokio::test]
async fn state_survives_restart() {
    let (harness, genesis) = setup(2).await;
    let alice = holder();
    issue_each(&harness, &genesis, &alice, &[42]).await;
    let funding_value = harness.service.funding_pool().available_value();

    let restarted = Harness::with_store(harness.store.clone(), harness.issuer.clone()).unwrap();
    assert_eq!(restarted.service.funding_pool().available_value(), funding_value);
    assert_eq!(restarted.service.issuer_record(&genesis).unwrap().issued, 42);
    assert_eq!(restarted.service.token_balance(&genesis, &address_of(&alice)).unwrap(), 42);
}

#[tokio::test]
async fn sled_backed_service_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let issuer = holder();
    let ledger = Arc::new(NullLedger::new());
    let alice = holder();

    let wire = |db: Arc<FtDb>| {
        let (roster, _) = NullOracle::roster();
        FungibleTokenService::with_collaborators(
            &service_config(&issuer),
            Collaborators {
                ledger: ledger.clone(),
                oracles: roster,
                templates: nullables::templates(),
                funding_store: db.clone(),
                token_store: db.clone(),
                issuers: db,
            },
        )
        .unwrap()
    };

    let genesis = {
        let db = Arc::new(FtDb::open(dir.path()).unwrap());
        let service = wire(db.clone());
        service.deposit_funding(ledger.fund(issuer.pubkey_hash(), &[FUNDING])).unwrap();
        let genesis = service.genesis("Coin", "COIN", 2).await.unwrap().genesis_id;
        service.issue(&genesis, 5, &address_of(&alice), true).await.unwrap();
        db.flush().unwrap();
        genesis
    };

    let db = Arc::new(FtDb::open(dir.path()).unwrap());
    let service = wire(db);
    assert_eq!(service.issuer_record(&genesis).unwrap().issued, 5);
    assert_eq!(service.token_balance(&genesis, &address_of(&alice)).unwrap(), 5);
    service.issue(&genesis, 5, &address_of(&alice), false).await.unwrap();
    assert_eq!(service.token_balance(&genesis, &address_of(&alice)).unwrap(), 10);
}

#[tokio::test]
async fn memory_store_is_shared_by_owner() {
    let store = Arc::new(MemoryStore::new());
    let issuer = holder();
    let harness = Harness::with_store(store.clone(), issuer.clone()).unwrap();
    harness.fund(&[FUNDING, FUNDING]).unwrap();
    assert_eq!(store.count(&address_of(&issuer)), 2);
}
