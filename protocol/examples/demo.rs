//! Terminal walkthrough of a token's lifecycle against in-memory
//! collaborators: genesis, two issues, a split transfer and a refused one.
//!
//! Nothing touches the network. The ledger, oracles and store are the
//! nullables the test suite uses.
//!
//! Run with:
//!   cargo run --example demo

use std::time::Instant;

use sft_protocol::config::Network;
use sft_protocol::crypto::SigningContext;
use sft_protocol::ft::Receiver;
use sft_protocol::ledger::TxId;
use sft_protocol::nullables::Harness;
use sft_protocol::FtResult;

// ---------------------------------------------------------------------------
// ANSI color constants
// ---------------------------------------------------------------------------

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const MAGENTA: &str = "\x1b[35m";
const CYAN: &str = "\x1b[36m";
const WHITE: &str = "\x1b[37m";
const RED: &str = "\x1b[31m";

// ---------------------------------------------------------------------------
// Display helpers
// ---------------------------------------------------------------------------

fn section(num: u32, title: &str) {
    println!();
    println!("{BOLD}{CYAN}===[{YELLOW} Step {num} {CYAN}]============================================{RESET}");
    println!("{BOLD}{WHITE}  {title}{RESET}");
}

fn success(text: &str) {
    println!("{GREEN}  [OK] {text}{RESET}");
}

fn refused(text: &str) {
    println!("{RED}  [REFUSED] {text}{RESET}");
}

fn info(label: &str, value: &str) {
    println!("{WHITE}  {BOLD}{label}:{RESET} {YELLOW}{value}{RESET}");
}

fn timing(label: &str, elapsed: std::time::Duration) {
    let ms = elapsed.as_secs_f64() * 1000.0;
    println!("{DIM}{MAGENTA}  [{label}: {ms:.2} ms]{RESET}");
}

fn balances(harness: &Harness, genesis: &TxId, holders: &[(&str, &SigningContext)]) -> FtResult<()> {
    for (name, ctx) in holders {
        let balance = harness.service.token_balance(genesis, &ctx.address().to_string())?;
        println!("  {BOLD}{name:<8}{RESET}  {WHITE}{balance:>8}{RESET} {DIM}COIN cents{RESET}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Walkthrough
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> FtResult<()> {
    let harness = Harness::new()?;
    let alice = SigningContext::generate(Network::Testnet);
    let bob = SigningContext::generate(Network::Testnet);
    let holders = [("alice", &alice), ("bob", &bob)];

    section(1, "Fund the issuer");
    harness.fund(&[200_000; 4])?;
    info("issuer", &harness.service.address().to_string());
    info("funding", &format!("{} sats", harness.service.funding_pool().available_value()));

    section(2, "Genesis");
    let start = Instant::now();
    let genesis = harness.service.genesis("Demo Coin", "COIN", 2).await?;
    timing("genesis", start.elapsed());
    success(&format!("genesis {} (fee {} sats)", genesis.genesis_id, genesis.fee));
    let id = genesis.genesis_id;

    section(3, "Issue 300 + 200 to alice");
    for amount in [300, 200] {
        let start = Instant::now();
        let receipt = harness.service.issue(&id, amount, &alice.address().to_string(), true).await?;
        timing("issue", start.elapsed());
        success(&format!("issued {} in {} (token output #{})", amount, receipt.transaction_id, receipt.token_index));
    }
    balances(&harness, &id, &holders)?;

    section(4, "Alice pays bob 350");
    let start = Instant::now();
    let receipt = harness
        .service
        .transfer(&id, &alice.to_wif(), &[Receiver { address: bob.address().to_string(), amount: 350 }])
        .await?;
    timing("route check + transfer", start.elapsed());
    info("route check", &receipt.route_check_id.to_string());
    info("transfer", &receipt.transaction_id.to_string());
    success(&format!("{} token outputs, {} sats in fees", receipt.outputs, receipt.fee));
    balances(&harness, &id, &holders)?;

    section(5, "Bob tries to pay 1000");
    match harness
        .service
        .transfer(&id, &bob.to_wif(), &[Receiver { address: alice.address().to_string(), amount: 1000 }])
        .await
    {
        Ok(_) => success("unexpectedly accepted"),
        Err(e) => refused(&e.to_string()),
    }

    println!();
    info("broadcasts", &harness.ledger.broadcasts().len().to_string());
    Ok(())
}
