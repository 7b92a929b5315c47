//! # UTXO Lease Manager
//!
//! Every transaction the service builds spends outputs from a shared pool.
//! Two in-flight operations spending the same output means one of them gets
//! rejected by the ledger, so outputs are *leased*: moved out of the pool
//! into a reservation table while an operation holds them, and only deleted
//! for good once that operation succeeded.
//!
//! ```text
//!            reserve()                       success
//! Available ──────────▶ Reserved ──────────────────────▶ Spent (deleted from store)
//!     ▲                    │
//!     └────────────────────┘  failure / cancellation
//!        (retry depth +1 on too-long-mempool-chain)
//! ```
//!
//! Selection prefers outputs with the lowest retry depth: an output that was
//! part of a too-long-mempool-chain rejection is likely to have a deep
//! unconfirmed ancestry, and waiting a bit before touching it again helps.
//!
//! The pool lock is a `parking_lot::Mutex` held only for in-memory
//! bookkeeping, never across an await.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::store::PersistedUtxoStore;
use super::types::{LeasedUtxo, UtxoPatch};
use crate::error::{FtError, FtResult};
use crate::ledger::OutPoint;

// ---------------------------------------------------------------------------
// Replenishment
// ---------------------------------------------------------------------------

/// Notified after every leased operation, whatever its outcome.
pub trait PoolReplenisher: Send + Sync {
    fn check(&self, owner: &str, available_utxos: usize, available_value: u64);
}

/// Logs a warning when the pool drops below `floor` utxos. Topping the pool
/// up is an operator task.
#[derive(Debug, Clone, Copy)]
pub struct FloorAlert {
    pub floor: usize,
}

impl PoolReplenisher for FloorAlert {
    fn check(&self, owner: &str, available_utxos: usize, available_value: u64) {
        if available_utxos < self.floor {
            warn!(
                owner,
                available_utxos,
                available_value,
                floor = self.floor,
                "utxo pool below floor, replenish it"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Which error a short pool produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shortfall {
    Funds,
    TokenBalance,
}

impl Shortfall {
    fn error(self, required: u64, available: u64) -> FtError {
        match self {
            Shortfall::Funds => FtError::InsufficientFunds { required, available },
            Shortfall::TokenBalance => FtError::InsufficientTokenBalance { required, available },
        }
    }
}

struct PoolState<U> {
    available: Vec<U>,
    reserved: HashSet<OutPoint>,
}

/// Exclusive, retry-aware access to the utxos of one owner key.
pub struct UtxoLeaseManager<U: LeasedUtxo> {
    owner: String,
    store: Arc<dyn PersistedUtxoStore<U>>,
    state: Mutex<PoolState<U>>,
    shortfall: Shortfall,
    replenisher: Option<Arc<dyn PoolReplenisher>>,
}

impl<U: LeasedUtxo> UtxoLeaseManager<U> {
    /// Hydrate a pool for `owner` from `store`.
    pub fn load(
        owner: impl Into<String>,
        store: Arc<dyn PersistedUtxoStore<U>>,
        shortfall: Shortfall,
    ) -> FtResult<Self> {
        let owner = owner.into();
        let available = store.list(&owner)?;
        debug!(owner = %owner, utxos = available.len(), "utxo pool loaded");
        Ok(Self {
            owner,
            store,
            state: Mutex::new(PoolState { available, reserved: HashSet::new() }),
            shortfall,
            replenisher: None,
        })
    }

    pub fn with_replenisher(mut self, replenisher: Arc<dyn PoolReplenisher>) -> Self {
        self.replenisher = Some(replenisher);
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn available_len(&self) -> usize {
        self.state.lock().available.len()
    }

    pub fn available_value(&self) -> u64 {
        self.state.lock().available.iter().map(LeasedUtxo::lease_value).sum()
    }

    pub fn reserved_len(&self) -> usize {
        self.state.lock().reserved.len()
    }

    /// Copy of the available utxos.
    pub fn snapshot(&self) -> Vec<U> {
        self.state.lock().available.clone()
    }

    /// Order `pool` shallowest first and return how many leading utxos
    /// cover `estimate`. Leaves `pool` untouched when it cannot.
    fn select(&self, pool: &mut [U], estimate: u64) -> FtResult<usize> {
        let total: u64 = pool.iter().map(LeasedUtxo::lease_value).sum();
        if total < estimate {
            return Err(self.shortfall.error(estimate, total));
        }
        pool.sort_by_key(LeasedUtxo::retry_depth);
        let mut sum = 0u64;
        let mut count = 0usize;
        for utxo in pool.iter() {
            if count > 0 && sum >= estimate {
                break;
            }
            sum += utxo.lease_value();
            count += 1;
        }
        Ok(count)
    }

    /// What [`reserve`](Self::reserve) would take right now, without taking it.
    pub fn preview(&self, estimate: u64) -> FtResult<Vec<U>> {
        let mut pool = self.snapshot();
        let count = self.select(&mut pool, estimate)?;
        pool.truncate(count);
        Ok(pool)
    }

    /// Take the shallowest prefix of the pool whose value covers `estimate`.
    ///
    /// Fails without touching the pool when the whole pool falls short.
    pub fn reserve(&self, estimate: u64) -> FtResult<Reservation<'_, U>> {
        let mut state = self.state.lock();
        let count = self.select(&mut state.available, estimate)?;
        let taken: Vec<U> = state.available.drain(..count).collect();
        for utxo in &taken {
            state.reserved.insert(utxo.outpoint());
        }
        drop(state);
        debug!(
            owner = %self.owner,
            estimate,
            utxos = taken.len(),
            value = taken.iter().map(LeasedUtxo::lease_value).sum::<u64>(),
            "utxos reserved"
        );
        Ok(Reservation { manager: self, utxos: taken, settled: false })
    }

    /// Reserve, run `operation` once with the reserved utxos, then settle:
    ///
    /// - success: the utxos are deleted from the store;
    /// - too-long-mempool-chain: retry depths go up by one, are persisted,
    ///   and the utxos return to the pool;
    /// - any other failure: the utxos return to the pool unchanged.
    ///
    /// The replenisher is consulted on every path.
    pub async fn with_reservation<T, F, Fut>(&self, estimate: u64, operation: F) -> FtResult<T>
    where
        F: FnOnce(Vec<U>) -> Fut,
        Fut: Future<Output = FtResult<T>>,
    {
        let reservation = match self.reserve(estimate) {
            Ok(reservation) => reservation,
            Err(err) => {
                self.check_replenish();
                return Err(err);
            }
        };

        let outcome = operation(reservation.utxos().to_vec()).await;
        let result = match outcome {
            Ok(value) => reservation.commit().map(|_| value),
            Err(err) => {
                let bump = err.is_mempool_chain_too_long();
                if let Err(persist_err) = reservation.recycle(bump) {
                    error!(owner = %self.owner, error = %persist_err, "failed to persist recycled utxos");
                }
                Err(err)
            }
        };
        self.check_replenish();
        result
    }

    /// Add freshly created utxos to the store and the pool.
    pub fn deposit(&self, utxos: Vec<U>) -> FtResult<()> {
        if utxos.is_empty() {
            return Ok(());
        }
        self.store.insert(&self.owner, &utxos)?;
        debug!(owner = %self.owner, utxos = utxos.len(), "utxos deposited");
        self.state.lock().available.extend(utxos);
        Ok(())
    }

    fn check_replenish(&self) {
        if let Some(replenisher) = &self.replenisher {
            let (count, value) = {
                let state = self.state.lock();
                (state.available.len(), state.available.iter().map(LeasedUtxo::lease_value).sum())
            };
            replenisher.check(&self.owner, count, value);
        }
    }

    /// Put `utxos` back into the pool, bumping and persisting retry depths
    /// first when `bump` is set.
    fn give_back(&self, mut utxos: Vec<U>, bump: bool) -> FtResult<()> {
        let mut first_error = None;
        if bump {
            for utxo in utxos.iter_mut() {
                let depth = utxo.retry_depth() + 1;
                utxo.set_retry_depth(depth);
                let patch = UtxoPatch { retry_depth: Some(depth) };
                if let Err(e) = self.store.update(&self.owner, &utxo.outpoint(), &patch) {
                    first_error.get_or_insert(e);
                }
            }
        }
        warn!(owner = %self.owner, utxos = utxos.len(), bumped = bump, "reservation recycled");
        let mut state = self.state.lock();
        for utxo in &utxos {
            state.reserved.remove(&utxo.outpoint());
        }
        state.available.extend(utxos);
        drop(state);
        first_error.map_or(Ok(()), Err)
    }

    fn release_spent(&self, utxos: &[U]) -> FtResult<()> {
        {
            let mut state = self.state.lock();
            for utxo in utxos {
                state.reserved.remove(&utxo.outpoint());
            }
        }
        let mut first_error = None;
        for utxo in utxos {
            if let Err(e) = self.store.remove(&self.owner, &utxo.outpoint()) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl<U: LeasedUtxo> std::fmt::Debug for UtxoLeaseManager<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("UtxoLeaseManager")
            .field("owner", &self.owner)
            .field("available", &state.available.len())
            .field("reserved", &state.reserved.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Reservation
// ---------------------------------------------------------------------------

/// Utxos held by one in-flight operation.
///
/// Dropping an unsettled reservation (say, because the operation's future
/// was cancelled) returns its utxos to the pool unchanged.
#[must_use = "an unsettled reservation is recycled on drop"]
pub struct Reservation<'a, U: LeasedUtxo> {
    manager: &'a UtxoLeaseManager<U>,
    utxos: Vec<U>,
    settled: bool,
}

impl<'a, U: LeasedUtxo> Reservation<'a, U> {
    pub fn utxos(&self) -> &[U] {
        &self.utxos
    }

    pub fn total(&self) -> u64 {
        self.utxos.iter().map(LeasedUtxo::lease_value).sum()
    }

    /// The utxos were spent: delete them from the store.
    pub fn commit(mut self) -> FtResult<()> {
        self.settled = true;
        let utxos = std::mem::take(&mut self.utxos);
        self.manager.release_spent(&utxos)
    }

    /// The operation failed: return the utxos to the pool.
    pub fn recycle(mut self, bump_retry_depth: bool) -> FtResult<()> {
        self.settled = true;
        let utxos = std::mem::take(&mut self.utxos);
        self.manager.give_back(utxos, bump_retry_depth)
    }
}

impl<'a, U: LeasedUtxo> Drop for Reservation<'a, U> {
    fn drop(&mut self) {
        if !self.settled {
            let utxos = std::mem::take(&mut self.utxos);
            // No store writes without a bump, so this cannot fail.
            let _ = self.manager.give_back(utxos, false);
        }
    }
}
