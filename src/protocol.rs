//! Multi-market coordinator.
//!
//! ## Architecture
//!
//! - **BTreeMap** of underlying address to market, so iteration (state root,
//!   multi-market locking) is always in ascending address order
//! - **parking_lot::Mutex** per market: mutations of one market are
//!   serialized, different markets proceed independently
//! - **PoolAdapter**: the underlying pool's rates and limits
//!
//! ## Transactions
//!
//! Every mutating entry point locks its market and accrues it to `now`
//! before running. A failed operation leaves the market exactly as it was:
//!
//! - Built-in flows, matching loops and parameter updates check every
//!   precondition before their first write, so they run in place and only
//!   the accrual is rolled back on error
//! - [`Protocol::transact`] and [`Protocol::with_markets`] take arbitrary
//!   closures, so they run on copies and commit on success
//!
//! ## Example
//!
//! ```
//! use p2p_lending::market::MarketConfig;
//! use p2p_lending::protocol::{FixedRatePool, Protocol};
//! use p2p_lending::types::Address;
//! use primitive_types::U256;
//!
//! let market = Address::from_low_u64(0xDA1);
//! let mut protocol = Protocol::new(FixedRatePool::default());
//! protocol.create_market(market, MarketConfig::default(), 0).unwrap();
//!
//! let alice = Address::from_low_u64(1);
//! let bob = Address::from_low_u64(2);
//! protocol.supply(market, alice, U256::from(1_000u64), 4, 10).unwrap();
//! let receipt = protocol.borrow(market, bob, U256::from(600u64), 4, 20).unwrap();
//!
//! // Bob is matched peer-to-peer with Alice
//! assert_eq!(receipt.promoted, U256::from(600u64));
//! ```

use std::collections::BTreeMap;

use parking_lot::{Mutex, MutexGuard};
use primitive_types::U256;
use tracing::info;

use crate::engine::{self, MatchResult};
use crate::error::{CoreError, Result};
use crate::interest::PoolRates;
use crate::market::{Market, MarketConfig, PauseStatus};
use crate::positions::{PoolLimits, PositionReceipt};
use crate::types::snapshot::root_hex;
use crate::types::{Address, Indexes, Side, StateHasher};

// ============================================================================
// Pool adapter
// ============================================================================

/// View of the underlying lending pool.
pub trait PoolAdapter {
    /// Per-second ray rates of the pool for `underlying`.
    fn rates(&self, underlying: &Address) -> Result<PoolRates>;

    /// Underlying that can currently leave the pool.
    fn available_liquidity(&self, underlying: &Address) -> Result<U256>;

    /// Supply cap of the pool for `underlying`, if any.
    fn supply_cap(&self, underlying: &Address) -> Option<U256>;

    fn limits(&self, underlying: &Address) -> Result<PoolLimits> {
        Ok(PoolLimits {
            available_liquidity: self.available_liquidity(underlying)?,
            supply_cap: self.supply_cap(underlying),
        })
    }
}

/// Parameters of one asset in a [`FixedRatePool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedRateReserve {
    pub rates: PoolRates,
    pub available_liquidity: U256,
    pub supply_cap: Option<U256>,
}

impl Default for FixedRateReserve {
    fn default() -> Self {
        Self {
            rates: PoolRates::default(),
            available_liquidity: U256::MAX,
            supply_cap: None,
        }
    }
}

/// In-memory pool with constant rates per asset.
///
/// Assets without an entry use the default reserve.
#[derive(Debug, Clone, Default)]
pub struct FixedRatePool {
    default_reserve: FixedRateReserve,
    reserves: BTreeMap<Address, FixedRateReserve>,
}

impl FixedRatePool {
    /// Same rates for every asset.
    pub fn with_rates(rates: PoolRates) -> Self {
        Self {
            default_reserve: FixedRateReserve {
                rates,
                ..Default::default()
            },
            reserves: BTreeMap::new(),
        }
    }

    pub fn set_reserve(&mut self, underlying: Address, reserve: FixedRateReserve) {
        self.reserves.insert(underlying, reserve);
    }

    pub fn reserve(&self, underlying: &Address) -> FixedRateReserve {
        self.reserves.get(underlying).copied().unwrap_or(self.default_reserve)
    }

    fn reserve_mut(&mut self, underlying: Address) -> &mut FixedRateReserve {
        let default_reserve = self.default_reserve;
        self.reserves.entry(underlying).or_insert(default_reserve)
    }

    pub fn set_rates(&mut self, underlying: Address, rates: PoolRates) {
        self.reserve_mut(underlying).rates = rates;
    }

    pub fn set_available_liquidity(&mut self, underlying: Address, liquidity: U256) {
        self.reserve_mut(underlying).available_liquidity = liquidity;
    }

    pub fn set_supply_cap(&mut self, underlying: Address, cap: Option<U256>) {
        self.reserve_mut(underlying).supply_cap = cap;
    }
}

impl PoolAdapter for FixedRatePool {
    fn rates(&self, underlying: &Address) -> Result<PoolRates> {
        Ok(self.reserve(underlying).rates)
    }

    fn available_liquidity(&self, underlying: &Address) -> Result<U256> {
        Ok(self.reserve(underlying).available_liquidity)
    }

    fn supply_cap(&self, underlying: &Address) -> Option<U256> {
        self.reserve(underlying).supply_cap
    }
}

// ============================================================================
// Protocol
// ============================================================================

/// Every market of the overlay, over one underlying pool.
pub struct Protocol<P: PoolAdapter> {
    pool: P,
    markets: BTreeMap<Address, Mutex<Market>>,
}

impl<P: PoolAdapter> Protocol<P> {
    pub fn new(pool: P) -> Self {
        Self {
            pool,
            markets: BTreeMap::new(),
        }
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut P {
        &mut self.pool
    }

    /// Market ids in ascending order.
    pub fn market_ids(&self) -> Vec<Address> {
        self.markets.keys().copied().collect()
    }

    pub fn create_market(&mut self, underlying: Address, config: MarketConfig, now: u64) -> Result<()> {
        if self.markets.contains_key(&underlying) {
            return Err(CoreError::MarketAlreadyCreated);
        }
        let market = Market::new(underlying, config, now)?;
        self.markets.insert(underlying, Mutex::new(market));
        info!(market = %underlying, reserve_factor = config.reserve_factor, cursor = config.p2p_index_cursor, "market created");
        Ok(())
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    fn lock(&self, market: &Address) -> Result<MutexGuard<'_, Market>> {
        self.markets
            .get(market)
            .map(|cell| cell.lock())
            .ok_or(CoreError::MarketNotCreated)
    }

    /// Run a built-in operation on `market` in place, after accruing it.
    ///
    /// `f` must not write before it has validated; on error only the accrual
    /// needs undoing.
    fn apply<T>(&self, market: Address, now: u64, f: impl FnOnce(&mut Market, &PoolLimits) -> Result<T>) -> Result<T> {
        let mut guard = self.lock(&market)?;
        let (indexes, last_update) = (*guard.indexes(), guard.last_update());
        let rates = self.pool.rates(&market)?;
        let limits = self.pool.limits(&market)?;

        let result = guard.update_indexes(now, rates).and_then(|_| f(&mut *guard, &limits));
        if result.is_err() {
            guard.restore_accrual(indexes, last_update);
        }
        result
    }

    /// Run `f` on a refreshed copy of `market`, committing on success.
    pub fn transact<T>(
        &self,
        market: Address,
        now: u64,
        f: impl FnOnce(&mut Market, &PoolLimits) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.lock(&market)?;
        let mut working = guard.clone();
        working.update_indexes(now, self.pool.rates(&market)?)?;
        let limits = self.pool.limits(&market)?;

        let output = f(&mut working, &limits)?;
        *guard = working;
        Ok(output)
    }

    /// Run `f` over several markets at once, all or nothing.
    ///
    /// Markets are locked in ascending address order (duplicates ignored),
    /// refreshed to `now`, and handed to `f` in that order.
    pub fn with_markets<T>(
        &self,
        markets: &[Address],
        now: u64,
        f: impl FnOnce(&mut [Market]) -> Result<T>,
    ) -> Result<T> {
        let mut ids = markets.to_vec();
        ids.sort();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in &ids {
            guards.push(self.lock(id)?);
        }

        let mut working = Vec::with_capacity(ids.len());
        for (id, guard) in ids.iter().zip(guards.iter()) {
            let mut market = (**guard).clone();
            market.update_indexes(now, self.pool.rates(id)?)?;
            working.push(market);
        }

        let output = f(&mut working)?;
        for (guard, market) in guards.iter_mut().zip(working) {
            **guard = market;
        }
        Ok(output)
    }

    /// Read-only access to a market as last committed.
    pub fn view<T>(&self, market: Address, f: impl FnOnce(&Market) -> T) -> Result<T> {
        let guard = self.lock(&market)?;
        Ok(f(&guard))
    }

    // ========================================================================
    // Indexes
    // ========================================================================

    /// Indexes of `market` at `now`, without storing them.
    pub fn updated_indexes(&self, market: Address, now: u64) -> Result<Indexes> {
        let guard = self.lock(&market)?;
        guard.compute_indexes(now, self.pool.rates(&market)?)
    }

    /// Accrue `market` up to `now`.
    pub fn update_indexes(&self, market: Address, now: u64) -> Result<Indexes> {
        self.apply(market, now, |m, _| Ok(*m.indexes()))
    }

    // ========================================================================
    // Position flows
    // ========================================================================

    pub fn supply(&self, market: Address, user: Address, amount: U256, max_iterations: u32, now: u64) -> Result<PositionReceipt> {
        self.apply(market, now, |m, limits| m.supply(user, amount, max_iterations, limits))
    }

    pub fn borrow(&self, market: Address, user: Address, amount: U256, max_iterations: u32, now: u64) -> Result<PositionReceipt> {
        self.apply(market, now, |m, limits| m.borrow(user, amount, max_iterations, limits))
    }

    pub fn repay(
        &self,
        market: Address,
        user: Address,
        amount: U256,
        max_iterations: Option<u32>,
        now: u64,
    ) -> Result<PositionReceipt> {
        self.apply(market, now, |m, _| m.repay(user, amount, max_iterations))
    }

    pub fn withdraw(
        &self,
        market: Address,
        user: Address,
        amount: U256,
        max_iterations: Option<u32>,
        now: u64,
    ) -> Result<PositionReceipt> {
        self.apply(market, now, |m, limits| m.withdraw(user, amount, max_iterations, limits))
    }

    pub fn supply_collateral(&self, market: Address, user: Address, amount: U256, now: u64) -> Result<PositionReceipt> {
        self.apply(market, now, |m, limits| m.supply_collateral(user, amount, limits))
    }

    pub fn withdraw_collateral(&self, market: Address, user: Address, amount: U256, now: u64) -> Result<PositionReceipt> {
        self.apply(market, now, |m, limits| m.withdraw_collateral(user, amount, limits))
    }

    // ========================================================================
    // Matching engine entry points
    // ========================================================================

    pub fn promote_suppliers(&self, market: Address, amount: U256, max_loops: u32, now: u64) -> Result<MatchResult> {
        self.apply(market, now, |m, _| engine::promote_suppliers(m, amount, max_loops))
    }

    pub fn promote_borrowers(&self, market: Address, amount: U256, max_loops: u32, now: u64) -> Result<MatchResult> {
        self.apply(market, now, |m, _| engine::promote_borrowers(m, amount, max_loops))
    }

    pub fn demote_suppliers(&self, market: Address, amount: U256, max_loops: u32, now: u64) -> Result<U256> {
        self.apply(market, now, |m, _| engine::demote_suppliers(m, amount, max_loops))
    }

    pub fn demote_borrowers(&self, market: Address, amount: U256, max_loops: u32, now: u64) -> Result<U256> {
        self.apply(market, now, |m, _| engine::demote_borrowers(m, amount, max_loops))
    }

    // ========================================================================
    // Ledger accessors
    // ========================================================================

    pub fn scaled_pool_balance(&self, market: Address, user: &Address, side: Side) -> Result<U256> {
        self.view(market, |m| m.balances().scaled_pool_balance(user, side))
    }

    pub fn scaled_p2p_balance(&self, market: Address, user: &Address, side: Side) -> Result<U256> {
        self.view(market, |m| m.balances().scaled_p2p_balance(user, side))
    }

    pub fn scaled_collateral_balance(&self, market: Address, user: &Address) -> Result<U256> {
        self.view(market, |m| m.balances().scaled_collateral_balance(user))
    }

    // ========================================================================
    // Administration
    // ========================================================================

    pub fn set_pause_status(&self, market: Address, pause: PauseStatus) -> Result<()> {
        let mut guard = self.lock(&market)?;
        guard.pause = pause;
        info!(market = %market, bits = pause.to_bits(), "pause status set");
        Ok(())
    }

    pub fn set_is_p2p_disabled(&self, market: Address, disabled: bool) -> Result<()> {
        let mut guard = self.lock(&market)?;
        guard.pause.is_p2p_disabled = disabled;
        info!(market = %market, disabled, "p2p matching toggled");
        Ok(())
    }

    /// Accrues at the old reserve factor up to `now` first.
    pub fn set_reserve_factor(&self, market: Address, reserve_factor: u64, now: u64) -> Result<()> {
        self.apply(market, now, |m, _| m.set_reserve_factor(reserve_factor))
    }

    /// Accrues at the old cursor up to `now` first.
    pub fn set_p2p_index_cursor(&self, market: Address, cursor: u64, now: u64) -> Result<()> {
        self.apply(market, now, |m, _| m.set_p2p_index_cursor(cursor))
    }

    pub fn set_max_sorted_users(&self, market: Address, max_sorted_users: usize) -> Result<()> {
        let mut guard = self.lock(&market)?;
        guard.set_max_sorted_users(max_sorted_users);
        Ok(())
    }

    // ========================================================================
    // State root
    // ========================================================================

    /// SHA-256 over every market and its accounts, in address order.
    pub fn state_root(&self) -> Result<[u8; 32]> {
        let mut hasher = StateHasher::new();
        for (id, cell) in &self.markets {
            let market = cell.lock();
            hasher.absorb_market(&market.snapshot())?;
            for account in market.balances().account_snapshots(*id) {
                hasher.absorb_account(&account)?;
            }
        }
        Ok(hasher.finish())
    }

    pub fn state_root_hex(&self) -> Result<String> {
        Ok(root_hex(&self.state_root()?))
    }

    /// Ledger and coverage checks on every market.
    pub fn verify_invariants(&self, tolerance: U256) -> Result<()> {
        for cell in self.markets.values() {
            let market = cell.lock();
            market.verify_invariants()?;
            market.verify_coverage(tolerance)?;
        }
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
