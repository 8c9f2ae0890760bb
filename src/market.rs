//! Per-market state.
//!
//! ## Architecture
//!
//! A [`Market`] is one explicit state struct per underlying asset:
//!
//! - [`MarketConfig`]: reserve factor, P2P index cursor, heap capacity and
//!   default iteration budgets
//! - [`Indexes`] plus the timestamp of the last accrual
//! - [`PauseStatus`] flags
//! - [`MarketBalances`]: the ledger, its ordering structures and deltas
//!
//! Indexes are refreshed with [`Market::update_indexes`] before any balance
//! is read or written. The matching engine and the position flows operate on
//! `&mut Market`.

use primitive_types::U256;
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::interest::{compute_indexes, IndexParams, PoolRates};
use crate::ledger::MarketBalances;
use crate::math::percentage::validate_basis_points;
use crate::math::ray::{approx_eq, checked_add, ray_mul, ray_mul_up, zero_floor_sub};
use crate::types::snapshot::u256_to_word;
use crate::types::{Address, Indexes, MarketSnapshot, Operation, Partition, Side};

// ============================================================================
// Configuration
// ============================================================================

/// Parameters of one market.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketConfig {
    /// Share of the P2P spread kept by the protocol (basis points)
    pub reserve_factor: u64,
    /// Weight of the pool borrow rate in the P2P rate (basis points)
    pub p2p_index_cursor: u64,
    /// Capacity of each ordering structure
    pub max_sorted_users: usize,
    /// Loop budget used by repay when the caller passes none
    pub default_repay_iterations: u32,
    /// Loop budget used by withdraw when the caller passes none
    pub default_withdraw_iterations: u32,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            reserve_factor: 1_000,
            p2p_index_cursor: 3_333,
            max_sorted_users: 128,
            default_repay_iterations: 10,
            default_withdraw_iterations: 10,
        }
    }
}

impl MarketConfig {
    pub fn validate(&self) -> Result<()> {
        validate_basis_points(self.reserve_factor)?;
        validate_basis_points(self.p2p_index_cursor)?;
        Ok(())
    }
}

// ============================================================================
// Pause flags
// ============================================================================

/// Paused entry points of a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PauseStatus {
    pub is_supply_paused: bool,
    pub is_borrow_paused: bool,
    pub is_repay_paused: bool,
    pub is_withdraw_paused: bool,
    /// Promote/demote become no-ops and new liquidity goes to the pool.
    pub is_p2p_disabled: bool,
}

impl PauseStatus {
    /// Everything paused.
    pub fn all() -> Self {
        Self {
            is_supply_paused: true,
            is_borrow_paused: true,
            is_repay_paused: true,
            is_withdraw_paused: true,
            is_p2p_disabled: true,
        }
    }

    pub fn is_paused(&self, operation: Operation) -> bool {
        match operation {
            Operation::Supply | Operation::SupplyCollateral => self.is_supply_paused,
            Operation::Borrow => self.is_borrow_paused,
            Operation::Repay => self.is_repay_paused,
            Operation::Withdraw | Operation::WithdrawCollateral => self.is_withdraw_paused,
            Operation::Matching => self.is_p2p_disabled,
        }
    }

    /// Fails with [`CoreError::Paused`] if `operation` is paused.
    pub fn check(&self, operation: Operation) -> Result<()> {
        if self.is_paused(operation) {
            return Err(CoreError::Paused(operation));
        }
        Ok(())
    }

    /// Bit 0 supply, 1 borrow, 2 repay, 3 withdraw, 4 P2P.
    pub fn to_bits(&self) -> u8 {
        (self.is_supply_paused as u8)
            | (self.is_borrow_paused as u8) << 1
            | (self.is_repay_paused as u8) << 2
            | (self.is_withdraw_paused as u8) << 3
            | (self.is_p2p_disabled as u8) << 4
    }

    pub fn from_bits(bits: u8) -> Self {
        Self {
            is_supply_paused: bits & 1 != 0,
            is_borrow_paused: bits & (1 << 1) != 0,
            is_repay_paused: bits & (1 << 2) != 0,
            is_withdraw_paused: bits & (1 << 3) != 0,
            is_p2p_disabled: bits & (1 << 4) != 0,
        }
    }
}

// ============================================================================
// Market
// ============================================================================

/// State of one market.
#[derive(Debug, Clone)]
pub struct Market {
    underlying: Address,
    config: MarketConfig,
    indexes: Indexes,
    last_update: u64,
    pub pause: PauseStatus,
    pub(crate) balances: MarketBalances,
}

impl Market {
    /// Create a market at `now`, indexes at 1.0 and deltas at zero.
    pub fn new(underlying: Address, config: MarketConfig, now: u64) -> Result<Self> {
        if underlying.is_zero() {
            return Err(CoreError::ZeroAddress);
        }
        config.validate()?;
        Ok(Self {
            underlying,
            config,
            indexes: Indexes::initial(),
            last_update: now,
            pause: PauseStatus::default(),
            balances: MarketBalances::new(config.max_sorted_users),
        })
    }

    #[inline]
    pub fn underlying(&self) -> Address {
        self.underlying
    }

    #[inline]
    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    /// Indexes as of the last accrual.
    #[inline]
    pub fn indexes(&self) -> &Indexes {
        &self.indexes
    }

    #[inline]
    pub fn last_update(&self) -> u64 {
        self.last_update
    }

    #[inline]
    pub fn balances(&self) -> &MarketBalances {
        &self.balances
    }

    #[inline]
    pub fn is_p2p_enabled(&self) -> bool {
        !self.pause.is_p2p_disabled
    }

    /// Indexes at `now` without storing them.
    pub fn compute_indexes(&self, now: u64, rates: PoolRates) -> Result<Indexes> {
        compute_indexes(&IndexParams {
            last: self.indexes,
            last_update: self.last_update,
            now,
            rates,
            deltas: self.balances.deltas(),
            reserve_factor: self.config.reserve_factor,
            p2p_index_cursor: self.config.p2p_index_cursor,
        })
    }

    /// Accrue interest up to `now` and store the new indexes.
    pub fn update_indexes(&mut self, now: u64, rates: PoolRates) -> Result<Indexes> {
        let indexes = self.compute_indexes(now, rates)?;
        if now > self.last_update {
            debug!(
                market = %self.underlying,
                elapsed = now - self.last_update,
                supply_p2p = %indexes.supply.p2p_index,
                borrow_p2p = %indexes.borrow.p2p_index,
                "indexes updated"
            );
        }
        self.indexes = indexes;
        self.last_update = now;
        Ok(indexes)
    }

    /// Roll accrual back to a checkpoint taken before a failed operation.
    pub(crate) fn restore_accrual(&mut self, indexes: Indexes, last_update: u64) {
        self.indexes = indexes;
        self.last_update = last_update;
    }

    // ========================================================================
    // Parameter updates
    // ========================================================================

    pub fn set_reserve_factor(&mut self, reserve_factor: u64) -> Result<()> {
        self.config.reserve_factor = validate_basis_points(reserve_factor)?;
        Ok(())
    }

    pub fn set_p2p_index_cursor(&mut self, cursor: u64) -> Result<()> {
        self.config.p2p_index_cursor = validate_basis_points(cursor)?;
        Ok(())
    }

    /// Resize the ordering structures and re-rank every account.
    pub fn set_max_sorted_users(&mut self, max_sorted_users: usize) {
        self.config.max_sorted_users = max_sorted_users;
        self.balances.set_max_sorted_users(max_sorted_users);
    }

    // ========================================================================
    // Actual (unscaled) views
    // ========================================================================

    /// Supply of `user` in underlying units, rounded down.
    pub fn supply_balance(&self, user: &Address) -> Result<U256> {
        let supply = &self.indexes.supply;
        checked_add(
            ray_mul(self.balances.scaled_pool_balance(user, Side::Supply), supply.pool_index)?,
            ray_mul(self.balances.scaled_p2p_balance(user, Side::Supply), supply.p2p_index)?,
        )
    }

    /// Debt of `user` in underlying units, rounded up.
    pub fn borrow_balance(&self, user: &Address) -> Result<U256> {
        let borrow = &self.indexes.borrow;
        checked_add(
            ray_mul_up(self.balances.scaled_pool_balance(user, Side::Borrow), borrow.pool_index)?,
            ray_mul_up(self.balances.scaled_p2p_balance(user, Side::Borrow), borrow.p2p_index)?,
        )
    }

    /// Collateral of `user` in underlying units, rounded down.
    pub fn collateral_balance(&self, user: &Address) -> Result<U256> {
        ray_mul(self.balances.scaled_collateral_balance(user), self.indexes.supply.pool_index)
    }

    /// Underlying this market holds on the pool's supply side: pool
    /// supply, supply delta and collateral.
    pub fn pool_supply_value(&self) -> Result<U256> {
        let scaled = checked_add(
            checked_add(
                self.balances.total(Side::Supply, Partition::Pool),
                self.balances.deltas().supply.scaled_delta_pool,
            )?,
            self.balances.collateral_total(),
        )?;
        ray_mul(scaled, self.indexes.supply.pool_index)
    }

    /// Net P2P value of one side: P2P total minus the part resting on the
    /// pool as delta.
    pub fn matched_value(&self, side: Side) -> Result<U256> {
        let indexes = self.indexes.side(side);
        let delta = self.balances.deltas().side(side);
        Ok(zero_floor_sub(
            ray_mul(delta.scaled_p2p_total, indexes.p2p_index)?,
            ray_mul(delta.scaled_delta_pool, indexes.pool_index)?,
        ))
    }

    /// Check that matched supply is covered by matched borrow.
    ///
    /// Flows keep both sides equal; accrual with a non-zero reserve factor
    /// grows the borrow side faster. Returns that gap (the P2P reserve), and
    /// fails if matched supply exceeds matched borrow by more than
    /// `tolerance`, or if either side's delta is worth more than its P2P
    /// total.
    pub fn verify_coverage(&self, tolerance: U256) -> Result<U256> {
        for side in [Side::Supply, Side::Borrow] {
            let indexes = self.indexes.side(side);
            let delta = self.balances.deltas().side(side);
            let delta_value = ray_mul(delta.scaled_delta_pool, indexes.pool_index)?;
            let p2p_value = ray_mul(delta.scaled_p2p_total, indexes.p2p_index)?;
            if delta_value > checked_add(p2p_value, tolerance)? {
                return Err(CoreError::InvariantViolation(format!(
                    "{side:?} delta {delta_value} exceeds P2P total {p2p_value}"
                )));
            }
        }
        let supply = self.matched_value(Side::Supply)?;
        let borrow = self.matched_value(Side::Borrow)?;
        if supply > borrow && !approx_eq(supply, borrow, tolerance) {
            return Err(CoreError::InvariantViolation(format!(
                "matched supply {supply} exceeds matched borrow {borrow}"
            )));
        }
        Ok(zero_floor_sub(borrow, supply))
    }

    /// Ledger and ordering structure invariants.
    pub fn verify_invariants(&self) -> Result<()> {
        self.balances.verify_invariants()
    }

    pub fn snapshot(&self) -> MarketSnapshot {
        let deltas = self.balances.deltas();
        MarketSnapshot {
            underlying: self.underlying.to_word(),
            supply_pool_index: u256_to_word(self.indexes.supply.pool_index),
            supply_p2p_index: u256_to_word(self.indexes.supply.p2p_index),
            borrow_pool_index: u256_to_word(self.indexes.borrow.pool_index),
            borrow_p2p_index: u256_to_word(self.indexes.borrow.p2p_index),
            supply_delta_pool: u256_to_word(deltas.supply.scaled_delta_pool),
            supply_p2p_total: u256_to_word(deltas.supply.scaled_p2p_total),
            borrow_delta_pool: u256_to_word(deltas.borrow.scaled_delta_pool),
            borrow_p2p_total: u256_to_word(deltas.borrow.scaled_p2p_total),
            reserve_factor: self.config.reserve_factor,
            p2p_index_cursor: self.config.p2p_index_cursor,
            max_sorted_users: self.config.max_sorted_users as u64,
            last_update_timestamp: self.last_update,
            pause_bits: self.pause.to_bits(),
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
