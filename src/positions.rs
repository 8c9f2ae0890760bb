//! User position flows.
//!
//! ## Overview
//!
//! Accounting-only entry points on a [`Market`]: they move scaled balances,
//! deltas and ordering structures, and report in a [`PositionReceipt`] how
//! each amount was split. No tokens move; the caller forwards the pool part
//! to the underlying pool.
//!
//! | Flow       | P2P counterpart, in order                                   |
//! |------------|-------------------------------------------------------------|
//! | `supply`   | borrow delta, promoted pool borrowers                       |
//! | `borrow`   | supply delta, promoted pool suppliers                       |
//! | `repay`    | borrow delta, promoted borrowers, demoted suppliers, delta  |
//! | `withdraw` | supply delta, promoted suppliers, demoted borrowers, delta  |
//!
//! Indexes must be refreshed before calling a flow. Every check, the supply
//! cap included, runs before the first mutation: supply previews how much of
//! the amount the borrow delta and the promotion loop would absorb, and caps
//! only the rest. A flow that returns an error leaves the market untouched.
//!
//! Repaying matched debt first settles the P2P reserve, the gap accrual
//! opened between matched borrow and matched supply; only the rest of the
//! repaid P2P amount is rematched.

use primitive_types::U256;
use tracing::{info, warn};

use crate::engine::{demote_borrowers, demote_suppliers, preview_promotion, promote_borrowers, promote_suppliers};
use crate::error::{CoreError, Result};
use crate::market::Market;
use crate::math::ray::{checked_add, ray_div, ray_div_up, ray_mul, ray_mul_up, zero_floor_sub};
use crate::types::{Address, Operation, Partition, Side};

// ============================================================================
// Pool limits
// ============================================================================

/// Constraints reported by the underlying pool at the time of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLimits {
    /// Underlying that can leave the pool right now
    pub available_liquidity: U256,
    /// Maximum underlying this market may hold on the pool's supply side
    pub supply_cap: Option<U256>,
}

impl PoolLimits {
    pub fn unlimited() -> Self {
        Self {
            available_liquidity: U256::MAX,
            supply_cap: None,
        }
    }

    pub fn check_liquidity(&self, amount: U256) -> Result<()> {
        if amount > self.available_liquidity {
            return Err(CoreError::InsufficientPoolLiquidity);
        }
        Ok(())
    }

    pub fn check_supply_cap(&self, current: U256, added: U256) -> Result<()> {
        match self.supply_cap {
            Some(cap) if checked_add(current, added)? > cap => Err(CoreError::SupplyCapExceeded),
            _ => Ok(()),
        }
    }
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self::unlimited()
    }
}

// ============================================================================
// Receipt
// ============================================================================

/// How one flow's amount was split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionReceipt {
    pub operation: Operation,
    pub user: Address,
    /// Amount processed (repay and withdraw are capped at the position)
    pub amount: U256,
    /// Matched against the opposite side's delta
    pub from_delta: U256,
    /// Matched by promoting counterparties
    pub promoted: U256,
    /// Counterparties sent back to the pool
    pub demoted: U256,
    /// New delta created from the unmatched remainder
    pub to_delta: U256,
    /// Part that went straight to or came straight from the pool position
    pub pool: U256,
    /// Repaid P2P debt kept as protocol reserve instead of rematched
    pub reserve: U256,
    /// Matching iterations used
    pub loops: u32,
}

impl PositionReceipt {
    fn new(operation: Operation, user: Address, amount: U256) -> Self {
        Self {
            operation,
            user,
            amount,
            from_delta: U256::zero(),
            promoted: U256::zero(),
            demoted: U256::zero(),
            to_delta: U256::zero(),
            pool: U256::zero(),
            reserve: U256::zero(),
            loops: 0,
        }
    }

    /// Part of the amount that was matched or unmatched P2P.
    pub fn p2p(&self) -> U256 {
        self.amount.saturating_sub(self.pool)
    }
}

// ============================================================================
// Flows
// ============================================================================

impl Market {
    /// Supply `amount` of underlying for `user`.
    pub fn supply(
        &mut self,
        user: Address,
        amount: U256,
        max_iterations: u32,
        limits: &PoolLimits,
    ) -> Result<PositionReceipt> {
        self.validate_entry(Operation::Supply, user, amount)?;
        if limits.supply_cap.is_some() {
            let to_pool = self.preview_supply_pool_part(amount, max_iterations)?;
            if !to_pool.is_zero() {
                limits.check_supply_cap(self.pool_supply_value()?, to_pool)?;
            }
        }
        let indexes = self.indexes().supply;
        let mut receipt = PositionReceipt::new(Operation::Supply, user, amount);
        let mut remaining = amount;

        if self.is_p2p_enabled() {
            receipt.from_delta = self.match_delta(Side::Borrow, remaining)?;
            remaining -= receipt.from_delta;

            let promoted = promote_borrowers(self, remaining, max_iterations)?;
            receipt.promoted = promoted.matched;
            receipt.loops = promoted.loops;
            remaining -= promoted.matched;
        }

        let in_p2p = receipt.from_delta + receipt.promoted;
        if !in_p2p.is_zero() {
            self.balances.credit_p2p_supply(user, ray_div(in_p2p, indexes.p2p_index)?)?;
        }
        if !remaining.is_zero() {
            self.balances.credit_pool_supply(user, ray_div(remaining, indexes.pool_index)?)?;
        }
        receipt.pool = remaining;

        info!(market = %self.underlying(), %user, %amount, p2p = %in_p2p, pool = %remaining, "supply");
        Ok(receipt)
    }

    /// Borrow `amount` of underlying for `user`.
    pub fn borrow(
        &mut self,
        user: Address,
        amount: U256,
        max_iterations: u32,
        limits: &PoolLimits,
    ) -> Result<PositionReceipt> {
        self.validate_entry(Operation::Borrow, user, amount)?;
        limits.check_liquidity(amount)?;
        let indexes = self.indexes().borrow;
        let mut receipt = PositionReceipt::new(Operation::Borrow, user, amount);
        let mut remaining = amount;

        if self.is_p2p_enabled() {
            receipt.from_delta = self.match_delta(Side::Supply, remaining)?;
            remaining -= receipt.from_delta;

            let promoted = promote_suppliers(self, remaining, max_iterations)?;
            receipt.promoted = promoted.matched;
            receipt.loops = promoted.loops;
            remaining -= promoted.matched;
        }

        let in_p2p = receipt.from_delta + receipt.promoted;
        if !in_p2p.is_zero() {
            self.balances.credit_p2p_borrow(user, ray_div_up(in_p2p, indexes.p2p_index)?)?;
        }
        if !remaining.is_zero() {
            self.balances.credit_pool_borrow(user, ray_div_up(remaining, indexes.pool_index)?)?;
        }
        receipt.pool = remaining;

        info!(market = %self.underlying(), %user, %amount, p2p = %in_p2p, pool = %remaining, "borrow");
        Ok(receipt)
    }

    /// Repay up to `amount` of `user`'s debt, pool debt first.
    ///
    /// `max_iterations` defaults to the market's repay budget.
    pub fn repay(&mut self, user: Address, amount: U256, max_iterations: Option<u32>) -> Result<PositionReceipt> {
        self.validate_entry(Operation::Repay, user, amount)?;
        let budget = max_iterations.unwrap_or(self.config().default_repay_iterations);
        let indexes = self.indexes().borrow;

        let pool_scaled = self.balances.scaled_pool_balance(&user, Side::Borrow);
        let p2p_scaled = self.balances.scaled_p2p_balance(&user, Side::Borrow);
        let pool_debt = ray_mul_up(pool_scaled, indexes.pool_index)?;
        let p2p_debt = ray_mul_up(p2p_scaled, indexes.p2p_index)?;
        let debt = checked_add(pool_debt, p2p_debt)?;
        if debt.is_zero() {
            return Err(CoreError::NothingToRepay);
        }

        let amount = amount.min(debt);
        let mut receipt = PositionReceipt::new(Operation::Repay, user, amount);
        let reserve_gap = zero_floor_sub(self.matched_value(Side::Borrow)?, self.matched_value(Side::Supply)?);

        let from_pool = amount.min(pool_debt);
        if !from_pool.is_zero() {
            let new_pool = if from_pool == pool_debt {
                U256::zero()
            } else {
                zero_floor_sub(pool_scaled, ray_div(from_pool, indexes.pool_index)?)
            };
            self.balances.set_balance(user, Side::Borrow, Partition::Pool, new_pool)?;
        }
        receipt.pool = from_pool;

        let from_p2p = amount - from_pool;
        if !from_p2p.is_zero() {
            let new_p2p = if from_p2p == p2p_debt {
                U256::zero()
            } else {
                zero_floor_sub(p2p_scaled, ray_div(from_p2p, indexes.p2p_index)?)
            };
            self.balances.set_balance(user, Side::Borrow, Partition::P2P, new_p2p)?;

            receipt.reserve = reserve_gap.min(from_p2p);
            let to_rematch = from_p2p - receipt.reserve;
            if !to_rematch.is_zero() {
                self.rematch_after_exit(Side::Borrow, to_rematch, budget, &mut receipt)?;
            }
        }

        info!(
            market = %self.underlying(),
            %user,
            %amount,
            pool = %from_pool,
            p2p = %from_p2p,
            reserve = %receipt.reserve,
            "repay"
        );
        Ok(receipt)
    }

    /// Withdraw up to `amount` of `user`'s supply, pool supply first.
    ///
    /// `max_iterations` defaults to the market's withdraw budget.
    pub fn withdraw(
        &mut self,
        user: Address,
        amount: U256,
        max_iterations: Option<u32>,
        limits: &PoolLimits,
    ) -> Result<PositionReceipt> {
        self.validate_entry(Operation::Withdraw, user, amount)?;
        let budget = max_iterations.unwrap_or(self.config().default_withdraw_iterations);
        let indexes = self.indexes().supply;

        let pool_scaled = self.balances.scaled_pool_balance(&user, Side::Supply);
        let p2p_scaled = self.balances.scaled_p2p_balance(&user, Side::Supply);
        let pool_supply = ray_mul(pool_scaled, indexes.pool_index)?;
        let p2p_supply = ray_mul(p2p_scaled, indexes.p2p_index)?;
        let supply = checked_add(pool_supply, p2p_supply)?;
        if supply.is_zero() {
            return Err(CoreError::NothingToWithdraw);
        }

        let amount = amount.min(supply);
        limits.check_liquidity(amount)?;
        let mut receipt = PositionReceipt::new(Operation::Withdraw, user, amount);

        let from_pool = amount.min(pool_supply);
        if !from_pool.is_zero() {
            let new_pool = if from_pool == pool_supply {
                U256::zero()
            } else {
                zero_floor_sub(pool_scaled, ray_div_up(from_pool, indexes.pool_index)?)
            };
            self.balances.set_balance(user, Side::Supply, Partition::Pool, new_pool)?;
        }
        receipt.pool = from_pool;

        let from_p2p = amount - from_pool;
        if !from_p2p.is_zero() {
            let new_p2p = if from_p2p == p2p_supply {
                U256::zero()
            } else {
                zero_floor_sub(p2p_scaled, ray_div_up(from_p2p, indexes.p2p_index)?)
            };
            self.balances.set_balance(user, Side::Supply, Partition::P2P, new_p2p)?;
            self.rematch_after_exit(Side::Supply, from_p2p, budget, &mut receipt)?;
        }

        info!(market = %self.underlying(), %user, %amount, pool = %from_pool, p2p = %from_p2p, "withdraw");
        Ok(receipt)
    }

    /// Add collateral for `user`, held on the pool's supply side.
    pub fn supply_collateral(&mut self, user: Address, amount: U256, limits: &PoolLimits) -> Result<PositionReceipt> {
        self.validate_entry(Operation::SupplyCollateral, user, amount)?;
        limits.check_supply_cap(self.pool_supply_value()?, amount)?;

        let pool_index = self.indexes().supply.pool_index;
        self.balances.credit_collateral(user, ray_div(amount, pool_index)?)?;

        let mut receipt = PositionReceipt::new(Operation::SupplyCollateral, user, amount);
        receipt.pool = amount;
        info!(market = %self.underlying(), %user, %amount, "supply collateral");
        Ok(receipt)
    }

    /// Remove up to `amount` of `user`'s collateral.
    pub fn withdraw_collateral(&mut self, user: Address, amount: U256, limits: &PoolLimits) -> Result<PositionReceipt> {
        self.validate_entry(Operation::WithdrawCollateral, user, amount)?;
        let pool_index = self.indexes().supply.pool_index;
        let scaled = self.balances.scaled_collateral_balance(&user);
        let collateral = ray_mul(scaled, pool_index)?;
        if collateral.is_zero() {
            return Err(CoreError::NothingToWithdraw);
        }

        let amount = amount.min(collateral);
        limits.check_liquidity(amount)?;
        let to_debit = if amount == collateral {
            scaled
        } else {
            ray_div_up(amount, pool_index)?.min(scaled)
        };
        self.balances.debit_collateral(user, to_debit)?;

        let mut receipt = PositionReceipt::new(Operation::WithdrawCollateral, user, amount);
        receipt.pool = amount;
        info!(market = %self.underlying(), %user, %amount, "withdraw collateral");
        Ok(receipt)
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    fn validate_entry(&self, operation: Operation, user: Address, amount: U256) -> Result<()> {
        if amount.is_zero() {
            return Err(CoreError::ZeroAmount);
        }
        if user.is_zero() {
            return Err(CoreError::ZeroAddress);
        }
        self.pause.check(operation)
    }

    /// Part of a supply of `amount` that would land on the pool.
    fn preview_supply_pool_part(&self, amount: U256, max_iterations: u32) -> Result<U256> {
        if !self.is_p2p_enabled() {
            return Ok(amount);
        }
        let borrow = &self.indexes().borrow;
        let delta = ray_mul(self.balances.deltas().borrow.scaled_delta_pool, borrow.pool_index)?;
        let remaining = amount - delta.min(amount);
        let promotable = preview_promotion(self, Side::Borrow, remaining, max_iterations)?;
        Ok(remaining - promotable)
    }

    /// Consume up to `amount` of `side`'s delta. Returns the amount matched.
    fn match_delta(&mut self, side: Side, amount: U256) -> Result<U256> {
        let pool_index = self.indexes().side(side).pool_index;
        let scaled_delta = self.balances.deltas().side(side).scaled_delta_pool;
        let delta = ray_mul(scaled_delta, pool_index)?;
        let matched = delta.min(amount);
        if matched.is_zero() {
            return Ok(U256::zero());
        }

        let scaled = if matched == delta {
            scaled_delta
        } else {
            ray_div_up(matched, pool_index)?
        };
        self.balances.decrease_delta(side, scaled);
        Ok(matched)
    }

    /// Turn an unmatched remainder into `side`'s delta.
    fn add_delta(&mut self, side: Side, amount: U256) -> Result<()> {
        let pool_index = self.indexes().side(side).pool_index;
        let scaled = match side {
            Side::Supply => ray_div(amount, pool_index)?,
            Side::Borrow => ray_div_up(amount, pool_index)?,
        };
        let delta = self.balances.increase_delta(side, scaled)?;
        warn!(market = %self.underlying(), ?side, %amount, scaled_delta = %delta, "unmatched remainder moved to delta");
        Ok(())
    }

    /// Re-cover `amount` of P2P volume that `exiting` just left.
    ///
    /// The exiting side's own delta goes first, then pool accounts of the
    /// exiting side are promoted, then the opposite side is demoted with the
    /// remaining budget. Whatever is left becomes the opposite side's delta.
    fn rematch_after_exit(
        &mut self,
        exiting: Side,
        amount: U256,
        max_iterations: u32,
        receipt: &mut PositionReceipt,
    ) -> Result<()> {
        let mut remaining = amount;

        receipt.from_delta = self.match_delta(exiting, remaining)?;
        remaining -= receipt.from_delta;

        let promoted = match exiting {
            Side::Supply => promote_suppliers(self, remaining, max_iterations)?,
            Side::Borrow => promote_borrowers(self, remaining, max_iterations)?,
        };
        receipt.promoted = promoted.matched;
        receipt.loops = promoted.loops;
        remaining -= promoted.matched;

        let budget = max_iterations.saturating_sub(promoted.loops);
        receipt.demoted = match exiting {
            Side::Supply => demote_borrowers(self, remaining, budget)?,
            Side::Borrow => demote_suppliers(self, remaining, budget)?,
        };
        remaining -= receipt.demoted;

        if !remaining.is_zero() {
            self.add_delta(exiting.opposite(), remaining)?;
            receipt.to_delta = remaining;
        }
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
