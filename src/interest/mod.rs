//! Interest index accrual.
//!
//! ## Overview
//!
//! [`compute_indexes`] is a pure function: given the last indexes, the
//! elapsed time, the pool's per-second rates, the market deltas and the
//! market parameters, it returns the indexes at `now`. It never mutates
//! anything; [`Market`](crate::market::Market) stores the result.
//!
//! ## P2P index
//!
//! When part of the P2P volume is actually resting on the pool (the delta),
//! that share only earns the pool rate:
//!
//! ```text
//! share     = min(delta * poolIndex / (p2pTotal * p2pIndex), 1)
//! p2pIndex' = p2pIndex * (p2pGrowth * (1 - share) + poolGrowth * share)
//! ```
//!
//! ## Edge cases
//!
//! - `now == last_update`: indexes are returned unchanged
//! - `now < last_update`: [`CoreError::StaleOrFutureTimestamp`]

pub mod growth;

pub use growth::{compounded_growth, compute_growth_factors, linear_growth, GrowthFactors, PoolRates};

use primitive_types::U256;

use crate::error::{CoreError, Result};
use crate::math::ray::{checked_add, checked_sub, ray_div_up, ray_mul, RAY};
use crate::types::{Deltas, Indexes, MarketSideDelta, MarketSideIndexes};

/// Inputs of one accrual.
#[derive(Debug, Clone, Copy)]
pub struct IndexParams<'a> {
    pub last: Indexes,
    pub last_update: u64,
    pub now: u64,
    pub rates: PoolRates,
    pub deltas: &'a Deltas,
    /// Basis points
    pub reserve_factor: u64,
    /// Basis points
    pub p2p_index_cursor: u64,
}

/// Indexes at `params.now`.
pub fn compute_indexes(params: &IndexParams<'_>) -> Result<Indexes> {
    if params.now < params.last_update {
        return Err(CoreError::StaleOrFutureTimestamp {
            last: params.last_update,
            now: params.now,
        });
    }
    let elapsed = params.now - params.last_update;
    if elapsed == 0 {
        return Ok(params.last);
    }

    let pool_supply_growth = linear_growth(params.rates.supply_rate, elapsed)?;
    let pool_borrow_growth = compounded_growth(params.rates.borrow_rate, elapsed)?;
    let growth = compute_growth_factors(
        pool_supply_growth,
        pool_borrow_growth,
        params.p2p_index_cursor,
        params.reserve_factor,
    )?;

    let supply = accrue_side(
        &params.last.supply,
        growth.pool_supply,
        growth.p2p_supply,
        &params.deltas.supply,
    )?;
    let borrow = accrue_side(
        &params.last.borrow,
        growth.pool_borrow,
        growth.p2p_borrow,
        &params.deltas.borrow,
    )?;

    Ok(Indexes { supply, borrow })
}

fn accrue_side(
    last: &MarketSideIndexes,
    pool_growth: U256,
    p2p_growth: U256,
    delta: &MarketSideDelta,
) -> Result<MarketSideIndexes> {
    Ok(MarketSideIndexes {
        pool_index: ray_mul(last.pool_index, pool_growth)?,
        p2p_index: compute_p2p_index(pool_growth, p2p_growth, last.pool_index, last.p2p_index, delta)?,
    })
}

/// New P2P index of one side, accounting for the share of the delta.
pub fn compute_p2p_index(
    pool_growth: U256,
    p2p_growth: U256,
    last_pool_index: U256,
    last_p2p_index: U256,
    delta: &MarketSideDelta,
) -> Result<U256> {
    if delta.scaled_p2p_total.is_zero() {
        return ray_mul(last_p2p_index, p2p_growth);
    }

    let delta_value = ray_mul(delta.scaled_delta_pool, last_pool_index)?;
    let p2p_value = ray_mul(delta.scaled_p2p_total, last_p2p_index)?;
    let share = if p2p_value.is_zero() {
        RAY
    } else {
        ray_div_up(delta_value, p2p_value)?.min(RAY)
    };

    let blended = checked_add(
        ray_mul(p2p_growth, checked_sub(RAY, share)?)?,
        ray_mul(pool_growth, share)?,
    )?;
    ray_mul(last_p2p_index, blended)
}

// ============================================================================
// Unit Tests
// ============================================================================
