//! Growth factors over an accrual period.
//!
//! A growth factor is the ray ratio `new_index / last_index`. Pool growth
//! comes from the pool's per-second rates; P2P growth blends the two pool
//! growth factors with the index cursor and hands the reserve factor's share
//! of the spread to the protocol.

use primitive_types::U256;

use crate::error::{CoreError, Result};
use crate::math::percentage::{percent_mul, weighted_avg};
use crate::math::ray::{checked_add, checked_sub, ray_mul, RAY};

/// Seconds in a non-leap year, for annual rate conversion.
pub const SECONDS_PER_YEAR: u64 = 365 * 24 * 60 * 60;

/// Per-second pool rates, ray-scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolRates {
    pub supply_rate: U256,
    pub borrow_rate: U256,
}

impl PoolRates {
    /// Build from annual ray rates (e.g. `0.03 * RAY` for 3% APR).
    pub fn from_annual(supply_apr: U256, borrow_apr: U256) -> Self {
        let seconds = U256::from(SECONDS_PER_YEAR);
        Self {
            supply_rate: supply_apr / seconds,
            borrow_rate: borrow_apr / seconds,
        }
    }
}

/// Growth factors of one accrual period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrowthFactors {
    pub pool_supply: U256,
    pub pool_borrow: U256,
    pub p2p_supply: U256,
    pub p2p_borrow: U256,
}

/// `1 + rate * elapsed`.
pub fn linear_growth(rate: U256, elapsed: u64) -> Result<U256> {
    let interest = rate.checked_mul(U256::from(elapsed)).ok_or(CoreError::Overflow)?;
    checked_add(RAY, interest)
}

/// `(1 + rate)^elapsed`, approximated by the first three binomial terms.
///
/// Slightly underestimates the exact compounding, never overestimates it.
pub fn compounded_growth(rate: U256, elapsed: u64) -> Result<U256> {
    if elapsed == 0 {
        return Ok(RAY);
    }
    let exp = U256::from(elapsed);
    let exp_minus_one = U256::from(elapsed - 1);
    let exp_minus_two = U256::from(elapsed.saturating_sub(2));

    let base_power_two = ray_mul(rate, rate)?;
    let base_power_three = ray_mul(base_power_two, rate)?;

    let first_term = rate.checked_mul(exp).ok_or(CoreError::Overflow)?;
    let second_term = exp
        .checked_mul(exp_minus_one)
        .and_then(|x| x.checked_mul(base_power_two))
        .ok_or(CoreError::Overflow)?
        / U256::from(2u64);
    let third_term = exp
        .checked_mul(exp_minus_one)
        .and_then(|x| x.checked_mul(exp_minus_two))
        .and_then(|x| x.checked_mul(base_power_three))
        .ok_or(CoreError::Overflow)?
        / U256::from(6u64);

    checked_add(checked_add(checked_add(RAY, first_term)?, second_term)?, third_term)
}

/// P2P growth factors from pool growth factors.
///
/// With `supply <= borrow` growth, the P2P growth is the cursor-weighted
/// average of both, then the reserve factor takes its share of each side's
/// spread (never of the base pool rate). An ill-conditioned pool (supply
/// growing faster than borrow) gives both P2P sides the pool borrow growth.
pub fn compute_growth_factors(
    pool_supply_growth: U256,
    pool_borrow_growth: U256,
    p2p_index_cursor: u64,
    reserve_factor: u64,
) -> Result<GrowthFactors> {
    let (p2p_supply, p2p_borrow) = if pool_supply_growth <= pool_borrow_growth {
        let p2p_growth = weighted_avg(pool_supply_growth, pool_borrow_growth, p2p_index_cursor)?;
        let supply_fee = percent_mul(checked_sub(p2p_growth, pool_supply_growth)?, reserve_factor)?;
        let borrow_fee = percent_mul(checked_sub(pool_borrow_growth, p2p_growth)?, reserve_factor)?;
        (checked_sub(p2p_growth, supply_fee)?, checked_add(p2p_growth, borrow_fee)?)
    } else {
        (pool_borrow_growth, pool_borrow_growth)
    };

    Ok(GrowthFactors {
        pool_supply: pool_supply_growth,
        pool_borrow: pool_borrow_growth,
        p2p_supply,
        p2p_borrow,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ray_frac(numerator: u64, denominator: u64) -> U256 {
        RAY * U256::from(numerator) / U256::from(denominator)
    }

    #[test]
    fn test_linear_growth() {
        assert_eq!(linear_growth(ray_frac(1, 100), 0).unwrap(), RAY);
        assert_eq!(linear_growth(ray_frac(1, 100), 3).unwrap(), RAY + ray_frac(3, 100));
    }

    #[test]
    fn test_compounded_growth_small_periods() {
        let rate = ray_frac(1, 100);
        assert_eq!(compounded_growth(rate, 0).unwrap(), RAY);
        assert_eq!(compounded_growth(rate, 1).unwrap(), RAY + rate);
        // (1.01)^2 = 1.0201 exactly
        assert_eq!(compounded_growth(rate, 2).unwrap(), ray_frac(10_201, 10_000));
        // (1.01)^3 = 1.030301 exactly (three terms are exact up to n = 3)
        assert_eq!(compounded_growth(rate, 3).unwrap(), ray_frac(1_030_301, 1_000_000));
    }

    #[test]
    fn test_compounded_exceeds_linear() {
        let rate = ray_frac(1, 1_000_000);
        let elapsed = 86_400;
        assert!(compounded_growth(rate, elapsed).unwrap() > linear_growth(rate, elapsed).unwrap());
    }

    #[test]
    fn test_from_annual() {
        let rates = PoolRates::from_annual(RAY, RAY * U256::from(2u64));
        assert_eq!(rates.supply_rate, RAY / U256::from(SECONDS_PER_YEAR));
        assert_eq!(rates.borrow_rate, RAY * U256::from(2u64) / U256::from(SECONDS_PER_YEAR));
    }

    #[test]
    fn test_growth_factors_cursor_extremes() {
        let supply = ray_frac(101, 100);
        let borrow = ray_frac(103, 100);

        let all_supply = compute_growth_factors(supply, borrow, 0, 0).unwrap();
        assert_eq!(all_supply.p2p_supply, supply);
        assert_eq!(all_supply.p2p_borrow, supply);

        let all_borrow = compute_growth_factors(supply, borrow, 10_000, 0).unwrap();
        assert_eq!(all_borrow.p2p_supply, borrow);
        assert_eq!(all_borrow.p2p_borrow, borrow);

        let half = compute_growth_factors(supply, borrow, 5_000, 0).unwrap();
        assert_eq!(half.p2p_supply, ray_frac(102, 100));
        assert_eq!(half.p2p_borrow, ray_frac(102, 100));
    }

    #[test]
    fn test_reserve_factor_applies_to_spread_only() {
        let supply = ray_frac(101, 100);
        let borrow = ray_frac(103, 100);

        // 100% reserve factor: P2P users get exactly the pool rates
        let full = compute_growth_factors(supply, borrow, 5_000, 10_000).unwrap();
        assert_eq!(full.p2p_supply, supply);
        assert_eq!(full.p2p_borrow, borrow);

        // 50%: half of each spread goes to the protocol
        let half = compute_growth_factors(supply, borrow, 5_000, 5_000).unwrap();
        assert_eq!(half.p2p_supply, ray_frac(1_015, 1_000));
        assert_eq!(half.p2p_borrow, ray_frac(1_025, 1_000));
    }

    #[test]
    fn test_p2p_growth_between_pool_growths() {
        let supply = ray_frac(1_002, 1_000);
        let borrow = ray_frac(1_009, 1_000);
        for cursor in [0, 1_234, 3_333, 7_500, 10_000] {
            for reserve_factor in [0, 1_000, 5_000, 10_000] {
                let f = compute_growth_factors(supply, borrow, cursor, reserve_factor).unwrap();
                assert!(f.p2p_supply >= supply && f.p2p_supply <= borrow);
                assert!(f.p2p_borrow >= supply && f.p2p_borrow <= borrow);
                assert!(f.p2p_supply <= f.p2p_borrow);
            }
        }
    }

    #[test]
    fn test_ill_conditioned_pool() {
        let f = compute_growth_factors(ray_frac(105, 100), ray_frac(102, 100), 5_000, 1_000).unwrap();
        assert_eq!(f.p2p_supply, ray_frac(102, 100));
        assert_eq!(f.p2p_borrow, ray_frac(102, 100));
    }

    #[test]
    fn test_invalid_basis_points() {
        assert_eq!(
            compute_growth_factors(RAY, RAY, 10_001, 0),
            Err(CoreError::ExceedsMaxBasisPoints(10_001))
        );
    }
}
