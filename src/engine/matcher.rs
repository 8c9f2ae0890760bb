//! Promote/demote primitives and the bounded matching loops.
//!
//! ## Loop
//!
//! Each iteration takes the head of the relevant ordering structure (largest
//! tracked balance), moves as much of it as the remaining amount allows, and
//! writes both partitions of that account back through the ledger, which
//! re-ranks it. The loop stops when the remaining amount is zero, the
//! structure is empty, or the iteration budget is spent.
//!
//! | Function            | Moves                     | Head taken from      |
//! |---------------------|---------------------------|----------------------|
//! | `promote_suppliers` | pool supply -> P2P supply | pool suppliers       |
//! | `promote_borrowers` | pool borrow -> P2P borrow | pool borrowers       |
//! | `demote_suppliers`  | P2P supply -> pool supply | P2P suppliers        |
//! | `demote_borrowers`  | P2P borrow -> pool borrow | P2P borrowers        |

use primitive_types::U256;
use tracing::debug;

use crate::error::Result;
use crate::market::Market;
use crate::math::ray::{checked_add, checked_sub, ray_div, ray_div_up, ray_mul, ray_mul_up, zero_floor_sub};
use crate::types::{MarketSideIndexes, Partition, Side};

/// Outcome of a promotion loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatchResult {
    /// Underlying amount matched
    pub matched: U256,
    /// Iterations consumed
    pub loops: u32,
}

// ============================================================================
// Primitives
// ============================================================================

/// Move up to `remaining` underlying of one `side` account from pool to P2P.
///
/// Returns `(new_pool, new_p2p, new_remaining)`. Moving the whole pool value
/// zeroes the pool balance exactly.
pub fn promote(
    side: Side,
    pool: U256,
    p2p: U256,
    indexes: &MarketSideIndexes,
    remaining: U256,
) -> Result<(U256, U256, U256)> {
    let pool_value = value_of(side, pool, indexes.pool_index)?;
    let to_process = pool_value.min(remaining);
    let (new_pool, new_p2p) = shift(
        side,
        (pool, pool_value, indexes.pool_index),
        (p2p, indexes.p2p_index),
        to_process,
    )?;
    Ok((new_pool, new_p2p, checked_sub(remaining, to_process)?))
}

/// Move up to `remaining` underlying of one `side` account from P2P to pool.
///
/// Returns `(new_pool, new_p2p, new_remaining)`.
pub fn demote(
    side: Side,
    pool: U256,
    p2p: U256,
    indexes: &MarketSideIndexes,
    remaining: U256,
) -> Result<(U256, U256, U256)> {
    let p2p_value = value_of(side, p2p, indexes.p2p_index)?;
    let to_process = p2p_value.min(remaining);
    let (new_p2p, new_pool) = shift(
        side,
        (p2p, p2p_value, indexes.p2p_index),
        (pool, indexes.pool_index),
        to_process,
    )?;
    Ok((new_pool, new_p2p, checked_sub(remaining, to_process)?))
}

/// Underlying value of a scaled balance: supply rounds down, debt rounds up.
#[inline]
fn value_of(side: Side, scaled: U256, index: U256) -> Result<U256> {
    match side {
        Side::Supply => ray_mul(scaled, index),
        Side::Borrow => ray_mul_up(scaled, index),
    }
}

/// Move `amount` from `(balance, value, index)` to `(balance, index)`.
///
/// Supply balances lose the rounding on both legs, borrow balances gain it,
/// so moving never shrinks a debt nor grows a deposit.
fn shift(
    side: Side,
    (from, from_value, from_index): (U256, U256, U256),
    (to, to_index): (U256, U256),
    amount: U256,
) -> Result<(U256, U256)> {
    let new_from = if amount == from_value {
        U256::zero()
    } else {
        let debit = match side {
            Side::Supply => ray_div_up(amount, from_index)?,
            Side::Borrow => ray_div(amount, from_index)?,
        };
        zero_floor_sub(from, debit)
    };
    let credit = match side {
        Side::Supply => ray_div(amount, to_index)?,
        Side::Borrow => ray_div_up(amount, to_index)?,
    };
    Ok((new_from, checked_add(to, credit)?))
}

// ============================================================================
// Loops
// ============================================================================

/// Promote pool suppliers to P2P for up to `amount` underlying.
pub fn promote_suppliers(market: &mut Market, amount: U256, max_loops: u32) -> Result<MatchResult> {
    run_promotion(market, Side::Supply, amount, max_loops)
}

/// Promote pool borrowers to P2P for up to `amount` underlying.
pub fn promote_borrowers(market: &mut Market, amount: U256, max_loops: u32) -> Result<MatchResult> {
    run_promotion(market, Side::Borrow, amount, max_loops)
}

/// Demote P2P suppliers to the pool for up to `amount` underlying.
///
/// Returns the amount demoted.
pub fn demote_suppliers(market: &mut Market, amount: U256, max_loops: u32) -> Result<U256> {
    Ok(run_demotion(market, Side::Supply, amount, max_loops)?.matched)
}

/// Demote P2P borrowers to the pool for up to `amount` underlying.
///
/// Returns the amount demoted.
pub fn demote_borrowers(market: &mut Market, amount: U256, max_loops: u32) -> Result<U256> {
    Ok(run_demotion(market, Side::Borrow, amount, max_loops)?.matched)
}

fn run_promotion(market: &mut Market, side: Side, amount: U256, max_loops: u32) -> Result<MatchResult> {
    run_loop(market, side, Partition::Pool, amount, max_loops)
}

/// `MatchResult::matched` is the amount demoted.
fn run_demotion(market: &mut Market, side: Side, amount: U256, max_loops: u32) -> Result<MatchResult> {
    run_loop(market, side, Partition::P2P, amount, max_loops)
}

/// Amount a promotion of `side` would match, without touching the market.
///
/// Mirrors [`run_loop`]: heads are taken in rank order, each fully moved
/// until the amount or the budget runs out.
pub(crate) fn preview_promotion(market: &Market, side: Side, amount: U256, max_loops: u32) -> Result<U256> {
    if amount.is_zero() || max_loops == 0 || !market.is_p2p_enabled() {
        return Ok(U256::zero());
    }
    let pool_index = market.indexes().side(side).pool_index;
    let mut remaining = amount;
    for (_, scaled) in market.balances().heap(side, Partition::Pool).top(max_loops as usize) {
        if remaining.is_zero() {
            break;
        }
        remaining -= value_of(side, scaled, pool_index)?.min(remaining);
    }
    Ok(amount - remaining)
}

/// Shared loop body. `from` is the partition balances leave.
fn run_loop(market: &mut Market, side: Side, from: Partition, amount: U256, max_loops: u32) -> Result<MatchResult> {
    if amount.is_zero() || max_loops == 0 || !market.is_p2p_enabled() {
        return Ok(MatchResult::default());
    }

    let indexes = *market.indexes().side(side);
    let mut remaining = amount;
    let mut loops = 0u32;

    while loops < max_loops && !remaining.is_zero() {
        let Some(user) = market.balances.head(side, from) else {
            break;
        };
        let pool = market.balances.scaled_pool_balance(&user, side);
        let p2p = market.balances.scaled_p2p_balance(&user, side);

        let (new_pool, new_p2p, new_remaining) = match from {
            Partition::Pool => promote(side, pool, p2p, &indexes, remaining)?,
            Partition::P2P => demote(side, pool, p2p, &indexes, remaining)?,
        };
        market.balances.set_balances(user, side, new_pool, new_p2p)?;

        debug!(
            market = %market.underlying(),
            %user,
            ?side,
            ?from,
            moved = %(remaining - new_remaining),
            "matching step"
        );
        remaining = new_remaining;
        loops += 1;
    }

    Ok(MatchResult {
        matched: amount - remaining,
        loops,
    })
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interest::PoolRates;
    use crate::market::MarketConfig;
    use crate::math::ray::RAY;
    use crate::types::Address;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    const E18: u64 = 1_000_000_000_000_000_000;
    const RAY_U128: u128 = 1_000_000_000_000_000_000_000_000_000;

    fn e18(n: u64) -> U256 {
        U256::from(n) * U256::from(E18)
    }

    fn addr(id: u64) -> Address {
        Address::from_low_u64(id)
    }

    fn market() -> Market {
        Market::new(addr(0xFF), MarketConfig::default(), 0).unwrap()
    }

    fn grown_indexes() -> MarketSideIndexes {
        MarketSideIndexes {
            pool_index: RAY * U256::from(3u64) / U256::from(2u64),
            p2p_index: RAY * U256::from(7u64) / U256::from(4u64),
        }
    }

    fn random_indexes(rng: &mut ChaCha8Rng) -> MarketSideIndexes {
        MarketSideIndexes {
            pool_index: U256::from(rng.gen_range(RAY_U128..=3 * RAY_U128)),
            p2p_index: U256::from(rng.gen_range(RAY_U128..=3 * RAY_U128)),
        }
    }

    /// Underlying value of an account's two partitions on `side`.
    fn total_value(side: Side, pool: U256, p2p: U256, indexes: &MarketSideIndexes) -> U256 {
        value_of(side, pool, indexes.pool_index).unwrap() + value_of(side, p2p, indexes.p2p_index).unwrap()
    }

    fn abs_diff(a: U256, b: U256) -> U256 {
        if a > b {
            a - b
        } else {
            b - a
        }
    }

    #[test]
    fn test_promote_partial() {
        let indexes = MarketSideIndexes::initial();
        for side in [Side::Supply, Side::Borrow] {
            let (pool, p2p, remaining) = promote(side, e18(3), U256::zero(), &indexes, e18(1)).unwrap();
            assert_eq!(pool, e18(2));
            assert_eq!(p2p, e18(1));
            assert!(remaining.is_zero());
        }
    }

    #[test]
    fn test_promote_full_value_zeroes_pool() {
        let indexes = grown_indexes();
        let pool = U256::from(1_000_003u64);
        let (new_pool, _, remaining) = promote(Side::Supply, pool, U256::zero(), &indexes, e18(1)).unwrap();
        assert!(new_pool.is_zero());
        assert_eq!(remaining, e18(1) - ray_mul(pool, indexes.pool_index).unwrap());

        let (new_pool, _, remaining) = promote(Side::Borrow, pool, U256::zero(), &indexes, e18(1)).unwrap();
        assert!(new_pool.is_zero());
        assert_eq!(remaining, e18(1) - ray_mul_up(pool, indexes.pool_index).unwrap());
    }

    #[test]
    fn test_demote_full_value_zeroes_p2p() {
        let indexes = grown_indexes();
        for side in [Side::Supply, Side::Borrow] {
            let (pool, p2p, _) = demote(side, U256::zero(), U256::from(999_999u64), &indexes, e18(1)).unwrap();
            assert!(p2p.is_zero());
            assert!(!pool.is_zero());
        }
    }

    #[test]
    fn test_round_trip_at_initial_indexes_is_exact() {
        let indexes = MarketSideIndexes::initial();
        for side in [Side::Supply, Side::Borrow] {
            let (mid_pool, mid_p2p, _) = promote(side, e18(5), U256::zero(), &indexes, e18(2)).unwrap();
            let (end_pool, end_p2p, remaining) = demote(side, mid_pool, mid_p2p, &indexes, e18(2)).unwrap();
            assert_eq!(end_pool, e18(5));
            assert!(end_p2p.is_zero());
            assert!(remaining.is_zero());
        }
    }

    #[test]
    fn test_primitives_conserve_value_randomized() {
        let mut rng = ChaCha8Rng::seed_from_u64(2024);
        let tolerance = U256::from(10u64);

        for _ in 0..2_000 {
            let side = if rng.gen_bool(0.5) { Side::Supply } else { Side::Borrow };
            let indexes = random_indexes(&mut rng);
            let pool = U256::from(rng.gen_range(0..=1_000_000_000_000_000_000_000u128));
            let p2p = U256::from(rng.gen_range(0..=1_000_000_000_000_000_000_000u128));
            let remaining = U256::from(rng.gen_range(0..=2_000_000_000_000_000_000_000u128));
            let before = total_value(side, pool, p2p, &indexes);

            let moves = [
                promote(side, pool, p2p, &indexes, remaining).unwrap(),
                demote(side, pool, p2p, &indexes, remaining).unwrap(),
            ];
            for (new_pool, new_p2p, new_remaining) in moves {
                assert!(new_remaining <= remaining);
                let after = total_value(side, new_pool, new_p2p, &indexes);
                match side {
                    // Deposits never grow, debts never shrink
                    Side::Supply => assert!(after <= before, "supply grew {before} -> {after}"),
                    Side::Borrow => assert!(after >= before, "debt shrank {before} -> {after}"),
                }
                assert!(abs_diff(before, after) <= tolerance, "{side:?} drifted {before} -> {after}");
            }
        }
    }

    #[test]
    fn test_promote_demote_round_trip_randomized() {
        let mut rng = ChaCha8Rng::seed_from_u64(77);
        let tolerance = U256::from(20u64);

        for _ in 0..2_000 {
            let side = if rng.gen_bool(0.5) { Side::Supply } else { Side::Borrow };
            let indexes = random_indexes(&mut rng);
            let pool = U256::from(rng.gen_range(1..=1_000_000_000_000_000_000_000u128));
            let value = value_of(side, pool, indexes.pool_index).unwrap();
            let amount = U256::from(rng.gen_range(0..=value.low_u128()));

            let (mid_pool, mid_p2p, left) = promote(side, pool, U256::zero(), &indexes, amount).unwrap();
            assert!(left.is_zero());
            let (end_pool, end_p2p, _) = demote(side, mid_pool, mid_p2p, &indexes, amount).unwrap();

            let end_value = total_value(side, end_pool, end_p2p, &indexes);
            match side {
                Side::Supply => assert!(end_value <= value),
                Side::Borrow => assert!(end_value >= value),
            }
            assert!(abs_diff(value, end_value) <= tolerance, "{side:?} round trip {value} -> {end_value}");
        }
    }

    #[test]
    fn test_promote_suppliers_budget() {
        let mut market = market();
        for id in 1..=3 {
            market.balances.credit_pool_supply(addr(id), e18(1)).unwrap();
        }

        let result = promote_suppliers(&mut market, e18(5) / U256::from(2u64), 2).unwrap();
        assert_eq!(result.matched, e18(2));
        assert_eq!(result.loops, 2);
        assert_eq!(market.balances().total(Side::Supply, Partition::P2P), e18(2));
        assert_eq!(market.balances().total(Side::Supply, Partition::Pool), e18(1));
        market.verify_invariants().unwrap();
    }

    #[test]
    fn test_promote_largest_first() {
        let mut market = market();
        market.balances.credit_pool_borrow(addr(1), e18(1)).unwrap();
        market.balances.credit_pool_borrow(addr(2), e18(5)).unwrap();
        market.balances.credit_pool_borrow(addr(3), e18(2)).unwrap();

        let result = promote_borrowers(&mut market, e18(6), 10).unwrap();
        assert_eq!(result, MatchResult { matched: e18(6), loops: 2 });
        assert_eq!(market.balances().scaled_p2p_balance(&addr(2), Side::Borrow), e18(5));
        assert_eq!(market.balances().scaled_p2p_balance(&addr(3), Side::Borrow), e18(1));
        assert!(market.balances().scaled_p2p_balance(&addr(1), Side::Borrow).is_zero());
    }

    #[test]
    fn test_loop_stops_on_empty_structure() {
        let mut market = market();
        market.balances.credit_pool_supply(addr(1), e18(1)).unwrap();
        let result = promote_suppliers(&mut market, e18(10), 10).unwrap();
        assert_eq!(result, MatchResult { matched: e18(1), loops: 1 });
    }

    #[test]
    fn test_no_op_cases() {
        let mut market = market();
        market.balances.credit_pool_supply(addr(1), e18(1)).unwrap();

        assert_eq!(promote_suppliers(&mut market, U256::zero(), 10).unwrap(), MatchResult::default());
        assert_eq!(promote_suppliers(&mut market, e18(1), 0).unwrap(), MatchResult::default());

        market.pause.is_p2p_disabled = true;
        assert_eq!(promote_suppliers(&mut market, e18(1), 10).unwrap(), MatchResult::default());
        assert_eq!(market.balances().scaled_pool_balance(&addr(1), Side::Supply), e18(1));
    }

    #[test]
    fn test_demote_borrowers() {
        let mut market = market();
        market.balances.credit_p2p_borrow(addr(1), e18(2)).unwrap();
        market.balances.credit_p2p_borrow(addr(2), e18(3)).unwrap();

        let demoted = demote_borrowers(&mut market, e18(4), 10).unwrap();
        assert_eq!(demoted, e18(4));
        assert_eq!(market.balances().total(Side::Borrow, Partition::Pool), e18(4));
        assert_eq!(market.balances().total(Side::Borrow, Partition::P2P), e18(1));
        market.verify_invariants().unwrap();
    }

    #[test]
    fn test_loops_preserve_user_totals() {
        let mut market = market();
        for id in 1..=10u64 {
            market.balances.credit_pool_supply(addr(id), e18(id)).unwrap();
        }
        let before: Vec<U256> = (1..=10u64).map(|id| market.supply_balance(&addr(id)).unwrap()).collect();

        let promoted = promote_suppliers(&mut market, e18(30), 4).unwrap();
        let demoted = demote_suppliers(&mut market, e18(12), 3).unwrap();
        assert!(promoted.matched <= e18(30));
        assert!(demoted <= promoted.matched);

        for id in 1..=10u64 {
            assert_eq!(market.supply_balance(&addr(id)).unwrap(), before[id as usize - 1]);
        }
        market.verify_invariants().unwrap();
    }

    #[test]
    fn test_borrower_debt_never_shrinks_when_moved() {
        let mut rng = ChaCha8Rng::seed_from_u64(97);
        let mut market = market();
        let rates = PoolRates::from_annual(RAY / U256::from(25u64), RAY / U256::from(9u64));

        for id in 1..=40u64 {
            let scaled = U256::from(rng.gen_range(1..=50_000_000_000_000_000_000u128));
            market.balances.credit_pool_borrow(addr(id), scaled).unwrap();
        }
        market.update_indexes(97 * 86_400, rates).unwrap();
        assert!(market.indexes().borrow.pool_index > RAY);

        for round in 0..200 {
            let debts: Vec<U256> = (1..=40u64).map(|id| market.borrow_balance(&addr(id)).unwrap()).collect();
            let amount = U256::from(rng.gen_range(1..=20_000_000_000_000_000_000u128));
            let loops = rng.gen_range(1..=5u32);
            if round % 2 == 0 {
                promote_borrowers(&mut market, amount, loops).unwrap();
            } else {
                demote_borrowers(&mut market, amount, loops).unwrap();
            }
            for id in 1..=40u64 {
                let debt = market.borrow_balance(&addr(id)).unwrap();
                let before = debts[id as usize - 1];
                assert!(debt >= before, "round {round}: debt of {id} shrank {before} -> {debt}");
                assert!(debt - before <= U256::from(10u64));
            }
        }
        market.verify_invariants().unwrap();
    }

    #[test]
    fn test_preview_matches_promotion() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let config = MarketConfig {
            max_sorted_users: 16,
            ..Default::default()
        };
        let mut market = Market::new(addr(0xFF), config, 0).unwrap();
        for id in 1..=30u64 {
            market.balances.credit_pool_borrow(addr(id), e18(rng.gen_range(1..=9u64))).unwrap();
        }

        for _ in 0..50 {
            let amount = e18(rng.gen_range(0..=40u64)) / U256::from(rng.gen_range(1..=3u64));
            let loops = rng.gen_range(0..=6u32);
            let preview = preview_promotion(&market, Side::Borrow, amount, loops).unwrap();
            let mut copy = market.clone();
            let result = promote_borrowers(&mut copy, amount, loops).unwrap();
            assert_eq!(preview, result.matched);
        }
    }
}
