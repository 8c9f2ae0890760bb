//! Market balance ledger.
//!
//! ## Architecture
//!
//! - **Slab** of [`AccountBalances`] + **HashMap** address to slab key
//! - Four [`BoundedHeap`]s, one per (side, partition), mirroring balances
//! - Stored aggregates: pool totals per side, collateral total, and
//!   [`Deltas`] (P2P totals and pool-side deltas)
//!
//! The ledger is the source of truth. Every balance mutation goes through
//! [`MarketBalances::set_balance`], which updates the heap and the aggregate
//! together.

use std::collections::HashMap;

use primitive_types::U256;
use slab::Slab;
use tracing::trace;

use crate::error::{CoreError, Result};
use crate::heap::{BoundedHeap, HeapUpdate};
use crate::ledger::AccountBalances;
use crate::math::ray::{checked_add, checked_sub, zero_floor_sub};
use crate::types::{AccountSnapshot, Address, Deltas, Partition, Side};

/// Scaled balances, ordering structures and aggregates of one market.
#[derive(Debug, Clone)]
pub struct MarketBalances {
    accounts: Slab<AccountBalances>,
    index: HashMap<Address, usize>,

    pool_suppliers: BoundedHeap,
    p2p_suppliers: BoundedHeap,
    pool_borrowers: BoundedHeap,
    p2p_borrowers: BoundedHeap,

    /// Sum of pool balances, `[supply, borrow]`
    pool_totals: [U256; 2],
    collateral_total: U256,
    deltas: Deltas,
}

impl MarketBalances {
    /// Create an empty ledger whose heaps track `max_sorted_users` accounts.
    pub fn new(max_sorted_users: usize) -> Self {
        Self {
            accounts: Slab::new(),
            index: HashMap::new(),
            pool_suppliers: BoundedHeap::with_capacity(max_sorted_users),
            p2p_suppliers: BoundedHeap::with_capacity(max_sorted_users),
            pool_borrowers: BoundedHeap::with_capacity(max_sorted_users),
            p2p_borrowers: BoundedHeap::with_capacity(max_sorted_users),
            pool_totals: [U256::zero(); 2],
            collateral_total: U256::zero(),
            deltas: Deltas::default(),
        }
    }

    // ========================================================================
    // Read accessors
    // ========================================================================

    pub fn account(&self, user: &Address) -> Option<&AccountBalances> {
        self.index.get(user).map(|&key| &self.accounts[key])
    }

    #[inline]
    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    pub fn scaled_balance(&self, user: &Address, side: Side, partition: Partition) -> U256 {
        self.account(user)
            .map(|account| account.get(side, partition))
            .unwrap_or_default()
    }

    pub fn scaled_pool_balance(&self, user: &Address, side: Side) -> U256 {
        self.scaled_balance(user, side, Partition::Pool)
    }

    pub fn scaled_p2p_balance(&self, user: &Address, side: Side) -> U256 {
        self.scaled_balance(user, side, Partition::P2P)
    }

    pub fn scaled_collateral_balance(&self, user: &Address) -> U256 {
        self.account(user).map(|account| account.collateral).unwrap_or_default()
    }

    /// Stored aggregate of a partition.
    pub fn total(&self, side: Side, partition: Partition) -> U256 {
        match partition {
            Partition::Pool => self.pool_totals[side_slot(side)],
            Partition::P2P => self.deltas.side(side).scaled_p2p_total,
        }
    }

    pub fn collateral_total(&self) -> U256 {
        self.collateral_total
    }

    #[inline]
    pub fn deltas(&self) -> &Deltas {
        &self.deltas
    }

    /// Ordering structure of a partition.
    pub fn heap(&self, side: Side, partition: Partition) -> &BoundedHeap {
        match (side, partition) {
            (Side::Supply, Partition::Pool) => &self.pool_suppliers,
            (Side::Supply, Partition::P2P) => &self.p2p_suppliers,
            (Side::Borrow, Partition::Pool) => &self.pool_borrowers,
            (Side::Borrow, Partition::P2P) => &self.p2p_borrowers,
        }
    }

    /// Largest tracked holder of a partition.
    pub fn head(&self, side: Side, partition: Partition) -> Option<Address> {
        self.heap(side, partition).head().map(|(account, _)| account)
    }

    /// Accounts ordered by address.
    pub fn accounts_sorted(&self) -> Vec<&AccountBalances> {
        let mut accounts: Vec<&AccountBalances> = self.accounts.iter().map(|(_, a)| a).collect();
        accounts.sort_by(|a, b| a.user.cmp(&b.user));
        accounts
    }

    pub fn account_snapshots(&self, market: Address) -> Vec<AccountSnapshot> {
        self.accounts_sorted()
            .into_iter()
            .map(|account| account.snapshot(market))
            .collect()
    }

    // ========================================================================
    // Balance mutators
    // ========================================================================

    /// Overwrite one scaled balance, keeping heap and aggregate in sync.
    pub fn set_balance(
        &mut self,
        user: Address,
        side: Side,
        partition: Partition,
        value: U256,
    ) -> Result<()> {
        if user.is_zero() {
            return Err(CoreError::ZeroAddress);
        }
        let previous = self.scaled_balance(&user, side, partition);
        if previous == value {
            return Ok(());
        }

        let total = checked_add(checked_sub(self.total(side, partition), previous)?, value)?;
        let key = self.account_key_or_insert(user);
        *self.accounts[key].slot_mut(side, partition) = value;
        *self.total_mut(side, partition) = total;

        let update = self.heap_mut(side, partition).insert_or_update(user, value);
        if let HeapUpdate::Evicted(evicted) = update {
            trace!(%user, %evicted, ?side, ?partition, "heap full, evicted smallest entry");
        }

        self.drop_if_empty(user);
        Ok(())
    }

    /// Write both partitions of one side (used by the matching engine).
    pub fn set_balances(&mut self, user: Address, side: Side, on_pool: U256, in_p2p: U256) -> Result<()> {
        self.set_balance(user, side, Partition::Pool, on_pool)?;
        self.set_balance(user, side, Partition::P2P, in_p2p)
    }

    pub fn set_supply_balances(&mut self, user: Address, on_pool: U256, in_p2p: U256) -> Result<()> {
        self.set_balances(user, Side::Supply, on_pool, in_p2p)
    }

    pub fn set_borrow_balances(&mut self, user: Address, on_pool: U256, in_p2p: U256) -> Result<()> {
        self.set_balances(user, Side::Borrow, on_pool, in_p2p)
    }

    pub fn credit(&mut self, user: Address, side: Side, partition: Partition, scaled: U256) -> Result<U256> {
        let balance = checked_add(self.scaled_balance(&user, side, partition), scaled)?;
        self.set_balance(user, side, partition, balance)?;
        Ok(balance)
    }

    /// Fails with [`CoreError::Overflow`] when `scaled` exceeds the balance.
    pub fn debit(&mut self, user: Address, side: Side, partition: Partition, scaled: U256) -> Result<U256> {
        let balance = checked_sub(self.scaled_balance(&user, side, partition), scaled)?;
        self.set_balance(user, side, partition, balance)?;
        Ok(balance)
    }

    pub fn credit_pool_supply(&mut self, user: Address, scaled: U256) -> Result<U256> {
        self.credit(user, Side::Supply, Partition::Pool, scaled)
    }

    pub fn credit_p2p_supply(&mut self, user: Address, scaled: U256) -> Result<U256> {
        self.credit(user, Side::Supply, Partition::P2P, scaled)
    }

    pub fn credit_pool_borrow(&mut self, user: Address, scaled: U256) -> Result<U256> {
        self.credit(user, Side::Borrow, Partition::Pool, scaled)
    }

    pub fn credit_p2p_borrow(&mut self, user: Address, scaled: U256) -> Result<U256> {
        self.credit(user, Side::Borrow, Partition::P2P, scaled)
    }

    pub fn debit_pool_supply(&mut self, user: Address, scaled: U256) -> Result<U256> {
        self.debit(user, Side::Supply, Partition::Pool, scaled)
    }

    pub fn debit_p2p_supply(&mut self, user: Address, scaled: U256) -> Result<U256> {
        self.debit(user, Side::Supply, Partition::P2P, scaled)
    }

    pub fn debit_pool_borrow(&mut self, user: Address, scaled: U256) -> Result<U256> {
        self.debit(user, Side::Borrow, Partition::Pool, scaled)
    }

    pub fn debit_p2p_borrow(&mut self, user: Address, scaled: U256) -> Result<U256> {
        self.debit(user, Side::Borrow, Partition::P2P, scaled)
    }

    /// Collateral is never ranked, so it has no heap.
    pub fn credit_collateral(&mut self, user: Address, scaled: U256) -> Result<U256> {
        if user.is_zero() {
            return Err(CoreError::ZeroAddress);
        }
        let total = checked_add(self.collateral_total, scaled)?;
        let key = self.account_key_or_insert(user);
        let balance = checked_add(self.accounts[key].collateral, scaled)?;
        self.accounts[key].collateral = balance;
        self.collateral_total = total;
        Ok(balance)
    }

    pub fn debit_collateral(&mut self, user: Address, scaled: U256) -> Result<U256> {
        let balance = checked_sub(self.scaled_collateral_balance(&user), scaled)?;
        let total = checked_sub(self.collateral_total, scaled)?;
        if let Some(&key) = self.index.get(&user) {
            self.accounts[key].collateral = balance;
        }
        self.collateral_total = total;
        self.drop_if_empty(user);
        Ok(balance)
    }

    // ========================================================================
    // Delta mutators
    // ========================================================================

    /// Add pool-side delta (scaled by the pool index of `side`).
    pub fn increase_delta(&mut self, side: Side, scaled: U256) -> Result<U256> {
        let delta = &mut self.deltas.side_mut(side).scaled_delta_pool;
        *delta = checked_add(*delta, scaled)?;
        Ok(*delta)
    }

    /// Remove pool-side delta, flooring at zero (rounding dust).
    pub fn decrease_delta(&mut self, side: Side, scaled: U256) -> U256 {
        let delta = &mut self.deltas.side_mut(side).scaled_delta_pool;
        *delta = zero_floor_sub(*delta, scaled);
        *delta
    }

    // ========================================================================
    // Ordering structure maintenance
    // ========================================================================

    /// Resize every heap and re-rank accounts from the ledger.
    ///
    /// Accounts are re-inserted in address order so the outcome only depends
    /// on balances.
    pub fn set_max_sorted_users(&mut self, max_sorted_users: usize) {
        let mut heaps = [
            (Side::Supply, Partition::Pool),
            (Side::Supply, Partition::P2P),
            (Side::Borrow, Partition::Pool),
            (Side::Borrow, Partition::P2P),
        ]
        .map(|(side, partition)| (side, partition, BoundedHeap::with_capacity(max_sorted_users)));

        for account in self.accounts_sorted() {
            for (side, partition, heap) in heaps.iter_mut() {
                heap.insert_or_update(account.user, account.get(*side, *partition));
            }
        }

        let [(_, _, pool_suppliers), (_, _, p2p_suppliers), (_, _, pool_borrowers), (_, _, p2p_borrowers)] =
            heaps;
        self.pool_suppliers = pool_suppliers;
        self.p2p_suppliers = p2p_suppliers;
        self.pool_borrowers = pool_borrowers;
        self.p2p_borrowers = p2p_borrowers;
    }

    // ========================================================================
    // Invariants
    // ========================================================================

    /// Check aggregates against balances and heaps against the ledger.
    pub fn verify_invariants(&self) -> Result<()> {
        let mut sums = [[U256::zero(); 2]; 2];
        let mut collateral = U256::zero();
        for (_, account) in self.accounts.iter() {
            if account.is_empty() {
                return Err(CoreError::InvariantViolation(format!("empty account {} kept", account.user)));
            }
            for side in [Side::Supply, Side::Borrow] {
                for partition in [Partition::Pool, Partition::P2P] {
                    let slot = &mut sums[side_slot(side)][partition_slot(partition)];
                    *slot = checked_add(*slot, account.get(side, partition))?;
                }
            }
            collateral = checked_add(collateral, account.collateral)?;
        }

        for side in [Side::Supply, Side::Borrow] {
            for partition in [Partition::Pool, Partition::P2P] {
                let sum = sums[side_slot(side)][partition_slot(partition)];
                if sum != self.total(side, partition) {
                    return Err(CoreError::InvariantViolation(format!(
                        "{side:?}/{partition:?} aggregate {} != sum of balances {}",
                        self.total(side, partition),
                        sum
                    )));
                }

                let heap = self.heap(side, partition);
                if !heap.is_consistent() {
                    return Err(CoreError::InvariantViolation(format!(
                        "{side:?}/{partition:?} heap order broken"
                    )));
                }
                for (account, value) in heap.iter() {
                    let balance = self.scaled_balance(&account, side, partition);
                    if balance != value {
                        return Err(CoreError::InvariantViolation(format!(
                            "{side:?}/{partition:?} heap holds {value} for {account}, ledger {balance}"
                        )));
                    }
                }
            }
        }

        if collateral != self.collateral_total {
            return Err(CoreError::InvariantViolation(format!(
                "collateral aggregate {} != sum of balances {}",
                self.collateral_total, collateral
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    fn account_key_or_insert(&mut self, user: Address) -> usize {
        if let Some(&key) = self.index.get(&user) {
            return key;
        }
        let key = self.accounts.insert(AccountBalances::new(user));
        self.index.insert(user, key);
        key
    }

    fn drop_if_empty(&mut self, user: Address) {
        if let Some(&key) = self.index.get(&user) {
            if self.accounts[key].is_empty() {
                self.accounts.remove(key);
                self.index.remove(&user);
            }
        }
    }

    fn total_mut(&mut self, side: Side, partition: Partition) -> &mut U256 {
        match partition {
            Partition::Pool => &mut self.pool_totals[side_slot(side)],
            Partition::P2P => &mut self.deltas.side_mut(side).scaled_p2p_total,
        }
    }

    fn heap_mut(&mut self, side: Side, partition: Partition) -> &mut BoundedHeap {
        match (side, partition) {
            (Side::Supply, Partition::Pool) => &mut self.pool_suppliers,
            (Side::Supply, Partition::P2P) => &mut self.p2p_suppliers,
            (Side::Borrow, Partition::Pool) => &mut self.pool_borrowers,
            (Side::Borrow, Partition::P2P) => &mut self.p2p_borrowers,
        }
    }
}

#[inline]
fn side_slot(side: Side) -> usize {
    match side {
        Side::Supply => 0,
        Side::Borrow => 1,
    }
}

#[inline]
fn partition_slot(partition: Partition) -> usize {
    match partition {
        Partition::Pool => 0,
        Partition::P2P => 1,
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn addr(id: u64) -> Address {
        Address::from_low_u64(id)
    }

    fn v(value: u64) -> U256 {
        U256::from(value)
    }

    #[test]
    fn test_credit_updates_balance_heap_and_total() {
        let mut ledger = MarketBalances::new(16);
        ledger.credit_pool_supply(addr(1), v(100)).unwrap();
        ledger.credit_pool_supply(addr(2), v(300)).unwrap();
        ledger.credit_pool_supply(addr(1), v(50)).unwrap();

        assert_eq!(ledger.scaled_pool_balance(&addr(1), Side::Supply), v(150));
        assert_eq!(ledger.total(Side::Supply, Partition::Pool), v(450));
        assert_eq!(ledger.head(Side::Supply, Partition::Pool), Some(addr(2)));
        ledger.verify_invariants().unwrap();
    }

    #[test]
    fn test_p2p_total_tracks_deltas() {
        let mut ledger = MarketBalances::new(16);
        ledger.credit_p2p_borrow(addr(1), v(70)).unwrap();
        ledger.credit_p2p_borrow(addr(2), v(30)).unwrap();
        assert_eq!(ledger.deltas().borrow.scaled_p2p_total, v(100));

        ledger.debit_p2p_borrow(addr(1), v(70)).unwrap();
        assert_eq!(ledger.deltas().borrow.scaled_p2p_total, v(30));
        assert_eq!(ledger.head(Side::Borrow, Partition::P2P), Some(addr(2)));
        ledger.verify_invariants().unwrap();
    }

    #[test]
    fn test_debit_to_zero_removes_from_heap_and_ledger() {
        let mut ledger = MarketBalances::new(16);
        ledger.credit_pool_borrow(addr(1), v(10)).unwrap();
        ledger.debit_pool_borrow(addr(1), v(10)).unwrap();

        assert!(ledger.heap(Side::Borrow, Partition::Pool).is_empty());
        assert!(ledger.account(&addr(1)).is_none());
        assert_eq!(ledger.account_count(), 0);
    }

    #[test]
    fn test_debit_more_than_balance_fails_without_mutation() {
        let mut ledger = MarketBalances::new(16);
        ledger.credit_p2p_supply(addr(1), v(10)).unwrap();
        assert_eq!(ledger.debit_p2p_supply(addr(1), v(11)), Err(CoreError::Overflow));
        assert_eq!(ledger.scaled_p2p_balance(&addr(1), Side::Supply), v(10));
        ledger.verify_invariants().unwrap();
    }

    #[test]
    fn test_zero_address_rejected() {
        let mut ledger = MarketBalances::new(16);
        assert_eq!(ledger.credit_pool_supply(Address::ZERO, v(1)), Err(CoreError::ZeroAddress));
        assert_eq!(ledger.credit_collateral(Address::ZERO, v(1)), Err(CoreError::ZeroAddress));
    }

    #[test]
    fn test_collateral() {
        let mut ledger = MarketBalances::new(16);
        ledger.credit_collateral(addr(1), v(40)).unwrap();
        assert_eq!(ledger.scaled_collateral_balance(&addr(1)), v(40));
        assert_eq!(ledger.collateral_total(), v(40));
        ledger.debit_collateral(addr(1), v(40)).unwrap();
        assert!(ledger.account(&addr(1)).is_none());
        ledger.verify_invariants().unwrap();
    }

    #[test]
    fn test_deltas() {
        let mut ledger = MarketBalances::new(16);
        ledger.increase_delta(Side::Supply, v(25)).unwrap();
        assert_eq!(ledger.deltas().supply.scaled_delta_pool, v(25));
        assert_eq!(ledger.decrease_delta(Side::Supply, v(30)), U256::zero());
        assert!(ledger.deltas().borrow.scaled_delta_pool.is_zero());
    }

    #[test]
    fn test_set_balances_moves_between_partitions() {
        let mut ledger = MarketBalances::new(16);
        ledger.credit_pool_supply(addr(1), v(100)).unwrap();
        ledger.set_balances(addr(1), Side::Supply, v(40), v(60)).unwrap();

        assert_eq!(ledger.total(Side::Supply, Partition::Pool), v(40));
        assert_eq!(ledger.total(Side::Supply, Partition::P2P), v(60));
        assert_eq!(ledger.head(Side::Supply, Partition::P2P), Some(addr(1)));
        ledger.verify_invariants().unwrap();
    }

    #[test]
    fn test_capped_heap_keeps_ledger_balances() {
        let mut ledger = MarketBalances::new(2);
        for id in 1..=4 {
            ledger.credit_pool_supply(addr(id), v(id * 10)).unwrap();
        }
        let heap = ledger.heap(Side::Supply, Partition::Pool);
        assert_eq!(heap.len(), 2);
        assert!(!heap.contains(&addr(1)));
        assert_eq!(ledger.scaled_pool_balance(&addr(1), Side::Supply), v(10));
        assert_eq!(ledger.total(Side::Supply, Partition::Pool), v(100));
        ledger.verify_invariants().unwrap();
    }

    #[test]
    fn test_set_max_sorted_users_reranks() {
        let mut ledger = MarketBalances::new(1);
        for id in 1..=3 {
            ledger.credit_pool_borrow(addr(id), v(id)).unwrap();
        }
        assert_eq!(ledger.heap(Side::Borrow, Partition::Pool).len(), 1);

        ledger.set_max_sorted_users(8);
        let heap = ledger.heap(Side::Borrow, Partition::Pool);
        assert_eq!(heap.len(), 3);
        assert_eq!(heap.head(), Some((addr(3), v(3))));
        ledger.verify_invariants().unwrap();
    }

    #[test]
    fn test_random_mutations_keep_invariants() {
        let mut rng = ChaCha8Rng::seed_from_u64(99);
        let mut ledger = MarketBalances::new(8);
        let sides = [Side::Supply, Side::Borrow];
        let partitions = [Partition::Pool, Partition::P2P];

        for _ in 0..2_000 {
            let user = addr(rng.gen_range(1..=20u64));
            let side = sides[rng.gen_range(0..2)];
            let partition = partitions[rng.gen_range(0..2)];
            let amount = v(rng.gen_range(1..=1_000u64));
            if rng.gen_bool(0.6) {
                ledger.credit(user, side, partition, amount).unwrap();
            } else {
                let balance = ledger.scaled_balance(&user, side, partition);
                ledger.debit(user, side, partition, balance.min(amount)).unwrap();
            }
            ledger.verify_invariants().unwrap();
        }
    }
}
