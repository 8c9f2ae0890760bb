//! Bounded d-ary heap of scaled balances.
//!
//! ## Architecture
//!
//! - **Slab**: node storage, O(1) insert/remove/lookup by key
//! - **Max-heap** (`Vec<usize>` of slab keys, arity [`ARITY`]): head = largest
//! - **Min-heap** over the same nodes: smallest tracked entry for eviction
//! - **HashMap**: account to slab key, O(1) lookup before a sift
//!
//! ## Capacity
//!
//! At most `capacity` accounts are tracked. When the heap is full, an
//! untracked account competes with the smallest tracked one and the
//! lower-ranked of the two stays out. Accounts that are not tracked keep their
//! ledger balances; only matching selection ignores them.
//!
//! ## Complexity
//!
//! | Operation | Complexity |
//! |-----------|------------|
//! | `insert_or_update` | O(log N) |
//! | `remove` | O(log N) |
//! | `head` / `smallest` | O(1) |
//! | `top(k)` | O(k log k) |
//!
//! ## Example
//!
//! ```
//! use p2p_lending::heap::BoundedHeap;
//! use p2p_lending::types::Address;
//! use primitive_types::U256;
//!
//! let mut heap = BoundedHeap::with_capacity(2);
//! heap.insert_or_update(Address::from_low_u64(1), U256::from(10u64));
//! heap.insert_or_update(Address::from_low_u64(2), U256::from(30u64));
//! heap.insert_or_update(Address::from_low_u64(3), U256::from(20u64));
//!
//! // account 1 was the smallest and got evicted
//! assert_eq!(heap.len(), 2);
//! assert_eq!(heap.head(), Some((Address::from_low_u64(2), U256::from(30u64))));
//! assert!(!heap.contains(&Address::from_low_u64(1)));
//! ```

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use primitive_types::U256;
use slab::Slab;

use crate::heap::HeapNode;
use crate::types::Address;

/// Children per heap node.
pub const ARITY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Order {
    Max,
    Min,
}

/// Outcome of [`BoundedHeap::insert_or_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapUpdate {
    Inserted,
    Updated,
    Removed,
    /// Inserted after pushing out the given account.
    Evicted(Address),
    /// Heap full and the entry ranks below every tracked one.
    Untracked,
    Unchanged,
}

/// Bounded priority structure keyed by scaled balance.
#[derive(Debug, Clone)]
pub struct BoundedHeap {
    nodes: Slab<HeapNode>,
    index: HashMap<Address, usize>,
    max_heap: Vec<usize>,
    min_heap: Vec<usize>,
    capacity: usize,
    next_seq: u64,
}

impl BoundedHeap {
    /// Create an empty heap tracking at most `capacity` accounts.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Slab::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            max_heap: Vec::with_capacity(capacity),
            min_heap: Vec::with_capacity(capacity),
            capacity,
            next_seq: 0,
        }
    }

    // ========================================================================
    // Capacity and Size
    // ========================================================================

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.max_heap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.max_heap.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    #[inline]
    pub fn contains(&self, account: &Address) -> bool {
        self.index.contains_key(account)
    }

    /// Tracked value of `account`, if any.
    pub fn value_of(&self, account: &Address) -> Option<U256> {
        self.index.get(account).map(|&key| self.nodes[key].value)
    }

    // ========================================================================
    // Head / Tail
    // ========================================================================

    /// Largest tracked entry.
    #[inline]
    pub fn head(&self) -> Option<(Address, U256)> {
        self.max_heap.first().map(|&key| {
            let node = &self.nodes[key];
            (node.account, node.value)
        })
    }

    /// Smallest tracked entry (next to be evicted).
    #[inline]
    pub fn smallest(&self) -> Option<(Address, U256)> {
        self.min_heap.first().map(|&key| {
            let node = &self.nodes[key];
            (node.account, node.value)
        })
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Insert, update or remove (`value == 0`) the entry of `account`.
    pub fn insert_or_update(&mut self, account: Address, value: U256) -> HeapUpdate {
        if value.is_zero() {
            return match self.remove(&account) {
                Some(_) => HeapUpdate::Removed,
                None => HeapUpdate::Unchanged,
            };
        }

        if let Some(&key) = self.index.get(&account) {
            if self.nodes[key].value == value {
                return HeapUpdate::Unchanged;
            }
            self.nodes[key].value = value;
            self.fix(Order::Max, key);
            self.fix(Order::Min, key);
            return HeapUpdate::Updated;
        }

        if self.capacity == 0 {
            return HeapUpdate::Untracked;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let candidate = HeapNode::new(account, value, seq);

        if self.is_full() {
            let smallest_key = self.min_heap[0];
            if !candidate.ranks_above(&self.nodes[smallest_key]) {
                return HeapUpdate::Untracked;
            }
            let evicted = self.nodes[smallest_key].account;
            self.remove(&evicted);
            self.attach(candidate);
            return HeapUpdate::Evicted(evicted);
        }

        self.attach(candidate);
        HeapUpdate::Inserted
    }

    /// Remove `account`, returning its tracked value. No-op if absent.
    pub fn remove(&mut self, account: &Address) -> Option<U256> {
        let key = self.index.remove(account)?;
        self.detach(Order::Max, key);
        self.detach(Order::Min, key);
        Some(self.nodes.remove(key).value)
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Iterate over tracked entries in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (Address, U256)> + '_ {
        self.nodes.iter().map(|(_, node)| (node.account, node.value))
    }

    /// Up to `k` tracked entries from highest to lowest rank.
    ///
    /// Walks the max-heap from its root with a frontier ordered by rank, so
    /// the cost depends on `k`, not on the number of tracked entries.
    pub fn top(&self, k: usize) -> Vec<(Address, U256)> {
        let mut ranked = Vec::with_capacity(k.min(self.len()));
        let mut frontier = BinaryHeap::new();
        if k > 0 && !self.max_heap.is_empty() {
            frontier.push(self.frontier_entry(0));
        }
        while ranked.len() < k {
            let Some((_, _, pos)) = frontier.pop() else {
                break;
            };
            let node = &self.nodes[self.max_heap[pos]];
            ranked.push((node.account, node.value));

            let first_child = pos * ARITY + 1;
            for child in first_child..(first_child + ARITY).min(self.max_heap.len()) {
                frontier.push(self.frontier_entry(child));
            }
        }
        ranked
    }

    /// Check heap order and position bookkeeping of both heaps.
    pub fn is_consistent(&self) -> bool {
        if self.max_heap.len() != self.nodes.len()
            || self.min_heap.len() != self.nodes.len()
            || self.index.len() != self.nodes.len()
            || self.len() > self.capacity
        {
            return false;
        }
        for order in [Order::Max, Order::Min] {
            let heap = self.heap(order);
            for (pos, &key) in heap.iter().enumerate() {
                if self.pos_of(order, key) != pos {
                    return false;
                }
                if pos > 0 && self.before(order, key, heap[(pos - 1) / ARITY]) {
                    return false;
                }
            }
        }
        self.index
            .iter()
            .all(|(account, &key)| self.nodes.get(key).map(|n| n.account) == Some(*account))
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    /// Max-heap position keyed so that `BinaryHeap` pops the highest rank.
    #[inline]
    fn frontier_entry(&self, pos: usize) -> (U256, Reverse<u64>, usize) {
        let node = &self.nodes[self.max_heap[pos]];
        (node.value, Reverse(node.seq), pos)
    }

    fn attach(&mut self, node: HeapNode) {
        let account = node.account;
        let key = self.nodes.insert(node);
        self.index.insert(account, key);
        self.push(Order::Max, key);
        self.push(Order::Min, key);
    }

    #[inline]
    fn heap(&self, order: Order) -> &Vec<usize> {
        match order {
            Order::Max => &self.max_heap,
            Order::Min => &self.min_heap,
        }
    }

    #[inline]
    fn heap_mut(&mut self, order: Order) -> &mut Vec<usize> {
        match order {
            Order::Max => &mut self.max_heap,
            Order::Min => &mut self.min_heap,
        }
    }

    #[inline]
    fn pos_of(&self, order: Order, key: usize) -> usize {
        match order {
            Order::Max => self.nodes[key].max_pos,
            Order::Min => self.nodes[key].min_pos,
        }
    }

    #[inline]
    fn set_pos(&mut self, order: Order, key: usize, pos: usize) {
        match order {
            Order::Max => self.nodes[key].max_pos = pos,
            Order::Min => self.nodes[key].min_pos = pos,
        }
    }

    /// Whether node `a` belongs above node `b` in the given heap.
    #[inline]
    fn before(&self, order: Order, a: usize, b: usize) -> bool {
        let (a, b) = (&self.nodes[a], &self.nodes[b]);
        match order {
            Order::Max => a.ranks_above(b),
            Order::Min => b.ranks_above(a),
        }
    }

    fn swap(&mut self, order: Order, i: usize, j: usize) {
        self.heap_mut(order).swap(i, j);
        let (key_i, key_j) = (self.heap(order)[i], self.heap(order)[j]);
        self.set_pos(order, key_i, i);
        self.set_pos(order, key_j, j);
    }

    fn sift_up(&mut self, order: Order, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / ARITY;
            let (key, parent_key) = (self.heap(order)[pos], self.heap(order)[parent]);
            if !self.before(order, key, parent_key) {
                break;
            }
            self.swap(order, pos, parent);
            pos = parent;
        }
    }

    fn sift_down(&mut self, order: Order, mut pos: usize) {
        let len = self.heap(order).len();
        loop {
            let first_child = pos * ARITY + 1;
            if first_child >= len {
                break;
            }
            let last_child = (first_child + ARITY).min(len);
            let mut best = pos;
            for child in first_child..last_child {
                let heap = self.heap(order);
                if self.before(order, heap[child], heap[best]) {
                    best = child;
                }
            }
            if best == pos {
                break;
            }
            self.swap(order, pos, best);
            pos = best;
        }
    }

    /// Restore heap order around `key` after its value changed.
    fn fix(&mut self, order: Order, key: usize) {
        self.sift_up(order, self.pos_of(order, key));
        self.sift_down(order, self.pos_of(order, key));
    }

    fn push(&mut self, order: Order, key: usize) {
        self.heap_mut(order).push(key);
        let pos = self.heap(order).len() - 1;
        self.set_pos(order, key, pos);
        self.sift_up(order, pos);
    }

    fn detach(&mut self, order: Order, key: usize) {
        let pos = self.pos_of(order, key);
        let last = self.heap(order).len() - 1;
        if pos != last {
            self.swap(order, pos, last);
        }
        self.heap_mut(order).pop();
        if pos < self.heap(order).len() {
            let moved = self.heap(order)[pos];
            self.fix(order, moved);
        }
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
    fn test_heap_new() {
        let heap = BoundedHeap::with_capacity(8);
        assert!(heap.is_empty());
        assert_eq!(heap.capacity(), 8);
        assert!(heap.head().is_none());
        assert!(heap.smallest().is_none());
    }

    #[test]
    fn test_head_is_largest() {
        let mut heap = BoundedHeap::with_capacity(16);
        for (id, value) in [(1, 50), (2, 10), (3, 90), (4, 70), (5, 30), (6, 60)] {
            assert_eq!(heap.insert_or_update(addr(id), v(value)), HeapUpdate::Inserted);
        }
        assert_eq!(heap.head(), Some((addr(3), v(90))));
        assert_eq!(heap.smallest(), Some((addr(2), v(10))));
        assert!(heap.is_consistent());
    }

    #[test]
    fn test_tie_break_by_insertion_order() {
        let mut heap = BoundedHeap::with_capacity(16);
        heap.insert_or_update(addr(9), v(100));
        heap.insert_or_update(addr(1), v(100));
        heap.insert_or_update(addr(5), v(100));
        assert_eq!(heap.head(), Some((addr(9), v(100))));
        assert_eq!(heap.smallest(), Some((addr(5), v(100))));

        heap.remove(&addr(9));
        assert_eq!(heap.head(), Some((addr(1), v(100))));
    }

    #[test]
    fn test_update_keeps_tie_break_sequence() {
        let mut heap = BoundedHeap::with_capacity(16);
        heap.insert_or_update(addr(1), v(100));
        heap.insert_or_update(addr(2), v(50));
        assert_eq!(heap.insert_or_update(addr(1), v(40)), HeapUpdate::Updated);
        assert_eq!(heap.head(), Some((addr(2), v(50))));

        // back to a tie: account 1 was inserted first
        heap.insert_or_update(addr(1), v(50));
        assert_eq!(heap.head(), Some((addr(1), v(50))));
        assert!(heap.is_consistent());
    }

    #[test]
    fn test_update_to_zero_removes() {
        let mut heap = BoundedHeap::with_capacity(4);
        heap.insert_or_update(addr(1), v(10));
        assert_eq!(heap.insert_or_update(addr(1), U256::zero()), HeapUpdate::Removed);
        assert!(heap.is_empty());
        assert_eq!(heap.insert_or_update(addr(1), U256::zero()), HeapUpdate::Unchanged);
    }

    #[test]
    fn test_same_value_is_unchanged() {
        let mut heap = BoundedHeap::with_capacity(4);
        heap.insert_or_update(addr(1), v(10));
        assert_eq!(heap.insert_or_update(addr(1), v(10)), HeapUpdate::Unchanged);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut heap = BoundedHeap::with_capacity(4);
        assert!(heap.remove(&addr(42)).is_none());
        heap.insert_or_update(addr(1), v(10));
        assert_eq!(heap.remove(&addr(1)), Some(v(10)));
        assert!(heap.remove(&addr(1)).is_none());
    }

    #[test]
    fn test_full_heap_evicts_smallest() {
        let mut heap = BoundedHeap::with_capacity(3);
        heap.insert_or_update(addr(1), v(10));
        heap.insert_or_update(addr(2), v(20));
        heap.insert_or_update(addr(3), v(30));
        assert!(heap.is_full());

        assert_eq!(heap.insert_or_update(addr(4), v(25)), HeapUpdate::Evicted(addr(1)));
        assert_eq!(heap.len(), 3);
        assert!(!heap.contains(&addr(1)));
        assert_eq!(heap.smallest(), Some((addr(2), v(20))));
    }

    #[test]
    fn test_full_heap_leaves_smaller_entry_untracked() {
        let mut heap = BoundedHeap::with_capacity(2);
        heap.insert_or_update(addr(1), v(10));
        heap.insert_or_update(addr(2), v(20));

        assert_eq!(heap.insert_or_update(addr(3), v(5)), HeapUpdate::Untracked);
        // equal to the smallest: the tracked one was there first
        assert_eq!(heap.insert_or_update(addr(4), v(10)), HeapUpdate::Untracked);
        assert_eq!(heap.top(8), vec![(addr(2), v(20)), (addr(1), v(10))]);
    }

    #[test]
    fn test_zero_capacity_tracks_nothing() {
        let mut heap = BoundedHeap::with_capacity(0);
        assert_eq!(heap.insert_or_update(addr(1), v(10)), HeapUpdate::Untracked);
        assert!(heap.head().is_none());
    }

    #[test]
    fn test_top_follows_rank() {
        let mut heap = BoundedHeap::with_capacity(16);
        for (id, value) in [(1, 40), (2, 90), (3, 40), (4, 10), (5, 70), (6, 90)] {
            heap.insert_or_update(addr(id), v(value));
        }
        assert!(heap.top(0).is_empty());
        assert_eq!(
            heap.top(4),
            vec![(addr(2), v(90)), (addr(6), v(90)), (addr(5), v(70)), (addr(1), v(40))]
        );
        assert_eq!(heap.top(100).len(), 6);
    }

    #[test]
    fn test_value_of() {
        let mut heap = BoundedHeap::with_capacity(4);
        heap.insert_or_update(addr(1), v(10));
        assert_eq!(heap.value_of(&addr(1)), Some(v(10)));
        assert_eq!(heap.value_of(&addr(2)), None);
    }

    #[test]
    fn test_random_operations_keep_heap_consistent() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut heap = BoundedHeap::with_capacity(32);

        for _ in 0..5_000 {
            let id = rng.gen_range(1..=64u64);
            let value = if rng.gen_bool(0.2) { 0 } else { rng.gen_range(1..=1_000u64) };
            heap.insert_or_update(addr(id), v(value));
            assert!(heap.is_consistent());
        }

        // top(k) is the order in which draining by head returns entries
        let expected = heap.top(usize::MAX);
        let mut drained = Vec::new();
        while let Some((account, value)) = heap.head() {
            drained.push((account, value));
            heap.remove(&account);
        }
        assert_eq!(drained, expected);
        assert!(drained.windows(2).all(|w| w[0].1 >= w[1].1));
        assert!(heap.is_consistent());
    }
}
