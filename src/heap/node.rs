//! Heap node for slab-based storage.
//!
//! ## Design
//!
//! `HeapNode` holds one tracked `(account, scaled balance)` entry plus its
//! position in both heaps of a [`BoundedHeap`](super::BoundedHeap). Positions
//! are indexes into the heap arrays, so a node can be re-sifted or detached
//! in O(log N) once its slab key is known.
//!
//! ## Ranking
//!
//! A node ranks above another when its value is larger, or when values are
//! equal and it was inserted first (lower sequence number). The sequence is
//! assigned on insertion and kept across updates, so identical inputs always
//! produce the same head.

use std::cmp::Ordering;

use primitive_types::U256;

use crate::types::Address;

/// Entry stored in the slab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapNode {
    pub account: Address,

    /// Scaled balance this entry is ranked by
    pub value: U256,

    /// Insertion sequence, the tie-break for equal values
    pub seq: u64,

    /// Position in the max-heap array
    pub max_pos: usize,

    /// Position in the min-heap array
    pub min_pos: usize,
}

impl HeapNode {
    /// Create a node that is not yet placed in either heap.
    #[inline]
    pub fn new(account: Address, value: U256, seq: u64) -> Self {
        Self {
            account,
            value,
            seq,
            max_pos: usize::MAX,
            min_pos: usize::MAX,
        }
    }

    /// Total ranking: larger value first, then earlier insertion.
    #[inline]
    pub fn rank_cmp(&self, other: &HeapNode) -> Ordering {
        self.value
            .cmp(&other.value)
            .then_with(|| other.seq.cmp(&self.seq))
    }

    #[inline]
    pub fn ranks_above(&self, other: &HeapNode) -> bool {
        self.rank_cmp(other) == Ordering::Greater
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
