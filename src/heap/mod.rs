//! Priority ordering structure for match counterparty selection.
//!
//! ## Architecture
//!
//! One [`BoundedHeap`] exists per (market, side, partition). It is a derived
//! index over the ledger: the ledger pushes every balance change into it, and
//! the matching engine reads its head to pick the next counterparty.
//!
//! - [`HeapNode`]: `(account, value)` entry with positions in both heaps
//! - [`BoundedHeap`]: capped d-ary max-heap with a companion min-heap
//!
//! Selection is always "largest balance first", so a given amount is matched
//! with as few counterparties (loop iterations) as possible.

pub mod bounded;
pub mod node;

pub use bounded::{BoundedHeap, HeapUpdate, ARITY};
pub use node::HeapNode;
