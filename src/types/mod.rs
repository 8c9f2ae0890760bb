//! Core data types.
//!
//! ## Types
//!
//! - [`Address`]: 20-byte account / market identifier
//! - [`Side`]: Supply or Borrow
//! - [`Partition`]: Pool or P2P
//! - [`Operation`]: user-facing entry points (pause checks, errors)
//! - [`Indexes`] / [`MarketSideIndexes`]: pool and P2P ray indexes
//! - [`Deltas`] / [`MarketSideDelta`]: per-side unmatched and matched totals
//! - [`MarketSnapshot`] / [`AccountSnapshot`]: SSZ persisted layout
//!
//! ## Fixed-Point Arithmetic
//!
//! Indexes are ray values (`U256` scaled by 10^27). Balances are `U256`
//! token units; scaled balances are `actual / index`.

mod address;
mod indexes;
mod side;
pub mod snapshot;

pub use address::Address;
pub use indexes::{Deltas, Indexes, MarketSideDelta, MarketSideIndexes};
pub use side::{Operation, Partition, Side};
pub use snapshot::{AccountSnapshot, MarketSnapshot, StateHasher};
