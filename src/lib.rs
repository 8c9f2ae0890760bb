//! # P2P Lending
//!
//! Peer-to-peer matching overlay for a pooled lending market.
//!
//! ## Architecture
//!
//! Suppliers and borrowers of a market are matched directly whenever
//! possible; any unmatched remainder rests on the underlying pool.
//! - **Math**: ray fixed point (10^27), basis points, decimal conversion
//! - **Heap**: bounded d-ary heaps ranking accounts per (side, partition)
//! - **Ledger**: scaled balances, aggregates and deltas per market
//! - **Interest**: pure pool and P2P index accrual
//! - **Engine**: bounded promote/demote loops
//! - **Positions**: supply, borrow, repay, withdraw and collateral flows
//! - **Protocol**: per-market locks and all-or-nothing transactions
//!
//! ## Design Principles
//!
//! 1. **Determinism**: identical operation sequences give identical state roots
//! 2. **No Floating Point**: all math uses `U256` ray fixed point
//! 3. **Bounded Work**: every matching loop takes an iteration budget
//! 4. **Synchronous Execution**: no async anywhere

// ============================================================================
// Module declarations
// ============================================================================

/// Error type shared by every component
pub mod error;

/// Ray, percentage and decimal arithmetic
pub mod math;

/// Core data types: addresses, sides, indexes, snapshots
pub mod types;

/// Bounded priority heaps
pub mod heap;

/// Market balance ledger
pub mod ledger;

/// Interest index accrual
pub mod interest;

/// Matching engine: promote/demote loops
pub mod engine;

/// Per-market state
pub mod market;

/// User position flows
pub mod positions;

/// Multi-market coordinator and pool adapter
pub mod protocol;

/// Runtime settings
pub mod config;

// ============================================================================
// Re-exports for convenience
// ============================================================================

pub use config::Settings;
pub use engine::{demote_borrowers, demote_suppliers, promote_borrowers, promote_suppliers, MatchResult};
pub use error::{CoreError, Result};
pub use interest::{compute_indexes, IndexParams, PoolRates};
pub use market::{Market, MarketConfig, PauseStatus};
pub use math::{RAY, ray_div, ray_div_up, ray_mul, ray_mul_up};
pub use positions::{PoolLimits, PositionReceipt};
pub use protocol::{FixedRatePool, PoolAdapter, Protocol};
pub use types::{Address, Indexes, Operation, Partition, Side};
