//! Matching engine.
//!
//! ## Design Principles
//!
//! 1. **Determinism**: counterparties are picked from the ordering structures
//!    (largest balance first, ties by insertion order), never by iteration
//!    over a hash map
//! 2. **Bounded work**: every loop takes an explicit iteration budget
//! 3. **Ledger first**: the engine only rewrites balances through
//!    [`MarketBalances`](crate::ledger::MarketBalances), which keeps
//!    aggregates and ordering structures in sync
//!
//! ## Matching Rules
//!
//! - **Promote** moves liquidity from the pool to P2P
//! - **Demote** moves liquidity from P2P back to the pool
//! - **Partial moves** are supported; moving a whole balance zeroes it exactly
//! - **Rounding** favors the protocol: a moved deposit may lose a few wei, a
//!   moved debt may gain a few, never the reverse
//! - **Unmatched remainder** is returned to the caller, never dropped
//!
//! ## Example
//!
//! ```
//! use p2p_lending::engine::promote_suppliers;
//! use p2p_lending::market::{Market, MarketConfig};
//! use p2p_lending::types::Address;
//! use primitive_types::U256;
//!
//! let mut market = Market::new(Address::from_low_u64(1), MarketConfig::default(), 0).unwrap();
//!
//! // Nobody to promote yet
//! let result = promote_suppliers(&mut market, U256::from(1_000u64), 4).unwrap();
//! assert!(result.matched.is_zero());
//! assert_eq!(result.loops, 0);
//! ```

pub mod matcher;

pub use matcher::{demote, demote_borrowers, demote_suppliers, promote, promote_borrowers, promote_suppliers, MatchResult};
pub(crate) use matcher::preview_promotion;
