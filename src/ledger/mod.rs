//! Market balance ledger.
//!
//! - [`AccountBalances`]: one account's scaled balances
//! - [`MarketBalances`]: all accounts of a market, their ordering structures,
//!   aggregate totals and deltas
//!
//! Invariant: for every (side, partition) the stored aggregate equals the sum
//! of account balances, and every heap entry equals the ledger balance of its
//! account. [`MarketBalances::verify_invariants`] checks both.

pub mod account;
pub mod balances;

pub use account::AccountBalances;
pub use balances::MarketBalances;
