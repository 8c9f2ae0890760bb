//! Error type shared by every component.
//!
//! Every variant is raised before or during validation of an entry point and
//! leaves state unchanged. Unmatched remainder after promote/demote is never an
//! error: it is returned to the caller and converted into delta.

use thiserror::Error;

use crate::types::Operation;

/// Errors raised by the lending core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// An arithmetic result exceeded 256 bits, or a subtraction underflowed.
    #[error("arithmetic overflow")]
    Overflow,

    #[error("division by zero")]
    DivisionByZero,

    /// Accrual asked to move indexes backwards in time.
    #[error("stale or future timestamp: last update {last}, now {now}")]
    StaleOrFutureTimestamp { last: u64, now: u64 },

    #[error("amount is zero")]
    ZeroAmount,

    #[error("address is zero")]
    ZeroAddress,

    #[error("market not created")]
    MarketNotCreated,

    #[error("market already created")]
    MarketAlreadyCreated,

    /// A basis-point parameter is above 10_000.
    #[error("value {0} exceeds the maximum of 10000 basis points")]
    ExceedsMaxBasisPoints(u64),

    #[error("{0} is paused")]
    Paused(Operation),

    #[error("nothing to repay")]
    NothingToRepay,

    #[error("nothing to withdraw")]
    NothingToWithdraw,

    #[error("pool supply cap exceeded")]
    SupplyCapExceeded,

    #[error("insufficient pool liquidity")]
    InsufficientPoolLiquidity,

    /// Ledger aggregates or ordering structures disagree with balances.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, CoreError>;
