//! Market sides, balance partitions and entry-point names.

use std::fmt;

// ============================================================================
// Side enum
// ============================================================================

/// Market side: supply or borrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Side {
    #[default]
    Supply,
    Borrow,
}

impl Side {
    /// The counterparty side.
    pub fn opposite(self) -> Self {
        match self {
            Side::Supply => Side::Borrow,
            Side::Borrow => Side::Supply,
        }
    }
}

// ============================================================================
// Partition enum
// ============================================================================

/// Where a scaled balance rests: on the pool or matched peer-to-peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Partition {
    #[default]
    Pool,
    P2P,
}

// ============================================================================
// Operation enum
// ============================================================================

/// User-facing entry points, used for pause checks and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Supply,
    SupplyCollateral,
    Borrow,
    Repay,
    Withdraw,
    WithdrawCollateral,
    /// Promote/demote through the matching engine.
    Matching,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Supply => "supply",
            Operation::SupplyCollateral => "supply collateral",
            Operation::Borrow => "borrow",
            Operation::Repay => "repay",
            Operation::Withdraw => "withdraw",
            Operation::WithdrawCollateral => "withdraw collateral",
            Operation::Matching => "p2p matching",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Supply.opposite(), Side::Borrow);
        assert_eq!(Side::Borrow.opposite(), Side::Supply);
    }

    #[test]
    fn test_operation_display() {
        assert_eq!(Operation::Matching.to_string(), "p2p matching");
        assert_eq!(Operation::Repay.to_string(), "repay");
    }
}
