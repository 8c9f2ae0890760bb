//! Interest indexes and market deltas.
//!
//! ## Indexes
//!
//! Each side of a market carries a pool index (the underlying pool's own
//! compounding) and a P2P index (the blended peer-to-peer rate). Both are
//! ray values starting at 1.0 and never decrease.
//!
//! ## Deltas
//!
//! `scaled_delta_pool` is liquidity that is economically matched P2P but
//! still rests on the pool (scaled by the pool index); `scaled_p2p_total` is
//! the sum of every P2P balance on that side (scaled by the P2P index).

use primitive_types::U256;

use crate::math::ray::RAY;
use crate::types::Side;

/// Pool and P2P index of one market side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketSideIndexes {
    pub pool_index: U256,
    pub p2p_index: U256,
}

impl MarketSideIndexes {
    /// Both indexes at 1.0.
    pub fn initial() -> Self {
        Self {
            pool_index: RAY,
            p2p_index: RAY,
        }
    }
}

impl Default for MarketSideIndexes {
    fn default() -> Self {
        Self::initial()
    }
}

/// Supply and borrow indexes of a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Indexes {
    pub supply: MarketSideIndexes,
    pub borrow: MarketSideIndexes,
}

impl Indexes {
    pub fn initial() -> Self {
        Self {
            supply: MarketSideIndexes::initial(),
            borrow: MarketSideIndexes::initial(),
        }
    }

    #[inline]
    pub fn side(&self, side: Side) -> &MarketSideIndexes {
        match side {
            Side::Supply => &self.supply,
            Side::Borrow => &self.borrow,
        }
    }

    /// True if no index is below its counterpart in `previous`.
    pub fn dominates(&self, previous: &Indexes) -> bool {
        self.supply.pool_index >= previous.supply.pool_index
            && self.supply.p2p_index >= previous.supply.p2p_index
            && self.borrow.pool_index >= previous.borrow.pool_index
            && self.borrow.p2p_index >= previous.borrow.p2p_index
    }
}

/// Unmatched and matched aggregates of one market side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MarketSideDelta {
    /// P2P liquidity resting on the pool, scaled by the pool index.
    pub scaled_delta_pool: U256,
    /// Sum of P2P balances, scaled by the P2P index.
    pub scaled_p2p_total: U256,
}

/// Deltas of both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Deltas {
    pub supply: MarketSideDelta,
    pub borrow: MarketSideDelta,
}

impl Deltas {
    #[inline]
    pub fn side(&self, side: Side) -> &MarketSideDelta {
        match side {
            Side::Supply => &self.supply,
            Side::Borrow => &self.borrow,
        }
    }

    #[inline]
    pub fn side_mut(&mut self, side: Side) -> &mut MarketSideDelta {
        match side {
            Side::Supply => &mut self.supply,
            Side::Borrow => &mut self.borrow,
        }
    }
}
