//! Persisted state layout and state root.
//!
//! ## SSZ Layout
//!
//! Market and account state is encoded as fixed-size SSZ containers. `U256`
//! values are stored as 32-byte little-endian words; addresses are left-padded
//! to 32 bytes.
//!
//! ## State Root
//!
//! The state root is a SHA-256 hash over the SSZ bytes of every market
//! followed by its accounts, in address order. Identical operation sequences
//! yield identical roots.

use primitive_types::U256;
use sha2::{Digest, Sha256};
use ssz_rs::prelude::*;

use crate::error::CoreError;

/// Encode a `U256` as a 32-byte little-endian word.
#[inline]
pub fn u256_to_word(value: U256) -> [u8; 32] {
    value.to_little_endian()
}

/// Snapshot of one market's indexes, deltas and parameters.
///
/// Total size: 9 words + 4 u64 + 1 u8 = 321 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default, SimpleSerialize)]
pub struct MarketSnapshot {
    pub underlying: [u8; 32],

    pub supply_pool_index: [u8; 32],
    pub supply_p2p_index: [u8; 32],
    pub borrow_pool_index: [u8; 32],
    pub borrow_p2p_index: [u8; 32],

    pub supply_delta_pool: [u8; 32],
    pub supply_p2p_total: [u8; 32],
    pub borrow_delta_pool: [u8; 32],
    pub borrow_p2p_total: [u8; 32],

    /// Basis points
    pub reserve_factor: u64,
    /// Basis points
    pub p2p_index_cursor: u64,
    pub max_sorted_users: u64,
    pub last_update_timestamp: u64,

    /// Bit set of paused operations, see `PauseStatus::to_bits`.
    pub pause_bits: u8,
}

/// Snapshot of one account's scaled balances in one market.
///
/// Total size: 7 words = 224 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default, SimpleSerialize)]
pub struct AccountSnapshot {
    pub market: [u8; 32],
    pub user: [u8; 32],
    pub pool_supply: [u8; 32],
    pub p2p_supply: [u8; 32],
    pub pool_borrow: [u8; 32],
    pub p2p_borrow: [u8; 32],
    pub collateral: [u8; 32],
}

/// Incremental SHA-256 over SSZ-encoded snapshots.
#[derive(Default)]
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn absorb_market(&mut self, snapshot: &MarketSnapshot) -> crate::error::Result<()> {
        let bytes = ssz_rs::serialize(snapshot).map_err(|e| CoreError::Serialization(format!("{e:?}")))?;
        self.hasher.update(&bytes);
        Ok(())
    }

    pub fn absorb_account(&mut self, snapshot: &AccountSnapshot) -> crate::error::Result<()> {
        let bytes = ssz_rs::serialize(snapshot).map_err(|e| CoreError::Serialization(format!("{e:?}")))?;
        self.hasher.update(&bytes);
        Ok(())
    }

    pub fn finish(self) -> [u8; 32] {
        let result = self.hasher.finalize();
        let mut root = [0u8; 32];
        root.copy_from_slice(&result);
        root
    }
}

/// Hex display of a state root.
pub fn root_hex(root: &[u8; 32]) -> String {
    hex::encode(root)
}

// ============================================================================
// Unit Tests
// ============================================================================
