//! Per-account scaled balances in one market.

use primitive_types::U256;

use crate::types::snapshot::u256_to_word;
use crate::types::{AccountSnapshot, Address, Partition, Side};

/// Scaled balances of one account.
///
/// Pool balances are scaled by the pool index of their side, P2P balances by
/// the P2P index, collateral by the pool supply index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccountBalances {
    pub user: Address,
    pub pool_supply: U256,
    pub p2p_supply: U256,
    pub pool_borrow: U256,
    pub p2p_borrow: U256,
    pub collateral: U256,
}

impl AccountBalances {
    pub fn new(user: Address) -> Self {
        Self {
            user,
            ..Default::default()
        }
    }

    #[inline]
    pub fn get(&self, side: Side, partition: Partition) -> U256 {
        match (side, partition) {
            (Side::Supply, Partition::Pool) => self.pool_supply,
            (Side::Supply, Partition::P2P) => self.p2p_supply,
            (Side::Borrow, Partition::Pool) => self.pool_borrow,
            (Side::Borrow, Partition::P2P) => self.p2p_borrow,
        }
    }

    #[inline]
    pub fn slot_mut(&mut self, side: Side, partition: Partition) -> &mut U256 {
        match (side, partition) {
            (Side::Supply, Partition::Pool) => &mut self.pool_supply,
            (Side::Supply, Partition::P2P) => &mut self.p2p_supply,
            (Side::Borrow, Partition::Pool) => &mut self.pool_borrow,
            (Side::Borrow, Partition::P2P) => &mut self.p2p_borrow,
        }
    }

    /// No balance left anywhere; the account can be dropped.
    pub fn is_empty(&self) -> bool {
        self.pool_supply.is_zero()
            && self.p2p_supply.is_zero()
            && self.pool_borrow.is_zero()
            && self.p2p_borrow.is_zero()
            && self.collateral.is_zero()
    }

    pub fn snapshot(&self, market: Address) -> AccountSnapshot {
        AccountSnapshot {
            market: market.to_word(),
            user: self.user.to_word(),
            pool_supply: u256_to_word(self.pool_supply),
            p2p_supply: u256_to_word(self.p2p_supply),
            pool_borrow: u256_to_word(self.pool_borrow),
            p2p_borrow: u256_to_word(self.p2p_borrow),
            collateral: u256_to_word(self.collateral),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_account_is_empty() {
        let account = AccountBalances::new(Address::from_low_u64(1));
        assert!(account.is_empty());
        assert_eq!(account.get(Side::Borrow, Partition::P2P), U256::zero());
    }

    #[test]
    fn test_slot_mut() {
        let mut account = AccountBalances::new(Address::from_low_u64(1));
        *account.slot_mut(Side::Borrow, Partition::Pool) = U256::from(5u64);
        assert_eq!(account.pool_borrow, U256::from(5u64));
        assert_eq!(account.get(Side::Borrow, Partition::Pool), U256::from(5u64));
        assert!(!account.is_empty());
    }

    #[test]
    fn test_collateral_alone_is_not_empty() {
        let mut account = AccountBalances::new(Address::from_low_u64(1));
        account.collateral = U256::one();
        assert!(!account.is_empty());
    }
}
