//! 20-byte account and market identifiers.

use std::fmt;
use std::str::FromStr;

use primitive_types::H160;

use crate::error::CoreError;

/// An account or underlying-asset address.
///
/// Ordering is byte-lexicographic; multi-market locks are taken in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub H160);

impl Address {
    /// The zero address, rejected by every entry point.
    pub const ZERO: Address = Address(H160([0u8; 20]));

    /// Build an address whose last 8 bytes hold `value` (big-endian).
    ///
    /// ```
    /// use p2p_lending::types::Address;
    ///
    /// let a = Address::from_low_u64(1);
    /// assert_eq!(a.to_string(), "0x0000000000000000000000000000000000000001");
    /// ```
    pub fn from_low_u64(value: u64) -> Self {
        Address(H160::from_low_u64_be(value))
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Left-pad to a 32-byte word (snapshot encoding).
    pub fn to_word(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(self.0.as_bytes());
        word
    }
}

impl From<H160> for Address {
    fn from(value: H160) -> Self {
        Address(value)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl FromStr for Address {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<H160>()
            .map(Address)
            .map_err(|e| CoreError::Serialization(format!("invalid address {s:?}: {e}")))
    }
}
