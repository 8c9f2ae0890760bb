//! Ray fixed-point arithmetic.
//!
//! ## Overview
//!
//! Balances, indexes and growth factors are `U256` values. Indexes and
//! growth factors are ray-scaled (10^27 represents 1.0); balances are raw
//! token units. Converting between scaled and actual balances goes through
//! these primitives only, so the rounding direction is the same everywhere.
//!
//! ## Rounding
//!
//! | Function | Result |
//! |----------|--------|
//! | [`ray_mul`] | `floor(a * b / RAY)` |
//! | [`ray_mul_up`] | `ceil(a * b / RAY)` |
//! | [`ray_div`] | `floor(a * RAY / b)` |
//! | [`ray_div_up`] | `ceil(a * RAY / b)` |
//!
//! Products are computed in 512 bits; a quotient that does not fit back into
//! 256 bits is an [`CoreError::Overflow`].
//!
//! ## Example
//!
//! ```
//! use p2p_lending::math::ray::{ray_mul, RAY};
//! use primitive_types::U256;
//!
//! let two = RAY * U256::from(2u64);
//! let three = RAY * U256::from(3u64);
//! assert_eq!(ray_mul(two, three).unwrap(), RAY * U256::from(6u64));
//! ```

use primitive_types::{U256, U512};

use crate::error::{CoreError, Result};

/// 10^27, the ray unit (1.0).
pub const RAY: U256 = U256([0x9fd0_803c_e800_0000, 0x033b_2e3c, 0, 0]);

/// Half a ray, used by half-up rounding helpers.
pub const HALF_RAY: U256 = U256([0x4fe8_401e_7400_0000, 0x019d_971e, 0, 0]);

#[inline]
fn narrow(value: U512) -> Result<U256> {
    U256::try_from(value).map_err(|_| CoreError::Overflow)
}

/// Multiply two ray values, rounding down.
pub fn ray_mul(a: U256, b: U256) -> Result<U256> {
    narrow(U512::from(a) * U512::from(b) / U512::from(RAY))
}

/// Multiply two ray values, rounding up.
pub fn ray_mul_up(a: U256, b: U256) -> Result<U256> {
    let ray = U512::from(RAY);
    narrow((U512::from(a) * U512::from(b) + ray - U512::one()) / ray)
}

/// Divide `a` by the ray value `b`, rounding down.
///
/// # Errors
///
/// [`CoreError::DivisionByZero`] when `b` is zero.
pub fn ray_div(a: U256, b: U256) -> Result<U256> {
    if b.is_zero() {
        return Err(CoreError::DivisionByZero);
    }
    narrow(U512::from(a) * U512::from(RAY) / U512::from(b))
}

/// Divide `a` by the ray value `b`, rounding up.
pub fn ray_div_up(a: U256, b: U256) -> Result<U256> {
    if b.is_zero() {
        return Err(CoreError::DivisionByZero);
    }
    let divisor = U512::from(b);
    narrow((U512::from(a) * U512::from(RAY) + divisor - U512::one()) / divisor)
}

/// `a + b`, failing on overflow.
#[inline]
pub fn checked_add(a: U256, b: U256) -> Result<U256> {
    a.checked_add(b).ok_or(CoreError::Overflow)
}

/// `a - b`, failing on underflow.
#[inline]
pub fn checked_sub(a: U256, b: U256) -> Result<U256> {
    a.checked_sub(b).ok_or(CoreError::Overflow)
}

/// `max(a - b, 0)`.
#[inline]
pub fn zero_floor_sub(a: U256, b: U256) -> U256 {
    a.saturating_sub(b)
}

/// `|a - b| <= tolerance`, for tests and invariant checks.
pub fn approx_eq(a: U256, b: U256, tolerance: U256) -> bool {
    if a >= b {
        a - b <= tolerance
    } else {
        b - a <= tolerance
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
