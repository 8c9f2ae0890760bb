//! Decimal string conversion for ray values and token amounts.
//!
//! ## Overview
//!
//! Configuration files and the demo binary express rates and amounts as
//! human-readable decimals ("0.035", "1500.25"). Parsing goes through
//! `rust_decimal` so no floating point is ever involved; the result is an
//! integer scaled by `10^decimals`.
//!
//! ## Examples
//!
//! ```
//! use p2p_lending::math::decimal::{to_ray, to_units, from_units};
//! use p2p_lending::math::ray::RAY;
//! use primitive_types::U256;
//!
//! assert_eq!(to_ray("1"), Some(RAY));
//! assert_eq!(to_units("1.5", 18), Some(U256::from(1_500_000_000_000_000_000u64)));
//! assert_eq!(from_units(U256::from(1_500_000u64), 6), "1.500000");
//! ```

use std::str::FromStr;

use primitive_types::U256;
use rust_decimal::Decimal;

/// Decimals of a ray value.
pub const RAY_DECIMALS: u32 = 27;

/// Decimals of a wad value (typical ERC20 token amount).
pub const WAD_DECIMALS: u32 = 18;

/// Largest scale `rust_decimal` can round to.
const MAX_DECIMAL_SCALE: u32 = 28;

/// Convert a decimal string into an integer scaled by `10^decimals`.
///
/// Digits beyond `decimals` are rounded (banker's rounding, as
/// `Decimal::round_dp`).
///
/// # Returns
///
/// * `Some(U256)` - The scaled value
/// * `None` - If parsing fails or the value is negative
pub fn to_units(s: &str, decimals: u32) -> Option<U256> {
    let decimal = Decimal::from_str(s.trim()).ok()?;
    decimal_to_units(decimal, decimals)
}

/// Convert a `Decimal` into an integer scaled by `10^decimals`.
pub fn decimal_to_units(d: Decimal, decimals: u32) -> Option<U256> {
    if d.is_sign_negative() && !d.is_zero() {
        return None;
    }
    let rounded = if decimals < MAX_DECIMAL_SCALE {
        d.round_dp(decimals)
    } else {
        d
    };
    let mantissa = u128::try_from(rounded.mantissa()).ok()?;
    let scale = rounded.scale();
    if scale > decimals {
        return None;
    }
    U256::from(mantissa).checked_mul(U256::exp10((decimals - scale) as usize))
}

/// Convert a decimal string into a ray value.
pub fn to_ray(s: &str) -> Option<U256> {
    to_units(s, RAY_DECIMALS)
}

/// Format an integer scaled by `10^decimals` with every decimal place.
pub fn from_units(value: U256, decimals: u32) -> String {
    if decimals == 0 {
        return value.to_string();
    }
    let unit = U256::exp10(decimals as usize);
    let integer = value / unit;
    let fraction = (value % unit).to_string();
    format!("{}.{:0>width$}", integer, fraction, width = decimals as usize)
}

/// Format an integer scaled by `10^decimals`, trimming trailing zeros.
pub fn from_units_trimmed(value: U256, decimals: u32) -> String {
    let full = from_units(value, decimals);
    if !full.contains('.') {
        return full;
    }
    full.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Format a ray value, trimming trailing zeros.
pub fn from_ray(value: U256) -> String {
    from_units_trimmed(value, RAY_DECIMALS)
}
