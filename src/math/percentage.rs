//! Basis-point arithmetic for reserve factors and P2P index cursors.
//!
//! `10_000` basis points is 100%. Both helpers round half up.

use primitive_types::{U256, U512};

use crate::error::{CoreError, Result};

/// 100% in basis points.
pub const MAX_BASIS_POINTS: u64 = 10_000;

const HALF_BASIS_POINTS: u64 = MAX_BASIS_POINTS / 2;

/// Reject basis-point parameters above 100%.
pub fn validate_basis_points(value: u64) -> Result<u64> {
    if value > MAX_BASIS_POINTS {
        return Err(CoreError::ExceedsMaxBasisPoints(value));
    }
    Ok(value)
}

/// `value * percentage / 10_000`, half up.
pub fn percent_mul(value: U256, percentage: u64) -> Result<U256> {
    validate_basis_points(percentage)?;
    let product = U512::from(value) * U512::from(percentage) + U512::from(HALF_BASIS_POINTS);
    U256::try_from(product / U512::from(MAX_BASIS_POINTS)).map_err(|_| CoreError::Overflow)
}

/// Weighted average of `x` and `y`, `percentage` being the weight of `y`.
///
/// `weighted_avg(x, y, 0) == x` and `weighted_avg(x, y, 10_000) == y`.
pub fn weighted_avg(x: U256, y: U256, percentage: u64) -> Result<U256> {
    validate_basis_points(percentage)?;
    let x_weight = U512::from(MAX_BASIS_POINTS - percentage);
    let y_weight = U512::from(percentage);
    let sum = U512::from(x) * x_weight + U512::from(y) * y_weight + U512::from(HALF_BASIS_POINTS);
    U256::try_from(sum / U512::from(MAX_BASIS_POINTS)).map_err(|_| CoreError::Overflow)
}
