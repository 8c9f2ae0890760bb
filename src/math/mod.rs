//! Fixed-point arithmetic.
//!
//! - [`ray`]: 27-decimal fixed-point multiply/divide with explicit rounding
//! - [`percentage`]: basis-point helpers (reserve factor, index cursor)
//! - [`decimal`]: decimal string conversion through `rust_decimal`
//!
//! Every balance conversion in the crate goes through [`ray`]; raw `*` and
//! `/` on balances are not used outside this module.

pub mod decimal;
pub mod percentage;
pub mod ray;

pub use percentage::{percent_mul, weighted_avg, MAX_BASIS_POINTS};
pub use ray::{ray_div, ray_div_up, ray_mul, ray_mul_up, HALF_RAY, RAY};
