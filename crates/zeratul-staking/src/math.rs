//! Fixed-point helpers
//!
//! Reward products like `stake × rate × seconds` overflow `u128` long before
//! the quotient does, so `mul_div` falls back to big integers when the
//! direct product does not fit.

use crate::error::{Result, StakingError};
use num_bigint::BigUint;

/// `a * b / denom`, rounded down
pub fn mul_div(a: u128, b: u128, denom: u128, what: &'static str) -> Result<u128> {
    if denom == 0 {
        return Err(StakingError::ArithmeticOverflow(what));
    }
    if let Some(product) = a.checked_mul(b) {
        return Ok(product / denom);
    }

    let wide = BigUint::from(a) * BigUint::from(b) / BigUint::from(denom);
    u128::try_from(wide).map_err(|_| StakingError::ArithmeticOverflow(what))
}

pub fn checked_add(a: u128, b: u128, what: &'static str) -> Result<u128> {
    a.checked_add(b).ok_or(StakingError::ArithmeticOverflow(what))
}

/// Subtraction that treats underflow as broken accounting
pub fn checked_sub(a: u128, b: u128, what: &'static str) -> Result<u128> {
    a.checked_sub(b)
        .ok_or_else(|| StakingError::AccountingInconsistency(format!("{what} underflow: {a} - {b}")))
}
