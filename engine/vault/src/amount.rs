//! Conversions between raw on-chain integers and human-readable amounts.
//!
//! Raw amounts are `U256` values in the token's smallest unit. Human amounts
//! are [`Decimal`] values scaled by the token's `decimals`. A human amount with
//! more fractional digits than the token supports is rejected rather than
//! rounded. Raw values convert exactly unless they exceed what a [`Decimal`]
//! can hold, in which case trailing fractional digits are dropped.

use std::str::FromStr;

use alloy::primitives::U256;
use rust_decimal::Decimal;

use crate::error::{Result, VaultError};

/// Precision of the native currency (and of every direct-balance vault).
pub const NATIVE_DECIMALS: u8 = 18;

/// Largest scale a [`Decimal`] can carry.
const MAX_SCALE: u32 = 28;

/// Largest mantissa a [`Decimal`] can carry (`2^96 - 1`).
const MAX_MANTISSA: u128 = (1 << 96) - 1;

fn pow10(exp: u32) -> Result<U256> {
    U256::from(10u8)
        .checked_pow(U256::from(exp))
        .ok_or(VaultError::AmountOverflow)
}

/// Parses user input into a strictly positive decimal.
///
/// # Errors
/// - [`VaultError::EmptyAmount`] if the input is blank
/// - [`VaultError::InvalidAmount`] if it is not a number or not positive
pub fn parse_amount(text: &str) -> Result<Decimal> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(VaultError::EmptyAmount);
    }

    let value = Decimal::from_str(trimmed)
        .map_err(|_| VaultError::InvalidAmount(trimmed.to_string()))?;
    if value <= Decimal::ZERO {
        return Err(VaultError::InvalidAmount(trimmed.to_string()));
    }

    Ok(value)
}

/// Converts a human amount into raw token units.
///
/// # Errors
/// - [`VaultError::InvalidAmount`] if the amount is negative or has more
///   fractional digits than `decimals`
/// - [`VaultError::AmountOverflow`] if the result exceeds `U256`
pub fn to_raw(amount: Decimal, decimals: u8) -> Result<U256> {
    let normalized = amount.normalize();
    if normalized.is_sign_negative() && !normalized.is_zero() {
        return Err(VaultError::InvalidAmount(amount.to_string()));
    }

    let scale = normalized.scale();
    let decimals = u32::from(decimals);
    if scale > decimals {
        return Err(VaultError::InvalidAmount(format!(
            "{amount} has more than {decimals} decimal places"
        )));
    }

    let mantissa = u128::try_from(normalized.mantissa().abs())
        .map_err(|_| VaultError::AmountOverflow)?;
    U256::from(mantissa)
        .checked_mul(pow10(decimals - scale)?)
        .ok_or(VaultError::AmountOverflow)
}

/// Converts raw token units into a normalized human amount.
///
/// Fractional digits a [`Decimal`] cannot hold are dropped (truncation toward
/// zero), for tokens with more than 28 decimals and for values too large for
/// the 96-bit mantissa at full scale.
///
/// # Errors
/// - [`VaultError::AmountOverflow`] if the integer part alone exceeds the
///   decimal range
pub fn from_raw(raw: U256, decimals: u8) -> Result<Decimal> {
    let mut raw = raw;
    let mut scale = u32::from(decimals);
    if scale > MAX_SCALE {
        raw /= pow10(scale - MAX_SCALE)?;
        scale = MAX_SCALE;
    }

    let max_mantissa = U256::from(MAX_MANTISSA);
    let ten = U256::from(10u8);
    while raw > max_mantissa && scale > 0 {
        raw /= ten;
        scale -= 1;
    }

    let value = u128::try_from(raw).map_err(|_| VaultError::AmountOverflow)?;
    let value = i128::try_from(value).map_err(|_| VaultError::AmountOverflow)?;
    Decimal::try_from_i128_with_scale(value, scale)
        .map(|d| d.normalize())
        .map_err(|_| VaultError::AmountOverflow)
}

/// Parses user input straight into raw token units.
pub fn parse_units(text: &str, decimals: u8) -> Result<U256> {
    to_raw(parse_amount(text)?, decimals)
}
