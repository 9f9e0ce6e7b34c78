//! Raw fixed-point token amounts to decimal values.

use bigdecimal::BigDecimal;
use num_bigint::{BigInt, Sign};
use primitive_types::U256;

/// Converts a U256 to an unsigned BigInt.
pub fn u256_to_bigint(value: U256) -> BigInt {
    // U256 limbs are little-endian u64 words.
    let mut bytes = Vec::with_capacity(32);
    for limb in value.0 {
        bytes.extend_from_slice(&limb.to_le_bytes());
    }
    BigInt::from_bytes_le(Sign::Plus, &bytes)
}

/// `raw / 10^decimals`, exact.
///
/// The result carries scale `decimals`, so 500 with 2 decimals is 5.00.
pub fn to_decimal(raw: U256, decimals: u8) -> BigDecimal {
    BigDecimal::new(u256_to_bigint(raw), i64::from(decimals))
}
