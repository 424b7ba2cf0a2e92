//! Difficulty and compact target utilities.

use primitive_types::U256;
use utxod_consensus::Hash256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactError {
    Negative,
    Overflow,
}

impl std::fmt::Display for CompactError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompactError::Negative => write!(f, "compact target has negative sign bit"),
            CompactError::Overflow => write!(f, "compact target overflows 256-bit range"),
        }
    }
}

impl std::error::Error for CompactError {}

/// Decodes the `nBits` compact form: a one-byte base-256 exponent followed
/// by a 23-bit mantissa and a sign bit.
pub fn compact_to_u256(bits: u32) -> Result<U256, CompactError> {
    if bits & 0x0080_0000 != 0 {
        return Err(CompactError::Negative);
    }
    let exponent = bits >> 24;
    let mantissa = bits & 0x007f_ffff;
    if exponent <= 3 {
        return Ok(U256::from(mantissa >> (8 * (3 - exponent))));
    }
    if mantissa == 0 {
        return Ok(U256::zero());
    }
    // Significant mantissa bytes must still fit in 32 bytes after shifting.
    let mantissa_bytes = (32 - mantissa.leading_zeros()).div_ceil(8);
    if exponent - 3 + mantissa_bytes > 32 {
        return Err(CompactError::Overflow);
    }
    Ok(U256::from(mantissa) << (8 * (exponent - 3)))
}

/// Expected number of hashes needed to meet the target encoded by `bits`.
pub fn block_proof(bits: u32) -> Result<U256, CompactError> {
    let target = compact_to_u256(bits)?;
    if target.is_zero() {
        return Ok(U256::zero());
    }
    let one = U256::from(1u64);
    Ok((!target / (target + one)) + one)
}

/// Chain work of a block given its parent's accumulated work.
pub fn next_chain_work(parent_work: U256, bits: u32) -> Result<U256, CompactError> {
    let proof = block_proof(bits)?;
    parent_work
        .checked_add(proof)
        .ok_or(CompactError::Overflow)
}

pub fn u256_to_hash(value: U256) -> Hash256 {
    value.to_little_endian()
}

pub fn hash_to_u256(bytes: &Hash256) -> U256 {
    U256::from_little_endian(bytes)
}
