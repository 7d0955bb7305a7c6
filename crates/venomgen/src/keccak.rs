//! Compile-time keccak-256.
//!
//! Used for function selectors, event topic hashes, and folding
//! `keccak256(...)` / `method_id(...)` of literal arguments.

use num_bigint::BigUint;
use sha3::{Digest, Keccak256};

/// Keccak-256 digest of `data`.
#[must_use]
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Digest interpreted as a big-endian 256-bit unsigned integer.
#[must_use]
pub fn keccak256_uint(data: &[u8]) -> BigUint {
    BigUint::from_bytes_be(&keccak256(data))
}

/// First four bytes of `keccak256(signature)` as an integer.
#[must_use]
pub fn method_id(signature: &str) -> u32 {
    let digest = keccak256(signature.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keccak_abc() {
        let digest = keccak256(b"abc");
        assert_eq!(
            digest[..4],
            [0x4e, 0x03, 0x65, 0x7a],
            "keccak256(\"abc\") must start with 4e03657a"
        );
    }

    #[test]
    fn transfer_selector() {
        // the canonical ERC-20 transfer selector
        assert_eq!(method_id("transfer(address,uint256)"), 0xa9059cbb);
    }
}
