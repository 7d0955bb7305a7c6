//! Compile-time model of the Ethereum ABI wire format.
//!
//! The codec in `codegen::abi` consults this model for three questions:
//! is a type dynamic (does it use head-tail layout), what is the smallest
//! buffer that can hold a valid encoding, and what is the largest. All
//! answers are compile-time constants because every Vyper type is bounded.

use serde::{Deserialize, Serialize};

use crate::types::ceil32;

/// ABI schema of a Vyper type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbiType {
    Uint(u16),
    Int(u16),
    /// `fixed168x10`, the wire type of Vyper's `decimal`.
    Fixed,
    Bool,
    Address,
    BytesM(u8),
    Bytes { maxlen: usize },
    String { maxlen: usize },
    DynArray { elem: Box<AbiType>, maxlen: usize },
    StaticArray { elem: Box<AbiType>, n: usize },
    Tuple(Vec<AbiType>),
}

impl AbiType {
    /// Whether this type uses head-tail encoding.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        match self {
            Self::Bytes { .. } | Self::String { .. } | Self::DynArray { .. } => true,
            Self::StaticArray { elem, .. } => elem.is_dynamic(),
            Self::Tuple(members) => members.iter().any(Self::is_dynamic),
            _ => false,
        }
    }

    /// Size of this type's head section in bytes.
    ///
    /// A dynamic type contributes a single 32-byte offset slot to its
    /// parent's head; a static type is embedded whole.
    #[must_use]
    pub fn embedded_static_size(&self) -> usize {
        if self.is_dynamic() {
            32
        } else {
            self.static_size()
        }
    }

    /// Full size of a static type's encoding. For dynamic types this is
    /// the head size only; use [`Self::min_size`] for the smallest valid
    /// encoding.
    #[must_use]
    pub fn static_size(&self) -> usize {
        match self {
            Self::Uint(_)
            | Self::Int(_)
            | Self::Fixed
            | Self::Bool
            | Self::Address
            | Self::BytesM(_) => 32,
            Self::Bytes { .. } | Self::String { .. } | Self::DynArray { .. } => 32,
            Self::StaticArray { elem, n } => n * elem.embedded_static_size(),
            Self::Tuple(members) => members.iter().map(Self::embedded_static_size).sum(),
        }
    }

    /// Smallest number of bytes a valid encoding of this type can occupy.
    #[must_use]
    pub fn min_size(&self) -> usize {
        match self {
            t if !t.is_dynamic() => t.static_size(),
            // empty payload: just the length word
            Self::Bytes { .. } | Self::String { .. } | Self::DynArray { .. } => 32,
            Self::StaticArray { elem, n } => n * (32 + elem.min_size()),
            Self::Tuple(members) => {
                let heads: usize = members.iter().map(Self::embedded_static_size).sum();
                let tails: usize = members
                    .iter()
                    .filter(|m| m.is_dynamic())
                    .map(Self::min_size)
                    .sum();
                heads + tails
            }
            _ => unreachable!(),
        }
    }

    /// Largest number of bytes a valid encoding of this type can occupy.
    #[must_use]
    pub fn size_bound(&self) -> usize {
        match self {
            t if !t.is_dynamic() => t.static_size(),
            Self::Bytes { maxlen } | Self::String { maxlen } => 32 + ceil32(*maxlen),
            Self::DynArray { elem, maxlen } => 32 + maxlen * elem.embedded_size_bound(),
            Self::StaticArray { elem, n } => n * elem.embedded_size_bound(),
            Self::Tuple(members) => members.iter().map(Self::embedded_size_bound).sum(),
            _ => unreachable!(),
        }
    }

    /// Worst-case bytes this type contributes to a parent encoding: head
    /// slot plus tail for dynamic types, embedded size for static ones.
    #[must_use]
    pub fn embedded_size_bound(&self) -> usize {
        if self.is_dynamic() {
            32 + self.size_bound()
        } else {
            self.static_size()
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn static_sizes() {
        assert_eq!(AbiType::Uint(256).static_size(), 32);
        assert!(!AbiType::Uint(256).is_dynamic());

        let arr = AbiType::StaticArray {
            elem: Box::new(AbiType::Address),
            n: 4,
        };
        assert_eq!(arr.static_size(), 128);
        assert_eq!(arr.size_bound(), 128);
    }

    #[test]
    fn bytes_bounds() {
        let b = AbiType::Bytes { maxlen: 33 };
        assert!(b.is_dynamic());
        assert_eq!(b.min_size(), 32);
        assert_eq!(b.size_bound(), 32 + 64);
        assert_eq!(b.embedded_size_bound(), 32 + 32 + 64);
    }

    #[test]
    fn tuple_head_tail_bounds() {
        // (uint256, bytes8) is fully static
        let t = AbiType::Tuple(vec![AbiType::Uint(256), AbiType::BytesM(8)]);
        assert!(!t.is_dynamic());
        assert_eq!(t.static_size(), 64);
        assert_eq!(t.min_size(), 64);

        // (uint256, bytes[5]) mixes a static head with a dynamic tail
        let t = AbiType::Tuple(vec![AbiType::Uint(256), AbiType::Bytes { maxlen: 5 }]);
        assert!(t.is_dynamic());
        assert_eq!(t.min_size(), 32 + 32 + 32);
        assert_eq!(t.size_bound(), 32 + 32 + 32 + 32);
    }

    #[test]
    fn dyn_array_bounds() {
        let arr = AbiType::DynArray {
            elem: Box::new(AbiType::Uint(256)),
            maxlen: 3,
        };
        assert_eq!(arr.min_size(), 32);
        assert_eq!(arr.size_bound(), 32 + 96);
    }
}
