//! The Vyper type system as seen by codegen.
//!
//! Codegen never infers or checks types; the analyzer has already
//! annotated every expression node. What codegen needs from a type is its
//! shape: does it fit in one stack word, how many bytes does it occupy in
//! memory, how many storage slots, what are its integer bounds, and what
//! is its ABI schema.

pub mod abi;

use num_bigint::BigInt;
use num_traits::One;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::types::abi::AbiType;

/// Fixed-point scale factor for the `decimal` type. Part of the wire-level
/// contract with deployed code; must never change.
pub const DECIMAL_DIVISOR: u64 = 10_000_000_000;

/// Square root of [`DECIMAL_DIVISOR`], used to split scaling during
/// decimal multiplication to reduce intermediate overflow.
pub const DECIMAL_DIVISOR_SQRT: u64 = 100_000;

/// Bit width of the scaled integer backing the `decimal` type.
pub const DECIMAL_BITS: u16 = 168;

/// Rounds up to the next multiple of 32.
#[must_use]
pub fn ceil32(n: usize) -> usize {
    n.div_ceil(32) * 32
}

/// Where a non-stack value lives.
///
/// Every pointer is tagged with one of these; the tag selects the
/// load/store opcode family and the copy strategy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub enum DataLocation {
    Memory,
    Storage,
    Transient,
    Calldata,
    Code,
}

/// A signed or unsigned integer type of a given width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntegerT {
    pub bits: u16,
    pub signed: bool,
}

impl IntegerT {
    #[must_use]
    pub fn new(bits: u16, signed: bool) -> Self {
        debug_assert!(bits % 8 == 0 && (8..=256).contains(&bits));
        Self { bits, signed }
    }

    /// Inclusive `(low, high)` bounds of representable values.
    #[must_use]
    pub fn int_bounds(&self) -> (BigInt, BigInt) {
        int_bounds(self.bits, self.signed)
    }
}

/// Inclusive bounds for an integer of the given width and signedness.
#[must_use]
pub fn int_bounds(bits: u16, signed: bool) -> (BigInt, BigInt) {
    let one: BigInt = One::one();
    if signed {
        let hi = (&one << (bits - 1)) - &one;
        let lo = -(&one << (bits - 1));
        (lo, hi)
    } else {
        (BigInt::ZERO, (&one << bits) - &one)
    }
}

pub const UINT256: VyperType = VyperType::Integer(IntegerT {
    bits: 256,
    signed: false,
});
pub const INT256: VyperType = VyperType::Integer(IntegerT {
    bits: 256,
    signed: true,
});
pub const BYTES32: VyperType = VyperType::BytesM(32);

/// One field of a struct, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructField {
    pub name: String,
    pub ty: VyperType,
}

/// A Vyper type. Sum of everything codegen can encounter on an annotated
/// expression node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VyperType {
    Integer(IntegerT),
    /// Fixed-point decimal, stored as an `int168` scaled by 10^10.
    Decimal,
    Bool,
    Address,
    /// `bytes1..bytes32`, left-aligned in a 32-byte word.
    BytesM(u8),
    /// Bounded dynamic byte string: `[length word][ceil32(maxlen) data]`.
    Bytes { maxlen: usize },
    /// Bounded UTF-8 string with the same layout as `Bytes`.
    String { maxlen: usize },
    /// Dynamic array: `[length word][maxlen * elem slots]`.
    DArray { elem: Box<VyperType>, maxlen: usize },
    /// Static array of `n` elements, no length prefix.
    SArray { elem: Box<VyperType>, n: usize },
    Tuple { members: Vec<VyperType> },
    Struct { name: String, fields: Vec<StructField> },
    /// Storage-only; an element lives at `keccak256(key . slot)`.
    HashMap { key: Box<VyperType>, value: Box<VyperType> },
    /// Bitset of named members, a single word.
    Flag { name: String, members: Vec<String> },
    /// An address with method metadata attached by the analyzer.
    Interface { name: String },
}

impl VyperType {
    /// Whether values of this type fit in a single stack word.
    #[must_use]
    pub fn is_prim_word(&self) -> bool {
        matches!(
            self,
            Self::Integer(_)
                | Self::Decimal
                | Self::Bool
                | Self::Address
                | Self::BytesM(_)
                | Self::Flag { .. }
                | Self::Interface { .. }
        )
    }

    /// Bytes this type occupies in the linear memory layout.
    ///
    /// Primitives take a full word. Bytestrings reserve their maximum
    /// footprint so buffers never need to grow.
    #[must_use]
    pub fn memory_bytes_required(&self) -> usize {
        match self {
            t if t.is_prim_word() => 32,
            Self::Bytes { maxlen } | Self::String { maxlen } => 32 + ceil32(*maxlen),
            Self::DArray { elem, maxlen } => 32 + maxlen * elem.memory_bytes_required(),
            Self::SArray { elem, n } => n * elem.memory_bytes_required(),
            Self::Tuple { members } => members.iter().map(Self::memory_bytes_required).sum(),
            Self::Struct { fields, .. } => {
                fields.iter().map(|f| f.ty.memory_bytes_required()).sum()
            }
            // a mapping itself occupies no memory; it cannot be
            // materialized, only subscripted
            Self::HashMap { .. } => 0,
            _ => 32,
        }
    }

    /// Number of 32-byte storage slots this type occupies.
    #[must_use]
    pub fn storage_size_in_words(&self) -> usize {
        match self {
            // a mapping reserves its declared slot only
            Self::HashMap { .. } => 1,
            t => t.memory_bytes_required().div_ceil(32),
        }
    }

    /// Inclusive value bounds for integer-backed types.
    ///
    /// For `Decimal` the bounds are in the scaled (int168) domain.
    #[must_use]
    pub fn int_bounds(&self) -> Option<(BigInt, BigInt)> {
        match self {
            Self::Integer(t) => Some(t.int_bounds()),
            Self::Decimal => Some(int_bounds(DECIMAL_BITS, true)),
            _ => None,
        }
    }

    /// Whether arithmetic on this type uses signed opcodes.
    #[must_use]
    pub fn is_signed(&self) -> bool {
        match self {
            Self::Integer(t) => t.signed,
            Self::Decimal => true,
            _ => false,
        }
    }

    /// Bit width for integer-backed types, 256 otherwise.
    #[must_use]
    pub fn bits(&self) -> u16 {
        match self {
            Self::Integer(t) => t.bits,
            Self::Decimal => DECIMAL_BITS,
            _ => 256,
        }
    }

    /// The ABI schema used by the codec and by signature construction.
    #[must_use]
    pub fn abi_type(&self) -> AbiType {
        match self {
            Self::Integer(t) => {
                if t.signed {
                    AbiType::Int(t.bits)
                } else {
                    AbiType::Uint(t.bits)
                }
            }
            Self::Decimal => AbiType::Fixed,
            Self::Bool => AbiType::Bool,
            Self::Address | Self::Interface { .. } => AbiType::Address,
            Self::BytesM(m) => AbiType::BytesM(*m),
            Self::Bytes { maxlen } => AbiType::Bytes { maxlen: *maxlen },
            Self::String { maxlen } => AbiType::String { maxlen: *maxlen },
            Self::DArray { elem, maxlen } => AbiType::DynArray {
                elem: Box::new(elem.abi_type()),
                maxlen: *maxlen,
            },
            Self::SArray { elem, n } => AbiType::StaticArray {
                elem: Box::new(elem.abi_type()),
                n: *n,
            },
            Self::Tuple { members } => {
                AbiType::Tuple(members.iter().map(Self::abi_type).collect())
            }
            Self::Struct { fields, .. } => {
                AbiType::Tuple(fields.iter().map(|f| f.ty.abi_type()).collect())
            }
            Self::Flag { .. } => AbiType::Uint(256),
            Self::HashMap { .. } => AbiType::Tuple(vec![]),
        }
    }

    /// Canonical ABI type name, as used in function and event signatures.
    #[must_use]
    pub fn abi_name(&self) -> String {
        match self {
            Self::Integer(t) => {
                let prefix = if t.signed { "int" } else { "uint" };
                format!("{prefix}{}", t.bits)
            }
            Self::Decimal => "fixed168x10".to_owned(),
            Self::Bool => "bool".to_owned(),
            Self::Address | Self::Interface { .. } => "address".to_owned(),
            Self::BytesM(m) => format!("bytes{m}"),
            Self::Bytes { .. } => "bytes".to_owned(),
            Self::String { .. } => "string".to_owned(),
            Self::DArray { elem, .. } => format!("{}[]", elem.abi_name()),
            Self::SArray { elem, n } => format!("{}[{n}]", elem.abi_name()),
            Self::Tuple { members } => {
                let inner: Vec<String> = members.iter().map(Self::abi_name).collect();
                format!("({})", inner.join(","))
            }
            Self::Struct { fields, .. } => {
                let inner: Vec<String> = fields.iter().map(|f| f.ty.abi_name()).collect();
                format!("({})", inner.join(","))
            }
            Self::Flag { .. } => "uint256".to_owned(),
            Self::HashMap { .. } => "()".to_owned(),
        }
    }

    /// Byte offset of field `name` within a struct's memory layout.
    pub fn struct_field_offset(&self, name: &str) -> Option<(usize, &VyperType)> {
        let Self::Struct { fields, .. } = self else {
            return None;
        };
        let mut offset = 0;
        for field in fields {
            if field.name == name {
                return Some((offset, &field.ty));
            }
            offset += field.ty.memory_bytes_required();
        }
        None
    }

    /// Slot offset of field `name` within a struct's storage layout.
    pub fn struct_field_slot(&self, name: &str) -> Option<(usize, &VyperType)> {
        let Self::Struct { fields, .. } = self else {
            return None;
        };
        let mut slot = 0;
        for field in fields {
            if field.name == name {
                return Some((slot, &field.ty));
            }
            slot += field.ty.storage_size_in_words();
        }
        None
    }

    /// Index of a flag member, counted from the least significant bit.
    pub fn flag_member_index(&self, member: &str) -> Option<usize> {
        let Self::Flag { members, .. } = self else {
            return None;
        };
        members.iter().position(|m| m == member)
    }
}

/// Builds the bounded bytes type, matching source-level `Bytes[N]`.
#[must_use]
pub fn bytes_t(maxlen: usize) -> VyperType {
    VyperType::Bytes { maxlen }
}

/// Builds the bounded string type, matching source-level `String[N]`.
#[must_use]
pub fn string_t(maxlen: usize) -> VyperType {
    VyperType::String { maxlen }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn integer_bounds() {
        let (lo, hi) = int_bounds(8, false);
        assert_eq!(lo, BigInt::from(0));
        assert_eq!(hi, BigInt::from(255));

        let (lo, hi) = int_bounds(8, true);
        assert_eq!(lo, BigInt::from(-128));
        assert_eq!(hi, BigInt::from(127));
    }

    #[test]
    fn memory_footprints() {
        assert_eq!(UINT256.memory_bytes_required(), 32);
        assert_eq!(bytes_t(5).memory_bytes_required(), 64);
        assert_eq!(bytes_t(33).memory_bytes_required(), 96);

        let arr = VyperType::DArray {
            elem: Box::new(UINT256),
            maxlen: 5,
        };
        assert_eq!(arr.memory_bytes_required(), 32 + 5 * 32);
        assert_eq!(arr.storage_size_in_words(), 6);
    }

    #[test]
    fn struct_field_offsets() {
        let s = VyperType::Struct {
            name: "Pair".to_owned(),
            fields: vec![
                StructField {
                    name: "a".to_owned(),
                    ty: UINT256,
                },
                StructField {
                    name: "b".to_owned(),
                    ty: bytes_t(10),
                },
                StructField {
                    name: "c".to_owned(),
                    ty: VyperType::Bool,
                },
            ],
        };
        assert_eq!(s.struct_field_offset("a").unwrap().0, 0);
        assert_eq!(s.struct_field_offset("b").unwrap().0, 32);
        assert_eq!(s.struct_field_offset("c").unwrap().0, 32 + 64);
        assert!(s.struct_field_offset("d").is_none());
    }

    #[test]
    fn abi_names() {
        assert_eq!(UINT256.abi_name(), "uint256");
        assert_eq!(VyperType::BytesM(4).abi_name(), "bytes4");
        let arr = VyperType::SArray {
            elem: Box::new(VyperType::Address),
            n: 3,
        };
        assert_eq!(arr.abi_name(), "address[3]");
    }
}
