//! Location-aware values.
//!
//! Lowering an expression yields a [`VyperValue`]: either a scalar already
//! on the (virtual) stack, or a pointer to a typed region in one of the
//! data locations. Carrying the location with the operand removes the
//! pointer/value confusion that otherwise plagues codegen; use
//! `CodegenContext::unwrap` to load the value.

use serde::{Deserialize, Serialize};

use crate::{
    errors::{CodegenError, CodegenResult},
    types::{DataLocation, VyperType},
    venom::{IROperand, IRVariable},
};

/// An allocated memory region (the result of one `alloca`).
///
/// Buffers are immutable records; pointers into them may be offset but
/// never outlive them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Buffer {
    ptr: IRVariable,
    pub size: usize,
    pub annotation: Option<String>,
}

impl Buffer {
    #[must_use]
    pub fn new(ptr: IRVariable, size: usize, annotation: Option<String>) -> Self {
        Self { ptr, size, annotation }
    }

    /// The alloca result this buffer was created from.
    #[must_use]
    pub fn base_var(&self) -> IRVariable {
        self.ptr
    }

    /// A pointer to the start of this buffer.
    #[must_use]
    pub fn base_ptr(&self) -> Ptr {
        Ptr {
            operand: IROperand::Variable(self.ptr),
            location: DataLocation::Memory,
            buf: Some(self.clone()),
        }
    }
}

/// A pointer to a location.
///
/// Invariant: `buf` is set iff `location` is `Memory`. Every memory
/// pointer tracks the buffer it was derived from; pointers into the other
/// locations never carry one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ptr {
    pub operand: IROperand,
    pub location: DataLocation,
    pub buf: Option<Buffer>,
}

impl Ptr {
    /// Builds a pointer, enforcing the buffer-provenance invariant.
    ///
    /// # Panics
    ///
    /// Panics when `buf` presence disagrees with the location; that is a
    /// compiler bug at the construction site.
    #[must_use]
    pub fn new(operand: IROperand, location: DataLocation, buf: Option<Buffer>) -> Self {
        assert!(
            buf.is_some() == (location == DataLocation::Memory),
            "Ptr: buf must be set iff location is memory (got {location})"
        );
        Self { operand, location, buf }
    }

    /// A non-memory pointer (storage slot, transient slot, calldata or
    /// code offset).
    #[must_use]
    pub fn non_memory(operand: IROperand, location: DataLocation) -> Self {
        Self::new(operand, location, None)
    }
}

/// A value in Vyper-land: on the stack, or at a location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VyperValue {
    /// A scalar operand holding a primitive word.
    Stack { operand: IROperand, ty: VyperType },
    /// A pointer to a typed region.
    Located { ptr: Ptr, ty: VyperType },
}

impl VyperValue {
    #[must_use]
    pub fn from_stack_op(operand: impl Into<IROperand>, ty: VyperType) -> Self {
        Self::Stack {
            operand: operand.into(),
            ty,
        }
    }

    #[must_use]
    pub fn from_ptr(ptr: Ptr, ty: VyperType) -> Self {
        Self::Located { ptr, ty }
    }

    #[must_use]
    pub fn ty(&self) -> &VyperType {
        match self {
            Self::Stack { ty, .. } | Self::Located { ty, .. } => ty,
        }
    }

    #[must_use]
    pub fn is_stack_value(&self) -> bool {
        matches!(self, Self::Stack { .. })
    }

    /// The raw operand: the value itself for stack values, the address
    /// for located ones.
    #[must_use]
    pub fn operand(&self) -> IROperand {
        match self {
            Self::Stack { operand, .. } => operand.clone(),
            Self::Located { ptr, .. } => ptr.operand.clone(),
        }
    }

    /// The pointer of a located value.
    pub fn ptr(&self) -> CodegenResult<&Ptr> {
        match self {
            Self::Located { ptr, .. } => Ok(ptr),
            Self::Stack { .. } => Err(CodegenError::panic("cannot get ptr from stack value")),
        }
    }

    /// The operand of a stack value.
    pub fn stack_value(&self) -> CodegenResult<IROperand> {
        match self {
            Self::Stack { operand, .. } => Ok(operand.clone()),
            Self::Located { .. } => Err(CodegenError::panic(
                "cannot get stack value from located value",
            )),
        }
    }

    /// The data location, if this value lives in one.
    #[must_use]
    pub fn location(&self) -> Option<DataLocation> {
        match self {
            Self::Located { ptr, .. } => Some(ptr.location),
            Self::Stack { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UINT256;

    #[test]
    fn buffer_provenance_invariant() {
        let buf = Buffer::new(IRVariable(0), 64, None);
        let ptr = buf.base_ptr();
        assert_eq!(ptr.location, DataLocation::Memory);
        assert!(ptr.buf.is_some());

        let slot = Ptr::non_memory(IROperand::literal(3), DataLocation::Storage);
        assert!(slot.buf.is_none());
    }

    #[test]
    #[should_panic(expected = "buf must be set iff location is memory")]
    fn memory_ptr_without_buffer_panics() {
        let _ = Ptr::new(IROperand::literal(0), DataLocation::Memory, None);
    }

    #[test]
    fn stack_value_accessors() {
        let vv = VyperValue::from_stack_op(7u64, UINT256);
        assert!(vv.is_stack_value());
        assert!(vv.ptr().is_err());
        assert_eq!(vv.stack_value().unwrap(), IROperand::literal(7));
        assert_eq!(vv.location(), None);
    }
}
