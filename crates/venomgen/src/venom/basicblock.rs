//! Operands, instructions, and basic blocks.

use std::fmt::{self, Display};

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{errors::Span, venom::op::Opcode};

/// An SSA variable, unique within its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IRVariable(pub u32);

impl Display for IRVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// A label naming a basic block, function, or data-section entry.
/// Globally unique within one [`super::IRContext`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IRLabel(pub String);

impl IRLabel {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl Display for IRLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// A 256-bit literal word.
///
/// The stored value is always normalized into `[0, 2^256)`; negative
/// inputs wrap two's-complement at construction so compile-time math can
/// stay in `BigInt` and wrap exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IRLiteral {
    value: BigUint,
}

impl IRLiteral {
    #[must_use]
    pub fn new(value: impl Into<BigInt>) -> Self {
        let value = value.into();
        let modulus = BigUint::from(1u8) << 256u16;
        let wrapped = match value.sign() {
            Sign::Minus => {
                let magnitude = value.magnitude() % &modulus;
                if magnitude.is_zero() {
                    magnitude
                } else {
                    modulus - magnitude
                }
            }
            _ => value.magnitude() % &modulus,
        };
        Self { value: wrapped }
    }

    /// The canonical unsigned word value.
    #[must_use]
    pub fn value(&self) -> &BigUint {
        &self.value
    }

    /// The word reinterpreted as a signed 256-bit integer.
    #[must_use]
    pub fn to_signed(&self) -> BigInt {
        let half = BigUint::from(1u8) << 255u16;
        if self.value < half {
            BigInt::from(self.value.clone())
        } else {
            let modulus = BigUint::from(1u8) << 256u16;
            -BigInt::from(modulus - &self.value)
        }
    }

    /// The value as `usize`, if it fits. Convenience for static sizes.
    #[must_use]
    pub fn as_usize(&self) -> Option<usize> {
        use num_traits::ToPrimitive;
        self.value.to_usize()
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }
}

impl Display for IRLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// An instruction operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IROperand {
    Variable(IRVariable),
    Literal(IRLiteral),
    Label(IRLabel),
}

impl IROperand {
    #[must_use]
    pub fn literal(value: impl Into<BigInt>) -> Self {
        Self::Literal(IRLiteral::new(value))
    }

    #[must_use]
    pub fn as_literal(&self) -> Option<&IRLiteral> {
        match self {
            Self::Literal(lit) => Some(lit),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_variable(&self) -> Option<IRVariable> {
        match self {
            Self::Variable(var) => Some(*var),
            _ => None,
        }
    }
}

impl Display for IROperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Variable(v) => v.fmt(f),
            Self::Literal(l) => l.fmt(f),
            Self::Label(l) => l.fmt(f),
        }
    }
}

impl From<IRVariable> for IROperand {
    fn from(v: IRVariable) -> Self {
        Self::Variable(v)
    }
}

impl From<IRLiteral> for IROperand {
    fn from(l: IRLiteral) -> Self {
        Self::Literal(l)
    }
}

impl From<IRLabel> for IROperand {
    fn from(l: IRLabel) -> Self {
        Self::Label(l)
    }
}

impl From<&IRLabel> for IROperand {
    fn from(l: &IRLabel) -> Self {
        Self::Label(l.clone())
    }
}

impl From<u64> for IROperand {
    fn from(v: u64) -> Self {
        Self::literal(v)
    }
}

impl From<usize> for IROperand {
    fn from(v: usize) -> Self {
        Self::literal(BigInt::from(v))
    }
}

impl From<i64> for IROperand {
    fn from(v: i64) -> Self {
        Self::literal(v)
    }
}

impl From<BigInt> for IROperand {
    fn from(v: BigInt) -> Self {
        Self::literal(v)
    }
}

impl From<&IROperand> for IROperand {
    fn from(v: &IROperand) -> Self {
        v.clone()
    }
}

/// A single Venom instruction.
///
/// Operand order follows EVM stack order (top of stack first); the
/// builder is responsible for reversing non-commutative operands at its
/// boundary so that callers pass mathematical order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IRInstruction {
    pub opcode: Opcode,
    pub operands: SmallVec<[IROperand; 4]>,
    pub output: Option<IRVariable>,
    pub source: Option<Span>,
}

impl IRInstruction {
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        self.opcode.is_terminator()
    }
}

impl Display for IRInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(out) = self.output {
            write!(f, "{out} = ")?;
        }
        write!(f, "{}", self.opcode)?;
        for (i, op) in self.operands.iter().enumerate() {
            if i == 0 {
                write!(f, " {op}")?;
            } else {
                write!(f, ", {op}")?;
            }
        }
        Ok(())
    }
}

/// Index of a basic block within its function's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId(pub usize);

/// A basic block: a label and an ordered run of instructions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IRBasicBlock {
    pub label: IRLabel,
    pub instructions: Vec<IRInstruction>,
}

impl IRBasicBlock {
    #[must_use]
    pub fn new(label: IRLabel) -> Self {
        Self {
            label,
            instructions: Vec::new(),
        }
    }

    /// Whether the block already ends in a terminator. No instruction may
    /// be appended once this is true.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.instructions
            .last()
            .is_some_and(IRInstruction::is_terminator)
    }

    /// Appends an instruction.
    ///
    /// # Panics
    ///
    /// Panics if the block is terminated; emitting past a terminator is a
    /// compiler bug.
    pub fn push(&mut self, inst: IRInstruction) {
        assert!(
            !self.is_terminated(),
            "instruction {} appended to terminated block {}",
            inst.opcode,
            self.label
        );
        self.instructions.push(inst);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use smallvec::smallvec;

    use super::*;

    #[test]
    fn literal_wraps_twos_complement() {
        let minus_one = IRLiteral::new(-1);
        let max_word = (BigUint::from(1u8) << 256u16) - 1u8;
        assert_eq!(minus_one.value(), &max_word);
        assert_eq!(minus_one.to_signed(), BigInt::from(-1));

        let zero = IRLiteral::new(0);
        assert!(zero.is_zero());
        assert_eq!(zero.to_signed(), BigInt::ZERO);
    }

    #[test]
    fn literal_signed_round_trip() {
        for v in [-170_141_183_460_469i64, -1, 0, 1, 255, i64::MAX] {
            assert_eq!(IRLiteral::new(v).to_signed(), BigInt::from(v));
        }
    }

    #[test]
    fn terminated_block_rejects_append() {
        let mut bb = IRBasicBlock::new(IRLabel::new("entry"));
        bb.push(IRInstruction {
            opcode: Opcode::Stop,
            operands: smallvec![],
            output: None,
            source: None,
        });
        assert!(bb.is_terminated());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            bb.push(IRInstruction {
                opcode: Opcode::Nop,
                operands: smallvec![],
                output: None,
                source: None,
            });
        }));
        assert!(result.is_err(), "push into terminated block must panic");
    }

    #[test]
    fn instruction_display() {
        let inst = IRInstruction {
            opcode: Opcode::Add,
            operands: smallvec![IROperand::literal(1), IROperand::Variable(IRVariable(3))],
            output: Some(IRVariable(4)),
            source: None,
        };
        assert_eq!(inst.to_string(), "%4 = add 1, %3");
    }
}
