//! The Venom intermediate representation.
//!
//! Venom is a typed SSA IR over the EVM: a [`IRContext`] owns functions
//! and a data section, a [`IRFunction`] owns basic blocks and the SSA
//! variable counter, and an [`IRBasicBlock`] is a straight-line run of
//! instructions ending in exactly one terminator.
//!
//! # Module Structure
//!
//! - `op` - Opcode enum definition
//! - `basicblock` - Operands, instructions, and basic blocks
//! - `function` - IR functions (block arena + variable allocator)
//! - `context` - Compilation-unit container (function table + data section)
//! - `builder` - Emission facade used by all of codegen

pub use basicblock::{BlockId, IRBasicBlock, IRInstruction, IRLabel, IRLiteral, IROperand, IRVariable};
pub use builder::VenomBuilder;
pub use context::{DataItem, IRContext};
pub use function::IRFunction;
pub use op::Opcode;

mod basicblock;
mod builder;
mod context;
mod function;
mod op;
