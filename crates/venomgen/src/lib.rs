#![doc = include_str!("../../../README.md")]

mod ast;
mod codegen;
mod errors;
mod keccak;
mod settings;
mod types;
mod venom;

pub use crate::{
    ast::{
        BinOpKind, BoolOpKind, CallTarget, CmpOpKind, EnvAttr, EventArg, EventDef, ExprKind,
        ExprNode, ExternalMethod, ForIter, FunctionArg, FunctionDef, Keyword, Module, RaiseReason,
        StateMutability, StmtKind, StmtNode, UnaryOpKind, VarInfo, VarLocation, Visibility,
    },
    codegen::{
        generate_venom, Buffer, CodegenContext, Constancy, Ptr, VyperValue, MAIN_ENTRY_LABEL,
    },
    errors::{CodegenError, CodegenResult, Span},
    keccak::{keccak256, method_id},
    settings::{EvmVersion, Settings},
    types::{
        abi::AbiType, bytes_t, ceil32, int_bounds, string_t, DataLocation, IntegerT, StructField,
        VyperType, BYTES32, DECIMAL_BITS, DECIMAL_DIVISOR, DECIMAL_DIVISOR_SQRT, INT256, UINT256,
    },
    venom::{
        BlockId, DataItem, IRBasicBlock, IRContext, IRFunction, IRInstruction, IRLabel, IRLiteral,
        IROperand, IRVariable, Opcode, VenomBuilder,
    },
};
