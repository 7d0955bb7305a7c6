//! Venom opcodes.
//!
//! Most opcodes map one-to-one onto EVM instructions; the rest are
//! abstractions resolved by later passes (`alloca` and friends, `assign`,
//! `invoke`/`param`/`ret`, `offset`, the assertion forms).

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Every opcode the code generator can emit.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
pub enum Opcode {
    // arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Sdiv,
    Mod,
    Smod,
    Exp,
    Addmod,
    Mulmod,
    Signextend,
    // bitwise
    And,
    Or,
    Xor,
    Not,
    Shl,
    Shr,
    Sar,
    // comparison
    Eq,
    Lt,
    Gt,
    Slt,
    Sgt,
    Iszero,
    // memory
    Mload,
    Mstore,
    Mcopy,
    Msize,
    Alloca,
    Palloca,
    Calloca,
    Gep,
    // storage
    Sload,
    Sstore,
    Tload,
    Tstore,
    // immutables / data section
    Dload,
    Dloadbytes,
    Iload,
    Istore,
    Offset,
    // control flow
    Jmp,
    Jnz,
    Djmp,
    Ret,
    Return,
    Stop,
    Revert,
    Invalid,
    Selfdestruct,
    // assertions
    Assert,
    AssertUnreachable,
    // calls
    Invoke,
    Param,
    Call,
    Staticcall,
    Delegatecall,
    Create,
    Create2,
    // crypto
    Sha3,
    #[strum(serialize = "sha3_64")]
    Sha364,
    // data copy
    Calldatacopy,
    Codecopy,
    Extcodecopy,
    Returndatacopy,
    // environment
    Caller,
    Callvalue,
    Calldatasize,
    Calldataload,
    Address,
    Balance,
    Selfbalance,
    Origin,
    Gas,
    Gasprice,
    Codesize,
    Extcodesize,
    Extcodehash,
    Returndatasize,
    // block info
    Blockhash,
    Blobhash,
    Coinbase,
    Timestamp,
    Number,
    Prevrandao,
    Difficulty,
    Gaslimit,
    Chainid,
    Basefee,
    Blobbasefee,
    // logging
    Log,
    // pseudo
    Assign,
    Nop,
}

impl Opcode {
    /// Whether this opcode ends a basic block.
    #[must_use]
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Self::Jmp
                | Self::Jnz
                | Self::Djmp
                | Self::Ret
                | Self::Return
                | Self::Stop
                | Self::Revert
                | Self::Invalid
                | Self::Selfdestruct
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_match_venom_text_format() {
        assert_eq!(Opcode::Iszero.to_string(), "iszero");
        assert_eq!(Opcode::Sha364.to_string(), "sha3_64");
        assert_eq!(Opcode::AssertUnreachable.to_string(), "assert_unreachable");
        assert_eq!(Opcode::Return.to_string(), "return");
        assert_eq!("jnz".parse::<Opcode>().unwrap(), Opcode::Jnz);
    }

    #[test]
    fn terminators() {
        for op in [
            Opcode::Jmp,
            Opcode::Jnz,
            Opcode::Djmp,
            Opcode::Ret,
            Opcode::Return,
            Opcode::Stop,
            Opcode::Revert,
            Opcode::Invalid,
            Opcode::Selfdestruct,
        ] {
            assert!(op.is_terminator(), "{op} must terminate");
        }
        assert!(!Opcode::Add.is_terminator());
        assert!(!Opcode::Assert.is_terminator());
    }
}
