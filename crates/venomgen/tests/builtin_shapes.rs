//! Lowering shapes of the built-in family: hashing, byte manipulation,
//! the ABI codec entry points, dynamic arrays, and contract creation.

mod common;

use common::*;
use venomgen::{
    CallTarget, ExprKind, ExprNode, Keyword, Opcode, StateMutability, StmtKind, VyperType,
};

fn bytes_ty(maxlen: usize) -> VyperType {
    VyperType::Bytes { maxlen }
}

fn string_ty(maxlen: usize) -> VyperType {
    VyperType::String { maxlen }
}

fn str_lit(s: &str) -> ExprNode {
    expr(
        string_ty(s.len()),
        ExprKind::Str {
            value: s.to_owned(),
        },
    )
}

fn compile_expr_fn(body_expr: ExprNode, ret_ty: VyperType) -> venomgen::IRContext {
    let f = external_fn(
        "f",
        StateMutability::Payable,
        vec![],
        Some(ret_ty),
        vec![ret(Some(body_expr))],
    );
    let (_, runtime) = compile(&module(vec![f]));
    assert_well_formed(&runtime);
    runtime
}

/// keccak256 of a literal folds to the known digest at compile time.
#[test]
fn keccak_of_literal_folds() {
    let call = builtin_call("keccak256", vec![str_lit("abc")], VyperType::BytesM(32));
    let runtime = compile_expr_fn(call, VyperType::BytesM(32));
    let entry = runtime_entry(&runtime);
    assert!(!opcodes(entry).contains(&Opcode::Sha3), "literal input must fold");

    // 0x4e03657a... is the well-known keccak256("abc")
    let expected_prefix = num_bigint::BigUint::parse_bytes(
        b"4e03657aea45a94fc7d47ba826c8d667c0d1e6e33a64a036ec44f58fa12d6c45",
        16,
    )
    .unwrap();
    let folded = entry
        .blocks_in_order()
        .flat_map(|bb| bb.instructions.iter())
        .any(|inst| {
            inst.operands
                .iter()
                .any(|op| op.as_literal().is_some_and(|lit| lit.value() == &expected_prefix))
        });
    assert!(folded, "digest literal must appear in the IR");
}

/// keccak256 of a runtime value hashes through sha3.
#[test]
fn keccak_of_argument_emits_sha3() {
    let call = builtin_call(
        "keccak256",
        vec![name("data", bytes_ty(64))],
        VyperType::BytesM(32),
    );
    let f = external_fn(
        "f",
        StateMutability::Payable,
        vec![("data", bytes_ty(64))],
        Some(VyperType::BytesM(32)),
        vec![ret(Some(call))],
    );
    let (_, runtime) = compile(&module(vec![f]));
    assert!(opcodes(runtime_entry(&runtime)).contains(&Opcode::Sha3));
}

/// sha256 staticcalls the precompile at address 2 with asserted success.
#[test]
fn sha256_uses_precompile() {
    let call = builtin_call("sha256", vec![str_lit("abc")], VyperType::BytesM(32));
    let runtime = compile_expr_fn(call, VyperType::BytesM(32));
    let entry = runtime_entry(&runtime);
    let precompile_call = entry
        .blocks_in_order()
        .flat_map(|bb| bb.instructions.iter())
        .find(|inst| inst.opcode == Opcode::Staticcall)
        .expect("staticcall emitted");
    assert!(
        precompile_call
            .operands
            .iter()
            .any(|op| op.as_literal().is_some_and(|lit| lit.as_usize() == Some(2))),
        "must target address 2"
    );
    assert!(opcodes(entry).contains(&Opcode::Assert));
}

/// slice() guards both buffer overrun and wraparound in start + length.
#[test]
fn slice_emits_overflow_and_bounds_checks() {
    let call = expr(
        bytes_ty(8),
        ExprKind::Call {
            target: CallTarget::Builtin {
                id: "slice".to_owned(),
            },
            args: vec![
                name("data", bytes_ty(64)),
                int_lit(1, uint256()),
                int_lit(8, uint256()),
            ],
            keywords: vec![],
        },
    );
    let f = external_fn(
        "f",
        StateMutability::Payable,
        vec![("data", bytes_ty(64))],
        Some(bytes_ty(8)),
        vec![ret(Some(call))],
    );
    let (_, runtime) = compile(&module(vec![f]));
    let ops = opcodes(runtime_entry(&runtime));
    // wraparound check (lt) plus bounds check (gt), or-ed and asserted
    assert!(ops.contains(&Opcode::Lt));
    assert!(ops.contains(&Opcode::Gt));
    assert!(ops.contains(&Opcode::Or));
    assert!(ops.contains(&Opcode::Assert));
}

/// concat writes each piece and finishes by storing the running length.
#[test]
fn concat_tracks_running_length() {
    let call = builtin_call(
        "concat",
        vec![str_lit("ab"), str_lit("cd")],
        string_ty(4),
    );
    let runtime = compile_expr_fn(call, string_ty(4));
    let ops = opcodes(runtime_entry(&runtime));
    assert!(ops.contains(&Opcode::Assign), "running length is a mutable counter");
    assert!(ops.contains(&Opcode::Mcopy));
}

/// abi_encode wraps the argument in a tuple and returns Bytes.
#[test]
fn abi_encode_writes_length_prefix() {
    let call = builtin_call("abi_encode", vec![int_lit(42, uint256())], bytes_ty(32));
    let runtime = compile_expr_fn(call, bytes_ty(32));
    let ops = opcodes(runtime_entry(&runtime));
    assert!(ops.contains(&Opcode::Mstore));
    assert!(ops.contains(&Opcode::Alloca));
}

/// abi_decode validates the buffer size against the ABI bounds before
/// copying out.
#[test]
fn abi_decode_validates_size() {
    let call = expr(
        uint256(),
        ExprKind::Call {
            target: CallTarget::Builtin {
                id: "abi_decode".to_owned(),
            },
            args: vec![name("data", bytes_ty(96))],
            keywords: vec![],
        },
    );
    let f = external_fn(
        "f",
        StateMutability::Payable,
        vec![("data", bytes_ty(96))],
        Some(uint256()),
        vec![ret(Some(call))],
    );
    let (_, runtime) = compile(&module(vec![f]));
    assert_well_formed(&runtime);
    let entry = runtime_entry(&runtime);
    // a fixed-size target asserts an exact 32-byte payload
    let exact = entry
        .blocks_in_order()
        .flat_map(|bb| bb.instructions.iter())
        .filter(|inst| inst.opcode == Opcode::Eq)
        .any(|inst| literal_operand(&inst.operands) == Some(32));
    assert!(exact, "uint256 decode asserts len == 32");
}

/// The minimal proxy builds its initcode from the EIP-1167 constants.
#[test]
fn minimal_proxy_uses_eip1167_bytes() {
    let call = expr(
        VyperType::Address,
        ExprKind::Call {
            target: CallTarget::Builtin {
                id: "create_minimal_proxy_to".to_owned(),
            },
            args: vec![name("target", VyperType::Address)],
            keywords: vec![],
        },
    );
    let f = external_fn(
        "f",
        StateMutability::Nonpayable,
        vec![("target", VyperType::Address)],
        Some(VyperType::Address),
        vec![ret(Some(call))],
    );
    let (_, runtime) = compile(&module(vec![f]));
    assert_well_formed(&runtime);
    let entry = runtime_entry(&runtime);
    let ops = opcodes(entry);
    assert!(ops.contains(&Opcode::Create));
    // the address aligns left by 96 bits between the two preamble words
    let shl96 = entry
        .blocks_in_order()
        .flat_map(|bb| bb.instructions.iter())
        .filter(|inst| inst.opcode == Opcode::Shl)
        .any(|inst| literal_operand(&inst.operands) == Some(96));
    assert!(shl96);

    // the preamble word is loader + forwarder prefix, left-aligned
    let preamble_word = num_bigint::BigUint::parse_bytes(
        b"602d3d8160093d39f3363d3d373d3d3d363d7300000000000000000000000000",
        16,
    )
    .unwrap();
    let preamble_stored = entry
        .blocks_in_order()
        .flat_map(|bb| bb.instructions.iter())
        .filter(|inst| inst.opcode == Opcode::Mstore)
        .any(|inst| {
            inst.operands
                .iter()
                .any(|op| op.as_literal().is_some_and(|lit| lit.value() == &preamble_word))
        });
    assert!(preamble_stored, "EIP-1167 preamble word must be stored verbatim");

    let create = entry
        .blocks_in_order()
        .flat_map(|bb| bb.instructions.iter())
        .find(|inst| inst.opcode == Opcode::Create)
        .unwrap();
    // initcode length is exactly 54 bytes
    assert!(
        create
            .operands
            .iter()
            .any(|op| op.as_literal().is_some_and(|lit| lit.as_usize() == Some(54))),
        "proxy initcode must be 54 bytes"
    );
}

/// create failures bubble the constructor's revert data.
#[test]
fn create_failure_bubbles_revert_data() {
    let call = expr(
        VyperType::Address,
        ExprKind::Call {
            target: CallTarget::Builtin {
                id: "create_minimal_proxy_to".to_owned(),
            },
            args: vec![name("target", VyperType::Address)],
            keywords: vec![],
        },
    );
    let f = external_fn(
        "f",
        StateMutability::Nonpayable,
        vec![("target", VyperType::Address)],
        Some(VyperType::Address),
        vec![ret(Some(call))],
    );
    let (_, runtime) = compile(&module(vec![f]));
    let ops = opcodes(runtime_entry(&runtime));
    assert!(ops.contains(&Opcode::Returndatacopy));
    assert!(ops.contains(&Opcode::Revert));
}

/// revert_on_failure=False drops the bubble path.
#[test]
fn create_can_opt_out_of_revert() {
    let call = expr(
        VyperType::Address,
        ExprKind::Call {
            target: CallTarget::Builtin {
                id: "create_minimal_proxy_to".to_owned(),
            },
            args: vec![name("target", VyperType::Address)],
            keywords: vec![Keyword {
                arg: "revert_on_failure".to_owned(),
                value: expr(VyperType::Bool, ExprKind::NameConstant { value: false }),
            }],
        },
    );
    let f = external_fn(
        "f",
        StateMutability::Nonpayable,
        vec![("target", VyperType::Address)],
        Some(VyperType::Address),
        vec![ret(Some(call))],
    );
    let (_, runtime) = compile(&module(vec![f]));
    let ops = opcodes(runtime_entry(&runtime));
    assert!(!ops.contains(&Opcode::Returndatacopy));
}

/// append then pop on a storage dynamic array: bounds asserts plus
/// length read-modify-write on both sides.
#[test]
fn dyn_array_append_and_pop() {
    let arr_ty = VyperType::DArray {
        elem: Box::new(uint256()),
        maxlen: 5,
    };
    let arr = storage_var("arr", 3, arr_ty.clone());
    let append = stmt(StmtKind::Expr {
        value: expr(
            uint256(),
            ExprKind::Call {
                target: CallTarget::Method {
                    receiver: Box::new(arr.clone()),
                    method: "append".to_owned(),
                },
                args: vec![int_lit(7, uint256())],
                keywords: vec![],
            },
        ),
    });
    let pop = ret(Some(expr(
        uint256(),
        ExprKind::Call {
            target: CallTarget::Method {
                receiver: Box::new(arr),
                method: "pop".to_owned(),
            },
            args: vec![],
            keywords: vec![],
        },
    )));
    let f = external_fn(
        "f",
        StateMutability::Nonpayable,
        vec![],
        Some(uint256()),
        vec![append, pop],
    );
    let (_, runtime) = compile(&module(vec![f]));
    assert_well_formed(&runtime);
    let ops = opcodes(runtime_entry(&runtime));
    // length reads, element store, length writes, and the bounds asserts
    assert!(ops.iter().filter(|op| **op == Opcode::Sload).count() >= 2);
    assert!(ops.iter().filter(|op| **op == Opcode::Sstore).count() >= 3);
    assert!(ops.contains(&Opcode::Assert));
    assert!(ops.contains(&Opcode::Sha364) || ops.contains(&Opcode::Add));
}

/// raw_call with max_outsize returns the truncated payload.
#[test]
fn raw_call_truncates_return_data() {
    let call = expr(
        bytes_ty(32),
        ExprKind::Call {
            target: CallTarget::Builtin {
                id: "raw_call".to_owned(),
            },
            args: vec![name("target", VyperType::Address), name("data", bytes_ty(4))],
            keywords: vec![Keyword {
                arg: "max_outsize".to_owned(),
                value: int_lit(32, uint256()),
            }],
        },
    );
    let f = external_fn(
        "f",
        StateMutability::Nonpayable,
        vec![("target", VyperType::Address), ("data", bytes_ty(4))],
        Some(bytes_ty(32)),
        vec![ret(Some(call))],
    );
    let (_, runtime) = compile(&module(vec![f]));
    assert_well_formed(&runtime);
    let ops = opcodes(runtime_entry(&runtime));
    assert!(ops.contains(&Opcode::Call));
    assert!(ops.contains(&Opcode::Returndatasize));
    // min(returndatasize, max_outsize) goes through select's xor/mul/xor
    assert!(ops.contains(&Opcode::Xor));
}

/// Conversions that narrow emit clamps; uint256 -> uint8 must compare
/// against 255.
#[test]
fn convert_narrowing_clamps() {
    let call = builtin_call("convert", vec![name("x", uint256())], uint8());
    let f = external_fn(
        "f",
        StateMutability::Pure,
        vec![("x", uint256())],
        Some(uint8()),
        vec![ret(Some(call))],
    );
    let (_, runtime) = compile(&module(vec![f]));
    let entry = runtime_entry(&runtime);
    let clamped = entry
        .blocks_in_order()
        .flat_map(|bb| bb.instructions.iter())
        .filter(|inst| inst.opcode == Opcode::Gt)
        .any(|inst| literal_operand(&inst.operands) == Some(255));
    assert!(clamped);
}

/// Widening conversions are free of runtime checks.
#[test]
fn convert_widening_is_free() {
    let call = builtin_call("convert", vec![name("x", uint8())], uint256());
    let f = external_fn(
        "f",
        StateMutability::Pure,
        vec![("x", uint8())],
        Some(uint256()),
        vec![ret(Some(call))],
    );
    let (_, runtime) = compile(&module(vec![f]));
    // the only asserts left come from the calldata decode prologue
    let decode_asserts = {
        let g = external_fn(
            "f",
            StateMutability::Pure,
            vec![("x", uint8())],
            Some(uint256()),
            vec![ret(Some(name("x", uint256())))],
        );
        let (_, baseline) = compile(&module(vec![g]));
        count_opcode(&baseline, Opcode::Assert)
    };
    assert_eq!(count_opcode(&runtime, Opcode::Assert), decode_asserts);
}
