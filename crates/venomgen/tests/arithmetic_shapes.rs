//! Emission shapes of the safe-arithmetic lowering: each checked
//! operator must leave its guard assertions in the IR.

mod common;

use common::*;
use venomgen::{BinOpKind, Opcode, StateMutability, StmtKind, UnaryOpKind};

/// Compiles `def f(x: T, y: T) -> T: return x <op> y` and returns the
/// runtime context.
fn compile_binop(op: BinOpKind, ty: venomgen::VyperType) -> venomgen::IRContext {
    let body = vec![ret(Some(binop(
        op,
        name("x", ty.clone()),
        name("y", ty.clone()),
        ty.clone(),
    )))];
    let f = external_fn(
        "f",
        StateMutability::Pure,
        vec![("x", ty.clone()), ("y", ty.clone())],
        Some(ty),
        body,
    );
    let (_, runtime) = compile(&module(vec![f]));
    assert_well_formed(&runtime);
    runtime
}

#[test]
fn unsigned_add_asserts_no_wrap() {
    let runtime = compile_binop(BinOpKind::Add, uint256());
    let ops = opcodes(runtime_entry(&runtime));
    // add, then lt(result, x), iszero, assert
    assert!(ops.contains(&Opcode::Add));
    assert!(ops.contains(&Opcode::Lt));
    assert!(ops.contains(&Opcode::Assert));
}

#[test]
fn narrow_add_clamps_to_type_bounds() {
    let body = vec![ret(Some(binop(
        BinOpKind::Add,
        name("x", uint8()),
        name("y", uint8()),
        uint8(),
    )))];
    let f = external_fn(
        "f",
        StateMutability::Pure,
        vec![("x", uint8()), ("y", uint8())],
        Some(uint8()),
        body,
    );
    let (_, runtime) = compile(&module(vec![f]));
    let entry = runtime_entry(&runtime);
    // the clamp compares the 256-bit sum against 255
    let has_255_bound = entry
        .blocks_in_order()
        .flat_map(|bb| bb.instructions.iter())
        .filter(|inst| inst.opcode == Opcode::Gt)
        .any(|inst| literal_operand(&inst.operands) == Some(255));
    assert!(has_255_bound, "uint8 add must clamp against 255");
}

#[test]
fn signed_sub_checks_sign_consistency() {
    let runtime = compile_binop_signed(BinOpKind::Sub);
    let ops = opcodes(runtime_entry(&runtime));
    assert!(ops.contains(&Opcode::Sub));
    assert!(ops.contains(&Opcode::Slt));
    assert!(ops.contains(&Opcode::Sgt));
    assert!(ops.contains(&Opcode::Eq));
    assert!(ops.contains(&Opcode::Assert));
}

fn compile_binop_signed(op: BinOpKind) -> venomgen::IRContext {
    let body = vec![ret(Some(binop(
        op,
        name("x", int256()),
        name("y", int256()),
        int256(),
    )))];
    let f = external_fn(
        "f",
        StateMutability::Pure,
        vec![("x", int256()), ("y", int256())],
        Some(int256()),
        body,
    );
    let (_, runtime) = compile(&module(vec![f]));
    assert_well_formed(&runtime);
    runtime
}

#[test]
fn unsigned_mul_verifies_by_division() {
    let runtime = compile_binop(BinOpKind::Mult, uint256());
    let ops = opcodes(runtime_entry(&runtime));
    assert!(ops.contains(&Opcode::Mul));
    assert!(ops.contains(&Opcode::Div));
    assert!(ops.contains(&Opcode::Assert));
}

#[test]
fn signed_mul_handles_min_int_special_case() {
    let runtime = compile_binop_signed(BinOpKind::Mult);
    let ops = opcodes(runtime_entry(&runtime));
    assert!(ops.contains(&Opcode::Sdiv));
    // the MIN_INT * -1 probe uses not() to detect -1
    assert!(ops.contains(&Opcode::Not));
}

#[test]
fn floordiv_asserts_nonzero_divisor() {
    let runtime = compile_binop(BinOpKind::FloorDiv, uint256());
    let entry = runtime_entry(&runtime);
    // the divisor itself is the asserted condition
    let asserts = entry
        .blocks_in_order()
        .flat_map(|bb| bb.instructions.iter())
        .filter(|inst| inst.opcode == Opcode::Assert)
        .count();
    assert!(asserts >= 1);
    assert!(opcodes(entry).contains(&Opcode::Div));
}

#[test]
fn signed_floordiv_guards_min_over_minus_one() {
    let runtime = compile_binop_signed(BinOpKind::FloorDiv);
    let ops = opcodes(runtime_entry(&runtime));
    assert!(ops.contains(&Opcode::Sdiv));
    assert!(ops.contains(&Opcode::Not));
    assert!(ops.contains(&Opcode::And));
}

#[test]
fn pow_with_literal_exponent_bounds_the_base() {
    let body = vec![ret(Some(binop(
        BinOpKind::Pow,
        name("x", uint256()),
        int_lit(2, uint256()),
        uint256(),
    )))];
    let f = external_fn(
        "f",
        StateMutability::Pure,
        vec![("x", uint256())],
        Some(uint256()),
        body,
    );
    let (_, runtime) = compile(&module(vec![f]));
    let entry = runtime_entry(&runtime);
    // the base bound for squaring is 2^128 - 1
    let expected = (num_bigint::BigUint::from(1u8) << 128u16) - 1u8;
    let has_bound = entry
        .blocks_in_order()
        .flat_map(|bb| bb.instructions.iter())
        .filter(|inst| inst.opcode == Opcode::Gt)
        .any(|inst| {
            inst.operands
                .iter()
                .any(|op| op.as_literal().is_some_and(|lit| lit.value() == &expected))
        });
    assert!(has_bound, "x ** 2 must bound the base at 2^128 - 1");
    assert!(opcodes(entry).contains(&Opcode::Exp));
}

#[test]
fn negation_lowers_to_checked_sub_from_zero() {
    let body = vec![ret(Some(expr(
        int256(),
        venomgen::ExprKind::UnaryOp {
            op: UnaryOpKind::USub,
            operand: Box::new(name("x", int256())),
        },
    )))];
    let f = external_fn(
        "f",
        StateMutability::Pure,
        vec![("x", int256())],
        Some(int256()),
        body,
    );
    let (_, runtime) = compile(&module(vec![f]));
    let ops = opcodes(runtime_entry(&runtime));
    assert!(ops.contains(&Opcode::Sub));
    assert!(ops.contains(&Opcode::Assert));
}

#[test]
fn augmented_assignment_uses_safe_arithmetic() {
    let body = vec![
        ann_assign("total", uint256(), int_lit(1, uint256())),
        stmt(StmtKind::AugAssign {
            target: name("total", uint256()),
            op: BinOpKind::Add,
            value: int_lit(2, uint256()),
        }),
        ret(Some(name("total", uint256()))),
    ];
    let f = external_fn("f", StateMutability::Pure, vec![], Some(uint256()), body);
    let (_, runtime) = compile(&module(vec![f]));
    assert_well_formed(&runtime);
    let ops = opcodes(runtime_entry(&runtime));
    assert!(ops.contains(&Opcode::Add));
    assert!(ops.contains(&Opcode::Assert));
    // load-modify-store through the variable's slot
    assert!(ops.contains(&Opcode::Mload));
    assert!(ops.contains(&Opcode::Mstore));
}
