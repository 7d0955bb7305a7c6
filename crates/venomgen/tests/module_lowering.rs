//! End-to-end module lowering: selector dispatch, function prologues
//! and epilogues, internal calling convention, and the deploy context.

mod common;

use common::*;
use venomgen::{
    CallTarget, DataItem, ExprKind, IRLabel, Opcode, Span, StateMutability, StmtKind, Visibility,
};

/// A module with no functions still yields two well-formed contexts and
/// a reverting fallback.
#[test]
fn empty_module_produces_both_contexts() {
    let module = module(vec![]);
    let (deploy, runtime) = compile(&module);
    assert_well_formed(&deploy);
    assert_well_formed(&runtime);
    assert!(opcodes(runtime_entry(&runtime)).contains(&Opcode::Revert));
}

#[test]
fn selector_dispatch_compares_each_external_function() {
    let f = external_fn(
        "get_answer",
        StateMutability::View,
        vec![],
        Some(uint256()),
        vec![ret(Some(int_lit(42, uint256())))],
    );
    let g = external_fn(
        "bump",
        StateMutability::Nonpayable,
        vec![],
        None,
        vec![stmt(StmtKind::Pass)],
    );
    let module = module(vec![f, g]);
    let (_, runtime) = compile(&module);
    assert_well_formed(&runtime);

    let entry = runtime_entry(&runtime);
    let ops = opcodes(entry);
    // two selector comparisons, the calldata word load, and the shift
    assert_eq!(ops.iter().filter(|op| **op == Opcode::Eq).count(), 2);
    assert_eq!(ops.iter().filter(|op| **op == Opcode::Calldataload).count(), 1);
    assert!(ops.contains(&Opcode::Shr));

    // both selectors appear as literal operands
    let selectors: Vec<usize> = entry
        .blocks_in_order()
        .flat_map(|bb| bb.instructions.iter())
        .filter(|inst| inst.opcode == Opcode::Eq)
        .filter_map(|inst| literal_operand(&inst.operands))
        .collect();
    assert_eq!(selectors.len(), 2);
}

/// Nonpayable external functions open with a callvalue guard.
#[test]
fn nonpayable_function_asserts_zero_callvalue() {
    let f = external_fn(
        "do_nothing",
        StateMutability::Nonpayable,
        vec![],
        None,
        vec![stmt(StmtKind::Pass)],
    );
    let (_, runtime) = compile(&module(vec![f]));
    let ops = opcodes(runtime_entry(&runtime));
    assert!(ops.contains(&Opcode::Callvalue));
    assert!(ops.contains(&Opcode::Assert));
}

/// Payable functions skip the callvalue guard.
#[test]
fn payable_function_skips_callvalue_guard() {
    let f = external_fn(
        "deposit",
        StateMutability::Payable,
        vec![],
        None,
        vec![stmt(StmtKind::Pass)],
    );
    let (_, runtime) = compile(&module(vec![f]));
    let ops = opcodes(runtime_entry(&runtime));
    assert!(!ops.contains(&Opcode::Callvalue));
}

/// A value-returning external function ends in RETURN, not STOP.
#[test]
fn returning_function_emits_return() {
    let f = external_fn(
        "get",
        StateMutability::View,
        vec![],
        Some(uint256()),
        vec![ret(Some(int_lit(7, uint256())))],
    );
    let (_, runtime) = compile(&module(vec![f]));
    let ops = opcodes(runtime_entry(&runtime));
    assert!(ops.contains(&Opcode::Return));
}

/// External function arguments are ABI-decoded out of calldata.
#[test]
fn external_args_decode_from_calldata() {
    let f = external_fn(
        "set",
        StateMutability::Nonpayable,
        vec![("x", uint256())],
        None,
        vec![stmt(StmtKind::Pass)],
    );
    let (_, runtime) = compile(&module(vec![f]));
    assert_well_formed(&runtime);
    let ops = opcodes(runtime_entry(&runtime));
    // one load for the selector word, one for the decoded argument
    assert!(ops.iter().filter(|op| **op == Opcode::Calldataload).count() >= 2);
}

/// Internal functions become their own IR functions, reached by invoke,
/// declaring params and returning via ret.
#[test]
fn internal_function_calling_convention() {
    let helper = internal_fn(
        "double",
        StateMutability::Pure,
        vec![("x", uint256())],
        Some(uint256()),
        vec![ret(Some(binop(
            venomgen::BinOpKind::Add,
            name("x", uint256()),
            name("x", uint256()),
            uint256(),
        )))],
    );
    let call = expr(
        uint256(),
        ExprKind::Call {
            target: CallTarget::Internal {
                function: "double".to_owned(),
            },
            args: vec![int_lit(21, uint256())],
            keywords: vec![],
        },
    );
    let f = external_fn(
        "run",
        StateMutability::View,
        vec![],
        Some(uint256()),
        vec![ret(Some(call))],
    );
    let (_, runtime) = compile(&module(vec![f, helper]));
    assert_well_formed(&runtime);

    let internal = runtime
        .get_function(&IRLabel::new("internal_double"))
        .expect("internal function emitted");
    let internal_ops = opcodes(internal);
    assert!(internal_ops.contains(&Opcode::Param));
    assert!(internal_ops.contains(&Opcode::Ret));

    let entry_ops = opcodes(runtime_entry(&runtime));
    assert!(entry_ops.contains(&Opcode::Invoke));
}

/// The deploy context copies the runtime blob and returns it; the data
/// section carries the runtime markers.
#[test]
fn deploy_context_returns_runtime_code() {
    let (deploy, _) = compile(&module(vec![]));
    assert_well_formed(&deploy);
    let entry = deploy
        .get_function(&IRLabel::new(venomgen::MAIN_ENTRY_LABEL))
        .unwrap();
    let ops = opcodes(entry);
    assert!(ops.contains(&Opcode::Offset));
    assert!(ops.contains(&Opcode::Codecopy));
    assert!(ops.contains(&Opcode::Return));

    assert_eq!(
        deploy.data_section.get(&IRLabel::new("runtime_begin")),
        Some(&DataItem::RuntimeCode)
    );
    assert!(deploy.data_section.contains_key(&IRLabel::new("runtime_end")));
}

/// The constructor body runs in the deploy context before the runtime
/// copy.
#[test]
fn constructor_body_lowers_into_deploy_context() {
    let ctor = venomgen::FunctionDef {
        name: "__init__".to_owned(),
        visibility: Visibility::Constructor,
        mutability: StateMutability::Nonpayable,
        args: vec![],
        return_type: None,
        body: vec![stmt(StmtKind::Assign {
            target: storage_var("total", 0, uint256()),
            value: int_lit(11, uint256()),
        })],
        span: Span::default(),
    };
    let (deploy, _) = compile(&module(vec![ctor]));
    assert_well_formed(&deploy);
    let entry = deploy
        .get_function(&IRLabel::new(venomgen::MAIN_ENTRY_LABEL))
        .unwrap();
    let ops = opcodes(entry);
    let sstore_at = ops.iter().position(|op| *op == Opcode::Sstore).unwrap();
    let codecopy_at = ops.iter().position(|op| *op == Opcode::Codecopy).unwrap();
    assert!(sstore_at < codecopy_at, "constructor runs before the copy");
}

/// Compiling the same module twice yields identical IR: labels and
/// variables are allocated deterministically.
#[test]
fn compilation_is_deterministic() {
    let build = || {
        let f = external_fn(
            "get",
            StateMutability::View,
            vec![("x", uint256())],
            Some(uint256()),
            vec![ret(Some(name("x", uint256())))],
        );
        module(vec![f])
    };
    let (d1, r1) = compile(&build());
    let (d2, r2) = compile(&build());
    assert_eq!(d1, d2);
    assert_eq!(r1, r2);
}
