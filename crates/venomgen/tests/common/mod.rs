//! Shared helpers for the integration tests: terse constructors for
//! annotated AST nodes, a compile wrapper, and IR walkers for checking
//! structural invariants.
#![allow(dead_code)]

use venomgen::{
    generate_venom, BinOpKind, EventDef, ExprKind, ExprNode, ForIter, FunctionArg, FunctionDef,
    IntegerT, IRContext, IRFunction, IRLabel, IROperand, Module, Opcode, RaiseReason, Settings,
    Span, StateMutability, StmtKind, StmtNode, VarInfo, VarLocation, Visibility, VyperType,
    MAIN_ENTRY_LABEL,
};

pub fn uint256() -> VyperType {
    VyperType::Integer(IntegerT::new(256, false))
}

pub fn uint8() -> VyperType {
    VyperType::Integer(IntegerT::new(8, false))
}

pub fn int256() -> VyperType {
    VyperType::Integer(IntegerT::new(256, true))
}

pub fn expr(ty: VyperType, kind: ExprKind) -> ExprNode {
    ExprNode {
        span: Span::default(),
        ty,
        kind,
    }
}

pub fn int_lit(value: i64, ty: VyperType) -> ExprNode {
    expr(
        ty,
        ExprKind::Int {
            value: num_bigint::BigInt::from(value),
        },
    )
}

pub fn name(id: &str, ty: VyperType) -> ExprNode {
    expr(
        ty,
        ExprKind::Name {
            id: id.to_owned(),
            var_info: None,
        },
    )
}

pub fn storage_var(id: &str, slot: u64, ty: VyperType) -> ExprNode {
    expr(
        ty.clone(),
        ExprKind::Name {
            id: id.to_owned(),
            var_info: Some(VarInfo {
                ty,
                location: VarLocation::Storage { slot },
            }),
        },
    )
}

pub fn binop(op: BinOpKind, left: ExprNode, right: ExprNode, ty: VyperType) -> ExprNode {
    expr(
        ty,
        ExprKind::BinOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
    )
}

pub fn builtin_call(id: &str, args: Vec<ExprNode>, ty: VyperType) -> ExprNode {
    expr(
        ty,
        ExprKind::Call {
            target: venomgen::CallTarget::Builtin { id: id.to_owned() },
            args,
            keywords: vec![],
        },
    )
}

pub fn stmt(kind: StmtKind) -> StmtNode {
    StmtNode {
        span: Span::default(),
        kind,
    }
}

pub fn ann_assign(target: &str, ty: VyperType, value: ExprNode) -> StmtNode {
    stmt(StmtKind::AnnAssign {
        target: target.to_owned(),
        ty,
        value,
    })
}

pub fn ret(value: Option<ExprNode>) -> StmtNode {
    stmt(StmtKind::Return { value })
}

pub fn external_fn(
    name: &str,
    mutability: StateMutability,
    args: Vec<(&str, VyperType)>,
    return_type: Option<VyperType>,
    body: Vec<StmtNode>,
) -> FunctionDef {
    FunctionDef {
        name: name.to_owned(),
        visibility: Visibility::External,
        mutability,
        args: args
            .into_iter()
            .map(|(name, ty)| FunctionArg {
                name: name.to_owned(),
                ty,
            })
            .collect(),
        return_type,
        body,
        span: Span::default(),
    }
}

pub fn internal_fn(
    name: &str,
    mutability: StateMutability,
    args: Vec<(&str, VyperType)>,
    return_type: Option<VyperType>,
    body: Vec<StmtNode>,
) -> FunctionDef {
    FunctionDef {
        visibility: Visibility::Internal,
        ..external_fn(name, mutability, args, return_type, body)
    }
}

pub fn module(functions: Vec<FunctionDef>) -> Module {
    module_with_events(functions, vec![])
}

pub fn module_with_events(functions: Vec<FunctionDef>, events: Vec<EventDef>) -> Module {
    Module {
        name: "test_module".to_owned(),
        functions,
        events,
        immutables_size: 0,
    }
}

pub fn compile(module: &Module) -> (IRContext, IRContext) {
    generate_venom(module, &Settings::default()).expect("codegen failed")
}

pub fn runtime_entry(ir: &IRContext) -> &IRFunction {
    ir.get_function(&IRLabel::new(MAIN_ENTRY_LABEL))
        .expect("runtime entry function")
}

/// Every opcode in a function, in emission order.
pub fn opcodes(func: &IRFunction) -> Vec<Opcode> {
    func.blocks_in_order()
        .flat_map(|bb| bb.instructions.iter().map(|inst| inst.opcode))
        .collect()
}

/// Every opcode in every function of a context.
pub fn all_opcodes(ir: &IRContext) -> Vec<Opcode> {
    ir.functions.values().flat_map(opcodes).collect()
}

/// Asserts the SSA discipline: every variable is the output of exactly
/// one instruction, except variables written exclusively through the
/// explicit mutable `assign` form.
pub fn assert_ssa(func: &IRFunction) {
    use std::collections::HashMap;

    let mut plain_defs: HashMap<u32, usize> = HashMap::new();
    let mut assign_targets: std::collections::HashSet<u32> = std::collections::HashSet::new();
    for bb in func.blocks_in_order() {
        for inst in &bb.instructions {
            if let Some(out) = inst.output {
                if inst.opcode == Opcode::Assign {
                    assign_targets.insert(out.0);
                } else {
                    *plain_defs.entry(out.0).or_default() += 1;
                }
            }
        }
    }
    for (var, count) in &plain_defs {
        assert_eq!(
            *count, 1,
            "%{var} defined {count} times in {}",
            func.name
        );
        assert!(
            !assign_targets.contains(var),
            "%{var} mixes plain and assign definitions in {}",
            func.name
        );
    }
}

/// Asserts the terminator discipline: each appended block ends in
/// exactly one terminator and has none in the middle.
pub fn assert_terminated(func: &IRFunction) {
    for bb in func.blocks_in_order() {
        assert!(
            bb.is_terminated(),
            "block {} of {} lacks a terminator",
            bb.label,
            func.name
        );
        for inst in &bb.instructions[..bb.instructions.len() - 1] {
            assert!(
                !inst.is_terminator(),
                "terminator {} mid-block in {} of {}",
                inst.opcode,
                bb.label,
                func.name
            );
        }
    }
}

/// Asserts both structural invariants over every function of a context.
pub fn assert_well_formed(ir: &IRContext) {
    for func in ir.functions.values() {
        assert_ssa(func);
        assert_terminated(func);
    }
}

/// Instructions of one opcode across a whole context.
pub fn count_opcode(ir: &IRContext, opcode: Opcode) -> usize {
    all_opcodes(ir).into_iter().filter(|op| *op == opcode).count()
}

/// Convenience: a `range(n)` loop iterator starting at zero.
pub fn range_iter(count: usize) -> ForIter {
    ForIter::Range {
        start: Box::new(int_lit(0, uint256())),
        count,
    }
}

/// Convenience: a bare `assert`/`raise` reason.
pub fn no_reason() -> RaiseReason {
    RaiseReason::None
}

/// First literal operand of an instruction, as usize.
pub fn literal_operand(inst_operands: &[IROperand]) -> Option<usize> {
    inst_operands
        .iter()
        .find_map(|op| op.as_literal().and_then(|lit| lit.as_usize()))
}
