//! Structural invariants over lowered control flow: SSA and terminator
//! discipline, loop shapes, short-circuiting, constancy, and revert
//! payloads.

mod common;

use common::*;
use venomgen::{
    BoolOpKind, CmpOpKind, EventArg, EventDef, ExprKind, Opcode, RaiseReason, StateMutability,
    StmtKind, VyperType,
};

/// Scenario: `total = 0; for i in range(10): if i > 5: break; total += i`.
#[test]
fn for_range_with_break_is_well_formed() {
    let body = vec![
        ann_assign("total", uint256(), int_lit(0, uint256())),
        stmt(StmtKind::For {
            target: "i".to_owned(),
            target_ty: uint256(),
            iter: range_iter(10),
            body: vec![
                stmt(StmtKind::If {
                    test: expr(
                        VyperType::Bool,
                        ExprKind::Compare {
                            op: CmpOpKind::Gt,
                            left: Box::new(name("i", uint256())),
                            right: Box::new(int_lit(5, uint256())),
                        },
                    ),
                    body: vec![stmt(StmtKind::Break)],
                    orelse: vec![],
                }),
                stmt(StmtKind::AugAssign {
                    target: name("total", uint256()),
                    op: venomgen::BinOpKind::Add,
                    value: name("i", uint256()),
                }),
            ],
        }),
        ret(Some(name("total", uint256()))),
    ];
    let f = external_fn("f", StateMutability::Pure, vec![], Some(uint256()), body);
    let (_, runtime) = compile(&module(vec![f]));
    assert_well_formed(&runtime);

    let entry = runtime_entry(&runtime);
    // counter increment and comparison blocks exist
    let labels: Vec<String> = entry
        .blocks_in_order()
        .map(|bb| bb.label.0.clone())
        .collect();
    assert!(labels.iter().any(|l| l.contains("for_cond")));
    assert!(labels.iter().any(|l| l.contains("for_body")));
    assert!(labels.iter().any(|l| l.contains("for_incr")));
    assert!(labels.iter().any(|l| l.contains("for_exit")));
    assert!(labels.iter().any(|l| l.contains("if_then")));
}

#[test]
fn break_outside_loop_is_rejected() {
    let f = external_fn(
        "f",
        StateMutability::Pure,
        vec![],
        None,
        vec![stmt(StmtKind::Break)],
    );
    let result = venomgen::generate_venom(&module(vec![f]), &venomgen::Settings::default());
    let err = result.expect_err("break outside a loop must fail");
    assert!(err.to_string().contains("break outside"));
}

/// `a and b` short-circuits through a conditional branch; both operands
/// land in the merge variable.
#[test]
fn boolop_short_circuits() {
    let test_expr = expr(
        VyperType::Bool,
        ExprKind::BoolOp {
            op: BoolOpKind::And,
            values: vec![name("a", VyperType::Bool), name("b", VyperType::Bool)],
        },
    );
    let f = external_fn(
        "f",
        StateMutability::Pure,
        vec![("a", VyperType::Bool), ("b", VyperType::Bool)],
        Some(VyperType::Bool),
        vec![ret(Some(test_expr))],
    );
    let (_, runtime) = compile(&module(vec![f]));
    assert_well_formed(&runtime);
    let entry = runtime_entry(&runtime);
    let labels: Vec<String> = entry
        .blocks_in_order()
        .map(|bb| bb.label.0.clone())
        .collect();
    assert!(labels.iter().any(|l| l.contains("bool_next")));
    assert!(labels.iter().any(|l| l.contains("bool_exit")));
}

/// A ternary writes both branch values into one pre-minted variable.
#[test]
fn ternary_merges_through_assign() {
    let f = external_fn(
        "f",
        StateMutability::Pure,
        vec![("c", VyperType::Bool)],
        Some(uint256()),
        vec![ret(Some(expr(
            uint256(),
            ExprKind::IfExp {
                test: Box::new(name("c", VyperType::Bool)),
                body: Box::new(int_lit(1, uint256())),
                orelse: Box::new(int_lit(2, uint256())),
            },
        )))],
    );
    let (_, runtime) = compile(&module(vec![f]));
    assert_well_formed(&runtime);
    let ops = opcodes(runtime_entry(&runtime));
    assert!(ops.iter().filter(|op| **op == Opcode::Assign).count() >= 2);
    assert!(ops.contains(&Opcode::Jnz));
}

/// A view function must not reach any state-mutating opcode.
#[test]
fn view_function_emits_no_mutation() {
    let f = external_fn(
        "peek",
        StateMutability::View,
        vec![],
        Some(uint256()),
        vec![ret(Some(expr(
            uint256(),
            ExprKind::Name {
                id: "total".to_owned(),
                var_info: Some(venomgen::VarInfo {
                    ty: uint256(),
                    location: venomgen::VarLocation::Storage { slot: 0 },
                }),
            },
        )))],
    );
    let (_, runtime) = compile(&module(vec![f]));
    for forbidden in [
        Opcode::Sstore,
        Opcode::Tstore,
        Opcode::Call,
        Opcode::Create,
        Opcode::Create2,
        Opcode::Selfdestruct,
        Opcode::Log,
    ] {
        assert_eq!(count_opcode(&runtime, forbidden), 0, "{forbidden} in view fn");
    }
    assert!(all_opcodes(&runtime).contains(&Opcode::Sload));
}

/// Writing storage from a view function surfaces a state-access error.
#[test]
fn view_function_storage_write_is_rejected() {
    let f = external_fn(
        "bad",
        StateMutability::View,
        vec![],
        None,
        vec![stmt(StmtKind::Assign {
            target: storage_var("total", 0, uint256()),
            value: int_lit(1, uint256()),
        })],
    );
    let result = venomgen::generate_venom(&module(vec![f]), &venomgen::Settings::default());
    let err = result.expect_err("storage write in view fn must fail");
    assert!(matches!(err, venomgen::CodegenError::StateAccessViolation { .. }));
}

/// `assert x` lowers to the assert instruction; `assert x, "msg"`
/// reverts with the Error(string) selector in its payload.
#[test]
fn assert_with_reason_encodes_error_string() {
    let plain = stmt(StmtKind::Assert {
        test: name("ok", VyperType::Bool),
        reason: no_reason(),
    });
    let with_reason = stmt(StmtKind::Assert {
        test: name("ok", VyperType::Bool),
        reason: RaiseReason::Message(Box::new(expr(
            VyperType::String { maxlen: 3 },
            ExprKind::Str {
                value: "bad".to_owned(),
            },
        ))),
    });
    let f = external_fn(
        "f",
        StateMutability::Pure,
        vec![("ok", VyperType::Bool)],
        None,
        vec![plain, with_reason],
    );
    let (_, runtime) = compile(&module(vec![f]));
    assert_well_formed(&runtime);
    let entry = runtime_entry(&runtime);
    let ops = opcodes(entry);
    assert!(ops.contains(&Opcode::Assert));
    assert!(ops.contains(&Opcode::Revert));

    // the Error(string) selector 0x08c379a0, left-aligned
    let selector_word = num_bigint::BigUint::parse_bytes(
        b"08c379a000000000000000000000000000000000000000000000000000000000",
        16,
    )
    .unwrap();
    let stored = entry
        .blocks_in_order()
        .flat_map(|bb| bb.instructions.iter())
        .any(|inst| {
            inst.operands
                .iter()
                .any(|op| op.as_literal().is_some_and(|lit| lit.value() == &selector_word))
        });
    assert!(stored, "Error(string) selector must be written");
}

/// `raise UNREACHABLE` is the invalid opcode.
#[test]
fn raise_unreachable_emits_invalid() {
    let f = external_fn(
        "f",
        StateMutability::Pure,
        vec![],
        None,
        vec![stmt(StmtKind::Raise {
            reason: RaiseReason::Unreachable,
        })],
    );
    let (_, runtime) = compile(&module(vec![f]));
    assert!(all_opcodes(&runtime).contains(&Opcode::Invalid));
}

/// Event emission hashes topic0 from the signature and ABI-encodes the
/// data section.
#[test]
fn log_emits_topics_and_data() {
    let event = EventDef {
        name: "Ping".to_owned(),
        args: vec![
            EventArg {
                name: "who".to_owned(),
                ty: VyperType::Address,
                indexed: true,
            },
            EventArg {
                name: "amount".to_owned(),
                ty: uint256(),
                indexed: false,
            },
        ],
    };
    let f = external_fn(
        "f",
        StateMutability::Nonpayable,
        vec![("who", VyperType::Address)],
        None,
        vec![stmt(StmtKind::Log {
            event: event.clone(),
            args: vec![name("who", VyperType::Address), int_lit(5, uint256())],
        })],
    );
    let (_, runtime) = compile(&module_with_events(vec![f], vec![event.clone()]));
    assert_well_formed(&runtime);
    let entry = runtime_entry(&runtime);
    let log = entry
        .blocks_in_order()
        .flat_map(|bb| bb.instructions.iter())
        .find(|inst| inst.opcode == Opcode::Log)
        .expect("log instruction");
    // topic count of 2: topic0 plus the one indexed argument
    assert_eq!(literal_operand(&log.operands[..1]), Some(2));

    let topic0 = event.topic0();
    let has_topic0 = log
        .operands
        .iter()
        .any(|op| op.as_literal().is_some_and(|lit| lit.to_signed() == topic0));
    assert!(has_topic0, "topic0 must be the signature hash");
}

/// While loops follow the three-block shape and keep the function well
/// formed.
#[test]
fn while_loop_shape() {
    let body = vec![
        ann_assign("n", uint256(), int_lit(0, uint256())),
        stmt(StmtKind::While {
            test: expr(
                VyperType::Bool,
                ExprKind::Compare {
                    op: CmpOpKind::Lt,
                    left: Box::new(name("n", uint256())),
                    right: Box::new(int_lit(3, uint256())),
                },
            ),
            body: vec![stmt(StmtKind::AugAssign {
                target: name("n", uint256()),
                op: venomgen::BinOpKind::Add,
                value: int_lit(1, uint256()),
            })],
        }),
        ret(Some(name("n", uint256()))),
    ];
    let f = external_fn("f", StateMutability::Pure, vec![], Some(uint256()), body);
    let (_, runtime) = compile(&module(vec![f]));
    assert_well_formed(&runtime);
    let labels: Vec<String> = runtime_entry(&runtime)
        .blocks_in_order()
        .map(|bb| bb.label.0.clone())
        .collect();
    assert!(labels.iter().any(|l| l.contains("while_cond")));
    assert!(labels.iter().any(|l| l.contains("while_body")));
    assert!(labels.iter().any(|l| l.contains("while_exit")));
}
