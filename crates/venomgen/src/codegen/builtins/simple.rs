//! Simple built-ins: `len`, `empty`, `min`, `max`, `abs`, `not`,
//! `floor`, `ceil`.

use super::{call_parts, BuiltinHandler};
use crate::{
    ast::{EnvAttr, ExprKind, ExprNode},
    codegen::{context::CodegenContext, value::VyperValue},
    errors::CodegenResult,
    types::{DECIMAL_DIVISOR, VyperType, UINT256},
};

pub(super) const HANDLERS: &[(&str, BuiltinHandler)] = &[
    ("len", lower_len),
    ("empty", lower_empty),
    ("min", lower_min),
    ("max", lower_max),
    ("abs", lower_abs),
    ("not", lower_not),
    ("floor", lower_floor),
    ("ceil", lower_ceil),
];

/// `len(x)` reads the length word of a bytestring or dynamic array.
/// `len(msg.data)` is `calldatasize()`.
fn lower_len(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    let (args, _) = call_parts(node)?;
    let arg = &args[0];

    if matches!(arg.kind, ExprKind::EnvAttr(EnvAttr::MsgData)) {
        let size = ctx.builder.calldatasize();
        return Ok(VyperValue::from_stack_op(size, node.ty.clone()));
    }

    let vv = ctx.lower_expr(arg)?;
    let len = ctx.bytestring_length(&vv)?;
    Ok(VyperValue::from_stack_op(len, node.ty.clone()))
}

/// `empty(T)`: zero for primitives, a zeroed buffer for compounds.
///
/// `alloca` does not guarantee fresh zero memory, so the buffer is
/// cleared explicitly. For bytestrings and dynamic arrays a zero length
/// word is sufficient.
fn lower_empty(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    let ty = node.ty.clone();
    if ty.is_prim_word() {
        return Ok(VyperValue::from_stack_op(0u64, ty));
    }
    let out = ctx.new_temporary_value(&ty);
    match &ty {
        VyperType::Bytes { .. } | VyperType::String { .. } | VyperType::DArray { .. } => {
            ctx.builder.mstore(0u64, out.operand());
        }
        _ => ctx.zero_memory(out.operand(), ty.memory_bytes_required()),
    }
    Ok(out)
}

fn lower_min(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    lower_minmax(ctx, node, false)
}

fn lower_max(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    lower_minmax(ctx, node, true)
}

fn lower_minmax(
    ctx: &mut CodegenContext,
    node: &ExprNode,
    is_max: bool,
) -> CodegenResult<VyperValue> {
    let (args, _) = call_parts(node)?;
    let a = ctx.lower_value(&args[0])?;
    let b_val = ctx.lower_value(&args[1])?;
    let ty = args[0].ty.clone();

    let b = &mut ctx.builder;
    // uint256 values can exceed the signed range; everything narrower is
    // canonical and compares fine with the signed opcodes
    let cmp = if ty == UINT256 {
        if is_max {
            b.gt(a.clone(), b_val.clone())
        } else {
            b.lt(a.clone(), b_val.clone())
        }
    } else if is_max {
        b.sgt(a.clone(), b_val.clone())
    } else {
        b.slt(a.clone(), b_val.clone())
    };
    let result = b.select(cmp, a, b_val);
    Ok(VyperValue::from_stack_op(result, node.ty.clone()))
}

/// `abs(x)` for int256, rejecting the unnegatable minimum.
fn lower_abs(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    let (args, _) = call_parts(node)?;
    let val = ctx.lower_value(&args[0])?;

    let b = &mut ctx.builder;
    let neg_val = b.sub(0u64, val.clone());
    // only MIN_INT256 satisfies x == -x for nonzero x
    let is_negative = b.slt(val.clone(), 0u64);
    let is_min_int = b.eq(val.clone(), neg_val);
    let bad = b.and(is_negative, is_min_int);
    let ok = b.iszero(bad);
    b.assert_(ok);

    let result = b.select(is_negative, neg_val, val);
    Ok(VyperValue::from_stack_op(result, node.ty.clone()))
}

fn lower_not(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    let (args, _) = call_parts(node)?;
    let val = ctx.lower_value(&args[0])?;
    let result = ctx.builder.iszero(val);
    Ok(VyperValue::from_stack_op(result, node.ty.clone()))
}

/// `floor(d)`: round a decimal toward negative infinity, yielding int256.
fn lower_floor(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    lower_round(ctx, node, false)
}

/// `ceil(d)`: round a decimal toward positive infinity, yielding int256.
fn lower_ceil(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    lower_round(ctx, node, true)
}

fn lower_round(
    ctx: &mut CodegenContext,
    node: &ExprNode,
    toward_positive: bool,
) -> CodegenResult<VyperValue> {
    let (args, _) = call_parts(node)?;
    let val = ctx.lower_value(&args[0])?;

    let b = &mut ctx.builder;
    let quot = b.sdiv(val.clone(), DECIMAL_DIVISOR);
    let rem = b.smod(val.clone(), DECIMAL_DIVISOR);
    let has_rem = {
        let none = b.iszero(rem);
        b.iszero(none)
    };
    let negative = b.slt(val, 0u64);
    let result = if toward_positive {
        let positive = b.iszero(negative);
        let adjust = b.and(positive, has_rem);
        b.add(quot, adjust)
    } else {
        let adjust = b.and(negative, has_rem);
        b.sub(quot, adjust)
    };
    Ok(VyperValue::from_stack_op(result, node.ty.clone()))
}
