//! Unsafe math built-ins.
//!
//! These skip the overflow machinery entirely; sub-256-bit results wrap
//! back into their width (mask for unsigned, sign-extend for signed).

use super::{call_parts, BuiltinHandler};
use crate::{
    ast::ExprNode,
    codegen::{context::CodegenContext, value::VyperValue},
    errors::CodegenResult,
    venom::IRVariable,
};

pub(super) const HANDLERS: &[(&str, BuiltinHandler)] = &[
    ("unsafe_add", lower_unsafe_add),
    ("unsafe_sub", lower_unsafe_sub),
    ("unsafe_mul", lower_unsafe_mul),
    ("unsafe_div", lower_unsafe_div),
    ("pow_mod256", lower_pow_mod256),
    ("uint256_addmod", lower_uint256_addmod),
    ("uint256_mulmod", lower_uint256_mulmod),
    ("shift", lower_shift),
];

#[derive(Clone, Copy)]
enum UnsafeOp {
    Add,
    Sub,
    Mul,
    Div,
}

fn lower_unsafe_add(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    lower_unsafe_binop(ctx, node, UnsafeOp::Add)
}

fn lower_unsafe_sub(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    lower_unsafe_binop(ctx, node, UnsafeOp::Sub)
}

fn lower_unsafe_mul(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    lower_unsafe_binop(ctx, node, UnsafeOp::Mul)
}

fn lower_unsafe_div(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    lower_unsafe_binop(ctx, node, UnsafeOp::Div)
}

fn lower_unsafe_binop(
    ctx: &mut CodegenContext,
    node: &ExprNode,
    op: UnsafeOp,
) -> CodegenResult<VyperValue> {
    let (args, _) = call_parts(node)?;
    let a = ctx.lower_value(&args[0])?;
    let b_val = ctx.lower_value(&args[1])?;
    let ty = args[0].ty.clone();

    let b = &mut ctx.builder;
    let raw: IRVariable = match op {
        UnsafeOp::Add => b.add(a, b_val),
        UnsafeOp::Sub => b.sub(a, b_val),
        UnsafeOp::Mul => b.mul(a, b_val),
        UnsafeOp::Div => {
            if ty.is_signed() {
                b.sdiv(a, b_val)
            } else {
                b.div(a, b_val)
            }
        }
    };
    let wrapped = ctx.wrap_result(raw.into(), &ty);
    Ok(VyperValue::from_stack_op(wrapped, node.ty.clone()))
}

/// `pow_mod256(base, exp)`: raw EXP with wraparound.
fn lower_pow_mod256(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    let (args, _) = call_parts(node)?;
    let base = ctx.lower_value(&args[0])?;
    let exp = ctx.lower_value(&args[1])?;
    let result = ctx.builder.exp(base, exp);
    Ok(VyperValue::from_stack_op(result, node.ty.clone()))
}

/// `uint256_addmod(a, b, c)`: 512-bit-safe addition mod c, reverting on
/// a zero modulus.
fn lower_uint256_addmod(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    let (args, _) = call_parts(node)?;
    let a = ctx.lower_value(&args[0])?;
    let b_val = ctx.lower_value(&args[1])?;
    let c = ctx.lower_value(&args[2])?;
    // the EVM opcode quietly returns 0 for mod 0
    ctx.builder.assert_(c.clone());
    let result = ctx.builder.addmod(a, b_val, c);
    Ok(VyperValue::from_stack_op(result, node.ty.clone()))
}

/// `uint256_mulmod(a, b, c)`: 512-bit-safe multiplication mod c.
fn lower_uint256_mulmod(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    let (args, _) = call_parts(node)?;
    let a = ctx.lower_value(&args[0])?;
    let b_val = ctx.lower_value(&args[1])?;
    let c = ctx.lower_value(&args[2])?;
    ctx.builder.assert_(c.clone());
    let result = ctx.builder.mulmod(a, b_val, c);
    Ok(VyperValue::from_stack_op(result, node.ty.clone()))
}

/// `shift(x, bits)`: negative bit counts shift right (`sar` for signed
/// values), non-negative counts shift left. Kept for compatibility with
/// sources that predate the shift operators.
fn lower_shift(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    let (args, _) = call_parts(node)?;
    let val = ctx.lower_value(&args[0])?;
    let bits = ctx.lower_value(&args[1])?;
    let is_signed = args[0].ty.is_signed();

    let b = &mut ctx.builder;
    let is_negative = b.slt(bits.clone(), 0u64);
    let neg_bits = b.sub(0u64, bits.clone());
    let right_shifted = if is_signed {
        b.sar(neg_bits, val.clone())
    } else {
        b.shr(neg_bits, val.clone())
    };
    let left_shifted = b.shl(bits, val);
    let result = b.select(is_negative, right_shifted, left_shifted);
    Ok(VyperValue::from_stack_op(result, node.ty.clone()))
}
