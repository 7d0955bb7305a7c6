//! Hashing built-ins: `keccak256`, `sha256`, `ecrecover`.
//!
//! keccak-256 is native (`sha3`); SHA-256 and signature recovery go
//! through their precompiles with an asserted staticcall.

use super::{call_parts, BuiltinHandler};
use crate::{
    ast::{ExprKind, ExprNode},
    codegen::{context::CodegenContext, value::VyperValue},
    errors::CodegenResult,
    keccak::keccak256_uint,
    types::VyperType,
    venom::IROperand,
};

pub(super) const HANDLERS: &[(&str, BuiltinHandler)] = &[
    ("keccak256", lower_keccak256),
    ("sha256", lower_sha256),
    ("ecrecover", lower_ecrecover),
];

/// Pointer and length of hash input data, staging single-word values in
/// a scratch buffer.
fn hash_input(
    ctx: &mut CodegenContext,
    arg: &ExprNode,
) -> CodegenResult<(IROperand, IROperand)> {
    match &arg.ty {
        VyperType::Bytes { .. } | VyperType::String { .. } => {
            let vv = ctx.lower_expr(arg)?;
            let data = ctx.bytes_data_ptr(&vv)?;
            let len = ctx.bytestring_length(&vv)?;
            Ok((data.into(), len.into()))
        }
        VyperType::BytesM(m) => {
            // already left-aligned; hash the leading m bytes
            let val = ctx.lower_value(arg)?;
            let buf = ctx.allocate_buffer(32, Some("hash_scratch"));
            let ptr = buf.base_ptr().operand;
            ctx.builder.mstore(val, ptr.clone());
            Ok((ptr, IROperand::from(usize::from(*m))))
        }
        _ => {
            let val = ctx.lower_value(arg)?;
            let buf = ctx.allocate_buffer(32, Some("hash_scratch"));
            let ptr = buf.base_ptr().operand;
            ctx.builder.mstore(val, ptr.clone());
            Ok((ptr, IROperand::literal(32)))
        }
    }
}

/// `keccak256(data)`. Literal arguments fold to the digest at compile
/// time.
fn lower_keccak256(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    let (args, _) = call_parts(node)?;
    let arg = args[0].reduced();

    let folded = match &arg.kind {
        ExprKind::Bytes { value } => Some(keccak256_uint(value)),
        ExprKind::Str { value } => Some(keccak256_uint(value.as_bytes())),
        _ => None,
    };
    if let Some(digest) = folded {
        return Ok(VyperValue::from_stack_op(
            num_bigint::BigInt::from(digest),
            node.ty.clone(),
        ));
    }

    let (data, len) = hash_input(ctx, &arg)?;
    let result = ctx.builder.sha3(data, len);
    Ok(VyperValue::from_stack_op(result, node.ty.clone()))
}

/// `sha256(data)` via the precompile at address 2.
fn lower_sha256(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    let (args, _) = call_parts(node)?;
    let (data, len) = hash_input(ctx, &args[0])?;

    let out = ctx.allocate_buffer(32, Some("sha256_out"));
    let out_ptr = out.base_ptr().operand;
    let b = &mut ctx.builder;
    let gas = b.gas();
    let success = b.staticcall(gas, 2u64, data, len, out_ptr.clone(), 32u64);
    b.assert_(success);
    let result = b.mload(out_ptr);
    Ok(VyperValue::from_stack_op(result, node.ty.clone()))
}

/// `ecrecover(hash, v, r, s)` via the precompile at address 1. A failed
/// recovery leaves the zeroed output untouched and yields the zero
/// address.
fn lower_ecrecover(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    let (args, _) = call_parts(node)?;
    let input = ctx.allocate_buffer(128, Some("ecrecover_in"));
    let input_ptr = input.base_ptr().operand;
    for (i, arg) in args.iter().take(4).enumerate() {
        let val = ctx.lower_value(arg)?;
        let dst = if i == 0 {
            input_ptr.clone()
        } else {
            ctx.builder.add(input_ptr.clone(), 32 * i).into()
        };
        ctx.builder.mstore(val, dst);
    }

    let out = ctx.allocate_buffer(32, Some("ecrecover_out"));
    let out_ptr = out.base_ptr().operand;
    ctx.builder.mstore(0u64, out_ptr.clone());
    let b = &mut ctx.builder;
    let gas = b.gas();
    let success = b.staticcall(gas, 1u64, input_ptr, 128u64, out_ptr.clone(), 32u64);
    b.assert_(success);
    let result = b.mload(out_ptr);
    Ok(VyperValue::from_stack_op(result, node.ty.clone()))
}
