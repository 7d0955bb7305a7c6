//! Byte manipulation built-ins: `concat`, `slice`, `extract32`.

use num_bigint::BigInt;
use num_traits::One;

use super::{call_parts, BuiltinHandler};
use crate::{
    ast::{EnvAttr, ExprKind, ExprNode},
    codegen::{context::CodegenContext, value::VyperValue},
    errors::{CodegenError, CodegenResult},
    types::VyperType,
    venom::{IROperand, IRVariable},
};

pub(super) const HANDLERS: &[(&str, BuiltinHandler)] = &[
    ("concat", lower_concat),
    ("slice", lower_slice),
    ("extract32", lower_extract32),
];

/// `concat(a, b, ...)`: copy each argument after the last, tracking the
/// running length in a counter variable. BytesM arguments contribute
/// their fixed width, bytestrings their runtime length.
fn lower_concat(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    let (args, _) = call_parts(node)?;

    let out = ctx.new_temporary_value(&node.ty);
    let data_ptr = ctx.builder.add(out.operand(), 32u64);

    let offset = ctx.builder.new_variable();
    ctx.builder.assign_to(IROperand::literal(0), offset);

    for arg in args {
        match &arg.ty {
            VyperType::Bytes { .. } | VyperType::String { .. } => {
                let vv = ctx.lower_expr(arg)?;
                let src = ctx.unwrap(&vv)?;
                let len = ctx.builder.mload(src.clone());
                let src_data = ctx.builder.add(src, 32u64);
                let dst = ctx.builder.add(data_ptr, offset);
                ctx.copy_memory_dynamic(dst, src_data, len);
                let next = ctx.builder.add(offset, len);
                ctx.builder.assign_to(next, offset);
            }
            VyperType::BytesM(m) => {
                // a full-word store; only the leading m bytes count
                let val = ctx.lower_value(arg)?;
                let dst = ctx.builder.add(data_ptr, offset);
                ctx.builder.mstore(val, dst);
                let next = ctx.builder.add(offset, usize::from(*m));
                ctx.builder.assign_to(next, offset);
            }
            other => {
                return Err(CodegenError::type_check_at(
                    format!("cannot concat {other:?}"),
                    arg.span,
                ));
            }
        }
    }

    ctx.builder.mstore(offset, out.operand());
    Ok(out)
}

fn is_adhoc_slice(node: &ExprNode) -> bool {
    match &node.kind {
        ExprKind::EnvAttr(EnvAttr::MsgData) => true,
        ExprKind::Attribute { base, attr, .. } => {
            attr == "code"
                && (matches!(base.ty, VyperType::Address | VyperType::Interface { .. })
                    || matches!(&base.kind, ExprKind::Name { id, .. } if id == "self"))
        }
        _ => false,
    }
}

/// `slice(b, start, length)`.
fn lower_slice(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    let (args, _) = call_parts(node)?;
    let src_node = &args[0];

    if is_adhoc_slice(src_node) {
        return lower_adhoc_slice(ctx, node);
    }

    // evaluate src before start and length to keep source order: their
    // side effects may modify the buffer being sliced
    let (src_data, src_len): (IROperand, IROperand) = match &src_node.ty {
        VyperType::Bytes { .. } | VyperType::String { .. } => {
            let vv = ctx.lower_expr(src_node)?;
            let src = ctx.unwrap(&vv)?;
            let len = ctx.builder.mload(src.clone());
            let data = ctx.builder.add(src, 32u64);
            (data.into(), len.into())
        }
        VyperType::BytesM(m) => {
            let val = ctx.lower_value(src_node)?;
            let buf = ctx.allocate_buffer(32, Some("slice_src"));
            let ptr = buf.base_ptr().operand;
            ctx.builder.mstore(val, ptr.clone());
            (ptr, IROperand::from(usize::from(*m)))
        }
        other => {
            return Err(CodegenError::type_check_at(
                format!("cannot slice {other:?}"),
                src_node.span,
            ));
        }
    };

    let start = ctx.lower_value(&args[1])?;
    let length = ctx.lower_value(&args[2])?;
    slice_bounds_check(ctx, &start, &length, &src_len);

    let out = ctx.new_temporary_value(&node.ty);
    let out_data = ctx.builder.add(out.operand(), 32u64);
    let copy_src = ctx.builder.add(src_data, start);
    ctx.copy_memory_dynamic(out_data, copy_src, length.clone());
    ctx.builder.mstore(length, out.operand());
    Ok(out)
}

/// `start + length <= src_len`, also catching wraparound in the
/// addition itself.
fn slice_bounds_check(
    ctx: &mut CodegenContext,
    start: &IROperand,
    length: &IROperand,
    src_len: &IROperand,
) {
    let b = &mut ctx.builder;
    let end = b.add(start.clone(), length.clone());
    let arithmetic_overflow = b.lt(end, start.clone());
    let buffer_oob = b.gt(end, src_len.clone());
    let oob = b.or(arithmetic_overflow, buffer_oob);
    let ok = b.iszero(oob);
    b.assert_(ok);
}

/// Slices over `msg.data`, `self.code`, and `<address>.code` copy with
/// the specialized opcodes instead of going through a materialized
/// buffer.
fn lower_adhoc_slice(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    let (args, _) = call_parts(node)?;
    let src_node = &args[0];
    let start = ctx.lower_value(&args[1])?;
    let length = ctx.lower_value(&args[2])?;

    let out = ctx.new_temporary_value(&node.ty);
    let out_data = ctx.builder.add(out.operand(), 32u64);

    match &src_node.kind {
        ExprKind::EnvAttr(EnvAttr::MsgData) => {
            let src_len = ctx.builder.calldatasize();
            slice_bounds_check(ctx, &start, &length, &src_len.into());
            ctx.builder.calldatacopy(length.clone(), start, out_data);
        }
        ExprKind::Attribute { base, .. }
            if matches!(&base.kind, ExprKind::Name { id, .. } if id == "self") =>
        {
            let src_len = ctx.builder.codesize();
            slice_bounds_check(ctx, &start, &length, &src_len.into());
            ctx.builder.codecopy(length.clone(), start, out_data);
        }
        ExprKind::Attribute { base, .. } => {
            let addr = ctx.lower_value(base)?;
            let src_len = ctx.builder.extcodesize(addr.clone());
            slice_bounds_check(ctx, &start, &length, &src_len.into());
            ctx.builder.extcodecopy(addr, length.clone(), start, out_data);
        }
        _ => {
            return Err(CodegenError::panic_at("not an adhoc slice source", node.span));
        }
    }

    ctx.builder.mstore(length, out.operand());
    Ok(out)
}

/// `extract32(b, start, output_type=...)`: load a full word at a dynamic
/// offset and clamp it into the requested output type.
fn lower_extract32(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    let (args, _) = call_parts(node)?;
    let src_node = &args[0];

    let vv = ctx.lower_expr(src_node)?;
    let src = ctx.unwrap(&vv)?;
    let src_len = ctx.builder.mload(src.clone());
    let src_data = ctx.builder.add(src, 32u64);

    let start = ctx.lower_value(&args[1])?;

    let b = &mut ctx.builder;
    let end = b.add(start.clone(), 32u64);
    let oob = b.gt(end, src_len);
    let ok = b.iszero(oob);
    b.assert_(ok);

    let load_ptr = b.add(src_data, start);
    let result = b.mload(load_ptr);
    clamp_extract32_result(ctx, result, &node.ty)?;
    Ok(VyperValue::from_stack_op(result, node.ty.clone()))
}

fn clamp_extract32_result(
    ctx: &mut CodegenContext,
    val: IRVariable,
    out_t: &VyperType,
) -> CodegenResult<()> {
    match out_t {
        VyperType::Integer(t) if t.bits < 256 => {
            if t.signed {
                // the high bits must agree with the sign bit
                let byte_width = usize::from(t.bits / 8 - 1);
                let b = &mut ctx.builder;
                let canonical = b.signextend(byte_width, val);
                let ok = b.eq(val, canonical);
                b.assert_(ok);
            } else {
                let mask = (BigInt::one() << t.bits) - 1;
                let b = &mut ctx.builder;
                let too_big = b.gt(val, mask);
                let ok = b.iszero(too_big);
                b.assert_(ok);
            }
        }
        VyperType::Address => {
            let mask = (BigInt::one() << 160) - 1;
            let b = &mut ctx.builder;
            let too_big = b.gt(val, mask);
            let ok = b.iszero(too_big);
            b.assert_(ok);
        }
        _ => {}
    }
    Ok(())
}
