//! ABI codec built-ins: `abi_encode`, `abi_decode`, their deprecated
//! underscore aliases, and `method_id`.

use num_bigint::BigInt;

use super::{call_parts, get_kwarg, kwarg_bool, BuiltinHandler};
use crate::{
    ast::{ExprKind, ExprNode},
    codegen::{
        abi::{abi_decode_to_buf, abi_encode_to_buf},
        calls::calculate_type_for_external_return,
        context::CodegenContext,
        value::VyperValue,
    },
    errors::{CodegenError, CodegenResult},
    keccak::method_id,
    types::{bytes_t, VyperType},
    venom::IROperand,
};

pub(super) const HANDLERS: &[(&str, BuiltinHandler)] = &[
    ("abi_encode", lower_abi_encode),
    ("abi_decode", lower_abi_decode),
    // deprecated aliases
    ("_abi_encode", lower_abi_encode),
    ("_abi_decode", lower_abi_decode),
    ("method_id", lower_method_id),
];

/// Parses the `method_id=` keyword into its 4-byte value.
fn parse_method_id(node: &ExprNode) -> CodegenResult<u32> {
    let reduced = node.reduced();
    match &reduced.kind {
        ExprKind::Bytes { value } if value.len() == 4 => {
            Ok(u32::from_be_bytes([value[0], value[1], value[2], value[3]]))
        }
        ExprKind::Hex { literal } => {
            let digits = literal.strip_prefix("0x").unwrap_or(literal);
            u32::from_str_radix(digits, 16).map_err(|_| {
                CodegenError::argument("method_id= must be a 4-byte value", node.span)
            })
        }
        ExprKind::Int { value } => u32::try_from(value).map_err(|_| {
            CodegenError::argument("method_id= must be a 4-byte value", node.span)
        }),
        _ => Err(CodegenError::argument(
            "method_id= must be a literal",
            node.span,
        )),
    }
}

/// `abi_encode(*args, ensure_tuple=True, method_id=None) -> Bytes[N]`.
fn lower_abi_encode(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    let (args, keywords) = call_parts(node)?;
    let ensure_tuple = kwarg_bool(node, keywords, "ensure_tuple", true)?;
    let selector = get_kwarg(keywords, "method_id")
        .map(parse_method_id)
        .transpose()?;

    // stage the encoder input: a single unwrapped value, or a tuple of
    // all the arguments
    let (encode_src, encode_ty): (IROperand, VyperType) = if args.len() == 1 && !ensure_tuple {
        let arg = &args[0];
        if arg.ty.is_prim_word() {
            let val = ctx.lower_value(arg)?;
            let tmp = ctx.new_temporary_value(&arg.ty);
            ctx.builder.mstore(val, tmp.operand());
            (tmp.operand(), arg.ty.clone())
        } else {
            let vv = ctx.lower_expr(arg)?;
            (ctx.unwrap(&vv)?, arg.ty.clone())
        }
    } else {
        let tuple_ty = VyperType::Tuple {
            members: args.iter().map(|a| a.ty.clone()).collect(),
        };
        let staged = ctx.new_temporary_value(&tuple_ty);
        let base = staged.operand();
        let mut offset = 0usize;
        for arg in args {
            let vv = ctx.lower_expr(arg)?;
            let dst = if offset == 0 {
                base.clone()
            } else {
                ctx.builder.add(base.clone(), offset).into()
            };
            ctx.store_memory(&vv, dst, &arg.ty)?;
            offset += arg.ty.memory_bytes_required();
        }
        (base, tuple_ty)
    };

    let mut maxlen = encode_ty.abi_type().size_bound();
    if selector.is_some() {
        maxlen += 4;
    }
    let out = ctx.new_temporary_value(&bytes_t(maxlen));

    if let Some(selector) = selector {
        // the selector occupies the first four data bytes
        let selector_word = BigInt::from(selector) << 224;
        let sel_dst = ctx.builder.add(out.operand(), 32u64);
        ctx.builder.mstore(selector_word, sel_dst);
        let data_dst = ctx.builder.add(out.operand(), 36u64);
        let encoded = abi_encode_to_buf(ctx, data_dst.into(), &encode_src, &encode_ty)?;
        let total = ctx.builder.add(encoded, 4u64);
        ctx.builder.mstore(total, out.operand());
    } else {
        let data_dst = ctx.builder.add(out.operand(), 32u64);
        let encoded = abi_encode_to_buf(ctx, data_dst.into(), &encode_src, &encode_ty)?;
        ctx.builder.mstore(encoded, out.operand());
    }
    Ok(out)
}

/// `abi_decode(data, output_type, unwrap_tuple=True)`.
fn lower_abi_decode(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    let (args, keywords) = call_parts(node)?;
    let unwrap_tuple = kwarg_bool(node, keywords, "unwrap_tuple", true)?;

    let output_ty = node.ty.clone();
    let wrapped_ty = if unwrap_tuple {
        calculate_type_for_external_return(&output_ty)
    } else {
        output_ty.clone()
    };

    let data_vv = ctx.lower_expr(&args[0])?;
    let data = ctx.unwrap(&data_vv)?;
    let data_len = ctx.builder.mload(data.clone());
    let data_ptr = ctx.builder.add(data, 32u64);

    // size-validate the payload against the type's ABI bounds
    let abi_t = wrapped_ty.abi_type();
    let (min_size, max_size) = (abi_t.min_size(), abi_t.size_bound());
    let b = &mut ctx.builder;
    if min_size == max_size {
        let ok = b.eq(data_len, min_size);
        b.assert_(ok);
    } else {
        let too_small = b.lt(data_len, min_size);
        let ge_min = b.iszero(too_small);
        let too_big = b.gt(data_len, max_size);
        let le_max = b.iszero(too_big);
        let ok = b.and(ge_min, le_max);
        b.assert_(ok);
    }

    let out = ctx.new_temporary_value(&wrapped_ty);
    let hi = ctx.builder.add(data_ptr, data_len);
    let src = crate::codegen::value::Buffer::new(data_ptr, wrapped_ty.memory_bytes_required(), Some("abi_decode_src".to_owned()));
    abi_decode_to_buf(ctx, &out.operand(), &src.base_ptr(), &wrapped_ty, &hi.into())?;

    // the unwrapped element sits at offset zero of the tuple
    Ok(VyperValue::from_ptr(out.ptr()?.clone(), output_ty))
}

/// `method_id(sig)`: the 4-byte selector of a literal signature, as
/// `bytes4` or `Bytes[4]` depending on the annotated output type.
fn lower_method_id(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    let (args, _) = call_parts(node)?;
    let sig = match &args[0].reduced().kind {
        ExprKind::Str { value } => value.clone(),
        _ => {
            return Err(CodegenError::argument(
                "method_id requires a literal string signature",
                node.span,
            ));
        }
    };
    let selector = method_id(&sig);

    match &node.ty {
        VyperType::BytesM(4) => Ok(VyperValue::from_stack_op(
            BigInt::from(selector) << 224,
            node.ty.clone(),
        )),
        VyperType::Bytes { .. } => {
            let out = ctx.new_temporary_value(&node.ty);
            ctx.builder.mstore(4u64, out.operand());
            let data_dst = ctx.builder.add(out.operand(), 32u64);
            ctx.builder.mstore(BigInt::from(selector) << 224, data_dst);
            Ok(out)
        }
        other => Err(CodegenError::argument(
            format!("unsupported method_id output type {other:?}"),
            node.span,
        )),
    }
}
