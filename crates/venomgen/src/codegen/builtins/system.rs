//! System-level built-ins: `raw_call`, `send`, `raw_log`, `raw_revert`,
//! `selfdestruct`, `blockhash`, `blobhash`.

use super::{call_parts, get_kwarg, kwarg_bool, kwarg_usize, BuiltinHandler};
use crate::{
    ast::{EnvAttr, ExprKind, ExprNode},
    codegen::{context::CodegenContext, value::VyperValue},
    errors::{CodegenError, CodegenResult},
    types::{bytes_t, VyperType, UINT256},
    venom::IROperand,
};

pub(super) const HANDLERS: &[(&str, BuiltinHandler)] = &[
    ("raw_call", lower_raw_call),
    ("send", lower_send),
    ("raw_log", lower_raw_log),
    ("raw_revert", lower_raw_revert),
    ("selfdestruct", lower_selfdestruct),
    ("blockhash", lower_blockhash),
    ("blobhash", lower_blobhash),
];

fn is_msg_data(node: &ExprNode) -> bool {
    matches!(node.kind, ExprKind::EnvAttr(EnvAttr::MsgData))
}

/// `raw_call(to, data, max_outsize=0, gas=..., value=0,
/// is_delegate_call=False, is_static_call=False, revert_on_failure=True)`.
///
/// The result shape depends on the keywords: nothing, a success flag,
/// the (truncated) return data, or a `(success, data)` pair.
fn lower_raw_call(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    let (args, keywords) = call_parts(node)?;

    let max_outsize = kwarg_usize(node, keywords, "max_outsize", 0)?;
    let is_delegate = kwarg_bool(node, keywords, "is_delegate_call", false)?;
    let is_static = kwarg_bool(node, keywords, "is_static_call", false)?;
    let revert_on_failure = kwarg_bool(node, keywords, "revert_on_failure", true)?;

    if is_delegate && is_static {
        return Err(CodegenError::argument(
            "Call may use one of `is_delegate_call` or `is_static_call`, not both",
            node.span,
        ));
    }
    if (is_delegate || is_static) && get_kwarg(keywords, "value").is_some() {
        return Err(CodegenError::argument(
            "value= may not be passed for static or delegate calls",
            node.span,
        ));
    }
    if !is_static {
        ctx.check_is_not_constant("make a modifying call", node.span)?;
    }

    let to = ctx.lower_value(&args[0])?;

    // msg.data forwards the whole calldata without a length prefix
    let data_node = &args[1];
    let (data_ptr, data_len): (IROperand, IROperand) = if is_msg_data(data_node) {
        let dst = ctx.builder.msize();
        let len = ctx.builder.calldatasize();
        ctx.builder.calldatacopy(len, 0u64, dst);
        (dst.into(), len.into())
    } else {
        let vv = ctx.lower_expr(data_node)?;
        let data = ctx.unwrap(&vv)?;
        let len = ctx.builder.mload(data.clone());
        let ptr = ctx.builder.add(data, 32u64);
        (ptr.into(), len.into())
    };

    let gas: IROperand = match get_kwarg(keywords, "gas") {
        Some(g) => ctx.lower_value(g)?,
        None => ctx.builder.gas().into(),
    };
    let value: IROperand = match get_kwarg(keywords, "value") {
        Some(v) => ctx.lower_value(v)?,
        None => IROperand::literal(0),
    };

    let out_val = if max_outsize > 0 {
        Some(ctx.new_temporary_value(&bytes_t(max_outsize)))
    } else {
        None
    };
    let out_ptr: IROperand = match &out_val {
        Some(out) => ctx.builder.add(out.operand(), 32u64).into(),
        None => IROperand::literal(0),
    };

    let success = if is_delegate {
        ctx.builder
            .delegatecall(gas, to, data_ptr, data_len, out_ptr, max_outsize)
    } else if is_static {
        ctx.builder
            .staticcall(gas, to, data_ptr, data_len, out_ptr, max_outsize)
    } else {
        ctx.builder
            .call(gas, to, value, data_ptr, data_len, out_ptr, max_outsize)
    };

    if revert_on_failure {
        ctx.bubble_revert(success.into());
        if let Some(out) = out_val {
            store_truncated_length(ctx, &out, max_outsize)?;
            return Ok(out);
        }
        return Ok(VyperValue::from_stack_op(0u64, node.ty.clone()));
    }

    if let Some(out) = out_val {
        store_truncated_length(ctx, &out, max_outsize)?;

        // (success, data) with the bytes inline after the flag
        let tuple_ty = VyperType::Tuple {
            members: vec![UINT256, bytes_t(max_outsize)],
        };
        let pair = ctx.new_temporary_value(&tuple_ty);
        ctx.builder.mstore(success, pair.operand());
        let bytes_dst = ctx.builder.add(pair.operand(), 32u64);
        ctx.copy_memory(
            bytes_dst,
            out.operand(),
            bytes_t(max_outsize).memory_bytes_required(),
        );
        return Ok(pair);
    }
    Ok(VyperValue::from_stack_op(success, node.ty.clone()))
}

/// Writes `min(returndatasize, max_outsize)` as the output length.
fn store_truncated_length(
    ctx: &mut CodegenContext,
    out: &VyperValue,
    max_outsize: usize,
) -> CodegenResult<()> {
    let b = &mut ctx.builder;
    let ret_size = b.returndatasize();
    let fits = b.lt(ret_size, max_outsize);
    let capped = b.select(fits, ret_size, IROperand::from(max_outsize));
    b.mstore(capped, out.operand());
    Ok(())
}

/// `send(to, value, gas=0)`: a bare value transfer with asserted
/// success. The zero default leaves only the 2300 stipend.
fn lower_send(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    ctx.check_is_not_constant("send ether", node.span)?;
    let (args, keywords) = call_parts(node)?;
    let to = ctx.lower_value(&args[0])?;
    let value = ctx.lower_value(&args[1])?;
    let gas: IROperand = match get_kwarg(keywords, "gas") {
        Some(g) => ctx.lower_value(g)?,
        None => IROperand::literal(0),
    };

    let success = ctx
        .builder
        .call(gas, to, value, 0u64, 0u64, 0u64, 0u64);
    ctx.builder.assert_(success);
    Ok(VyperValue::from_stack_op(0u64, node.ty.clone()))
}

/// `raw_log(topics, data)` with a compile-time-fixed topic list.
fn lower_raw_log(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    ctx.check_is_not_constant("use raw_log", node.span)?;
    let (args, _) = call_parts(node)?;

    let topics_node = args[0].reduced();
    let ExprKind::List { elements } = &topics_node.kind else {
        return Err(CodegenError::argument(
            "raw_log topics must be a literal list",
            node.span,
        ));
    };
    let topics: Vec<IROperand> = elements
        .iter()
        .map(|t| ctx.lower_value(t))
        .collect::<CodegenResult<_>>()?;
    if topics.len() > 4 {
        return Err(CodegenError::argument("raw_log takes at most 4 topics", node.span));
    }

    let data_node = &args[1];
    let (data_ptr, data_len): (IROperand, IROperand) = match &data_node.ty {
        VyperType::BytesM(32) => {
            let val = ctx.lower_value(data_node)?;
            let buf = ctx.allocate_buffer(32, Some("raw_log_data"));
            let ptr = buf.base_ptr().operand;
            ctx.builder.mstore(val, ptr.clone());
            (ptr, IROperand::literal(32))
        }
        _ => {
            let vv = ctx.lower_expr(data_node)?;
            let data = ctx.unwrap(&vv)?;
            let len = ctx.builder.mload(data.clone());
            let ptr = ctx.builder.add(data, 32u64);
            (ptr.into(), len.into())
        }
    };

    ctx.builder.log(topics.len(), data_ptr, data_len, &topics);
    Ok(VyperValue::from_stack_op(0u64, node.ty.clone()))
}

/// `raw_revert(data)`: terminal, reverts with the raw payload.
fn lower_raw_revert(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    let (args, _) = call_parts(node)?;
    let vv = ctx.lower_expr(&args[0])?;
    let data = ctx.unwrap(&vv)?;
    let len = ctx.builder.mload(data.clone());
    let ptr = ctx.builder.add(data, 32u64);
    ctx.builder.revert(len, ptr);
    Ok(VyperValue::from_stack_op(0u64, node.ty.clone()))
}

/// `selfdestruct(to)`: terminal.
fn lower_selfdestruct(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    ctx.check_is_not_constant("selfdestruct", node.span)?;
    let (args, _) = call_parts(node)?;
    let to = ctx.lower_value(&args[0])?;
    ctx.builder.selfdestruct(to);
    Ok(VyperValue::from_stack_op(0u64, node.ty.clone()))
}

fn lower_blockhash(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    let (args, _) = call_parts(node)?;
    let number = ctx.lower_value(&args[0])?;
    let result = ctx.builder.blockhash(number);
    Ok(VyperValue::from_stack_op(result, node.ty.clone()))
}

fn lower_blobhash(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    let (args, _) = call_parts(node)?;
    let index = ctx.lower_value(&args[0])?;
    let result = ctx.builder.blobhash(index);
    Ok(VyperValue::from_stack_op(result, node.ty.clone()))
}
