//! String built-ins: `uint2str`.

use super::{call_parts, BuiltinHandler};
use crate::{
    ast::ExprNode,
    codegen::{
        context::CodegenContext,
        value::{Buffer, VyperValue},
    },
    errors::{CodegenError, CodegenResult},
    types::VyperType,
    venom::IROperand,
};

pub(super) const HANDLERS: &[(&str, BuiltinHandler)] = &[("uint2str", lower_uint2str)];

/// `uint2str(x) -> String[N]`.
///
/// Digits are peeled off right to left with `x % 10` and stored one byte
/// at a time walking backwards from the end of the buffer; the length
/// word is then written immediately before the first digit, so the
/// result pointer is computed rather than fixed. Zero is special-cased
/// to the single character `"0"`.
fn lower_uint2str(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    let (args, _) = call_parts(node)?;
    let val_input = ctx.lower_value(&args[0])?;

    let VyperType::String { maxlen } = &node.ty else {
        return Err(CodegenError::panic_at("uint2str output is not a string", node.span));
    };
    let n_digits = *maxlen;

    let out = ctx.new_temporary_value(&node.ty);
    let buf = out.operand();

    let b = &mut ctx.builder;
    let val = b.new_variable();
    b.assign_to(val_input, val);
    let i = b.new_variable();
    b.assign_to(IROperand::literal(0), i);
    // set in both exit paths below
    let result_ptr = b.new_variable();
    b.assign_to(buf.clone(), result_ptr);

    let check_zero = b.create_block("u2s_check");
    let loop_cond = b.create_block("u2s_cond");
    let loop_body = b.create_block("u2s_body");
    let handle_zero = b.create_block("u2s_zero");
    let finalize = b.create_block("u2s_final");
    let exit_block = b.create_block("u2s_exit");

    b.jmp(b.block_label(check_zero));

    b.append_block(check_zero);
    b.set_block(check_zero);
    let is_zero = b.eq(val, 0u64);
    b.jnz(is_zero, b.block_label(handle_zero), b.block_label(loop_cond));

    b.append_block(loop_cond);
    b.set_block(loop_cond);
    let done = b.eq(val, 0u64);
    b.jnz(done, b.block_label(finalize), b.block_label(loop_body));

    b.append_block(loop_body);
    b.set_block(loop_body);
    let digit = b.modulo(val, 10u64);
    let char_val = b.add(48u64, digit);
    // each store writes a whole word; the digit lands in its low byte at
    // buf + n_digits - i
    let upper = b.add(buf.clone(), n_digits);
    let pos = b.sub(upper, i);
    b.mstore(char_val, pos);
    let new_val = b.div(val, 10u64);
    b.assign_to(new_val, val);
    let new_i = b.add(i, 1u64);
    b.assign_to(new_i, i);
    b.jmp(b.block_label(loop_cond));

    b.append_block(handle_zero);
    b.set_block(handle_zero);
    let zero_data_pos = b.add(buf.clone(), n_digits);
    b.mstore(u64::from(b'0'), zero_data_pos);
    let upper = b.add(buf.clone(), n_digits);
    let zero_ptr = b.sub(upper, 1u64);
    b.mstore(1u64, zero_ptr);
    b.assign_to(zero_ptr, result_ptr);
    b.jmp(b.block_label(exit_block));

    b.append_block(finalize);
    b.set_block(finalize);
    let upper = b.add(buf.clone(), n_digits);
    let nonzero_ptr = b.sub(upper, i);
    b.mstore(i, nonzero_ptr);
    b.assign_to(nonzero_ptr, result_ptr);
    b.jmp(b.block_label(exit_block));

    b.append_block(exit_block);
    b.set_block(exit_block);

    let result_buf = Buffer::new(
        result_ptr,
        node.ty.memory_bytes_required(),
        Some("uint2str".to_owned()),
    );
    Ok(VyperValue::from_ptr(result_buf.base_ptr(), node.ty.clone()))
}
