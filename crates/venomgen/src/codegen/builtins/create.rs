//! Contract creation built-ins.
//!
//! `raw_create` deploys caller-supplied initcode, optionally with
//! ABI-encoded constructor arguments appended. The other three
//! synthesize initcode: the EIP-1167 minimal proxy, an initcode preamble
//! that clones a deployed contract, and the EIP-5202 blueprint pattern.
//! All accept `value=`, `salt=` (switching to CREATE2), and
//! `revert_on_failure=`.

use num_bigint::{BigInt, Sign};

use super::{call_parts, get_kwarg, kwarg_bool, kwarg_usize, BuiltinHandler};
use crate::{
    ast::{ExprNode, Keyword},
    codegen::{abi::abi_encode_to_buf, context::CodegenContext, value::VyperValue},
    errors::{CodegenError, CodegenResult},
    types::{DataLocation, VyperType},
    venom::{IROperand, IRVariable},
};

pub(super) const HANDLERS: &[(&str, BuiltinHandler)] = &[
    ("raw_create", lower_raw_create),
    ("create_minimal_proxy_to", lower_create_minimal_proxy_to),
    // deprecated alias
    ("create_forwarder_to", lower_create_minimal_proxy_to),
    ("create_copy_of", lower_create_copy_of),
    ("create_from_blueprint", lower_create_from_blueprint),
];

// EIP-1167: loader (9 bytes) | forwarder prefix (10 bytes, ends in
// PUSH20) | target address | forwarder suffix (15 bytes)
const EIP1167_LOADER: [u8; 9] = [0x60, 0x2d, 0x3d, 0x81, 0x60, 0x09, 0x3d, 0x39, 0xf3];
const EIP1167_FORWARDER_PRE: [u8; 10] =
    [0x36, 0x3d, 0x3d, 0x37, 0x3d, 0x3d, 0x3d, 0x36, 0x3d, 0x73];
const EIP1167_FORWARDER_POST: [u8; 15] = [
    0x5a, 0xf4, 0x3d, 0x82, 0x80, 0x3e, 0x90, 0x3d, 0x91, 0x60, 0x2b, 0x57, 0xfd, 0x5b, 0xf3,
];

// initcode preamble for create_copy_of: PUSH3 <codesize> RETURNDATASIZE
// DUP2 PUSH1 0x0b RETURNDATASIZE CODECOPY RETURN; the codesize bytes are
// OR-ed in at runtime
const COPY_PREAMBLE: [u8; 11] =
    [0x62, 0x00, 0x00, 0x00, 0x3d, 0x81, 0x60, 0x0b, 0x3d, 0x39, 0xf3];

/// Bytes left-aligned in a 32-byte word.
fn word_left_aligned(bytes: &[u8]) -> BigInt {
    debug_assert!(bytes.len() <= 32);
    let mut word = [0u8; 32];
    word[..bytes.len()].copy_from_slice(bytes);
    BigInt::from_bytes_be(Sign::Plus, &word)
}

struct CreateKwargs {
    value: IROperand,
    salt_node: Option<ExprNode>,
    revert_on_failure: bool,
}

fn parse_create_kwargs(
    ctx: &mut CodegenContext,
    node: &ExprNode,
    keywords: &[Keyword],
) -> CodegenResult<CreateKwargs> {
    let value = match get_kwarg(keywords, "value") {
        Some(v) => ctx.lower_value(v)?,
        None => IROperand::literal(0),
    };
    Ok(CreateKwargs {
        value,
        salt_node: get_kwarg(keywords, "salt").cloned(),
        revert_on_failure: kwarg_bool(node, keywords, "revert_on_failure", true)?,
    })
}

/// CREATE with CREATE2 selected by the presence of a salt.
fn emit_create(
    ctx: &mut CodegenContext,
    value: IROperand,
    offset: IROperand,
    size: IROperand,
    salt: Option<IROperand>,
) -> IRVariable {
    match salt {
        Some(salt) => ctx.builder.create2(value, offset, size, salt),
        None => ctx.builder.create(value, offset, size),
    }
}

/// CREATE yields the zero address when the deployment fails; bubble the
/// constructor's revert data unless the caller opted out.
fn check_create_result(
    ctx: &mut CodegenContext,
    addr: IRVariable,
    revert_on_failure: bool,
) -> IRVariable {
    if revert_on_failure {
        ctx.bubble_revert(addr.into());
    }
    addr
}

/// `raw_create(bytecode, *ctor_args, ...)`.
fn lower_raw_create(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    ctx.check_is_not_constant("use raw_create", node.span)?;
    let (args, keywords) = call_parts(node)?;
    let bytecode_node = &args[0];
    let ctor_args = &args[1..];
    let VyperType::Bytes { maxlen: bytecode_bound } = bytecode_node.ty else {
        return Err(CodegenError::type_check_at("raw_create initcode must be Bytes", node.span));
    };

    // the initcode always moves into a fresh buffer first: evaluating
    // value, salt, or constructor arguments may mutate whatever location
    // currently holds it
    let bytecode_vv = ctx.lower_expr(bytecode_node)?;
    let staged = ctx.new_temporary_value(&bytecode_node.ty);
    match bytecode_vv.location() {
        Some(loc @ (DataLocation::Storage | DataLocation::Transient)) => {
            ctx.slot_to_memory(
                bytecode_vv.operand(),
                staged.operand(),
                bytecode_node.ty.storage_size_in_words(),
                loc,
            )?;
        }
        _ => {
            let src = ctx.unwrap(&bytecode_vv)?;
            let len = ctx.builder.mload(src.clone());
            let copy_size = ctx.builder.add(len, 32u64);
            ctx.copy_memory_dynamic(staged.operand(), src, copy_size);
        }
    }
    let bytecode = staged.operand();

    let kwargs = parse_create_kwargs(ctx, node, keywords)?;

    let bytecode_len = ctx.builder.mload(bytecode.clone());
    let bytecode_ptr = ctx.builder.add(bytecode.clone(), 32u64);

    if ctor_args.is_empty() {
        let salt = kwargs
            .salt_node
            .as_ref()
            .map(|s| ctx.lower_value(s))
            .transpose()?;
        let addr = emit_create(
            ctx,
            kwargs.value,
            bytecode_ptr.into(),
            bytecode_len.into(),
            salt,
        );
        let addr = check_create_result(ctx, addr, kwargs.revert_on_failure);
        return Ok(VyperValue::from_stack_op(addr, node.ty.clone()));
    }

    // append ABI-encoded constructor arguments after the initcode
    let ctor_tuple_ty = VyperType::Tuple {
        members: ctor_args.iter().map(|a| a.ty.clone()).collect(),
    };
    let ctor_abi_size = ctor_tuple_ty.abi_type().size_bound();

    let buf = ctx.allocate_buffer(
        crate::types::ceil32(bytecode_bound + ctor_abi_size),
        Some("raw_create_buf"),
    );
    let buf_ptr = buf.base_ptr().operand;
    ctx.copy_memory_dynamic(buf_ptr.clone(), bytecode_ptr, bytecode_len);

    let staged_args = ctx.new_temporary_value(&ctor_tuple_ty);
    let args_base = staged_args.operand();
    let mut offset = 0usize;
    for arg in ctor_args {
        let vv = ctx.lower_expr(arg)?;
        let dst = if offset == 0 {
            args_base.clone()
        } else {
            ctx.builder.add(args_base.clone(), offset).into()
        };
        ctx.store_memory(&vv, dst, &arg.ty)?;
        offset += arg.ty.memory_bytes_required();
    }

    let args_start = ctx.builder.add(buf_ptr.clone(), bytecode_len);
    let args_len = abi_encode_to_buf(ctx, args_start.into(), &args_base, &ctor_tuple_ty)?;
    let total_len = ctx.builder.add(bytecode_len, args_len);

    let salt = kwargs
        .salt_node
        .as_ref()
        .map(|s| ctx.lower_value(s))
        .transpose()?;
    let addr = emit_create(ctx, kwargs.value, buf_ptr, total_len.into(), salt);
    let addr = check_create_result(ctx, addr, kwargs.revert_on_failure);
    Ok(VyperValue::from_stack_op(addr, node.ty.clone()))
}

/// `create_minimal_proxy_to(target, ...)`: 54 bytes of initcode around
/// the target address, deploying the 45-byte EIP-1167 runtime.
fn lower_create_minimal_proxy_to(
    ctx: &mut CodegenContext,
    node: &ExprNode,
) -> CodegenResult<VyperValue> {
    ctx.check_is_not_constant("use create_minimal_proxy_to", node.span)?;
    let (args, keywords) = call_parts(node)?;
    let target = ctx.lower_value(&args[0])?;
    let kwargs = parse_create_kwargs(ctx, node, keywords)?;

    let preamble_length = EIP1167_LOADER.len() + EIP1167_FORWARDER_PRE.len();
    let buf_len = preamble_length + 20 + EIP1167_FORWARDER_POST.len();

    let mut preamble = [0u8; 19];
    preamble[..9].copy_from_slice(&EIP1167_LOADER);
    preamble[9..].copy_from_slice(&EIP1167_FORWARDER_PRE);
    let forwarder_preamble = word_left_aligned(&preamble);
    let forwarder_post = word_left_aligned(&EIP1167_FORWARDER_POST);

    // three overlapping word stores build the 54-byte image
    let buf = ctx.allocate_buffer(96, Some("proxy_buf"));
    let buf_ptr = buf.base_ptr().operand;
    ctx.builder.mstore(forwarder_preamble, buf_ptr.clone());
    let aligned_target = ctx.builder.shl(96u64, target);
    let target_dst = ctx.builder.add(buf_ptr.clone(), preamble_length);
    ctx.builder.mstore(aligned_target, target_dst);
    let post_dst = ctx.builder.add(buf_ptr.clone(), preamble_length + 20);
    ctx.builder.mstore(forwarder_post, post_dst);

    let salt = kwargs
        .salt_node
        .as_ref()
        .map(|s| ctx.lower_value(s))
        .transpose()?;
    let addr = emit_create(
        ctx,
        kwargs.value,
        buf_ptr,
        IROperand::from(buf_len),
        salt,
    );
    let addr = check_create_result(ctx, addr, kwargs.revert_on_failure);
    Ok(VyperValue::from_stack_op(addr, node.ty.clone()))
}

/// `create_copy_of(target, ...)`: initcode that codecopies the target's
/// runtime code behind an 11-byte preamble and returns it.
fn lower_create_copy_of(ctx: &mut CodegenContext, node: &ExprNode) -> CodegenResult<VyperValue> {
    ctx.check_is_not_constant("use create_copy_of", node.span)?;
    let (args, keywords) = call_parts(node)?;
    let target = ctx.lower_value(&args[0])?;
    let kwargs = parse_create_kwargs(ctx, node, keywords)?;

    // salt may allocate; it must be evaluated before msize() pins the
    // initcode staging area
    let salt = kwargs
        .salt_node
        .as_ref()
        .map(|s| ctx.lower_value(s))
        .transpose()?;

    let codesize = ctx.builder.extcodesize(target.clone());
    ctx.builder.assert_(codesize);

    let preamble_len = COPY_PREAMBLE.len();
    let preamble_base = BigInt::from_bytes_be(Sign::Plus, &COPY_PREAMBLE);
    // the codesize slots directly after the PUSH3 opcode
    let shl_bits = (preamble_len - 4) * 8;
    let shifted_codesize = ctx.builder.shl(shl_bits, codesize);
    let preamble_with_size = ctx.builder.or(preamble_base, shifted_codesize);

    let mem_ofst = ctx.builder.msize();
    ctx.builder.mstore(preamble_with_size, mem_ofst);
    // the preamble is right-aligned in that word, so code starts one
    // word in and the image starts 21 bytes in
    let code_dest = ctx.builder.add(mem_ofst, 32u64);
    ctx.builder
        .extcodecopy(target, codesize, 0u64, code_dest);
    let buf = ctx.builder.add(mem_ofst, 32 - preamble_len);
    let buf_len = ctx.builder.add(codesize, preamble_len);

    let addr = emit_create(ctx, kwargs.value, buf.into(), buf_len.into(), salt);
    let addr = check_create_result(ctx, addr, kwargs.revert_on_failure);
    Ok(VyperValue::from_stack_op(addr, node.ty.clone()))
}

/// `create_from_blueprint(target, *ctor_args, raw_args=False,
/// code_offset=3, ...)`: strip the EIP-5202 preamble from the blueprint
/// code and append constructor arguments.
fn lower_create_from_blueprint(
    ctx: &mut CodegenContext,
    node: &ExprNode,
) -> CodegenResult<VyperValue> {
    ctx.check_is_not_constant("use create_from_blueprint", node.span)?;
    let (args, keywords) = call_parts(node)?;
    let target = ctx.lower_value(&args[0])?;
    let ctor_args = &args[1..];
    let kwargs = parse_create_kwargs(ctx, node, keywords)?;
    let raw_args = kwarg_bool(node, keywords, "raw_args", false)?;
    let code_offset = kwarg_usize(node, keywords, "code_offset", 3)?;

    let salt = kwargs
        .salt_node
        .as_ref()
        .map(|s| ctx.lower_value(s))
        .transpose()?;

    let full_codesize = ctx.builder.extcodesize(target.clone());
    let codesize = ctx.builder.sub(full_codesize, code_offset);
    // sgt, since the subtraction underflows when the preamble claim
    // exceeds the actual code
    let has_code = ctx.builder.sgt(codesize, 0u64);
    ctx.builder.assert_(has_code);

    // every allocation, including argument encoding, must precede the
    // msize() that pins the initcode staging area
    let (args_ptr, args_len): (IROperand, IROperand) = if raw_args {
        if ctor_args.len() != 1 {
            return Err(CodegenError::argument(
                "raw_args requires exactly one Bytes argument",
                node.span,
            ));
        }
        let raw_vv = ctx.lower_expr(&ctor_args[0])?;
        let raw = ctx.unwrap(&raw_vv)?;
        let len = ctx.builder.mload(raw.clone());
        let ptr = ctx.builder.add(raw, 32u64);
        (ptr.into(), len.into())
    } else if ctor_args.is_empty() {
        (IROperand::literal(0), IROperand::literal(0))
    } else {
        let ctor_tuple_ty = VyperType::Tuple {
            members: ctor_args.iter().map(|a| a.ty.clone()).collect(),
        };
        let bound = ctor_tuple_ty.abi_type().size_bound();
        let args_buf = ctx.allocate_buffer(crate::types::ceil32(bound), Some("ctor_args_buf"));

        let staged = ctx.new_temporary_value(&ctor_tuple_ty);
        let base = staged.operand();
        let mut offset = 0usize;
        for arg in ctor_args {
            let vv = ctx.lower_expr(arg)?;
            let dst = if offset == 0 {
                base.clone()
            } else {
                ctx.builder.add(base.clone(), offset).into()
            };
            ctx.store_memory(&vv, dst, &arg.ty)?;
            offset += arg.ty.memory_bytes_required();
        }
        let args_ptr = args_buf.base_ptr().operand;
        let len = abi_encode_to_buf(ctx, args_ptr.clone(), &base, &ctor_tuple_ty)?;
        (args_ptr, len)
    };

    let mem_ofst = ctx.builder.msize();
    ctx.builder
        .extcodecopy(target, codesize, code_offset, mem_ofst);

    let statically_empty = args_len.as_literal().is_some_and(crate::venom::IRLiteral::is_zero);
    let total_len: IROperand = if statically_empty {
        codesize.into()
    } else {
        let args_dest = ctx.builder.add(mem_ofst, codesize);
        ctx.copy_memory_dynamic(args_dest, args_ptr, args_len.clone());
        ctx.builder.add(codesize, args_len).into()
    };

    let addr = emit_create(ctx, kwargs.value, mem_ofst.into(), total_len, salt);
    let addr = check_create_result(ctx, addr, kwargs.revert_on_failure);
    Ok(VyperValue::from_stack_op(addr, node.ty.clone()))
}
