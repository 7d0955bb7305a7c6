//! The module driver.
//!
//! Produces the two compilation units handed to the backend assembler:
//! the runtime context, whose entry function carries the selector
//! section and every external function body (internal functions become
//! separate IR functions), and the deploy context, which runs the
//! constructor and returns the runtime blob plus the immutable section.

use crate::{
    ast::{FunctionDef, Module, StateMutability},
    codegen::{
        abi::abi_decode_to_buf,
        abi::abi_encode_to_buf,
        calls::calculate_type_for_external_return,
        context::{CodegenContext, Constancy},
        value::{Buffer, Ptr},
    },
    errors::CodegenResult,
    settings::Settings,
    types::{ceil32, DataLocation, VyperType},
    venom::{DataItem, IRContext, IRFunction, IRLabel, IROperand, VenomBuilder},
};

/// Label of the entry function in both contexts.
pub const MAIN_ENTRY_LABEL: &str = "__main_entry";

/// Data-section label marking the runtime code blob in the deploy
/// context.
pub const RUNTIME_BEGIN_LABEL: &str = "runtime_begin";
/// Data-section label marking the end of the runtime code blob.
pub const RUNTIME_END_LABEL: &str = "runtime_end";
/// Data-section label marking the end of deploy code; constructor
/// arguments are appended past it.
pub const CODE_END_LABEL: &str = "code_end";

/// Generates Venom IR for an analyzed module.
///
/// Returns `(deploy_ctx, runtime_ctx)`: separate contexts for deployment
/// and runtime code.
pub fn generate_venom(
    module: &Module,
    settings: &Settings,
) -> CodegenResult<(IRContext, IRContext)> {
    let deploy = generate_deploy(module, settings)?;
    let runtime = generate_runtime(module, settings)?;
    Ok((deploy, runtime))
}

fn generate_runtime(module: &Module, settings: &Settings) -> CodegenResult<IRContext> {
    let mut ir = IRContext::new();

    {
        let func = IRFunction::new(IRLabel::new(MAIN_ENTRY_LABEL));
        let builder = VenomBuilder::new(&mut ir, func);
        let mut ctx = CodegenContext::new(module, *settings, builder);
        lower_selector_section(&mut ctx)?;
        ctx.builder.finish();
    }

    for function in module.internal_functions() {
        let func = IRFunction::new(IRLabel::new(function.internal_label()));
        let builder = VenomBuilder::new(&mut ir, func);
        let mut ctx = CodegenContext::new(module, *settings, builder);
        lower_internal_function(&mut ctx, function)?;
        ctx.builder.finish();
    }

    ir.entry_function = Some(IRLabel::new(MAIN_ENTRY_LABEL));
    Ok(ir)
}

/// The selector section: load the first calldata word, shift down to the
/// 4-byte selector, and chain equality checks in declaration order.
/// Short calldata and unmatched selectors fall through to `__default__`
/// or revert.
fn lower_selector_section(ctx: &mut CodegenContext) -> CodegenResult<()> {
    let externals: Vec<FunctionDef> = ctx.module.external_functions().cloned().collect();
    let fallback_bb = ctx.builder.create_block("fallback");

    if externals.is_empty() {
        ctx.builder.jmp(ctx.builder.block_label(fallback_bb));
    } else {
        let dispatch_bb = ctx.builder.create_block("selector_section");
        let calldatasize = ctx.builder.calldatasize();
        let too_small = ctx.builder.lt(calldatasize, 4u64);
        ctx.builder.jnz(
            too_small,
            ctx.builder.block_label(fallback_bb),
            ctx.builder.block_label(dispatch_bb),
        );

        ctx.builder.append_block(dispatch_bb);
        ctx.builder.set_block(dispatch_bb);
        let word = ctx.builder.calldataload(0u64);
        let selector = ctx.builder.shr(224u64, word);

        let mut bodies = Vec::with_capacity(externals.len());
        for function in &externals {
            let body_bb = ctx.builder.create_block(&function.name);
            let next_bb = ctx.builder.create_block("check_next");
            let hit = ctx.builder.eq(selector, u64::from(function.selector()));
            ctx.builder.jnz(
                hit,
                ctx.builder.block_label(body_bb),
                ctx.builder.block_label(next_bb),
            );
            ctx.builder.append_block(next_bb);
            ctx.builder.set_block(next_bb);
            bodies.push(body_bb);
        }
        ctx.builder.jmp(ctx.builder.block_label(fallback_bb));

        for (function, body_bb) in externals.iter().zip(bodies) {
            ctx.builder.append_block(body_bb);
            ctx.builder.set_block(body_bb);
            lower_external_function(ctx, function)?;
        }
    }

    ctx.builder.append_block(fallback_bb);
    ctx.builder.set_block(fallback_bb);
    match ctx.module.fallback().cloned() {
        Some(fallback) => lower_external_function(ctx, &fallback)?,
        None => ctx.builder.revert(0u64, 0u64),
    }
    Ok(())
}

/// One external function: payability guard, calldata decode, body, and
/// the return epilogue that ABI-encodes into the output buffer.
fn lower_external_function(ctx: &mut CodegenContext, function: &FunctionDef) -> CodegenResult<()> {
    ctx.func = Some(function.clone());
    ctx.constancy = if function.mutability.is_constant() {
        Constancy::Constant
    } else {
        Constancy::Mutable
    };
    ctx.is_ctor_context = false;

    ctx.block_scope(|ctx| {
        if function.mutability != StateMutability::Payable {
            let callvalue = ctx.builder.callvalue();
            let no_value = ctx.builder.iszero(callvalue);
            ctx.builder.assert_(no_value);
        }

        if !function.args.is_empty() {
            decode_function_args(ctx, function)?;
        }

        let return_bb = ctx.builder.create_block("ret");
        ctx.return_label = Some(return_bb);
        ctx.return_buffer = function.return_type.as_ref().map(|ret_ty| {
            ctx.allocate_buffer(ret_ty.memory_bytes_required(), Some("return_buffer"))
        });

        ctx.lower_body(&function.body)?;
        if !ctx.builder.is_terminated() {
            ctx.builder.jmp(ctx.builder.block_label(return_bb));
        }

        ctx.builder.append_block(return_bb);
        ctx.builder.set_block(return_bb);
        match (&function.return_type, ctx.return_buffer.clone()) {
            (Some(ret_ty), Some(buf)) => {
                // the one-tuple wrapping shares the element's memory
                // layout, so the return buffer doubles as encoder input
                let wrapped = calculate_type_for_external_return(ret_ty);
                let bound = wrapped.abi_type().size_bound();
                let out = ctx.allocate_buffer(ceil32(bound), Some("return_abi"));
                let out_ptr = out.base_ptr().operand;
                let len = abi_encode_to_buf(
                    ctx,
                    out_ptr.clone(),
                    &buf.base_ptr().operand,
                    &wrapped,
                )?;
                ctx.builder.return_(len, out_ptr);
            }
            _ => ctx.builder.stop(),
        }

        ctx.return_label = None;
        ctx.return_buffer = None;
        Ok(())
    })
}

/// ABI-decodes the calldata arguments into one tuple buffer and
/// registers each argument as a read-only variable pointing into it.
fn decode_function_args(ctx: &mut CodegenContext, function: &FunctionDef) -> CodegenResult<()> {
    let args_tuple_ty = VyperType::Tuple {
        members: function.args.iter().map(|a| a.ty.clone()).collect(),
    };
    let abi_t = args_tuple_ty.abi_type();

    let calldatasize = ctx.builder.calldatasize();
    let payload = ctx.builder.sub(calldatasize, 4u64);
    let b = &mut ctx.builder;
    let too_small = b.lt(payload, abi_t.min_size());
    let ge_min = b.iszero(too_small);
    b.assert_(ge_min);

    let buf = ctx.new_internal_variable(&args_tuple_ty);
    let src = Ptr::non_memory(IROperand::literal(4), DataLocation::Calldata);
    abi_decode_to_buf(
        ctx,
        &buf.base_ptr().operand,
        &src,
        &args_tuple_ty,
        &calldatasize.into(),
    )?;

    let base = buf.base_var();
    let mut offset = 0usize;
    for arg in &function.args {
        let size = arg.ty.memory_bytes_required();
        let ptr_var = if offset == 0 {
            base
        } else {
            ctx.builder.add(base, offset)
        };
        let arg_buf = Buffer::new(ptr_var, size, Some(arg.name.clone()));
        ctx.register_variable(&arg.name, arg.ty.clone(), arg_buf, false, false);
        offset += size;
    }
    Ok(())
}

/// One internal function: `param` formals, body, and a `ret` epilogue.
/// Compound returns copy into the caller-provided output pointer, which
/// arrives as a trailing parameter.
fn lower_internal_function(ctx: &mut CodegenContext, function: &FunctionDef) -> CodegenResult<()> {
    ctx.func = Some(function.clone());
    ctx.constancy = if function.mutability.is_constant() {
        Constancy::Constant
    } else {
        Constancy::Mutable
    };
    ctx.is_ctor_context = false;

    ctx.block_scope(|ctx| {
        let params: Vec<_> = function.args.iter().map(|_| ctx.builder.param()).collect();
        let compound_return = function
            .return_type
            .as_ref()
            .is_some_and(|t| !t.is_prim_word());
        let out_param = compound_return.then(|| ctx.builder.param());

        for (arg, param) in function.args.iter().zip(params) {
            if arg.ty.is_prim_word() {
                let buf = ctx.new_variable(&arg.name, &arg.ty, false);
                ctx.builder.mstore(param, buf.base_ptr().operand);
            } else {
                // the parameter is a pointer into the caller's staging
                // region
                let buf = Buffer::new(param, arg.ty.memory_bytes_required(), Some(arg.name.clone()));
                ctx.register_variable(&arg.name, arg.ty.clone(), buf, false, false);
            }
        }

        let return_bb = ctx.builder.create_block("ret");
        ctx.return_label = Some(return_bb);
        ctx.return_buffer = function.return_type.as_ref().map(|ret_ty| {
            ctx.allocate_buffer(ret_ty.memory_bytes_required(), Some("return_buffer"))
        });

        ctx.lower_body(&function.body)?;
        if !ctx.builder.is_terminated() {
            ctx.builder.jmp(ctx.builder.block_label(return_bb));
        }

        ctx.builder.append_block(return_bb);
        ctx.builder.set_block(return_bb);
        match (&function.return_type, ctx.return_buffer.clone(), out_param) {
            (Some(ret_ty), Some(buf), None) => {
                debug_assert!(ret_ty.is_prim_word());
                let val = ctx.builder.mload(buf.base_ptr().operand);
                ctx.builder.ret([IROperand::Variable(val)]);
            }
            (Some(ret_ty), Some(buf), Some(out)) => {
                ctx.copy_memory(out, buf.base_ptr().operand, ret_ty.memory_bytes_required());
                ctx.builder.ret([]);
            }
            _ => ctx.builder.ret([]),
        }

        ctx.return_label = None;
        ctx.return_buffer = None;
        Ok(())
    })
}

fn generate_deploy(module: &Module, settings: &Settings) -> CodegenResult<IRContext> {
    let mut ir = IRContext::new();

    {
        let func = IRFunction::new(IRLabel::new(MAIN_ENTRY_LABEL));
        let builder = VenomBuilder::new(&mut ir, func);
        let mut ctx = CodegenContext::new(module, *settings, builder);

        if let Some(ctor) = module.constructor().cloned() {
            lower_constructor(&mut ctx, &ctor)?;
        }
        lower_deploy_epilogue(&mut ctx, module.immutables_size);
        ctx.builder.finish();
    }

    ir.add_data(IRLabel::new(RUNTIME_BEGIN_LABEL), DataItem::RuntimeCode);
    ir.add_data(IRLabel::new(RUNTIME_END_LABEL), DataItem::Blob(vec![]));
    ir.add_data(IRLabel::new(CODE_END_LABEL), DataItem::Blob(vec![]));
    ir.entry_function = Some(IRLabel::new(MAIN_ENTRY_LABEL));
    Ok(ir)
}

fn lower_constructor(ctx: &mut CodegenContext, ctor: &FunctionDef) -> CodegenResult<()> {
    ctx.func = Some(ctor.clone());
    ctx.constancy = Constancy::Mutable;
    ctx.is_ctor_context = true;

    ctx.block_scope(|ctx| {
        if ctor.mutability != StateMutability::Payable {
            let callvalue = ctx.builder.callvalue();
            let no_value = ctx.builder.iszero(callvalue);
            ctx.builder.assert_(no_value);
        }

        if !ctor.args.is_empty() {
            decode_constructor_args(ctx, ctor)?;
        }

        let exit_bb = ctx.builder.create_block("ctor_exit");
        ctx.return_label = Some(exit_bb);
        ctx.lower_body(&ctor.body)?;
        if !ctx.builder.is_terminated() {
            ctx.builder.jmp(ctx.builder.block_label(exit_bb));
        }
        ctx.builder.append_block(exit_bb);
        ctx.builder.set_block(exit_bb);
        ctx.return_label = None;
        Ok(())
    })
}

/// Constructor arguments trail the initcode; locate them with the
/// `code_end` marker, copy them into memory, then ABI-decode.
fn decode_constructor_args(ctx: &mut CodegenContext, ctor: &FunctionDef) -> CodegenResult<()> {
    let args_tuple_ty = VyperType::Tuple {
        members: ctor.args.iter().map(|a| a.ty.clone()).collect(),
    };
    let abi_t = args_tuple_ty.abi_type();
    let (min_size, max_size) = (abi_t.min_size(), abi_t.size_bound());

    let args_ofst = ctx.builder.offset(IRLabel::new(CODE_END_LABEL), 0u64);
    let codesize = ctx.builder.codesize();
    let args_len = ctx.builder.sub(codesize, args_ofst);

    let b = &mut ctx.builder;
    let too_small = b.lt(args_len, min_size);
    let ge_min = b.iszero(too_small);
    let too_big = b.gt(args_len, max_size);
    let le_max = b.iszero(too_big);
    let ok = b.and(ge_min, le_max);
    b.assert_(ok);

    let staging = ctx.allocate_buffer(ceil32(max_size), Some("ctor_args_raw"));
    let staging_ptr = staging.base_ptr().operand;
    ctx.builder
        .codecopy(args_len, args_ofst, staging_ptr.clone());

    let buf = ctx.new_internal_variable(&args_tuple_ty);
    let hi = ctx.builder.add(staging_ptr.clone(), args_len);
    abi_decode_to_buf(
        ctx,
        &buf.base_ptr().operand,
        &staging.base_ptr(),
        &args_tuple_ty,
        &hi.into(),
    )?;

    let base = buf.base_var();
    let mut offset = 0usize;
    for arg in &ctor.args {
        let size = arg.ty.memory_bytes_required();
        let ptr_var = if offset == 0 {
            base
        } else {
            ctx.builder.add(base, offset)
        };
        let arg_buf = Buffer::new(ptr_var, size, Some(arg.name.clone()));
        ctx.register_variable(&arg.name, arg.ty.clone(), arg_buf, false, false);
        offset += size;
    }
    Ok(())
}

/// Copy the runtime blob to memory offset zero and return it together
/// with the immutable section, which the backend appends after the
/// copied code.
fn lower_deploy_epilogue(ctx: &mut CodegenContext, immutables_size: usize) {
    let src = ctx.builder.offset(IRLabel::new(RUNTIME_BEGIN_LABEL), 0u64);
    let end = ctx.builder.offset(IRLabel::new(RUNTIME_END_LABEL), 0u64);
    let size = ctx.builder.sub(end, src);
    ctx.builder.codecopy(size, src, 0u64);
    let ret_size: IROperand = if immutables_size > 0 {
        ctx.builder.add(size, immutables_size).into()
    } else {
        size.into()
    };
    ctx.builder.return_(ret_size, 0u64);
}
