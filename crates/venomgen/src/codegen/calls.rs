//! Internal and external call lowering, plus dynamic-array methods.
//!
//! Internal functions are reached via `invoke`: primitive arguments
//! travel on the stack, compound arguments through `calloca` staging
//! regions, and compound returns through a caller-allocated buffer whose
//! pointer is passed as a trailing argument.
//!
//! External calls marshal through the ABI codec: encode the argument
//! tuple behind a 4-byte selector, `call`/`staticcall`, bubble the
//! callee's revert data on failure, then size-validate and decode the
//! return data.

use crate::{
    ast::{ExprKind, ExprNode, ExternalMethod, Keyword},
    codegen::{
        abi::{abi_decode_to_buf, abi_encode_to_buf},
        context::CodegenContext,
        value::VyperValue,
    },
    errors::{CodegenError, CodegenResult},
    types::{ceil32, DataLocation, VyperType},
    venom::{IRLabel, IROperand},
};

/// The type actually crossing the ABI boundary on return: everything but
/// a tuple gets wrapped in a one-tuple.
#[must_use]
pub fn calculate_type_for_external_return(ty: &VyperType) -> VyperType {
    match ty {
        VyperType::Tuple { .. } => ty.clone(),
        other => VyperType::Tuple {
            members: vec![other.clone()],
        },
    }
}

fn find_kwarg<'n>(keywords: &'n [Keyword], name: &str) -> Option<&'n ExprNode> {
    keywords.iter().find(|kw| kw.arg == name).map(|kw| &kw.value)
}

impl CodegenContext<'_, '_> {
    pub(crate) fn lower_internal_call(
        &mut self,
        node: &ExprNode,
        function: &str,
    ) -> CodegenResult<VyperValue> {
        let ExprKind::Call { args, .. } = &node.kind else {
            return Err(CodegenError::panic_at("malformed call node", node.span));
        };
        let func = self
            .module
            .function(function)
            .ok_or_else(|| {
                CodegenError::panic_at(format!("unknown internal function {function}"), node.span)
            })?
            .clone();
        if args.len() != func.args.len() {
            return Err(CodegenError::panic_at(
                format!("arity mismatch calling {function}"),
                node.span,
            ));
        }

        let target = IRLabel::new(func.internal_label());
        let callsite = self.builder.fresh_label("callsite");

        let mut arg_ops: Vec<IROperand> = Vec::with_capacity(args.len() + 1);
        for (arg_node, formal) in args.iter().zip(&func.args) {
            if formal.ty.is_prim_word() {
                arg_ops.push(self.lower_value(arg_node)?);
            } else {
                // stage the compound argument in callee-visible memory
                let vv = self.lower_expr(arg_node)?;
                let src = self.unwrap(&vv)?;
                let size = formal.ty.memory_bytes_required();
                let staging = self.allocate_call_buffer(size, callsite.clone());
                self.copy_memory(staging, src, size);
                arg_ops.push(staging.into());
            }
        }

        match func.return_type.clone() {
            None => {
                self.builder.invoke(target, arg_ops, false);
                Ok(VyperValue::from_stack_op(0u64, node.ty.clone()))
            }
            Some(ret_ty) if ret_ty.is_prim_word() => {
                let out = self
                    .builder
                    .invoke(target, arg_ops, true)
                    .expect("invoke with returns yields a variable");
                Ok(VyperValue::from_stack_op(out, ret_ty))
            }
            Some(ret_ty) => {
                // compound return: caller owns the buffer
                let out = self.new_temporary_value(&ret_ty);
                arg_ops.push(out.operand());
                self.builder.invoke(target, arg_ops, false);
                Ok(out)
            }
        }
    }

    pub(crate) fn lower_external_call(
        &mut self,
        node: &ExprNode,
        target_expr: &ExprNode,
        method: &ExternalMethod,
    ) -> CodegenResult<VyperValue> {
        let ExprKind::Call { args, keywords, .. } = &node.kind else {
            return Err(CodegenError::panic_at("malformed call node", node.span));
        };
        let is_static = method.mutability.is_constant();
        if !is_static {
            self.check_is_not_constant("perform a state-changing external call", node.span)?;
        }

        // receiver first, then arguments, in source order
        let addr = self.lower_value(target_expr)?;

        let arg_tuple_ty = VyperType::Tuple {
            members: method.arg_types.clone(),
        };
        let args_src = if args.is_empty() {
            None
        } else {
            let tmp = self.new_temporary_value(&arg_tuple_ty);
            let base = tmp.operand();
            let mut offset = 0usize;
            for (arg_node, arg_ty) in args.iter().zip(&method.arg_types) {
                let vv = self.lower_expr(arg_node)?;
                let dst = if offset == 0 {
                    base.clone()
                } else {
                    IROperand::Variable(self.builder.add(base.clone(), offset))
                };
                self.store_memory(&vv, dst, arg_ty)?;
                offset += arg_ty.memory_bytes_required();
            }
            Some(tmp)
        };

        let value = match find_kwarg(keywords, "value") {
            Some(v) => {
                if is_static {
                    return Err(CodegenError::argument(
                        "value= may not be passed for static calls",
                        node.span,
                    ));
                }
                self.lower_value(v)?
            }
            None => IROperand::literal(0),
        };
        let gas = match find_kwarg(keywords, "gas") {
            Some(g) => self.lower_value(g)?,
            None => self.builder.gas().into(),
        };

        // calldata buffer: selector word, arguments at +4
        let abi_bound = arg_tuple_ty.abi_type().size_bound();
        let buf = self.allocate_buffer(32 + ceil32(abi_bound), Some("extcall_args"));
        let buf_ptr = buf.base_ptr().operand;
        let selector_word = num_bigint::BigInt::from(method.selector()) << 224;
        self.builder.mstore(selector_word, buf_ptr.clone());
        let args_len: IROperand = match &args_src {
            Some(tmp) => {
                let dst = self.builder.add(buf_ptr.clone(), 4u64);
                abi_encode_to_buf(self, dst.into(), &tmp.operand(), &arg_tuple_ty)?
            }
            None => IROperand::literal(0),
        };
        let total_len: IROperand = match args_len.as_literal() {
            Some(lit) => IROperand::literal(lit.to_signed() + 4),
            None => self.builder.add(args_len, 4u64).into(),
        };

        // return buffer sized to the wrapped return type
        let ret_info = method.return_type.as_ref().map(|ret_ty| {
            let wrapped = calculate_type_for_external_return(ret_ty);
            let abi_t = wrapped.abi_type();
            (ret_ty.clone(), wrapped, abi_t.min_size(), abi_t.size_bound())
        });
        let ret_buf = ret_info
            .as_ref()
            .map(|(_, _, _, bound)| self.allocate_buffer(ceil32(*bound), Some("extcall_ret")));
        let (ret_ptr, ret_bound): (IROperand, usize) = match (&ret_buf, &ret_info) {
            (Some(buf), Some((_, _, _, bound))) => (buf.base_ptr().operand, *bound),
            _ => (IROperand::literal(0), 0),
        };

        let success = if is_static {
            self.builder.staticcall(
                gas,
                addr.clone(),
                buf_ptr,
                total_len,
                ret_ptr.clone(),
                ret_bound,
            )
        } else {
            self.builder.call(
                gas,
                addr.clone(),
                value,
                buf_ptr,
                total_len,
                ret_ptr.clone(),
                ret_bound,
            )
        };
        self.bubble_revert(success.into());

        match ret_info {
            None => {
                // nothing to decode distinguishes a contract from an EOA,
                // so require code at the target
                let code_size = self.builder.extcodesize(addr);
                self.builder.assert_(code_size);
                Ok(VyperValue::from_stack_op(0u64, node.ty.clone()))
            }
            Some((ret_ty, wrapped, min_size, bound)) => {
                let b = &mut self.builder;
                let rds = b.returndatasize();
                let too_small = b.lt(rds, min_size);
                let ge_min = b.iszero(too_small);
                let too_big = b.gt(rds, bound);
                let le_max = b.iszero(too_big);
                let ok = b.and(ge_min, le_max);
                b.assert_(ok);

                let out = self.new_temporary_value(&wrapped);
                let hi = self.builder.add(ret_ptr, rds);
                let src = ret_buf.expect("allocated with ret_info").base_ptr();
                abi_decode_to_buf(self, &out.operand(), &src, &wrapped, &hi.into())?;

                // the unwrapped element sits at offset zero of the tuple
                Ok(VyperValue::from_ptr(out.ptr()?.clone(), ret_ty))
            }
        }
    }

    /// On call failure, copy the callee's return data and re-revert with
    /// it so callers observe the original error.
    pub(crate) fn bubble_revert(&mut self, success: IROperand) {
        let b = &mut self.builder;
        let fail_bb = b.create_block("call_fail");
        let ok_bb = b.create_block("call_ok");
        b.jnz(success, b.block_label(ok_bb), b.block_label(fail_bb));

        b.append_block(fail_bb);
        b.set_block(fail_bb);
        let ret_size = b.returndatasize();
        b.returndatacopy(ret_size, 0u64, 0u64);
        b.revert(ret_size, 0u64);

        b.append_block(ok_bb);
        b.set_block(ok_bb);
    }

    /// `append`/`pop` on dynamic arrays.
    pub(crate) fn lower_method_call(
        &mut self,
        node: &ExprNode,
        receiver: &ExprNode,
        method: &str,
    ) -> CodegenResult<VyperValue> {
        let VyperType::DArray { elem, maxlen } = receiver.ty.clone() else {
            return Err(CodegenError::panic_at(
                format!("unsupported method {method} on {:?}", receiver.ty),
                node.span,
            ));
        };
        let arr = self.lower_expr(receiver)?;
        let ptr = arr.ptr()?.clone();
        if matches!(ptr.location, DataLocation::Storage | DataLocation::Transient) {
            self.check_is_not_constant("modify a storage variable", node.span)?;
        }

        match method {
            "append" => {
                let ExprKind::Call { args, .. } = &node.kind else {
                    return Err(CodegenError::panic_at("malformed call node", node.span));
                };
                let len = self.get_dyn_array_length(&ptr)?;
                let full = self.builder.eq(len, maxlen);
                let has_room = self.builder.iszero(full);
                self.builder.assert_(has_room);
                let value = self.lower_expr(&args[0])?;
                let data = self.darray_data_ptr(&ptr);
                let elem_ptr = self.element_ptr(&data, &len.into(), &elem)?;
                self.store_through_ptr(&value, &elem_ptr, &elem)?;
                let new_len = self.builder.add(len, 1u64);
                self.set_dyn_array_length(&ptr, new_len)?;
                Ok(VyperValue::from_stack_op(0u64, node.ty.clone()))
            }
            "pop" => {
                let len = self.get_dyn_array_length(&ptr)?;
                self.builder.assert_(len);
                let new_len = self.builder.sub(len, 1u64);
                self.set_dyn_array_length(&ptr, new_len)?;
                let data = self.darray_data_ptr(&ptr);
                let elem_ptr = self.element_ptr(&data, &new_len.into(), &elem)?;
                Ok(VyperValue::from_ptr(elem_ptr, (*elem).clone()))
            }
            other => Err(CodegenError::panic_at(
                format!("unsupported dynamic array method {other}"),
                node.span,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::{UINT256, bytes_t};

    #[test]
    fn external_return_wrapping() {
        let wrapped = calculate_type_for_external_return(&UINT256);
        assert_eq!(
            wrapped,
            VyperType::Tuple {
                members: vec![UINT256]
            }
        );

        let already_tuple = VyperType::Tuple {
            members: vec![UINT256, bytes_t(4)],
        };
        assert_eq!(
            calculate_type_for_external_return(&already_tuple),
            already_tuple
        );
    }
}
