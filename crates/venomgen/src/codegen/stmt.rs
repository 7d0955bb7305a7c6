//! Statement lowering.
//!
//! Control flow is reduced to explicit block graphs; assignments resolve
//! their target to a pointer and then dispatch on primitiveness, with a
//! conservative overlap check guarding compound copies.

use crate::{
    ast::{ExprKind, ExprNode, ForIter, RaiseReason, StmtKind, StmtNode},
    codegen::{
        abi::abi_encode_to_buf,
        context::CodegenContext,
        value::{Ptr, VyperValue},
    },
    errors::{CodegenError, CodegenResult},
    types::{ceil32, DataLocation, VyperType},
    venom::IROperand,
};

/// Selector of the canonical `Error(string)` revert payload.
const ERROR_STRING_SELECTOR: u32 = 0x08c3_79a0;

impl CodegenContext<'_, '_> {
    /// Lowers a statement list, stopping after a terminator.
    pub fn lower_body(&mut self, body: &[StmtNode]) -> CodegenResult<()> {
        for stmt in body {
            if self.builder.is_terminated() {
                break;
            }
            self.lower_stmt(stmt)?;
        }
        Ok(())
    }

    pub fn lower_stmt(&mut self, node: &StmtNode) -> CodegenResult<()> {
        self.with_source(node.span, |ctx| match &node.kind {
            StmtKind::Expr { value } => {
                ctx.lower_expr(value)?;
                Ok(())
            }
            StmtKind::AnnAssign { target, ty, value } => ctx.lower_ann_assign(target, ty, value),
            StmtKind::Assign { target, value } => ctx.lower_assign(target, value),
            StmtKind::AugAssign { target, op, value } => {
                ctx.lower_aug_assign(target, *op, value)
            }
            StmtKind::If { test, body, orelse } => ctx.lower_if(test, body, orelse),
            StmtKind::For {
                target,
                target_ty,
                iter,
                body,
            } => ctx.lower_for(target, target_ty, iter, body),
            StmtKind::While { test, body } => ctx.lower_while(test, body),
            StmtKind::Break => ctx.lower_break(node),
            StmtKind::Continue => ctx.lower_continue(node),
            StmtKind::Pass => Ok(()),
            StmtKind::Return { value } => ctx.lower_return(node, value.as_ref()),
            StmtKind::Assert { test, reason } => ctx.lower_assert(test, reason),
            StmtKind::Raise { reason } => ctx.lower_raise(reason),
            StmtKind::Log { event, args } => ctx.lower_log(node, event, args),
        })
    }

    // === Assignment ===

    fn lower_ann_assign(
        &mut self,
        target: &str,
        ty: &VyperType,
        value: &ExprNode,
    ) -> CodegenResult<()> {
        let buf = self.new_variable(target, ty, true);
        let rhs = self.lower_expr(value)?;
        self.store_through_ptr(&rhs, &buf.base_ptr(), ty)
    }

    fn lower_assign(&mut self, target: &ExprNode, value: &ExprNode) -> CodegenResult<()> {
        let src = self.lower_expr(value)?;

        if let ExprKind::Tuple { elements } = &target.kind {
            return self.lower_tuple_unpack(elements, &src, value);
        }

        let (dst, ty) = self.lower_target(target)?;
        if ty.is_prim_word() {
            return self.store_through_ptr(&src, &dst, &ty);
        }

        // compound assignment: detour through a temporary when the source
        // may overlap the destination
        let needs_detour = match &src {
            VyperValue::Located { ptr, .. } => {
                let size = self.region_size(&ty, ptr.location);
                let dst_size = self.region_size(&ty, dst.location);
                self.may_alias(ptr, size, &dst, dst_size)
            }
            VyperValue::Stack { .. } => false,
        };
        if needs_detour {
            let tmp = self.new_temporary_value(&ty);
            let tmp_ptr = tmp.ptr()?.clone();
            self.store_through_ptr(&src, &tmp_ptr, &ty)?;
            self.store_through_ptr(&tmp, &dst, &ty)
        } else {
            self.store_through_ptr(&src, &dst, &ty)
        }
    }

    fn region_size(&self, ty: &VyperType, loc: DataLocation) -> usize {
        match loc {
            DataLocation::Storage | DataLocation::Transient => ty.storage_size_in_words(),
            _ => ty.memory_bytes_required(),
        }
    }

    /// `a, b = expr`: assign each target from the tuple's field offsets.
    fn lower_tuple_unpack(
        &mut self,
        targets: &[ExprNode],
        src: &VyperValue,
        value: &ExprNode,
    ) -> CodegenResult<()> {
        let VyperType::Tuple { members } = value.ty.clone() else {
            return Err(CodegenError::panic_at(
                "tuple unpack from non-tuple value",
                value.span,
            ));
        };
        if targets.len() != members.len() {
            return Err(CodegenError::panic_at("tuple unpack arity mismatch", value.span));
        }
        let src_ptr = src.ptr()?.clone();

        let mut offset = 0usize;
        for (target, member_ty) in targets.iter().zip(&members) {
            let field_ptr = self.add_offset(&src_ptr, offset);
            let field = VyperValue::from_ptr(field_ptr, member_ty.clone());
            let (dst, ty) = self.lower_target(target)?;
            self.store_through_ptr(&field, &dst, &ty)?;
            offset += member_ty.memory_bytes_required();
        }
        Ok(())
    }

    /// Resolves an assignment target to a pointer, enforcing mutability.
    fn lower_target(&mut self, target: &ExprNode) -> CodegenResult<(Ptr, VyperType)> {
        if let ExprKind::Name { id, var_info: None } = &target.kind {
            if self.forvars.contains(id) {
                return Err(CodegenError::type_check_at(
                    format!("cannot assign to loop variable {id}"),
                    target.span,
                ));
            }
            if let Some(var) = self.lookup(id)
                && !var.mutable
            {
                return Err(CodegenError::type_check_at(
                    format!("cannot assign to immutable binding {id}"),
                    target.span,
                ));
            }
        }

        let vv = self.lower_expr(target)?;
        let ptr = vv.ptr()?.clone();
        match ptr.location {
            DataLocation::Storage | DataLocation::Transient => {
                self.check_is_not_constant("write to a storage variable", target.span)?;
            }
            DataLocation::Code => {
                if !self.is_ctor_context {
                    return Err(CodegenError::type_check_at(
                        "cannot assign to immutable outside the constructor",
                        target.span,
                    ));
                }
            }
            DataLocation::Calldata => {
                return Err(CodegenError::type_check_at(
                    "cannot assign to calldata",
                    target.span,
                ));
            }
            DataLocation::Memory => {}
        }
        Ok((ptr, vv.ty().clone()))
    }

    fn lower_aug_assign(
        &mut self,
        target: &ExprNode,
        op: crate::ast::BinOpKind,
        value: &ExprNode,
    ) -> CodegenResult<()> {
        let (dst, ty) = self.lower_target(target)?;
        if !ty.is_prim_word() {
            return Err(CodegenError::type_check_at(
                "augmented assignment only valid for primitive types",
                target.span,
            ));
        }
        let left: IROperand = self.ptr_load(&dst)?.into();
        let right = self.lower_value(value)?;

        use crate::ast::BinOpKind as Op;
        let result = match op {
            Op::Add => self.safe_add(left, right, &ty)?,
            Op::Sub => self.safe_sub(left, right, &ty)?,
            Op::Mult => self.safe_mul(left, right, &ty)?,
            Op::Div => self.safe_div(left, right, &ty)?,
            Op::FloorDiv => self.safe_floordiv(left, right, &ty)?,
            Op::Mod => self.safe_mod(left, right, &ty)?,
            Op::Pow => self.safe_pow(left, right, &ty, target, value)?,
            Op::BitAnd => self.builder.and(left, right).into(),
            Op::BitOr => self.builder.or(left, right).into(),
            Op::BitXor => self.builder.xor(left, right).into(),
            Op::LShift => {
                let shifted = self.builder.shl(right, left);
                self.wrap_result(shifted.into(), &ty)
            }
            Op::RShift => {
                let shifted = if ty.is_signed() {
                    self.builder.sar(right, left)
                } else {
                    self.builder.shr(right, left)
                };
                self.wrap_result(shifted.into(), &ty)
            }
        };
        self.ptr_store(&dst, result)
    }

    // === Control flow ===

    fn lower_if(
        &mut self,
        test: &ExprNode,
        body: &[StmtNode],
        orelse: &[StmtNode],
    ) -> CodegenResult<()> {
        let then_bb = self.builder.create_block("if_then");
        let else_bb = self.builder.create_block("if_else");
        let exit_bb = self.builder.create_block("if_exit");

        let cond = self.lower_value(test)?;
        self.builder.jnz(
            cond,
            self.builder.block_label(then_bb),
            self.builder.block_label(else_bb),
        );

        self.builder.append_block(then_bb);
        self.builder.set_block(then_bb);
        self.block_scope(|ctx| ctx.lower_body(body))?;
        if !self.builder.is_terminated() {
            self.builder.jmp(self.builder.block_label(exit_bb));
        }

        self.builder.append_block(else_bb);
        self.builder.set_block(else_bb);
        self.block_scope(|ctx| ctx.lower_body(orelse))?;
        if !self.builder.is_terminated() {
            self.builder.jmp(self.builder.block_label(exit_bb));
        }

        self.builder.append_block(exit_bb);
        self.builder.set_block(exit_bb);
        Ok(())
    }

    fn lower_for(
        &mut self,
        target: &str,
        target_ty: &VyperType,
        iter: &ForIter,
        body: &[StmtNode],
    ) -> CodegenResult<()> {
        match iter {
            ForIter::Range { start, count } => self.lower_for_range(target, target_ty, start, *count, body),
            ForIter::Iterable(iterable) => self.lower_for_iter(target, target_ty, iterable, body),
        }
    }

    /// `for i in range(...)`: five blocks around a counter variable.
    fn lower_for_range(
        &mut self,
        target: &str,
        target_ty: &VyperType,
        start: &ExprNode,
        count: usize,
        body: &[StmtNode],
    ) -> CodegenResult<()> {
        self.block_scope(|ctx| {
            let loop_var = ctx.new_variable(target, target_ty, false);
            let start_val = ctx.lower_value(start)?;

            let counter = ctx.builder.new_variable();
            ctx.builder.assign_to(start_val.clone(), counter);
            let end = ctx.builder.add(start_val, count);

            let cond_bb = ctx.builder.create_block("for_cond");
            let body_bb = ctx.builder.create_block("for_body");
            let incr_bb = ctx.builder.create_block("for_incr");
            let exit_bb = ctx.builder.create_block("for_exit");
            ctx.builder.jmp(ctx.builder.block_label(cond_bb));

            ctx.builder.append_block(cond_bb);
            ctx.builder.set_block(cond_bb);
            let more = if target_ty.is_signed() {
                ctx.builder.slt(counter, end)
            } else {
                ctx.builder.lt(counter, end)
            };
            ctx.builder.jnz(
                more,
                ctx.builder.block_label(body_bb),
                ctx.builder.block_label(exit_bb),
            );

            ctx.builder.append_block(body_bb);
            ctx.builder.set_block(body_bb);
            ctx.builder
                .mstore(counter, loop_var.base_ptr().operand);

            ctx.forvars.insert(target.to_owned());
            let result = ctx.loop_scope(exit_bb, incr_bb, |ctx| ctx.lower_body(body));
            ctx.forvars.remove(target);
            result?;
            if !ctx.builder.is_terminated() {
                ctx.builder.jmp(ctx.builder.block_label(incr_bb));
            }

            ctx.builder.append_block(incr_bb);
            ctx.builder.set_block(incr_bb);
            let next = ctx.builder.add(counter, 1u64);
            ctx.builder.assign_to(next, counter);
            ctx.builder.jmp(ctx.builder.block_label(cond_bb));

            ctx.builder.append_block(exit_bb);
            ctx.builder.set_block(exit_bb);
            Ok(())
        })
    }

    /// `for x in iterable`: index over the element region, loading each
    /// element into the loop variable.
    fn lower_for_iter(
        &mut self,
        target: &str,
        target_ty: &VyperType,
        iterable: &ExprNode,
        body: &[StmtNode],
    ) -> CodegenResult<()> {
        self.block_scope(|ctx| {
            let loop_var = ctx.new_variable(target, target_ty, false);
            let iter_vv = ctx.lower_expr(iterable)?;
            let iter_ptr = iter_vv.ptr()?.clone();

            let (data_ptr, len): (Ptr, IROperand) = match &iterable.ty {
                VyperType::SArray { n, .. } => (iter_ptr.clone(), IROperand::from(*n)),
                VyperType::DArray { .. } => {
                    let len = ctx.get_dyn_array_length(&iter_ptr)?;
                    (ctx.darray_data_ptr(&iter_ptr), len.into())
                }
                other => {
                    return Err(CodegenError::panic_at(
                        format!("cannot iterate {other:?}"),
                        iterable.span,
                    ));
                }
            };

            let index = ctx.builder.new_variable();
            ctx.builder.assign_to(IROperand::literal(0), index);

            let cond_bb = ctx.builder.create_block("for_cond");
            let body_bb = ctx.builder.create_block("for_body");
            let incr_bb = ctx.builder.create_block("for_incr");
            let exit_bb = ctx.builder.create_block("for_exit");
            ctx.builder.jmp(ctx.builder.block_label(cond_bb));

            ctx.builder.append_block(cond_bb);
            ctx.builder.set_block(cond_bb);
            let more = ctx.builder.lt(index, len);
            ctx.builder.jnz(
                more,
                ctx.builder.block_label(body_bb),
                ctx.builder.block_label(exit_bb),
            );

            ctx.builder.append_block(body_bb);
            ctx.builder.set_block(body_bb);
            let elem_ptr = ctx.element_ptr(&data_ptr, &index.into(), target_ty)?;
            let element = VyperValue::from_ptr(elem_ptr, target_ty.clone());
            ctx.store_through_ptr(&element, &loop_var.base_ptr(), target_ty)?;

            ctx.forvars.insert(target.to_owned());
            let result = ctx.loop_scope(exit_bb, incr_bb, |ctx| ctx.lower_body(body));
            ctx.forvars.remove(target);
            result?;
            if !ctx.builder.is_terminated() {
                ctx.builder.jmp(ctx.builder.block_label(incr_bb));
            }

            ctx.builder.append_block(incr_bb);
            ctx.builder.set_block(incr_bb);
            let next = ctx.builder.add(index, 1u64);
            ctx.builder.assign_to(next, index);
            ctx.builder.jmp(ctx.builder.block_label(cond_bb));

            ctx.builder.append_block(exit_bb);
            ctx.builder.set_block(exit_bb);
            Ok(())
        })
    }

    fn lower_while(&mut self, test: &ExprNode, body: &[StmtNode]) -> CodegenResult<()> {
        let cond_bb = self.builder.create_block("while_cond");
        let body_bb = self.builder.create_block("while_body");
        let exit_bb = self.builder.create_block("while_exit");
        self.builder.jmp(self.builder.block_label(cond_bb));

        self.builder.append_block(cond_bb);
        self.builder.set_block(cond_bb);
        let cond = self.lower_value(test)?;
        self.builder.jnz(
            cond,
            self.builder.block_label(body_bb),
            self.builder.block_label(exit_bb),
        );

        self.builder.append_block(body_bb);
        self.builder.set_block(body_bb);
        self.loop_scope(exit_bb, cond_bb, |ctx| ctx.lower_body(body))?;
        if !self.builder.is_terminated() {
            self.builder.jmp(self.builder.block_label(cond_bb));
        }

        self.builder.append_block(exit_bb);
        self.builder.set_block(exit_bb);
        Ok(())
    }

    fn lower_break(&mut self, node: &StmtNode) -> CodegenResult<()> {
        let target = self.break_target.ok_or_else(|| {
            CodegenError::type_check_at("break outside of a loop", node.span)
        })?;
        self.builder.jmp(self.builder.block_label(target));
        Ok(())
    }

    fn lower_continue(&mut self, node: &StmtNode) -> CodegenResult<()> {
        let target = self.continue_target.ok_or_else(|| {
            CodegenError::type_check_at("continue outside of a loop", node.span)
        })?;
        self.builder.jmp(self.builder.block_label(target));
        Ok(())
    }

    fn lower_return(&mut self, node: &StmtNode, value: Option<&ExprNode>) -> CodegenResult<()> {
        let return_label = self.return_label.ok_or_else(|| {
            CodegenError::panic_at("return outside of a function", node.span)
        })?;

        if let Some(expr) = value {
            let buf = self.return_buffer.clone().ok_or_else(|| {
                CodegenError::panic_at("return value without a return buffer", node.span)
            })?;
            let vv = self.lower_expr(expr)?;
            self.store_through_ptr(&vv, &buf.base_ptr(), &expr.ty)?;
        }
        self.builder.jmp(self.builder.block_label(return_label));
        Ok(())
    }

    // === Assert / Raise ===

    fn lower_assert(&mut self, test: &ExprNode, reason: &RaiseReason) -> CodegenResult<()> {
        let cond = self.lower_value(test)?;
        match reason {
            RaiseReason::None => {
                self.builder.assert_(cond);
                Ok(())
            }
            RaiseReason::Unreachable => {
                self.builder.assert_unreachable(cond);
                Ok(())
            }
            RaiseReason::Message(msg) => {
                let ok_bb = self.builder.create_block("assert_ok");
                let fail_bb = self.builder.create_block("assert_fail");
                self.builder.jnz(
                    cond,
                    self.builder.block_label(ok_bb),
                    self.builder.block_label(fail_bb),
                );

                self.builder.append_block(fail_bb);
                self.builder.set_block(fail_bb);
                self.lower_revert_with_reason(msg)?;

                self.builder.append_block(ok_bb);
                self.builder.set_block(ok_bb);
                Ok(())
            }
        }
    }

    fn lower_raise(&mut self, reason: &RaiseReason) -> CodegenResult<()> {
        match reason {
            RaiseReason::None => {
                self.builder.revert(0u64, 0u64);
                Ok(())
            }
            RaiseReason::Unreachable => {
                self.builder.invalid();
                Ok(())
            }
            RaiseReason::Message(msg) => self.lower_revert_with_reason(msg),
        }
    }

    /// Reverts with either an ABI-encoded `Error(string)` payload or the
    /// caller-supplied raw bytes.
    fn lower_revert_with_reason(&mut self, msg: &ExprNode) -> CodegenResult<()> {
        match &msg.ty {
            VyperType::String { maxlen } => {
                let reason = self.lower_expr(msg)?;
                let reason_ptr = self.unwrap(&reason)?;

                let payload_ty = VyperType::Tuple {
                    members: vec![VyperType::String { maxlen: *maxlen }],
                };
                let bound = 4 + payload_ty.abi_type().size_bound();
                let buf = self.allocate_buffer(ceil32(bound) + 32, Some("revert_reason"));
                let buf_ptr = buf.base_ptr().operand;

                let selector_word = num_bigint::BigInt::from(ERROR_STRING_SELECTOR) << 224;
                self.builder.mstore(selector_word, buf_ptr.clone());
                let payload_dst = self.builder.add(buf_ptr.clone(), 4u64);
                let len = abi_encode_to_buf(self, payload_dst.into(), &reason_ptr, &payload_ty)?;
                let total = self.builder.add(len, 4u64);
                self.builder.revert(total, buf_ptr);
                Ok(())
            }
            VyperType::Bytes { .. } => {
                let reason = self.lower_expr(msg)?;
                let data = self.bytes_data_ptr(&reason)?;
                let len = self.bytestring_length(&reason)?;
                self.builder.revert(len, data);
                Ok(())
            }
            other => Err(CodegenError::type_check_at(
                format!("unsupported revert reason type {other:?}"),
                msg.span,
            )),
        }
    }
}
