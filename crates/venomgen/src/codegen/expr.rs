//! Expression lowering.
//!
//! `lower_expr` dispatches on the reduced node kind and produces a
//! [`VyperValue`]: literals and arithmetic yield stack values, everything
//! addressable yields a located pointer. Arithmetic operands are always
//! unwrapped before use; evaluation strictly follows source order.

use num_bigint::BigInt;
use num_traits::{Num, One};

use crate::{
    ast::{
        BinOpKind, BoolOpKind, CallTarget, CmpOpKind, EnvAttr, ExprKind, ExprNode, UnaryOpKind,
        VarInfo, VarLocation,
    },
    codegen::{
        builtins,
        context::CodegenContext,
        value::{Buffer, Ptr, VyperValue},
    },
    errors::{CodegenError, CodegenResult, Span},
    types::{DataLocation, VyperType},
    venom::{IROperand, IRVariable},
};

impl CodegenContext<'_, '_> {
    /// Runs `f` with `span` active for source maps, popping on all paths.
    pub fn with_source<T>(
        &mut self,
        span: Span,
        f: impl FnOnce(&mut Self) -> CodegenResult<T>,
    ) -> CodegenResult<T> {
        self.builder.push_source(span);
        let result = f(self);
        self.builder.pop_source();
        result
    }

    /// Lowers an expression to a location-aware value.
    pub fn lower_expr(&mut self, node: &ExprNode) -> CodegenResult<VyperValue> {
        let node = node.reduced();
        self.with_source(node.span, |ctx| ctx.lower_expr_inner(&node))
    }

    /// Lowers an expression and unwraps it to a raw operand.
    pub fn lower_value(&mut self, node: &ExprNode) -> CodegenResult<IROperand> {
        let vv = self.lower_expr(node)?;
        self.unwrap(&vv)
    }

    fn lower_expr_inner(&mut self, node: &ExprNode) -> CodegenResult<VyperValue> {
        match &node.kind {
            ExprKind::Int { value } => {
                Ok(VyperValue::from_stack_op(value.clone(), node.ty.clone()))
            }
            ExprKind::Decimal { value, scale } => {
                let scaled = scale_decimal(value, *scale);
                Ok(VyperValue::from_stack_op(scaled, node.ty.clone()))
            }
            ExprKind::Hex { literal } => self.lower_hex(node, literal),
            ExprKind::Bytes { value } => self.lower_bytelike(node, value),
            ExprKind::Str { value } => self.lower_bytelike(node, value.as_bytes()),
            ExprKind::NameConstant { value } => Ok(VyperValue::from_stack_op(
                i64::from(*value),
                node.ty.clone(),
            )),
            ExprKind::Name { id, var_info } => self.lower_name(node, id, var_info.as_ref()),
            ExprKind::EnvAttr(attr) => self.lower_env_attr(node, *attr),
            ExprKind::Attribute { base, attr, var_info } => {
                self.lower_attribute(node, base, attr, var_info.as_ref())
            }
            ExprKind::Subscript { base, index } => self.lower_subscript(node, base, index),
            ExprKind::Tuple { elements } | ExprKind::List { elements } => {
                self.lower_sequence(node, elements)
            }
            ExprKind::BinOp { op, left, right } => self.lower_binop(node, *op, left, right),
            ExprKind::UnaryOp { op, operand } => self.lower_unaryop(node, *op, operand),
            ExprKind::BoolOp { op, values } => self.lower_boolop(node, *op, values),
            ExprKind::Compare { op, left, right } => self.lower_compare(node, *op, left, right),
            ExprKind::IfExp { test, body, orelse } => self.lower_ifexp(node, test, body, orelse),
            ExprKind::Call { target, .. } => match target {
                CallTarget::Builtin { id } => builtins::lower_builtin(self, id, node),
                CallTarget::Internal { function } => self.lower_internal_call(node, function),
                CallTarget::External { target, method } => {
                    self.lower_external_call(node, target, method)
                }
                CallTarget::StructCtor { .. } => self.lower_struct_ctor(node),
                CallTarget::Method { receiver, method } => {
                    self.lower_method_call(node, receiver, method)
                }
            },
        }
    }

    // === Literals ===

    fn lower_hex(&mut self, node: &ExprNode, literal: &str) -> CodegenResult<VyperValue> {
        let digits = literal.strip_prefix("0x").unwrap_or(literal);
        let value = BigInt::from_str_radix(digits, 16)
            .map_err(|_| CodegenError::panic_at("malformed hex literal", node.span))?;
        match &node.ty {
            VyperType::Address | VyperType::Interface { .. } => {
                Ok(VyperValue::from_stack_op(value, node.ty.clone()))
            }
            VyperType::BytesM(_) => {
                // left-pad: shift the value into the high bytes of the word
                let n_bytes = digits.len() / 2;
                let shifted = value << (8 * (32 - n_bytes));
                Ok(VyperValue::from_stack_op(shifted, node.ty.clone()))
            }
            other => Err(CodegenError::panic_at(
                format!("unsupported hex literal type: {other:?}"),
                node.span,
            )),
        }
    }

    /// Materializes a bytes or string literal.
    ///
    /// Memory layout: length word at the base, data in 32-byte chunks
    /// right-padded with zeros.
    fn lower_bytelike(&mut self, node: &ExprNode, bytez: &[u8]) -> CodegenResult<VyperValue> {
        let out = self.new_temporary_value(&node.ty);
        let base = out.operand();
        self.builder.mstore(bytez.len(), base.clone());

        for (i, chunk) in bytez.chunks(32).enumerate() {
            let mut word = [0u8; 32];
            word[..chunk.len()].copy_from_slice(chunk);
            let value = BigInt::from_bytes_be(num_bigint::Sign::Plus, &word);
            let dst = self.builder.add(base.clone(), 32 + 32 * i);
            self.builder.mstore(value, dst);
        }
        Ok(out)
    }

    // === Names and attributes ===

    fn lower_name(
        &mut self,
        node: &ExprNode,
        id: &str,
        var_info: Option<&VarInfo>,
    ) -> CodegenResult<VyperValue> {
        if id == "self" {
            let addr = self.builder.address();
            return Ok(VyperValue::from_stack_op(addr, node.ty.clone()));
        }
        if let Some(info) = var_info {
            return self.lower_module_var(info, node.span);
        }
        match self.lookup(id) {
            Some(var) => {
                let ptr = var.buf.base_ptr();
                let ty = var.ty.clone();
                Ok(VyperValue::from_ptr(ptr, ty))
            }
            None => Err(CodegenError::panic_at(format!("unknown variable: {id}"), node.span)),
        }
    }

    /// A storage, transient, or immutable variable as a located value.
    pub(crate) fn lower_module_var(
        &mut self,
        info: &VarInfo,
        span: Span,
    ) -> CodegenResult<VyperValue> {
        let ptr = match info.location {
            VarLocation::Storage { slot } => {
                Ptr::non_memory(IROperand::literal(slot), DataLocation::Storage)
            }
            VarLocation::Transient { slot } => {
                Ptr::non_memory(IROperand::literal(slot), DataLocation::Transient)
            }
            VarLocation::Immutable { offset } => {
                Ptr::non_memory(IROperand::from(offset), DataLocation::Code)
            }
            VarLocation::Constant => {
                return Err(CodegenError::panic_at(
                    "constant reference survived folding",
                    span,
                ));
            }
        };
        Ok(VyperValue::from_ptr(ptr, info.ty.clone()))
    }

    fn lower_env_attr(&mut self, node: &ExprNode, attr: EnvAttr) -> CodegenResult<VyperValue> {
        let b = &mut self.builder;
        let op: IRVariable = match attr {
            EnvAttr::MsgSender => b.caller(),
            EnvAttr::MsgValue => b.callvalue(),
            EnvAttr::MsgGas => b.gas(),
            EnvAttr::BlockTimestamp => b.timestamp(),
            EnvAttr::BlockNumber => b.number(),
            EnvAttr::BlockCoinbase => b.coinbase(),
            EnvAttr::BlockPrevhash => {
                let n = b.number();
                let prev = b.sub(n, 1u64);
                b.blockhash(prev)
            }
            EnvAttr::BlockPrevrandao | EnvAttr::BlockDifficulty => b.prevrandao(),
            EnvAttr::BlockGaslimit => b.gaslimit(),
            EnvAttr::BlockBasefee => b.basefee(),
            EnvAttr::BlockBlobbasefee => b.blobbasefee(),
            EnvAttr::TxOrigin => b.origin(),
            EnvAttr::TxGasprice => b.gasprice(),
            EnvAttr::ChainId => b.chainid(),
            EnvAttr::SelfBalance => b.selfbalance(),
            EnvAttr::MsgData => {
                return Err(CodegenError::panic_at(
                    "msg.data is only usable as a slice, len, or raw_call argument",
                    node.span,
                ));
            }
        };
        Ok(VyperValue::from_stack_op(op, node.ty.clone()))
    }

    fn lower_attribute(
        &mut self,
        node: &ExprNode,
        base: &ExprNode,
        attr: &str,
        var_info: Option<&VarInfo>,
    ) -> CodegenResult<VyperValue> {
        // state variable access: self.x
        if let Some(info) = var_info {
            return self.lower_module_var(info, node.span);
        }

        // flag member: MyFlag.A
        if let VyperType::Flag { .. } = &node.ty
            && let ExprKind::Name { id, var_info: None } = &base.kind
            && matches!(&node.ty, VyperType::Flag { name, .. } if name == id)
        {
            let index = node.ty.flag_member_index(attr).ok_or_else(|| {
                CodegenError::panic_at(format!("unknown flag member {attr}"), node.span)
            })?;
            let value = BigInt::one() << index;
            return Ok(VyperValue::from_stack_op(value, node.ty.clone()));
        }

        // address properties
        if matches!(base.ty, VyperType::Address | VyperType::Interface { .. }) {
            let addr = self.lower_value(base)?;
            let b = &mut self.builder;
            let result: IRVariable = match attr {
                "balance" => b.balance(addr),
                "codesize" => b.extcodesize(addr),
                "codehash" => b.extcodehash(addr),
                "is_contract" => {
                    let size = b.extcodesize(addr);
                    let empty = b.iszero(size);
                    b.iszero(empty)
                }
                "code" => {
                    return Err(CodegenError::panic_at(
                        "<address>.code is only usable as a slice argument",
                        node.span,
                    ));
                }
                other => {
                    return Err(CodegenError::panic_at(
                        format!("unsupported address attribute: {other}"),
                        node.span,
                    ));
                }
            };
            return Ok(VyperValue::from_stack_op(result, node.ty.clone()));
        }

        // struct field
        let base_vv = self.lower_expr(base)?;
        let ptr = base_vv.ptr()?.clone();
        let (offset, field_ty) = match ptr.location {
            DataLocation::Storage | DataLocation::Transient => base
                .ty
                .struct_field_slot(attr)
                .ok_or_else(|| CodegenError::panic_at(format!("no field {attr}"), node.span))?,
            _ => base
                .ty
                .struct_field_offset(attr)
                .ok_or_else(|| CodegenError::panic_at(format!("no field {attr}"), node.span))?,
        };
        let field_ty = field_ty.clone();
        let field_ptr = self.add_offset(&ptr, offset);
        Ok(VyperValue::from_ptr(field_ptr, field_ty))
    }

    // === Subscripts ===

    fn lower_subscript(
        &mut self,
        node: &ExprNode,
        base: &ExprNode,
        index: &ExprNode,
    ) -> CodegenResult<VyperValue> {
        let base_vv = self.lower_expr(base)?;
        match base.ty.clone() {
            VyperType::SArray { elem, n } => {
                let ptr = base_vv.ptr()?.clone();
                let idx = self.lower_value(index)?;
                self.bounds_check(&idx, IROperand::from(n));
                let elem_ptr = self.element_ptr(&ptr, &idx, &elem)?;
                Ok(VyperValue::from_ptr(elem_ptr, (*elem).clone()))
            }
            VyperType::DArray { elem, .. } => {
                let ptr = base_vv.ptr()?.clone();
                let idx = self.lower_value(index)?;
                let len = self.get_dyn_array_length(&ptr)?;
                self.bounds_check(&idx, IROperand::Variable(len));
                let data_ptr = self.darray_data_ptr(&ptr);
                let elem_ptr = self.element_ptr(&data_ptr, &idx, &elem)?;
                Ok(VyperValue::from_ptr(elem_ptr, (*elem).clone()))
            }
            VyperType::HashMap { value, .. } => {
                let ptr = base_vv.ptr()?.clone();
                if !matches!(ptr.location, DataLocation::Storage | DataLocation::Transient) {
                    return Err(CodegenError::panic_at(
                        "mapping outside storage or transient storage",
                        node.span,
                    ));
                }
                let slot = self.mapping_slot(&ptr, index)?;
                let elem_ptr = Ptr::non_memory(IROperand::Variable(slot), ptr.location);
                Ok(VyperValue::from_ptr(elem_ptr, (*value).clone()))
            }
            VyperType::Tuple { members } => {
                let ptr = base_vv.ptr()?.clone();
                let idx = index.as_int_literal().ok_or_else(|| {
                    CodegenError::panic_at("tuple index must be a literal", node.span)
                })?;
                let idx = usize::try_from(idx)
                    .map_err(|_| CodegenError::panic_at("tuple index out of range", node.span))?;
                let member_ty = members
                    .get(idx)
                    .ok_or_else(|| CodegenError::panic_at("tuple index out of range", node.span))?
                    .clone();
                let offset = self.sequence_offset(&ptr.location, &members[..idx]);
                let elem_ptr = self.add_offset(&ptr, offset);
                Ok(VyperValue::from_ptr(elem_ptr, member_ty))
            }
            other => Err(CodegenError::panic_at(
                format!("cannot subscript {other:?}"),
                node.span,
            )),
        }
    }

    /// Asserts `idx < bound`. Unsigned comparison also rejects negative
    /// signed indices, which wrap to huge words.
    fn bounds_check(&mut self, idx: &IROperand, bound: IROperand) {
        if let (Some(i), Some(n)) = (idx.as_literal(), bound.as_literal())
            && i.value() < n.value()
        {
            return;
        }
        let b = &mut self.builder;
        let in_range = b.lt(idx.clone(), bound);
        b.assert_(in_range);
    }

    /// Start of a dynamic array's element region.
    pub(crate) fn darray_data_ptr(&mut self, ptr: &Ptr) -> Ptr {
        let skip: usize = match ptr.location {
            DataLocation::Storage | DataLocation::Transient => 1,
            _ => 32,
        };
        self.add_offset(ptr, skip)
    }

    /// Pointer to element `idx` of a packed element region.
    pub(crate) fn element_ptr(
        &mut self,
        data: &Ptr,
        idx: &IROperand,
        elem: &VyperType,
    ) -> CodegenResult<Ptr> {
        let stride = match data.location {
            DataLocation::Storage | DataLocation::Transient => elem.storage_size_in_words(),
            _ => elem.memory_bytes_required(),
        };
        let offset: IROperand = if let Some(i) = idx.as_literal() {
            IROperand::literal(i.to_signed() * BigInt::from(stride))
        } else {
            self.builder.mul(idx.clone(), stride).into()
        };
        Ok(self.add_offset(data, offset))
    }

    /// Slot of `base[key]` for a mapping: `keccak256(key . base_slot)`.
    fn mapping_slot(&mut self, base: &Ptr, key: &ExprNode) -> CodegenResult<IRVariable> {
        if key.ty.is_prim_word() {
            let k = self.lower_value(key)?;
            return Ok(self.builder.sha3_64(k, base.operand.clone()));
        }
        match &key.ty {
            VyperType::Bytes { maxlen } | VyperType::String { maxlen } => {
                // hash the key data followed by the slot word
                let key_vv = self.lower_expr(key)?;
                let data = self.bytes_data_ptr(&key_vv)?;
                let len = self.bytestring_length(&key_vv)?;
                let buf = self.allocate_buffer(crate::types::ceil32(*maxlen) + 32, Some("hashmap_key"));
                let buf_ptr = buf.base_ptr();
                self.copy_memory_dynamic(buf_ptr.operand.clone(), data, len);
                let slot_pos = self.builder.add(buf_ptr.operand.clone(), len);
                self.builder.mstore(base.operand.clone(), slot_pos);
                let total = self.builder.add(len, 32u64);
                Ok(self.builder.sha3(buf_ptr.operand, total))
            }
            other => Err(CodegenError::panic(format!(
                "unsupported mapping key type: {other:?}"
            ))),
        }
    }

    // === Sequences ===

    fn sequence_offset(&self, loc: &DataLocation, preceding: &[VyperType]) -> usize {
        match loc {
            DataLocation::Storage | DataLocation::Transient => preceding
                .iter()
                .map(VyperType::storage_size_in_words)
                .sum(),
            _ => preceding.iter().map(VyperType::memory_bytes_required).sum(),
        }
    }

    /// Materializes a tuple or list literal into a fresh buffer.
    ///
    /// A list literal typed as a dynamic array also writes its length
    /// word ahead of the packed elements.
    fn lower_sequence(
        &mut self,
        node: &ExprNode,
        elements: &[ExprNode],
    ) -> CodegenResult<VyperValue> {
        let out = self.new_temporary_value(&node.ty);
        let base = out.operand();
        let mut offset = 0usize;
        if matches!(node.ty, VyperType::DArray { .. }) {
            self.builder.mstore(elements.len(), base.clone());
            offset = 32;
        }
        for element in elements {
            let vv = self.lower_expr(element)?;
            let dst = if offset == 0 {
                base.clone()
            } else {
                IROperand::Variable(self.builder.add(base.clone(), offset))
            };
            self.store_memory(&vv, dst, &element.ty)?;
            offset += element.ty.memory_bytes_required();
        }
        Ok(out)
    }

    /// Materializes a struct constructor call.
    fn lower_struct_ctor(&mut self, node: &ExprNode) -> CodegenResult<VyperValue> {
        let ExprKind::Call { keywords, .. } = &node.kind else {
            return Err(CodegenError::panic_at("malformed struct constructor", node.span));
        };
        let VyperType::Struct { fields, .. } = node.ty.clone() else {
            return Err(CodegenError::panic_at("struct constructor without struct type", node.span));
        };

        let out = self.new_temporary_value(&node.ty);
        let base = out.operand();
        let mut offset = 0usize;
        for field in &fields {
            let kw = keywords
                .iter()
                .find(|kw| kw.arg == field.name)
                .ok_or_else(|| {
                    CodegenError::panic_at(
                        format!("missing struct field {}", field.name),
                        node.span,
                    )
                })?;
            let vv = self.lower_expr(&kw.value)?;
            let dst = if offset == 0 {
                base.clone()
            } else {
                IROperand::Variable(self.builder.add(base.clone(), offset))
            };
            self.store_memory(&vv, dst, &field.ty)?;
            offset += field.ty.memory_bytes_required();
        }
        Ok(out)
    }

    // === Operators ===

    fn lower_binop(
        &mut self,
        node: &ExprNode,
        op: BinOpKind,
        left: &ExprNode,
        right: &ExprNode,
    ) -> CodegenResult<VyperValue> {
        let ty = node.ty.clone();
        let x = self.lower_value(left)?;
        let y = self.lower_value(right)?;

        let result = match op {
            BinOpKind::Add => self.safe_add(x, y, &ty)?,
            BinOpKind::Sub => self.safe_sub(x, y, &ty)?,
            BinOpKind::Mult => self.safe_mul(x, y, &ty)?,
            BinOpKind::Div => self.safe_div(x, y, &ty)?,
            BinOpKind::FloorDiv => self.safe_floordiv(x, y, &ty)?,
            BinOpKind::Mod => self.safe_mod(x, y, &ty)?,
            BinOpKind::Pow => self.safe_pow(x, y, &ty, left, right)?,
            BinOpKind::BitAnd => self.builder.and(x, y).into(),
            BinOpKind::BitOr => self.builder.or(x, y).into(),
            BinOpKind::BitXor => self.builder.xor(x, y).into(),
            BinOpKind::LShift => {
                let shifted = self.builder.shl(y, x);
                self.wrap_result(shifted.into(), &ty)
            }
            BinOpKind::RShift => {
                let shifted = if ty.is_signed() {
                    self.builder.sar(y, x)
                } else {
                    self.builder.shr(y, x)
                };
                self.wrap_result(shifted.into(), &ty)
            }
        };
        Ok(VyperValue::from_stack_op(result, ty))
    }

    fn lower_unaryop(
        &mut self,
        node: &ExprNode,
        op: UnaryOpKind,
        operand: &ExprNode,
    ) -> CodegenResult<VyperValue> {
        let ty = node.ty.clone();
        let val = self.lower_value(operand)?;
        let result: IROperand = match op {
            UnaryOpKind::Not => self.builder.iszero(val).into(),
            UnaryOpKind::USub => self.safe_sub(IROperand::literal(0), val, &ty)?,
            UnaryOpKind::Invert => match &ty {
                VyperType::Flag { members, .. } => {
                    let mask = (BigInt::one() << members.len()) - 1;
                    self.builder.xor(val, mask).into()
                }
                _ => {
                    let inverted = self.builder.not(val);
                    self.wrap_result(inverted.into(), &ty)
                }
            },
        };
        Ok(VyperValue::from_stack_op(result, ty))
    }

    /// Short-circuiting `and`/`or` over two or more operands.
    fn lower_boolop(
        &mut self,
        node: &ExprNode,
        op: BoolOpKind,
        values: &[ExprNode],
    ) -> CodegenResult<VyperValue> {
        if values.len() < 2 {
            return Err(CodegenError::panic_at("boolop arity below two", node.span));
        }
        let result = self.builder.new_variable();
        let exit_bb = self.builder.create_block("bool_exit");
        let exit_label = self.builder.block_label(exit_bb);

        for value in &values[..values.len() - 1] {
            let val = self.lower_value(value)?;
            self.builder.assign_to(val.clone(), result);
            let next_bb = self.builder.create_block("bool_next");
            let next_label = self.builder.block_label(next_bb);
            match op {
                // false short-circuits an `and`, true short-circuits an `or`
                BoolOpKind::And => self.builder.jnz(val, next_label, exit_label.clone()),
                BoolOpKind::Or => self.builder.jnz(val, exit_label.clone(), next_label),
            }
            self.builder.append_block(next_bb);
            self.builder.set_block(next_bb);
        }

        let last = self.lower_value(&values[values.len() - 1])?;
        self.builder.assign_to(last, result);
        self.builder.jmp(exit_label);
        self.builder.append_block(exit_bb);
        self.builder.set_block(exit_bb);
        Ok(VyperValue::from_stack_op(result, node.ty.clone()))
    }

    fn lower_compare(
        &mut self,
        node: &ExprNode,
        op: CmpOpKind,
        left: &ExprNode,
        right: &ExprNode,
    ) -> CodegenResult<VyperValue> {
        // flag membership: any shared bit counts
        if matches!(op, CmpOpKind::In | CmpOpKind::NotIn) {
            return self.lower_membership(node, op, left, right);
        }

        // bytestrings compare by length and content hash
        if matches!(left.ty, VyperType::Bytes { .. } | VyperType::String { .. }) {
            let result = self.bytestring_eq(left, right)?;
            let result = match op {
                CmpOpKind::Eq => result,
                CmpOpKind::NotEq => self.builder.iszero(result),
                _ => {
                    return Err(CodegenError::type_check_at(
                        "bytestrings support only equality comparison",
                        node.span,
                    ));
                }
            };
            return Ok(VyperValue::from_stack_op(result, node.ty.clone()));
        }

        let x = self.lower_value(left)?;
        let y = self.lower_value(right)?;
        let signed = left.ty.is_signed();
        let b = &mut self.builder;
        let result: IRVariable = match op {
            CmpOpKind::Eq => b.eq(x, y),
            CmpOpKind::NotEq => {
                let eq = b.eq(x, y);
                b.iszero(eq)
            }
            CmpOpKind::Lt => {
                if signed {
                    b.slt(x, y)
                } else {
                    b.lt(x, y)
                }
            }
            CmpOpKind::Gt => {
                if signed {
                    b.sgt(x, y)
                } else {
                    b.gt(x, y)
                }
            }
            CmpOpKind::LtE => {
                let gt = if signed { b.sgt(x, y) } else { b.gt(x, y) };
                b.iszero(gt)
            }
            CmpOpKind::GtE => {
                let lt = if signed { b.slt(x, y) } else { b.lt(x, y) };
                b.iszero(lt)
            }
            CmpOpKind::In | CmpOpKind::NotIn => unreachable!("handled above"),
        };
        Ok(VyperValue::from_stack_op(result, node.ty.clone()))
    }

    fn lower_membership(
        &mut self,
        node: &ExprNode,
        op: CmpOpKind,
        left: &ExprNode,
        right: &ExprNode,
    ) -> CodegenResult<VyperValue> {
        // `x in flag_set`: true iff any bit of x is set in flag_set
        if matches!(right.ty, VyperType::Flag { .. }) {
            let x = self.lower_value(left)?;
            let set = self.lower_value(right)?;
            let b = &mut self.builder;
            let masked = b.and(x, set);
            let none = b.iszero(masked);
            let result = match op {
                CmpOpKind::In => b.iszero(none),
                _ => none,
            };
            return Ok(VyperValue::from_stack_op(result, node.ty.clone()));
        }

        // `x in [a, b, c]` over a literal list folds to a chain of eq/or
        if let ExprKind::List { elements } = &right.reduced().kind {
            let x = self.lower_value(left)?;
            let mut acc: Option<IRVariable> = None;
            for element in elements {
                let e = self.lower_value(element)?;
                let hit = self.builder.eq(x.clone(), e);
                acc = Some(match acc {
                    Some(prev) => self.builder.or(prev, hit),
                    None => hit,
                });
            }
            let any = acc.ok_or_else(|| {
                CodegenError::type_check_at("membership test on empty list", node.span)
            })?;
            let result = match op {
                CmpOpKind::In => any,
                _ => self.builder.iszero(any),
            };
            return Ok(VyperValue::from_stack_op(result, node.ty.clone()));
        }

        Err(CodegenError::type_check_at(
            "unsupported membership test",
            node.span,
        ))
    }

    fn bytestring_eq(&mut self, left: &ExprNode, right: &ExprNode) -> CodegenResult<IRVariable> {
        let l = self.lower_expr(left)?;
        let r = self.lower_expr(right)?;
        let l_len = self.bytestring_length(&l)?;
        let l_data = self.bytes_data_ptr(&l)?;
        let l_hash = self.builder.sha3(l_data, l_len);
        let r_len = self.bytestring_length(&r)?;
        let r_data = self.bytes_data_ptr(&r)?;
        let r_hash = self.builder.sha3(r_data, r_len);
        let b = &mut self.builder;
        let len_eq = b.eq(l_len, r_len);
        let hash_eq = b.eq(l_hash, r_hash);
        Ok(b.and(len_eq, hash_eq))
    }

    /// Ternary expression. Both branches write into a pre-allocated
    /// variable; compound results carry the pointer instead of the value.
    fn lower_ifexp(
        &mut self,
        node: &ExprNode,
        test: &ExprNode,
        body: &ExprNode,
        orelse: &ExprNode,
    ) -> CodegenResult<VyperValue> {
        let ty = node.ty.clone();
        let result = self.builder.new_variable();

        let then_bb = self.builder.create_block("ternary_then");
        let else_bb = self.builder.create_block("ternary_else");
        let exit_bb = self.builder.create_block("ternary_exit");

        let cond = self.lower_value(test)?;
        self.builder.jnz(
            cond,
            self.builder.block_label(then_bb),
            self.builder.block_label(else_bb),
        );

        self.builder.append_block(then_bb);
        self.builder.set_block(then_bb);
        let then_val = self.lower_value(body)?;
        self.builder.assign_to(then_val, result);
        self.builder.jmp(self.builder.block_label(exit_bb));

        self.builder.append_block(else_bb);
        self.builder.set_block(else_bb);
        let else_val = self.lower_value(orelse)?;
        self.builder.assign_to(else_val, result);
        self.builder.jmp(self.builder.block_label(exit_bb));

        self.builder.append_block(exit_bb);
        self.builder.set_block(exit_bb);

        if ty.is_prim_word() {
            Ok(VyperValue::from_stack_op(result, ty))
        } else {
            let buf = Buffer::new(result, ty.memory_bytes_required(), Some("ternary".to_owned()));
            Ok(VyperValue::from_ptr(buf.base_ptr(), ty))
        }
    }
}

/// Rescales a decimal literal mantissa from `10^-scale` to the fixed
/// `10^-10` representation, truncating toward zero.
fn scale_decimal(value: &BigInt, scale: u32) -> BigInt {
    match scale.cmp(&10) {
        std::cmp::Ordering::Less => value * BigInt::from(10u64).pow(10 - scale),
        std::cmp::Ordering::Equal => value.clone(),
        std::cmp::Ordering::Greater => value / BigInt::from(10u64).pow(scale - 10),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn decimal_scaling() {
        // 1.5 as (15, scale 1) becomes 15 * 10^9
        assert_eq!(scale_decimal(&BigInt::from(15), 1), BigInt::from(15_000_000_000u64));
        // already at scale 10
        assert_eq!(scale_decimal(&BigInt::from(7), 10), BigInt::from(7));
        // excess precision truncates toward zero
        assert_eq!(scale_decimal(&BigInt::from(-19), 11), BigInt::from(-1));
    }
}
