//! Event emission.
//!
//! `log Transfer(...)` evaluates every argument in source order, hashes
//! topic0 from the event signature at compile time, turns each indexed
//! argument into a topic (hashing non-primitive ones), ABI-encodes the
//! remaining arguments as a tuple, and emits `log` with 1 + n_indexed
//! topics.

use crate::{
    ast::{EventDef, ExprNode, StmtNode},
    codegen::{abi::abi_encode_to_buf, context::CodegenContext, value::VyperValue},
    errors::{CodegenError, CodegenResult},
    types::{ceil32, VyperType},
    venom::IROperand,
};

impl CodegenContext<'_, '_> {
    pub(crate) fn lower_log(
        &mut self,
        node: &StmtNode,
        event: &EventDef,
        args: &[ExprNode],
    ) -> CodegenResult<()> {
        self.check_is_not_constant("emit an event", node.span)?;
        if args.len() != event.args.len() {
            return Err(CodegenError::panic_at("event argument arity mismatch", node.span));
        }

        // evaluate once, in source order
        let values: Vec<VyperValue> = args
            .iter()
            .map(|arg| self.lower_expr(arg))
            .collect::<CodegenResult<_>>()?;

        let mut topics: Vec<IROperand> = vec![IROperand::literal(event.topic0())];
        for (decl, value) in event.args.iter().zip(&values) {
            if !decl.indexed {
                continue;
            }
            if decl.ty.is_prim_word() {
                topics.push(self.unwrap(value)?);
            } else {
                // non-primitive topics log their content hash
                let data = self.bytes_data_ptr(value)?;
                let len = self.bytestring_length(value)?;
                topics.push(self.builder.sha3(data, len).into());
            }
        }

        let data_types: Vec<VyperType> = event
            .args
            .iter()
            .filter(|a| !a.indexed)
            .map(|a| a.ty.clone())
            .collect();

        let (data_ptr, data_len): (IROperand, IROperand) = if data_types.is_empty() {
            (IROperand::literal(0), IROperand::literal(0))
        } else {
            // stage the non-indexed arguments as a tuple, then encode
            let tuple_ty = VyperType::Tuple {
                members: data_types.clone(),
            };
            let staged = self.new_temporary_value(&tuple_ty);
            let base = staged.operand();
            let mut offset = 0usize;
            for (decl, value) in event.args.iter().zip(&values) {
                if decl.indexed {
                    continue;
                }
                let dst = if offset == 0 {
                    base.clone()
                } else {
                    IROperand::Variable(self.builder.add(base.clone(), offset))
                };
                self.store_memory(value, dst, &decl.ty)?;
                offset += decl.ty.memory_bytes_required();
            }

            let bound = tuple_ty.abi_type().size_bound();
            let out = self.allocate_buffer(ceil32(bound), Some("log_data"));
            let out_ptr = out.base_ptr().operand;
            let len = abi_encode_to_buf(self, out_ptr.clone(), &base, &tuple_ty)?;
            (out_ptr, len)
        };

        self.builder.log(topics.len(), data_ptr, data_len, &topics);
        Ok(())
    }
}
