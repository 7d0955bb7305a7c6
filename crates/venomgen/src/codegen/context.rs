//! Per-function codegen state and memory primitives.
//!
//! One `CodegenContext` exists per function being lowered. It owns the
//! builder, the local variable table, the scope stack, loop and return
//! targets, and the constancy flag. All memory traffic in lowering code
//! goes through the primitives defined here so that location dispatch and
//! materialization live in exactly one place.

use ahash::{AHashMap, AHashSet};

use crate::{
    ast::{FunctionDef, Module},
    codegen::value::{Buffer, Ptr, VyperValue},
    errors::{CodegenError, CodegenResult, Span},
    settings::Settings,
    types::{DataLocation, VyperType},
    venom::{BlockId, IROperand, IRVariable, VenomBuilder},
};

/// Whether the function being lowered may mutate persistent state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constancy {
    Mutable,
    Constant,
}

/// A local variable tracked during lowering.
#[derive(Debug, Clone)]
pub struct VenomVariable {
    pub name: String,
    pub ty: VyperType,
    pub buf: Buffer,
    pub mutable: bool,
    pub is_internal: bool,
    /// Scope ids active at declaration; used for block-scope cleanup.
    pub scopes: AHashSet<u32>,
}

/// Tracks state during direct Venom codegen of one function.
pub struct CodegenContext<'a, 'm> {
    pub module: &'m Module,
    pub settings: Settings,
    pub builder: VenomBuilder<'a>,

    variables: AHashMap<String, VenomVariable>,
    scopes: AHashSet<u32>,
    scope_id: u32,
    alloca_id: u32,
    internal_var_id: u32,

    pub func: Option<FunctionDef>,
    pub constancy: Constancy,
    pub is_ctor_context: bool,

    pub break_target: Option<BlockId>,
    pub continue_target: Option<BlockId>,

    pub return_label: Option<BlockId>,
    pub return_buffer: Option<Buffer>,

    /// Names bound by an enclosing `for` header; assignment to these is
    /// rejected.
    pub forvars: AHashSet<String>,
}

impl<'a, 'm> CodegenContext<'a, 'm> {
    pub fn new(module: &'m Module, settings: Settings, builder: VenomBuilder<'a>) -> Self {
        Self {
            module,
            settings,
            builder,
            variables: AHashMap::new(),
            scopes: AHashSet::new(),
            scope_id: 0,
            alloca_id: 0,
            internal_var_id: 0,
            func: None,
            constancy: Constancy::Mutable,
            is_ctor_context: false,
            break_target: None,
            continue_target: None,
            return_label: None,
            return_buffer: None,
            forvars: AHashSet::new(),
        }
    }

    // === Constancy ===

    #[must_use]
    pub fn is_constant(&self) -> bool {
        self.constancy == Constancy::Constant
    }

    /// Error text for the current constancy, used in diagnostics.
    #[must_use]
    pub fn pp_constancy(&self) -> &'static str {
        if self.is_ctor_context {
            "a constructor"
        } else if self.is_constant() {
            "a constant function"
        } else {
            "this context"
        }
    }

    /// Rejects state mutation in view/pure functions.
    pub fn check_is_not_constant(&self, what: &str, span: Span) -> CodegenResult<()> {
        if self.is_constant() {
            return Err(CodegenError::state_access(
                format!("Cannot {what} from {}", self.pp_constancy()),
                span,
            ));
        }
        Ok(())
    }

    // === Variable Table ===

    fn new_alloca_id(&mut self) -> u32 {
        self.alloca_id += 1;
        self.alloca_id
    }

    /// Allocates a raw memory buffer.
    pub fn allocate_buffer(&mut self, size: usize, annotation: Option<&str>) -> Buffer {
        let alloca_id = self.new_alloca_id();
        let ptr = self.builder.alloca(size, alloca_id);
        Buffer::new(ptr, size, annotation.map(ToOwned::to_owned))
    }

    /// Allocates memory for a named user variable and registers it.
    pub fn new_variable(&mut self, name: &str, ty: &VyperType, mutable: bool) -> Buffer {
        let buf = self.allocate_buffer(ty.memory_bytes_required(), Some(name));
        self.register_variable(name, ty.clone(), buf.clone(), mutable, false);
        buf
    }

    /// Allocates memory for a compiler-internal variable.
    pub fn new_internal_variable(&mut self, ty: &VyperType) -> Buffer {
        self.internal_var_id += 1;
        let name = format!("#internal{}", self.internal_var_id);
        let buf = self.allocate_buffer(ty.memory_bytes_required(), Some(&name));
        self.register_variable(&name, ty.clone(), buf.clone(), true, true);
        buf
    }

    /// Allocates a typed temporary and returns it as a located value.
    pub fn new_temporary_value(&mut self, ty: &VyperType) -> VyperValue {
        let buf = self.new_internal_variable(ty);
        VyperValue::from_ptr(buf.base_ptr(), ty.clone())
    }

    /// Registers a variable backed by an existing buffer (used for
    /// function arguments that point into the decoded argument tuple).
    pub fn register_variable(
        &mut self,
        name: &str,
        ty: VyperType,
        buf: Buffer,
        mutable: bool,
        is_internal: bool,
    ) {
        self.variables.insert(
            name.to_owned(),
            VenomVariable {
                name: name.to_owned(),
                ty,
                buf,
                mutable,
                is_internal,
                scopes: self.scopes.clone(),
            },
        );
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&VenomVariable> {
        self.variables.get(name)
    }

    // === Scopes ===

    /// Runs `f` in a fresh block scope. Variables declared inside are
    /// dropped from the table on exit, on success and error paths alike.
    pub fn block_scope<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> CodegenResult<T>,
    ) -> CodegenResult<T> {
        let scope_id = self.scope_id;
        self.scope_id += 1;
        self.scopes.insert(scope_id);

        let result = f(self);

        self.variables.retain(|_, var| !var.scopes.contains(&scope_id));
        self.scopes.remove(&scope_id);
        result
    }

    /// Installs loop targets, runs `f` under a block scope, and restores
    /// the previous targets on all exit paths.
    pub fn loop_scope<T>(
        &mut self,
        break_bb: BlockId,
        continue_bb: BlockId,
        f: impl FnOnce(&mut Self) -> CodegenResult<T>,
    ) -> CodegenResult<T> {
        let old_break = self.break_target.replace(break_bb);
        let old_continue = self.continue_target.replace(continue_bb);

        let result = self.block_scope(f);

        self.break_target = old_break;
        self.continue_target = old_continue;
        result
    }

    // === Single-word access through pointers ===

    /// Loads one word through a pointer, dispatching on its location.
    pub fn ptr_load(&mut self, ptr: &Ptr) -> CodegenResult<IRVariable> {
        let b = &mut self.builder;
        let op = ptr.operand.clone();
        Ok(match ptr.location {
            DataLocation::Memory => b.mload(op),
            DataLocation::Storage => b.sload(op),
            DataLocation::Transient => b.tload(op),
            DataLocation::Calldata => b.calldataload(op),
            DataLocation::Code => b.iload(op),
        })
    }

    /// Stores one word through a pointer.
    pub fn ptr_store(&mut self, ptr: &Ptr, val: impl Into<IROperand>) -> CodegenResult<()> {
        let b = &mut self.builder;
        let op = ptr.operand.clone();
        match ptr.location {
            DataLocation::Memory => b.mstore(val, op),
            DataLocation::Storage => b.sstore(val, op),
            DataLocation::Transient => b.tstore(val, op),
            DataLocation::Code => {
                if !self.is_ctor_context {
                    return Err(CodegenError::panic(
                        "immutable store outside constructor context",
                    ));
                }
                b.istore(val, op);
            }
            DataLocation::Calldata => {
                return Err(CodegenError::panic("cannot store through calldata pointer"));
            }
        }
        Ok(())
    }

    /// Offsets a pointer, preserving location and buffer provenance.
    /// Literal pointers with literal offsets fold at compile time.
    pub fn add_offset(&mut self, ptr: &Ptr, offset: impl Into<IROperand>) -> Ptr {
        let offset = offset.into();
        if let Some(lit) = offset.as_literal()
            && lit.is_zero()
        {
            return ptr.clone();
        }
        let operand = if let (Some(base), Some(off)) =
            (ptr.operand.as_literal(), offset.as_literal())
        {
            IROperand::literal(base.to_signed() + off.to_signed())
        } else {
            IROperand::Variable(self.builder.add(ptr.operand.clone(), offset))
        };
        Ptr {
            operand,
            location: ptr.location,
            buf: ptr.buf.clone(),
        }
    }

    // === Memory copies ===

    /// Copies a statically sized memory region.
    pub fn copy_memory(&mut self, dst: impl Into<IROperand>, src: impl Into<IROperand>, size: usize) {
        let dst = dst.into();
        let src = src.into();
        if size == 0 {
            return;
        }
        debug_assert!(size % 32 == 0, "memory copies are word-granular");
        let words = size / 32;
        // short copies unroll; anything longer uses a single mcopy or a
        // word loop depending on the target
        if words <= 4 || (!self.settings.evm_version.has_mcopy() && words <= 8) {
            for i in 0..words {
                let src_i = self.word_offset(&src, i);
                let dst_i = self.word_offset(&dst, i);
                let word = self.builder.mload(src_i);
                self.builder.mstore(word, dst_i);
            }
        } else if self.settings.evm_version.has_mcopy() {
            self.builder.mcopy(size, src, dst);
        } else {
            self.copy_memory_dynamic(dst, src, IROperand::from(size));
        }
    }

    /// Copies a dynamically sized memory region in 32-byte words.
    ///
    /// The word loop may copy up to 31 bytes past `size`; every buffer the
    /// compiler allocates is padded to a 32-byte multiple, so the slack
    /// stays inside the destination allocation.
    pub fn copy_memory_dynamic(
        &mut self,
        dst: impl Into<IROperand>,
        src: impl Into<IROperand>,
        size: impl Into<IROperand>,
    ) {
        let dst = dst.into();
        let src = src.into();
        let size = size.into();
        if self.settings.evm_version.has_mcopy() {
            self.builder.mcopy(size, src, dst);
            return;
        }

        let b = &mut self.builder;
        let i = b.new_variable();
        b.assign_to(IROperand::literal(0), i);

        let cond_bb = b.create_block("copy_cond");
        let body_bb = b.create_block("copy_body");
        let exit_bb = b.create_block("copy_exit");
        b.jmp(b.block_label(cond_bb));

        b.append_block(cond_bb);
        b.set_block(cond_bb);
        let more = b.lt(i, size);
        b.jnz(more, b.block_label(body_bb), b.block_label(exit_bb));

        b.append_block(body_bb);
        b.set_block(body_bb);
        let src_i = b.add(src, i);
        let word = b.mload(src_i);
        let dst_i = b.add(dst, i);
        b.mstore(word, dst_i);
        let next = b.add(i, 32u64);
        b.assign_to(next, i);
        b.jmp(b.block_label(cond_bb));

        b.append_block(exit_bb);
        b.set_block(exit_bb);
    }

    /// Copies `word_count` words from a storage-like location into memory.
    pub fn slot_to_memory(
        &mut self,
        slot: impl Into<IROperand>,
        dst: impl Into<IROperand>,
        word_count: usize,
        loc: DataLocation,
    ) -> CodegenResult<()> {
        let slot = slot.into();
        let dst = dst.into();
        for i in 0..word_count {
            let slot_i = self.slot_offset(&slot, i);
            let word = match loc {
                DataLocation::Storage => self.builder.sload(slot_i),
                DataLocation::Transient => self.builder.tload(slot_i),
                DataLocation::Code => {
                    // the immutable section is byte-addressed
                    let ofst = self.word_offset(&slot, i);
                    self.builder.iload(ofst)
                }
                other => {
                    return Err(CodegenError::panic(format!(
                        "slot_to_memory from {other}"
                    )));
                }
            };
            let dst_i = self.word_offset(&dst, i);
            self.builder.mstore(word, dst_i);
        }
        Ok(())
    }

    /// Copies `word_count` words from memory into a storage-like location.
    pub fn memory_to_slot(
        &mut self,
        src: impl Into<IROperand>,
        slot: impl Into<IROperand>,
        word_count: usize,
        loc: DataLocation,
    ) -> CodegenResult<()> {
        let src = src.into();
        let slot = slot.into();
        for i in 0..word_count {
            let src_i = self.word_offset(&src, i);
            let word = self.builder.mload(src_i);
            let slot_i = self.slot_offset(&slot, i);
            match loc {
                DataLocation::Storage => self.builder.sstore(word, slot_i),
                DataLocation::Transient => self.builder.tstore(word, slot_i),
                DataLocation::Code => {
                    let ofst = self.word_offset(&slot, i);
                    self.builder.istore(word, ofst);
                }
                other => {
                    return Err(CodegenError::panic(format!("memory_to_slot into {other}")));
                }
            }
        }
        Ok(())
    }

    /// Writes zeros over a memory region.
    pub fn zero_memory(&mut self, ptr: impl Into<IROperand>, size: usize) {
        let ptr = ptr.into();
        for i in 0..size.div_ceil(32) {
            let dst = self.word_offset(&ptr, i);
            self.builder.mstore(0u64, dst);
        }
    }

    // byte offset of word `i`, folding when the base is a literal
    fn word_offset(&mut self, base: &IROperand, i: usize) -> IROperand {
        if i == 0 {
            return base.clone();
        }
        if let Some(lit) = base.as_literal() {
            return IROperand::literal(lit.to_signed() + num_bigint::BigInt::from(32 * i));
        }
        IROperand::Variable(self.builder.add(base.clone(), 32 * i))
    }

    // slot offsets are word-indexed, not byte-indexed
    fn slot_offset(&mut self, base: &IROperand, i: usize) -> IROperand {
        if i == 0 {
            return base.clone();
        }
        if let Some(lit) = base.as_literal() {
            return IROperand::literal(lit.to_signed() + num_bigint::BigInt::from(i));
        }
        IROperand::Variable(self.builder.add(base.clone(), i))
    }

    /// Emits `for i in 0..n` around `f`, with `i` counting by one.
    /// Used for runtime-length element loops (ABI codec, copies).
    pub(crate) fn counted_loop(
        &mut self,
        n: impl Into<IROperand>,
        mut f: impl FnMut(&mut Self, IRVariable) -> CodegenResult<()>,
    ) -> CodegenResult<()> {
        let n = n.into();
        let b = &mut self.builder;
        let i = b.new_variable();
        b.assign_to(IROperand::literal(0), i);

        let cond_bb = b.create_block("loop_cond");
        let body_bb = b.create_block("loop_body");
        let exit_bb = b.create_block("loop_exit");
        b.jmp(b.block_label(cond_bb));

        b.append_block(cond_bb);
        b.set_block(cond_bb);
        let more = b.lt(i, n);
        b.jnz(more, b.block_label(body_bb), b.block_label(exit_bb));

        b.append_block(body_bb);
        b.set_block(body_bb);
        f(self, i)?;

        let b = &mut self.builder;
        let next = b.add(i, 1u64);
        b.assign_to(next, i);
        b.jmp(b.block_label(cond_bb));

        b.append_block(exit_bb);
        b.set_block(exit_bb);
        Ok(())
    }

    /// `ceil32` of a runtime value: `(x + 31) & ~31`.
    pub fn ceil32_op(&mut self, x: impl Into<IROperand>) -> IRVariable {
        let padded = self.builder.add(x, 31u64);
        let mask = (num_bigint::BigInt::from(1) << 256) - 32;
        self.builder.and(padded, mask)
    }

    // === Typed access ===

    /// Loads a primitive from storage, or reports a bug for compounds.
    pub fn load_storage(&mut self, slot: impl Into<IROperand>, ty: &VyperType) -> CodegenResult<IRVariable> {
        if !ty.is_prim_word() {
            return Err(CodegenError::panic("load_storage on compound type"));
        }
        Ok(self.builder.sload(slot))
    }

    /// Stores a primitive to storage.
    pub fn store_storage(&mut self, val: impl Into<IROperand>, slot: impl Into<IROperand>, ty: &VyperType) -> CodegenResult<()> {
        if !ty.is_prim_word() {
            return Err(CodegenError::panic("store_storage on compound type"));
        }
        self.builder.sstore(val, slot);
        Ok(())
    }

    /// Reads the length word of a dynamic array or bytestring,
    /// location-agnostic.
    pub fn get_dyn_array_length(&mut self, ptr: &Ptr) -> CodegenResult<IRVariable> {
        self.ptr_load(ptr)
    }

    /// Writes the length word of a dynamic array or bytestring.
    pub fn set_dyn_array_length(&mut self, ptr: &Ptr, len: impl Into<IROperand>) -> CodegenResult<()> {
        self.ptr_store(ptr, len)
    }

    /// Loads the value out of a `VyperValue`.
    ///
    /// Stack values pass through. Located primitives load one word.
    /// Located compounds materialize: memory values yield their pointer,
    /// storage and transient values are first copied into a fresh memory
    /// buffer whose pointer is returned.
    pub fn unwrap(&mut self, vv: &VyperValue) -> CodegenResult<IROperand> {
        match vv {
            VyperValue::Stack { operand, .. } => Ok(operand.clone()),
            VyperValue::Located { ptr, ty } => {
                if ty.is_prim_word() {
                    return Ok(IROperand::Variable(self.ptr_load(ptr)?));
                }
                match ptr.location {
                    DataLocation::Memory => Ok(ptr.operand.clone()),
                    loc @ (DataLocation::Storage | DataLocation::Transient | DataLocation::Code) => {
                        let tmp = self.new_temporary_value(ty);
                        self.slot_to_memory(
                            ptr.operand.clone(),
                            tmp.operand(),
                            ty.storage_size_in_words(),
                            loc,
                        )?;
                        Ok(tmp.operand())
                    }
                    DataLocation::Calldata => Err(CodegenError::panic(
                        "compound calldata value cannot be unwrapped directly",
                    )),
                }
            }
        }
    }

    /// Pointer to the data area of a bytestring (skips the length word).
    pub fn bytes_data_ptr(&mut self, vv: &VyperValue) -> CodegenResult<IRVariable> {
        let base = self.unwrap(vv)?;
        Ok(self.builder.add(base, 32u64))
    }

    /// The length word of a bytestring, read in place.
    pub fn bytestring_length(&mut self, vv: &VyperValue) -> CodegenResult<IRVariable> {
        let ptr = vv.ptr()?;
        self.ptr_load(ptr)
    }

    /// Type-directed store through a pointer in any location: one word
    /// for primitives, a location-dispatched copy for compounds.
    pub fn store_through_ptr(&mut self, val: &VyperValue, dst: &Ptr, ty: &VyperType) -> CodegenResult<()> {
        if ty.is_prim_word() {
            let word = self.unwrap(val)?;
            return self.ptr_store(dst, word);
        }
        let src = self.unwrap(val)?;
        match dst.location {
            DataLocation::Memory => {
                self.copy_memory(dst.operand.clone(), src, ty.memory_bytes_required());
                Ok(())
            }
            loc @ (DataLocation::Storage | DataLocation::Transient | DataLocation::Code) => {
                self.memory_to_slot(src, dst.operand.clone(), ty.storage_size_in_words(), loc)
            }
            DataLocation::Calldata => Err(CodegenError::panic("store into calldata")),
        }
    }

    /// Allocates a `calloca` staging region tied to a call site.
    pub fn allocate_call_buffer(&mut self, size: usize, callsite: crate::venom::IRLabel) -> IRVariable {
        let id = self.new_alloca_id();
        self.builder.calloca(size, id, callsite)
    }

    /// Type-directed store of `val` into memory at `dst`: a single
    /// `mstore` for primitives, a copy for compounds.
    pub fn store_memory(&mut self, val: &VyperValue, dst: impl Into<IROperand>, ty: &VyperType) -> CodegenResult<()> {
        let dst = dst.into();
        if ty.is_prim_word() {
            let word = self.unwrap(val)?;
            self.builder.mstore(word, dst);
        } else {
            let src = self.unwrap(val)?;
            self.copy_memory(dst, src, ty.memory_bytes_required());
        }
        Ok(())
    }

    // === Aliasing ===

    /// Conservative static aliasing check used by compound assignment.
    /// Sizes are in the location's native unit (bytes for memory, words
    /// for storage and transient). Returns false only when the two
    /// regions are provably disjoint.
    #[must_use]
    pub fn may_alias(&self, a: &Ptr, a_size: usize, b: &Ptr, b_size: usize) -> bool {
        if a.location != b.location {
            return false;
        }
        if let (Some(buf_a), Some(buf_b)) = (&a.buf, &b.buf)
            && buf_a.base_var() != buf_b.base_var()
        {
            // distinct allocations never overlap
            return false;
        }
        match (a.operand.as_literal(), b.operand.as_literal()) {
            (Some(la), Some(lb)) => {
                let (la, lb) = (la.to_signed(), lb.to_signed());
                let a_end = &la + num_bigint::BigInt::from(a_size);
                let b_end = &lb + num_bigint::BigInt::from(b_size);
                !(a_end <= lb || b_end <= la)
            }
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        ast::Module,
        settings::{EvmVersion, Settings},
        types::UINT256,
        venom::{IRContext, IRFunction, IRLabel},
    };

    fn empty_module() -> Module {
        Module {
            name: "test".to_owned(),
            functions: vec![],
            events: vec![],
            immutables_size: 0,
        }
    }

    fn lower_with(
        settings: Settings,
        f: impl FnOnce(&mut CodegenContext) -> CodegenResult<()>,
    ) -> IRContext {
        let module = empty_module();
        let mut ir = IRContext::new();
        let func = IRFunction::new(IRLabel::new("test"));
        let builder = VenomBuilder::new(&mut ir, func);
        let mut ctx = CodegenContext::new(&module, settings, builder);
        f(&mut ctx).unwrap();
        ctx.builder.finish();
        ir
    }

    fn opcode_names(ir: &IRContext) -> Vec<String> {
        ir.get_function(&IRLabel::new("test"))
            .unwrap()
            .blocks_in_order()
            .flat_map(|bb| bb.instructions.iter().map(|i| i.opcode.to_string()))
            .collect()
    }

    #[test]
    fn block_scope_drops_variables() {
        lower_with(Settings::default(), |ctx| {
            ctx.new_variable("outer", &UINT256, true);
            ctx.block_scope(|ctx| {
                ctx.new_variable("inner", &UINT256, true);
                assert!(ctx.lookup("inner").is_some());
                Ok(())
            })?;
            assert!(ctx.lookup("inner").is_none());
            assert!(ctx.lookup("outer").is_some());
            Ok(())
        });
    }

    #[test]
    fn loop_scope_restores_targets_on_error() {
        lower_with(Settings::default(), |ctx| {
            let bb = ctx.builder.create_block("loop");
            let result: CodegenResult<()> =
                ctx.loop_scope(bb, bb, |_| Err(CodegenError::panic("forced")));
            assert!(result.is_err());
            assert_eq!(ctx.break_target, None);
            assert_eq!(ctx.continue_target, None);
            Ok(())
        });
    }

    #[test]
    fn dynamic_copy_uses_mcopy_on_cancun() {
        let ir = lower_with(Settings::default(), |ctx| {
            let size = ctx.builder.calldatasize();
            ctx.copy_memory_dynamic(64u64, 0u64, size);
            ctx.builder.stop();
            Ok(())
        });
        assert!(opcode_names(&ir).contains(&"mcopy".to_owned()));
    }

    #[test]
    fn dynamic_copy_loops_before_cancun() {
        let settings = Settings {
            evm_version: EvmVersion::Shanghai,
        };
        let ir = lower_with(settings, |ctx| {
            let size = ctx.builder.calldatasize();
            ctx.copy_memory_dynamic(64u64, 0u64, size);
            ctx.builder.stop();
            Ok(())
        });
        let names = opcode_names(&ir);
        assert!(!names.contains(&"mcopy".to_owned()));
        assert!(names.contains(&"jnz".to_owned()));
        assert!(names.contains(&"mload".to_owned()));
    }

    #[test]
    fn constancy_violation_reports_span() {
        lower_with(Settings::default(), |ctx| {
            ctx.constancy = Constancy::Constant;
            let err = ctx
                .check_is_not_constant("send ether", Span::new(1, 2))
                .unwrap_err();
            assert!(matches!(err, CodegenError::StateAccessViolation { .. }));
            Ok(())
        });
    }
}
