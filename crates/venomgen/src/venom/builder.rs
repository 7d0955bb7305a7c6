//! Emission facade over the IR model.
//!
//! The builder owns the function being built, a block cursor, and a
//! mutable borrow of the surrounding [`IRContext`] (for labels and the
//! data section). All codegen emission goes through it: one method per
//! opcode, returning the fresh SSA result variable where the opcode
//! produces one.
//!
//! Non-commutative EVM operations take operands in mathematical order at
//! this boundary and are reversed internally so the stored instruction
//! matches EVM stack discipline. Callers never see the reversal.

use smallvec::SmallVec;

use crate::{
    errors::{CodegenResult, Span},
    venom::{
        basicblock::{BlockId, IRInstruction, IRLabel, IRLiteral, IROperand, IRVariable},
        context::IRContext,
        function::IRFunction,
        op::Opcode,
    },
};

pub struct VenomBuilder<'a> {
    ctx: &'a mut IRContext,
    func: IRFunction,
    current: BlockId,
}

impl<'a> VenomBuilder<'a> {
    /// Starts building `func`, with the entry block as the cursor.
    pub fn new(ctx: &'a mut IRContext, func: IRFunction) -> Self {
        let current = func.entry();
        Self { ctx, func, current }
    }

    /// Finishes the function and inserts it into the context.
    pub fn finish(self) -> IRLabel {
        let label = self.func.name.clone();
        self.ctx.insert_function(self.func);
        label
    }

    /// The surrounding compilation unit.
    pub fn context_mut(&mut self) -> &mut IRContext {
        self.ctx
    }

    /// The function under construction.
    #[must_use]
    pub fn function(&self) -> &IRFunction {
        &self.func
    }

    // === Block Management ===

    /// Current emission target.
    #[must_use]
    pub fn current_block(&self) -> BlockId {
        self.current
    }

    /// Creates a new detached block with a context-unique label. Does not
    /// switch to it or append it.
    pub fn create_block(&mut self, suffix: &str) -> BlockId {
        let label = self.ctx.get_next_label(suffix);
        self.func.create_block(label)
    }

    /// Appends a block to the function (required before emitting into it).
    pub fn append_block(&mut self, bb: BlockId) {
        self.func.append_block(bb);
    }

    /// Moves the emission cursor.
    pub fn set_block(&mut self, bb: BlockId) {
        self.current = bb;
    }

    /// Creates, appends, and switches to a new block.
    pub fn create_and_switch_block(&mut self, suffix: &str) -> BlockId {
        let bb = self.create_block(suffix);
        self.append_block(bb);
        self.set_block(bb);
        bb
    }

    /// Whether the current block already ends in a terminator.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.func.block(self.current).is_terminated()
    }

    /// Label of a block, for jump operands.
    #[must_use]
    pub fn block_label(&self, bb: BlockId) -> IRLabel {
        self.func.label_of(bb).clone()
    }

    /// Mints a context-unique label without creating a block (used for
    /// call-site markers).
    pub fn fresh_label(&mut self, suffix: &str) -> IRLabel {
        self.ctx.get_next_label(suffix)
    }

    /// Mints a fresh SSA variable without emitting an instruction.
    ///
    /// Used for ternary results and loop counters, which are later
    /// written through `assign_to`.
    pub fn new_variable(&mut self) -> IRVariable {
        self.func.get_next_variable()
    }

    // === Source Tracking ===

    /// Pushes a source range; prefer [`Self::with_source`] or
    /// `CodegenContext::with_source`, which guarantee the pop.
    pub fn push_source(&mut self, span: Span) {
        self.func.push_source(span);
    }

    pub fn pop_source(&mut self) {
        self.func.pop_source();
    }

    /// Runs `f` with `span` as the active source range; every instruction
    /// emitted inside captures it. The range is popped on all exit paths.
    pub fn with_source<T>(
        &mut self,
        span: Span,
        f: impl FnOnce(&mut Self) -> CodegenResult<T>,
    ) -> CodegenResult<T> {
        self.func.push_source(span);
        let result = f(self);
        self.func.pop_source();
        result
    }

    // === Arithmetic ===

    pub fn add(&mut self, a: impl Into<IROperand>, b: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Add, [a.into(), b.into()])
    }

    pub fn sub(&mut self, a: impl Into<IROperand>, b: impl Into<IROperand>) -> IRVariable {
        // reversed for EVM stack order
        self.emit1(Opcode::Sub, [b.into(), a.into()])
    }

    pub fn mul(&mut self, a: impl Into<IROperand>, b: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Mul, [a.into(), b.into()])
    }

    pub fn div(&mut self, a: impl Into<IROperand>, b: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Div, [b.into(), a.into()])
    }

    pub fn sdiv(&mut self, a: impl Into<IROperand>, b: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Sdiv, [b.into(), a.into()])
    }

    pub fn modulo(&mut self, a: impl Into<IROperand>, b: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Mod, [b.into(), a.into()])
    }

    pub fn smod(&mut self, a: impl Into<IROperand>, b: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Smod, [b.into(), a.into()])
    }

    pub fn exp(&mut self, base: impl Into<IROperand>, exponent: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Exp, [exponent.into(), base.into()])
    }

    pub fn addmod(
        &mut self,
        a: impl Into<IROperand>,
        b: impl Into<IROperand>,
        n: impl Into<IROperand>,
    ) -> IRVariable {
        self.emit1(Opcode::Addmod, [a.into(), b.into(), n.into()])
    }

    pub fn mulmod(
        &mut self,
        a: impl Into<IROperand>,
        b: impl Into<IROperand>,
        n: impl Into<IROperand>,
    ) -> IRVariable {
        self.emit1(Opcode::Mulmod, [a.into(), b.into(), n.into()])
    }

    pub fn signextend(
        &mut self,
        byte_width: impl Into<IROperand>,
        val: impl Into<IROperand>,
    ) -> IRVariable {
        self.emit1(Opcode::Signextend, [val.into(), byte_width.into()])
    }

    // === Bitwise ===

    pub fn and(&mut self, a: impl Into<IROperand>, b: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::And, [a.into(), b.into()])
    }

    pub fn or(&mut self, a: impl Into<IROperand>, b: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Or, [a.into(), b.into()])
    }

    pub fn xor(&mut self, a: impl Into<IROperand>, b: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Xor, [a.into(), b.into()])
    }

    pub fn not(&mut self, a: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Not, [a.into()])
    }

    pub fn shl(&mut self, bits: impl Into<IROperand>, val: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Shl, [val.into(), bits.into()])
    }

    pub fn shr(&mut self, bits: impl Into<IROperand>, val: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Shr, [val.into(), bits.into()])
    }

    pub fn sar(&mut self, bits: impl Into<IROperand>, val: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Sar, [val.into(), bits.into()])
    }

    // === Comparison ===

    pub fn eq(&mut self, a: impl Into<IROperand>, b: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Eq, [a.into(), b.into()])
    }

    pub fn lt(&mut self, a: impl Into<IROperand>, b: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Lt, [b.into(), a.into()])
    }

    pub fn gt(&mut self, a: impl Into<IROperand>, b: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Gt, [b.into(), a.into()])
    }

    pub fn slt(&mut self, a: impl Into<IROperand>, b: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Slt, [b.into(), a.into()])
    }

    pub fn sgt(&mut self, a: impl Into<IROperand>, b: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Sgt, [b.into(), a.into()])
    }

    pub fn iszero(&mut self, a: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Iszero, [a.into()])
    }

    // === Memory ===

    pub fn mload(&mut self, ptr: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Mload, [ptr.into()])
    }

    /// Stores `val` at memory `ptr`. Operand order matches the venom
    /// text format, not the argument order.
    pub fn mstore(&mut self, val: impl Into<IROperand>, ptr: impl Into<IROperand>) {
        self.emit(Opcode::Mstore, [val.into(), ptr.into()]);
    }

    /// Copies `size` bytes from `src` to `dst` within memory.
    pub fn mcopy(
        &mut self,
        size: impl Into<IROperand>,
        src: impl Into<IROperand>,
        dst: impl Into<IROperand>,
    ) {
        self.emit(Opcode::Mcopy, [size.into(), src.into(), dst.into()]);
    }

    pub fn msize(&mut self) -> IRVariable {
        self.emit1(Opcode::Msize, [])
    }

    /// Allocates abstract memory; the concrete offset is chosen by a
    /// later pass. Returns the pointer.
    pub fn alloca(&mut self, size: usize, alloca_id: u32) -> IRVariable {
        self.emit1(
            Opcode::Alloca,
            [IROperand::from(size), IROperand::from(u64::from(alloca_id))],
        )
    }

    /// Allocates parameter memory in the callee frame.
    pub fn palloca(&mut self, size: usize, alloca_id: u32) -> IRVariable {
        self.emit1(
            Opcode::Palloca,
            [IROperand::from(size), IROperand::from(u64::from(alloca_id))],
        )
    }

    /// Allocates argument staging memory at a call site. The callsite
    /// label ties the allocation to a specific invoke.
    pub fn calloca(&mut self, size: usize, alloca_id: u32, callsite: IRLabel) -> IRVariable {
        self.emit1(
            Opcode::Calloca,
            [
                IROperand::from(size),
                IROperand::from(u64::from(alloca_id)),
                IROperand::from(callsite),
            ],
        )
    }

    /// Pointer arithmetic into an abstract memory region.
    pub fn gep(&mut self, ptr: impl Into<IROperand>, offset: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Gep, [ptr.into(), offset.into()])
    }

    // === Storage ===

    pub fn sload(&mut self, slot: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Sload, [slot.into()])
    }

    pub fn sstore(&mut self, val: impl Into<IROperand>, slot: impl Into<IROperand>) {
        self.emit(Opcode::Sstore, [val.into(), slot.into()]);
    }

    pub fn tload(&mut self, slot: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Tload, [slot.into()])
    }

    pub fn tstore(&mut self, val: impl Into<IROperand>, slot: impl Into<IROperand>) {
        self.emit(Opcode::Tstore, [val.into(), slot.into()]);
    }

    // === Immutables / Data Section ===

    /// Loads 32 bytes from the data section.
    pub fn dload(&mut self, offset: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Dload, [offset.into()])
    }

    /// Copies `size` bytes from the data section (`src`) to memory (`dst`).
    pub fn dloadbytes(
        &mut self,
        size: impl Into<IROperand>,
        src: impl Into<IROperand>,
        dst: impl Into<IROperand>,
    ) {
        self.emit(Opcode::Dloadbytes, [size.into(), src.into(), dst.into()]);
    }

    /// Loads from the immutable region.
    pub fn iload(&mut self, offset: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Iload, [offset.into()])
    }

    /// Stores to the immutable region. Deploy-time only.
    pub fn istore(&mut self, val: impl Into<IROperand>, offset: impl Into<IROperand>) {
        self.emit(Opcode::Istore, [val.into(), offset.into()]);
    }

    /// Static offset from a label, resolved by the backend.
    pub fn offset(&mut self, label: IRLabel, operand: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Offset, [IROperand::from(label), operand.into()])
    }

    // === Control Flow ===

    /// Unconditional jump. Terminates the block.
    pub fn jmp(&mut self, target: IRLabel) {
        self.emit(Opcode::Jmp, [IROperand::from(target)]);
    }

    /// Conditional branch: jumps to `then_label` when `cond` is nonzero.
    /// Terminates the block.
    pub fn jnz(&mut self, cond: impl Into<IROperand>, then_label: IRLabel, else_label: IRLabel) {
        self.emit(
            Opcode::Jnz,
            [cond.into(), IROperand::from(then_label), IROperand::from(else_label)],
        );
    }

    /// Dynamic jump; `target` must equal one of `labels`. Terminates the
    /// block.
    pub fn djmp(&mut self, target: impl Into<IROperand>, labels: impl IntoIterator<Item = IRLabel>) {
        let mut operands: SmallVec<[IROperand; 4]> = SmallVec::new();
        operands.push(target.into());
        operands.extend(labels.into_iter().map(IROperand::from));
        self.emit(Opcode::Djmp, operands);
    }

    /// Returns from an internal function. Terminates the block.
    pub fn ret(&mut self, values: impl IntoIterator<Item = IROperand>) {
        let operands: SmallVec<[IROperand; 4]> = values.into_iter().collect();
        self.emit(Opcode::Ret, operands);
    }

    /// EVM RETURN. Terminates the block.
    pub fn return_(&mut self, size: impl Into<IROperand>, offset: impl Into<IROperand>) {
        self.emit(Opcode::Return, [size.into(), offset.into()]);
    }

    /// Halts execution. Terminates the block.
    pub fn stop(&mut self) {
        self.emit(Opcode::Stop, []);
    }

    /// Reverts execution. Terminates the block.
    pub fn revert(&mut self, size: impl Into<IROperand>, offset: impl Into<IROperand>) {
        self.emit(Opcode::Revert, [size.into(), offset.into()]);
    }

    /// Invalid opcode. Terminates the block.
    pub fn invalid(&mut self) {
        self.emit(Opcode::Invalid, []);
    }

    pub fn selfdestruct(&mut self, addr: impl Into<IROperand>) {
        self.emit(Opcode::Selfdestruct, [addr.into()]);
    }

    // === Assertions ===

    /// Reverts with empty data if `cond` is zero.
    pub fn assert_(&mut self, cond: impl Into<IROperand>) {
        self.emit(Opcode::Assert, [cond.into()]);
    }

    /// Executes `invalid` if `cond` is zero.
    pub fn assert_unreachable(&mut self, cond: impl Into<IROperand>) {
        self.emit(Opcode::AssertUnreachable, [cond.into()]);
    }

    // === Internal Calls ===

    /// Calls an internal function. Returns the output variable if the
    /// callee returns a stack value.
    pub fn invoke(
        &mut self,
        target: IRLabel,
        args: impl IntoIterator<Item = IROperand>,
        returns_value: bool,
    ) -> Option<IRVariable> {
        let mut operands: SmallVec<[IROperand; 4]> = SmallVec::new();
        operands.push(IROperand::from(target));
        operands.extend(args);
        if returns_value {
            Some(self.emit1(Opcode::Invoke, operands))
        } else {
            self.emit(Opcode::Invoke, operands);
            None
        }
    }

    /// Declares a function parameter. Must come before any other
    /// instruction in the entry block.
    pub fn param(&mut self) -> IRVariable {
        self.emit1(Opcode::Param, [])
    }

    // === External Calls ===

    #[expect(clippy::too_many_arguments, reason = "mirrors the EVM CALL operand list")]
    pub fn call(
        &mut self,
        gas: impl Into<IROperand>,
        addr: impl Into<IROperand>,
        val: impl Into<IROperand>,
        argsptr: impl Into<IROperand>,
        argsz: impl Into<IROperand>,
        retptr: impl Into<IROperand>,
        retsz: impl Into<IROperand>,
    ) -> IRVariable {
        self.emit1(
            Opcode::Call,
            [
                gas.into(),
                addr.into(),
                val.into(),
                argsptr.into(),
                argsz.into(),
                retptr.into(),
                retsz.into(),
            ],
        )
    }

    pub fn staticcall(
        &mut self,
        gas: impl Into<IROperand>,
        addr: impl Into<IROperand>,
        argsptr: impl Into<IROperand>,
        argsz: impl Into<IROperand>,
        retptr: impl Into<IROperand>,
        retsz: impl Into<IROperand>,
    ) -> IRVariable {
        self.emit1(
            Opcode::Staticcall,
            [
                gas.into(),
                addr.into(),
                argsptr.into(),
                argsz.into(),
                retptr.into(),
                retsz.into(),
            ],
        )
    }

    pub fn delegatecall(
        &mut self,
        gas: impl Into<IROperand>,
        addr: impl Into<IROperand>,
        argsptr: impl Into<IROperand>,
        argsz: impl Into<IROperand>,
        retptr: impl Into<IROperand>,
        retsz: impl Into<IROperand>,
    ) -> IRVariable {
        self.emit1(
            Opcode::Delegatecall,
            [
                gas.into(),
                addr.into(),
                argsptr.into(),
                argsz.into(),
                retptr.into(),
                retsz.into(),
            ],
        )
    }

    pub fn create(
        &mut self,
        val: impl Into<IROperand>,
        offset: impl Into<IROperand>,
        size: impl Into<IROperand>,
    ) -> IRVariable {
        self.emit1(Opcode::Create, [val.into(), offset.into(), size.into()])
    }

    pub fn create2(
        &mut self,
        val: impl Into<IROperand>,
        offset: impl Into<IROperand>,
        size: impl Into<IROperand>,
        salt: impl Into<IROperand>,
    ) -> IRVariable {
        self.emit1(
            Opcode::Create2,
            [val.into(), offset.into(), size.into(), salt.into()],
        )
    }

    // === Crypto ===

    pub fn sha3(&mut self, ptr: impl Into<IROperand>, size: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Sha3, [ptr.into(), size.into()])
    }

    /// Hashes two 32-byte values (optimized keccak for mapping slots).
    pub fn sha3_64(&mut self, a: impl Into<IROperand>, b: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Sha364, [a.into(), b.into()])
    }

    // === Data Copy ===

    pub fn calldatacopy(
        &mut self,
        size: impl Into<IROperand>,
        src: impl Into<IROperand>,
        dst: impl Into<IROperand>,
    ) {
        self.emit(Opcode::Calldatacopy, [size.into(), src.into(), dst.into()]);
    }

    pub fn codecopy(
        &mut self,
        size: impl Into<IROperand>,
        src: impl Into<IROperand>,
        dst: impl Into<IROperand>,
    ) {
        self.emit(Opcode::Codecopy, [size.into(), src.into(), dst.into()]);
    }

    pub fn extcodecopy(
        &mut self,
        addr: impl Into<IROperand>,
        size: impl Into<IROperand>,
        src: impl Into<IROperand>,
        dst: impl Into<IROperand>,
    ) {
        self.emit(
            Opcode::Extcodecopy,
            [addr.into(), size.into(), src.into(), dst.into()],
        );
    }

    pub fn returndatacopy(
        &mut self,
        size: impl Into<IROperand>,
        src: impl Into<IROperand>,
        dst: impl Into<IROperand>,
    ) {
        self.emit(Opcode::Returndatacopy, [size.into(), src.into(), dst.into()]);
    }

    // === Environment ===

    pub fn caller(&mut self) -> IRVariable {
        self.emit1(Opcode::Caller, [])
    }

    pub fn callvalue(&mut self) -> IRVariable {
        self.emit1(Opcode::Callvalue, [])
    }

    pub fn calldatasize(&mut self) -> IRVariable {
        self.emit1(Opcode::Calldatasize, [])
    }

    pub fn calldataload(&mut self, offset: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Calldataload, [offset.into()])
    }

    pub fn address(&mut self) -> IRVariable {
        self.emit1(Opcode::Address, [])
    }

    pub fn balance(&mut self, addr: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Balance, [addr.into()])
    }

    pub fn selfbalance(&mut self) -> IRVariable {
        self.emit1(Opcode::Selfbalance, [])
    }

    pub fn origin(&mut self) -> IRVariable {
        self.emit1(Opcode::Origin, [])
    }

    pub fn gas(&mut self) -> IRVariable {
        self.emit1(Opcode::Gas, [])
    }

    pub fn gasprice(&mut self) -> IRVariable {
        self.emit1(Opcode::Gasprice, [])
    }

    pub fn codesize(&mut self) -> IRVariable {
        self.emit1(Opcode::Codesize, [])
    }

    pub fn extcodesize(&mut self, addr: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Extcodesize, [addr.into()])
    }

    pub fn extcodehash(&mut self, addr: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Extcodehash, [addr.into()])
    }

    pub fn returndatasize(&mut self) -> IRVariable {
        self.emit1(Opcode::Returndatasize, [])
    }

    // === Block Info ===

    pub fn blockhash(&mut self, block_num: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Blockhash, [block_num.into()])
    }

    pub fn blobhash(&mut self, index: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Blobhash, [index.into()])
    }

    pub fn coinbase(&mut self) -> IRVariable {
        self.emit1(Opcode::Coinbase, [])
    }

    pub fn timestamp(&mut self) -> IRVariable {
        self.emit1(Opcode::Timestamp, [])
    }

    pub fn number(&mut self) -> IRVariable {
        self.emit1(Opcode::Number, [])
    }

    pub fn prevrandao(&mut self) -> IRVariable {
        self.emit1(Opcode::Prevrandao, [])
    }

    /// Deprecated: use `prevrandao`.
    pub fn difficulty(&mut self) -> IRVariable {
        self.emit1(Opcode::Difficulty, [])
    }

    pub fn gaslimit(&mut self) -> IRVariable {
        self.emit1(Opcode::Gaslimit, [])
    }

    pub fn chainid(&mut self) -> IRVariable {
        self.emit1(Opcode::Chainid, [])
    }

    pub fn basefee(&mut self) -> IRVariable {
        self.emit1(Opcode::Basefee, [])
    }

    pub fn blobbasefee(&mut self) -> IRVariable {
        self.emit1(Opcode::Blobbasefee, [])
    }

    // === Logging ===

    /// Emits a log with 0 to 4 topics. Topics are passed in logical order
    /// and stored as `log topic_count, topic_n-1, .., topic0, size, offset`
    /// to match the venom text format.
    pub fn log(
        &mut self,
        topic_count: usize,
        offset: impl Into<IROperand>,
        size: impl Into<IROperand>,
        topics: &[IROperand],
    ) {
        debug_assert!(topic_count == topics.len() && topic_count <= 4);
        let mut operands: SmallVec<[IROperand; 4]> = SmallVec::new();
        operands.push(IROperand::from(topic_count));
        operands.extend(topics.iter().rev().cloned());
        operands.push(size.into());
        operands.push(offset.into());
        self.emit(Opcode::Log, operands);
    }

    // === Other ===

    pub fn nop(&mut self) {
        self.emit(Opcode::Nop, []);
    }

    /// Copies a value into a fresh variable.
    pub fn assign(&mut self, val: impl Into<IROperand>) -> IRVariable {
        self.emit1(Opcode::Assign, [val.into()])
    }

    /// Writes a value into an existing variable. This is the explicit
    /// mutable-assignment form later passes lift to phi nodes; `target`
    /// must come from [`Self::new_variable`].
    pub fn assign_to(&mut self, val: impl Into<IROperand>, target: IRVariable) {
        let source = self.func.current_source();
        self.func.block_mut(self.current).push(IRInstruction {
            opcode: Opcode::Assign,
            operands: [val.into()].into_iter().collect(),
            output: Some(target),
            source,
        });
    }

    #[must_use]
    pub fn literal(&self, val: impl Into<num_bigint::BigInt>) -> IRLiteral {
        IRLiteral::new(val)
    }

    #[must_use]
    pub fn label(&self, name: &str) -> IRLabel {
        IRLabel::new(name)
    }

    /// Branchless `cond ? true_val : false_val` via
    /// `xor(b, mul(cond, xor(a, b)))`. Requires `cond` to be exactly 0 or
    /// 1, which Vyper comparisons guarantee.
    pub fn select(
        &mut self,
        cond: impl Into<IROperand>,
        true_val: impl Into<IROperand>,
        false_val: impl Into<IROperand>,
    ) -> IRVariable {
        let true_val = true_val.into();
        let false_val = false_val.into();
        let diff = self.xor(true_val, false_val.clone());
        let scaled = self.mul(cond, diff);
        self.xor(false_val, scaled)
    }

    // === Internal Implementation ===

    /// Emits an instruction with no output.
    fn emit(&mut self, opcode: Opcode, operands: impl IntoIterator<Item = IROperand>) {
        let source = self.func.current_source();
        self.func.block_mut(self.current).push(IRInstruction {
            opcode,
            operands: operands.into_iter().collect(),
            output: None,
            source,
        });
    }

    /// Emits an instruction that produces an output, returning the fresh
    /// output variable.
    fn emit1(
        &mut self,
        opcode: Opcode,
        operands: impl IntoIterator<Item = IROperand>,
    ) -> IRVariable {
        let output = self.func.get_next_variable();
        let source = self.func.current_source();
        self.func.block_mut(self.current).push(IRInstruction {
            opcode,
            operands: operands.into_iter().collect(),
            output: Some(output),
            source,
        });
        output
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::venom::function::IRFunction;

    fn with_builder<T>(f: impl FnOnce(&mut VenomBuilder) -> T) -> (T, IRContext) {
        let mut ctx = IRContext::new();
        let func = IRFunction::new(IRLabel::new("test"));
        let mut builder = VenomBuilder::new(&mut ctx, func);
        let out = f(&mut builder);
        builder.finish();
        (out, ctx)
    }

    fn instructions(ctx: &IRContext) -> Vec<String> {
        ctx.get_function(&IRLabel::new("test"))
            .unwrap()
            .blocks_in_order()
            .flat_map(|bb| bb.instructions.iter().map(ToString::to_string))
            .collect()
    }

    #[test]
    fn sub_reverses_operands() {
        let (_, ctx) = with_builder(|b| {
            let x = b.callvalue();
            b.sub(x, 1u64);
        });
        // sub stores right operand first to match EVM stack order
        assert_eq!(instructions(&ctx), vec!["%0 = callvalue", "%1 = sub 1, %0"]);
    }

    #[test]
    fn add_keeps_operand_order() {
        let (_, ctx) = with_builder(|b| {
            let x = b.callvalue();
            b.add(x, 1u64);
        });
        assert_eq!(instructions(&ctx), vec!["%0 = callvalue", "%1 = add %0, 1"]);
    }

    #[test]
    fn select_expands_to_xor_mul_xor() {
        let (_, ctx) = with_builder(|b| {
            let cond = b.callvalue();
            b.select(cond, 7u64, 9u64);
        });
        assert_eq!(
            instructions(&ctx),
            vec![
                "%0 = callvalue",
                "%1 = xor 7, 9",
                "%2 = mul %0, %1",
                "%3 = xor 9, %2",
            ]
        );
    }

    #[test]
    fn log_reverses_topics() {
        let (_, ctx) = with_builder(|b| {
            b.log(
                2,
                0u64,
                32u64,
                &[IROperand::literal(11), IROperand::literal(22)],
            );
        });
        assert_eq!(instructions(&ctx), vec!["log 2, 22, 11, 32, 0"]);
    }

    #[test]
    fn blocks_reserve_then_emit() {
        let (_, ctx) = with_builder(|b| {
            let then_bb = b.create_block("then");
            let exit_bb = b.create_block("exit");
            let cond = b.callvalue();
            b.jnz(cond, b.block_label(then_bb), b.block_label(exit_bb));

            b.append_block(then_bb);
            b.set_block(then_bb);
            b.jmp(b.block_label(exit_bb));

            b.append_block(exit_bb);
            b.set_block(exit_bb);
            b.stop();
        });
        let func = ctx.get_function(&IRLabel::new("test")).unwrap();
        assert_eq!(func.num_blocks(), 3);
        for bb in func.blocks_in_order() {
            assert!(bb.is_terminated(), "block {} unterminated", bb.label);
        }
    }

    #[test]
    fn source_spans_attach_to_instructions() {
        let (_, ctx) = with_builder(|b| {
            b.with_source(Span::new(5, 9), |b| {
                b.caller();
                Ok(())
            })
            .unwrap();
            b.caller();
        });
        let func = ctx.get_function(&IRLabel::new("test")).unwrap();
        let insts: Vec<_> = func
            .blocks_in_order()
            .flat_map(|bb| bb.instructions.iter())
            .collect();
        assert_eq!(insts[0].source, Some(Span::new(5, 9)));
        assert_eq!(insts[1].source, None);
    }

    #[test]
    fn invoke_with_and_without_output() {
        let (outputs, _) = with_builder(|b| {
            let with = b.invoke(IRLabel::new("internal_f"), [IROperand::literal(1)], true);
            let without = b.invoke(IRLabel::new("internal_g"), [], false);
            (with, without)
        });
        assert!(outputs.0.is_some());
        assert!(outputs.1.is_none());
    }
}
