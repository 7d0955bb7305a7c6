//! IR functions.
//!
//! A function owns an arena of basic blocks plus the order in which they
//! were appended. Creation and appending are separate so lowering can
//! reserve labels for forward jumps before emitting their bodies; only
//! appended blocks are part of the emitted function.

use serde::{Deserialize, Serialize};

use crate::{
    errors::Span,
    venom::basicblock::{BlockId, IRBasicBlock, IRLabel, IRVariable},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IRFunction {
    pub name: IRLabel,
    /// Block arena; indexed by `BlockId`. Contains detached blocks too.
    blocks: Vec<IRBasicBlock>,
    /// Appended blocks in emission order. The first entry is the entry
    /// block.
    order: Vec<BlockId>,
    next_variable: u32,
    /// Stack of source ranges pushed by `with_source` scopes.
    source_stack: Vec<Span>,
}

impl IRFunction {
    /// Creates a function with an entry block labeled after the function.
    #[must_use]
    pub fn new(name: IRLabel) -> Self {
        let entry = IRBasicBlock::new(name.clone());
        Self {
            name,
            blocks: vec![entry],
            order: vec![BlockId(0)],
            next_variable: 0,
            source_stack: Vec::new(),
        }
    }

    #[must_use]
    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    /// Allocates a detached block in the arena. It is not part of the
    /// function until [`Self::append_block`] is called.
    pub fn create_block(&mut self, label: IRLabel) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(IRBasicBlock::new(label));
        id
    }

    /// Appends a previously created block to the emission order.
    ///
    /// # Panics
    ///
    /// Panics if the block was already appended.
    pub fn append_block(&mut self, id: BlockId) {
        assert!(
            !self.order.contains(&id),
            "block {} appended twice",
            self.blocks[id.0].label
        );
        self.order.push(id);
    }

    #[must_use]
    pub fn block(&self, id: BlockId) -> &IRBasicBlock {
        &self.blocks[id.0]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut IRBasicBlock {
        &mut self.blocks[id.0]
    }

    #[must_use]
    pub fn label_of(&self, id: BlockId) -> &IRLabel {
        &self.blocks[id.0].label
    }

    /// Appended blocks in emission order.
    pub fn blocks_in_order(&self) -> impl Iterator<Item = &IRBasicBlock> {
        self.order.iter().map(|id| &self.blocks[id.0])
    }

    /// Number of appended blocks.
    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.order.len()
    }

    /// Mints a fresh SSA variable.
    pub fn get_next_variable(&mut self) -> IRVariable {
        let var = IRVariable(self.next_variable);
        self.next_variable += 1;
        var
    }

    pub fn push_source(&mut self, span: Span) {
        self.source_stack.push(span);
    }

    pub fn pop_source(&mut self) {
        self.source_stack.pop();
    }

    /// The innermost active source range, attached to emitted instructions.
    #[must_use]
    pub fn current_source(&self) -> Option<Span> {
        self.source_stack.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn entry_block_carries_function_label() {
        let f = IRFunction::new(IRLabel::new("main"));
        assert_eq!(f.block(f.entry()).label, IRLabel::new("main"));
        assert_eq!(f.num_blocks(), 1);
    }

    #[test]
    fn detached_blocks_are_not_emitted() {
        let mut f = IRFunction::new(IRLabel::new("main"));
        let detached = f.create_block(IRLabel::new("orphan"));
        assert_eq!(f.num_blocks(), 1);
        f.append_block(detached);
        assert_eq!(f.num_blocks(), 2);
        let labels: Vec<_> = f.blocks_in_order().map(|b| b.label.0.clone()).collect();
        assert_eq!(labels, vec!["main", "orphan"]);
    }

    #[test]
    fn variables_are_sequential() {
        let mut f = IRFunction::new(IRLabel::new("main"));
        assert_eq!(f.get_next_variable(), IRVariable(0));
        assert_eq!(f.get_next_variable(), IRVariable(1));
    }
}
