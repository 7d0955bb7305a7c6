//! Compilation-unit container.
//!
//! Two contexts exist per compilation: one for deploy (constructor) code
//! and one for runtime code. Each is self-contained and handed to the
//! downstream assembler.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::venom::{basicblock::IRLabel, function::IRFunction};

/// An entry in the data section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataItem {
    /// A concrete byte blob (string constants, preassembled bytecode).
    Blob(Vec<u8>),
    /// Placeholder the backend replaces with the assembled runtime code.
    /// Only meaningful in the deploy context.
    RuntimeCode,
}

/// A Venom compilation unit: functions keyed by label plus a data section.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IRContext {
    pub functions: IndexMap<IRLabel, IRFunction>,
    pub data_section: IndexMap<IRLabel, DataItem>,
    pub entry_function: Option<IRLabel>,
    next_label: u32,
}

impl IRContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints a context-unique label, optionally suffixed for readability.
    pub fn get_next_label(&mut self, suffix: &str) -> IRLabel {
        let n = self.next_label;
        self.next_label += 1;
        if suffix.is_empty() {
            IRLabel(format!("{n}"))
        } else {
            IRLabel(format!("{n}_{suffix}"))
        }
    }

    /// Inserts a finished function.
    ///
    /// # Panics
    ///
    /// Panics if a function with the same label already exists.
    pub fn insert_function(&mut self, function: IRFunction) {
        let label = function.name.clone();
        let prev = self.functions.insert(label.clone(), function);
        assert!(prev.is_none(), "duplicate function {label}");
    }

    #[must_use]
    pub fn get_function(&self, label: &IRLabel) -> Option<&IRFunction> {
        self.functions.get(label)
    }

    /// Adds a data-section entry.
    pub fn add_data(&mut self, label: IRLabel, item: DataItem) {
        self.data_section.insert(label, item);
    }

    /// The context's entry function, if set.
    #[must_use]
    pub fn entry(&self) -> Option<&IRFunction> {
        self.entry_function
            .as_ref()
            .and_then(|label| self.functions.get(label))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn labels_are_unique() {
        let mut ctx = IRContext::new();
        let a = ctx.get_next_label("then");
        let b = ctx.get_next_label("then");
        assert_ne!(a, b);
        assert!(a.0.ends_with("_then"));
    }

    #[test]
    fn function_table_preserves_insertion_order() {
        let mut ctx = IRContext::new();
        ctx.insert_function(IRFunction::new(IRLabel::new("b")));
        ctx.insert_function(IRFunction::new(IRLabel::new("a")));
        let names: Vec<_> = ctx.functions.keys().map(|l| l.0.clone()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
