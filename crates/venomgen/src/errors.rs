//! Error taxonomy for the codegen core.
//!
//! Lowering threads `CodegenResult` through every visitor. The four error
//! kinds have different audiences: `CompilerPanic` and `TypeCheckFailure`
//! indicate bugs (in codegen itself, or drift between codegen and the
//! upstream analyzer), while `StateAccessViolation` and `ArgumentException`
//! are user-facing diagnostics carrying a source span.
//!
//! Hard invariant violations inside the IR model itself (emitting into a
//! terminated block, operand arity mismatches) abort via `panic!` rather
//! than unwinding through every builder method signature.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Result type alias for all lowering operations.
pub type CodegenResult<T> = Result<T, CodegenError>;

/// Byte range of an AST node in the original source text.
///
/// Spans are produced by the upstream parser and flow through codegen
/// untouched; they end up on emitted instructions for source maps and on
/// errors for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    #[must_use]
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }
}

impl Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// An error raised during lowering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodegenError {
    /// An invariant assumed by codegen does not hold. Indicates a bug in
    /// the compiler or the analyzer, never in user code.
    CompilerPanic { message: String, span: Option<Span> },
    /// A type combination reached codegen that the analyzer should have
    /// rejected. Indicates analyzer drift.
    TypeCheckFailure { message: String, span: Option<Span> },
    /// A state-mutating operation was attempted in a constant (view)
    /// context.
    StateAccessViolation { message: String, span: Option<Span> },
    /// A built-in was invoked with missing or mutually-exclusive keyword
    /// arguments.
    ArgumentException { message: String, span: Option<Span> },
}

impl CodegenError {
    pub fn panic(message: impl Into<String>) -> Self {
        Self::CompilerPanic {
            message: message.into(),
            span: None,
        }
    }

    pub fn panic_at(message: impl Into<String>, span: Span) -> Self {
        Self::CompilerPanic {
            message: message.into(),
            span: Some(span),
        }
    }

    pub fn type_check(message: impl Into<String>) -> Self {
        Self::TypeCheckFailure {
            message: message.into(),
            span: None,
        }
    }

    pub fn type_check_at(message: impl Into<String>, span: Span) -> Self {
        Self::TypeCheckFailure {
            message: message.into(),
            span: Some(span),
        }
    }

    pub fn state_access(message: impl Into<String>, span: Span) -> Self {
        Self::StateAccessViolation {
            message: message.into(),
            span: Some(span),
        }
    }

    pub fn argument(message: impl Into<String>, span: Span) -> Self {
        Self::ArgumentException {
            message: message.into(),
            span: Some(span),
        }
    }

    /// The span of the offending AST node, if known.
    #[must_use]
    pub fn span(&self) -> Option<Span> {
        match self {
            Self::CompilerPanic { span, .. }
            | Self::TypeCheckFailure { span, .. }
            | Self::StateAccessViolation { span, .. }
            | Self::ArgumentException { span, .. } => *span,
        }
    }

    /// The error message without the kind prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::CompilerPanic { message, .. }
            | Self::TypeCheckFailure { message, .. }
            | Self::StateAccessViolation { message, .. }
            | Self::ArgumentException { message, .. } => message,
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Self::CompilerPanic { .. } => "CompilerPanic",
            Self::TypeCheckFailure { .. } => "TypeCheckFailure",
            Self::StateAccessViolation { .. } => "StateAccessViolation",
            Self::ArgumentException { .. } => "ArgumentException",
        }
    }
}

impl Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind_name(), self.message())?;
        if let Some(span) = self.span() {
            write!(f, " (at {span})")?;
        }
        Ok(())
    }
}

impl std::error::Error for CodegenError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_span() {
        let err = CodegenError::state_access("cannot write storage", Span::new(10, 20));
        assert_eq!(
            err.to_string(),
            "StateAccessViolation: cannot write storage (at 10..20)"
        );
    }

    #[test]
    fn panic_has_no_span_by_default() {
        let err = CodegenError::panic("missing type annotation");
        assert_eq!(err.span(), None);
        assert_eq!(err.message(), "missing type annotation");
    }
}
