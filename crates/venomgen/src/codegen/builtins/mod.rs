//! Built-in function lowering.
//!
//! Each submodule exports a `HANDLERS` slice mapping builtin identifiers
//! to handler functions; the slices are folded into one dispatch table on
//! first use. A handler receives the whole `Call` node and the codegen
//! context and produces a [`VyperValue`].

mod abi;
mod bytes;
mod convert;
mod create;
mod hashing;
mod math;
mod simple;
mod strings;
mod system;

use std::sync::OnceLock;

use ahash::AHashMap;

use crate::{
    ast::{ExprKind, ExprNode, Keyword},
    codegen::{context::CodegenContext, value::VyperValue},
    errors::{CodegenError, CodegenResult},
};

/// Signature shared by every builtin handler.
pub(crate) type BuiltinHandler =
    fn(&mut CodegenContext<'_, '_>, &ExprNode) -> CodegenResult<VyperValue>;

fn table() -> &'static AHashMap<&'static str, BuiltinHandler> {
    static TABLE: OnceLock<AHashMap<&'static str, BuiltinHandler>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut map = AHashMap::new();
        for handlers in [
            simple::HANDLERS,
            math::HANDLERS,
            hashing::HANDLERS,
            bytes::HANDLERS,
            strings::HANDLERS,
            abi::HANDLERS,
            convert::HANDLERS,
            create::HANDLERS,
            system::HANDLERS,
        ] {
            for (id, handler) in handlers {
                let prev = map.insert(*id, *handler);
                debug_assert!(prev.is_none(), "duplicate builtin {id}");
            }
        }
        map
    })
}

/// Lowers a built-in call, dispatching on the builtin's identifier.
pub(crate) fn lower_builtin(
    ctx: &mut CodegenContext<'_, '_>,
    id: &str,
    node: &ExprNode,
) -> CodegenResult<VyperValue> {
    match table().get(id) {
        Some(handler) => handler(ctx, node),
        None => Err(CodegenError::panic_at(
            format!("built-in '{id}' not implemented"),
            node.span,
        )),
    }
}

/// The positional arguments and keywords of a `Call` node.
pub(crate) fn call_parts(node: &ExprNode) -> CodegenResult<(&[ExprNode], &[Keyword])> {
    match &node.kind {
        ExprKind::Call { args, keywords, .. } => Ok((args, keywords)),
        _ => Err(CodegenError::panic_at("builtin handler on non-call node", node.span)),
    }
}

/// Looks up a keyword argument by name.
pub(crate) fn get_kwarg<'n>(keywords: &'n [Keyword], name: &str) -> Option<&'n ExprNode> {
    keywords.iter().find(|kw| kw.arg == name).map(|kw| &kw.value)
}

/// A boolean keyword that must be a compile-time literal.
pub(crate) fn kwarg_bool(
    node: &ExprNode,
    keywords: &[Keyword],
    name: &str,
    default: bool,
) -> CodegenResult<bool> {
    match get_kwarg(keywords, name) {
        None => Ok(default),
        Some(value) => value.as_bool_literal().ok_or_else(|| {
            CodegenError::argument(format!("{name}= must be a literal"), node.span)
        }),
    }
}

/// A non-negative integer keyword that must be a compile-time literal.
pub(crate) fn kwarg_usize(
    node: &ExprNode,
    keywords: &[Keyword],
    name: &str,
    default: usize,
) -> CodegenResult<usize> {
    match get_kwarg(keywords, name) {
        None => Ok(default),
        Some(value) => {
            let lit = value.as_int_literal().ok_or_else(|| {
                CodegenError::argument(format!("{name}= must be a literal"), node.span)
            })?;
            usize::try_from(lit).map_err(|_| {
                CodegenError::argument(format!("{name}= out of range"), node.span)
            })
        }
    }
}
