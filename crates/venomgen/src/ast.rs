//! The annotated AST consumed by codegen.
//!
//! Tokenizing, parsing, and semantic analysis happen upstream; this module
//! defines the contract between the analyzer and the code generator. Every
//! expression node carries its resolved [`VyperType`], every name that
//! refers to a module-level variable carries a [`VarInfo`], and every call
//! carries a resolved [`CallTarget`]. Codegen trusts these annotations and
//! reports [`CodegenError::CompilerPanic`] when one is missing, since that
//! indicates analyzer drift rather than a user error.

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};

use crate::{
    errors::Span,
    keccak::{keccak256_uint, method_id},
    types::{DataLocation, VyperType},
};

/// A fully analyzed module, ready for lowering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub functions: Vec<FunctionDef>,
    pub events: Vec<EventDef>,
    /// Total byte size of the immutable section, allocated by the analyzer.
    pub immutables_size: usize,
}

impl Module {
    /// Looks up a function definition by name.
    #[must_use]
    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// The constructor, if the module declares one.
    #[must_use]
    pub fn constructor(&self) -> Option<&FunctionDef> {
        self.functions
            .iter()
            .find(|f| f.visibility == Visibility::Constructor)
    }

    /// The fallback (`__default__`) function, if declared.
    #[must_use]
    pub fn fallback(&self) -> Option<&FunctionDef> {
        self.functions
            .iter()
            .find(|f| f.visibility == Visibility::Fallback)
    }

    /// External functions in declaration order (selector section order).
    pub fn external_functions(&self) -> impl Iterator<Item = &FunctionDef> {
        self.functions
            .iter()
            .filter(|f| f.visibility == Visibility::External)
    }

    /// Internal functions in declaration order.
    pub fn internal_functions(&self) -> impl Iterator<Item = &FunctionDef> {
        self.functions
            .iter()
            .filter(|f| f.visibility == Visibility::Internal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    External,
    Internal,
    Constructor,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateMutability {
    Pure,
    View,
    Nonpayable,
    Payable,
}

impl StateMutability {
    /// Whether the function body must not mutate persistent state.
    #[must_use]
    pub fn is_constant(self) -> bool {
        matches!(self, Self::Pure | Self::View)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionArg {
    pub name: String,
    pub ty: VyperType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub visibility: Visibility,
    pub mutability: StateMutability,
    pub args: Vec<FunctionArg>,
    pub return_type: Option<VyperType>,
    pub body: Vec<StmtNode>,
    pub span: Span,
}

impl FunctionDef {
    /// Canonical ABI signature, e.g. `transfer(address,uint256)`.
    #[must_use]
    pub fn abi_signature(&self) -> String {
        let args: Vec<String> = self.args.iter().map(|a| a.ty.abi_name()).collect();
        format!("{}({})", self.name, args.join(","))
    }

    /// The 4-byte dispatch selector of an external function.
    #[must_use]
    pub fn selector(&self) -> u32 {
        method_id(&self.abi_signature())
    }

    /// Label of the IR function generated for an internal function.
    #[must_use]
    pub fn internal_label(&self) -> String {
        format!("internal_{}", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventArg {
    pub name: String,
    pub ty: VyperType,
    pub indexed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDef {
    pub name: String,
    pub args: Vec<EventArg>,
}

impl EventDef {
    /// Canonical event signature, e.g. `Transfer(address,address,uint256)`.
    #[must_use]
    pub fn abi_signature(&self) -> String {
        let args: Vec<String> = self.args.iter().map(|a| a.ty.abi_name()).collect();
        format!("{}({})", self.name, args.join(","))
    }

    /// topic0: the keccak-256 hash of the signature.
    #[must_use]
    pub fn topic0(&self) -> BigInt {
        BigInt::from(keccak256_uint(self.abi_signature().as_bytes()))
    }
}

/// Resolved metadata of a module-level variable reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarInfo {
    pub ty: VyperType,
    pub location: VarLocation,
}

/// Where a module-level variable lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarLocation {
    Storage { slot: u64 },
    Transient { slot: u64 },
    /// Byte offset into the immutable section.
    Immutable { offset: usize },
    /// Constants are folded away by the analyzer; codegen rejects any
    /// reference that survives.
    Constant,
}

impl VarInfo {
    #[must_use]
    pub fn is_constant(&self) -> bool {
        matches!(self.location, VarLocation::Constant)
    }

    #[must_use]
    pub fn is_immutable(&self) -> bool {
        matches!(self.location, VarLocation::Immutable { .. })
    }

    /// The data location tag for pointer construction, if addressable.
    #[must_use]
    pub fn data_location(&self) -> Option<DataLocation> {
        match self.location {
            VarLocation::Storage { .. } => Some(DataLocation::Storage),
            VarLocation::Transient { .. } => Some(DataLocation::Transient),
            VarLocation::Immutable { .. } => Some(DataLocation::Code),
            VarLocation::Constant => None,
        }
    }
}

/// Environment attributes resolved by the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvAttr {
    MsgSender,
    MsgValue,
    /// Usable only as a `slice`/`len`/`raw_call` argument.
    MsgData,
    MsgGas,
    BlockTimestamp,
    BlockNumber,
    BlockCoinbase,
    BlockPrevhash,
    BlockPrevrandao,
    BlockDifficulty,
    BlockGaslimit,
    BlockBasefee,
    BlockBlobbasefee,
    TxOrigin,
    TxGasprice,
    ChainId,
    SelfBalance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOpKind {
    Add,
    Sub,
    Mult,
    /// `/`: decimal division.
    Div,
    /// `//`: integer floor division.
    FloorDiv,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    LShift,
    RShift,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOpKind {
    Not,
    USub,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoolOpKind {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOpKind {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
    NotIn,
}

/// External interface method metadata attached to a call by the analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalMethod {
    pub interface: String,
    pub method: String,
    pub arg_types: Vec<VyperType>,
    pub return_type: Option<VyperType>,
    pub mutability: StateMutability,
}

impl ExternalMethod {
    #[must_use]
    pub fn abi_signature(&self) -> String {
        let args: Vec<String> = self.arg_types.iter().map(VyperType::abi_name).collect();
        format!("{}({})", self.method, args.join(","))
    }

    #[must_use]
    pub fn selector(&self) -> u32 {
        method_id(&self.abi_signature())
    }
}

/// What a `Call` node resolves to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CallTarget {
    /// A built-in function, keyed by its identifier.
    Builtin { id: String },
    /// An internal function of this module.
    Internal { function: String },
    /// A method on an external contract; the receiver expression is
    /// address-typed.
    External {
        target: Box<ExprNode>,
        method: ExternalMethod,
    },
    /// Struct constructor; arguments are the keywords, one per field.
    StructCtor { name: String },
    /// A method on a value, e.g. `append`/`pop` on a dynamic array.
    Method {
        receiver: Box<ExprNode>,
        method: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    pub arg: String,
    pub value: ExprNode,
}

/// An expression with its span and analyzed type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExprNode {
    pub span: Span,
    pub ty: VyperType,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Int {
        value: BigInt,
    },
    /// Decimal literal `value * 10^-scale`; lowering rescales to the
    /// fixed 10^10 representation.
    Decimal {
        value: BigInt,
        scale: u32,
    },
    /// Hex literal, `0x`-prefixed. Type decides address vs bytesM layout.
    Hex {
        literal: String,
    },
    Bytes {
        value: Vec<u8>,
    },
    Str {
        value: String,
    },
    NameConstant {
        value: bool,
    },
    Name {
        id: String,
        var_info: Option<VarInfo>,
    },
    EnvAttr(EnvAttr),
    /// Attribute access that is not an environment attribute: a state
    /// variable (`self.x`, with `var_info`), an address property, a
    /// flag member, or a struct field.
    Attribute {
        base: Box<ExprNode>,
        attr: String,
        var_info: Option<VarInfo>,
    },
    Subscript {
        base: Box<ExprNode>,
        index: Box<ExprNode>,
    },
    Tuple {
        elements: Vec<ExprNode>,
    },
    List {
        elements: Vec<ExprNode>,
    },
    BinOp {
        op: BinOpKind,
        left: Box<ExprNode>,
        right: Box<ExprNode>,
    },
    UnaryOp {
        op: UnaryOpKind,
        operand: Box<ExprNode>,
    },
    BoolOp {
        op: BoolOpKind,
        values: Vec<ExprNode>,
    },
    Compare {
        op: CmpOpKind,
        left: Box<ExprNode>,
        right: Box<ExprNode>,
    },
    IfExp {
        test: Box<ExprNode>,
        body: Box<ExprNode>,
        orelse: Box<ExprNode>,
    },
    Call {
        target: CallTarget,
        args: Vec<ExprNode>,
        keywords: Vec<Keyword>,
    },
}

impl ExprNode {
    /// Integer literal value if this node reduces to one.
    #[must_use]
    pub fn as_int_literal(&self) -> Option<BigInt> {
        match &self.reduced().kind {
            ExprKind::Int { value } => Some(value.clone()),
            ExprKind::NameConstant { value } => Some(BigInt::from(i32::from(*value))),
            _ => None,
        }
    }

    /// Boolean literal value if this node reduces to one.
    #[must_use]
    pub fn as_bool_literal(&self) -> Option<bool> {
        match &self.reduced().kind {
            ExprKind::NameConstant { value } => Some(*value),
            ExprKind::Int { value } => Some(!value.is_zero()),
            _ => None,
        }
    }

    /// Applies legal constant folding and returns the reduced node.
    ///
    /// Folding is conservative: integer arithmetic folds only when the
    /// result stays within the node's type bounds, so that runtime clamp
    /// semantics are preserved for everything else.
    #[must_use]
    pub fn reduced(&self) -> ExprNode {
        match &self.kind {
            ExprKind::BinOp { op, left, right } => {
                let (l, r) = (left.reduced(), right.reduced());
                if let (ExprKind::Int { value: lv }, ExprKind::Int { value: rv }) =
                    (&l.kind, &r.kind)
                    && let Some(folded) = fold_int_binop(*op, lv, rv)
                    && within_bounds(&folded, &self.ty)
                {
                    return ExprNode {
                        span: self.span,
                        ty: self.ty.clone(),
                        kind: ExprKind::Int { value: folded },
                    };
                }
                ExprNode {
                    span: self.span,
                    ty: self.ty.clone(),
                    kind: ExprKind::BinOp {
                        op: *op,
                        left: Box::new(l),
                        right: Box::new(r),
                    },
                }
            }
            ExprKind::UnaryOp { op, operand } => {
                let inner = operand.reduced();
                if let ExprKind::Int { value } = &inner.kind {
                    let folded = match op {
                        UnaryOpKind::USub => Some(-value),
                        UnaryOpKind::Not => Some(BigInt::from(i32::from(value.is_zero()))),
                        UnaryOpKind::Invert => None,
                    };
                    if let Some(folded) = folded
                        && within_bounds(&folded, &self.ty)
                    {
                        return ExprNode {
                            span: self.span,
                            ty: self.ty.clone(),
                            kind: ExprKind::Int { value: folded },
                        };
                    }
                }
                ExprNode {
                    span: self.span,
                    ty: self.ty.clone(),
                    kind: ExprKind::UnaryOp {
                        op: *op,
                        operand: Box::new(inner),
                    },
                }
            }
            ExprKind::Compare { op, left, right } => {
                let (l, r) = (left.reduced(), right.reduced());
                if let (ExprKind::Int { value: lv }, ExprKind::Int { value: rv }) =
                    (&l.kind, &r.kind)
                    && let Some(result) = fold_int_compare(*op, lv, rv)
                {
                    return ExprNode {
                        span: self.span,
                        ty: self.ty.clone(),
                        kind: ExprKind::NameConstant { value: result },
                    };
                }
                ExprNode {
                    span: self.span,
                    ty: self.ty.clone(),
                    kind: ExprKind::Compare {
                        op: *op,
                        left: Box::new(l),
                        right: Box::new(r),
                    },
                }
            }
            _ => self.clone(),
        }
    }
}

fn within_bounds(value: &BigInt, ty: &VyperType) -> bool {
    match ty.int_bounds() {
        Some((lo, hi)) => *value >= lo && *value <= hi,
        None => true,
    }
}

fn fold_int_binop(op: BinOpKind, l: &BigInt, r: &BigInt) -> Option<BigInt> {
    match op {
        BinOpKind::Add => Some(l + r),
        BinOpKind::Sub => Some(l - r),
        BinOpKind::Mult => Some(l * r),
        BinOpKind::FloorDiv => {
            if r.is_zero() {
                None
            } else {
                // EVM division truncates toward zero
                Some(l / r)
            }
        }
        BinOpKind::Mod => {
            if r.is_zero() {
                None
            } else {
                Some(l % r)
            }
        }
        BinOpKind::Pow => {
            let exp = r.to_u32()?;
            // guard against pathological literal blowup
            if exp > 256 || l.magnitude().bits() * u64::from(exp) > 512 {
                return None;
            }
            Some(l.pow(exp))
        }
        BinOpKind::BitAnd => Some(l & r),
        BinOpKind::BitOr => Some(l | r),
        BinOpKind::BitXor => Some(l ^ r),
        BinOpKind::LShift => {
            let shift = r.to_u32()?;
            if shift > 256 || l.is_negative() {
                None
            } else {
                Some(l << shift)
            }
        }
        BinOpKind::RShift => {
            let shift = r.to_u32()?;
            if shift > 256 || l.is_negative() {
                None
            } else {
                Some(l >> shift)
            }
        }
        BinOpKind::Div => None,
    }
}

fn fold_int_compare(op: CmpOpKind, l: &BigInt, r: &BigInt) -> Option<bool> {
    match op {
        CmpOpKind::Eq => Some(l == r),
        CmpOpKind::NotEq => Some(l != r),
        CmpOpKind::Lt => Some(l < r),
        CmpOpKind::LtE => Some(l <= r),
        CmpOpKind::Gt => Some(l > r),
        CmpOpKind::GtE => Some(l >= r),
        CmpOpKind::In | CmpOpKind::NotIn => None,
    }
}

/// What a `for` statement iterates over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ForIter {
    /// `range(...)`; `count` is the literal iteration count established by
    /// the analyzer, `start` the (possibly runtime) first value.
    Range { start: Box<ExprNode>, count: usize },
    /// A static array, dynamic array, or literal list.
    Iterable(Box<ExprNode>),
}

/// The failure payload of an `assert` or `raise`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RaiseReason {
    /// Bare form; lowers to `revert(0, 0)`.
    None,
    /// `UNREACHABLE`; lowers to the `invalid` opcode.
    Unreachable,
    /// A reason expression, ABI-encoded as `Error(string)` or passed
    /// through raw for bytes payloads.
    Message(Box<ExprNode>),
}

/// A statement with its span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StmtNode {
    pub span: Span,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    /// Expression statement (a call evaluated for effect).
    Expr { value: ExprNode },
    /// `x: T = value`
    AnnAssign {
        target: String,
        ty: VyperType,
        value: ExprNode,
    },
    Assign {
        target: ExprNode,
        value: ExprNode,
    },
    AugAssign {
        target: ExprNode,
        op: BinOpKind,
        value: ExprNode,
    },
    If {
        test: ExprNode,
        body: Vec<StmtNode>,
        orelse: Vec<StmtNode>,
    },
    For {
        target: String,
        target_ty: VyperType,
        iter: ForIter,
        body: Vec<StmtNode>,
    },
    While {
        test: ExprNode,
        body: Vec<StmtNode>,
    },
    Break,
    Continue,
    Pass,
    Return {
        value: Option<ExprNode>,
    },
    Assert {
        test: ExprNode,
        reason: RaiseReason,
    },
    Raise {
        reason: RaiseReason,
    },
    Log {
        event: EventDef,
        args: Vec<ExprNode>,
    },
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::UINT256;

    fn int_node(v: i64) -> ExprNode {
        ExprNode {
            span: Span::default(),
            ty: UINT256,
            kind: ExprKind::Int {
                value: BigInt::from(v),
            },
        }
    }

    #[test]
    fn folds_literal_addition() {
        let node = ExprNode {
            span: Span::default(),
            ty: UINT256,
            kind: ExprKind::BinOp {
                op: BinOpKind::Add,
                left: Box::new(int_node(2)),
                right: Box::new(int_node(40)),
            },
        };
        assert_eq!(node.reduced().as_int_literal(), Some(BigInt::from(42)));
    }

    #[test]
    fn does_not_fold_out_of_bounds() {
        let u8_t = VyperType::Integer(crate::types::IntegerT::new(8, false));
        let mk = |v: i64| ExprNode {
            span: Span::default(),
            ty: u8_t.clone(),
            kind: ExprKind::Int {
                value: BigInt::from(v),
            },
        };
        let node = ExprNode {
            span: Span::default(),
            ty: u8_t.clone(),
            kind: ExprKind::BinOp {
                op: BinOpKind::Add,
                left: Box::new(mk(200)),
                right: Box::new(mk(100)),
            },
        };
        // 300 does not fit in uint8; the overflow must be caught at runtime
        assert_eq!(node.reduced().as_int_literal(), None);
    }

    #[test]
    fn folds_comparison_to_bool() {
        let node = ExprNode {
            span: Span::default(),
            ty: VyperType::Bool,
            kind: ExprKind::Compare {
                op: CmpOpKind::Lt,
                left: Box::new(int_node(1)),
                right: Box::new(int_node(2)),
            },
        };
        assert_eq!(node.reduced().as_bool_literal(), Some(true));
    }

    #[test]
    fn event_signature_and_selector() {
        let ev = EventDef {
            name: "Transfer".to_owned(),
            args: vec![
                EventArg {
                    name: "sender".to_owned(),
                    ty: VyperType::Address,
                    indexed: true,
                },
                EventArg {
                    name: "receiver".to_owned(),
                    ty: VyperType::Address,
                    indexed: true,
                },
                EventArg {
                    name: "value".to_owned(),
                    ty: UINT256,
                    indexed: false,
                },
            ],
        };
        assert_eq!(ev.abi_signature(), "Transfer(address,address,uint256)");
        // well-known ERC-20 Transfer topic
        let topic = ev.topic0();
        let hex = format!("{topic:x}");
        assert!(hex.starts_with("ddf252ad"), "got {hex}");
    }
}
