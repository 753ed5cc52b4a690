//! expr.rs — The expression graph: tagged-variant DAG (spec §3, §4.2).
//!
//! `Expr` is a cheap `Arc` handle into a node owned by an [`crate::arena::ExprArena`].
//! Two `Expr` handles compare/hash equal iff they are the *same* canonical
//! node (by allocation id) — structural sharing is enforced by the arena's
//! hash-consing, not by this module, so identical ids here really do mean
//! structurally identical subtrees.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::dtype::TypeName;
use crate::ext_op::ExtensionOp;
use crate::shape::Shape;
use crate::size::SizeExpr;
use crate::varspec::VarSpec;

/// A node in the expression DAG, owned by an arena. `id` is the arena's
/// hash-consing key; `shape`/`dtype` are cached results of shape inference
/// run once at construction (spec §4.2: "shapeOf is total ... the single
/// source of truth").
#[derive(Debug)]
pub struct ExprNode {
    pub id: u64,
    pub kind: ExprKind,
    pub shape: Shape,
    pub dtype: TypeName,
}

/// A handle to a DAG node. Cheap to clone (`Arc` bump).
#[derive(Clone)]
pub struct Expr(pub(crate) Arc<ExprNode>);

impl Expr {
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn kind(&self) -> &ExprKind {
        &self.0.kind
    }

    /// Total on any expression produced by the arena: the single source
    /// of truth for this node's shape.
    pub fn shape(&self) -> &Shape {
        &self.0.shape
    }

    pub fn dtype(&self) -> TypeName {
        self.0.dtype
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}
impl Eq for Expr {}

impl Hash for Expr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expr#{}({:?}: {})", self.0.id, self.0.kind.tag(), self.0.shape)
    }
}

// ── Operator tags ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExprKind {
    Leaf(LeafOp),
    Unary(UnaryOp, Expr),
    Binary(BinaryOp, Expr, Expr),
    Nary(NaryOp, Vec<Expr>),
}

impl ExprKind {
    pub fn tag(&self) -> &'static str {
        match self {
            ExprKind::Leaf(op) => op.tag(),
            ExprKind::Unary(op, _) => op.tag(),
            ExprKind::Binary(op, _, _) => op.tag(),
            ExprKind::Nary(op, _) => op.tag(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LeafOp {
    /// `Identity(size)` — a square identity matrix.
    Identity(SizeExpr, TypeName),
    Zeros(Shape, TypeName),
    /// Bit pattern of an `f64` scalar constant (avoids `f64: !Eq`).
    ScalarConst(u64, TypeName),
    /// A scalar tensor holding the runtime value of a symbolic size.
    SizeValue(SizeExpr, TypeName),
    Var(VarSpec),
}

impl LeafOp {
    fn tag(&self) -> &'static str {
        match self {
            LeafOp::Identity(..) => "Identity",
            LeafOp::Zeros(..) => "Zeros",
            LeafOp::ScalarConst(..) => "ScalarConst",
            LeafOp::SizeValue(..) => "SizeValue",
            LeafOp::Var(..) => "Var",
        }
    }

    pub fn scalar_const(value: f64, dtype: TypeName) -> LeafOp {
        LeafOp::ScalarConst(value.to_bits(), dtype)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementwiseUnary {
    Negate,
    Abs,
    Sign,
    Log,
    Log10,
    Exp,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Sqrt,
    Ceil,
    Floor,
    Round,
    Truncate,
}

/// A single axis of a *simple* range spec: symbolic or dynamic start,
/// plus a symbolic element count. Merges the spec's "symbolic-start-
/// symbolic-end" and "dynamic-start with symbolic size" forms into one
/// (start, size) shape — see DESIGN.md REDESIGN notes (the size algebra
/// has no subtraction, so spans are carried as sizes, not `end - start`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SimpleRangeAxis {
    pub start: RangeStart,
    pub size: SizeExpr,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RangeStart {
    Sym(SizeExpr),
    /// A runtime-computed index: a scalar int-typed sub-expression.
    Dyn(Expr),
}

pub type SimpleRangeSpec = Vec<SimpleRangeAxis>;

/// A *full* range spec axis: the simple forms plus element/new-axis/
/// all-fill, compiled by the slicing surface into `(Subtensor, Reshape)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RangeAxis {
    Range(SimpleRangeAxis),
    SymElement(SizeExpr),
    DynElement(Expr),
    NewAxis,
    AllFill,
}

pub type FullRangeSpec = Vec<RangeAxis>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Elementwise(ElementwiseUnary),
    Sum,
    SumAxis(usize),
    Reshape(Shape),
    DoBroadcast(Shape),
    SwapDim(usize, usize),
    Subtensor(SimpleRangeSpec),
    StoreToVar(VarSpec),
    Annotated(String),
}

impl UnaryOp {
    fn tag(&self) -> &'static str {
        match self {
            UnaryOp::Elementwise(_) => "Elementwise",
            UnaryOp::Sum => "Sum",
            UnaryOp::SumAxis(_) => "SumAxis",
            UnaryOp::Reshape(_) => "Reshape",
            UnaryOp::DoBroadcast(_) => "DoBroadcast",
            UnaryOp::SwapDim(..) => "SwapDim",
            UnaryOp::Subtensor(_) => "Subtensor",
            UnaryOp::StoreToVar(_) => "StoreToVar",
            UnaryOp::Annotated(_) => "Annotated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementwiseBinary {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Elementwise(ElementwiseBinary),
    Dot,
    TensorProduct,
    SetSubtensor(SimpleRangeSpec),
}

impl BinaryOp {
    fn tag(&self) -> &'static str {
        match self {
            BinaryOp::Elementwise(_) => "Elementwise",
            BinaryOp::Dot => "Dot",
            BinaryOp::TensorProduct => "TensorProduct",
            BinaryOp::SetSubtensor(_) => "SetSubtensor",
        }
    }
}

/// Nary operators: `Discard` (evaluate operands for side effects, produce
/// nothing of interest) and the open `ExtensionOp` hook.
#[derive(Debug, Clone)]
pub enum NaryOp {
    Discard,
    Extension(Arc<dyn ExtensionOp>),
}

impl NaryOp {
    fn tag(&self) -> &'static str {
        match self {
            NaryOp::Discard => "Discard",
            NaryOp::Extension(ext) => ext.name(),
        }
    }
}

impl PartialEq for NaryOp {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (NaryOp::Discard, NaryOp::Discard) => true,
            (NaryOp::Extension(a), NaryOp::Extension(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
impl Eq for NaryOp {}

impl Hash for NaryOp {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            NaryOp::Discard => 0u8.hash(state),
            NaryOp::Extension(ext) => {
                1u8.hash(state);
                (Arc::as_ptr(ext) as *const () as usize).hash(state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_const_roundtrips_bits() {
        let op = LeafOp::scalar_const(3.5, TypeName::Double);
        if let LeafOp::ScalarConst(bits, dtype) = op {
            assert_eq!(f64::from_bits(bits), 3.5);
            assert_eq!(dtype, TypeName::Double);
        } else {
            panic!("wrong variant");
        }
    }
}
