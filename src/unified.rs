//! unified.rs — Type-erased lowering of the expression DAG (spec §4.3).
//!
//! `UnifiedExpr` mirrors `Expr` one-to-one but replaces the operator-kind
//! enum's payload with a single opaque operator name plus a generic
//! operand list, the way the planner wants to see it: it doesn't care
//! whether a node was `Dot` or an `ExtensionOp`, only its operands, shape,
//! and dtype. Building this is a pure, non-fallible translation — all
//! fallibility already happened when the `Expr` was constructed.

use std::collections::HashMap;
use std::sync::Arc;

use crate::dtype::TypeName;
use crate::expr::{BinaryOp, ElementwiseBinary, ElementwiseUnary, Expr, ExprKind, LeafOp, NaryOp, UnaryOp};
use crate::shape::Shape;

/// A stable name for an operator, independent of its concrete payload
/// shape — used as the recipe assembler's template-cache key component.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OpName(pub Arc<str>);

impl OpName {
    fn of(s: &str) -> Self {
        OpName(Arc::from(s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnifiedExpr {
    pub id: u64,
    pub op: OpName,
    pub operands: Vec<u64>,
    pub shape: Shape,
    pub dtype: TypeName,
}

/// The translated graph: every node reachable from a set of roots, keyed
/// by id, plus the root ids themselves in caller-given order.
#[derive(Debug, Clone, Default)]
pub struct UnifiedGraph {
    pub nodes: HashMap<u64, UnifiedExpr>,
    pub roots: Vec<u64>,
}

pub fn lower_unified(roots: &[Expr]) -> UnifiedGraph {
    let mut graph = UnifiedGraph::default();
    for root in roots {
        lower_rec(root, &mut graph);
        graph.roots.push(root.id());
    }
    graph
}

fn lower_rec(node: &Expr, graph: &mut UnifiedGraph) {
    if graph.nodes.contains_key(&node.id()) {
        return;
    }
    let (op, operand_ids): (OpName, Vec<u64>) = match node.kind() {
        ExprKind::Leaf(leaf) => (leaf_op_name(leaf), Vec::new()),
        ExprKind::Unary(op, a) => {
            lower_rec(a, graph);
            (unary_op_name(op), vec![a.id()])
        }
        ExprKind::Binary(op, a, b) => {
            lower_rec(a, graph);
            lower_rec(b, graph);
            (binary_op_name(op), vec![a.id(), b.id()])
        }
        ExprKind::Nary(op, args) => {
            for a in args {
                lower_rec(a, graph);
            }
            (nary_op_name(op), args.iter().map(|a| a.id()).collect())
        }
    };
    graph.nodes.insert(
        node.id(),
        UnifiedExpr {
            id: node.id(),
            op,
            operands: operand_ids,
            shape: node.shape().clone(),
            dtype: node.dtype(),
        },
    );
}

fn leaf_op_name(op: &LeafOp) -> OpName {
    OpName::of(match op {
        LeafOp::Identity(..) => "identity",
        LeafOp::Zeros(..) => "zeros",
        LeafOp::ScalarConst(..) => "scalar_const",
        LeafOp::SizeValue(..) => "size_value",
        LeafOp::Var(..) => "var",
    })
}

fn unary_op_name(op: &UnaryOp) -> OpName {
    match op {
        UnaryOp::Elementwise(e) => OpName::of(elementwise_unary_name(*e)),
        UnaryOp::Sum => OpName::of("sum"),
        UnaryOp::SumAxis(_) => OpName::of("sum_axis"),
        UnaryOp::Reshape(_) => OpName::of("reshape"),
        UnaryOp::DoBroadcast(_) => OpName::of("do_broadcast"),
        UnaryOp::SwapDim(..) => OpName::of("swap_dim"),
        UnaryOp::Subtensor(_) => OpName::of("subtensor"),
        UnaryOp::StoreToVar(_) => OpName::of("store_to_var"),
        UnaryOp::Annotated(_) => OpName::of("annotated"),
    }
}

fn binary_op_name(op: &BinaryOp) -> OpName {
    match op {
        BinaryOp::Elementwise(e) => OpName::of(elementwise_binary_name(*e)),
        BinaryOp::Dot => OpName::of("dot"),
        BinaryOp::TensorProduct => OpName::of("tensor_product"),
        BinaryOp::SetSubtensor(_) => OpName::of("set_subtensor"),
    }
}

fn nary_op_name(op: &NaryOp) -> OpName {
    match op {
        NaryOp::Discard => OpName::of("discard"),
        NaryOp::Extension(ext) => OpName(Arc::from(ext.name())),
    }
}

fn elementwise_unary_name(e: ElementwiseUnary) -> &'static str {
    match e {
        ElementwiseUnary::Negate => "neg",
        ElementwiseUnary::Abs => "abs",
        ElementwiseUnary::Sign => "sign",
        ElementwiseUnary::Log => "log",
        ElementwiseUnary::Log10 => "log10",
        ElementwiseUnary::Exp => "exp",
        ElementwiseUnary::Sin => "sin",
        ElementwiseUnary::Cos => "cos",
        ElementwiseUnary::Tan => "tan",
        ElementwiseUnary::Asin => "asin",
        ElementwiseUnary::Acos => "acos",
        ElementwiseUnary::Atan => "atan",
        ElementwiseUnary::Sinh => "sinh",
        ElementwiseUnary::Cosh => "cosh",
        ElementwiseUnary::Tanh => "tanh",
        ElementwiseUnary::Sqrt => "sqrt",
        ElementwiseUnary::Ceil => "ceil",
        ElementwiseUnary::Floor => "floor",
        ElementwiseUnary::Round => "round",
        ElementwiseUnary::Truncate => "truncate",
    }
}

fn elementwise_binary_name(e: ElementwiseBinary) -> &'static str {
    match e {
        ElementwiseBinary::Add => "add",
        ElementwiseBinary::Subtract => "sub",
        ElementwiseBinary::Multiply => "mul",
        ElementwiseBinary::Divide => "div",
        ElementwiseBinary::Modulo => "mod",
        ElementwiseBinary::Power => "pow",
    }
}
