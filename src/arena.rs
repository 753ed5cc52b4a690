//! arena.rs — Expression arena and hash-consing session (spec §4.2, §9).
//!
//! Per the REDESIGN notes (see SPEC_FULL.md), the expression memo is NOT a
//! process-wide static: it lives on an [`ExprArena`] that the caller owns
//! for the lifetime of one compile. Two `Expr` handles minted by different
//! arenas are never `==`, even if structurally identical — sharing across
//! arenas is out of scope.
//!
//! Construction always runs shape inference: every `ExprArena::*` method
//! returns `Result<Expr, CompileError>`, and a structurally identical call
//! returns the *same* `Expr` (by id) as a prior call, so building a DAG
//! with repeated subexpressions naturally yields a shared, not duplicated,
//! graph. This is the engine spec §4.2 calls "checked expressions are
//! memoized in the arena".

use std::collections::HashMap;
use std::sync::Arc;

use crate::diag::{codes, Diagnostic, NodeRef};
use crate::dtype::TypeName;
use crate::error::CompileError;
use crate::ext_op::ExtensionOp;
use crate::expr::{
    BinaryOp, ElementwiseBinary, ElementwiseUnary, Expr, ExprKind, ExprNode, FullRangeSpec, LeafOp,
    NaryOp, RangeAxis, RangeStart, SimpleRangeAxis, SimpleRangeSpec, UnaryOp,
};
use crate::shape::Shape;
use crate::size::{SizeExpr, Symbol};
use crate::varspec::VarSpec;

type SymSizeEnv = std::collections::BTreeMap<Symbol, u64>;

/// Owns the hash-consing memo and the monotonic id allocator for one
/// compile session's worth of expression construction.
#[derive(Debug, Default)]
pub struct ExprArena {
    memo: HashMap<ExprKind, Expr>,
    next_id: u64,
}

impl ExprArena {
    pub fn new() -> Self {
        ExprArena {
            memo: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.memo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memo.is_empty()
    }

    fn intern(&mut self, kind: ExprKind, shape: Shape, dtype: TypeName) -> Expr {
        if let Some(existing) = self.memo.get(&kind) {
            return existing.clone();
        }
        let id = self.next_id;
        self.next_id += 1;
        let node = Expr(Arc::new(ExprNode {
            id,
            kind: kind.clone(),
            shape,
            dtype,
        }));
        self.memo.insert(kind, node.clone());
        node
    }

    // ── Leaves ───────────────────────────────────────────────────────

    pub fn identity(&mut self, size: SizeExpr, dtype: TypeName) -> Expr {
        let shape = Shape::new(vec![size.clone(), size.clone()]);
        self.intern(ExprKind::Leaf(LeafOp::Identity(size, dtype)), shape, dtype)
    }

    pub fn zeros(&mut self, shape: Shape, dtype: TypeName) -> Expr {
        let s = shape.clone();
        self.intern(ExprKind::Leaf(LeafOp::Zeros(shape, dtype)), s, dtype)
    }

    pub fn scalar_const(&mut self, value: f64, dtype: TypeName) -> Expr {
        self.intern(
            ExprKind::Leaf(LeafOp::scalar_const(value, dtype)),
            Shape::scalar(),
            dtype,
        )
    }

    pub fn size_value(&mut self, size: SizeExpr, dtype: TypeName) -> Expr {
        self.intern(
            ExprKind::Leaf(LeafOp::SizeValue(size, dtype)),
            Shape::scalar(),
            dtype,
        )
    }

    pub fn var(&mut self, var: VarSpec) -> Expr {
        let shape = var.shape.clone();
        let dtype = var.dtype;
        self.intern(ExprKind::Leaf(LeafOp::Var(var)), shape, dtype)
    }

    // ── Unary ────────────────────────────────────────────────────────

    pub fn elementwise_unary(
        &mut self,
        op: ElementwiseUnary,
        operand: Expr,
    ) -> Result<Expr, CompileError> {
        let shape = operand.shape().clone();
        let dtype = operand.dtype();
        Ok(self.intern(
            ExprKind::Unary(UnaryOp::Elementwise(op), operand),
            shape,
            dtype,
        ))
    }

    pub fn sum(&mut self, operand: Expr) -> Result<Expr, CompileError> {
        let dtype = operand.dtype();
        Ok(self.intern(ExprKind::Unary(UnaryOp::Sum, operand), Shape::scalar(), dtype))
    }

    pub fn sum_axis(&mut self, operand: Expr, axis: usize) -> Result<Expr, CompileError> {
        let rank = operand.shape().rank();
        if axis >= rank {
            return Err(CompileError::RankMismatch(
                Diagnostic::error(
                    NodeRef::Expr(operand.id()),
                    format!("sum_axis({axis}) out of range for rank {rank}"),
                )
                .with_code(codes::RANK_MISMATCH),
            ));
        }
        let mut dims: Vec<SizeExpr> = operand.shape().dims().to_vec();
        dims.remove(axis);
        let shape = Shape::new(dims);
        let dtype = operand.dtype();
        Ok(self.intern(
            ExprKind::Unary(UnaryOp::SumAxis(axis), operand),
            shape,
            dtype,
        ))
    }

    pub fn reshape(&mut self, operand: Expr, shape: Shape, env: &SymSizeEnv) -> Result<Expr, CompileError> {
        let old = operand.shape().num_elements();
        let new = shape.num_elements();
        if old.can_eval(env) && new.can_eval(env) && old.eval(env) != new.eval(env) {
            return Err(CompileError::RankMismatch(
                Diagnostic::error(
                    NodeRef::Expr(operand.id()),
                    format!("reshape changes element count: {old} -> {new}"),
                )
                .with_code(codes::RANK_MISMATCH),
            ));
        }
        // A symbolic mismatch that can't yet be disproved numerically is
        // accepted here; `canEvalAllSymSizes` gates the phase that actually
        // needs the concrete count.
        let dtype = operand.dtype();
        Ok(self.intern(
            ExprKind::Unary(UnaryOp::Reshape(shape.clone()), operand),
            shape,
            dtype,
        ))
    }

    pub fn do_broadcast(&mut self, operand: Expr, shape: Shape) -> Result<Expr, CompileError> {
        if shape.rank() != operand.shape().rank() {
            return Err(CompileError::RankMismatch(
                Diagnostic::error(
                    NodeRef::Expr(operand.id()),
                    "do_broadcast target rank differs from operand rank",
                )
                .with_code(codes::RANK_MISMATCH),
            ));
        }
        let dtype = operand.dtype();
        Ok(self.intern(
            ExprKind::Unary(UnaryOp::DoBroadcast(shape.clone()), operand),
            shape,
            dtype,
        ))
    }

    pub fn swap_dim(&mut self, operand: Expr, i: usize, j: usize) -> Result<Expr, CompileError> {
        let rank = operand.shape().rank();
        if i >= rank || j >= rank {
            return Err(CompileError::RankMismatch(
                Diagnostic::error(
                    NodeRef::Expr(operand.id()),
                    format!("swap_dim({i}, {j}) out of range for rank {rank}"),
                )
                .with_code(codes::RANK_MISMATCH),
            ));
        }
        let shape = operand.shape().swap(i, j);
        let dtype = operand.dtype();
        Ok(self.intern(ExprKind::Unary(UnaryOp::SwapDim(i, j), operand), shape, dtype))
    }

    pub fn subtensor(&mut self, operand: Expr, spec: SimpleRangeSpec) -> Result<Expr, CompileError> {
        let rank = operand.shape().rank();
        if spec.len() != rank {
            return Err(CompileError::RankMismatch(
                Diagnostic::error(
                    NodeRef::Expr(operand.id()),
                    format!(
                        "subtensor spec has {} axes, operand has rank {rank}",
                        spec.len()
                    ),
                )
                .with_code(codes::RANK_MISMATCH),
            ));
        }
        let dims: Vec<SizeExpr> = spec.iter().map(|a| a.size.clone()).collect();
        let shape = Shape::new(dims);
        let dtype = operand.dtype();
        Ok(self.intern(
            ExprKind::Unary(UnaryOp::Subtensor(spec), operand),
            shape,
            dtype,
        ))
    }

    /// The slicing/indexing surface (spec §4.2): accepts a heterogeneous
    /// `FullRangeSpec` — ranges, single-index elements, `NewAxis`, and at
    /// most one `AllFill` wildcard standing in for the remaining axes —
    /// and compiles it down to the `(Subtensor, Reshape)` pair the simple
    /// spec can't express on its own: `Subtensor` picks out the elements
    /// (collapsing element axes to size-1), `Reshape` then drops those
    /// size-1 axes and inserts a broadcastable axis for every `NewAxis`.
    pub fn slice(
        &mut self,
        operand: Expr,
        spec: FullRangeSpec,
        env: &SymSizeEnv,
    ) -> Result<Expr, CompileError> {
        let rank = operand.shape().rank();
        let fill_count = spec.iter().filter(|a| matches!(a, RangeAxis::AllFill)).count();
        if fill_count > 1 {
            return Err(CompileError::RankMismatch(
                Diagnostic::error(
                    NodeRef::Expr(operand.id()),
                    "slice spec has more than one Fill wildcard",
                )
                .with_code(codes::RANK_MISMATCH),
            ));
        }
        let consumed = spec
            .iter()
            .filter(|a| !matches!(a, RangeAxis::NewAxis | RangeAxis::AllFill))
            .count();
        if consumed > rank || (fill_count == 0 && consumed != rank) {
            return Err(CompileError::RankMismatch(
                Diagnostic::error(
                    NodeRef::Expr(operand.id()),
                    format!("slice spec covers {consumed} axes, operand has rank {rank}"),
                )
                .with_code(codes::RANK_MISMATCH),
            ));
        }
        let fill_span = rank - consumed;

        let mut subtensor_spec: SimpleRangeSpec = Vec::with_capacity(rank);
        let mut reshape_dims: Vec<SizeExpr> = Vec::with_capacity(spec.len() + fill_span);
        let mut operand_axis = 0usize;

        for axis in &spec {
            match axis {
                RangeAxis::Range(simple) => {
                    reshape_dims.push(simple.size.clone());
                    subtensor_spec.push(simple.clone());
                    operand_axis += 1;
                }
                RangeAxis::SymElement(s) => {
                    subtensor_spec.push(simple_axis_sym(s.clone(), SizeExpr::fix(1)));
                    operand_axis += 1;
                }
                RangeAxis::DynElement(e) => {
                    subtensor_spec.push(simple_axis_dyn(e.clone(), SizeExpr::fix(1)));
                    operand_axis += 1;
                }
                RangeAxis::NewAxis => {
                    reshape_dims.push(SizeExpr::broadcast());
                }
                RangeAxis::AllFill => {
                    for _ in 0..fill_span {
                        let dim = operand.shape().dim(operand_axis).cloned().ok_or_else(|| {
                            CompileError::RankMismatch(
                                Diagnostic::error(
                                    NodeRef::Expr(operand.id()),
                                    "slice Fill wildcard ran past operand rank",
                                )
                                .with_code(codes::RANK_MISMATCH),
                            )
                        })?;
                        subtensor_spec.push(simple_axis_sym(SizeExpr::fix(0), dim.clone()));
                        reshape_dims.push(dim);
                        operand_axis += 1;
                    }
                }
            }
        }

        let sliced = self.subtensor(operand, subtensor_spec)?;
        self.reshape(sliced, Shape::new(reshape_dims), env)
    }

    pub fn store_to_var(&mut self, operand: Expr, var: VarSpec) -> Result<Expr, CompileError> {
        if var.dtype != operand.dtype() {
            return Err(CompileError::ShapeMismatch(
                Diagnostic::error(
                    NodeRef::Var(var.name.clone()),
                    format!(
                        "store_to_var dtype mismatch: var is {}, value is {}",
                        var.dtype,
                        operand.dtype()
                    ),
                )
                .with_code(codes::SHAPE_MISMATCH),
            ));
        }
        if var.shape != *operand.shape() {
            return Err(CompileError::ShapeMismatch(
                Diagnostic::error(
                    NodeRef::Var(var.name.clone()),
                    format!(
                        "store_to_var shape mismatch: var is {}, value is {}",
                        var.shape,
                        operand.shape()
                    ),
                )
                .with_code(codes::SHAPE_MISMATCH),
            ));
        }
        let dtype = operand.dtype();
        // Per spec, StoreToVar is a side-effecting unit whose own result
        // shape is the empty (scalar-void) sentinel.
        Ok(self.intern(
            ExprKind::Unary(UnaryOp::StoreToVar(var), operand),
            Shape::scalar(),
            dtype,
        ))
    }

    pub fn annotated(&mut self, operand: Expr, label: impl Into<String>) -> Expr {
        let shape = operand.shape().clone();
        let dtype = operand.dtype();
        self.intern(
            ExprKind::Unary(UnaryOp::Annotated(label.into()), operand),
            shape,
            dtype,
        )
    }

    // ── Binary ───────────────────────────────────────────────────────

    pub fn elementwise_binary(
        &mut self,
        op: ElementwiseBinary,
        lhs: Expr,
        rhs: Expr,
        env: &SymSizeEnv,
    ) -> Result<Expr, CompileError> {
        let shape = Shape::broadcast_to_same(lhs.shape(), rhs.shape(), env).map_err(|e| {
            CompileError::ShapeMismatch(
                Diagnostic::error(NodeRef::Expr(lhs.id()), e.to_string())
                    .with_code(codes::SHAPE_MISMATCH)
                    .with_hint("elementwise ops auto-broadcast; align ranks or mark an axis broadcastable"),
            )
        })?;
        let dtype = lhs.dtype();
        Ok(self.intern(
            ExprKind::Binary(BinaryOp::Elementwise(op), lhs, rhs),
            shape,
            dtype,
        ))
    }

    pub fn dot(&mut self, lhs: Expr, rhs: Expr, env: &SymSizeEnv) -> Result<Expr, CompileError> {
        let lr = lhs.shape().rank();
        let rr = rhs.shape().rank();
        if lr == 0 || rr == 0 || lr > 2 || rr > 2 {
            return Err(CompileError::RankMismatch(
                Diagnostic::error(NodeRef::Expr(lhs.id()), "dot requires rank-1 or rank-2 operands")
                    .with_code(codes::RANK_MISMATCH),
            ));
        }
        let inner_l = lhs.shape().dim(lr - 1).unwrap();
        let inner_r = rhs.shape().dim(0).unwrap();
        if !inner_l.equal_under_env(inner_r, env) {
            return Err(CompileError::ShapeMismatch(
                Diagnostic::error(
                    NodeRef::Expr(lhs.id()),
                    format!("dot inner dimension mismatch: {inner_l} vs {inner_r}"),
                )
                .with_code(codes::SHAPE_MISMATCH),
            ));
        }
        let mut dims = Vec::new();
        if lr == 2 {
            dims.push(lhs.shape().dim(0).unwrap().clone());
        }
        if rr == 2 {
            dims.push(rhs.shape().dim(1).unwrap().clone());
        }
        let shape = Shape::new(dims);
        let dtype = lhs.dtype();
        Ok(self.intern(ExprKind::Binary(BinaryOp::Dot, lhs, rhs), shape, dtype))
    }

    pub fn tensor_product(&mut self, lhs: Expr, rhs: Expr) -> Result<Expr, CompileError> {
        let mut dims = lhs.shape().dims().to_vec();
        dims.extend(rhs.shape().dims().iter().cloned());
        let shape = Shape::new(dims);
        let dtype = lhs.dtype();
        Ok(self.intern(
            ExprKind::Binary(BinaryOp::TensorProduct, lhs, rhs),
            shape,
            dtype,
        ))
    }

    pub fn set_subtensor(
        &mut self,
        base: Expr,
        value: Expr,
        spec: SimpleRangeSpec,
        env: &SymSizeEnv,
    ) -> Result<Expr, CompileError> {
        let rank = base.shape().rank();
        if spec.len() != rank {
            return Err(CompileError::RankMismatch(
                Diagnostic::error(
                    NodeRef::Expr(base.id()),
                    format!(
                        "set_subtensor spec has {} axes, base has rank {rank}",
                        spec.len()
                    ),
                )
                .with_code(codes::RANK_MISMATCH),
            ));
        }
        let value_shape = Shape::new(spec.iter().map(|a| a.size.clone()).collect());
        if !shapes_equal_under_env(&value_shape, value.shape(), env) {
            return Err(CompileError::ShapeMismatch(
                Diagnostic::error(
                    NodeRef::Expr(value.id()),
                    format!(
                        "set_subtensor value shape {} does not match target slice shape {value_shape}",
                        value.shape()
                    ),
                )
                .with_code(codes::SHAPE_MISMATCH),
            ));
        }
        let shape = base.shape().clone();
        let dtype = base.dtype();
        Ok(self.intern(
            ExprKind::Binary(BinaryOp::SetSubtensor(spec), base, value),
            shape,
            dtype,
        ))
    }

    // ── Nary ─────────────────────────────────────────────────────────

    pub fn discard(&mut self, operands: Vec<Expr>) -> Expr {
        self.intern(
            ExprKind::Nary(NaryOp::Discard, operands),
            Shape::scalar(),
            TypeName::Int32,
        )
    }

    pub fn extension(
        &mut self,
        op: Arc<dyn ExtensionOp>,
        args: Vec<Expr>,
    ) -> Result<Expr, CompileError> {
        if args.len() != op.arity() {
            return Err(CompileError::UnsupportedOp(
                Diagnostic::error(
                    NodeRef::None,
                    format!(
                        "extension op {} expects {} args, got {}",
                        op.name(),
                        op.arity(),
                        args.len()
                    ),
                )
                .with_code(codes::UNSUPPORTED_OP),
            ));
        }
        let arg_shapes: Vec<Shape> = args.iter().map(|a| a.shape().clone()).collect();
        let arg_dtypes: Vec<TypeName> = args.iter().map(|a| a.dtype()).collect();
        let (shape, dtype) = op.shape_of(&arg_shapes, &arg_dtypes)?;
        Ok(self.intern(ExprKind::Nary(NaryOp::Extension(op), args), shape, dtype))
    }
}

fn shapes_equal_under_env(a: &Shape, b: &Shape, env: &SymSizeEnv) -> bool {
    if a.rank() != b.rank() {
        return false;
    }
    a.dims()
        .iter()
        .zip(b.dims())
        .all(|(x, y)| x.equal_under_env(y, env))
}

pub fn simple_axis_sym(start: SizeExpr, size: SizeExpr) -> SimpleRangeAxis {
    SimpleRangeAxis {
        start: RangeStart::Sym(start),
        size,
    }
}

pub fn simple_axis_dyn(start: Expr, size: SizeExpr) -> SimpleRangeAxis {
    SimpleRangeAxis {
        start: RangeStart::Dyn(start),
        size,
    }
}
