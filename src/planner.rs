//! planner.rs — Execution-unit planner (spec §4.4).
//!
//! Walks the expression DAG post-order, assigning each node a result
//! [`Manikin`] (reusing an operand's storage in place when safe) and
//! emitting the [`PrimitiveOp`]s that realize it. View operators
//! (`Reshape`/`DoBroadcast`/`SwapDim`/`Subtensor` with a symbolic start)
//! emit no primitive op at all — only the manikin's shape/strides/offset
//! change — so they get no execution unit of their own; the node is
//! simply attributed to whichever unit produced its underlying storage.

use std::collections::{HashMap, HashSet};

use crate::diag::{codes, Diagnostic, NodeRef};
use crate::env::{CompileEnv, SymSizeEnv};
use crate::error::CompileError;
use crate::expr::{
    BinaryOp, ElementwiseBinary, ElementwiseUnary, Expr, ExprKind, LeafOp, NaryOp, RangeStart,
    SimpleRangeSpec, UnaryOp,
};
use crate::manikin::{AllocId, Manikin, MemAlloc, StorageBinding};
use crate::primitive::{ExecutionUnit, PrimitiveOp, UnitId};
use crate::shape::Shape;
use crate::varspec::Placement;

/// The planner's full output: a topologically ordered unit list, every
/// node's result manikin, the allocations it made, and which units are
/// one-shot warmup work (host->device uploads, constant priming).
#[derive(Debug, Clone)]
pub struct PlannerOutput {
    pub units: Vec<ExecutionUnit>,
    pub manikin_of: HashMap<u64, Manikin>,
    pub allocations: Vec<MemAlloc>,
    pub warmup_units: Vec<UnitId>,
}

struct PlanCtx<'a> {
    sym_env: &'a SymSizeEnv,
    compile_env: &'a CompileEnv,
    consumer_count: HashMap<u64, u32>,
    protected: HashSet<u64>,
    done: HashSet<u64>,
    units: Vec<ExecutionUnit>,
    manikin_of: HashMap<u64, Manikin>,
    unit_of: HashMap<u64, UnitId>,
    allocations: Vec<MemAlloc>,
    warmup_units: Vec<UnitId>,
    next_alloc: u32,
}

impl<'a> PlanCtx<'a> {
    fn fresh_alloc(&mut self, byte_size: u64, dtype: crate::dtype::TypeName) -> AllocId {
        let id = AllocId(self.next_alloc);
        self.next_alloc += 1;
        self.allocations.push(MemAlloc {
            id,
            byte_size,
            dtype,
        });
        id
    }

    fn unit_of(&self, node: &Expr) -> Option<UnitId> {
        self.unit_of.get(&node.id()).copied()
    }

    fn eligible_in_place(&self, operand: &Expr) -> bool {
        self.consumer_count.get(&operand.id()).copied().unwrap_or(0) == 1
            && !self.protected.contains(&operand.id())
    }
}

pub fn plan(
    roots: &[Expr],
    compile_env: &CompileEnv,
    sym_env: &SymSizeEnv,
) -> Result<PlannerOutput, CompileError> {
    let consumer_count = count_consumers(roots);
    let protected: HashSet<u64> = roots.iter().map(|r| r.id()).collect();
    let mut ctx = PlanCtx {
        sym_env,
        compile_env,
        consumer_count,
        protected,
        done: HashSet::new(),
        units: Vec::new(),
        manikin_of: HashMap::new(),
        unit_of: HashMap::new(),
        allocations: Vec::new(),
        warmup_units: Vec::new(),
        next_alloc: 0,
    };
    for root in roots {
        visit(root, &mut ctx)?;
    }
    Ok(PlannerOutput {
        units: ctx.units,
        manikin_of: ctx.manikin_of,
        allocations: ctx.allocations,
        warmup_units: ctx.warmup_units,
    })
}

fn count_consumers(roots: &[Expr]) -> HashMap<u64, u32> {
    let mut counts = HashMap::new();
    let mut visited = HashSet::new();
    for root in roots {
        count_rec(root, &mut counts, &mut visited);
    }
    counts
}

fn children_of(node: &Expr) -> Vec<Expr> {
    match node.kind() {
        ExprKind::Leaf(_) => Vec::new(),
        ExprKind::Unary(UnaryOp::Subtensor(spec), a) => {
            let mut out = vec![a.clone()];
            out.extend(dyn_children_of_spec(spec));
            out
        }
        ExprKind::Unary(_, a) => vec![a.clone()],
        ExprKind::Binary(BinaryOp::SetSubtensor(spec), a, b) => {
            let mut out = vec![a.clone(), b.clone()];
            out.extend(dyn_children_of_spec(spec));
            out
        }
        ExprKind::Binary(_, a, b) => vec![a.clone(), b.clone()],
        ExprKind::Nary(_, args) => args.clone(),
    }
}

fn dyn_children_of_spec(spec: &SimpleRangeSpec) -> Vec<Expr> {
    spec.iter()
        .filter_map(|axis| match &axis.start {
            RangeStart::Dyn(e) => Some(e.clone()),
            RangeStart::Sym(_) => None,
        })
        .collect()
}

fn count_rec(node: &Expr, counts: &mut HashMap<u64, u32>, visited: &mut HashSet<u64>) {
    let first = visited.insert(node.id());
    for child in children_of(node) {
        *counts.entry(child.id()).or_insert(0) += 1;
    }
    if first {
        for child in children_of(node) {
            count_rec(&child, counts, visited);
        }
    }
}

fn unresolved_symbols_error(node: &Expr, shape: &Shape, env: &SymSizeEnv) -> CompileError {
    let mut missing: Vec<String> = shape
        .dims()
        .iter()
        .flat_map(|d| d.symbols_used())
        .filter(|s| !env.contains_key(s))
        .collect();
    missing.sort();
    missing.dedup();
    CompileError::UnresolvedSymbol(
        Diagnostic::error(
            NodeRef::Expr(node.id()),
            format!("unresolved symbolic sizes: {}", missing.join(", ")),
        )
        .with_code(codes::UNRESOLVED_SYMBOL),
    )
}

fn resolved_dims(node: &Expr, shape: &Shape, env: &SymSizeEnv) -> Result<Vec<u64>, CompileError> {
    if !shape.can_eval(env) {
        return Err(unresolved_symbols_error(node, shape, env));
    }
    Ok(shape.dims().iter().map(|d| d.eval(env).unwrap()).collect())
}

fn row_major_strides(dims: &[u64]) -> Vec<i64> {
    let mut strides = vec![0i64; dims.len()];
    let mut acc: i64 = 1;
    for i in (0..dims.len()).rev() {
        strides[i] = acc;
        acc *= dims[i] as i64;
    }
    strides
}

fn visit(node: &Expr, ctx: &mut PlanCtx) -> Result<(), CompileError> {
    if ctx.done.contains(&node.id()) {
        return Ok(());
    }
    for child in children_of(node) {
        visit(&child, ctx)?;
    }
    let dims = resolved_dims(node, node.shape(), ctx.sym_env)?;
    let byte_size = node.dtype().byte_size() * dims.iter().product::<u64>().max(1);

    match node.kind().clone() {
        ExprKind::Leaf(leaf) => visit_leaf(node, &leaf, &dims, byte_size, ctx)?,
        ExprKind::Unary(op, operand) => visit_unary(node, &op, &operand, &dims, byte_size, ctx)?,
        ExprKind::Binary(op, lhs, rhs) => {
            visit_binary(node, &op, &lhs, &rhs, &dims, byte_size, ctx)?
        }
        ExprKind::Nary(op, args) => visit_nary(node, &op, &args, &dims, byte_size, ctx)?,
    }
    ctx.done.insert(node.id());
    Ok(())
}

fn visit_leaf(
    node: &Expr,
    leaf: &LeafOp,
    dims: &[u64],
    byte_size: u64,
    ctx: &mut PlanCtx,
) -> Result<(), CompileError> {
    match leaf {
        LeafOp::Var(var) => {
            let placement = ctx.compile_env.placement_of(var).ok_or_else(|| {
                CompileError::PlacementMissing(
                    Diagnostic::error(
                        NodeRef::Var(var.name.clone()),
                        format!("no placement recorded for variable {}", var.name),
                    )
                    .with_code(codes::PLACEMENT_MISSING),
                )
            })?;
            let external = Manikin::external(node.shape().clone(), dims, node.dtype(), var.clone());
            match placement {
                Placement::Device => {
                    ctx.manikin_of.insert(node.id(), external);
                }
                Placement::Host => {
                    let alloc = ctx.fresh_alloc(byte_size, node.dtype());
                    let device_manikin =
                        Manikin::contiguous(node.shape().clone(), dims, node.dtype(), alloc);
                    let mut unit = ExecutionUnit::new(UnitId(ctx.units.len() as u32), device_manikin.clone());
                    unit.ops.push(PrimitiveOp::MemcpyHtoD {
                        src: external,
                        dst: device_manikin.clone(),
                    });
                    unit.allocates.push(alloc);
                    let id = unit.id;
                    ctx.units.push(unit);
                    ctx.warmup_units.push(id);
                    ctx.unit_of.insert(node.id(), id);
                    ctx.manikin_of.insert(node.id(), device_manikin);
                }
            }
        }
        LeafOp::Zeros(_, dtype) => {
            let alloc = ctx.fresh_alloc(byte_size, *dtype);
            let manikin = Manikin::contiguous(node.shape().clone(), dims, *dtype, alloc);
            let mut unit = ExecutionUnit::new(UnitId(ctx.units.len() as u32), manikin.clone());
            unit.ops.push(PrimitiveOp::Memset {
                dst: manikin.clone(),
                byte_value: 0,
            });
            unit.allocates.push(alloc);
            let id = unit.id;
            ctx.units.push(unit);
            ctx.unit_of.insert(node.id(), id);
            ctx.manikin_of.insert(node.id(), manikin);
        }
        LeafOp::ScalarConst(bits, dtype) => {
            let alloc = ctx.fresh_alloc(byte_size, *dtype);
            let manikin = Manikin::contiguous(node.shape().clone(), dims, *dtype, alloc);
            let mut unit = ExecutionUnit::new(UnitId(ctx.units.len() as u32), manikin.clone());
            unit.ops.push(PrimitiveOp::WriteScalarConst {
                dst: manikin.clone(),
                bits: *bits,
            });
            unit.allocates.push(alloc);
            let id = unit.id;
            ctx.units.push(unit);
            ctx.unit_of.insert(node.id(), id);
            ctx.manikin_of.insert(node.id(), manikin);
        }
        LeafOp::SizeValue(_, dtype) => {
            let alloc = ctx.fresh_alloc(byte_size, *dtype);
            let manikin = Manikin::contiguous(node.shape().clone(), dims, *dtype, alloc);
            let mut unit = ExecutionUnit::new(UnitId(ctx.units.len() as u32), manikin.clone());
            unit.ops.push(PrimitiveOp::LaunchKernel {
                kernel_name: "write_size_value".to_string(),
                args: vec![manikin.clone()],
            });
            unit.allocates.push(alloc);
            let id = unit.id;
            ctx.units.push(unit);
            ctx.unit_of.insert(node.id(), id);
            ctx.manikin_of.insert(node.id(), manikin);
        }
        LeafOp::Identity(_, dtype) => {
            let alloc = ctx.fresh_alloc(byte_size, *dtype);
            let manikin = Manikin::contiguous(node.shape().clone(), dims, *dtype, alloc);
            let mut unit = ExecutionUnit::new(UnitId(ctx.units.len() as u32), manikin.clone());
            unit.ops.push(PrimitiveOp::LaunchKernel {
                kernel_name: "identity_fill".to_string(),
                args: vec![manikin.clone()],
            });
            unit.allocates.push(alloc);
            let id = unit.id;
            ctx.units.push(unit);
            ctx.unit_of.insert(node.id(), id);
            ctx.manikin_of.insert(node.id(), manikin);
        }
    }
    Ok(())
}

fn elementwise_unary_kernel(op: ElementwiseUnary) -> &'static str {
    use ElementwiseUnary::*;
    match op {
        Negate => "ew_neg",
        Abs => "ew_abs",
        Sign => "ew_sign",
        Log => "ew_log",
        Log10 => "ew_log10",
        Exp => "ew_exp",
        Sin => "ew_sin",
        Cos => "ew_cos",
        Tan => "ew_tan",
        Asin => "ew_asin",
        Acos => "ew_acos",
        Atan => "ew_atan",
        Sinh => "ew_sinh",
        Cosh => "ew_cosh",
        Tanh => "ew_tanh",
        Sqrt => "ew_sqrt",
        Ceil => "ew_ceil",
        Floor => "ew_floor",
        Round => "ew_round",
        Truncate => "ew_truncate",
    }
}

fn elementwise_binary_kernel(op: ElementwiseBinary) -> &'static str {
    use ElementwiseBinary::*;
    match op {
        Add => "ew_add",
        Subtract => "ew_sub",
        Multiply => "ew_mul",
        Divide => "ew_div",
        Modulo => "ew_mod",
        Power => "ew_pow",
    }
}

fn visit_unary(
    node: &Expr,
    op: &UnaryOp,
    operand: &Expr,
    dims: &[u64],
    byte_size: u64,
    ctx: &mut PlanCtx,
) -> Result<(), CompileError> {
    let operand_manikin = ctx
        .manikin_of
        .get(&operand.id())
        .cloned()
        .expect("operand planned before use (post-order invariant)");
    match op {
        UnaryOp::Elementwise(e) => {
            let in_place = ctx.eligible_in_place(operand);
            let result = if in_place {
                operand_manikin.clone()
            } else {
                let alloc = ctx.fresh_alloc(byte_size, node.dtype());
                Manikin::contiguous(node.shape().clone(), dims, node.dtype(), alloc)
            };
            let mut unit = ExecutionUnit::new(UnitId(ctx.units.len() as u32), result.clone());
            unit.ops.push(PrimitiveOp::LaunchKernel {
                kernel_name: elementwise_unary_kernel(*e).to_string(),
                args: vec![operand_manikin, result.clone()],
            });
            if let Some(dep) = ctx.unit_of(operand) {
                unit.depends_on.push(dep);
            }
            if !in_place {
                if let StorageBinding::Internal(alloc) = &result.storage {
                    unit.allocates.push(*alloc);
                }
            }
            let id = unit.id;
            ctx.units.push(unit);
            ctx.unit_of.insert(node.id(), id);
            ctx.manikin_of.insert(node.id(), result);
        }
        UnaryOp::Sum | UnaryOp::SumAxis(_) => {
            let alloc = ctx.fresh_alloc(byte_size, node.dtype());
            let result = Manikin::contiguous(node.shape().clone(), dims, node.dtype(), alloc);
            let mut unit = ExecutionUnit::new(UnitId(ctx.units.len() as u32), result.clone());
            let func_name = if matches!(op, UnaryOp::Sum) {
                "reduce_sum"
            } else {
                "reduce_sum_axis"
            };
            unit.ops.push(PrimitiveOp::CallCFunc {
                func_name: func_name.to_string(),
                args: vec![operand_manikin, result.clone()],
            });
            if let Some(dep) = ctx.unit_of(operand) {
                unit.depends_on.push(dep);
            }
            unit.allocates.push(alloc);
            let id = unit.id;
            ctx.units.push(unit);
            ctx.unit_of.insert(node.id(), id);
            ctx.manikin_of.insert(node.id(), result);
        }
        UnaryOp::Reshape(_) => {
            let strides = row_major_strides(dims);
            let view = operand_manikin.view(node.shape().clone(), strides, operand_manikin.offset);
            if let Some(dep) = ctx.unit_of(operand) {
                ctx.unit_of.insert(node.id(), dep);
            }
            ctx.manikin_of.insert(node.id(), view);
        }
        UnaryOp::DoBroadcast(_) => {
            let old_dims = resolved_dims(operand, operand.shape(), ctx.sym_env)?;
            let mut strides = operand_manikin.strides.clone();
            for axis in 0..dims.len() {
                if old_dims.get(axis).copied().unwrap_or(1) != dims[axis] {
                    strides[axis] = 0;
                }
            }
            let view = operand_manikin.view(node.shape().clone(), strides, operand_manikin.offset);
            if let Some(dep) = ctx.unit_of(operand) {
                ctx.unit_of.insert(node.id(), dep);
            }
            ctx.manikin_of.insert(node.id(), view);
        }
        UnaryOp::SwapDim(i, j) => {
            let mut strides = operand_manikin.strides.clone();
            strides.swap(*i, *j);
            let view = operand_manikin.view(node.shape().clone(), strides, operand_manikin.offset);
            if let Some(dep) = ctx.unit_of(operand) {
                ctx.unit_of.insert(node.id(), dep);
            }
            ctx.manikin_of.insert(node.id(), view);
        }
        UnaryOp::Subtensor(spec) => {
            if spec.iter().all(|a| matches!(a.start, RangeStart::Sym(_))) {
                let mut offset = operand_manikin.offset as i64;
                for (axis, a) in spec.iter().enumerate() {
                    if let RangeStart::Sym(s) = &a.start {
                        let start = s.eval(ctx.sym_env).ok_or_else(|| {
                            unresolved_symbols_error(node, &Shape::new(vec![s.clone()]), ctx.sym_env)
                        })?;
                        offset += start as i64 * operand_manikin.strides[axis];
                    }
                }
                let view = operand_manikin.view(node.shape().clone(), operand_manikin.strides.clone(), offset as u64);
                if let Some(dep) = ctx.unit_of(operand) {
                    ctx.unit_of.insert(node.id(), dep);
                }
                ctx.manikin_of.insert(node.id(), view);
            } else {
                // Dynamic start: resolved only at runtime, so this cannot be
                // a zero-cost view. Materialize into a fresh buffer via a
                // host-side gather helper.
                let alloc = ctx.fresh_alloc(byte_size, node.dtype());
                let result = Manikin::contiguous(node.shape().clone(), dims, node.dtype(), alloc);
                let mut unit = ExecutionUnit::new(UnitId(ctx.units.len() as u32), result.clone());
                unit.ops.push(PrimitiveOp::CallCFunc {
                    func_name: "dynamic_subtensor_gather".to_string(),
                    args: vec![operand_manikin, result.clone()],
                });
                if let Some(dep) = ctx.unit_of(operand) {
                    unit.depends_on.push(dep);
                }
                for axis in &spec {
                    if let RangeStart::Dyn(e) = &axis.start {
                        if let Some(dep) = ctx.unit_of(e) {
                            unit.depends_on.push(dep);
                        }
                    }
                }
                unit.allocates.push(alloc);
                let id = unit.id;
                ctx.units.push(unit);
                ctx.unit_of.insert(node.id(), id);
                ctx.manikin_of.insert(node.id(), result);
            }
        }
        UnaryOp::StoreToVar(var) => {
            let placement = ctx.compile_env.placement_of(var).ok_or_else(|| {
                CompileError::PlacementMissing(
                    Diagnostic::error(
                        NodeRef::Var(var.name.clone()),
                        format!("no placement recorded for variable {}", var.name),
                    )
                    .with_code(codes::PLACEMENT_MISSING),
                )
            })?;
            let var_dims = resolved_dims(node, &var.shape, ctx.sym_env)?;
            let target = Manikin::external(var.shape.clone(), &var_dims, var.dtype, var.clone());
            let alloc = ctx.fresh_alloc(0, node.dtype());
            let sentinel = Manikin::contiguous(Shape::scalar(), &[], node.dtype(), alloc);
            let mut unit = ExecutionUnit::new(UnitId(ctx.units.len() as u32), sentinel.clone());
            let op = match placement {
                Placement::Device => PrimitiveOp::MemcpyDtoD {
                    src: operand_manikin,
                    dst: target,
                },
                Placement::Host => PrimitiveOp::MemcpyDtoH {
                    src: operand_manikin,
                    dst: target,
                },
            };
            unit.ops.push(op);
            if let Some(dep) = ctx.unit_of(operand) {
                unit.depends_on.push(dep);
            }
            let id = unit.id;
            ctx.units.push(unit);
            ctx.unit_of.insert(node.id(), id);
            ctx.manikin_of.insert(node.id(), sentinel);
        }
        UnaryOp::Annotated(_) => {
            if let Some(dep) = ctx.unit_of(operand) {
                ctx.unit_of.insert(node.id(), dep);
            }
            ctx.manikin_of.insert(node.id(), operand_manikin);
        }
    }
    Ok(())
}

fn visit_binary(
    node: &Expr,
    op: &BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    dims: &[u64],
    byte_size: u64,
    ctx: &mut PlanCtx,
) -> Result<(), CompileError> {
    let lhs_manikin = ctx.manikin_of.get(&lhs.id()).cloned().unwrap();
    let rhs_manikin = ctx.manikin_of.get(&rhs.id()).cloned().unwrap();
    match op {
        BinaryOp::Elementwise(e) => {
            let reuse_lhs = ctx.eligible_in_place(lhs);
            let reuse_rhs = !reuse_lhs && ctx.eligible_in_place(rhs);
            let result = if reuse_lhs {
                lhs_manikin.clone()
            } else if reuse_rhs {
                rhs_manikin.clone()
            } else {
                let alloc = ctx.fresh_alloc(byte_size, node.dtype());
                Manikin::contiguous(node.shape().clone(), dims, node.dtype(), alloc)
            };
            let mut unit = ExecutionUnit::new(UnitId(ctx.units.len() as u32), result.clone());
            unit.ops.push(PrimitiveOp::LaunchKernel {
                kernel_name: elementwise_binary_kernel(*e).to_string(),
                args: vec![lhs_manikin, rhs_manikin, result.clone()],
            });
            if let Some(dep) = ctx.unit_of(lhs) {
                unit.depends_on.push(dep);
            }
            if let Some(dep) = ctx.unit_of(rhs) {
                if !unit.depends_on.contains(&dep) {
                    unit.depends_on.push(dep);
                }
            }
            if !reuse_lhs && !reuse_rhs {
                if let StorageBinding::Internal(alloc) = &result.storage {
                    unit.allocates.push(*alloc);
                }
            }
            let id = unit.id;
            ctx.units.push(unit);
            ctx.unit_of.insert(node.id(), id);
            ctx.manikin_of.insert(node.id(), result);
        }
        BinaryOp::Dot => {
            let alloc = ctx.fresh_alloc(byte_size, node.dtype());
            let result = Manikin::contiguous(node.shape().clone(), dims, node.dtype(), alloc);
            let mut unit = ExecutionUnit::new(UnitId(ctx.units.len() as u32), result.clone());
            unit.ops.push(PrimitiveOp::BlasGemm {
                lhs: lhs_manikin,
                rhs: rhs_manikin,
                out: result.clone(),
            });
            if let Some(dep) = ctx.unit_of(lhs) {
                unit.depends_on.push(dep);
            }
            if let Some(dep) = ctx.unit_of(rhs) {
                unit.depends_on.push(dep);
            }
            unit.allocates.push(alloc);
            let id = unit.id;
            ctx.units.push(unit);
            ctx.unit_of.insert(node.id(), id);
            ctx.manikin_of.insert(node.id(), result);
        }
        BinaryOp::TensorProduct => {
            let alloc = ctx.fresh_alloc(byte_size, node.dtype());
            let result = Manikin::contiguous(node.shape().clone(), dims, node.dtype(), alloc);
            let mut unit = ExecutionUnit::new(UnitId(ctx.units.len() as u32), result.clone());
            unit.ops.push(PrimitiveOp::LaunchKernel {
                kernel_name: "tensor_product".to_string(),
                args: vec![lhs_manikin, rhs_manikin, result.clone()],
            });
            if let Some(dep) = ctx.unit_of(lhs) {
                unit.depends_on.push(dep);
            }
            if let Some(dep) = ctx.unit_of(rhs) {
                unit.depends_on.push(dep);
            }
            unit.allocates.push(alloc);
            let id = unit.id;
            ctx.units.push(unit);
            ctx.unit_of.insert(node.id(), id);
            ctx.manikin_of.insert(node.id(), result);
        }
        BinaryOp::SetSubtensor(spec) => {
            let in_place = ctx.eligible_in_place(lhs);
            let (result, mut ops) = if in_place {
                (lhs_manikin.clone(), Vec::new())
            } else {
                let alloc = ctx.fresh_alloc(byte_size, node.dtype());
                let fresh = Manikin::contiguous(node.shape().clone(), dims, node.dtype(), alloc);
                (
                    fresh.clone(),
                    vec![PrimitiveOp::MemcpyDtoD {
                        src: lhs_manikin.clone(),
                        dst: fresh,
                    }],
                )
            };
            ops.push(PrimitiveOp::CallCFunc {
                func_name: "set_subtensor_store".to_string(),
                args: vec![rhs_manikin, result.clone()],
            });
            let mut unit = ExecutionUnit::new(UnitId(ctx.units.len() as u32), result.clone());
            unit.ops = ops;
            if let Some(dep) = ctx.unit_of(lhs) {
                unit.depends_on.push(dep);
            }
            if let Some(dep) = ctx.unit_of(rhs) {
                unit.depends_on.push(dep);
            }
            for axis in spec {
                if let RangeStart::Dyn(e) = &axis.start {
                    if let Some(dep) = ctx.unit_of(e) {
                        unit.depends_on.push(dep);
                    }
                }
            }
            if !in_place {
                if let StorageBinding::Internal(alloc) = &result.storage {
                    unit.allocates.push(*alloc);
                }
            }
            let id = unit.id;
            ctx.units.push(unit);
            ctx.unit_of.insert(node.id(), id);
            ctx.manikin_of.insert(node.id(), result);
        }
    }
    Ok(())
}

fn visit_nary(
    node: &Expr,
    op: &NaryOp,
    args: &[Expr],
    dims: &[u64],
    byte_size: u64,
    ctx: &mut PlanCtx,
) -> Result<(), CompileError> {
    let arg_manikins: Vec<Manikin> = args
        .iter()
        .map(|a| ctx.manikin_of.get(&a.id()).cloned().unwrap())
        .collect();
    match op {
        NaryOp::Discard => {
            let alloc = ctx.fresh_alloc(0, node.dtype());
            let sentinel = Manikin::contiguous(Shape::scalar(), &[], node.dtype(), alloc);
            let mut unit = ExecutionUnit::new(UnitId(ctx.units.len() as u32), sentinel.clone());
            unit.ops.push(PrimitiveOp::Trace("discard".to_string()));
            for a in args {
                if let Some(dep) = ctx.unit_of(a) {
                    if !unit.depends_on.contains(&dep) {
                        unit.depends_on.push(dep);
                    }
                }
            }
            let id = unit.id;
            ctx.units.push(unit);
            ctx.unit_of.insert(node.id(), id);
            ctx.manikin_of.insert(node.id(), sentinel);
        }
        NaryOp::Extension(ext) => {
            let alloc = ctx.fresh_alloc(byte_size, node.dtype());
            let result = Manikin::contiguous(node.shape().clone(), dims, node.dtype(), alloc);
            let mut unit = ExecutionUnit::new(UnitId(ctx.units.len() as u32), result.clone());
            unit.ops = ext.lower(&arg_manikins, &result);
            for a in args {
                if let Some(dep) = ctx.unit_of(a) {
                    if !unit.depends_on.contains(&dep) {
                        unit.depends_on.push(dep);
                    }
                }
            }
            unit.allocates.push(alloc);
            let id = unit.id;
            ctx.units.push(unit);
            ctx.unit_of.insert(node.id(), id);
            ctx.manikin_of.insert(node.id(), result);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::ExprArena;
    use crate::dtype::TypeName;
    use crate::shape::Shape;
    use crate::size::SizeExpr;
    use crate::varspec::VarSpec;

    #[test]
    fn elementwise_chain_reuses_storage_in_place() {
        let mut arena = ExprArena::new();
        let env = SymSizeEnv::new();
        let a = arena.zeros(Shape::new(vec![SizeExpr::fix(4)]), TypeName::Single);
        let negated = arena
            .elementwise_unary(ElementwiseUnary::Negate, a)
            .unwrap();
        let compile_env = CompileEnv::new();
        let out = plan(&[negated], &compile_env, &env).unwrap();
        // zeros' unit allocates; the negate unit, being the sole consumer,
        // should reuse that allocation rather than adding a second one.
        assert_eq!(out.allocations.len(), 1);
        assert_eq!(out.units.len(), 2);
    }

    #[test]
    fn missing_placement_is_reported() {
        let mut arena = ExprArena::new();
        let v = VarSpec::new("x", Shape::new(vec![SizeExpr::fix(2)]), TypeName::Single);
        let node = arena.var(v);
        let compile_env = CompileEnv::new();
        let err = plan(&[node], &compile_env, &SymSizeEnv::new()).unwrap_err();
        assert!(matches!(err, CompileError::PlacementMissing(_)));
    }

    #[test]
    fn unresolved_symbol_is_reported() {
        let mut arena = ExprArena::new();
        let z = arena.zeros(Shape::new(vec![SizeExpr::symbol("N")]), TypeName::Single);
        let compile_env = CompileEnv::new();
        let err = plan(&[z], &compile_env, &SymSizeEnv::new()).unwrap_err();
        assert!(matches!(err, CompileError::UnresolvedSymbol(_)));
    }

    #[test]
    fn host_variable_gets_warmup_upload() {
        let mut arena = ExprArena::new();
        let v = VarSpec::new("x", Shape::new(vec![SizeExpr::fix(2)]), TypeName::Single);
        let node = arena.var(v.clone());
        let mut compile_env = CompileEnv::new();
        compile_env.bind(&v, Placement::Host);
        let out = plan(&[node], &compile_env, &SymSizeEnv::new()).unwrap();
        assert_eq!(out.warmup_units.len(), 1);
    }
}
