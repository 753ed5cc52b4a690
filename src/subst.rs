//! subst.rs — Substitution and symbol extraction over the expression DAG
//! (spec §4.2, §4.3).
//!
//! Per the REDESIGN notes, substitution recurses uniformly into dynamic
//! range-spec sub-expressions (`RangeStart::Dyn`) exactly like any other
//! operand — the reference implementation's open question of whether to
//! special-case those is resolved here by not special-casing them.

use std::collections::{HashMap, HashSet};

use crate::arena::{simple_axis_dyn, simple_axis_sym, ExprArena};
use crate::env::SymSizeEnv;
use crate::error::CompileError;
use crate::expr::{
    BinaryOp, Expr, ExprKind, LeafOp, NaryOp, RangeStart, SimpleRangeAxis, SimpleRangeSpec, UnaryOp,
};
use crate::size::Symbol;
use crate::varspec::VarSpec;

/// Replace every bound symbol in every size expression reachable from
/// `root` (leaf sizes, reshape/broadcast targets, range-spec starts and
/// sizes) with its numeric value, rebuilding the DAG bottom-up through
/// `arena` so shape inference reruns and structural sharing is preserved.
pub fn subst_sym_sizes(
    arena: &mut ExprArena,
    root: &Expr,
    env: &SymSizeEnv,
) -> Result<Expr, CompileError> {
    let mut cache = HashMap::new();
    subst_sym_sizes_rec(arena, root, env, &mut cache)
}

fn subst_sym_sizes_rec(
    arena: &mut ExprArena,
    node: &Expr,
    env: &SymSizeEnv,
    cache: &mut HashMap<u64, Expr>,
) -> Result<Expr, CompileError> {
    if let Some(cached) = cache.get(&node.id()) {
        return Ok(cached.clone());
    }
    let out = match node.kind().clone() {
        ExprKind::Leaf(leaf) => match leaf {
            LeafOp::Identity(size, dtype) => arena.identity(size.subst(env), dtype),
            LeafOp::Zeros(shape, dtype) => arena.zeros(shape.subst(env), dtype),
            LeafOp::ScalarConst(bits, dtype) => {
                arena.scalar_const(f64::from_bits(bits), dtype)
            }
            LeafOp::SizeValue(size, dtype) => arena.size_value(size.subst(env), dtype),
            LeafOp::Var(var) => arena.var(var),
        },
        ExprKind::Unary(op, operand) => {
            let new_operand = subst_sym_sizes_rec(arena, &operand, env, cache)?;
            match op {
                UnaryOp::Elementwise(e) => arena.elementwise_unary(e, new_operand)?,
                UnaryOp::Sum => arena.sum(new_operand)?,
                UnaryOp::SumAxis(axis) => arena.sum_axis(new_operand, axis)?,
                UnaryOp::Reshape(shape) => arena.reshape(new_operand, shape.subst(env), env)?,
                UnaryOp::DoBroadcast(shape) => arena.do_broadcast(new_operand, shape.subst(env))?,
                UnaryOp::SwapDim(i, j) => arena.swap_dim(new_operand, i, j)?,
                UnaryOp::Subtensor(spec) => {
                    let new_spec = subst_range_spec(arena, &spec, env, cache)?;
                    arena.subtensor(new_operand, new_spec)?
                }
                UnaryOp::StoreToVar(var) => arena.store_to_var(new_operand, var)?,
                UnaryOp::Annotated(label) => arena.annotated(new_operand, label),
            }
        }
        ExprKind::Binary(op, lhs, rhs) => {
            let new_lhs = subst_sym_sizes_rec(arena, &lhs, env, cache)?;
            let new_rhs = subst_sym_sizes_rec(arena, &rhs, env, cache)?;
            match op {
                BinaryOp::Elementwise(e) => arena.elementwise_binary(e, new_lhs, new_rhs, env)?,
                BinaryOp::Dot => arena.dot(new_lhs, new_rhs, env)?,
                BinaryOp::TensorProduct => arena.tensor_product(new_lhs, new_rhs)?,
                BinaryOp::SetSubtensor(spec) => {
                    let new_spec = subst_range_spec(arena, &spec, env, cache)?;
                    arena.set_subtensor(new_lhs, new_rhs, new_spec, env)?
                }
            }
        }
        ExprKind::Nary(op, args) => {
            let mut new_args = Vec::with_capacity(args.len());
            for a in &args {
                new_args.push(subst_sym_sizes_rec(arena, a, env, cache)?);
            }
            match op {
                NaryOp::Discard => arena.discard(new_args),
                NaryOp::Extension(ext) => arena.extension(ext, new_args)?,
            }
        }
    };
    cache.insert(node.id(), out.clone());
    Ok(out)
}

fn subst_range_spec(
    arena: &mut ExprArena,
    spec: &SimpleRangeSpec,
    env: &SymSizeEnv,
    cache: &mut HashMap<u64, Expr>,
) -> Result<SimpleRangeSpec, CompileError> {
    let mut out = Vec::with_capacity(spec.len());
    for axis in spec {
        let new_axis: SimpleRangeAxis = match &axis.start {
            RangeStart::Sym(s) => simple_axis_sym(s.subst(env), axis.size.subst(env)),
            RangeStart::Dyn(e) => {
                let new_e = subst_sym_sizes_rec(arena, e, env, cache)?;
                simple_axis_dyn(new_e, axis.size.subst(env))
            }
        };
        out.push(new_axis);
    }
    Ok(out)
}

/// Rewrite every subtree of `root` structurally equal to `part` (arena id
/// equality, per the arena's hash-consing) with `replacement`, rebuilding
/// the DAG bottom-up through `arena` so shape inference reruns along any
/// path that actually changed and structural sharing is preserved
/// elsewhere.
pub fn subst(
    arena: &mut ExprArena,
    root: &Expr,
    part: &Expr,
    replacement: &Expr,
) -> Result<Expr, CompileError> {
    let mut cache = HashMap::new();
    subst_rec(arena, root, part, replacement, &mut cache)
}

fn subst_rec(
    arena: &mut ExprArena,
    node: &Expr,
    part: &Expr,
    replacement: &Expr,
    cache: &mut HashMap<u64, Expr>,
) -> Result<Expr, CompileError> {
    if node.id() == part.id() {
        return Ok(replacement.clone());
    }
    if let Some(cached) = cache.get(&node.id()) {
        return Ok(cached.clone());
    }
    let env = SymSizeEnv::new();
    let out = match node.kind().clone() {
        ExprKind::Leaf(_) => node.clone(),
        ExprKind::Unary(op, operand) => {
            let new_operand = subst_rec(arena, &operand, part, replacement, cache)?;
            match op {
                UnaryOp::Elementwise(e) => arena.elementwise_unary(e, new_operand)?,
                UnaryOp::Sum => arena.sum(new_operand)?,
                UnaryOp::SumAxis(axis) => arena.sum_axis(new_operand, axis)?,
                UnaryOp::Reshape(shape) => arena.reshape(new_operand, shape, &env)?,
                UnaryOp::DoBroadcast(shape) => arena.do_broadcast(new_operand, shape)?,
                UnaryOp::SwapDim(i, j) => arena.swap_dim(new_operand, i, j)?,
                UnaryOp::Subtensor(spec) => {
                    let new_spec = subst_range_spec_generic(arena, &spec, part, replacement, cache)?;
                    arena.subtensor(new_operand, new_spec)?
                }
                UnaryOp::StoreToVar(var) => arena.store_to_var(new_operand, var)?,
                UnaryOp::Annotated(label) => arena.annotated(new_operand, label),
            }
        }
        ExprKind::Binary(op, lhs, rhs) => {
            let new_lhs = subst_rec(arena, &lhs, part, replacement, cache)?;
            let new_rhs = subst_rec(arena, &rhs, part, replacement, cache)?;
            match op {
                BinaryOp::Elementwise(e) => arena.elementwise_binary(e, new_lhs, new_rhs, &env)?,
                BinaryOp::Dot => arena.dot(new_lhs, new_rhs, &env)?,
                BinaryOp::TensorProduct => arena.tensor_product(new_lhs, new_rhs)?,
                BinaryOp::SetSubtensor(spec) => {
                    let new_spec = subst_range_spec_generic(arena, &spec, part, replacement, cache)?;
                    arena.set_subtensor(new_lhs, new_rhs, new_spec, &env)?
                }
            }
        }
        ExprKind::Nary(op, args) => {
            let mut new_args = Vec::with_capacity(args.len());
            for a in &args {
                new_args.push(subst_rec(arena, a, part, replacement, cache)?);
            }
            match op {
                NaryOp::Discard => arena.discard(new_args),
                NaryOp::Extension(ext) => arena.extension(ext, new_args)?,
            }
        }
    };
    cache.insert(node.id(), out.clone());
    Ok(out)
}

fn subst_range_spec_generic(
    arena: &mut ExprArena,
    spec: &SimpleRangeSpec,
    part: &Expr,
    replacement: &Expr,
    cache: &mut HashMap<u64, Expr>,
) -> Result<SimpleRangeSpec, CompileError> {
    let mut out = Vec::with_capacity(spec.len());
    for axis in spec {
        let new_axis: SimpleRangeAxis = match &axis.start {
            RangeStart::Sym(s) => simple_axis_sym(s.clone(), axis.size.clone()),
            RangeStart::Dyn(e) => {
                let new_e = subst_rec(arena, e, part, replacement, cache)?;
                simple_axis_dyn(new_e, axis.size.clone())
            }
        };
        out.push(new_axis);
    }
    Ok(out)
}

/// Collect every distinct `Var` leaf reachable from `root`.
pub fn extract_vars(root: &Expr) -> Vec<VarSpec> {
    let mut seen_ids = HashSet::new();
    let mut seen_vars: HashMap<String, VarSpec> = HashMap::new();
    extract_vars_rec(root, &mut seen_ids, &mut seen_vars);
    let mut out: Vec<VarSpec> = seen_vars.into_values().collect();
    out.sort_by(|a, b| a.name.cmp(&b.name));
    out
}

fn extract_vars_rec(
    node: &Expr,
    seen_ids: &mut HashSet<u64>,
    seen_vars: &mut HashMap<String, VarSpec>,
) {
    if !seen_ids.insert(node.id()) {
        return;
    }
    match node.kind() {
        ExprKind::Leaf(LeafOp::Var(var)) => {
            seen_vars.insert(var.name.clone(), var.clone());
        }
        ExprKind::Leaf(_) => {}
        ExprKind::Unary(op, operand) => {
            extract_vars_rec(operand, seen_ids, seen_vars);
            if let UnaryOp::Subtensor(spec) = op {
                extract_vars_from_spec(spec, seen_ids, seen_vars);
            }
        }
        ExprKind::Binary(op, lhs, rhs) => {
            extract_vars_rec(lhs, seen_ids, seen_vars);
            extract_vars_rec(rhs, seen_ids, seen_vars);
            if let BinaryOp::SetSubtensor(spec) = op {
                extract_vars_from_spec(spec, seen_ids, seen_vars);
            }
        }
        ExprKind::Nary(_, args) => {
            for a in args {
                extract_vars_rec(a, seen_ids, seen_vars);
            }
        }
    }
}

fn extract_vars_from_spec(
    spec: &SimpleRangeSpec,
    seen_ids: &mut HashSet<u64>,
    seen_vars: &mut HashMap<String, VarSpec>,
) {
    for axis in spec {
        if let RangeStart::Dyn(e) = &axis.start {
            extract_vars_rec(e, seen_ids, seen_vars);
        }
    }
}

/// Collect every distinct symbolic size symbol reachable from `root`,
/// including ones hidden inside range-spec starts/sizes that don't appear
/// in any node's cached output shape.
pub fn collect_symbols(root: &Expr) -> HashSet<Symbol> {
    let mut seen_ids = HashSet::new();
    let mut symbols = HashSet::new();
    collect_symbols_rec(root, &mut seen_ids, &mut symbols);
    symbols
}

fn collect_symbols_rec(node: &Expr, seen_ids: &mut HashSet<u64>, symbols: &mut HashSet<Symbol>) {
    if !seen_ids.insert(node.id()) {
        return;
    }
    for s in node.shape().dims() {
        symbols.extend(s.symbols_used());
    }
    match node.kind() {
        ExprKind::Leaf(LeafOp::Identity(size, _)) | ExprKind::Leaf(LeafOp::SizeValue(size, _)) => {
            symbols.extend(size.symbols_used());
        }
        ExprKind::Leaf(_) => {}
        ExprKind::Unary(op, operand) => {
            collect_symbols_rec(operand, seen_ids, symbols);
            match op {
                UnaryOp::Reshape(shape) | UnaryOp::DoBroadcast(shape) => {
                    for d in shape.dims() {
                        symbols.extend(d.symbols_used());
                    }
                }
                UnaryOp::Subtensor(spec) => collect_symbols_from_spec(spec, seen_ids, symbols),
                _ => {}
            }
        }
        ExprKind::Binary(op, lhs, rhs) => {
            collect_symbols_rec(lhs, seen_ids, symbols);
            collect_symbols_rec(rhs, seen_ids, symbols);
            if let BinaryOp::SetSubtensor(spec) = op {
                collect_symbols_from_spec(spec, seen_ids, symbols);
            }
        }
        ExprKind::Nary(_, args) => {
            for a in args {
                collect_symbols_rec(a, seen_ids, symbols);
            }
        }
    }
}

fn collect_symbols_from_spec(
    spec: &SimpleRangeSpec,
    seen_ids: &mut HashSet<u64>,
    symbols: &mut HashSet<Symbol>,
) {
    for axis in spec {
        symbols.extend(axis.size.symbols_used());
        match &axis.start {
            RangeStart::Sym(s) => symbols.extend(s.symbols_used()),
            RangeStart::Dyn(e) => collect_symbols_rec(e, seen_ids, symbols),
        }
    }
}

/// True iff every symbol reachable from `root` (including ones buried in
/// range specs) has a binding in `env`.
pub fn can_eval_all_sym_sizes(root: &Expr, env: &SymSizeEnv) -> bool {
    collect_symbols(root).iter().all(|s| env.contains_key(s))
}
