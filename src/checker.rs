//! checker.rs — Idempotent post-hoc shape checking (spec §4.2 `check`).
//!
//! Expressions built through [`crate::arena::ExprArena`] are checked at
//! construction and never need re-checking. This module exists for graphs
//! that arrive by another route — deserialized from the CLI's JSON input
//! surface (spec §6.1) — where the cached `shape`/`dtype` fields came from
//! untrusted input and must be re-derived and compared before anything
//! downstream trusts them.

use std::collections::{BTreeMap, HashSet};

use crate::diag::{codes, Diagnostic, NodeRef};
use crate::error::CompileError;
use crate::expr::{BinaryOp, Expr, ExprKind, LeafOp, NaryOp, UnaryOp};
use crate::shape::Shape;
use crate::size::Symbol;

type SymSizeEnv = BTreeMap<Symbol, u64>;

/// Walk the DAG once, memoized by node id, verifying that every cached
/// `(shape, dtype)` matches what the node's operator would recompute from
/// its (already-checked) children. Idempotent: a second call against the
/// same `seen` set does no further work.
pub fn check(root: &Expr, env: &SymSizeEnv, seen: &mut HashSet<u64>) -> Result<(), CompileError> {
    if seen.contains(&root.id()) {
        return Ok(());
    }
    match root.kind() {
        ExprKind::Leaf(leaf) => check_leaf(root, leaf)?,
        ExprKind::Unary(op, a) => {
            check(a, env, seen)?;
            check_unary(root, op, a, env)?;
        }
        ExprKind::Binary(op, a, b) => {
            check(a, env, seen)?;
            check(b, env, seen)?;
            check_binary(root, op, a, b, env)?;
        }
        ExprKind::Nary(op, args) => {
            for arg in args {
                check(arg, env, seen)?;
            }
            check_nary(root, op, args)?;
        }
    }
    seen.insert(root.id());
    Ok(())
}

fn mismatch(root: &Expr, expected: &Shape) -> CompileError {
    CompileError::ShapeMismatch(
        Diagnostic::error(
            NodeRef::Expr(root.id()),
            format!(
                "cached shape {} disagrees with recomputed shape {expected}",
                root.shape()
            ),
        )
        .with_code(codes::SHAPE_MISMATCH),
    )
}

fn check_leaf(root: &Expr, leaf: &LeafOp) -> Result<(), CompileError> {
    let expected = match leaf {
        LeafOp::Identity(size, _) => Shape::new(vec![size.clone(), size.clone()]),
        LeafOp::Zeros(shape, _) => shape.clone(),
        LeafOp::ScalarConst(..) | LeafOp::SizeValue(..) => Shape::scalar(),
        LeafOp::Var(var) => var.shape.clone(),
    };
    if &expected != root.shape() {
        return Err(mismatch(root, &expected));
    }
    Ok(())
}

fn check_unary(
    root: &Expr,
    op: &UnaryOp,
    operand: &Expr,
    env: &SymSizeEnv,
) -> Result<(), CompileError> {
    let expected = match op {
        UnaryOp::Elementwise(_) | UnaryOp::Annotated(_) => operand.shape().clone(),
        UnaryOp::Sum | UnaryOp::StoreToVar(_) => Shape::scalar(),
        UnaryOp::SumAxis(axis) => {
            let mut dims = operand.shape().dims().to_vec();
            if *axis >= dims.len() {
                return Err(CompileError::RankMismatch(
                    Diagnostic::error(NodeRef::Expr(root.id()), "sum_axis out of range")
                        .with_code(codes::RANK_MISMATCH),
                ));
            }
            dims.remove(*axis);
            Shape::new(dims)
        }
        UnaryOp::Reshape(shape) | UnaryOp::DoBroadcast(shape) => shape.clone(),
        UnaryOp::SwapDim(i, j) => operand.shape().swap(*i, *j),
        UnaryOp::Subtensor(spec) => Shape::new(spec.iter().map(|a| a.size.clone()).collect()),
    };
    let _ = env;
    if &expected != root.shape() {
        return Err(mismatch(root, &expected));
    }
    Ok(())
}

fn check_binary(
    root: &Expr,
    op: &BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    env: &SymSizeEnv,
) -> Result<(), CompileError> {
    let expected = match op {
        BinaryOp::Elementwise(_) => Shape::broadcast_to_same(lhs.shape(), rhs.shape(), env)
            .map_err(|e| {
                CompileError::ShapeMismatch(
                    Diagnostic::error(NodeRef::Expr(root.id()), e.to_string())
                        .with_code(codes::SHAPE_MISMATCH),
                )
            })?,
        BinaryOp::Dot => {
            let lr = lhs.shape().rank();
            let rr = rhs.shape().rank();
            let mut dims = Vec::new();
            if lr == 2 {
                dims.push(lhs.shape().dim(0).unwrap().clone());
            }
            if rr == 2 {
                dims.push(rhs.shape().dim(rr - 1).unwrap().clone());
            }
            Shape::new(dims)
        }
        BinaryOp::TensorProduct => {
            let mut dims = lhs.shape().dims().to_vec();
            dims.extend(rhs.shape().dims().iter().cloned());
            Shape::new(dims)
        }
        BinaryOp::SetSubtensor(_) => lhs.shape().clone(),
    };
    if &expected != root.shape() {
        return Err(mismatch(root, &expected));
    }
    Ok(())
}

fn check_nary(root: &Expr, op: &NaryOp, args: &[Expr]) -> Result<(), CompileError> {
    match op {
        NaryOp::Discard => {
            if root.shape().rank() != 0 {
                return Err(mismatch(root, &Shape::scalar()));
            }
            Ok(())
        }
        NaryOp::Extension(ext) => {
            if args.len() != ext.arity() {
                return Err(CompileError::UnsupportedOp(
                    Diagnostic::error(
                        NodeRef::Expr(root.id()),
                        format!("extension op {} arity mismatch", ext.name()),
                    )
                    .with_code(codes::UNSUPPORTED_OP),
                ));
            }
            Ok(())
        }
    }
}
