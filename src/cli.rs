//! cli.rs — JSON wire format and artifact rendering for the `symtc` driver.
//!
//! This module is the library-side half of the CLI surface described in
//! SPEC_FULL.md §6.1; `main.rs` owns argument parsing and process exit
//! codes. Everything here is a "thin ambient shell" over the core: it is
//! not part of the component contracts in §4, and is exempt from them.
//!
//! `Expr`'s recursive structure embeds `NaryOp::Extension(Arc<dyn
//! ExtensionOp>)`, a trait object that cannot derive `serde::Deserialize`
//! without a closed operator registry. Rather than bend the core graph
//! type to the JSON surface, [`GraphSpec`] is a separate, serde-derived
//! mirror of `ExprKind` that a graph document deserializes into, then
//! [`GraphSpec::build`] walks it into real `Expr` nodes through an
//! [`ExprArena`], running the same shape inference and hash-consing any
//! other caller gets. Extension ops are consequently not constructible
//! from JSON input; a document that needs one has to go through the
//! library API directly.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::arena::{simple_axis_dyn, simple_axis_sym, ExprArena};
use crate::diag::{codes, Diagnostic, NodeRef};
use crate::dtype::TypeName;
use crate::env::{CompileEnv, SymSizeEnv};
use crate::error::CompileError;
use crate::expr::{BinaryOp as CoreBinaryOp, Expr, ElementwiseBinary, ElementwiseUnary};
use crate::shape::Shape;
use crate::size::SizeExpr;
use crate::varspec::VarSpec;

/// The document a `symtc` invocation reads: a graph plus the environment
/// needed to compile it. `sym_sizes` binds every free symbol the graph's
/// size expressions use to a concrete value (spec §4.1's `SymSizeEnv`,
/// keyed by symbol name here since JSON object keys are strings).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDocument {
    pub graph: GraphSpec,
    #[serde(default)]
    pub env: CompileEnv,
    #[serde(default)]
    pub sym_sizes: HashMap<String, u64>,
    #[serde(default)]
    pub warmup: bool,
}

impl GraphDocument {
    /// Resolve `sym_sizes` into the `SymSizeEnv` the core phases expect.
    pub fn sym_env(&self) -> SymSizeEnv {
        self.sym_sizes
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// Build this document's graph into a real `Expr`, ready for
    /// `pipeline::compile`.
    pub fn build(&self, arena: &mut ExprArena) -> Result<Expr, CompileError> {
        let env = self.sym_env();
        self.graph.build(arena, &env)
    }
}

/// A wire-format mirror of a single `SimpleRangeAxis` (spec §4.2's range
/// spec), with `RangeStart::Dyn` holding a nested [`GraphSpec`] instead of
/// a live `Expr`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeAxisSpec {
    pub start: RangeStartSpec,
    pub size: SizeExpr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RangeStartSpec {
    Sym { size: SizeExpr },
    Dyn { expr: Box<GraphSpec> },
}

fn build_range_spec(
    arena: &mut ExprArena,
    env: &SymSizeEnv,
    axes: &[RangeAxisSpec],
) -> Result<Vec<crate::expr::SimpleRangeAxis>, CompileError> {
    axes.iter()
        .map(|axis| match &axis.start {
            RangeStartSpec::Sym { size } => Ok(simple_axis_sym(size.clone(), axis.size.clone())),
            RangeStartSpec::Dyn { expr } => {
                let start = expr.build(arena, env)?;
                Ok(simple_axis_dyn(start, axis.size.clone()))
            }
        })
        .collect()
}

/// A serde-derived mirror of `ExprKind`, tagged on `op`. Every leaf and
/// combinator `ExprArena` exposes has a variant here except the
/// `Extension` nary case (see module docs).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum GraphSpec {
    Identity { size: SizeExpr, dtype: TypeName },
    Zeros { shape: Shape, dtype: TypeName },
    ScalarConst { value: f64, dtype: TypeName },
    SizeValue { size: SizeExpr, dtype: TypeName },
    Var { var: VarSpec },

    Elementwise { op: ElementwiseUnary, operand: Box<GraphSpec> },
    Sum { operand: Box<GraphSpec> },
    SumAxis { operand: Box<GraphSpec>, axis: usize },
    Reshape { operand: Box<GraphSpec>, shape: Shape },
    DoBroadcast { operand: Box<GraphSpec>, shape: Shape },
    SwapDim { operand: Box<GraphSpec>, i: usize, j: usize },
    Subtensor { operand: Box<GraphSpec>, spec: Vec<RangeAxisSpec> },
    StoreToVar { operand: Box<GraphSpec>, var: VarSpec },
    Annotated { operand: Box<GraphSpec>, label: String },

    Binary { op: ElementwiseBinary, lhs: Box<GraphSpec>, rhs: Box<GraphSpec> },
    Dot { lhs: Box<GraphSpec>, rhs: Box<GraphSpec> },
    TensorProduct { lhs: Box<GraphSpec>, rhs: Box<GraphSpec> },
    SetSubtensor {
        base: Box<GraphSpec>,
        value: Box<GraphSpec>,
        spec: Vec<RangeAxisSpec>,
    },

    Discard { operands: Vec<GraphSpec> },
}

impl GraphSpec {
    pub fn build(&self, arena: &mut ExprArena, env: &SymSizeEnv) -> Result<Expr, CompileError> {
        match self {
            GraphSpec::Identity { size, dtype } => Ok(arena.identity(size.clone(), *dtype)),
            GraphSpec::Zeros { shape, dtype } => Ok(arena.zeros(shape.clone(), *dtype)),
            GraphSpec::ScalarConst { value, dtype } => Ok(arena.scalar_const(*value, *dtype)),
            GraphSpec::SizeValue { size, dtype } => Ok(arena.size_value(size.clone(), *dtype)),
            GraphSpec::Var { var } => Ok(arena.var(var.clone())),

            GraphSpec::Elementwise { op, operand } => {
                let operand = operand.build(arena, env)?;
                arena.elementwise_unary(*op, operand)
            }
            GraphSpec::Sum { operand } => {
                let operand = operand.build(arena, env)?;
                arena.sum(operand)
            }
            GraphSpec::SumAxis { operand, axis } => {
                let operand = operand.build(arena, env)?;
                arena.sum_axis(operand, *axis)
            }
            GraphSpec::Reshape { operand, shape } => {
                let operand = operand.build(arena, env)?;
                arena.reshape(operand, shape.clone(), env)
            }
            GraphSpec::DoBroadcast { operand, shape } => {
                let operand = operand.build(arena, env)?;
                arena.do_broadcast(operand, shape.clone())
            }
            GraphSpec::SwapDim { operand, i, j } => {
                let operand = operand.build(arena, env)?;
                arena.swap_dim(operand, *i, *j)
            }
            GraphSpec::Subtensor { operand, spec } => {
                let operand = operand.build(arena, env)?;
                let spec = build_range_spec(arena, env, spec)?;
                arena.subtensor(operand, spec)
            }
            GraphSpec::StoreToVar { operand, var } => {
                let operand = operand.build(arena, env)?;
                arena.store_to_var(operand, var.clone())
            }
            GraphSpec::Annotated { operand, label } => {
                let operand = operand.build(arena, env)?;
                Ok(arena.annotated(operand, label.clone()))
            }

            GraphSpec::Binary { op, lhs, rhs } => {
                let lhs = lhs.build(arena, env)?;
                let rhs = rhs.build(arena, env)?;
                arena.elementwise_binary(*op, lhs, rhs, env)
            }
            GraphSpec::Dot { lhs, rhs } => {
                let lhs = lhs.build(arena, env)?;
                let rhs = rhs.build(arena, env)?;
                arena.dot(lhs, rhs, env)
            }
            GraphSpec::TensorProduct { lhs, rhs } => {
                let lhs = lhs.build(arena, env)?;
                let rhs = rhs.build(arena, env)?;
                arena.tensor_product(lhs, rhs)
            }
            GraphSpec::SetSubtensor { base, value, spec } => {
                let base = base.build(arena, env)?;
                let value = value.build(arena, env)?;
                let spec = build_range_spec(arena, env, spec)?;
                arena.set_subtensor(base, value, spec, env)
            }

            GraphSpec::Discard { operands } => {
                let operands = operands
                    .iter()
                    .map(|o| o.build(arena, env))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(arena.discard(operands))
            }
        }
    }
}

/// Give the `Dot`/`TensorProduct`/`SetSubtensor` family of `BinaryOp`s a
/// home for the rare caller that needs to match on the core type instead
/// of the wire one; unused internally but kept `pub` for downstream
/// consumers of the library that parse a document then inspect the result.
pub fn core_binary_tag(op: &CoreBinaryOp) -> &'static str {
    match op {
        CoreBinaryOp::Elementwise(_) => "elementwise",
        CoreBinaryOp::Dot => "dot",
        CoreBinaryOp::TensorProduct => "tensor_product",
        CoreBinaryOp::SetSubtensor(_) => "set_subtensor",
    }
}

/// Pretty-print a checked expression tree, recursively, for `--emit
/// checked-expr`. `Expr`'s own `Debug` impl is deliberately shallow (one
/// line per node, spec §4.2); this walks operands so the CLI can show the
/// whole graph the way `--emit unified`/`--emit plan` show their stages.
pub fn pretty_expr(root: &Expr) -> String {
    let mut out = String::new();
    pretty_expr_into(root, 0, &mut out);
    out
}

fn pretty_expr_into(e: &Expr, depth: usize, out: &mut String) {
    use crate::expr::ExprKind;
    let indent = "  ".repeat(depth);
    out.push_str(&format!(
        "{indent}#{} {} : {} ({})\n",
        e.id(),
        e.kind().tag(),
        e.shape(),
        e.dtype()
    ));
    match e.kind() {
        ExprKind::Leaf(_) => {}
        ExprKind::Unary(_, operand) => pretty_expr_into(operand, depth + 1, out),
        ExprKind::Binary(_, lhs, rhs) => {
            pretty_expr_into(lhs, depth + 1, out);
            pretty_expr_into(rhs, depth + 1, out);
        }
        ExprKind::Nary(_, operands) => {
            for operand in operands {
                pretty_expr_into(operand, depth + 1, out);
            }
        }
    }
}

/// Diagnostic-free check that a document's environment at least assigns
/// a placement to every variable the graph mentions, raised as a single
/// combined error before the full checker runs — gives the CLI's
/// `--diagnostic-format` options a concrete example beyond core errors.
pub fn check_placements_declared(root: &Expr, env: &CompileEnv) -> Result<(), CompileError> {
    let vars = crate::subst::extract_vars(root);
    for var in &vars {
        if env.placement_of(var).is_none() {
            let diag = Diagnostic::error(
                NodeRef::Var(var.name.clone()),
                format!("variable '{}' has no placement in the supplied environment", var.name),
            )
            .with_code(codes::PLACEMENT_MISSING)
            .with_hint("add an entry for this variable to the document's \"env\" object");
            return Err(CompileError::PlacementMissing(diag));
        }
    }
    Ok(())
}
