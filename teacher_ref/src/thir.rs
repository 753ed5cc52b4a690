// thir.rs — Typed HIR context: unified query interface for downstream phases
//
// Wraps phase outputs (HIR, resolved, typed, lowered) with precomputed
// metadata tables so downstream phases (graph, analyze, schedule) never
// access the raw AST.
//
// Preconditions: HIR and graph must be constructed first; param C++ type
//   resolution requires scanning graph nodes for actor param type info.
// Postconditions: all downstream-phase queries are serviced from this context.
// Failure modes: none (construction is infallible).
// Side effects: none (read-only wrapper).
//
// See ADR-024 for design rationale.

use std::collections::HashMap;

use crate::ast::{Arg, Scalar, SetValue, ShapeDim, Value};
use crate::graph::{NodeKind, ProgramGraph};
use crate::hir::{HirConst, HirParam, HirProgram, HirSetDirective, HirTask};
use crate::id::CallId;
use crate::lower::LoweredProgram;
use crate::registry::{ActorMeta, ParamType, Registry};
use crate::resolve::ResolvedProgram;
use crate::subgraph_index::subgraphs_of;
use crate::type_infer::TypedProgram;

// ── ThirContext ─────────────────────────────────────────────────────────────

/// Unified query interface wrapping phase outputs + precomputed metadata.
///
/// Downstream phases (analyze, schedule) consume this instead of the raw AST.
/// Provides fast indexed lookups for tasks, consts, params, and set directives.
pub struct ThirContext<'a> {
    // ── Phase outputs ──
    pub resolved: &'a ResolvedProgram,
    pub typed: &'a TypedProgram,
    pub lowered: &'a LoweredProgram,
    pub registry: &'a Registry,
    pub hir: &'a HirProgram,

    // ── Precomputed indices ──
    task_index: HashMap<String, usize>,
    const_index: HashMap<String, usize>,
    param_index: HashMap<String, usize>,
    set_index: HashMap<String, usize>,

    // ── Precomputed set-directive values ──
    pub mem_bytes: u64,
    pub tick_rate_hz: f64,
    pub timer_spin: Option<f64>,
    pub overrun_policy: String,

    // ── Precomputed param C++ types ──
    pub param_cpp_types: HashMap<String, &'static str>,
}

// ── Construction ────────────────────────────────────────────────────────────

/// Build a ThirContext from phase outputs + graph.
///
/// The graph is needed for param C++ type resolution (scanning actor nodes
/// to determine what type each runtime param resolves to).
pub fn build_thir_context<'a>(
    hir: &'a HirProgram,
    resolved: &'a ResolvedProgram,
    typed: &'a TypedProgram,
    lowered: &'a LoweredProgram,
    registry: &'a Registry,
    graph: &ProgramGraph,
) -> ThirContext<'a> {
    // Build lookup indices
    let task_index: HashMap<String, usize> = hir
        .tasks
        .iter()
        .enumerate()
        .map(|(i, t)| (t.name.clone(), i))
        .collect();
    let const_index: HashMap<String, usize> = hir
        .consts
        .iter()
        .enumerate()
        .map(|(i, c)| (c.name.clone(), i))
        .collect();
    let param_index: HashMap<String, usize> = hir
        .params
        .iter()
        .enumerate()
        .map(|(i, p)| (p.name.clone(), i))
        .collect();
    let set_index: HashMap<String, usize> = hir
        .set_directives
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.clone(), i))
        .collect();

    // Extract common set-directive values
    let mem_bytes =
        find_set_size(&hir.set_directives, &set_index, "mem").unwrap_or(64 * 1024 * 1024);
    let tick_rate_hz =
        find_set_freq(&hir.set_directives, &set_index, "tick_rate").unwrap_or(1_000_000.0);
    let timer_spin = find_set_number(&hir.set_directives, &set_index, "timer_spin");
    let overrun_policy = find_set_ident(&hir.set_directives, &set_index, "overrun")
        .unwrap_or("stop")
        .to_string();

    // Resolve param C++ types by scanning graph nodes
    let param_cpp_types = resolve_param_cpp_types(hir, lowered, registry, graph);

    ThirContext {
        resolved,
        typed,
        lowered,
        registry,
        hir,
        task_index,
        const_index,
        param_index,
        set_index,
        mem_bytes,
        tick_rate_hz,
        timer_spin,
        overrun_policy,
        param_cpp_types,
    }
}

// ── Query methods ───────────────────────────────────────────────────────────

impl<'a> ThirContext<'a> {
    /// Look up a task by name.
    pub fn task_info(&self, name: &str) -> Option<&HirTask> {
        self.task_index.get(name).map(|&i| &self.hir.tasks[i])
    }

    /// Look up a const by name.
    pub fn const_info(&self, name: &str) -> Option<&HirConst> {
        self.const_index.get(name).map(|&i| &self.hir.consts[i])
    }

    /// Look up a param by name.
    pub fn param_info(&self, name: &str) -> Option<&HirParam> {
        self.param_index.get(name).map(|&i| &self.hir.params[i])
    }

    /// Look up a set directive by name.
    pub fn set_directive(&self, name: &str) -> Option<&HirSetDirective> {
        self.set_index
            .get(name)
            .map(|&i| &self.hir.set_directives[i])
    }

    /// Get the C++ type for a runtime param. Falls back to type inferred from
    /// the param's default value if no graph-based resolution is available.
    pub fn param_cpp_type(&self, name: &str) -> &'static str {
        if let Some(&t) = self.param_cpp_types.get(name) {
            return t;
        }
        // Fallback: infer from default value
        if let Some(p) = self.param_info(name) {
            return scalar_cpp_type(&p.default_value);
        }
        "double"
    }

    /// Look up concrete actor metadata (lowered → registry fallback).
    pub fn concrete_actor(&self, actor_name: &str, call_id: CallId) -> Option<&ActorMeta> {
        if let Some(meta) = self.lowered.concrete_actors.get(&call_id) {
            return Some(meta);
        }
        self.registry.lookup(actor_name)
    }

    /// Resolve a const name to a u32 value (for dimension resolution).
    pub fn resolve_const_to_u32(&self, name: &str) -> Option<u32> {
        let c = self.const_info(name)?;
        match &c.value {
            Value::Scalar(Scalar::Number(n, _, _)) => Some(*n as u32),
            _ => None,
        }
    }

    /// Resolve a const name to its array length (for dimension resolution).
    pub fn resolve_const_array_len(&self, name: &str) -> Option<u32> {
        let c = self.const_info(name)?;
        match &c.value {
            Value::Array(elems, _) => Some(elems.len() as u32),
            Value::Scalar(Scalar::Number(n, _, _)) => Some(*n as u32),
            _ => None,
        }
    }

    // ── Dimension resolution (replaces dim_resolve.rs Program access) ───

    /// Resolve a ShapeDim to a concrete u32 value.
    pub fn resolve_shape_dim(&self, dim: &ShapeDim) -> Option<u32> {
        match dim {
            ShapeDim::Literal(n, _) => Some(*n),
            ShapeDim::ConstRef(ident) => self.resolve_const_to_u32(&ident.name),
        }
    }

    /// Resolve an Arg to a u32 value (number, array length, or const ref).
    pub fn resolve_arg_to_u32(&self, arg: &Arg) -> Option<u32> {
        match arg {
            Arg::Value(Value::Scalar(Scalar::Number(n, _, _))) => Some(*n as u32),
            Arg::Value(Value::Array(elems, _)) => Some(elems.len() as u32),
            Arg::ConstRef(ident) => self.resolve_const_array_len(&ident.name),
            _ => None,
        }
    }
}

// ── Internal helpers ────────────────────────────────────────────────────────

fn find_set_size(
    directives: &[HirSetDirective],
    index: &HashMap<String, usize>,
    name: &str,
) -> Option<u64> {
    let &i = index.get(name)?;
    match &directives[i].value {
        SetValue::Size(v, _) => Some(*v),
        _ => None,
    }
}

fn find_set_freq(
    directives: &[HirSetDirective],
    index: &HashMap<String, usize>,
    name: &str,
) -> Option<f64> {
    let &i = index.get(name)?;
    match &directives[i].value {
        SetValue::Freq(f, _) => Some(*f),
        _ => None,
    }
}

fn find_set_number(
    directives: &[HirSetDirective],
    index: &HashMap<String, usize>,
    name: &str,
) -> Option<f64> {
    let &i = index.get(name)?;
    match &directives[i].value {
        SetValue::Number(n, _) => Some(*n),
        _ => None,
    }
}

fn find_set_ident<'a>(
    directives: &'a [HirSetDirective],
    index: &HashMap<String, usize>,
    name: &str,
) -> Option<&'a str> {
    let &i = index.get(name)?;
    match &directives[i].value {
        SetValue::Ident(ident) => Some(&ident.name),
        _ => None,
    }
}

/// Infer C++ type from a scalar default value.
fn scalar_cpp_type(s: &Scalar) -> &'static str {
    match s {
        Scalar::Number(_, _, is_int) if *is_int => "int",
        Scalar::Number(..) => "double",
        Scalar::StringLit(..) => "const char*",
        _ => "double",
    }
}

/// Resolve param C++ types by scanning graph nodes for actor calls that
/// reference each param, then looking up the actor's parameter type.
fn resolve_param_cpp_types(
    hir: &HirProgram,
    lowered: &LoweredProgram,
    registry: &Registry,
    graph: &ProgramGraph,
) -> HashMap<String, &'static str> {
    let mut result = HashMap::new();

    // Collect param names for fast lookup
    let param_names: HashMap<&str, &Scalar> = hir
        .params
        .iter()
        .map(|p| (p.name.as_str(), &p.default_value))
        .collect();

    if param_names.is_empty() {
        return result;
    }

    // Scan all graph nodes for ParamRef args
    for task_graph in graph.tasks.values() {
        for sub in subgraphs_of(task_graph) {
            for node in &sub.nodes {
                if let NodeKind::Actor {
                    name,
                    args,
                    call_id,
                    ..
                } = &node.kind
                {
                    for (i, arg) in args.iter().enumerate() {
                        if let Arg::ParamRef(ident) = arg {
                            if result.contains_key(&ident.name) {
                                continue; // already resolved
                            }
                            if !param_names.contains_key(ident.name.as_str()) {
                                continue; // not a known param
                            }
                            // Look up actor metadata
                            let meta = lowered
                                .concrete_actors
                                .get(call_id)
                                .or_else(|| registry.lookup(name));
                            if let Some(meta) = meta {
                                if let Some(p) = meta.params.get(i) {
                                    let cpp_type = match p.param_type {
                                        ParamType::Int => "int",
                                        ParamType::Float => "float",
                                        ParamType::Double => "double",
                                        _ => {
                                            let fallback = param_names[ident.name.as_str()];
                                            scalar_cpp_type(fallback)
                                        }
                                    };
                                    result.insert(ident.name.clone(), cpp_type);
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    // Fill in remaining params with fallback from default value
    for (name, default) in &param_names {
        result
            .entry((*name).to_string())
            .or_insert_with(|| scalar_cpp_type(default));
    }

    result
}

// ── Tests ───────────────────────────────────────────────────────────────────
