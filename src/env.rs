//! env.rs — Compile-time environment: symbol bindings and placement.

use std::collections::BTreeMap;

use crate::size::Symbol;
use crate::varspec::{Placement, VarSpec};

/// Symbolic size variable -> concrete value bindings, supplied by the
/// caller for a given compile (spec §4.1: "a size expression is
/// resolvable once every free symbol has a binding").
pub type SymSizeEnv = BTreeMap<Symbol, u64>;

/// Maps every external variable touched by a graph to where its storage
/// lives. Looked up by the planner when deciding host/device copies.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct CompileEnv {
    var_placement: BTreeMap<String, Placement>,
}

impl CompileEnv {
    pub fn new() -> Self {
        CompileEnv::default()
    }

    pub fn bind(&mut self, var: &VarSpec, placement: Placement) {
        self.var_placement.insert(var.name.clone(), placement);
    }

    /// Bind a placement by variable name directly, without a full
    /// `VarSpec` in hand — used by the CLI's JSON surface, where the
    /// environment arrives ahead of (and independently from) the graph
    /// that names the variable.
    pub fn bind_name(&mut self, name: impl Into<String>, placement: Placement) {
        self.var_placement.insert(name.into(), placement);
    }

    pub fn placement_of(&self, var: &VarSpec) -> Option<Placement> {
        self.var_placement.get(&var.name).copied()
    }
}
