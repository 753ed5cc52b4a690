//! pipeline.rs — Compilation session and pass orchestration (spec §3.1).
//!
//! [`CompileSession`] holds every phase's artifact in an `Option<T>` slot,
//! filled in as [`compile`] walks `required_passes(terminal)`. Each pass
//! gets its own `tracing` span so `--verbose`-style output falls out of
//! the subscriber's filter rather than a bespoke `eprintln!` per phase.

use std::collections::HashSet;
use std::time::Instant;

use tracing::{debug, info_span};

use crate::checker;
use crate::diag::Diagnostic;
use crate::env::{CompileEnv, SymSizeEnv};
use crate::error::CompileError;
use crate::expr::Expr;
use crate::pass::{required_passes, PassId};
use crate::planner::{self, PlannerOutput};
use crate::recipe::{self, Recipe};
use crate::scheduler::{self, ScheduleOutput};
use crate::sequencer::{self, ApiCall};
use crate::template_cache::TemplateCache;
use crate::unified::{self, UnifiedGraph};

/// Provenance metadata for reproducible builds and cache-key use.
///
/// `graph_hash`: SHA-256 of the unified graph's canonical debug form.
/// `sym_env_hash`: SHA-256 of the symbol-size environment's canonical form.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub graph_hash: [u8; 32],
    pub sym_env_hash: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    pub fn graph_hash_hex(&self) -> String {
        bytes_to_hex(&self.graph_hash)
    }

    pub fn sym_env_hash_hex(&self) -> String {
        bytes_to_hex(&self.sym_env_hash)
    }

    pub fn to_json(&self) -> String {
        format!(
            "{{\n  \"graph_hash\": \"{}\",\n  \"sym_env_hash\": \"{}\",\n  \"compiler_version\": \"{}\"\n}}\n",
            self.graph_hash_hex(),
            self.sym_env_hash_hex(),
            self.compiler_version,
        )
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(64);
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256_of(text: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Compute provenance from the roots and the symbol-size environment that
/// will drive this compile.
pub fn compute_provenance(roots: &[Expr], sym_env: &SymSizeEnv) -> Provenance {
    let unified = unified::lower_unified(roots);
    let mut nodes: Vec<_> = unified.nodes.values().collect();
    nodes.sort_by_key(|n| n.id);
    let graph_hash = sha256_of(&format!("{nodes:?}"));
    let sym_env_hash = sha256_of(&format!("{sym_env:?}"));
    Provenance {
        graph_hash,
        sym_env_hash,
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

/// Holds every phase's artifact for one compilation request, plus
/// whatever diagnostics the ambient (non-fatal) checks along the way
/// accumulated.
#[derive(Default)]
pub struct CompileSession {
    pub checked: bool,
    pub unified: Option<UnifiedGraph>,
    pub planner_output: Option<PlannerOutput>,
    pub schedule_output: Option<ScheduleOutput>,
    pub sequenced_calls: Option<Vec<ApiCall>>,
    pub templates: TemplateCache,
    pub recipe: Option<Recipe>,
    pub diagnostics: Vec<Diagnostic>,
    pub provenance: Option<Provenance>,
}

/// Run `required_passes(terminal)` over `roots`, filling in
/// [`CompileSession`] as each phase completes. `warmup` controls whether
/// the assembled recipe's init calls include the one-shot host->device
/// warmup uploads the planner identified.
pub fn compile(
    roots: &[Expr],
    compile_env: &CompileEnv,
    sym_env: &SymSizeEnv,
    terminal: PassId,
    warmup: bool,
) -> Result<CompileSession, CompileError> {
    let mut session = CompileSession::default();
    session.provenance = Some(compute_provenance(roots, sym_env));
    let passes = required_passes(terminal);

    for pass_id in passes {
        let span = info_span!("pass", name = crate::pass::descriptor(pass_id).name);
        let _entered = span.enter();
        let started = Instant::now();

        match pass_id {
            PassId::Check => {
                let mut seen = HashSet::new();
                for root in roots {
                    checker::check(root, sym_env, &mut seen)?;
                }
                session.checked = true;
            }
            PassId::Lower => {
                session.unified = Some(unified::lower_unified(roots));
            }
            PassId::Plan => {
                let output = planner::plan(roots, compile_env, sym_env)?;
                debug!(
                    units = output.units.len(),
                    allocations = output.allocations.len(),
                    "planner produced execution units"
                );
                session.planner_output = Some(output);
            }
            PassId::Schedule => {
                let units = &session
                    .planner_output
                    .as_ref()
                    .expect("Plan precedes Schedule in required_passes")
                    .units;
                let output = scheduler::schedule(units);
                debug!(
                    streams = output.streams.len(),
                    events = output.event_object_count,
                    "scheduler assigned streams and events"
                );
                session.schedule_output = Some(output);
            }
            PassId::Sequence => {
                let schedule = session
                    .schedule_output
                    .as_ref()
                    .expect("Schedule precedes Sequence in required_passes");
                let calls = sequencer::sequence(schedule, &mut session.templates)?;
                debug!(calls = calls.len(), "sequencer linearized api calls");
                session.sequenced_calls = Some(calls);
            }
            PassId::Assemble => {
                let planner_output = session
                    .planner_output
                    .as_ref()
                    .expect("Plan precedes Assemble in required_passes");
                let schedule = session
                    .schedule_output
                    .as_ref()
                    .expect("Schedule precedes Assemble in required_passes");
                let calls = session
                    .sequenced_calls
                    .take()
                    .expect("Sequence precedes Assemble in required_passes");
                let recipe = recipe::assemble(
                    &planner_output.allocations,
                    schedule.streams.len() as u32,
                    schedule.event_object_count,
                    calls,
                    &planner_output.warmup_units,
                    warmup,
                    &session.templates,
                );
                session.recipe = Some(recipe);
            }
        }

        debug!(elapsed_ms = started.elapsed().as_secs_f64() * 1000.0, "pass complete");
    }

    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::ExprArena;
    use crate::dtype::TypeName;
    use crate::shape::Shape;
    use crate::size::SizeExpr;

    #[test]
    fn plan_terminal_stops_before_schedule() {
        let mut arena = ExprArena::new();
        let a = arena.zeros(Shape::new(vec![SizeExpr::fix(4)]), TypeName::Single);
        let compile_env = CompileEnv::new();
        let sym_env = SymSizeEnv::new();
        let session = compile(&[a], &compile_env, &sym_env, PassId::Plan, false).unwrap();
        assert!(session.planner_output.is_some());
        assert!(session.schedule_output.is_none());
    }

    #[test]
    fn assemble_terminal_produces_a_recipe() {
        let mut arena = ExprArena::new();
        let a = arena.zeros(Shape::new(vec![SizeExpr::fix(4)]), TypeName::Single);
        let compile_env = CompileEnv::new();
        let sym_env = SymSizeEnv::new();
        let session = compile(&[a], &compile_env, &sym_env, PassId::Assemble, false).unwrap();
        assert!(session.recipe.is_some());
        assert!(session.sequenced_calls.is_none(), "consumed by assemble");
    }

    #[test]
    fn provenance_is_deterministic_for_the_same_graph() {
        let mut arena = ExprArena::new();
        let a = arena.zeros(Shape::new(vec![SizeExpr::fix(4)]), TypeName::Single);
        let sym_env = SymSizeEnv::new();
        let p1 = compute_provenance(&[a.clone()], &sym_env);
        let p2 = compute_provenance(&[a], &sym_env);
        assert_eq!(p1.graph_hash, p2.graph_hash);
    }

    #[test]
    fn compile_error_propagates_from_check() {
        use crate::varspec::VarSpec;
        let mut arena = ExprArena::new();
        let v = VarSpec::new("x", Shape::new(vec![SizeExpr::fix(2)]), TypeName::Single);
        let node = arena.var(v);
        let compile_env = CompileEnv::new();
        let sym_env = SymSizeEnv::new();
        // no placement bound -> Plan fails with PlacementMissing
        let err = compile(&[node], &compile_env, &sym_env, PassId::Plan, false).unwrap_err();
        assert!(matches!(err, CompileError::PlacementMissing(_)));
    }
}
