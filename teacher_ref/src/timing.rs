// timing.rs — Mermaid Gantt timing chart output for Pipit PASS schedules
//
// Transforms a ScheduledProgram + ProgramGraph into a Mermaid Gantt chart
// showing actor firing order and durations per task.
//
// Preconditions: `schedule` is a computed ScheduledProgram;
//                `graph` is the corresponding ProgramGraph.
// Postconditions: returns a valid Mermaid Gantt chart string.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::collections::HashMap;
use std::fmt::Write;

use crate::graph::*;
use crate::schedule::*;

/// Emit the PASS schedule as a Mermaid Gantt chart string.
///
/// Preconditions: `schedule` and `graph` correspond to the same program.
/// Postconditions: returns a complete, valid Mermaid Gantt chart.
/// Failure modes: none (pure string formatting; unknown nodes get fallback labels).
/// Side effects: none.
pub fn emit_timing_chart(schedule: &ScheduledProgram, graph: &ProgramGraph) -> String {
    let mut buf = String::new();
    writeln!(buf, "gantt").unwrap();
    writeln!(buf, "    title PASS Schedule Timing").unwrap();
    writeln!(buf, "    dateFormat x").unwrap();
    writeln!(buf, "    axisFormat %Q").unwrap();

    // Sort task names for deterministic output
    let mut task_names: Vec<&String> = schedule.tasks.keys().collect();
    task_names.sort();

    for task_name in &task_names {
        let meta = &schedule.tasks[*task_name];
        let task_graph = match graph.tasks.get(*task_name) {
            Some(g) => g,
            None => continue,
        };
        emit_task_section(&mut buf, task_name, meta, task_graph);
    }

    buf
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn emit_task_section(buf: &mut String, task_name: &str, meta: &TaskMeta, task_graph: &TaskGraph) {
    let freq = format_freq(meta.freq_hz);
    let prefix = sanitize(task_name);
    match (&meta.schedule, task_graph) {
        (TaskSchedule::Pipeline(sched), TaskGraph::Pipeline(sub)) => {
            writeln!(buf).unwrap();
            writeln!(
                buf,
                "    section {} [pipeline] (K={}, {})",
                task_name, meta.k_factor, freq
            )
            .unwrap();
            emit_subgraph_firings(buf, sched, sub, &prefix);
        }
        (
            TaskSchedule::Modal { control, modes },
            TaskGraph::Modal {
                control: ctrl_sub,
                modes: mode_subs,
            },
        ) => {
            writeln!(buf).unwrap();
            writeln!(
                buf,
                "    section {} [control] (K={}, {})",
                task_name, meta.k_factor, freq
            )
            .unwrap();
            emit_subgraph_firings(buf, control, ctrl_sub, &format!("{prefix}_ctrl"));

            for (mode_name, mode_sched) in modes {
                let mode_sub = mode_subs
                    .iter()
                    .find(|(n, _)| n == mode_name)
                    .map(|(_, s)| s);
                writeln!(buf).unwrap();
                writeln!(buf, "    section {} [mode: {}]", task_name, mode_name).unwrap();
                if let Some(sub) = mode_sub {
                    let mode_prefix = format!("{}_{}", prefix, sanitize(mode_name));
                    emit_subgraph_firings(buf, mode_sched, sub, &mode_prefix);
                }
            }
        }
        _ => {
            // Schedule/graph type mismatch — skip silently
        }
    }
}

/// Emit firing entries as Mermaid Gantt task lines using ASAP scheduling.
///
/// Uses `dateFormat x` with numeric start/end values.  Each node starts
/// at the earliest possible time: `max(end_time of predecessors)`.
/// Independent branches (e.g. after a fork) run in parallel.
/// Probes are zero-duration observation points and are omitted from output.
fn emit_subgraph_firings(
    buf: &mut String,
    sched: &SubgraphSchedule,
    sub: &Subgraph,
    id_prefix: &str,
) {
    if sched.firings.is_empty() {
        return;
    }

    // Build position map: node_id -> index in topological order
    let position: HashMap<NodeId, usize> = sched
        .firings
        .iter()
        .enumerate()
        .map(|(i, f)| (f.node_id, i))
        .collect();

    // Build forward-edge predecessor map (skip back-edges where source
    // appears after target in topological order — these are feedback edges)
    let mut predecessors: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for edge in &sub.edges {
        let src_pos = position.get(&edge.source);
        let tgt_pos = position.get(&edge.target);
        match (src_pos, tgt_pos) {
            (Some(&sp), Some(&tp)) if sp < tp => {
                predecessors
                    .entry(edge.target)
                    .or_default()
                    .push(edge.source);
            }
            _ => {} // back-edge or node not in schedule
        }
    }

    // Compute ASAP start/end times
    let mut end_time: HashMap<NodeId, u64> = HashMap::new();
    let mut task_index = 0usize;

    for entry in &sched.firings {
        let node = find_node(sub, entry.node_id);
        let is_probe = node.is_some_and(|n| matches!(n.kind, NodeKind::Probe { .. }));

        // start = max(end_time of forward predecessors), or 0 if none
        let start = predecessors
            .get(&entry.node_id)
            .map(|preds| {
                preds
                    .iter()
                    .filter_map(|p| end_time.get(p))
                    .max()
                    .copied()
                    .unwrap_or(0)
            })
            .unwrap_or(0);

        let duration = if is_probe {
            0
        } else {
            entry.repetition_count as u64
        };
        let end = start + duration;
        end_time.insert(entry.node_id, end);

        // Skip probes in output (zero-duration observation points)
        if is_probe {
            continue;
        }

        let label = node
            .map(|n| node_label(&n.kind))
            .unwrap_or_else(|| format!("node_{}", entry.node_id.0));

        let id = format!("{id_prefix}_{task_index}");
        writeln!(
            buf,
            "    {} x{} :{}, {}, {}",
            label, entry.repetition_count, id, start, end
        )
        .unwrap();
        task_index += 1;
    }
}

/// Return a Mermaid-safe display label for a given NodeKind.
///
/// Mermaid Gantt uses `:` as the task/metadata separator, so we replace
/// the pipit `:name` fork syntax with `fork(name)` and similar for other
/// special node types.
fn node_label(kind: &NodeKind) -> String {
    match kind {
        NodeKind::Actor { name, .. } => name.clone(),
        NodeKind::Fork { tap_name } => format!("fork({tap_name})"),
        NodeKind::Probe { probe_name } => format!("probe({probe_name})"),
        NodeKind::BufferRead { buffer_name } => format!("read({buffer_name})"),
        NodeKind::BufferWrite { buffer_name } => format!("write({buffer_name})"),
    }
}

/// Format frequency in engineering notation.
fn format_freq(freq_hz: f64) -> String {
    if freq_hz >= 1_000_000.0 {
        let mhz = freq_hz / 1_000_000.0;
        if mhz == mhz.floor() {
            format!("{}MHz", mhz as u64)
        } else {
            format!("{:.1}MHz", mhz)
        }
    } else if freq_hz >= 1_000.0 {
        let khz = freq_hz / 1_000.0;
        if khz == khz.floor() {
            format!("{}kHz", khz as u64)
        } else {
            format!("{:.1}kHz", khz)
        }
    } else {
        format!("{}Hz", freq_hz as u64)
    }
}

/// Sanitize a name to valid Mermaid identifier characters.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn find_node(sub: &Subgraph, id: NodeId) -> Option<&Node> {
    sub.nodes.iter().find(|n| n.id == id)
}

// ── Tests ───────────────────────────────────────────────────────────────────
