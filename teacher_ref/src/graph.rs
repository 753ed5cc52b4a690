// graph.rs — SDF graph construction for Pipit programs
//
// Transforms the resolved AST into directed dataflow graphs — one per task.
// Handles define inlining, tap fork expansion, shared buffer edges, modal
// task subgraphs, and feedback loop detection.
//
// Preconditions: `program` is a parsed AST; `resolved` has passed name resolution;
//                `registry` contains actor metadata from C++ headers.
// Postconditions: returns a `ProgramGraph` with per-task graphs, inter-task edges,
//                 and detected feedback cycles.
// Failure modes: recursion depth exceeded (define inlining) → `Diagnostic` error.
// Side effects: none.

use std::collections::HashMap;
use std::fmt;

use crate::ast::*;
use crate::registry::Registry;
use crate::resolve::{CallResolution, DiagLevel, Diagnostic, ResolvedProgram};

// ── Public types ────────────────────────────────────────────────────────────

/// Unique identifier for a node within a subgraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

/// Unique identifier for an edge within a subgraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeId(pub u32);

/// The kind of a graph node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// An actor call (or inlined define actor).
    Actor {
        name: String,
        call_span: Span,
        args: Vec<Arg>,
        /// Optional shape constraint from `actor(...)[d0, d1, ...]` (v0.2.0).
        shape_constraint: Option<ShapeConstraint>,
    },
    /// A fork node created by a tap declaration (`:name`).
    Fork { tap_name: String },
    /// A probe observation point (`?name`).
    Probe { probe_name: String },
    /// A shared buffer read (`@name`).
    BufferRead { buffer_name: String },
    /// A shared buffer write (`-> name`).
    BufferWrite { buffer_name: String },
}

/// A node in the dataflow graph.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub span: Span,
}

/// A directed edge between two nodes.
#[derive(Debug, Clone)]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub span: Span,
}

/// A subgraph: a set of nodes and edges forming a single pipeline or mode.
#[derive(Debug, Clone)]
pub struct Subgraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// A task's graph structure.
#[derive(Debug, Clone)]
pub enum TaskGraph {
    Pipeline(Subgraph),
    Modal {
        control: Subgraph,
        modes: Vec<(String, Subgraph)>,
    },
}

/// An edge linking a buffer write in one task to a buffer read in another.
#[derive(Debug, Clone)]
pub struct InterTaskEdge {
    pub buffer_name: String,
    pub writer_task: String,
    pub writer_node: NodeId,
    pub reader_task: String,
    pub reader_node: NodeId,
}

/// The complete program graph.
#[derive(Debug)]
pub struct ProgramGraph {
    pub tasks: HashMap<String, TaskGraph>,
    pub inter_task_edges: Vec<InterTaskEdge>,
    pub cycles: Vec<Vec<NodeId>>,
}

/// Result of graph construction.
#[derive(Debug)]
pub struct GraphResult {
    pub graph: ProgramGraph,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Build the SDF graph from a resolved Pipit program.
pub fn build_graph(
    program: &Program,
    resolved: &ResolvedProgram,
    registry: &Registry,
) -> GraphResult {
    let mut builder = GraphBuilder::new(program, resolved, registry);
    builder.build_all_tasks();
    builder.link_inter_task_edges();
    builder.detect_all_cycles();

    GraphResult {
        graph: ProgramGraph {
            tasks: builder.task_graphs,
            inter_task_edges: builder.inter_task_edges,
            cycles: builder.cycles,
        },
        diagnostics: builder.diagnostics,
    }
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for ProgramGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ProgramGraph ({} tasks)", self.tasks.len())?;
        for (name, graph) in &self.tasks {
            match graph {
                TaskGraph::Pipeline(sub) => {
                    writeln!(
                        f,
                        "  task '{}': {} nodes, {} edges",
                        name,
                        sub.nodes.len(),
                        sub.edges.len()
                    )?;
                }
                TaskGraph::Modal { control, modes } => {
                    writeln!(
                        f,
                        "  task '{}' (modal): control({} nodes, {} edges), {} modes",
                        name,
                        control.nodes.len(),
                        control.edges.len(),
                        modes.len()
                    )?;
                    for (mode_name, sub) in modes {
                        writeln!(
                            f,
                            "    mode '{}': {} nodes, {} edges",
                            mode_name,
                            sub.nodes.len(),
                            sub.edges.len()
                        )?;
                    }
                }
            }
        }
        if !self.inter_task_edges.is_empty() {
            writeln!(f, "  inter-task edges: {}", self.inter_task_edges.len())?;
        }
        if !self.cycles.is_empty() {
            writeln!(f, "  feedback cycles: {}", self.cycles.len())?;
        }
        Ok(())
    }
}

// ── Internal builder ────────────────────────────────────────────────────────

const MAX_INLINE_DEPTH: u32 = 16;

struct GraphBuilder<'a> {
    program: &'a Program,
    resolved: &'a ResolvedProgram,
    _registry: &'a Registry,
    task_graphs: HashMap<String, TaskGraph>,
    inter_task_edges: Vec<InterTaskEdge>,
    cycles: Vec<Vec<NodeId>>,
    diagnostics: Vec<Diagnostic>,
    /// Global counters to ensure unique NodeId/EdgeId across all subgraphs.
    next_global_node_id: u32,
    next_global_edge_id: u32,
}

/// Context for building a single subgraph.
struct SubgraphCtx {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    next_node_id: u32,
    next_edge_id: u32,
    /// Map from tap name to the ForkNode id.
    taps: HashMap<String, NodeId>,
    /// Map from buffer write name to the BufferWrite node id.
    buffer_writes: HashMap<String, NodeId>,
    /// Map from buffer read name to the BufferRead node id.
    buffer_reads: HashMap<String, NodeId>,
    /// Deferred tap-input edges: (actor_node_id, tap_name, span).
    /// Resolved after all lines are processed (supports forward references).
    pending_tap_inputs: Vec<(NodeId, String, Span)>,
}

impl SubgraphCtx {
    fn new(start_node_id: u32, start_edge_id: u32) -> Self {
        SubgraphCtx {
            nodes: Vec::new(),
            edges: Vec::new(),
            next_node_id: start_node_id,
            next_edge_id: start_edge_id,
            taps: HashMap::new(),
            buffer_writes: HashMap::new(),
            buffer_reads: HashMap::new(),
            pending_tap_inputs: Vec::new(),
        }
    }

    fn add_node(&mut self, kind: NodeKind, span: Span) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        self.nodes.push(Node { id, kind, span });
        id
    }

    fn add_edge(&mut self, source: NodeId, target: NodeId, span: Span) -> EdgeId {
        let id = EdgeId(self.next_edge_id);
        self.next_edge_id += 1;
        self.edges.push(Edge {
            id,
            source,
            target,
            span,
        });
        id
    }

    fn into_subgraph(self) -> Subgraph {
        Subgraph {
            nodes: self.nodes,
            edges: self.edges,
        }
    }
}

/// Entry and exit nodes of an inlined define or a single actor.
/// For a single actor, entry == exit.
/// For an inlined define, entry is the first node, exit is the last.
struct InlineResult {
    entry: Option<NodeId>,
    exit: Option<NodeId>,
}

impl InlineResult {
    fn single(id: NodeId) -> Self {
        InlineResult {
            entry: Some(id),
            exit: Some(id),
        }
    }

    fn none() -> Self {
        InlineResult {
            entry: None,
            exit: None,
        }
    }
}

impl<'a> GraphBuilder<'a> {
    fn new(program: &'a Program, resolved: &'a ResolvedProgram, registry: &'a Registry) -> Self {
        GraphBuilder {
            program,
            resolved,
            _registry: registry,
            task_graphs: HashMap::new(),
            inter_task_edges: Vec::new(),
            cycles: Vec::new(),
            diagnostics: Vec::new(),
            next_global_node_id: 0,
            next_global_edge_id: 0,
        }
    }

    fn error(&mut self, span: Span, message: String) {
        self.diagnostics.push(Diagnostic {
            level: DiagLevel::Error,
            span,
            message,
            hint: None,
        });
    }

    // ── Build all tasks ─────────────────────────────────────────────────

    fn build_all_tasks(&mut self) {
        for stmt in &self.program.statements {
            if let StatementKind::Task(task) = &stmt.kind {
                let task_name = task.name.name.clone();
                let task_graph = self.build_task(task);
                self.task_graphs.insert(task_name, task_graph);
            }
        }
    }

    fn build_task(&mut self, task: &TaskStmt) -> TaskGraph {
        match &task.body {
            TaskBody::Pipeline(body) => {
                let sub = self.build_subgraph(body);
                TaskGraph::Pipeline(sub)
            }
            TaskBody::Modal(modal) => {
                let control = self.build_subgraph(&modal.control.body);
                let mut modes = Vec::new();
                for mode in &modal.modes {
                    let sub = self.build_subgraph(&mode.body);
                    modes.push((mode.name.name.clone(), sub));
                }
                TaskGraph::Modal { control, modes }
            }
        }
    }

    fn build_subgraph(&mut self, body: &PipelineBody) -> Subgraph {
        let mut ctx = SubgraphCtx::new(self.next_global_node_id, self.next_global_edge_id);

        for line in &body.lines {
            self.build_pipe_expr(line, &mut ctx, 0);
        }

        // Post-pass: resolve deferred tap-input edges (for feedback loops)
        self.resolve_pending_tap_inputs(&mut ctx);

        // Update global counters so next subgraph gets unique IDs
        self.next_global_node_id = ctx.next_node_id;
        self.next_global_edge_id = ctx.next_edge_id;

        ctx.into_subgraph()
    }

    // ── Build a single pipe expression ──────────────────────────────────

    fn build_pipe_expr(
        &mut self,
        expr: &PipeExpr,
        ctx: &mut SubgraphCtx,
        inline_depth: u32,
    ) -> Option<NodeId> {
        // Source — use the exit node as prev (for source, entry == exit for actors)
        let source_result = match &expr.source {
            PipeSource::ActorCall(call) => {
                self.build_actor_or_inline(call, ctx, expr.span, inline_depth)
            }
            PipeSource::BufferRead(ident) => {
                let id = ctx.add_node(
                    NodeKind::BufferRead {
                        buffer_name: ident.name.clone(),
                    },
                    ident.span,
                );
                ctx.buffer_reads.entry(ident.name.clone()).or_insert(id);
                InlineResult::single(id)
            }
            PipeSource::TapRef(ident) => {
                // Look up the fork node for this tap
                let id = ctx.taps.get(&ident.name).copied();
                InlineResult {
                    entry: id,
                    exit: id,
                }
            }
        };
        let mut prev_node = source_result.exit;

        // Elements
        for elem in &expr.elements {
            match elem {
                PipeElem::ActorCall(call) => {
                    let result = self.build_actor_or_inline(call, ctx, expr.span, inline_depth);
                    // Connect prev to entry of inlined define (or the single actor)
                    if let (Some(prev), Some(entry)) = (prev_node, result.entry) {
                        ctx.add_edge(prev, entry, expr.span);
                    }
                    // Continue chain from exit
                    prev_node = result.exit;
                }
                PipeElem::Tap(ident) => {
                    let fork_id = ctx.add_node(
                        NodeKind::Fork {
                            tap_name: ident.name.clone(),
                        },
                        ident.span,
                    );
                    if let Some(prev) = prev_node {
                        ctx.add_edge(prev, fork_id, ident.span);
                    }
                    ctx.taps.insert(ident.name.clone(), fork_id);
                    prev_node = Some(fork_id);
                }
                PipeElem::Probe(ident) => {
                    let probe_id = ctx.add_node(
                        NodeKind::Probe {
                            probe_name: ident.name.clone(),
                        },
                        ident.span,
                    );
                    if let Some(prev) = prev_node {
                        ctx.add_edge(prev, probe_id, ident.span);
                    }
                    prev_node = Some(probe_id);
                }
            }
        }

        // Sink
        if let Some(sink) = &expr.sink {
            let write_id = ctx.add_node(
                NodeKind::BufferWrite {
                    buffer_name: sink.buffer.name.clone(),
                },
                sink.span,
            );
            if let Some(prev) = prev_node {
                ctx.add_edge(prev, write_id, sink.span);
            }
            ctx.buffer_writes.insert(sink.buffer.name.clone(), write_id);
            prev_node = Some(write_id);
        }

        prev_node
    }

    // ── Actor or define inlining ────────────────────────────────────────

    fn build_actor_or_inline(
        &mut self,
        call: &ActorCall,
        ctx: &mut SubgraphCtx,
        pipe_span: Span,
        inline_depth: u32,
    ) -> InlineResult {
        // Check if this call resolves to a define
        if let Some(CallResolution::Define) = self.resolved.call_resolutions.get(&call.span) {
            return self.inline_define(call, ctx, pipe_span, inline_depth);
        }

        // Regular actor node
        let id = ctx.add_node(
            NodeKind::Actor {
                name: call.name.name.clone(),
                call_span: call.span,
                args: call.args.clone(),
                shape_constraint: call.shape_constraint.clone(),
            },
            call.span,
        );

        // Process tap-ref args: create additional incoming edges from fork nodes
        for arg in &call.args {
            if let Arg::TapRef(ident) = arg {
                if let Some(&fork_id) = ctx.taps.get(&ident.name) {
                    ctx.add_edge(fork_id, id, ident.span);
                } else {
                    // Forward reference — defer until all lines processed
                    ctx.pending_tap_inputs
                        .push((id, ident.name.clone(), ident.span));
                }
            }
        }

        InlineResult::single(id)
    }

    fn inline_define(
        &mut self,
        call: &ActorCall,
        ctx: &mut SubgraphCtx,
        _pipe_span: Span,
        inline_depth: u32,
    ) -> InlineResult {
        if inline_depth >= MAX_INLINE_DEPTH {
            self.error(
                call.span,
                format!(
                    "define '{}' inlining exceeds maximum depth ({})",
                    call.name.name, MAX_INLINE_DEPTH
                ),
            );
            return InlineResult::none();
        }

        let define_entry = match self.resolved.defines.get(&call.name.name) {
            Some(e) => e.clone(),
            None => return InlineResult::none(),
        };

        // Get the DefineStmt from the program
        let define_stmt = match &self.program.statements[define_entry.stmt_index].kind {
            StatementKind::Define(d) => d,
            _ => return InlineResult::none(),
        };

        // Build argument substitution map: formal param name -> actual arg
        let arg_map: HashMap<String, Arg> = define_entry
            .param_names
            .iter()
            .zip(call.args.iter())
            .map(|(name, arg)| (name.clone(), arg.clone()))
            .collect();

        // Save tap scope — taps inside defines are scoped to the expansion
        let saved_taps = ctx.taps.clone();

        // Track which node is added first (entry point of the inlined body)
        let node_count_before = ctx.nodes.len();

        // Inline each line of the define body
        let mut last_node: Option<NodeId> = None;

        for line in &define_stmt.body.lines {
            let substituted = substitute_pipe_expr(line, &arg_map);
            let line_result = self.build_pipe_expr(&substituted, ctx, inline_depth + 1);

            if line_result.is_some() {
                last_node = line_result;
            }
        }

        // The entry node is the first node added during inlining
        let entry_node = if ctx.nodes.len() > node_count_before {
            Some(ctx.nodes[node_count_before].id)
        } else {
            None
        };

        // Resolve pending tap inputs referencing define-local taps
        // (before restoring outer tap scope)
        let mut remaining = Vec::new();
        for entry in std::mem::take(&mut ctx.pending_tap_inputs) {
            if let Some(&fork_id) = ctx.taps.get(&entry.1) {
                ctx.add_edge(fork_id, entry.0, entry.2);
            } else {
                remaining.push(entry);
            }
        }
        ctx.pending_tap_inputs = remaining;

        // Restore tap scope
        ctx.taps = saved_taps;

        InlineResult {
            entry: entry_node,
            exit: last_node,
        }
    }

    // ── Pending tap-input resolution ────────────────────────────────────

    fn resolve_pending_tap_inputs(&mut self, ctx: &mut SubgraphCtx) {
        for (actor_id, tap_name, span) in std::mem::take(&mut ctx.pending_tap_inputs) {
            if let Some(&fork_id) = ctx.taps.get(&tap_name) {
                ctx.add_edge(fork_id, actor_id, span);
            } else {
                self.error(
                    span,
                    format!("internal error: tap ':{tap_name}' not found in graph"),
                );
            }
        }
    }

    // ── Inter-task edge linking ─────────────────────────────────────────

    fn link_inter_task_edges(&mut self) {
        for (buf_name, buf_info) in &self.resolved.buffers {
            let writer_node = self.find_buffer_write_node(&buf_info.writer_task, buf_name);
            for (reader_task, _) in &buf_info.readers {
                let reader_node = self.find_buffer_read_node(reader_task, buf_name);
                if let (Some(w_node), Some(r_node)) = (writer_node, reader_node) {
                    self.inter_task_edges.push(InterTaskEdge {
                        buffer_name: buf_name.clone(),
                        writer_task: buf_info.writer_task.clone(),
                        writer_node: w_node,
                        reader_task: reader_task.clone(),
                        reader_node: r_node,
                    });
                }
            }
        }
    }

    fn find_buffer_write_node(&self, task_name: &str, buffer_name: &str) -> Option<NodeId> {
        let task_graph = self.task_graphs.get(task_name)?;
        find_buffer_node_in_task(task_graph, buffer_name, true)
    }

    fn find_buffer_read_node(&self, task_name: &str, buffer_name: &str) -> Option<NodeId> {
        let task_graph = self.task_graphs.get(task_name)?;
        find_buffer_node_in_task(task_graph, buffer_name, false)
    }

    // ── Cycle detection ─────────────────────────────────────────────────

    fn detect_all_cycles(&mut self) {
        for task_graph in self.task_graphs.values() {
            match task_graph {
                TaskGraph::Pipeline(sub) => {
                    let mut cycles = detect_cycles_in_subgraph(sub);
                    self.cycles.append(&mut cycles);
                }
                TaskGraph::Modal { control, modes } => {
                    let mut cycles = detect_cycles_in_subgraph(control);
                    self.cycles.append(&mut cycles);
                    for (_, sub) in modes {
                        let mut mode_cycles = detect_cycles_in_subgraph(sub);
                        self.cycles.append(&mut mode_cycles);
                    }
                }
            }
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn find_buffer_node_in_task(
    task_graph: &TaskGraph,
    buffer_name: &str,
    is_write: bool,
) -> Option<NodeId> {
    let subgraphs: Vec<&Subgraph> = match task_graph {
        TaskGraph::Pipeline(sub) => vec![sub],
        TaskGraph::Modal { control, modes } => {
            let mut subs = vec![control];
            for (_, sub) in modes {
                subs.push(sub);
            }
            subs
        }
    };

    for sub in subgraphs {
        for node in &sub.nodes {
            match &node.kind {
                NodeKind::BufferWrite {
                    buffer_name: name, ..
                } if is_write && name == buffer_name => {
                    return Some(node.id);
                }
                NodeKind::BufferRead {
                    buffer_name: name, ..
                } if !is_write && name == buffer_name => {
                    return Some(node.id);
                }
                _ => {}
            }
        }
    }
    None
}

/// Substitute formal parameters with actual arguments in a PipeExpr.
fn substitute_pipe_expr(expr: &PipeExpr, arg_map: &HashMap<String, Arg>) -> PipeExpr {
    PipeExpr {
        source: substitute_source(&expr.source, arg_map),
        elements: expr
            .elements
            .iter()
            .map(|e| substitute_elem(e, arg_map))
            .collect(),
        sink: expr.sink.clone(),
        span: expr.span,
    }
}

fn substitute_source(source: &PipeSource, arg_map: &HashMap<String, Arg>) -> PipeSource {
    match source {
        PipeSource::ActorCall(call) => PipeSource::ActorCall(substitute_actor_call(call, arg_map)),
        other => other.clone(),
    }
}

fn substitute_elem(elem: &PipeElem, arg_map: &HashMap<String, Arg>) -> PipeElem {
    match elem {
        PipeElem::ActorCall(call) => PipeElem::ActorCall(substitute_actor_call(call, arg_map)),
        other => other.clone(),
    }
}

fn substitute_actor_call(call: &ActorCall, arg_map: &HashMap<String, Arg>) -> ActorCall {
    ActorCall {
        name: call.name.clone(),
        type_args: call.type_args.clone(),
        args: call
            .args
            .iter()
            .map(|arg| substitute_arg(arg, arg_map))
            .collect(),
        shape_constraint: call.shape_constraint.clone(),
        span: call.span,
    }
}

fn substitute_arg(arg: &Arg, arg_map: &HashMap<String, Arg>) -> Arg {
    match arg {
        Arg::ConstRef(ident) => {
            if let Some(replacement) = arg_map.get(&ident.name) {
                replacement.clone()
            } else {
                arg.clone()
            }
        }
        other => other.clone(),
    }
}

/// Detect cycles in a subgraph using DFS. Returns all cycles found.
fn detect_cycles_in_subgraph(sub: &Subgraph) -> Vec<Vec<NodeId>> {
    if sub.nodes.is_empty() {
        return Vec::new();
    }

    // Build adjacency list
    let mut adj: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for node in &sub.nodes {
        adj.entry(node.id).or_default();
    }
    for edge in &sub.edges {
        adj.entry(edge.source).or_default().push(edge.target);
    }

    let mut cycles = Vec::new();
    let mut visited = HashMap::new(); // 0 = unvisited, 1 = in progress, 2 = done
    let mut path = Vec::new();

    for node in &sub.nodes {
        if *visited.get(&node.id).unwrap_or(&0) == 0 {
            dfs_cycle(node.id, &adj, &mut visited, &mut path, &mut cycles);
        }
    }

    cycles
}

fn dfs_cycle(
    node: NodeId,
    adj: &HashMap<NodeId, Vec<NodeId>>,
    visited: &mut HashMap<NodeId, u8>,
    path: &mut Vec<NodeId>,
    cycles: &mut Vec<Vec<NodeId>>,
) {
    visited.insert(node, 1); // in progress
    path.push(node);

    if let Some(neighbors) = adj.get(&node) {
        for &next in neighbors {
            match visited.get(&next).unwrap_or(&0) {
                0 => {
                    dfs_cycle(next, adj, visited, path, cycles);
                }
                1 => {
                    // Found a cycle — extract the cycle from path
                    if let Some(pos) = path.iter().position(|&n| n == next) {
                        let cycle: Vec<NodeId> = path[pos..].to_vec();
                        cycles.push(cycle);
                    }
                }
                _ => {} // already done
            }
        }
    }

    path.pop();
    visited.insert(node, 2); // done
}

// ── Tests ───────────────────────────────────────────────────────────────────
