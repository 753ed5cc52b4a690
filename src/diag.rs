//! diag.rs — Unified diagnostics model
//!
//! Provides the shared diagnostic types used across all compiler phases.
//!
//! Preconditions: none (types only).
//! Postconditions: none (types only).
//! Failure modes: none.
//! Side effects: none.

use std::fmt;

// ── Node reference ───────────────────────────────────────────────────────

/// Points at whatever the phase that raised a diagnostic was looking at:
/// an expression node, a planner execution unit, or a stream index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRef {
    Expr(u64),
    Unit(u32),
    Stream(u32),
    Symbol(String),
    Var(String),
    None,
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRef::Expr(id) => write!(f, "expr#{id}"),
            NodeRef::Unit(id) => write!(f, "unit#{id}"),
            NodeRef::Stream(id) => write!(f, "stream#{id}"),
            NodeRef::Symbol(name) => write!(f, "symbol {name}"),
            NodeRef::Var(name) => write!(f, "var {name}"),
            NodeRef::None => write!(f, "<no location>"),
        }
    }
}

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0101`, `W0300`).
///
/// Codes are grouped by phase: `E01xx` shape algebra, `E02xx` expression
/// graph, `E03xx` planner, `E04xx` scheduler, `E05xx` sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    pub const SHAPE_MISMATCH: DiagCode = DiagCode("E0201");
    pub const RANK_MISMATCH: DiagCode = DiagCode("E0202");
    pub const UNRESOLVED_SYMBOL: DiagCode = DiagCode("E0101");
    pub const PLACEMENT_MISSING: DiagCode = DiagCode("E0301");
    pub const IN_PLACE_CONFLICT: DiagCode = DiagCode("E0302");
    pub const SCHEDULER_DEADLOCK: DiagCode = DiagCode("E0401");
    pub const UNSUPPORTED_OP: DiagCode = DiagCode("E0203");
    pub const AUTO_BROADCAST: DiagCode = DiagCode("W0201");
    pub const IN_PLACE_CHOICE: DiagCode = DiagCode("W0301");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Cause record ─────────────────────────────────────────────────────────

/// One link in a cause chain explaining a propagated shape/rank failure.
#[derive(Debug, Clone)]
pub struct CauseRecord {
    pub message: String,
    pub node: Option<NodeRef>,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any phase.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub node: NodeRef,
    pub message: String,
    pub hint: Option<String>,
    pub cause_chain: Vec<CauseRecord>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint, or causes.
    pub fn new(level: DiagLevel, node: NodeRef, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            node,
            message: message.into(),
            hint: None,
            cause_chain: Vec::new(),
        }
    }

    pub fn error(node: NodeRef, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, node, message)
    }

    pub fn warning(node: NodeRef, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, node, message)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a cause record to the chain.
    pub fn with_cause(mut self, message: impl Into<String>, node: Option<NodeRef>) -> Self {
        self.cause_chain.push(CauseRecord {
            message: message.into(),
            node,
        });
        self
    }

    /// Render as a single-line JSON object, for the CLI's
    /// `--diagnostic-format json` mode. Hand-built rather than derived:
    /// `Diagnostic` carries a `Display`-only message and an `Option<DiagCode>`
    /// that aren't worth threading `serde` through for one call site.
    pub fn to_json(&self) -> String {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        let code = self.code.map(|c| c.0).unwrap_or("");
        let hint = self.hint.as_deref().unwrap_or("");
        let causes: Vec<String> = self
            .cause_chain
            .iter()
            .map(|c| format!("{{\"message\":{},\"node\":{}}}", json_string(&c.message), json_opt_node(&c.node)))
            .collect();
        format!(
            "{{\"level\":{},\"code\":{},\"node\":{},\"message\":{},\"hint\":{},\"causes\":[{}]}}",
            json_string(level),
            json_string(code),
            json_string(&self.node.to_string()),
            json_string(&self.message),
            json_string(hint),
            causes.join(","),
        )
    }
}

fn json_opt_node(node: &Option<NodeRef>) -> String {
    match node {
        Some(n) => json_string(&n.to_string()),
        None => "null".to_string(),
    }
}

fn json_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{level}[{code}]: {} (at {})", self.message, self.node)?;
        } else {
            write!(f, "{level}: {} (at {})", self.message, self.node)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {hint}")?;
        }
        for cause in &self.cause_chain {
            match &cause.node {
                Some(node) => write!(f, "\n  caused by: {} (at {node})", cause.message)?,
                None => write!(f, "\n  caused by: {}", cause.message)?,
            }
        }
        Ok(())
    }
}
