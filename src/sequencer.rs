//! sequencer.rs — Call sequencer (spec §4.6).
//!
//! Linearizes the scheduler's per-stream command lists into one
//! deterministic list of device API verbs, instantiating C++ function
//! templates for `CallCFunc`/`Sum`/`SumAxis`-style primitives along the
//! way. Compilation stays single-threaded; this module only decides the
//! *order* the generated program's streams will issue calls in.

use std::collections::HashMap;

use crate::diag::{codes, DiagLevel, Diagnostic, NodeRef};
use crate::error::CompileError;
use crate::primitive::{PrimitiveOp, UnitId};
use crate::scheduler::{EventSlotId, ScheduleOutput, StreamCommand, StreamId};
use crate::template_cache::{Domain, TemplateCache, TemplateKey};

/// A single low-level device API call, from the closed vocabulary of
/// spec §6.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ApiCall {
    StreamWaitEvent { stream: StreamId, event: EventSlotId },
    EventRecord { event: EventSlotId, stream: StreamId },
    EventSynchronize { event: EventSlotId },
    Perform { stream: StreamId, op: PrimitiveOp },
    Trace(String),
}

/// Per-stream read cursor over its command list.
struct Cursor<'a> {
    stream: StreamId,
    commands: &'a [StreamCommand],
    pos: usize,
    last_issued_at: u64,
}

impl<'a> Cursor<'a> {
    fn head(&self) -> Option<&'a StreamCommand> {
        self.commands.get(self.pos)
    }

    fn done(&self) -> bool {
        self.pos >= self.commands.len()
    }
}

/// Linearize a [`ScheduleOutput`] into one ordered `exec-calls` list,
/// instantiating a C++ function template the first time a given
/// `LaunchKernel`/`CallCFunc` tuple is referenced (spec §4.6).
///
/// Tie-break heuristic: prefer the stream least recently issued from;
/// penalize a stream whose head is an `EmitEvent` (+1000, let consumers
/// catch up first) and reward one whose head is a `WaitOnEvent` (-1000,
/// drain syncs early) so waits and emits interleave rather than batch.
pub fn sequence(
    schedule: &ScheduleOutput,
    templates: &mut TemplateCache,
) -> Result<Vec<ApiCall>, CompileError> {
    let mut cursors: Vec<Cursor> = schedule
        .streams
        .iter()
        .enumerate()
        .map(|(i, commands)| Cursor {
            stream: StreamId(i as u32),
            commands,
            pos: 0,
            last_issued_at: 0,
        })
        .collect();

    // active_events[slot] = remaining "in flight" count (emitted, not yet
    // fully waited on); a slot with 0 active entries is not ready to wait.
    let mut active_events: HashMap<u32, u32> = HashMap::new();
    let mut calls = Vec::new();
    let mut tick: u64 = 0;

    loop {
        if cursors.iter().all(Cursor::done) {
            break;
        }

        let mut best: Option<(usize, i64)> = None;
        for (i, c) in cursors.iter().enumerate() {
            if c.done() {
                continue;
            }
            let Some(score) = readiness_score(c, &active_events) else {
                continue;
            };
            let recency_penalty = c.last_issued_at as i64;
            let total = score + recency_penalty;
            if best.map(|(_, b)| total < b).unwrap_or(true) {
                best = Some((i, total));
            }
        }

        let Some((idx, _)) = best else {
            return Err(deadlock_error(&cursors, &active_events));
        };

        tick += 1;
        let stream = cursors[idx].stream;
        let cmd = cursors[idx].commands[cursors[idx].pos].clone();
        cursors[idx].pos += 1;
        cursors[idx].last_issued_at = tick;

        match cmd {
            StreamCommand::Perform(op) => {
                let op = instantiate_templates(op, templates);
                calls.push(ApiCall::Perform { stream, op });
            }
            StreamCommand::EmitEvent(e) | StreamCommand::EmitRerunEvent(e) => {
                *active_events.entry(e.slot.0).or_insert(0) += 1;
                calls.push(ApiCall::EventRecord {
                    event: e.slot,
                    stream,
                });
            }
            StreamCommand::WaitOnEvent(e) | StreamCommand::WaitOnRerunEvent(e) => {
                let remaining = active_events.entry(e.slot.0).or_insert(0);
                *remaining = remaining.saturating_sub(1);
                calls.push(ApiCall::StreamWaitEvent {
                    stream,
                    event: e.slot,
                });
            }
            StreamCommand::UnitStart(id) => calls.push(ApiCall::Trace(format!("{id} start"))),
            StreamCommand::UnitEnd(id) => calls.push(ApiCall::Trace(format!("{id} end"))),
            StreamCommand::RerunSatisfied(id) => {
                calls.push(ApiCall::Trace(format!("{id} rerun satisfied")))
            }
        }
    }

    Ok(calls)
}

/// Give a `LaunchKernel`/`CallCFunc` op its instantiated C-linkage symbol,
/// keyed on its argument dtypes (the result manikin is conventionally the
/// last argument, so its dtype doubles as the template's return type).
/// Every other op passes through unchanged.
fn instantiate_templates(op: PrimitiveOp, templates: &mut TemplateCache) -> PrimitiveOp {
    match op {
        PrimitiveOp::LaunchKernel { kernel_name, args } => {
            let arg_types = args.iter().map(|m| m.dtype).collect::<Vec<_>>();
            let return_type = args.last().map(|m| m.dtype).unwrap_or(crate::dtype::TypeName::Single);
            let key = TemplateKey {
                function_name: kernel_name,
                domain: Domain::Kernel,
                template_args: vec![return_type.cpp_name().to_string()],
                return_type,
                arg_types,
            };
            let symbol = templates.instantiate(key);
            PrimitiveOp::LaunchKernel {
                kernel_name: symbol,
                args,
            }
        }
        PrimitiveOp::CallCFunc { func_name, args } => {
            let arg_types = args.iter().map(|m| m.dtype).collect::<Vec<_>>();
            let return_type = args.last().map(|m| m.dtype).unwrap_or(crate::dtype::TypeName::Single);
            let key = TemplateKey {
                function_name: func_name,
                domain: Domain::Host,
                template_args: vec![return_type.cpp_name().to_string()],
                return_type,
                arg_types,
            };
            let symbol = templates.instantiate(key);
            PrimitiveOp::CallCFunc {
                func_name: symbol,
                args,
            }
        }
        other => other,
    }
}

/// Lower-is-better readiness score for a stream's head command, or `None`
/// if the head is not ready to issue at all.
fn readiness_score(c: &Cursor, active_events: &HashMap<u32, u32>) -> Option<i64> {
    match c.head()? {
        StreamCommand::WaitOnEvent(e) | StreamCommand::WaitOnRerunEvent(e) => {
            if active_events.get(&e.slot.0).copied().unwrap_or(0) > 0 {
                Some(-1000)
            } else {
                None
            }
        }
        StreamCommand::EmitEvent(_) | StreamCommand::EmitRerunEvent(_) => Some(1000),
        _ => Some(0),
    }
}

fn deadlock_error(cursors: &[Cursor], active_events: &HashMap<u32, u32>) -> CompileError {
    let stuck: Vec<String> = cursors
        .iter()
        .filter(|c| !c.done())
        .map(|c| format!("{}: {:?}", c.stream.0, c.head()))
        .collect();
    let diag = Diagnostic::new(
        DiagLevel::Error,
        NodeRef::None,
        format!(
            "no stream is ready to issue a call while {} stream(s) remain non-empty: [{}] (active events: {:?})",
            stuck.len(),
            stuck.join(", "),
            active_events
        ),
    )
    .with_code(codes::SCHEDULER_DEADLOCK)
    .with_hint("this indicates a scheduler invariant violation, not a user error");
    CompileError::SchedulerDeadlock(diag)
}
