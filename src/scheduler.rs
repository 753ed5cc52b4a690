//! scheduler.rs — Stream/event scheduler (spec §4.5).
//!
//! Takes the planner's execution-unit DAG and partitions it onto
//! concurrent streams, inserting events wherever a data (or rerun)
//! dependency crosses a stream boundary. Compilation itself stays
//! single-threaded and deterministic: this module only *describes* the
//! concurrency the generated program will exhibit, it doesn't use any.

use std::collections::HashMap;

use crate::primitive::{ExecutionUnit, PrimitiveOp, UnitId};

/// A dense stream index, `[0, stream_count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct StreamId(pub u32);

/// A reusable physical event handle, paired with the unit id (the
/// correlation id) it was allocated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct EventSlotId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRef {
    pub slot: EventSlotId,
    pub correlation_id: UnitId,
}

/// One entry in a stream's command list.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamCommand {
    Perform(PrimitiveOp),
    EmitEvent(EventRef),
    WaitOnEvent(EventRef),
    EmitRerunEvent(EventRef),
    WaitOnRerunEvent(EventRef),
    UnitStart(UnitId),
    UnitEnd(UnitId),
    RerunSatisfied(UnitId),
}

/// The scheduler's output: one command list per stream, plus the total
/// number of distinct event objects the recipe must create.
#[derive(Debug, Clone, Default)]
pub struct ScheduleOutput {
    pub streams: Vec<Vec<StreamCommand>>,
    pub event_object_count: u32,
}

/// A free-list event-object pool: a slot is handed back once every
/// waiter that was counted against it has consumed its wait.
#[derive(Default)]
struct SlotPool {
    free: Vec<EventSlotId>,
    next: u32,
}

impl SlotPool {
    fn alloc(&mut self) -> EventSlotId {
        if let Some(slot) = self.free.pop() {
            return slot;
        }
        let slot = EventSlotId(self.next);
        self.next += 1;
        slot
    }

    fn release(&mut self, slot: EventSlotId) {
        self.free.push(slot);
    }
}

struct EventState {
    slot: EventSlotId,
    total_waiters: u32,
    consumed: u32,
    emitted: bool,
}

/// Greedily assign every unit to a stream, preferring the stream of its
/// most recent dependency. A unit with no dependencies starts a fresh
/// stream (this is what gives independent branches, e.g. two unrelated
/// `tanh` calls, their own streams — see scenario 3 of §8).
fn assign_streams(units: &[ExecutionUnit]) -> HashMap<UnitId, StreamId> {
    let mut unit_stream = HashMap::with_capacity(units.len());
    let mut next_stream = 0u32;
    for unit in units {
        let stream = match unit.depends_on.last() {
            Some(last_dep) => *unit_stream
                .get(last_dep)
                .expect("dependency must be scheduled before its dependent"),
            None => {
                let s = StreamId(next_stream);
                next_stream += 1;
                s
            }
        };
        unit_stream.insert(unit.id, stream);
    }
    unit_stream
}

/// For every producer, count how many of its consumers (via `depends_on`
/// for ordinary dependencies, via `rerun_after` for rerun edges) land on
/// a different stream — the waiter count an event must be sized for.
fn count_cross_stream_waiters(
    units: &[ExecutionUnit],
    unit_stream: &HashMap<UnitId, StreamId>,
) -> (HashMap<UnitId, u32>, HashMap<UnitId, u32>) {
    let mut normal_waiters: HashMap<UnitId, u32> = HashMap::new();
    let mut rerun_waiters: HashMap<UnitId, u32> = HashMap::new();
    for unit in units {
        let my_stream = unit_stream[&unit.id];
        for dep in &unit.depends_on {
            if unit_stream[dep] != my_stream {
                *normal_waiters.entry(*dep).or_insert(0) += 1;
            }
        }
        for target in &unit.rerun_after {
            if unit_stream[target] != my_stream {
                *rerun_waiters.entry(unit.id).or_insert(0) += 1;
            }
        }
    }
    (normal_waiters, rerun_waiters)
}

/// Build per-stream command lists for a topologically ordered unit list
/// (the planner always hands units to us in an order where every
/// dependency precedes its dependents).
pub fn schedule(units: &[ExecutionUnit]) -> ScheduleOutput {
    let unit_stream = assign_streams(units);
    let stream_count = unit_stream.values().map(|s| s.0).max().map_or(0, |m| m + 1);
    let (normal_waiters, rerun_waiters) = count_cross_stream_waiters(units, &unit_stream);

    let mut streams: Vec<Vec<StreamCommand>> = vec![Vec::new(); stream_count as usize];
    let mut pool = SlotPool::default();
    let mut events: HashMap<UnitId, EventState> = HashMap::new();
    let mut rerun_events: HashMap<UnitId, EventState> = HashMap::new();

    for unit in units {
        let my_stream = unit_stream[&unit.id];

        for dep in &unit.depends_on {
            let dep_stream = unit_stream[dep];
            if dep_stream == my_stream {
                continue;
            }
            let total = normal_waiters.get(dep).copied().unwrap_or(0);
            let state = events.entry(*dep).or_insert_with(|| EventState {
                slot: pool.alloc(),
                total_waiters: total,
                consumed: 0,
                emitted: false,
            });
            if !state.emitted {
                streams[dep_stream.0 as usize].push(StreamCommand::EmitEvent(EventRef {
                    slot: state.slot,
                    correlation_id: *dep,
                }));
                state.emitted = true;
            }
            streams[my_stream.0 as usize].push(StreamCommand::WaitOnEvent(EventRef {
                slot: state.slot,
                correlation_id: *dep,
            }));
            state.consumed += 1;
            if state.consumed >= state.total_waiters {
                pool.release(state.slot);
            }
        }

        let idx = my_stream.0 as usize;
        streams[idx].push(StreamCommand::UnitStart(unit.id));
        for op in &unit.ops {
            streams[idx].push(StreamCommand::Perform(op.clone()));
        }
        streams[idx].push(StreamCommand::UnitEnd(unit.id));

        for target in &unit.rerun_after {
            let target_stream = unit_stream[target];
            if target_stream == my_stream {
                streams[idx].push(StreamCommand::RerunSatisfied(*target));
                continue;
            }
            let total = rerun_waiters.get(&unit.id).copied().unwrap_or(0);
            let state = rerun_events.entry(unit.id).or_insert_with(|| EventState {
                slot: pool.alloc(),
                total_waiters: total,
                consumed: 0,
                emitted: false,
            });
            if !state.emitted {
                streams[idx].push(StreamCommand::EmitRerunEvent(EventRef {
                    slot: state.slot,
                    correlation_id: unit.id,
                }));
                state.emitted = true;
            }
            streams[target_stream.0 as usize].push(StreamCommand::WaitOnRerunEvent(EventRef {
                slot: state.slot,
                correlation_id: unit.id,
            }));
            state.consumed += 1;
            if state.consumed >= state.total_waiters {
                pool.release(state.slot);
            }
        }
    }

    ScheduleOutput {
        streams,
        event_object_count: pool.next,
    }
}
