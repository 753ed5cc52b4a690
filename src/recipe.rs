//! recipe.rs — Recipe assembler (spec §4.7).
//!
//! Collates generated source text and the three ordered call lists
//! (`init`, `dispose`, `exec`) the caller hands to its device runtime.
//! This is the last phase of the core; everything downstream belongs to
//! the external numeric/device-driver collaborators (spec §1).

use crate::manikin::MemAlloc;
use crate::primitive::UnitId;
use crate::scheduler::StreamId;
use crate::sequencer::ApiCall;
use crate::template_cache::TemplateCache;

const KERNEL_PREFIX: &str = concat!(
    "#include \"Utils.cuh\"\n",
    "#include \"NDSupport.cuh\"\n",
    "#include \"Subtensor.cuh\"\n",
    "#include \"Ops.cuh\"\n\n",
);

const HOST_PREFIX: &str = concat!(
    "#include \"Utils.cuh\"\n",
    "#include \"NDSupport.cuh\"\n",
    "#include \"Subtensor.cuh\"\n",
    "#include \"Ops.cuh\"\n",
    "#include \"ThrustInterface.cuh\"\n",
    "#include \"Reduce.cuh\"\n",
    "#include <stdio.h>\n\n",
);

/// A low-level device API call in the three phases a recipe schedules
/// into (init once, exec every step, dispose once).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum RecipeCall {
    MemAlloc(MemAlloc),
    MemFree(u32),
    StreamCreate { id: StreamId, non_blocking: bool },
    StreamDestroy { id: StreamId },
    EventCreate { id: u32, timing_enabled: bool, blocking_sync: bool },
    EventDestroy { id: u32 },
    Warmup(UnitId),
    Exec(ApiCall),
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Recipe {
    pub kernel_code: String,
    pub host_code: String,
    pub init_calls: Vec<RecipeCall>,
    pub dispose_calls: Vec<RecipeCall>,
    pub exec_calls: Vec<RecipeCall>,
}

/// Assemble the final recipe from the planner's allocations, the
/// scheduler's stream count, the sequencer's linearized calls, and the
/// template cache's accumulated source text.
///
/// `warmup_units`, when `warmup` is enabled, are appended to `init_calls`
/// after every allocation/stream/event is created but before any
/// steady-state exec call runs (spec §9 "Warmup").
pub fn assemble(
    allocations: &[MemAlloc],
    stream_count: u32,
    event_object_count: u32,
    exec_calls: Vec<ApiCall>,
    warmup_units: &[UnitId],
    warmup: bool,
    templates: &TemplateCache,
) -> Recipe {
    let mut init_calls = Vec::new();
    for alloc in allocations {
        init_calls.push(RecipeCall::MemAlloc(alloc.clone()));
    }
    for i in 0..stream_count {
        init_calls.push(RecipeCall::StreamCreate {
            id: StreamId(i),
            non_blocking: true,
        });
    }
    for i in 0..event_object_count {
        init_calls.push(RecipeCall::EventCreate {
            id: i,
            timing_enabled: false,
            blocking_sync: true,
        });
    }
    if warmup {
        for &unit in warmup_units {
            init_calls.push(RecipeCall::Warmup(unit));
        }
    }

    // Disposal runs in the reverse of allocation order, and before that,
    // tears down in the reverse phase order to init (events, then
    // streams, then memory) per spec §4.7.
    let mut dispose_calls = Vec::new();
    for i in (0..event_object_count).rev() {
        dispose_calls.push(RecipeCall::EventDestroy { id: i });
    }
    for i in (0..stream_count).rev() {
        dispose_calls.push(RecipeCall::StreamDestroy { id: StreamId(i) });
    }
    for alloc in allocations.iter().rev() {
        dispose_calls.push(RecipeCall::MemFree(alloc.id.0));
    }

    let exec_calls = exec_calls.into_iter().map(RecipeCall::Exec).collect();

    Recipe {
        kernel_code: format!("{KERNEL_PREFIX}{}", templates.kernel_source()),
        host_code: format!("{HOST_PREFIX}{}", templates.host_source()),
        init_calls,
        dispose_calls,
        exec_calls,
    }
}
