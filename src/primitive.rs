//! primitive.rs — Primitive device operations and execution units (spec §3, §4.4).
//!
//! An [`ExecutionUnit`] is the planner's output granularity: one manikin
//! assignment plus the ordered primitive ops that realize it, with the
//! dependency edges the scheduler needs to place it on a stream.

use std::fmt;

use crate::manikin::{AllocId, Manikin};

/// Identifier of an execution unit within a single plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct UnitId(pub u32);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit{}", self.0)
    }
}

/// A single device-level primitive, named the way the recipe assembler's
/// API-call vocabulary names them (spec §6) but without stream/event
/// metadata, which the scheduler attaches afterward.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PrimitiveOp {
    /// Launch a generated kernel by name over the given manikins.
    LaunchKernel {
        kernel_name: String,
        args: Vec<Manikin>,
    },
    /// Call a named C function (used by scalar/control-flow-adjacent ops).
    CallCFunc {
        func_name: String,
        args: Vec<Manikin>,
    },
    MemcpyDtoD { src: Manikin, dst: Manikin },
    MemcpyHtoD { src: Manikin, dst: Manikin },
    MemcpyDtoH { src: Manikin, dst: Manikin },
    Memset { dst: Manikin, byte_value: u8 },
    /// Write a scalar constant (IEEE-754 bit pattern) into `dst` (spec §4.4,
    /// `ScalarConst`).
    WriteScalarConst { dst: Manikin, bits: u64 },
    BlasGemm {
        lhs: Manikin,
        rhs: Manikin,
        out: Manikin,
    },
    /// A debug/no-op trace point carrying a human-readable label.
    Trace(String),
}

/// The planner's unit of work: the allocation(s) it touches, the ops that
/// realize it, and the dependency edges the scheduler must respect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionUnit {
    pub id: UnitId,
    pub result: Manikin,
    pub ops: Vec<PrimitiveOp>,
    /// Units whose results this unit reads.
    pub depends_on: Vec<UnitId>,
    /// Units that must be re-run whenever this unit re-runs (spec §4.5
    /// "rerun events" — in-place aliasing forces a downstream re-issue).
    pub rerun_after: Vec<UnitId>,
    /// Allocations first made live by this unit (for the scheduler's
    /// memory-alloc bookkeeping).
    pub allocates: Vec<AllocId>,
    /// Allocations no longer needed after this unit runs.
    pub frees: Vec<AllocId>,
}

impl ExecutionUnit {
    pub fn new(id: UnitId, result: Manikin) -> Self {
        ExecutionUnit {
            id,
            result,
            ops: Vec::new(),
            depends_on: Vec::new(),
            rerun_after: Vec::new(),
            allocates: Vec::new(),
            frees: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::TypeName;
    use crate::shape::Shape;

    #[test]
    fn fresh_unit_has_no_edges() {
        let m = Manikin::contiguous(Shape::scalar(), &[], TypeName::Single, AllocId(0));
        let u = ExecutionUnit::new(UnitId(0), m);
        assert!(u.depends_on.is_empty());
        assert!(u.rerun_after.is_empty());
    }
}
