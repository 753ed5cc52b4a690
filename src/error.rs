//! error.rs — Top-level error taxonomy (spec §7).
//!
//! Every fallible entry point in the core returns `Result<T, CompileError>`.
//! Nothing is caught and retried internally; each variant carries the
//! [`Diagnostic`] that explains it.

use crate::diag::Diagnostic;

/// The closed error taxonomy of the compiler. All variants are fatal at
/// compile time.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// Two operands disagree on a dimension that is not broadcastable.
    #[error("{0}")]
    ShapeMismatch(Diagnostic),

    /// Structural arity wrong (e.g. `Dot` on 3-D tensors, `SwapDim` out of
    /// range, `Reshape` with unequal element count).
    #[error("{0}")]
    RankMismatch(Diagnostic),

    /// `canEvalAllSymSizes` is false at a phase that requires concrete sizes.
    #[error("{0}")]
    UnresolvedSymbol(Diagnostic),

    /// A variable has no entry in the placement map.
    #[error("{0}")]
    PlacementMissing(Diagnostic),

    /// The planner proves no safe in-place site but a required op demands
    /// one. Should not occur; indicates an internal bug.
    #[error("{0}")]
    InPlaceConflict(Diagnostic),

    /// The call sequencer found no ready stream while some stream was
    /// non-empty (invariant violation).
    #[error("{0}")]
    SchedulerDeadlock(Diagnostic),

    /// An extension op whose arity does not match its argument count.
    #[error("{0}")]
    UnsupportedOp(Diagnostic),
}

impl CompileError {
    /// Borrow the underlying diagnostic regardless of variant.
    pub fn diagnostic(&self) -> &Diagnostic {
        match self {
            CompileError::ShapeMismatch(d)
            | CompileError::RankMismatch(d)
            | CompileError::UnresolvedSymbol(d)
            | CompileError::PlacementMissing(d)
            | CompileError::InPlaceConflict(d)
            | CompileError::SchedulerDeadlock(d)
            | CompileError::UnsupportedOp(d) => d,
        }
    }

    /// Process exit code used by the CLI driver for this error class,
    /// mirroring the `EXIT_COMPILE_ERROR` convention.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

pub type CompileResult<T> = Result<T, CompileError>;
