//! ext_op.rs — The extension-op escape hatch (spec §3 `NaryOp::Extension`).
//!
//! Lets a caller register a domain operator the core vocabulary doesn't
//! have, without reopening `ExprKind`. Mirrors the teacher's approach to
//! pluggable passes: a small trait object held behind `Arc` so it can be
//! embedded in a hash-consed node and cloned cheaply.

use crate::dtype::TypeName;
use crate::error::CompileError;
use crate::manikin::Manikin;
use crate::shape::Shape;

/// A user-supplied operator with arity, shape inference, and lowering to
/// primitive ops, slotted into `NaryOp::Extension`.
///
/// Identity for hash-consing purposes is by `Arc` pointer (see
/// `expr::NaryOp`'s manual `Eq`/`Hash`): two extension ops are the "same"
/// node only if they share the same trait-object allocation, so callers
/// that want sharing must construct the `Arc<dyn ExtensionOp>` once and
/// reuse it.
pub trait ExtensionOp: std::fmt::Debug + Send + Sync {
    /// Used as the node's tag in diagnostics and generated source.
    fn name(&self) -> &str;

    /// Required argument count. Arity mismatches are a construction-time
    /// `CompileError::UnsupportedOp`.
    fn arity(&self) -> usize;

    /// Infer the result shape and dtype from argument shapes/dtypes.
    fn shape_of(
        &self,
        arg_shapes: &[Shape],
        arg_dtypes: &[TypeName],
    ) -> Result<(Shape, TypeName), CompileError>;

    /// Lower to the primitive ops that compute `result` from `args`, given
    /// already-planned manikins for both.
    fn lower(&self, args: &[Manikin], result: &Manikin) -> Vec<crate::primitive::PrimitiveOp>;
}
