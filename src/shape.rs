//! shape.rs — Shapes: ordered lists of size expressions (spec §4.1).

use std::collections::BTreeMap;
use std::fmt;

use crate::size::{SizeExpr, Symbol};

/// An ordered sequence of symbolic size expressions. The rank is its length.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Shape {
    dims: Vec<SizeExpr>,
}

impl Shape {
    pub fn new(dims: Vec<SizeExpr>) -> Self {
        Shape { dims }
    }

    pub fn scalar() -> Self {
        Shape { dims: Vec::new() }
    }

    pub fn dims(&self) -> &[SizeExpr] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dim(&self, i: usize) -> Option<&SizeExpr> {
        self.dims.get(i)
    }

    /// Swap two axes (`SwapDim(i,j)`). Panics if out of range; callers
    /// validate via `check_swap_dim` first (spec: `RankMismatch`).
    pub fn swap(&self, i: usize, j: usize) -> Shape {
        let mut dims = self.dims.clone();
        dims.swap(i, j);
        Shape { dims }
    }

    /// Prepend `n` broadcast-tagged axes.
    pub fn pad_left(&self, n: usize) -> Shape {
        let mut dims = vec![SizeExpr::broadcast(); n];
        dims.extend(self.dims.iter().cloned());
        Shape { dims }
    }

    /// Append `n` broadcast-tagged axes.
    pub fn pad_right(&self, n: usize) -> Shape {
        let mut dims = self.dims.clone();
        dims.extend(std::iter::repeat(SizeExpr::broadcast()).take(n));
        Shape { dims }
    }

    /// Insert a new broadcast-tagged axis at `at`.
    pub fn insert_broadcast_axis(&self, at: usize) -> Shape {
        let mut dims = self.dims.clone();
        dims.insert(at, SizeExpr::broadcast());
        Shape { dims }
    }

    /// Replace axis `i` with a broadcast-tagged axis (enable broadcast).
    pub fn enable_broadcast(&self, i: usize) -> Shape {
        let mut dims = self.dims.clone();
        dims[i] = SizeExpr::broadcast();
        Shape { dims }
    }

    /// Replace axis `i`'s broadcast tag with a concrete size (disable
    /// broadcast).
    pub fn disable_broadcast(&self, i: usize, size: SizeExpr) -> Shape {
        let mut dims = self.dims.clone();
        dims[i] = size;
        Shape { dims }
    }

    /// Element count as a size expression: the product of all dims
    /// (broadcast axes contribute a factor of 1).
    pub fn num_elements(&self) -> SizeExpr {
        let mut acc = SizeExpr::fix(1);
        for d in &self.dims {
            acc = acc.mul(d);
        }
        acc
    }

    pub fn can_eval(&self, env: &BTreeMap<Symbol, u64>) -> bool {
        self.dims.iter().all(|d| d.can_eval(env))
    }

    pub fn subst(&self, env: &BTreeMap<Symbol, u64>) -> Shape {
        Shape {
            dims: self.dims.iter().map(|d| d.subst(env)).collect(),
        }
    }

    /// Broadcast two shapes to a common shape, non-strict: pad the
    /// shorter with leading broadcast axes, then align axis-by-axis,
    /// replacing a `Broadcast` axis with the other side's axis.
    /// Permits extending a non-broadcast axis of size that the other side
    /// marks `Broadcast`, but never reconciles two differing non-broadcast
    /// axes.
    pub fn broadcast_to_same(
        a: &Shape,
        b: &Shape,
        env: &BTreeMap<Symbol, u64>,
    ) -> Result<Shape, BroadcastError> {
        Self::broadcast_impl(a, b, env, false)
    }

    /// Strict variant: refuses to broadcast a non-broadcast axis against
    /// a differing non-broadcast axis, same as the non-strict form, but
    /// additionally refuses the case where BOTH sides are plain
    /// (non-broadcast) and happen to already be of equal rank but the
    /// caller wants no padding/broadcasting to occur at all silently.
    pub fn broadcast_to_same_strict(
        a: &Shape,
        b: &Shape,
        env: &BTreeMap<Symbol, u64>,
    ) -> Result<Shape, BroadcastError> {
        Self::broadcast_impl(a, b, env, true)
    }

    fn broadcast_impl(
        a: &Shape,
        b: &Shape,
        env: &BTreeMap<Symbol, u64>,
        strict: bool,
    ) -> Result<Shape, BroadcastError> {
        let rank = a.rank().max(b.rank());
        let pa = a.pad_left(rank - a.rank());
        let pb = b.pad_left(rank - b.rank());
        let mut out = Vec::with_capacity(rank);
        for axis in 0..rank {
            let da = &pa.dims[axis];
            let db = &pb.dims[axis];
            let resolved = match (da.is_broadcast(), db.is_broadcast()) {
                (true, true) => SizeExpr::broadcast(),
                (true, false) => {
                    if strict {
                        return Err(BroadcastError::StrictViolation { axis });
                    }
                    db.clone()
                }
                (false, true) => {
                    if strict {
                        return Err(BroadcastError::StrictViolation { axis });
                    }
                    da.clone()
                }
                (false, false) => {
                    if da.equal_under_env(db, env) {
                        da.clone()
                    } else {
                        return Err(BroadcastError::Mismatch {
                            axis,
                            left: da.to_string(),
                            right: db.to_string(),
                        });
                    }
                }
            };
            out.push(resolved);
        }
        Ok(Shape { dims: out })
    }

    /// Pad the shorter of two shapes with leading broadcast axes so both
    /// reach the same rank, without resolving per-axis broadcasting.
    pub fn pad_to_same(a: &Shape, b: &Shape) -> (Shape, Shape) {
        let rank = a.rank().max(b.rank());
        (a.pad_left(rank - a.rank()), b.pad_left(rank - b.rank()))
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BroadcastError {
    #[error("axis {axis}: non-broadcast axes disagree ({left} vs {right})")]
    Mismatch {
        axis: usize,
        left: String,
        right: String,
    },
    #[error("axis {axis}: strict broadcast forbids implicit broadcast on this axis")]
    StrictViolation { axis: usize },
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> BTreeMap<Symbol, u64> {
        BTreeMap::new()
    }

    #[test]
    fn pad_left_adds_broadcast_axes() {
        let s = Shape::new(vec![SizeExpr::fix(3)]);
        let p = s.pad_left(2);
        assert_eq!(p.rank(), 3);
        assert!(p.dim(0).unwrap().is_broadcast());
        assert!(p.dim(1).unwrap().is_broadcast());
    }

    #[test]
    fn broadcast_to_same_resolves_broadcast_axis() {
        let a = Shape::new(vec![SizeExpr::fix(3), SizeExpr::broadcast()]);
        let b = Shape::new(vec![SizeExpr::fix(3), SizeExpr::fix(4)]);
        let r = Shape::broadcast_to_same(&a, &b, &env()).unwrap();
        assert_eq!(r, Shape::new(vec![SizeExpr::fix(3), SizeExpr::fix(4)]));
    }

    #[test]
    fn broadcast_to_same_rejects_conflicting_axes() {
        let a = Shape::new(vec![SizeExpr::fix(3)]);
        let b = Shape::new(vec![SizeExpr::fix(4)]);
        assert!(Shape::broadcast_to_same(&a, &b, &env()).is_err());
    }

    #[test]
    fn strict_rejects_implicit_broadcast() {
        let a = Shape::new(vec![SizeExpr::broadcast()]);
        let b = Shape::new(vec![SizeExpr::fix(4)]);
        assert!(Shape::broadcast_to_same_strict(&a, &b, &env()).is_err());
        assert!(Shape::broadcast_to_same(&a, &b, &env()).is_ok());
    }

    #[test]
    fn num_elements_multiplies_dims() {
        let s = Shape::new(vec![SizeExpr::fix(3), SizeExpr::fix(4)]);
        assert_eq!(s.num_elements().eval(&env()), Some(12));
    }

    #[test]
    fn num_elements_broadcast_axis_contributes_one() {
        let s = Shape::new(vec![SizeExpr::fix(3), SizeExpr::broadcast()]);
        assert_eq!(s.num_elements().eval(&env()), Some(3));
    }
}
