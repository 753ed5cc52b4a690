//! manikin.rs — Storage manikins and memory allocations (spec §3).
//!
//! A manikin is a *logical* tensor: it carries no bytes of its own, only
//! the shape/strides/offset/dtype needed to address a real allocation or
//! an external variable's storage.

use std::fmt;

use crate::dtype::TypeName;
use crate::shape::Shape;
use crate::varspec::VarSpec;

/// Unique identifier of a memory allocation within a recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct AllocId(pub u32);

impl fmt::Display for AllocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "alloc{}", self.0)
    }
}

/// `{ id, byte-size, dtype }`. Unique within a recipe.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MemAlloc {
    pub id: AllocId,
    pub byte_size: u64,
    pub dtype: TypeName,
}

/// Where a manikin's elements physically live.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StorageBinding {
    /// An internally planned allocation.
    Internal(AllocId),
    /// An externally owned variable (the caller manages its lifetime).
    External(VarSpec),
}

/// A logical tensor descriptor: shape, strides, offset (all in elements),
/// dtype, and a storage binding. Carries no bytes.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Manikin {
    pub shape: Shape,
    pub strides: Vec<i64>,
    pub offset: u64,
    pub dtype: TypeName,
    pub storage: StorageBinding,
}

impl Manikin {
    /// A fresh row-major (C-contiguous) manikin backed by a new internal
    /// allocation, given already-resolved (numeric) dims.
    pub fn contiguous(shape: Shape, dims: &[u64], dtype: TypeName, alloc: AllocId) -> Self {
        let strides = row_major_strides(dims);
        Manikin {
            shape,
            strides,
            offset: 0,
            dtype,
            storage: StorageBinding::Internal(alloc),
        }
    }

    pub fn external(shape: Shape, dims: &[u64], dtype: TypeName, var: VarSpec) -> Self {
        let strides = row_major_strides(dims);
        Manikin {
            shape,
            strides,
            offset: 0,
            dtype,
            storage: StorageBinding::External(var),
        }
    }

    /// A view sharing the same storage with a new shape/strides/offset
    /// (used by `Reshape`/`DoBroadcast`/`SwapDim`/`Subtensor`, which emit
    /// no primitive op — only the manikin changes).
    pub fn view(&self, shape: Shape, strides: Vec<i64>, offset: u64) -> Self {
        Manikin {
            shape,
            strides,
            offset,
            dtype: self.dtype,
            storage: self.storage.clone(),
        }
    }

    pub fn byte_size(&self, num_elements: u64) -> u64 {
        num_elements * self.dtype.byte_size()
    }
}

fn row_major_strides(dims: &[u64]) -> Vec<i64> {
    let mut strides = vec![0i64; dims.len()];
    let mut acc: i64 = 1;
    for i in (0..dims.len()).rev() {
        strides[i] = acc;
        acc *= dims[i] as i64;
    }
    strides
}
