//! varspec.rs — Variable specifications and placement (spec §3).

use std::fmt;

use crate::dtype::TypeName;
use crate::shape::Shape;

/// `{ name, shape, dtype }`. Identity is `(name, shape, dtype)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct VarSpec {
    pub name: String,
    pub shape: Shape,
    pub dtype: TypeName,
}

impl VarSpec {
    pub fn new(name: impl Into<String>, shape: Shape, dtype: TypeName) -> Self {
        VarSpec {
            name: name.into(),
            shape,
            dtype,
        }
    }
}

impl fmt::Display for VarSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} {}", self.name, self.shape, self.dtype)
    }
}

/// Where a variable's storage lives at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Placement {
    Host,
    Device,
}
