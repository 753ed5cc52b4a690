//! Element dtype identifiers.
//!
//! An opaque identifier for a tensor's element type. Every expression in
//! the graph carries exactly one [`TypeName`]; it never participates in
//! shape arithmetic.

use std::fmt;

/// The element dtype of a tensor expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TypeName {
    Single,
    Double,
    Int32,
    Int64,
    Bool,
}

impl TypeName {
    /// Size in bytes of one element of this dtype.
    pub fn byte_size(self) -> u64 {
        match self {
            TypeName::Single => 4,
            TypeName::Double => 8,
            TypeName::Int32 => 4,
            TypeName::Int64 => 8,
            TypeName::Bool => 1,
        }
    }

    /// The C++ type name used in generated kernel/host source.
    pub fn cpp_name(self) -> &'static str {
        match self {
            TypeName::Single => "float",
            TypeName::Double => "double",
            TypeName::Int32 => "int32_t",
            TypeName::Int64 => "int64_t",
            TypeName::Bool => "bool",
        }
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cpp_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_sizes() {
        assert_eq!(TypeName::Single.byte_size(), 4);
        assert_eq!(TypeName::Double.byte_size(), 8);
        assert_eq!(TypeName::Bool.byte_size(), 1);
    }
}
