//! Type model for the lowered IR
//!
//! Every type used in an expression is fully resolved before code generation
//! begins: the parser resolves record references while reading declarations,
//! so an unresolved forward reference is a parse-time error.

use serde::{Deserialize, Serialize};

/// A fully resolved IR type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IrType {
    /// No value (function returns, void pointers' pointee)
    Void,
    /// Fixed-width integer
    Int {
        /// Bit width: 8, 16, 32 or 64
        width: u8,
        /// Signedness of arithmetic at this type
        signed: bool,
    },
    /// IEEE floating point, 32 or 64 bit
    Float {
        /// Bit width: 32 or 64
        width: u8,
    },
    /// Pointer to a pointee type
    Pointer(Box<IrType>),
    /// Fixed-length array
    Array {
        /// Element type
        element: Box<IrType>,
        /// Number of elements
        length: usize,
    },
    /// Aggregate with named, ordered fields
    Record {
        /// Record tag
        name: String,
        /// Field name/type pairs in declaration order
        fields: Vec<(String, IrType)>,
    },
    /// Function signature (used for declarations only, never for values)
    Function {
        /// Parameter types
        params: Vec<IrType>,
        /// Return type
        ret: Box<IrType>,
    },
}

impl IrType {
    /// 32-bit signed integer, the dialect's `int`
    pub fn int32() -> Self {
        IrType::Int {
            width: 32,
            signed: true,
        }
    }

    /// 64-bit signed integer, the dialect's `long`
    pub fn int64() -> Self {
        IrType::Int {
            width: 64,
            signed: true,
        }
    }

    /// 64-bit float, the dialect's `double`
    pub fn double() -> Self {
        IrType::Float { width: 64 }
    }

    /// 8-bit character type
    pub fn char8() -> Self {
        IrType::Int {
            width: 8,
            signed: true,
        }
    }

    /// True for integer and floating-point types
    pub fn is_scalar(&self) -> bool {
        matches!(self, IrType::Int { .. } | IrType::Float { .. })
    }

    /// True for pointer types
    pub fn is_pointer(&self) -> bool {
        matches!(self, IrType::Pointer(_))
    }

    /// True if a value of this type is a character sequence at the native
    /// boundary: `char*` or an array of `char`. Fortran character arguments
    /// lower to this shape and receive a hidden length parameter.
    pub fn is_char_sequence(&self) -> bool {
        let pointee = match self {
            IrType::Pointer(p) => p.as_ref(),
            IrType::Array { element, .. } => element.as_ref(),
            _ => return false,
        };
        matches!(pointee, IrType::Int { width: 8, .. })
    }

    /// The element type a pointer or array yields when indexed
    pub fn element(&self) -> Option<&IrType> {
        match self {
            IrType::Pointer(p) => Some(p),
            IrType::Array { element, .. } => Some(element),
            _ => None,
        }
    }

    /// Storage size of this type in memory cells
    ///
    /// The target has no raw memory; emulated storage is measured in cells
    /// (one scalar or reference per cell), not bytes. Scalars and pointers
    /// occupy one cell, arrays and records flatten to contiguous cells.
    pub fn cell_count(&self) -> usize {
        match self {
            IrType::Void | IrType::Function { .. } => 0,
            IrType::Int { .. } | IrType::Float { .. } | IrType::Pointer(_) => 1,
            IrType::Array { element, length } => element.cell_count() * length,
            IrType::Record { fields, .. } => {
                fields.iter().map(|(_, ty)| ty.cell_count()).sum()
            }
        }
    }

    /// Cell offset of `field` within a record, with its type
    pub fn field_offset(&self, field: &str) -> Option<(usize, &IrType)> {
        if let IrType::Record { fields, .. } = self {
            let mut offset = 0;
            for (name, ty) in fields {
                if name == field {
                    return Some((offset, ty));
                }
                offset += ty.cell_count();
            }
        }
        None
    }
}

impl std::fmt::Display for IrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IrType::Void => write!(f, "void"),
            IrType::Int { width, signed } => {
                write!(f, "{}int{}", if *signed { "" } else { "u" }, width)
            }
            IrType::Float { width } => write!(f, "float{}", width),
            IrType::Pointer(p) => write!(f, "{} *", p),
            IrType::Array { element, length } => write!(f, "{}[{}]", element, length),
            IrType::Record { name, .. } => write!(f, "struct {}", name),
            IrType::Function { .. } => write!(f, "function"),
        }
    }
}
