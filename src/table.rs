//! Reference method table
//!
//! The closed set of runtime-provided operations that generated code may
//! call by name. The table is resolved at build time: every callee is
//! checked against it during generation, so a missing symbol fails the
//! compile instead of surfacing when the generated code first runs.
//!
//! Built once per compilation unit, read-only afterwards; safe to share
//! across concurrent parse workers without locking.

use crate::codegen::method::{MethodSig, VmType};
use crate::error::{Error, Result};
use lazy_static::lazy_static;
use std::collections::HashMap;

/// A runtime-provided method bound into the table
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeMethod {
    /// Symbol name generated code calls
    pub name: String,
    /// Handle: position in the table, stable for a given surface
    pub index: u16,
    /// Target-level signature
    pub signature: MethodSig,
}

/// The reference method table: symbol name -> bound method handle
#[derive(Debug, Clone)]
pub struct ReferenceMethodTable {
    methods: HashMap<String, RuntimeMethod>,
    /// Names in registration order; gives handles a deterministic meaning
    ordered: Vec<String>,
}

impl ReferenceMethodTable {
    /// Create an empty table (for tests)
    pub fn empty() -> Self {
        Self {
            methods: HashMap::new(),
            ordered: Vec::new(),
        }
    }

    /// Create a table holding the standard runtime API surface
    pub fn standard() -> Self {
        let mut table = Self::empty();
        for (name, sig) in STANDARD_SURFACE.iter() {
            table.register(name, sig.clone());
        }
        table
    }

    /// Register a method; later registrations of the same name are rejected
    /// silently keeping the first, since handles must stay stable
    pub fn register(&mut self, name: &str, signature: MethodSig) {
        if self.methods.contains_key(name) {
            return;
        }
        let index = self.ordered.len() as u16;
        self.ordered.push(name.to_string());
        self.methods.insert(
            name.to_string(),
            RuntimeMethod {
                name: name.to_string(),
                index,
                signature,
            },
        );
    }

    /// Look up a callee; a miss is the caller's hard generation error
    pub fn lookup(&self, name: &str, function: &str) -> Result<&RuntimeMethod> {
        self.methods.get(name).ok_or_else(|| Error::UnresolvedCallee {
            symbol: name.to_string(),
            function: function.to_string(),
        })
    }

    /// Whether the table binds `name`
    pub fn has(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Bound method for a handle, if the handle is valid
    pub fn by_index(&self, index: u16) -> Option<&RuntimeMethod> {
        self.ordered
            .get(index as usize)
            .and_then(|name| self.methods.get(name))
    }

    /// Non-failing lookup by name
    pub fn by_name(&self, name: &str) -> Option<&RuntimeMethod> {
        self.methods.get(name)
    }

    /// Names in handle order
    pub fn names(&self) -> &[String] {
        &self.ordered
    }

    /// Number of bound methods
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

fn unary_f64() -> MethodSig {
    MethodSig::new(vec![VmType::F64], Some(VmType::F64))
}

fn binary_f64() -> MethodSig {
    MethodSig::new(vec![VmType::F64, VmType::F64], Some(VmType::F64))
}

lazy_static! {
    /// The standard runtime API surface: memory, math, and string/array
    /// helpers generated code may rely on. Order is the handle order and is
    /// part of the artifact contract, so entries are only ever appended.
    static ref STANDARD_SURFACE: Vec<(&'static str, MethodSig)> = vec![
        // Memory (allocation granularity is one cell)
        ("malloc", MethodSig::new(vec![VmType::I64], Some(VmType::Ref))),
        ("free", MethodSig::new(vec![VmType::Ref], None)),
        ("memset", MethodSig::new(vec![VmType::Ref, VmType::I32, VmType::I64], None)),
        ("memcpy", MethodSig::new(vec![VmType::Ref, VmType::Ref, VmType::I64], None)),
        ("memcmp", MethodSig::new(vec![VmType::Ref, VmType::Ref, VmType::I64], Some(VmType::I32))),
        // Math
        ("sqrt", unary_f64()),
        ("exp", unary_f64()),
        ("log", unary_f64()),
        ("sin", unary_f64()),
        ("cos", unary_f64()),
        ("tan", unary_f64()),
        ("fabs", unary_f64()),
        ("floor", unary_f64()),
        ("ceil", unary_f64()),
        ("pow", binary_f64()),
        ("fmod", binary_f64()),
        // String/array helpers
        ("strlen", MethodSig::new(vec![VmType::Ref], Some(VmType::I64))),
        ("strcmp", MethodSig::new(vec![VmType::Ref, VmType::Ref], Some(VmType::I32))),
        // Diagnostics routed to the host runtime
        ("rt_error", MethodSig::new(vec![VmType::Ref], None)),
        ("rt_warning", MethodSig::new(vec![VmType::Ref], None)),
        ("rt_print", MethodSig::new(vec![VmType::Ref], None)),
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_surface_lookup() {
        let table = ReferenceMethodTable::standard();
        let sqrt = table.lookup("sqrt", "f").unwrap();
        assert_eq!(sqrt.signature.params, vec![VmType::F64]);
        assert_eq!(sqrt.signature.ret, Some(VmType::F64));
        assert_eq!(table.by_index(sqrt.index).unwrap().name, "sqrt");
    }

    #[test]
    fn test_missing_symbol_names_callee_and_function() {
        let table = ReferenceMethodTable::standard();
        match table.lookup("qsort", "shellsort") {
            Err(Error::UnresolvedCallee { symbol, function }) => {
                assert_eq!(symbol, "qsort");
                assert_eq!(function, "shellsort");
            }
            other => panic!("expected UnresolvedCallee, got {:?}", other),
        }
    }

    #[test]
    fn test_handles_are_stable_across_builds() {
        let a = ReferenceMethodTable::standard();
        let b = ReferenceMethodTable::standard();
        assert_eq!(a.names(), b.names());
        for name in a.names() {
            assert_eq!(
                a.lookup(name, "t").unwrap().index,
                b.lookup(name, "t").unwrap().index
            );
        }
    }

    #[test]
    fn test_duplicate_registration_keeps_first_handle() {
        let mut table = ReferenceMethodTable::empty();
        table.register("sqrt", MethodSig::new(vec![VmType::F64], Some(VmType::F64)));
        table.register("sqrt", MethodSig::new(vec![VmType::F32], Some(VmType::F32)));
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.lookup("sqrt", "t").unwrap().signature.params,
            vec![VmType::F64]
        );
    }
}
