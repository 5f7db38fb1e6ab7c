//! Calling-convention resolution
//!
//! Maps a native function's declared signature onto the target method's
//! parameter list. All per-language ABI knowledge lives here, behind one
//! resolver function over a closed set of language variants; the generator
//! never branches on the source language itself.

use crate::codegen::method::VmType;
use crate::error::{Error, Result};
use crate::ir::{IrDecl, IrType};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Source language of a native file, a closed set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceLanguage {
    /// C sources (`.c`)
    C,
    /// Fortran sources (`.f`, `.f77`, `.for`)
    Fortran,
}

impl SourceLanguage {
    /// Resolve a language from an explicit tag
    ///
    /// Unknown tags fail immediately; there is no silent default.
    pub fn from_tag(tag: &str, file: &str) -> Result<Self> {
        match tag {
            "c" => Ok(SourceLanguage::C),
            "fortran" | "f77" => Ok(SourceLanguage::Fortran),
            other => Err(Error::UnknownLanguage {
                file: file.to_string(),
                tag: other.to_string(),
            }),
        }
    }

    /// Resolve a language from a file's extension, or `None` for files that
    /// are not native sources at all (those are ignored upstream)
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "c" => Some(SourceLanguage::C),
            "f" | "f77" | "for" => Some(SourceLanguage::Fortran),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceLanguage::C => write!(f, "c"),
            SourceLanguage::Fortran => write!(f, "fortran"),
        }
    }
}

/// How a target parameter receives its native counterpart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassingMode {
    /// Passed as a plain value in a slot
    Value,
    /// Passed as a managed reference (bounds-tracked region); scalars at a
    /// by-reference boundary arrive as one-element regions
    Reference,
}

/// Provenance of a target parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamOrigin {
    /// Maps 1:1 to the native parameter at this declaration index
    Declared(usize),
    /// ABI-injected hidden length for the string parameter at this index
    HiddenLength(usize),
}

/// One parameter of the resolved target signature
#[derive(Debug, Clone, PartialEq)]
pub struct TargetParam {
    /// Parameter name in the emitted method
    pub name: String,
    /// Slot type in the target method
    pub vm_type: VmType,
    /// Passing mode
    pub mode: PassingMode,
    /// Where this parameter came from
    pub origin: ParamOrigin,
}

/// Resolver knobs for front-end lowering variations
///
/// The exact boundary rule for Fortran scalars depends on the front end's
/// lowering; it is configuration rather than a hard-coded assumption.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AbiOptions {
    /// Pass Fortran scalar arguments by value instead of by reference, for
    /// front ends that de-reference scalars before the dump
    pub fortran_scalar_by_value: bool,
}

/// A function's resolved calling convention
///
/// Pure data: identical (signature, language) inputs always resolve to an
/// identical convention.
#[derive(Debug, Clone, PartialEq)]
pub struct CallingConvention {
    /// Originating language
    pub language: SourceLanguage,
    /// Ordered target parameters, hidden ones after all declared ones
    pub params: Vec<TargetParam>,
    /// Target return type, `None` for void
    pub return_type: Option<VmType>,
}

impl CallingConvention {
    /// Resolve the convention for one function declaration
    pub fn resolve(
        name: &str,
        params: &[IrDecl],
        return_type: &IrType,
        language: SourceLanguage,
        options: &AbiOptions,
    ) -> Result<Self> {
        let mut out = Vec::with_capacity(params.len());
        let mut hidden = Vec::new();

        for (index, param) in params.iter().enumerate() {
            let target = match language {
                SourceLanguage::C => resolve_c_param(name, param, index)?,
                SourceLanguage::Fortran => {
                    if param.ty.is_char_sequence() {
                        // Fortran character arguments lower to a pointer plus
                        // a trailing hidden length, appended after all
                        // declared arguments in declaration order.
                        hidden.push(TargetParam {
                            name: format!("{}_len", param.name),
                            vm_type: VmType::I64,
                            mode: PassingMode::Value,
                            origin: ParamOrigin::HiddenLength(index),
                        });
                    }
                    resolve_fortran_param(name, param, index, options)?
                }
            };
            out.push(target);
        }
        out.extend(hidden);

        let return_type = resolve_return(name, return_type)?;
        Ok(CallingConvention {
            language,
            params: out,
            return_type,
        })
    }

    /// Target parameter types in order
    pub fn param_types(&self) -> Vec<VmType> {
        self.params.iter().map(|p| p.vm_type).collect()
    }
}

fn resolve_c_param(function: &str, param: &IrDecl, index: usize) -> Result<TargetParam> {
    let (vm_type, mode) = match &param.ty {
        ty if ty.is_scalar() => (VmType::scalar(ty), PassingMode::Value),
        IrType::Pointer(_) | IrType::Array { .. } => (VmType::Ref, PassingMode::Reference),
        other => {
            return Err(Error::ConventionFailure {
                function: function.to_string(),
                param: param.name.clone(),
                reason: format!("type {} cannot cross the native boundary by value", other),
            })
        }
    };
    Ok(TargetParam {
        name: param.name.clone(),
        vm_type,
        mode,
        origin: ParamOrigin::Declared(index),
    })
}

fn resolve_fortran_param(
    function: &str,
    param: &IrDecl,
    index: usize,
    options: &AbiOptions,
) -> Result<TargetParam> {
    let (vm_type, mode) = match &param.ty {
        ty if ty.is_scalar() => {
            if options.fortran_scalar_by_value {
                (VmType::scalar(ty), PassingMode::Value)
            } else {
                // Scalars cross the boundary as one-element containers.
                (VmType::Ref, PassingMode::Reference)
            }
        }
        IrType::Pointer(_) | IrType::Array { .. } => (VmType::Ref, PassingMode::Reference),
        other => {
            return Err(Error::ConventionFailure {
                function: function.to_string(),
                param: param.name.clone(),
                reason: format!("type {} has no Fortran boundary representation", other),
            })
        }
    };
    Ok(TargetParam {
        name: param.name.clone(),
        vm_type,
        mode,
        origin: ParamOrigin::Declared(index),
    })
}

fn resolve_return(function: &str, ty: &IrType) -> Result<Option<VmType>> {
    match ty {
        IrType::Void => Ok(None),
        ty if ty.is_scalar() => Ok(Some(VmType::scalar(ty))),
        IrType::Pointer(_) => Ok(Some(VmType::Ref)),
        other => Err(Error::ConventionFailure {
            function: function.to_string(),
            param: "<return>".to_string(),
            reason: format!("return type {} is not supported", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IrDecl;

    fn decl(name: &str, ty: IrType) -> IrDecl {
        IrDecl::new(name, ty)
    }

    #[test]
    fn test_c_parameters_map_one_to_one() {
        let params = vec![
            decl("n", IrType::int32()),
            decl("x", IrType::Pointer(Box::new(IrType::double()))),
            decl("w", IrType::double()),
        ];
        let cc = CallingConvention::resolve(
            "dsum",
            &params,
            &IrType::double(),
            SourceLanguage::C,
            &AbiOptions::default(),
        )
        .unwrap();

        assert_eq!(cc.params.len(), 3);
        assert_eq!(cc.params[0].mode, PassingMode::Value);
        assert_eq!(cc.params[0].vm_type, VmType::I32);
        assert_eq!(cc.params[1].mode, PassingMode::Reference);
        assert_eq!(cc.params[1].vm_type, VmType::Ref);
        assert_eq!(cc.params[2].vm_type, VmType::F64);
        assert_eq!(cc.return_type, Some(VmType::F64));
    }

    #[test]
    fn test_fortran_hidden_length_injection() {
        // (a: real, s: character) -> [a by-ref, s by-ref, hidden length of s]
        let params = vec![
            decl("a", IrType::double()),
            decl("s", IrType::Pointer(Box::new(IrType::char8()))),
        ];
        let cc = CallingConvention::resolve(
            "fmsg",
            &params,
            &IrType::Void,
            SourceLanguage::Fortran,
            &AbiOptions::default(),
        )
        .unwrap();

        assert_eq!(cc.params.len(), 3);
        assert_eq!(cc.params[0].mode, PassingMode::Reference);
        assert_eq!(cc.params[0].origin, ParamOrigin::Declared(0));
        assert_eq!(cc.params[1].mode, PassingMode::Reference);
        let hidden = &cc.params[2];
        assert_eq!(hidden.origin, ParamOrigin::HiddenLength(1));
        assert_eq!(hidden.mode, PassingMode::Value);
        assert_eq!(hidden.vm_type, VmType::I64);
        assert_eq!(hidden.name, "s_len");
    }

    #[test]
    fn test_fortran_hidden_lengths_keep_declaration_order() {
        let params = vec![
            decl("s", IrType::Pointer(Box::new(IrType::char8()))),
            decl("n", IrType::int32()),
            decl("t", IrType::Pointer(Box::new(IrType::char8()))),
        ];
        let cc = CallingConvention::resolve(
            "fpaste",
            &params,
            &IrType::Void,
            SourceLanguage::Fortran,
            &AbiOptions::default(),
        )
        .unwrap();

        assert_eq!(cc.params.len(), 5);
        assert_eq!(cc.params[3].origin, ParamOrigin::HiddenLength(0));
        assert_eq!(cc.params[4].origin, ParamOrigin::HiddenLength(2));
    }

    #[test]
    fn test_fortran_scalar_boundary_is_configurable() {
        let params = vec![decl("a", IrType::double())];
        let by_value = AbiOptions {
            fortran_scalar_by_value: true,
        };
        let cc = CallingConvention::resolve(
            "fval",
            &params,
            &IrType::Void,
            SourceLanguage::Fortran,
            &by_value,
        )
        .unwrap();
        assert_eq!(cc.params[0].mode, PassingMode::Value);
        assert_eq!(cc.params[0].vm_type, VmType::F64);
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let err = SourceLanguage::from_tag("ada", "pkg/src/mod.adb").unwrap_err();
        match err {
            Error::UnknownLanguage { file, tag } => {
                assert_eq!(tag, "ada");
                assert!(file.contains("mod.adb"));
            }
            other => panic!("expected UnknownLanguage, got {:?}", other),
        }
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let params = vec![
            decl("s", IrType::Pointer(Box::new(IrType::char8()))),
            decl("n", IrType::int32()),
        ];
        let a = CallingConvention::resolve(
            "f",
            &params,
            &IrType::int32(),
            SourceLanguage::Fortran,
            &AbiOptions::default(),
        )
        .unwrap();
        let b = CallingConvention::resolve(
            "f",
            &params,
            &IrType::int32(),
            SourceLanguage::Fortran,
            &AbiOptions::default(),
        )
        .unwrap();
        assert_eq!(a, b);
    }
}
