//! Determinism and convention-mapping properties.
//!
//! The artifact must be a pure function of the input list: same sources in
//! the same order, byte-identical image. The convention resolver must map C
//! parameters one to one and append Fortran hidden lengths in declaration
//! order, for any parameter list.

use gimbal::abi::{ParamOrigin, PassingMode};
use gimbal::ir::IrDecl;
use gimbal::{
    AbiOptions, CallingConvention, CompileOptions, IrType, PackageCompiler,
    ReferenceMethodTable, SourceLanguage, TextFrontEnd, VmType,
};
use proptest::prelude::*;
use std::path::PathBuf;

const SOURCES: [(&str, &str); 2] = [
    (
        "a.c",
        r#"
        double clamp (double v, double lo, double hi)
        {
          <bb 2>:
            if (v < lo) goto <bb 3>; else goto <bb 4>;

          <bb 3>:
            return lo;

          <bb 4>:
            if (v > hi) goto <bb 5>; else goto <bb 6>;

          <bb 5>:
            return hi;

          <bb 6>:
            return v;
        }
        "#,
    ),
    (
        "b.f",
        r#"
        double half (double a)
        {
          double r;

          <bb 2>:
            r = a / 2.0;
            return r;
        }
        "#,
    ),
];

fn build_image() -> Vec<u8> {
    let mut front_end = TextFrontEnd::new();
    for (path, text) in SOURCES {
        front_end.insert(path, text);
    }
    let table = ReferenceMethodTable::standard();
    let compiler = PackageCompiler::new(&front_end, &table, CompileOptions::new("det", "out"));
    let (unit, _) = compiler
        .compile_unit(&[PathBuf::from("a.c"), PathBuf::from("b.f")])
        .unwrap();
    unit.to_bytes()
}

#[test]
fn test_identical_inputs_identical_bytes() {
    let first = build_image();
    for _ in 0..3 {
        assert_eq!(build_image(), first);
    }
}

#[test]
fn test_input_order_changes_bytes() {
    let mut front_end = TextFrontEnd::new();
    for (path, text) in SOURCES {
        front_end.insert(path, text);
    }
    let table = ReferenceMethodTable::standard();
    let compiler = PackageCompiler::new(&front_end, &table, CompileOptions::new("det", "out"));
    let (reversed, _) = compiler
        .compile_unit(&[PathBuf::from("b.f"), PathBuf::from("a.c")])
        .unwrap();
    // Method order follows input order, so the image differs.
    assert_ne!(reversed.to_bytes(), build_image());
    assert_eq!(reversed.methods[0].name, "half");
}

fn scalar_type() -> impl Strategy<Value = IrType> {
    prop_oneof![
        Just(IrType::int32()),
        Just(IrType::int64()),
        Just(IrType::double()),
        Just(IrType::Float { width: 32 }),
    ]
}

fn param_type() -> impl Strategy<Value = IrType> {
    prop_oneof![
        scalar_type(),
        scalar_type().prop_map(|t| IrType::Pointer(Box::new(t))),
        Just(IrType::Pointer(Box::new(IrType::char8()))),
    ]
}

fn params() -> impl Strategy<Value = Vec<IrDecl>> {
    prop::collection::vec(param_type(), 0..8).prop_map(|types| {
        types
            .into_iter()
            .enumerate()
            .map(|(i, ty)| IrDecl::new(format!("p{i}"), ty))
            .collect()
    })
}

proptest! {
    #[test]
    fn prop_c_parameters_map_one_to_one(params in params()) {
        let cc = CallingConvention::resolve(
            "f",
            &params,
            &IrType::Void,
            SourceLanguage::C,
            &AbiOptions::default(),
        )
        .unwrap();
        prop_assert_eq!(cc.params.len(), params.len());
        for (target, decl) in cc.params.iter().zip(&params) {
            prop_assert_eq!(&target.name, &decl.name);
            if decl.ty.is_scalar() {
                prop_assert_eq!(target.mode, PassingMode::Value);
            } else {
                prop_assert_eq!(target.mode, PassingMode::Reference);
                prop_assert_eq!(target.vm_type, VmType::Ref);
            }
        }
    }

    #[test]
    fn prop_fortran_hidden_lengths_follow_declaration_order(params in params()) {
        let cc = CallingConvention::resolve(
            "f",
            &params,
            &IrType::Void,
            SourceLanguage::Fortran,
            &AbiOptions::default(),
        )
        .unwrap();
        let string_indices: Vec<usize> = params
            .iter()
            .enumerate()
            .filter(|(_, d)| d.ty.is_char_sequence())
            .map(|(i, _)| i)
            .collect();
        prop_assert_eq!(cc.params.len(), params.len() + string_indices.len());

        // Declared parameters first, hidden lengths after, in declaration
        // order of the string arguments they describe.
        let hidden: Vec<usize> = cc.params[params.len()..]
            .iter()
            .map(|p| match p.origin {
                ParamOrigin::HiddenLength(i) => i,
                ParamOrigin::Declared(_) => panic!("declared param after hidden ones"),
            })
            .collect();
        prop_assert_eq!(&hidden, &string_indices);
        for p in &cc.params[params.len()..] {
            prop_assert_eq!(p.vm_type, VmType::I64);
            prop_assert_eq!(p.mode, PassingMode::Value);
        }
    }

    #[test]
    fn prop_resolution_is_deterministic(params in params()) {
        let resolve = || {
            CallingConvention::resolve(
                "f",
                &params,
                &IrType::double(),
                SourceLanguage::Fortran,
                &AbiOptions::default(),
            )
            .unwrap()
        };
        prop_assert_eq!(resolve(), resolve());
    }
}
