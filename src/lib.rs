//! # Gimbal - Native Extension Compiler for a Managed Runtime
//!
//! Gimbal compiles the C and Fortran native sources of statistical-language
//! packages into class images for a managed, garbage-collected runtime. The
//! native code never runs as machine code: a front end lowers each source
//! file to a textual IR dump, gimbal parses the dump, resolves each
//! function's calling convention, and generates target methods over an
//! emulated memory model with no raw pointers.
//!
//! ## Pipeline
//!
//! ```text
//! Native Source → Front End → IR Dump → Parser → IrUnit
//!                                                  │ CallingConvention::resolve
//!                                                  ▼
//!                               CompiledUnit ← Code Generator ← ReferenceMethodTable
//!                                    │
//!                                    ▼
//!                               Class Image (bytes)
//! ```
//!
//! ### Main Components
//!
//! - [`IrParser`] - Parses the front end's lowered dump into an [`IrUnit`]
//! - [`CallingConvention`] - Maps C and Fortran signatures onto target
//!   signatures (C passes scalars by value; Fortran passes everything by
//!   reference and appends hidden lengths for character arguments)
//! - [`ReferenceMethodTable`] - The closed runtime API surface calls may
//!   link against
//! - [`PackageCompiler`] - Drives the whole pipeline for one package and
//!   writes the class image
//!
//! ## Quick Start
//!
//! Compile a pre-lowered dump and execute the generated method with the
//! built-in reference interpreter:
//!
//! ```rust
//! use gimbal::codegen::interp::{Machine, VmValue};
//! use gimbal::{CompileOptions, PackageCompiler, ReferenceMethodTable, TextFrontEnd};
//! use std::path::PathBuf;
//!
//! # fn main() -> gimbal::Result<()> {
//! let front_end = TextFrontEnd::new().with(
//!     "norm.c",
//!     r#"
//!     double sumsq (double * x, int n)
//!     {
//!       double s;
//!       double t;
//!       int i;
//!
//!       <bb 2>:
//!         s = 0.0;
//!         i = 0;
//!         goto <bb 4>;
//!
//!       <bb 3>:
//!         t = x[i] * x[i];
//!         s = s + t;
//!         i = i + 1;
//!         goto <bb 4>;
//!
//!       <bb 4>:
//!         if (i < n) goto <bb 3>; else goto <bb 5>;
//!
//!       <bb 5>:
//!         return s;
//!     }
//!     "#,
//! );
//!
//! let table = ReferenceMethodTable::standard();
//! let options = CompileOptions::new("norm", "target/norm");
//! let compiler = PackageCompiler::new(&front_end, &table, options);
//! let (unit, _skipped) = compiler.compile_unit(&[PathBuf::from("norm.c")])?;
//!
//! let mut machine = Machine::new(&unit);
//! let x = machine.alloc_f64(&[3.0, 4.0]);
//! let result = machine.call("sumsq", &[x, VmValue::I(2)]).unwrap();
//! assert_eq!(result, Some(VmValue::F(25.0)));
//! # Ok(())
//! # }
//! ```
//!
//! ## Memory Model
//!
//! Emulated native memory is built from bounds-tracked regions. A pointer
//! value is a (region, offset) pair; pointer arithmetic is offset
//! arithmetic within the region, and every dereference is a bounds-checked
//! element access. Two pointers derived from the same array alias the same
//! region, so writes through one are visible through the other, while an
//! out-of-bounds access raises a runtime trap instead of corrupting memory.
//!
//! ## Linking
//!
//! Generated code may call other functions of the same package and the
//! methods of the [`ReferenceMethodTable`] - nothing else. The table is a
//! fixed, versioned set; a call to any symbol outside it fails the compile
//! with [`Error::UnresolvedCallee`] rather than producing an artifact that
//! traps at run time.

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod abi;
pub mod codegen;
pub mod error;
pub mod frontend;
pub mod ir;
pub mod package;
pub mod table;

// Re-export main types for convenience
pub use abi::{AbiOptions, CallingConvention, PassingMode, SourceLanguage, TargetParam};
pub use codegen::{generate_package, generate_unit, CompiledUnit, MethodCode, VmType};
pub use error::{Error, Result};
pub use frontend::{FrontEnd, GccFrontEnd, TextFrontEnd};
pub use ir::{parse_unit, IrFunction, IrParser, IrType, IrUnit};
pub use package::{CompileOptions, CompileSummary, PackageCompiler};
pub use table::{ReferenceMethodTable, RuntimeMethod};
