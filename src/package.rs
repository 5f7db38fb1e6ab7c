//! Package compilation
//!
//! The outermost surface: take a package's native source files, run the
//! front end and the IR parser over each, and generate one class image for
//! the whole package. Per-file lowering and parsing run in parallel, but
//! results are collected back in input order before generation, so the
//! emitted method order (and therefore the artifact bytes) depend only on
//! the input list.
//!
//! Failures never persist partial output: the image is built fully in
//! memory and written in one step at the end.

use crate::abi::{AbiOptions, SourceLanguage};
use crate::codegen::{generate_package, CompiledUnit};
use crate::error::{Error, Result};
use crate::frontend::FrontEnd;
use crate::ir::{parse_unit, IrUnit};
use crate::table::ReferenceMethodTable;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Options for one package compile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileOptions {
    /// Package name; segments separated by dots
    pub package_name: String,
    /// Directory receiving the class image
    pub output_dir: PathBuf,
    /// Calling-convention options
    #[serde(default)]
    pub abi: AbiOptions,
}

impl CompileOptions {
    /// Options for a package writing into `output_dir`
    pub fn new(package_name: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            package_name: package_name.into(),
            output_dir: output_dir.into(),
            abi: AbiOptions::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.package_name.is_empty() {
            return Err(Error::InvalidConfig("package name is empty".to_string()));
        }
        let valid_segment = |s: &str| {
            !s.is_empty()
                && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !s.starts_with(|c: char| c.is_ascii_digit())
        };
        if !self.package_name.split('.').all(valid_segment) {
            return Err(Error::InvalidConfig(format!(
                "invalid package name '{}'",
                self.package_name
            )));
        }
        Ok(())
    }

    /// Class name the package compiles to: the lower-cased package path
    /// qualified by the proper-cased last segment.
    ///
    /// `"survival"` becomes `survival.Survival`; `"My.Stats"` becomes
    /// `my.stats.Stats`.
    pub fn class_name(&self) -> String {
        let path = self.package_name.to_ascii_lowercase();
        let last = path.rsplit('.').next().unwrap_or(&path);
        format!("{}.{}", path, proper_case(last))
    }
}

fn proper_case(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
    }
}

/// Result summary of a package compile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileSummary {
    /// Package name as configured
    pub package: String,
    /// Emitted class name
    pub class: String,
    /// Source files compiled
    pub sources_compiled: usize,
    /// Inputs skipped for having no recognized extension
    pub sources_skipped: usize,
    /// Methods in the artifact
    pub methods: usize,
    /// Globals in the artifact
    pub globals: usize,
    /// Path the image was written to
    pub artifact_path: PathBuf,
    /// Image size in bytes
    pub artifact_bytes: usize,
}

/// Compiles one package of native sources to a class image
pub struct PackageCompiler<'a, F> {
    front_end: &'a F,
    table: &'a ReferenceMethodTable,
    options: CompileOptions,
}

impl<'a, F: FrontEnd + Sync> PackageCompiler<'a, F> {
    /// Build a compiler over a front end and a runtime method table
    pub fn new(front_end: &'a F, table: &'a ReferenceMethodTable, options: CompileOptions) -> Self {
        Self {
            front_end,
            table,
            options,
        }
    }

    /// Compile `sources` and write the class image
    pub fn compile(&self, sources: &[PathBuf]) -> Result<CompileSummary> {
        let (unit, skipped) = self.compile_unit(sources)?;
        let bytes = unit.to_bytes();

        std::fs::create_dir_all(&self.options.output_dir).map_err(|e| Error::Io {
            path: self.options.output_dir.display().to_string(),
            reason: e.to_string(),
        })?;
        let artifact_path = self
            .options
            .output_dir
            .join(format!("{}.gmbc", unit.name));
        std::fs::write(&artifact_path, &bytes).map_err(|e| Error::Io {
            path: artifact_path.display().to_string(),
            reason: e.to_string(),
        })?;

        let summary = CompileSummary {
            package: self.options.package_name.clone(),
            class: unit.name.clone(),
            sources_compiled: sources.len() - skipped,
            sources_skipped: skipped,
            methods: unit.methods.len(),
            globals: unit.globals.len(),
            artifact_path,
            artifact_bytes: bytes.len(),
        };
        info!(
            class = %summary.class,
            sources = summary.sources_compiled,
            methods = summary.methods,
            bytes = summary.artifact_bytes,
            "package compiled"
        );
        Ok(summary)
    }

    /// Compile `sources` to an in-memory unit without touching the
    /// filesystem. Returns the unit and the count of skipped inputs.
    pub fn compile_unit(&self, sources: &[PathBuf]) -> Result<(CompiledUnit, usize)> {
        self.options.validate()?;
        let class = self.options.class_name();

        let recognized: Vec<(&Path, SourceLanguage)> = sources
            .iter()
            .filter_map(|p| {
                let language = SourceLanguage::from_path(p);
                if language.is_none() {
                    debug!(file = %p.display(), "skipping unrecognized source");
                }
                language.map(|l| (p.as_path(), l))
            })
            .collect();
        let skipped = sources.len() - recognized.len();

        // Lowering and parsing are per-file and independent; generation is
        // the synchronization point and sees files in input order.
        let parsed: Vec<(IrUnit, SourceLanguage)> = recognized
            .par_iter()
            .map(|(path, language)| {
                let dump = self.front_end.lower(path)?;
                let unit = parse_unit(&dump)?;
                Ok((unit, *language))
            })
            .collect::<Result<Vec<_>>>()?;

        let parts: Vec<(&IrUnit, SourceLanguage)> =
            parsed.iter().map(|(u, l)| (u, *l)).collect();
        let unit = generate_package(&class, &parts, &self.options.abi, self.table)?;
        Ok((unit, skipped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::TextFrontEnd;

    #[test]
    fn test_class_naming() {
        let o = CompileOptions::new("survival", "out");
        assert_eq!(o.class_name(), "survival.Survival");
        let o = CompileOptions::new("My.Stats", "out");
        assert_eq!(o.class_name(), "my.stats.Stats");
    }

    #[test]
    fn test_empty_package_name_is_invalid() {
        let o = CompileOptions::new("", "out");
        assert!(matches!(o.validate(), Err(Error::InvalidConfig(_))));
        let o = CompileOptions::new("1bad", "out");
        assert!(matches!(o.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_no_recognized_sources_yields_empty_unit() {
        let fe = TextFrontEnd::new();
        let table = ReferenceMethodTable::standard();
        let compiler =
            PackageCompiler::new(&fe, &table, CompileOptions::new("empty", "out"));
        let (unit, skipped) = compiler
            .compile_unit(&[PathBuf::from("README.md"), PathBuf::from("data.rds")])
            .unwrap();
        assert_eq!(skipped, 2);
        assert!(unit.methods.is_empty());
        assert!(unit.globals.is_empty());
        assert_eq!(unit.name, "empty.Empty");
    }

    #[test]
    fn test_mixed_language_package_compiles_to_one_class() {
        let fe = TextFrontEnd::new()
            .with(
                "src/cpart.c",
                r#"
                double twice (double x)
                {
                  double r;

                  <bb 2>:
                    r = x * 2.0;
                    return r;
                }
                "#,
            )
            .with(
                "src/fpart.f",
                r#"
                double fscale (double a)
                {
                  <bb 2>:
                    return a;
                }
                "#,
            );
        let table = ReferenceMethodTable::standard();
        let compiler =
            PackageCompiler::new(&fe, &table, CompileOptions::new("mix", "out"));
        let (unit, skipped) = compiler
            .compile_unit(&[PathBuf::from("src/cpart.c"), PathBuf::from("src/fpart.f")])
            .unwrap();
        assert_eq!(skipped, 0);
        assert_eq!(unit.methods.len(), 2);
        // C scalars pass by value, Fortran scalars by reference.
        use crate::codegen::VmType;
        assert_eq!(unit.method("twice").unwrap().signature.params, vec![VmType::F64]);
        assert_eq!(unit.method("fscale").unwrap().signature.params, vec![VmType::Ref]);
    }

    #[test]
    fn test_front_end_failure_aborts_compile() {
        let fe = TextFrontEnd::new();
        let table = ReferenceMethodTable::standard();
        let compiler =
            PackageCompiler::new(&fe, &table, CompileOptions::new("gone", "out"));
        let err = compiler
            .compile_unit(&[PathBuf::from("missing.c")])
            .unwrap_err();
        assert!(matches!(err, Error::FrontEndFailure { .. }));
    }
}
