//! Example: Compile a package of pre-lowered dumps to a class image
//!
//! Usage: cargo run --example compile_unit <package-name> <dump-file>...
//!
//! Each dump file must carry the extension of the language it was lowered
//! from (`.c`, `.f`); the dump text itself is the IR dialect, so no native
//! toolchain is needed.

use anyhow::{bail, Context};
use gimbal::{CompileOptions, PackageCompiler, ReferenceMethodTable, TextFrontEnd};
use std::env;
use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        bail!("usage: cargo run --example compile_unit <package-name> <dump-file>...");
    }
    let package = &args[1];
    let sources: Vec<PathBuf> = args[2..].iter().map(PathBuf::from).collect();

    // Serve the dumps from disk through the in-memory front end.
    let mut front_end = TextFrontEnd::new();
    for source in &sources {
        let text = std::fs::read_to_string(source)
            .with_context(|| format!("reading {}", source.display()))?;
        front_end.insert(source.clone(), text);
    }

    let table = ReferenceMethodTable::standard();
    let options = CompileOptions::new(package.clone(), "target/gimbal-out");
    let compiler = PackageCompiler::new(&front_end, &table, options);
    let summary = compiler.compile(&sources)?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
