//! Example: Inspect a lowered dump
//!
//! Usage: cargo run --example dump_ir <dump-file>
//!
//! Parses the dump, resolves each function's calling convention from the
//! file extension, and prints the resulting target signatures.

use anyhow::{bail, Context};
use gimbal::{AbiOptions, CallingConvention, SourceLanguage};
use std::env;
use std::path::Path;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        bail!("usage: cargo run --example dump_ir <dump-file>");
    }
    let path = Path::new(&args[1]);
    let language = match SourceLanguage::from_path(path) {
        Some(l) => l,
        None => bail!("no recognized source language for {}", path.display()),
    };

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let unit = gimbal::parse_unit(&text)?;

    println!("language: {}", language);
    println!("globals:  {}", unit.globals.len());
    for function in &unit.functions {
        let cc = CallingConvention::resolve(
            &function.name,
            &function.params,
            &function.return_type,
            language,
            &AbiOptions::default(),
        )?;
        let params: Vec<String> = cc
            .params
            .iter()
            .map(|p| format!("{}: {:?} ({:?})", p.name, p.vm_type, p.mode))
            .collect();
        println!(
            "\n{} ({} blocks)\n  -> ({}) -> {:?}",
            function.name,
            function.blocks.len(),
            params.join(", "),
            cc.return_type
        );
    }
    Ok(())
}
