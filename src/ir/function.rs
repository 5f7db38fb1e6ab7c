//! Declarations, basic blocks, functions and per-file units

use super::expr::{IrStatement, Terminator};
use super::types::IrType;
use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet};

/// A named declaration: parameter, local, or global
#[derive(Debug, Clone, PartialEq)]
pub struct IrDecl {
    /// Declared name
    pub name: String,
    /// Declared type
    pub ty: IrType,
}

impl IrDecl {
    /// Create a declaration
    pub fn new(name: impl Into<String>, ty: IrType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A global variable with an optional scalar initializer
#[derive(Debug, Clone, PartialEq)]
pub struct IrGlobal {
    /// Declaration
    pub decl: IrDecl,
    /// Initial value for scalar globals (integer bit pattern or float)
    pub init: Option<GlobalInit>,
}

/// Initializer forms accepted for globals
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalInit {
    /// Integer initializer
    Int(i64),
    /// Floating-point initializer
    Float(f64),
    /// String initializer for character arrays
    Str(String),
}

/// A basic block: straight-line statements plus exactly one control transfer
#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    /// Block id, taken from the `<bb N>` label in the dump
    pub id: u32,
    /// Straight-line statements in order
    pub statements: Vec<IrStatement>,
    /// The block's single control transfer, always last
    pub terminator: Terminator,
}

/// A parsed function: signature, declarations, and the block graph
#[derive(Debug, Clone, PartialEq)]
pub struct IrFunction {
    /// Function name
    pub name: String,
    /// Ordered parameter declarations
    pub params: Vec<IrDecl>,
    /// Return type
    pub return_type: IrType,
    /// Local declarations
    pub locals: Vec<IrDecl>,
    /// Basic blocks in dump order
    pub blocks: Vec<BasicBlock>,
    /// Entry block id (the first block in the dump)
    pub entry: u32,
}

impl IrFunction {
    /// Look up a block by id
    pub fn block(&self, id: u32) -> Option<&BasicBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }

    /// Look up a parameter or local declaration by name
    pub fn decl(&self, name: &str) -> Option<&IrDecl> {
        self.params
            .iter()
            .chain(self.locals.iter())
            .find(|d| d.name == name)
    }

    /// Validate the block graph invariants
    ///
    /// Checks that every transfer edge targets an existing block and that
    /// every block is reachable from the entry block. Violations name the
    /// function so the diagnostic is actionable without re-running.
    pub fn validate_graph(&self) -> Result<()> {
        if self.blocks.is_empty() {
            return Err(Error::MalformedGraph {
                function: self.name.clone(),
                message: "function body has no basic blocks".into(),
            });
        }
        let ids: HashSet<u32> = self.blocks.iter().map(|b| b.id).collect();
        if ids.len() != self.blocks.len() {
            return Err(Error::MalformedGraph {
                function: self.name.clone(),
                message: "duplicate block label".into(),
            });
        }
        for block in &self.blocks {
            for succ in block.terminator.successors() {
                if !ids.contains(&succ) {
                    return Err(Error::UnresolvedLabel {
                        label: succ,
                        function: self.name.clone(),
                    });
                }
            }
        }

        // Every block must be reachable from entry.
        let mut reached: HashSet<u32> = HashSet::new();
        let mut stack = vec![self.entry];
        while let Some(id) = stack.pop() {
            if !reached.insert(id) {
                continue;
            }
            if let Some(block) = self.block(id) {
                stack.extend(block.terminator.successors());
            }
        }
        for block in &self.blocks {
            if !reached.contains(&block.id) {
                return Err(Error::MalformedGraph {
                    function: self.name.clone(),
                    message: format!("block <bb {}> is unreachable from entry", block.id),
                });
            }
        }
        Ok(())
    }

    /// Block ids in reverse postorder from the entry block
    ///
    /// Where the graph is acyclic this processes a block after its
    /// predecessors; back edges (loops) are preserved as-is and handled by
    /// the generator's fixup pass.
    pub fn reverse_postorder(&self) -> Vec<u32> {
        let mut visited: HashSet<u32> = HashSet::new();
        let mut order: Vec<u32> = Vec::new();
        self.postorder(self.entry, &mut visited, &mut order);
        order.reverse();
        order
    }

    fn postorder(&self, id: u32, visited: &mut HashSet<u32>, order: &mut Vec<u32>) {
        if !visited.insert(id) {
            return;
        }
        if let Some(block) = self.block(id) {
            for succ in block.terminator.successors() {
                self.postorder(succ, visited, order);
            }
        }
        order.push(id);
    }

    /// Predecessor map of the block graph
    pub fn predecessors(&self) -> HashMap<u32, Vec<u32>> {
        let mut preds: HashMap<u32, Vec<u32>> = HashMap::new();
        for block in &self.blocks {
            for succ in block.terminator.successors() {
                let entry = preds.entry(succ).or_default();
                if !entry.contains(&block.id) {
                    entry.push(block.id);
                }
            }
        }
        preds
    }
}

/// Parse result for one source file's IR dump
///
/// The parser has no cross-file state: units from all files of a package are
/// concatenated by the orchestrator, in input order, before generation.
#[derive(Debug, Clone, Default)]
pub struct IrUnit {
    /// Functions in definition order; empty for declaration-only files
    pub functions: Vec<IrFunction>,
    /// Globals declared in this file
    pub globals: Vec<IrGlobal>,
    /// Record types declared in this file, by tag
    pub records: HashMap<String, IrType>,
}
