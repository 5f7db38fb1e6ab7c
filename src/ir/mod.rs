//! # Intermediate representation
//!
//! In-memory form of the front end's lowered dump, plus the parser that
//! produces it.
//!
//! ```text
//! ir/
//! ├── mod.rs       # module definition and re-exports
//! ├── types.rs     # IrType (width, signedness, pointers, arrays, records)
//! ├── expr.rs      # expressions, statements, control transfers
//! ├── function.rs  # declarations, basic blocks, functions, per-file units
//! └── parser.rs    # textual dump -> IrUnit
//! ```
//!
//! Functions and their block graphs are produced once by the parser and
//! consumed read-only by the convention resolver and the code generator; no
//! later stage mutates them.

mod expr;
mod function;
pub mod parser;
mod types;

pub use expr::{BinOp, CmpOp, IrExpr, IrStatement, Terminator, UnaryOp};
pub use function::{BasicBlock, GlobalInit, IrDecl, IrFunction, IrGlobal, IrUnit};
pub use parser::{parse_unit, IrParser};
pub use types::IrType;
