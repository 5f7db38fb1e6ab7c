//! IR expressions, statements and control transfers
//!
//! The dialect is three-address form: a statement's right-hand side is at
//! most one operation over simple operands, and comparisons appear only in
//! conditional transfers. Expression nodes still form small trees because
//! operands may be dereferences, element accesses or address-of forms.

use super::types::IrType;

/// Binary operations, typed by the operand width and signedness recorded in
/// the enclosing [`IrExpr::Binary`] node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// Addition
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
    /// Division (signedness-exact for integers)
    Div,
    /// Remainder
    Rem,
    /// Bitwise AND
    And,
    /// Bitwise OR
    Or,
    /// Bitwise XOR
    Xor,
    /// Left shift
    Shl,
    /// Right shift (arithmetic for signed, logical for unsigned)
    Shr,
}

/// Unary operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Arithmetic negation
    Neg,
    /// Bitwise complement
    BitNot,
    /// Logical negation (result 0 or 1)
    Not,
}

/// Comparison operators, used by conditional transfers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// Equal
    Eq,
    /// Not equal
    Ne,
    /// Less than
    Lt,
    /// Less than or equal
    Le,
    /// Greater than
    Gt,
    /// Greater than or equal
    Ge,
}

/// A typed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum IrExpr {
    /// Integer literal; adopts the width of its use site
    IntConst(i64),
    /// Floating-point literal
    FloatConst(f64),
    /// String literal (becomes a read-only character region)
    StrConst(String),
    /// Reference to a declared parameter, local or global
    Var(String),
    /// Pointer dereference `*p`
    Deref(Box<IrExpr>),
    /// Address-of `&x` or `&a[i]`
    AddrOf(Box<IrExpr>),
    /// Element access `a[i]`
    Index {
        /// Array or pointer operand
        base: Box<IrExpr>,
        /// Element index
        index: Box<IrExpr>,
    },
    /// Record field access; the cell offset is resolved at parse time
    Field {
        /// Record operand (or pointer to record for `->`)
        base: Box<IrExpr>,
        /// Field name, kept for diagnostics
        field: String,
        /// Flattened cell offset of the field within the record
        offset: usize,
        /// Field type
        ty: IrType,
    },
    /// Unary operation at a declared type
    Unary {
        /// Operator
        op: UnaryOp,
        /// Operand type, which is also the result type
        ty: IrType,
        /// Operand
        operand: Box<IrExpr>,
    },
    /// Binary operation at a declared type
    Binary {
        /// Operator
        op: BinOp,
        /// Operand type, which is also the result type
        ty: IrType,
        /// Left operand
        lhs: Box<IrExpr>,
        /// Right operand
        rhs: Box<IrExpr>,
    },
    /// Explicit conversion; the only place narrowing or widening happens
    Cast {
        /// Target type
        to: IrType,
        /// Operand
        value: Box<IrExpr>,
    },
    /// Call in expression position (always the whole right-hand side)
    Call {
        /// Callee symbol
        callee: String,
        /// Argument list
        args: Vec<IrExpr>,
    },
}

/// A straight-line statement; never transfers control
#[derive(Debug, Clone, PartialEq)]
pub enum IrStatement {
    /// `lvalue = rhs`
    Assign {
        /// Assignment target: Var, Deref, Index or Field
        target: IrExpr,
        /// Right-hand side
        value: IrExpr,
    },
    /// Call whose result, if any, is discarded
    Call {
        /// Callee symbol
        callee: String,
        /// Argument list
        args: Vec<IrExpr>,
    },
}

/// Control transfer ending a basic block; exactly one per block
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    /// Unconditional jump
    Goto(u32),
    /// Two-way conditional branch
    CondGoto {
        /// Left comparison operand
        lhs: IrExpr,
        /// Comparison operator
        cmp: CmpOp,
        /// Right comparison operand
        rhs: IrExpr,
        /// Successor when the comparison holds
        then_block: u32,
        /// Successor otherwise
        else_block: u32,
    },
    /// Multi-way switch on an integer operand
    Switch {
        /// Scrutinee
        value: IrExpr,
        /// (case value, successor) pairs
        cases: Vec<(i64, u32)>,
        /// Default successor
        default: u32,
    },
    /// Return, with optional value
    Return(Option<IrExpr>),
}

impl Terminator {
    /// Successor block ids named by this transfer, in emission order
    pub fn successors(&self) -> Vec<u32> {
        match self {
            Terminator::Goto(b) => vec![*b],
            Terminator::CondGoto {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            Terminator::Switch { cases, default, .. } => {
                let mut out: Vec<u32> = cases.iter().map(|(_, b)| *b).collect();
                out.push(*default);
                out
            }
            Terminator::Return(_) => Vec::new(),
        }
    }
}
