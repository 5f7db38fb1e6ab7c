//! Target method format
//!
//! The managed runtime executes methods over typed slots. There are no raw
//! pointers: reference values carry a (region, offset) pair, and every
//! dereference is a bounds-checked index into the region. Branch targets are
//! instruction indices within the enclosing method, filled in by the
//! generator's fixup pass.

use crate::ir::IrType;
use serde::{Deserialize, Serialize};

/// Slot types of the target method format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VmType {
    /// 32-bit integer
    I32,
    /// 64-bit integer
    I64,
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
    /// Managed reference: a bounds-tracked region plus an element offset
    Ref,
}

impl VmType {
    /// Slot type for a scalar IR type. Narrow integers widen to I32 slots;
    /// arithmetic still happens at the declared width via [`NumTy`].
    pub fn scalar(ty: &IrType) -> VmType {
        match ty {
            IrType::Int { width: 64, .. } => VmType::I64,
            IrType::Int { .. } => VmType::I32,
            IrType::Float { width: 32 } => VmType::F32,
            _ => VmType::F64,
        }
    }

    /// One-byte code used in the artifact encoding
    pub fn code(self) -> u8 {
        match self {
            VmType::I32 => 0,
            VmType::I64 => 1,
            VmType::F32 => 2,
            VmType::F64 => 3,
            VmType::Ref => 4,
        }
    }
}

/// Numeric type of an operation: exact width and signedness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NumTy {
    /// Signed 8-bit
    I8,
    /// Signed 16-bit
    I16,
    /// Signed 32-bit
    I32,
    /// Signed 64-bit
    I64,
    /// Unsigned 8-bit
    U8,
    /// Unsigned 16-bit
    U16,
    /// Unsigned 32-bit
    U32,
    /// Unsigned 64-bit
    U64,
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
}

impl NumTy {
    /// Numeric type of a scalar IR type
    pub fn of(ty: &IrType) -> Option<NumTy> {
        match ty {
            IrType::Int { width: 8, signed: true } => Some(NumTy::I8),
            IrType::Int { width: 16, signed: true } => Some(NumTy::I16),
            IrType::Int { width: 32, signed: true } => Some(NumTy::I32),
            IrType::Int { width: 64, signed: true } => Some(NumTy::I64),
            IrType::Int { width: 8, signed: false } => Some(NumTy::U8),
            IrType::Int { width: 16, signed: false } => Some(NumTy::U16),
            IrType::Int { width: 32, signed: false } => Some(NumTy::U32),
            IrType::Int { width: 64, signed: false } => Some(NumTy::U64),
            IrType::Float { width: 32 } => Some(NumTy::F32),
            IrType::Float { width: 64 } => Some(NumTy::F64),
            _ => None,
        }
    }

    /// True for the floating-point members
    pub fn is_float(self) -> bool {
        matches!(self, NumTy::F32 | NumTy::F64)
    }

    /// True for unsigned integer members
    pub fn is_unsigned(self) -> bool {
        matches!(self, NumTy::U8 | NumTy::U16 | NumTy::U32 | NumTy::U64)
    }

    /// Integer width in bits; 0 for floats
    pub fn int_width(self) -> u32 {
        match self {
            NumTy::I8 | NumTy::U8 => 8,
            NumTy::I16 | NumTy::U16 => 16,
            NumTy::I32 | NumTy::U32 => 32,
            NumTy::I64 | NumTy::U64 => 64,
            NumTy::F32 | NumTy::F64 => 0,
        }
    }

    /// One-byte code used in the artifact encoding
    pub fn code(self) -> u8 {
        match self {
            NumTy::I8 => 0,
            NumTy::I16 => 1,
            NumTy::I32 => 2,
            NumTy::I64 => 3,
            NumTy::U8 => 4,
            NumTy::U16 => 5,
            NumTy::U32 => 6,
            NumTy::U64 => 7,
            NumTy::F32 => 8,
            NumTy::F64 => 9,
        }
    }
}

/// A method-local storage slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slot(pub u16);

/// Binary operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmBinOp {
    /// dst = lhs + rhs
    Add,
    /// dst = lhs - rhs
    Sub,
    /// dst = lhs * rhs
    Mul,
    /// dst = lhs / rhs (signedness-exact)
    Div,
    /// dst = lhs % rhs
    Rem,
    /// dst = lhs & rhs
    And,
    /// dst = lhs | rhs
    Or,
    /// dst = lhs ^ rhs
    Xor,
    /// dst = lhs << rhs
    Shl,
    /// dst = lhs >> rhs (arithmetic for signed, logical for unsigned)
    Shr,
    /// dst = (lhs == rhs) as i32
    CmpEq,
    /// dst = (lhs != rhs) as i32
    CmpNe,
    /// dst = (lhs < rhs) as i32
    CmpLt,
    /// dst = (lhs <= rhs) as i32
    CmpLe,
    /// dst = (lhs > rhs) as i32
    CmpGt,
    /// dst = (lhs >= rhs) as i32
    CmpGe,
}

/// Unary operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmUnOp {
    /// dst = -src
    Neg,
    /// dst = ~src
    BitNot,
    /// dst = (src == 0) as i32
    Not,
}

/// One target instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VmInstruction {
    /// Load integer constant
    ConstI {
        /// Destination slot
        dst: Slot,
        /// Value
        value: i64,
    },
    /// Load float constant
    ConstF {
        /// Destination slot
        dst: Slot,
        /// Value
        value: f64,
    },
    /// Load a reference to the read-only string region at `pool`
    ConstStr {
        /// Destination slot
        dst: Slot,
        /// Index into the unit's string pool
        pool: u16,
    },
    /// Load a null reference
    ConstNull {
        /// Destination slot
        dst: Slot,
    },
    /// Copy a slot
    Move {
        /// Destination slot
        dst: Slot,
        /// Source slot
        src: Slot,
    },
    /// Binary operation at an exact numeric type
    Binary {
        /// Operator
        op: VmBinOp,
        /// Operation width and signedness
        ty: NumTy,
        /// Destination slot
        dst: Slot,
        /// Left operand
        lhs: Slot,
        /// Right operand
        rhs: Slot,
    },
    /// Unary operation at an exact numeric type
    Unary {
        /// Operator
        op: VmUnOp,
        /// Operation width and signedness
        ty: NumTy,
        /// Destination slot
        dst: Slot,
        /// Operand
        src: Slot,
    },
    /// Numeric conversion; emitted only for explicit IR casts
    Convert {
        /// Destination slot
        dst: Slot,
        /// Source slot
        src: Slot,
        /// Source numeric type
        from: NumTy,
        /// Target numeric type
        to: NumTy,
    },
    /// Allocate a fresh zeroed region of `len` cells
    NewRegion {
        /// Destination slot (receives a Ref at offset 0)
        dst: Slot,
        /// Region length in cells
        len: u32,
    },
    /// Load a reference to the unit-level global region `index`
    GlobalRef {
        /// Destination slot
        dst: Slot,
        /// Global index within the unit
        index: u16,
    },
    /// dst = ptr advanced by `delta` elements (same region, new offset)
    PtrAdd {
        /// Destination slot
        dst: Slot,
        /// Reference operand
        ptr: Slot,
        /// Element delta (i64 slot)
        delta: Slot,
    },
    /// Bounds-checked load: dst = region(ptr)[offset(ptr) + index]
    LoadIndex {
        /// Destination slot
        dst: Slot,
        /// Reference operand
        ptr: Slot,
        /// Element index (i64 slot)
        index: Slot,
    },
    /// Bounds-checked store: region(ptr)[offset(ptr) + index] = src
    StoreIndex {
        /// Reference operand
        ptr: Slot,
        /// Element index (i64 slot)
        index: Slot,
        /// Value to store
        src: Slot,
    },
    /// Call a method of the same compiled unit
    CallLocal {
        /// Result slot, if the callee returns a value
        dst: Option<Slot>,
        /// Method index within the unit
        method: u16,
        /// Argument slots
        args: Vec<Slot>,
    },
    /// Call a runtime-provided method through the reference method table
    CallRuntime {
        /// Result slot, if the method returns a value
        dst: Option<Slot>,
        /// Method handle: index in the reference method table
        method: u16,
        /// Argument slots
        args: Vec<Slot>,
    },
    /// Unconditional jump to an instruction index
    Jump {
        /// Target instruction index
        target: usize,
    },
    /// Jump to `target` when the slot is non-zero, fall through otherwise
    BranchIf {
        /// Condition slot (i32, 0 or 1)
        cond: Slot,
        /// Target instruction index
        target: usize,
    },
    /// Multi-way branch on an integer slot
    Switch {
        /// Scrutinee slot
        value: Slot,
        /// (case value, target instruction index) pairs
        cases: Vec<(i64, usize)>,
        /// Default target instruction index
        default: usize,
    },
    /// Return from the method
    Return {
        /// Returned slot, if any
        value: Option<Slot>,
    },
}

/// A runtime or generated method signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSig {
    /// Parameter slot types
    pub params: Vec<VmType>,
    /// Return slot type, `None` for void
    pub ret: Option<VmType>,
}

impl MethodSig {
    /// Build a signature
    pub fn new(params: Vec<VmType>, ret: Option<VmType>) -> Self {
        Self { params, ret }
    }
}

/// One emitted target method
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCode {
    /// Externally callable entry-point name (the native function name)
    pub name: String,
    /// Signature, derived from the resolved calling convention
    pub signature: MethodSig,
    /// Slot types; parameters occupy the first slots in signature order
    pub slots: Vec<VmType>,
    /// Instruction stream
    pub instructions: Vec<VmInstruction>,
}
