//! Code generation: lowered units to target methods
//!
//! Each parsed unit becomes one compiled class: every function that has a
//! body is emitted as a method, globals become unit-level regions, and string
//! literals are interned into a read-only pool. Blocks are walked in reverse
//! postorder and transfers are emitted with provisional targets that a fixup
//! pass rewrites to instruction indices once every block's offset is known.
//!
//! Calls resolve in two steps: a callee defined in the same unit binds to its
//! method index, anything else must appear in the [`ReferenceMethodTable`].
//! There is no fallthrough to ambient symbols; an unknown callee fails the
//! whole unit at generation time rather than at first execution.

pub mod image;
pub mod interp;
pub mod memory;
pub mod method;

pub use memory::{FrameLayout, Storage};
pub use method::{
    MethodCode, MethodSig, NumTy, Slot, VmBinOp, VmInstruction, VmType, VmUnOp,
};

use crate::abi::{AbiOptions, CallingConvention, ParamOrigin, PassingMode, SourceLanguage};
use crate::error::{Error, Result};
use crate::ir::{
    BasicBlock, BinOp, CmpOp, GlobalInit, IrExpr, IrFunction, IrStatement, IrType, IrUnit,
    Terminator, UnaryOp,
};
use crate::table::ReferenceMethodTable;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Initial value of one global cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CellInit {
    /// Integer cell
    I(i64),
    /// Floating-point cell
    F(f64),
}

/// One unit-level global region
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalData {
    /// Declared name
    pub name: String,
    /// Initial cell values; zero-filled beyond any explicit initializer
    pub cells: Vec<CellInit>,
}

/// A fully generated unit: the in-memory form of one target class
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledUnit {
    /// Class name the unit loads under
    pub name: String,
    /// Generated methods, in definition order
    pub methods: Vec<MethodCode>,
    /// Global regions, in declaration order
    pub globals: Vec<GlobalData>,
    /// Read-only string pool, in first-use order
    pub strings: Vec<String>,
    /// Runtime symbols the unit links against, in table order
    pub runtime_symbols: Vec<String>,
}

impl CompiledUnit {
    /// Look up a generated method by name
    pub fn method(&self, name: &str) -> Option<&MethodCode> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// Generate all methods of one unit under one source language
pub fn generate_unit(
    class_name: &str,
    unit: &IrUnit,
    language: SourceLanguage,
    options: &AbiOptions,
    table: &ReferenceMethodTable,
) -> Result<CompiledUnit> {
    generate_package(class_name, &[(unit, language)], options, table)
}

/// Generate one compiled unit from every parsed file of a package
///
/// Files keep their own source language (a package may mix C and Fortran);
/// their functions and globals land in a single class, so names must be
/// unique across the whole package.
pub fn generate_package(
    class_name: &str,
    parts: &[(&IrUnit, SourceLanguage)],
    options: &AbiOptions,
    table: &ReferenceMethodTable,
) -> Result<CompiledUnit> {
    let functions: Vec<(&IrFunction, SourceLanguage)> = parts
        .iter()
        .flat_map(|(unit, language)| unit.functions.iter().map(move |f| (f, *language)))
        .collect();
    debug!(
        class = class_name,
        files = parts.len(),
        functions = functions.len(),
        "generating unit"
    );

    // Globals first: function bodies reference them by index.
    let mut globals = Vec::new();
    let mut global_index: HashMap<String, (u16, bool)> = HashMap::new();
    let mut global_types: HashMap<String, IrType> = HashMap::new();
    for global in parts.iter().flat_map(|(unit, _)| unit.globals.iter()) {
        if global_index.contains_key(&global.decl.name) {
            return Err(Error::NameCollision {
                symbol: global.decl.name.clone(),
                unit: class_name.to_string(),
            });
        }
        let aggregate = !global.decl.ty.is_scalar() && !global.decl.ty.is_pointer();
        global_index.insert(
            global.decl.name.clone(),
            (globals.len() as u16, aggregate),
        );
        global_types.insert(global.decl.name.clone(), global.decl.ty.clone());
        globals.push(global_cells(global)?);
    }

    // Resolve every function's convention before emitting any body, so call
    // sites see complete callee signatures regardless of definition order.
    let mut methods_index: HashMap<String, (u16, CallingConvention)> = HashMap::new();
    let mut conventions = Vec::with_capacity(functions.len());
    for (i, (function, language)) in functions.iter().enumerate() {
        if methods_index.contains_key(&function.name) || global_index.contains_key(&function.name)
        {
            return Err(Error::NameCollision {
                symbol: function.name.clone(),
                unit: class_name.to_string(),
            });
        }
        let cc = CallingConvention::resolve(
            &function.name,
            &function.params,
            &function.return_type,
            *language,
            options,
        )?;
        methods_index.insert(function.name.clone(), (i as u16, cc.clone()));
        conventions.push(cc);
    }

    let mut pool = StringPool::default();
    let mut methods = Vec::with_capacity(functions.len());
    for ((function, _), convention) in functions.iter().zip(&conventions) {
        let emitter = FnEmitter::new(
            function,
            convention,
            &methods_index,
            &global_index,
            &global_types,
            table,
            &mut pool,
        )?;
        let method = emitter.emit()?;
        trace!(
            method = %method.name,
            instructions = method.instructions.len(),
            slots = method.slots.len(),
            "emitted method"
        );
        methods.push(method);
    }

    Ok(CompiledUnit {
        name: class_name.to_string(),
        methods,
        globals,
        strings: pool.strings,
        runtime_symbols: table.names().to_vec(),
    })
}

/// Flatten one global declaration to initialized cells
fn global_cells(global: &crate::ir::IrGlobal) -> Result<GlobalData> {
    let len = global.decl.ty.cell_count().max(1);
    let float_cells = matches!(
        global.decl.ty.element().unwrap_or(&global.decl.ty),
        IrType::Float { .. }
    );
    let zero = if float_cells { CellInit::F(0.0) } else { CellInit::I(0) };
    let mut cells = vec![zero; len];
    match &global.init {
        None => {}
        Some(GlobalInit::Int(v)) => cells[0] = CellInit::I(*v),
        Some(GlobalInit::Float(v)) => cells[0] = CellInit::F(*v),
        Some(GlobalInit::Str(s)) => {
            // Character array initializer: one byte per cell, NUL-terminated.
            if s.len() + 1 > len {
                return Err(Error::InvalidConfig(format!(
                    "initializer for '{}' needs {} cells, declared with {}",
                    global.decl.name,
                    s.len() + 1,
                    len
                )));
            }
            for (i, b) in s.bytes().enumerate() {
                cells[i] = CellInit::I(i64::from(b));
            }
            cells[s.len()] = CellInit::I(0);
        }
    }
    Ok(GlobalData {
        name: global.decl.name.clone(),
        cells,
    })
}

/// Unit-wide string literal pool, first-use order
#[derive(Default)]
struct StringPool {
    strings: Vec<String>,
    index: HashMap<String, u16>,
}

impl StringPool {
    fn intern(&mut self, s: &str) -> u16 {
        if let Some(&i) = self.index.get(s) {
            return i;
        }
        let i = self.strings.len() as u16;
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), i);
        i
    }
}

/// Slot type a value of an IR type occupies
fn slot_ty(ty: &IrType) -> VmType {
    match ty {
        IrType::Pointer(_) | IrType::Array { .. } | IrType::Record { .. } => VmType::Ref,
        other => VmType::scalar(other),
    }
}

fn bin_op(op: BinOp) -> VmBinOp {
    match op {
        BinOp::Add => VmBinOp::Add,
        BinOp::Sub => VmBinOp::Sub,
        BinOp::Mul => VmBinOp::Mul,
        BinOp::Div => VmBinOp::Div,
        BinOp::Rem => VmBinOp::Rem,
        BinOp::And => VmBinOp::And,
        BinOp::Or => VmBinOp::Or,
        BinOp::Xor => VmBinOp::Xor,
        BinOp::Shl => VmBinOp::Shl,
        BinOp::Shr => VmBinOp::Shr,
    }
}

fn cmp_op(op: CmpOp) -> VmBinOp {
    match op {
        CmpOp::Eq => VmBinOp::CmpEq,
        CmpOp::Ne => VmBinOp::CmpNe,
        CmpOp::Lt => VmBinOp::CmpLt,
        CmpOp::Le => VmBinOp::CmpLe,
        CmpOp::Gt => VmBinOp::CmpGt,
        CmpOp::Ge => VmBinOp::CmpGe,
    }
}

fn un_op(op: UnaryOp) -> VmUnOp {
    match op {
        UnaryOp::Neg => VmUnOp::Neg,
        UnaryOp::BitNot => VmUnOp::BitNot,
        UnaryOp::Not => VmUnOp::Not,
    }
}

/// Per-function emitter
struct FnEmitter<'a> {
    function: &'a IrFunction,
    convention: &'a CallingConvention,
    methods: &'a HashMap<String, (u16, CallingConvention)>,
    global_types: &'a HashMap<String, IrType>,
    table: &'a ReferenceMethodTable,
    pool: &'a mut StringPool,
    layout: FrameLayout,
    code: Vec<VmInstruction>,
    /// Instruction indices whose targets still hold block ids
    fixups: Vec<usize>,
    block_offsets: HashMap<u32, usize>,
}

impl<'a> FnEmitter<'a> {
    fn new(
        function: &'a IrFunction,
        convention: &'a CallingConvention,
        methods: &'a HashMap<String, (u16, CallingConvention)>,
        global_index: &HashMap<String, (u16, bool)>,
        global_types: &'a HashMap<String, IrType>,
        table: &'a ReferenceMethodTable,
        pool: &'a mut StringPool,
    ) -> Result<Self> {
        let mut layout = FrameLayout::build(function, convention)?;
        for (name, (index, aggregate)) in global_index {
            layout.bind_global(name, *index, *aggregate);
        }
        Ok(Self {
            function,
            convention,
            methods,
            global_types,
            table,
            pool,
            layout,
            code: Vec::new(),
            fixups: Vec::new(),
            block_offsets: HashMap::new(),
        })
    }

    fn emit(mut self) -> Result<MethodCode> {
        self.code = std::mem::take(&mut self.layout.prologue);
        for id in self.function.reverse_postorder() {
            self.block_offsets.insert(id, self.code.len());
            let block = self
                .function
                .block(id)
                .ok_or_else(|| Error::UnresolvedLabel {
                    label: id,
                    function: self.function.name.clone(),
                })?;
            self.emit_block(block)?;
        }
        self.patch_targets()?;

        let signature = MethodSig::new(
            self.convention.param_types(),
            self.convention.return_type,
        );
        let mut method = self
            .layout
            .into_method(self.function.name.clone(), signature);
        method.instructions = self.code;
        Ok(method)
    }

    fn emit_block(&mut self, block: &BasicBlock) -> Result<()> {
        for statement in &block.statements {
            match statement {
                IrStatement::Assign { target, value } => self.emit_assign(target, value)?,
                IrStatement::Call { callee, args } => {
                    self.emit_call(callee, args, false)?;
                }
            }
        }
        self.emit_terminator(&block.terminator)
    }

    fn emit_assign(&mut self, target: &IrExpr, value: &IrExpr) -> Result<()> {
        match target {
            IrExpr::Var(name) => {
                let want = self.type_of(target);
                match self.storage_of(name)? {
                    Storage::Direct(dst) => {
                        let src = self.eval(value, want.as_ref())?;
                        if src != dst {
                            self.code.push(VmInstruction::Move { dst, src });
                        }
                    }
                    Storage::Cell(ptr) => {
                        let src = self.eval(value, want.as_ref())?;
                        let index = self.const_i(0);
                        self.code.push(VmInstruction::StoreIndex { ptr, index, src });
                    }
                    Storage::GlobalCell(g) => {
                        let src = self.eval(value, want.as_ref())?;
                        let ptr = self.global_ref(g);
                        let index = self.const_i(0);
                        self.code.push(VmInstruction::StoreIndex { ptr, index, src });
                    }
                    Storage::Region(_) | Storage::GlobalRegion(_) => {
                        return Err(Error::unsupported(
                            &self.function.name,
                            format!("aggregate assignment to '{}'", name),
                        ));
                    }
                }
            }
            IrExpr::Deref(inner) => {
                let want = self.type_of(target);
                let src = self.eval(value, want.as_ref())?;
                let ptr = self.eval(inner, None)?;
                let index = self.const_i(0);
                self.code.push(VmInstruction::StoreIndex { ptr, index, src });
            }
            IrExpr::Index { base, index } => {
                let want = self.type_of(target);
                let src = self.eval(value, want.as_ref())?;
                let ptr = self.eval(base, None)?;
                let index = self.eval(index, Some(&IrType::int64()))?;
                self.code.push(VmInstruction::StoreIndex { ptr, index, src });
            }
            IrExpr::Field { base, offset, ty, .. } => {
                let src = self.eval(value, Some(&ty.clone()))?;
                let ptr = self.addr_of(base)?;
                let index = self.const_i(*offset as i64);
                self.code.push(VmInstruction::StoreIndex { ptr, index, src });
            }
            other => {
                return Err(Error::MalformedGraph {
                    function: self.function.name.clone(),
                    message: format!("assignment target is not a place: {:?}", other),
                });
            }
        }
        Ok(())
    }

    fn emit_terminator(&mut self, terminator: &Terminator) -> Result<()> {
        match terminator {
            Terminator::Goto(block) => {
                self.push_fixup(VmInstruction::Jump {
                    target: *block as usize,
                });
            }
            Terminator::CondGoto {
                lhs,
                cmp,
                rhs,
                then_block,
                else_block,
            } => {
                let cond = self.emit_compare(lhs, *cmp, rhs)?;
                self.push_fixup(VmInstruction::BranchIf {
                    cond,
                    target: *then_block as usize,
                });
                self.push_fixup(VmInstruction::Jump {
                    target: *else_block as usize,
                });
            }
            Terminator::Switch {
                value,
                cases,
                default,
            } => {
                let want = self.type_of(value).unwrap_or_else(IrType::int64);
                let value = self.eval(value, Some(&want))?;
                self.push_fixup(VmInstruction::Switch {
                    value,
                    cases: cases.iter().map(|(v, b)| (*v, *b as usize)).collect(),
                    default: *default as usize,
                });
            }
            Terminator::Return(None) => self.code.push(VmInstruction::Return { value: None }),
            Terminator::Return(Some(expr)) => {
                let want = self.function.return_type.clone();
                let slot = self.eval(expr, Some(&want))?;
                self.code.push(VmInstruction::Return { value: Some(slot) });
            }
        }
        Ok(())
    }

    fn emit_compare(&mut self, lhs: &IrExpr, cmp: CmpOp, rhs: &IrExpr) -> Result<Slot> {
        let lt = self.type_of(lhs);
        let rt = self.type_of(rhs);
        let pointer = lt.as_ref().map_or(false, IrType::is_pointer)
            || rt.as_ref().map_or(false, IrType::is_pointer);
        let (ty, want) = if pointer {
            if !matches!(cmp, CmpOp::Eq | CmpOp::Ne) {
                return Err(Error::unsupported(
                    &self.function.name,
                    "ordered comparison of references",
                ));
            }
            // Reference equality; the operands are refs or null constants.
            let want = lt.or(rt).unwrap_or_else(|| {
                IrType::Pointer(Box::new(IrType::char8()))
            });
            (NumTy::I64, want)
        } else {
            let want = lt.or(rt).unwrap_or_else(IrType::int64);
            let ty = NumTy::of(&want).ok_or_else(|| {
                Error::unsupported(&self.function.name, format!("comparison at type {}", want))
            })?;
            (ty, want)
        };
        let lhs = self.eval(lhs, Some(&want))?;
        let rhs = self.eval(rhs, Some(&want))?;
        let dst = self.layout.alloc(VmType::I32);
        self.code.push(VmInstruction::Binary {
            op: cmp_op(cmp),
            ty,
            dst,
            lhs,
            rhs,
        });
        Ok(dst)
    }

    /// Evaluate an expression to a slot. `want` guides untyped constants; it
    /// never inserts implicit conversions between typed values. An operand
    /// whose declared type disagrees with `want` at the value-class level
    /// (integer, float, reference) has no defined translation and fails
    /// generation; conversions are cast-only.
    fn eval(&mut self, expr: &IrExpr, want: Option<&IrType>) -> Result<Slot> {
        if let Some(want) = want {
            self.check_operand(expr, want)?;
        }
        match expr {
            IrExpr::IntConst(v) => match want {
                Some(ty @ IrType::Float { .. }) => {
                    let dst = self.layout.alloc(VmType::scalar(ty));
                    self.code.push(VmInstruction::ConstF {
                        dst,
                        value: *v as f64,
                    });
                    Ok(dst)
                }
                Some(IrType::Pointer(_)) if *v == 0 => {
                    let dst = self.layout.alloc(VmType::Ref);
                    self.code.push(VmInstruction::ConstNull { dst });
                    Ok(dst)
                }
                Some(ty @ IrType::Int { .. }) => {
                    let dst = self.layout.alloc(VmType::scalar(ty));
                    self.code.push(VmInstruction::ConstI { dst, value: *v });
                    Ok(dst)
                }
                _ => Ok(self.const_i(*v)),
            },
            IrExpr::FloatConst(v) => {
                let dst = match want {
                    Some(ty @ IrType::Float { .. }) => self.layout.alloc(VmType::scalar(ty)),
                    _ => self.layout.alloc(VmType::F64),
                };
                self.code.push(VmInstruction::ConstF { dst, value: *v });
                Ok(dst)
            }
            IrExpr::StrConst(s) => {
                let pool = self.pool.intern(s);
                let dst = self.layout.alloc(VmType::Ref);
                self.code.push(VmInstruction::ConstStr { dst, pool });
                Ok(dst)
            }
            IrExpr::Var(name) => match self.storage_of(name)? {
                Storage::Direct(slot) | Storage::Region(slot) => Ok(slot),
                Storage::Cell(ptr) => {
                    let ty = self
                        .type_of(expr)
                        .map(|t| slot_ty(&t))
                        .unwrap_or(VmType::I64);
                    self.load_cell(ptr, 0, ty)
                }
                Storage::GlobalCell(g) => {
                    let ptr = self.global_ref(g);
                    let ty = self
                        .type_of(expr)
                        .map(|t| slot_ty(&t))
                        .unwrap_or(VmType::I64);
                    self.load_cell(ptr, 0, ty)
                }
                Storage::GlobalRegion(g) => Ok(self.global_ref(g)),
            },
            IrExpr::Deref(inner) => {
                let ptr = self.eval(inner, None)?;
                let ty = self
                    .type_of(expr)
                    .map(|t| slot_ty(&t))
                    .unwrap_or(VmType::I64);
                self.load_cell(ptr, 0, ty)
            }
            IrExpr::Index { base, index } => {
                let ptr = self.eval(base, None)?;
                let index = self.eval(index, Some(&IrType::int64()))?;
                let ty = self
                    .type_of(expr)
                    .map(|t| slot_ty(&t))
                    .unwrap_or(VmType::I64);
                let dst = self.layout.alloc(ty);
                self.code.push(VmInstruction::LoadIndex { dst, ptr, index });
                Ok(dst)
            }
            IrExpr::Field { base, offset, ty, .. } => {
                let ptr = self.addr_of(base)?;
                let slot = slot_ty(ty);
                self.load_cell(ptr, *offset as i64, slot)
            }
            IrExpr::AddrOf(place) => self.addr_of(place),
            IrExpr::Unary { op, ty, operand } => {
                let num = NumTy::of(ty).ok_or_else(|| {
                    Error::unsupported(
                        &self.function.name,
                        format!("unary operation at type {}", ty),
                    )
                })?;
                let src = self.eval(operand, Some(ty))?;
                let dst = self.layout.alloc(slot_ty(ty));
                self.code.push(VmInstruction::Unary {
                    op: un_op(*op),
                    ty: num,
                    dst,
                    src,
                });
                Ok(dst)
            }
            IrExpr::Binary { op, ty, lhs, rhs } => self.emit_binary(*op, ty, lhs, rhs),
            IrExpr::Cast { to, value } => self.emit_cast(to, value),
            IrExpr::Call { callee, args } => {
                self.emit_call(callee, args, true)?.ok_or_else(|| {
                    Error::unsupported(
                        &self.function.name,
                        format!("value use of void call to '{}'", callee),
                    )
                })
            }
        }
    }

    fn emit_binary(
        &mut self,
        op: BinOp,
        ty: &IrType,
        lhs: &IrExpr,
        rhs: &IrExpr,
    ) -> Result<Slot> {
        // Address arithmetic: pointer plus or minus an element count stays in
        // the same region with an adjusted offset.
        let lhs_ptr = self.type_of(lhs).map_or(false, |t| t.is_pointer());
        let rhs_ptr = self.type_of(rhs).map_or(false, |t| t.is_pointer());
        if ty.is_pointer() || lhs_ptr || rhs_ptr {
            if lhs_ptr && rhs_ptr {
                return Err(Error::unsupported(
                    &self.function.name,
                    "pointer difference",
                ));
            }
            let (base, count) = if lhs_ptr { (lhs, rhs) } else { (rhs, lhs) };
            if !matches!(op, BinOp::Add | BinOp::Sub) {
                return Err(Error::unsupported(
                    &self.function.name,
                    format!("{:?} on a reference operand", op),
                ));
            }
            if matches!(op, BinOp::Sub) && !lhs_ptr {
                return Err(Error::unsupported(
                    &self.function.name,
                    "integer minus reference",
                ));
            }
            let ptr = self.eval(base, None)?;
            let mut delta = self.eval(count, Some(&IrType::int64()))?;
            if matches!(op, BinOp::Sub) {
                let neg = self.layout.alloc(VmType::I64);
                self.code.push(VmInstruction::Unary {
                    op: VmUnOp::Neg,
                    ty: NumTy::I64,
                    dst: neg,
                    src: delta,
                });
                delta = neg;
            }
            let dst = self.layout.alloc(VmType::Ref);
            self.code.push(VmInstruction::PtrAdd { dst, ptr, delta });
            return Ok(dst);
        }

        let num = NumTy::of(ty).ok_or_else(|| {
            Error::unsupported(
                &self.function.name,
                format!("binary operation at type {}", ty),
            )
        })?;
        let lhs = self.eval(lhs, Some(ty))?;
        let rhs = self.eval(rhs, Some(ty))?;
        let dst = self.layout.alloc(slot_ty(ty));
        self.code.push(VmInstruction::Binary {
            op: bin_op(op),
            ty: num,
            dst,
            lhs,
            rhs,
        });
        Ok(dst)
    }

    fn emit_cast(&mut self, to: &IrType, value: &IrExpr) -> Result<Slot> {
        // Pointer casts reinterpret the reference; only numeric casts emit a
        // conversion.
        if to.is_pointer() {
            return self.eval(value, Some(to));
        }
        let from_ty = self.type_of(value);
        if from_ty.as_ref().map_or(false, IrType::is_pointer) {
            return Err(Error::unsupported(
                &self.function.name,
                "reference to integer cast",
            ));
        }
        let from = match &from_ty {
            Some(ty) => NumTy::of(ty),
            None => match value {
                IrExpr::FloatConst(_) => Some(NumTy::F64),
                _ => Some(NumTy::I64),
            },
        }
        .ok_or_else(|| {
            Error::unsupported(
                &self.function.name,
                format!(
                    "cast from type {}",
                    from_ty.as_ref().map(|t| t.to_string()).unwrap_or_default()
                ),
            )
        })?;
        let to_num = NumTy::of(to).ok_or_else(|| {
            Error::unsupported(&self.function.name, format!("cast to type {}", to))
        })?;
        let src = self.eval(value, from_ty.as_ref())?;
        if from == to_num {
            return Ok(src);
        }
        let dst = self.layout.alloc(slot_ty(to));
        self.code.push(VmInstruction::Convert {
            dst,
            src,
            from,
            to: to_num,
        });
        Ok(dst)
    }

    /// Emit a call. Returns the result slot when the callee returns a value
    /// and `want_value` asked for it.
    fn emit_call(
        &mut self,
        callee: &str,
        args: &[IrExpr],
        want_value: bool,
    ) -> Result<Option<Slot>> {
        if let Some((index, cc)) = self.methods.get(callee).cloned() {
            let declared: Vec<&crate::abi::TargetParam> = cc
                .params
                .iter()
                .filter(|p| matches!(p.origin, ParamOrigin::Declared(_)))
                .collect();
            if declared.len() != args.len() {
                return Err(Error::unsupported(
                    &self.function.name,
                    format!(
                        "call to '{}' passes {} arguments, declaration takes {}",
                        callee,
                        args.len(),
                        declared.len()
                    ),
                ));
            }
            let mut slots = Vec::with_capacity(cc.params.len());
            for param in &cc.params {
                let slot = match param.origin {
                    ParamOrigin::Declared(i) => {
                        self.eval_arg(&args[i], param.vm_type, param.mode)?
                    }
                    ParamOrigin::HiddenLength(i) => self.string_length(&args[i])?,
                };
                slots.push(slot);
            }
            let dst = match (want_value, cc.return_type) {
                (true, Some(ty)) => Some(self.layout.alloc(ty)),
                _ => None,
            };
            self.code.push(VmInstruction::CallLocal {
                dst,
                method: index,
                args: slots,
            });
            return Ok(dst);
        }

        let runtime = self.table.lookup(callee, &self.function.name)?;
        let (index, sig) = (runtime.index, runtime.signature.clone());
        if sig.params.len() != args.len() {
            return Err(Error::unsupported(
                &self.function.name,
                format!(
                    "call to runtime method '{}' passes {} arguments, table declares {}",
                    callee,
                    args.len(),
                    sig.params.len()
                ),
            ));
        }
        let mut slots = Vec::with_capacity(args.len());
        for (arg, ty) in args.iter().zip(&sig.params) {
            slots.push(self.eval_arg(arg, *ty, PassingMode::Value)?);
        }
        let dst = match (want_value, sig.ret) {
            (true, Some(ty)) => Some(self.layout.alloc(ty)),
            _ => None,
        };
        self.code.push(VmInstruction::CallRuntime {
            dst,
            method: index,
            args: slots,
        });
        Ok(dst)
    }

    fn eval_arg(&mut self, arg: &IrExpr, vm: VmType, mode: PassingMode) -> Result<Slot> {
        let want = match (vm, mode) {
            (VmType::Ref, _) | (_, PassingMode::Reference) => {
                if let Some(declared) = self.type_of(arg) {
                    if slot_ty(&declared) != VmType::Ref {
                        return Err(Error::unsupported(
                            &self.function.name,
                            format!("argument of type {} where a reference is expected", declared),
                        ));
                    }
                }
                None
            }
            (VmType::I32, _) => Some(IrType::int32()),
            (VmType::I64, _) => Some(IrType::int64()),
            (VmType::F32, _) => Some(IrType::Float { width: 32 }),
            (VmType::F64, _) => Some(IrType::double()),
        };
        self.eval(arg, want.as_ref())
    }

    /// Hidden character-length argument for a Fortran callee
    fn string_length(&mut self, arg: &IrExpr) -> Result<Slot> {
        if let IrExpr::StrConst(s) = arg {
            return Ok(self.const_i(s.len() as i64));
        }
        // Non-literal character argument: measure it at run time.
        let strlen = self.table.lookup("strlen", &self.function.name)?;
        let (index, ret) = (strlen.index, strlen.signature.ret);
        let ptr = self.eval(arg, None)?;
        let dst = self.layout.alloc(ret.unwrap_or(VmType::I64));
        self.code.push(VmInstruction::CallRuntime {
            dst: Some(dst),
            method: index,
            args: vec![ptr],
        });
        Ok(dst)
    }

    /// Reference to the storage of a place expression
    fn addr_of(&mut self, place: &IrExpr) -> Result<Slot> {
        match place {
            IrExpr::Var(name) => match self.storage_of(name)? {
                Storage::Cell(slot) | Storage::Region(slot) => Ok(slot),
                Storage::GlobalCell(g) | Storage::GlobalRegion(g) => Ok(self.global_ref(g)),
                Storage::Direct(_) => Err(Error::MalformedGraph {
                    function: self.function.name.clone(),
                    message: format!("address taken of slot-resident '{}'", name),
                }),
            },
            // &*p is p
            IrExpr::Deref(inner) => self.eval(inner, None),
            IrExpr::Index { base, index } => {
                let ptr = self.eval(base, None)?;
                let delta = self.eval(index, Some(&IrType::int64()))?;
                let dst = self.layout.alloc(VmType::Ref);
                self.code.push(VmInstruction::PtrAdd { dst, ptr, delta });
                Ok(dst)
            }
            IrExpr::Field { base, offset, .. } => {
                let ptr = self.addr_of(base)?;
                let delta = self.const_i(*offset as i64);
                let dst = self.layout.alloc(VmType::Ref);
                self.code.push(VmInstruction::PtrAdd { dst, ptr, delta });
                Ok(dst)
            }
            other => Err(Error::unsupported(
                &self.function.name,
                format!("address of non-place expression {:?}", other),
            )),
        }
    }

    /// Static type of an expression, when one is declared
    fn type_of(&self, expr: &IrExpr) -> Option<IrType> {
        match expr {
            IrExpr::IntConst(_) | IrExpr::FloatConst(_) => None,
            IrExpr::StrConst(_) => Some(IrType::Pointer(Box::new(IrType::char8()))),
            IrExpr::Var(name) => self
                .function
                .decl(name)
                .map(|d| d.ty.clone())
                .or_else(|| self.global_types.get(name).cloned()),
            IrExpr::Deref(inner) => self.type_of(inner).and_then(|t| t.element().cloned()),
            IrExpr::Index { base, .. } => {
                self.type_of(base).and_then(|t| t.element().cloned())
            }
            IrExpr::Field { ty, .. } => Some(ty.clone()),
            IrExpr::AddrOf(place) => self
                .type_of(place)
                .map(|t| IrType::Pointer(Box::new(t))),
            IrExpr::Unary { ty, .. } | IrExpr::Binary { ty, .. } => Some(ty.clone()),
            IrExpr::Cast { to, .. } => Some(to.clone()),
            IrExpr::Call { callee, .. } => {
                if let Some((_, cc)) = self.methods.get(callee) {
                    return cc.return_type.map(vm_as_ir);
                }
                self.table
                    .by_name(callee)
                    .and_then(|m| m.signature.ret)
                    .map(vm_as_ir)
            }
        }
    }

    /// Reject an operand whose declared type and the required type fall in
    /// different value classes. Integer widths may differ (arithmetic is
    /// normalized by the operation's own width); integer against float or
    /// scalar against reference never has a defined translation without an
    /// explicit cast.
    fn check_operand(&self, expr: &IrExpr, want: &IrType) -> Result<()> {
        let declared = match self.type_of(expr) {
            Some(ty) => ty,
            None => return Ok(()),
        };
        let compatible = match (NumTy::of(&declared), NumTy::of(want)) {
            (Some(have), Some(need)) => have.is_float() == need.is_float(),
            _ => slot_ty(&declared) == slot_ty(want),
        };
        if compatible {
            return Ok(());
        }
        Err(Error::unsupported(
            &self.function.name,
            format!(
                "operand of type {} where {} is required and no cast is written",
                declared, want
            ),
        ))
    }

    fn storage_of(&self, name: &str) -> Result<Storage> {
        self.layout
            .storage(name)
            .ok_or_else(|| Error::UnresolvedSymbol {
                symbol: name.to_string(),
                function: self.function.name.clone(),
            })
    }

    fn load_cell(&mut self, ptr: Slot, offset: i64, ty: VmType) -> Result<Slot> {
        let index = self.const_i(offset);
        let dst = self.layout.alloc(ty);
        self.code.push(VmInstruction::LoadIndex { dst, ptr, index });
        Ok(dst)
    }

    fn global_ref(&mut self, index: u16) -> Slot {
        let dst = self.layout.alloc(VmType::Ref);
        self.code.push(VmInstruction::GlobalRef { dst, index });
        dst
    }

    fn const_i(&mut self, value: i64) -> Slot {
        let dst = self.layout.alloc(VmType::I64);
        self.code.push(VmInstruction::ConstI { dst, value });
        dst
    }

    fn push_fixup(&mut self, instruction: VmInstruction) {
        self.fixups.push(self.code.len());
        self.code.push(instruction);
    }

    /// Rewrite provisional block-id targets to instruction offsets
    fn patch_targets(&mut self) -> Result<()> {
        let function = self.function.name.clone();
        let offsets = std::mem::take(&mut self.block_offsets);
        let fixups = std::mem::take(&mut self.fixups);
        let resolve = |id: usize| -> Result<usize> {
            offsets
                .get(&(id as u32))
                .copied()
                .ok_or_else(|| Error::UnresolvedLabel {
                    label: id as u32,
                    function: function.clone(),
                })
        };
        for site in fixups {
            match &mut self.code[site] {
                VmInstruction::Jump { target } => *target = resolve(*target)?,
                VmInstruction::BranchIf { target, .. } => *target = resolve(*target)?,
                VmInstruction::Switch { cases, default, .. } => {
                    for (_, target) in cases.iter_mut() {
                        *target = resolve(*target)?;
                    }
                    *default = resolve(*default)?;
                }
                other => {
                    return Err(Error::MalformedGraph {
                        function: function.clone(),
                        message: format!("fixup site holds {:?}", other),
                    })
                }
            }
        }
        Ok(())
    }
}

/// IR view of a runtime value type, used only for typing call results
fn vm_as_ir(vm: VmType) -> IrType {
    match vm {
        VmType::I32 => IrType::int32(),
        VmType::I64 => IrType::int64(),
        VmType::F32 => IrType::Float { width: 32 },
        VmType::F64 => IrType::double(),
        VmType::Ref => IrType::Pointer(Box::new(IrType::char8())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parse_unit;

    fn generate(src: &str, language: SourceLanguage) -> Result<CompiledUnit> {
        let unit = parse_unit(src).unwrap();
        generate_unit(
            "demo.Demo",
            &unit,
            language,
            &AbiOptions::default(),
            &ReferenceMethodTable::standard(),
        )
    }

    #[test]
    fn test_generates_straight_line_method() {
        let unit = generate(
            r#"
            double scale (double x, double f)
            {
              double r;

              <bb 2>:
                r = x * f;
                return r;
            }
            "#,
            SourceLanguage::C,
        )
        .unwrap();
        let m = unit.method("scale").unwrap();
        assert_eq!(m.signature.params, vec![VmType::F64, VmType::F64]);
        assert_eq!(m.signature.ret, Some(VmType::F64));
        assert!(m
            .instructions
            .iter()
            .any(|i| matches!(i, VmInstruction::Binary { op: VmBinOp::Mul, ty: NumTy::F64, .. })));
        assert!(matches!(
            m.instructions.last(),
            Some(VmInstruction::Return { value: Some(_) })
        ));
    }

    #[test]
    fn test_branch_targets_are_instruction_offsets() {
        let unit = generate(
            r#"
            int pick (int a, int b)
            {
              <bb 2>:
                if (a < b) goto <bb 3>; else goto <bb 4>;

              <bb 3>:
                return a;

              <bb 4>:
                return b;
            }
            "#,
            SourceLanguage::C,
        )
        .unwrap();
        let m = unit.method("pick").unwrap();
        let n = m.instructions.len();
        for instruction in &m.instructions {
            match instruction {
                VmInstruction::Jump { target } | VmInstruction::BranchIf { target, .. } => {
                    assert!(*target < n);
                }
                _ => {}
            }
        }
        // Both arms end in a return.
        let returns = m
            .instructions
            .iter()
            .filter(|i| matches!(i, VmInstruction::Return { .. }))
            .count();
        assert_eq!(returns, 2);
    }

    #[test]
    fn test_unknown_callee_is_rejected() {
        let err = generate(
            r#"
            void run (double * x)
            {
              <bb 2>:
                mystery_helper (x);
                return;
            }
            "#,
            SourceLanguage::C,
        )
        .unwrap_err();
        match err {
            Error::UnresolvedCallee { symbol, function } => {
                assert_eq!(symbol, "mystery_helper");
                assert_eq!(function, "run");
            }
            other => panic!("expected UnresolvedCallee, got {other}"),
        }
    }

    #[test]
    fn test_local_callee_resolves_before_table() {
        // A unit-local definition shadows nothing in the table, but the
        // lookup order is unit first.
        let unit = generate(
            r#"
            double sqrt (double x)
            {
              <bb 2>:
                return x;
            }

            double use (double x)
            {
              double r;

              <bb 2>:
                r = sqrt (x);
                return r;
            }
            "#,
            SourceLanguage::C,
        )
        .unwrap();
        let m = unit.method("use").unwrap();
        assert!(m
            .instructions
            .iter()
            .any(|i| matches!(i, VmInstruction::CallLocal { method: 0, .. })));
        assert!(!m
            .instructions
            .iter()
            .any(|i| matches!(i, VmInstruction::CallRuntime { .. })));
    }

    #[test]
    fn test_hidden_length_argument_synthesized() {
        let unit = generate(
            r#"
            void report (char * msg)
            {
              <bb 2>:
                rt_print (msg);
                return;
            }

            void driver ()
            {
              <bb 2>:
                report ("ready");
                return;
            }
            "#,
            SourceLanguage::Fortran,
        )
        .unwrap();
        let driver = unit.method("driver").unwrap();
        // The literal's length rides along as a trailing constant argument.
        let call = driver
            .instructions
            .iter()
            .find_map(|i| match i {
                VmInstruction::CallLocal { args, .. } => Some(args.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(call.len(), 2);
        let len_slot = call[1];
        assert!(driver.instructions.iter().any(
            |i| matches!(i, VmInstruction::ConstI { dst, value: 5 } if *dst == len_slot)
        ));
        assert_eq!(unit.strings, vec!["ready".to_string()]);
    }

    #[test]
    fn test_mixed_float_int_operation_is_rejected() {
        let err = generate(
            r#"
            double mean_tail (double s, int n)
            {
              <bb 2>:
                s = s / n;
                return s;
            }
            "#,
            SourceLanguage::C,
        )
        .unwrap_err();
        match err {
            Error::UnsupportedConstruct { function, construct } => {
                assert_eq!(function, "mean_tail");
                assert!(construct.contains("no cast"));
            }
            other => panic!("expected UnsupportedConstruct, got {other}"),
        }
    }

    #[test]
    fn test_int_argument_to_float_runtime_method_is_rejected() {
        let err = generate(
            r#"
            double root (int n)
            {
              double r;

              <bb 2>:
                r = sqrt (n);
                return r;
            }
            "#,
            SourceLanguage::C,
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedConstruct { .. }));
    }

    #[test]
    fn test_scalar_argument_where_reference_expected_is_rejected() {
        let err = generate(
            r#"
            long touch (long n)
            {
              long r;

              <bb 2>:
                r = strlen (n);
                return r;
            }
            "#,
            SourceLanguage::C,
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedConstruct { .. }));
    }

    #[test]
    fn test_explicit_cast_bridges_int_to_float() {
        let unit = generate(
            r#"
            double mean_tail (double s, int n)
            {
              double d;

              <bb 2>:
                d = (double) n;
                s = s / d;
                return s;
            }
            "#,
            SourceLanguage::C,
        )
        .unwrap();
        let m = unit.method("mean_tail").unwrap();
        assert!(m.instructions.iter().any(|i| matches!(
            i,
            VmInstruction::Convert { from: NumTy::I32, to: NumTy::F64, .. }
        )));
    }

    #[test]
    fn test_duplicate_function_is_a_collision() {
        let err = generate(
            r#"
            void f () { <bb 2>: return; }
            void f () { <bb 2>: return; }
            "#,
            SourceLanguage::C,
        )
        .unwrap_err();
        assert!(matches!(err, Error::NameCollision { .. }));
    }

    #[test]
    fn test_global_string_initializer_cells() {
        let unit = generate(
            r#"
            char tag[8] = "abc";

            void noop () { <bb 2>: return; }
            "#,
            SourceLanguage::C,
        )
        .unwrap();
        assert_eq!(unit.globals.len(), 1);
        let cells = &unit.globals[0].cells;
        assert_eq!(cells.len(), 8);
        assert_eq!(cells[0], CellInit::I(97));
        assert_eq!(cells[3], CellInit::I(0));
    }

    #[test]
    fn test_fortran_scalar_params_pass_by_reference() {
        let unit = generate(
            r#"
            double add2 (double a, double b)
            {
              double r;

              <bb 2>:
                r = a + b;
                return r;
            }
            "#,
            SourceLanguage::Fortran,
        )
        .unwrap();
        let m = unit.method("add2").unwrap();
        assert_eq!(m.signature.params, vec![VmType::Ref, VmType::Ref]);
        // Reads of the parameters go through the cells.
        assert!(m
            .instructions
            .iter()
            .any(|i| matches!(i, VmInstruction::LoadIndex { .. })));
    }
}
