//! Reference interpreter for compiled units
//!
//! Executes [`CompiledUnit`] methods directly over the in-memory instruction
//! form, with the same semantics the loaded image has on the real runtime:
//! typed slots, bounds-checked regions, width-exact integer arithmetic. Used
//! by the test suite to validate generated code end to end, and handy for
//! debugging a miscompiled unit without a runtime at hand.
//!
//! Runtime methods from the standard reference table are provided in-process
//! (allocation, the libm surface, string helpers); `rt_print` and
//! `rt_warning` capture their text instead of writing it anywhere.

use super::method::{NumTy, VmBinOp, VmInstruction, VmType, VmUnOp};
use super::{CellInit, CompiledUnit};
use thiserror::Error;

/// A run-time trap raised by the interpreter
#[derive(Debug, Error)]
pub enum Trap {
    /// Region access outside its bounds
    #[error("index {index} out of bounds for region of {len} cells")]
    Bounds {
        /// Attempted absolute cell index
        index: i64,
        /// Region length in cells
        len: usize,
    },
    /// Dereference through a null reference
    #[error("null reference dereference")]
    NullDeref,
    /// Call of a method the unit does not define
    #[error("unknown method '{0}'")]
    UnknownMethod(String),
    /// Slot held a value of the wrong kind for the instruction
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Expected value kind
        expected: &'static str,
        /// Actual value kind
        found: &'static str,
    },
    /// Integer division or remainder by zero
    #[error("integer division by zero")]
    DivideByZero,
    /// Runtime method with no in-process implementation
    #[error("runtime method '{0}' is not implemented by the interpreter")]
    UnimplementedRuntime(String),
    /// `rt_error` was called
    #[error("runtime error: {0}")]
    RuntimeError(String),
    /// Argument list does not match the method signature
    #[error("method '{method}' takes {expected} arguments, got {got}")]
    Arity {
        /// Method name
        method: String,
        /// Declared parameter count
        expected: usize,
        /// Supplied argument count
        got: usize,
    },
}

/// A dynamic value held in a slot or region cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VmValue {
    /// Integer (any width; arithmetic normalizes per operation)
    I(i64),
    /// Floating-point
    F(f64),
    /// Reference into a region
    Ref {
        /// Region id within the machine
        region: usize,
        /// Element offset
        offset: i64,
    },
    /// Null reference
    Null,
}

impl VmValue {
    fn kind(&self) -> &'static str {
        match self {
            VmValue::I(_) => "int",
            VmValue::F(_) => "float",
            VmValue::Ref { .. } => "ref",
            VmValue::Null => "null",
        }
    }

    fn as_i(&self) -> Result<i64, Trap> {
        match self {
            VmValue::I(v) => Ok(*v),
            other => Err(Trap::TypeMismatch {
                expected: "int",
                found: other.kind(),
            }),
        }
    }

    fn as_f(&self) -> Result<f64, Trap> {
        match self {
            VmValue::F(v) => Ok(*v),
            other => Err(Trap::TypeMismatch {
                expected: "float",
                found: other.kind(),
            }),
        }
    }
}

/// Execution counters, exposed for control-flow assertions
#[derive(Debug, Default, Clone, Copy)]
pub struct ExecStats {
    /// Instructions executed
    pub executed: u64,
    /// Taken conditional branches
    pub branches_taken: u64,
    /// Calls performed (local and runtime)
    pub calls: u64,
}

/// An interpreter instance over one compiled unit
pub struct Machine<'a> {
    unit: &'a CompiledUnit,
    regions: Vec<Vec<VmValue>>,
    globals: Vec<usize>,
    strings: Vec<usize>,
    captured: Vec<String>,
    /// Counters accumulated across calls
    pub stats: ExecStats,
}

impl<'a> Machine<'a> {
    /// Build a machine with the unit's globals and string pool materialized
    pub fn new(unit: &'a CompiledUnit) -> Self {
        let mut regions = Vec::new();
        let mut globals = Vec::with_capacity(unit.globals.len());
        for g in &unit.globals {
            let cells = g
                .cells
                .iter()
                .map(|c| match c {
                    CellInit::I(v) => VmValue::I(*v),
                    CellInit::F(v) => VmValue::F(*v),
                })
                .collect();
            globals.push(regions.len());
            regions.push(cells);
        }
        let mut strings = Vec::with_capacity(unit.strings.len());
        for s in &unit.strings {
            let mut cells: Vec<VmValue> =
                s.bytes().map(|b| VmValue::I(i64::from(b))).collect();
            cells.push(VmValue::I(0));
            strings.push(regions.len());
            regions.push(cells);
        }
        Self {
            unit,
            regions,
            globals,
            strings,
            captured: Vec::new(),
            stats: ExecStats::default(),
        }
    }

    /// Allocate a region holding the given cells; returns a reference to it
    pub fn alloc(&mut self, cells: Vec<VmValue>) -> VmValue {
        let region = self.regions.len();
        self.regions.push(cells);
        VmValue::Ref { region, offset: 0 }
    }

    /// Allocate a region of float cells
    pub fn alloc_f64(&mut self, values: &[f64]) -> VmValue {
        self.alloc(values.iter().map(|v| VmValue::F(*v)).collect())
    }

    /// Allocate a region of integer cells
    pub fn alloc_i64(&mut self, values: &[i64]) -> VmValue {
        self.alloc(values.iter().map(|v| VmValue::I(*v)).collect())
    }

    /// Cells of the region a reference points into
    pub fn region(&self, r: &VmValue) -> Result<&[VmValue], Trap> {
        match r {
            VmValue::Ref { region, .. } => Ok(&self.regions[*region]),
            VmValue::Null => Err(Trap::NullDeref),
            other => Err(Trap::TypeMismatch {
                expected: "ref",
                found: other.kind(),
            }),
        }
    }

    /// Text captured from `rt_print` and `rt_warning`
    pub fn captured(&self) -> &[String] {
        &self.captured
    }

    /// Call a method by name
    pub fn call(&mut self, name: &str, args: &[VmValue]) -> Result<Option<VmValue>, Trap> {
        let index = self
            .unit
            .methods
            .iter()
            .position(|m| m.name == name)
            .ok_or_else(|| Trap::UnknownMethod(name.to_string()))?;
        self.call_index(index, args)
    }

    fn call_index(&mut self, index: usize, args: &[VmValue]) -> Result<Option<VmValue>, Trap> {
        let unit = self.unit;
        let method = &unit.methods[index];
        if args.len() != method.signature.params.len() {
            return Err(Trap::Arity {
                method: method.name.clone(),
                expected: method.signature.params.len(),
                got: args.len(),
            });
        }
        let mut slots: Vec<VmValue> = method
            .slots
            .iter()
            .map(|ty| match ty {
                VmType::I32 | VmType::I64 => VmValue::I(0),
                VmType::F32 | VmType::F64 => VmValue::F(0.0),
                VmType::Ref => VmValue::Null,
            })
            .collect();
        slots[..args.len()].copy_from_slice(args);

        let code = &unit.methods[index].instructions;
        let mut pc = 0usize;
        loop {
            let instruction = code[pc].clone();
            pc += 1;
            self.stats.executed += 1;
            match instruction {
                VmInstruction::ConstI { dst, value } => slots[dst.0 as usize] = VmValue::I(value),
                VmInstruction::ConstF { dst, value } => slots[dst.0 as usize] = VmValue::F(value),
                VmInstruction::ConstStr { dst, pool } => {
                    slots[dst.0 as usize] = VmValue::Ref {
                        region: self.strings[pool as usize],
                        offset: 0,
                    }
                }
                VmInstruction::ConstNull { dst } => slots[dst.0 as usize] = VmValue::Null,
                VmInstruction::Move { dst, src } => {
                    slots[dst.0 as usize] = slots[src.0 as usize]
                }
                VmInstruction::Binary { op, ty, dst, lhs, rhs } => {
                    let l = slots[lhs.0 as usize];
                    let r = slots[rhs.0 as usize];
                    slots[dst.0 as usize] = binary(op, ty, l, r)?;
                }
                VmInstruction::Unary { op, ty, dst, src } => {
                    let v = slots[src.0 as usize];
                    slots[dst.0 as usize] = unary(op, ty, v)?;
                }
                VmInstruction::Convert { dst, src, from, to } => {
                    let v = slots[src.0 as usize];
                    slots[dst.0 as usize] = convert(v, from, to)?;
                }
                VmInstruction::NewRegion { dst, len } => {
                    let region = self.regions.len();
                    self.regions.push(vec![VmValue::I(0); len as usize]);
                    slots[dst.0 as usize] = VmValue::Ref { region, offset: 0 };
                }
                VmInstruction::GlobalRef { dst, index } => {
                    slots[dst.0 as usize] = VmValue::Ref {
                        region: self.globals[index as usize],
                        offset: 0,
                    }
                }
                VmInstruction::PtrAdd { dst, ptr, delta } => {
                    let d = slots[delta.0 as usize].as_i()?;
                    match slots[ptr.0 as usize] {
                        VmValue::Ref { region, offset } => {
                            slots[dst.0 as usize] = VmValue::Ref {
                                region,
                                offset: offset + d,
                            }
                        }
                        VmValue::Null => return Err(Trap::NullDeref),
                        other => {
                            return Err(Trap::TypeMismatch {
                                expected: "ref",
                                found: other.kind(),
                            })
                        }
                    }
                }
                VmInstruction::LoadIndex { dst, ptr, index } => {
                    let i = slots[index.0 as usize].as_i()?;
                    let v = self.load(slots[ptr.0 as usize], i)?;
                    slots[dst.0 as usize] = v;
                }
                VmInstruction::StoreIndex { ptr, index, src } => {
                    let i = slots[index.0 as usize].as_i()?;
                    let v = slots[src.0 as usize];
                    self.store(slots[ptr.0 as usize], i, v)?;
                }
                VmInstruction::CallLocal { dst, method, args } => {
                    self.stats.calls += 1;
                    let values: Vec<VmValue> =
                        args.iter().map(|s| slots[s.0 as usize]).collect();
                    let ret = self.call_index(method as usize, &values)?;
                    if let Some(dst) = dst {
                        slots[dst.0 as usize] = ret.ok_or(Trap::TypeMismatch {
                            expected: "value",
                            found: "void",
                        })?;
                    }
                }
                VmInstruction::CallRuntime { dst, method, args } => {
                    self.stats.calls += 1;
                    let values: Vec<VmValue> =
                        args.iter().map(|s| slots[s.0 as usize]).collect();
                    let ret = self.call_runtime(method, &values)?;
                    if let Some(dst) = dst {
                        slots[dst.0 as usize] = ret.ok_or(Trap::TypeMismatch {
                            expected: "value",
                            found: "void",
                        })?;
                    }
                }
                VmInstruction::Jump { target } => pc = target,
                VmInstruction::BranchIf { cond, target } => {
                    if slots[cond.0 as usize].as_i()? != 0 {
                        self.stats.branches_taken += 1;
                        pc = target;
                    }
                }
                VmInstruction::Switch { value, cases, default } => {
                    let v = slots[value.0 as usize].as_i()?;
                    pc = cases
                        .iter()
                        .find(|(c, _)| *c == v)
                        .map(|(_, t)| *t)
                        .unwrap_or(default);
                }
                VmInstruction::Return { value } => {
                    return Ok(value.map(|s| slots[s.0 as usize]));
                }
            }
        }
    }

    fn resolve(&self, r: VmValue, index: i64) -> Result<(usize, usize), Trap> {
        match r {
            VmValue::Ref { region, offset } => {
                let i = offset + index;
                let len = self.regions[region].len();
                if i < 0 || i as usize >= len {
                    Err(Trap::Bounds { index: i, len })
                } else {
                    Ok((region, i as usize))
                }
            }
            VmValue::Null => Err(Trap::NullDeref),
            other => Err(Trap::TypeMismatch {
                expected: "ref",
                found: other.kind(),
            }),
        }
    }

    fn load(&self, r: VmValue, index: i64) -> Result<VmValue, Trap> {
        let (region, i) = self.resolve(r, index)?;
        Ok(self.regions[region][i])
    }

    fn store(&mut self, r: VmValue, index: i64, value: VmValue) -> Result<(), Trap> {
        let (region, i) = self.resolve(r, index)?;
        self.regions[region][i] = value;
        Ok(())
    }

    fn read_cstr(&self, r: VmValue) -> Result<String, Trap> {
        let mut out = String::new();
        let mut i = 0;
        loop {
            let c = self.load(r, i)?.as_i()?;
            if c == 0 {
                return Ok(out);
            }
            out.push(c as u8 as char);
            i += 1;
        }
    }

    /// In-process implementations of the standard runtime surface
    fn call_runtime(
        &mut self,
        method: u16,
        args: &[VmValue],
    ) -> Result<Option<VmValue>, Trap> {
        let name = self
            .unit
            .runtime_symbols
            .get(method as usize)
            .ok_or_else(|| Trap::UnknownMethod(format!("runtime #{method}")))?
            .clone();
        let unary_f = |args: &[VmValue], f: fn(f64) -> f64| -> Result<Option<VmValue>, Trap> {
            Ok(Some(VmValue::F(f(args[0].as_f()?))))
        };
        match name.as_str() {
            "malloc" => {
                let len = args[0].as_i()?.max(0) as usize;
                let region = self.regions.len();
                self.regions.push(vec![VmValue::I(0); len]);
                Ok(Some(VmValue::Ref { region, offset: 0 }))
            }
            "free" => Ok(None),
            "memset" => {
                let v = args[1].as_i()?;
                let n = args[2].as_i()?;
                for i in 0..n {
                    self.store(args[0], i, VmValue::I(v))?;
                }
                Ok(Some(args[0]))
            }
            "memcpy" => {
                let n = args[2].as_i()?;
                for i in 0..n {
                    let v = self.load(args[1], i)?;
                    self.store(args[0], i, v)?;
                }
                Ok(Some(args[0]))
            }
            "memcmp" => {
                let n = args[2].as_i()?;
                for i in 0..n {
                    let a = self.load(args[0], i)?.as_i()?;
                    let b = self.load(args[1], i)?.as_i()?;
                    if a != b {
                        return Ok(Some(VmValue::I(if a < b { -1 } else { 1 })));
                    }
                }
                Ok(Some(VmValue::I(0)))
            }
            "sqrt" => unary_f(args, f64::sqrt),
            "exp" => unary_f(args, f64::exp),
            "log" => unary_f(args, f64::ln),
            "sin" => unary_f(args, f64::sin),
            "cos" => unary_f(args, f64::cos),
            "tan" => unary_f(args, f64::tan),
            "fabs" => unary_f(args, f64::abs),
            "floor" => unary_f(args, f64::floor),
            "ceil" => unary_f(args, f64::ceil),
            "pow" => Ok(Some(VmValue::F(args[0].as_f()?.powf(args[1].as_f()?)))),
            "fmod" => Ok(Some(VmValue::F(args[0].as_f()? % args[1].as_f()?))),
            "strlen" => {
                let s = self.read_cstr(args[0])?;
                Ok(Some(VmValue::I(s.len() as i64)))
            }
            "strcmp" => {
                let a = self.read_cstr(args[0])?;
                let b = self.read_cstr(args[1])?;
                Ok(Some(VmValue::I(match a.cmp(&b) {
                    std::cmp::Ordering::Less => -1,
                    std::cmp::Ordering::Equal => 0,
                    std::cmp::Ordering::Greater => 1,
                })))
            }
            "rt_error" => Err(Trap::RuntimeError(self.read_cstr(args[0])?)),
            "rt_warning" | "rt_print" => {
                let text = self.read_cstr(args[0])?;
                self.captured.push(text);
                Ok(None)
            }
            other => Err(Trap::UnimplementedRuntime(other.to_string())),
        }
    }
}

/// Truncate an i64 to the width and signedness of `ty`
fn norm(ty: NumTy, v: i64) -> i64 {
    match ty {
        NumTy::I8 => v as i8 as i64,
        NumTy::I16 => v as i16 as i64,
        NumTy::I32 => v as i32 as i64,
        NumTy::I64 => v,
        NumTy::U8 => v as u8 as i64,
        NumTy::U16 => v as u16 as i64,
        NumTy::U32 => v as u32 as i64,
        NumTy::U64 => v,
        NumTy::F32 | NumTy::F64 => v,
    }
}

fn binary(op: VmBinOp, ty: NumTy, l: VmValue, r: VmValue) -> Result<VmValue, Trap> {
    // Reference equality is the one comparison defined over refs.
    if matches!(op, VmBinOp::CmpEq | VmBinOp::CmpNe) {
        let is_ref = |v: &VmValue| matches!(v, VmValue::Ref { .. } | VmValue::Null);
        if is_ref(&l) || is_ref(&r) {
            let eq = l == r;
            let hit = if matches!(op, VmBinOp::CmpEq) { eq } else { !eq };
            return Ok(VmValue::I(hit as i64));
        }
    }
    if ty.is_float() {
        let a = l.as_f()?;
        let b = r.as_f()?;
        let wide = |v: f64| -> f64 {
            if matches!(ty, NumTy::F32) {
                v as f32 as f64
            } else {
                v
            }
        };
        let (a, b) = (wide(a), wide(b));
        let out = match op {
            VmBinOp::Add => wide(a + b),
            VmBinOp::Sub => wide(a - b),
            VmBinOp::Mul => wide(a * b),
            VmBinOp::Div => wide(a / b),
            VmBinOp::Rem => wide(a % b),
            VmBinOp::CmpEq => return Ok(VmValue::I((a == b) as i64)),
            VmBinOp::CmpNe => return Ok(VmValue::I((a != b) as i64)),
            VmBinOp::CmpLt => return Ok(VmValue::I((a < b) as i64)),
            VmBinOp::CmpLe => return Ok(VmValue::I((a <= b) as i64)),
            VmBinOp::CmpGt => return Ok(VmValue::I((a > b) as i64)),
            VmBinOp::CmpGe => return Ok(VmValue::I((a >= b) as i64)),
            other => {
                return Err(Trap::TypeMismatch {
                    expected: "int operands",
                    found: match other {
                        VmBinOp::And | VmBinOp::Or | VmBinOp::Xor => "float bitwise",
                        _ => "float shift",
                    },
                })
            }
        };
        return Ok(VmValue::F(out));
    }

    let a = norm(ty, l.as_i()?);
    let b = norm(ty, r.as_i()?);
    let unsigned = ty.is_unsigned();
    let out = match op {
        VmBinOp::Add => a.wrapping_add(b),
        VmBinOp::Sub => a.wrapping_sub(b),
        VmBinOp::Mul => a.wrapping_mul(b),
        VmBinOp::Div => {
            if b == 0 {
                return Err(Trap::DivideByZero);
            }
            if unsigned {
                ((a as u64) / (b as u64)) as i64
            } else {
                a.wrapping_div(b)
            }
        }
        VmBinOp::Rem => {
            if b == 0 {
                return Err(Trap::DivideByZero);
            }
            if unsigned {
                ((a as u64) % (b as u64)) as i64
            } else {
                a.wrapping_rem(b)
            }
        }
        VmBinOp::And => a & b,
        VmBinOp::Or => a | b,
        VmBinOp::Xor => a ^ b,
        VmBinOp::Shl => a.wrapping_shl(b as u32),
        VmBinOp::Shr => {
            if unsigned {
                let width = ty.int_width();
                let mask = if width == 64 {
                    u64::MAX
                } else {
                    (1u64 << width) - 1
                };
                (((a as u64) & mask) >> (b as u32 % width.max(1))) as i64
            } else {
                a.wrapping_shr(b as u32)
            }
        }
        VmBinOp::CmpEq => return Ok(VmValue::I(cmp_int(a, b, unsigned, |o| o.is_eq()))),
        VmBinOp::CmpNe => return Ok(VmValue::I(cmp_int(a, b, unsigned, |o| o.is_ne()))),
        VmBinOp::CmpLt => return Ok(VmValue::I(cmp_int(a, b, unsigned, |o| o.is_lt()))),
        VmBinOp::CmpLe => return Ok(VmValue::I(cmp_int(a, b, unsigned, |o| o.is_le()))),
        VmBinOp::CmpGt => return Ok(VmValue::I(cmp_int(a, b, unsigned, |o| o.is_gt()))),
        VmBinOp::CmpGe => return Ok(VmValue::I(cmp_int(a, b, unsigned, |o| o.is_ge()))),
    };
    Ok(VmValue::I(norm(ty, out)))
}

fn cmp_int(a: i64, b: i64, unsigned: bool, hit: fn(std::cmp::Ordering) -> bool) -> i64 {
    let ordering = if unsigned {
        (a as u64).cmp(&(b as u64))
    } else {
        a.cmp(&b)
    };
    hit(ordering) as i64
}

fn unary(op: VmUnOp, ty: NumTy, v: VmValue) -> Result<VmValue, Trap> {
    if ty.is_float() {
        let a = v.as_f()?;
        return match op {
            VmUnOp::Neg => Ok(VmValue::F(-a)),
            VmUnOp::Not => Ok(VmValue::I((a == 0.0) as i64)),
            VmUnOp::BitNot => Err(Trap::TypeMismatch {
                expected: "int",
                found: "float",
            }),
        };
    }
    let a = norm(ty, v.as_i()?);
    let out = match op {
        VmUnOp::Neg => a.wrapping_neg(),
        VmUnOp::BitNot => !a,
        VmUnOp::Not => (a == 0) as i64,
    };
    Ok(VmValue::I(norm(ty, out)))
}

fn convert(v: VmValue, from: NumTy, to: NumTy) -> Result<VmValue, Trap> {
    let wide = if from.is_float() {
        v.as_f()?
    } else {
        norm(from, v.as_i()?) as f64
    };
    if to.is_float() {
        return Ok(VmValue::F(if matches!(to, NumTy::F32) {
            wide as f32 as f64
        } else {
            wide
        }));
    }
    // Float to int truncates toward zero; int to int renormalizes.
    let raw = if from.is_float() {
        wide as i64
    } else {
        v.as_i()?
    };
    Ok(VmValue::I(norm(to, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{AbiOptions, SourceLanguage};
    use crate::codegen::generate_unit;
    use crate::ir::parse_unit;
    use crate::table::ReferenceMethodTable;

    fn compile(src: &str, language: SourceLanguage) -> CompiledUnit {
        let unit = parse_unit(src).unwrap();
        generate_unit(
            "test.Unit",
            &unit,
            language,
            &AbiOptions::default(),
            &ReferenceMethodTable::standard(),
        )
        .unwrap()
    }

    #[test]
    fn test_loop_sums_array() {
        let unit = compile(
            r#"
            double total (double * x, int n)
            {
              double s;
              int i;

              <bb 2>:
                s = 0.0;
                i = 0;
                goto <bb 4>;

              <bb 3>:
                s = s + x[i];
                i = i + 1;
                goto <bb 4>;

              <bb 4>:
                if (i < n) goto <bb 3>; else goto <bb 5>;

              <bb 5>:
                return s;
            }
            "#,
            SourceLanguage::C,
        );
        let mut m = Machine::new(&unit);
        let x = m.alloc_f64(&[1.5, 2.0, 3.25]);
        let r = m.call("total", &[x, VmValue::I(3)]).unwrap();
        assert_eq!(r, Some(VmValue::F(6.75)));
        // The loop body ran exactly three times.
        assert_eq!(m.stats.branches_taken, 3);
    }

    #[test]
    fn test_out_param_write_is_visible() {
        let unit = compile(
            r#"
            void doubleit (double * out, double v)
            {
              <bb 2>:
                *out = v * 2.0;
                return;
            }
            "#,
            SourceLanguage::C,
        );
        let mut m = Machine::new(&unit);
        let out = m.alloc_f64(&[0.0]);
        m.call("doubleit", &[out, VmValue::F(21.0)]).unwrap();
        assert_eq!(m.region(&out).unwrap()[0], VmValue::F(42.0));
    }

    #[test]
    fn test_aliased_views_share_a_region() {
        let unit = compile(
            r#"
            double relay (double * x)
            {
              double * p;

              <bb 2>:
                p = x + 2;
                *p = 9.0;
                return x[2];
            }
            "#,
            SourceLanguage::C,
        );
        let mut m = Machine::new(&unit);
        let x = m.alloc_f64(&[0.0, 0.0, 0.0, 0.0]);
        let r = m.call("relay", &[x]).unwrap();
        assert_eq!(r, Some(VmValue::F(9.0)));
    }

    #[test]
    fn test_out_of_bounds_access_traps() {
        let unit = compile(
            r#"
            double peek (double * x, int i)
            {
              <bb 2>:
                return x[i];
            }
            "#,
            SourceLanguage::C,
        );
        let mut m = Machine::new(&unit);
        let x = m.alloc_f64(&[1.0, 2.0]);
        let err = m.call("peek", &[x, VmValue::I(5)]).unwrap_err();
        assert!(matches!(err, Trap::Bounds { index: 5, len: 2 }));
    }

    #[test]
    fn test_fortran_by_reference_scalar_updates_caller_cell() {
        let unit = compile(
            r#"
            void bump (double a)
            {
              <bb 2>:
                a = a + 1.0;
                return;
            }
            "#,
            SourceLanguage::Fortran,
        );
        let mut m = Machine::new(&unit);
        let cell = m.alloc_f64(&[41.0]);
        m.call("bump", &[cell]).unwrap();
        assert_eq!(m.region(&cell).unwrap()[0], VmValue::F(42.0));
    }

    #[test]
    fn test_switch_dispatch() {
        let unit = compile(
            r#"
            int label (int k)
            {
              <bb 2>:
                switch (k)
                {
                  case 1: goto <bb 3>;
                  case 4: goto <bb 4>;
                  default: goto <bb 5>;
                }

              <bb 3>:
                return 10;

              <bb 4>:
                return 40;

              <bb 5>:
                return -1;
            }
            "#,
            SourceLanguage::C,
        );
        let mut m = Machine::new(&unit);
        assert_eq!(m.call("label", &[VmValue::I(1)]).unwrap(), Some(VmValue::I(10)));
        assert_eq!(m.call("label", &[VmValue::I(4)]).unwrap(), Some(VmValue::I(40)));
        assert_eq!(m.call("label", &[VmValue::I(7)]).unwrap(), Some(VmValue::I(-1)));
    }

    #[test]
    fn test_runtime_math_call() {
        let unit = compile(
            r#"
            double hyp (double a, double b)
            {
              double s;
              double t;

              <bb 2>:
                s = a * a;
                t = b * b;
                s = s + t;
                s = sqrt (s);
                return s;
            }
            "#,
            SourceLanguage::C,
        );
        let mut m = Machine::new(&unit);
        let r = m.call("hyp", &[VmValue::F(3.0), VmValue::F(4.0)]).unwrap();
        assert_eq!(r, Some(VmValue::F(5.0)));
    }

    #[test]
    fn test_cast_int_count_divides_float_sum() {
        let unit = compile(
            r#"
            double mean (double * x, int n)
            {
              double s;
              double d;
              int i;

              <bb 2>:
                s = 0.0;
                i = 0;
                goto <bb 4>;

              <bb 3>:
                s = s + x[i];
                i = i + 1;
                goto <bb 4>;

              <bb 4>:
                if (i < n) goto <bb 3>; else goto <bb 5>;

              <bb 5>:
                d = (double) n;
                s = s / d;
                return s;
            }
            "#,
            SourceLanguage::C,
        );
        let mut m = Machine::new(&unit);
        let x = m.alloc_f64(&[1.0, 2.0, 6.0]);
        let r = m.call("mean", &[x, VmValue::I(3)]).unwrap();
        assert_eq!(r, Some(VmValue::F(3.0)));
    }

    #[test]
    fn test_unsigned_comparison_uses_unsigned_order() {
        let unit = compile(
            r#"
            int wraps (unsigned int a, unsigned int b)
            {
              <bb 2>:
                if (a < b) goto <bb 3>; else goto <bb 4>;

              <bb 3>:
                return 1;

              <bb 4>:
                return 0;
            }
            "#,
            SourceLanguage::C,
        );
        let mut m = Machine::new(&unit);
        // 0xFFFFFFFF as unsigned is the larger operand.
        let r = m
            .call("wraps", &[VmValue::I(-1), VmValue::I(1)])
            .unwrap();
        assert_eq!(r, Some(VmValue::I(0)));
    }

    #[test]
    fn test_rt_error_traps_with_message() {
        let unit = compile(
            r#"
            void fail ()
            {
              <bb 2>:
                rt_error ("bad input");
                return;
            }
            "#,
            SourceLanguage::C,
        );
        let mut m = Machine::new(&unit);
        let err = m.call("fail", &[]).unwrap_err();
        assert!(matches!(err, Trap::RuntimeError(msg) if msg == "bad input"));
    }
}
