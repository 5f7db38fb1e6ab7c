//! Class image encoding
//!
//! Serializes a [`CompiledUnit`] into the byte artifact the runtime loads.
//! The encoding is fully deterministic: every pool and table is written in
//! the order the generator produced it (definition order for methods and
//! globals, first-use order for strings), so compiling the same sources
//! twice yields byte-identical images.
//!
//! Integers are little-endian. Variable-length items carry an explicit
//! length prefix; there are no alignment gaps.

use super::method::{MethodCode, MethodSig, Slot, VmInstruction};
use super::{CellInit, CompiledUnit, GlobalData};

/// Magic bytes at the start of every class image
pub const IMAGE_MAGIC: [u8; 4] = *b"GMBC";

/// Image format version
pub const IMAGE_VERSION: u16 = 1;

impl CompiledUnit {
    /// Encode the unit as a loadable class image
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::default();
        w.bytes(&IMAGE_MAGIC);
        w.u16(IMAGE_VERSION);
        w.str16(&self.name);

        w.u16(self.strings.len() as u16);
        for s in &self.strings {
            w.u32(s.len() as u32);
            w.bytes(s.as_bytes());
        }

        w.u16(self.runtime_symbols.len() as u16);
        for s in &self.runtime_symbols {
            w.str16(s);
        }

        w.u16(self.globals.len() as u16);
        for g in &self.globals {
            encode_global(&mut w, g);
        }

        w.u16(self.methods.len() as u16);
        for m in &self.methods {
            encode_method(&mut w, m);
        }
        w.out
    }
}

fn encode_global(w: &mut Writer, global: &GlobalData) {
    w.str16(&global.name);
    w.u32(global.cells.len() as u32);
    for cell in &global.cells {
        match cell {
            CellInit::I(v) => {
                w.u8(0);
                w.u64(*v as u64);
            }
            CellInit::F(v) => {
                w.u8(1);
                w.u64(v.to_bits());
            }
        }
    }
}

fn encode_method(w: &mut Writer, method: &MethodCode) {
    w.str16(&method.name);
    encode_signature(w, &method.signature);
    w.u16(method.slots.len() as u16);
    for slot in &method.slots {
        w.u8(slot.code());
    }
    w.u32(method.instructions.len() as u32);
    for instruction in &method.instructions {
        encode_instruction(w, instruction);
    }
}

fn encode_signature(w: &mut Writer, sig: &MethodSig) {
    w.u8(sig.params.len() as u8);
    for p in &sig.params {
        w.u8(p.code());
    }
    match sig.ret {
        None => w.u8(0xFF),
        Some(ty) => w.u8(ty.code()),
    }
}

fn encode_instruction(w: &mut Writer, instruction: &VmInstruction) {
    use VmInstruction::*;
    match instruction {
        ConstI { dst, value } => {
            w.u8(0x01);
            w.slot(*dst);
            w.u64(*value as u64);
        }
        ConstF { dst, value } => {
            w.u8(0x02);
            w.slot(*dst);
            w.u64(value.to_bits());
        }
        ConstStr { dst, pool } => {
            w.u8(0x03);
            w.slot(*dst);
            w.u16(*pool);
        }
        ConstNull { dst } => {
            w.u8(0x04);
            w.slot(*dst);
        }
        Move { dst, src } => {
            w.u8(0x05);
            w.slot(*dst);
            w.slot(*src);
        }
        Binary { op, ty, dst, lhs, rhs } => {
            w.u8(0x06);
            w.u8(*op as u8);
            w.u8(ty.code());
            w.slot(*dst);
            w.slot(*lhs);
            w.slot(*rhs);
        }
        Unary { op, ty, dst, src } => {
            w.u8(0x07);
            w.u8(*op as u8);
            w.u8(ty.code());
            w.slot(*dst);
            w.slot(*src);
        }
        Convert { dst, src, from, to } => {
            w.u8(0x08);
            w.slot(*dst);
            w.slot(*src);
            w.u8(from.code());
            w.u8(to.code());
        }
        NewRegion { dst, len } => {
            w.u8(0x09);
            w.slot(*dst);
            w.u32(*len);
        }
        GlobalRef { dst, index } => {
            w.u8(0x0A);
            w.slot(*dst);
            w.u16(*index);
        }
        PtrAdd { dst, ptr, delta } => {
            w.u8(0x0B);
            w.slot(*dst);
            w.slot(*ptr);
            w.slot(*delta);
        }
        LoadIndex { dst, ptr, index } => {
            w.u8(0x0C);
            w.slot(*dst);
            w.slot(*ptr);
            w.slot(*index);
        }
        StoreIndex { ptr, index, src } => {
            w.u8(0x0D);
            w.slot(*ptr);
            w.slot(*index);
            w.slot(*src);
        }
        CallLocal { dst, method, args } => {
            w.u8(0x0E);
            w.opt_slot(*dst);
            w.u16(*method);
            w.slots(args);
        }
        CallRuntime { dst, method, args } => {
            w.u8(0x0F);
            w.opt_slot(*dst);
            w.u16(*method);
            w.slots(args);
        }
        Jump { target } => {
            w.u8(0x10);
            w.u32(*target as u32);
        }
        BranchIf { cond, target } => {
            w.u8(0x11);
            w.slot(*cond);
            w.u32(*target as u32);
        }
        Switch { value, cases, default } => {
            w.u8(0x12);
            w.slot(*value);
            w.u16(cases.len() as u16);
            for (v, target) in cases {
                w.u64(*v as u64);
                w.u32(*target as u32);
            }
            w.u32(*default as u32);
        }
        Return { value } => {
            w.u8(0x13);
            w.opt_slot(*value);
        }
    }
}

#[derive(Default)]
struct Writer {
    out: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, v: u8) {
        self.out.push(v);
    }
    fn u16(&mut self, v: u16) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }
    fn u32(&mut self, v: u32) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }
    fn u64(&mut self, v: u64) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }
    fn bytes(&mut self, v: &[u8]) {
        self.out.extend_from_slice(v);
    }
    fn str16(&mut self, s: &str) {
        self.u16(s.len() as u16);
        self.bytes(s.as_bytes());
    }
    fn slot(&mut self, s: Slot) {
        self.u16(s.0);
    }
    fn opt_slot(&mut self, s: Option<Slot>) {
        match s {
            None => self.u16(u16::MAX),
            Some(s) => self.u16(s.0),
        }
    }
    fn slots(&mut self, slots: &[Slot]) {
        self.u8(slots.len() as u8);
        for s in slots {
            self.slot(*s);
        }
    }
}
