//! The stack-bytecode instruction set and its assembler.
//!
//! Stands in for the native code emitter `spec.md` §1 treats as an external
//! collaborator: a "machine code fragment" here is a byte string a
//! [`crate::compile::vm`] interprets directly, and "jumping to a resume
//! address" means continuing interpretation at that byte offset.

use crate::ast::BinOp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    PushInt = 1,
    PushFloat = 2,
    PushBool = 3,
    PushNone = 4,
    LoadLocal = 5,
    StoreLocal = 6,
    LoadGlobal = 7,
    StoreGlobal = 8,
    BinOp = 9,
    UnNeg = 10,
    UnNot = 11,
    UnInvert = 12,
    Jump = 13,
    JumpIfFalse = 14,
    Call = 15,
    Return = 16,
    Pop = 17,
    PushUnicodeConst = 18,
    BuildList = 19,
    BuildDict = 20,
    LoadAttr = 21,
    StoreAttr = 22,
    Construct = 23,
}

impl Opcode {
    fn from_u8(b: u8) -> Self {
        match b {
            1 => Self::PushInt,
            2 => Self::PushFloat,
            3 => Self::PushBool,
            4 => Self::PushNone,
            5 => Self::LoadLocal,
            6 => Self::StoreLocal,
            7 => Self::LoadGlobal,
            8 => Self::StoreGlobal,
            9 => Self::BinOp,
            10 => Self::UnNeg,
            11 => Self::UnNot,
            12 => Self::UnInvert,
            13 => Self::Jump,
            14 => Self::JumpIfFalse,
            15 => Self::Call,
            16 => Self::Return,
            17 => Self::Pop,
            18 => Self::PushUnicodeConst,
            19 => Self::BuildList,
            20 => Self::BuildDict,
            21 => Self::LoadAttr,
            22 => Self::StoreAttr,
            23 => Self::Construct,
            other => panic!("corrupt bytecode: unknown opcode {other}"),
        }
    }
}

/// Forward-jump placeholder returned by `emit_jump`/`emit_jump_if_false`;
/// must be resolved with `patch_jump` before `build()`.
#[derive(Debug, Clone, Copy)]
pub struct JumpPatch(usize);

/// A named resume point, placed with `place_label` and resolved to a byte
/// offset once the surrounding fragment finishes emitting
/// (`spec.md` §4.4 "call_split_labels").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(pub usize);

/// Assembles a fragment's bytecode, tracking label placements the way the
/// emitter interface's `assemble()` is specified to return them
/// (`spec.md` §6: "(bytes, patch_offset_set, label_offsets_multimap)").
#[derive(Debug, Default)]
pub struct CodeBuilder {
    bytes: Vec<u8>,
    labels: Vec<(usize, String)>,
    unicode_consts: Vec<String>,
}

impl CodeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn emit_op(&mut self, op: Opcode) {
        self.bytes.push(op as u8);
    }

    pub fn emit_push_int(&mut self, v: i64) {
        self.emit_op(Opcode::PushInt);
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn emit_push_float(&mut self, v: f64) {
        self.emit_op(Opcode::PushFloat);
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn emit_push_bool(&mut self, v: bool) {
        self.emit_op(Opcode::PushBool);
        self.bytes.push(u8::from(v));
    }

    pub fn emit_push_none(&mut self) {
        self.emit_op(Opcode::PushNone);
    }

    pub fn emit_push_unicode(&mut self, s: String) {
        self.emit_op(Opcode::PushUnicodeConst);
        let idx = self.unicode_consts.len();
        self.unicode_consts.push(s);
        self.bytes.extend_from_slice(&(idx as u32).to_le_bytes());
    }

    pub fn emit_load_local(&mut self, slot: u32) {
        self.emit_op(Opcode::LoadLocal);
        self.bytes.extend_from_slice(&slot.to_le_bytes());
    }

    pub fn emit_store_local(&mut self, slot: u32) {
        self.emit_op(Opcode::StoreLocal);
        self.bytes.extend_from_slice(&slot.to_le_bytes());
    }

    pub fn emit_load_global(&mut self, index: u32) {
        self.emit_op(Opcode::LoadGlobal);
        self.bytes.extend_from_slice(&index.to_le_bytes());
    }

    pub fn emit_store_global(&mut self, index: u32) {
        self.emit_op(Opcode::StoreGlobal);
        self.bytes.extend_from_slice(&index.to_le_bytes());
    }

    pub fn emit_binop(&mut self, op: BinOp) {
        self.emit_op(Opcode::BinOp);
        self.bytes.push(binop_tag(op));
    }

    pub fn emit_neg(&mut self) {
        self.emit_op(Opcode::UnNeg);
    }

    pub fn emit_not(&mut self) {
        self.emit_op(Opcode::UnNot);
    }

    pub fn emit_invert(&mut self) {
        self.emit_op(Opcode::UnInvert);
    }

    pub fn emit_pop(&mut self) {
        self.emit_op(Opcode::Pop);
    }

    pub fn emit_return(&mut self) {
        self.emit_op(Opcode::Return);
    }

    /// Emits a call to the JIT dispatcher trampoline, identified by
    /// `callsite_token` (`spec.md` §4.4 "Call sites"). `argc` tells the VM
    /// how many already-pushed stack values are the call's arguments.
    pub fn emit_call(&mut self, function_id: i64, callsite_token: u64, argc: u32) {
        self.emit_op(Opcode::Call);
        self.bytes.extend_from_slice(&function_id.to_le_bytes());
        self.bytes.extend_from_slice(&callsite_token.to_le_bytes());
        self.bytes.extend_from_slice(&argc.to_le_bytes());
    }

    /// Pops `count` values and pushes a freshly built list (also used for
    /// tuple and set literals: this assembler does not distinguish their
    /// runtime representation).
    pub fn emit_build_list(&mut self, count: u32) {
        self.emit_op(Opcode::BuildList);
        self.bytes.extend_from_slice(&count.to_le_bytes());
    }

    /// Pops `2 * count` values (key, value, key, value, ...) and pushes a
    /// freshly built dict.
    pub fn emit_build_dict(&mut self, count: u32) {
        self.emit_op(Opcode::BuildDict);
        self.bytes.extend_from_slice(&count.to_le_bytes());
    }

    /// Pops an instance, pushes `attrs[attr_index]`.
    pub fn emit_load_attr(&mut self, attr_index: u32) {
        self.emit_op(Opcode::LoadAttr);
        self.bytes.extend_from_slice(&attr_index.to_le_bytes());
    }

    /// Pops an instance, then the value below it, and stores the value at
    /// `attrs[attr_index]` (the visitor pushes the value first, then the
    /// `self` instance, so the instance is always on top).
    pub fn emit_store_attr(&mut self, attr_index: u32) {
        self.emit_op(Opcode::StoreAttr);
        self.bytes.extend_from_slice(&attr_index.to_le_bytes());
    }

    /// Pops `argc` constructor arguments, allocates a fresh instance of
    /// `class_id`, runs its `__init__` fragment (dispatched exactly like
    /// [`Opcode::Call`], since the constructor's function id equals the
    /// class id), and pushes the new instance.
    pub fn emit_construct(&mut self, class_id: i64, callsite_token: u64, argc: u32) {
        self.emit_op(Opcode::Construct);
        self.bytes.extend_from_slice(&class_id.to_le_bytes());
        self.bytes.extend_from_slice(&callsite_token.to_le_bytes());
        self.bytes.extend_from_slice(&argc.to_le_bytes());
    }

    pub fn emit_jump(&mut self) -> JumpPatch {
        self.emit_op(Opcode::Jump);
        let patch = self.bytes.len();
        self.bytes.extend_from_slice(&0u32.to_le_bytes());
        JumpPatch(patch)
    }

    pub fn emit_jump_if_false(&mut self) -> JumpPatch {
        self.emit_op(Opcode::JumpIfFalse);
        let patch = self.bytes.len();
        self.bytes.extend_from_slice(&0u32.to_le_bytes());
        JumpPatch(patch)
    }

    pub fn patch_jump(&mut self, patch: JumpPatch) {
        let target = self.bytes.len();
        self.patch_jump_to(patch, target);
    }

    pub fn patch_jump_to(&mut self, patch: JumpPatch, target: usize) {
        let bytes = (target as u32).to_le_bytes();
        self.bytes[patch.0..patch.0 + 4].copy_from_slice(&bytes);
    }

    /// Marks the current offset with `name`, for later resolution against a
    /// fragment's `call_split_labels` (`spec.md` §4.4).
    pub fn place_label(&mut self, name: String) -> Label {
        let offset = self.bytes.len();
        self.labels.push((offset, name));
        Label(offset)
    }

    #[must_use]
    pub fn offset(&self) -> usize {
        self.bytes.len()
    }

    /// `assemble()`: yields the byte string, the label offset map, and the
    /// interned unicode constant table the VM needs to decode
    /// `PushUnicodeConst`.
    #[must_use]
    pub fn build(self) -> (Vec<u8>, Vec<(usize, String)>, Vec<String>) {
        (self.bytes, self.labels, self.unicode_consts)
    }
}

fn binop_tag(op: BinOp) -> u8 {
    match op {
        BinOp::Add => 0,
        BinOp::Sub => 1,
        BinOp::Mul => 2,
        BinOp::Div => 3,
        BinOp::FloorDiv => 4,
        BinOp::Mod => 5,
        BinOp::Pow => 6,
        BinOp::And => 7,
        BinOp::Or => 8,
        BinOp::BitAnd => 9,
        BinOp::BitOr => 10,
        BinOp::BitXor => 11,
        BinOp::LShift => 12,
        BinOp::RShift => 13,
        BinOp::Eq => 14,
        BinOp::NotEq => 15,
        BinOp::Lt => 16,
        BinOp::LtE => 17,
        BinOp::Gt => 18,
        BinOp::GtE => 19,
    }
}

pub(super) fn binop_from_tag(tag: u8) -> BinOp {
    match tag {
        0 => BinOp::Add,
        1 => BinOp::Sub,
        2 => BinOp::Mul,
        3 => BinOp::Div,
        4 => BinOp::FloorDiv,
        5 => BinOp::Mod,
        6 => BinOp::Pow,
        7 => BinOp::And,
        8 => BinOp::Or,
        9 => BinOp::BitAnd,
        10 => BinOp::BitOr,
        11 => BinOp::BitXor,
        12 => BinOp::LShift,
        13 => BinOp::RShift,
        14 => BinOp::Eq,
        15 => BinOp::NotEq,
        16 => BinOp::Lt,
        17 => BinOp::LtE,
        18 => BinOp::Gt,
        other => {
            debug_assert_eq!(other, 19);
            BinOp::GtE
        }
    }
}

pub(super) fn read_op(bytes: &[u8], ip: usize) -> Opcode {
    Opcode::from_u8(bytes[ip])
}

pub(super) fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(bytes[at..at + 4].try_into().expect("4 bytes"))
}

pub(super) fn read_u64(bytes: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(bytes[at..at + 8].try_into().expect("8 bytes"))
}

pub(super) fn read_i64(bytes: &[u8], at: usize) -> i64 {
    i64::from_le_bytes(bytes[at..at + 8].try_into().expect("8 bytes"))
}

pub(super) fn read_f64(bytes: &[u8], at: usize) -> f64 {
    f64::from_le_bytes(bytes[at..at + 8].try_into().expect("8 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jump_patch_resolves_to_current_offset() {
        let mut b = CodeBuilder::new();
        let patch = b.emit_jump();
        b.emit_push_none();
        b.patch_jump(patch);
        let (bytes, _, _) = b.build();
        let target = read_u32(&bytes, 1) as usize;
        assert_eq!(target, bytes.len());
    }

    #[test]
    fn place_label_records_its_offset() {
        let mut b = CodeBuilder::new();
        b.emit_push_int(1);
        let label = b.place_label("after_call".into());
        let (_, labels, _) = b.build();
        assert_eq!(labels, vec![(label.0, "after_call".to_owned())]);
    }
}
