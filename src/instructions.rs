//! Static description of the tProc instruction set.
//!
//! Every mnemonic maps to an encoding format, an opcode and the bit position of
//! each operand inside the 64-bit word. The table is never mutated; callers look
//! entries up by mnemonic (assembly) or by opcode (decoding).

use serde::{Deserialize, Serialize};

pub const WORD_BITS: u32 = 64;
pub const OPCODE_SHIFT: u32 = 56;
pub const IMM_BITS: u8 = 31;
pub const ADDR_BITS: u8 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Format {
    /// Immediate operand in the low 31 bits.
    Immediate,
    /// Jump with at most a register operand.
    Jump1,
    /// Jump guarded by a register comparison.
    Jump2,
    /// Register-only operands.
    Register,
}

/// Which code space an operator field draws from. Bitwise and compare codes
/// overlap, so the field declares the space it decodes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpSpace {
    Arith,
    Bitwise,
    Compare,
    Half,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AluOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
    Not,
    Shl,
    Shr,
    Upper,
    Lower,
}

impl AluOp {
    pub const ALL: [AluOp; 17] = [
        AluOp::Gt,
        AluOp::Ge,
        AluOp::Lt,
        AluOp::Le,
        AluOp::Eq,
        AluOp::Ne,
        AluOp::Add,
        AluOp::Sub,
        AluOp::Mul,
        AluOp::And,
        AluOp::Or,
        AluOp::Xor,
        AluOp::Not,
        AluOp::Shl,
        AluOp::Shr,
        AluOp::Upper,
        AluOp::Lower,
    ];

    fn entry(self) -> (&'static str, OpSpace, u8) {
        use OpSpace::*;
        match self {
            AluOp::Gt => (">", Compare, 0b0000),
            AluOp::Ge => (">=", Compare, 0b0001),
            AluOp::Lt => ("<", Compare, 0b0010),
            AluOp::Le => ("<=", Compare, 0b0011),
            AluOp::Eq => ("==", Compare, 0b0100),
            AluOp::Ne => ("!=", Compare, 0b0101),
            AluOp::Add => ("+", Arith, 0b1000),
            AluOp::Sub => ("-", Arith, 0b1001),
            AluOp::Mul => ("*", Arith, 0b1010),
            AluOp::And => ("&", Bitwise, 0b0000),
            AluOp::Or => ("|", Bitwise, 0b0001),
            AluOp::Xor => ("^", Bitwise, 0b0010),
            AluOp::Not => ("~", Bitwise, 0b0011),
            AluOp::Shl => ("<<", Bitwise, 0b0100),
            AluOp::Shr => (">>", Bitwise, 0b0101),
            AluOp::Upper => ("upper", Half, 0b1010),
            AluOp::Lower => ("lower", Half, 0b0101),
        }
    }

    pub fn code(self) -> u8 {
        self.entry().2
    }

    pub fn space(self) -> OpSpace {
        self.entry().1
    }

    pub fn symbol(self) -> &'static str {
        self.entry().0
    }

    /// Symbols are unique across spaces, so no context is needed here.
    pub fn from_symbol(sym: &str) -> Option<AluOp> {
        Self::ALL.into_iter().find(|op| op.symbol() == sym)
    }

    pub fn from_code(space: OpSpace, code: u8) -> Option<AluOp> {
        Self::ALL
            .into_iter()
            .find(|op| op.space() == space && op.code() == code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Page,
    Channel,
    Reg,
    Op(OpSpace),
    /// Signed immediate, folded into 31 bits.
    Imm,
    /// Program address, usually a label reference.
    Addr,
    Flag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub operand: usize,
    pub offset: u8,
    pub width: u8,
    pub kind: FieldKind,
}

impl Field {
    pub fn mask(&self) -> u64 {
        (1u64 << self.width) - 1
    }
}

const fn page(operand: usize) -> Field {
    Field { operand, offset: 53, width: 3, kind: FieldKind::Page }
}
const fn chan(operand: usize) -> Field {
    Field { operand, offset: 50, width: 3, kind: FieldKind::Channel }
}
const fn reg(operand: usize, offset: u8) -> Field {
    Field { operand, offset, width: 5, kind: FieldKind::Reg }
}
const fn op(operand: usize, space: OpSpace) -> Field {
    Field { operand, offset: 46, width: 4, kind: FieldKind::Op(space) }
}
const fn imm(operand: usize) -> Field {
    Field { operand, offset: 0, width: IMM_BITS, kind: FieldKind::Imm }
}
const fn addr(operand: usize) -> Field {
    Field { operand, offset: 0, width: ADDR_BITS, kind: FieldKind::Addr }
}
const fn flag(operand: usize, offset: u8) -> Field {
    Field { operand, offset, width: 1, kind: FieldKind::Flag }
}

#[derive(Debug, Clone, Copy)]
pub struct InstrDesc {
    pub mnemonic: &'static str,
    pub format: Format,
    pub opcode: u8,
    pub fields: &'static [Field],
    /// Bits always set in the encoded word.
    pub forced: u64,
    /// Bit that marks "update ALU flags", when the instruction has one.
    pub uf_bit: Option<u8>,
    /// Program-memory slots consumed.
    pub slots: u32,
    pub repr: &'static str,
}

impl InstrDesc {
    pub fn arity(&self) -> usize {
        self.fields.iter().map(|f| f.operand + 1).max().unwrap_or(0)
    }

    /// First field that carries a given operand.
    pub fn field_for(&self, operand: usize) -> Option<&Field> {
        self.fields.iter().find(|f| f.operand == operand)
    }
}

const fn desc(
    mnemonic: &'static str,
    format: Format,
    opcode: u8,
    fields: &'static [Field],
    repr: &'static str,
) -> InstrDesc {
    InstrDesc { mnemonic, format, opcode, fields, forced: 0, uf_bit: None, slots: 1, repr }
}

use Format::*;

pub static TABLE: &[InstrDesc] = &[
    desc("nop", Immediate, 0b0000_0000, &[], ""),
    desc("pushi", Immediate, 0b0001_0000, &[page(0), reg(1, 41), reg(2, 36), imm(3)], "{0}, ${1}, ${2}, {3}"),
    desc("popi", Immediate, 0b0001_0001, &[page(0), reg(1, 41)], "{0}, ${1}"),
    InstrDesc {
        uf_bit: Some(31),
        ..desc(
            "mathi",
            Immediate,
            0b0001_0010,
            &[page(0), reg(1, 41), reg(2, 36), op(3, OpSpace::Arith), imm(4)],
            "{0}, ${1}, ${2} {3} {4}",
        )
    },
    desc("seti", Immediate, 0b0001_0011, &[chan(0), page(1), reg(2, 36), imm(3)], "{0}, {1}, ${2}, {3}"),
    desc("synci", Immediate, 0b0001_0100, &[imm(0)], "{0}"),
    InstrDesc { slots: 2, ..desc("waiti", Immediate, 0b0001_0101, &[chan(0), imm(1)], "{0}, {1}") },
    InstrDesc {
        uf_bit: Some(31),
        ..desc(
            "bitwi",
            Immediate,
            0b0001_0110,
            &[page(0), reg(1, 41), reg(2, 36), op(3, OpSpace::Bitwise), imm(4)],
            "{0}, ${1}, ${2} {3} {4}",
        )
    },
    desc("memri", Immediate, 0b0001_0111, &[page(0), reg(1, 41), imm(2)], "{0}, ${1}, {2}"),
    desc("memwi", Immediate, 0b0001_1000, &[page(0), reg(1, 31), imm(2)], "{0}, ${1}, {2}"),
    InstrDesc {
        uf_bit: Some(31),
        ..desc("regwi", Immediate, 0b0001_1001, &[page(0), reg(1, 41), imm(2)], "{0}, ${1}, {2}")
    },
    desc("setbi", Immediate, 0b0001_1010, &[page(0), reg(1, 41), imm(2)], "{0}, ${1}, {2}"),
    desc("wseti", Immediate, 0b0001_1011, &[chan(0), page(1), reg(2, 36), imm(3)], "{0}, {1}, ${2}, &{3}"),
    desc("dporti", Immediate, 0b0001_1100, &[chan(0), page(1), reg(2, 36), imm(3)], "{0}, {1}, ${2}, {3}"),
    desc("trigi", Immediate, 0b0001_1101, &[chan(0), flag(1, 46), imm(2)], "{0}, {1}, {2}"),
    InstrDesc {
        forced: 0b1000 << 46,
        ..desc("loopnz", Jump1, 0b0011_0000, &[page(0), reg(1, 41), reg(1, 36), addr(2)], "{0}, ${1}, @{2}")
    },
    desc(
        "condj",
        Jump2,
        0b0011_0001,
        &[page(0), op(2, OpSpace::Compare), reg(1, 36), reg(3, 31), addr(4)],
        "{0}, ${1} {2} ${3}, @{4}",
    ),
    desc("jnz", Jump1, 0b0011_0010, &[addr(0)], "@{0}"),
    desc("end", Jump1, 0b0011_1111, &[], ""),
    InstrDesc {
        uf_bit: Some(30),
        ..desc(
            "math",
            Register,
            0b0101_0000,
            &[page(0), op(3, OpSpace::Arith), reg(1, 41), reg(2, 36), reg(4, 31)],
            "{0}, ${1}, ${2} {3} ${4}",
        )
    },
    desc(
        "set",
        Register,
        0b0101_0001,
        &[chan(0), page(1), reg(2, 36), reg(7, 31), reg(3, 26), reg(4, 21), reg(5, 16), reg(6, 11)],
        "{0}, {1}, ${2}, ${3}, ${4}, ${5}, ${6}, ${7}",
    ),
    desc("sync", Register, 0b0101_0010, &[page(0), reg(1, 31)], "{0}, ${1}"),
    desc("read", Register, 0b0101_0011, &[chan(0), page(1), op(2, OpSpace::Half), reg(3, 41)], "{0}, {1}, {2}, ${3}"),
    InstrDesc { slots: 2, ..desc("wait", Register, 0b0101_0100, &[page(0), reg(1, 31)], "{0}, ${1}") },
    InstrDesc {
        uf_bit: Some(30),
        ..desc(
            "bitw",
            Register,
            0b0101_0101,
            &[page(0), reg(1, 41), reg(2, 36), op(3, OpSpace::Bitwise), reg(4, 31)],
            "{0}, ${1}, ${2} {3} ${4}",
        )
    },
    desc("memr", Register, 0b0101_0110, &[page(0), reg(1, 41), reg(2, 36)], "{0}, ${1}, ${2}"),
    desc("memw", Register, 0b0101_0111, &[page(0), reg(2, 36), reg(1, 31)], "{0}, ${1}, ${2}"),
    desc("setb", Register, 0b0101_1000, &[page(0), reg(2, 36), reg(1, 31)], "{0}, ${1}, ${2}"),
];

pub fn lookup(mnemonic: &str) -> Option<&'static InstrDesc> {
    TABLE.iter().find(|d| d.mnemonic == mnemonic)
}

pub fn by_opcode(opcode: u8) -> Option<&'static InstrDesc> {
    TABLE.iter().find(|d| d.opcode == opcode)
}
