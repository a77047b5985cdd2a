use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::instructions::AluOp;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    Value(i64),
    Op(AluOp),
    /// Jump target, resolved to an address during assembly.
    Label(String),
}

impl From<i64> for Operand {
    fn from(v: i64) -> Self {
        Operand::Value(v)
    }
}

impl From<u32> for Operand {
    fn from(v: u32) -> Self {
        Operand::Value(i64::from(v))
    }
}

impl From<u8> for Operand {
    fn from(v: u8) -> Self {
        Operand::Value(i64::from(v))
    }
}

impl From<AluOp> for Operand {
    fn from(op: AluOp) -> Self {
        Operand::Op(op)
    }
}

impl From<&str> for Operand {
    fn from(label: &str) -> Self {
        Operand::Label(label.to_string())
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Value(v) => write!(f, "{v}"),
            Operand::Op(op) => f.write_str(op.symbol()),
            Operand::Label(l) => f.write_str(l),
        }
    }
}

/// One machine instruction, independent of where it sits in a program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instr {
    pub mnemonic: &'static str,
    pub operands: Vec<Operand>,
    pub update_flags: bool,
}

impl Instr {
    pub fn new(mnemonic: &'static str, operands: Vec<Operand>) -> Self {
        Self { mnemonic, operands, update_flags: false }
    }

    pub fn with_flags(mut self) -> Self {
        self.update_flags = true;
        self
    }
}

pub trait Decoder {
    fn decode(&self, word: u64) -> Result<Instr>;
}
