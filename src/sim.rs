//! Register-level model of the tProc ALU and branch unit.
//!
//! Only data and control flow are modelled; timed outputs (`set`, `wseti`,
//! `dporti`, `trigi`, `synci`, waits) execute as no-ops.

use bitflags::bitflags;
use serde::Serialize;

use crate::decoder::{Decoder, Instr, Operand};
use crate::instructions::AluOp;

const REGS_PER_PAGE: usize = 32;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    pub struct Flags: u8 {
        const Z = 1 << 0; // last flagged result was zero
        const N = 1 << 1; // last flagged result was negative
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Trap {
    #[error("pc {pc} is outside the program")]
    OutOfBounds { pc: u32 },
    #[error("invalid instruction at {pc}: {source}")]
    Invalid {
        pc: u32,
        #[source]
        source: crate::Error,
    },
    #[error("malformed operand {index} of {mnemonic} at {pc}")]
    Operand { pc: u32, mnemonic: &'static str, index: usize },
    #[error("register p{page}:r{reg} does not exist")]
    BadRegister { page: i64, reg: i64 },
    #[error("no `end` within {0} steps")]
    StepLimit(u64),
}

#[derive(Debug, Clone, Serialize)]
pub struct Machine {
    pub pc: u32,
    pub flags: Flags,
    pub regs: Vec<[u32; REGS_PER_PAGE]>,
    pub halted: bool,
}

/// Immediates are stored as 31-bit two's complement.
pub fn sext31(v: i64) -> i32 {
    let v = v & 0x7FFF_FFFF;
    if v >= 1 << 30 {
        (v - (1 << 31)) as i32
    } else {
        v as i32
    }
}

fn alu(op: AluOp, a: u32, b: u32) -> Option<u32> {
    Some(match op {
        AluOp::Add => a.wrapping_add(b),
        AluOp::Sub => a.wrapping_sub(b),
        AluOp::Mul => a.wrapping_mul(b),
        AluOp::And => a & b,
        AluOp::Or => a | b,
        AluOp::Xor => a ^ b,
        AluOp::Not => !b,
        AluOp::Shl => a.wrapping_shl(b),
        AluOp::Shr => a.wrapping_shr(b),
        _ => return None,
    })
}

fn compare(op: AluOp, a: u32, b: u32) -> Option<bool> {
    let (a, b) = (a as i32, b as i32);
    Some(match op {
        AluOp::Gt => a > b,
        AluOp::Ge => a >= b,
        AluOp::Lt => a < b,
        AluOp::Le => a <= b,
        AluOp::Eq => a == b,
        AluOp::Ne => a != b,
        _ => return None,
    })
}

struct Ops<'a> {
    pc: u32,
    instr: &'a Instr,
}

impl Ops<'_> {
    fn bad(&self, index: usize) -> Trap {
        Trap::Operand { pc: self.pc, mnemonic: self.instr.mnemonic, index }
    }

    fn val(&self, index: usize) -> Result<i64, Trap> {
        match self.instr.operands.get(index) {
            Some(Operand::Value(v)) => Ok(*v),
            _ => Err(self.bad(index)),
        }
    }

    fn op(&self, index: usize) -> Result<AluOp, Trap> {
        match self.instr.operands.get(index) {
            Some(Operand::Op(op)) => Ok(*op),
            _ => Err(self.bad(index)),
        }
    }

    fn target(&self, index: usize) -> Result<u32, Trap> {
        u32::try_from(self.val(index)?).map_err(|_| self.bad(index))
    }
}

impl Machine {
    pub fn new(pages: usize) -> Self {
        Self { pc: 0, flags: Flags::empty(), regs: vec![[0; REGS_PER_PAGE]; pages], halted: false }
    }

    pub fn reg(&self, page: u8, reg: u8) -> Option<u32> {
        self.regs.get(usize::from(page))?.get(usize::from(reg)).copied()
    }

    fn slot(&mut self, page: i64, reg: i64) -> Result<&mut u32, Trap> {
        usize::try_from(page)
            .ok()
            .zip(usize::try_from(reg).ok())
            .and_then(|(p, r)| self.regs.get_mut(p)?.get_mut(r))
            .ok_or(Trap::BadRegister { page, reg })
    }

    fn read(&mut self, page: i64, reg: i64) -> Result<u32, Trap> {
        self.slot(page, reg).map(|r| *r)
    }

    fn write(&mut self, page: i64, reg: i64, v: u32, update_flags: bool) -> Result<(), Trap> {
        *self.slot(page, reg)? = v;
        if update_flags {
            self.flags.set(Flags::Z, v == 0);
            self.flags.set(Flags::N, (v as i32) < 0);
        }
        Ok(())
    }

    /// Execute the word at `pc`.
    pub fn step<D: Decoder>(&mut self, words: &[u64], dec: &D) -> Result<(), Trap> {
        let pc = self.pc;
        let word = *words.get(pc as usize).ok_or(Trap::OutOfBounds { pc })?;
        let instr = dec.decode(word).map_err(|source| Trap::Invalid { pc, source })?;
        let o = Ops { pc, instr: &instr };
        let uf = instr.update_flags;
        let mut next = pc + 1;

        match instr.mnemonic {
            "regwi" => self.write(o.val(0)?, o.val(1)?, sext31(o.val(2)?) as u32, uf)?,
            "mathi" | "bitwi" => {
                let a = self.read(o.val(0)?, o.val(2)?)?;
                let r = alu(o.op(3)?, a, sext31(o.val(4)?) as u32).ok_or_else(|| o.bad(3))?;
                self.write(o.val(0)?, o.val(1)?, r, uf)?;
            }
            "math" | "bitw" => {
                let a = self.read(o.val(0)?, o.val(2)?)?;
                let b = self.read(o.val(0)?, o.val(4)?)?;
                let r = alu(o.op(3)?, a, b).ok_or_else(|| o.bad(3))?;
                self.write(o.val(0)?, o.val(1)?, r, uf)?;
            }
            "condj" => {
                let a = self.read(o.val(0)?, o.val(1)?)?;
                let b = self.read(o.val(0)?, o.val(3)?)?;
                if compare(o.op(2)?, a, b).ok_or_else(|| o.bad(2))? {
                    next = o.target(4)?;
                }
            }
            "jnz" => {
                if !self.flags.contains(Flags::Z) {
                    next = o.target(0)?;
                }
            }
            // decrement, branch while non-zero
            "loopnz" => {
                let r = self.read(o.val(0)?, o.val(1)?)?.wrapping_sub(1);
                self.write(o.val(0)?, o.val(1)?, r, false)?;
                if r != 0 {
                    next = o.target(2)?;
                }
            }
            "end" => {
                self.halted = true;
                next = pc;
            }
            _ => {}
        }
        self.pc = next;
        Ok(())
    }

    /// Run from the current pc until `end`. Returns the number of steps taken.
    pub fn run<D: Decoder>(&mut self, words: &[u64], dec: &D, max_steps: u64) -> Result<u64, Trap> {
        let mut steps = 0;
        while !self.halted {
            if steps == max_steps {
                return Err(Trap::StepLimit(max_steps));
            }
            self.step(words, dec)?;
            steps += 1;
        }
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_extension() {
        assert_eq!(sext31(5), 5);
        assert_eq!(sext31((1 << 31) - 1), -1);
        assert_eq!(sext31(1 << 30), -(1 << 30));
    }

    #[test]
    fn alu_ops() {
        assert_eq!(alu(AluOp::Shl, 3, 2), Some(12));
        assert_eq!(alu(AluOp::Sub, 0, 1), Some(u32::MAX));
        assert_eq!(alu(AluOp::Gt, 0, 1), None);
        assert_eq!(compare(AluOp::Lt, u32::MAX, 0), Some(true));
    }
}
