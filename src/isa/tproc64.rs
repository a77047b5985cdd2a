use crate::decoder::{Decoder, Instr, Operand};
use crate::error::{RangeError, Result, ValidationError};
use crate::instructions::{by_opcode, AluOp, FieldKind, OPCODE_SHIFT};

/// Decoder for the 64-bit tProc word. Table driven: the same field list that
/// packs an instruction also unpacks it.
#[derive(Debug, Default, Clone, Copy)]
pub struct Tproc64Decoder;

impl Tproc64Decoder {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for Tproc64Decoder {
    fn decode(&self, word: u64) -> Result<Instr> {
        let opcode = (word >> OPCODE_SHIFT) as u8;
        let desc = by_opcode(opcode).ok_or(ValidationError::UnknownOpcode(opcode))?;

        let mut operands: Vec<Option<Operand>> = vec![None; desc.arity()];
        for field in desc.fields {
            // loopnz repeats its register; the first copy wins
            if operands[field.operand].is_some() {
                continue;
            }
            let raw = (word >> field.offset) & field.mask();
            let operand = match field.kind {
                FieldKind::Op(space) => {
                    let op = AluOp::from_code(space, raw as u8).ok_or_else(|| {
                        RangeError::new(
                            format!("{}.op{}", desc.mnemonic, field.operand),
                            raw,
                            "a defined operator code",
                        )
                    })?;
                    Operand::Op(op)
                }
                _ => Operand::Value(raw as i64),
            };
            operands[field.operand] = Some(operand);
        }

        let update_flags = desc.uf_bit.is_some_and(|b| word & (1u64 << b) != 0);
        Ok(Instr {
            mnemonic: desc.mnemonic,
            operands: operands.into_iter().map(|o| o.unwrap_or(Operand::Value(0))).collect(),
            update_flags,
        })
    }
}
