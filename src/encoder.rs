//! Final pass: label resolution, immediate legalisation and bit packing.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::info;

use crate::decoder::{Instr, Operand};
use crate::error::{Error, RangeError, ResolutionError, Result, ValidationError};
use crate::instructions::{lookup, Field, FieldKind, InstrDesc, OPCODE_SHIFT};
use crate::program::Instruction;

const IMM_LIMIT: i64 = 1 << 31;
/// Values below this load with a single `regwi`. Negative values below
/// -2^30 still fold into the 31-bit field; the register then holds the
/// 31-bit sign extension of the folded value.
pub const DIRECT_IMM_LIMIT: i64 = 1 << 30;
/// Widest value the split load can rebuild (32-bit registers).
pub const SPLIT_IMM_LIMIT: i64 = 1 << 32;

/// Fold a signed immediate into the unsigned 31-bit field.
pub fn legalize_imm(value: i64) -> Result<u64, RangeError> {
    if !(-IMM_LIMIT..IMM_LIMIT).contains(&value) {
        return Err(RangeError::new("immediate", value, "signed 31-bit: [-2^31, 2^31)"));
    }
    let folded = if value < 0 { IMM_LIMIT + value } else { value };
    Ok(folded as u64)
}

/// One step of a register load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmStep {
    Write(i64),
    ShiftLeft(u8),
    Add(i64),
}

/// Plan the instructions that load `value` into a register: a single write
/// when it fits, otherwise write-high / shift-left-2 / add-remainder.
pub fn split_imm(value: i64) -> Result<Vec<ImmStep>, RangeError> {
    if (-IMM_LIMIT..DIRECT_IMM_LIMIT).contains(&value) {
        return Ok(vec![ImmStep::Write(value)]);
    }
    if !(DIRECT_IMM_LIMIT..SPLIT_IMM_LIMIT).contains(&value) {
        return Err(RangeError::new("register value", value, "[-2^31, 2^32)"));
    }
    let mut steps = vec![ImmStep::Write(value >> 2), ImmStep::ShiftLeft(2)];
    if value % 4 != 0 {
        steps.push(ImmStep::Add(value % 4));
    }
    Ok(steps)
}

fn field_name(desc: &InstrDesc, field: &Field) -> String {
    format!("{}.op{}", desc.mnemonic, field.operand)
}

fn field_bits(desc: &InstrDesc, field: &Field, operand: &Operand) -> Result<u64> {
    match (field.kind, operand) {
        (FieldKind::Op(space), Operand::Op(op)) if op.space() == space => Ok(u64::from(op.code())),
        (FieldKind::Op(_), _) => Err(ValidationError::OperandKind {
            mnemonic: desc.mnemonic,
            index: field.operand,
            expected: "an operator of the field's code space",
        }
        .into()),
        (_, Operand::Op(_)) => Err(ValidationError::OperandKind {
            mnemonic: desc.mnemonic,
            index: field.operand,
            expected: "a numeric value",
        }
        .into()),
        (_, Operand::Label(_)) => Err(ValidationError::OperandKind {
            mnemonic: desc.mnemonic,
            index: field.operand,
            expected: "a resolved address",
        }
        .into()),
        (FieldKind::Imm, Operand::Value(v)) => {
            legalize_imm(*v).map_err(|e| Error::from(RangeError { field: field_name(desc, field), ..e }))
        }
        (_, Operand::Value(v)) => {
            let max = field.mask() as i64;
            if *v < 0 || *v > max {
                return Err(RangeError::new(field_name(desc, field), *v, format!("[0, {max}]")).into());
            }
            Ok(*v as u64)
        }
    }
}

/// Pack one instruction. Jump targets must already be numeric.
pub fn encode_word(instr: &Instr) -> Result<u64> {
    let desc = lookup(instr.mnemonic)
        .ok_or_else(|| ValidationError::UnknownMnemonic(instr.mnemonic.to_string()))?;
    if instr.operands.len() != desc.arity() {
        return Err(ValidationError::OperandCount {
            mnemonic: desc.mnemonic,
            expected: desc.arity(),
            got: instr.operands.len(),
        }
        .into());
    }
    let mut word = (u64::from(desc.opcode) << OPCODE_SHIFT) | desc.forced;
    for field in desc.fields {
        word |= field_bits(desc, field, &instr.operands[field.operand])? << field.offset;
    }
    if instr.update_flags {
        let bit = desc.uf_bit.ok_or(ValidationError::NoUpdateFlags { mnemonic: desc.mnemonic })?;
        word |= 1u64 << bit;
    }
    Ok(word)
}

/// Replace every label operand with the address it names.
pub fn resolve_labels(instr: &Instr, p_addr: u32, labels: &BTreeMap<String, u32>) -> Result<Instr> {
    let mut out = instr.clone();
    for operand in &mut out.operands {
        if let Operand::Label(name) = operand {
            let addr = labels.get(name.as_str()).ok_or_else(|| ResolutionError::UndefinedLabel {
                label: name.clone(),
                p_addr,
            })?;
            *operand = Operand::Value(i64::from(*addr));
        }
    }
    Ok(out)
}

/// The assembled program image: one word per program-memory slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binary {
    pub words: Vec<u64>,
}

impl Binary {
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    pub fn hex(&self) -> String {
        self.words.iter().map(|w| format!("{w:#018x}")).collect::<Vec<_>>().join("\n")
    }

    pub fn bin(&self) -> String {
        self.words.iter().map(|w| format!("{w:#066b}")).collect::<Vec<_>>().join("\n")
    }
}

/// Two passes: every label reference is resolved first so a missing label
/// fails before any word is produced, then each instruction is packed.
pub fn assemble(instructions: &[Instruction], labels: &BTreeMap<String, u32>) -> Result<Binary> {
    let resolved = instructions
        .iter()
        .map(|i| resolve_labels(&i.instr, i.p_addr, labels))
        .collect::<Result<Vec<_>>>()?;

    let mut words = Vec::with_capacity(instructions.len());
    for instr in &resolved {
        words.push(encode_word(instr)?);
        let slots = lookup(instr.mnemonic).map_or(1, |d| d.slots);
        // trailing slots of a compound instruction are reserved as nops
        words.extend(std::iter::repeat(0u64).take(slots as usize - 1));
    }
    info!(instructions = instructions.len(), words = words.len(), "assembled program");
    Ok(Binary { words })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions::AluOp;

    #[test]
    fn legalize_folds_negative_values() {
        assert_eq!(legalize_imm(0).unwrap(), 0);
        assert_eq!(legalize_imm(5).unwrap(), 5);
        assert_eq!(legalize_imm(-1).unwrap(), (1 << 31) - 1);
        assert_eq!(legalize_imm(-(1 << 31)).unwrap(), 0);
        assert!(legalize_imm(1 << 31).is_err());
        assert!(legalize_imm(-(1 << 31) - 1).is_err());
    }

    #[test]
    fn split_counts_steps() {
        assert_eq!(split_imm(1000).unwrap().len(), 1);
        assert_eq!(split_imm(-5).unwrap().len(), 1);
        assert_eq!(split_imm(-(1 << 31)).unwrap(), vec![ImmStep::Write(-(1 << 31))]);
        assert!(split_imm(-(1 << 31) - 1).is_err());
        assert_eq!(split_imm(1 << 30).unwrap(), vec![ImmStep::Write(1 << 28), ImmStep::ShiftLeft(2)]);
        assert_eq!(split_imm((1 << 30) + 3).unwrap().len(), 3);
        assert!(split_imm(1 << 32).is_err());
    }

    #[test]
    fn encode_regwi_places_fields() {
        let instr = Instr::new("regwi", vec![2u8.into(), 5u8.into(), 7i64.into()]);
        let w = encode_word(&instr).unwrap();
        assert_eq!(w >> 56, 0b0001_1001);
        assert_eq!((w >> 53) & 0x7, 2);
        assert_eq!((w >> 41) & 0x1F, 5);
        assert_eq!(w & 0x7FFF_FFFF, 7);
    }

    #[test]
    fn update_flags_needs_a_uf_bit() {
        let dec = Instr::new("mathi", vec![0u8.into(), 1u8.into(), 1u8.into(), AluOp::Sub.into(), 1i64.into()]);
        let w = encode_word(&dec.clone().with_flags()).unwrap();
        assert_eq!(w & (1 << 31), 1 << 31);
        let bad = Instr::new("synci", vec![10i64.into()]).with_flags();
        assert!(matches!(
            encode_word(&bad),
            Err(crate::Error::Validation(ValidationError::NoUpdateFlags { .. }))
        ));
    }

    #[test]
    fn register_field_width_is_checked_at_encode_time() {
        let instr = Instr::new("regwi", vec![0u8.into(), 32u8.into(), 0i64.into()]);
        let err = encode_word(&instr).unwrap_err();
        match err {
            crate::Error::Range(r) => {
                assert_eq!(r.field, "regwi.op1");
                assert_eq!(r.value, 32);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
