use pretty_assertions::assert_eq;

use tproc_asm::decoder::{Decoder, Operand};
use tproc_asm::error::{ResolutionError, ValidationError};
use tproc_asm::isa::tproc64::Tproc64Decoder;
use tproc_asm::{Error, Program, SocConfig};

fn prog() -> Program {
    Program::new(SocConfig::default()).unwrap()
}

#[test]
fn forward_reference_resolves_to_label_address() {
    let mut p = prog();
    p.append("jnz", vec!["DONE".into()]).unwrap();
    p.wait(100).unwrap();
    p.label("DONE").unwrap();
    p.end().unwrap();

    // jnz @0, waiti @1 (+ pad @2), end @3
    assert_eq!(p.labels().get("DONE"), Some(&3));
    let bin = p.assemble().unwrap();
    assert_eq!(bin.words.len(), 4);
    assert_eq!(bin.words[2], 0);
    let jnz = Tproc64Decoder::new().decode(bin.words[0]).unwrap();
    assert_eq!(jnz.operands, vec![Operand::Value(3)]);
}

#[test]
fn label_at_end_of_program_is_legal() {
    let mut p = prog();
    p.append("jnz", vec!["TAIL".into()]).unwrap();
    p.label("TAIL").unwrap();
    let bin = p.assemble().unwrap();
    assert_eq!(bin.words.len(), 1);
    assert_eq!(bin.words[0] & 0xFFFF, 1);
}

#[test]
fn undefined_label_fails_assembly() {
    let mut p = prog();
    p.end().unwrap();
    p.append("jnz", vec!["NOWHERE".into()]).unwrap();
    assert_eq!(
        p.assemble().unwrap_err(),
        Error::Resolution(ResolutionError::UndefinedLabel { label: "NOWHERE".into(), p_addr: 1 })
    );
}

#[test]
fn duplicate_label_is_rejected() {
    let mut p = prog();
    p.label("A").unwrap();
    assert_eq!(p.label("A").unwrap_err(), Error::Validation(ValidationError::DuplicateLabel("A".into())));
}
