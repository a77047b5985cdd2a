use pretty_assertions::assert_eq;
use std::collections::BTreeMap;

use tproc_asm::decoder::Decoder;
use tproc_asm::disasm::{listing, relabel, Line};
use tproc_asm::instructions::lookup;
use tproc_asm::isa::tproc64::Tproc64Decoder;
use tproc_asm::{Program, SocConfig};

fn looped() -> Program {
    let mut p = Program::new(SocConfig::default()).unwrap();
    p.open_loop(2, None).unwrap();
    p.wait(10).unwrap();
    p.close_loop().unwrap();
    p.end().unwrap();
    p
}

fn strip_comments(text: &str) -> Vec<String> {
    text.lines()
        .map(|l| l.split("//").next().unwrap_or("").trim_end().to_string())
        .collect()
}

#[test]
fn program_listing() {
    let text = looped().asm();
    let rows: Vec<&str> = text.lines().collect();
    assert_eq!(rows[0], "// Program");
    assert_eq!(rows[1], "");
    assert_eq!(rows[2], "    regwi 0, $0, 2;");
    assert_eq!(rows[3], "LOOP_0:");
    assert_eq!(rows[4], "    waiti 0, 10;");
    assert!(rows[5].starts_with("    mathi 0, $0, $0 - 1 uf;"));
    assert_eq!(rows[5].find("// loop_0 -= 1"), Some(48));
    assert_eq!(rows[6], "    jnz @LOOP_0;");
    assert_eq!(rows[7], "    end;");
}

#[test]
fn decoded_image_lists_like_the_source() {
    let p = looped();
    let words = p.assemble().unwrap().words;
    let dec = Tproc64Decoder::new();
    let names: BTreeMap<u32, String> = p.labels().iter().map(|(n, a)| (*a, n.clone())).collect();

    let mut decoded = Vec::new();
    let mut addr = 0u32;
    while let Some(&w) = words.get(addr as usize) {
        let instr = dec.decode(w).unwrap();
        let slots = lookup(instr.mnemonic).map_or(1, |d| d.slots);
        decoded.push((addr, relabel(&instr, &names)));
        addr += slots;
    }
    let text = listing(decoded.iter().map(|(a, i)| Line { p_addr: *a, instr: i, comment: None }), p.labels());
    assert_eq!(strip_comments(&text), strip_comments(&p.asm()));
}
