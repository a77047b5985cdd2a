use std::collections::{BTreeMap, BTreeSet, VecDeque};
use serde::Serialize;

use tproc_asm::decoder::{Decoder, Instr, Operand};
use tproc_asm::instructions::{lookup, FieldKind};
use tproc_asm::isa::tproc64::Tproc64Decoder;

use crate::model::Image;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind { Fallthrough, CondBranch }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Edge { pub from: u32, pub to: u32, pub kind: EdgeKind }

#[derive(Debug, Clone, Serialize)]
pub struct Slot {
    pub addr: u32,
    pub word: u64,
    /// `None` for words that do not decode, and for padding slots of
    /// two-word instructions.
    pub instr: Option<Instr>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub slots: Vec<Slot>,
    pub edges: Vec<Edge>,
    pub labels: BTreeMap<u32, String>,
    /// Addresses reachable from address 0.
    pub reachable: BTreeSet<u32>,
}

fn jump_target(instr: &Instr) -> Option<u32> {
    let desc = lookup(instr.mnemonic)?;
    let f = desc.fields.iter().find(|f| f.kind == FieldKind::Addr)?;
    match instr.operands.get(f.operand)? {
        Operand::Value(v) => u32::try_from(*v).ok(),
        _ => None,
    }
}

/// Linear sweep over the whole image, then control flow from address 0.
pub fn analyze(img: &Image) -> Report {
    let dec = Tproc64Decoder::new();
    let mut slots = Vec::with_capacity(img.words.len());
    let mut edges = Vec::new();
    let mut labels = BTreeMap::new();

    let mut addr = 0u32;
    while let Some(word) = img.word(addr) {
        match dec.decode(word) {
            Ok(instr) => {
                let width = lookup(instr.mnemonic).map_or(1, |d| d.slots);
                let next = addr + width;
                if let Some(tgt) = jump_target(&instr) {
                    edges.push(Edge { from: addr, to: tgt, kind: EdgeKind::CondBranch });
                    labels.entry(tgt).or_insert_with(|| format!("L{tgt}"));
                }
                if instr.mnemonic != "end" && next < img.len() {
                    edges.push(Edge { from: addr, to: next, kind: EdgeKind::Fallthrough });
                }
                slots.push(Slot { addr, word, instr: Some(instr), error: None });
                for pad in addr + 1..next.min(img.len()) {
                    slots.push(Slot { addr: pad, word: img.words[pad as usize], instr: None, error: None });
                }
                addr = next;
            }
            Err(e) => {
                slots.push(Slot { addr, word, instr: None, error: Some(e.to_string()) });
                addr += 1;
            }
        }
    }

    let mut reachable = BTreeSet::new();
    let mut queue: VecDeque<u32> = VecDeque::new();
    if !img.is_empty() { queue.push_back(0); }
    while let Some(a) = queue.pop_front() {
        if !reachable.insert(a) { continue; }
        for e in edges.iter().filter(|e| e.from == a) {
            if !reachable.contains(&e.to) { queue.push_back(e.to); }
        }
    }

    Report { slots, edges, labels, reachable }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tproc_asm::encoder::encode_word;
    use tproc_asm::instructions::AluOp;

    fn word(m: &'static str, ops: Vec<Operand>) -> u64 {
        encode_word(&Instr::new(m, ops)).unwrap()
    }

    #[test]
    fn loop_back_edge_and_labels() {
        // 0: regwi  1: mathi uf  2: jnz @1  3: end
        let words = vec![
            word("regwi", vec![0u8.into(), 1u8.into(), 3i64.into()]),
            encode_word(&Instr::new("mathi", vec![0u8.into(), 1u8.into(), 1u8.into(), AluOp::Sub.into(), 1i64.into()]).with_flags()).unwrap(),
            word("jnz", vec![1u32.into()]),
            word("end", vec![]),
        ];
        let r = analyze(&Image { words });
        assert!(r.edges.contains(&Edge { from: 2, to: 1, kind: EdgeKind::CondBranch }));
        assert!(r.edges.contains(&Edge { from: 2, to: 3, kind: EdgeKind::Fallthrough }));
        assert_eq!(r.labels.get(&1).map(String::as_str), Some("L1"));
        assert_eq!(r.reachable.len(), 4);
    }

    #[test]
    fn two_slot_instructions_skip_padding() {
        let words = vec![word("waiti", vec![0u8.into(), 100i64.into()]), 0, word("end", vec![])];
        let r = analyze(&Image { words });
        assert_eq!(r.slots.len(), 3);
        assert!(r.slots[1].instr.is_none());
        assert_eq!(r.slots[2].instr.as_ref().map(|i| i.mnemonic), Some("end"));
        assert!(r.reachable.contains(&2));
    }

    #[test]
    fn undecodable_words_are_kept() {
        let r = analyze(&Image { words: vec![0xFF00_0000_0000_0000] });
        assert!(r.slots[0].error.is_some());
    }
}
