//! Assembly listing.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::decoder::{Instr, Operand};
use crate::instructions::{lookup, FieldKind};

const COMMENT_COLUMN: usize = 48;
const INDENT: &str = "    ";

/// Render one instruction with its table template, e.g. `regwi 0, $5, 7;`.
pub fn fmt_instr(instr: &Instr) -> String {
    let repr = lookup(instr.mnemonic).map_or("", |d| d.repr);
    let mut out = String::from(instr.mnemonic);
    if !repr.is_empty() {
        out.push(' ');
    }
    let mut chars = repr.chars();
    while let Some(c) = chars.next() {
        if c != '{' {
            out.push(c);
            continue;
        }
        let idx: String = chars.by_ref().take_while(|&c| c != '}').collect();
        match idx.parse::<usize>().ok().and_then(|i| instr.operands.get(i)) {
            Some(op) => {
                let _ = write!(out, "{op}");
            }
            None => out.push('?'),
        }
    }
    if instr.update_flags {
        out.push_str(" uf");
    }
    out.push(';');
    out
}

/// One listing row.
#[derive(Debug, Clone, Copy)]
pub struct Line<'a> {
    pub p_addr: u32,
    pub instr: &'a Instr,
    pub comment: Option<&'a str>,
}

/// Full program listing. Each label gets its own `name:` line ahead of the
/// instruction it points at; comments start at a fixed column.
pub fn listing<'a>(lines: impl IntoIterator<Item = Line<'a>>, labels: &BTreeMap<String, u32>) -> String {
    let mut by_addr: Vec<(u32, &str)> = labels.iter().map(|(n, &a)| (a, n.as_str())).collect();
    by_addr.sort();
    let mut pending = by_addr.into_iter().peekable();

    let mut out = String::from("// Program\n\n");
    for line in lines {
        while let Some((_, name)) = pending.next_if(|(a, _)| *a <= line.p_addr) {
            let _ = writeln!(out, "{name}:");
        }
        let mut row = format!("{INDENT}{}", fmt_instr(line.instr));
        if let Some(c) = line.comment {
            let pad = COMMENT_COLUMN.saturating_sub(row.len()).max(1);
            let _ = write!(row, "{:pad$}// {c}", "");
        }
        let _ = writeln!(out, "{row}");
    }
    for (_, name) in pending {
        let _ = writeln!(out, "{name}:");
    }
    out
}

/// Replace numeric jump targets with names from `labels`, so a decoded
/// program lists like the one it was built from.
pub fn relabel(instr: &Instr, labels: &BTreeMap<u32, String>) -> Instr {
    let Some(desc) = lookup(instr.mnemonic) else {
        return instr.clone();
    };
    let mut out = instr.clone();
    for f in desc.fields.iter().filter(|f| f.kind == FieldKind::Addr) {
        if let Some(&Operand::Value(v)) = out.operands.get(f.operand) {
            if let Some(name) = u32::try_from(v).ok().and_then(|a| labels.get(&a)) {
                out.operands[f.operand] = Operand::Label(name.clone());
            }
        }
    }
    out
}
