use anyhow::Result;
use clap::{Parser, ValueEnum};

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use tproc_asm::disasm::{listing, relabel, Line};
use tproc_disasm::{analyze, load_raw_bin, Report};

#[derive(Parser, Debug)]
#[command(author, version, about = "tProc program image disassembler", long_about=None)]
struct Cli {
    /// Raw program image (little-endian 64-bit words)
    #[arg(value_name = "BINFILE")]
    input: String,
    /// Skip N bytes at start of file before loading
    #[arg(long, default_value_t = 0usize)]
    skip: usize,
    /// Output format: text or json
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
    /// Name jump targets instead of printing raw addresses
    #[arg(long)]
    labels: bool,
    /// Export labels to JSON (Vec<{ addr, name }>)
    #[arg(long, value_name = "FILE")]
    labels_out: Option<String>,
    /// Write output to file instead of stdout
    #[arg(long, value_name = "FILE")]
    out: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat { Text, Json }

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct LabelKV { addr: u32, name: String }

fn render_text(report: &Report, named: bool) -> String {
    let by_addr: BTreeMap<u32, String> = if named { report.labels.clone() } else { BTreeMap::new() };
    let labels: BTreeMap<String, u32> = by_addr.iter().map(|(a, n)| (n.clone(), *a)).collect();

    let rows: Vec<_> = report
        .slots
        .iter()
        .filter_map(|s| s.instr.as_ref().map(|i| (s.addr, relabel(i, &by_addr), format!("{:#06x}", s.addr))))
        .collect();
    let mut text = listing(
        rows.iter().map(|(addr, instr, c)| Line { p_addr: *addr, instr, comment: Some(c.as_str()) }),
        &labels,
    );

    let bad: Vec<_> = report.slots.iter().filter(|s| s.error.is_some()).collect();
    if !bad.is_empty() {
        text.push_str("\n// Undecodable words\n");
        for s in bad {
            let _ = writeln!(text, "// {:#06x}: .word {:#018x} ({})", s.addr, s.word, s.error.as_deref().unwrap_or(""));
        }
    }
    let dead = report.slots.iter().filter(|s| s.instr.is_some() && !report.reachable.contains(&s.addr)).count();
    if dead > 0 {
        let _ = writeln!(text, "\n// {dead} instruction(s) unreachable from address 0");
    }
    text
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let img = load_raw_bin(Path::new(&cli.input), cli.skip)?;
    let report = analyze(&img);

    if let Some(path) = &cli.labels_out {
        let arr: Vec<LabelKV> = report.labels.iter().map(|(a, n)| LabelKV { addr: *a, name: n.clone() }).collect();
        std::fs::write(path, serde_json::to_string_pretty(&arr)?)?;
    }

    let output = match cli.format {
        OutputFormat::Json => serde_json::to_string_pretty(&report)?,
        OutputFormat::Text => render_text(&report, cli.labels),
    };
    if let Some(path) = cli.out { std::fs::write(path, output)?; } else { print!("{}", output); }
    Ok(())
}
