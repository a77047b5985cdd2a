use std::fs::File;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tproc_asm::device::{load_envelope, load_waves, Transport};
use tproc_asm::instructions::TABLE;
use tproc_asm::isa::tproc64::Tproc64Decoder;
use tproc_asm::sim::Machine;
use tproc_asm::{script, Program, SocConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Build tProc programs from JSON scripts")]
struct Opts {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Assemble a script and write the program, wave table and envelopes.
    Build {
        #[arg(long, value_name = "JSON")]
        config: Option<PathBuf>,
        #[arg(long, value_name = "JSON")]
        script: PathBuf,
        #[arg(long, value_name = "DIR", default_value = "out")]
        out: PathBuf,
        #[arg(long, value_enum, default_value_t = ImageFormat::Hex)]
        format: ImageFormat,
    },
    /// Assemble a script and run its control flow on the simulator.
    Run {
        #[arg(long, value_name = "JSON")]
        config: Option<PathBuf>,
        #[arg(long, value_name = "JSON")]
        script: PathBuf,
        #[arg(long, default_value_t = 10_000_000u64)]
        max_steps: u64,
    },
    /// Print the instruction table.
    Isa,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ImageFormat {
    /// One 16-digit hex word per line.
    Hex,
    /// One 64-character binary word per line.
    Bin,
    /// Little-endian bytes.
    Raw,
}

/// Stands in for the DMA engine by streaming into a file.
struct FileSink(File);

impl Transport for FileSink {
    fn transfer(&mut self, buf: &[u8]) -> anyhow::Result<usize> {
        self.0.write_all(buf)?;
        Ok(buf.len())
    }
}

fn sink(path: &Path) -> Result<FileSink> {
    let f = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    Ok(FileSink(f))
}

fn build_program(config: Option<&Path>, script_path: &Path) -> Result<Program> {
    let cfg = match config {
        Some(p) => {
            let text = std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
            SocConfig::from_json(&text).with_context(|| format!("parsing {}", p.display()))?
        }
        None => SocConfig::default(),
    };
    let text = std::fs::read_to_string(script_path).with_context(|| format!("reading {}", script_path.display()))?;
    let steps = script::from_json(&text).with_context(|| format!("parsing {}", script_path.display()))?;

    let mut prog = Program::new(cfg)?;
    for (i, step) in steps.iter().enumerate() {
        step.apply(&mut prog).with_context(|| format!("step {i} ({step:?})"))?;
    }
    Ok(prog)
}

fn build(prog: &Program, out: &Path, format: ImageFormat) -> Result<()> {
    std::fs::create_dir_all(out.join("envelopes")).with_context(|| format!("creating {}", out.display()))?;
    let binary = prog.assemble()?;

    let (name, bytes) = match format {
        ImageFormat::Hex => ("program.hex", binary.hex().into_bytes()),
        ImageFormat::Bin => ("program.bin", binary.bin().into_bytes()),
        ImageFormat::Raw => ("program.img", binary.to_le_bytes()),
    };
    std::fs::write(out.join(name), bytes)?;
    std::fs::write(out.join("program.asm"), prog.asm())?;

    let waves = prog.compile_waves()?;
    load_waves(&mut sink(&out.join("waves.bin"))?, &waves)?;
    for ch in 0..prog.config().gens.len() {
        let image = prog.envelope_image(ch)?;
        if image.is_empty() {
            continue;
        }
        load_envelope(&mut sink(&out.join(format!("envelopes/ch{ch}.bin")))?, ch, &image)?;
    }
    info!(words = binary.words.len(), waves = waves.len(), out = %out.display(), "build complete");
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match Opts::parse().cmd {
        Cmd::Build { config, script, out, format } => {
            let prog = build_program(config.as_deref(), &script)?;
            build(&prog, &out, format)?;
        }
        Cmd::Run { config, script, max_steps } => {
            let prog = build_program(config.as_deref(), &script)?;
            let binary = prog.assemble()?;
            let mut m = Machine::new(usize::from(prog.config().tproc.pages));
            let dec = Tproc64Decoder::new();
            match m.run(&binary.words, &dec, max_steps) {
                Ok(steps) => println!("halted after {steps} steps at pc {}", m.pc),
                Err(trap) => eprintln!("TRAP: {trap}"),
            }
            for r in prog.registers().iter() {
                if let Some(v) = m.reg(r.page, r.addr) {
                    println!("{:<12} p{}:r{:<2} = {}", r.name, r.page, r.addr, v as i32);
                }
            }
        }
        Cmd::Isa => {
            for d in TABLE {
                println!("{:#04x}  {:<7} slots={} {}", d.opcode, d.mnemonic, d.slots, d.repr);
            }
        }
    }
    Ok(())
}
