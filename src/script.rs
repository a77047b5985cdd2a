//! JSON program scripts: a list of builder steps, applied in order.
//!
//! ```json
//! [
//!   {"op": "gauss", "ch": 0, "name": "g", "sigma": 4, "length": 16},
//!   {"op": "pulse", "ch": 0, "name": "pi", "params": {"style": "arb", "freq": 100, "phase": 0, "gain": 0.5, "envelope": "g"}},
//!   {"op": "play", "ch": 0, "name": "pi"},
//!   {"op": "end"}
//! ]
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::decoder::Operand;
use crate::error::Result;
use crate::instructions::AluOp;
use crate::program::{ChannelId, Program, Time};
use crate::pulse::PulseParams;
use crate::regs::{RegKind, RegRequest};

const DEFAULT_TRIGGER_WIDTH: u32 = 10;

fn default_width() -> u32 {
    DEFAULT_TRIGGER_WIDTH
}

/// Raw instruction operand: numbers are values, operator symbols are ALU
/// ops and any other string is a label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawOperand {
    Int(i64),
    Text(String),
}

impl From<&RawOperand> for Operand {
    fn from(raw: &RawOperand) -> Self {
        match raw {
            RawOperand::Int(v) => Operand::Value(*v),
            RawOperand::Text(s) => AluOp::from_symbol(s).map_or_else(|| Operand::Label(s.clone()), Operand::Op),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", deny_unknown_fields)]
pub enum Step {
    Envelope {
        ch: usize,
        name: String,
        #[serde(default)]
        idata: Option<Vec<f64>>,
        #[serde(default)]
        qdata: Option<Vec<f64>>,
    },
    Gauss {
        ch: usize,
        name: String,
        sigma: f64,
        length: u32,
        #[serde(default)]
        maxv: Option<f64>,
        #[serde(default)]
        even_length: bool,
    },
    Triangle {
        ch: usize,
        name: String,
        length: u32,
        #[serde(default)]
        maxv: Option<f64>,
    },
    /// Define a pulse; `params` carries `style` plus the style's parameters.
    Pulse { ch: usize, name: String, params: Map<String, Value> },
    /// Play a pulse; no `t` means automatic timing.
    Play {
        ch: usize,
        name: String,
        #[serde(default)]
        t: Option<u32>,
    },
    Readout { ro: usize, length: u32 },
    Trigger {
        #[serde(default)]
        ros: Vec<usize>,
        #[serde(default)]
        pins: Vec<usize>,
        #[serde(default)]
        t: u32,
        #[serde(default = "default_width")]
        width: u32,
    },
    Align {
        #[serde(default)]
        gens: Vec<usize>,
        #[serde(default)]
        readouts: Vec<usize>,
    },
    SyncAll {
        #[serde(default)]
        t: u32,
    },
    Wait { t: u32 },
    WaitAll {
        #[serde(default)]
        t: u32,
    },
    OpenLoop {
        n: u32,
        #[serde(default)]
        name: Option<String>,
    },
    CloseLoop,
    Label { name: String },
    Reg {
        page: u8,
        #[serde(default)]
        addr: Option<u8>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        kind: RegKind,
        #[serde(default)]
        init: Option<i64>,
    },
    WriteImm { page: u8, reg: u8, value: i64 },
    Instr {
        mnemonic: String,
        #[serde(default)]
        operands: Vec<RawOperand>,
        #[serde(default)]
        comment: Option<String>,
    },
    ResetTimestamps,
    End,
}

pub fn from_json(text: &str) -> serde_json::Result<Vec<Step>> {
    serde_json::from_str(text)
}

impl Step {
    pub fn apply(&self, prog: &mut Program) -> Result<()> {
        match self {
            Step::Envelope { ch, name, idata, qdata } => {
                prog.add_envelope(*ch, name, idata.as_deref(), qdata.as_deref())
            }
            Step::Gauss { ch, name, sigma, length, maxv, even_length } => {
                prog.add_gauss(*ch, name, *sigma, *length, *maxv, *even_length)
            }
            Step::Triangle { ch, name, length, maxv } => prog.add_triangle(*ch, name, *length, *maxv),
            Step::Pulse { ch, name, params } => {
                let (style, params) = PulseParams::from_map(params)?;
                prog.add_pulse(*ch, name, style, &params)
            }
            Step::Play { ch, name, t } => {
                let t = t.map_or(Time::Auto, Time::At);
                prog.pulse(*ch, name, t).map(|_| ())
            }
            Step::Readout { ro, length } => prog.declare_readout(*ro, *length),
            Step::Trigger { ros, pins, t, width } => prog.trigger(ros, pins, *t, *width),
            Step::Align { gens, readouts } => {
                let chs: Vec<ChannelId> = gens
                    .iter()
                    .map(|&g| ChannelId::Gen(g))
                    .chain(readouts.iter().map(|&r| ChannelId::Readout(r)))
                    .collect();
                prog.align(&chs)
            }
            Step::SyncAll { t } => prog.sync_all(*t),
            Step::Wait { t } => prog.wait(*t),
            Step::WaitAll { t } => prog.wait_all(*t),
            Step::OpenLoop { n, name } => prog.open_loop(*n, name.as_deref()).map(|_| ()),
            Step::CloseLoop => prog.close_loop(),
            Step::Label { name } => prog.label(name),
            Step::Reg { page, addr, name, kind, init } => prog
                .new_reg(RegRequest { page: *page, addr: *addr, name: name.clone(), kind: *kind, owner: None, init: *init })
                .map(|_| ()),
            Step::WriteImm { page, reg, value } => prog.write_imm(*page, *reg, *value).map(|_| ()),
            Step::Instr { mnemonic, operands, comment } => {
                let operands = operands.iter().map(Operand::from).collect();
                match comment {
                    Some(c) => prog.append_commented(mnemonic, operands, c.as_str()),
                    None => prog.append(mnemonic, operands),
                }
            }
            Step::ResetTimestamps => {
                prog.reset_timestamps();
                Ok(())
            }
            Step::End => prog.end(),
        }
    }
}

/// Apply every step, stopping at the first failure.
pub fn apply_all(prog: &mut Program, steps: &[Step]) -> Result<()> {
    steps.iter().try_for_each(|s| s.apply(prog))
}
