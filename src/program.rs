//! Program builder and per-channel timing scheduler.
//!
//! A `Program` owns everything one build needs: the instruction list, labels,
//! registers, envelope/pulse/wave libraries and the channel timestamps.
//! Instructions are kept in call order; nothing is reordered.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{SocConfig, TriggerPort};
use crate::decoder::{Instr, Operand};
use crate::disasm;
use crate::encoder::{self, split_imm, Binary, ImmStep};
use crate::envelope::{self, EnvelopeLibrary};
use crate::error::{RangeError, Result, ValidationError};
use crate::instructions::{lookup, AluOp};
use crate::pulse::{self, Pulse, PulseParams, PulseStyle};
use crate::regs::{RegRequest, Register, RegisterFile, SpecialRegs, TRIG_OUT_REG, TRIG_PAGE, TRIG_TIME_REG};
use crate::wave::{DmaWord, WaveTable};

/// One appended instruction and where it landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instruction {
    pub instr: Instr,
    pub p_addr: u32,
    pub line: u32,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ChannelId {
    Gen(usize),
    Readout(usize),
}

/// When an output should happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Time {
    /// At the channel's current timestamp.
    #[default]
    Auto,
    /// At an explicit time in tProc cycles.
    At(u32),
}

/// Earliest legal next output time per channel, in tProc cycles.
#[derive(Debug, Clone, Default)]
pub struct Timestamps {
    gens: Vec<u64>,
    readouts: Vec<u64>,
}

impl Timestamps {
    pub fn new(gens: usize, readouts: usize) -> Self {
        Self { gens: vec![0; gens], readouts: vec![0; readouts] }
    }

    fn slot(&mut self, ch: ChannelId) -> Result<&mut u64> {
        let (slot, kind, index) = match ch {
            ChannelId::Gen(i) => (self.gens.get_mut(i), "generator", i),
            ChannelId::Readout(i) => (self.readouts.get_mut(i), "readout", i),
        };
        slot.ok_or_else(|| ValidationError::NoSuchChannel { kind, index }.into())
    }

    pub fn get(&self, ch: ChannelId) -> Result<u64> {
        let (slot, kind, index) = match ch {
            ChannelId::Gen(i) => (self.gens.get(i), "generator", i),
            ChannelId::Readout(i) => (self.readouts.get(i), "readout", i),
        };
        slot.copied().ok_or_else(|| ValidationError::NoSuchChannel { kind, index }.into())
    }

    pub fn max(&self, gens: bool, readouts: bool) -> u64 {
        let g = self.gens.iter().filter(|_| gens);
        let r = self.readouts.iter().filter(|_| readouts);
        g.chain(r).copied().max().unwrap_or(0)
    }

    /// Reserve `duration` cycles on `ch` and return the output time.
    ///
    /// An explicit time before the channel timestamp is a conflict: it is
    /// logged and the channel is advanced from its old timestamp instead of
    /// from the requested time.
    pub fn schedule(&mut self, ch: ChannelId, time: Time, duration: u64) -> Result<u64> {
        let slot = self.slot(ch)?;
        let ts = *slot;
        let (t, next) = match time {
            Time::Auto => (ts, ts + duration),
            Time::At(t) if u64::from(t) < ts => {
                warn!(?ch, t, ts, "output time conflicts with the previous output on this channel");
                (u64::from(t), ts + duration)
            }
            Time::At(t) => (u64::from(t), u64::from(t) + duration),
        };
        *slot = next;
        Ok(t)
    }

    pub fn align(&mut self, chs: &[ChannelId]) -> Result<()> {
        let mut max = 0u64;
        for &ch in chs {
            max = max.max(self.get(ch)?);
        }
        for &ch in chs {
            *self.slot(ch)? = max;
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.gens.iter_mut().chain(self.readouts.iter_mut()).for_each(|t| *t = 0);
    }
}

#[derive(Debug, Clone)]
struct PulseEntry {
    pulse: Pulse,
    /// Wave-table index of each segment.
    waves: Vec<usize>,
}

fn time_imm(what: &str, t: u64) -> Result<i64> {
    i64::try_from(t).map_err(|_| RangeError::new(what, t, "signed 64-bit time").into())
}

#[derive(Debug, Clone)]
pub struct Program {
    cfg: SocConfig,
    instructions: Vec<Instruction>,
    labels: BTreeMap<String, u32>,
    p_addr: u32,
    line: u32,
    regs: RegisterFile,
    loop_stack: Vec<Register>,
    loops_opened: usize,
    envelopes: Vec<EnvelopeLibrary>,
    pulses: Vec<HashMap<String, PulseEntry>>,
    waves: WaveTable,
    timestamps: Timestamps,
    ro_lengths: Vec<Option<u32>>,
}

impl Program {
    /// Start an empty program for `cfg`. The generator pulse registers and the
    /// trigger registers are reserved up front.
    pub fn new(cfg: SocConfig) -> Result<Self> {
        cfg.validate()?;
        let mut regs = RegisterFile::new(cfg.tproc.pages, cfg.tproc.regs_per_page);
        for ch in 0..cfg.gens.len() {
            let sregs = SpecialRegs::for_gen(ch);
            for (name, addr, kind) in sregs.named() {
                regs.allocate(RegRequest {
                    page: sregs.page,
                    addr: Some(addr),
                    name: Some(format!("g{ch}_{name}")),
                    kind,
                    owner: Some(ch),
                    init: None,
                })?;
            }
        }
        for (name, addr) in [("trig_t", TRIG_TIME_REG), ("trig_out", TRIG_OUT_REG)] {
            regs.allocate(RegRequest { page: TRIG_PAGE, addr: Some(addr), name: Some(name.into()), ..Default::default() })?;
        }

        let envelopes = cfg.gens.iter().enumerate().map(|(ch, g)| EnvelopeLibrary::new(ch, g)).collect();
        Ok(Self {
            instructions: Vec::new(),
            labels: BTreeMap::new(),
            p_addr: 0,
            line: 0,
            regs,
            loop_stack: Vec::new(),
            loops_opened: 0,
            envelopes,
            pulses: vec![HashMap::new(); cfg.gens.len()],
            waves: WaveTable::default(),
            timestamps: Timestamps::new(cfg.gens.len(), cfg.readouts.len()),
            ro_lengths: vec![None; cfg.readouts.len()],
            cfg,
        })
    }

    pub fn config(&self) -> &SocConfig {
        &self.cfg
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn labels(&self) -> &BTreeMap<String, u32> {
        &self.labels
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.regs
    }

    pub fn waves(&self) -> &WaveTable {
        &self.waves
    }

    pub fn envelopes(&self, ch: usize) -> Result<&EnvelopeLibrary> {
        self.envelopes
            .get(ch)
            .ok_or_else(|| ValidationError::NoSuchChannel { kind: "generator", index: ch }.into())
    }

    pub fn pulse_def(&self, ch: usize, name: &str) -> Option<&Pulse> {
        self.pulses.get(ch)?.get(name).map(|e| &e.pulse)
    }

    pub fn timestamp(&self, ch: ChannelId) -> Result<u64> {
        self.timestamps.get(ch)
    }

    /// Address the next instruction will occupy.
    pub fn p_addr(&self) -> u32 {
        self.p_addr
    }

    fn emit(&mut self, instr: Instr, comment: Option<String>) -> Result<()> {
        let desc = lookup(instr.mnemonic).ok_or_else(|| ValidationError::UnknownMnemonic(instr.mnemonic.to_string()))?;
        if instr.operands.len() != desc.arity() {
            return Err(ValidationError::OperandCount {
                mnemonic: desc.mnemonic,
                expected: desc.arity(),
                got: instr.operands.len(),
            }
            .into());
        }
        debug!(p_addr = self.p_addr, mnemonic = desc.mnemonic, "append");
        self.instructions.push(Instruction { instr, p_addr: self.p_addr, line: self.line, comment });
        self.p_addr += desc.slots;
        self.line += 1;
        Ok(())
    }

    /// Generic entry point for any mnemonic in the instruction table.
    /// Operand values are range-checked when the program is assembled.
    pub fn append(&mut self, mnemonic: &str, operands: Vec<Operand>) -> Result<()> {
        let desc = lookup(mnemonic).ok_or_else(|| ValidationError::UnknownMnemonic(mnemonic.to_string()))?;
        self.emit(Instr::new(desc.mnemonic, operands), None)
    }

    /// Like [`Program::append`], with a listing comment.
    pub fn append_commented(&mut self, mnemonic: &str, operands: Vec<Operand>, comment: impl Into<String>) -> Result<()> {
        let desc = lookup(mnemonic).ok_or_else(|| ValidationError::UnknownMnemonic(mnemonic.to_string()))?;
        self.emit(Instr::new(desc.mnemonic, operands), Some(comment.into()))
    }

    /// Bind `name` to the address of the next instruction.
    pub fn label(&mut self, name: &str) -> Result<()> {
        if self.labels.contains_key(name) {
            return Err(ValidationError::DuplicateLabel(name.to_string()).into());
        }
        self.labels.insert(name.to_string(), self.p_addr);
        Ok(())
    }

    /// Load `value` into a register, splitting it when one `regwi` cannot
    /// carry it. Returns the number of instructions emitted.
    pub fn write_imm(&mut self, page: u8, reg: u8, value: i64) -> Result<usize> {
        let steps = split_imm(value)?;
        let n = steps.len();
        for step in steps {
            let instr = match step {
                ImmStep::Write(v) => Instr::new("regwi", vec![page.into(), reg.into(), v.into()]),
                ImmStep::ShiftLeft(s) => {
                    Instr::new("bitwi", vec![page.into(), reg.into(), reg.into(), AluOp::Shl.into(), s.into()])
                }
                ImmStep::Add(v) => {
                    Instr::new("mathi", vec![page.into(), reg.into(), reg.into(), AluOp::Add.into(), v.into()])
                }
            };
            let comment = (n > 1).then(|| format!("${reg} = {value}"));
            self.emit(instr, comment)?;
        }
        Ok(n)
    }

    /// Allocate a register; an initial value is loaded right away.
    pub fn new_reg(&mut self, req: RegRequest) -> Result<Register> {
        let reg = self.regs.allocate(req)?;
        if let Some(v) = reg.init {
            self.write_imm(reg.page, reg.addr, v)?;
        }
        Ok(reg)
    }

    /// Start a counted loop of `n` iterations. The body runs between this call
    /// and the matching [`Program::close_loop`].
    pub fn open_loop(&mut self, n: u32, name: Option<&str>) -> Result<Register> {
        let name = name.map_or_else(|| format!("loop_{}", self.loops_opened), str::to_string);
        let reg = self.new_reg(RegRequest {
            page: 0,
            name: Some(name.clone()),
            init: Some(i64::from(n)),
            ..Default::default()
        })?;
        self.label(&name.to_uppercase())?;
        self.loops_opened += 1;
        self.loop_stack.push(reg.clone());
        Ok(reg)
    }

    /// Decrement the innermost loop counter and branch back while it is non-zero.
    pub fn close_loop(&mut self) -> Result<()> {
        let reg = self.loop_stack.pop().ok_or(ValidationError::UnbalancedLoop)?;
        let (p, r) = (reg.page, reg.addr);
        self.emit(
            Instr::new("mathi", vec![p.into(), r.into(), r.into(), AluOp::Sub.into(), 1i64.into()]).with_flags(),
            Some(format!("{} -= 1", reg.name)),
        )?;
        self.emit(Instr::new("jnz", vec![Operand::Label(reg.name.to_uppercase())]), None)
    }

    pub fn add_envelope(&mut self, ch: usize, name: &str, idata: Option<&[f64]>, qdata: Option<&[f64]>) -> Result<()> {
        let lib = self
            .envelopes
            .get_mut(ch)
            .ok_or(ValidationError::NoSuchChannel { kind: "generator", index: ch })?;
        lib.add(name, idata, qdata)?;
        Ok(())
    }

    /// Gaussian envelope peaking in the middle. `sigma` and `length` are in
    /// fabric cycles; `maxv` defaults to the generator's scaled full range.
    /// Gaussian envelope centred in `length` clocks. With `even_length` an odd
    /// length is rounded down so the envelope can serve as a flat-top ramp.
    pub fn add_gauss(
        &mut self,
        ch: usize,
        name: &str,
        sigma: f64,
        length: u32,
        maxv: Option<f64>,
        even_length: bool,
    ) -> Result<()> {
        let g = self.cfg.gen(ch)?;
        let length = if even_length { length / 2 * 2 } else { length };
        let samples = length as usize * g.samps_per_clk as usize;
        let sigma = sigma * f64::from(g.samps_per_clk);
        let maxv = maxv.unwrap_or(f64::from(g.maxv) * g.maxv_scale);
        let data = envelope::gauss(samples as f64 / 2.0 - 0.5, sigma, samples, maxv);
        self.add_envelope(ch, name, Some(&data), None)
    }

    pub fn add_triangle(&mut self, ch: usize, name: &str, length: u32, maxv: Option<f64>) -> Result<()> {
        let g = self.cfg.gen(ch)?;
        let samples = length as usize * g.samps_per_clk as usize;
        let maxv = maxv.unwrap_or(f64::from(g.maxv) * g.maxv_scale);
        let data = envelope::triangle(samples, maxv);
        self.add_envelope(ch, name, Some(&data), None)
    }

    /// Compile a pulse into the per-channel library. Its waves are appended to
    /// the wave table as `g<ch>_<name>_w<i>`.
    pub fn add_pulse(&mut self, ch: usize, name: &str, style: PulseStyle, params: &PulseParams) -> Result<()> {
        let lib = self.envelopes(ch)?;
        if self.pulses[ch].contains_key(name) {
            return Err(ValidationError::DuplicateName { kind: "pulse", ch, name: name.to_string() }.into());
        }
        let pulse = pulse::compile(style, params, ch, &self.cfg, lib)?;
        let mut waves = Vec::with_capacity(pulse.waves.len());
        for (i, w) in pulse.waves.iter().enumerate() {
            waves.push(self.waves.add(format!("g{ch}_{name}_w{i}"), *w)?);
        }
        debug!(ch, name, %style, waves = waves.len(), length = pulse.length, "added pulse");
        self.pulses[ch].insert(name.to_string(), PulseEntry { pulse, waves });
        Ok(())
    }

    /// Play a stored pulse on generator `ch`. Returns the start time used.
    pub fn pulse(&mut self, ch: usize, name: &str, t: Time) -> Result<u64> {
        let entry = self
            .pulses
            .get(ch)
            .ok_or(ValidationError::NoSuchChannel { kind: "generator", index: ch })?
            .get(name)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownName { kind: "pulse", ch, name: name.to_string() })?;
        let duration = self.cfg.gen_cycles_to_tproc(ch, entry.pulse.length)?;
        let start = self.timestamps.schedule(ChannelId::Gen(ch), t, u64::from(duration))?;

        let sregs = SpecialRegs::for_gen(ch);
        for (i, (&idx, &offset)) in entry.waves.iter().zip(&entry.pulse.offsets).enumerate() {
            let seg_t = start + u64::from(self.cfg.gen_cycles_to_tproc(ch, offset)?);
            self.write_imm(sregs.page, sregs.t, time_imm("pulse time", seg_t)?)?;
            self.emit(
                Instr::new(
                    "wseti",
                    vec![(ch as u32).into(), sregs.page.into(), sregs.t.into(), (idx as u32).into()],
                ),
                Some(format!("g{ch} {name} w{i} @t = {seg_t}")),
            )?;
        }
        Ok(start)
    }

    /// Record how long readout `ro` acquires per trigger, in its fabric cycles.
    pub fn declare_readout(&mut self, ro: usize, length: u32) -> Result<()> {
        self.cfg.readout(ro)?;
        self.ro_lengths[ro] = Some(length);
        Ok(())
    }

    /// Fire readout triggers and output pins at `t` for `width` cycles.
    pub fn trigger(&mut self, ros: &[usize], pins: &[usize], t: u32, width: u32) -> Result<()> {
        let mut dports: BTreeMap<u8, u32> = BTreeMap::new();
        let mut pulsed: BTreeSet<u8> = BTreeSet::new();
        let mut add = |port: TriggerPort| match port {
            TriggerPort::Dport { port, bit } => *dports.entry(port).or_default() |= 1 << bit,
            TriggerPort::Pulsed { port } => {
                pulsed.insert(port);
            }
        };

        for &ro in ros {
            add(self.cfg.readout(ro)?.trigger);
            let length = self.ro_lengths[ro].ok_or(ValidationError::NoSuchChannel { kind: "declared readout", index: ro })?;
            let duration = self.cfg.ro_cycles_to_tproc(ro, length)?;
            self.timestamps.schedule(ChannelId::Readout(ro), Time::At(t), u64::from(duration))?;
        }
        for &pin in pins {
            add(self.cfg.pin(pin)?);
        }

        let t_end = i64::from(t) + i64::from(width);
        if !dports.is_empty() {
            for (at, high) in [(i64::from(t), true), (t_end, false)] {
                self.write_imm(TRIG_PAGE, TRIG_TIME_REG, at)?;
                for (&port, &bits) in &dports {
                    let bits = if high { bits } else { 0 };
                    self.emit(
                        Instr::new("dporti", vec![port.into(), TRIG_PAGE.into(), TRIG_TIME_REG.into(), bits.into()]),
                        Some(format!("port {port} = {bits:#06x} @t = {at}")),
                    )?;
                }
            }
        }
        for port in pulsed {
            self.emit(Instr::new("trigi", vec![port.into(), 1u8.into(), i64::from(t).into()]), None)?;
            self.emit(Instr::new("trigi", vec![port.into(), 0u8.into(), t_end.into()]), None)?;
        }
        Ok(())
    }

    /// Bring the given channels to their common latest timestamp.
    pub fn align(&mut self, chs: &[ChannelId]) -> Result<()> {
        self.timestamps.align(chs)
    }

    /// Advance the time reference past every channel and restart all
    /// timestamps from zero.
    pub fn sync_all(&mut self, t: u32) -> Result<()> {
        let total = self.timestamps.max(true, true) + u64::from(t);
        if total > 0 {
            self.emit(Instr::new("synci", vec![time_imm("sync time", total)?.into()]), None)?;
        }
        self.timestamps.reset();
        Ok(())
    }

    pub fn wait(&mut self, t: u32) -> Result<()> {
        self.emit(Instr::new("waiti", vec![0u8.into(), t.into()]), None)
    }

    /// Wait until every readout has finished, plus `t`.
    pub fn wait_all(&mut self, t: u32) -> Result<()> {
        let until = self.timestamps.max(false, true) + u64::from(t);
        self.emit(Instr::new("waiti", vec![0u8.into(), time_imm("wait time", until)?.into()]), None)
    }

    pub fn end(&mut self) -> Result<()> {
        self.emit(Instr::new("end", vec![]), None)
    }

    pub fn reset_timestamps(&mut self) {
        self.timestamps.reset();
    }

    pub fn assemble(&self) -> Result<Binary> {
        if !self.loop_stack.is_empty() {
            warn!(open = self.loop_stack.len(), "assembling with unclosed loops");
        }
        encoder::assemble(&self.instructions, &self.labels)
    }

    pub fn compile_waves(&self) -> Result<Vec<DmaWord>> {
        self.waves.compile()
    }

    pub fn envelope_image(&self, ch: usize) -> Result<Vec<u32>> {
        Ok(self.envelopes(ch)?.image())
    }

    pub fn asm(&self) -> String {
        disasm::listing(
            self.instructions.iter().map(|i| disasm::Line {
                p_addr: i.p_addr,
                instr: &i.instr,
                comment: i.comment.as_deref(),
            }),
            &self.labels,
        )
    }

    pub fn hex(&self) -> Result<String> {
        Ok(self.assemble()?.hex())
    }

    pub fn bin(&self) -> Result<String> {
        Ok(self.assemble()?.bin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Long-standing behaviour, kept unchanged: the early pulse plays where asked
    // and the channel moves on from its previous timestamp.
    #[test]
    fn early_explicit_time_keeps_the_channel_clock() {
        let mut ts = Timestamps::new(1, 0);
        let g = ChannelId::Gen(0);
        assert_eq!(ts.schedule(g, Time::At(100), 50).unwrap(), 100);
        assert_eq!(ts.get(g).unwrap(), 150);
        // earlier than 150: still played at 20, but the channel moves on from 150
        assert_eq!(ts.schedule(g, Time::At(20), 10).unwrap(), 20);
        assert_eq!(ts.get(g).unwrap(), 160);
    }

    #[test]
    fn align_uses_only_given_channels() {
        let mut ts = Timestamps::new(3, 1);
        ts.schedule(ChannelId::Gen(0), Time::Auto, 40).unwrap();
        ts.schedule(ChannelId::Gen(2), Time::Auto, 90).unwrap();
        ts.schedule(ChannelId::Readout(0), Time::Auto, 500).unwrap();
        ts.align(&[ChannelId::Gen(0), ChannelId::Gen(1), ChannelId::Gen(2)]).unwrap();
        assert_eq!(ts.get(ChannelId::Gen(1)).unwrap(), 90);
        assert_eq!(ts.get(ChannelId::Readout(0)).unwrap(), 500);
    }

    #[test]
    fn special_registers_are_reserved() {
        let p = Program::new(SocConfig::default()).unwrap();
        assert!(p.registers().is_used(0, 16));
        assert!(p.registers().is_used(0, 28));
        assert!(p.registers().is_used(0, 31));
        assert!(!p.registers().is_used(0, 0));
        assert_eq!(p.registers().get("g3_t").map(|r| (r.page, r.addr)), Some((1, 28)));
    }
}
