use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::error::{RangeError, Result, ValidationError};

/// How a readout or output pin is triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerPort {
    /// Bit-addressable data port: the trigger is a bit held high for `width`.
    Dport { port: u8, bit: u8 },
    /// Port that only accepts set/clear trigger markers.
    Pulsed { port: u8 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TprocConfig {
    pub pages: u8,
    pub regs_per_page: u8,
    /// Timing clock (MHz).
    pub f_time: f64,
    pub output_pins: Vec<TriggerPort>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenConfig {
    pub samps_per_clk: u32,
    pub maxv: i32,
    pub maxv_scale: f64,
    /// Fabric clock (MHz); pulse lengths count these cycles.
    pub f_fabric: f64,
    /// DDS sampling rate (MHz).
    pub f_dds: f64,
    pub b_dds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadoutConfig {
    pub trigger: TriggerPort,
    pub f_fabric: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocConfig {
    pub tproc: TprocConfig,
    pub gens: Vec<GenConfig>,
    pub readouts: Vec<ReadoutConfig>,
}

impl Default for GenConfig {
    fn default() -> Self {
        Self { samps_per_clk: 16, maxv: 32766, maxv_scale: 1.0, f_fabric: 384.0, f_dds: 6144.0, b_dds: 32 }
    }
}

impl Default for SocConfig {
    fn default() -> Self {
        Self {
            tproc: TprocConfig {
                pages: 8,
                regs_per_page: 32,
                f_time: 384.0,
                output_pins: (0..4).map(|bit| TriggerPort::Dport { port: 0, bit }).collect(),
            },
            gens: vec![GenConfig::default(); 7],
            readouts: vec![
                ReadoutConfig { trigger: TriggerPort::Dport { port: 0, bit: 14 }, f_fabric: 384.0 },
                ReadoutConfig { trigger: TriggerPort::Dport { port: 0, bit: 15 }, f_fabric: 384.0 },
            ],
        }
    }
}

impl SocConfig {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Check the board against the limits of the instruction encoding.
    pub fn validate(&self) -> Result<()> {
        if !(1..=8).contains(&self.tproc.pages) {
            return Err(RangeError::new("tproc.pages", self.tproc.pages, "[1, 8]").into());
        }
        // pulse and trigger registers sit at 16..=31 of their page
        if self.tproc.regs_per_page != 32 {
            return Err(RangeError::new(
                "tproc.regs_per_page",
                self.tproc.regs_per_page,
                "32 (registers 16..=31 are reserved for pulses and triggers)",
            )
            .into());
        }
        for (g, gc) in self.gens.iter().enumerate() {
            let page = g / 2;
            if page >= usize::from(self.tproc.pages) {
                return Err(RangeError::new(format!("gen {g} page"), page as u64, "configured pages").into());
            }
            if !(1..=32).contains(&gc.b_dds) {
                return Err(RangeError::new(format!("gen {g} b_dds"), gc.b_dds, "[1, 32]").into());
            }
            if gc.samps_per_clk == 0 {
                return Err(RangeError::new(format!("gen {g} samps_per_clk"), gc.samps_per_clk, ">= 1").into());
            }
        }
        let pins = self.tproc.output_pins.iter().enumerate().map(|(i, t)| (format!("output pin {i}"), t));
        let ros = self.readouts.iter().enumerate().map(|(i, r)| (format!("readout {i} trigger"), &r.trigger));
        for (what, trigger) in pins.chain(ros) {
            if let TriggerPort::Dport { bit, .. } = trigger {
                if *bit >= 32 {
                    return Err(RangeError::new(format!("{what} bit"), *bit, "[0, 32)").into());
                }
            }
        }
        Ok(())
    }

    pub fn gen(&self, ch: usize) -> Result<&GenConfig> {
        self.gens
            .get(ch)
            .ok_or_else(|| ValidationError::NoSuchChannel { kind: "generator", index: ch }.into())
    }

    pub fn readout(&self, ro: usize) -> Result<&ReadoutConfig> {
        self.readouts
            .get(ro)
            .ok_or_else(|| ValidationError::NoSuchChannel { kind: "readout", index: ro }.into())
    }

    pub fn pin(&self, pin: usize) -> Result<TriggerPort> {
        self.tproc
            .output_pins
            .get(pin)
            .copied()
            .ok_or_else(|| ValidationError::NoSuchChannel { kind: "output pin", index: pin }.into())
    }

    /// DDS frequency word for `f` MHz. Wraps like the phase accumulator does.
    pub fn freq2reg(&self, ch: usize, f: f64) -> Result<u32> {
        let g = self.gen(ch)?;
        let steps = (f / g.f_dds * 2f64.powi(g.b_dds as i32)).round();
        let steps = steps
            .to_i64()
            .ok_or_else(|| RangeError::new("freq", f as i64, "finite frequency"))?;
        Ok(steps.rem_euclid(1i64 << g.b_dds) as u32)
    }

    pub fn reg2freq(&self, ch: usize, r: u32) -> Result<f64> {
        let g = self.gen(ch)?;
        Ok(f64::from(r) * g.f_dds / 2f64.powi(g.b_dds as i32))
    }

    pub fn gain2reg(&self, ch: usize, gain: f64) -> Result<i32> {
        let g = self.gen(ch)?;
        let reg = (gain * f64::from(g.maxv) * g.maxv_scale)
            .trunc()
            .to_i32()
            .ok_or_else(|| RangeError::new("gain", gain as i64, "32-bit gain register"))?;
        if reg.unsigned_abs() > g.maxv.unsigned_abs() {
            return Err(RangeError::new("gain", reg, format!("|gain| <= {}", g.maxv)).into());
        }
        Ok(reg)
    }

    pub fn us2cycles(&self, us: f64) -> Result<u32> {
        (us * self.tproc.f_time)
            .trunc()
            .to_u32()
            .ok_or_else(|| RangeError::new("time (us)", us as i64, "non-negative 32-bit cycle count").into())
    }

    pub fn cycles2us(&self, cycles: u32) -> f64 {
        f64::from(cycles) / self.tproc.f_time
    }

    /// Generator fabric cycles to tProc timing cycles, rounded down.
    pub fn gen_cycles_to_tproc(&self, ch: usize, cycles: u32) -> Result<u32> {
        let g = self.gen(ch)?;
        Ok((f64::from(cycles) * self.tproc.f_time / g.f_fabric) as u32)
    }

    pub fn ro_cycles_to_tproc(&self, ro: usize, cycles: u32) -> Result<u32> {
        let r = self.readout(ro)?;
        Ok((f64::from(cycles) * self.tproc.f_time / r.f_fabric) as u32)
    }
}

/// Phase word for an angle in degrees; angles beyond a full turn wrap.
pub fn deg2reg(deg: f64) -> Result<u32> {
    let r = (deg * 2f64.powi(32) / 360.0)
        .floor()
        .to_i64()
        .ok_or_else(|| RangeError::new("phase", deg as i64, "finite angle"))?;
    Ok(r.rem_euclid(1i64 << 32) as u32)
}

pub fn reg2deg(reg: u32) -> f64 {
    f64::from(reg) * 360.0 / 2f64.powi(32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_board_is_consistent() {
        let cfg = SocConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.gens.len(), 7);
    }

    #[test]
    fn json_round_trip_keeps_trigger_kinds() {
        let cfg = SocConfig::default();
        let text = serde_json::to_string(&cfg).unwrap();
        assert!(text.contains("\"type\":\"dport\""));
        let back = SocConfig::from_json(&text).unwrap();
        assert_eq!(back.readouts[1].trigger, TriggerPort::Dport { port: 0, bit: 15 });
    }

    #[test]
    fn unit_conversions() {
        let cfg = SocConfig::default();
        assert_eq!(cfg.freq2reg(0, 6144.0 / 4.0).unwrap(), 1 << 30);
        assert_eq!(cfg.freq2reg(0, -6144.0 / 4.0).unwrap(), 3 << 30);
        assert_eq!(deg2reg(90.0).unwrap(), 1 << 30);
        assert_eq!(deg2reg(450.0).unwrap(), 1 << 30);
        assert_eq!(cfg.us2cycles(1.0).unwrap(), 384);
        assert!(cfg.us2cycles(-1.0).is_err());
        assert_eq!(cfg.gain2reg(0, 0.5).unwrap(), 16383);
        assert!(cfg.gain2reg(0, 1.5).is_err());
    }

    fn rejected_field(cfg: &SocConfig) -> String {
        match cfg.validate() {
            Err(crate::Error::Range(e)) => e.field,
            other => panic!("expected a range error, got {other:?}"),
        }
    }

    #[test]
    fn dds_width_is_bounded() {
        let mut cfg = SocConfig::default();
        cfg.gens[3].b_dds = 33;
        assert_eq!(rejected_field(&cfg), "gen 3 b_dds");
        cfg.gens[3].b_dds = 0;
        assert_eq!(rejected_field(&cfg), "gen 3 b_dds");
        cfg.gens[3].b_dds = 16;
        cfg.validate().unwrap();
        assert_eq!(cfg.freq2reg(3, 6144.0 / 2.0).unwrap(), 1 << 15);
    }

    #[test]
    fn samples_per_clock_must_be_positive() {
        let mut cfg = SocConfig::default();
        cfg.gens[0].samps_per_clk = 0;
        assert_eq!(rejected_field(&cfg), "gen 0 samps_per_clk");
    }

    #[test]
    fn dport_bits_fit_a_word() {
        let mut cfg = SocConfig::default();
        cfg.tproc.output_pins[2] = TriggerPort::Dport { port: 0, bit: 32 };
        assert_eq!(rejected_field(&cfg), "output pin 2 bit");

        let mut cfg = SocConfig::default();
        cfg.readouts[1].trigger = TriggerPort::Dport { port: 1, bit: 40 };
        assert_eq!(rejected_field(&cfg), "readout 1 trigger bit");

        let mut cfg = SocConfig::default();
        cfg.readouts[0].trigger = TriggerPort::Dport { port: 0, bit: 31 };
        cfg.validate().unwrap();
    }

    #[test]
    fn page_must_hold_the_reserved_registers() {
        let mut cfg = SocConfig::default();
        cfg.tproc.regs_per_page = 16;
        assert_eq!(rejected_field(&cfg), "tproc.regs_per_page");
        cfg.tproc.regs_per_page = 33;
        assert_eq!(rejected_field(&cfg), "tproc.regs_per_page");
    }

    #[test]
    fn conversions_invert_within_one_step() {
        let cfg = SocConfig::default();
        let freq_step = 6144.0 / 2f64.powi(32);
        for f in [0.0, 1.0, 123.456, 1000.0, 3071.9] {
            let back = cfg.reg2freq(0, cfg.freq2reg(0, f).unwrap()).unwrap();
            assert!((back - f).abs() <= freq_step, "{f} MHz came back as {back}");
        }
        for us in [0.0, 0.5, 1.0, 2.718, 1000.0] {
            let back = cfg.cycles2us(cfg.us2cycles(us).unwrap());
            assert!(back <= us && us - back < 1.0 / 384.0, "{us} us came back as {back}");
        }
        let deg_step = 360.0 / 2f64.powi(32);
        for d in [0.0, 45.0, 90.0, 179.99, 359.0] {
            let back = reg2deg(deg2reg(d).unwrap());
            assert!(back <= d && d - back < deg_step, "{d} deg came back as {back}");
        }
        assert_eq!(cfg.reg2freq(0, 1 << 30).unwrap(), 1536.0);
        assert_eq!(reg2deg(1 << 31), 180.0);
    }
}
