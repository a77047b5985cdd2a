//! Pulse styles and their lowering to wave-table entries.
//!
//! A pulse is a named recipe on one generator. Compiling it checks the
//! parameter set for its style and produces one wave per output segment.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{deg2reg, SocConfig};
use crate::envelope::EnvelopeLibrary;
use crate::error::{RangeError, Result, ValidationError};
use crate::wave::{cfg2reg, OutSel, RunMode, StdySel, Wave};

const MIN_WAVE_LEN: u32 = 3;
const MAX_WAVE_LEN: u32 = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PulseStyle {
    Const,
    Arb,
    FlatTop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Param {
    Freq,
    Phase,
    Gain,
    Length,
    Envelope,
    Phrst,
    Stdysel,
    Mode,
    Outsel,
}

impl Param {
    pub const ALL: [Param; 9] = [
        Param::Freq,
        Param::Phase,
        Param::Gain,
        Param::Length,
        Param::Envelope,
        Param::Phrst,
        Param::Stdysel,
        Param::Mode,
        Param::Outsel,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Param::Freq => "freq",
            Param::Phase => "phase",
            Param::Gain => "gain",
            Param::Length => "length",
            Param::Envelope => "envelope",
            Param::Phrst => "phrst",
            Param::Stdysel => "stdysel",
            Param::Mode => "mode",
            Param::Outsel => "outsel",
        }
    }

    pub fn from_name(name: &str) -> Option<Param> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }
}

impl PulseStyle {
    pub fn name(self) -> &'static str {
        match self {
            PulseStyle::Const => "const",
            PulseStyle::Arb => "arb",
            PulseStyle::FlatTop => "flat_top",
        }
    }

    pub fn from_name(name: &str) -> Result<PulseStyle> {
        match name {
            "const" => Ok(PulseStyle::Const),
            "arb" => Ok(PulseStyle::Arb),
            "flat_top" => Ok(PulseStyle::FlatTop),
            other => Err(ValidationError::UnknownStyle(other.to_string()).into()),
        }
    }

    pub fn required(self) -> &'static [Param] {
        use Param::*;
        match self {
            PulseStyle::Const => &[Freq, Phase, Gain, Length],
            PulseStyle::Arb => &[Freq, Phase, Gain, Envelope],
            PulseStyle::FlatTop => &[Freq, Phase, Gain, Length, Envelope],
        }
    }

    pub fn optional(self) -> &'static [Param] {
        use Param::*;
        match self {
            PulseStyle::Const => &[Phrst, Stdysel, Mode],
            PulseStyle::Arb => &[Phrst, Stdysel, Mode, Outsel],
            PulseStyle::FlatTop => &[Phrst, Stdysel],
        }
    }
}

impl fmt::Display for PulseStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pulse parameters in physical units. Frequencies are MHz, phases degrees,
/// gain a fraction of full scale and lengths generator fabric cycles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PulseParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freq: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gain: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phrst: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdysel: Option<StdySel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<RunMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outsel: Option<OutSel>,
}

fn bad(param: Param, v: &Value) -> crate::Error {
    ValidationError::BadParamValue { param: param.name(), value: v.to_string() }.into()
}

fn parse_enum<T: serde::de::DeserializeOwned>(param: Param, v: &Value) -> Result<T> {
    serde_json::from_value(v.clone()).map_err(|_| bad(param, v))
}

impl PulseParams {
    /// Build a style and parameter set from loosely typed key/value pairs.
    /// The `style` key is mandatory; unknown keys are rejected.
    pub fn from_map(map: &Map<String, Value>) -> Result<(PulseStyle, PulseParams)> {
        let style = match map.get("style") {
            Some(Value::String(s)) => PulseStyle::from_name(s)?,
            Some(other) => return Err(ValidationError::UnknownStyle(other.to_string()).into()),
            None => {
                return Err(ValidationError::MissingParams { style: "pulse", missing: vec!["style".into()] }.into())
            }
        };

        let mut params = PulseParams::default();
        let mut extra = Vec::new();
        for (key, v) in map.iter().filter(|(k, _)| k.as_str() != "style") {
            let Some(param) = Param::from_name(key) else {
                extra.push(key.clone());
                continue;
            };
            match param {
                Param::Freq => params.freq = Some(v.as_f64().ok_or_else(|| bad(param, v))?),
                Param::Phase => params.phase = Some(v.as_f64().ok_or_else(|| bad(param, v))?),
                Param::Gain => params.gain = Some(v.as_f64().ok_or_else(|| bad(param, v))?),
                Param::Length => {
                    let n = v.as_u64().and_then(|n| u32::try_from(n).ok()).ok_or_else(|| bad(param, v))?;
                    params.length = Some(n);
                }
                Param::Envelope => params.envelope = Some(v.as_str().ok_or_else(|| bad(param, v))?.to_string()),
                Param::Phrst => {
                    let on = match v {
                        Value::Bool(b) => *b,
                        Value::Number(n) if n.as_u64() == Some(0) => false,
                        Value::Number(n) if n.as_u64() == Some(1) => true,
                        _ => return Err(bad(param, v)),
                    };
                    params.phrst = Some(on);
                }
                Param::Stdysel => params.stdysel = Some(parse_enum(param, v)?),
                Param::Mode => params.mode = Some(parse_enum(param, v)?),
                Param::Outsel => params.outsel = Some(parse_enum(param, v)?),
            }
        }
        if !extra.is_empty() {
            extra.sort();
            return Err(ValidationError::UnsupportedParams { style: style.name(), extra }.into());
        }
        Ok((style, params))
    }

    pub fn defined(&self) -> Vec<Param> {
        let set = [
            (Param::Freq, self.freq.is_some()),
            (Param::Phase, self.phase.is_some()),
            (Param::Gain, self.gain.is_some()),
            (Param::Length, self.length.is_some()),
            (Param::Envelope, self.envelope.is_some()),
            (Param::Phrst, self.phrst.is_some()),
            (Param::Stdysel, self.stdysel.is_some()),
            (Param::Mode, self.mode.is_some()),
            (Param::Outsel, self.outsel.is_some()),
        ];
        set.into_iter().filter(|(_, on)| *on).map(|(p, _)| p).collect()
    }
}

/// Reject parameter sets with missing required or unrecognised entries.
pub fn validate(style: PulseStyle, params: &PulseParams) -> Result<()> {
    let defined = params.defined();
    let missing: Vec<String> = style
        .required()
        .iter()
        .filter(|p| !defined.contains(*p))
        .map(|p| p.name().to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ValidationError::MissingParams { style: style.name(), missing }.into());
    }
    let extra: Vec<String> = defined
        .iter()
        .filter(|p| !style.required().contains(*p) && !style.optional().contains(*p))
        .map(|p| p.name().to_string())
        .collect();
    if !extra.is_empty() {
        return Err(ValidationError::UnsupportedParams { style: style.name(), extra }.into());
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pulse {
    pub style: PulseStyle,
    pub params: PulseParams,
    pub waves: Vec<Wave>,
    /// Start of each wave relative to the pulse start, fabric cycles.
    pub offsets: Vec<u32>,
    /// Total length in fabric cycles.
    pub length: u32,
}

struct WaveParts {
    freq: u32,
    phase: u32,
    gain: i32,
    stdysel: Option<StdySel>,
}

impl WaveParts {
    fn wave(
        &self,
        gain: i32,
        length: u32,
        env: u32,
        outsel: OutSel,
        mode: Option<RunMode>,
        phrst: Option<bool>,
    ) -> Result<Wave> {
        if !(MIN_WAVE_LEN..MAX_WAVE_LEN).contains(&length) {
            return Err(RangeError::new("pulse length (cycles)", length, "[3, 2^16)").into());
        }
        Ok(Wave {
            freq: self.freq,
            phase: self.phase,
            env,
            gain,
            length,
            conf: cfg2reg(Some(outsel), mode, self.stdysel, phrst),
        })
    }
}

/// Lower a validated parameter set for generator `ch` into waves.
pub fn compile(
    style: PulseStyle,
    params: &PulseParams,
    ch: usize,
    cfg: &SocConfig,
    envelopes: &EnvelopeLibrary,
) -> Result<Pulse> {
    validate(style, params)?;
    // validate() guarantees these are present for every style
    let (Some(freq), Some(phase), Some(gain)) = (params.freq, params.phase, params.gain) else {
        return Err(ValidationError::MissingParams { style: style.name(), missing: vec!["freq".into()] }.into());
    };
    let parts = WaveParts {
        freq: cfg.freq2reg(ch, freq)?,
        phase: deg2reg(phase)?,
        gain: cfg.gain2reg(ch, gain)?,
        stdysel: params.stdysel,
    };

    // envelope address and length in clocks
    let env = match &params.envelope {
        Some(name) => {
            let e = envelopes.get(name)?;
            let spc = envelopes.samps_per_clk();
            Some((e.addr / spc, e.len() as u32 / spc))
        }
        None => None,
    };
    let length = params.length.unwrap_or(0);

    let (waves, offsets) = match (style, env) {
        (PulseStyle::Const, _) => {
            let w = parts.wave(parts.gain, length, 0, OutSel::Dds, params.mode, params.phrst)?;
            (vec![w], vec![0])
        }
        (PulseStyle::Arb, Some((addr, len))) => {
            let outsel = params.outsel.unwrap_or_default();
            let w = parts.wave(parts.gain, len, addr, outsel, params.mode, params.phrst)?;
            (vec![w], vec![0])
        }
        (PulseStyle::FlatTop, Some((addr, len))) => {
            // an odd middle sample is dropped
            let ramp = len / 2;
            let down_addr = addr + len.div_ceil(2);
            let oneshot = Some(RunMode::Oneshot);
            let up = parts.wave(parts.gain, ramp, addr, OutSel::Product, oneshot, params.phrst)?;
            let flat = parts.wave(parts.gain / 2, length, 0, OutSel::Dds, oneshot, None)?;
            let down = parts.wave(parts.gain, ramp, down_addr, OutSel::Product, oneshot, None)?;
            (vec![up, flat, down], vec![0, ramp, ramp + length])
        }
        (_, None) => {
            return Err(ValidationError::MissingParams { style: style.name(), missing: vec!["envelope".into()] }.into())
        }
    };

    let length = waves.iter().map(|w| w.length).sum();
    Ok(Pulse { style, params: params.clone(), waves, offsets, length })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn map_parsing_rejects_unknown_keys() {
        let v = json!({"style": "const", "freq": 100.0, "phase": 0, "gain": 0.5, "length": 10, "width": 3});
        let err = PulseParams::from_map(v.as_object().unwrap()).unwrap_err();
        assert_eq!(
            err,
            crate::Error::Validation(ValidationError::UnsupportedParams { style: "const", extra: vec!["width".into()] })
        );
    }

    #[test]
    fn map_parsing_reads_enums_and_flags() {
        let v = json!({"style": "arb", "freq": 1, "phase": 0, "gain": 1, "envelope": "g", "phrst": 1, "outsel": "input"});
        let (style, p) = PulseParams::from_map(v.as_object().unwrap()).unwrap();
        assert_eq!(style, PulseStyle::Arb);
        assert_eq!(p.phrst, Some(true));
        assert_eq!(p.outsel, Some(OutSel::Input));
        validate(style, &p).unwrap();
    }

    #[test]
    fn style_sets() {
        let p = PulseParams { freq: Some(1.0), phase: Some(0.0), gain: Some(0.1), length: Some(10), outsel: Some(OutSel::Dds), ..Default::default() };
        let err = validate(PulseStyle::Const, &p).unwrap_err();
        assert!(matches!(err, crate::Error::Validation(ValidationError::UnsupportedParams { .. })));
        let err = validate(PulseStyle::FlatTop, &PulseParams { outsel: None, ..p }).unwrap_err();
        match err {
            crate::Error::Validation(ValidationError::MissingParams { missing, .. }) => assert_eq!(missing, vec!["envelope"]),
            other => panic!("unexpected {other:?}"),
        }
    }
}
