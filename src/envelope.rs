//! Per-generator envelope tables.

use std::collections::HashMap;

use num_traits::ToPrimitive;
use serde::Serialize;
use tracing::debug;

use crate::config::GenConfig;
use crate::error::{RangeError, Result, ValidationError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Envelope {
    pub name: String,
    pub idata: Vec<i16>,
    pub qdata: Vec<i16>,
    /// Offset in the generator's table, in samples.
    pub addr: u32,
}

impl Envelope {
    pub fn len(&self) -> usize {
        self.idata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.idata.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct EnvelopeLibrary {
    ch: usize,
    samps_per_clk: u32,
    maxv: i32,
    next_addr: u32,
    envelopes: Vec<Envelope>,
    index: HashMap<String, usize>,
}

fn to_samples(name: &str, data: &[f64]) -> Result<Vec<i16>> {
    data.iter()
        .map(|x| {
            x.round()
                .to_i16()
                .ok_or_else(|| RangeError::new(format!("envelope {name} sample"), *x as i64, "16-bit sample").into())
        })
        .collect()
}

impl EnvelopeLibrary {
    pub fn new(ch: usize, gen: &GenConfig) -> Self {
        Self {
            ch,
            samps_per_clk: gen.samps_per_clk,
            maxv: gen.maxv,
            next_addr: 0,
            envelopes: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Append an I/Q envelope. A missing component is filled with zeros.
    /// Nothing is stored unless every check passes.
    pub fn add(&mut self, name: &str, idata: Option<&[f64]>, qdata: Option<&[f64]>) -> Result<&Envelope> {
        if self.index.contains_key(name) {
            return Err(ValidationError::DuplicateName { kind: "envelope", ch: self.ch, name: name.to_string() }.into());
        }
        let len = match (idata, qdata) {
            (None, None) => return Err(ValidationError::EmptyEnvelope(name.to_string()).into()),
            (Some(i), Some(q)) if i.len() != q.len() => {
                return Err(ValidationError::EnvelopeShape { name: name.to_string(), i: i.len(), q: q.len() }.into())
            }
            (Some(d), _) | (None, Some(d)) => d.len(),
        };
        if len == 0 {
            return Err(ValidationError::EmptyEnvelope(name.to_string()).into());
        }
        if len % self.samps_per_clk as usize != 0 {
            return Err(RangeError::new(
                format!("envelope {name} length"),
                len as u64,
                format!("multiple of {} samples", self.samps_per_clk),
            )
            .into());
        }
        let peak = idata
            .into_iter()
            .chain(qdata)
            .flatten()
            .fold(0f64, |m, x| m.max(x.abs()));
        if peak > f64::from(self.maxv) {
            return Err(RangeError::new(
                format!("envelope {name} amplitude"),
                peak.ceil() as i64,
                format!("|sample| <= {}", self.maxv),
            )
            .into());
        }

        let zeros = vec![0i16; len];
        let idata = idata.map(|d| to_samples(name, d)).transpose()?.unwrap_or_else(|| zeros.clone());
        let qdata = qdata.map(|d| to_samples(name, d)).transpose()?.unwrap_or(zeros);
        let addr = self.next_addr;
        self.next_addr += len as u32;
        debug!(ch = self.ch, name, addr, len, "added envelope");

        let idx = self.envelopes.len();
        self.index.insert(name.to_string(), idx);
        self.envelopes.push(Envelope { name: name.to_string(), idata, qdata, addr });
        Ok(&self.envelopes[idx])
    }

    pub fn get(&self, name: &str) -> Result<&Envelope> {
        self.index
            .get(name)
            .map(|&i| &self.envelopes[i])
            .ok_or_else(|| ValidationError::UnknownName { kind: "envelope", ch: self.ch, name: name.to_string() }.into())
    }

    pub fn samps_per_clk(&self) -> u32 {
        self.samps_per_clk
    }

    pub fn iter(&self) -> impl Iterator<Item = &Envelope> {
        self.envelopes.iter()
    }

    /// The whole table as the generator memory expects it: one 32-bit word
    /// per sample, I in the low half and Q in the high half.
    pub fn image(&self) -> Vec<u32> {
        self.envelopes
            .iter()
            .flat_map(|e| e.idata.iter().zip(&e.qdata))
            .map(|(&i, &q)| u32::from(i as u16) | (u32::from(q as u16) << 16))
            .collect()
    }
}

/// Gaussian normalised so its peak sample is `maxv`.
pub fn gauss(mu: f64, sigma: f64, length: usize, maxv: f64) -> Vec<f64> {
    let y: Vec<f64> = (0..length).map(|x| (-(x as f64 - mu).powi(2) / sigma.powi(2)).exp()).collect();
    normalize(y, maxv)
}

/// Linear ramp up then down.
pub fn triangle(length: usize, maxv: f64) -> Vec<f64> {
    let half = length.div_ceil(2);
    let up = (0..half).map(|x| x as f64);
    let y: Vec<f64> = up.clone().chain(up.rev()).take(length).collect();
    normalize(y, maxv)
}

fn normalize(y: Vec<f64>, maxv: f64) -> Vec<f64> {
    let peak = y.iter().copied().fold(0f64, f64::max);
    if peak == 0.0 {
        return y;
    }
    y.into_iter().map(|v| v / peak * maxv).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lib() -> EnvelopeLibrary {
        EnvelopeLibrary::new(0, &GenConfig::default())
    }

    #[test]
    fn addresses_follow_insertion() {
        let mut l = lib();
        let a = l.add("a", Some(&[1.0; 32]), None).unwrap().addr;
        let b = l.add("b", None, Some(&[-2.0; 16])).unwrap().addr;
        assert_eq!((a, b), (0, 32));
        assert_eq!(l.get("b").unwrap().idata, vec![0; 16]);
        assert!(l.get("c").is_err());
    }

    #[test]
    fn image_packs_i_low_q_high() {
        let mut l = lib();
        let mut q = vec![0.0; 16];
        q[0] = -1.0;
        let mut i = vec![0.0; 16];
        i[0] = 3.0;
        l.add("x", Some(&i), Some(&q)).unwrap();
        let img = l.image();
        assert_eq!(img.len(), 16);
        assert_eq!(img[0], 0xFFFF_0003);
    }

    #[test]
    fn generated_shapes_peak_at_maxv() {
        let g = gauss(7.5, 4.0, 16, 1000.0);
        let peak = g.iter().copied().fold(0f64, f64::max);
        assert!((peak - 1000.0).abs() < 1e-9);
        let t = triangle(6, 30.0);
        assert_eq!(t, vec![0.0, 15.0, 30.0, 30.0, 15.0, 0.0]);
    }
}
