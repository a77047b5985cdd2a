//! Wave-memory records.
//!
//! A wave is six little-endian fields (21 bytes). The wave memory sees them
//! with one zero byte after byte 11 (22 bytes), and DMA moves them as 32-byte
//! words, so each record is right-padded with zeros.

use std::collections::HashMap;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{RangeError, Result, ValidationError};

pub const FIELD_WIDTHS: [usize; 6] = [4, 4, 3, 4, 4, 2];
pub const RAW_BYTES: usize = 21;
pub const RECORD_BYTES: usize = 22;
pub const DMA_WORD_BYTES: usize = 32;
const GAP_OFFSET: usize = 11;
const ENV_LIMIT: u32 = 1 << 24;

pub type DmaWord = [u8; DMA_WORD_BYTES];

/// Output source of the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutSel {
    /// Envelope table times DDS.
    #[default]
    Product,
    /// DDS only (carrier).
    Dds,
    /// Envelope table straight through.
    Input,
    Zero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Oneshot,
    Periodic,
}

/// What the generator holds after a pulse ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StdySel {
    Last,
    #[default]
    Zero,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ConfFlags: u16 {
        const PERIODIC = 0b0_0100;
        const STDY_ZERO = 0b0_1000;
        const PHRST = 0b1_0000;
    }
}

/// Pack the generator config word. Unset flags take the hardware defaults.
pub fn cfg2reg(outsel: Option<OutSel>, mode: Option<RunMode>, stdysel: Option<StdySel>, phrst: Option<bool>) -> u16 {
    let outsel = match outsel.unwrap_or_default() {
        OutSel::Product => 0,
        OutSel::Dds => 1,
        OutSel::Input => 2,
        OutSel::Zero => 3,
    };
    let mut flags = ConfFlags::empty();
    flags.set(ConfFlags::PERIODIC, mode.unwrap_or_default() == RunMode::Periodic);
    flags.set(ConfFlags::STDY_ZERO, stdysel.unwrap_or_default() == StdySel::Zero);
    flags.set(ConfFlags::PHRST, phrst.unwrap_or(false));
    flags.bits() | outsel
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wave {
    pub freq: u32,
    pub phase: u32,
    /// Envelope address in clocks (24 bits).
    pub env: u32,
    pub gain: i32,
    pub length: u32,
    pub conf: u16,
}

impl Wave {
    pub fn raw_bytes(&self) -> Result<[u8; RAW_BYTES]> {
        if self.env >= ENV_LIMIT {
            return Err(RangeError::new("wave.env", self.env, "24-bit envelope address").into());
        }
        let mut out = [0u8; RAW_BYTES];
        let fields: [&[u8]; 6] = [
            &self.freq.to_le_bytes(),
            &self.phase.to_le_bytes(),
            &self.env.to_le_bytes()[..3],
            &self.gain.to_le_bytes(),
            &self.length.to_le_bytes(),
            &self.conf.to_le_bytes(),
        ];
        let mut at = 0;
        for (bytes, width) in fields.iter().zip(FIELD_WIDTHS) {
            out[at..at + width].copy_from_slice(bytes);
            at += width;
        }
        Ok(out)
    }

    /// The record as wave memory stores it.
    pub fn record(&self) -> Result<[u8; RECORD_BYTES]> {
        let raw = self.raw_bytes()?;
        let mut out = [0u8; RECORD_BYTES];
        out[..GAP_OFFSET].copy_from_slice(&raw[..GAP_OFFSET]);
        out[GAP_OFFSET + 1..].copy_from_slice(&raw[GAP_OFFSET..]);
        Ok(out)
    }

    pub fn to_dma_word(&self) -> Result<DmaWord> {
        let mut out = [0u8; DMA_WORD_BYTES];
        out[..RECORD_BYTES].copy_from_slice(&self.record()?);
        Ok(out)
    }
}

/// Serialize waves in insertion order. No waves gives zero rows, not an error.
pub fn serialize_table<'a>(waves: impl IntoIterator<Item = &'a Wave>) -> Result<Vec<DmaWord>> {
    waves.into_iter().map(Wave::to_dma_word).collect()
}

/// Append-only wave table. A wave's index is its DMA table offset.
#[derive(Debug, Clone, Default)]
pub struct WaveTable {
    waves: Vec<(String, Wave)>,
    index: HashMap<String, usize>,
}

impl WaveTable {
    pub fn add(&mut self, name: impl Into<String>, wave: Wave) -> Result<usize> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(ValidationError::DuplicateName { kind: "wave", ch: 0, name }.into());
        }
        let idx = self.waves.len();
        self.index.insert(name.clone(), idx);
        self.waves.push((name, wave));
        Ok(idx)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn get(&self, idx: usize) -> Option<&Wave> {
        self.waves.get(idx).map(|(_, w)| w)
    }

    pub fn len(&self) -> usize {
        self.waves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Wave)> {
        self.waves.iter().map(|(n, w)| (n.as_str(), w))
    }

    pub fn compile(&self) -> Result<Vec<DmaWord>> {
        serialize_table(self.waves.iter().map(|(_, w)| w))
    }
}
