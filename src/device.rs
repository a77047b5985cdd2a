//! Hand-off to the hardware: register-mapped program memory and bulk DMA.

use std::collections::BTreeMap;

use anyhow::Context;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{RangeError, TransferError};
use crate::wave::DmaWord;

/// Memory-mapped register access. Implementations talk to real hardware or
/// stand in for it in tests.
pub trait RegisterIo {
    fn write(&mut self, offset: u32, value: u32) -> anyhow::Result<()>;
    fn read(&mut self, offset: u32) -> anyhow::Result<u32>;
}

/// Bulk transfer channel. Returns how many bytes actually moved.
pub trait Transport {
    fn transfer(&mut self, buf: &[u8]) -> anyhow::Result<usize>;
}

/// Register space backed by a map; unwritten offsets read as zero.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemRegisters {
    pub regs: BTreeMap<u32, u32>,
}

impl MemRegisters {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RegisterIo for MemRegisters {
    fn write(&mut self, offset: u32, value: u32) -> anyhow::Result<()> {
        self.regs.insert(offset, value);
        Ok(())
    }

    fn read(&mut self, offset: u32) -> anyhow::Result<u32> {
        Ok(self.regs.get(&offset).copied().unwrap_or(0))
    }
}

/// Write a program image into program memory, low half of each word first.
pub fn load_program<R: RegisterIo>(io: &mut R, words: &[u64]) -> anyhow::Result<()> {
    for (i, w) in words.iter().enumerate() {
        let at = u32::try_from(8 * i).context("program does not fit the register window")?;
        io.write(at, *w as u32).with_context(|| format!("writing word {i} (low)"))?;
        io.write(at + 4, (w >> 32) as u32).with_context(|| format!("writing word {i} (high)"))?;
    }
    info!(words = words.len(), "loaded program memory");
    Ok(())
}

/// Push `bytes` through `t`. A short or long transfer is an error.
pub fn send<T: Transport>(t: &mut T, what: &str, bytes: &[u8]) -> anyhow::Result<()> {
    let transferred = t.transfer(bytes).with_context(|| format!("transferring {what}"))?;
    if transferred != bytes.len() {
        return Err(crate::Error::from(TransferError {
            what: what.to_string(),
            requested: bytes.len(),
            transferred,
        })
        .into());
    }
    debug!(what, bytes = transferred, "transfer complete");
    Ok(())
}

pub fn load_waves<T: Transport>(t: &mut T, rows: &[DmaWord]) -> anyhow::Result<()> {
    let bytes: Vec<u8> = rows.iter().flatten().copied().collect();
    send(t, "wave table", &bytes)
}

/// Send a packed envelope image. The DMA engine moves sample pairs, so the
/// sample count must be even.
pub fn load_envelope<T: Transport>(t: &mut T, ch: usize, image: &[u32]) -> anyhow::Result<()> {
    if image.len() % 2 != 0 {
        return Err(crate::Error::from(RangeError::new(
            format!("g{ch} envelope samples"),
            image.len() as u64,
            "even transfer length",
        ))
        .into());
    }
    let bytes: Vec<u8> = image.iter().flat_map(|s| s.to_le_bytes()).collect();
    send(t, &format!("g{ch} envelope"), &bytes)
}
