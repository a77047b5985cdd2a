//! Page-scoped register allocation.

use std::collections::BTreeMap;

use bitvec::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RangeError, Result, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegKind {
    Freq,
    Time,
    Phase,
    Addr,
    Gain,
    #[default]
    Generic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Register {
    pub page: u8,
    pub addr: u8,
    pub kind: RegKind,
    pub init: Option<i64>,
    pub name: String,
    /// Generator channel the register belongs to, if any.
    pub owner: Option<usize>,
}

/// What to allocate. Unset address means "lowest free in the page".
#[derive(Debug, Clone, Default)]
pub struct RegRequest {
    pub page: u8,
    pub addr: Option<u8>,
    pub name: Option<String>,
    pub kind: RegKind,
    pub owner: Option<usize>,
    pub init: Option<i64>,
}

type PageBits = BitArr!(for 32, in u32, Lsb0);

#[derive(Debug, Clone)]
pub struct RegisterFile {
    regs_per_page: u8,
    used: Vec<PageBits>,
    by_name: BTreeMap<String, Register>,
}

impl RegisterFile {
    pub fn new(pages: u8, regs_per_page: u8) -> Self {
        Self {
            regs_per_page: regs_per_page.min(32),
            used: vec![PageBits::ZERO; usize::from(pages)],
            by_name: BTreeMap::new(),
        }
    }

    pub fn allocate(&mut self, req: RegRequest) -> Result<Register> {
        let pages = self.used.len();
        let n = usize::from(self.regs_per_page);
        let bits = self
            .used
            .get_mut(usize::from(req.page))
            .ok_or_else(|| RangeError::new("register page", req.page, format!("[0, {pages})")))?;

        let addr = match req.addr {
            Some(a) => {
                if usize::from(a) >= n {
                    return Err(RangeError::new("register address", a, format!("[0, {n})")).into());
                }
                if bits[usize::from(a)] {
                    return Err(ValidationError::RegisterTaken { page: req.page, addr: a }.into());
                }
                a
            }
            None => {
                let free = bits[..n].first_zero().ok_or_else(|| {
                    RangeError::new(format!("page {} registers", req.page), n as u64, "all registers in use")
                })?;
                free as u8
            }
        };

        let name = req.name.unwrap_or_else(|| format!("reg_p{}_{}", req.page, addr));
        if self.by_name.contains_key(&name) {
            return Err(ValidationError::DuplicateRegister(name).into());
        }

        bits.set(usize::from(addr), true);
        let reg = Register { page: req.page, addr, kind: req.kind, init: req.init, name: name.clone(), owner: req.owner };
        debug!(name = %reg.name, page = reg.page, addr = reg.addr, "allocated register");
        self.by_name.insert(name, reg.clone());
        Ok(reg)
    }

    pub fn get(&self, name: &str) -> Option<&Register> {
        self.by_name.get(name)
    }

    pub fn is_used(&self, page: u8, addr: u8) -> bool {
        self.used
            .get(usize::from(page))
            .and_then(|bits| bits.get(usize::from(addr)).map(|b| *b))
            .unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Register> {
        self.by_name.values()
    }
}

/// The per-generator pulse registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialRegs {
    pub page: u8,
    pub freq: u8,
    pub phase: u8,
    pub addr: u8,
    pub gain: u8,
    pub mode: u8,
    pub t: u8,
}

impl SpecialRegs {
    /// Two generators share a page; the odd one uses the upper block.
    pub fn for_gen(ch: usize) -> Self {
        let base = if ch % 2 == 0 { 16 } else { 23 };
        Self {
            page: (ch / 2) as u8,
            freq: base,
            phase: base + 1,
            addr: base + 2,
            gain: base + 3,
            mode: base + 4,
            t: base + 5,
        }
    }

    pub fn named(&self) -> [(&'static str, u8, RegKind); 6] {
        [
            ("freq", self.freq, RegKind::Freq),
            ("phase", self.phase, RegKind::Phase),
            ("addr", self.addr, RegKind::Addr),
            ("gain", self.gain, RegKind::Gain),
            ("mode", self.mode, RegKind::Generic),
            ("t", self.t, RegKind::Time),
        ]
    }
}

pub const TRIG_PAGE: u8 = 0;
pub const TRIG_TIME_REG: u8 = 30;
pub const TRIG_OUT_REG: u8 = 31;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowest_free_address_is_used() {
        let mut rf = RegisterFile::new(2, 4);
        rf.allocate(RegRequest { page: 1, addr: Some(0), ..Default::default() }).unwrap();
        let r = rf.allocate(RegRequest { page: 1, ..Default::default() }).unwrap();
        assert_eq!(r.addr, 1);
        assert_eq!(r.name, "reg_p1_1");
        // other pages are independent
        let r0 = rf.allocate(RegRequest { page: 0, ..Default::default() }).unwrap();
        assert_eq!(r0.addr, 0);
    }

    #[test]
    fn full_page_is_a_range_error() {
        let mut rf = RegisterFile::new(1, 2);
        rf.allocate(RegRequest::default()).unwrap();
        rf.allocate(RegRequest::default()).unwrap();
        assert!(matches!(rf.allocate(RegRequest::default()), Err(crate::Error::Range(_))));
    }

    #[test]
    fn special_registers_by_parity() {
        let even = SpecialRegs::for_gen(4);
        assert_eq!((even.page, even.freq, even.t), (2, 16, 21));
        let odd = SpecialRegs::for_gen(5);
        assert_eq!((odd.page, odd.freq, odd.t), (2, 23, 28));
    }
}
