// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{IntcError, Peripheral, SimResult, SimulationError};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct PeripheralEntry {
    pub name: String,
    pub base: u64,
    pub size: u64,
    pub dev: Arc<dyn Peripheral>,
}

impl PeripheralEntry {
    fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr - self.base < self.size
    }

    fn overlaps(&self, base: u64, size: u64) -> bool {
        base < self.base.saturating_add(self.size) && self.base < base.saturating_add(size)
    }
}

/// Address decoder in front of the controllers' register windows.
#[derive(Debug, Default)]
pub struct SystemBus {
    pub peripherals: Vec<PeripheralEntry>,
}

impl SystemBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `dev` at `base`, using `dev.size()` as the window length.
    pub fn add_peripheral(
        &mut self,
        name: &str,
        base: u64,
        dev: Arc<dyn Peripheral>,
    ) -> Result<(), IntcError> {
        let size = dev.size();
        if let Some(other) = self.peripherals.iter().find(|p| p.overlaps(base, size)) {
            return Err(IntcError::AddressOverlap {
                name: name.to_string(),
                base,
                other: other.name.clone(),
            });
        }
        tracing::debug!(
            "Mapped '{}' at {:#x}..{:#x}",
            name,
            base,
            base.saturating_add(size)
        );
        self.peripherals.push(PeripheralEntry {
            name: name.to_string(),
            base,
            size,
            dev,
        });
        Ok(())
    }

    pub fn peripheral(&self, name: &str) -> Option<&PeripheralEntry> {
        self.peripherals.iter().find(|p| p.name == name)
    }

    /// Finds the window holding `addr..addr + width` and returns it with the
    /// offset of `addr` inside it.
    fn decode(&self, addr: u64, width: u64) -> SimResult<(&PeripheralEntry, u64)> {
        let entry = self
            .peripherals
            .iter()
            .find(|p| p.contains(addr))
            .ok_or(SimulationError::MemoryViolation(addr))?;
        let offset = addr - entry.base;
        if offset + width > entry.size {
            tracing::warn!(
                "Access of {} bytes at {:#x} crosses the end of '{}'",
                width,
                addr,
                entry.name
            );
            return Err(SimulationError::MemoryViolation(addr));
        }
        Ok((entry, offset))
    }

    pub fn read_u8(&self, addr: u64) -> SimResult<u8> {
        let (p, offset) = self.decode(addr, 1)?;
        p.dev.read_u8(offset)
    }

    pub fn write_u8(&self, addr: u64, value: u8) -> SimResult<()> {
        let (p, offset) = self.decode(addr, 1)?;
        p.dev.write_u8(offset, value)
    }

    pub fn read_u16(&self, addr: u64) -> SimResult<u16> {
        let (p, offset) = self.decode(addr, 2)?;
        if offset % 4 == 3 {
            let b0 = p.dev.read_u8(offset)? as u16;
            let b1 = p.dev.read_u8(offset + 1)? as u16;
            return Ok(b0 | (b1 << 8));
        }
        p.dev.read_u16(offset)
    }

    pub fn write_u16(&self, addr: u64, value: u16) -> SimResult<()> {
        let (p, offset) = self.decode(addr, 2)?;
        if offset % 4 == 3 {
            p.dev.write_u8(offset, (value & 0xFF) as u8)?;
            return p.dev.write_u8(offset + 1, (value >> 8) as u8);
        }
        p.dev.write_u16(offset, value)
    }

    pub fn read_u32(&self, addr: u64) -> SimResult<u32> {
        let (p, offset) = self.decode(addr, 4)?;
        if offset % 4 != 0 {
            let b0 = p.dev.read_u8(offset)? as u32;
            let b1 = p.dev.read_u8(offset + 1)? as u32;
            let b2 = p.dev.read_u8(offset + 2)? as u32;
            let b3 = p.dev.read_u8(offset + 3)? as u32;
            return Ok(b0 | (b1 << 8) | (b2 << 16) | (b3 << 24));
        }
        p.dev.read_u32(offset)
    }

    pub fn write_u32(&self, addr: u64, value: u32) -> SimResult<()> {
        let (p, offset) = self.decode(addr, 4)?;
        if offset % 4 != 0 {
            for (i, byte) in value.to_le_bytes().into_iter().enumerate() {
                p.dev.write_u8(offset + i as u64, byte)?;
            }
            return Ok(());
        }
        p.dev.write_u32(offset, value)
    }

    pub fn reset_all(&self) {
        for p in &self.peripherals {
            tracing::trace!("Resetting '{}'", p.name);
            p.dev.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peripherals::intmux::{Intmux, IntmuxConfig, INTMUX_SIZE};
    use crate::peripherals::vic::{Vic, VIC_SIZE};

    fn bus() -> SystemBus {
        let mut bus = SystemBus::new();
        bus.add_peripheral("vic", 0x1000_0000, Arc::new(Vic::new().unwrap()))
            .unwrap();
        bus.add_peripheral(
            "intmux",
            0x2000_0000,
            Arc::new(Intmux::new(IntmuxConfig::default()).unwrap()),
        )
        .unwrap();
        bus
    }

    #[test]
    fn test_overlapping_windows_are_rejected() {
        let mut bus = bus();
        let err = bus
            .add_peripheral(
                "late",
                0x1000_0000 + VIC_SIZE - 4,
                Arc::new(Vic::new().unwrap()),
            )
            .unwrap_err();
        assert_eq!(
            err,
            IntcError::AddressOverlap {
                name: "late".into(),
                base: 0x1000_0000 + VIC_SIZE - 4,
                other: "vic".into(),
            }
        );
        assert!(bus
            .add_peripheral("adjacent", 0x1000_0000 + VIC_SIZE, Arc::new(Vic::new().unwrap()))
            .is_ok());
    }

    #[test]
    fn test_accesses_reach_the_right_window() {
        let bus = bus();
        bus.write_u32(0x2000_0010, 0b101).unwrap();
        assert_eq!(bus.read_u32(0x2000_0010).unwrap(), 0b101);
        assert_eq!(bus.read_u8(0x2000_0010).unwrap(), 0b101);
        assert_eq!(bus.read_u16(0x2000_0012).unwrap(), 0);

        bus.write_u8(0x2000_0011, 0xAB).unwrap();
        assert_eq!(bus.read_u32(0x2000_0010).unwrap(), 0xAB05);
        assert_eq!(bus.peripheral("intmux").unwrap().size, INTMUX_SIZE);
    }

    #[test]
    fn test_unmapped_and_window_crossing_accesses_fault() {
        let bus = bus();
        assert_eq!(
            bus.read_u32(0x3000_0000),
            Err(SimulationError::MemoryViolation(0x3000_0000))
        );
        let last = 0x2000_0000 + INTMUX_SIZE - 2;
        assert_eq!(
            bus.read_u32(last),
            Err(SimulationError::MemoryViolation(last))
        );
        assert!(bus.read_u16(last).is_ok());
        assert!(bus.write_u8(0x1000_0000 + VIC_SIZE, 1).is_err());
    }

    #[test]
    fn test_reset_all() {
        let bus = bus();
        bus.write_u32(0x2000_0010, 0xFF).unwrap();
        bus.reset_all();
        bus.reset_all();
        assert_eq!(bus.read_u32(0x2000_0010).unwrap(), 0);
    }
}
