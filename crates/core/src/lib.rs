// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod bus;
pub mod interrupt;
pub mod peripherals;
pub mod registers;
pub mod signals;
pub mod system;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use signals::{GpioLine, GpioReceiver, NumberedGpioOutput};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SimulationError {
    #[error("Memory access violation at {0:#x}")]
    MemoryViolation(u64),
}

pub type SimResult<T> = Result<T, SimulationError>;

/// Errors raised while building or driving interrupt controllers.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IntcError {
    #[error("invalid {controller} configuration: {reason}")]
    InvalidConfiguration {
        controller: &'static str,
        reason: String,
    },
    #[error("register layout error at offset {offset:#x}: {reason}")]
    RegisterLayout { offset: u64, reason: String },
    #[error("{controller}: input {number} is out of range [{first}, {last}]")]
    SourceOutOfRange {
        controller: &'static str,
        number: usize,
        first: usize,
        last: usize,
    },
    #[error("peripheral '{name}' at {base:#x} overlaps '{other}'")]
    AddressOverlap {
        name: String,
        base: u64,
        other: String,
    },
    #[error("unknown controller '{0}'")]
    UnknownController(String),
    #[error("controller '{id}' has no output {output}")]
    UnknownOutput { id: String, output: usize },
}

/// A memory-mapped peripheral accessed at double-word granularity.
///
/// Byte and word accesses are translated into double-word accesses on the
/// containing aligned register; writes are read-modify-write, so read side
/// effects of the register apply to narrow writes as well.
pub trait Peripheral: std::fmt::Debug + Send + Sync {
    fn read_u32(&self, offset: u64) -> SimResult<u32>;
    fn write_u32(&self, offset: u64, value: u32) -> SimResult<()>;

    /// Restores power-on state. Must be idempotent.
    fn reset(&self);

    /// Address-space footprint in bytes.
    fn size(&self) -> u64;

    fn read_u8(&self, offset: u64) -> SimResult<u8> {
        let shift = (offset % 4) * 8;
        let reg = self.read_u32(offset & !3)?;
        Ok(((reg >> shift) & 0xFF) as u8)
    }

    fn read_u16(&self, offset: u64) -> SimResult<u16> {
        let shift = (offset % 4) * 8;
        let reg = self.read_u32(offset & !3)?;
        Ok(((reg >> shift) & 0xFFFF) as u16)
    }

    /// Writes the bits of `value` selected by `lanes` into the register at
    /// `offset`. Controllers with a register map override this so that
    /// unselected bytes see no write at all; the fallback merges with the
    /// current value.
    fn write_masked(&self, offset: u64, value: u32, lanes: u32) -> SimResult<()> {
        let reg = self.read_u32(offset)?;
        self.write_u32(offset, (reg & !lanes) | (value & lanes))
    }

    fn write_u8(&self, offset: u64, value: u8) -> SimResult<()> {
        let shift = (offset % 4) * 8;
        self.write_masked(offset & !3, (value as u32) << shift, 0xFF << shift)
    }

    fn write_u16(&self, offset: u64, value: u16) -> SimResult<()> {
        let shift = (offset % 4) * 8;
        self.write_masked(offset & !3, (value as u32) << shift, 0xFFFF << shift)
    }
}

/// Everything the platform builder needs from a controller: a register
/// window, numbered inputs and numbered outputs.
pub trait InterruptPeripheral: Peripheral + GpioReceiver + NumberedGpioOutput {
    fn into_receiver(self: Arc<Self>) -> Arc<dyn GpioReceiver>;
    fn into_peripheral(self: Arc<Self>) -> Arc<dyn Peripheral>;
}

impl<T> InterruptPeripheral for T
where
    T: Peripheral + GpioReceiver + NumberedGpioOutput + 'static,
{
    fn into_receiver(self: Arc<Self>) -> Arc<dyn GpioReceiver> {
        self
    }

    fn into_peripheral(self: Arc<Self>) -> Arc<dyn Peripheral> {
        self
    }
}

/// Locks a controller's state, recovering the guard if another thread
/// panicked while holding it.
pub(crate) fn lock_state<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
