// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! NXP S32K3 MSCM: routes shared interrupt sources to cores and carries the
//! inter-processor interrupt bank.
//!
//! Routing and IPI registers live in two independent blocks, each behind its
//! own lock.

use std::sync::Mutex;

use tracing::{debug, error, trace, warn};

use crate::registers::{FieldMode, FieldDescriptor, HasRegisters, RegisterFile, RegisterMap};
use crate::signals::{GpioLine, GpioReceiver, NumberedGpioOutput, OutputBatch};
use crate::{lock_state, IntcError, Peripheral, SimResult};

pub const MSCM_SIZE: u64 = 0x1000;
pub const IPI_PER_CPU: usize = 4;
pub const MAX_CORES: usize = 4;

const CPXNUM: u64 = 0x4;
const IPI_BASE: u64 = 0x200;
const IPI_STRIDE: u64 = 0x8;
const IGR_OFFSET: u64 = 0x4;
const ROUTING_BASE: u64 = 0x880;
const ROUTE_BITS: u32 = 2;
const SOURCES_PER_WORD: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MscmConfig {
    pub sources: usize,
    pub cores: usize,
}

impl Default for MscmConfig {
    fn default() -> Self {
        Self {
            sources: 240,
            cores: 4,
        }
    }
}

impl MscmConfig {
    fn routing_words(&self) -> usize {
        self.sources.div_ceil(SOURCES_PER_WORD)
    }

    fn validate(&self) -> Result<(), IntcError> {
        let invalid = |reason: String| IntcError::InvalidConfiguration {
            controller: "mscm",
            reason,
        };
        if self.cores == 0 || self.cores > MAX_CORES {
            return Err(invalid(format!(
                "core count {} must be in 1..={}",
                self.cores, MAX_CORES
            )));
        }
        if self.sources == 0 {
            return Err(invalid("at least one source is required".into()));
        }
        if ROUTING_BASE + self.routing_words() as u64 * 4 > MSCM_SIZE {
            return Err(invalid(format!(
                "{} sources do not fit the routing region",
                self.sources
            )));
        }
        Ok(())
    }

    /// First connection index of the IPI bank.
    pub fn ipi_base(&self) -> usize {
        self.sources * self.cores
    }
}

fn route_offset(source: usize) -> (u64, u32) {
    let word = (source / SOURCES_PER_WORD) as u64;
    let position = (source % SOURCES_PER_WORD) as u32 * ROUTE_BITS;
    (ROUTING_BASE + word * 4, position)
}

fn isr_offset(cpu: usize, id: usize) -> u64 {
    IPI_BASE + (cpu * IPI_PER_CPU + id) as u64 * IPI_STRIDE
}

#[derive(Debug)]
pub struct RoutingState {
    levels: Vec<bool>,
    cores: usize,
    regs: RegisterFile,
}

impl HasRegisters for RoutingState {
    fn registers(&self) -> &RegisterFile {
        &self.regs
    }
    fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.regs
    }
}

impl RoutingState {
    fn route(&self, source: usize) -> usize {
        let (offset, position) = route_offset(source);
        self.regs.field(offset, position, ROUTE_BITS) as usize
    }

    fn outputs(&self) -> OutputBatch {
        let sources = self.levels.len();
        let mut batch = OutputBatch::default();
        for (source, &level) in self.levels.iter().enumerate() {
            let route = self.route(source);
            for core in 0..self.cores {
                batch.set(core * sources + source, level && route == core);
            }
        }
        batch
    }
}

#[derive(Debug)]
pub struct IpiState {
    cores: usize,
    initiator: usize,
    regs: RegisterFile,
}

impl HasRegisters for IpiState {
    fn registers(&self) -> &RegisterFile {
        &self.regs
    }
    fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.regs
    }
}

impl IpiState {
    fn raise(&mut self, from: usize, cpu: usize, id: usize) {
        trace!("IPI {} raised on CPU {} by CPU {}", id, cpu, from);
        let offset = isr_offset(cpu, id);
        let value = self.regs.get(offset) | (1 << from);
        self.regs.set(offset, value);
    }

    fn outputs(&self) -> OutputBatch {
        let mut batch = OutputBatch::default();
        for cpu in 0..self.cores {
            for id in 0..IPI_PER_CPU {
                batch.set(cpu * IPI_PER_CPU + id, self.regs.get(isr_offset(cpu, id)) != 0);
            }
        }
        batch
    }
}

fn build_routing_map(config: &MscmConfig) -> Result<RegisterMap<RoutingState>, IntcError> {
    let cores = config.cores;
    let fields: Vec<FieldDescriptor<RoutingState>> = (0..config.sources)
        .map(|source| {
            let (offset, position) = route_offset(source);
            FieldDescriptor::new(
                format!("IRQ{}_ROUTE", source),
                offset,
                position,
                ROUTE_BITS,
                FieldMode::READ_WRITE,
            )
            .on_change(move |_: &mut RoutingState, old, new| {
                if new as usize >= cores {
                    warn!(
                        "Source {} routed to non-existing core {}, dropping it",
                        source, new
                    );
                } else {
                    trace!("Source {} moved from core {} to core {}", source, old, new);
                }
            })
        })
        .collect();
    RegisterMap::new(fields)
}

fn build_ipi_map(config: &MscmConfig) -> Result<RegisterMap<IpiState>, IntcError> {
    let mut fields = vec![FieldDescriptor::word("CPXNUM", CPXNUM, FieldMode::READ)
        .on_read(|st: &mut IpiState, _| st.initiator as u32)];
    for cpu in 0..config.cores {
        for id in 0..IPI_PER_CPU {
            let isr = isr_offset(cpu, id);
            fields.push(FieldDescriptor::new(
                format!("IPI{}_{}_ISR", cpu, id),
                isr,
                0,
                config.cores as u32,
                FieldMode::W1C,
            ));
            fields.push(
                FieldDescriptor::flag(
                    format!("IPI{}_{}_IGR", cpu, id),
                    isr + IGR_OFFSET,
                    0,
                    FieldMode::WRITE,
                )
                .on_write(move |st: &mut IpiState, _, written| {
                    if written != 0 {
                        let from = st.initiator;
                        st.raise(from, cpu, id);
                    }
                }),
            );
        }
    }
    RegisterMap::new(fields)
}

#[derive(Debug)]
pub struct Mscm {
    config: MscmConfig,
    routing: Mutex<RoutingState>,
    routing_registers: RegisterMap<RoutingState>,
    ipi: Mutex<IpiState>,
    ipi_registers: RegisterMap<IpiState>,
    outputs: Vec<GpioLine>,
}

impl Mscm {
    pub fn new(config: MscmConfig) -> Result<Self, IntcError> {
        config.validate()?;
        let routing_registers = build_routing_map(&config)?;
        let ipi_registers = build_ipi_map(&config)?;

        let mut routing = RoutingState {
            levels: vec![false; config.sources],
            cores: config.cores,
            regs: RegisterFile::default(),
        };
        routing_registers.reset(&mut routing);
        let mut ipi = IpiState {
            cores: config.cores,
            initiator: 0,
            regs: RegisterFile::default(),
        };
        ipi_registers.reset(&mut ipi);

        Ok(Self {
            config,
            routing: Mutex::new(routing),
            routing_registers,
            ipi: Mutex::new(ipi),
            ipi_registers,
            outputs: GpioLine::bank(config.ipi_base() + config.cores * IPI_PER_CPU),
        })
    }

    fn update_routing<R>(&self, f: impl FnOnce(&mut RoutingState) -> R) -> R {
        let (result, batch) = {
            let mut state = lock_state(&self.routing);
            let result = f(&mut state);
            (result, state.outputs())
        };
        batch.apply(&self.outputs[..self.config.ipi_base()]);
        result
    }

    fn update_ipi<R>(&self, f: impl FnOnce(&mut IpiState) -> R) -> R {
        let (result, batch) = {
            let mut state = lock_state(&self.ipi);
            let result = f(&mut state);
            (result, state.outputs())
        };
        batch.apply(&self.outputs[self.config.ipi_base()..]);
        result
    }

    pub fn config(&self) -> &MscmConfig {
        &self.config
    }

    /// Selects the CPU that register-driven IPIs and CPXNUM are attributed to.
    pub fn set_bus_initiator(&self, cpu: usize) {
        if cpu >= self.config.cores {
            warn!("CPU {} is not served by this MSCM", cpu);
            return;
        }
        lock_state(&self.ipi).initiator = cpu;
    }

    pub fn route(&self, source: usize) -> Option<usize> {
        (source < self.config.sources).then(|| lock_state(&self.routing).route(source))
    }

    pub fn set_route(&self, source: usize, core: usize) -> Result<(), IntcError> {
        if source >= self.config.sources {
            return Err(IntcError::SourceOutOfRange {
                controller: "mscm",
                number: source,
                first: 0,
                last: self.config.sources - 1,
            });
        }
        if core >= self.config.cores {
            return Err(IntcError::InvalidConfiguration {
                controller: "mscm",
                reason: format!("core {} does not exist", core),
            });
        }
        let (offset, position) = route_offset(source);
        self.update_routing(|st| {
            let mut value = st.regs.get(offset);
            value &= !(0b11 << position);
            value |= (core as u32) << position;
            self.routing_registers.write(st, offset, value);
        });
        Ok(())
    }

    /// Raises IPI `id` on `cpu`, attributed to CPU `from`.
    pub fn raise_ipi(&self, from: usize, cpu: usize, id: usize) -> Result<(), IntcError> {
        let cores = self.config.cores;
        if from >= cores || cpu >= cores || id >= IPI_PER_CPU {
            return Err(IntcError::SourceOutOfRange {
                controller: "mscm",
                number: self.config.ipi_base() + cpu * IPI_PER_CPU + id,
                first: self.config.ipi_base(),
                last: self.config.ipi_base() + cores * IPI_PER_CPU - 1,
            });
        }
        self.update_ipi(|st| st.raise(from, cpu, id));
        Ok(())
    }

    /// Originating-CPU bits currently latched for `(cpu, id)`.
    pub fn ipi_pending(&self, cpu: usize, id: usize) -> u32 {
        if cpu >= self.config.cores || id >= IPI_PER_CPU {
            return 0;
        }
        lock_state(&self.ipi).regs.get(isr_offset(cpu, id))
    }

    fn is_routing(&self, offset: u64) -> bool {
        (ROUTING_BASE..ROUTING_BASE + self.config.routing_words() as u64 * 4).contains(&offset)
    }
}

impl Peripheral for Mscm {
    fn read_u32(&self, offset: u64) -> SimResult<u32> {
        if self.is_routing(offset) {
            Ok(self.update_routing(|st| self.routing_registers.read(st, offset)))
        } else if self.ipi_registers.is_defined(offset) {
            Ok(self.update_ipi(|st| self.ipi_registers.read(st, offset)))
        } else {
            debug!("Unhandled MSCM read at {:#x}", offset);
            Ok(0)
        }
    }

    fn write_u32(&self, offset: u64, value: u32) -> SimResult<()> {
        self.write_masked(offset, value, u32::MAX)
    }

    fn write_masked(&self, offset: u64, value: u32, lanes: u32) -> SimResult<()> {
        if self.is_routing(offset) {
            self.update_routing(|st| {
                self.routing_registers
                    .write_masked(st, offset, value, lanes)
            });
        } else if self.ipi_registers.is_defined(offset) {
            self.update_ipi(|st| self.ipi_registers.write_masked(st, offset, value, lanes));
        } else {
            debug!("Unhandled MSCM write at {:#x}: {:#x}", offset, value);
        }
        Ok(())
    }

    fn reset(&self) {
        self.update_routing(|st| {
            self.routing_registers.reset(st);
            st.levels.iter_mut().for_each(|l| *l = false);
        });
        self.update_ipi(|st| {
            self.ipi_registers.reset(st);
            st.initiator = 0;
        });
    }

    fn size(&self) -> u64 {
        MSCM_SIZE
    }
}

impl GpioReceiver for Mscm {
    fn on_gpio(&self, number: usize, value: bool) {
        if number >= self.config.sources {
            error!(
                "MSCM source {} is out of range [0; {})",
                number, self.config.sources
            );
            return;
        }
        self.update_routing(|st| st.levels[number] = value);
    }
}

impl NumberedGpioOutput for Mscm {
    fn connections(&self) -> &[GpioLine] {
        &self.outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mscm() -> Mscm {
        Mscm::new(MscmConfig {
            sources: 40,
            cores: 2,
        })
        .unwrap()
    }

    #[test]
    fn test_source_follows_route() {
        let m = mscm();
        m.on_gpio(5, true);
        assert!(m.connections()[5].is_set(), "core 0 by default");

        m.set_route(5, 1).unwrap();
        assert!(!m.connections()[5].is_set());
        assert!(m.connections()[40 + 5].is_set());
        assert_eq!(m.route(5), Some(1));

        m.on_gpio(5, false);
        assert!(!m.connections()[40 + 5].is_set());
    }

    #[test]
    fn test_routing_register_layout() {
        let m = mscm();
        m.on_gpio(17, true);
        // Source 17 is the second 2-bit field of the second word.
        m.write_u32(ROUTING_BASE + 4, 1 << 2).unwrap();
        assert!(m.connections()[40 + 17].is_set());
        assert_eq!(m.read_u32(ROUTING_BASE + 4).unwrap(), 1 << 2);
        assert_eq!(m.route(16), Some(0));
    }

    #[test]
    fn test_route_to_missing_core_drops() {
        let m = mscm();
        m.on_gpio(0, true);
        m.write_u32(ROUTING_BASE, 3).unwrap();
        assert!(m.connections()[..80].iter().all(|l| !l.is_set()));
        assert!(m.set_route(0, 2).is_err());
        assert!(m.set_route(40, 0).is_err());
    }

    #[test]
    fn test_ipi_register_flow() {
        let m = mscm();
        let base = m.config().ipi_base();
        m.set_bus_initiator(1);
        assert_eq!(m.read_u32(CPXNUM).unwrap(), 1);

        // CPU 1 pokes IPI 2 of CPU 0.
        m.write_u32(isr_offset(0, 2) + IGR_OFFSET, 1).unwrap();
        assert!(m.connections()[base + 2].is_set());
        assert_eq!(m.read_u32(isr_offset(0, 2)).unwrap(), 0b10);

        m.raise_ipi(0, 0, 2).unwrap();
        assert_eq!(m.ipi_pending(0, 2), 0b11);

        m.write_u32(isr_offset(0, 2), 0b10).unwrap();
        assert!(m.connections()[base + 2].is_set(), "CPU 0 bit still latched");
        m.write_u32(isr_offset(0, 2), 0b01).unwrap();
        assert!(!m.connections()[base + 2].is_set());
    }

    #[test]
    fn test_ipi_range_and_initiator_checks() {
        let m = mscm();
        assert!(m.raise_ipi(0, 2, 0).is_err());
        assert!(m.raise_ipi(0, 0, IPI_PER_CPU).is_err());
        m.set_bus_initiator(3);
        assert_eq!(m.read_u32(CPXNUM).unwrap(), 0);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let m = mscm();
        m.on_gpio(3, true);
        m.set_route(3, 1).unwrap();
        m.raise_ipi(1, 1, 0).unwrap();
        m.reset();
        m.reset();
        assert!(m.connections().iter().all(|l| !l.is_set()));
        assert_eq!(m.route(3), Some(0));
        assert_eq!(m.ipi_pending(1, 0), 0);
    }

    #[test]
    fn test_config_validation() {
        assert!(Mscm::new(MscmConfig {
            sources: 10,
            cores: 5
        })
        .is_err());
        assert!(Mscm::new(MscmConfig::default()).is_ok());
    }
}
