// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Renesas RA ICU event link controller.
//!
//! Each IELSRn slot selects one peripheral event; a rising edge of that event
//! latches the slot's IR bit, which is also the slot's output. Inputs are
//! numbered by event, event 0 means "no event".

use std::sync::Mutex;

use tracing::{error, trace};

use crate::registers::{FieldMode, FieldDescriptor, HasRegisters, RegisterFile, RegisterMap};
use crate::signals::{GpioLine, GpioReceiver, NumberedGpioOutput, OutputBatch};
use crate::{lock_state, IntcError, Peripheral, SimResult};

pub const ICU_SIZE: u64 = 0x1000;
/// IELS is 9 bits wide.
pub const MAX_EVENT: usize = 0x1FF;

const IELSR_BASE: u64 = 0x300;
const IELS_BITS: u32 = 9;
const IR_BIT: u32 = 16;
const DTCE_BIT: u32 = 24;

/// How an IELS value turns into an event number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkMode {
    /// IELS is the event number.
    Direct,
    /// `table[n % table.len()][iels]` is the event number; out-of-table
    /// selectors and zero entries mean no event.
    Grouped(Vec<Vec<u16>>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcuConfig {
    pub slots: usize,
    pub mode: LinkMode,
}

impl Default for IcuConfig {
    fn default() -> Self {
        Self {
            slots: 32,
            mode: LinkMode::Direct,
        }
    }
}

impl IcuConfig {
    fn validate(&self) -> Result<(), IntcError> {
        let invalid = |reason: String| IntcError::InvalidConfiguration {
            controller: "icu",
            reason,
        };
        let max_slots = ((ICU_SIZE - IELSR_BASE) / 4) as usize;
        if self.slots == 0 || self.slots > max_slots {
            return Err(invalid(format!(
                "slot count {} must be in 1..={}",
                self.slots, max_slots
            )));
        }
        if let LinkMode::Grouped(table) = &self.mode {
            if table.is_empty() {
                return Err(invalid("grouped link mode needs at least one group".into()));
            }
            if let Some(&event) = table.iter().flatten().find(|&&e| e as usize > MAX_EVENT) {
                return Err(invalid(format!("event {:#x} in link table is out of range", event)));
            }
        }
        Ok(())
    }
}

fn ielsr(slot: usize) -> u64 {
    IELSR_BASE + slot as u64 * 4
}

#[derive(Debug)]
pub struct IcuState {
    events: Vec<bool>,
    mode: LinkMode,
    slots: usize,
    regs: RegisterFile,
}

impl HasRegisters for IcuState {
    fn registers(&self) -> &RegisterFile {
        &self.regs
    }
    fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.regs
    }
}

impl IcuState {
    /// Event selected by `slot` for a given IELS value.
    fn event_for(&self, slot: usize, iels: u32) -> Option<usize> {
        let event = match &self.mode {
            LinkMode::Direct => iels as usize,
            LinkMode::Grouped(table) => table[slot % table.len()]
                .get(iels as usize)
                .copied()
                .unwrap_or(0) as usize,
        };
        (event != 0).then_some(event)
    }

    fn selected_event(&self, slot: usize) -> Option<usize> {
        self.event_for(slot, self.regs.field(ielsr(slot), 0, IELS_BITS))
    }

    fn latch(&mut self, slot: usize) {
        trace!("ICU slot {} latched", slot);
        self.regs.set_flag(ielsr(slot), IR_BIT, true);
    }

    fn relink(&mut self, slot: usize, iels: u32) {
        match self.event_for(slot, iels) {
            None => self.regs.set_flag(ielsr(slot), IR_BIT, false),
            Some(event) if self.events[event] => self.latch(slot),
            Some(_) => {}
        }
    }

    fn set_event(&mut self, event: usize, value: bool) {
        let rising = value && !self.events[event];
        self.events[event] = value;
        if !rising {
            return;
        }
        for slot in 0..self.slots {
            if self.selected_event(slot) == Some(event) {
                self.latch(slot);
            }
        }
    }

    fn outputs(&self) -> OutputBatch {
        let mut batch = OutputBatch::default();
        for slot in 0..self.slots {
            batch.set(slot, self.regs.flag(ielsr(slot), IR_BIT));
        }
        batch
    }
}

type Field = FieldDescriptor<IcuState>;

fn build_register_map(config: &IcuConfig) -> Result<RegisterMap<IcuState>, IntcError> {
    let mut fields = Vec::with_capacity(config.slots * 3);
    for slot in 0..config.slots {
        let offset = ielsr(slot);
        fields.push(
            Field::new(format!("IELSR{}_IELS", slot), offset, 0, IELS_BITS, FieldMode::READ_WRITE)
                .on_change(move |st, _, new| st.relink(slot, new)),
        );
        fields.push(Field::flag(format!("IELSR{}_IR", slot), offset, IR_BIT, FieldMode::W0C));
        fields.push(Field::flag(
            format!("IELSR{}_DTCE", slot),
            offset,
            DTCE_BIT,
            FieldMode::READ_WRITE,
        ));
    }
    RegisterMap::new(fields)
}

#[derive(Debug)]
pub struct Icu {
    slots: usize,
    state: Mutex<IcuState>,
    registers: RegisterMap<IcuState>,
    outputs: Vec<GpioLine>,
}

impl Icu {
    pub fn new(config: IcuConfig) -> Result<Self, IntcError> {
        config.validate()?;
        let registers = build_register_map(&config)?;
        let mut state = IcuState {
            events: vec![false; MAX_EVENT + 1],
            mode: config.mode,
            slots: config.slots,
            regs: RegisterFile::default(),
        };
        registers.reset(&mut state);
        Ok(Self {
            slots: config.slots,
            state: Mutex::new(state),
            registers,
            outputs: GpioLine::bank(config.slots),
        })
    }

    fn update<R>(&self, f: impl FnOnce(&mut IcuState) -> R) -> R {
        let (result, batch) = {
            let mut state = lock_state(&self.state);
            let result = f(&mut state);
            (result, state.outputs())
        };
        batch.apply(&self.outputs);
        result
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Event currently feeding `slot`, if any.
    pub fn linked_event(&self, slot: usize) -> Option<usize> {
        if slot >= self.slots {
            return None;
        }
        lock_state(&self.state).selected_event(slot)
    }
}

impl Peripheral for Icu {
    fn read_u32(&self, offset: u64) -> SimResult<u32> {
        Ok(self.update(|st| self.registers.read(st, offset)))
    }

    fn write_u32(&self, offset: u64, value: u32) -> SimResult<()> {
        self.write_masked(offset, value, u32::MAX)
    }

    fn write_masked(&self, offset: u64, value: u32, lanes: u32) -> SimResult<()> {
        self.update(|st| self.registers.write_masked(st, offset, value, lanes));
        Ok(())
    }

    fn reset(&self) {
        self.update(|st| {
            self.registers.reset(st);
            st.events.iter_mut().for_each(|e| *e = false);
        });
    }

    fn size(&self) -> u64 {
        ICU_SIZE
    }
}

impl GpioReceiver for Icu {
    fn on_gpio(&self, number: usize, value: bool) {
        if number == 0 || number > MAX_EVENT {
            error!("ICU event {} is out of range [1; {}]", number, MAX_EVENT);
            return;
        }
        self.update(|st| st.set_event(number, value));
    }
}

impl NumberedGpioOutput for Icu {
    fn connections(&self) -> &[GpioLine] {
        &self.outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IR: u32 = 1 << IR_BIT;

    fn icu() -> Icu {
        Icu::new(IcuConfig::default()).unwrap()
    }

    #[test]
    fn test_event_latches_until_cleared() {
        let icu = icu();
        icu.write_u32(ielsr(3), 0x45).unwrap();
        icu.on_gpio(0x45, true);
        assert!(icu.connections()[3].is_set());

        icu.on_gpio(0x45, false);
        assert!(icu.connections()[3].is_set(), "IR is latched");

        icu.write_u32(ielsr(3), 0x45).unwrap();
        assert!(!icu.connections()[3].is_set(), "writing 0 to IR clears");
        assert_eq!(icu.read_u32(ielsr(3)).unwrap(), 0x45);
    }

    #[test]
    fn test_clear_while_event_high_needs_new_edge() {
        let icu = icu();
        icu.write_u32(ielsr(0), 7).unwrap();
        icu.on_gpio(7, true);
        icu.write_u32(ielsr(0), 7).unwrap();
        assert!(!icu.connections()[0].is_set());
        icu.on_gpio(7, true);
        assert!(!icu.connections()[0].is_set(), "no edge");
        icu.on_gpio(7, false);
        icu.on_gpio(7, true);
        assert!(icu.connections()[0].is_set());
    }

    #[test]
    fn test_relink_reevaluates_slot() {
        let icu = icu();
        icu.on_gpio(9, true);
        icu.write_u32(ielsr(1), 9).unwrap();
        assert!(icu.connections()[1].is_set(), "selected event already high");

        icu.write_u32(ielsr(1), IR).unwrap();
        assert!(!icu.connections()[1].is_set(), "unlinked slot drops IR");
        assert_eq!(icu.linked_event(1), None);
    }

    #[test]
    fn test_event_fans_out_to_every_linked_slot() {
        let icu = icu();
        icu.write_u32(ielsr(2), 0x10 | 1 << DTCE_BIT).unwrap();
        icu.write_u32(ielsr(5), 0x10).unwrap();
        icu.on_gpio(0x10, true);
        assert!(icu.connections()[2].is_set());
        assert!(icu.connections()[5].is_set());
        assert_eq!(icu.read_u32(ielsr(2)).unwrap(), 0x10 | IR | 1 << DTCE_BIT);
    }

    #[test]
    fn test_grouped_link_table() {
        let icu = Icu::new(IcuConfig {
            slots: 8,
            mode: LinkMode::Grouped(vec![vec![0, 0x20, 0x21], vec![0, 0x30]]),
        })
        .unwrap();
        icu.write_u32(ielsr(4), 2).unwrap();
        icu.write_u32(ielsr(5), 1).unwrap();
        assert_eq!(icu.linked_event(4), Some(0x21));
        assert_eq!(icu.linked_event(5), Some(0x30));

        icu.on_gpio(0x21, true);
        icu.on_gpio(0x30, true);
        assert!(icu.connections()[4].is_set());
        assert!(icu.connections()[5].is_set());

        icu.write_u32(ielsr(5), 2 | IR).unwrap();
        assert_eq!(icu.linked_event(5), None, "selector outside the group table");
        assert!(!icu.connections()[5].is_set());
    }

    #[test]
    fn test_reset_and_range() {
        let icu = icu();
        icu.on_gpio(0, true);
        icu.on_gpio(MAX_EVENT + 1, true);
        icu.write_u32(ielsr(0), 1).unwrap();
        icu.on_gpio(1, true);
        icu.reset();
        icu.reset();
        assert!(!icu.connections()[0].is_set());
        assert_eq!(icu.read_u32(ielsr(0)).unwrap(), 0);

        assert!(Icu::new(IcuConfig {
            slots: 0,
            mode: LinkMode::Direct
        })
        .is_err());
        assert!(Icu::new(IcuConfig {
            slots: 4,
            mode: LinkMode::Grouped(vec![])
        })
        .is_err());
    }
}
