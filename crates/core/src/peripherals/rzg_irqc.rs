// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Renesas RZ/G2L IRQC.
//!
//! Inputs: 0 is NMI, 1..=8 are the IRQ0..7 pins and 9..=131 are GPIOs
//! 0..122. Outputs: 0..=31 are TINT slots, 32..=39 IRQ0..7 and 40 NMI.
//!
//! Edge-triggered TINT and IRQ outputs are pulsed, level-triggered ones
//! follow the input. NMI stays asserted until NSTAT is cleared.

use std::sync::Mutex;

use tracing::{debug, error, trace};

use crate::peripherals::gpio_interrupt::InterruptTrigger;
use crate::registers::{FieldMode, FieldDescriptor, HasRegisters, RegisterFile, RegisterMap};
use crate::signals::{GpioLine, GpioReceiver, NumberedGpioOutput, OutputBatch};
use crate::{lock_state, IntcError, Peripheral, SimResult};

pub const RZG_IRQC_SIZE: u64 = 0x100;

pub const IRQ_PINS: usize = 8;
pub const GPIO_INPUTS: usize = 123;
pub const TINT_SLOTS: usize = 32;

pub const NMI_INPUT: usize = 0;
pub const FIRST_IRQ_INPUT: usize = 1;
pub const FIRST_GPIO_INPUT: usize = FIRST_IRQ_INPUT + IRQ_PINS;
const INPUTS: usize = FIRST_GPIO_INPUT + GPIO_INPUTS;

pub const FIRST_IRQ_OUTPUT: usize = TINT_SLOTS;
pub const NMI_OUTPUT: usize = FIRST_IRQ_OUTPUT + IRQ_PINS;
const OUTPUTS: usize = NMI_OUTPUT + 1;

const NSCR: u64 = 0x00;
const NITSR: u64 = 0x04;
const ISCR: u64 = 0x10;
const IITSR: u64 = 0x14;
const TSCR: u64 = 0x20;
const TITSR0: u64 = 0x24;
const TSSR0: u64 = 0x30;

const NSTAT: u32 = 0;
const NSMON: u32 = 16;
const NSEL: u32 = 0;
const SLOTS_PER_TITSR: usize = 16;
const SLOTS_PER_TSSR: usize = 4;
const TSSEL_BITS: u32 = 7;
const TIEN_BIT: u32 = 7;

/// IITSR encoding: low level, falling, rising, both edges.
fn irq_trigger(code: u32) -> InterruptTrigger {
    match code & 0b11 {
        0 => InterruptTrigger::ActiveLow,
        1 => InterruptTrigger::FallingEdge,
        2 => InterruptTrigger::RisingEdge,
        _ => InterruptTrigger::BothEdges,
    }
}

/// TITSR encoding: rising, falling, high level, low level.
fn tint_trigger(code: u32) -> InterruptTrigger {
    match code & 0b11 {
        0 => InterruptTrigger::RisingEdge,
        1 => InterruptTrigger::FallingEdge,
        2 => InterruptTrigger::ActiveHigh,
        _ => InterruptTrigger::ActiveLow,
    }
}

fn titsr_location(slot: usize) -> (u64, u32) {
    (
        TITSR0 + (slot / SLOTS_PER_TITSR) as u64 * 4,
        (slot % SLOTS_PER_TITSR) as u32 * 2,
    )
}

fn tssr_location(slot: usize) -> (u64, u32) {
    (
        TSSR0 + (slot / SLOTS_PER_TSSR) as u64 * 4,
        (slot % SLOTS_PER_TSSR) as u32 * 8,
    )
}

#[derive(Debug)]
pub struct RzgIrqcState {
    nmi: bool,
    irq_levels: [bool; IRQ_PINS],
    gpio_levels: Vec<bool>,
    blinks: Vec<usize>,
    regs: RegisterFile,
}

impl HasRegisters for RzgIrqcState {
    fn registers(&self) -> &RegisterFile {
        &self.regs
    }
    fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.regs
    }
}

impl RzgIrqcState {
    fn new() -> Self {
        Self {
            nmi: false,
            irq_levels: [false; IRQ_PINS],
            gpio_levels: vec![false; GPIO_INPUTS],
            blinks: Vec::new(),
            regs: RegisterFile::default(),
        }
    }

    fn irq_trigger(&self, irq: usize) -> InterruptTrigger {
        irq_trigger(self.regs.field(IITSR, irq as u32 * 2, 2))
    }

    fn tint_trigger(&self, slot: usize) -> InterruptTrigger {
        let (offset, position) = titsr_location(slot);
        tint_trigger(self.regs.field(offset, position, 2))
    }

    fn tint_enabled(&self, slot: usize) -> bool {
        let (offset, position) = tssr_location(slot);
        self.regs.flag(offset, position + TIEN_BIT)
    }

    /// GPIO feeding `slot`, if the selector names an existing input.
    fn tint_source(&self, slot: usize) -> Option<usize> {
        let (offset, position) = tssr_location(slot);
        let gpio = self.regs.field(offset, position, TSSEL_BITS) as usize;
        (gpio < GPIO_INPUTS).then_some(gpio)
    }

    fn tint_level(&self, slot: usize) -> bool {
        self.tint_source(slot)
            .is_some_and(|gpio| self.gpio_levels[gpio])
    }

    fn set_nmi(&mut self, value: bool) {
        let changed = self.nmi != value;
        self.nmi = value;
        let rising = self.regs.flag(NITSR, NSEL);
        if changed && value == rising {
            trace!("NMI latched");
            self.regs.set_flag(NSCR, NSTAT, true);
        }
    }

    fn set_irq(&mut self, irq: usize, value: bool) {
        let changed = self.irq_levels[irq] != value;
        self.irq_levels[irq] = value;
        if changed && self.irq_trigger(irq).fires_on_edge(value) {
            trace!("IRQ{}: blinked", irq);
            self.regs.set_flag(ISCR, irq as u32, true);
            self.blinks.push(FIRST_IRQ_OUTPUT + irq);
        }
    }

    fn set_gpio(&mut self, gpio: usize, value: bool) {
        let changed = self.gpio_levels[gpio] != value;
        self.gpio_levels[gpio] = value;
        if !changed {
            return;
        }
        for slot in 0..TINT_SLOTS {
            if self.tint_enabled(slot)
                && self.tint_source(slot) == Some(gpio)
                && self.tint_trigger(slot).fires_on_edge(value)
            {
                trace!("TINT{}: blinked", slot);
                self.regs.set_flag(TSCR, slot as u32, true);
                self.blinks.push(slot);
            }
        }
    }

    /// Level-triggered statuses follow their inputs; disabled slots read 0.
    fn refresh_levels(&mut self) {
        for slot in 0..TINT_SLOTS {
            let status = if self.tint_enabled(slot) {
                self.tint_trigger(slot).level_state(self.tint_level(slot))
            } else {
                Some(false)
            };
            if let Some(status) = status {
                self.regs.set_flag(TSCR, slot as u32, status);
            }
        }
        for irq in 0..IRQ_PINS {
            if let Some(status) = self.irq_trigger(irq).level_state(self.irq_levels[irq]) {
                self.regs.set_flag(ISCR, irq as u32, status);
            }
        }
    }

    fn take_outputs(&mut self) -> OutputBatch {
        let mut batch = OutputBatch::default();
        for slot in 0..TINT_SLOTS {
            let level = self.tint_enabled(slot)
                && !self.tint_trigger(slot).is_edge()
                && self.regs.flag(TSCR, slot as u32);
            batch.set(slot, level);
        }
        for irq in 0..IRQ_PINS {
            let level = !self.irq_trigger(irq).is_edge() && self.regs.flag(ISCR, irq as u32);
            batch.set(FIRST_IRQ_OUTPUT + irq, level);
        }
        batch.set(NMI_OUTPUT, self.regs.flag(NSCR, NSTAT));
        for line in self.blinks.drain(..) {
            batch.blink(line);
        }
        batch
    }
}

type Field = FieldDescriptor<RzgIrqcState>;

fn build_register_map() -> Result<RegisterMap<RzgIrqcState>, IntcError> {
    let mut fields = vec![
        Field::flag("NSTAT", NSCR, NSTAT, FieldMode::W0C),
        Field::flag("NSMON", NSCR, NSMON, FieldMode::READ).on_read(|st, _| st.nmi as u32),
        Field::flag("NSEL", NITSR, NSEL, FieldMode::READ_WRITE),
        Field::new("ISTAT", ISCR, 0, IRQ_PINS as u32, FieldMode::W0C),
        Field::new("TSTAT", TSCR, 0, TINT_SLOTS as u32, FieldMode::W0C),
    ];
    for irq in 0..IRQ_PINS {
        fields.push(Field::new(
            format!("IISEL{}", irq),
            IITSR,
            irq as u32 * 2,
            2,
            FieldMode::READ_WRITE,
        ));
    }
    for slot in 0..TINT_SLOTS {
        let (offset, position) = titsr_location(slot);
        fields.push(Field::new(
            format!("TITSEL{}", slot),
            offset,
            position,
            2,
            FieldMode::READ_WRITE,
        ));
        let (offset, position) = tssr_location(slot);
        fields.push(Field::new(
            format!("TSSEL{}", slot),
            offset,
            position,
            TSSEL_BITS,
            FieldMode::READ_WRITE,
        ));
        fields.push(Field::flag(
            format!("TIEN{}", slot),
            offset,
            position + TIEN_BIT,
            FieldMode::READ_WRITE,
        ));
    }
    RegisterMap::new(fields)
}

#[derive(Debug)]
pub struct RzgIrqc {
    state: Mutex<RzgIrqcState>,
    registers: RegisterMap<RzgIrqcState>,
    outputs: Vec<GpioLine>,
}

impl RzgIrqc {
    pub fn new() -> Result<Self, IntcError> {
        let registers = build_register_map()?;
        let mut state = RzgIrqcState::new();
        registers.reset(&mut state);
        let irqc = Self {
            state: Mutex::new(state),
            registers,
            outputs: GpioLine::bank(OUTPUTS),
        };
        // IRQ pins reset to low-level triggering, so idle inputs assert.
        irqc.update(|_| ());
        Ok(irqc)
    }

    /// Every entry point ends with a level refresh, so register writes
    /// re-evaluate level-triggered slots against their current inputs.
    fn update<R>(&self, f: impl FnOnce(&mut RzgIrqcState) -> R) -> R {
        let (result, batch) = {
            let mut state = lock_state(&self.state);
            let result = f(&mut state);
            state.refresh_levels();
            (result, state.take_outputs())
        };
        batch.apply(&self.outputs);
        result
    }
}

impl Peripheral for RzgIrqc {
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
            st.nmi = false;
            st.irq_levels = [false; IRQ_PINS];
            st.gpio_levels.iter_mut().for_each(|l| *l = false);
            st.blinks.clear();
        });
    }

    fn size(&self) -> u64 {
        RZG_IRQC_SIZE
    }
}

impl GpioReceiver for RzgIrqc {
    fn on_gpio(&self, number: usize, value: bool) {
        if number >= INPUTS {
            error!("GPIO number {} is out of range [0; {})", number, INPUTS);
            return;
        }
        debug!("IRQC input {} set to {}", number, value);
        self.update(|st| match number {
            NMI_INPUT => st.set_nmi(value),
            n if n < FIRST_GPIO_INPUT => st.set_irq(n - FIRST_IRQ_INPUT, value),
            n => st.set_gpio(n - FIRST_GPIO_INPUT, value),
        });
    }
}

impl NumberedGpioOutput for RzgIrqc {
    fn connections(&self) -> &[GpioLine] {
        &self.outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::SignalProbe;

    fn irqc() -> RzgIrqc {
        RzgIrqc::new().unwrap()
    }

    /// Routes GPIO `gpio` to TINT `slot` with the given TITSR code.
    fn route_tint(c: &RzgIrqc, slot: usize, gpio: u32, code: u32) {
        let (offset, position) = tssr_location(slot);
        c.write_u32(offset, (gpio | 1 << TIEN_BIT) << position)
            .unwrap();
        let (offset, position) = titsr_location(slot);
        c.write_u32(offset, code << position).unwrap();
    }

    #[test]
    fn test_tint_rising_edge_blinks() {
        let c = irqc();
        let probe = SignalProbe::new();
        c.connections()[5].connect(probe.clone(), 0);
        route_tint(&c, 5, 17, 0);

        c.on_gpio(FIRST_GPIO_INPUT + 17, true);
        assert_eq!(probe.events(), vec![(0, true), (0, false)]);
        assert!(!c.connections()[5].is_set());
        assert_eq!(c.read_u32(TSCR).unwrap(), 1 << 5);

        c.on_gpio(FIRST_GPIO_INPUT + 17, false);
        assert_eq!(probe.events().len(), 2, "falling edge ignored");

        c.write_u32(TSCR, !(1 << 5)).unwrap();
        assert_eq!(c.read_u32(TSCR).unwrap(), 0);
    }

    #[test]
    fn test_tint_level_types_follow_level() {
        let c = irqc();
        route_tint(&c, 20, 3, 3);
        assert!(c.connections()[20].is_set(), "low level with input low");

        c.on_gpio(FIRST_GPIO_INPUT + 3, true);
        assert!(!c.connections()[20].is_set());

        c.write_u32(TITSR0 + 4, 2 << 8).unwrap();
        assert!(c.connections()[20].is_set(), "high level re-evaluated on write");
        c.write_u32(TSCR, 0).unwrap();
        assert_eq!(c.read_u32(TSCR).unwrap(), 1 << 20, "level status cannot be cleared");
    }

    #[test]
    fn test_disabled_tint_is_quiet() {
        let c = irqc();
        c.write_u32(TITSR0, 2).unwrap();
        c.write_u32(TSSR0, 1).unwrap();
        c.on_gpio(FIRST_GPIO_INPUT + 1, true);
        assert!(!c.connections()[0].is_set());
        assert_eq!(c.read_u32(TSCR).unwrap(), 0);
    }

    #[test]
    fn test_edge_only_for_changed_input() {
        let c = irqc();
        let probe = SignalProbe::new();
        c.connections()[0].connect(probe.clone(), 0);
        route_tint(&c, 0, 2, 0);
        c.on_gpio(FIRST_GPIO_INPUT + 2, true);
        probe.clear();

        c.on_gpio(FIRST_GPIO_INPUT + 9, true);
        c.on_gpio(FIRST_GPIO_INPUT + 2, true);
        assert!(probe.events().is_empty());
    }

    #[test]
    fn test_irq_pin_modes() {
        let c = irqc();
        assert!(c.connections()[FIRST_IRQ_OUTPUT].is_set(), "IRQ0 low level by default");
        c.on_gpio(FIRST_IRQ_INPUT, true);
        assert!(!c.connections()[FIRST_IRQ_OUTPUT].is_set());

        let probe = SignalProbe::new();
        c.connections()[FIRST_IRQ_OUTPUT + 3].connect(probe.clone(), 3);
        // IRQ3 both edges.
        c.write_u32(IITSR, 3 << 6 | 0b01).unwrap();
        c.on_gpio(FIRST_IRQ_INPUT + 3, true);
        c.on_gpio(FIRST_IRQ_INPUT + 3, false);
        assert_eq!(probe.events().len(), 4);
        assert_eq!(c.read_u32(ISCR).unwrap() & (1 << 3), 1 << 3);
        c.write_u32(ISCR, !(1 << 3)).unwrap();
        assert_eq!(c.read_u32(ISCR).unwrap() & (1 << 3), 0);
    }

    #[test]
    fn test_nmi_latches_until_cleared() {
        let c = irqc();
        c.write_u32(NITSR, 1).unwrap();
        c.on_gpio(NMI_INPUT, true);
        assert!(c.connections()[NMI_OUTPUT].is_set());
        assert_eq!(c.read_u32(NSCR).unwrap(), 1 | 1 << NSMON);

        c.on_gpio(NMI_INPUT, false);
        assert!(c.connections()[NMI_OUTPUT].is_set());
        c.write_u32(NSCR, 0).unwrap();
        assert!(!c.connections()[NMI_OUTPUT].is_set());
    }

    #[test]
    fn test_reset_and_range() {
        let c = irqc();
        c.on_gpio(INPUTS, true);
        route_tint(&c, 1, 4, 2);
        c.on_gpio(FIRST_GPIO_INPUT + 4, true);
        assert!(c.connections()[1].is_set());
        c.reset();
        c.reset();
        assert!(!c.connections()[1].is_set());
        assert_eq!(c.read_u32(TSSR0).unwrap(), 0);
    }
}
