// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! QuickLogic EOS S3 interrupt router.
//!
//! Combines a small GPIO port with interrupt detection, a bank of peripheral
//! ("other") interrupts forwarded one-to-one, and two software interrupts
//! feeding the two NVIC-facing outputs.
//!
//! Input numbering: 0..=5 are reserved, 6..=29 are the peripheral
//! interrupts and 30..=37 are GPIOs 0..7.
//!
//! Output numbering: 0..=7 are the GPIO pins (driven through IO_OUT), 8 is
//! the GPIO interrupt, 9..=32 the peripheral interrupts, 33 the software
//! interrupt routed to NVIC 0 and 34 the one routed to NVIC 1.

use std::sync::{Arc, Mutex};

use tracing::{error, trace};

use crate::interrupt::InterruptManager;
use crate::peripherals::gpio_interrupt::{GpioInterruptManager, InterruptTrigger};
use crate::registers::{FieldMode, FieldDescriptor, HasRegisters, RegisterFile, RegisterMap};
use crate::signals::{GpioLine, GpioReceiver, NumberedGpioOutput, OutputBatch};
use crate::{lock_state, IntcError, Peripheral, SimResult};

pub const EOSS3_SIZE: u64 = 0x400;
pub const EOSS3_MISC_SIZE: u64 = 0x10;

pub const GPIO_PINS: usize = 8;
pub const OTHER_INTERRUPTS: usize = 24;
pub const FIRST_OTHER_INPUT: usize = 6;
pub const FIRST_GPIO_INPUT: usize = FIRST_OTHER_INPUT + OTHER_INTERRUPTS;
pub const INPUTS: usize = FIRST_GPIO_INPUT + GPIO_PINS;

pub const GPIO_IRQ_OUTPUT: usize = GPIO_PINS;
pub const FIRST_OTHER_OUTPUT: usize = GPIO_IRQ_OUTPUT + 1;
pub const SW_NVIC0_OUTPUT: usize = FIRST_OTHER_OUTPUT + OTHER_INTERRUPTS;
pub const SW_NVIC1_OUTPUT: usize = SW_NVIC0_OUTPUT + 1;
const OUTPUTS: usize = SW_NVIC1_OUTPUT + 1;

const GPIO_INTR: u64 = 0x00;
const GPIO_INTR_RAW: u64 = 0x04;
const GPIO_INTR_TYPE: u64 = 0x08;
const GPIO_INTR_POL: u64 = 0x0C;
const GPIO_INTR_EN_M4: u64 = 0x14;
const OTHER_INTR: u64 = 0x30;
const OTHER_INTR_EN_M4: u64 = 0x38;
const SW_INTR_1: u64 = 0x40;
const SW_INTR_1_EN_M4: u64 = 0x48;
const SW_INTR_2: u64 = 0x50;
const SW_INTR_2_EN_M4: u64 = 0x58;

const IO_IN: u64 = 0x0;
const IO_OUT: u64 = 0x4;

/// Peripheral interrupt names, in input order.
pub const OTHER_INTERRUPT_NAMES: [&str; OTHER_INTERRUPTS] = [
    "SRAM", "UART", "Timer", "Watchdog", "WatchdogReset", "BusTimeout", "FPU",
    "PacketFIFO", "ReservedI2S", "ReservedAudio", "SPIMaster", "ConfigDMA",
    "PMUTimer", "ADC", "RTC", "Reset", "FFE0", "WatchdogFFE", "ApBoot", "LDO30",
    "LDO50", "ReservedSRAM", "LPSD", "DMic",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftwareInterrupt {
    Sw1,
    Sw2,
}

/// Sw2 is wired to NVIC 0 and Sw1 to NVIC 1.
const SOFTWARE_GROUPS: &[(SoftwareInterrupt, usize)] =
    &[(SoftwareInterrupt::Sw2, 0), (SoftwareInterrupt::Sw1, 1)];

/// A peripheral interrupt: `detected` follows the input, `active` latches it.
#[derive(Debug, Clone, Copy, Default)]
struct OtherInterrupt {
    detected: bool,
    active: bool,
}

impl OtherInterrupt {
    fn set_detected(&mut self, value: bool) {
        self.detected = value;
        if value {
            self.active = true;
        }
    }

    /// Software can only drop `active` once the source stopped asserting.
    fn set_active(&mut self, value: bool) {
        self.active = value || self.detected;
    }
}

#[derive(Debug)]
pub struct Eoss3State {
    gpio: GpioInterruptManager,
    other: [OtherInterrupt; OTHER_INTERRUPTS],
    software: InterruptManager<SoftwareInterrupt>,
    io_out: u32,
    regs: RegisterFile,
}

impl HasRegisters for Eoss3State {
    fn registers(&self) -> &RegisterFile {
        &self.regs
    }
    fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.regs
    }
}

fn trigger_from(edge: bool, high: bool) -> InterruptTrigger {
    match (edge, high) {
        (true, true) => InterruptTrigger::RisingEdge,
        (true, false) => InterruptTrigger::FallingEdge,
        (false, true) => InterruptTrigger::ActiveHigh,
        (false, false) => InterruptTrigger::ActiveLow,
    }
}

impl Eoss3State {
    fn new() -> Self {
        let mut gpio = GpioInterruptManager::new(GPIO_PINS);
        gpio.deassert_active_level = true;
        Self {
            gpio,
            other: [OtherInterrupt::default(); OTHER_INTERRUPTS],
            software: InterruptManager::new(SOFTWARE_GROUPS, 2),
            io_out: 0,
            regs: RegisterFile::default(),
        }
    }

    fn sync_gpio_config(&mut self) {
        let ty = self.regs.get(GPIO_INTR_TYPE);
        let pol = self.regs.get(GPIO_INTR_POL);
        let en = self.regs.get(GPIO_INTR_EN_M4);
        for pin in 0..GPIO_PINS {
            let bit = |reg: u32| reg & (1 << pin) != 0;
            self.gpio.set_trigger(pin, trigger_from(bit(ty), bit(pol)));
            self.gpio.set_enabled(pin, bit(en));
        }
    }

    fn sync_software_enables(&mut self) {
        let sw1 = self.regs.flag(SW_INTR_1_EN_M4, 0);
        let sw2 = self.regs.flag(SW_INTR_2_EN_M4, 0);
        self.software.set_enabled(SoftwareInterrupt::Sw1, sw1);
        self.software.set_enabled(SoftwareInterrupt::Sw2, sw2);
    }

    fn other_active_bits(&self) -> u32 {
        self.other
            .iter()
            .enumerate()
            .filter(|(_, irq)| irq.active)
            .fold(0, |acc, (i, _)| acc | (1 << i))
    }

    fn outputs(&self) -> OutputBatch {
        let mut batch = OutputBatch::default();
        for pin in 0..GPIO_PINS {
            batch.set(pin, self.io_out & (1 << pin) != 0);
        }
        batch.set(GPIO_IRQ_OUTPUT, self.gpio.is_asserted());
        let enabled = self.regs.get(OTHER_INTR_EN_M4);
        for (i, irq) in self.other.iter().enumerate() {
            batch.set(FIRST_OTHER_OUTPUT + i, irq.active && enabled & (1 << i) != 0);
        }
        let software = self.software.outputs();
        batch.set(SW_NVIC0_OUTPUT, software[0]);
        batch.set(SW_NVIC1_OUTPUT, software[1]);
        batch
    }
}

type Field = FieldDescriptor<Eoss3State>;

fn software_fields(
    name: &'static str,
    status: u64,
    enable: u64,
    irq: SoftwareInterrupt,
) -> [Field; 2] {
    [
        Field::flag(name, status, 0, FieldMode::READ_WRITE)
            .on_read(move |st, _| st.software.status(irq) as u32)
            .on_write(move |st, _, written| {
                trace!("{:?} set to {}", irq, written != 0);
                st.software.set_status(irq, written != 0);
            }),
        Field::flag(format!("{}_EN_M4", name), enable, 0, FieldMode::READ_WRITE)
            .on_change(|st, _, _| st.sync_software_enables()),
    ]
}

fn build_register_map() -> Result<RegisterMap<Eoss3State>, IntcError> {
    let gpio_width = GPIO_PINS as u32;
    let other_width = OTHER_INTERRUPTS as u32;
    let mut fields = vec![
        Field::new("GPIO_INTR", GPIO_INTR, 0, gpio_width, FieldMode::W1C)
            .on_read(|st, _| st.gpio.active_bits())
            .on_write(|st, _, written| {
                for pin in (0..GPIO_PINS).filter(|&p| written & (1 << p) != 0) {
                    st.gpio.clear(pin);
                }
            }),
        Field::new("GPIO_INTR_RAW", GPIO_INTR_RAW, 0, gpio_width, FieldMode::READ)
            .on_read(|st, _| st.gpio.input_bits()),
        Field::new("GPIO_INTR_TYPE", GPIO_INTR_TYPE, 0, gpio_width, FieldMode::READ_WRITE)
            .on_change(|st, _, _| st.sync_gpio_config()),
        Field::new("GPIO_INTR_POL", GPIO_INTR_POL, 0, gpio_width, FieldMode::READ_WRITE)
            .on_change(|st, _, _| st.sync_gpio_config()),
        Field::new("GPIO_INTR_EN_M4", GPIO_INTR_EN_M4, 0, gpio_width, FieldMode::READ_WRITE)
            .on_change(|st, _, _| {
                st.sync_gpio_config();
                st.gpio.refresh();
            }),
        Field::new("OTHER_INTR", OTHER_INTR, 0, other_width, FieldMode::W1C)
            .on_read(|st, _| st.other_active_bits())
            .on_write(|st, _, written| {
                for (i, irq) in st.other.iter_mut().enumerate() {
                    if written & (1 << i) != 0 {
                        irq.set_active(false);
                    }
                }
            }),
        Field::new("OTHER_INTR_EN_M4", OTHER_INTR_EN_M4, 0, other_width, FieldMode::READ_WRITE),
    ];
    fields.extend(software_fields(
        "SW_INTR_1",
        SW_INTR_1,
        SW_INTR_1_EN_M4,
        SoftwareInterrupt::Sw1,
    ));
    fields.extend(software_fields(
        "SW_INTR_2",
        SW_INTR_2,
        SW_INTR_2_EN_M4,
        SoftwareInterrupt::Sw2,
    ));
    RegisterMap::new(fields)
}

fn build_misc_map() -> Result<RegisterMap<Eoss3State>, IntcError> {
    RegisterMap::new(vec![
        Field::new("IO_IN", IO_IN, 0, GPIO_PINS as u32, FieldMode::READ)
            .on_read(|st, _| st.gpio.input_bits()),
        Field::new("IO_OUT", IO_OUT, 0, GPIO_PINS as u32, FieldMode::READ_WRITE)
            .on_write(|st, _, written| st.io_out = written),
    ])
}

#[derive(Debug)]
pub struct Eoss3 {
    state: Mutex<Eoss3State>,
    registers: RegisterMap<Eoss3State>,
    misc_registers: RegisterMap<Eoss3State>,
    outputs: Vec<GpioLine>,
}

impl Eoss3 {
    pub fn new() -> Result<Self, IntcError> {
        let registers = build_register_map()?;
        let misc_registers = build_misc_map()?;
        let mut state = Eoss3State::new();
        registers.reset(&mut state);
        misc_registers.reset(&mut state);
        state.sync_gpio_config();
        Ok(Self {
            state: Mutex::new(state),
            registers,
            misc_registers,
            outputs: GpioLine::bank(OUTPUTS),
        })
    }

    fn update<R>(&self, f: impl FnOnce(&mut Eoss3State) -> R) -> R {
        let (result, batch) = {
            let mut state = lock_state(&self.state);
            let result = f(&mut state);
            (result, state.outputs())
        };
        batch.apply(&self.outputs);
        result
    }

    /// The IO_IN/IO_OUT register window, mapped separately on the bus.
    pub fn misc(self: &Arc<Self>) -> Eoss3Misc {
        Eoss3Misc {
            ctrl: Arc::clone(self),
        }
    }

    pub fn software_interrupt(&self, irq: SoftwareInterrupt) -> bool {
        lock_state(&self.state).software.status(irq)
    }
}

impl Peripheral for Eoss3 {
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
            self.misc_registers.reset(st);
            st.gpio.reset();
            st.software.reset();
            st.other = [OtherInterrupt::default(); OTHER_INTERRUPTS];
            st.io_out = 0;
            st.sync_gpio_config();
        });
    }

    fn size(&self) -> u64 {
        EOSS3_SIZE
    }
}

impl GpioReceiver for Eoss3 {
    fn on_gpio(&self, number: usize, value: bool) {
        if !(FIRST_OTHER_INPUT..INPUTS).contains(&number) {
            error!(
                "EOS S3 input {} is out of range, interrupts and GPIOs use [{}; {}]",
                number,
                FIRST_OTHER_INPUT,
                INPUTS - 1
            );
            return;
        }
        self.update(|st| {
            if number >= FIRST_GPIO_INPUT {
                trace!("GPIO {} set to {}", number - FIRST_GPIO_INPUT, value);
                st.gpio.set_input(number - FIRST_GPIO_INPUT, value);
                st.gpio.refresh();
            } else {
                let irq = number - FIRST_OTHER_INPUT;
                trace!("{} interrupt detected: {}", OTHER_INTERRUPT_NAMES[irq], value);
                st.other[irq].set_detected(value);
            }
        });
    }
}

impl NumberedGpioOutput for Eoss3 {
    fn connections(&self) -> &[GpioLine] {
        &self.outputs
    }
}

/// Bus view of the router's IO_IN/IO_OUT registers.
#[derive(Debug)]
pub struct Eoss3Misc {
    ctrl: Arc<Eoss3>,
}

impl Peripheral for Eoss3Misc {
    fn read_u32(&self, offset: u64) -> SimResult<u32> {
        Ok(self
            .ctrl
            .update(|st| self.ctrl.misc_registers.read(st, offset)))
    }

    fn write_u32(&self, offset: u64, value: u32) -> SimResult<()> {
        self.write_masked(offset, value, u32::MAX)
    }

    fn write_masked(&self, offset: u64, value: u32, lanes: u32) -> SimResult<()> {
        self.ctrl.update(|st| {
            self.ctrl
                .misc_registers
                .write_masked(st, offset, value, lanes)
        });
        Ok(())
    }

    fn reset(&self) {
        self.ctrl.update(|st| {
            self.ctrl.misc_registers.reset(st);
            st.io_out = 0;
        });
    }

    fn size(&self) -> u64 {
        EOSS3_MISC_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> Arc<Eoss3> {
        Arc::new(Eoss3::new().unwrap())
    }

    #[test]
    fn test_other_interrupt_active_while_detected() {
        let r = router();
        r.write_u32(OTHER_INTR_EN_M4, 1 << 3).unwrap();
        r.on_gpio(FIRST_OTHER_INPUT + 3, true);
        assert!(r.connections()[FIRST_OTHER_OUTPUT + 3].is_set());

        r.write_u32(OTHER_INTR, 1 << 3).unwrap();
        assert!(
            r.connections()[FIRST_OTHER_OUTPUT + 3].is_set(),
            "clear is ignored while the source asserts"
        );

        r.on_gpio(FIRST_OTHER_INPUT + 3, false);
        assert_eq!(r.read_u32(OTHER_INTR).unwrap(), 1 << 3, "latched");
        r.write_u32(OTHER_INTR, 1 << 3).unwrap();
        assert_eq!(r.read_u32(OTHER_INTR).unwrap(), 0);
        assert!(!r.connections()[FIRST_OTHER_OUTPUT + 3].is_set());
    }

    #[test]
    fn test_other_interrupt_enable_gates_output() {
        let r = router();
        r.on_gpio(FIRST_OTHER_INPUT, true);
        assert!(!r.connections()[FIRST_OTHER_OUTPUT].is_set());
        r.write_u32(OTHER_INTR_EN_M4, 1).unwrap();
        assert!(r.connections()[FIRST_OTHER_OUTPUT].is_set());
    }

    #[test]
    fn test_gpio_rising_edge() {
        let r = router();
        // TYPE=1, POL=1: rising edge on pin 2.
        r.write_u32(GPIO_INTR_TYPE, 1 << 2).unwrap();
        r.write_u32(GPIO_INTR_POL, 1 << 2).unwrap();
        r.write_u32(GPIO_INTR_EN_M4, 1 << 2).unwrap();

        r.on_gpio(FIRST_GPIO_INPUT + 2, true);
        assert!(r.connections()[GPIO_IRQ_OUTPUT].is_set());
        assert_eq!(r.read_u32(GPIO_INTR_RAW).unwrap(), 1 << 2);
        assert_eq!(r.read_u32(GPIO_INTR).unwrap(), 1 << 2);

        r.write_u32(GPIO_INTR, 1 << 2).unwrap();
        assert!(!r.connections()[GPIO_IRQ_OUTPUT].is_set());
    }

    #[test]
    fn test_gpio_level_follows_input() {
        let r = router();
        // TYPE=0, POL=1: active high on pin 0.
        r.write_u32(GPIO_INTR_POL, 1).unwrap();
        r.write_u32(GPIO_INTR_EN_M4, 1).unwrap();
        r.on_gpio(FIRST_GPIO_INPUT, true);
        assert!(r.connections()[GPIO_IRQ_OUTPUT].is_set());
        r.on_gpio(FIRST_GPIO_INPUT, false);
        assert!(!r.connections()[GPIO_IRQ_OUTPUT].is_set());
    }

    #[test]
    fn test_software_interrupts_reach_their_nvic() {
        let r = router();
        r.write_u32(SW_INTR_2, 1).unwrap();
        assert!(!r.connections()[SW_NVIC0_OUTPUT].is_set());
        r.write_u32(SW_INTR_2_EN_M4, 1).unwrap();
        assert!(r.connections()[SW_NVIC0_OUTPUT].is_set());
        assert!(!r.connections()[SW_NVIC1_OUTPUT].is_set());

        r.write_u32(SW_INTR_1_EN_M4, 1).unwrap();
        r.write_u32(SW_INTR_1, 1).unwrap();
        assert!(r.connections()[SW_NVIC1_OUTPUT].is_set());
        assert!(r.software_interrupt(SoftwareInterrupt::Sw1));

        r.write_u32(SW_INTR_2, 0).unwrap();
        assert!(!r.connections()[SW_NVIC0_OUTPUT].is_set());
        assert_eq!(r.read_u32(SW_INTR_1).unwrap(), 1);
    }

    #[test]
    fn test_misc_view_drives_pins() {
        let r = router();
        let misc = r.misc();
        misc.write_u32(IO_OUT, 0b1010_0001).unwrap();
        assert!(r.connections()[0].is_set());
        assert!(r.connections()[7].is_set());
        assert!(!r.connections()[1].is_set());
        assert_eq!(misc.read_u32(IO_OUT).unwrap(), 0b1010_0001);

        r.on_gpio(FIRST_GPIO_INPUT + 4, true);
        assert_eq!(misc.read_u32(IO_IN).unwrap(), 1 << 4);
    }

    #[test]
    fn test_reserved_inputs_and_reset() {
        let r = router();
        r.on_gpio(0, true);
        r.on_gpio(INPUTS, true);
        assert!(r.connections().iter().all(|l| !l.is_set()));

        r.write_u32(OTHER_INTR_EN_M4, 1).unwrap();
        r.on_gpio(FIRST_OTHER_INPUT, true);
        r.write_u32(SW_INTR_1_EN_M4, 1).unwrap();
        r.write_u32(SW_INTR_1, 1).unwrap();
        r.reset();
        r.reset();
        assert!(r.connections().iter().all(|l| !l.is_set()));
        assert_eq!(r.read_u32(OTHER_INTR).unwrap(), 0);
    }
}
