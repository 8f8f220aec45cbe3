// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! ARM PrimeCell PL190 Vectored Interrupt Controller.
//!
//! IRQ-classified lines are queued by vector priority (slot 0 highest,
//! unvectored lines last, ties in arrival order) and taken by reading
//! VECTADDR; FIQ lines bypass the queue and drive the FIQ output directly.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Mutex;

use tracing::{debug, error, trace, warn};

use crate::interrupt::InterruptController;
use crate::registers::{FieldMode, FieldDescriptor, HasRegisters, RegisterFile, RegisterMap};
use crate::signals::{GpioLine, GpioReceiver, NumberedGpioOutput, OutputBatch};
use crate::{lock_state, IntcError, Peripheral, SimResult};

pub const VIC_SIZE: u64 = 0x1000;
pub const VIC_LINES: usize = 32;
pub const VECTOR_SLOTS: usize = 16;

pub const IRQ_OUTPUT: usize = 0;
pub const FIQ_OUTPUT: usize = 1;

const IRQ_STATUS: u64 = 0x00;
const FIQ_STATUS: u64 = 0x04;
const RAW_INTR: u64 = 0x08;
const INT_SELECT: u64 = 0x0C;
const INT_ENABLE: u64 = 0x10;
const INT_ENABLE_CLEAR: u64 = 0x14;
const SOFT_INT: u64 = 0x18;
const SOFT_INT_CLEAR: u64 = 0x1C;
const PROTECTION: u64 = 0x20;
const VECT_ADDR: u64 = 0x30;
const DEF_VECT_ADDR: u64 = 0x34;
const VECT_ADDR0: u64 = 0x100;
const VECT_CNTL0: u64 = 0x200;
const PERIPH_ID0: u64 = 0xFE0;
const PCELL_ID0: u64 = 0xFF0;

const PERIPH_ID: [u32; 4] = [0x90, 0x11, 0x10, 0x00];
const PCELL_ID: [u32; 4] = [0x0D, 0xF0, 0x05, 0xB1];

const CNTL_SOURCE_BITS: u32 = 5;
const CNTL_ENABLE_BIT: u32 = 5;

#[derive(Debug, Clone, Copy)]
struct Interrupt {
    is_irq: bool,
    enabled: bool,
    pin: bool,
    soft: bool,
    vector: Option<usize>,
}

impl Interrupt {
    const fn new() -> Self {
        Self {
            is_irq: true,
            enabled: false,
            pin: false,
            soft: false,
            vector: None,
        }
    }

    fn is_active(&self) -> bool {
        self.enabled && (self.pin || self.soft)
    }

    fn is_queueable(&self) -> bool {
        self.is_active() && self.is_irq
    }

    fn priority(&self) -> u32 {
        self.vector.map_or(u32::MAX, |v| v as u32)
    }
}

type QueueEntry = Reverse<(u32, u64, usize)>;

#[derive(Debug)]
pub struct VicState {
    lines: [Interrupt; VIC_LINES],
    queue: BinaryHeap<QueueEntry>,
    queued: u32,
    serviced: Vec<usize>,
    sequence: u64,
    regs: RegisterFile,
}

impl HasRegisters for VicState {
    fn registers(&self) -> &RegisterFile {
        &self.regs
    }
    fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.regs
    }
}

impl VicState {
    fn new() -> Self {
        Self {
            lines: [Interrupt::new(); VIC_LINES],
            queue: BinaryHeap::new(),
            queued: 0,
            serviced: Vec::new(),
            sequence: 0,
            regs: RegisterFile::default(),
        }
    }

    fn mask(&self, pred: impl Fn(&Interrupt) -> bool) -> u32 {
        self.lines
            .iter()
            .enumerate()
            .filter(|(_, l)| pred(l))
            .fold(0, |acc, (i, _)| acc | (1 << i))
    }

    fn for_each_bit(&mut self, bits: u32, mut f: impl FnMut(&mut Interrupt)) {
        for (i, line) in self.lines.iter_mut().enumerate() {
            if bits & (1 << i) != 0 {
                f(line);
            }
        }
    }

    fn enqueue(&mut self, id: usize) {
        if self.queued & (1 << id) != 0 || self.serviced.contains(&id) {
            return;
        }
        let entry = Reverse((self.lines[id].priority(), self.sequence, id));
        self.sequence += 1;
        self.queue.push(entry);
        self.queued |= 1 << id;
        trace!("Queued IRQ #{}", id);
    }

    /// Drops queue and service-stack fronts that are no longer active.
    fn purge(&mut self) {
        while let Some(&Reverse((_, _, id))) = self.queue.peek() {
            if self.lines[id].is_queueable() {
                break;
            }
            self.queue.pop();
            self.queued &= !(1 << id);
        }
        while let Some(&id) = self.serviced.last() {
            if self.lines[id].is_active() {
                break;
            }
            self.serviced.pop();
        }
    }

    /// Queues every active IRQ not already queued or in service.
    fn update(&mut self) {
        for id in 0..VIC_LINES {
            if self.lines[id].is_queueable() {
                self.enqueue(id);
            }
        }
        self.purge();
    }

    /// Applies a write to VECTCNTL`slot`. The slot stops vectoring whatever
    /// line it named before; if enabled it now vectors its source, taking it
    /// over from any other slot. The last written slot wins a shared source.
    fn remap_vector(&mut self, slot: usize) {
        for line in self.lines.iter_mut().filter(|l| l.vector == Some(slot)) {
            line.vector = None;
        }
        let offset = VECT_CNTL0 + 4 * slot as u64;
        if self.regs.flag(offset, CNTL_ENABLE_BIT) {
            let source = self.regs.field(offset, 0, CNTL_SOURCE_BITS) as usize;
            self.lines[source].vector = Some(slot);
        }
        let entries: Vec<QueueEntry> = self.queue.drain().collect();
        for Reverse((_, seq, id)) in entries {
            self.queue
                .push(Reverse((self.lines[id].priority(), seq, id)));
        }
    }

    fn vector_address(&self, id: usize) -> u32 {
        match self.lines[id].vector {
            Some(slot) => self.regs.get(VECT_ADDR0 + 4 * slot as u64),
            None => self.regs.get(DEF_VECT_ADDR),
        }
    }

    fn acknowledge(&mut self) -> Option<usize> {
        self.purge();
        let Reverse((_, _, id)) = self.queue.pop()?;
        self.queued &= !(1 << id);
        self.serviced.push(id);
        debug!("Acknowledged IRQ #{}", id);
        Some(id)
    }

    fn finish(&mut self) -> Option<usize> {
        let Some(id) = self.serviced.pop() else {
            warn!("Tried to finish a vectored interrupt, but there is none active");
            return None;
        };
        debug!("Finished IRQ #{}", id);
        self.purge();
        Some(id)
    }

    fn outputs(&self) -> OutputBatch {
        let irq = self
            .queue
            .peek()
            .is_some_and(|Reverse((_, _, id))| self.lines[*id].is_queueable());
        let fiq = self.lines.iter().any(|l| l.is_active() && !l.is_irq);
        let mut batch = OutputBatch::default();
        batch.set(IRQ_OUTPUT, irq);
        batch.set(FIQ_OUTPUT, fiq);
        batch
    }
}

type Field = FieldDescriptor<VicState>;

fn build_register_map() -> Result<RegisterMap<VicState>, IntcError> {
    let mut fields = vec![
        Field::word("IRQSTATUS", IRQ_STATUS, FieldMode::READ)
            .on_read(|st, _| st.mask(|l| l.is_active() && l.is_irq)),
        Field::word("FIQSTATUS", FIQ_STATUS, FieldMode::READ)
            .on_read(|st, _| st.mask(|l| l.is_active() && !l.is_irq)),
        Field::word("RAWINTR", RAW_INTR, FieldMode::READ).on_read(|st, _| st.mask(|l| l.pin || l.soft)),
        Field::word("INTSELECT", INT_SELECT, FieldMode::READ_WRITE)
            .on_read(|st, _| st.mask(|l| !l.is_irq))
            .on_write(|st, _, written| {
                for (i, line) in st.lines.iter_mut().enumerate() {
                    line.is_irq = written & (1 << i) == 0;
                }
            }),
        Field::word("INTENABLE", INT_ENABLE, FieldMode::READ | FieldMode::SET)
            .on_read(|st, _| st.mask(|l| l.enabled))
            .on_write(|st, _, written| st.for_each_bit(written, |l| l.enabled = true)),
        Field::word("INTENCLEAR", INT_ENABLE_CLEAR, FieldMode::WRITE)
            .on_write(|st, _, written| st.for_each_bit(written, |l| l.enabled = false)),
        Field::word("SOFTINT", SOFT_INT, FieldMode::READ | FieldMode::SET)
            .on_read(|st, _| st.mask(|l| l.soft))
            .on_write(|st, _, written| st.for_each_bit(written, |l| l.soft = true)),
        Field::word("SOFTINTCLEAR", SOFT_INT_CLEAR, FieldMode::WRITE)
            .on_write(|st, _, written| st.for_each_bit(written, |l| l.soft = false)),
        Field::flag("PROTECTION", PROTECTION, 0, FieldMode::READ_WRITE),
        Field::word("VECTADDR", VECT_ADDR, FieldMode::READ_WRITE)
            .on_read(|st, _| st.acknowledge().map_or(0, |id| st.vector_address(id)))
            .on_write(|st, _, _| {
                st.finish();
            }),
        Field::word("DEFVECTADDR", DEF_VECT_ADDR, FieldMode::READ_WRITE),
    ];

    for slot in 0..VECTOR_SLOTS {
        fields.push(Field::word(
            format!("VECTADDR{}", slot),
            VECT_ADDR0 + 4 * slot as u64,
            FieldMode::READ_WRITE,
        ));
        let cntl = VECT_CNTL0 + 4 * slot as u64;
        fields.push(Field::new(
            format!("VECTCNTL{}_SOURCE", slot),
            cntl,
            0,
            CNTL_SOURCE_BITS,
            FieldMode::READ_WRITE,
        ));
        fields.push(
            Field::flag(
                format!("VECTCNTL{}_E", slot),
                cntl,
                CNTL_ENABLE_BIT,
                FieldMode::READ_WRITE,
            )
            .on_write(move |st, _, _| st.remap_vector(slot)),
        );
    }

    for (i, (&periph, &pcell)) in PERIPH_ID.iter().zip(PCELL_ID.iter()).enumerate() {
        fields.push(
            Field::new(
                format!("PERIPHID{}", i),
                PERIPH_ID0 + 4 * i as u64,
                0,
                8,
                FieldMode::READ,
            )
            .with_reset(periph),
        );
        fields.push(
            Field::new(
                format!("PCELLID{}", i),
                PCELL_ID0 + 4 * i as u64,
                0,
                8,
                FieldMode::READ,
            )
            .with_reset(pcell),
        );
    }

    RegisterMap::new(fields)
}

#[derive(Debug)]
pub struct Vic {
    state: Mutex<VicState>,
    registers: RegisterMap<VicState>,
    outputs: Vec<GpioLine>,
}

impl Vic {
    pub fn new() -> Result<Self, IntcError> {
        let registers = build_register_map()?;
        let mut state = VicState::new();
        registers.reset(&mut state);
        Ok(Self {
            state: Mutex::new(state),
            registers,
            outputs: GpioLine::bank(2),
        })
    }

    fn update<R>(&self, f: impl FnOnce(&mut VicState) -> R) -> R {
        let (result, batch) = {
            let mut state = lock_state(&self.state);
            let result = f(&mut state);
            state.update();
            (result, state.outputs())
        };
        batch.apply(&self.outputs);
        result
    }

    pub fn irq(&self) -> &GpioLine {
        &self.outputs[IRQ_OUTPUT]
    }

    pub fn fiq(&self) -> &GpioLine {
        &self.outputs[FIQ_OUTPUT]
    }

    /// Lines currently in service, oldest first.
    pub fn in_service(&self) -> Vec<usize> {
        lock_state(&self.state).serviced.clone()
    }

    pub fn registers(&self) -> &RegisterMap<VicState> {
        &self.registers
    }
}

impl Peripheral for Vic {
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
            st.lines = [Interrupt::new(); VIC_LINES];
            st.queue.clear();
            st.queued = 0;
            st.serviced.clear();
            st.sequence = 0;
            self.registers.reset(st);
        });
    }

    fn size(&self) -> u64 {
        VIC_SIZE
    }
}

impl GpioReceiver for Vic {
    fn on_gpio(&self, number: usize, value: bool) {
        if number >= VIC_LINES {
            error!(
                "GPIO number {} is out of range [0; {})",
                number, VIC_LINES
            );
            return;
        }
        trace!("GPIO #{} state changed to {}", number, value);
        self.update(|st| st.lines[number].pin = value);
    }
}

impl NumberedGpioOutput for Vic {
    fn connections(&self) -> &[GpioLine] {
        &self.outputs
    }
}

impl InterruptController for Vic {
    fn set_interrupt_pending(&self, irq: u32, pending: bool) {
        self.on_gpio(irq as usize, pending);
    }

    fn is_interrupt_active(&self, irq: u32) -> bool {
        lock_state(&self.state)
            .lines
            .get(irq as usize)
            .is_some_and(|l| l.is_active())
    }

    fn acknowledge_interrupt(&self) -> Option<u32> {
        self.update(|st| st.acknowledge()).map(|id| id as u32)
    }

    fn complete_interrupt(&self, irq: u32) {
        if let Some(id) = self.update(|st| st.finish()) {
            if id != irq as usize {
                warn!("Completed IRQ #{} while #{} was in service", irq, id);
            }
        }
    }
}
