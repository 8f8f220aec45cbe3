// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! STM32-style External Interrupt/Event Controller.
//!
//! One implementation serves every chip variant; the differences (line
//! count, which lines are edge-configurable, register placement, extra
//! cores, GPIO port muxing) are carried by an [`ExtiDescriptor`].

use std::sync::Mutex;

use tracing::{error, trace, warn};

use crate::registers::{FieldMode, FieldDescriptor, HasRegisters, RegisterFile, RegisterMap};
use crate::signals::{GpioLine, GpioReceiver, NumberedGpioOutput, OutputBatch};
use crate::{lock_state, IntcError, Peripheral, SimResult};

pub const EXTI_SIZE: u64 = 0x400;
pub const PINS_PER_PORT: usize = 16;

/// Register offsets of one core's block (bank 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtiLayout {
    pub imr: u64,
    pub emr: u64,
    pub rtsr: u64,
    pub ftsr: u64,
    pub swier: u64,
    /// Pending register. Holds rising-edge pends when `fpr` is present.
    pub pr: u64,
    /// Separate falling-edge pending register, if the chip has one.
    pub fpr: Option<u64>,
    /// Distance between the register for lines 0..32 and lines 32..64.
    pub bank_stride: u64,
    /// Distance between the register blocks of consecutive cores.
    pub core_stride: u64,
}

impl ExtiLayout {
    pub const STM32F1: ExtiLayout = ExtiLayout {
        imr: 0x00,
        emr: 0x04,
        rtsr: 0x08,
        ftsr: 0x0C,
        swier: 0x10,
        pr: 0x14,
        fpr: None,
        bank_stride: 0x20,
        core_stride: 0,
    };
}

/// GPIO port selection registers (EXTICR).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtiMux {
    pub offset: u64,
    pub bits_per_line: u32,
    pub muxed_lines: usize,
    pub ports: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtiDescriptor {
    pub lines: usize,
    pub configurable_mask: u64,
    /// Non-configurable lines forward their input level instead of being dropped.
    pub direct_lines_pass_through: bool,
    /// Direct lines ignore IMR.
    pub direct_lines_ignore_mask: bool,
    pub imr_reset: u64,
    pub cores: usize,
    pub layout: ExtiLayout,
    pub mux: Option<ExtiMux>,
}

const fn low_bits(n: usize) -> u64 {
    if n >= 64 {
        u64::MAX
    } else {
        (1u64 << n) - 1
    }
}

impl ExtiDescriptor {
    pub fn stm32f1() -> Self {
        Self {
            lines: 20,
            configurable_mask: low_bits(20),
            direct_lines_pass_through: false,
            direct_lines_ignore_mask: false,
            imr_reset: 0,
            cores: 1,
            layout: ExtiLayout::STM32F1,
            mux: None,
        }
    }

    /// 40 lines; 17, 23..=34 and 39 are direct wake-up lines.
    pub fn stm32l4() -> Self {
        let direct = 0x87_FF82_0000;
        Self {
            lines: 40,
            configurable_mask: low_bits(40) & !direct,
            direct_lines_pass_through: true,
            direct_lines_ignore_mask: false,
            imr_reset: direct,
            cores: 1,
            layout: ExtiLayout::STM32F1,
            mux: None,
        }
    }

    /// Two cores, each with its own register block 0x40 apart.
    pub fn stm32wl_dual_core() -> Self {
        Self {
            lines: 32,
            configurable_mask: low_bits(32),
            direct_lines_pass_through: false,
            direct_lines_ignore_mask: false,
            imr_reset: 0,
            cores: 2,
            layout: ExtiLayout {
                core_stride: 0x40,
                ..ExtiLayout::STM32F1
            },
            mux: None,
        }
    }

    /// 23 lines, GPIO port selection inside the EXTI block, split pending
    /// registers for rising and falling edges.
    pub fn stm32u5() -> Self {
        Self {
            lines: 23,
            configurable_mask: low_bits(23),
            direct_lines_pass_through: false,
            direct_lines_ignore_mask: false,
            imr_reset: 0,
            cores: 1,
            layout: ExtiLayout {
                rtsr: 0x00,
                ftsr: 0x04,
                swier: 0x08,
                pr: 0x0C,
                fpr: Some(0x10),
                imr: 0x80,
                emr: 0x84,
                bank_stride: 0x20,
                core_stride: 0,
            },
            mux: Some(ExtiMux {
                offset: 0x60,
                bits_per_line: 8,
                muxed_lines: PINS_PER_PORT,
                ports: 8,
            }),
        }
    }

    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "stm32f1" => Some(Self::stm32f1()),
            "stm32l4" => Some(Self::stm32l4()),
            "stm32wl_dual_core" => Some(Self::stm32wl_dual_core()),
            "stm32u5" => Some(Self::stm32u5()),
            _ => None,
        }
    }

    fn banks(&self) -> usize {
        self.lines.div_ceil(32)
    }

    /// Number of addressable inputs.
    pub fn inputs(&self) -> usize {
        match &self.mux {
            Some(mux) => mux.ports * PINS_PER_PORT + (self.lines - mux.muxed_lines),
            None => self.lines,
        }
    }

    fn validate(&self) -> Result<(), IntcError> {
        let invalid = |reason: String| IntcError::InvalidConfiguration {
            controller: "exti",
            reason,
        };
        if self.lines == 0 || self.lines > 64 {
            return Err(invalid(format!("line count {} must be in 1..=64", self.lines)));
        }
        if self.cores == 0 {
            return Err(invalid("at least one core is required".into()));
        }
        if self.cores > 1 && self.layout.core_stride == 0 {
            return Err(invalid("multi-core layout needs a core stride".into()));
        }
        if self.configurable_mask & !low_bits(self.lines) != 0 {
            return Err(invalid("configurable mask names lines that do not exist".into()));
        }
        if let Some(mux) = &self.mux {
            if mux.muxed_lines == 0 || mux.muxed_lines > PINS_PER_PORT.min(self.lines) {
                return Err(invalid(format!(
                    "{} muxed lines do not fit {} lines",
                    mux.muxed_lines, self.lines
                )));
            }
            if mux.bits_per_line == 0
                || mux.bits_per_line > 8
                || mux.ports == 0
                || mux.ports > 1 << mux.bits_per_line
            {
                return Err(invalid(format!(
                    "{} ports cannot be selected with {} bits",
                    mux.ports, mux.bits_per_line
                )));
            }
        }
        Ok(())
    }

    fn offset(&self, base: u64, core: usize, bank: usize) -> u64 {
        base + core as u64 * self.layout.core_stride + bank as u64 * self.layout.bank_stride
    }

    fn bank_width(&self, bank: usize) -> u32 {
        (self.lines - bank * 32).min(32) as u32
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Triggers {
    imr: u64,
    rtsr: u64,
    ftsr: u64,
}

#[derive(Debug)]
pub struct ExtiState {
    desc: ExtiDescriptor,
    regs: RegisterFile,
    /// Raw level of every input.
    inputs: Vec<bool>,
    /// Level of the input currently selected for each line.
    line_levels: u64,
    /// Selected port per muxed line.
    port_select: Vec<usize>,
    /// Per-core IMR/RTSR/FTSR, rebuilt from the register file.
    triggers: Vec<Triggers>,
}

impl HasRegisters for ExtiState {
    fn registers(&self) -> &RegisterFile {
        &self.regs
    }
    fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.regs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    Rising,
    Falling,
}

impl ExtiState {
    fn new(desc: ExtiDescriptor) -> Self {
        Self {
            desc,
            regs: RegisterFile::default(),
            inputs: vec![false; desc.inputs()],
            line_levels: 0,
            port_select: vec![0; desc.mux.map_or(0, |m| m.muxed_lines)],
            triggers: vec![Triggers::default(); desc.cores],
        }
    }

    fn read_lines(&self, base: u64, core: usize) -> u64 {
        (0..self.desc.banks()).fold(0, |acc, bank| {
            let word = self.regs.get(self.desc.offset(base, core, bank)) as u64;
            acc | (word << (32 * bank))
        })
    }

    fn sync_triggers(&mut self, core: usize) {
        let layout = self.desc.layout;
        self.triggers[core] = Triggers {
            imr: self.read_lines(layout.imr, core),
            rtsr: self.read_lines(layout.rtsr, core),
            ftsr: self.read_lines(layout.ftsr, core),
        };
    }

    fn sync_port_select(&mut self) {
        let Some(mux) = self.desc.mux else {
            return;
        };
        for line in 0..mux.muxed_lines {
            let (offset, position) = mux_slot(&mux, line);
            self.port_select[line] = self.regs.field(offset, position, mux.bits_per_line) as usize;
        }
    }

    fn pending(&self, core: usize) -> u64 {
        let layout = self.desc.layout;
        let rising = self.read_lines(layout.pr, core);
        match layout.fpr {
            Some(fpr) => rising | self.read_lines(fpr, core),
            None => rising,
        }
    }

    fn set_pending(&mut self, core: usize, line: usize, edge: Edge) {
        let layout = self.desc.layout;
        let base = match (edge, layout.fpr) {
            (Edge::Falling, Some(fpr)) => fpr,
            _ => layout.pr,
        };
        let offset = self.desc.offset(base, core, line / 32);
        self.regs.set_flag(offset, (line % 32) as u32, true);
        trace!("EXTI core {} line {} pending ({:?} edge)", core, line, edge);
    }

    /// Handles a level change on `line`.
    fn process(&mut self, line: usize, value: bool) {
        let bit = 1u64 << line;
        if value {
            self.line_levels |= bit;
        } else {
            self.line_levels &= !bit;
        }

        if self.desc.configurable_mask & bit == 0 {
            if !self.desc.direct_lines_pass_through {
                warn!("EXTI line {} is not configurable, dropping event", line);
            }
            return;
        }

        for core in 0..self.desc.cores {
            let t = self.triggers[core];
            if t.imr & bit == 0 {
                continue;
            }
            if value && t.rtsr & bit != 0 {
                self.set_pending(core, line, Edge::Rising);
            } else if !value && t.ftsr & bit != 0 {
                self.set_pending(core, line, Edge::Falling);
            }
        }
    }

    fn line_level(&self, line: usize) -> bool {
        self.line_levels & (1 << line) != 0
    }

    fn remap(&mut self, line: usize, port: usize) {
        let Some(mux) = self.desc.mux else {
            return;
        };
        self.port_select[line] = port;
        let level = if port < mux.ports {
            self.inputs[port * PINS_PER_PORT + line]
        } else {
            warn!("EXTI line {} mapped to non-existing port {}", line, port);
            false
        };
        if level != self.line_level(line) {
            self.process(line, level);
        }
    }

    fn software_trigger(&mut self, core: usize, bank: usize, bits: u32) {
        for i in 0..32 {
            let line = bank * 32 + i;
            let bit = 1u64 << line;
            if bits & (1 << i) == 0 || line >= self.desc.lines {
                continue;
            }
            if self.desc.configurable_mask & bit != 0 && self.triggers[core].imr & bit != 0 {
                self.set_pending(core, line, Edge::Rising);
            }
        }
    }

    fn outputs(&self) -> OutputBatch {
        let mut batch = OutputBatch::default();
        let lines = self.desc.lines;
        for core in 0..self.desc.cores {
            let imr = self.triggers[core].imr;
            let pending = self.pending(core) & imr;
            let direct_enable = if self.desc.direct_lines_ignore_mask {
                u64::MAX
            } else {
                imr
            };
            let direct = if self.desc.direct_lines_pass_through {
                self.line_levels & direct_enable & !self.desc.configurable_mask
            } else {
                0
            };
            let active = (pending & self.desc.configurable_mask) | direct;
            for line in 0..lines {
                batch.set(core * lines + line, active & (1 << line) != 0);
            }
        }
        batch
    }
}

fn mux_slot(mux: &ExtiMux, line: usize) -> (u64, u32) {
    let per_register = (32 / mux.bits_per_line) as usize;
    let offset = mux.offset + 4 * (line / per_register) as u64;
    let position = (line % per_register) as u32 * mux.bits_per_line;
    (offset, position)
}

type Field = FieldDescriptor<ExtiState>;

fn build_register_map(desc: &ExtiDescriptor) -> Result<RegisterMap<ExtiState>, IntcError> {
    let layout = desc.layout;
    let mut fields = Vec::new();

    for core in 0..desc.cores {
        for bank in 0..desc.banks() {
            let width = desc.bank_width(bank);
            let at = |base: u64| desc.offset(base, core, bank);
            let suffix = format!("{}_C{}", bank + 1, core);
            let imr_reset = ((desc.imr_reset >> (32 * bank)) & low_bits(width as usize)) as u32;

            fields.push(
                Field::new(format!("IMR{}", suffix), at(layout.imr), 0, width, FieldMode::READ_WRITE)
                    .with_reset(imr_reset)
                    .on_change(move |st, _, _| st.sync_triggers(core)),
            );
            fields.push(Field::new(
                format!("EMR{}", suffix),
                at(layout.emr),
                0,
                width,
                FieldMode::READ_WRITE,
            ));
            fields.push(
                Field::new(format!("RTSR{}", suffix), at(layout.rtsr), 0, width, FieldMode::READ_WRITE)
                    .on_change(move |st, _, _| st.sync_triggers(core)),
            );
            fields.push(
                Field::new(format!("FTSR{}", suffix), at(layout.ftsr), 0, width, FieldMode::READ_WRITE)
                    .on_change(move |st, _, _| st.sync_triggers(core)),
            );

            let swier = at(layout.swier);
            fields.push(
                Field::new(format!("SWIER{}", suffix), swier, 0, width, FieldMode::READ_WRITE)
                    .on_write(move |st, old, written| {
                        st.software_trigger(core, bank, written & !old)
                    }),
            );

            let clear_swier = move |st: &mut ExtiState, old: u32, written: u32| {
                let cleared = old & written;
                let value = st.regs.get(swier) & !cleared;
                st.regs.set(swier, value);
            };
            fields.push(
                Field::new(format!("PR{}", suffix), at(layout.pr), 0, width, FieldMode::W1C)
                    .on_write(clear_swier),
            );
            if let Some(fpr) = layout.fpr {
                fields.push(
                    Field::new(format!("FPR{}", suffix), at(fpr), 0, width, FieldMode::W1C)
                        .on_write(clear_swier),
                );
            }
        }
    }

    if let Some(mux) = desc.mux {
        for line in 0..mux.muxed_lines {
            let (offset, position) = mux_slot(&mux, line);
            fields.push(
                Field::new(
                    format!("EXTI{}", line),
                    offset,
                    position,
                    mux.bits_per_line,
                    FieldMode::READ_WRITE,
                )
                .on_change(move |st, _, port| st.remap(line, port as usize)),
            );
        }
    }

    RegisterMap::new(fields)
}

#[derive(Debug)]
pub struct Exti {
    desc: ExtiDescriptor,
    state: Mutex<ExtiState>,
    registers: RegisterMap<ExtiState>,
    outputs: Vec<GpioLine>,
}

impl Exti {
    pub fn new(desc: ExtiDescriptor) -> Result<Self, IntcError> {
        desc.validate()?;
        let registers = build_register_map(&desc)?;
        let mut state = ExtiState::new(desc);
        registers.reset(&mut state);
        for core in 0..desc.cores {
            state.sync_triggers(core);
        }
        Ok(Self {
            desc,
            state: Mutex::new(state),
            registers,
            outputs: GpioLine::bank(desc.cores * desc.lines),
        })
    }

    pub fn descriptor(&self) -> &ExtiDescriptor {
        &self.desc
    }

    fn update<R>(&self, f: impl FnOnce(&mut ExtiState) -> R) -> R {
        let (result, batch) = {
            let mut state = lock_state(&self.state);
            let result = f(&mut state);
            (result, state.outputs())
        };
        batch.apply(&self.outputs);
        result
    }

    /// Output line of `line` as seen by `core`.
    pub fn output(&self, core: usize, line: usize) -> Option<&GpioLine> {
        if line >= self.desc.lines {
            return None;
        }
        self.outputs.get(core * self.desc.lines + line)
    }

    /// Pending lines of `core`, one bit per line.
    pub fn pending(&self, core: usize) -> u64 {
        if core >= self.desc.cores {
            return 0;
        }
        lock_state(&self.state).pending(core)
    }

    /// Maps an input number onto the line it feeds, if the line currently
    /// listens to it.
    fn route(&self, state: &ExtiState, number: usize) -> Option<usize> {
        match &self.desc.mux {
            Some(mux) => {
                let muxed_inputs = mux.ports * PINS_PER_PORT;
                if number < muxed_inputs {
                    let (port, pin) = (number / PINS_PER_PORT, number % PINS_PER_PORT);
                    (pin < mux.muxed_lines && state.port_select[pin] == port).then_some(pin)
                } else {
                    Some(mux.muxed_lines + number - muxed_inputs)
                }
            }
            None => Some(number),
        }
    }
}

impl Peripheral for Exti {
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
            st.inputs.iter_mut().for_each(|i| *i = false);
            st.line_levels = 0;
            st.sync_port_select();
            for core in 0..self.desc.cores {
                st.sync_triggers(core);
            }
        });
    }

    fn size(&self) -> u64 {
        EXTI_SIZE
    }
}

impl GpioReceiver for Exti {
    fn on_gpio(&self, number: usize, value: bool) {
        let inputs = self.desc.inputs();
        if number >= inputs {
            error!("EXTI input {} is out of range [0; {})", number, inputs);
            return;
        }
        self.update(|st| {
            st.inputs[number] = value;
            let Some(line) = self.route(st, number) else {
                return;
            };
            if st.line_level(line) != value {
                st.process(line, value);
            }
        });
    }
}

impl NumberedGpioOutput for Exti {
    fn connections(&self) -> &[GpioLine] {
        &self.outputs
    }
}
