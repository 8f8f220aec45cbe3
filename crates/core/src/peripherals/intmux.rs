// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! NXP INTMUX: folds 32 shared sources into a few channel outputs.

use std::sync::Mutex;

use tracing::{error, trace};

use crate::registers::{FieldMode, FieldDescriptor, HasRegisters, RegisterFile, RegisterMap};
use crate::signals::{GpioLine, GpioReceiver, NumberedGpioOutput, OutputBatch};
use crate::{lock_state, IntcError, Peripheral, SimResult};

pub const INTMUX_SIZE: u64 = 0x1000;
pub const INTMUX_SOURCES: usize = 32;
pub const MAX_CHANNELS: usize = 8;

const CHANNEL_STRIDE: u64 = 0x40;
const CSR: u64 = 0x00;
const VEC: u64 = 0x04;
const IER: u64 = 0x10;
const IPR: u64 = 0x20;

const CSR_RST: u32 = 0;
const CSR_AND: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntmuxConfig {
    pub channels: usize,
    /// Added to the source index when reporting VEC.
    pub vector_base: u32,
}

impl Default for IntmuxConfig {
    fn default() -> Self {
        Self {
            channels: MAX_CHANNELS,
            vector_base: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Channel {
    enabled: u32,
    and_mode: bool,
}

#[derive(Debug)]
pub struct IntmuxState {
    levels: u32,
    channels: Vec<Channel>,
    vector_base: u32,
    regs: RegisterFile,
}

impl HasRegisters for IntmuxState {
    fn registers(&self) -> &RegisterFile {
        &self.regs
    }
    fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.regs
    }
}

fn channel_offset(ch: usize, reg: u64) -> u64 {
    ch as u64 * CHANNEL_STRIDE + reg
}

impl IntmuxState {
    fn sync_channel(&mut self, ch: usize) {
        self.channels[ch] = Channel {
            enabled: self.regs.get(channel_offset(ch, IER)),
            and_mode: self.regs.flag(channel_offset(ch, CSR), CSR_AND),
        };
    }

    fn reset_channel(&mut self, ch: usize) {
        trace!("INTMUX channel {} reset", ch);
        self.regs.set_flag(channel_offset(ch, CSR), CSR_AND, false);
        self.regs.set(channel_offset(ch, IER), 0);
        self.sync_channel(ch);
    }

    fn pending(&self, ch: usize) -> u32 {
        self.levels & self.channels[ch].enabled
    }

    fn is_asserted(&self, ch: usize) -> bool {
        let channel = self.channels[ch];
        let pending = self.pending(ch);
        if channel.and_mode {
            channel.enabled != 0 && pending == channel.enabled
        } else {
            pending != 0
        }
    }

    fn vector(&self, ch: usize) -> u32 {
        let pending = self.pending(ch);
        if pending == 0 {
            return 0;
        }
        (self.vector_base + pending.trailing_zeros()) << 2
    }

    fn outputs(&self) -> OutputBatch {
        let mut batch = OutputBatch::default();
        for ch in 0..self.channels.len() {
            batch.set(ch, self.is_asserted(ch));
        }
        batch
    }
}

type Field = FieldDescriptor<IntmuxState>;

fn build_register_map(config: &IntmuxConfig) -> Result<RegisterMap<IntmuxState>, IntcError> {
    let mut fields = Vec::new();
    for ch in 0..config.channels {
        let csr = channel_offset(ch, CSR);
        fields.push(
            Field::flag(format!("CH{}_CSR_RST", ch), csr, CSR_RST, FieldMode::WRITE).on_write(
                move |st, _, written| {
                    if written != 0 {
                        st.reset_channel(ch);
                    }
                },
            ),
        );
        fields.push(
            Field::flag(format!("CH{}_CSR_AND", ch), csr, CSR_AND, FieldMode::READ_WRITE)
                .on_change(move |st, _, _| st.sync_channel(ch)),
        );
        fields.push(Field::new(format!("CH{}_CSR_IRQN", ch), csr, 4, 2, FieldMode::READ));
        fields.push(
            Field::new(format!("CH{}_CSR_CHIN", ch), csr, 8, 4, FieldMode::READ)
                .with_reset(ch as u32),
        );
        fields.push(
            Field::flag(format!("CH{}_CSR_IRQP", ch), csr, 31, FieldMode::READ)
                .on_read(move |st, _| st.is_asserted(ch) as u32),
        );
        fields.push(
            Field::word(format!("CH{}_VEC", ch), channel_offset(ch, VEC), FieldMode::READ)
                .on_read(move |st, _| st.vector(ch)),
        );
        fields.push(
            Field::word(format!("CH{}_IER", ch), channel_offset(ch, IER), FieldMode::READ_WRITE)
                .on_change(move |st, _, _| st.sync_channel(ch)),
        );
        fields.push(
            Field::word(format!("CH{}_IPR", ch), channel_offset(ch, IPR), FieldMode::READ)
                .on_read(move |st, _| st.pending(ch)),
        );
    }
    RegisterMap::new(fields)
}

#[derive(Debug)]
pub struct Intmux {
    config: IntmuxConfig,
    state: Mutex<IntmuxState>,
    registers: RegisterMap<IntmuxState>,
    outputs: Vec<GpioLine>,
}

impl Intmux {
    pub fn new(config: IntmuxConfig) -> Result<Self, IntcError> {
        if config.channels == 0 || config.channels > MAX_CHANNELS {
            return Err(IntcError::InvalidConfiguration {
                controller: "intmux",
                reason: format!(
                    "channel count {} must be in 1..={}",
                    config.channels, MAX_CHANNELS
                ),
            });
        }
        let registers = build_register_map(&config)?;
        let mut state = IntmuxState {
            levels: 0,
            channels: vec![Channel::default(); config.channels],
            vector_base: config.vector_base,
            regs: RegisterFile::default(),
        };
        registers.reset(&mut state);
        Ok(Self {
            config,
            state: Mutex::new(state),
            registers,
            outputs: GpioLine::bank(config.channels),
        })
    }

    fn update<R>(&self, f: impl FnOnce(&mut IntmuxState) -> R) -> R {
        let (result, batch) = {
            let mut state = lock_state(&self.state);
            let result = f(&mut state);
            (result, state.outputs())
        };
        batch.apply(&self.outputs);
        result
    }

    pub fn config(&self) -> &IntmuxConfig {
        &self.config
    }
}

impl Peripheral for Intmux {
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
            st.levels = 0;
            for ch in 0..st.channels.len() {
                st.sync_channel(ch);
            }
        });
    }

    fn size(&self) -> u64 {
        INTMUX_SIZE
    }
}

impl GpioReceiver for Intmux {
    fn on_gpio(&self, number: usize, value: bool) {
        if number >= INTMUX_SOURCES {
            error!(
                "INTMUX source {} is out of range [0; {})",
                number, INTMUX_SOURCES
            );
            return;
        }
        self.update(|st| {
            if value {
                st.levels |= 1 << number;
            } else {
                st.levels &= !(1 << number);
            }
        });
    }
}

impl NumberedGpioOutput for Intmux {
    fn connections(&self) -> &[GpioLine] {
        &self.outputs
    }
}
