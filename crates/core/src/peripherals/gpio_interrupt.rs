// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Level/edge interrupt detection for a bank of GPIO pins.
//!
//! The manager holds no lock of its own; it lives inside a controller's
//! state and is driven under that controller's mutex.

use tracing::{error, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterruptTrigger {
    #[default]
    ActiveLow,
    ActiveHigh,
    RisingEdge,
    FallingEdge,
    BothEdges,
}

impl InterruptTrigger {
    pub fn is_edge(self) -> bool {
        !matches!(self, Self::ActiveLow | Self::ActiveHigh)
    }

    /// Whether a transition to `level` fires an edge-triggered interrupt.
    pub fn fires_on_edge(self, level: bool) -> bool {
        match self {
            Self::RisingEdge => level,
            Self::FallingEdge => !level,
            Self::BothEdges => true,
            Self::ActiveLow | Self::ActiveHigh => false,
        }
    }

    /// Interrupt state implied by `level`, for level-triggered kinds only.
    pub fn level_state(self, level: bool) -> Option<bool> {
        match self {
            Self::ActiveHigh => Some(level),
            Self::ActiveLow => Some(!level),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GpioInterruptManager {
    state: Vec<bool>,
    previous: Vec<bool>,
    triggers: Vec<InterruptTrigger>,
    enabled: Vec<bool>,
    active: Vec<bool>,
    /// Level-triggered pins drop their active flag as soon as the level goes
    /// away instead of waiting for an explicit clear.
    pub deassert_active_level: bool,
}

impl GpioInterruptManager {
    pub fn new(pins: usize) -> Self {
        Self {
            state: vec![false; pins],
            previous: vec![false; pins],
            triggers: vec![InterruptTrigger::default(); pins],
            enabled: vec![false; pins],
            active: vec![false; pins],
            deassert_active_level: false,
        }
    }

    pub fn pins(&self) -> usize {
        self.state.len()
    }

    fn check(&self, pin: usize) -> bool {
        if pin >= self.pins() {
            error!("GPIO pin {} is out of range [0; {})", pin, self.pins());
            return false;
        }
        true
    }

    pub fn set_input(&mut self, pin: usize, value: bool) {
        if self.check(pin) {
            self.state[pin] = value;
        }
    }

    pub fn input(&self, pin: usize) -> bool {
        self.state.get(pin).copied().unwrap_or(false)
    }

    pub fn trigger(&self, pin: usize) -> InterruptTrigger {
        self.triggers.get(pin).copied().unwrap_or_default()
    }

    pub fn set_trigger(&mut self, pin: usize, trigger: InterruptTrigger) {
        if self.check(pin) {
            self.triggers[pin] = trigger;
        }
    }

    pub fn is_enabled(&self, pin: usize) -> bool {
        self.enabled.get(pin).copied().unwrap_or(false)
    }

    pub fn set_enabled(&mut self, pin: usize, value: bool) {
        if self.check(pin) {
            self.enabled[pin] = value;
        }
    }

    pub fn is_active(&self, pin: usize) -> bool {
        self.active.get(pin).copied().unwrap_or(false)
    }

    /// Input levels packed LSB-first.
    pub fn input_bits(&self) -> u32 {
        pack(&self.state)
    }

    /// Active flags packed LSB-first.
    pub fn active_bits(&self) -> u32 {
        pack(&self.active)
    }

    /// Level of the combined interrupt line.
    pub fn is_asserted(&self) -> bool {
        self.active
            .iter()
            .zip(&self.enabled)
            .any(|(&active, &enabled)| active && enabled)
    }

    /// Re-evaluates every enabled pin against its trigger and returns the
    /// combined interrupt level.
    pub fn refresh(&mut self) -> bool {
        for pin in 0..self.pins() {
            let level = self.state[pin];
            let changed = level != self.previous[pin];
            let trigger = self.triggers[pin];
            if self.enabled[pin] {
                let active = &mut self.active[pin];
                match trigger.level_state(level) {
                    Some(state) if self.deassert_active_level => *active = state,
                    Some(state) => *active |= state,
                    None => *active |= changed && trigger.fires_on_edge(level),
                }
            }
            self.previous[pin] = level;
        }
        let asserted = self.is_asserted();
        trace!("GPIO interrupt line refreshed: {}", asserted);
        asserted
    }

    /// Drops the active flag of `pin` and re-evaluates.
    pub fn clear(&mut self, pin: usize) -> bool {
        if self.check(pin) {
            self.active[pin] = false;
        }
        self.refresh()
    }

    pub fn reset(&mut self) {
        for v in [
            &mut self.state,
            &mut self.previous,
            &mut self.enabled,
            &mut self.active,
        ] {
            v.iter_mut().for_each(|b| *b = false);
        }
        self.triggers
            .iter_mut()
            .for_each(|t| *t = InterruptTrigger::default());
    }
}

fn pack(bits: &[bool]) -> u32 {
    bits.iter()
        .take(32)
        .enumerate()
        .filter(|(_, &b)| b)
        .fold(0, |acc, (i, _)| acc | (1 << i))
}
