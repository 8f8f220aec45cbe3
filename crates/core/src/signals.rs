// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::lock_state;

/// Represents a digital signal level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigitalLevel {
    #[default]
    Low,
    High,
}

impl From<bool> for DigitalLevel {
    fn from(b: bool) -> Self {
        if b {
            DigitalLevel::High
        } else {
            DigitalLevel::Low
        }
    }
}

impl From<DigitalLevel> for bool {
    fn from(level: DigitalLevel) -> Self {
        match level {
            DigitalLevel::High => true,
            DigitalLevel::Low => false,
        }
    }
}

/// Anything that accepts numbered input signals.
pub trait GpioReceiver: Send + Sync {
    fn on_gpio(&self, number: usize, value: bool);
}

/// Anything that drives numbered output signals.
pub trait NumberedGpioOutput {
    fn connections(&self) -> &[GpioLine];
}

#[derive(Clone)]
struct Endpoint {
    receiver: Arc<dyn GpioReceiver>,
    number: usize,
}

/// A boolean signal wire with fan-out.
///
/// Every level change is pushed synchronously to all connected endpoints,
/// on the calling thread, after the line's own locks are released. Setting
/// the current level again is a no-op.
#[derive(Default)]
pub struct GpioLine {
    level: Mutex<DigitalLevel>,
    endpoints: Mutex<Vec<Endpoint>>,
}

impl fmt::Debug for GpioLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpioLine")
            .field("level", &*lock_state(&self.level))
            .field("endpoints", &lock_state(&self.endpoints).len())
            .finish()
    }
}

impl GpioLine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `count` independent lines.
    pub fn bank(count: usize) -> Vec<GpioLine> {
        (0..count).map(|_| GpioLine::new()).collect()
    }

    pub fn set(&self, value: bool) {
        {
            let mut level = lock_state(&self.level);
            if bool::from(*level) == value {
                return;
            }
            *level = value.into();
        }
        let endpoints = lock_state(&self.endpoints).clone();
        for ep in endpoints {
            ep.receiver.on_gpio(ep.number, value);
        }
    }

    pub fn set_high(&self) {
        self.set(true);
    }

    pub fn unset(&self) {
        self.set(false);
    }

    /// Pulses the line: high, then low.
    pub fn blink(&self) {
        self.set(true);
        self.set(false);
    }

    pub fn is_set(&self) -> bool {
        self.level().into()
    }

    pub fn level(&self) -> DigitalLevel {
        *lock_state(&self.level)
    }

    pub fn connect(&self, receiver: Arc<dyn GpioReceiver>, number: usize) {
        lock_state(&self.endpoints).push(Endpoint { receiver, number });
    }

    pub fn disconnect_all(&self) {
        lock_state(&self.endpoints).clear();
    }

    pub fn endpoint_count(&self) -> usize {
        lock_state(&self.endpoints).len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOp {
    Set(bool),
    Blink,
}

/// Output changes collected while a controller holds its state lock.
#[derive(Debug, Default)]
pub struct OutputBatch {
    ops: Vec<(usize, LineOp)>,
}

impl OutputBatch {
    pub fn set(&mut self, index: usize, value: bool) {
        self.ops.push((index, LineOp::Set(value)));
    }

    pub fn blink(&mut self, index: usize) {
        self.ops.push((index, LineOp::Blink));
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Drives `lines` in the order the operations were recorded.
    pub fn apply(self, lines: &[GpioLine]) {
        for (index, op) in self.ops {
            let Some(line) = lines.get(index) else {
                tracing::error!("Output {} does not exist ({} outputs)", index, lines.len());
                continue;
            };
            match op {
                LineOp::Set(value) => line.set(value),
                LineOp::Blink => line.blink(),
            }
        }
    }
}

/// Receiver that records every callback it gets.
#[derive(Debug, Default)]
pub struct SignalProbe {
    events: Mutex<Vec<(usize, bool)>>,
    levels: Mutex<HashMap<usize, bool>>,
}

impl SignalProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<(usize, bool)> {
        lock_state(&self.events).clone()
    }

    /// Last value seen on input `number` (low if never driven).
    pub fn level(&self, number: usize) -> bool {
        lock_state(&self.levels)
            .get(&number)
            .copied()
            .unwrap_or(false)
    }

    pub fn clear(&self) {
        lock_state(&self.events).clear();
    }
}

impl GpioReceiver for SignalProbe {
    fn on_gpio(&self, number: usize, value: bool) {
        lock_state(&self.events).push((number, value));
        lock_state(&self.levels).insert(number, value);
    }
}
