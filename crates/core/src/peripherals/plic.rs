// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! RISC-V Platform-Level Interrupt Controller.

use std::collections::BTreeSet;
use std::sync::Mutex;

use tracing::{error, trace, warn};

use crate::interrupt::InterruptController;
use crate::registers::{FieldMode, FieldDescriptor, HasRegisters, RegisterFile, RegisterMap};
use crate::signals::{GpioLine, GpioReceiver, NumberedGpioOutput, OutputBatch};
use crate::{lock_state, IntcError, Peripheral, SimResult};

pub const PLIC_SIZE: u64 = 0x400_0000;

const PRIORITY_BITS: u32 = 3;
/// Largest value the priority and threshold registers can hold.
pub const MAX_PRIORITY: u32 = (1 << PRIORITY_BITS) - 1;
const PENDING_BASE: u64 = 0x1000;
const ENABLES_BASE: u64 = 0x2000;
const ENABLES_STRIDE: u64 = 0x80;
const CONTEXT_BASE: u64 = 0x20_0000;
const CONTEXT_STRIDE: u64 = 0x1000;
const MAX_TARGETS: usize = 15872;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlicConfig {
    pub sources: usize,
    pub targets: usize,
    pub priorities_enabled: bool,
}

impl PlicConfig {
    pub fn new(sources: usize) -> Self {
        Self {
            sources,
            targets: 1,
            priorities_enabled: true,
        }
    }

    fn enable_words(&self) -> usize {
        self.sources / 32 + 1
    }

    fn validate(&self) -> Result<(), IntcError> {
        let invalid = |reason: String| IntcError::InvalidConfiguration {
            controller: "plic",
            reason,
        };
        if self.sources == 0 {
            return Err(invalid("at least one source is required".into()));
        }
        if self.enable_words() as u64 * 4 > ENABLES_STRIDE {
            return Err(invalid(format!(
                "{} sources do not fit the {:#x}-byte enable window",
                self.sources, ENABLES_STRIDE
            )));
        }
        if self.targets == 0 || self.targets > MAX_TARGETS {
            return Err(invalid(format!(
                "target count {} must be in 1..={}",
                self.targets, MAX_TARGETS
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct IrqSource {
    priority: u32,
    state: bool,
    pending: bool,
    enabled_targets: BTreeSet<usize>,
}

impl IrqSource {
    fn new() -> Self {
        Self {
            // 1 is the lowest real priority; 0 means "never interrupt".
            priority: 1,
            state: false,
            pending: false,
            enabled_targets: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Target {
    threshold: u32,
    in_service: Vec<usize>,
}

#[derive(Debug)]
pub struct PlicState {
    /// Index 0 is a placeholder; sources are numbered from 1.
    sources: Vec<IrqSource>,
    targets: Vec<Target>,
    regs: RegisterFile,
}

impl HasRegisters for PlicState {
    fn registers(&self) -> &RegisterFile {
        &self.regs
    }
    fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.regs
    }
}

impl PlicState {
    fn new(config: &PlicConfig) -> Self {
        Self {
            sources: vec![IrqSource::new(); config.sources + 1],
            targets: vec![Target::default(); config.targets],
            regs: RegisterFile::default(),
        }
    }

    fn claim(&mut self, target: usize) -> u32 {
        let best = self
            .sources
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, s)| s.pending && s.priority != 0 && s.enabled_targets.contains(&target))
            .max_by(|(ia, a), (ib, b)| a.priority.cmp(&b.priority).then(ib.cmp(ia)))
            .map(|(id, _)| id);

        let Some(id) = best else {
            warn!("No pending interrupt to claim for target {}", target);
            return 0;
        };
        self.sources[id].pending = false;
        self.targets[target].in_service.push(id);
        trace!("Target {} claimed interrupt #{}", target, id);
        id as u32
    }

    fn complete(&mut self, target: usize, id: u32) {
        let Some(top) = self.targets[target].in_service.pop() else {
            warn!(
                "Target {} completed interrupt {} with nothing in service",
                target, id
            );
            return;
        };
        if top != id as usize {
            error!(
                "Target {} tried to complete interrupt {}, but {} is the active one",
                target, id, top
            );
            return;
        }
        let source = &mut self.sources[top];
        source.pending = source.state;
        trace!("Target {} completed interrupt #{}", target, id);
    }

    fn is_asserted(&self, target: usize) -> bool {
        let t = &self.targets[target];
        let current = t
            .in_service
            .last()
            .map(|&id| self.sources[id].priority)
            .unwrap_or(0);
        let limit = current.max(t.threshold);
        self.sources
            .iter()
            .skip(1)
            .any(|s| s.pending && s.priority > limit && s.enabled_targets.contains(&target))
    }

    fn outputs(&self) -> OutputBatch {
        let mut batch = OutputBatch::default();
        for t in 0..self.targets.len() {
            batch.set(t, self.is_asserted(t));
        }
        batch
    }

    fn pending_word(&self, word: usize) -> u32 {
        (0..32)
            .filter(|bit| {
                self.sources
                    .get(word * 32 + bit)
                    .is_some_and(|s| s.pending)
            })
            .fold(0, |acc, bit| acc | (1 << bit))
    }

    fn enable_word(&self, target: usize, word: usize) -> u32 {
        (0..32)
            .filter(|bit| {
                let id = word * 32 + bit;
                id != 0
                    && self
                        .sources
                        .get(id)
                        .is_some_and(|s| s.enabled_targets.contains(&target))
            })
            .fold(0, |acc, bit| acc | (1 << bit))
    }

    fn set_enable_word(&mut self, target: usize, word: usize, value: u32) {
        for bit in 0..32 {
            let id = word * 32 + bit;
            let enable = value & (1 << bit) != 0;
            if id == 0 {
                continue;
            }
            let Some(source) = self.sources.get_mut(id) else {
                if enable {
                    error!("Trying to enable non-existing source {}", id);
                }
                continue;
            };
            if enable {
                source.enabled_targets.insert(target);
            } else {
                source.enabled_targets.remove(&target);
            }
        }
    }
}

type Field = FieldDescriptor<PlicState>;

fn build_register_map(config: &PlicConfig) -> Result<RegisterMap<PlicState>, IntcError> {
    let mut fields = vec![
        Field::new("SOURCE0_PRIORITY", 0x0, 0, PRIORITY_BITS, FieldMode::READ).on_write(
            |_, _, value| {
                if value != 0 {
                    warn!("Trying to set priority {} for source 0, which is illegal", value);
                }
            },
        ),
    ];

    for s in 1..=config.sources {
        let priorities_enabled = config.priorities_enabled;
        fields.push(
            Field::new(
                format!("SOURCE{}_PRIORITY", s),
                4 * s as u64,
                0,
                PRIORITY_BITS,
                FieldMode::READ_WRITE,
            )
            .on_read(move |st, _| st.sources[s].priority)
            .on_write(move |st, _, value| {
                if priorities_enabled {
                    st.sources[s].priority = value;
                } else {
                    warn!(
                        "Priorities are disabled, ignoring priority {} for source {}",
                        value, s
                    );
                }
            }),
        );
    }

    let words = config.enable_words();
    for w in 0..words {
        fields.push(
            Field::word(
                format!("PENDING{}", w),
                PENDING_BASE + 4 * w as u64,
                FieldMode::READ,
            )
            .on_read(move |st, _| st.pending_word(w)),
        );
    }

    for t in 0..config.targets {
        for w in 0..words {
            fields.push(
                Field::word(
                    format!("TARGET{}_ENABLES{}", t, w),
                    ENABLES_BASE + ENABLES_STRIDE * t as u64 + 4 * w as u64,
                    FieldMode::READ_WRITE,
                )
                .on_read(move |st, _| st.enable_word(t, w))
                .on_write(move |st, _, value| st.set_enable_word(t, w, value)),
            );
        }

        let context = CONTEXT_BASE + CONTEXT_STRIDE * t as u64;
        fields.push(
            Field::new(
                format!("TARGET{}_THRESHOLD", t),
                context,
                0,
                PRIORITY_BITS,
                FieldMode::READ_WRITE,
            )
            .on_read(move |st, _| st.targets[t].threshold)
            .on_write(move |st, _, value| st.targets[t].threshold = value),
        );
        fields.push(
            Field::word(
                format!("TARGET{}_CLAIM_COMPLETE", t),
                context + 4,
                FieldMode::READ_WRITE,
            )
            .on_read(move |st, _| st.claim(t))
            .on_write(move |st, _, value| st.complete(t, value)),
        );
    }

    RegisterMap::new(fields)
}

/// PLIC with per-source priorities, per-target enables, thresholds and
/// nested claim/complete handling. One output line per target.
#[derive(Debug)]
pub struct Plic {
    config: PlicConfig,
    state: Mutex<PlicState>,
    registers: RegisterMap<PlicState>,
    outputs: Vec<GpioLine>,
}

impl Plic {
    pub fn new(config: PlicConfig) -> Result<Self, IntcError> {
        config.validate()?;
        let registers = build_register_map(&config)?;
        let mut state = PlicState::new(&config);
        registers.reset(&mut state);
        Ok(Self {
            config,
            state: Mutex::new(state),
            registers,
            outputs: GpioLine::bank(config.targets),
        })
    }

    pub fn config(&self) -> &PlicConfig {
        &self.config
    }

    fn update<R>(&self, f: impl FnOnce(&mut PlicState) -> R) -> R {
        let (result, batch) = {
            let mut state = lock_state(&self.state);
            let result = f(&mut state);
            (result, state.outputs())
        };
        batch.apply(&self.outputs);
        result
    }

    fn check_source(&self, source: usize) -> Result<(), IntcError> {
        if source < 1 || source > self.config.sources {
            return Err(IntcError::SourceOutOfRange {
                controller: "plic",
                number: source,
                first: 1,
                last: self.config.sources,
            });
        }
        Ok(())
    }

    fn check_target(&self, target: usize) -> bool {
        if target >= self.config.targets {
            error!(
                "Target {} does not exist ({} targets)",
                target, self.config.targets
            );
            return false;
        }
        true
    }

    pub fn try_on_gpio(&self, source: usize, value: bool) -> Result<(), IntcError> {
        self.check_source(source)?;
        self.update(|st| {
            trace!("Setting source #{} to {}", source, value);
            let s = &mut st.sources[source];
            s.state = value;
            s.pending |= value;
        });
        Ok(())
    }

    fn check_priority(value: u32, what: &str) -> Result<(), IntcError> {
        if value > MAX_PRIORITY {
            return Err(IntcError::InvalidConfiguration {
                controller: "plic",
                reason: format!("{} {} exceeds the maximum of {}", what, value, MAX_PRIORITY),
            });
        }
        Ok(())
    }

    pub fn set_priority(&self, source: usize, priority: u32) -> Result<(), IntcError> {
        self.check_source(source)?;
        Self::check_priority(priority, "priority")?;
        if !self.config.priorities_enabled {
            warn!(
                "Priorities are disabled, ignoring priority {} for source {}",
                priority, source
            );
            return Ok(());
        }
        self.update(|st| st.sources[source].priority = priority);
        Ok(())
    }

    pub fn priority(&self, source: usize) -> Option<u32> {
        lock_state(&self.state)
            .sources
            .get(source)
            .filter(|_| source != 0)
            .map(|s| s.priority)
    }

    pub fn enable_source(
        &self,
        target: usize,
        source: usize,
        enabled: bool,
    ) -> Result<(), IntcError> {
        self.check_source(source)?;
        if !self.check_target(target) {
            return Ok(());
        }
        self.update(|st| {
            let targets = &mut st.sources[source].enabled_targets;
            if enabled {
                targets.insert(target);
            } else {
                targets.remove(&target);
            }
        });
        Ok(())
    }

    pub fn set_threshold(&self, target: usize, threshold: u32) -> Result<(), IntcError> {
        Self::check_priority(threshold, "threshold")?;
        if self.check_target(target) {
            self.update(|st| st.targets[target].threshold = threshold);
        }
        Ok(())
    }

    pub fn claim(&self, target: usize) -> u32 {
        if !self.check_target(target) {
            return 0;
        }
        self.update(|st| st.claim(target))
    }

    pub fn complete(&self, target: usize, source: u32) {
        if self.check_target(target) {
            self.update(|st| st.complete(target, source));
        }
    }

    pub fn is_pending(&self, source: usize) -> bool {
        source != 0
            && lock_state(&self.state)
                .sources
                .get(source)
                .is_some_and(|s| s.pending)
    }

    /// In-service stack of `target`, oldest first.
    pub fn in_service(&self, target: usize) -> Vec<u32> {
        lock_state(&self.state)
            .targets
            .get(target)
            .map(|t| t.in_service.iter().map(|&id| id as u32).collect())
            .unwrap_or_default()
    }

    pub fn registers(&self) -> &RegisterMap<PlicState> {
        &self.registers
    }
}

impl Peripheral for Plic {
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
            st.sources.iter_mut().for_each(|s| *s = IrqSource::new());
            st.targets.iter_mut().for_each(|t| *t = Target::default());
        });
    }

    fn size(&self) -> u64 {
        PLIC_SIZE
    }
}

impl GpioReceiver for Plic {
    fn on_gpio(&self, number: usize, value: bool) {
        if let Err(e) = self.try_on_gpio(number, value) {
            error!("{}", e);
        }
    }
}

impl NumberedGpioOutput for Plic {
    fn connections(&self) -> &[GpioLine] {
        &self.outputs
    }
}

/// Target 0 view, as seen by the hart wired to the first context.
impl InterruptController for Plic {
    fn set_interrupt_pending(&self, irq: u32, pending: bool) {
        self.on_gpio(irq as usize, pending);
    }

    fn is_interrupt_active(&self, irq: u32) -> bool {
        let st = lock_state(&self.state);
        irq != 0
            && st.sources.get(irq as usize).is_some_and(|s| {
                s.pending && s.priority != 0 && s.enabled_targets.contains(&0)
            })
    }

    fn acknowledge_interrupt(&self) -> Option<u32> {
        match self.claim(0) {
            0 => None,
            id => Some(id),
        }
    }

    fn complete_interrupt(&self, irq: u32) {
        self.complete(0, irq);
    }
}
