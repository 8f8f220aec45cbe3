// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Declarative register fields.
//!
//! A controller describes its registers as a flat table of [`FieldDescriptor`]s.
//! The table is validated once into a [`RegisterMap`] and then shared
//! immutably; the stored bits live in a [`RegisterFile`] inside the
//! controller's locked state, so hooks run with that state borrowed mutably.

use std::collections::BTreeMap;
use std::fmt;

use bitflags::bitflags;
use tracing::debug;

use crate::IntcError;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FieldMode: u16 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const SET = 1 << 2;
        const TOGGLE = 1 << 3;
        const WRITE_ONE_TO_CLEAR = 1 << 4;
        const WRITE_ZERO_TO_CLEAR = 1 << 5;
        const READ_TO_CLEAR = 1 << 6;

        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
        const W1C = Self::READ.bits() | Self::WRITE_ONE_TO_CLEAR.bits();
        const W0C = Self::READ.bits() | Self::WRITE_ZERO_TO_CLEAR.bits();
    }
}

impl FieldMode {
    const WRITE_MODES: FieldMode = FieldMode::WRITE
        .union(FieldMode::SET)
        .union(FieldMode::TOGGLE)
        .union(FieldMode::WRITE_ONE_TO_CLEAR)
        .union(FieldMode::WRITE_ZERO_TO_CLEAR);

    pub fn write_mode(self) -> FieldMode {
        self & Self::WRITE_MODES
    }

    pub fn is_readable(self) -> bool {
        self.contains(FieldMode::READ)
    }

    pub fn is_writable(self) -> bool {
        !self.write_mode().is_empty()
    }
}

pub type ReadHook<S> = Box<dyn Fn(&mut S, u32) -> u32 + Send + Sync>;
pub type WriteHook<S> = Box<dyn Fn(&mut S, u32, u32) + Send + Sync>;

/// One bit field of a 32-bit register.
pub struct FieldDescriptor<S> {
    pub name: String,
    pub offset: u64,
    pub position: u32,
    pub width: u32,
    pub mode: FieldMode,
    pub reset: u32,
    on_read: Option<ReadHook<S>>,
    on_write: Option<WriteHook<S>>,
    on_change: Option<WriteHook<S>>,
}

impl<S> fmt::Debug for FieldDescriptor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("offset", &format_args!("{:#x}", self.offset))
            .field("position", &self.position)
            .field("width", &self.width)
            .field("mode", &self.mode)
            .field("reset", &self.reset)
            .finish()
    }
}

impl<S> FieldDescriptor<S> {
    pub fn new(
        name: impl Into<String>,
        offset: u64,
        position: u32,
        width: u32,
        mode: FieldMode,
    ) -> Self {
        Self {
            name: name.into(),
            offset,
            position,
            width,
            mode,
            reset: 0,
            on_read: None,
            on_write: None,
            on_change: None,
        }
    }

    pub fn flag(name: impl Into<String>, offset: u64, bit: u32, mode: FieldMode) -> Self {
        Self::new(name, offset, bit, 1, mode)
    }

    /// A whole 32-bit register.
    pub fn word(name: impl Into<String>, offset: u64, mode: FieldMode) -> Self {
        Self::new(name, offset, 0, 32, mode)
    }

    pub fn with_reset(mut self, reset: u32) -> Self {
        self.reset = reset;
        self
    }

    /// Value provider; its result is also stored as the field's value.
    pub fn on_read(mut self, hook: impl Fn(&mut S, u32) -> u32 + Send + Sync + 'static) -> Self {
        self.on_read = Some(Box::new(hook));
        self
    }

    /// Called with `(old, written)` after every write, whatever the mode.
    pub fn on_write(mut self, hook: impl Fn(&mut S, u32, u32) + Send + Sync + 'static) -> Self {
        self.on_write = Some(Box::new(hook));
        self
    }

    /// Called with `(old, new)` when a write or read-clear changed the value.
    pub fn on_change(mut self, hook: impl Fn(&mut S, u32, u32) + Send + Sync + 'static) -> Self {
        self.on_change = Some(Box::new(hook));
        self
    }

    /// Unshifted all-ones value of the field.
    pub fn max_value(&self) -> u32 {
        if self.width >= 32 {
            u32::MAX
        } else {
            (1u32 << self.width) - 1
        }
    }

    pub fn mask(&self) -> u32 {
        self.max_value() << self.position
    }

    fn extract(&self, register: u32) -> u32 {
        (register >> self.position) & self.max_value()
    }

    fn validate(&self) -> Result<(), IntcError> {
        let layout_error = |reason: String| IntcError::RegisterLayout {
            offset: self.offset,
            reason,
        };
        if self.width == 0 || self.width > 32 {
            return Err(layout_error(format!(
                "field '{}' has invalid width {}",
                self.name, self.width
            )));
        }
        if self.position + self.width > 32 {
            return Err(layout_error(format!(
                "field '{}' at bit {} width {} exceeds 32 bits",
                self.name, self.position, self.width
            )));
        }
        if self.mode.write_mode().bits().count_ones() > 1 {
            return Err(layout_error(format!(
                "field '{}' has more than one write mode ({:?})",
                self.name, self.mode
            )));
        }
        if self.reset > self.max_value() {
            return Err(layout_error(format!(
                "field '{}' reset value {:#x} does not fit",
                self.name, self.reset
            )));
        }
        Ok(())
    }
}

/// Backing store of register values, keyed by offset.
#[derive(Debug, Default, Clone)]
pub struct RegisterFile {
    values: BTreeMap<u64, u32>,
}

impl RegisterFile {
    pub fn get(&self, offset: u64) -> u32 {
        self.values.get(&offset).copied().unwrap_or(0)
    }

    pub fn set(&mut self, offset: u64, value: u32) {
        self.values.insert(offset, value);
    }

    pub fn field(&self, offset: u64, position: u32, width: u32) -> u32 {
        let mask = if width >= 32 { u32::MAX } else { (1u32 << width) - 1 };
        (self.get(offset) >> position) & mask
    }

    pub fn set_field(&mut self, offset: u64, position: u32, width: u32, value: u32) {
        let mask = if width >= 32 { u32::MAX } else { (1u32 << width) - 1 };
        let reg = self.get(offset) & !(mask << position);
        self.set(offset, reg | ((value & mask) << position));
    }

    pub fn flag(&self, offset: u64, bit: u32) -> bool {
        self.get(offset) & (1 << bit) != 0
    }

    pub fn set_flag(&mut self, offset: u64, bit: u32, value: bool) {
        self.set_field(offset, bit, 1, value as u32);
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Access to the register file embedded in a controller's state.
pub trait HasRegisters {
    fn registers(&self) -> &RegisterFile;
    fn registers_mut(&mut self) -> &mut RegisterFile;
}

/// Validated, immutable table of register fields.
pub struct RegisterMap<S> {
    fields: Vec<FieldDescriptor<S>>,
    by_offset: BTreeMap<u64, Vec<usize>>,
}

impl<S> fmt::Debug for RegisterMap<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterMap")
            .field("registers", &self.by_offset.len())
            .field("fields", &self.fields.len())
            .finish()
    }
}

impl<S: HasRegisters> RegisterMap<S> {
    pub fn new(fields: Vec<FieldDescriptor<S>>) -> Result<Self, IntcError> {
        let mut by_offset: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
        for (i, field) in fields.iter().enumerate() {
            field.validate()?;
            let slot = by_offset.entry(field.offset).or_default();
            for &other in slot.iter() {
                let other = &fields[other];
                if other.mask() & field.mask() != 0 {
                    return Err(IntcError::RegisterLayout {
                        offset: field.offset,
                        reason: format!(
                            "field '{}' overlaps field '{}'",
                            field.name, other.name
                        ),
                    });
                }
            }
            slot.push(i);
        }
        Ok(Self { fields, by_offset })
    }

    pub fn fields(&self) -> &[FieldDescriptor<S>] {
        &self.fields
    }

    pub fn is_defined(&self, offset: u64) -> bool {
        self.by_offset.contains_key(&offset)
    }

    pub fn offsets(&self) -> impl Iterator<Item = u64> + '_ {
        self.by_offset.keys().copied()
    }

    pub fn reset(&self, state: &mut S) {
        let regs = state.registers_mut();
        regs.clear();
        for f in &self.fields {
            regs.set_field(f.offset, f.position, f.width, f.reset);
        }
    }

    pub fn read(&self, state: &mut S, offset: u64) -> u32 {
        let Some(ids) = self.by_offset.get(&offset) else {
            debug!("Unhandled read from offset {:#x}", offset);
            return 0;
        };

        let mut result = 0;
        for &i in ids {
            let f = &self.fields[i];
            if !f.mode.is_readable() {
                continue;
            }
            let stored = state.registers().field(f.offset, f.position, f.width);
            let value = match &f.on_read {
                Some(hook) => hook(state, stored) & f.max_value(),
                None => stored,
            };
            state
                .registers_mut()
                .set_field(f.offset, f.position, f.width, value);

            result |= value << f.position;
            if f.mode.contains(FieldMode::READ_TO_CLEAR) && value != 0 {
                state
                    .registers_mut()
                    .set_field(f.offset, f.position, f.width, 0);
                if let Some(hook) = &f.on_change {
                    hook(state, value, 0);
                }
            }
        }
        result
    }

    pub fn write(&self, state: &mut S, offset: u64, value: u32) {
        self.write_masked(state, offset, value, u32::MAX);
    }

    /// Writes only the bits selected by `lanes`. Fields outside `lanes` are
    /// left alone, hooks included; bits of a partially covered field outside
    /// `lanes` are written with a value that leaves them unchanged in the
    /// field's mode.
    pub fn write_masked(&self, state: &mut S, offset: u64, value: u32, lanes: u32) {
        let Some(ids) = self.by_offset.get(&offset) else {
            debug!(
                "Unhandled write to offset {:#x}, value {:#x}",
                offset, value
            );
            return;
        };

        // Store every field first so hooks observe the whole register.
        let mut updates = Vec::with_capacity(ids.len());
        for &i in ids {
            let f = &self.fields[i];
            if f.mask() & lanes == 0 {
                continue;
            }
            let old = state.registers().field(f.offset, f.position, f.width);
            let mode = f.mode.write_mode();
            let covered = f.extract(lanes);
            let untouched = if mode == FieldMode::WRITE_ZERO_TO_CLEAR {
                f.max_value()
            } else if mode == FieldMode::WRITE && f.mode.is_readable() {
                old
            } else {
                0
            };
            let written = (f.extract(value) & covered) | (untouched & !covered);
            let new = if mode == FieldMode::WRITE {
                written
            } else if mode == FieldMode::SET {
                old | written
            } else if mode == FieldMode::TOGGLE {
                old ^ written
            } else if mode == FieldMode::WRITE_ONE_TO_CLEAR {
                old & !written
            } else if mode == FieldMode::WRITE_ZERO_TO_CLEAR {
                old & written
            } else {
                old
            };
            state
                .registers_mut()
                .set_field(f.offset, f.position, f.width, new);
            updates.push((i, old, written, new));
        }

        for &(i, old, written, _) in &updates {
            if let Some(hook) = &self.fields[i].on_write {
                hook(state, old, written);
            }
        }
        for &(i, old, _, new) in &updates {
            if old != new {
                if let Some(hook) = &self.fields[i].on_change {
                    hook(state, old, new);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct TestState {
        regs: RegisterFile,
        writes: Vec<(u32, u32)>,
        changes: Vec<(u32, u32)>,
        reads: u32,
    }

    impl HasRegisters for TestState {
        fn registers(&self) -> &RegisterFile {
            &self.regs
        }
        fn registers_mut(&mut self) -> &mut RegisterFile {
            &mut self.regs
        }
    }

    fn modes_map() -> RegisterMap<TestState> {
        RegisterMap::new(vec![
            FieldDescriptor::new("RW", 0x0, 0, 4, FieldMode::READ_WRITE),
            FieldDescriptor::new("SET", 0x0, 4, 4, FieldMode::READ | FieldMode::SET),
            FieldDescriptor::new("TGL", 0x0, 8, 4, FieldMode::READ | FieldMode::TOGGLE),
            FieldDescriptor::new("W1C", 0x0, 12, 4, FieldMode::W1C).with_reset(0xF),
            FieldDescriptor::new("W0C", 0x0, 16, 4, FieldMode::W0C).with_reset(0xF),
            FieldDescriptor::new("RO", 0x0, 20, 4, FieldMode::READ).with_reset(0x5),
            FieldDescriptor::new("WO", 0x0, 24, 4, FieldMode::WRITE),
            FieldDescriptor::new("RC", 0x4, 0, 8, FieldMode::READ | FieldMode::READ_TO_CLEAR)
                .with_reset(0x42)
                .on_change(|s: &mut TestState, old, new| s.changes.push((old, new))),
        ])
        .unwrap()
    }

    #[test]
    fn test_write_modes() {
        let map = modes_map();
        let mut s = TestState::default();
        map.reset(&mut s);
        assert_eq!(map.read(&mut s, 0x0), 0x005F_F000);

        map.write(&mut s, 0x0, 0x0F33_3A33);
        let v = map.read(&mut s, 0x0);
        assert_eq!(v & 0xF, 0x3, "plain write");
        assert_eq!((v >> 4) & 0xF, 0x3, "set ors in");
        assert_eq!((v >> 8) & 0xF, 0xA, "toggle");
        assert_eq!((v >> 12) & 0xF, 0xC, "write one clears");
        assert_eq!((v >> 16) & 0xF, 0x3, "write zero clears");
        assert_eq!((v >> 20) & 0xF, 0x5, "read only");
        assert_eq!((v >> 24) & 0xF, 0x0, "write only reads zero");
        assert_eq!(s.regs.field(0x0, 24, 4), 0xF);

        map.write(&mut s, 0x0, 0x0000_0A40);
        let v = map.read(&mut s, 0x0);
        assert_eq!((v >> 4) & 0xF, 0x7);
        assert_eq!((v >> 8) & 0xF, 0x0);
    }

    #[test]
    fn test_read_to_clear() {
        let map = modes_map();
        let mut s = TestState::default();
        map.reset(&mut s);
        assert_eq!(map.read(&mut s, 0x4), 0x42);
        assert_eq!(map.read(&mut s, 0x4), 0);
        assert_eq!(s.changes, vec![(0x42, 0)]);
    }

    #[test]
    fn test_hooks_order_and_values() {
        let map = RegisterMap::new(vec![
            FieldDescriptor::new("A", 0x10, 0, 8, FieldMode::READ_WRITE)
                .on_write(|s: &mut TestState, old, written| s.writes.push((old, written)))
                .on_change(|s: &mut TestState, old, new| s.changes.push((old, new))),
            FieldDescriptor::new("B", 0x10, 8, 8, FieldMode::READ).on_read(|s: &mut TestState, _| {
                s.reads += 1;
                s.reads
            }),
        ])
        .unwrap();
        let mut s = TestState::default();
        map.reset(&mut s);

        map.write(&mut s, 0x10, 0x12);
        map.write(&mut s, 0x10, 0x12);
        assert_eq!(s.writes, vec![(0, 0x12), (0x12, 0x12)]);
        assert_eq!(s.changes, vec![(0, 0x12)]);

        assert_eq!(map.read(&mut s, 0x10), 0x0112);
        assert_eq!(map.read(&mut s, 0x10), 0x0212);
    }

    #[test]
    fn test_masked_write_leaves_other_lanes_alone() {
        let map = modes_map();
        let mut s = TestState::default();
        map.reset(&mut s);
        map.write(&mut s, 0x0, 0x000F_0A05);
        assert_eq!(s.regs.field(0x0, 16, 4), 0xF);

        // Byte lane 2 only: W0C writes zeros, every other field is skipped.
        map.write_masked(&mut s, 0x0, 0, 0x00FF_0000);
        let v = map.read(&mut s, 0x0);
        assert_eq!((v >> 16) & 0xF, 0x0, "write zero clears in its lane");
        assert_eq!((v >> 12) & 0xF, 0xF, "W1C outside the lane untouched");
        assert_eq!(v & 0xF, 0x5);
        assert_eq!((v >> 8) & 0xF, 0xA);

        // Lane 1 covers TGL and W1C; all-zero bits there change nothing.
        map.write_masked(&mut s, 0x0, 0x0000_3000, 0x0000_FF00);
        let v = map.read(&mut s, 0x0);
        assert_eq!((v >> 12) & 0xF, 0xC);
        assert_eq!((v >> 8) & 0xF, 0xA, "toggle with zeros keeps value");
    }

    #[test]
    fn test_partially_covered_field() {
        let map = RegisterMap::new(vec![
            FieldDescriptor::new("RW", 0x0, 4, 8, FieldMode::READ_WRITE),
            FieldDescriptor::new("W1C", 0x0, 12, 8, FieldMode::W1C).with_reset(0xFF),
            FieldDescriptor::new("WO", 0x0, 20, 8, FieldMode::WRITE)
                .on_write(|s: &mut TestState, _, written| s.writes.push((0, written))),
        ])
        .unwrap();
        let mut s = TestState::default();
        map.reset(&mut s);
        map.write(&mut s, 0x0, 0x0000_0AB0);
        s.writes.clear();

        map.write_masked(&mut s, 0x0, 0x0000_0010, 0x0000_00FF);
        assert_eq!(s.regs.field(0x0, 4, 8), 0xA1, "upper nibble kept");

        map.write_masked(&mut s, 0x0, 0x0001_0000, 0x00FF_0000);
        assert_eq!(s.regs.field(0x0, 12, 8), 0xEF, "only bit 16 cleared");
        assert_eq!(s.writes, vec![(0, 0x0)], "write-only field sees zeros outside the lane");
    }

    #[test]
    fn test_write_only_field_has_no_read_side_effects() {
        let map = RegisterMap::new(vec![
            FieldDescriptor::word("CMD", 0x8, FieldMode::WRITE).on_read(|s: &mut TestState, _| {
                s.reads += 1;
                0xFF
            }),
        ])
        .unwrap();
        let mut s = TestState::default();
        map.reset(&mut s);
        map.write(&mut s, 0x8, 0x3);
        assert_eq!(map.read(&mut s, 0x8), 0);
        assert_eq!(s.reads, 0);
        assert_eq!(s.regs.get(0x8), 0x3);
    }

    #[test]
    fn test_unhandled_offsets() {
        let map = modes_map();
        let mut s = TestState::default();
        map.reset(&mut s);
        assert_eq!(map.read(&mut s, 0x100), 0);
        map.write(&mut s, 0x100, 0xFFFF_FFFF);
        assert_eq!(s.regs.get(0x100), 0);
        assert!(!map.is_defined(0x100));
        assert_eq!(map.offsets().collect::<Vec<_>>(), vec![0x0, 0x4]);
    }

    #[test]
    fn test_layout_validation() {
        let overlap = RegisterMap::<TestState>::new(vec![
            FieldDescriptor::new("A", 0x0, 0, 8, FieldMode::READ_WRITE),
            FieldDescriptor::new("B", 0x0, 4, 8, FieldMode::READ_WRITE),
        ]);
        assert!(matches!(overlap, Err(IntcError::RegisterLayout { .. })));

        let same_bits_other_offset = RegisterMap::<TestState>::new(vec![
            FieldDescriptor::new("A", 0x0, 0, 8, FieldMode::READ_WRITE),
            FieldDescriptor::new("B", 0x4, 0, 8, FieldMode::READ_WRITE),
        ]);
        assert!(same_bits_other_offset.is_ok());

        let too_wide =
            RegisterMap::<TestState>::new(vec![FieldDescriptor::new("A", 0x0, 30, 4, FieldMode::READ)]);
        assert!(too_wide.is_err());

        let zero_width =
            RegisterMap::<TestState>::new(vec![FieldDescriptor::new("A", 0x0, 0, 0, FieldMode::READ)]);
        assert!(zero_width.is_err());

        let two_modes = RegisterMap::<TestState>::new(vec![FieldDescriptor::new(
            "A",
            0x0,
            0,
            1,
            FieldMode::WRITE | FieldMode::TOGGLE,
        )]);
        assert!(two_modes.is_err());
    }
}
