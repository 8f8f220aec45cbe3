// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::fmt::Debug;

/// Trait representing a generic interrupt controller.
///
/// This is the view a CPU model has of the controller feeding its interrupt
/// input: it can find out what is pending, take the next interrupt and tell
/// the controller when its handler is done.
pub trait InterruptController: Debug + Send + Sync {
    /// Signal the controller that an interrupt line has changed.
    fn set_interrupt_pending(&self, irq: u32, pending: bool);

    /// Check if a specific interrupt is enabled and pending.
    fn is_interrupt_active(&self, irq: u32) -> bool;

    /// Acknowledge an interrupt, usually called by the CPU at the start of an ISR.
    fn acknowledge_interrupt(&self) -> Option<u32>;

    /// Complete an interrupt, usually called by the CPU after an ISR finishes.
    fn complete_interrupt(&self, irq: u32);
}

/// Groups named interrupt flags onto shared outputs.
///
/// Each flag has a status bit and an enable bit. Every flag belongs to
/// exactly one output group; a group is asserted while any of its members is
/// both set and enabled.
#[derive(Debug, Clone)]
pub struct InterruptManager<E: 'static> {
    table: &'static [(E, usize)],
    groups: usize,
    status: Vec<bool>,
    enabled: Vec<bool>,
}

impl<E> InterruptManager<E>
where
    E: Copy + PartialEq + Debug + 'static,
{
    /// `table` maps each flag to its output group; groups are `0..groups`.
    pub fn new(table: &'static [(E, usize)], groups: usize) -> Self {
        debug_assert!(table.iter().all(|&(_, g)| g < groups));
        Self {
            table,
            groups,
            status: vec![false; table.len()],
            enabled: vec![false; table.len()],
        }
    }

    fn index(&self, flag: E) -> Option<usize> {
        let idx = self.table.iter().position(|&(e, _)| e == flag);
        if idx.is_none() {
            tracing::error!("Interrupt {:?} is not part of this manager", flag);
        }
        idx
    }

    pub fn set_status(&mut self, flag: E, value: bool) {
        if let Some(i) = self.index(flag) {
            self.status[i] = value;
        }
    }

    pub fn status(&self, flag: E) -> bool {
        self.table
            .iter()
            .position(|&(e, _)| e == flag)
            .is_some_and(|i| self.status[i])
    }

    pub fn set_enabled(&mut self, flag: E, value: bool) {
        if let Some(i) = self.index(flag) {
            self.enabled[i] = value;
        }
    }

    pub fn is_enabled(&self, flag: E) -> bool {
        self.table
            .iter()
            .position(|&(e, _)| e == flag)
            .is_some_and(|i| self.enabled[i])
    }

    pub fn clear(&mut self, flag: E) {
        self.set_status(flag, false);
    }

    pub fn group_of(&self, flag: E) -> Option<usize> {
        self.table.iter().find(|&&(e, _)| e == flag).map(|&(_, g)| g)
    }

    /// Level of every output group, indexed by group.
    pub fn outputs(&self) -> Vec<bool> {
        let mut out = vec![false; self.groups];
        for (i, &(_, group)) in self.table.iter().enumerate() {
            if self.status[i] && self.enabled[i] {
                out[group] = true;
            }
        }
        out
    }

    pub fn reset(&mut self) {
        self.status.iter_mut().for_each(|s| *s = false);
        self.enabled.iter_mut().for_each(|e| *e = false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Flag {
        Rx,
        Tx,
        Error,
    }

    const TABLE: &[(Flag, usize)] = &[(Flag::Rx, 0), (Flag::Tx, 0), (Flag::Error, 1)];

    #[test]
    fn test_group_is_or_of_members() {
        let mut m = InterruptManager::new(TABLE, 2);
        assert_eq!(m.outputs(), vec![false, false]);

        m.set_status(Flag::Tx, true);
        assert_eq!(m.outputs(), vec![false, false], "disabled flag stays quiet");

        m.set_enabled(Flag::Tx, true);
        m.set_enabled(Flag::Rx, true);
        assert_eq!(m.outputs(), vec![true, false]);

        m.set_status(Flag::Rx, true);
        m.clear(Flag::Tx);
        assert_eq!(m.outputs(), vec![true, false], "Rx keeps the group up");

        m.clear(Flag::Rx);
        assert_eq!(m.outputs(), vec![false, false]);
    }

    #[test]
    fn test_groups_are_independent() {
        let mut m = InterruptManager::new(TABLE, 2);
        m.set_enabled(Flag::Error, true);
        m.set_status(Flag::Error, true);
        assert_eq!(m.outputs(), vec![false, true]);
        assert_eq!(m.group_of(Flag::Error), Some(1));
        assert!(m.status(Flag::Error));

        m.reset();
        assert_eq!(m.outputs(), vec![false, false]);
        assert!(!m.is_enabled(Flag::Error));
    }
}
