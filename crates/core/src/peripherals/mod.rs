// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod eoss3;
pub mod exti;
pub mod gpio_interrupt;
pub mod icu;
pub mod intmux;
pub mod mscm;
pub mod plic;
pub mod rzg_irqc;
pub mod vic;
