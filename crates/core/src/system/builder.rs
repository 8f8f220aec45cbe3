// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::bus::SystemBus;
use crate::peripherals::eoss3::Eoss3;
use crate::peripherals::exti::{Exti, ExtiDescriptor};
use crate::peripherals::icu::{Icu, IcuConfig, LinkMode};
use crate::peripherals::intmux::{Intmux, IntmuxConfig};
use crate::peripherals::mscm::{Mscm, MscmConfig};
use crate::peripherals::plic::{Plic, PlicConfig};
use crate::peripherals::rzg_irqc::RzgIrqc;
use crate::peripherals::vic::Vic;
use crate::{IntcError, InterruptPeripheral};
use anyhow::Context;
use labwired_intc_config::{ControllerConfig, ControllerKind, PlatformDescriptor};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Controllers instantiated from a platform descriptor, mapped on one bus.
#[derive(Debug)]
pub struct Platform {
    pub name: String,
    pub bus: SystemBus,
    controllers: HashMap<String, Arc<dyn InterruptPeripheral>>,
}

impl Platform {
    pub fn controller(&self, id: &str) -> Option<&Arc<dyn InterruptPeripheral>> {
        self.controllers.get(id)
    }

    /// Feeds output `output` of `from` into input `input` of `to`.
    pub fn connect(&self, from: &str, output: usize, to: &str, input: usize) -> Result<(), IntcError> {
        let source = self
            .controller(from)
            .ok_or_else(|| IntcError::UnknownController(from.to_string()))?;
        let target = self
            .controller(to)
            .ok_or_else(|| IntcError::UnknownController(to.to_string()))?;
        let line = source
            .connections()
            .get(output)
            .ok_or_else(|| IntcError::UnknownOutput {
                id: from.to_string(),
                output,
            })?;
        line.connect(Arc::clone(target).into_receiver(), input);
        tracing::debug!("Wired {}[{}] -> {}[{}]", from, output, to, input);
        Ok(())
    }

    /// Resets every mapped controller.
    pub fn reset(&self) {
        self.bus.reset_all();
    }
}

fn as_usize(c: &ControllerConfig, key: &str, default: usize) -> anyhow::Result<usize> {
    let value = c.get_u64_or(key, default as u64)?;
    usize::try_from(value).with_context(|| format!("option '{}' of '{}' is too large", key, c.id))
}

fn icu_config(c: &ControllerConfig) -> anyhow::Result<IcuConfig> {
    let mode = match c.get_u64_table("link_table")? {
        None => LinkMode::Direct,
        Some(table) => LinkMode::Grouped(
            table
                .into_iter()
                .map(|row| {
                    row.into_iter()
                        .map(|event| {
                            u16::try_from(event).with_context(|| {
                                format!("link table event {} of '{}' is too large", event, c.id)
                            })
                        })
                        .collect::<anyhow::Result<Vec<u16>>>()
                })
                .collect::<anyhow::Result<Vec<_>>>()?,
        ),
    };
    Ok(IcuConfig {
        slots: as_usize(c, "slots", IcuConfig::default().slots)?,
        mode,
    })
}

/// Instantiates one controller and maps its register window(s).
fn build_controller(
    c: &ControllerConfig,
    bus: &mut SystemBus,
) -> anyhow::Result<Arc<dyn InterruptPeripheral>> {
    let ctrl: Arc<dyn InterruptPeripheral> = match c.r#type {
        ControllerKind::Plic => {
            let config = PlicConfig {
                sources: usize::try_from(c.require_u64("sources")?)?,
                targets: as_usize(c, "targets", 1)?,
                priorities_enabled: c.get_bool_or("priorities_enabled", true)?,
            };
            Arc::new(Plic::new(config)?)
        }
        ControllerKind::Vic => Arc::new(Vic::new()?),
        ControllerKind::Exti => {
            let variant = c.get_str("variant")?.unwrap_or("stm32f1");
            let desc = ExtiDescriptor::by_name(variant)
                .ok_or_else(|| anyhow::anyhow!("Unknown EXTI variant '{}' for '{}'", variant, c.id))?;
            Arc::new(Exti::new(desc)?)
        }
        ControllerKind::Intmux => {
            let defaults = IntmuxConfig::default();
            let config = IntmuxConfig {
                channels: as_usize(c, "channels", defaults.channels)?,
                vector_base: u32::try_from(c.get_u64_or("vector_base", 0)?)?,
            };
            Arc::new(Intmux::new(config)?)
        }
        ControllerKind::Mscm => {
            let defaults = MscmConfig::default();
            let config = MscmConfig {
                sources: as_usize(c, "sources", defaults.sources)?,
                cores: as_usize(c, "cores", defaults.cores)?,
            };
            Arc::new(Mscm::new(config)?)
        }
        ControllerKind::Eoss3 => {
            let router = Arc::new(Eoss3::new()?);
            if let Some(misc) = c.get_u64("misc_address")? {
                bus.add_peripheral(&format!("{}.misc", c.id), misc, Arc::new(router.misc()))?;
            }
            router
        }
        ControllerKind::RzgIrqc => Arc::new(RzgIrqc::new()?),
        ControllerKind::Icu => Arc::new(Icu::new(icu_config(c)?)?),
    };
    bus.add_peripheral(&c.id, c.base_address, Arc::clone(&ctrl).into_peripheral())?;
    Ok(ctrl)
}

/// Builds every controller of `descriptor` and applies its wiring.
pub fn build_platform(descriptor: &PlatformDescriptor) -> anyhow::Result<Platform> {
    descriptor.validate()?;
    info!("Building platform '{}'", descriptor.name);

    let mut bus = SystemBus::new();
    let mut controllers = HashMap::new();
    for c in &descriptor.controllers {
        info!("Instantiating {:?} '{}' at {:#x}", c.r#type, c.id, c.base_address);
        let ctrl = build_controller(c, &mut bus)
            .with_context(|| format!("Failed to build controller '{}'", c.id))?;
        controllers.insert(c.id.clone(), ctrl);
    }

    let platform = Platform {
        name: descriptor.name.clone(),
        bus,
        controllers,
    };
    for w in &descriptor.wiring {
        platform
            .connect(&w.from, w.output, &w.to, w.input)
            .with_context(|| format!("Failed to wire {}[{}] -> {}[{}]", w.from, w.output, w.to, w.input))?;
    }
    Ok(platform)
}

/// Loads a platform descriptor (YAML or JSON) and builds it.
pub fn build_platform_from_file(path: &Path) -> anyhow::Result<Platform> {
    info!("Loading platform descriptor: {:?}", path);
    let descriptor = PlatformDescriptor::from_file(path)?;
    build_platform(&descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
name: "test-board"
controllers:
  - id: exti
    type: exti
    base_address: 0x40010400
  - id: plic
    type: plic
    base_address: 0x0c000000
    config:
      sources: 31
  - id: icu
    type: icu
    base_address: 0x40006000
    config:
      slots: 4
      link_table: [[0, 5], [0, 6]]
wiring:
  - { from: exti, output: 3, to: plic, input: 7 }
"#;

    #[test]
    fn test_builds_and_maps_controllers() {
        let desc = PlatformDescriptor::from_yaml(YAML).unwrap();
        let platform = build_platform(&desc).unwrap();
        assert_eq!(platform.name, "test-board");
        assert_eq!(platform.bus.peripherals.len(), 3);
        assert!(platform.controller("icu").is_some());
        assert_eq!(
            platform.controller("exti").unwrap().connections()[3].endpoint_count(),
            1
        );
    }

    #[test]
    fn test_plic_requires_sources() {
        let yaml = r#"
name: "broken"
controllers:
  - id: plic
    type: plic
    base_address: 0
"#;
        let desc = PlatformDescriptor::from_yaml(yaml).unwrap();
        let err = build_platform(&desc).unwrap_err();
        assert!(format!("{:#}", err).contains("sources"));
    }

    #[test]
    fn test_unknown_output_and_overlap() {
        let desc = PlatformDescriptor::from_yaml(YAML).unwrap();
        let platform = build_platform(&desc).unwrap();
        assert_eq!(
            platform.connect("exti", 500, "plic", 1),
            Err(IntcError::UnknownOutput {
                id: "exti".into(),
                output: 500
            })
        );
        assert_eq!(
            platform.connect("nope", 0, "plic", 1),
            Err(IntcError::UnknownController("nope".into()))
        );

        let overlapping = r#"
name: "overlap"
controllers:
  - { id: a, type: vic, base_address: 0x1000 }
  - { id: b, type: vic, base_address: 0x1800 }
"#;
        let desc = PlatformDescriptor::from_yaml(overlapping).unwrap();
        assert!(build_platform(&desc).is_err());
    }

    #[test]
    fn test_unknown_exti_variant() {
        let yaml = r#"
name: "bad-exti"
controllers:
  - id: exti
    type: exti
    base_address: 0
    config:
      variant: stm32h9
"#;
        let desc = PlatformDescriptor::from_yaml(yaml).unwrap();
        assert!(build_platform(&desc).is_err());
    }
}
