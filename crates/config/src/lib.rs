// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Default schema version for YAML configs
fn default_schema_version() -> String {
    "1.0".to_string()
}

/// Interrupt controller families the platform builder knows how to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerKind {
    #[serde(alias = "riscv-plic", alias = "platform_level_interrupt_controller")]
    Plic,
    #[serde(alias = "pl190", alias = "pl190_vic")]
    Vic,
    #[serde(alias = "stm32_exti")]
    Exti,
    #[serde(alias = "nxp_intmux")]
    Intmux,
    #[serde(alias = "s32k3_mscm")]
    Mscm,
    #[serde(alias = "eoss3_intrctrl")]
    Eoss3,
    #[serde(alias = "renesas_rzg", alias = "rzg2l_irqc")]
    RzgIrqc,
    #[serde(alias = "ra_icu")]
    Icu,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ControllerConfig {
    pub id: String,
    pub r#type: ControllerKind,
    pub base_address: u64,
    #[serde(default)]
    pub config: HashMap<String, serde_yaml::Value>,
}

/// One wire from a numbered controller output to a numbered controller input.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct WireConfig {
    pub from: String,
    pub output: usize,
    pub to: String,
    pub input: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PlatformDescriptor {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub name: String,
    pub controllers: Vec<ControllerConfig>,
    #[serde(default)]
    pub wiring: Vec<WireConfig>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OptionError {
    #[error("option '{key}' of controller '{id}' must be {expected}")]
    WrongType {
        id: String,
        key: String,
        expected: &'static str,
    },
    #[error("option '{key}' is required for controller '{id}'")]
    Missing { id: String, key: String },
}

impl PlatformDescriptor {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read platform descriptor at {:?}", path))?;

        let desc: Self = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse platform JSON from {:?}", path))?
        } else {
            Self::from_yaml(&content)?
        };
        desc.validate()?;
        Ok(desc)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse Platform Descriptor YAML")
    }

    pub fn controller(&self, id: &str) -> Option<&ControllerConfig> {
        self.controllers.iter().find(|c| c.id == id)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != "1.0" {
            anyhow::bail!(
                "Unsupported schema_version '{}'. Supported versions: '1.0'",
                self.schema_version
            );
        }

        let mut seen = HashSet::new();
        for c in &self.controllers {
            if c.id.trim().is_empty() {
                anyhow::bail!("Controller id cannot be empty");
            }
            if !seen.insert(c.id.as_str()) {
                anyhow::bail!("Duplicate controller id '{}'", c.id);
            }
        }

        for w in &self.wiring {
            for endpoint in [&w.from, &w.to] {
                if !seen.contains(endpoint.as_str()) {
                    anyhow::bail!(
                        "Wire {}[{}] -> {}[{}] references unknown controller '{}'",
                        w.from,
                        w.output,
                        w.to,
                        w.input,
                        endpoint
                    );
                }
            }
            if w.from == w.to {
                tracing::warn!(
                    "Wire {}[{}] -> {}[{}] feeds a controller back into itself",
                    w.from,
                    w.output,
                    w.to,
                    w.input
                );
            }
        }

        Ok(())
    }
}

impl ControllerConfig {
    fn value(&self, key: &str) -> Option<&serde_yaml::Value> {
        self.config.get(key)
    }

    fn wrong_type(&self, key: &str, expected: &'static str) -> OptionError {
        OptionError::WrongType {
            id: self.id.clone(),
            key: key.to_string(),
            expected,
        }
    }

    pub fn get_u64(&self, key: &str) -> Result<Option<u64>, OptionError> {
        match self.value(key) {
            None => Ok(None),
            Some(v) => v
                .as_u64()
                .map(Some)
                .ok_or_else(|| self.wrong_type(key, "an unsigned integer")),
        }
    }

    pub fn get_u64_or(&self, key: &str, default: u64) -> Result<u64, OptionError> {
        Ok(self.get_u64(key)?.unwrap_or(default))
    }

    pub fn require_u64(&self, key: &str) -> Result<u64, OptionError> {
        self.get_u64(key)?.ok_or_else(|| OptionError::Missing {
            id: self.id.clone(),
            key: key.to_string(),
        })
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> Result<bool, OptionError> {
        match self.value(key) {
            None => Ok(default),
            Some(v) => v.as_bool().ok_or_else(|| self.wrong_type(key, "a boolean")),
        }
    }

    pub fn get_str(&self, key: &str) -> Result<Option<&str>, OptionError> {
        match self.value(key) {
            None => Ok(None),
            Some(v) => v
                .as_str()
                .map(Some)
                .ok_or_else(|| self.wrong_type(key, "a string")),
        }
    }

    /// Reads a list of integer lists, e.g. a per-group lookup table.
    pub fn get_u64_table(&self, key: &str) -> Result<Option<Vec<Vec<u64>>>, OptionError> {
        let Some(v) = self.value(key) else {
            return Ok(None);
        };
        let expected = "a list of integer lists";
        let rows = v.as_sequence().ok_or_else(|| self.wrong_type(key, expected))?;
        let mut table = Vec::with_capacity(rows.len());
        for row in rows {
            let row = row.as_sequence().ok_or_else(|| self.wrong_type(key, expected))?;
            let values = row
                .iter()
                .map(|x| x.as_u64().ok_or_else(|| self.wrong_type(key, expected)))
                .collect::<Result<Vec<_>, _>>()?;
            table.push(values);
        }
        Ok(Some(table))
    }
}
