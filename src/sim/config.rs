use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::Value;

use crate::core::cpu::CoreConfig;
use crate::mem::cache::CacheConfig;
use crate::mem::dram::DramConfig;
use crate::mem::ptw::PtwConfig;
use crate::mem::vmem::VmemConfig;

/// A TOML-sectioned configuration block with defaults.
pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> Self {
        match section {
            Some(value) => value
                .clone()
                .try_into()
                .expect("cannot deserialize config section"),
            None => Self::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub num_cpus: usize,
    pub warmup_instructions: u64,
    pub simulation_instructions: u64,
    pub heartbeat: u64,
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            num_cpus: 1,
            warmup_instructions: 0,
            simulation_instructions: u64::MAX,
            heartbeat: 10_000_000,
        }
    }
}

/// Everything the environment needs to assemble a machine. Injected at
/// construction; policies may read it but never mutate it.
#[derive(Debug, Clone, Default)]
pub struct MachineConfig {
    pub sim: SimConfig,
    pub core: CoreConfig,
    pub l1i: Option<CacheConfig>,
    pub l1d: Option<CacheConfig>,
    pub l2: Option<CacheConfig>,
    pub dram: DramConfig,
    pub vmem: VmemConfig,
    pub ptw: PtwConfig,
}

impl MachineConfig {
    /// Parse a TOML document with optional `[sim]`, `[core]`, `[l1i]`,
    /// `[l1d]`, `[l2]`, `[dram]`, `[vmem]`, and `[ptw]` sections.
    pub fn from_toml(text: &str) -> Self {
        let value: Value = text.parse().expect("malformed configuration file");
        let table = value.as_table().expect("configuration root must be a table");
        for key in table.keys() {
            if !matches!(
                key.as_str(),
                "sim" | "core" | "l1i" | "l1d" | "l2" | "dram" | "vmem" | "ptw"
            ) {
                warn!("unknown configuration section [{key}]");
            }
        }
        Self {
            sim: SimConfig::from_section(table.get("sim")),
            core: CoreConfig::from_section(table.get("core")),
            l1i: table.get("l1i").map(|v| CacheConfig::from_section(Some(v))),
            l1d: table.get("l1d").map(|v| CacheConfig::from_section(Some(v))),
            l2: table.get("l2").map(|v| CacheConfig::from_section(Some(v))),
            dram: DramConfig::from_section(table.get("dram")),
            vmem: VmemConfig::from_section(table.get("vmem")),
            ptw: PtwConfig::from_section(table.get("ptw")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let cfg = MachineConfig::from_toml("");
        assert_eq!(cfg.sim.num_cpus, 1);
        assert_eq!(cfg.vmem.levels, 5);
        assert!(cfg.l2.is_none());
    }

    #[test]
    fn sections_override_selected_fields() {
        let cfg = MachineConfig::from_toml(
            r#"
            [sim]
            num_cpus = 2
            warmup_instructions = 1000

            [dram]
            banks = 16

            [l2]
            sets = 2048
            "#,
        );
        assert_eq!(cfg.sim.num_cpus, 2);
        assert_eq!(cfg.sim.warmup_instructions, 1000);
        assert_eq!(cfg.dram.banks, 16);
        assert_eq!(cfg.l2.as_ref().unwrap().sets, 2048);
        // untouched fields keep their defaults
        assert_eq!(cfg.dram.channels, 1);
    }

    #[test]
    #[should_panic(expected = "cannot deserialize")]
    fn mistyped_fields_are_a_configuration_error() {
        MachineConfig::from_toml("[sim]\nnum_cpus = \"two\"\n");
    }
}
