use std::path::PathBuf;

use anyhow::{ensure, Context};
use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::*;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    pub log_level: u64,
    pub timeout: u64,
    /// CSV trace of every cache event, if set
    pub trace: Option<PathBuf>,
    /// JSON dump of the final statistics, if set
    pub stats_json: Option<PathBuf>,
    /// Check retired loads against a program-order reference memory
    pub verify: bool,
}

pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> anyhow::Result<Self> {
        match section {
            Some(value) => value
                .clone()
                .try_into()
                .with_context(|| format!("cannot deserialize {}", std::any::type_name::<Self>())),
            None => {
                warn!("config section for {} not found, using defaults", std::any::type_name::<Self>());
                Ok(Self::default())
            }
        }
    }
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            log_level: 0,
            timeout: 1_000_000,
            trace: None,
            stats_json: None,
            verify: true,
        }
    }
}

/// Timing of the backing memory service behind the cache.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct MemConfig {
    pub latency: u64,
    pub bytes_per_cycle: u32,
    pub max_inflight: usize,
}

impl Config for MemConfig {}

impl Default for MemConfig {
    fn default() -> Self {
        Self {
            latency: 5,
            bytes_per_cycle: 128,
            max_inflight: 1,
        }
    }
}

impl MemConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.bytes_per_cycle > 0, "mem.bytes_per_cycle must be > 0");
        ensure!(self.max_inflight > 0, "mem.max_inflight must be > 0");
        Ok(())
    }
}
