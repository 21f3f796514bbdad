use serde::Deserialize;

use crate::sim::config::Config;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficConfig {
    /// Warp instructions generated per pattern
    pub instrs_per_pattern: u32,
    /// Interleave patterns instruction by instruction instead of running them back to back
    pub lockstep_patterns: bool,
    /// Issue a halt after the last instruction so the dcache flushes
    pub halt_at_end: bool,
    /// Seed for store data
    pub seed: u64,
    pub address: TrafficAddressConfig,
    pub patterns: Vec<TrafficPatternSpec>,
}

impl Config for TrafficConfig {}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            instrs_per_pattern: 64,
            lockstep_patterns: true,
            halt_at_end: true,
            seed: 0,
            address: TrafficAddressConfig::default(),
            patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficAddressConfig {
    pub base: u32,
    pub size_bytes: u32,
}

impl Default for TrafficAddressConfig {
    fn default() -> Self {
        Self {
            base: 0x1000_0000,
            size_bytes: 64 << 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficPatternSpec {
    pub name: String,
    pub kind: String,
    pub op: String,
    pub warp_stride: u32,
    pub lane_stride: u32,
    pub tile_m: u32,
    pub tile_n: u32,
    pub transpose: bool,
    pub random_min: u32,
    pub random_max: u32,
    pub seed: u64,
    /// Predicate mask applied to every instruction of the pattern
    pub lane_mask: u32,
    pub within_bytes: Option<u32>,
}

impl Default for TrafficPatternSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: String::new(),
            op: "read".to_string(),
            warp_stride: 1,
            lane_stride: 1,
            tile_m: 16,
            tile_n: 16,
            transpose: false,
            random_min: 0,
            random_max: 0,
            seed: 0,
            lane_mask: u32::MAX,
            within_bytes: None,
        }
    }
}
