use crate::sim::config::{MemConfig, SimConfig};
use crate::sim::top::Sim;
use crate::timeflow::dcache::CacheConfig;
use crate::timeflow::lsu::LsuConfig;
use crate::traffic::config::{TrafficAddressConfig, TrafficConfig, TrafficPatternSpec};

fn pattern(kind: &str, op: &str) -> TrafficPatternSpec {
    TrafficPatternSpec {
        kind: kind.to_string(),
        op: op.to_string(),
        ..Default::default()
    }
}

fn traffic(patterns: Vec<TrafficPatternSpec>, instrs: u32) -> TrafficConfig {
    TrafficConfig {
        instrs_per_pattern: instrs,
        seed: 3,
        address: TrafficAddressConfig {
            base: 0x8000,
            size_bytes: 16 << 10,
        },
        patterns,
        ..TrafficConfig::default()
    }
}

// small enough that the traffic keeps evicting dirty lines
fn small_cache() -> CacheConfig {
    CacheConfig {
        sets_per_bank: 2,
        num_ways: 2,
        mshr_depth: 2,
        mshr_latency: 3,
        ..CacheConfig::default()
    }
}

fn mixed_patterns() -> Vec<TrafficPatternSpec> {
    let mut strided_read = pattern("strided", "read");
    strided_read.lane_stride = 32;
    let mut random_write = pattern("random", "write");
    random_write.seed = 11;
    random_write.within_bytes = Some(4096);
    let mut masked = pattern("tiled", "write");
    masked.tile_m = 4;
    masked.tile_n = 8;
    masked.lane_mask = 0x0F0F_0F0F;
    vec![
        pattern("strided", "write"),
        strided_read,
        random_write,
        masked,
        pattern("tiled", "read"),
    ]
}

#[test]
fn mixed_traffic_verifies_against_reference() {
    let config = traffic(mixed_patterns(), 6);
    let mut sim = Sim::new(
        SimConfig::default(),
        small_cache(),
        LsuConfig::default(),
        MemConfig::default(),
        &config,
    )
    .unwrap();
    let report = sim.simulate().unwrap();

    assert_eq!(report.instrs_retired, 5 * 6 + 1);
    assert_eq!(report.patterns.len(), 5);
    assert!(sim.is_flushed());
    assert!(sim.cache().is_halted());
    assert!(report.cache.dirty_writebacks() > 0);
    assert!(report.cache.accesses() >= report.cache.hits());
    assert_eq!(report.lsu.instrs_retired(), report.instrs_retired);
}

#[test]
fn sequential_patterns_with_slow_memory() {
    let mut config = traffic(mixed_patterns(), 4);
    config.lockstep_patterns = false;
    let mem = MemConfig {
        latency: 40,
        bytes_per_cycle: 16,
        max_inflight: 2,
    };
    let mut sim = Sim::new(SimConfig::default(), small_cache(), LsuConfig::default(), mem, &config)
        .unwrap();
    let report = sim.simulate().unwrap();
    assert_eq!(report.instrs_retired, 5 * 4 + 1);
    assert!(report.mem.writes() > 0);
}

#[test]
fn without_halt_nothing_is_flushed() {
    let mut config = traffic(vec![pattern("strided", "write")], 2);
    config.halt_at_end = false;
    let mut sim = Sim::new(
        SimConfig::default(),
        CacheConfig::default(),
        LsuConfig::default(),
        MemConfig::default(),
        &config,
    )
    .unwrap();
    let report = sim.simulate().unwrap();
    assert_eq!(report.instrs_retired, 2);
    assert!(!sim.is_flushed());
    assert_eq!(report.mem.writes(), 0);
}

#[test]
fn timeout_is_an_error() {
    let config = traffic(mixed_patterns(), 4);
    let sim_config = SimConfig {
        timeout: 10,
        ..SimConfig::default()
    };
    let mut sim = Sim::new(
        sim_config,
        CacheConfig::default(),
        LsuConfig::default(),
        MemConfig::default(),
        &config,
    )
    .unwrap();
    let err = sim.simulate().unwrap_err();
    assert!(err.to_string().contains("timed out"), "{err}");
}

#[test]
fn bad_pattern_kind_fails_construction() {
    let config = traffic(vec![pattern("zigzag", "read")], 1);
    assert!(Sim::new(
        SimConfig::default(),
        CacheConfig::default(),
        LsuConfig::default(),
        MemConfig::default(),
        &config,
    )
    .is_err());
}

#[cfg(target_os = "linux")]
#[test]
fn unwritable_trace_fails_the_run() {
    let sim_config = SimConfig {
        trace: Some("/dev/full".into()),
        ..SimConfig::default()
    };
    let mut sim = Sim::new(
        sim_config,
        CacheConfig::default(),
        LsuConfig::default(),
        MemConfig::default(),
        &traffic(vec![pattern("strided", "write")], 2),
    )
    .unwrap();
    let err = sim.simulate().unwrap_err();
    assert!(format!("{err:#}").contains("trace"), "{err:#}");
}
