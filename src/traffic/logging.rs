use log::info;
use serde::Serialize;

/// Marks the cycle the last instruction of a traffic pattern retired.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PatternCheckpoint {
    pub pattern_name: String,
    pub finished_cycle: u64,
}

pub struct TrafficLogger;

impl TrafficLogger {
    pub fn log_pattern_checkpoint(pattern_name: &str, cycle: u64) {
        info!("[TRAFFIC] {} finished at time {:>10}", pattern_name, cycle);
    }

    pub fn log_done(issued: u64, cycle: u64) {
        info!("[TRAFFIC] all {} instrs retired at time {:>10}", issued, cycle);
    }
}
