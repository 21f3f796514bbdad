use std::collections::{HashMap, VecDeque};

use anyhow::ensure;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::base::latch::Latch;
use crate::timeflow::lsu::{MemInstr, NUM_LANES};
use crate::traffic::config::TrafficConfig;
use crate::traffic::logging::{PatternCheckpoint, TrafficLogger};
use crate::traffic::patterns::PatternEngine;

/// Feeds warp memory instructions built from the configured traffic patterns into the issue
/// latch of a load/store unit, one per cycle while the latch accepts them.
#[derive(Debug)]
pub struct DcacheTrafficDriver {
    pattern_engine: PatternEngine,
    /// (pattern, instruction index) in issue order
    schedule: VecDeque<(usize, u32)>,
    lockstep: bool,
    halt_at_end: bool,
    halt_issued: bool,
    seed: u64,
    data_rng: StdRng,
    next_id: u64,
    /// instruction id -> pattern it came from
    owner: HashMap<u64, usize>,
    remaining: Vec<u32>,
    checkpoints: Vec<PatternCheckpoint>,
    retired: u64,
}

impl DcacheTrafficDriver {
    pub fn new(config: &TrafficConfig) -> anyhow::Result<Self> {
        let pattern_engine = PatternEngine::new(config)?;
        let instrs = pattern_engine.instrs_per_pattern() as u32;
        let num_patterns = pattern_engine.len();

        Ok(Self {
            schedule: build_schedule(num_patterns, instrs, config.lockstep_patterns),
            pattern_engine,
            lockstep: config.lockstep_patterns,
            halt_at_end: config.halt_at_end,
            halt_issued: false,
            seed: config.seed,
            data_rng: StdRng::seed_from_u64(config.seed),
            next_id: 0,
            owner: HashMap::new(),
            remaining: vec![instrs; num_patterns],
            checkpoints: Vec::new(),
            retired: 0,
        })
    }

    /// Start the traffic over from the first instruction, keeping the compiled patterns.
    pub fn restart(&mut self) {
        let instrs = self.pattern_engine.instrs_per_pattern() as u32;
        let num_patterns = self.pattern_engine.len();
        self.schedule = build_schedule(num_patterns, instrs, self.lockstep);
        self.halt_issued = false;
        self.data_rng = StdRng::seed_from_u64(self.seed);
        self.next_id = 0;
        self.owner.clear();
        self.remaining = vec![instrs; num_patterns];
        self.checkpoints.clear();
        self.retired = 0;
    }

    pub fn pattern_engine(&self) -> &PatternEngine {
        &self.pattern_engine
    }

    pub fn issued(&self) -> u64 {
        self.next_id
    }

    pub fn retired(&self) -> u64 {
        self.retired
    }

    pub fn checkpoints(&self) -> &[PatternCheckpoint] {
        &self.checkpoints
    }

    /// Nothing left to issue.
    pub fn is_done(&self) -> bool {
        self.schedule.is_empty() && (!self.halt_at_end || self.halt_issued)
    }

    /// Every issued instruction has come back.
    pub fn all_retired(&self) -> bool {
        self.is_done() && self.retired == self.next_id
    }

    fn build(&mut self, pattern_idx: usize, instr_idx: u32) -> anyhow::Result<MemInstr> {
        let Some(pattern) = self.pattern_engine.pattern(pattern_idx) else {
            anyhow::bail!("traffic pattern {} does not exist", pattern_idx);
        };
        let (is_store, lane_mask) = (pattern.op.is_store(), pattern.lane_mask);

        let mut rdat1 = [0u32; NUM_LANES];
        for (lane, addr) in rdat1.iter_mut().enumerate() {
            *addr = self
                .pattern_engine
                .lane_addr(pattern_idx, instr_idx, lane)
                .unwrap_or_default();
        }
        let id = self.next_id;
        let instr = if is_store {
            let rdat2 = std::array::from_fn(|_| self.data_rng.gen());
            MemInstr::store(id, rdat1, 0, rdat2)
        } else {
            MemInstr::load(id, rdat1, 0)
        };
        Ok(instr.with_pred(lane_mask))
    }

    /// Offer the next instruction to `issue`; a held-off latch leaves it for a later cycle.
    pub fn tick(&mut self, issue: &Latch<MemInstr>) -> anyhow::Result<()> {
        if !issue.ready_for_push() {
            return Ok(());
        }

        let instr = match self.schedule.front().copied() {
            Some((pattern_idx, instr_idx)) => {
                let instr = self.build(pattern_idx, instr_idx)?;
                self.owner.insert(instr.id, pattern_idx);
                instr
            }
            None if self.halt_at_end && !self.halt_issued => MemInstr::halt(self.next_id),
            None => return Ok(()),
        };

        let id = instr.id;
        ensure!(
            issue.push(instr).is_ok(),
            "issue latch {} refused instr {} after reporting ready",
            issue.name(),
            id
        );
        if self.schedule.pop_front().is_none() {
            self.halt_issued = true;
        }
        debug!("traffic: issued instr {}", id);
        self.next_id += 1;
        Ok(())
    }

    /// Note the retirement of instruction `id`, closing out its pattern once its last
    /// instruction is back.
    pub fn retire(&mut self, id: u64, cycle: u64) {
        self.retired += 1;
        let Some(pattern_idx) = self.owner.remove(&id) else {
            return;
        };
        let Some(left) = self.remaining.get_mut(pattern_idx) else {
            return;
        };
        *left = left.saturating_sub(1);
        if *left == 0 {
            let name = self
                .pattern_engine
                .pattern(pattern_idx)
                .map(|p| p.name.clone())
                .unwrap_or_default();
            TrafficLogger::log_pattern_checkpoint(&name, cycle);
            self.checkpoints.push(PatternCheckpoint {
                pattern_name: name,
                finished_cycle: cycle,
            });
        }
        if self.all_retired() {
            TrafficLogger::log_done(self.retired, cycle);
        }
    }
}

fn build_schedule(num_patterns: usize, instrs: u32, lockstep: bool) -> VecDeque<(usize, u32)> {
    if lockstep {
        (0..instrs)
            .flat_map(|i| (0..num_patterns).map(move |p| (p, i)))
            .collect()
    } else {
        (0..num_patterns)
            .flat_map(|p| (0..instrs).map(move |i| (p, i)))
            .collect()
    }
}
