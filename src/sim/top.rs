use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, ensure};
use log::{debug, info};
use serde::Serialize;

use crate::base::behavior::*;
use crate::base::latch::Latch;
use crate::base::mem::HasMemory;
use crate::base::module::IsModule;
use crate::sim::config::{MemConfig, SimConfig};
use crate::sim::trace::TraceSink;
use crate::timeflow::dcache::{CacheConfig, CachePorts, CacheStage, CacheStats};
use crate::timeflow::lsu::{LoadStoreUnit, LsuConfig, LsuPorts, LsuStats, MemInstr, MemOp};
use crate::timeflow::mem_service::{MemService, MemStats};
use crate::timeq::Cycle;
use crate::traffic::config::TrafficConfig;
use crate::traffic::driver::DcacheTrafficDriver;
use crate::traffic::logging::PatternCheckpoint;

/// Everything a finished run reports.
#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    pub cycles: Cycle,
    pub instrs_retired: u64,
    pub cache: CacheStats,
    pub lsu: LsuStats,
    pub mem: MemStats,
    pub patterns: Vec<PatternCheckpoint>,
}

/// Traffic driver, load/store unit, dcache and backing memory wired together and ticked in
/// lockstep.
pub struct Sim {
    config: SimConfig,
    driver: DcacheTrafficDriver,
    lsu: LoadStoreUnit,
    cache: CacheStage,
    mem: MemService,
    wb_out: Latch<MemInstr>,
    /// word address -> value, updated in program order as instructions retire
    reference: HashMap<u32, u32>,
    trace: Option<TraceSink>,
    flushed: bool,
    cycle: Cycle,
}

impl Sim {
    pub fn new(
        config: SimConfig,
        cache_config: CacheConfig,
        lsu_config: LsuConfig,
        mem_config: MemConfig,
        traffic_config: &TrafficConfig,
    ) -> anyhow::Result<Self> {
        let cache_ports = CachePorts::new();
        let cache = CacheStage::new(Arc::new(cache_config), cache_ports.clone())?;
        let layout = *cache.layout();
        let mem = MemService::new(
            Arc::new(mem_config),
            cache_ports.mem_req.clone(),
            cache_ports.mem_resp.clone(),
        )?;
        let lsu_ports = LsuPorts::new(cache_ports.req_in.clone(), cache_ports.resp_out.clone());
        let wb_out = lsu_ports.wb_out.clone();
        let lsu = LoadStoreUnit::new(Arc::new(lsu_config), layout, lsu_ports)?;
        let driver = DcacheTrafficDriver::new(traffic_config)?;
        let trace = config.trace.as_deref().map(TraceSink::create).transpose()?;

        info!(
            "sim: {} traffic patterns, {} instrs each",
            driver.pattern_engine().len(),
            driver.pattern_engine().instrs_per_pattern()
        );

        Ok(Self {
            config,
            driver,
            lsu,
            cache,
            mem,
            wb_out,
            reference: HashMap::new(),
            trace,
            flushed: false,
            cycle: 0,
        })
    }

    pub fn cache(&self) -> &CacheStage {
        &self.cache
    }

    pub fn lsu(&self) -> &LoadStoreUnit {
        &self.lsu
    }

    pub fn mem(&self) -> &MemService {
        &self.mem
    }

    pub fn cycle(&self) -> Cycle {
        self.cycle
    }

    /// A halt has retired, so every dirty line is back in memory.
    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    pub fn finished(&self) -> bool {
        self.driver.all_retired() && self.lsu.is_idle()
    }

    pub fn report(&self) -> SimReport {
        SimReport {
            cycles: self.cycle,
            instrs_retired: self.driver.retired(),
            cache: self.cache.stats(),
            lsu: *self.lsu.state(),
            mem: *self.mem.state(),
            patterns: self.driver.checkpoints().to_vec(),
        }
    }

    /// Run until every instruction has retired, failing on timeout or on a value mismatch.
    pub fn simulate(&mut self) -> anyhow::Result<SimReport> {
        while !self.finished() {
            ensure!(
                self.cycle < self.config.timeout,
                "simulation timed out after {} cycles ({} of {} instrs retired)",
                self.cycle,
                self.driver.retired(),
                self.driver.issued()
            );
            self.tick_one()?;
        }
        if let Some(trace) = self.trace.as_mut() {
            trace.finish()?;
        }
        info!("sim: finished in {} cycles", self.cycle);
        Ok(self.report())
    }

    fn check_retired(&mut self, instr: &MemInstr) -> anyhow::Result<()> {
        match instr.op {
            MemOp::Load => {
                for lane in instr.active_lanes() {
                    let addr = instr.lane_addr(lane);
                    let expected = self.reference.get(&addr).copied().unwrap_or(0);
                    match instr.wdat[lane] {
                        Some(got) if got == expected => {}
                        got => bail!(
                            "instr {} lane {} load {:#010x}: got {:?}, expected {:#010x}",
                            instr.id,
                            lane,
                            addr,
                            got,
                            expected
                        ),
                    }
                }
            }
            MemOp::Store => {
                for lane in instr.active_lanes() {
                    self.reference.insert(instr.lane_addr(lane), instr.rdat2[lane]);
                }
            }
            MemOp::Halt => self.check_memory()?,
        }
        Ok(())
    }

    /// After a flush, backing memory holds every value ever stored.
    fn check_memory(&self) -> anyhow::Result<()> {
        for (&addr, &expected) in &self.reference {
            let got = self.mem.memory().read_word(addr as usize)?;
            ensure!(
                got == expected,
                "memory {:#010x} after flush: got {:#010x}, expected {:#010x}",
                addr,
                got,
                expected
            );
        }
        debug!("sim: {} words match after flush", self.reference.len());
        Ok(())
    }
}

impl ModuleBehaviors for Sim {
    fn tick_one(&mut self) -> anyhow::Result<()> {
        self.driver.tick(&self.lsu.ports().issue_in)?;
        self.mem.tick_one()?;
        self.cache.tick_one()?;
        if let (Some(trace), Some(event)) = (self.trace.as_mut(), self.cache.last_emitted()) {
            trace.record(self.cycle, event)?;
        }
        self.lsu.tick_one()?;

        if let Some(instr) = self.wb_out.pop() {
            self.flushed |= instr.op == MemOp::Halt;
            if self.config.verify {
                self.check_retired(&instr)?;
            }
            self.driver.retire(instr.id, self.cycle);
        }

        self.cycle += 1;
        Ok(())
    }

    fn reset(&mut self) {
        self.driver.restart();
        self.lsu.reset();
        self.cache.reset();
        self.mem.reset();
        self.wb_out.clear();
        self.reference.clear();
        self.flushed = false;
        self.cycle = 0;
    }
}
