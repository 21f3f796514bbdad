use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{bail, Context};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::base::behavior::*;
use crate::base::latch::{Latch, WaitFlag};
use crate::base::module::{module, IsModule, ModuleBase};
use crate::sim::config::Config;
use crate::timeflow::dcache::{AddrLayout, CacheEvent, CacheRequest};
use super::coalesce::Coalesce;
use super::instr::MemInstr;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LsuConfig {
    pub queue_depth: usize,
    pub wb_buffer_size: usize,
}

impl Config for LsuConfig {}

impl Default for LsuConfig {
    fn default() -> Self {
        Self {
            queue_depth: 4,
            wb_buffer_size: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LsuStats {
    instrs_accepted: u64,
    instrs_retired: u64,
    cache_requests: u64,
    hits: u64,
    misses: u64,
    secondary_misses: u64,
    fills: u64,
    hit_stalls: u64,
    backpressure_cycles: u64,
}

impl LsuStats {
    pub fn instrs_accepted(&self) -> u64 {
        self.instrs_accepted
    }

    pub fn instrs_retired(&self) -> u64 {
        self.instrs_retired
    }

    pub fn cache_requests(&self) -> u64 {
        self.cache_requests
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn fills(&self) -> u64 {
        self.fills
    }

    pub fn backpressure_cycles(&self) -> u64 {
        self.backpressure_cycles
    }
}

/// Handshakes of the load/store unit: instructions in from issue (held off through
/// `issue_wait`), requests to and events from the dcache, retired instructions out.
#[derive(Debug, Clone)]
pub struct LsuPorts {
    pub issue_in: Latch<MemInstr>,
    pub issue_wait: WaitFlag,
    pub cache_req: Latch<CacheRequest>,
    pub cache_resp: Latch<CacheEvent>,
    pub wb_out: Latch<MemInstr>,
}

impl LsuPorts {
    /// Fresh issue and writeback latches around the given dcache handshakes.
    pub fn new(cache_req: Latch<CacheRequest>, cache_resp: Latch<CacheEvent>) -> Self {
        let issue_wait = WaitFlag::new();
        Self {
            issue_in: Latch::with_wait("lsu_issue", issue_wait.clone()),
            issue_wait,
            cache_req,
            cache_resp,
            wb_out: Latch::new("lsu_wb"),
        }
    }
}

pub struct LoadStoreUnit {
    base: ModuleBase<LsuStats, LsuConfig>,
    layout: AddrLayout,
    ports: LsuPorts,
    queue: VecDeque<Coalesce>,
    outstanding: bool,
    wb_buffer: VecDeque<MemInstr>,
}

impl LoadStoreUnit {
    pub fn new(config: Arc<LsuConfig>, layout: AddrLayout, ports: LsuPorts) -> anyhow::Result<Self> {
        anyhow::ensure!(config.queue_depth > 0, "lsu.queue_depth must be > 0");
        anyhow::ensure!(config.wb_buffer_size > 0, "lsu.wb_buffer_size must be > 0");
        Ok(Self {
            base: ModuleBase::new(config),
            layout,
            ports,
            queue: VecDeque::new(),
            outstanding: false,
            wb_buffer: VecDeque::new(),
        })
    }

    pub fn ports(&self) -> &LsuPorts {
        &self.ports
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn head(&self) -> Option<&Coalesce> {
        self.queue.front()
    }

    pub fn is_outstanding(&self) -> bool {
        self.outstanding
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.wb_buffer.is_empty() && !self.outstanding
    }

    fn drain_writeback(&mut self) {
        if !self.ports.wb_out.ready_for_push() {
            return;
        }
        if let Some(instr) = self.wb_buffer.pop_front() {
            if let Err(instr) = self.ports.wb_out.push(instr) {
                self.wb_buffer.push_front(instr);
            }
        }
    }

    fn accept(&mut self) -> anyhow::Result<()> {
        let depth = self.base.config.queue_depth;
        if self.queue.len() < depth {
            if let Some(instr) = self.ports.issue_in.pop() {
                let id = instr.id;
                let coalesce = Coalesce::new(instr, self.layout)?;
                debug!(
                    "lsu: accepted instr {} ({} lines)",
                    id,
                    coalesce.pending().count()
                );
                self.queue.push_back(coalesce);
                self.base.state.instrs_accepted += 1;
            }
        } else if self.ports.issue_in.valid() {
            self.base.state.backpressure_cycles += 1;
        }
        self.ports.issue_wait.set_wait(self.queue.len() >= depth);
        Ok(())
    }

    fn issue(&mut self) -> anyhow::Result<()> {
        if self.outstanding || !self.ports.cache_req.ready_for_push() {
            return Ok(());
        }
        let Some(head) = self.queue.front_mut() else {
            return Ok(());
        };
        if let Some(request) = head.gen_request() {
            debug!("lsu: instr {} requests {:#010x}", head.id(), request.addr);
            if self.ports.cache_req.push(request).is_err() {
                bail!("dcache request latch refused a request after reporting ready");
            }
            self.outstanding = true;
            self.base.state.cache_requests += 1;
        }
        Ok(())
    }

    fn handle_response(&mut self) -> anyhow::Result<()> {
        let Some(event) = self.ports.cache_resp.pop() else {
            return Ok(());
        };
        let Some(head) = self.queue.front_mut() else {
            bail!("lsu: dcache event {:?} with no instruction in flight", event);
        };
        let id = head.id();
        match event {
            CacheEvent::MissAccepted { address, is_secondary, .. } => {
                head.parse_miss(address)
                    .with_context(|| format!("lsu: MISS_ACCEPTED for instr {id}"))?;
                self.outstanding = false;
                self.base.state.misses += 1;
                if is_secondary {
                    self.base.state.secondary_misses += 1;
                }
            }
            CacheEvent::HitComplete { address, line, .. } => {
                head.parse_hit(address, &line)
                    .with_context(|| format!("lsu: HIT_COMPLETE for instr {id}"))?;
                self.outstanding = false;
                self.base.state.hits += 1;
            }
            CacheEvent::MissComplete { address, line, .. } => {
                head.parse_hit(address, &line)
                    .with_context(|| format!("lsu: MISS_COMPLETE for instr {id}"))?;
                self.base.state.fills += 1;
            }
            CacheEvent::FlushComplete => {
                head.parse_flush_complete()
                    .with_context(|| format!("lsu: FLUSH_COMPLETE for instr {id}"))?;
                self.outstanding = false;
            }
            CacheEvent::HitStall => {
                self.base.state.hit_stalls += 1;
            }
        }
        Ok(())
    }

    fn retire(&mut self) {
        if self.wb_buffer.len() >= self.base.config.wb_buffer_size {
            return;
        }
        if !self.queue.front().is_some_and(Coalesce::ready_for_writeback) {
            return;
        }
        if let Some(done) = self.queue.pop_front() {
            info!("lsu: instr {} retired at cycle {}", done.id(), self.base.cycle);
            self.wb_buffer.push_back(done.into_instr());
            self.base.state.instrs_retired += 1;
        }
    }
}

module!(LoadStoreUnit, LsuStats, LsuConfig,);

impl ModuleBehaviors for LoadStoreUnit {
    fn tick_one(&mut self) -> anyhow::Result<()> {
        self.drain_writeback();
        self.accept()?;
        self.issue()?;
        self.handle_response()?;
        self.retire();
        self.base.cycle += 1;
        Ok(())
    }

    fn reset(&mut self) {
        self.base.reset();
        self.queue.clear();
        self.wb_buffer.clear();
        self.outstanding = false;
        self.ports.issue_wait.set_wait(false);
    }
}
