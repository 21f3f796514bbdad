use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{bail, ensure};
use log::{debug, info};

use crate::base::behavior::*;
use crate::base::latch::Latch;
use crate::base::module::{module, IsModule, ModuleBase};
use super::addr::{Addr, AddrLayout};
use super::bank::CacheBank;
use super::config::CacheConfig;
use super::mshr::MissQueue;
use super::request::{AccessMode, CacheEvent, CacheRequest, CacheRequestKind, MemRequest, MemResponse};
use super::stats::CacheStats;

/// The four handshakes around the cache: requests in, events out, and the memory side.
#[derive(Debug, Clone)]
pub struct CachePorts {
    pub req_in: Latch<CacheRequest>,
    pub resp_out: Latch<CacheEvent>,
    pub mem_req: Latch<MemRequest>,
    pub mem_resp: Latch<MemResponse>,
}

impl CachePorts {
    pub fn new() -> Self {
        Self {
            req_in: Latch::new("dcache_req"),
            resp_out: Latch::new("dcache_resp"),
            mem_req: Latch::new("mem_req"),
            mem_resp: Latch::new("mem_resp"),
        }
    }
}

impl Default for CachePorts {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
struct HitResult {
    address: u32,
    data: u32,
    line: Vec<u32>,
}

enum Lookup {
    Hit(HitResult),
    Miss(CacheEvent),
    Stall,
}

/// Lockup-free banked dcache: one request lookup per cycle, a fixed-latency hit pipeline, and a
/// per-bank miss FSM servicing that bank's miss queue in order.
pub struct CacheStage {
    base: ModuleBase<CacheStats, CacheConfig>,
    layout: AddrLayout,
    ports: CachePorts,
    banks: Vec<CacheBank>,
    mshrs: Vec<MissQueue>,
    pending: Option<(CacheRequest, Addr)>,
    hit_pipeline: VecDeque<Option<HitResult>>,
    hit_pipeline_busy: bool,
    // one HitStall per pipelined hit
    hit_stall: bool,
    output: VecDeque<CacheEvent>,
    flushing: bool,
    halted: bool,
    emitted: Option<CacheEvent>,
}

impl CacheStage {
    pub fn new(config: Arc<CacheConfig>, ports: CachePorts) -> anyhow::Result<Self> {
        let layout = config.layout()?;
        let banks = (0..config.num_banks)
            .map(|bank_id| {
                CacheBank::new(
                    bank_id,
                    layout,
                    config.sets_per_bank,
                    config.num_ways,
                    config.block_size_words,
                    ports.mem_req.clone(),
                )
            })
            .collect();
        let mshrs = (0..config.num_banks)
            .map(|bank_id| {
                MissQueue::new(
                    bank_id,
                    config.mshr_depth,
                    config.mshr_latency,
                    layout,
                    config.block_size_words,
                    config.uuid_bits,
                )
            })
            .collect();
        let hit_pipeline = std::iter::repeat_with(|| None)
            .take(config.hit_latency)
            .collect();
        Ok(Self {
            base: ModuleBase::new(config),
            layout,
            ports,
            banks,
            mshrs,
            pending: None,
            hit_pipeline,
            hit_pipeline_busy: false,
            hit_stall: false,
            output: VecDeque::new(),
            flushing: false,
            halted: false,
            emitted: None,
        })
    }

    pub fn layout(&self) -> &AddrLayout {
        &self.layout
    }

    pub fn ports(&self) -> &CachePorts {
        &self.ports
    }

    pub fn bank(&self, bank_id: usize) -> &CacheBank {
        &self.banks[bank_id]
    }

    pub fn miss_queue(&self, bank_id: usize) -> &MissQueue {
        &self.mshrs[bank_id]
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn has_pending_request(&self) -> bool {
        self.pending.is_some()
    }

    /// Nothing in flight anywhere in the stage.
    pub fn is_quiescent(&self) -> bool {
        self.pending.is_none()
            && !self.hit_pipeline_busy
            && self.output.is_empty()
            && self.mshrs.iter().all(MissQueue::is_empty)
            && self.banks.iter().all(|bank| bank.is_idle() || bank.is_halted())
    }

    /// Event handed to the response latch during the last tick.
    pub fn last_emitted(&self) -> Option<&CacheEvent> {
        self.emitted.as_ref()
    }

    /// Stage counters plus every bank's.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.base.state;
        for bank in &self.banks {
            stats += bank.stats();
        }
        stats
    }

    fn route_mem_response(&mut self) -> anyhow::Result<()> {
        if let Some(response) = self.ports.mem_resp.pop() {
            let bank_id = response.bank_id();
            let Some(bank) = self.banks.get_mut(bank_id) else {
                bail!("memory response {:?} names bank {} of {}", response, bank_id, self.banks.len());
            };
            bank.complete_mem_access(response)?;
        }
        Ok(())
    }

    fn cycle_banks(&mut self) -> anyhow::Result<()> {
        for queue in self.mshrs.iter_mut() {
            queue.cycle();
        }
        for (bank, queue) in self.banks.iter_mut().zip(self.mshrs.iter_mut()) {
            let status = bank.cycle(queue)?;
            if !status.ready {
                continue;
            }
            let Some(entry) = queue.pop_head() else {
                bail!("bank {} completed miss {:?} with an empty queue", bank.bank_id(), status.completed_id);
            };
            ensure!(
                status.completed_id == Some(entry.id),
                "bank {} completed miss {:?} but queue head is {}",
                bank.bank_id(),
                status.completed_id,
                entry.id
            );
            let Some(line) = bank.line_words(&entry.addr) else {
                bail!("bank {}: miss {} completed but its line is not resident", bank.bank_id(), entry.id);
            };
            info!(
                "bank {}: miss {} complete for {:#010x} ({} requestors)",
                bank.bank_id(),
                entry.id,
                entry.addr.raw,
                entry.requestor_ids.len()
            );
            self.output.push_back(CacheEvent::MissComplete {
                id: entry.id,
                address: entry.addr.raw,
                line: line.to_vec(),
            });
        }
        Ok(())
    }

    fn start_misses(&mut self) -> anyhow::Result<()> {
        for (bank, queue) in self.banks.iter_mut().zip(self.mshrs.iter_mut()) {
            if !bank.is_idle() {
                continue;
            }
            if let Some(entry) = queue.head_if_ready() {
                bank.start_miss_service(entry)?;
                queue.claim_head();
            }
        }
        Ok(())
    }

    fn advance_flush(&mut self) -> anyhow::Result<()> {
        if !self.flushing {
            return Ok(());
        }
        for (bank, queue) in self.banks.iter_mut().zip(self.mshrs.iter()) {
            if bank.is_idle() && queue.is_empty() {
                bank.start_flush()?;
            }
        }
        if !self.hit_pipeline_busy && self.banks.iter().all(CacheBank::is_halted) {
            info!("dcache: all banks halted, flush complete");
            self.flushing = false;
            self.halted = true;
            self.output.push_back(CacheEvent::FlushComplete);
        }
        Ok(())
    }

    fn lookup(&mut self, request: &CacheRequest, addr: &Addr) -> anyhow::Result<Lookup> {
        let layout = self.layout;
        let bank = &mut self.banks[addr.bank_id];
        let hit = match &request.kind {
            CacheRequestKind::Load => bank.check_hit(addr, AccessMode::Read, 0).0,
            CacheRequestKind::Store(writes) => {
                let (hit, _) = bank.check_hit(addr, AccessMode::Read, 0);
                if hit {
                    for &(word_addr, value) in writes.iter() {
                        bank.check_hit(&layout.decode(word_addr), AccessMode::Write, value);
                    }
                }
                hit
            }
            CacheRequestKind::Halt => bail!("halt request reached the lookup path"),
        };
        if hit {
            self.base.state.record_access(true);
            let Some(line) = bank.line_words(addr) else {
                bail!("bank {}: line for {:#010x} vanished after a hit", addr.bank_id, addr.raw);
            };
            let line = line.to_vec();
            debug!("dcache: hit {:#010x} in bank {}", addr.raw, addr.bank_id);
            return Ok(Lookup::Hit(HitResult {
                address: request.addr,
                data: line[addr.block_offset],
                line,
            }));
        }

        let bank_busy = bank.is_busy();
        let queue = &mut self.mshrs[addr.bank_id];
        if queue.check_stall(bank_busy) {
            self.base.state.record_mshr_stall();
            debug!("dcache: bank {} miss queue full, stalling {:#010x}", addr.bank_id, addr.raw);
            return Ok(Lookup::Stall);
        }
        match queue.add_miss(request, addr) {
            Ok((id, is_new)) => {
                // stalled lookups retry and are only counted once they go through
                self.base.state.record_access(false);
                self.base.state.record_miss(!is_new);
                if is_new {
                    info!("dcache: miss {} accepted for {:#010x}", id, addr.raw);
                } else {
                    debug!("dcache: secondary miss {:#010x} merged into {}", addr.raw, id);
                }
                Ok(Lookup::Miss(CacheEvent::MissAccepted {
                    id,
                    address: request.addr,
                    is_secondary: !is_new,
                }))
            }
            Err(full) => {
                self.base.state.record_mshr_stall();
                debug!("dcache: {}, stalling {:#010x}", full, addr.raw);
                Ok(Lookup::Stall)
            }
        }
    }

    fn accept_input(&mut self) -> anyhow::Result<()> {
        if self.halted || self.flushing || self.pending.is_some() || !self.ports.req_in.valid() {
            return Ok(());
        }
        if self.hit_pipeline_busy {
            if self.hit_stall {
                self.hit_stall = false;
                self.base.state.record_hit_stall();
                self.output.push_back(CacheEvent::HitStall);
            }
            return Ok(());
        }
        let Some(request) = self.ports.req_in.pop() else {
            return Ok(());
        };
        if request.is_halt() {
            info!("dcache: halt received, flushing once outstanding misses drain");
            self.flushing = true;
            return Ok(());
        }

        let line_base = self.layout.line_base(request.addr);
        for &(word_addr, _) in request.writes() {
            ensure!(
                self.layout.line_base(word_addr) == line_base && word_addr & 0x3 == 0,
                "store to {:#010x} carried in request for line {:#010x}",
                word_addr,
                line_base
            );
        }
        let addr = self.layout.decode(request.addr);
        self.pending = Some((request, addr));
        Ok(())
    }

    fn emit(&mut self) {
        self.emitted = None;
        if !self.ports.resp_out.ready_for_push() {
            return;
        }
        if let Some(event) = self.output.pop_front() {
            match self.ports.resp_out.push(event.clone()) {
                Ok(()) => self.emitted = Some(event),
                Err(event) => self.output.push_front(event),
            }
        }
    }
}

module!(CacheStage, CacheStats, CacheConfig,);

impl ModuleBehaviors for CacheStage {
    fn tick_one(&mut self) -> anyhow::Result<()> {
        self.route_mem_response()?;

        let mut hit_completed = false;
        if let Some(Some(hit)) = self.hit_pipeline.pop_front() {
            self.output.push_back(CacheEvent::HitComplete {
                address: hit.address,
                data: hit.data,
                line: hit.line,
            });
            self.hit_pipeline_busy = false;
            hit_completed = true;
        }

        self.cycle_banks()?;
        self.start_misses()?;
        self.advance_flush()?;

        // a hit pipeline freed this cycle is reused from the next one
        let mut lookup_result = None;
        if !hit_completed {
            if !self.hit_pipeline_busy {
                if let Some((request, addr)) = self.pending.take() {
                    match self.lookup(&request, &addr)? {
                        Lookup::Hit(hit) => {
                            lookup_result = Some(hit);
                            self.hit_pipeline_busy = true;
                            self.hit_stall = true;
                        }
                        Lookup::Miss(event) => self.output.push_back(event),
                        Lookup::Stall => self.pending = Some((request, addr)),
                    }
                }
            }
            self.accept_input()?;
        }
        self.hit_pipeline.push_back(lookup_result);

        self.emit();
        self.base.cycle += 1;
        Ok(())
    }

    fn reset(&mut self) {
        self.base.reset();
        for bank in self.banks.iter_mut() {
            bank.reset();
        }
        for queue in self.mshrs.iter_mut() {
            queue.reset();
        }
        self.pending = None;
        self.hit_pipeline.iter_mut().for_each(|slot| *slot = None);
        self.hit_pipeline_busy = false;
        self.hit_stall = false;
        self.output.clear();
        self.flushing = false;
        self.halted = false;
        self.emitted = None;
    }
}
