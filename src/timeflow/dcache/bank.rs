use anyhow::{bail, ensure};
use log::{debug, info};

use crate::base::latch::Latch;
use super::addr::{Addr, AddrLayout};
use super::line::CacheLine;
use super::mshr::{MissEntry, MissQueue};
use super::request::{bytes_to_words, words_to_bytes, AccessMode, MemMode, MemRequest, MemResponse, MissId};
use super::stats::CacheStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankState {
    Start,
    BlockPull,
    VictimEject,
    Finish,
    Flush { set: usize, way: usize },
    Writeback { set: usize, way: usize },
    Halt,
}

/// What one `CacheBank::cycle` reports back to the stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BankCycle {
    pub ready: bool,
    pub completed_id: Option<MissId>,
}

/// The miss the bank is currently servicing.
#[derive(Debug, Clone, Copy)]
struct ActiveMiss {
    id: MissId,
    set: usize,
    way: usize,
    line_addr: u32,
}

#[derive(Debug, Clone)]
struct Victim {
    line: CacheLine,
    addr: u32,
}

#[derive(Debug)]
pub struct CacheBank {
    bank_id: usize,
    layout: AddrLayout,
    num_ways: usize,
    block_size_words: usize,
    sets: Vec<Vec<CacheLine>>,
    // per set, front is most recently used
    lru: Vec<Vec<usize>>,
    state: BankState,
    active: Option<ActiveMiss>,
    victim: Option<Victim>,
    fill_buffer: Option<CacheLine>,
    mem_req: Latch<MemRequest>,
    waiting_for_mem: bool,
    incoming: Option<MemResponse>,
    stats: CacheStats,
}

impl CacheBank {
    pub fn new(
        bank_id: usize,
        layout: AddrLayout,
        num_sets: usize,
        num_ways: usize,
        block_size_words: usize,
        mem_req: Latch<MemRequest>,
    ) -> Self {
        Self {
            bank_id,
            layout,
            num_ways,
            block_size_words,
            sets: vec![vec![CacheLine::empty(block_size_words); num_ways]; num_sets],
            lru: vec![(0..num_ways).collect(); num_sets],
            state: BankState::Start,
            active: None,
            victim: None,
            fill_buffer: None,
            mem_req,
            waiting_for_mem: false,
            incoming: None,
            stats: CacheStats::default(),
        }
    }

    pub fn bank_id(&self) -> usize {
        self.bank_id
    }

    pub fn state(&self) -> BankState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == BankState::Start
    }

    pub fn is_busy(&self) -> bool {
        !self.is_idle()
    }

    pub fn is_halted(&self) -> bool {
        self.state == BankState::Halt
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn line(&self, set: usize, way: usize) -> &CacheLine {
        &self.sets[set][way]
    }

    pub fn lru_order(&self, set: usize) -> &[usize] {
        &self.lru[set]
    }

    /// Way holding `addr`'s line, without touching LRU.
    pub fn find_way(&self, addr: &Addr) -> Option<usize> {
        self.sets[addr.set_index]
            .iter()
            .position(|line| line.matches(addr.tag))
    }

    /// Current contents of `addr`'s line, if resident.
    pub fn line_words(&self, addr: &Addr) -> Option<&[u32]> {
        self.find_way(addr)
            .map(|way| self.sets[addr.set_index][way].words.as_slice())
    }

    /// Look `addr` up; on a hit move the way to MRU and, for a write, update the word and mark
    /// the line dirty.  Returns the hit flag and the word after the access.
    pub fn check_hit(&mut self, addr: &Addr, mode: AccessMode, data: u32) -> (bool, u32) {
        let Some(way) = self.find_way(addr) else {
            return (false, 0);
        };
        self.touch(addr.set_index, way);
        let line = &mut self.sets[addr.set_index][way];
        if mode == AccessMode::Write {
            line.words[addr.block_offset] = data;
            line.dirty = true;
        }
        (true, line.words[addr.block_offset])
    }

    fn touch(&mut self, set: usize, way: usize) {
        let order = &mut self.lru[set];
        if let Some(pos) = order.iter().position(|&idx| idx == way) {
            order.remove(pos);
        }
        order.insert(0, way);
    }

    /// Claim `entry`: pick and invalidate the LRU victim of its set and start fetching.
    pub fn start_miss_service(&mut self, entry: &MissEntry) -> anyhow::Result<()> {
        if self.state != BankState::Start || self.active.is_some() {
            bail!(
                "bank {}: start_miss_service for miss {} (block {:#x}) while in {:?} with miss {:?} active",
                self.bank_id,
                entry.id,
                entry.block_address,
                self.state,
                self.active.map(|active| active.id)
            );
        }
        ensure!(
            entry.addr.bank_id == self.bank_id,
            "bank {}: miss {} belongs to bank {}",
            self.bank_id,
            entry.id,
            entry.addr.bank_id
        );

        let set = entry.addr.set_index;
        let Some(&way) = self.lru[set].last() else {
            bail!("bank {}: set {} has no ways", self.bank_id, set);
        };
        let evicted = self.sets[set][way].clone();
        let victim_addr = self.layout.compose(evicted.tag, set, self.bank_id);

        self.fill_buffer = Some(CacheLine {
            valid: true,
            dirty: entry.has_writes(),
            tag: entry.addr.tag,
            words: vec![0; self.block_size_words],
        });
        // no hit may observe the line while it is being replaced
        let slot = &mut self.sets[set][way];
        slot.valid = false;
        slot.dirty = false;

        self.active = Some(ActiveMiss {
            id: entry.id,
            set,
            way,
            line_addr: self.layout.compose(entry.addr.tag, set, self.bank_id),
        });
        self.state = if evicted.needs_writeback() {
            info!(
                "bank {}: miss {} evicts dirty line {:#010x} from set {} way {}",
                self.bank_id, entry.id, victim_addr, set, way
            );
            BankState::VictimEject
        } else {
            debug!(
                "bank {}: miss {} fills set {} way {} (victim valid={})",
                self.bank_id, entry.id, set, way, evicted.valid
            );
            BankState::BlockPull
        };
        self.victim = Some(Victim {
            line: evicted,
            addr: victim_addr,
        });
        Ok(())
    }

    /// Start writing back every dirty line; only legal from `Start`.
    pub fn start_flush(&mut self) -> anyhow::Result<()> {
        ensure!(
            self.state == BankState::Start && self.active.is_none(),
            "bank {}: flush requested while in {:?}",
            self.bank_id,
            self.state
        );
        info!("bank {}: starting flush", self.bank_id);
        self.state = BankState::Flush { set: 0, way: 0 };
        Ok(())
    }

    /// Hand a memory response to the bank; it is consumed by the next `cycle`.
    pub fn complete_mem_access(&mut self, response: MemResponse) -> anyhow::Result<()> {
        ensure!(
            self.waiting_for_mem && self.incoming.is_none(),
            "bank {}: unexpected memory response {:?} in {:?}",
            self.bank_id,
            response,
            self.state
        );
        let expected = match (&response, self.state) {
            (MemResponse::Read { .. }, BankState::BlockPull) => true,
            (MemResponse::WriteAck { .. }, BankState::VictimEject | BankState::Writeback { .. }) => true,
            _ => false,
        };
        ensure!(
            expected,
            "bank {}: memory response {:?} does not match state {:?}",
            self.bank_id,
            response,
            self.state
        );
        self.waiting_for_mem = false;
        self.incoming = Some(response);
        Ok(())
    }

    fn issue(&mut self, request: MemRequest) -> bool {
        let mode = request.mode;
        match self.mem_req.push(request) {
            Ok(()) => {
                self.waiting_for_mem = true;
                match mode {
                    MemMode::Read => self.stats.record_mem_read(),
                    MemMode::Write => self.stats.record_mem_write(),
                }
                true
            }
            Err(_) => false,
        }
    }

    fn can_issue(&self) -> bool {
        !self.waiting_for_mem && self.incoming.is_none() && self.mem_req.ready_for_push()
    }

    fn next_dirty(&self, mut set: usize, mut way: usize) -> Option<(usize, usize)> {
        while set < self.sets.len() {
            if self.sets[set][way].needs_writeback() {
                return Some((set, way));
            }
            way += 1;
            if way == self.num_ways {
                way = 0;
                set += 1;
            }
        }
        None
    }

    fn active(&self) -> anyhow::Result<ActiveMiss> {
        match self.active {
            Some(active) => Ok(active),
            None => bail!("bank {}: {:?} with no active miss", self.bank_id, self.state),
        }
    }

    /// The claimed head of this bank's queue, which must be the miss being serviced.
    fn serviced_entry<'q>(&self, queue: &'q MissQueue, id: MissId) -> anyhow::Result<&'q MissEntry> {
        match queue.head() {
            Some(entry) if entry.id == id && entry.is_claimed() => Ok(entry),
            other => bail!(
                "bank {}: serviced miss {} is not the claimed queue head (head is {:?})",
                self.bank_id,
                id,
                other.map(|entry| entry.id)
            ),
        }
    }

    /// Advance the FSM by one transition.
    pub fn cycle(&mut self, queue: &MissQueue) -> anyhow::Result<BankCycle> {
        let mut result = BankCycle::default();
        match self.state {
            BankState::Start => {}
            BankState::BlockPull => {
                let active = self.active()?;
                if let Some(response) = self.incoming.take() {
                    let data = match response {
                        MemResponse::Read { data, .. } => data,
                        other => bail!("bank {}: block pull got {:?}", self.bank_id, other),
                    };
                    let mut words = bytes_to_words(&data);
                    ensure!(
                        words.len() == self.block_size_words,
                        "bank {}: block pull for miss {} returned {} words, expected {}",
                        self.bank_id,
                        active.id,
                        words.len(),
                        self.block_size_words
                    );
                    self.serviced_entry(queue, active.id)?.apply_writes(&mut words);
                    match self.fill_buffer.as_mut() {
                        Some(fill) => fill.words = words,
                        None => bail!("bank {}: block pull with no fill buffer", self.bank_id),
                    }
                    debug!("bank {}: miss {} data arrived", self.bank_id, active.id);
                    self.state = BankState::Finish;
                } else if self.can_issue() {
                    let request = MemRequest {
                        addr: active.line_addr,
                        size_bytes: self.layout.line_bytes(),
                        request_id: active.id,
                        bank_id: self.bank_id,
                        mode: MemMode::Read,
                        data: None,
                    };
                    if self.issue(request) {
                        debug!(
                            "bank {}: miss {} reads line {:#010x}",
                            self.bank_id, active.id, active.line_addr
                        );
                    }
                }
            }
            BankState::VictimEject => {
                let active = self.active()?;
                if let Some(response) = self.incoming.take() {
                    ensure!(
                        matches!(response, MemResponse::WriteAck { .. }),
                        "bank {}: victim eject got {:?}",
                        self.bank_id,
                        response
                    );
                    self.stats.record_dirty_writeback();
                    self.state = BankState::BlockPull;
                } else if self.can_issue() {
                    let Some(victim) = self.victim.as_ref() else {
                        bail!("bank {}: victim eject with no latched victim", self.bank_id);
                    };
                    let request = MemRequest {
                        addr: victim.addr,
                        size_bytes: self.layout.line_bytes(),
                        request_id: active.id,
                        bank_id: self.bank_id,
                        mode: MemMode::Write,
                        data: Some(words_to_bytes(&victim.line.words)),
                    };
                    let victim_addr = victim.addr;
                    if self.issue(request) {
                        debug!(
                            "bank {}: miss {} writes back victim {:#010x}",
                            self.bank_id, active.id, victim_addr
                        );
                    }
                }
            }
            BankState::Finish => {
                let active = self.active()?;
                let Some(victim) = self.victim.take() else {
                    bail!(
                        "bank {}: FINISH for miss {} with no latched victim",
                        self.bank_id,
                        active.id
                    );
                };
                let Some(mut fill) = self.fill_buffer.take() else {
                    bail!("bank {}: FINISH for miss {} with no fill buffer", self.bank_id, active.id);
                };
                // stores may have merged after the data arrived
                let entry = self.serviced_entry(queue, active.id)?;
                entry.apply_writes(&mut fill.words);
                fill.dirty = fill.dirty || entry.has_writes();

                self.sets[active.set][active.way] = fill;
                self.touch(active.set, active.way);
                self.stats.record_fill(victim.line.valid && !victim.line.dirty);
                self.active = None;
                self.state = BankState::Start;
                debug!(
                    "bank {}: miss {} installed in set {} way {}",
                    self.bank_id, active.id, active.set, active.way
                );
                result.ready = true;
                result.completed_id = Some(active.id);
            }
            BankState::Flush { set, way } => {
                self.state = match self.next_dirty(set, way) {
                    Some((set, way)) => BankState::Writeback { set, way },
                    None => {
                        info!("bank {}: flush done, halting", self.bank_id);
                        BankState::Halt
                    }
                };
            }
            BankState::Writeback { set, way } => {
                if let Some(response) = self.incoming.take() {
                    ensure!(
                        matches!(response, MemResponse::WriteAck { .. }),
                        "bank {}: flush writeback got {:?}",
                        self.bank_id,
                        response
                    );
                    self.sets[set][way].dirty = false;
                    self.stats.record_flush_writeback();
                    let (set, way) = if way + 1 == self.num_ways {
                        (set + 1, 0)
                    } else {
                        (set, way + 1)
                    };
                    self.state = BankState::Flush { set, way };
                } else if self.can_issue() {
                    let line = &self.sets[set][way];
                    let addr = self.layout.compose(line.tag, set, self.bank_id);
                    let request = MemRequest {
                        addr,
                        size_bytes: self.layout.line_bytes(),
                        request_id: 0,
                        bank_id: self.bank_id,
                        mode: MemMode::Write,
                        data: Some(words_to_bytes(&line.words)),
                    };
                    if self.issue(request) {
                        debug!("bank {}: flushing line {:#010x}", self.bank_id, addr);
                    }
                }
            }
            BankState::Halt => {}
        }
        Ok(result)
    }

    pub fn reset(&mut self) {
        for set in self.sets.iter_mut() {
            set.fill(CacheLine::empty(self.block_size_words));
        }
        for order in self.lru.iter_mut() {
            order.clear();
            order.extend(0..self.num_ways);
        }
        self.state = BankState::Start;
        self.active = None;
        self.victim = None;
        self.fill_buffer = None;
        self.waiting_for_mem = false;
        self.incoming = None;
        self.stats = CacheStats::default();
    }
}
