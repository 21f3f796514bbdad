use std::collections::VecDeque;
use std::fmt;

use log::debug;
use smallvec::SmallVec;

use super::addr::{Addr, AddrLayout};
use super::request::{CacheRequest, MissId};

/// One outstanding line fetch and everything merged into it.
#[derive(Debug, Clone)]
pub struct MissEntry {
    pub id: MissId,
    pub block_address: u32,
    /// Decoded address of the request that allocated the entry
    pub addr: Addr,
    pub requestor_ids: SmallVec<[u64; 4]>,
    pub write_mask: Vec<bool>,
    pub write_data: Vec<u32>,
    pub countdown: u32,
    pub original_request: CacheRequest,
    claimed: bool,
}

impl MissEntry {
    pub fn is_ready(&self) -> bool {
        self.countdown == 0
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed
    }

    /// Whether any store merged into this miss.
    pub fn has_writes(&self) -> bool {
        self.write_mask.iter().any(|&w| w)
    }

    /// Overlay the merged store data onto `words`.
    pub fn apply_writes(&self, words: &mut [u32]) {
        for (word, (&written, &value)) in words
            .iter_mut()
            .zip(self.write_mask.iter().zip(self.write_data.iter()))
        {
            if written {
                *word = value;
            }
        }
    }

    fn merge(&mut self, request: &CacheRequest, layout: &AddrLayout) {
        for &(addr, value) in request.writes() {
            let offset = layout.decode(addr).block_offset;
            self.write_mask[offset] = true;
            self.write_data[offset] = value;
        }
        if !self.requestor_ids.contains(&request.requestor) {
            self.requestor_ids.push(request.requestor);
        }
    }
}

/// Backpressure from [`MissQueue::add_miss`]: no entry to merge into and no room for a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissQueueFull {
    pub bank_id: usize,
    pub capacity: usize,
}

impl fmt::Display for MissQueueFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bank {} miss queue full ({} entries)", self.bank_id, self.capacity)
    }
}

impl std::error::Error for MissQueueFull {}

/// Per-bank FIFO of outstanding misses.
#[derive(Debug)]
pub struct MissQueue {
    bank_id: usize,
    capacity: usize,
    latency: u32,
    layout: AddrLayout,
    block_size_words: usize,
    local_bits: u32,
    counter: u64,
    entries: VecDeque<MissEntry>,
}

impl MissQueue {
    pub fn new(
        bank_id: usize,
        capacity: usize,
        latency: u32,
        layout: AddrLayout,
        block_size_words: usize,
        uuid_bits: u32,
    ) -> Self {
        debug_assert!(uuid_bits > layout.bank_id_bits);
        Self {
            bank_id,
            capacity,
            latency,
            layout,
            block_size_words,
            local_bits: uuid_bits - layout.bank_id_bits,
            counter: 0,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MissEntry> {
        self.entries.iter()
    }

    /// A new miss must wait when the queue is full and the bank cannot drain it this cycle.
    pub fn check_stall(&self, bank_busy: bool) -> bool {
        self.is_full() && bank_busy
    }

    pub fn find_merge(&self, block_address: u32) -> Option<&MissEntry> {
        self.entries
            .iter()
            .find(|entry| entry.block_address == block_address)
    }

    /// Merge `request` into the outstanding miss for its block, or allocate a new one.
    /// Returns the entry id and whether it was newly allocated.
    pub fn add_miss(
        &mut self,
        request: &CacheRequest,
        addr: &Addr,
    ) -> Result<(MissId, bool), MissQueueFull> {
        let layout = self.layout;
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.block_address == addr.block_address)
        {
            entry.merge(request, &layout);
            debug!(
                "bank {}: merged {:#010x} into miss {} (block {:#x})",
                self.bank_id, addr.raw, entry.id, entry.block_address
            );
            return Ok((entry.id, false));
        }

        if self.is_full() {
            return Err(MissQueueFull {
                bank_id: self.bank_id,
                capacity: self.capacity,
            });
        }

        let id = self.next_id();
        let mut entry = MissEntry {
            id,
            block_address: addr.block_address,
            addr: *addr,
            requestor_ids: SmallVec::new(),
            write_mask: vec![false; self.block_size_words],
            write_data: vec![0; self.block_size_words],
            countdown: self.latency,
            original_request: request.clone(),
            claimed: false,
        };
        entry.merge(request, &layout);
        self.entries.push_back(entry);
        Ok((id, true))
    }

    fn next_id(&mut self) -> MissId {
        let local_mask = (1u64 << self.local_bits) - 1;
        self.counter = (self.counter + 1) & local_mask;
        (((self.bank_id as u64) << self.local_bits) | self.counter) as MissId
    }

    /// Age every entry by one cycle, serviced or not.
    pub fn cycle(&mut self) {
        for entry in self.entries.iter_mut() {
            entry.countdown = entry.countdown.saturating_sub(1);
        }
    }

    pub fn head(&self) -> Option<&MissEntry> {
        self.entries.front()
    }

    /// The head entry, if it has finished aging and no bank has claimed it yet.
    pub fn head_if_ready(&self) -> Option<&MissEntry> {
        self.entries
            .front()
            .filter(|entry| entry.is_ready() && !entry.claimed)
    }

    /// Mark the head as taken by the bank; it stays queued until `pop_head`.
    pub fn claim_head(&mut self) -> Option<&MissEntry> {
        let entry = self.entries.front_mut()?;
        entry.claimed = true;
        Some(entry)
    }

    pub fn pop_head(&mut self) -> Option<MissEntry> {
        self.entries.pop_front()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.counter = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeflow::dcache::config::CacheConfig;

    fn queue(capacity: usize, latency: u32) -> (MissQueue, AddrLayout) {
        let layout = CacheConfig::default().layout().unwrap();
        (MissQueue::new(1, capacity, latency, layout, 32, 8), layout)
    }

    #[test]
    fn ids_are_bank_partitioned() {
        let (mut q, layout) = queue(4, 0);
        let a = layout.decode(0x80);
        let (id, is_new) = q.add_miss(&CacheRequest::load(0x80, 0), &a).unwrap();
        assert!(is_new);
        // bank 1, 7 local bits, counter starts at 1
        assert_eq!(id, (1 << 7) | 1);
    }

    #[test]
    fn countdown_gates_head() {
        let (mut q, layout) = queue(4, 2);
        let a = layout.decode(0x80);
        q.add_miss(&CacheRequest::load(0x80, 0), &a).unwrap();
        assert!(q.head_if_ready().is_none());
        q.cycle();
        assert!(q.head_if_ready().is_none());
        q.cycle();
        assert!(q.head_if_ready().is_some());
        q.claim_head();
        assert!(q.head_if_ready().is_none());
        assert!(q.pop_head().is_some());
        assert!(q.is_empty());
    }
}
