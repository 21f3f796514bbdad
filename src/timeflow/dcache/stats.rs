use serde::Serialize;
use std::ops::AddAssign;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    accesses: u64,
    hits: u64,
    primary_misses: u64,
    secondary_misses: u64,
    mshr_stalls: u64,
    hit_stalls: u64,
    fills: u64,
    clean_evictions: u64,
    dirty_writebacks: u64,
    flush_writebacks: u64,
    mem_reads: u64,
    mem_writes: u64,
}

impl CacheStats {
    pub fn accesses(&self) -> u64 {
        self.accesses
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn primary_misses(&self) -> u64 {
        self.primary_misses
    }

    pub fn secondary_misses(&self) -> u64 {
        self.secondary_misses
    }

    pub fn mshr_stalls(&self) -> u64 {
        self.mshr_stalls
    }

    pub fn hit_stalls(&self) -> u64 {
        self.hit_stalls
    }

    pub fn fills(&self) -> u64 {
        self.fills
    }

    pub fn clean_evictions(&self) -> u64 {
        self.clean_evictions
    }

    pub fn dirty_writebacks(&self) -> u64 {
        self.dirty_writebacks
    }

    pub fn flush_writebacks(&self) -> u64 {
        self.flush_writebacks
    }

    pub fn mem_reads(&self) -> u64 {
        self.mem_reads
    }

    pub fn mem_writes(&self) -> u64 {
        self.mem_writes
    }

    pub fn record_access(&mut self, hit: bool) {
        self.accesses = self.accesses.saturating_add(1);
        if hit {
            self.hits = self.hits.saturating_add(1);
        }
    }

    pub fn record_miss(&mut self, is_secondary: bool) {
        if is_secondary {
            self.secondary_misses = self.secondary_misses.saturating_add(1);
        } else {
            self.primary_misses = self.primary_misses.saturating_add(1);
        }
    }

    pub fn record_mshr_stall(&mut self) {
        self.mshr_stalls = self.mshr_stalls.saturating_add(1);
    }

    pub fn record_hit_stall(&mut self) {
        self.hit_stalls = self.hit_stalls.saturating_add(1);
    }

    pub fn record_fill(&mut self, evicted_clean: bool) {
        self.fills = self.fills.saturating_add(1);
        if evicted_clean {
            self.clean_evictions = self.clean_evictions.saturating_add(1);
        }
    }

    pub fn record_dirty_writeback(&mut self) {
        self.dirty_writebacks = self.dirty_writebacks.saturating_add(1);
    }

    pub fn record_flush_writeback(&mut self) {
        self.flush_writebacks = self.flush_writebacks.saturating_add(1);
    }

    pub fn record_mem_read(&mut self) {
        self.mem_reads = self.mem_reads.saturating_add(1);
    }

    pub fn record_mem_write(&mut self) {
        self.mem_writes = self.mem_writes.saturating_add(1);
    }
}

impl AddAssign<&CacheStats> for CacheStats {
    fn add_assign(&mut self, other: &CacheStats) {
        self.accesses = self.accesses.saturating_add(other.accesses);
        self.hits = self.hits.saturating_add(other.hits);
        self.primary_misses = self.primary_misses.saturating_add(other.primary_misses);
        self.secondary_misses = self.secondary_misses.saturating_add(other.secondary_misses);
        self.mshr_stalls = self.mshr_stalls.saturating_add(other.mshr_stalls);
        self.hit_stalls = self.hit_stalls.saturating_add(other.hit_stalls);
        self.fills = self.fills.saturating_add(other.fills);
        self.clean_evictions = self.clean_evictions.saturating_add(other.clean_evictions);
        self.dirty_writebacks = self.dirty_writebacks.saturating_add(other.dirty_writebacks);
        self.flush_writebacks = self.flush_writebacks.saturating_add(other.flush_writebacks);
        self.mem_reads = self.mem_reads.saturating_add(other.mem_reads);
        self.mem_writes = self.mem_writes.saturating_add(other.mem_writes);
    }
}

impl AddAssign<CacheStats> for CacheStats {
    fn add_assign(&mut self, other: CacheStats) {
        *self += &other;
    }
}
