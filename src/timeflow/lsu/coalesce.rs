use std::collections::VecDeque;

use anyhow::{bail, ensure};
use smallvec::SmallVec;

use crate::timeflow::dcache::{AddrLayout, CacheRequest};
use super::instr::{MemInstr, MemOp, NUM_LANES};

const ALL_LANES: u32 = u32::MAX;

/// Tracks one warp instruction while its lanes are reduced to cache-line requests and their
/// results gathered back.
#[derive(Debug)]
pub struct Coalesce {
    instr: MemInstr,
    layout: AddrLayout,
    addrs: [u32; NUM_LANES],
    /// line base addresses not yet requested, first-touch order
    pending: VecDeque<u32>,
    in_flight: Option<u32>,
    mshr_parked: SmallVec<[u32; 4]>,
    finished: u32,
    write: bool,
    halt_issued: bool,
}

impl Coalesce {
    pub fn new(instr: MemInstr, layout: AddrLayout) -> anyhow::Result<Self> {
        let mut addrs = [0u32; NUM_LANES];
        let mut pending = VecDeque::new();
        // inactive lanes never produce a result
        let mut finished = !instr.pred;
        if instr.op == MemOp::Halt {
            finished = 0;
        }

        for lane in instr.active_lanes() {
            let addr = instr.lane_addr(lane);
            ensure!(
                addr & 0x3 == 0,
                "instr {}: lane {} address {:#010x} is not word aligned",
                instr.id,
                lane,
                addr
            );
            addrs[lane] = addr;
            let line = layout.line_base(addr);
            if !pending.contains(&line) {
                pending.push_back(line);
            }
        }

        Ok(Self {
            write: instr.op == MemOp::Store,
            instr,
            layout,
            addrs,
            pending,
            in_flight: None,
            mshr_parked: SmallVec::new(),
            finished,
            halt_issued: false,
        })
    }

    pub fn id(&self) -> u64 {
        self.instr.id
    }

    pub fn is_halt(&self) -> bool {
        self.instr.op == MemOp::Halt
    }

    pub fn addrs(&self) -> &[u32; NUM_LANES] {
        &self.addrs
    }

    pub fn pending(&self) -> impl Iterator<Item = &u32> {
        self.pending.iter()
    }

    pub fn mshr_parked(&self) -> &[u32] {
        &self.mshr_parked
    }

    pub fn is_finished(&self, lane: usize) -> bool {
        (self.finished >> lane) & 1 == 1
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty() || (self.is_halt() && !self.halt_issued)
    }

    /// Pop the next line and build the cache request for it.  `None` while a request is in
    /// flight or when nothing is left to request.
    pub fn gen_request(&mut self) -> Option<CacheRequest> {
        if self.in_flight.is_some() {
            return None;
        }
        if self.is_halt() {
            if self.halt_issued {
                return None;
            }
            self.halt_issued = true;
            return Some(CacheRequest::halt());
        }

        let line = self.pending.pop_front()?;
        self.in_flight = Some(line);
        let request = if self.write {
            let writes = self
                .lanes_in_line(line)
                .map(|lane| (self.addrs[lane], self.instr.rdat2[lane]))
                .collect();
            CacheRequest::store_words(line, writes, self.instr.id)
        } else {
            CacheRequest::load(line, self.instr.id)
        };
        Some(request)
    }

    fn lanes_in_line(&self, line: u32) -> impl Iterator<Item = usize> + '_ {
        (0..NUM_LANES).filter(move |&lane| {
            self.instr.is_active(lane) && self.layout.line_base(self.addrs[lane]) == line
        })
    }

    fn finish_line(&mut self, line: u32, data: Option<&[u32]>) -> anyhow::Result<()> {
        let lanes: SmallVec<[usize; NUM_LANES]> = self.lanes_in_line(line).collect();
        for lane in lanes {
            if self.is_finished(lane) {
                continue;
            }
            if let Some(words) = data {
                let offset = self.layout.decode(self.addrs[lane]).block_offset;
                let Some(&word) = words.get(offset) else {
                    bail!(
                        "instr {}: response for line {:#010x} has {} words, lane {} needs word {}",
                        self.instr.id,
                        line,
                        words.len(),
                        lane,
                        offset
                    );
                };
                self.instr.wdat[lane] = Some(word);
            }
            self.finished |= 1 << lane;
        }
        Ok(())
    }

    /// A hit, or the fill of a parked miss, for the line of `address`; `line` holds the whole
    /// line.
    pub fn parse_hit(&mut self, address: u32, line: &[u32]) -> anyhow::Result<()> {
        let line_addr = self.layout.line_base(address);
        if self.in_flight == Some(line_addr) {
            self.in_flight = None;
        } else if let Some(pos) = self.mshr_parked.iter().position(|&a| a == line_addr) {
            self.mshr_parked.remove(pos);
        } else {
            bail!(
                "instr {}: hit for {:#010x} matches no outstanding line (in flight {:?}, parked {:?})",
                self.instr.id,
                address,
                self.in_flight,
                self.mshr_parked
            );
        }
        let data = (!self.write).then_some(line);
        self.finish_line(line_addr, data)
    }

    /// The in-flight line missed and is now waiting on its fill.
    pub fn parse_miss(&mut self, address: u32) -> anyhow::Result<()> {
        let line_addr = self.layout.line_base(address);
        ensure!(
            self.in_flight == Some(line_addr),
            "instr {}: miss accepted for {:#010x} but {:?} is in flight",
            self.instr.id,
            address,
            self.in_flight
        );
        self.in_flight = None;
        self.mshr_parked.push(line_addr);
        Ok(())
    }

    pub fn parse_flush_complete(&mut self) -> anyhow::Result<()> {
        ensure!(
            self.is_halt() && self.halt_issued,
            "instr {}: flush complete while not halting",
            self.instr.id
        );
        self.finished = ALL_LANES;
        Ok(())
    }

    pub fn ready_for_writeback(&self) -> bool {
        self.finished == ALL_LANES
            && self.pending.is_empty()
            && self.in_flight.is_none()
            && self.mshr_parked.is_empty()
    }

    pub fn into_instr(self) -> MemInstr {
        self.instr
    }
}
