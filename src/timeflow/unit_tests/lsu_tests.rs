use std::sync::Arc;

use crate::base::behavior::*;
use crate::base::latch::Latch;
use crate::base::mem::HasMemory;
use crate::base::module::IsModule;
use crate::sim::config::MemConfig;
use crate::timeflow::dcache::{
    AddrLayout, CacheConfig, CachePorts, CacheRequestKind, CacheStage,
};
use crate::timeflow::lsu::{Coalesce, LoadStoreUnit, LsuConfig, LsuPorts, MemInstr, NUM_LANES};
use crate::timeflow::mem_service::MemService;

const LINE_A: u32 = 0x1000;
const LINE_B: u32 = 0x1080;

fn layout() -> AddrLayout {
    CacheConfig::default().layout().unwrap()
}

/// Lanes 0-15 cover the first half of line A, lanes 16-31 the first half of line B.
fn split_addrs() -> [u32; NUM_LANES] {
    std::array::from_fn(|lane| {
        if lane < 16 {
            LINE_A + 4 * lane as u32
        } else {
            LINE_B + 4 * (lane as u32 - 16)
        }
    })
}

#[test]
fn coalesce_dedups_lanes_into_lines() {
    let c = Coalesce::new(MemInstr::load(0, split_addrs(), 0), layout()).unwrap();
    let lines: Vec<u32> = c.pending().copied().collect();
    assert_eq!(lines, vec![LINE_A, LINE_B]);
    assert!((0..NUM_LANES).all(|lane| !c.is_finished(lane)));
}

#[test]
fn immediate_offsets_every_lane() {
    let base = [LINE_A + 0x40; NUM_LANES];
    let c = Coalesce::new(MemInstr::load(0, base, -0x40), layout()).unwrap();
    assert!(c.addrs().iter().all(|&addr| addr == LINE_A));
    assert_eq!(c.pending().count(), 1);
}

#[test]
fn inactive_lanes_start_finished() {
    let instr = MemInstr::load(0, split_addrs(), 0).with_pred(0x0000_FFFF);
    let c = Coalesce::new(instr, layout()).unwrap();
    assert_eq!(c.pending().count(), 1);
    assert!(!c.is_finished(3));
    assert!(c.is_finished(20));
}

#[test]
fn misaligned_lane_is_rejected() {
    let mut addrs = split_addrs();
    addrs[5] += 2;
    assert!(Coalesce::new(MemInstr::load(0, addrs, 0), layout()).is_err());
}

#[test]
fn store_request_carries_its_lane_writes() {
    let data: [u32; NUM_LANES] = std::array::from_fn(|lane| 0x100 + lane as u32);
    let mut c = Coalesce::new(MemInstr::store(4, split_addrs(), 0, data), layout()).unwrap();
    let request = c.gen_request().unwrap();
    assert_eq!(request.addr, LINE_A);
    assert_eq!(request.requestor, 4);
    match &request.kind {
        CacheRequestKind::Store(writes) => {
            assert_eq!(writes.len(), 16);
            assert_eq!(writes[0], (LINE_A, 0x100));
            assert_eq!(writes[15], (LINE_A + 60, 0x10F));
        }
        other => panic!("expected a store, got {other:?}"),
    }
    // one request in flight at a time
    assert!(c.gen_request().is_none());
}

#[test]
fn miss_then_fill_finishes_the_line() {
    let mut c = Coalesce::new(MemInstr::load(0, split_addrs(), 0), layout()).unwrap();
    let line: Vec<u32> = (0..32).collect();

    let a = c.gen_request().unwrap();
    c.parse_miss(a.addr).unwrap();
    assert_eq!(c.mshr_parked(), &[LINE_A]);
    let b = c.gen_request().unwrap();
    assert_eq!(b.addr, LINE_B);
    c.parse_hit(LINE_B, &line).unwrap();
    assert!(!c.ready_for_writeback());

    c.parse_hit(LINE_A, &line).unwrap();
    assert!(c.ready_for_writeback());
    let instr = c.into_instr();
    assert_eq!(instr.wdat[3], Some(3));
    assert_eq!(instr.wdat[17], Some(1));
}

#[test]
fn unmatched_response_is_an_error() {
    let mut c = Coalesce::new(MemInstr::load(0, split_addrs(), 0), layout()).unwrap();
    assert!(c.parse_hit(LINE_A, &[0; 32]).is_err());
    assert!(c.parse_miss(LINE_A).is_err());
    assert!(c.parse_flush_complete().is_err());
}

#[test]
fn halt_issues_once_and_finishes_on_flush() {
    let mut c = Coalesce::new(MemInstr::halt(9), layout()).unwrap();
    assert!(c.has_pending());
    assert!(c.gen_request().unwrap().is_halt());
    assert!(c.gen_request().is_none());
    assert!(!c.ready_for_writeback());
    c.parse_flush_complete().unwrap();
    assert!(c.ready_for_writeback());
}

struct Harness {
    lsu: LoadStoreUnit,
    cache: CacheStage,
    mem: MemService,
    issue: Latch<MemInstr>,
    wb: Latch<MemInstr>,
}

impl Harness {
    fn new(lsu_config: LsuConfig) -> Self {
        let cache_ports = CachePorts::new();
        let cache = CacheStage::new(
            Arc::new(CacheConfig {
                mshr_latency: 2,
                ..CacheConfig::default()
            }),
            cache_ports.clone(),
        )
        .unwrap();
        let mem = MemService::new(
            Arc::new(MemConfig::default()),
            cache_ports.mem_req.clone(),
            cache_ports.mem_resp.clone(),
        )
        .unwrap();
        let ports = LsuPorts::new(cache_ports.req_in.clone(), cache_ports.resp_out.clone());
        let issue = ports.issue_in.clone();
        let wb = ports.wb_out.clone();
        let lsu = LoadStoreUnit::new(Arc::new(lsu_config), *cache.layout(), ports).unwrap();
        Self {
            lsu,
            cache,
            mem,
            issue,
            wb,
        }
    }

    fn tick(&mut self) {
        self.mem.tick_one().unwrap();
        self.cache.tick_one().unwrap();
        self.lsu.tick_one().unwrap();
    }

    fn execute(&mut self, instr: MemInstr) -> MemInstr {
        self.issue.push(instr).unwrap();
        for _ in 0..2000 {
            self.tick();
            if let Some(done) = self.wb.pop() {
                return done;
            }
        }
        panic!("instruction never retired");
    }
}

#[test]
fn two_line_load_makes_two_requests_and_fills_every_lane() {
    let mut h = Harness::new(LsuConfig::default());
    let addrs = split_addrs();
    for &addr in &addrs {
        h.mem.memory_mut().write_word(addr as usize, addr ^ 0xA5A5).unwrap();
    }

    let done = h.execute(MemInstr::load(1, addrs, 0));
    for lane in 0..NUM_LANES {
        assert_eq!(done.wdat[lane], Some(addrs[lane] ^ 0xA5A5), "lane {lane}");
    }
    let stats = h.lsu.state();
    assert_eq!(stats.cache_requests(), 2);
    assert_eq!(stats.misses(), 2);
    assert_eq!(stats.fills(), 2);
    assert_eq!(stats.instrs_retired(), 1);
    assert!(h.lsu.is_idle());
}

#[test]
fn load_after_store_sees_the_stored_values() {
    let mut h = Harness::new(LsuConfig::default());
    let data: [u32; NUM_LANES] = std::array::from_fn(|lane| 0xC0DE_0000 | lane as u32);
    let store = h.execute(MemInstr::store(1, split_addrs(), 0, data));
    assert!(store.wdat.iter().all(Option::is_none));

    let load = h.execute(MemInstr::load(2, split_addrs(), 0));
    for lane in 0..NUM_LANES {
        assert_eq!(load.wdat[lane], Some(data[lane]), "lane {lane}");
    }
    // the second instruction hits in both lines
    assert_eq!(h.lsu.state().hits(), 2);
}

#[test]
fn halt_retires_after_the_flush_reaches_memory() {
    let mut h = Harness::new(LsuConfig::default());
    let data = [0x1234_5678; NUM_LANES];
    h.execute(MemInstr::store(1, split_addrs(), 0, data));
    let halt = h.execute(MemInstr::halt(2));
    assert_eq!(halt.id, 2);
    assert!(h.cache.is_halted());
    for addr in split_addrs() {
        assert_eq!(h.mem.memory().read_word(addr as usize).unwrap(), 0x1234_5678);
    }
}

#[test]
fn full_queue_holds_off_issue() {
    let mut h = Harness::new(LsuConfig {
        queue_depth: 1,
        wb_buffer_size: 1,
    });
    h.issue.push(MemInstr::load(1, split_addrs(), 0)).unwrap();
    h.tick();
    assert_eq!(h.lsu.queue_len(), 1);
    assert!(h.lsu.ports().issue_wait.is_waiting());
    assert!(!h.issue.ready_for_push());
    assert!(h.issue.push(MemInstr::load(2, split_addrs(), 0)).is_err());

    while h.wb.pop().is_none() {
        h.tick();
    }
    assert!(!h.lsu.is_outstanding());
    h.tick();
    assert!(h.issue.ready_for_push());
}
