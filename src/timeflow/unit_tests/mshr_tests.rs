use smallvec::smallvec;

use crate::timeflow::dcache::{AddrLayout, CacheConfig, CacheRequest, MissQueue};

fn layout() -> AddrLayout {
    CacheConfig::default().layout().unwrap()
}

fn queue(bank_id: usize, capacity: usize, latency: u32) -> MissQueue {
    MissQueue::new(bank_id, capacity, latency, layout(), 32, 8)
}

fn load(q: &mut MissQueue, addr: u32, requestor: u64) -> (u32, bool) {
    q.add_miss(&CacheRequest::load(addr, requestor), &layout().decode(addr))
        .unwrap()
}

#[test]
fn same_line_merges_into_one_entry() {
    let mut q = queue(0, 4, 0);
    let (first, is_new) = load(&mut q, 0x1000, 1);
    assert!(is_new);
    let (second, is_new) = load(&mut q, 0x1004, 2);
    assert!(!is_new);
    assert_eq!(first, second);
    assert_eq!(q.len(), 1);
    let head = q.head().unwrap();
    assert_eq!(head.requestor_ids.as_slice(), &[1, 2]);
}

#[test]
fn repeated_requestor_is_recorded_once() {
    let mut q = queue(0, 4, 0);
    load(&mut q, 0x1000, 7);
    load(&mut q, 0x1008, 7);
    assert_eq!(q.head().unwrap().requestor_ids.len(), 1);
}

#[test]
fn different_lines_get_distinct_ids() {
    let mut q = queue(0, 4, 0);
    let (a, _) = load(&mut q, 0x1000, 0);
    let (b, _) = load(&mut q, 0x2000, 0);
    assert_ne!(a, b);
    assert_eq!(q.len(), 2);
    assert!(q.find_merge(layout().decode(0x2000).block_address).is_some());
    assert!(q.find_merge(layout().decode(0x3000).block_address).is_none());
}

#[test]
fn stores_set_the_write_mask() {
    let mut q = queue(0, 4, 0);
    let layout = layout();
    let first = CacheRequest::store_words(0x1000, smallvec![(0x1000, 0xAAAA), (0x1008, 0xBBBB)], 0);
    q.add_miss(&first, &layout.decode(0x1000)).unwrap();
    let later = CacheRequest::store_words(0x1000, smallvec![(0x1008, 0xCCCC)], 1);
    q.add_miss(&later, &layout.decode(0x1000)).unwrap();

    let entry = q.head().unwrap();
    assert!(entry.has_writes());
    assert!(entry.write_mask[0] && !entry.write_mask[1] && entry.write_mask[2]);
    let mut words = vec![0x1111; 32];
    entry.apply_writes(&mut words);
    assert_eq!(&words[..4], &[0xAAAA, 0x1111, 0xCCCC, 0x1111]);
}

#[test]
fn full_queue_still_merges() {
    let mut q = queue(0, 1, 0);
    load(&mut q, 0x1000, 0);
    assert!(q.is_full());
    let (_, is_new) = load(&mut q, 0x1010, 1);
    assert!(!is_new);
    let layout = layout();
    let err = q
        .add_miss(&CacheRequest::load(0x2000, 2), &layout.decode(0x2000))
        .unwrap_err();
    assert_eq!(err.bank_id, 0);
    assert_eq!(err.capacity, 1);
}

#[test]
fn stall_needs_full_queue_and_busy_bank() {
    let mut q = queue(0, 1, 0);
    assert!(!q.check_stall(true));
    load(&mut q, 0x1000, 0);
    assert!(q.check_stall(true));
    assert!(!q.check_stall(false));
}

#[test]
fn claimed_head_blocks_the_next_entry() {
    let mut q = queue(0, 4, 1);
    load(&mut q, 0x1000, 0);
    load(&mut q, 0x2000, 0);
    q.cycle();
    let head_id = q.head_if_ready().unwrap().id;
    q.claim_head();
    q.cycle();
    // the second entry is ready but strictly behind the claimed head
    assert!(q.head_if_ready().is_none());
    assert_eq!(q.pop_head().unwrap().id, head_id);
    assert!(q.head_if_ready().is_some());
}

#[test]
fn countdown_keeps_aging_behind_the_head() {
    let mut q = queue(0, 4, 3);
    load(&mut q, 0x1000, 0);
    q.cycle();
    load(&mut q, 0x2000, 0);
    for _ in 0..3 {
        q.cycle();
    }
    assert!(q.iter().all(|entry| entry.is_ready()));
}

#[test]
fn local_counter_wraps() {
    // 2 banks and 3 uuid bits leave 2 local bits
    let mut q = MissQueue::new(1, 8, 0, layout(), 32, 3);
    let ids: Vec<u32> = [0x1080, 0x2080, 0x3080, 0x4080, 0x5080]
        .iter()
        .map(|&addr| load(&mut q, addr, 0).0)
        .collect();
    assert_eq!(ids, vec![0b101, 0b110, 0b111, 0b100, 0b101]);
}

#[test]
fn reset_restarts_ids() {
    let mut q = queue(1, 4, 0);
    let (first, _) = load(&mut q, 0x1080, 0);
    q.reset();
    assert!(q.is_empty());
    let (again, _) = load(&mut q, 0x2080, 0);
    assert_eq!(first, again);
}
