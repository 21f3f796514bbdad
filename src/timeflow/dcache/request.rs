use smallvec::SmallVec;

/// Globally unique miss id: `bank_id << local_bits | local_counter`.
pub type MissId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

/// One word written by a store: byte address and value.
pub type WordWrite = (u32, u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheRequestKind {
    Load,
    /// Word writes, all within the line of the request address.
    Store(SmallVec<[WordWrite; 4]>),
    /// Flush every dirty line and halt all banks.
    Halt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRequest {
    pub addr: u32,
    pub kind: CacheRequestKind,
    /// Id of whoever issued the request, recorded by the miss entry it allocates or merges into.
    pub requestor: u64,
}

impl CacheRequest {
    pub fn load(addr: u32, requestor: u64) -> Self {
        Self {
            addr,
            kind: CacheRequestKind::Load,
            requestor,
        }
    }

    pub fn store(addr: u32, value: u32, requestor: u64) -> Self {
        Self::store_words(addr, [(addr, value)].into_iter().collect(), requestor)
    }

    pub fn store_words(addr: u32, writes: SmallVec<[WordWrite; 4]>, requestor: u64) -> Self {
        Self {
            addr,
            kind: CacheRequestKind::Store(writes),
            requestor,
        }
    }

    pub fn halt() -> Self {
        Self {
            addr: 0,
            kind: CacheRequestKind::Halt,
            requestor: 0,
        }
    }

    pub fn writes(&self) -> &[WordWrite] {
        match &self.kind {
            CacheRequestKind::Store(writes) => writes.as_slice(),
            _ => &[],
        }
    }

    pub fn is_halt(&self) -> bool {
        matches!(self.kind, CacheRequestKind::Halt)
    }
}

/// Events the cache stage reports to its issuer, one per cycle at most.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    MissAccepted {
        id: MissId,
        address: u32,
        is_secondary: bool,
    },
    HitStall,
    HitComplete {
        address: u32,
        /// Word at `address` after the access
        data: u32,
        /// Whole line after the access
        line: Vec<u32>,
    },
    MissComplete {
        id: MissId,
        /// Address of the request that allocated the miss
        address: u32,
        /// Line as installed, merged stores included
        line: Vec<u32>,
    },
    FlushComplete,
}

impl CacheEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CacheEvent::MissAccepted { .. } => "MISS_ACCEPTED",
            CacheEvent::HitStall => "HIT_STALL",
            CacheEvent::HitComplete { .. } => "HIT_COMPLETE",
            CacheEvent::MissComplete { .. } => "MISS_COMPLETE",
            CacheEvent::FlushComplete => "FLUSH_COMPLETE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemMode {
    Read,
    Write,
}

/// Outbound request from a bank to the memory service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemRequest {
    pub addr: u32,
    pub size_bytes: u32,
    pub request_id: MissId,
    pub bank_id: usize,
    pub mode: MemMode,
    pub data: Option<Vec<u8>>,
}

/// Inbound response from the memory service, routed by `bank_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemResponse {
    Read { bank_id: usize, data: Vec<u8> },
    WriteAck { bank_id: usize },
}

impl MemResponse {
    pub fn bank_id(&self) -> usize {
        match self {
            MemResponse::Read { bank_id, .. } | MemResponse::WriteAck { bank_id } => *bank_id,
        }
    }
}

pub fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

pub fn bytes_to_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
