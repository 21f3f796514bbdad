pub mod addr;
pub mod bank;
pub mod config;
pub mod line;
pub mod mshr;
pub mod request;
pub mod stage;
pub mod stats;

pub use addr::{Addr, AddrLayout};
pub use bank::{BankCycle, BankState, CacheBank};
pub use config::CacheConfig;
pub use line::CacheLine;
pub use mshr::{MissEntry, MissQueue, MissQueueFull};
pub use request::{
    AccessMode, CacheEvent, CacheRequest, CacheRequestKind, MemMode, MemRequest, MemResponse,
    MissId, WordWrite,
};
pub use stage::{CachePorts, CacheStage};
pub use stats::CacheStats;
