pub mod dcache;
pub mod lsu;
pub mod mem_service;
mod unit_tests;

pub use dcache::{CacheConfig, CacheEvent, CachePorts, CacheRequest, CacheStage, CacheStats};
pub use lsu::{Coalesce, LoadStoreUnit, LsuConfig, LsuPorts, LsuStats, MemInstr, MemOp, NUM_LANES};
pub use mem_service::{MemService, MemStats};
