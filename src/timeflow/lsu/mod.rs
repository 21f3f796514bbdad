pub mod coalesce;
pub mod instr;
pub mod unit;

pub use coalesce::Coalesce;
pub use instr::{MemInstr, MemOp, NUM_LANES};
pub use unit::{LoadStoreUnit, LsuConfig, LsuPorts, LsuStats};
