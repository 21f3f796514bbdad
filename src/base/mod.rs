pub mod behavior;
pub mod latch;
pub mod mem;
pub mod module;
