pub mod config;
pub mod top;
pub mod toy_mem;
pub mod trace;
