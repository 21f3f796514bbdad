pub mod config;
pub mod driver;
pub mod logging;
pub mod patterns;

pub use config::{TrafficAddressConfig, TrafficConfig, TrafficPatternSpec};
pub use driver::DcacheTrafficDriver;
pub use patterns::PatternEngine;
