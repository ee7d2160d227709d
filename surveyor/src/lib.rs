//! Fieldsurvey - multi-location Wi-Fi survey engine
//!
//! Measures signal strength, idle latency and throughput with latency under load at a fixed
//! list of locations, pausing between locations so the operator can move.

pub mod config;
pub mod engine;
pub mod output;
pub mod probe;
