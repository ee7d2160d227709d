//! Survey limits and defaults

/// Smallest number of iterations per location
pub const MIN_ITERATIONS: u32 = 1;

/// Largest number of iterations per location
pub const MAX_ITERATIONS: u32 = 5;

/// Shortest throughput phase duration in seconds
pub const MIN_DURATION_SECS: u64 = 5;

/// Number of vantage points surveyed in one run
pub const DEFAULT_LOCATION_COUNT: usize = 8;

/// Label prefix for location identifiers
pub const DEFAULT_LOCATION_PREFIX: &str = "p";

/// Fraction used for the p95 statistic
pub const P95_FRACTION: f64 = 0.95;

/// Bits per second in one Mbps
pub const BITS_PER_MBIT: f64 = 1_000_000.0;
