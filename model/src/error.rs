//! Model error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Target host must not be empty")]
    EmptyHost,

    #[error("Iteration count must be between {min} and {max}, got {actual}")]
    IterationsOutOfRange { min: u32, max: u32, actual: u32 },

    #[error("Duration must be at least {min} seconds, got {actual}")]
    DurationTooShort { min: u64, actual: u64 },

    #[error("Record {location}/{iteration} is out of order")]
    OutOfOrder { location: String, iteration: u32 },

    #[error("Record {location}/{iteration} already exists")]
    DuplicateRecord { location: String, iteration: u32 },
}
