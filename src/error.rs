//! # Error Types
//!
//! Error kinds surfaced by the acoustic tracing core.

use thiserror::Error;

/// Acoustics core errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcousticsError {
    /// Out-of-range index, nil required input or negative size.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Tracing requested without an attached sound tracing configuration.
    #[error("no sound tracing configuration attached")]
    ConfigurationMissing,

    /// A worker task raised an error or was cancelled.
    #[error("parallel task failed or was cancelled")]
    TaskFailed,

    /// Operation not valid for the current probe state.
    #[error("state violation: {0}")]
    StateViolation(&'static str),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, AcousticsError>;
