//! Custom error types for the scanner core.
//!
//! This module defines the primary error type, `ScanError`, used across the
//! acquisition and reconstruction pipeline. Using the `thiserror` crate, it
//! provides a centralized and consistent way to handle the different failure
//! classes the core distinguishes:
//!
//! - **`Config`**: wraps errors from the `figment` configuration layer
//!   (file parsing, environment extraction).
//! - **`Configuration`**: semantic errors in session parameters that pass
//!   parsing but are logically invalid (e.g., a non-positive step count).
//!   These are fatal at configuration time only; a session with an invalid
//!   configuration never starts.
//! - **`AlreadyRunning`**: a session start was requested while another
//!   session is active. Surfaced immediately, no state is changed.
//! - **`HardwareMismatch`**: the requested step count does not evenly divide
//!   the rotator's steps-per-revolution. Not fatal — the operator confirms
//!   the uneven pitch by reconfiguring with `accept_uneven_pitch`.
//! - **`Instrument`**: errors originating from detector or rotator
//!   collaborators.
//! - **`Processing`**: errors in the reconstruction or statistics stages,
//!   such as a projection line whose length does not match the session
//!   geometry. Once a session is running these are logged and the session
//!   continues; they never abort a multi-hour scan.
//! - **`Io`**: wraps standard `std::io::Error` from the persistence layer.
//!   Per-step persistence failures are logged and treated as non-fatal.
//!
//! By using `#[from]`, `ScanError` can be seamlessly created from underlying
//! error types, simplifying error handling with the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, ScanError>;

/// Error type for the scanner core.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Configuration layer error (file parsing, env extraction).
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Semantic error in session parameters.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// A session is already active.
    #[error("A scan session is already running")]
    AlreadyRunning,

    /// Step count does not evenly divide the rotator's steps-per-revolution.
    ///
    /// Confirmable: reconfigure with `accept_uneven_pitch` to proceed.
    #[error(
        "Step count {step_count} does not evenly divide {steps_per_revolution} rotator steps per revolution"
    )]
    HardwareMismatch {
        /// Requested number of angular positions.
        step_count: usize,
        /// Full-revolution step count reported by the rotator.
        steps_per_revolution: u32,
    },

    /// Error from a detector or rotator collaborator.
    #[error("Instrument error: {0}")]
    Instrument(String),

    /// Error in a data processing stage.
    #[error("Data processing error: {0}")]
    Processing(String),

    /// I/O error from the persistence layer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScanError::Instrument("detector timeout".to_string());
        assert_eq!(err.to_string(), "Instrument error: detector timeout");
    }

    #[test]
    fn test_hardware_mismatch_display() {
        let err = ScanError::HardwareMismatch {
            step_count: 7,
            steps_per_revolution: 3200,
        };
        assert!(err.to_string().contains('7'));
        assert!(err.to_string().contains("3200"));
    }
}
