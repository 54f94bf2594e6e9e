//! # Error Types
//!
//! Custom error types for Ground Control using `thiserror`.

use std::time::Duration;

use thiserror::Error;

use crate::link::LinkError;
use crate::sequencer::FlightPhase;

/// Main error type for Ground Control
#[derive(Debug, Error)]
pub enum GroundControlError {
    /// No vehicle discovered, unsupported transport or a broken link
    #[error("Connection error: {0}")]
    Connection(String),

    /// A hard command (arm, takeoff) was rejected by the vehicle
    #[error("{command} rejected by vehicle: {source}")]
    CommandRejected {
        command: &'static str,
        #[source]
        source: LinkError,
    },

    /// A convergence wait was cancelled from outside
    #[error("Cancelled while in phase {phase}")]
    Cancelled { phase: FlightPhase },

    /// A convergence wait exceeded its configured deadline
    #[error("Timed out after {after:?} while in phase {phase}")]
    Timeout { phase: FlightPhase, after: Duration },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Ground Control
pub type Result<T> = std::result::Result<T, GroundControlError>;
