//! Error taxonomy for the control plane.
//!
//! Every recoverable failure is contained in the component that detected it
//! and reported through logging plus an orchestrator-visible event.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControlError {
    /// RFID authentication/read/anti-collision failures, GPIO read errors.
    /// Recovered locally, never fatal.
    #[error("hardware I/O error: {0}")]
    Hardware(String),

    /// Malformed or unknown transport message, URL/load mismatch, invalid
    /// card content. Surfaced to the user (LED pattern + audio cue).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Send failure because the peer is absent or the write failed.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ControlError {
    pub fn hardware(msg: impl Into<String>) -> Self {
        Self::Hardware(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ControlError>;
