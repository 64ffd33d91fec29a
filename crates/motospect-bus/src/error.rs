//! Service bus errors

use std::time::Duration;

use thiserror::Error;

use crate::transport::TransportError;

pub type BusResult<T> = Result<T, BusError>;

#[derive(Debug, Error)]
pub enum BusError {
    /// No response arrived within the call window
    #[error("Call to {service}.{method} timed out after {timeout:?}")]
    Timeout {
        service: String,
        method: String,
        timeout: Duration,
    },

    /// The hosting bus has no handler for the method
    #[error("No handler for {service}.{method}")]
    HandlerMissing { service: String, method: String },

    /// The handler returned an error or panicked
    #[error("Handler {service}.{method} failed: {message}")]
    HandlerError {
        service: String,
        method: String,
        message: String,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Envelope could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Bus disconnected")]
    Disconnected,
}

impl BusError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BusError::Timeout { .. })
    }
}
