//! Typed errors for the monitoring pipeline.
//!
//! Connectivity faults are the only class the scan loops react to (endpoint
//! failover + re-initialize); everything else is logged where it happens and
//! the loop proceeds on schedule.

use thiserror::Error;

/// Errors raised by the RPC access layer.
#[derive(Error, Debug)]
pub enum ChainError {
    /// The endpoint could not be reached (transport-level failure).
    #[error("endpoint connection failed: {0}")]
    Connect(String),
    /// The endpoint answered with a JSON-RPC level error.
    #[error("rpc call failed: {0}")]
    Rpc(String),
    /// The call did not complete inside its time box.
    #[error("rpc call timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl ChainError {
    /// True when the active endpoint itself is unhealthy and the monitor
    /// should fail over, as opposed to a malformed or rejected request.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ChainError::Connect(_) | ChainError::Timeout(_))
    }
}

/// Errors surfaced by the monitor controller to its caller.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    /// Every configured endpoint failed the connect-and-probe sequence.
    /// Monitoring stays disabled until `initialize` is called again.
    #[error("all configured rpc endpoints failed")]
    EndpointsExhausted,
    #[error("monitor is already running")]
    AlreadyRunning,
}
