//! Error types for the xcbridge library

use thiserror::Error;
use xcbridge_launch::LaunchError;
use xcbridge_proto::ProtocolError;

/// Main error type for xcbridge operations
#[derive(Debug, Error)]
pub enum XcBridgeError {
    /// The request to the agent failed; never retried by the proxy
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    
    /// A POST/PUT body was not a JSON object
    #[error("Malformed body: {0}")]
    MalformedBody(String),
    
    /// The agent could not be brought up
    #[error("Bootstrap error: {0}")]
    Bootstrap(#[from] LaunchError),
    
    /// Operation not allowed in the current controller state
    #[error("Invalid state: expected {expected}, found {actual}")]
    InvalidState {
        /// State the operation requires
        expected: String,
        /// State the controller is in
        actual: String,
    },
    
    /// The agent answered the session request without a session id
    #[error("Agent did not create a session: {0}")]
    SessionNotCreated(String),
    
    /// No agent endpoint has been configured yet
    #[error("Proxy has no agent endpoint")]
    NotConfigured,
    
    /// Other protocol errors
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl XcBridgeError {
    /// True when a watched process exited before the agent reported its URL
    pub fn is_bootstrap_aborted(&self) -> bool {
        matches!(self, Self::Bootstrap(LaunchError::BootstrapAborted { .. }))
    }
}

impl From<ProtocolError> for XcBridgeError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::MalformedBody(msg) => Self::MalformedBody(msg),
            other => Self::Protocol(other.to_string()),
        }
    }
}
