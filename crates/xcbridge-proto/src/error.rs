//! Error types for protocol operations

use thiserror::Error;

/// Protocol-specific errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A POST/PUT body was not a JSON object
    #[error("Malformed request body: {0}")]
    MalformedBody(String),
    
    /// An agent URL could not be turned into an endpoint
    #[error("Invalid endpoint URL {url}: {reason}")]
    InvalidEndpoint { 
        /// The URL as it was captured
        url: String, 
        /// Why it was rejected
        reason: String 
    },
    
    /// Reading a child output stream failed
    #[error("Stream read error: {0}")]
    Read(#[from] std::io::Error),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedBody(format!("JSON error: {}", err))
    }
}
