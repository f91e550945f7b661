//! # xcbridge Protocol
//!
//! Endpoint addressing, session-id translation, request payload normalization
//! and agent log scanning for the xcbridge proxy.

#![warn(missing_docs)]

/// Agent endpoint addressing
pub mod endpoint;

/// Local/remote session id translation
pub mod session;

/// Request payload normalization
pub mod payload;

/// Line-oriented scanner for agent log output
pub mod scanner;

/// Error types for protocol operations
pub mod error;

pub use endpoint::Endpoint;
pub use session::{Capture, SessionIds, SessionScope};
pub use payload::{Payload, CONTENT_TYPE};
pub use scanner::{LineScanner, ScanEvent, AGENT_LAUNCHED_PATTERN, AGENT_URL_PATTERN};
pub use error::ProtocolError;
