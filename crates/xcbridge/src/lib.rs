//! # xcbridge
//!
//! Bridges a WebDriver client to an XCTest automation agent running on a
//! simulator or device.
//!
//! The [`Controller`] bootstraps the agent, discovers the endpoint it listens
//! on and then forwards commands through a [`SessionProxy`] that keeps the
//! caller's session id stable while the agent uses its own.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use xcbridge_proto as proto;
pub use xcbridge_launch as launch;

/// Error types for the xcbridge library
pub mod error;

/// Session-rewriting request proxy
pub mod proxy;

/// Bootstrap and session sequencing
pub mod controller;

pub use error::XcBridgeError;
pub use proxy::{ProxyConfig, SessionProxy};
pub use controller::{Controller, ControllerBuilder, ControllerConfig, ControllerState};

/// Result type alias for xcbridge operations
pub type Result<T> = std::result::Result<T, XcBridgeError>;
