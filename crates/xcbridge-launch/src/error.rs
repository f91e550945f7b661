//! Launch-specific error types

use crate::ProcessKind;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while bootstrapping the agent
#[derive(Debug, Error)]
pub enum LaunchError {
    /// A child process could not be started
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },
    
    /// A watched process exited before reporting an endpoint
    #[error("Bootstrap aborted: {kind} exited before reporting an endpoint (code: {code:?}, signal: {signal:?})")]
    BootstrapAborted {
        /// Which process exited
        kind: ProcessKind,
        /// Exit code, if the process exited normally
        code: Option<i32>,
        /// Terminating signal, if any
        signal: Option<i32>,
    },
    
    /// No endpoint was reported in time
    #[error("No agent endpoint discovered within {0:?}")]
    Timeout(Duration),
    
    /// Bootstrap ended without an answer, e.g. the event monitor went away
    #[error("Bootstrap interrupted: {0}")]
    Interrupted(String),
    
    /// Building the agent failed
    #[error("Agent build failed with exit code {code:?}: {message}")]
    BuildFailed {
        /// Exit code of the build tool
        code: Option<i32>,
        /// Tail of the build tool's stderr
        message: String,
    },
    
    /// The agent binary is not where it was expected
    #[error("Agent binary not found at {0}")]
    AgentBinaryMissing(PathBuf),
    
    /// A helper command failed
    #[error("Command failed with exit code {code:?}: {message}")]
    CommandFailed {
        /// Exit code of the failed command
        code: Option<i32>,
        /// Error message
        message: String,
    },
    
    /// Device operation failed
    #[error("Device error: {0}")]
    Device(String),
    
    /// Platform detection failed
    #[error("Platform detection failed: {0}")]
    Platform(String),
    
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
