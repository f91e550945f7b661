//! # xcbridge Launch
//!
//! Bootstraps an XCTest automation agent on a simulator or device and
//! discovers the endpoint it listens on by watching child process output.

#![warn(missing_docs)]

/// Device, spawner and command abstractions
pub mod device;

/// Supervised child processes
pub mod process;

/// Agent bootstrap orchestration
pub mod bootstrap;

/// Xcode/platform detection
pub mod platform;

/// Agent app re-signing
pub mod resign;

/// Launch-specific error types
pub mod error;

/// Scripted spawners and devices for tests
pub mod test_utils;

pub use device::{is_real_device, run_command, CommandSpec, Device, HostSpawner, Spawner, XcrunDevice};
pub use process::{ProcessEvent, ProcessKind, StreamRole, SupervisedProcess};
pub use bootstrap::{AgentProject, BootstrapConfig, LaunchStrategy, LogSource, Orchestrator};
pub use platform::{PlatformInfo, XcodeProbe, XcodebuildProbe};
pub use resign::Resigner;
pub use error::LaunchError;
