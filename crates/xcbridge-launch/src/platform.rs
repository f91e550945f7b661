//! Xcode/platform detection

use crate::{run_command, CommandSpec, LaunchError, Spawner};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Toolchain information for the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    /// Xcode version, e.g. `15.2`
    pub xcode_version: String,
    /// Xcode build, e.g. `15C500b`
    pub build_version: Option<String>,
}

/// Asynchronous platform query
#[async_trait]
pub trait XcodeProbe: Send + Sync {
    /// Detect the installed Xcode
    async fn detect_platform(&self) -> Result<PlatformInfo, LaunchError>;
}

/// [`XcodeProbe`] that runs `xcodebuild -version`
pub struct XcodebuildProbe {
    spawner: Arc<dyn Spawner>,
}

impl XcodebuildProbe {
    /// Create a probe using `spawner` to run the build tool
    pub fn new(spawner: Arc<dyn Spawner>) -> Self {
        Self { spawner }
    }
}

#[async_trait]
impl XcodeProbe for XcodebuildProbe {
    async fn detect_platform(&self) -> Result<PlatformInfo, LaunchError> {
        info!("Detecting Xcode version");
        
        let output = run_command(self.spawner.as_ref(), &CommandSpec::new("xcodebuild").arg("-version"))
            .await
            .map_err(|e| LaunchError::Platform(e.to_string()))?;
        
        let info = parse_xcodebuild_version(&output)?;
        debug!("Detected platform: {:?}", info);
        Ok(info)
    }
}

/// Parse the output of `xcodebuild -version`:
///
/// ```text
/// Xcode 15.2
/// Build version 15C500b
/// ```
pub fn parse_xcodebuild_version(output: &str) -> Result<PlatformInfo, LaunchError> {
    let mut xcode_version = None;
    let mut build_version = None;
    
    for line in output.lines().map(str::trim) {
        if let Some(version) = line.strip_prefix("Xcode ") {
            xcode_version = Some(version.trim().to_string());
        } else if let Some(build) = line.strip_prefix("Build version ") {
            build_version = Some(build.trim().to_string());
        }
    }
    
    let xcode_version = xcode_version
        .ok_or_else(|| LaunchError::Platform(format!("unrecognised xcodebuild output: {}", output.trim())))?;
    
    Ok(PlatformInfo {
        xcode_version,
        build_version,
    })
}
