//! Environment configuration

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use xcbridge::ControllerConfig;
use xcbridge_launch::LaunchStrategy;

/// Everything the binary needs to run one session
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Simulator or device UDID
    pub device_id: String,
    /// Home directory holding the simulator data
    pub home: PathBuf,
    /// Controller settings
    pub controller: ControllerConfig,
    /// Capabilities for the initial session
    pub capabilities: Value,
}

impl CliConfig {
    /// Read `XCBRIDGE_*` variables from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
    
    /// Read configuration through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let device_id = lookup("XCBRIDGE_DEVICE_ID").context("XCBRIDGE_DEVICE_ID is not set")?;
        let home = lookup("XCBRIDGE_HOME")
            .or_else(|| lookup("HOME"))
            .map(PathBuf::from)
            .context("neither XCBRIDGE_HOME nor HOME is set")?;
        
        let mut controller = ControllerConfig::default();
        
        controller.bootstrap.strategy = match lookup("XCBRIDGE_LAUNCH_MODE").as_deref() {
            None | Some("") | Some("xcodebuild") => LaunchStrategy::BuildAndTest,
            Some("binary") => {
                let binary = lookup("XCBRIDGE_AGENT_BINARY")
                    .context("XCBRIDGE_AGENT_BINARY is required in binary launch mode")?;
                LaunchStrategy::DirectBinary {
                    binary: PathBuf::from(binary),
                }
            }
            Some(other) => bail!("Unknown launch mode: {}", other),
        };
        
        if let Some(path) = lookup("XCBRIDGE_PROJECT_PATH") {
            controller.bootstrap.project.project_path = PathBuf::from(path);
        }
        if let Some(ms) = lookup("XCBRIDGE_SETTLE_MS") {
            controller.bootstrap.settle_delay = Duration::from_millis(parse_number("XCBRIDGE_SETTLE_MS", &ms)?);
        }
        if let Some(secs) = lookup("XCBRIDGE_DISCOVERY_TIMEOUT_SECS") {
            controller.bootstrap.discovery_timeout =
                Duration::from_secs(parse_number("XCBRIDGE_DISCOVERY_TIMEOUT_SECS", &secs)?);
        }
        controller.bootstrap.resign_identity = lookup("XCBRIDGE_RESIGN_IDENTITY");
        
        if let Some(base) = lookup("XCBRIDGE_URL_BASE") {
            controller.proxy.url_base = base.trim_matches('/').to_string();
        }
        if let Some(secs) = lookup("XCBRIDGE_REQUEST_TIMEOUT_SECS") {
            controller.proxy.request_timeout =
                Duration::from_secs(parse_number("XCBRIDGE_REQUEST_TIMEOUT_SECS", &secs)?);
        }
        controller.proxy.local_session_id = lookup("XCBRIDGE_SESSION_ID");
        
        if let Some(url) = lookup("XCBRIDGE_BROWSER_URL") {
            controller.browser_start_url = url;
        }
        
        let capabilities = match lookup("XCBRIDGE_CAPABILITIES") {
            Some(raw) => serde_json::from_str(&raw).context("XCBRIDGE_CAPABILITIES is not valid JSON")?,
            None => json!({"desiredCapabilities": {}}),
        };
        
        Ok(Self {
            device_id,
            home,
            controller,
            capabilities,
        })
    }
}

fn parse_number(key: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse()
        .with_context(|| format!("{} must be a whole number, got {:?}", key, raw))
}
