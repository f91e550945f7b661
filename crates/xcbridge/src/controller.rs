//! Bootstrap and session sequencing
//!
//! A [`Controller`] walks `Idle → Bootstrapping → ProxyConfigured →
//! SessionActive → Stopped`. The agent endpoint is always resolved, and the
//! settle delay has passed, before the proxy is configured and the first
//! `POST /session` is sent.

use crate::{ProxyConfig, Result, SessionProxy, XcBridgeError};
use serde_json::{json, Value};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use xcbridge_launch::{
    AgentProject, BootstrapConfig, Device, HostSpawner, LaunchStrategy, Orchestrator, Spawner,
    XcodeProbe, XcodebuildProbe,
};
use xcbridge_proto::payload::{truncate, LOG_BODY_LIMIT};
use xcbridge_proto::{Endpoint, Payload};

/// Page Safari opens when a browser session is requested
pub const DEFAULT_BROWSER_START_URL: &str = "http://macacajs.github.io/macaca/";

/// Path the session-creation request is sent to
pub const DEFAULT_SESSION_PATH: &str = "/session";

/// Bundle id of the system browser
pub const SAFARI_BUNDLE_ID: &str = "com.apple.mobilesafari";

/// Controller lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Nothing started
    Idle,
    /// Agent processes are starting
    Bootstrapping,
    /// Endpoint known, no session yet
    ProxyConfigured,
    /// Commands can be sent
    SessionActive,
    /// Torn down
    Stopped,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Bootstrapping => "bootstrapping",
            Self::ProxyConfigured => "proxy-configured",
            Self::SessionActive => "session-active",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Agent bootstrap settings
    pub bootstrap: BootstrapConfig,
    /// Proxy settings
    pub proxy: ProxyConfig,
    /// Path of the session-creation request, sent as is
    pub session_path: String,
    /// Page opened for Safari sessions
    pub browser_start_url: String,
    /// Bundle id the minimal Safari session is created against
    pub safari_bundle_id: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            bootstrap: BootstrapConfig::default(),
            proxy: ProxyConfig::default(),
            session_path: DEFAULT_SESSION_PATH.to_string(),
            browser_start_url: DEFAULT_BROWSER_START_URL.to_string(),
            safari_bundle_id: SAFARI_BUNDLE_ID.to_string(),
        }
    }
}

/// Builder for [`Controller`]
pub struct ControllerBuilder {
    device: Arc<dyn Device>,
    spawner: Arc<dyn Spawner>,
    probe: Option<Arc<dyn XcodeProbe>>,
    config: ControllerConfig,
}

impl ControllerBuilder {
    /// Controller for `device`, spawning host processes directly
    pub fn new(device: Arc<dyn Device>) -> Self {
        Self {
            device,
            spawner: Arc::new(HostSpawner),
            probe: None,
            config: ControllerConfig::default(),
        }
    }
    
    /// Replace the whole configuration
    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }
    
    /// Spawner used for host tools (`tail`, `xcodebuild`, `codesign`, ...)
    pub fn with_spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = spawner;
        self
    }
    
    /// Probe used to detect the Xcode version
    pub fn with_probe(mut self, probe: Arc<dyn XcodeProbe>) -> Self {
        self.probe = Some(probe);
        self
    }
    
    /// Set the launch strategy
    pub fn with_launch_strategy(mut self, strategy: LaunchStrategy) -> Self {
        self.config.bootstrap.strategy = strategy;
        self
    }
    
    /// Set the agent project
    pub fn with_project(mut self, project: AgentProject) -> Self {
        self.config.bootstrap.project = project;
        self
    }
    
    /// Set the agent project path, keeping the other project settings
    pub fn with_project_path(mut self, path: PathBuf) -> Self {
        self.config.bootstrap.project.project_path = path;
        self
    }
    
    /// Set the post-discovery settle delay
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.config.bootstrap.settle_delay = delay;
        self
    }
    
    /// Set the endpoint discovery timeout
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.bootstrap.discovery_timeout = timeout;
        self
    }
    
    /// Re-sign the agent app with `identity` once it launches
    pub fn with_resign_identity(mut self, identity: String) -> Self {
        self.config.bootstrap.resign_identity = Some(identity);
        self
    }
    
    /// Set the WebDriver url base
    pub fn with_url_base(mut self, url_base: &str) -> Self {
        self.config.proxy.url_base = url_base.trim_matches('/').to_string();
        self
    }
    
    /// Set the per-request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.proxy.request_timeout = timeout;
        self
    }
    
    /// Use a fixed caller-facing session id
    pub fn with_local_session_id(mut self, session_id: String) -> Self {
        self.config.proxy.local_session_id = Some(session_id);
        self
    }
    
    /// Set the path the session-creation request is sent to
    pub fn with_session_path(mut self, path: &str) -> Self {
        self.config.session_path = format!("/{}", path.trim_start_matches('/'));
        self
    }
    
    /// Set the page opened for Safari sessions
    pub fn with_browser_start_url(mut self, url: String) -> Self {
        self.config.browser_start_url = url;
        self
    }
    
    /// Build the configuration
    pub fn build_config(&self) -> ControllerConfig {
        self.config.clone()
    }
    
    /// Build the controller
    pub fn build(self) -> Result<Controller> {
        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(XcodebuildProbe::new(self.spawner.clone())));
        let proxy = SessionProxy::new(self.config.proxy.clone())?;
        let orchestrator = Orchestrator::new(self.config.bootstrap.clone(), self.spawner);
        
        Ok(Controller {
            device: self.device,
            probe,
            orchestrator,
            proxy,
            config: self.config,
            state: ControllerState::Idle,
        })
    }
}

/// Sequences platform detection, agent bootstrap, proxy configuration and
/// session creation
pub struct Controller {
    device: Arc<dyn Device>,
    probe: Arc<dyn XcodeProbe>,
    orchestrator: Orchestrator,
    proxy: SessionProxy,
    config: ControllerConfig,
    state: ControllerState,
}

impl Controller {
    /// Create a controller builder
    pub fn builder(device: Arc<dyn Device>) -> ControllerBuilder {
        ControllerBuilder::new(device)
    }
    
    /// Current state
    pub fn state(&self) -> ControllerState {
        self.state
    }
    
    /// Active configuration
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }
    
    /// The session proxy
    pub fn proxy(&self) -> &SessionProxy {
        &self.proxy
    }
    
    /// Endpoint of the running agent
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.proxy.endpoint()
    }
    
    /// Bring the agent up and open a session with `capabilities`.
    ///
    /// Only valid from `Idle`. On failure every started process is stopped
    /// and the controller returns to `Idle`.
    pub async fn start(&mut self, capabilities: Value) -> Result<Value> {
        self.expect_state(ControllerState::Idle)?;
        self.state = ControllerState::Bootstrapping;
        
        match self.run_start(capabilities).await {
            Ok(response) => {
                self.state = ControllerState::SessionActive;
                info!("Session active on {}", self.device.device_id());
                Ok(response)
            }
            Err(e) => {
                error!("Failed to start session: {}", e);
                self.orchestrator.stop().await;
                self.proxy.reset();
                self.state = ControllerState::Idle;
                Err(e)
            }
        }
    }
    
    async fn run_start(&mut self, capabilities: Value) -> Result<Value> {
        match self.probe.detect_platform().await {
            Ok(platform) => info!("Using Xcode {}", platform.xcode_version),
            Err(e) => warn!("Could not detect Xcode version: {}", e),
        }
        
        let endpoint = self.orchestrator.bootstrap(self.device.as_ref()).await?;
        self.proxy
            .configure(endpoint.with_url_base(&self.config.proxy.url_base));
        self.state = ControllerState::ProxyConfigured;
        
        let response = if wants_safari(&capabilities) {
            self.start_safari().await?
        } else {
            let path = self.config.session_path.clone();
            self.proxy
                .send(&path, "POST", Some(Payload::Json(capabilities)))
                .await?
        };
        
        if self.proxy.remote_session_id().is_none() {
            let body = response.to_string();
            return Err(XcBridgeError::SessionNotCreated(
                truncate(&body, LOG_BODY_LIMIT).into_owned(),
            ));
        }
        Ok(response)
    }
    
    async fn start_safari(&mut self) -> Result<Value> {
        let url = self.config.browser_start_url.clone();
        let path = self.config.session_path.clone();
        let capabilities = json!({
            "desiredCapabilities": {
                "bundleId": self.config.safari_bundle_id,
            }
        });
        info!("Opening {} in Safari", url);
        
        let (opened, session) = tokio::join!(
            self.device.open_url(&url),
            self.proxy.send(&path, "POST", Some(Payload::Json(capabilities))),
        );
        
        let session = session?;
        opened?;
        Ok(session)
    }
    
    /// Forward a command to the agent. Only valid while a session is active.
    pub async fn send_command(&mut self, path: &str, method: &str, body: Option<Payload>) -> Result<Value> {
        self.expect_state(ControllerState::SessionActive)?;
        self.proxy.send(path, method, body).await
    }
    
    /// Stop every agent process and detach the proxy. Idempotent; valid in
    /// any state.
    pub async fn stop(&mut self) {
        if self.state == ControllerState::Stopped {
            debug!("Controller already stopped");
        }
        
        self.orchestrator.stop().await;
        self.proxy.reset();
        self.state = ControllerState::Stopped;
    }
    
    fn expect_state(&self, expected: ControllerState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(XcBridgeError::InvalidState {
                expected: expected.to_string(),
                actual: self.state.to_string(),
            })
        }
    }
}

fn wants_safari(capabilities: &Value) -> bool {
    capabilities
        .pointer("/desiredCapabilities/browserName")
        .and_then(Value::as_str)
        .map_or(false, |name| name.eq_ignore_ascii_case("safari"))
}

#[cfg(test)]
mod tests;
