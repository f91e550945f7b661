//! Agent bootstrap orchestration
//!
//! The [`Orchestrator`] starts the processes that bring the agent online,
//! watches their output for the agent URL and resolves once the endpoint is
//! known. It owns every process it starts and is the only thing that stops
//! them.

use crate::{
    run_command, CommandSpec, Device, LaunchError, ProcessEvent, ProcessKind, Resigner, Spawner,
    StreamRole, SupervisedProcess,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use xcbridge_proto::{Endpoint, ScanEvent};

/// Log file tailed for simulators, relative to the device log directory
pub const SIMULATOR_LOG_FILE: &str = "system.log";

/// Time the agent needs after printing its URL before its HTTP listener answers
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(3);

/// Upper bound on waiting for the agent URL; `xcodebuild test` on hardware is slow
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(180);

/// How the agent is brought up
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LaunchStrategy {
    /// Run `xcodebuild test` and watch the device log for the agent URL
    #[default]
    BuildAndTest,
    /// Build once if needed, then run the agent binary and watch its stderr
    DirectBinary {
        /// Path of the built agent binary
        binary: PathBuf,
    },
}

/// Xcode project that produces the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentProject {
    /// `.xcodeproj` directory
    pub project_path: PathBuf,
    /// Scheme that builds and runs the agent
    pub scheme: String,
    /// Name of the installed runner app bundle
    pub app_name: String,
    /// Bundle id of the runner
    pub bundle_id: String,
}

impl Default for AgentProject {
    fn default() -> Self {
        Self {
            project_path: PathBuf::from("WebDriverAgent/WebDriverAgent.xcodeproj"),
            scheme: "WebDriverAgentRunner".to_string(),
            app_name: "WebDriverAgentRunner-Runner.app".to_string(),
            bundle_id: "com.facebook.WebDriverAgentRunner.xctrunner".to_string(),
        }
    }
}

impl AgentProject {
    /// `xcodebuild <action>` against this project for one device
    pub fn xcodebuild(&self, action: &str, device_id: &str) -> CommandSpec {
        CommandSpec::new("xcodebuild").args([
            action.to_string(),
            "-project".to_string(),
            self.project_path.display().to_string(),
            "-scheme".to_string(),
            self.scheme.clone(),
            "-destination".to_string(),
            format!("id={}", device_id),
        ])
    }
}

/// Bootstrap configuration
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Launch strategy
    pub strategy: LaunchStrategy,
    /// Agent project
    pub project: AgentProject,
    /// Scheme an agent URL must use to be accepted
    pub expected_scheme: String,
    /// Wait after discovery before the endpoint is handed out
    pub settle_delay: Duration,
    /// Upper bound on waiting for the agent URL
    pub discovery_timeout: Duration,
    /// Signing identity used to re-sign the agent app once it launches
    pub resign_identity: Option<String>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            strategy: LaunchStrategy::default(),
            project: AgentProject::default(),
            expected_scheme: "http".to_string(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            resign_identity: None,
        }
    }
}

/// Where the agent's log output is read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSource {
    /// A simulator's system log file
    SimulatorLog {
        /// Path of `system.log`
        path: PathBuf,
    },
    /// A physical device's syslog
    DeviceSyslog {
        /// Device UDID
        device_id: String,
    },
}

impl LogSource {
    /// Pick the source matching the device class
    pub fn for_device(device: &dyn Device) -> Self {
        if device.is_real_device() {
            Self::DeviceSyslog {
                device_id: device.device_id().to_string(),
            }
        } else {
            Self::SimulatorLog {
                path: device.log_dir().join(SIMULATOR_LOG_FILE),
            }
        }
    }
    
    /// Process kind of the watcher
    pub fn kind(&self) -> ProcessKind {
        match self {
            Self::SimulatorLog { .. } => ProcessKind::TailLog,
            Self::DeviceSyslog { .. } => ProcessKind::Syslog,
        }
    }
    
    /// Command that follows the log
    pub fn command(&self) -> CommandSpec {
        match self {
            Self::SimulatorLog { path } => CommandSpec::new("tail")
                .args(["-f", "-n", "0"])
                .arg(path.display().to_string()),
            Self::DeviceSyslog { device_id } => {
                CommandSpec::new("idevicesyslog").args(["-u", device_id.as_str()])
            }
        }
    }
}

/// Starts, watches and stops the processes that bring the agent online
pub struct Orchestrator {
    config: BootstrapConfig,
    spawner: Arc<dyn Spawner>,
    processes: Vec<SupervisedProcess>,
    events_tx: Option<mpsc::UnboundedSender<ProcessEvent>>,
    events_rx: Option<mpsc::UnboundedReceiver<ProcessEvent>>,
    monitor: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Create an orchestrator; nothing is started yet
    pub fn new(config: BootstrapConfig, spawner: Arc<dyn Spawner>) -> Self {
        if config.project.project_path.is_dir() {
            info!("Agent project path: {}", config.project.project_path.display());
        } else {
            error!("Agent project not found at {}", config.project.project_path.display());
        }
        
        Self {
            config,
            spawner,
            processes: Vec::new(),
            events_tx: None,
            events_rx: None,
            monitor: None,
            cancel: CancellationToken::new(),
        }
    }
    
    /// Active configuration
    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }
    
    /// Kinds of the processes that are still running
    pub fn running(&self) -> Vec<ProcessKind> {
        self.processes
            .iter()
            .filter(|p| !p.is_finished())
            .map(|p| p.kind())
            .collect()
    }
    
    /// Bring the agent up on `device` and return its endpoint.
    ///
    /// Returns only after the settle delay has elapsed. On failure every
    /// process started for this attempt is stopped.
    pub async fn bootstrap(&mut self, device: &dyn Device) -> Result<Endpoint, LaunchError> {
        info!("Bootstrapping agent on {}", device.device_id());
        
        match self.run_bootstrap(device).await {
            Ok(endpoint) => Ok(endpoint),
            Err(e) => {
                error!("Bootstrap failed: {}", e);
                self.stop().await;
                Err(e)
            }
        }
    }
    
    async fn run_bootstrap(&mut self, device: &dyn Device) -> Result<Endpoint, LaunchError> {
        self.stop().await;
        
        let authoritative = match self.config.strategy.clone() {
            LaunchStrategy::BuildAndTest => {
                let source = LogSource::for_device(device);
                self.start_log_watcher(&source)?;
                self.start_build_and_run(device.device_id())?;
                source.kind()
            }
            LaunchStrategy::DirectBinary { binary } => {
                // No log watcher here; the launch marker and the URL come from the binary's stderr
                self.ensure_agent_built(device.device_id(), &binary).await?;
                self.start_agent_binary_directly(device, &binary)?;
                ProcessKind::AgentBinary
            }
        };
        
        self.await_endpoint(authoritative, device.app_dir()).await
    }
    
    /// Follow the agent log; its stdout is scanned for the agent URL
    pub fn start_log_watcher(&mut self, source: &LogSource) -> Result<(), LaunchError> {
        let command = source.command();
        info!("Starting log watcher: {}", command);
        
        let child = self.spawner.spawn(&command)?;
        self.supervise(source.kind(), child, (StreamRole::Scan, StreamRole::Log));
        Ok(())
    }
    
    /// Run `xcodebuild test` for the agent; output is noise, exit is only logged
    pub fn start_build_and_run(&mut self, device_id: &str) -> Result<(), LaunchError> {
        let command = self.config.project.xcodebuild("test", device_id);
        info!("Starting agent runner: {}", command);
        
        let child = self.spawner.spawn(&command)?;
        self.supervise(ProcessKind::BuildRunner, child, (StreamRole::Discard, StreamRole::Log));
        Ok(())
    }
    
    /// Build the agent with `xcodebuild build-for-testing` unless `binary` exists
    pub async fn ensure_agent_built(&self, device_id: &str, binary: &Path) -> Result<(), LaunchError> {
        if binary.exists() {
            debug!("Agent binary present at {}", binary.display());
            return Ok(());
        }
        
        let command = self.config.project.xcodebuild("build-for-testing", device_id);
        info!("Building agent: {}", command);
        
        run_command(self.spawner.as_ref(), &command)
            .await
            .map_err(|e| match e {
                LaunchError::CommandFailed { code, message } => LaunchError::BuildFailed { code, message },
                other => other,
            })?;
        
        if !binary.exists() {
            return Err(LaunchError::AgentBinaryMissing(binary.to_path_buf()));
        }
        Ok(())
    }
    
    /// Run the agent binary on the device; its stderr is scanned for the agent URL
    pub fn start_agent_binary_directly(&mut self, device: &dyn Device, binary: &Path) -> Result<(), LaunchError> {
        let command = CommandSpec::new(binary.display().to_string());
        info!("Launching agent binary on {}: {}", device.device_id(), command);
        
        let child = device.spawn(&command)?;
        self.supervise(ProcessKind::AgentBinary, child, (StreamRole::Log, StreamRole::Scan));
        Ok(())
    }
    
    /// Wait until the `authoritative` process reports a usable agent URL,
    /// then wait out the settle delay.
    pub async fn await_endpoint(&mut self, authoritative: ProcessKind, app_dir: PathBuf) -> Result<Endpoint, LaunchError> {
        let events = self
            .events_rx
            .take()
            .ok_or_else(|| LaunchError::Interrupted("no watched process was started".to_string()))?;
        // Only the supervisors keep the channel open from here on
        self.events_tx = None;
        
        let resigner = self.config.resign_identity.as_ref().map(|identity| {
            Arc::new(Resigner::new(
                self.spawner.clone(),
                app_dir,
                self.config.project.app_name.clone(),
                identity.clone(),
            ))
        });
        
        let (resolve, resolved) = oneshot::channel();
        let monitor = Monitor {
            authoritative,
            expected_scheme: self.config.expected_scheme.clone(),
            resolve: Some(resolve),
            resigner,
            resigned: false,
            background: JoinSet::new(),
        };
        if let Some(previous) = self.monitor.replace(tokio::spawn(monitor.run(events))) {
            previous.abort();
        }
        
        let endpoint = match tokio::time::timeout(self.config.discovery_timeout, resolved).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => {
                return Err(LaunchError::Interrupted(
                    "event monitor stopped before an endpoint was found".to_string(),
                ))
            }
            Err(_) => return Err(LaunchError::Timeout(self.config.discovery_timeout)),
        };
        
        info!("Agent endpoint {} discovered, settling for {:?}", endpoint, self.config.settle_delay);
        tokio::time::sleep(self.config.settle_delay).await;
        
        Ok(endpoint)
    }
    
    /// Terminate every owned process. Idempotent; safe before any bootstrap.
    pub async fn stop(&mut self) {
        let processes = std::mem::take(&mut self.processes);
        if !processes.is_empty() {
            info!("Stopping {} bootstrap process(es)", processes.len());
        }
        
        self.cancel.cancel();
        for mut process in processes {
            process.terminate().await;
        }
        
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
        self.events_tx = None;
        self.events_rx = None;
        self.cancel = CancellationToken::new();
    }
    
    fn supervise(&mut self, kind: ProcessKind, child: tokio::process::Child, roles: (StreamRole, StreamRole)) {
        let events = self.events_sender();
        let process = SupervisedProcess::start(kind, child, roles, events, self.cancel.child_token());
        self.processes.push(process);
    }
    
    fn events_sender(&mut self) -> mpsc::UnboundedSender<ProcessEvent> {
        if let Some(tx) = &self.events_tx {
            return tx.clone();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.events_rx = Some(rx);
        self.events_tx = Some(tx.clone());
        tx
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
    }
}

/// Consumes process events; resolves the endpoint at most once and keeps
/// logging after that.
struct Monitor {
    authoritative: ProcessKind,
    expected_scheme: String,
    resolve: Option<oneshot::Sender<Result<Endpoint, LaunchError>>>,
    resigner: Option<Arc<Resigner>>,
    resigned: bool,
    background: JoinSet<()>,
}

impl Monitor {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<ProcessEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        
        if let Some(resolve) = self.resolve.take() {
            let _ = resolve.send(Err(LaunchError::Interrupted(
                "all bootstrap processes ended".to_string(),
            )));
        }
        while self.background.join_next().await.is_some() {}
    }
    
    fn handle(&mut self, event: ProcessEvent) {
        match event {
            ProcessEvent::Scanned { kind, event: ScanEvent::AgentLaunched } => {
                info!("Agent launched (reported by {})", kind);
                self.resign_once();
            }
            ProcessEvent::Scanned { kind, event: ScanEvent::EndpointDiscovered(url) } => {
                self.on_agent_url(kind, &url);
            }
            ProcessEvent::Exited { kind, code, signal } => {
                self.on_exit(kind, code, signal);
            }
        }
    }
    
    fn resign_once(&mut self) {
        if self.resigned {
            return;
        }
        if let Some(resigner) = self.resigner.clone() {
            self.resigned = true;
            self.background.spawn(async move {
                resigner.resign_all().await;
            });
        }
    }
    
    fn on_agent_url(&mut self, kind: ProcessKind, url: &str) {
        if kind != self.authoritative {
            debug!("Ignoring agent URL {} from {}", url, kind);
            return;
        }
        if self.resolve.is_none() {
            debug!("Agent URL {} seen again after resolution", url);
            return;
        }
        
        let endpoint = match Endpoint::from_agent_url(url) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!("Ignoring agent URL: {}", e);
                return;
            }
        };
        if endpoint.scheme != self.expected_scheme {
            warn!("Ignoring agent URL {}: expected scheme {}", url, self.expected_scheme);
            return;
        }
        
        info!("Agent listening on {}", endpoint);
        if let Some(resolve) = self.resolve.take() {
            let _ = resolve.send(Ok(endpoint));
        }
    }
    
    fn on_exit(&mut self, kind: ProcessKind, code: Option<i32>, signal: Option<i32>) {
        warn!("{} exited with code: {:?}, signal: {:?}", kind, code, signal);
        
        if kind == self.authoritative {
            if let Some(resolve) = self.resolve.take() {
                let _ = resolve.send(Err(LaunchError::BootstrapAborted { kind, code, signal }));
            }
        }
    }
}
