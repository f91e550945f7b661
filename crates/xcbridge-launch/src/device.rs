//! Device, spawner and command abstractions

use crate::LaunchError;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::debug;

/// Program plus arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program name or path
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Command without arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }
    
    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
    
    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Starts host processes with piped stdout/stderr
pub trait Spawner: Send + Sync {
    /// Spawn `command`; the child must have piped stdout and stderr
    fn spawn(&self, command: &CommandSpec) -> Result<Child, LaunchError>;
}

/// [`Spawner`] backed by `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct HostSpawner;

impl Spawner for HostSpawner {
    fn spawn(&self, command: &CommandSpec) -> Result<Child, LaunchError> {
        debug!("Spawning: {}", command);
        
        Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: command.program.clone(),
                source,
            })
    }
}

/// Run a command to completion and return its stdout
pub async fn run_command(spawner: &dyn Spawner, command: &CommandSpec) -> Result<String, LaunchError> {
    let child = spawner.spawn(command)?;
    let output = child.wait_with_output().await?;
    
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(LaunchError::CommandFailed {
            code: output.status.code(),
            message: format!("{}: {}", command.program, stderr.trim()),
        });
    }
    
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Simulator identifiers are dashed UUIDs; physical device ids have no `-`
pub fn is_real_device(device_id: &str) -> bool {
    !device_id.contains('-')
}

/// Simulator or physical device hosting the agent
#[async_trait]
pub trait Device: Send + Sync {
    /// Device identifier (UDID)
    fn device_id(&self) -> &str;
    
    /// Directory holding the device's `system.log`
    fn log_dir(&self) -> PathBuf;
    
    /// Directory holding installed app bundles
    fn app_dir(&self) -> PathBuf;
    
    /// Run a program on the device with piped stdout/stderr
    fn spawn(&self, command: &CommandSpec) -> Result<Child, LaunchError>;
    
    /// Open a URL on the device
    async fn open_url(&self, url: &str) -> Result<(), LaunchError>;
    
    /// Launch an installed app by bundle id
    async fn launch(&self, bundle_id: &str) -> Result<(), LaunchError>;
    
    /// Whether this is physical hardware rather than a simulator
    fn is_real_device(&self) -> bool {
        is_real_device(self.device_id())
    }
}

/// [`Device`] driven through `xcrun simctl` (simulators) and `xcrun devicectl` (hardware)
#[derive(Debug, Clone)]
pub struct XcrunDevice {
    device_id: String,
    log_dir: PathBuf,
    app_dir: PathBuf,
    spawner: HostSpawner,
}

impl XcrunDevice {
    /// Device with the standard CoreSimulator directories under `home`
    pub fn new(device_id: impl Into<String>, home: impl Into<PathBuf>) -> Self {
        let device_id = device_id.into();
        let home = home.into();
        let log_dir = home.join("Library/Logs/CoreSimulator").join(&device_id);
        let app_dir = home
            .join("Library/Developer/CoreSimulator/Devices")
            .join(&device_id)
            .join("data/Containers/Bundle/Application");
        
        Self {
            device_id,
            log_dir,
            app_dir,
            spawner: HostSpawner,
        }
    }
    
    /// Override the log directory
    pub fn with_log_dir(mut self, log_dir: PathBuf) -> Self {
        self.log_dir = log_dir;
        self
    }
    
    /// Override the app directory
    pub fn with_app_dir(mut self, app_dir: PathBuf) -> Self {
        self.app_dir = app_dir;
        self
    }
    
    fn simctl(&self, subcommand: &str) -> CommandSpec {
        CommandSpec::new("xcrun").args(["simctl", subcommand, self.device_id.as_str()])
    }
    
    fn devicectl_launch(&self) -> CommandSpec {
        CommandSpec::new("xcrun").args([
            "devicectl",
            "device",
            "process",
            "launch",
            "--device",
            self.device_id.as_str(),
        ])
    }
    
    fn launch_command(&self, bundle_id: &str) -> CommandSpec {
        if self.is_real_device() {
            self.devicectl_launch().arg(bundle_id)
        } else {
            self.simctl("launch").arg(bundle_id)
        }
    }
}

#[async_trait]
impl Device for XcrunDevice {
    fn device_id(&self) -> &str {
        &self.device_id
    }
    
    fn log_dir(&self) -> PathBuf {
        self.log_dir.clone()
    }
    
    fn app_dir(&self) -> PathBuf {
        self.app_dir.clone()
    }
    
    fn spawn(&self, command: &CommandSpec) -> Result<Child, LaunchError> {
        let wrapped = if self.is_real_device() {
            self.devicectl_launch().arg("--console")
        } else {
            self.simctl("spawn")
        };
        let wrapped = wrapped.arg(command.program.as_str()).args(command.args.iter().cloned());
        self.spawner.spawn(&wrapped)
    }
    
    async fn open_url(&self, url: &str) -> Result<(), LaunchError> {
        let command = if self.is_real_device() {
            self.devicectl_launch()
                .args(["--payload-url", url, "com.apple.mobilesafari"])
        } else {
            self.simctl("openurl").arg(url)
        };
        run_command(&self.spawner, &command)
            .await
            .map_err(|e| LaunchError::Device(format!("Failed to open {}: {}", url, e)))?;
        Ok(())
    }
    
    async fn launch(&self, bundle_id: &str) -> Result<(), LaunchError> {
        run_command(&self.spawner, &self.launch_command(bundle_id))
            .await
            .map_err(|e| LaunchError::Device(format!("Failed to launch {}: {}", bundle_id, e)))?;
        Ok(())
    }
}
