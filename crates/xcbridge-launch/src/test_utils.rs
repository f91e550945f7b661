//! Scripted spawners and devices for tests
//!
//! Each program name maps to a `sh -c` script, so bootstrap flows can be
//! exercised without Xcode or a device.

use crate::{CommandSpec, Device, LaunchError, PlatformInfo, Spawner, XcodeProbe};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::process::{Child, Command};

/// Agent URL line as printed by the runner
pub fn agent_url_line(url: &str) -> String {
    format!("ServerURLHere->{}<-ServerURLHere", url)
}

/// [`Spawner`] that runs a shell script per program name
#[derive(Debug, Clone, Default)]
pub struct ScriptedSpawner {
    scripts: HashMap<String, String>,
    spawned: Arc<Mutex<Vec<CommandSpec>>>,
}

impl ScriptedSpawner {
    /// Spawner with no scripts; every spawn fails with `NotFound`
    pub fn new() -> Self {
        Self::default()
    }
    
    /// Run `script` whenever `program` is spawned
    pub fn with_script(mut self, program: &str, script: &str) -> Self {
        self.scripts.insert(program.to_string(), script.to_string());
        self
    }
    
    /// Commands spawned so far, in order
    pub fn spawned(&self) -> Vec<CommandSpec> {
        self.spawned.lock().map(|s| s.clone()).unwrap_or_default()
    }
    
    /// Programs spawned so far, in order
    pub fn programs(&self) -> Vec<String> {
        self.spawned().into_iter().map(|c| c.program).collect()
    }
}

impl Spawner for ScriptedSpawner {
    fn spawn(&self, command: &CommandSpec) -> Result<Child, LaunchError> {
        let script = self.scripts.get(&command.program).ok_or_else(|| LaunchError::Spawn {
            program: command.program.clone(),
            source: io::Error::new(io::ErrorKind::NotFound, "no script registered"),
        })?;
        
        if let Ok(mut spawned) = self.spawned.lock() {
            spawned.push(command.clone());
        }
        
        Command::new("sh")
            .arg("-c")
            .arg(script)
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

/// [`Device`] whose processes come from a [`ScriptedSpawner`]
#[derive(Debug, Clone)]
pub struct ScriptedDevice {
    device_id: String,
    log_dir: PathBuf,
    app_dir: PathBuf,
    spawner: ScriptedSpawner,
    opened: Arc<Mutex<Vec<String>>>,
    launched: Arc<Mutex<Vec<String>>>,
}

impl ScriptedDevice {
    /// Simulator-style device (dashed UDID)
    pub fn simulator(spawner: ScriptedSpawner) -> Self {
        Self::with_id("5D7E3F7A-1C2B-4D5E-8F90-0123456789AB", spawner)
    }
    
    /// Hardware-style device (UDID without dashes)
    pub fn physical(spawner: ScriptedSpawner) -> Self {
        Self::with_id("a1b2c3d4e5f60718293a4b5c6d7e8f9012345678", spawner)
    }
    
    /// Device with an explicit id
    pub fn with_id(device_id: &str, spawner: ScriptedSpawner) -> Self {
        Self {
            device_id: device_id.to_string(),
            log_dir: std::env::temp_dir().join("xcbridge-logs"),
            app_dir: std::env::temp_dir().join("xcbridge-apps"),
            spawner,
            opened: Arc::new(Mutex::new(Vec::new())),
            launched: Arc::new(Mutex::new(Vec::new())),
        }
    }
    
    /// Override the app directory
    pub fn with_app_dir(mut self, app_dir: PathBuf) -> Self {
        self.app_dir = app_dir;
        self
    }
    
    /// URLs passed to `open_url`
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().map(|o| o.clone()).unwrap_or_default()
    }
    
    /// Bundle ids passed to `launch`
    pub fn launched(&self) -> Vec<String> {
        self.launched.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Device for ScriptedDevice {
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
        self.spawner.spawn(command)
    }
    
    async fn open_url(&self, url: &str) -> Result<(), LaunchError> {
        if let Ok(mut opened) = self.opened.lock() {
            opened.push(url.to_string());
        }
        Ok(())
    }
    
    async fn launch(&self, bundle_id: &str) -> Result<(), LaunchError> {
        if let Ok(mut launched) = self.launched.lock() {
            launched.push(bundle_id.to_string());
        }
        Ok(())
    }
}

/// [`XcodeProbe`] that always reports the same platform
#[derive(Debug, Clone)]
pub struct StaticProbe {
    info: PlatformInfo,
}

impl StaticProbe {
    /// Report `xcode_version` without a build number
    pub fn new(xcode_version: &str) -> Self {
        Self {
            info: PlatformInfo {
                xcode_version: xcode_version.to_string(),
                build_version: None,
            },
        }
    }
}

#[async_trait]
impl XcodeProbe for StaticProbe {
    async fn detect_platform(&self) -> Result<PlatformInfo, LaunchError> {
        Ok(self.info.clone())
    }
}
