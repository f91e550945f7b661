//! Agent app re-signing
//!
//! Some device setups reject the freshly built runner until it is signed
//! again. When an identity is configured this runs once the agent reports
//! that it has launched.

use crate::{run_command, CommandSpec, LaunchError, Spawner};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Re-signs every installed copy of the agent app
pub struct Resigner {
    spawner: Arc<dyn Spawner>,
    app_dir: PathBuf,
    app_name: String,
    identity: String,
}

impl Resigner {
    /// Sign `<app_dir>/<entry>/<app_name>` bundles with `identity`
    pub fn new(
        spawner: Arc<dyn Spawner>,
        app_dir: PathBuf,
        app_name: impl Into<String>,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            spawner,
            app_dir,
            app_name: app_name.into(),
            identity: identity.into(),
        }
    }
    
    /// Installed agent bundles under the app directory
    pub async fn agent_apps(&self) -> Result<Vec<PathBuf>, LaunchError> {
        let mut apps = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.app_dir).await?;
        
        while let Some(entry) = entries.next_entry().await? {
            let candidate = entry.path().join(&self.app_name);
            if tokio::fs::metadata(&candidate).await.map(|m| m.is_dir()).unwrap_or(false) {
                apps.push(candidate);
            }
        }
        
        apps.sort();
        Ok(apps)
    }
    
    fn codesign(&self, app: &Path) -> CommandSpec {
        CommandSpec::new("codesign").args([
            "--deep".to_string(),
            "--strict".to_string(),
            "--sign".to_string(),
            self.identity.clone(),
            app.display().to_string(),
        ])
    }
    
    /// Sign every agent bundle; returns how many were signed
    pub async fn resign_all(&self) -> usize {
        let apps = match self.agent_apps().await {
            Ok(apps) => apps,
            Err(e) => {
                warn!("Cannot list apps in {}: {}", self.app_dir.display(), e);
                return 0;
            }
        };
        
        let mut signed = 0;
        for app in apps {
            debug!("Re-signing {}", app.display());
            match run_command(self.spawner.as_ref(), &self.codesign(&app)).await {
                Ok(_) => signed += 1,
                Err(e) => warn!("Failed to re-sign {}: {}", app.display(), e),
            }
        }
        
        info!("Re-signed {} agent app(s)", signed);
        signed
    }
}
