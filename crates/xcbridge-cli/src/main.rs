//! xcbridge binary
//!
//! Starts an agent session on one simulator or device using `XCBRIDGE_*`
//! environment configuration, then forwards newline-delimited JSON commands
//! from stdin and writes one JSON response per line to stdout.

use anyhow::Result;
use std::sync::Arc;
use tokio::io::{stdin, stdout, BufReader};
use tracing::{error, info};
use xcbridge::Controller;
use xcbridge_launch::XcrunDevice;

mod commands;
mod config;

use commands::{run_commands, write_line};
use config::CliConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries responses only
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    
    let config = CliConfig::from_env()?;
    info!("Starting xcbridge for device {}", config.device_id);
    
    let device = XcrunDevice::new(config.device_id.clone(), config.home.clone());
    let mut controller = Controller::builder(Arc::new(device))
        .with_config(config.controller)
        .build()?;
    
    let mut output = stdout();
    let created = match controller.start(config.capabilities).await {
        Ok(created) => created,
        Err(e) => {
            error!("Failed to start session: {}", e);
            controller.stop().await;
            return Err(e.into());
        }
    };
    write_line(&mut output, &serde_json::json!({"ok": true, "value": created})).await?;
    
    let result = tokio::select! {
        served = run_commands(BufReader::new(stdin()), &mut output, &mut controller) => served.map(|_| ()),
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            Ok(())
        }
    };
    
    controller.stop().await;
    info!("xcbridge stopped");
    result
}
