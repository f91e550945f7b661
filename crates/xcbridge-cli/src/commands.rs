//! Newline-delimited JSON command loop
//!
//! Each input line is `{"path": "...", "method": "...", "body": ...}` and
//! produces exactly one output line, `{"ok": true, "value": ...}` or
//! `{"ok": false, "error": "..."}`.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};
use xcbridge::proto::Payload;
use xcbridge::Controller;

/// One command read from the input stream
#[derive(Debug, Deserialize)]
pub struct CommandLine {
    /// Request path, e.g. `/wd/hub/session/<id>/element`
    pub path: String,
    /// HTTP method; `GET` when absent
    #[serde(default = "default_method")]
    pub method: String,
    /// JSON object or JSON text
    #[serde(default)]
    pub body: Option<Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl CommandLine {
    /// Body as a proxy payload; strings are treated as JSON text
    pub fn payload(&mut self) -> Option<Payload> {
        self.body.take().map(|body| match body {
            Value::String(text) => Payload::Text(text),
            other => Payload::Json(other),
        })
    }
}

/// Something that executes proxied commands
#[async_trait]
pub trait CommandSink: Send {
    /// Forward one command
    async fn send_command(&mut self, path: &str, method: &str, body: Option<Payload>) -> xcbridge::Result<Value>;
}

#[async_trait]
impl CommandSink for Controller {
    async fn send_command(&mut self, path: &str, method: &str, body: Option<Payload>) -> xcbridge::Result<Value> {
        Controller::send_command(self, path, method, body).await
    }
}

/// Serve commands from `reader` until it closes; returns how many were handled
pub async fn run_commands<R, W, S>(reader: R, writer: &mut W, sink: &mut S) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    S: CommandSink + ?Sized,
{
    let mut lines = reader.lines();
    let mut handled = 0;
    
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        
        let reply = match serde_json::from_str::<CommandLine>(trimmed) {
            Ok(mut command) => {
                debug!("Command {} {}", command.method, command.path);
                let body = command.payload();
                match sink.send_command(&command.path, &command.method, body).await {
                    Ok(value) => json!({"ok": true, "value": value}),
                    Err(e) => {
                        warn!("Command {} {} failed: {}", command.method, command.path, e);
                        json!({"ok": false, "error": e.to_string()})
                    }
                }
            }
            Err(e) => {
                warn!("Ignoring malformed command: {}", e);
                json!({"ok": false, "error": format!("malformed command: {}", e)})
            }
        };
        
        write_line(writer, &reply).await?;
        handled += 1;
    }
    
    info!("Command input closed after {} command(s)", handled);
    Ok(handled)
}

/// Write `value` as one line and flush
pub async fn write_line<W>(writer: &mut W, value: &Value) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut text = serde_json::to_string(value)?;
    text.push('\n');
    writer.write_all(text.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
