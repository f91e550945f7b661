//! Supervised child processes
//!
//! Every child is driven by one task that pumps both output streams through a
//! [`LineScanner`] and then reports the exit status. Line events of a process
//! are therefore always delivered before its exit event.

use std::fmt;
use std::process::ExitStatus;
use tokio::io::AsyncRead;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use xcbridge_proto::scanner::scan_line;
use xcbridge_proto::{LineScanner, ScanEvent};

/// Role of a child process in the bootstrap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessKind {
    /// `tail -f` on a simulator's system log
    TailLog,
    /// `idevicesyslog` for a physical device
    Syslog,
    /// `xcodebuild test` running the agent
    BuildRunner,
    /// The agent binary launched directly
    AgentBinary,
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TailLog => "tail-log",
            Self::Syslog => "syslog",
            Self::BuildRunner => "build-runner",
            Self::AgentBinary => "agent-binary",
        };
        f.write_str(name)
    }
}

/// What happens to the lines of one output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRole {
    /// Match against the agent patterns
    Scan,
    /// Log at debug level
    Log,
    /// Drain and drop
    Discard,
}

/// Event reported by a supervised process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A line matched an agent pattern
    Scanned {
        /// Process that printed the line
        kind: ProcessKind,
        /// What was recognised
        event: ScanEvent,
    },
    /// The process exited on its own
    Exited {
        /// Process that exited
        kind: ProcessKind,
        /// Exit code
        code: Option<i32>,
        /// Terminating signal
        signal: Option<i32>,
    },
}

/// Handle to a child process owned by the orchestrator
pub struct SupervisedProcess {
    kind: ProcessKind,
    pid: Option<u32>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SupervisedProcess {
    /// Take ownership of `child` and start streaming its output
    pub fn start(
        kind: ProcessKind,
        child: Child,
        roles: (StreamRole, StreamRole),
        events: mpsc::UnboundedSender<ProcessEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let pid = child.id();
        debug!("Supervising {} (pid {:?})", kind, pid);
        
        let task = tokio::spawn(supervise(kind, child, roles, events, cancel.clone()));
        
        Self {
            kind,
            pid,
            cancel,
            task: Some(task),
        }
    }
    
    /// Role of this process
    pub fn kind(&self) -> ProcessKind {
        self.kind
    }
    
    /// OS process id, if it was known at spawn time
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
    
    /// True once the process has exited or been terminated
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }
    
    /// Kill the process and wait for its supervisor to finish.
    /// Safe to call more than once and after the process has exited.
    pub async fn terminate(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Supervisor for {} ended abnormally: {}", self.kind, e);
            }
        }
    }
}

impl Drop for SupervisedProcess {
    fn drop(&mut self) {
        // The supervisor kills the child once cancelled
        self.cancel.cancel();
    }
}

async fn supervise(
    kind: ProcessKind,
    mut child: Child,
    (stdout_role, stderr_role): (StreamRole, StreamRole),
    events: mpsc::UnboundedSender<ProcessEvent>,
    cancel: CancellationToken,
) {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    
    let status = tokio::select! {
        _ = cancel.cancelled() => None,
        status = async {
            tokio::join!(
                pump(kind, stdout, stdout_role, &events),
                pump(kind, stderr, stderr_role, &events),
            );
            child.wait().await
        } => Some(status),
    };
    
    match status {
        None => {
            debug!("Terminating {}", kind);
            if let Err(e) = child.kill().await {
                debug!("{} already gone: {}", kind, e);
            }
        }
        Some(Ok(status)) => {
            let _ = events.send(ProcessEvent::Exited {
                kind,
                code: status.code(),
                signal: exit_signal(&status),
            });
        }
        Some(Err(e)) => {
            warn!("Failed to wait for {}: {}", kind, e);
            let _ = events.send(ProcessEvent::Exited {
                kind,
                code: None,
                signal: None,
            });
        }
    }
}

async fn pump<R>(
    kind: ProcessKind,
    stream: Option<R>,
    role: StreamRole,
    events: &mpsc::UnboundedSender<ProcessEvent>,
) where
    R: AsyncRead + Unpin,
{
    let Some(mut stream) = stream else {
        return;
    };
    let mut scanner = LineScanner::new();
    
    loop {
        match scanner.read_line(&mut stream).await {
            Ok(Some(line)) => match role {
                StreamRole::Scan => {
                    trace!("[{}] {}", kind, line);
                    for event in scan_line(&line) {
                        let _ = events.send(ProcessEvent::Scanned { kind, event });
                    }
                }
                StreamRole::Log => debug!("[{}] {}", kind, line),
                StreamRole::Discard => {}
            },
            Ok(None) => break,
            Err(e) => {
                warn!("[{}] output stream error: {}", kind, e);
                break;
            }
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}
