//! External process handles
//!
//! The capture and motion loops never call `tokio::process` directly. They go
//! through [`ProcessLauncher`], which yields a [`SupervisedProcess`] with an
//! explicit wait/kill contract.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use super::command::CommandSpec;

/// How long `wait` lets the stderr drain catch up after the child exited
const STDERR_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

/// How a supervised process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, `None` when terminated by a signal
    pub code: Option<i32>,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl std::fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {}", code),
            None => f.write_str("terminated by signal"),
        }
    }
}

/// Boxed stdout reader of a supervised process
pub type ProcessStdout = Box<dyn AsyncRead + Send + Unpin>;

/// A running child process
#[async_trait]
pub trait SupervisedProcess: Send {
    /// Take the stdout pipe, if it was requested and not taken yet
    fn take_stdout(&mut self) -> Option<ProcessStdout>;

    /// Wait for the process to exit
    async fn wait(&mut self) -> std::io::Result<ProcessExit>;

    /// Kill the process and reap it
    async fn kill(&mut self) -> std::io::Result<()>;
}

/// Starts supervised processes
#[async_trait]
pub trait ProcessLauncher: Send + Sync + 'static {
    /// Start `spec`; `capture_stdout` requests a readable stdout pipe
    async fn launch(
        &self,
        spec: &CommandSpec,
        capture_stdout: bool,
    ) -> std::io::Result<Box<dyn SupervisedProcess>>;
}

/// Launcher backed by real OS processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher;

#[async_trait]
impl ProcessLauncher for SystemLauncher {
    async fn launch(
        &self,
        spec: &CommandSpec,
        capture_stdout: bool,
    ) -> std::io::Result<Box<dyn SupervisedProcess>> {
        let handle = ProcessHandle::spawn(spec, capture_stdout)?;
        Ok(Box::new(handle))
    }
}

/// Owned child process with its pipes
///
/// stderr is always piped and drained into debug logs so a chatty transcoder
/// can never block on a full pipe. The child is killed if the handle is dropped.
pub struct ProcessHandle {
    child: Child,
    label: String,
    stderr_task: Option<JoinHandle<()>>,
}

impl ProcessHandle {
    /// Spawn `spec`
    pub fn spawn(spec: &CommandSpec, capture_stdout: bool) -> std::io::Result<Self> {
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(if capture_stdout {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let label = spec.program.clone();
        let pid = child.id();

        let stderr_task = child.stderr.take().map(|stderr| {
            let label = label.clone();
            tokio::spawn(async move {
                // Lines are read as raw bytes; an undecodable line must not
                // close the pipe under a still running transcoder
                let mut reader = BufReader::new(stderr);
                let mut line = Vec::new();
                loop {
                    line.clear();
                    match reader.read_until(b'\n', &mut line).await {
                        Ok(0) => break,
                        Ok(_) => {
                            let text = String::from_utf8_lossy(&line);
                            tracing::debug!(process = %label, pid = ?pid, "{}", text.trim_end());
                        }
                        Err(e) => {
                            tracing::debug!(process = %label, pid = ?pid, error = %e, "stderr read failed");
                            break;
                        }
                    }
                }
            })
        });

        tracing::debug!(process = %label, pid = ?pid, "Process spawned");

        Ok(Self {
            child,
            label,
            stderr_task,
        })
    }

    /// OS process id, `None` once the process has been reaped
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn finish_stderr(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

#[async_trait]
impl SupervisedProcess for ProcessHandle {
    fn take_stdout(&mut self) -> Option<ProcessStdout> {
        self.child
            .stdout
            .take()
            .map(|stdout| Box::new(stdout) as ProcessStdout)
    }

    async fn wait(&mut self) -> std::io::Result<ProcessExit> {
        let status = self.child.wait().await?;
        // Let the stderr drain flush what the process wrote before exiting.
        // A grandchild holding the pipe open would keep it alive forever.
        if let Some(mut task) = self.stderr_task.take() {
            if tokio::time::timeout(STDERR_FLUSH_TIMEOUT, &mut task)
                .await
                .is_err()
            {
                task.abort();
            }
        }
        Ok(ProcessExit {
            code: status.code(),
        })
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        tracing::debug!(process = %self.label, pid = ?self.child.id(), "Killing process");
        self.finish_stderr();
        self.child.kill().await
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.finish_stderr();
    }
}
