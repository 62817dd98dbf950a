//! Script runner: local `sh -c` or a command over a remote session

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::deploy::ssh::{RemoteSession, SSH_CONNECTION_EXIT};
use crate::errors::OrchestratorError;

/// How long readers may keep draining once the process is gone.
///
/// Grandchildren of a killed shell can hold the pipes open.
const READER_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One line of script output, without its terminator
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

/// Options for one script invocation
#[derive(Debug)]
pub struct RunOptions<'a> {
    /// Working directory (local runs only)
    pub cwd: Option<PathBuf>,

    pub timeout: Duration,

    pub env: Vec<(String, String)>,

    /// Run through this session instead of locally
    pub remote: Option<&'a RemoteSession>,

    /// Flips to `true` when the run should be abandoned
    pub cancel: Option<watch::Receiver<bool>>,

    /// Receives output lines while the script runs
    pub output: Option<mpsc::UnboundedSender<OutputLine>>,
}

impl RunOptions<'_> {
    pub fn new(timeout: Duration) -> Self {
        Self {
            cwd: None,
            timeout,
            env: Vec::new(),
            remote: None,
            cancel: None,
            output: None,
        }
    }
}

/// How the process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Exited(i32),
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub status: RunStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl RunOutput {
    /// Exit code; `None` when the process was killed
    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            RunStatus::Exited(code) => Some(code),
            RunStatus::TimedOut | RunStatus::Cancelled => None,
        }
    }

    pub fn success(&self) -> bool {
        self.status == RunStatus::Exited(0)
    }

    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }

    /// Map anything but a zero exit to the matching error
    pub fn check(&self, label: &str) -> Result<(), OrchestratorError> {
        match self.status {
            RunStatus::Exited(0) => Ok(()),
            RunStatus::Exited(code) => Err(OrchestratorError::ExecutionError(format!(
                "{} exited with code {}",
                label, code
            ))),
            RunStatus::TimedOut => Err(OrchestratorError::Timeout(format!(
                "{} timed out after {}s",
                label,
                self.duration.as_secs()
            ))),
            RunStatus::Cancelled => Err(OrchestratorError::Cancelled(format!(
                "{} was stopped",
                label
            ))),
        }
    }
}

/// Runs shell scripts with a timeout and cancellation
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    shell: String,
}

impl ScriptRunner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    /// Run `script` to completion, timeout or cancellation.
    ///
    /// Errors are reserved for failing to start the process and for losing
    /// the remote connection; everything else is described by the output.
    pub async fn run(
        &self,
        script: &str,
        options: RunOptions<'_>,
    ) -> Result<RunOutput, OrchestratorError> {
        let mut cmd = match options.remote {
            Some(session) => session.command(script, &options.env),
            None => {
                let mut cmd = Command::new(&self.shell);
                cmd.arg("-c").arg(script).envs(options.env.iter().cloned());
                if let Some(cwd) = &options.cwd {
                    cmd.current_dir(cwd);
                }
                cmd
            }
        };

        let output = supervise(&mut cmd, options.timeout, options.cancel, options.output).await?;

        if let (Some(session), Some(SSH_CONNECTION_EXIT)) = (options.remote, output.exit_code()) {
            return Err(OrchestratorError::ConnectionError(format!(
                "lost connection to host {}: {}",
                session.host_id(),
                output.stderr.trim()
            )));
        }

        Ok(output)
    }
}

impl Default for ScriptRunner {
    fn default() -> Self {
        Self::new("sh")
    }
}

enum Ended {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

async fn supervise(
    cmd: &mut Command,
    timeout: Duration,
    cancel: Option<watch::Receiver<bool>>,
    output: Option<mpsc::UnboundedSender<OutputLine>>,
) -> Result<RunOutput, OrchestratorError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let started = Instant::now();
    let mut child = cmd.spawn().map_err(|e| {
        OrchestratorError::ExecutionError(format!("failed to start process: {}", e))
    })?;

    let stdout_buf = Arc::new(Mutex::new(String::new()));
    let stderr_buf = Arc::new(Mutex::new(String::new()));
    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(
            stdout,
            OutputStream::Stdout,
            stdout_buf.clone(),
            output.clone(),
        ));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(
            stderr,
            OutputStream::Stderr,
            stderr_buf.clone(),
            output,
        ));
    }

    let mut cancel = cancel;
    let ended = tokio::select! {
        status = child.wait() => Ended::Exited(status),
        _ = tokio::time::sleep(timeout) => Ended::TimedOut,
        _ = cancelled(cancel.as_mut()) => Ended::Cancelled,
    };

    let status = match ended {
        Ended::Exited(status) => RunStatus::Exited(status?.code().unwrap_or(-1)),
        Ended::TimedOut => {
            debug!("Process timed out after {:?}, killing", timeout);
            kill(&mut child).await;
            RunStatus::TimedOut
        }
        Ended::Cancelled => {
            debug!("Process cancelled, killing");
            kill(&mut child).await;
            RunStatus::Cancelled
        }
    };

    for reader in readers {
        let abort = reader.abort_handle();
        if tokio::time::timeout(READER_GRACE, reader).await.is_err() {
            abort.abort();
        }
    }

    Ok(RunOutput {
        status,
        stdout: take(&stdout_buf),
        stderr: take(&stderr_buf),
        duration: started.elapsed(),
    })
}

/// Resolves once the signal flips to `true`; never when there is none
async fn cancelled(cancel: Option<&mut watch::Receiver<bool>>) {
    if let Some(rx) = cancel {
        let closed = rx.wait_for(|stop| *stop).await.is_err();
        if !closed {
            return;
        }
    }
    std::future::pending::<()>().await
}

async fn kill(child: &mut tokio::process::Child) {
    if let Err(e) = child.kill().await {
        warn!("Failed to kill process: {}", e);
    }
}

fn spawn_reader<R>(
    reader: R,
    stream: OutputStream,
    buffer: Arc<Mutex<String>>,
    output: Option<mpsc::UnboundedSender<OutputLine>>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut raw = Vec::new();
        loop {
            raw.clear();
            match reader.read_until(b'\n', &mut raw).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&raw);
                    match buffer.lock() {
                        Ok(mut buf) => buf.push_str(&text),
                        Err(poisoned) => poisoned.into_inner().push_str(&text),
                    }
                    if let Some(tx) = &output {
                        // the receiver going away only stops streaming
                        let _ = tx.send(OutputLine {
                            stream,
                            text: text.trim_end_matches(['\n', '\r']).to_string(),
                        });
                    }
                }
                Err(e) => {
                    debug!("Output reader stopped: {}", e);
                    break;
                }
            }
        }
    })
}

fn take(buffer: &Mutex<String>) -> String {
    match buffer.lock() {
        Ok(mut buf) => std::mem::take(&mut *buf),
        Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
    }
}
