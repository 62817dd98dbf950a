//! Remote sessions over the system `ssh` client.
//!
//! A session is one multiplexed ssh master connection living in a private
//! temporary directory: the control socket, and the key file when the host
//! carries an inline key. Commands reuse the master through `ControlPath`.
//! Closing the session stops the master and removes the directory.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use secrecy::ExposeSecret;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::errors::OrchestratorError;
use crate::filesys::file::File;
use crate::models::host::{Credentials, Host};

/// Idle lifetime of a master connection that was never closed
const CONTROL_PERSIST: &str = "120s";

/// Bound on tearing the master down
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Exit code the ssh client uses for its own failures
pub const SSH_CONNECTION_EXIT: i32 = 255;

/// An authenticated connection to one host
#[derive(Debug)]
pub struct RemoteSession {
    host_id: String,
    destination: String,
    port: u16,
    control_path: PathBuf,
    dir: TempDir,
}

impl RemoteSession {
    /// Establish the master connection.
    ///
    /// Every failure, including the handshake running past `timeout`, is a
    /// `ConnectionError`.
    pub async fn connect(host: &Host, timeout: Duration) -> Result<Self, OrchestratorError> {
        host.validate()?;
        let dir = tempfile::Builder::new()
            .prefix("deployd-ssh-")
            .tempdir()
            .map_err(|e| {
                OrchestratorError::ConnectionError(format!("failed to create session dir: {}", e))
            })?;
        let control_path = dir.path().join("cm");

        let identity = match &host.credentials {
            Credentials::PrivateKeyPath { path } => Some(path.clone()),
            Credentials::PrivateKey { key } => {
                let key_file = File::new(dir.path().join("id_key"));
                let mut pem = key.expose_secret().to_string();
                if !pem.ends_with('\n') {
                    pem.push('\n');
                }
                key_file.write_string(&pem).await?;
                key_file.set_permissions_600().await?;
                Some(key_file.path().to_path_buf())
            }
            Credentials::Password { .. } | Credentials::Agent => None,
        };

        let mut cmd = match &host.credentials {
            Credentials::Password { password } => {
                let mut cmd = Command::new("sshpass");
                cmd.arg("-e")
                    .arg("ssh")
                    .env("SSHPASS", password.expose_secret());
                cmd
            }
            _ => Command::new("ssh"),
        };

        let connect_secs = timeout.as_secs().max(1);
        cmd.arg("-o")
            .arg("ControlMaster=yes")
            .arg("-o")
            .arg(format!("ControlPersist={}", CONTROL_PERSIST))
            .arg("-o")
            .arg(format!("ControlPath={}", control_path.display()))
            .arg("-o")
            .arg(format!("ConnectTimeout={}", connect_secs))
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new");
        match &host.credentials {
            Credentials::Password { .. } => {
                cmd.arg("-o")
                    .arg("PreferredAuthentications=password,keyboard-interactive")
                    .arg("-o")
                    .arg("PubkeyAuthentication=no");
            }
            _ => {
                cmd.arg("-o").arg("BatchMode=yes");
            }
        }
        if let Some(identity) = &identity {
            cmd.arg("-o").arg("IdentitiesOnly=yes").arg("-i").arg(identity);
        }
        cmd.arg("-p")
            .arg(host.port.to_string())
            .arg("--")
            .arg(host.destination())
            .arg("true");

        // the backgrounded master keeps its stderr open, so it goes to a file
        // instead of a pipe we would wait on
        let stderr_path = dir.path().join("connect.log");
        let stderr = tokio::fs::File::create(&stderr_path).await?.into_std().await;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);

        debug!(host = %host.id, destination = %host.destination(), "Opening ssh master");

        let mut child = cmd.spawn().map_err(|e| {
            OrchestratorError::ConnectionError(format!(
                "failed to spawn ssh client for {}: {}",
                host.destination(),
                e
            ))
        })?;

        let status = match tokio::time::timeout(timeout + Duration::from_secs(1), child.wait()).await
        {
            Ok(status) => status?,
            Err(_) => {
                let _ = child.start_kill();
                return Err(OrchestratorError::ConnectionError(format!(
                    "ssh handshake with {} timed out after {}s",
                    host.destination(),
                    connect_secs
                )));
            }
        };

        if !status.success() {
            let stderr = File::new(&stderr_path).read_string().await.unwrap_or_default();
            return Err(OrchestratorError::ConnectionError(format!(
                "ssh to {} failed ({}): {}",
                host.destination(),
                status,
                stderr.trim()
            )));
        }

        info!(host = %host.id, destination = %host.destination(), "Remote session established");

        Ok(Self {
            host_id: host.id.clone(),
            destination: host.destination(),
            port: host.port,
            control_path,
            dir,
        })
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    /// Command running `script` on the host through the master connection
    pub fn command(&self, script: &str, env: &[(String, String)]) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg("-o")
            .arg("ControlMaster=no")
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-p")
            .arg(self.port.to_string())
            .arg("--")
            .arg(&self.destination)
            .arg(remote_script(script, env));
        cmd
    }

    /// Stop the master connection and remove the session directory
    pub async fn close(self) {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg("-O")
            .arg("exit")
            .arg("-p")
            .arg(self.port.to_string())
            .arg("--")
            .arg(&self.destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(CLOSE_TIMEOUT, cmd.status()).await {
            Ok(Ok(status)) if status.success() => {
                debug!(host = %self.host_id, "Remote session closed");
            }
            Ok(Ok(status)) => debug!(host = %self.host_id, %status, "ssh -O exit failed"),
            Ok(Err(e)) => warn!(host = %self.host_id, "Failed to close remote session: {}", e),
            Err(_) => warn!(host = %self.host_id, "Timed out closing remote session"),
        }

        if let Err(e) = self.dir.close() {
            warn!("Failed to remove session directory: {}", e);
        }
    }
}

/// Quote `value` for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// `script` prefixed with `export` statements for `env`
fn remote_script(script: &str, env: &[(String, String)]) -> String {
    let mut out = String::new();
    for (key, value) in env {
        out.push_str(&format!("export {}={};\n", key, shell_quote(value)));
    }
    out.push_str(script);
    out
}
