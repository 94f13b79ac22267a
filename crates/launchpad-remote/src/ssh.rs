//! OpenSSH transport
//!
//! One master connection per executor, shared by every command of the run through
//! OpenSSH connection multiplexing. Authentication only uses key material managed by
//! the host (agent, `~/.ssh/config`, or an explicit identity file); `BatchMode` makes a
//! missing key fail instead of prompting.

use async_trait::async_trait;
use launchpad_core::{DeployError, DeployResult, ExecutionResult, RemoteCommand, RemoteHost};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::{process, shell, LineCallback, RemoteExecutor, RemoteInput};

/// ssh reserves this exit status for its own failures
const SSH_TRANSPORT_FAILURE: i32 = 255;

pub struct SshExecutor {
    remote: RemoteHost,
    /// Private directory holding the multiplexing socket
    control_dir: TempDir,
    connected: AtomicBool,
}

impl std::fmt::Debug for SshExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshExecutor")
            .field("remote", &self.remote)
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish()
    }
}

impl SshExecutor {
    pub fn new(remote: RemoteHost) -> DeployResult<Self> {
        let control_dir = tempfile::Builder::new().prefix("launchpad-ssh-").tempdir()?;
        Ok(Self {
            remote,
            control_dir,
            connected: AtomicBool::new(false),
        })
    }

    pub fn remote(&self) -> &RemoteHost {
        &self.remote
    }

    fn control_path(&self) -> PathBuf {
        self.control_dir.path().join("control.sock")
    }

    fn master_log_path(&self) -> PathBuf {
        self.control_dir.path().join("master.log")
    }

    /// Options shared by the master and every multiplexed command
    fn common_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.remote.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path().display()),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
        ];
        if let Some(port) = self.remote.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let Some(identity) = &self.remote.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
            args.push("-o".to_string());
            args.push("IdentitiesOnly=yes".to_string());
        }
        args
    }

    fn control_args(&self, operation: &str) -> Vec<String> {
        vec![
            "-o".to_string(),
            format!("ControlPath={}", self.control_path().display()),
            "-O".to_string(),
            operation.to_string(),
            self.remote.destination(),
        ]
    }

    fn connectivity_error(&self, message: impl Into<String>) -> DeployError {
        DeployError::connectivity(self.remote.to_string(), message)
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    fn target(&self) -> String {
        self.remote.to_string()
    }

    async fn connect(&self) -> DeployResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        info!("Connecting to {}", self.remote);

        // The master daemonizes after authenticating, so its stdio must not be piped
        // back to us; errors go to a log file instead.
        let log_path = self.master_log_path();
        let mut cmd = Command::new("ssh");
        cmd.args(self.common_args())
            .args(["-o", "ControlMaster=yes", "-o", "ControlPersist=yes"])
            .arg("-E")
            .arg(&log_path)
            .args(["-N", "-f"])
            .arg(self.remote.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        // ConnectTimeout bounds the TCP handshake; this bounds authentication as well
        let budget = self.remote.connect_timeout + Duration::from_secs(5);
        let status = match tokio::time::timeout(budget, cmd.status()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(self.connectivity_error(format!("failed to run ssh: {}", e))),
            Err(_) => {
                return Err(self.connectivity_error(format!(
                    "no session after {}s",
                    budget.as_secs()
                )))
            }
        };

        if !status.success() {
            let log = tokio::fs::read_to_string(&log_path).await.unwrap_or_default();
            let message = log.trim();
            return Err(self.connectivity_error(if message.is_empty() {
                format!("ssh exited with {}", status)
            } else {
                message.to_string()
            }));
        }

        self.connected.store(true, Ordering::SeqCst);
        debug!("Session to {} established", self.remote);
        Ok(())
    }

    async fn execute_with_input(
        &self,
        command: &RemoteCommand,
        input: Option<RemoteInput>,
        on_line: Option<LineCallback>,
    ) -> DeployResult<ExecutionResult> {
        let line = shell::render(command);
        debug!("Running on {}: {}", self.remote, line);

        let mut cmd = Command::new("ssh");
        cmd.args(self.common_args())
            .arg(self.remote.destination())
            .arg(&line);

        let result = process::run(cmd, input, on_line)
            .await
            .map_err(|e| self.connectivity_error(format!("failed to run ssh: {}", e)))?;

        if result.exit_code == SSH_TRANSPORT_FAILURE {
            return Err(self.connectivity_error(result.stderr.trim().to_string()));
        }
        Ok(result)
    }

    async fn close(&self) -> DeployResult<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("Closing session to {}", self.remote);
        let status = Command::new("ssh")
            .args(self.control_args("exit"))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = status {
            warn!("Failed to close session to {}: {}", self.remote, e);
        }
        Ok(())
    }
}

impl Drop for SshExecutor {
    fn drop(&mut self) {
        // Interrupted runs may never reach close(); don't leave the master behind
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = std::process::Command::new("ssh")
                .args(self.control_args("exit"))
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote() -> RemoteHost {
        RemoteHost {
            host: "10.0.0.5".to_string(),
            port: Some(2222),
            user: Some("deploy".to_string()),
            identity_file: Some(PathBuf::from("/keys/deploy")),
            connect_timeout: Duration::from_secs(7),
        }
    }

    #[test]
    fn test_common_args() {
        let executor = SshExecutor::new(remote()).unwrap();
        let args = executor.common_args();
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ConnectTimeout=7".to_string()));
        assert!(args.windows(2).any(|w| w == ["-p", "2222"]));
        assert!(args.windows(2).any(|w| w == ["-i", "/keys/deploy"]));
        assert!(args
            .iter()
            .any(|a| a.starts_with("ControlPath=") && a.ends_with("control.sock")));
    }

    #[test]
    fn test_control_args_target_destination() {
        let executor = SshExecutor::new(remote()).unwrap();
        let args = executor.control_args("exit");
        assert_eq!(args.last().map(String::as_str), Some("deploy@10.0.0.5"));
        assert!(args.windows(2).any(|w| w == ["-O", "exit"]));
        assert_eq!(executor.target(), "deploy@10.0.0.5:2222");
    }
}
