//! Post-deployment liveness polling

use launchpad_core::{DeployError, DeployResult, ExecutionResult, HealthConfig, RemoteCommand};
use launchpad_remote::RemoteExecutor;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Polls the service's liveness command with a bounded number of attempts
pub struct HealthChecker {
    executor: Arc<dyn RemoteExecutor>,
    config: HealthConfig,
    /// Commands run from here so `docker compose` finds the project
    workdir: String,
}

impl HealthChecker {
    pub fn new(executor: Arc<dyn RemoteExecutor>, config: HealthConfig, workdir: &str) -> Self {
        Self {
            executor,
            config,
            workdir: workdir.to_string(),
        }
    }

    /// Wait until the service reports healthy; returns the attempt that succeeded.
    ///
    /// On exhaustion the tail of the service log is fetched, logged and attached to
    /// the returned [`DeployError::HealthCheck`].
    pub async fn wait_until_healthy(&self) -> DeployResult<u32> {
        let command = self.in_workdir(&self.config.command);

        for attempt in 1..=self.config.attempts {
            match self.executor.execute(&command).await {
                Ok(result) if self.passes(&result) => {
                    info!(
                        "Service healthy (attempt {}/{})",
                        attempt, self.config.attempts
                    );
                    return Ok(attempt);
                }
                Ok(result) => debug!(
                    "Health check attempt {}/{} failed (exit {}): {}",
                    attempt,
                    self.config.attempts,
                    result.exit_code,
                    result.stderr.trim()
                ),
                // A dropped session will not heal by waiting
                Err(e @ DeployError::Connectivity { .. }) => return Err(e),
                Err(e) => debug!("Health check attempt {} errored: {}", attempt, e),
            }

            if attempt < self.config.attempts {
                tokio::time::sleep(self.config.interval).await;
            }
        }

        let log_tail = self.fetch_log_tail().await;
        if log_tail.is_empty() {
            error!("Service unhealthy and no service log could be fetched");
        } else {
            error!(
                "Service unhealthy, last {} log lines:\n{}",
                log_tail.len(),
                log_tail.join("\n")
            );
        }
        Err(DeployError::HealthCheck {
            attempts: self.config.attempts,
            log_tail,
        })
    }

    /// Best-effort tail of the service log; empty when it cannot be fetched
    pub async fn fetch_log_tail(&self) -> Vec<String> {
        let command = self.in_workdir(&self.config.log_command);
        match self.executor.execute(&command).await {
            Ok(result) if result.success() => result.tail(self.config.log_tail_lines),
            Ok(result) => {
                warn!(
                    "Failed to fetch service log (exit {}): {}",
                    result.exit_code,
                    result.stderr.trim()
                );
                Vec::new()
            }
            Err(e) => {
                warn!("Failed to fetch service log: {}", e);
                Vec::new()
            }
        }
    }

    fn passes(&self, result: &ExecutionResult) -> bool {
        result.success() && (!self.config.expect_output || !result.stdout.trim().is_empty())
    }

    fn in_workdir(&self, command: &RemoteCommand) -> RemoteCommand {
        if command.workdir().is_some() {
            command.clone()
        } else {
            command.clone().current_dir(self.workdir.as_str())
        }
    }
}
