//! Loopback transport: runs commands through the local `sh`

use async_trait::async_trait;
use launchpad_core::{DeployError, DeployResult, ExecutionResult, RemoteCommand};
use tokio::process::Command;
use tracing::debug;

use crate::{process, shell, LineCallback, RemoteExecutor, RemoteInput};

/// Executes commands on this machine with the same quoting as the ssh transport
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    fn target(&self) -> String {
        "localhost".to_string()
    }

    async fn connect(&self) -> DeployResult<()> {
        Ok(())
    }

    async fn execute_with_input(
        &self,
        command: &RemoteCommand,
        input: Option<RemoteInput>,
        on_line: Option<LineCallback>,
    ) -> DeployResult<ExecutionResult> {
        let line = shell::render(command);
        debug!("Running locally: {}", line);

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&line);
        process::run(cmd, input, on_line)
            .await
            .map_err(|e| DeployError::connectivity("localhost", format!("failed to spawn sh: {}", e)))
    }
}
