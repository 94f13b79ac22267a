//! Launchpad Remote - command transport to the deployment target
//!
//! This crate provides a unified interface for:
//! - Running structured commands on the target host and capturing their output
//! - Streaming output lines while a long command is still running
//! - Feeding a byte stream into a remote command's stdin (archive transfers)
//! - Reusing one authenticated session per host for the whole run
use async_trait::async_trait;
use launchpad_core::{DeployResult, ExecutionResult, OutputLine, RemoteCommand};
use std::sync::Arc;
use tokio::io::AsyncRead;

pub mod local;
mod process;
pub mod session;
pub mod shell;
pub mod ssh;
pub mod test_utils;

pub use local::LocalExecutor;
pub use session::SessionCache;
pub use ssh::SshExecutor;

/// Callback invoked for every line a command prints, as it is printed
pub type LineCallback = Arc<dyn Fn(&OutputLine) + Send + Sync>;

/// Byte source piped into a remote command's stdin
pub type RemoteInput = Box<dyn AsyncRead + Send + Unpin>;

/// Runs commands on one target host.
///
/// A non-zero exit status is reported through [`ExecutionResult`], not as an error;
/// callers decide whether it is fatal (see [`ExecutionResult::check`]). Errors are
/// reserved for transport problems such as an unreachable host.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Human readable target, used in logs and errors
    fn target(&self) -> String;

    /// Establish the session. Must fail fast when the host is unreachable.
    async fn connect(&self) -> DeployResult<()>;

    /// Run a command and wait for it to finish
    async fn execute(&self, command: &RemoteCommand) -> DeployResult<ExecutionResult> {
        self.execute_with_input(command, None, None).await
    }

    /// Run a command, handing each output line to `on_line` while it runs
    async fn execute_streaming(
        &self,
        command: &RemoteCommand,
        on_line: LineCallback,
    ) -> DeployResult<ExecutionResult> {
        self.execute_with_input(command, None, Some(on_line)).await
    }

    /// Run a command with `input` streamed into its stdin
    async fn execute_with_input(
        &self,
        command: &RemoteCommand,
        input: Option<RemoteInput>,
        on_line: Option<LineCallback>,
    ) -> DeployResult<ExecutionResult>;

    /// Release the session. Safe to call more than once.
    async fn close(&self) -> DeployResult<()> {
        Ok(())
    }
}
