//! Test utilities for code that drives a [`RemoteExecutor`]

use async_trait::async_trait;
use launchpad_core::{DeployError, DeployResult, ExecutionResult, OutputLine, OutputStream, RemoteCommand};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::AsyncReadExt;

use crate::{LineCallback, RemoteExecutor, RemoteInput};

type Reply = Arc<dyn Fn(&RemoteCommand, &[u8]) -> ExecutionResult + Send + Sync>;

struct Rule {
    prefix: String,
    reply: Reply,
    /// `Some(n)`: the rule answers n more times, then falls through
    remaining: Option<usize>,
}

/// A command the executor received
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub command: RemoteCommand,
    /// Program and arguments joined by single spaces, without workdir or quoting
    pub line: String,
    /// Everything that was written to the command's stdin
    pub input: Vec<u8>,
}

/// Executor that records every command and answers from scripted rules.
///
/// Rules match on the start of [`RecordedCall::line`] and are tried in the order they
/// were added. Commands no rule matches succeed with empty output.
pub struct ScriptedExecutor {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<RecordedCall>>,
    connect_error: Option<String>,
    connected: AtomicBool,
    closed: AtomicBool,
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Program and arguments joined by spaces
pub fn command_line(command: &RemoteCommand) -> String {
    command.words().collect::<Vec<_>>().join(" ")
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            connect_error: None,
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Make `connect()` fail as an unreachable host would
    pub fn unreachable(mut self, message: &str) -> Self {
        self.connect_error = Some(message.to_string());
        self
    }

    /// Answer every command starting with `prefix` with `result`
    pub fn on(self, prefix: &str, result: ExecutionResult) -> Self {
        self.push(prefix, None, Arc::new(move |_, _| result.clone()))
    }

    /// Answer the next `times` commands starting with `prefix` with `result`
    pub fn on_times(self, prefix: &str, times: usize, result: ExecutionResult) -> Self {
        self.push(prefix, Some(times), Arc::new(move |_, _| result.clone()))
    }

    /// Compute the answer from the command and its stdin
    pub fn on_with<F>(self, prefix: &str, reply: F) -> Self
    where
        F: Fn(&RemoteCommand, &[u8]) -> ExecutionResult + Send + Sync + 'static,
    {
        self.push(prefix, None, Arc::new(reply))
    }

    fn push(self, prefix: &str, remaining: Option<usize>, reply: Reply) -> Self {
        lock(&self.rules).push(Rule {
            prefix: prefix.to_string(),
            reply,
            remaining,
        });
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Recorded command lines, in execution order
    pub fn lines(&self) -> Vec<String> {
        lock(&self.calls).iter().map(|c| c.line.clone()).collect()
    }

    /// How many recorded commands start with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.line.starts_with(prefix))
            .count()
    }

    /// Position of the first recorded command starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        lock(&self.calls)
            .iter()
            .position(|c| c.line.starts_with(prefix))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn reply(&self, command: &RemoteCommand, line: &str, input: &[u8]) -> ExecutionResult {
        let mut rules = lock(&self.rules);
        for rule in rules.iter_mut() {
            if !line.starts_with(&rule.prefix) {
                continue;
            }
            match rule.remaining {
                Some(0) => continue,
                Some(ref mut n) => *n -= 1,
                None => {}
            }
            return (rule.reply)(command, input);
        }
        ExecutionResult::new(0, "", "")
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedExecutor {
    fn target(&self) -> String {
        "scripted".to_string()
    }

    async fn connect(&self) -> DeployResult<()> {
        if let Some(message) = &self.connect_error {
            return Err(DeployError::connectivity(self.target(), message.clone()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn execute_with_input(
        &self,
        command: &RemoteCommand,
        input: Option<RemoteInput>,
        on_line: Option<LineCallback>,
    ) -> DeployResult<ExecutionResult> {
        let mut bytes = Vec::new();
        if let Some(mut input) = input {
            input.read_to_end(&mut bytes).await?;
        }

        let line = command_line(command);
        let result = self.reply(command, &line, &bytes);
        lock(&self.calls).push(RecordedCall {
            command: command.clone(),
            line,
            input: bytes,
        });

        if let Some(callback) = on_line {
            for (stream, text) in [
                (OutputStream::Stdout, &result.stdout),
                (OutputStream::Stderr, &result.stderr),
            ] {
                for line in text.lines() {
                    callback(&OutputLine {
                        stream,
                        line: line.to_string(),
                    });
                }
            }
        }
        Ok(result)
    }

    async fn close(&self) -> DeployResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rules_apply_in_order_and_expire() {
        let executor = ScriptedExecutor::new()
            .on_times("docker compose ps", 1, ExecutionResult::new(1, "", "not yet"))
            .on("docker compose ps", ExecutionResult::new(0, "abc123\n", ""));

        let cmd = RemoteCommand::new("docker").args(["compose", "ps"]);
        assert_eq!(executor.execute(&cmd).await.unwrap().exit_code, 1);
        assert_eq!(executor.execute(&cmd).await.unwrap().stdout, "abc123\n");
        assert_eq!(executor.count("docker compose ps"), 2);
    }

    #[tokio::test]
    async fn test_records_stdin() {
        let executor = ScriptedExecutor::new();
        let input: RemoteInput = Box::new(std::io::Cursor::new(b"payload".to_vec()));
        executor
            .execute_with_input(&RemoteCommand::new("cat"), Some(input), None)
            .await
            .unwrap();
        assert_eq!(executor.calls()[0].input, b"payload");
    }
}
