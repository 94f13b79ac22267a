use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::command::RemoteCommand;
use crate::error::CommandError;

/// Prefix of every backup directory name
pub const BACKUP_PREFIX: &str = "backup_";
/// Timestamp layout used in backup directory names (`backup_20250101_120000`)
pub const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Outcome of a single remote command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionResult {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into a [`CommandError`] carrying stderr
    pub fn check(self, command: &RemoteCommand) -> Result<Self, CommandError> {
        if self.success() {
            Ok(self)
        } else {
            Err(CommandError {
                command: command.to_string(),
                exit_code: self.exit_code,
                stderr: self.stderr,
            })
        }
    }

    /// The last `n` non-empty lines of stdout
    pub fn tail(&self, n: usize) -> Vec<String> {
        let lines: Vec<&str> = self.stdout.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(n);
        lines[start..].iter().map(|l| l.to_string()).collect()
    }
}

/// Which stream a line of command output came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => write!(f, "stdout"),
            OutputStream::Stderr => write!(f, "stderr"),
        }
    }
}

/// A single line of streamed command output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub line: String,
}

/// Answer of a remote existence probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeResult {
    Found,
    NotFound,
}

impl ProbeResult {
    pub fn is_found(&self) -> bool {
        matches!(self, ProbeResult::Found)
    }
}

/// A snapshot of the remote project directory
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackupRecord {
    /// `YYYYMMDD_HHMMSS`, sorts lexically in creation order
    pub timestamp_id: String,
    /// Full remote path of the backup directory
    pub path: String,
}

impl BackupRecord {
    /// Record for a backup taken at `taken_at` under `backup_root`
    pub fn new(backup_root: &str, taken_at: NaiveDateTime) -> Self {
        let timestamp_id = taken_at.format(BACKUP_TIMESTAMP_FORMAT).to_string();
        let path = join_remote(backup_root, &format!("{}{}", BACKUP_PREFIX, timestamp_id));
        Self { timestamp_id, path }
    }

    /// Recognize a directory entry such as `backup_20250101_120000`
    pub fn parse(backup_root: &str, entry_name: &str) -> Option<Self> {
        let timestamp = entry_name.strip_prefix(BACKUP_PREFIX)?;
        let taken_at = NaiveDateTime::parse_from_str(timestamp, BACKUP_TIMESTAMP_FORMAT).ok()?;
        // Reject names that only parse loosely (e.g. missing zero padding)
        let record = Self::new(backup_root, taken_at);
        (record.timestamp_id == timestamp).then_some(record)
    }

    pub fn created_at(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.timestamp_id, BACKUP_TIMESTAMP_FORMAT).ok()
    }

    /// Directory name of the backup (`backup_<timestamp>`)
    pub fn name(&self) -> String {
        format!("{}{}", BACKUP_PREFIX, self.timestamp_id)
    }
}

/// Join a remote directory and an entry name with exactly one `/`
pub fn join_remote(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}
