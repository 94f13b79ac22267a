//! Error taxonomy for deployment runs

use crate::config::ConfigError;
use thiserror::Error;

/// A remote command that exited with a non-zero status.
///
/// Whether this is fatal is decided by the caller; a probe may treat a specific exit
/// code as an answer rather than a failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("`{command}` exited with status {exit_code}: {}", .stderr.trim())]
pub struct CommandError {
    pub command: String,
    pub exit_code: i32,
    pub stderr: String,
}

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cannot reach {host}: {message}")]
    Connectivity { host: String, message: String },

    #[error("Command failed: {0}")]
    Command(#[from] CommandError),

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Service not healthy after {attempts} attempts")]
    HealthCheck {
        attempts: u32,
        /// Last lines of the remote service log, empty when they could not be fetched
        log_tail: Vec<String>,
    },

    #[error("Deployment interrupted")]
    Interrupted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployError {
    pub fn connectivity(host: impl Into<String>, message: impl Into<String>) -> Self {
        DeployError::Connectivity {
            host: host.into(),
            message: message.into(),
        }
    }

    pub fn transfer(message: impl Into<String>) -> Self {
        DeployError::Transfer(message.into())
    }

    /// Captured remote stderr, when the error carries any
    pub fn stderr(&self) -> Option<&str> {
        match self {
            DeployError::Command(err) if !err.stderr.trim().is_empty() => Some(err.stderr.trim()),
            _ => None,
        }
    }
}

/// Result type alias for deployment operations
pub type DeployResult<T> = Result<T, DeployError>;
