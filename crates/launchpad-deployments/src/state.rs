use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid state transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: DeploymentState,
    pub to: DeploymentState,
}

/// Where a deployment run stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeploymentState {
    Init,
    BackupDone,
    Cleaned,
    Synced,
    ImageLoaded,
    ServiceStarted,
    HealthVerified,
    Done,
    Failed,
}

impl DeploymentState {
    /// The state a successful step leads to; `None` for terminal states
    pub fn next(&self) -> Option<DeploymentState> {
        use DeploymentState::*;
        match self {
            Init => Some(BackupDone),
            BackupDone => Some(Cleaned),
            Cleaned => Some(Synced),
            Synced => Some(ImageLoaded),
            ImageLoaded => Some(ServiceStarted),
            ServiceStarted => Some(HealthVerified),
            HealthVerified => Some(Done),
            Done | Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentState::Done | DeploymentState::Failed)
    }

    /// Forward by one state, or to `Failed` from any non-terminal state
    pub fn can_transition_to(&self, to: DeploymentState) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == DeploymentState::Failed || self.next() == Some(to)
    }

    pub fn transition(self, to: DeploymentState) -> Result<DeploymentState, InvalidTransition> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(InvalidTransition { from: self, to })
        }
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeploymentState::Init => "init",
            DeploymentState::BackupDone => "backup-done",
            DeploymentState::Cleaned => "cleaned",
            DeploymentState::Synced => "synced",
            DeploymentState::ImageLoaded => "image-loaded",
            DeploymentState::ServiceStarted => "service-started",
            DeploymentState::HealthVerified => "health-verified",
            DeploymentState::Done => "done",
            DeploymentState::Failed => "failed",
        };
        f.write_str(name)
    }
}
