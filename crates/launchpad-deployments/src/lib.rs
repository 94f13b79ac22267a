//! Launchpad Deployments - the deployment state machine
//!
//! Drives one run against one target host: backup, clean, sync, load, start and
//! verify, reporting progress throughout.

pub mod health;
pub mod pipeline;
pub mod state;

pub use health::HealthChecker;
pub use pipeline::{DeploymentPipeline, DeploymentReport, StepFailure};
pub use state::{DeploymentState, InvalidTransition};
