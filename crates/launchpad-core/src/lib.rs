//! Core types shared across all launchpad crates
//!
//! Holds the deployment descriptor model, the error taxonomy, structured remote
//! commands and the step-based progress tracker. Nothing in here talks to a remote host.

pub mod command;
pub mod config;
pub mod error;
pub mod progress;
pub mod types;

pub use command::*;
pub use config::*;
pub use error::*;
pub use progress::*;
pub use types::*;

// Re-export external dependencies
pub use chrono;
pub use tracing;
