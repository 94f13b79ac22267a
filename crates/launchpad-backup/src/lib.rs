//! Pre-deployment snapshots of the remote project directory

pub mod services;

pub use services::*;
