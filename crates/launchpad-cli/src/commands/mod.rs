pub mod backups;
pub mod config;
pub mod deploy;

pub use backups::BackupsCommand;
pub use config::ConfigCommand;
pub use deploy::DeployCommand;

use launchpad_core::{ConfigLoader, DeploymentConfig};
use std::path::PathBuf;

/// Flags shared by every subcommand
pub struct GlobalArgs {
    pub config: PathBuf,
    pub environment: Option<String>,
}

impl GlobalArgs {
    pub fn load_config(&self) -> anyhow::Result<DeploymentConfig> {
        let config = ConfigLoader::new(&self.config)
            .with_environment(self.environment.clone())
            .load()?;
        Ok(config)
    }
}
