use anyhow::Context;
use clap::{Args, Subcommand};
use colored::Colorize;
use launchpad_backup::BackupManager;
use launchpad_core::DeploymentConfig;
use launchpad_remote::SessionCache;
use std::process::ExitCode;

use super::GlobalArgs;

#[derive(Args)]
pub struct BackupsCommand {
    #[command(subcommand)]
    command: BackupsCommands,
}

#[derive(Subcommand)]
enum BackupsCommands {
    /// List project backups on the target host, newest first
    List,
}

impl BackupsCommand {
    pub fn execute(self, global: &GlobalArgs) -> anyhow::Result<ExitCode> {
        let config = global.load_config()?;
        let rt = tokio::runtime::Runtime::new()?;
        match self.command {
            BackupsCommands::List => rt.block_on(list_backups(config)),
        }
    }
}

async fn list_backups(config: DeploymentConfig) -> anyhow::Result<ExitCode> {
    let backup_root = config
        .backup()
        .path
        .clone()
        .context("No backup path configured (ssh.backup_path)")?;

    let sessions = SessionCache::new();
    let result = async {
        let executor = sessions.acquire(config.remote()).await?;
        BackupManager::new(executor).list(&backup_root).await
    }
    .await;
    sessions.close_all().await;
    let records = result?;

    if records.is_empty() {
        println!(
            "{} No backups in {}:{}",
            "ℹ".bright_blue(),
            config.remote(),
            backup_root
        );
        return Ok(ExitCode::SUCCESS);
    }

    println!(
        "{} backup(s) in {}:{}",
        records.len().to_string().bright_white().bold(),
        config.remote().to_string().bright_cyan(),
        backup_root.bright_cyan()
    );
    for record in &records {
        let taken_at = record
            .created_at()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!("  {}  {}", taken_at.bright_white(), record.path);
    }
    if let Some(policy) = config.backup().retention {
        println!("Retention: {}", policy.to_string().bright_yellow());
    }
    Ok(ExitCode::SUCCESS)
}
