use clap::{Args, Subcommand};
use colored::Colorize;
use launchpad_core::{DeploymentConfig, ImageStrategy};
use std::process::ExitCode;

use super::GlobalArgs;

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Validate the descriptor without contacting the target host
    Check,
}

impl ConfigCommand {
    pub fn execute(self, global: &GlobalArgs) -> anyhow::Result<ExitCode> {
        match self.command {
            ConfigCommands::Check => {
                let config = global.load_config()?;
                println!(
                    "{} {} is valid",
                    "✓".bright_green().bold(),
                    global.config.display()
                );
                print_summary(&config);
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

fn print_summary(config: &DeploymentConfig) {
    println!("  Target:   {}", config.remote().to_string().bright_cyan());
    println!("  Project:  {}", config.project_path().bright_cyan());

    let backup = config.backup();
    let backup_line = match (&backup.path, backup.enabled) {
        (Some(path), true) => match backup.retention {
            Some(policy) => format!("{} ({})", path, policy),
            None => format!("{} (keep all)", path),
        },
        _ => "disabled".to_string(),
    };
    println!("  Backups:  {}", backup_line);

    println!("  Source:   {}", config.source().root.display());
    match config.image() {
        Some(image) => {
            let how = match &image.strategy {
                ImageStrategy::Load { archive } => format!("load from {}", archive.display()),
                ImageStrategy::Pull => "pull".to_string(),
            };
            println!(
                "  Image:    {} via {} ({})",
                image.coordinates.reference().bright_white(),
                image.runtime,
                how
            );
        }
        None => println!("  Image:    none"),
    }

    println!("  Commands: {}", config.commands().len());
    for command in config.commands() {
        println!("    {}", command);
    }

    let health = config.health();
    println!(
        "  Health:   {} ({} attempts, {}s apart)",
        health.command,
        health.attempts,
        health.interval.as_secs()
    );
}
