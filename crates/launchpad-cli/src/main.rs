//! Launchpad CLI - deploys an application to its target host over SSH
//!
//! Reads the deployment descriptor, then either runs a deployment, inspects the
//! backups on the target host, or only validates the descriptor.

mod commands;
mod progress;

use clap::{Parser, Subcommand};
use commands::{BackupsCommand, ConfigCommand, DeployCommand, GlobalArgs};
use launchpad_core::DEFAULT_DESCRIPTOR_PATH;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, Layer};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LAUNCHPAD_LOG_LEVEL", global = true)]
    log_level: String,

    /// Log format: compact, full
    #[arg(
        long,
        default_value = "compact",
        env = "LAUNCHPAD_LOG_FORMAT",
        global = true
    )]
    log_format: String,

    /// Deployment descriptor
    #[arg(long, default_value = DEFAULT_DESCRIPTOR_PATH, env = "LAUNCHPAD_CONFIG", global = true)]
    config: PathBuf,

    /// Environment block to use when the descriptor defines several
    #[arg(long, env = "LAUNCHPAD_ENVIRONMENT", global = true)]
    environment: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up, replace and restart the application on the target host
    Deploy(DeployCommand),
    /// Inspect project backups on the target host
    Backups(BackupsCommand),
    /// Work with the deployment descriptor
    Config(ConfigCommand),
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let log_level = cli.log_level.clone();

    // If RUST_LOG is set, use it directly; otherwise use our default filter
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        _ => tracing_subscriber::EnvFilter::try_new(format!(
            "launchpad={level},\
             launchpad_cli={level},\
             launchpad_core={level},\
             launchpad_remote={level},\
             launchpad_backup={level},\
             launchpad_deployer={level},\
             launchpad_deployments={level}",
            level = log_level
        ))?,
    };

    let fmt_layer = match cli.log_format.as_str() {
        "full" => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
        _ => tracing_subscriber::fmt::layer() // "compact" or any other value
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    let global = GlobalArgs {
        config: cli.config,
        environment: cli.environment,
    };

    match cli.command {
        Commands::Deploy(deploy_cmd) => deploy_cmd.execute(&global),
        Commands::Backups(backups_cmd) => backups_cmd.execute(&global),
        Commands::Config(config_cmd) => config_cmd.execute(&global),
    }
}
