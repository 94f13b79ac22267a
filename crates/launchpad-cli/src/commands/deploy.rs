use clap::Args;
use colored::Colorize;
use launchpad_core::{DeployError, DeploymentConfig, PipelineStep, ProgressSink, ProgressTracker};
use launchpad_deployments::{DeploymentPipeline, DeploymentReport, DeploymentState, StepFailure};
use launchpad_remote::SessionCache;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::GlobalArgs;
use crate::progress::TerminalProgress;

/// Exit status after an operator interrupt (128 + SIGINT)
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Args)]
pub struct DeployCommand {
    /// Do not draw the progress bar
    #[arg(long)]
    no_progress: bool,
}

impl DeployCommand {
    pub fn execute(self, global: &GlobalArgs) -> anyhow::Result<ExitCode> {
        let config = global.load_config()?;
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.deploy(config))
    }

    async fn deploy(self, config: DeploymentConfig) -> anyhow::Result<ExitCode> {
        let sink: Arc<dyn ProgressSink> = if self.no_progress {
            Arc::new(TerminalProgress::hidden())
        } else {
            Arc::new(TerminalProgress::new())
        };
        let progress = Arc::new(ProgressTracker::new().with_sink(sink));

        let token = CancellationToken::new();
        let watcher = tokio::spawn(cancel_on_interrupt(token.clone()));

        let sessions = SessionCache::new();
        let remote = config.remote().clone();
        let project_path = config.project_path().to_string();

        let connected = tokio::select! {
            biased;
            _ = token.cancelled() => Err(DeployError::Interrupted),
            executor = sessions.acquire(&remote) => executor,
        };

        let report = match connected {
            Ok(executor) => {
                DeploymentPipeline::new(config, executor)
                    .with_progress(progress)
                    .with_cancellation(token.clone())
                    .run()
                    .await
            }
            Err(error) => {
                progress.finish(false);
                not_connected(error, progress.percent())
            }
        };
        let code = summarize(&report, &remote.to_string(), &project_path);

        sessions.close_all().await;
        watcher.abort();
        Ok(code)
    }
}

fn summarize(report: &DeploymentReport, target: &str, project_path: &str) -> ExitCode {
    if report.succeeded() {
        println!(
            "{} Deployed to {}:{}",
            "✓".bright_green().bold(),
            target.bright_cyan(),
            project_path.bright_cyan()
        );
        if let Some(backup) = &report.backup {
            println!("  Previous version saved to {}", backup.path.bright_white());
        }
        return ExitCode::SUCCESS;
    }

    if report.interrupted() {
        error!("deployment interrupted by operator");
        return ExitCode::from(EXIT_INTERRUPTED);
    }

    let Some(failure) = &report.failure else {
        return ExitCode::FAILURE;
    };
    eprintln!(
        "{} {}",
        "✗".bright_red().bold(),
        failure_headline(failure, report.progress).bright_red()
    );
    if let Some(stderr) = failure.error.stderr() {
        eprintln!("{}", stderr);
    }
    if let DeployError::HealthCheck { log_tail, .. } = &failure.error {
        if !log_tail.is_empty() {
            eprintln!("{}", "Last service log lines:".bright_white());
            for line in log_tail {
                eprintln!("  {}", line);
            }
        }
    }
    if let Some(backup) = &report.backup {
        eprintln!("  Previous version is still available in {}", backup.path.bright_white());
    }
    ExitCode::FAILURE
}

/// Report for a run that never got a session to the target
fn not_connected(error: DeployError, progress: u8) -> DeploymentReport {
    DeploymentReport {
        final_state: DeploymentState::Failed,
        progress,
        backup: None,
        failure: Some(StepFailure {
            step: PipelineStep::ProbeExists,
            error,
        }),
    }
}

fn failure_headline(failure: &StepFailure, progress: u8) -> String {
    format!(
        "Deployment failed during {} ({}%): {}",
        failure.step, progress, failure.error
    )
}

/// Cancel `token` on Ctrl+C or SIGTERM
async fn cancel_on_interrupt(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
    token.cancel();
}
