//! The deployment sequence
//!
//! One run connects to the target, snapshots the current project directory, replaces it
//! with a fresh copy of the source tree, gets the image into the container runtime, starts
//! the service and waits for it to report healthy. Every step either succeeds or ends the
//! run in [`DeploymentState::Failed`]; nothing is rolled back automatically and running
//! again after a failure is always safe.

use launchpad_backup::{BackupManager, Clock};
use launchpad_core::{
    BackupRecord, DeployError, DeployResult, DeploymentConfig, OutputLine, OutputStream,
    PipelineStep, ProgressTracker, RemoteCommand,
};
use launchpad_deployer::ArtifactTransfer;
use launchpad_remote::{LineCallback, RemoteExecutor};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::health::HealthChecker;
use crate::state::DeploymentState;

/// The step a run failed in, and why
#[derive(Debug)]
pub struct StepFailure {
    pub step: PipelineStep,
    pub error: DeployError,
}

/// Outcome of one deployment run
#[derive(Debug)]
pub struct DeploymentReport {
    pub final_state: DeploymentState,
    /// Overall progress when the run ended (0–100)
    pub progress: u8,
    /// The snapshot taken before the project directory was replaced
    pub backup: Option<BackupRecord>,
    pub failure: Option<StepFailure>,
}

impl DeploymentReport {
    pub fn succeeded(&self) -> bool {
        self.final_state == DeploymentState::Done
    }

    pub fn interrupted(&self) -> bool {
        matches!(
            self.failure,
            Some(StepFailure {
                error: DeployError::Interrupted,
                ..
            })
        )
    }
}

/// Mutable bookkeeping of a single run
struct RunState {
    state: DeploymentState,
    step: PipelineStep,
    backup: Option<BackupRecord>,
}

impl RunState {
    fn enter(&mut self, to: DeploymentState) {
        match self.state.transition(to) {
            Ok(next) => {
                debug!("State {} -> {}", self.state, next);
                self.state = next;
            }
            // Transitions are driven in a fixed order below
            Err(e) => error!("{}", e),
        }
    }
}

pub struct DeploymentPipeline {
    config: DeploymentConfig,
    executor: Arc<dyn RemoteExecutor>,
    progress: Arc<ProgressTracker>,
    cancel: CancellationToken,
    backup_clock: Option<Clock>,
}

impl DeploymentPipeline {
    pub fn new(config: DeploymentConfig, executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            config,
            executor,
            progress: Arc::new(ProgressTracker::new()),
            cancel: CancellationToken::new(),
            backup_clock: None,
        }
    }

    pub fn with_progress(mut self, progress: Arc<ProgressTracker>) -> Self {
        self.progress = progress;
        self
    }

    /// Cancelling `token` stops the run at the next await point
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Override the time source used to name backups
    pub fn with_backup_clock(mut self, clock: Clock) -> Self {
        self.backup_clock = Some(clock);
        self
    }

    pub fn config(&self) -> &DeploymentConfig {
        &self.config
    }

    pub fn progress(&self) -> Arc<ProgressTracker> {
        self.progress.clone()
    }

    /// Run the whole sequence. The session is closed on every exit path.
    pub async fn run(&self) -> DeploymentReport {
        info!(
            "🚀 Deploying to {}:{}",
            self.executor.target(),
            self.config.project_path()
        );
        let mut run = RunState {
            state: DeploymentState::Init,
            step: PipelineStep::ProbeExists,
            backup: None,
        };

        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DeployError::Interrupted),
            result = self.execute(&mut run) => result,
        };

        if let Err(e) = self.executor.close().await {
            warn!("Failed to close session to {}: {}", self.executor.target(), e);
        }

        let failure = match outcome {
            Ok(()) => {
                run.enter(DeploymentState::Done);
                self.progress.finish(true);
                info!("✅ Deployment finished");
                None
            }
            Err(error) => {
                match &error {
                    DeployError::Interrupted => warn!("Deployment interrupted during {}", run.step),
                    _ => match error.stderr() {
                        Some(stderr) => error!("❌ Step {} failed: {}\n{}", run.step, error, stderr),
                        None => error!("❌ Step {} failed: {}", run.step, error),
                    },
                }
                run.enter(DeploymentState::Failed);
                self.progress.finish(false);
                Some(StepFailure {
                    step: run.step,
                    error,
                })
            }
        };

        DeploymentReport {
            final_state: run.state,
            progress: self.progress.percent(),
            backup: run.backup,
            failure,
        }
    }

    async fn execute(&self, run: &mut RunState) -> DeployResult<()> {
        let config = &self.config;
        let project = config.project_path();

        // Init -> BackupDone
        run.step = PipelineStep::ProbeExists;
        self.executor.connect().await?;
        let mut backups = BackupManager::new(self.executor.clone());
        if let Some(clock) = &self.backup_clock {
            backups = backups.with_clock(clock.clone());
        }
        let existing = backups.probe(project).await?;
        self.progress.advance(PipelineStep::ProbeExists);

        run.step = PipelineStep::Backup;
        if !config.backup().enabled {
            info!("Backups disabled, skipping");
        } else if existing.is_found() {
            run.backup = Some(backups.snapshot(config).await?);
        } else {
            info!("{} does not exist yet, nothing to back up", project);
        }
        self.progress.advance(PipelineStep::Backup);
        run.enter(DeploymentState::BackupDone);

        // BackupDone -> Cleaned
        run.step = PipelineStep::Wipe;
        self.run_checked(RemoteCommand::new("rm").args(["-rf", project]))
            .await?;
        self.progress.advance(PipelineStep::Wipe);

        run.step = PipelineStep::Recreate;
        self.run_checked(RemoteCommand::new("mkdir").args(["-p", project]))
            .await?;
        self.progress.advance(PipelineStep::Recreate);
        run.enter(DeploymentState::Cleaned);

        // Cleaned -> Synced
        run.step = PipelineStep::SyncCode;
        let transfer = ArtifactTransfer::new(self.executor.clone(), self.progress.clone());
        transfer.sync_source(config).await?;
        transfer.install_compose_descriptor(config).await?;
        self.progress.advance(PipelineStep::SyncCode);
        run.enter(DeploymentState::Synced);

        // Synced -> ImageLoaded
        run.step = PipelineStep::TransferImage;
        let uploaded = transfer.transfer_image(config).await?;
        self.progress.advance(PipelineStep::TransferImage);

        run.step = PipelineStep::LoadImage;
        transfer.load_image(config, uploaded.as_ref()).await?;
        self.progress.advance(PipelineStep::LoadImage);
        run.enter(DeploymentState::ImageLoaded);

        // ImageLoaded -> ServiceStarted
        run.step = PipelineStep::StartService;
        for command in config.commands() {
            let command = command.clone().current_dir(project);
            info!("Running {}", command);
            let on_line: LineCallback = Arc::new(|line: &OutputLine| match line.stream {
                OutputStream::Stdout => info!("  {}", line.line),
                OutputStream::Stderr => debug!("  {}", line.line),
            });
            self.executor
                .execute_streaming(&command, on_line)
                .await?
                .check(&command)?;
        }
        self.progress.advance(PipelineStep::StartService);
        run.enter(DeploymentState::ServiceStarted);

        // ServiceStarted -> HealthVerified
        run.step = PipelineStep::HealthCheck;
        HealthChecker::new(self.executor.clone(), config.health().clone(), project)
            .wait_until_healthy()
            .await?;
        self.progress.advance(PipelineStep::HealthCheck);
        run.enter(DeploymentState::HealthVerified);

        Ok(())
    }

    async fn run_checked(&self, command: RemoteCommand) -> DeployResult<()> {
        self.executor.execute(&command).await?.check(&command)?;
        Ok(())
    }
}
