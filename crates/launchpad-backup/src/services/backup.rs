use chrono::{Duration, Local, NaiveDateTime, Timelike};
use launchpad_core::{
    BackupRecord, CommandError, ConfigError, DeployResult, DeploymentConfig, ProbeResult,
    RemoteCommand, RetentionPolicy,
};
use launchpad_remote::RemoteExecutor;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::retention::expired;

/// Source of backup timestamps
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Snapshots the remote project directory before it is replaced
pub struct BackupManager {
    executor: Arc<dyn RemoteExecutor>,
    clock: Clock,
}

impl BackupManager {
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            executor,
            clock: Arc::new(|| Local::now().naive_local()),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Whether `path` is an existing directory on the remote host
    pub async fn probe(&self, path: &str) -> DeployResult<ProbeResult> {
        let command = RemoteCommand::new("test").args(["-d", path]);
        let result = self.executor.execute(&command).await?;
        match result.exit_code {
            0 => Ok(ProbeResult::Found),
            1 => Ok(ProbeResult::NotFound),
            exit_code => Err(CommandError {
                command: command.to_string(),
                exit_code,
                stderr: result.stderr,
            }
            .into()),
        }
    }

    /// Back up the project directory if it exists, then apply retention.
    ///
    /// Returns `None` when backups are disabled or there is nothing to back up yet.
    pub async fn backup(&self, config: &DeploymentConfig) -> DeployResult<Option<BackupRecord>> {
        if !config.backup().enabled {
            info!("Backups disabled, skipping");
            return Ok(None);
        }
        match self.probe(config.project_path()).await? {
            ProbeResult::NotFound => {
                info!(
                    "{} does not exist yet, nothing to back up",
                    config.project_path()
                );
                Ok(None)
            }
            ProbeResult::Found => self.snapshot(config).await.map(Some),
        }
    }

    /// Copy an existing project directory into the backup root and prune old backups.
    ///
    /// Only the copy has to succeed; pruning problems are logged.
    pub async fn snapshot(&self, config: &DeploymentConfig) -> DeployResult<BackupRecord> {
        let root = config
            .backup()
            .path
            .as_deref()
            .ok_or(ConfigError::MissingField {
                field: "ssh.backup_path",
            })?;
        let record = self.create(config.project_path(), root).await?;

        match self.list(root).await {
            Ok(existing) => {
                self.prune(&existing, config.backup().retention, &record)
                    .await;
            }
            Err(e) => warn!("Skipping backup retention, cannot list {}: {}", root, e),
        }
        Ok(record)
    }

    /// Copy `project_path` to `<backup_root>/backup_<timestamp>`
    pub async fn create(&self, project_path: &str, backup_root: &str) -> DeployResult<BackupRecord> {
        let mkdir = RemoteCommand::new("mkdir").args(["-p", backup_root]);
        self.executor.execute(&mkdir).await?.check(&mkdir)?;

        // Never reuse a name; names carry whole seconds, so compare at that precision
        let now = (self.clock)();
        let mut taken_at = now.with_nanosecond(0).unwrap_or(now);
        if let Some(newest) = self
            .list_entries(backup_root)
            .await?
            .first()
            .and_then(BackupRecord::created_at)
        {
            if newest >= taken_at {
                taken_at = newest + Duration::seconds(1);
            }
        }
        let record = BackupRecord::new(backup_root, taken_at);

        info!("Backing up {} to {}", project_path, record.path);
        let copy = RemoteCommand::new("cp").args(["-a", project_path, record.path.as_str()]);
        self.executor.execute(&copy).await?.check(&copy)?;
        Ok(record)
    }

    /// Existing backups under `backup_root`, newest first
    pub async fn list(&self, backup_root: &str) -> DeployResult<Vec<BackupRecord>> {
        if !self.probe(backup_root).await?.is_found() {
            return Ok(Vec::new());
        }
        self.list_entries(backup_root).await
    }

    async fn list_entries(&self, backup_root: &str) -> DeployResult<Vec<BackupRecord>> {
        let ls = RemoteCommand::new("ls").args(["-1", backup_root]);
        let output = self.executor.execute(&ls).await?.check(&ls)?;

        let mut records: Vec<BackupRecord> = output
            .stdout
            .lines()
            .map(str::trim)
            .filter_map(|name| BackupRecord::parse(backup_root, name))
            .collect();
        records.sort_by(|a, b| b.timestamp_id.cmp(&a.timestamp_id));
        Ok(records)
    }

    /// Delete the backups `policy` no longer keeps, never touching `current`.
    ///
    /// Returns what was deleted. Failures are logged as warnings.
    pub async fn prune(
        &self,
        records: &[BackupRecord],
        policy: Option<RetentionPolicy>,
        current: &BackupRecord,
    ) -> Vec<BackupRecord> {
        let Some(policy) = policy else {
            debug!("No retention policy, keeping all {} backups", records.len());
            return Vec::new();
        };

        let doomed: Vec<BackupRecord> = expired(records, Some(policy), (self.clock)())
            .into_iter()
            .filter(|r| r.timestamp_id != current.timestamp_id)
            .collect();
        if doomed.is_empty() {
            debug!("Retention ({}) leaves nothing to delete", policy);
            return doomed;
        }

        let rm = RemoteCommand::new("rm")
            .arg("-rf")
            .args(doomed.iter().map(|r| r.path.clone()));
        match self.executor.execute(&rm).await {
            Ok(result) if result.success() => {
                info!("Retention ({}) removed {} old backup(s)", policy, doomed.len());
                doomed
            }
            Ok(result) => {
                warn!("Failed to remove old backups: {}", result.stderr.trim());
                Vec::new()
            }
            Err(e) => {
                warn!("Failed to remove old backups: {}", e);
                Vec::new()
            }
        }
    }
}
