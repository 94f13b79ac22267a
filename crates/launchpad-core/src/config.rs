//! Deployment descriptor (`deploy/env.yaml`)
//!
//! The descriptor names the target host, the remote paths, the backup policy, the image
//! to ship and the commands that start the service. Loading it never contacts the remote
//! host; a [`DeploymentConfig`] only exists once every required field has been validated.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::command::{CommandParseError, RemoteCommand};

/// Descriptor location used when none is given
pub const DEFAULT_DESCRIPTOR_PATH: &str = "deploy/env.yaml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Descriptor not found: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("Failed to read descriptor {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed descriptor: {0}")]
    Malformed(#[from] serde_yaml::Error),

    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("Invalid value for {field}: {message}")]
    Invalid { field: String, message: String },

    #[error("Unknown environment '{name}' (available: {available})")]
    UnknownEnvironment { name: String, available: String },

    #[error("Descriptor defines several environments ({available}); select one")]
    AmbiguousEnvironment { available: String },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// Descriptor file layout
// ============================================================================

#[derive(Debug, Clone, Deserialize, Default)]
struct Descriptor {
    #[serde(default)]
    ssh: SshSection,
    /// Flat layout used by older descriptors (`host:` next to `image:`)
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    project_path: Option<String>,
    #[serde(default)]
    backup_path: Option<String>,
    #[serde(default)]
    backup: BackupSection,
    #[serde(default)]
    image: Option<ImageSection>,
    #[serde(default)]
    source: SourceSection,
    #[serde(default)]
    commands: Vec<CommandSpec>,
    #[serde(default)]
    health: HealthSection,
}

#[derive(Debug, Clone, Deserialize)]
struct SshSection {
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    identity_file: Option<PathBuf>,
    project_path: Option<String>,
    backup_path: Option<String>,
    #[serde(default = "default_connect_timeout")]
    connect_timeout_secs: u64,
}

impl Default for SshSection {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            user: None,
            identity_file: None,
            project_path: None,
            backup_path: None,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct BackupSection {
    #[serde(default = "default_backup_enabled")]
    enabled: bool,
    /// `{count: K}` or `{max_age_days: N}`
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    retention: Option<RetentionPolicy>,
}

impl Default for BackupSection {
    fn default() -> Self {
        Self {
            enabled: default_backup_enabled(),
            retention: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ImageSection {
    registry: Option<String>,
    namespace: Option<String>,
    name: Option<String>,
    #[serde(default = "default_image_tag", deserialize_with = "scalar_string")]
    tag: String,
    #[serde(default)]
    strategy: Option<ImageStrategyKind>,
    archive: Option<PathBuf>,
    #[serde(default = "default_runtime")]
    runtime: String,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum ImageStrategyKind {
    Load,
    Pull,
}

#[derive(Debug, Clone, Deserialize)]
struct SourceSection {
    #[serde(default = "default_source_root")]
    root: PathBuf,
    #[serde(default)]
    exclude: Vec<String>,
    #[serde(default = "default_compose_file")]
    compose_file: Option<String>,
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            root: default_source_root(),
            exclude: Vec::new(),
            compose_file: default_compose_file(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum CommandSpec {
    Line(String),
    Words(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
struct HealthSection {
    command: Option<CommandSpec>,
    #[serde(default = "default_health_attempts")]
    attempts: u32,
    #[serde(default = "default_health_interval")]
    interval_secs: u64,
    #[serde(default = "default_expect_output")]
    expect_output: bool,
    log_command: Option<CommandSpec>,
    #[serde(default = "default_log_tail_lines")]
    log_tail_lines: usize,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            command: None,
            attempts: default_health_attempts(),
            interval_secs: default_health_interval(),
            expect_output: default_expect_output(),
            log_command: None,
            log_tail_lines: default_log_tail_lines(),
        }
    }
}

/// Accept `tag: 2` or `tag: 1.5` as well as quoted strings
fn scalar_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        _ => Err(serde::de::Error::custom("expected a string")),
    }
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_backup_enabled() -> bool {
    true
}

fn default_image_tag() -> String {
    "latest".to_string()
}

fn default_runtime() -> String {
    "docker".to_string()
}

fn default_source_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_compose_file() -> Option<String> {
    Some("deploy/docker-compose.yml".to_string())
}

fn default_health_attempts() -> u32 {
    3
}

fn default_health_interval() -> u64 {
    5
}

fn default_expect_output() -> bool {
    true
}

fn default_log_tail_lines() -> usize {
    50
}

// ============================================================================
// Validated configuration
// ============================================================================

/// How many backups survive pruning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Keep the newest K backups
    Count(usize),
    /// Delete backups older than N days
    MaxAgeDays(u32),
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionPolicy::Count(k) => write!(f, "keep newest {}", k),
            RetentionPolicy::MaxAgeDays(n) => write!(f, "keep {} days", n),
        }
    }
}

/// SSH destination of the deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHost {
    pub host: String,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub identity_file: Option<PathBuf>,
    pub connect_timeout: Duration,
}

impl RemoteHost {
    /// `user@host` as understood by ssh
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }

    /// Key identifying one session to this host
    pub fn cache_key(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.destination(), port),
            None => self.destination(),
        }
    }
}

impl fmt::Display for RemoteHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cache_key())
    }
}

/// Split a target of the form `[user@]host[:port]`.
///
/// IPv6 literals carry a port only in brackets (`[fe80::1]:22`); a bare literal such as
/// `::1` is taken whole as the host.
pub fn parse_ssh_target(target: &str) -> (Option<&str>, &str, Option<u16>) {
    let (user, rest) = match target.split_once('@') {
        Some((user, rest)) => (Some(user), rest),
        None => (None, target),
    };
    if let Some(bracketed) = rest.strip_prefix('[') {
        if let Some((host, suffix)) = bracketed.split_once(']') {
            let port = suffix.strip_prefix(':').and_then(|p| p.parse::<u16>().ok());
            return (user, host, port);
        }
    }
    // Only treat the suffix as a port if it parses as a valid u16
    if let Some((host, port)) = rest.rsplit_once(':') {
        if !host.contains(':') {
            if let Ok(port) = port.parse::<u16>() {
                return (user, host, Some(port));
            }
        }
    }
    (user, rest, None)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupPolicy {
    pub enabled: bool,
    /// Remote directory holding `backup_<timestamp>` snapshots
    pub path: Option<String>,
    /// `None` keeps every backup
    pub retention: Option<RetentionPolicy>,
}

/// Registry coordinates of the application image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCoordinates {
    pub registry: Option<String>,
    pub namespace: Option<String>,
    pub name: String,
    pub tag: String,
}

impl ImageCoordinates {
    /// Full reference, e.g. `registry.example.com/team/app:1.2.3`
    pub fn reference(&self) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(3);
        if let Some(registry) = self.registry.as_deref().filter(|r| !r.is_empty()) {
            parts.push(registry);
        }
        if let Some(namespace) = self.namespace.as_deref().filter(|n| !n.is_empty()) {
            parts.push(namespace);
        }
        parts.push(&self.name);
        format!("{}:{}", parts.join("/"), self.tag)
    }
}

/// How the image reaches the remote container runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageStrategy {
    /// Ship a local `docker save` archive and load it remotely
    Load { archive: PathBuf },
    /// Let the remote host pull the reference from its registry
    Pull,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageConfig {
    pub coordinates: ImageCoordinates,
    pub strategy: ImageStrategy,
    /// Container runtime binary on the remote host
    pub runtime: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    /// Local directory packaged and shipped to the project path
    pub root: PathBuf,
    /// Extra exclusion patterns on top of the built-in set
    pub exclude: Vec<String>,
    /// Descriptor copied to the project root after extraction, relative to it
    pub compose_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthConfig {
    pub command: RemoteCommand,
    pub attempts: u32,
    pub interval: Duration,
    /// Require non-empty stdout in addition to a zero exit
    pub expect_output: bool,
    pub log_command: RemoteCommand,
    pub log_tail_lines: usize,
}

/// Validated, immutable deployment configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentConfig {
    remote: RemoteHost,
    project_path: String,
    backup: BackupPolicy,
    image: Option<ImageConfig>,
    source: SourceConfig,
    commands: Vec<RemoteCommand>,
    health: HealthConfig,
}

impl DeploymentConfig {
    /// Parse and validate a descriptor from YAML
    pub fn from_yaml(yaml: &str, environment: Option<&str>) -> Result<Self, ConfigError> {
        let value: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        let value = select_environment(value, environment)?;
        let descriptor: Descriptor = if value.is_null() {
            Descriptor::default()
        } else {
            serde_yaml::from_value(value)?
        };
        Self::from_descriptor(descriptor)
    }

    fn from_descriptor(d: Descriptor) -> Result<Self, ConfigError> {
        let target = d
            .ssh
            .host
            .or(d.host)
            .filter(|h| !h.trim().is_empty())
            .ok_or(ConfigError::MissingField { field: "ssh.host" })?;
        let (target_user, host, target_port) = parse_ssh_target(target.trim());
        let remote = RemoteHost {
            host: host.to_string(),
            port: d.ssh.port.or(target_port),
            user: d.ssh.user.or(target_user.map(str::to_string)),
            identity_file: d.ssh.identity_file,
            connect_timeout: Duration::from_secs(d.ssh.connect_timeout_secs.max(1)),
        };

        let project_path = d
            .ssh
            .project_path
            .or(d.project_path)
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .ok_or(ConfigError::MissingField {
                field: "ssh.project_path",
            })?;
        validate_project_path(&project_path)?;

        let backup_path = d
            .ssh
            .backup_path
            .or(d.backup_path)
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        if d.backup.enabled {
            let path = backup_path.as_deref().ok_or(ConfigError::MissingField {
                field: "ssh.backup_path",
            })?;
            if is_same_or_under(path, &project_path) {
                return Err(ConfigError::invalid(
                    "ssh.backup_path",
                    "must lie outside ssh.project_path, which is wiped on every run",
                ));
            }
        }
        if let Some(RetentionPolicy::Count(0)) = d.backup.retention {
            return Err(ConfigError::invalid(
                "backup.retention.count",
                "must keep at least one backup",
            ));
        }
        let backup = BackupPolicy {
            enabled: d.backup.enabled,
            path: backup_path,
            retention: d.backup.retention,
        };

        let image = d.image.map(image_config).transpose()?;

        let commands = d
            .commands
            .into_iter()
            .enumerate()
            .map(|(i, spec)| command_from_spec(spec, &format!("commands[{}]", i)))
            .collect::<Result<Vec<_>, _>>()?;

        let health = health_config(d.health, image.as_ref())?;

        let config = DeploymentConfig {
            remote,
            project_path,
            backup,
            image,
            source: SourceConfig {
                root: d.source.root,
                exclude: d.source.exclude,
                compose_file: d.source.compose_file.filter(|c| !c.trim().is_empty()),
            },
            commands,
            health,
        };
        debug!("Loaded deployment descriptor for {}", config.remote);
        Ok(config)
    }

    pub fn remote(&self) -> &RemoteHost {
        &self.remote
    }

    pub fn project_path(&self) -> &str {
        &self.project_path
    }

    pub fn backup(&self) -> &BackupPolicy {
        &self.backup
    }

    pub fn image(&self) -> Option<&ImageConfig> {
        self.image.as_ref()
    }

    pub fn source(&self) -> &SourceConfig {
        &self.source
    }

    /// Post-sync commands, run in order from the project path
    pub fn commands(&self) -> &[RemoteCommand] {
        &self.commands
    }

    pub fn health(&self) -> &HealthConfig {
        &self.health
    }
}

/// Whether remote `path` is `dir` itself or somewhere below it
fn is_same_or_under(path: &str, dir: &str) -> bool {
    fn components(p: &str) -> Vec<&str> {
        p.split('/').filter(|c| !c.is_empty() && *c != ".").collect()
    }
    // Relative and absolute paths are never compared as equal
    if path.starts_with('/') != dir.starts_with('/') {
        return false;
    }
    let (path, dir) = (components(path), components(dir));
    path.len() >= dir.len() && path[..dir.len()] == dir[..]
}

fn validate_project_path(path: &str) -> Result<(), ConfigError> {
    let normalized = path.trim_end_matches('/');
    if matches!(normalized, "" | "." | ".." | "~") || path.chars().all(|c| c == '/') {
        return Err(ConfigError::invalid(
            "ssh.project_path",
            format!("refusing to use '{}' as it is wiped on every run", path),
        ));
    }
    Ok(())
}

fn image_config(section: ImageSection) -> Result<ImageConfig, ConfigError> {
    let name = section
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or(ConfigError::MissingField { field: "image.name" })?;
    if section.tag.trim().is_empty() {
        return Err(ConfigError::invalid("image.tag", "must not be empty"));
    }

    let kind = section.strategy.unwrap_or(if section.archive.is_some() {
        ImageStrategyKind::Load
    } else {
        ImageStrategyKind::Pull
    });
    let strategy = match kind {
        ImageStrategyKind::Load => ImageStrategy::Load {
            archive: section.archive.ok_or(ConfigError::MissingField {
                field: "image.archive",
            })?,
        },
        ImageStrategyKind::Pull => ImageStrategy::Pull,
    };

    Ok(ImageConfig {
        coordinates: ImageCoordinates {
            registry: section.registry,
            namespace: section.namespace,
            name,
            tag: section.tag,
        },
        strategy,
        runtime: section.runtime,
    })
}

fn command_from_spec(spec: CommandSpec, field: &str) -> Result<RemoteCommand, ConfigError> {
    let parsed = match spec {
        CommandSpec::Line(line) => RemoteCommand::parse(&line),
        CommandSpec::Words(words) => RemoteCommand::from_words(words),
    };
    parsed.map_err(|e: CommandParseError| ConfigError::invalid(field, e.to_string()))
}

fn health_config(
    section: HealthSection,
    image: Option<&ImageConfig>,
) -> Result<HealthConfig, ConfigError> {
    if section.attempts == 0 {
        return Err(ConfigError::invalid(
            "health.attempts",
            "must allow at least one attempt",
        ));
    }
    let runtime = image.map(|i| i.runtime.as_str()).unwrap_or("docker");

    let command = match section.command {
        Some(spec) => command_from_spec(spec, "health.command")?,
        None => RemoteCommand::new(runtime).args(["compose", "ps", "--status", "running", "--quiet"]),
    };
    let log_command = match section.log_command {
        Some(spec) => command_from_spec(spec, "health.log_command")?,
        None => RemoteCommand::new(runtime).args([
            "compose".to_string(),
            "logs".to_string(),
            "--no-color".to_string(),
            format!("--tail={}", section.log_tail_lines),
        ]),
    };

    Ok(HealthConfig {
        command,
        attempts: section.attempts,
        interval: Duration::from_secs(section.interval_secs),
        expect_output: section.expect_output,
        log_command,
        log_tail_lines: section.log_tail_lines,
    })
}

fn select_environment(
    value: serde_yaml::Value,
    environment: Option<&str>,
) -> Result<serde_yaml::Value, ConfigError> {
    let environments = match value.get("environments") {
        Some(serde_yaml::Value::Mapping(envs)) => envs.clone(),
        Some(_) => {
            return Err(ConfigError::invalid(
                "environments",
                "expected a mapping of environment names",
            ))
        }
        None => return Ok(value),
    };

    let names: Vec<String> = environments
        .keys()
        .filter_map(|k| k.as_str().map(str::to_string))
        .collect();
    let available = names.join(", ");

    match environment {
        Some(name) => environments
            .get(name)
            .cloned()
            .ok_or(ConfigError::UnknownEnvironment {
                name: name.to_string(),
                available,
            }),
        None if environments.len() == 1 => {
            Ok(environments.values().next().cloned().unwrap_or_default())
        }
        None => Err(ConfigError::AmbiguousEnvironment { available }),
    }
}

/// Reads the deployment descriptor from disk
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    path: PathBuf,
    environment: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new(DEFAULT_DESCRIPTOR_PATH)
    }
}

impl ConfigLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            environment: None,
        }
    }

    /// Select a block under `environments:`
    pub fn with_environment(mut self, environment: Option<String>) -> Self {
        self.environment = environment;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<DeploymentConfig, ConfigError> {
        let contents = std::fs::read_to_string(&self.path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound {
                    path: self.path.clone(),
                }
            } else {
                ConfigError::Read {
                    path: self.path.clone(),
                    source,
                }
            }
        })?;
        DeploymentConfig::from_yaml(&contents, self.environment.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
ssh:
  host: deploy@10.0.0.5:2222
  project_path: /opt/balance-manager
  backup_path: /opt/backups/balance-manager
  identity_file: ~/.ssh/deploy_ed25519
backup:
  enabled: true
  retention:
    count: 7
image:
  registry: registry.example.com
  namespace: finance
  name: balance-manager
  tag: 1.4.0
  archive: balance-manager.tar
source:
  exclude: ["*.log"]
commands:
  - docker compose up -d
  - [docker, image, prune, -f]
health:
  attempts: 5
  interval_secs: 2
"#;

    #[test]
    fn test_parse_complete_descriptor() {
        let config = DeploymentConfig::from_yaml(FULL, None).unwrap();

        let remote = config.remote();
        assert_eq!(remote.host, "10.0.0.5");
        assert_eq!(remote.user.as_deref(), Some("deploy"));
        assert_eq!(remote.port, Some(2222));
        assert_eq!(remote.destination(), "deploy@10.0.0.5");
        assert_eq!(remote.connect_timeout, Duration::from_secs(10));

        assert_eq!(config.project_path(), "/opt/balance-manager");
        assert!(config.backup().enabled);
        assert_eq!(config.backup().retention, Some(RetentionPolicy::Count(7)));

        let image = config.image().unwrap();
        assert_eq!(
            image.coordinates.reference(),
            "registry.example.com/finance/balance-manager:1.4.0"
        );
        assert_eq!(
            image.strategy,
            ImageStrategy::Load {
                archive: PathBuf::from("balance-manager.tar")
            }
        );

        assert_eq!(config.commands().len(), 2);
        assert_eq!(config.commands()[0].to_string(), "docker compose up -d");
        assert_eq!(config.commands()[1].to_string(), "docker image prune -f");

        assert_eq!(config.health().attempts, 5);
        assert_eq!(config.health().interval, Duration::from_secs(2));
        assert_eq!(
            config.health().log_command.to_string(),
            "docker compose logs --no-color --tail=50"
        );
        assert_eq!(
            config.source().compose_file.as_deref(),
            Some("deploy/docker-compose.yml")
        );
    }

    #[test]
    fn test_missing_host_fails() {
        let err = DeploymentConfig::from_yaml("ssh:\n  project_path: /srv/app\n", None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field: "ssh.host" }));
    }

    #[test]
    fn test_missing_project_path_fails() {
        let err = DeploymentConfig::from_yaml("ssh:\n  host: web1\n", None).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingField {
                field: "ssh.project_path"
            }
        ));
    }

    #[test]
    fn test_backup_path_required_only_when_enabled() {
        let yaml = "ssh:\n  host: web1\n  project_path: /srv/app\n";
        let err = DeploymentConfig::from_yaml(yaml, None).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingField {
                field: "ssh.backup_path"
            }
        ));

        let yaml = "ssh:\n  host: web1\n  project_path: /srv/app\nbackup:\n  enabled: false\n";
        let config = DeploymentConfig::from_yaml(yaml, None).unwrap();
        assert!(!config.backup().enabled);
        assert!(config.image().is_none());
    }

    #[test]
    fn test_rejects_dangerous_project_paths() {
        for path in ["/", "//", ".", "~"] {
            let yaml = format!(
                "ssh:\n  host: web1\n  project_path: '{}'\nbackup:\n  enabled: false\n",
                path
            );
            let err = DeploymentConfig::from_yaml(&yaml, None).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { .. }),
                "{} should be rejected",
                path
            );
        }
    }

    #[test]
    fn test_backup_path_inside_project_is_rejected() {
        for backup_path in ["/srv/app", "/srv/app/", "/srv/app/backups", "/srv//app/./old/backups"] {
            let yaml = format!(
                "ssh: {{host: web1, project_path: /srv/app, backup_path: '{}'}}\n",
                backup_path
            );
            let err = DeploymentConfig::from_yaml(&yaml, None).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { ref field, .. } if field == "ssh.backup_path"),
                "{} should be rejected",
                backup_path
            );
        }

        for backup_path in ["/srv/backups", "/srv/app-backups", "/srv"] {
            let yaml = format!(
                "ssh: {{host: web1, project_path: /srv/app, backup_path: '{}'}}\n",
                backup_path
            );
            assert!(DeploymentConfig::from_yaml(&yaml, None).is_ok(), "{}", backup_path);
        }
    }

    #[test]
    fn test_age_based_retention() {
        let yaml = r#"
ssh: {host: web1, project_path: /srv/app, backup_path: /srv/backups}
backup:
  retention:
    max_age_days: 14
"#;
        let config = DeploymentConfig::from_yaml(yaml, None).unwrap();
        assert_eq!(
            config.backup().retention,
            Some(RetentionPolicy::MaxAgeDays(14))
        );
    }

    #[test]
    fn test_zero_count_retention_is_invalid() {
        let yaml = r#"
ssh: {host: web1, project_path: /srv/app, backup_path: /srv/backups}
backup:
  retention: {count: 0}
"#;
        assert!(matches!(
            DeploymentConfig::from_yaml(yaml, None),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_load_strategy_requires_archive() {
        let yaml = r#"
ssh: {host: web1, project_path: /srv/app}
backup: {enabled: false}
image: {name: myapp, tag: 1.2.3, strategy: load}
"#;
        let err = DeploymentConfig::from_yaml(yaml, None).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingField {
                field: "image.archive"
            }
        ));
    }

    #[test]
    fn test_pull_is_default_without_archive() {
        let yaml = r#"
ssh: {host: web1, project_path: /srv/app}
backup: {enabled: false}
image: {name: myapp, tag: 1.2.3}
"#;
        let config = DeploymentConfig::from_yaml(yaml, None).unwrap();
        let image = config.image().unwrap();
        assert_eq!(image.strategy, ImageStrategy::Pull);
        assert_eq!(image.coordinates.reference(), "myapp:1.2.3");
    }

    #[test]
    fn test_environment_blocks_with_flat_layout() {
        let yaml = r#"
environments:
  dev:
    host: dev-box
    project_path: /home/dev/app
    backup_path: /home/dev/backups
    image: {registry: r.example.com, namespace: ns, name: app, tag: dev}
  prod:
    host: prod-box
    project_path: /srv/app
    backup_path: /srv/backups
"#;
        let dev = DeploymentConfig::from_yaml(yaml, Some("dev")).unwrap();
        assert_eq!(dev.remote().host, "dev-box");
        assert_eq!(
            dev.image().unwrap().coordinates.reference(),
            "r.example.com/ns/app:dev"
        );

        let prod = DeploymentConfig::from_yaml(yaml, Some("prod")).unwrap();
        assert_eq!(prod.project_path(), "/srv/app");

        assert!(matches!(
            DeploymentConfig::from_yaml(yaml, Some("staging")),
            Err(ConfigError::UnknownEnvironment { .. })
        ));
        assert!(matches!(
            DeploymentConfig::from_yaml(yaml, None),
            Err(ConfigError::AmbiguousEnvironment { .. })
        ));
    }

    #[test]
    fn test_numeric_tag_is_accepted() {
        let yaml = r#"
ssh: {host: web1, project_path: /srv/app}
backup: {enabled: false}
image: {name: myapp, tag: 2}
"#;
        let config = DeploymentConfig::from_yaml(yaml, None).unwrap();
        assert_eq!(config.image().unwrap().coordinates.reference(), "myapp:2");
    }

    #[test]
    fn test_malformed_yaml() {
        assert!(matches!(
            DeploymentConfig::from_yaml("ssh: [unclosed", None),
            Err(ConfigError::Malformed(_))
        ));
    }

    #[test]
    fn test_bad_command_is_reported_by_index() {
        let yaml = r#"
ssh: {host: web1, project_path: /srv/app}
backup: {enabled: false}
commands: ["docker compose up -d", "echo 'unterminated"]
"#;
        match DeploymentConfig::from_yaml(yaml, None) {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "commands[1]"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_parse_ssh_target() {
        assert_eq!(parse_ssh_target("host"), (None, "host", None));
        assert_eq!(parse_ssh_target("user@host"), (Some("user"), "host", None));
        assert_eq!(
            parse_ssh_target("admin@192.168.1.100:2222"),
            (Some("admin"), "192.168.1.100", Some(2222))
        );
        assert_eq!(
            parse_ssh_target("user@host:invalid"),
            (Some("user"), "host:invalid", None)
        );
    }

    #[test]
    fn test_parse_ipv6_targets() {
        assert_eq!(parse_ssh_target("::1"), (None, "::1", None));
        assert_eq!(parse_ssh_target("deploy@fe80::1"), (Some("deploy"), "fe80::1", None));
        assert_eq!(parse_ssh_target("[fe80::1]:22"), (None, "fe80::1", Some(22)));
        assert_eq!(
            parse_ssh_target("deploy@[2001:db8::5]"),
            (Some("deploy"), "2001:db8::5", None)
        );

        let config = DeploymentConfig::from_yaml(
            "ssh: {host: 'deploy@[2001:db8::5]:2222', project_path: /srv/app}\nbackup: {enabled: false}\n",
            None,
        )
        .unwrap();
        assert_eq!(config.remote().host, "2001:db8::5");
        assert_eq!(config.remote().port, Some(2222));
        assert_eq!(config.remote().destination(), "deploy@2001:db8::5");
    }

    #[test]
    fn test_loader_reports_missing_file() {
        let err = ConfigLoader::new("/nonexistent/launchpad/env.yaml")
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn test_loader_reads_selected_environment_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env.yaml");
        std::fs::write(
            &path,
            r#"
environments:
  staging:
    ssh: {host: deploy@staging.internal, project_path: /srv/app, backup_path: /srv/backups}
    backup:
      retention: {max_age_days: 30}
  production:
    ssh: {host: deploy@prod.internal, project_path: /srv/app, backup_path: /srv/backups}
    backup:
      retention: {count: 5}
"#,
        )
        .unwrap();

        let loader = ConfigLoader::new(&path).with_environment(Some("production".to_string()));
        assert_eq!(loader.path(), path.as_path());
        let config = loader.load().unwrap();
        assert_eq!(config.remote().host, "prod.internal");
        assert_eq!(config.backup().retention, Some(RetentionPolicy::Count(5)));

        let staging = ConfigLoader::new(&path)
            .with_environment(Some("staging".to_string()))
            .load()
            .unwrap();
        assert_eq!(staging.remote().host, "staging.internal");
        assert_eq!(
            staging.backup().retention,
            Some(RetentionPolicy::MaxAgeDays(30))
        );
    }
}
