//! Transfers through the loopback executor into a scratch "remote" directory

use launchpad_core::{DeployError, DeploymentConfig, ExecutionResult, PipelineStep, ProgressTracker};
use launchpad_deployer::ArtifactTransfer;
use launchpad_remote::test_utils::ScriptedExecutor;
use launchpad_remote::LocalExecutor;
use std::fs;
use std::path::Path;
use std::sync::Arc;

struct Fixture {
    _dir: tempfile::TempDir,
    source: std::path::PathBuf,
    project: std::path::PathBuf,
    archive: std::path::PathBuf,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    let project = dir.path().join("remote/app");
    fs::create_dir_all(source.join("deploy")).unwrap();
    fs::create_dir_all(source.join("app/.git")).unwrap();
    fs::create_dir_all(&project).unwrap();
    fs::write(source.join("app/main.py"), "print('ok')\n").unwrap();
    fs::write(source.join("app/.git/HEAD"), "ref\n").unwrap();
    fs::write(source.join("deploy/docker-compose.yml"), "services:\n  web: {}\n").unwrap();
    fs::write(source.join("scratch.tmp"), "tmp").unwrap();

    let archive = source.join("myapp.tar");
    fs::write(&archive, vec![42u8; 300_000]).unwrap();

    Fixture {
        _dir: dir,
        source,
        project,
        archive,
    }
}

fn config(f: &Fixture) -> DeploymentConfig {
    let yaml = format!(
        r#"
ssh:
  host: localhost
  project_path: {}
backup:
  enabled: false
image:
  name: myapp
  tag: 1.2.3
  archive: {}
source:
  root: {}
  exclude: ["*.tmp"]
"#,
        f.project.display(),
        f.archive.display(),
        f.source.display()
    );
    DeploymentConfig::from_yaml(&yaml, None).unwrap()
}

#[tokio::test]
async fn test_sync_source_extracts_filtered_tree() {
    let f = fixture();
    let config = config(&f);
    let progress = Arc::new(ProgressTracker::new());
    let transfer = ArtifactTransfer::new(Arc::new(LocalExecutor::new()), progress.clone());

    let summary = transfer.sync_source(&config).await.unwrap();
    assert_eq!(summary.files, 2);

    assert_eq!(
        fs::read_to_string(f.project.join("app/main.py")).unwrap(),
        "print('ok')\n"
    );
    assert!(!f.project.join("app/.git").exists());
    assert!(!f.project.join("scratch.tmp").exists());
    // The image archive travels separately
    assert!(!f.project.join("myapp.tar").exists());
    // Byte progress never completes the step on its own
    assert_eq!(progress.percent(), 0);

    transfer.install_compose_descriptor(&config).await.unwrap();
    assert_eq!(
        fs::read_to_string(f.project.join("docker-compose.yml")).unwrap(),
        "services:\n  web: {}\n"
    );
}

#[tokio::test]
async fn test_image_upload_is_size_checked() {
    let f = fixture();
    let config = config(&f);
    let progress = Arc::new(ProgressTracker::new());
    progress.advance(PipelineStep::SyncCode);
    let transfer = ArtifactTransfer::new(Arc::new(LocalExecutor::new()), progress.clone());

    let uploaded = transfer.transfer_image(&config).await.unwrap().unwrap();
    assert_eq!(uploaded.bytes, 300_000);
    assert_eq!(
        Path::new(&uploaded.remote_path),
        f.project.join("myapp.tar").as_path()
    );
    assert_eq!(fs::metadata(f.project.join("myapp.tar")).unwrap().len(), 300_000);
    assert_eq!(progress.percent(), PipelineStep::SyncCode.cumulative_percent());
}

#[tokio::test]
async fn test_short_remote_file_is_a_transfer_error() {
    let f = fixture();
    let config = config(&f);
    let executor = Arc::new(
        ScriptedExecutor::new().on("wc -c", ExecutionResult::new(0, "1024 /remote/myapp.tar\n", "")),
    );
    let transfer = ArtifactTransfer::new(executor.clone(), Arc::new(ProgressTracker::new()));

    let err = transfer.transfer_image(&config).await.unwrap_err();
    assert!(matches!(err, DeployError::Transfer(_)), "{}", err);
    // The whole archive was still offered on stdin
    assert_eq!(executor.calls()[0].input.len(), 300_000);
}

#[tokio::test]
async fn test_load_verifies_image_reference() {
    let f = fixture();
    let config = config(&f);
    let executor = Arc::new(
        ScriptedExecutor::new()
            .on("wc -c", ExecutionResult::new(0, "300000 x\n", ""))
            .on("docker load", ExecutionResult::new(0, "Loaded image: myapp:1.2.3\n", ""))
            .on("docker image inspect", ExecutionResult::new(1, "", "No such image: myapp:1.2.3")),
    );
    let transfer = ArtifactTransfer::new(executor.clone(), Arc::new(ProgressTracker::new()));

    let uploaded = transfer.transfer_image(&config).await.unwrap();
    let err = transfer
        .load_image(&config, uploaded.as_ref())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("myapp:1.2.3"));
    assert_eq!(executor.count("docker image inspect myapp:1.2.3"), 1);
}

#[tokio::test]
async fn test_pull_strategy_skips_upload() {
    let yaml = r#"
ssh:
  host: localhost
  project_path: /srv/app
backup:
  enabled: false
image:
  registry: registry.example.com
  name: myapp
  tag: 1.2.3
"#;
    let config = DeploymentConfig::from_yaml(yaml, None).unwrap();
    let executor = Arc::new(ScriptedExecutor::new());
    let transfer = ArtifactTransfer::new(executor.clone(), Arc::new(ProgressTracker::new()));

    assert!(transfer.transfer_image(&config).await.unwrap().is_none());
    transfer.load_image(&config, None).await.unwrap();
    assert_eq!(executor.lines(), vec!["docker pull registry.example.com/myapp:1.2.3"]);
}
