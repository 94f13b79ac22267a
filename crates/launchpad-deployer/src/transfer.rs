//! Shipping the source tree and the container image to the remote host

use launchpad_core::{
    join_remote, DeployError, DeployResult, DeploymentConfig, ImageConfig, ImageStrategy,
    OutputLine, OutputStream, PipelineStep, ProgressTracker, RemoteCommand,
};
use launchpad_remote::{LineCallback, RemoteExecutor, RemoteInput};
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::io::SyncIoBridge;
use tracing::{debug, info, warn};

use crate::archive::{ExcludeSet, SourceArchive};

/// Buffer between the packaging thread and the upload
const PIPE_CAPACITY: usize = 256 * 1024;

/// What a source sync shipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    pub files: usize,
    pub bytes: u64,
}

/// Where the image archive landed remotely
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    pub remote_path: String,
    pub bytes: u64,
}

/// Reports cumulative bytes read through an [`AsyncRead`]
pub struct ProgressReader<R> {
    inner: R,
    read: u64,
    on_read: Box<dyn FnMut(u64) + Send>,
}

impl<R> ProgressReader<R> {
    pub fn new(inner: R, on_read: impl FnMut(u64) + Send + 'static) -> Self {
        Self {
            inner,
            read: 0,
            on_read: Box::new(on_read),
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.read
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let n = buf.filled().len() - before;
            if n > 0 {
                this.read += n as u64;
                (this.on_read)(this.read);
            }
        }
        poll
    }
}

/// Moves the deployment payloads onto the remote host
pub struct ArtifactTransfer {
    executor: Arc<dyn RemoteExecutor>,
    progress: Arc<ProgressTracker>,
}

impl ArtifactTransfer {
    pub fn new(executor: Arc<dyn RemoteExecutor>, progress: Arc<ProgressTracker>) -> Self {
        Self { executor, progress }
    }

    /// Stream the source tree into the (empty) project directory.
    ///
    /// The archive is produced on a blocking thread and piped straight into a remote
    /// `tar -xzf -`; nothing is staged on local disk. A zero exit from the remote `tar`
    /// means it consumed the whole gzip stream including its checksum trailer.
    pub async fn sync_source(&self, config: &DeploymentConfig) -> DeployResult<SyncSummary> {
        let source = config.source();
        let mut exclude = ExcludeSet::new(&source.exclude)
            .map_err(|e| DeployError::transfer(format!("invalid exclude pattern: {}", e)))?;
        if let Some(name) = image_archive_name(config) {
            exclude = exclude.with_name(&name);
        }

        let root = source.root.clone();
        let archive = tokio::task::spawn_blocking(move || SourceArchive::scan(&root, &exclude))
            .await
            .map_err(|e| DeployError::transfer(format!("source scan aborted: {}", e)))??;
        let summary = SyncSummary {
            files: archive.file_count(),
            bytes: archive.total_bytes(),
        };
        info!(
            "Syncing {} files ({} bytes) from {} to {}",
            summary.files,
            summary.bytes,
            archive.root().display(),
            config.project_path()
        );

        let (reader, writer) = tokio::io::duplex(PIPE_CAPACITY);
        let bridge = SyncIoBridge::new(writer);
        let progress = self.progress.clone();
        let total = summary.bytes;
        let producer = tokio::task::spawn_blocking(move || {
            archive
                .write_to(bridge, |done| {
                    progress.sub_progress(PipelineStep::SyncCode, done, total)
                })
                // Dropping the bridge closes the pipe and ends the remote tar's input
                .map(drop)
        });

        let extract = RemoteCommand::new("tar").args(["-xzf", "-", "-C", config.project_path()]);
        let input: RemoteInput = Box::new(reader);
        let uploaded = self
            .executor
            .execute_with_input(&extract, Some(input), None)
            .await;
        let produced = producer.await;

        // A remote failure explains a broken pipe on our side, so report it first
        uploaded?.check(&extract)?;
        produced
            .map_err(|e| DeployError::transfer(format!("packaging aborted: {}", e)))?
            .map_err(|e| DeployError::transfer(format!("packaging failed: {}", e)))?;

        debug!("Source extracted into {}", config.project_path());
        Ok(summary)
    }

    /// Copy the compose descriptor from inside the shipped tree to the project root
    pub async fn install_compose_descriptor(&self, config: &DeploymentConfig) -> DeployResult<()> {
        let Some(compose) = config.source().compose_file.as_deref() else {
            return Ok(());
        };
        let relative = compose.trim_start_matches("./");
        let Some(file_name) = Path::new(relative).file_name().map(|n| n.to_string_lossy()) else {
            return Ok(());
        };
        if relative == file_name {
            // Already at the project root
            return Ok(());
        }
        if !config.source().root.join(relative).is_file() {
            warn!("Compose descriptor {} not found in source tree, skipping", relative);
            return Ok(());
        }

        let project = config.project_path();
        let copy = RemoteCommand::new("cp").args([
            join_remote(project, relative),
            join_remote(project, &file_name),
        ]);
        self.executor.execute(&copy).await?.check(&copy)?;
        info!("Installed {} as {}", relative, file_name);
        Ok(())
    }

    /// Upload the image archive next to the project and confirm its size remotely.
    ///
    /// Returns `None` when no archive has to move (no image, or the pull strategy).
    pub async fn transfer_image(
        &self,
        config: &DeploymentConfig,
    ) -> DeployResult<Option<UploadedImage>> {
        let Some(image) = config.image() else {
            debug!("No image configured, nothing to transfer");
            return Ok(None);
        };
        let ImageStrategy::Load { archive } = &image.strategy else {
            debug!("Image {} is pulled remotely, nothing to transfer", image.coordinates.reference());
            return Ok(None);
        };

        let size = tokio::fs::metadata(archive)
            .await
            .map_err(|e| {
                DeployError::transfer(format!("cannot read image archive {}: {}", archive.display(), e))
            })?
            .len();
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| DeployError::transfer(format!("{} is not a file", archive.display())))?;
        let remote_path = join_remote(config.project_path(), &name);
        info!("Uploading {} ({} bytes) to {}", archive.display(), size, remote_path);

        let file = tokio::fs::File::open(archive).await?;
        let progress = self.progress.clone();
        let reader = ProgressReader::new(file, move |done| {
            progress.sub_progress(PipelineStep::TransferImage, done, size)
        });
        let upload = RemoteCommand::new("sh").args(["-c", "cat > \"$1\"", "sh", remote_path.as_str()]);
        self.executor
            .execute_with_input(&upload, Some(Box::new(reader)), None)
            .await?
            .check(&upload)?;

        let measure = RemoteCommand::new("wc").args(["-c", remote_path.as_str()]);
        let measured = self.executor.execute(&measure).await?.check(&measure)?;
        let remote_size = measured
            .stdout
            .split_whitespace()
            .next()
            .and_then(|n| n.parse::<u64>().ok())
            .ok_or_else(|| {
                DeployError::transfer(format!("cannot read size of {}: {:?}", remote_path, measured.stdout))
            })?;
        if remote_size != size {
            return Err(DeployError::transfer(format!(
                "{} is {} bytes on the remote host, expected {}",
                remote_path, remote_size, size
            )));
        }

        Ok(Some(UploadedImage {
            remote_path,
            bytes: size,
        }))
    }

    /// Make the image available to the remote container runtime
    pub async fn load_image(
        &self,
        config: &DeploymentConfig,
        uploaded: Option<&UploadedImage>,
    ) -> DeployResult<()> {
        let Some(image) = config.image() else {
            return Ok(());
        };
        let reference = image.coordinates.reference();

        match (&image.strategy, uploaded) {
            (ImageStrategy::Load { .. }, Some(uploaded)) => {
                info!("Loading {} from {}", reference, uploaded.remote_path);
                let load = RemoteCommand::new(&image.runtime).args(["load", "-i", uploaded.remote_path.as_str()]);
                self.run_logged(&load).await?;
                self.verify_image(image, &reference).await
            }
            (ImageStrategy::Load { .. }, None) => Err(DeployError::transfer(format!(
                "image archive for {} was not uploaded",
                reference
            ))),
            (ImageStrategy::Pull, _) => {
                info!("Pulling {}", reference);
                let pull = RemoteCommand::new(&image.runtime).args(["pull", reference.as_str()]);
                self.run_logged(&pull).await?;
                Ok(())
            }
        }
    }

    async fn verify_image(&self, image: &ImageConfig, reference: &str) -> DeployResult<()> {
        let inspect = RemoteCommand::new(&image.runtime).args(["image", "inspect", reference]);
        let result = self.executor.execute(&inspect).await?;
        if !result.success() {
            return Err(DeployError::transfer(format!(
                "image {} is not present after load: {}",
                reference,
                result.stderr.trim()
            )));
        }
        Ok(())
    }

    async fn run_logged(&self, command: &RemoteCommand) -> DeployResult<()> {
        let on_line: LineCallback = Arc::new(|line: &OutputLine| match line.stream {
            OutputStream::Stdout => debug!("{}", line.line),
            OutputStream::Stderr => debug!("stderr: {}", line.line),
        });
        self.executor
            .execute_streaming(command, on_line)
            .await?
            .check(command)?;
        Ok(())
    }
}

/// File name of the image archive, excluded from the source tree
fn image_archive_name(config: &DeploymentConfig) -> Option<String> {
    match &config.image()?.strategy {
        ImageStrategy::Load { archive } => archive
            .file_name()
            .map(|n| n.to_string_lossy().to_string()),
        ImageStrategy::Pull => None,
    }
}
