//! Launchpad Deployer - moves deployment artifacts to the target host
//!
//! This crate provides:
//! - Deterministic `.tar.gz` packaging of the local source tree with an exclusion set
//! - Streaming that archive into a remote `tar` without a local staging file
//! - Uploading a container image archive with byte-level progress and size confirmation
//! - Loading (or pulling) the image into the remote container runtime

pub mod archive;
pub mod transfer;

pub use archive::{ExcludeSet, SourceArchive, DEFAULT_EXCLUDES};
pub use transfer::{ArtifactTransfer, ProgressReader, SyncSummary, UploadedImage};
