//! Packaging of the local source tree as a gzip-compressed tar stream

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Names never shipped to the remote host: VCS metadata, caches, build output, OS litter
pub const DEFAULT_EXCLUDES: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    "__pycache__",
    ".cache",
    "*.pyc",
    "*.pyo",
    "*.o",
    "target",
    "venv",
    ".venv",
    ".DS_Store",
    "Thumbs.db",
    "._*",
];

/// Glob patterns matched against each entry's file name and its path relative to the root
#[derive(Debug, Clone)]
pub struct ExcludeSet {
    patterns: Vec<glob::Pattern>,
}

impl ExcludeSet {
    /// The default exclusions plus `extra`
    pub fn new<I, S>(extra: I) -> Result<Self, glob::PatternError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut patterns = DEFAULT_EXCLUDES
            .iter()
            .map(|p| glob::Pattern::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        for pattern in extra {
            let pattern = pattern.as_ref().trim().trim_start_matches("./");
            if pattern.is_empty() {
                continue;
            }
            patterns.push(glob::Pattern::new(pattern.trim_end_matches('/'))?);
        }
        Ok(Self { patterns })
    }

    /// Also exclude files named exactly `name`
    pub fn with_name(mut self, name: &str) -> Self {
        if let Ok(pattern) = glob::Pattern::new(&glob::Pattern::escape(name)) {
            self.patterns.push(pattern);
        }
        self
    }

    pub fn is_excluded(&self, relative: &Path) -> bool {
        let name = relative
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        let relative = relative.to_string_lossy();
        self.patterns
            .iter()
            .any(|p| p.matches(&name) || p.matches(&relative))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Dir,
    File,
    Symlink,
}

#[derive(Debug, Clone)]
struct ArchiveEntry {
    path: PathBuf,
    name: PathBuf,
    kind: EntryKind,
    size: u64,
}

/// The list of files to ship, fixed before any byte is written
#[derive(Debug, Clone)]
pub struct SourceArchive {
    root: PathBuf,
    entries: Vec<ArchiveEntry>,
    total_bytes: u64,
}

impl SourceArchive {
    /// Walk `root` in sorted order, skipping excluded entries and everything below them
    pub fn scan(root: &Path, exclude: &ExcludeSet) -> io::Result<Self> {
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("source directory {} does not exist", root.display()),
            ));
        }

        let mut entries = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                e.path()
                    .strip_prefix(root)
                    .map(|rel| !exclude.is_excluded(rel))
                    .unwrap_or(false)
            });

        for entry in walker {
            let entry = entry.map_err(io::Error::from)?;
            let name = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?
                .to_path_buf();
            let file_type = entry.file_type();
            let (kind, size) = if file_type.is_symlink() {
                (EntryKind::Symlink, 0)
            } else if file_type.is_dir() {
                (EntryKind::Dir, 0)
            } else if file_type.is_file() {
                (EntryKind::File, entry.metadata().map_err(io::Error::from)?.len())
            } else {
                debug!("Skipping special file {}", entry.path().display());
                continue;
            };
            entries.push(ArchiveEntry {
                path: entry.path().to_path_buf(),
                name,
                kind,
                size,
            });
        }

        let total_bytes = entries.iter().map(|e| e.size).sum();
        Ok(Self {
            root: root.to_path_buf(),
            entries,
            total_bytes,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sum of the regular file sizes
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn file_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.kind == EntryKind::File)
            .count()
    }

    pub fn contains(&self, relative: &Path) -> bool {
        self.entries.iter().any(|e| e.name == relative)
    }

    /// Relative paths in archive order
    pub fn names(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(|e| e.name.as_path())
    }

    /// Write the `.tar.gz` stream to `writer`.
    ///
    /// `on_progress` receives the cumulative number of file bytes packaged so far.
    pub fn write_to<W, F>(&self, writer: W, mut on_progress: F) -> io::Result<W>
    where
        W: Write,
        F: FnMut(u64),
    {
        let encoder = GzEncoder::new(writer, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.follow_symlinks(false);

        let mut written = 0u64;
        for entry in &self.entries {
            match entry.kind {
                EntryKind::Dir => builder.append_dir(&entry.name, &entry.path)?,
                EntryKind::File | EntryKind::Symlink => {
                    builder.append_path_with_name(&entry.path, &entry.name)?
                }
            }
            if entry.kind == EntryKind::File {
                written += entry.size;
                on_progress(written);
            }
        }

        let encoder = builder.into_inner()?;
        let mut writer = encoder.finish()?;
        writer.flush()?;
        Ok(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::fs;

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src/__pycache__")).unwrap();
        fs::create_dir_all(root.join(".git/objects")).unwrap();
        fs::create_dir_all(root.join("deploy")).unwrap();
        fs::write(root.join("src/app.py"), "print('hi')\n").unwrap();
        fs::write(root.join("src/app.pyc"), [0u8; 4]).unwrap();
        fs::write(root.join("src/__pycache__/app.cpython-311.pyc"), [0u8; 4]).unwrap();
        fs::write(root.join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
        fs::write(root.join("deploy/docker-compose.yml"), "services: {}\n").unwrap();
        fs::write(root.join("app.tar"), [1u8; 16]).unwrap();
        fs::write(root.join("debug.log"), "noise").unwrap();
        dir
    }

    fn unpacked_names(bytes: &[u8]) -> Vec<String> {
        let mut archive = tar::Archive::new(GzDecoder::new(bytes));
        archive
            .entries()
            .unwrap()
            .map(|e| {
                e.unwrap()
                    .path()
                    .unwrap()
                    .to_string_lossy()
                    .trim_end_matches('/')
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn test_default_and_extra_exclusions() {
        let exclude = ExcludeSet::new(["*.log"]).unwrap().with_name("app.tar");
        assert!(exclude.is_excluded(Path::new(".git")));
        assert!(exclude.is_excluded(Path::new("src/__pycache__")));
        assert!(exclude.is_excluded(Path::new("src/app.pyc")));
        assert!(exclude.is_excluded(Path::new("._resource")));
        assert!(exclude.is_excluded(Path::new("debug.log")));
        assert!(exclude.is_excluded(Path::new("app.tar")));
        assert!(!exclude.is_excluded(Path::new("src/app.py")));
        assert!(!exclude.is_excluded(Path::new("deploy/docker-compose.yml")));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        assert!(ExcludeSet::new(["[unclosed"]).is_err());
    }

    #[test]
    fn test_scan_is_sorted_and_filtered() {
        let dir = tree();
        let exclude = ExcludeSet::new(["*.log"]).unwrap().with_name("app.tar");
        let archive = SourceArchive::scan(dir.path(), &exclude).unwrap();

        let names: Vec<_> = archive
            .names()
            .map(|n| n.to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["deploy", "deploy/docker-compose.yml", "src", "src/app.py"]
        );
        assert_eq!(archive.file_count(), 2);
        assert_eq!(archive.total_bytes(), 12 + 13);
        assert!(archive.contains(Path::new("deploy/docker-compose.yml")));
    }

    #[test]
    fn test_write_produces_readable_archive_and_reports_bytes() {
        let dir = tree();
        let exclude = ExcludeSet::new(Vec::<String>::new()).unwrap();
        let archive = SourceArchive::scan(dir.path(), &exclude).unwrap();

        let mut reports = Vec::new();
        let bytes = archive
            .write_to(Vec::new(), |done| reports.push(done))
            .unwrap();

        let names = unpacked_names(&bytes);
        assert!(names.contains(&"src/app.py".to_string()));
        assert!(!names.iter().any(|n| n.starts_with(".git")));
        assert_eq!(reports.last().copied(), Some(archive.total_bytes()));
        assert!(reports.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_same_tree_gives_same_archive() {
        let dir = tree();
        let exclude = ExcludeSet::new(Vec::<String>::new()).unwrap();
        let first = SourceArchive::scan(dir.path(), &exclude)
            .unwrap()
            .write_to(Vec::new(), |_| {})
            .unwrap();
        let second = SourceArchive::scan(dir.path(), &exclude)
            .unwrap()
            .write_to(Vec::new(), |_| {})
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let exclude = ExcludeSet::new(Vec::<String>::new()).unwrap();
        let err = SourceArchive::scan(Path::new("/nonexistent/launchpad"), &exclude).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
