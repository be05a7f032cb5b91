//! Repository root detection via upward directory traversal

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::{RepoRoot, RootSource};

/// Detects the nearest version-control root above a starting directory.
///
/// The walk checks each ancestor for a `.git` entry. Both directories and
/// plain files count as markers (submodules and linked worktrees use a
/// `.git` redirect file). The walk stops at the filesystem root or at the
/// configured boundary (the user's home directory by default), whichever
/// comes first; the boundary directory itself is still checked.
pub struct RepoDetector {
    boundary: Option<PathBuf>,
    probes: AtomicU64,
}

impl Default for RepoDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl RepoDetector {
    /// Create a detector bounded at the user's home directory
    pub fn new() -> Self {
        Self {
            boundary: dirs::home_dir(),
            probes: AtomicU64::new(0),
        }
    }

    /// Create a detector with a custom walk boundary
    pub fn with_boundary(boundary: impl Into<PathBuf>) -> Self {
        let boundary = boundary.into();
        // Canonicalize so boundary comparison matches the canonicalized walk
        let boundary = std::fs::canonicalize(&boundary).unwrap_or(boundary);
        Self {
            boundary: Some(boundary),
            probes: AtomicU64::new(0),
        }
    }

    /// Number of filesystem marker probes performed so far.
    ///
    /// Cache hits in the resolver bypass the detector entirely, so a stable
    /// probe count across calls shows the cache is doing its job.
    pub fn probe_count(&self) -> u64 {
        self.probes.load(Ordering::Relaxed)
    }

    /// Find the repository root above `start` (current directory if `None`).
    ///
    /// Returns `None` when no marker is found before the walk boundary.
    /// Unreadable intermediate directories are treated as unmarked and the
    /// walk continues; this never returns an error.
    pub fn find_repo_root(&self, start: Option<&Path>) -> Option<RepoRoot> {
        let start = normalize_start(start);
        let mut current = start.as_path();

        loop {
            if self.has_vcs_marker(current) {
                debug!("Found repo root via traversal: {}", current.display());
                return Some(RepoRoot {
                    path: current.to_path_buf(),
                    source: RootSource::DetectedVcs,
                });
            }

            if self.boundary.as_deref() == Some(current) {
                debug!("Reached walk boundary without a marker: {}", current.display());
                return None;
            }

            match current.parent() {
                Some(parent) => current = parent,
                None => return None,
            }
        }
    }

    /// Whether the given path (or current directory) is inside a repository
    pub fn is_in_repo(&self, start: Option<&Path>) -> bool {
        self.find_repo_root(start).is_some()
    }

    fn has_vcs_marker(&self, dir: &Path) -> bool {
        self.probes.fetch_add(1, Ordering::Relaxed);
        // Permission errors and dangling entries read as "no marker here"
        match std::fs::symlink_metadata(dir.join(".git")) {
            Ok(meta) => meta.is_dir() || meta.is_file(),
            Err(_) => false,
        }
    }
}

/// Canonicalize the starting directory, falling back to the path as given
/// (or `.`) when canonicalization fails.
pub(crate) fn normalize_start(start: Option<&Path>) -> PathBuf {
    let raw = match start {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };
    std::fs::canonicalize(&raw).unwrap_or(raw)
}
