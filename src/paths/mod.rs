//! Repository-aware path resolution
//!
//! Provides:
//! - Version-control root detection with an upward `.git` walk
//! - Environment-variable and per-project override handling
//! - Logical output names ("prds", "tests", ...) resolved to absolute paths
//! - TTL-cached root resolution that never blocks a command on a missing repo
//!
//! Resolution never hard-fails: missing markers, unreadable directories, and
//! malformed override files all degrade to documented fallbacks. The only
//! error surface is an unknown logical name.

pub mod detector;
pub mod resolver;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use detector::RepoDetector;
pub use resolver::PathResolver;

/// Where a resolved repository root came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootSource {
    /// Environment variable pointed at an existing directory
    OverrideEnv,
    /// A project override file supplied the root
    OverrideProjectFile,
    /// Found a version-control marker by walking upward
    DetectedVcs,
    /// No marker anywhere; fell back to the starting directory
    FallbackCwd,
}

impl std::fmt::Display for RootSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RootSource::OverrideEnv => write!(f, "override_env"),
            RootSource::OverrideProjectFile => write!(f, "override_project_file"),
            RootSource::DetectedVcs => write!(f, "detected_vcs"),
            RootSource::FallbackCwd => write!(f, "fallback_cwd"),
        }
    }
}

/// A resolved repository root, tagged with how it was found.
///
/// The `source` tag lets callers warn the user about fallbacks ("not in a
/// repository, using current directory") without the resolver printing
/// anything itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRoot {
    /// Absolute path to an existing directory
    pub path: PathBuf,
    /// How this root was determined
    pub source: RootSource,
}
