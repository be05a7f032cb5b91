//! Logical path resolution relative to the repository root
//!
//! Resolves named output locations ("prds", "tests", ...) against the repo
//! root, honoring an environment-variable root override, a `.claude-paths.json`
//! override file at the root, and programmatic overrides. Root resolution is
//! memoized per starting directory with a TTL so repeated lookups from the
//! same place skip the filesystem walk.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use super::detector::{normalize_start, RepoDetector};
use super::{RepoRoot, RootSource};

/// Environment variable that overrides repo-root detection unconditionally
pub const OUTPUT_ROOT_ENV: &str = "CLAUDE_OUTPUT_ROOT";

/// Per-project override file at the repository root
pub const OVERRIDES_FILENAME: &str = ".claude-paths.json";

/// The closed set of logical names and their default relative paths
const DEFAULT_PATHS: &[(&str, &str)] = &[
    ("prds", "docs/prds"),
    ("prd_workspace", ".claude/prd-workspace"),
    ("docs", "docs"),
    ("tests", "tests"),
    ("lib", "lib"),
    ("commands", "commands"),
    ("hooks", "hooks"),
    ("system", "system"),
];

fn default_relative_path(name: &str) -> Option<&'static str> {
    DEFAULT_PATHS
        .iter()
        .find(|(logical, _)| *logical == name)
        .map(|(_, rel)| *rel)
}

struct CacheEntry {
    result: RepoRoot,
    computed_at: Instant,
}

/// Resolves logical output paths against a cached repository root.
///
/// Resolution never fails for environmental reasons: no repo means the
/// starting directory is used, a broken override file means defaults.
/// Only an unknown logical name is an error.
pub struct PathResolver {
    detector: RepoDetector,
    env_var: String,
    cache_ttl: Duration,
    root_cache: Mutex<HashMap<PathBuf, CacheEntry>>,
    project_overrides: Mutex<HashMap<PathBuf, HashMap<String, String>>>,
    manual_overrides: Mutex<HashMap<String, String>>,
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl PathResolver {
    /// Create a resolver with the default 300 second root cache TTL
    pub fn new() -> Self {
        Self {
            detector: RepoDetector::new(),
            env_var: OUTPUT_ROOT_ENV.to_string(),
            cache_ttl: Duration::from_secs(300),
            root_cache: Mutex::new(HashMap::new()),
            project_overrides: Mutex::new(HashMap::new()),
            manual_overrides: Mutex::new(HashMap::new()),
        }
    }

    /// Set the root cache TTL
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Use a different environment variable for the root override
    pub fn with_env_var(mut self, name: impl Into<String>) -> Self {
        self.env_var = name.into();
        self
    }

    /// Use a custom detector (e.g. with a test-scoped walk boundary)
    pub fn with_detector(mut self, detector: RepoDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Access the underlying detector
    pub fn detector(&self) -> &RepoDetector {
        &self.detector
    }

    /// The logical names this resolver understands
    pub fn logical_names() -> impl Iterator<Item = &'static str> {
        DEFAULT_PATHS.iter().map(|(name, _)| *name)
    }

    /// Resolve the repository root for `start`, never failing.
    ///
    /// Order: environment override (if it names an existing directory),
    /// then version-control detection, then the starting directory itself.
    /// The result is cached per canonicalized starting directory for the
    /// configured TTL; the environment variable is re-read on every cache
    /// miss rather than cached on its own.
    pub fn resolve_root_with_override(&self, start: Option<&Path>) -> RepoRoot {
        let start = normalize_start(start);

        {
            let cache = lock(&self.root_cache);
            if let Some(entry) = cache.get(&start) {
                if entry.computed_at.elapsed() < self.cache_ttl {
                    return entry.result.clone();
                }
            }
        }

        let result = self.compute_root(&start);
        lock(&self.root_cache).insert(
            start,
            CacheEntry {
                result: result.clone(),
                computed_at: Instant::now(),
            },
        );
        result
    }

    fn compute_root(&self, start: &Path) -> RepoRoot {
        if let Some(value) = std::env::var_os(&self.env_var) {
            let override_path = PathBuf::from(&value);
            if override_path.is_dir() {
                let path = std::fs::canonicalize(&override_path).unwrap_or(override_path);
                debug!("Using {} override: {}", self.env_var, path.display());
                return RepoRoot {
                    path,
                    source: RootSource::OverrideEnv,
                };
            }
            warn!(
                "{} set but not an existing directory: {}",
                self.env_var,
                override_path.display()
            );
        }

        if let Some(root) = self.detector.find_repo_root(Some(start)) {
            return root;
        }

        debug!(
            "No repository found above {}, falling back to it",
            start.display()
        );
        RepoRoot {
            path: start.to_path_buf(),
            source: RootSource::FallbackCwd,
        }
    }

    /// Drop all cached roots and override files immediately
    pub fn invalidate_cache(&self) {
        lock(&self.root_cache).clear();
        lock(&self.project_overrides).clear();
    }

    /// Resolve a logical name to an absolute path under the repo root.
    ///
    /// Override precedence: programmatic override, then the project's
    /// `.claude-paths.json`, then the built-in default table. The directory
    /// is not created; see [`ensure_directory`](Self::ensure_directory).
    pub fn resolve_logical_path(&self, name: &str, start: Option<&Path>) -> Result<PathBuf> {
        let default_rel = default_relative_path(name)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown logical path name: {name}")))?;

        let root = self.resolve_root_with_override(start);
        let project = self.load_project_overrides(&root.path);

        let rel = lock(&self.manual_overrides)
            .get(name)
            .cloned()
            .or_else(|| project.get(name).cloned())
            .unwrap_or_else(|| default_rel.to_string());

        let resolved = root.path.join(rel);
        debug!("Resolved {} to {}", name, resolved.display());
        Ok(resolved)
    }

    /// Resolve a logical name and create the directory if missing (idempotent)
    pub fn ensure_directory(&self, name: &str, start: Option<&Path>) -> Result<PathBuf> {
        let dir = self.resolve_logical_path(name, start)?;
        std::fs::create_dir_all(&dir)?;
        debug!("Ensured directory exists: {}", dir.display());
        Ok(dir)
    }

    /// Resolve a logical name and append a filename
    pub fn resolve_file(&self, name: &str, filename: &str, start: Option<&Path>) -> Result<PathBuf> {
        Ok(self.resolve_logical_path(name, start)?.join(filename))
    }

    /// Path for a PRD document, optionally date-prefixed (`YYYY-MM-DD-<slug>.md`)
    pub fn prd_path(&self, slug: &str, date_prefix: bool, start: Option<&Path>) -> Result<PathBuf> {
        let filename = if date_prefix {
            format!("{}-{}.md", Utc::now().format("%Y-%m-%d"), slug)
        } else {
            format!("{slug}.md")
        };
        self.resolve_file("prds", &filename, start)
    }

    /// Path for a feature's PRD workspace directory
    pub fn workspace_path(&self, slug: &str, start: Option<&Path>) -> Result<PathBuf> {
        self.resolve_file("prd_workspace", slug, start)
    }

    /// Set a programmatic override for a logical name (takes precedence
    /// over the project override file)
    pub fn set_override(&self, name: &str, relative_path: &str) {
        info!("Set path override for {}: {}", name, relative_path);
        lock(&self.manual_overrides).insert(name.to_string(), relative_path.to_string());
    }

    /// Clear all programmatic overrides
    pub fn clear_overrides(&self) {
        lock(&self.manual_overrides).clear();
    }

    /// Format "created/updated" lines for the caller to print, preferring
    /// repo-relative paths when a path sits under the resolved root
    pub fn format_output_message(&self, paths: &[(&str, &Path)], start: Option<&Path>) -> String {
        let root = self.resolve_root_with_override(start);
        paths
            .iter()
            .map(|(desc, path)| match path.strip_prefix(&root.path) {
                Ok(rel) => format!("✓ {}: {}", desc, rel.display()),
                Err(_) => format!("✓ {}: {}", desc, path.display()),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Load `.claude-paths.json` from the repo root, once per root.
    ///
    /// Missing or malformed files degrade to the defaults with a warning;
    /// unknown keys are ignored, not errors.
    fn load_project_overrides(&self, root: &Path) -> HashMap<String, String> {
        {
            let cache = lock(&self.project_overrides);
            if let Some(loaded) = cache.get(root) {
                return loaded.clone();
            }
        }

        let overrides = read_overrides_file(&root.join(OVERRIDES_FILENAME));
        lock(&self.project_overrides).insert(root.to_path_buf(), overrides.clone());
        overrides
    }
}

fn read_overrides_file(path: &Path) -> HashMap<String, String> {
    let mut overrides = HashMap::new();

    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(_) => {
            debug!("No project overrides found at {}", path.display());
            return overrides;
        }
    };

    let parsed: Value = match serde_json::from_str(&contents) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!("Failed to parse {}: {}", path.display(), err);
            return overrides;
        }
    };

    let Some(object) = parsed.as_object() else {
        warn!("Project overrides at {} are not a JSON object", path.display());
        return overrides;
    };

    for (key, value) in object {
        if default_relative_path(key).is_none() {
            warn!("Unknown path type in overrides: {}", key);
            continue;
        }
        match value.as_str() {
            Some(rel) => {
                info!("Loaded project override for {}: {}", key, rel);
                overrides.insert(key.clone(), rel.to_string());
            }
            None => warn!("Override for {} is not a string, ignoring", key),
        }
    }

    overrides
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
