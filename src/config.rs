//! Configuration management
//!
//! Manages commandkit configuration: learning store location and retention,
//! path-resolver cache behavior, and command-enhancer latency/cache budgets.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Learning store settings
    #[serde(default)]
    pub store: StoreConfig,
    /// Repository path resolver settings
    #[serde(default)]
    pub resolver: ResolverConfig,
    /// Command enhancer settings
    #[serde(default)]
    pub enhancer: EnhancerConfig,
}

/// Learning store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file (defaults under the platform data dir)
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Days to keep executions and patterns before retention cleanup
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

/// Repository path resolver settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// How long a resolved repo root stays cached, in seconds
    #[serde(default = "default_root_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

/// Command enhancer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancerConfig {
    /// Latency budget for the context gather phase, in milliseconds.
    /// When exceeded, the original command text is returned unmodified.
    #[serde(default = "default_max_latency_ms")]
    pub max_latency_ms: u64,
    /// How long a gathered context block stays cached, in seconds
    #[serde(default = "default_context_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Maximum number of cached context blocks (oldest evicted first)
    #[serde(default = "default_context_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_database_path() -> PathBuf {
    data_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("learning")
        .join("commandkit.db")
}

fn default_retention_days() -> u32 {
    90
}

fn default_root_cache_ttl_secs() -> u64 {
    300
}

fn default_max_latency_ms() -> u64 {
    200
}

fn default_context_cache_ttl_secs() -> u64 {
    300
}

fn default_context_cache_capacity() -> usize {
    64
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            retention_days: default_retention_days(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_root_cache_ttl_secs(),
        }
    }
}

impl Default for EnhancerConfig {
    fn default() -> Self {
        Self {
            max_latency_ms: default_max_latency_ms(),
            cache_ttl_secs: default_context_cache_ttl_secs(),
            cache_capacity: default_context_cache_capacity(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            resolver: ResolverConfig::default(),
            enhancer: EnhancerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file, creating a default one if missing
    pub fn load() -> Result<Self> {
        let config_path = config_path()?;

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .context("Failed to read config file")?;
            let config: Config = toml::from_str(&contents)
                .context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = config_path()?;
        let parent = config_path.parent()
            .context("Config path has no parent")?;

        std::fs::create_dir_all(parent)
            .context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "commandkit", "commandkit")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "commandkit", "commandkit")
        .context("Failed to get project directories")?;
    Ok(base.data_dir().to_path_buf())
}
