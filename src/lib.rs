//! commandkit - repository-aware path resolution and execution learning
//!
//! Support library for slash-command tooling:
//! - Repository root detection with override and fallback semantics
//! - Logical output paths ("prds", "tests", ...) resolved per project
//! - A SQLite-backed log of command executions, sequence patterns, and
//!   curated knowledge
//! - Context injection that augments command text with learned history
//!
//! # Example
//!
//! ```ignore
//! use commandkit::{Config, CommandEnhancer, LearningStore, PathResolver};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let resolver = PathResolver::new();
//!     let prds = resolver.ensure_directory("prds", None)?;
//!
//!     let store = Arc::new(LearningStore::open(&config.store.database_path).await?);
//!     let enhancer = CommandEnhancer::new(store, &config.enhancer);
//!     let enhanced = enhancer.enhance_command("/fix", None, "# /fix\n").await?;
//!     println!("{} -> {}", prds.display(), enhanced.execution_id);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod paths;
pub mod learning;
pub mod cli;

// Re-export commonly used types for convenience
pub use config::Config;
pub use error::{Error, Result};

pub use paths::{PathResolver, RepoDetector, RepoRoot, RootSource};

pub use learning::{
    CommandEnhancer,
    CommandStats,
    Enhancement,
    ExecutionOptions,
    ExecutionRecord,
    KnowledgeEntry,
    LearningStore,
    Outcome,
    PatternRecognizer,
    PatternRecord,
    Suggestion,
};
