//! Execution learning module
//!
//! Provides:
//! - SQLite-based persistence for command executions, sequence patterns,
//!   and curated knowledge entries
//! - Recency and keyword queries sized for interactive use
//! - Frequency-based next-command suggestions
//! - Context injection into command text before display

pub mod store;
pub mod recognizer;
pub mod enhancer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::Error;

pub use store::{CommandStats, ExecutionOptions, LearningStore};
pub use recognizer::{PatternRecognizer, Suggestion};
pub use enhancer::{CommandEnhancer, Enhancement};

/// Final (or initial) state of a recorded command execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
    Partial,
    /// Recorded at command start, before the outcome is known
    Started,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Failure => write!(f, "failure"),
            Outcome::Partial => write!(f, "partial"),
            Outcome::Started => write!(f, "started"),
        }
    }
}

impl FromStr for Outcome {
    type Err = Error;

    /// No silent coercion: anything outside the four values is rejected
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Outcome::Success),
            "failure" => Ok(Outcome::Failure),
            "partial" => Ok(Outcome::Partial),
            "started" => Ok(Outcome::Started),
            other => Err(Error::InvalidOutcome(other.to_string())),
        }
    }
}

/// A single logged command invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Row id assigned on insert
    pub id: i64,
    /// Command name (e.g. "/fix")
    pub command: String,
    /// Caller-defined parameters, serialized to JSON text. Opaque: callers
    /// pass arbitrary shapes and only a text round-trip is guaranteed.
    pub parameters: Option<String>,
    /// When the execution was recorded
    pub timestamp: DateTime<Utc>,
    /// Duration in milliseconds, once known
    pub duration_ms: Option<i64>,
    /// Outcome, if one has been recorded
    pub outcome: Option<Outcome>,
    /// Error message for failed executions
    pub error_message: Option<String>,
    /// Free-form feedback supplied by the user
    pub user_feedback: Option<String>,
    /// Project the command ran in
    pub project_context: Option<String>,
}

/// An observed ordered sequence of command names, counted by frequency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRecord {
    pub id: i64,
    /// Canonical comma-joined ordered list of command names (unique)
    pub sequence: String,
    /// How many times the sequence has been observed
    pub frequency: u32,
    /// When the sequence was last observed
    pub last_seen: DateTime<Utc>,
    /// Optional command suggested when this pattern matches
    pub suggested_command: Option<String>,
}

/// An operator-curated key/value note, surfaced by keyword match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: i64,
    /// Unique lookup key
    pub key: String,
    pub value: String,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Incremented on every upsert and every read-through lookup
    pub usage_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_round_trip() {
        for s in ["success", "failure", "partial", "started"] {
            assert_eq!(Outcome::from_str(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn test_outcome_rejects_unknown() {
        assert!(matches!(
            Outcome::from_str("bogus-outcome"),
            Err(Error::InvalidOutcome(_))
        ));
        // Case matters: no silent coercion
        assert!(Outcome::from_str("Success").is_err());
    }
}
