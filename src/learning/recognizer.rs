//! Frequency-based next-command suggestions
//!
//! Matches a short run of recently successful commands against the stored
//! frequent patterns and suggests the command that would extend the best
//! match. Purely a frequency heuristic, not a statistical model.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use super::store::LearningStore;
use super::PatternRecord;

/// A suggested next command with a heuristic confidence score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    /// The command that would extend the matched pattern
    pub next_command: String,
    /// Matched pattern frequency divided by the number of distinct patterns
    /// sharing the prefix, capped at 1.0. A normalized-frequency ratio, not
    /// a calibrated probability.
    pub confidence: f64,
    /// The full matched pattern sequence
    pub pattern: String,
}

/// Suggests the next command from observed frequent sequences.
///
/// Input sequences are expected in chronological order (oldest first).
#[derive(Debug, Clone)]
pub struct PatternRecognizer {
    min_frequency: u32,
}

impl Default for PatternRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternRecognizer {
    /// Recognizer that only considers patterns seen at least 3 times
    pub fn new() -> Self {
        Self { min_frequency: 3 }
    }

    /// Lower or raise the frequency floor for candidate patterns
    pub fn with_min_frequency(mut self, min_frequency: u32) -> Self {
        self.min_frequency = min_frequency.max(1);
        self
    }

    /// Suggest a command that would extend the recent run, if a known
    /// frequent pattern starts with it.
    pub async fn suggest_next(
        &self,
        store: &LearningStore,
        recent_commands: &[String],
    ) -> Result<Option<Suggestion>> {
        if recent_commands.is_empty() {
            return Ok(None);
        }

        let prefix = recent_commands.join(",");
        let extension_prefix = format!("{prefix},");

        let patterns = store.get_frequent_patterns(self.min_frequency).await?;
        let sharing_prefix: Vec<&PatternRecord> = patterns
            .iter()
            .filter(|p| p.sequence == prefix || p.sequence.starts_with(&extension_prefix))
            .collect();

        // Patterns arrive ordered by frequency then recency, so the first
        // extension match is the best one
        let Some(best) = sharing_prefix
            .iter()
            .find(|p| p.sequence.starts_with(&extension_prefix))
        else {
            return Ok(None);
        };

        let remainder = &best.sequence[extension_prefix.len()..];
        let Some(next_command) = remainder.split(',').next().filter(|c| !c.is_empty()) else {
            return Ok(None);
        };

        let confidence =
            (best.frequency as f64 / sharing_prefix.len() as f64).min(1.0);

        Ok(Some(Suggestion {
            next_command: next_command.to_string(),
            confidence,
            pattern: best.sequence.clone(),
        }))
    }
}
