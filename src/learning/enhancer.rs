//! Command enhancement via learned-context injection
//!
//! Gathers similar history, matching knowledge, frequent patterns, and a
//! next-command suggestion for a command, and injects them as a delimited
//! block right after the command text's first heading. The gather phase
//! runs under a latency budget: when exceeded, the original text comes
//! back unmodified rather than blocking the caller.

use lru::LruCache;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::EnhancerConfig;
use crate::error::Result;
use super::recognizer::{PatternRecognizer, Suggestion};
use super::store::{ExecutionOptions, LearningStore};
use super::Outcome;

/// Start/end markers for the injected block
pub const BLOCK_START: &str = "<!-- commandkit:context -->";
pub const BLOCK_END: &str = "<!-- /commandkit:context -->";

/// Result of an enhancement attempt
#[derive(Debug, Clone)]
pub struct Enhancement {
    /// The (possibly augmented) command text to display
    pub text: String,
    /// Execution id for later outcome reporting
    pub execution_id: i64,
    /// Whether context was actually injected
    pub enhanced: bool,
}

struct CachedBlock {
    block: String,
    stored_at: Instant,
}

/// Injects learned context into command text before display.
///
/// Construct one per process and pass it by reference; there is no shared
/// global instance.
pub struct CommandEnhancer {
    store: Arc<LearningStore>,
    recognizer: PatternRecognizer,
    max_latency: Duration,
    cache_ttl: Duration,
    cache: Mutex<LruCache<String, CachedBlock>>,
}

impl CommandEnhancer {
    pub fn new(store: Arc<LearningStore>, config: &EnhancerConfig) -> Self {
        let capacity = NonZeroUsize::new(config.cache_capacity.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            recognizer: PatternRecognizer::new(),
            max_latency: Duration::from_millis(config.max_latency_ms),
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Use a custom recognizer (e.g. a lower frequency floor)
    pub fn with_recognizer(mut self, recognizer: PatternRecognizer) -> Self {
        self.recognizer = recognizer;
        self
    }

    /// Record the execution and inject gathered context into `text`.
    ///
    /// The returned id is always valid for outcome reporting, even when
    /// the gather phase fell back and the text is unchanged. Recording the
    /// execution propagates errors; the gather phase never does.
    pub async fn enhance_command(
        &self,
        command: &str,
        parameters: Option<&Value>,
        text: &str,
    ) -> Result<Enhancement> {
        let params_text = parameters.map(serde_json::to_string).transpose()?;
        let execution_id = self
            .store
            .record_execution(command, parameters, "started", &Default::default())
            .await?;

        let cache_key = format!("{command}|{}", params_text.as_deref().unwrap_or(""));
        if let Some(block) = self.cached_block(&cache_key) {
            return Ok(Enhancement {
                text: inject_after_heading(text, &block),
                execution_id,
                enhanced: true,
            });
        }

        let store = Arc::clone(&self.store);
        let recognizer = self.recognizer.clone();
        let gather_command = command.to_string();
        let mut gather =
            tokio::spawn(async move { gather_context(store, recognizer, gather_command).await });

        match timeout(self.max_latency, &mut gather).await {
            Ok(Ok(Ok(Some(block)))) => {
                self.cache_block(cache_key, block.clone());
                Ok(Enhancement {
                    text: inject_after_heading(text, &block),
                    execution_id,
                    enhanced: true,
                })
            }
            Ok(Ok(Ok(None))) => Ok(Enhancement {
                text: text.to_string(),
                execution_id,
                enhanced: false,
            }),
            Ok(Ok(Err(err))) => {
                warn!("Context gather failed for {}: {}", command, err);
                Ok(Enhancement {
                    text: text.to_string(),
                    execution_id,
                    enhanced: false,
                })
            }
            Ok(Err(join_err)) => {
                warn!("Context gather task failed for {}: {}", command, join_err);
                Ok(Enhancement {
                    text: text.to_string(),
                    execution_id,
                    enhanced: false,
                })
            }
            Err(_) => {
                gather.abort();
                debug!(
                    "Context gather for {} exceeded {:?}, returning original text",
                    command, self.max_latency
                );
                Ok(Enhancement {
                    text: text.to_string(),
                    execution_id,
                    enhanced: false,
                })
            }
        }
    }

    /// Best-effort outcome reporting: failures are logged and swallowed,
    /// since this is telemetry rather than critical-path work.
    pub async fn report_outcome(&self, execution_id: i64, outcome: &str, options: &ExecutionOptions) {
        if let Err(err) = self.store.record_outcome(execution_id, outcome, options).await {
            warn!(
                "Failed to record outcome for execution {}: {}",
                execution_id, err
            );
        }
    }

    /// Best-effort observation of a completed command sequence
    pub async fn observe_sequence(&self, commands: &[String]) {
        if commands.len() < 2 {
            return;
        }
        let sequence = commands.join(",");
        if let Err(err) = self.store.record_pattern(&sequence).await {
            warn!("Failed to record pattern {}: {}", sequence, err);
        }
    }

    /// Suggest the next command for a recent run of successful commands
    /// (chronological order, oldest first)
    pub async fn get_suggestions(&self, recent_commands: &[String]) -> Result<Option<Suggestion>> {
        self.recognizer.suggest_next(&self.store, recent_commands).await
    }

    fn cached_block(&self, key: &str) -> Option<String> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let expired = match cache.get(key) {
            Some(cached) if cached.stored_at.elapsed() < self.cache_ttl => {
                return Some(cached.block.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            cache.pop(key);
        }
        None
    }

    fn cache_block(&self, key: String, block: String) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.put(
            key,
            CachedBlock {
                block,
                stored_at: Instant::now(),
            },
        );
    }
}

/// Run the four context sub-queries and format the block. Returns `None`
/// when there is nothing worth injecting.
async fn gather_context(
    store: Arc<LearningStore>,
    recognizer: PatternRecognizer,
    command: String,
) -> Result<Option<String>> {
    let history = store.get_recent_executions(Some(&command), 5).await?;
    let knowledge = store.search_knowledge(&command).await?;
    let patterns = store.get_frequent_patterns(3).await?;
    let patterns: Vec<_> = patterns
        .into_iter()
        .filter(|p| p.sequence.split(',').any(|step| step == command))
        .collect();

    let recent = store.get_recent_executions(None, 10).await?;
    let mut successful: Vec<String> = recent
        .into_iter()
        .filter(|r| r.outcome == Some(Outcome::Success))
        .map(|r| r.command)
        .take(3)
        .collect();
    successful.reverse(); // recognizer wants chronological order
    let suggestion = recognizer.suggest_next(&store, &successful).await?;

    if history.is_empty() && knowledge.is_empty() && patterns.is_empty() && suggestion.is_none() {
        return Ok(None);
    }

    let mut block = String::new();
    block.push_str(BLOCK_START);
    block.push_str("\n## Learned context\n");

    if !history.is_empty() {
        block.push_str("\n**Recent runs:**\n");
        for record in &history {
            let outcome = record
                .outcome
                .map(|o| o.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            block.push_str(&format!(
                "- {} {} ({})",
                record.timestamp.format("%Y-%m-%d %H:%M"),
                outcome,
                record
                    .duration_ms
                    .map(|ms| format!("{ms}ms"))
                    .unwrap_or_else(|| "duration unknown".to_string()),
            ));
            if let Some(error) = &record.error_message {
                block.push_str(&format!(" — {error}"));
            }
            block.push('\n');
        }
    }

    if !knowledge.is_empty() {
        block.push_str("\n**Knowledge:**\n");
        for entry in knowledge.iter().take(5) {
            block.push_str(&format!("- {}: {}\n", entry.key, entry.value));
        }
    }

    if !patterns.is_empty() {
        block.push_str("\n**Frequent patterns:**\n");
        for pattern in patterns.iter().take(5) {
            block.push_str(&format!("- {} (seen {}x)\n", pattern.sequence, pattern.frequency));
        }
    }

    if let Some(suggestion) = &suggestion {
        block.push_str(&format!(
            "\n**Suggested next:** {} (confidence {:.2})\n",
            suggestion.next_command, suggestion.confidence
        ));
    }

    block.push_str(BLOCK_END);
    Ok(Some(block))
}

/// Insert `block` immediately after the first markdown heading line, or
/// append it when the text has no heading.
fn inject_after_heading(text: &str, block: &str) -> String {
    let mut lines: Vec<&str> = text.lines().collect();
    match lines.iter().position(|line| line.trim_start().starts_with('#')) {
        Some(index) => {
            lines.insert(index + 1, "");
            lines.insert(index + 2, block);
            let mut result = lines.join("\n");
            if text.ends_with('\n') {
                result.push('\n');
            }
            result
        }
        None => {
            let mut result = text.to_string();
            if !result.is_empty() && !result.ends_with('\n') {
                result.push('\n');
            }
            result.push('\n');
            result.push_str(block);
            result.push('\n');
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnhancerConfig;
    use serde_json::json;
    use tempfile::tempdir;

    async fn populated_store(dir: &tempfile::TempDir) -> Arc<LearningStore> {
        let store = Arc::new(LearningStore::open(dir.path().join("test.db")).await.unwrap());
        store
            .record_execution(
                "/fix",
                None,
                "failure",
                &ExecutionOptions {
                    error_message: Some("borrow checker".into()),
                    duration_ms: Some(1200),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store.add_knowledge("/fix-tips", "run clippy first", Some("rust")).await.unwrap();
        for _ in 0..4 {
            store.record_pattern("/fix,/test").await.unwrap();
        }
        store
    }

    fn enhancer(store: Arc<LearningStore>) -> CommandEnhancer {
        CommandEnhancer::new(store, &EnhancerConfig::default())
    }

    #[tokio::test]
    async fn test_injects_after_first_heading() {
        let dir = tempdir().unwrap();
        let store = populated_store(&dir).await;
        let enhancer = enhancer(Arc::clone(&store));

        let text = "# /fix\n\nFix the thing.\n";
        let result = enhancer.enhance_command("/fix", None, text).await.unwrap();

        assert!(result.enhanced);
        assert!(result.execution_id > 0);
        let heading_pos = result.text.find("# /fix").unwrap();
        let block_pos = result.text.find(BLOCK_START).unwrap();
        let body_pos = result.text.find("Fix the thing.").unwrap();
        assert!(heading_pos < block_pos && block_pos < body_pos);
        assert!(result.text.contains("borrow checker"));
        assert!(result.text.contains("run clippy first"));
        assert!(result.text.contains("/fix,/test (seen 4x)"));
        assert!(result.text.contains(BLOCK_END));
    }

    #[tokio::test]
    async fn test_appends_block_without_heading() {
        let dir = tempdir().unwrap();
        let store = populated_store(&dir).await;
        let enhancer = enhancer(store);

        let result = enhancer
            .enhance_command("/fix", None, "no heading here")
            .await
            .unwrap();
        assert!(result.enhanced);
        assert!(result.text.starts_with("no heading here\n"));
        assert!(result.text.contains(BLOCK_START));
    }

    #[tokio::test]
    async fn test_empty_store_leaves_text_unchanged() {
        let dir = tempdir().unwrap();
        let store = Arc::new(LearningStore::open(dir.path().join("test.db")).await.unwrap());
        let enhancer = enhancer(store);

        let text = "# /new\n\nBody.\n";
        let result = enhancer.enhance_command("/new", None, text).await.unwrap();
        assert!(!result.enhanced);
        assert_eq!(result.text, text);
        // The execution itself is still recorded
        assert!(result.execution_id > 0);
    }

    #[tokio::test]
    async fn test_latency_budget_falls_back_to_original() {
        // Single-threaded test runtime: the spawned gather task cannot run
        // before the zero-budget timeout fires, so the fallback is taken
        let dir = tempdir().unwrap();
        let store = populated_store(&dir).await;
        let config = EnhancerConfig {
            max_latency_ms: 0,
            ..Default::default()
        };
        let enhancer = CommandEnhancer::new(store, &config);

        let text = "# /fix\n\nFix the thing.\n";
        let result = enhancer.enhance_command("/fix", None, text).await.unwrap();
        assert!(!result.enhanced);
        assert_eq!(result.text, text);
        assert!(result.execution_id > 0);
    }

    #[tokio::test]
    async fn test_closed_store_is_a_hard_error() {
        let dir = tempdir().unwrap();
        let store = populated_store(&dir).await;
        let enhancer = enhancer(Arc::clone(&store));

        let id = store
            .record_execution("/fix", None, "started", &Default::default())
            .await
            .unwrap();
        assert!(id > 0);
        store.close().await;

        let text = "# /fix\n";
        let result = enhancer.enhance_command("/fix", None, text).await;
        // record_execution on a closed store is a hard error, per contract
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_cache_serves_stale_block_within_ttl() {
        let dir = tempdir().unwrap();
        let store = populated_store(&dir).await;
        let enhancer = enhancer(Arc::clone(&store));
        let params = json!({"scope": "all"});

        let first = enhancer
            .enhance_command("/fix", Some(&params), "# /fix\n")
            .await
            .unwrap();
        let first_block = extract_block(&first.text);

        // New knowledge would change a fresh gather, but the cache holds
        store.add_knowledge("/fix-extra", "new tip", None).await.unwrap();
        let second = enhancer
            .enhance_command("/fix", Some(&params), "# /fix\n")
            .await
            .unwrap();
        assert_eq!(extract_block(&second.text), first_block);

        // Different parameters miss the cache and see the new entry
        let other = enhancer
            .enhance_command("/fix", Some(&json!({"scope": "one"})), "# /fix\n")
            .await
            .unwrap();
        assert!(extract_block(&other.text).contains("new tip"));
    }

    #[tokio::test]
    async fn test_report_outcome_best_effort() {
        let dir = tempdir().unwrap();
        let store = populated_store(&dir).await;
        let enhancer = enhancer(Arc::clone(&store));

        let result = enhancer.enhance_command("/fix", None, "# /fix\n").await.unwrap();
        enhancer
            .report_outcome(
                result.execution_id,
                "success",
                &ExecutionOptions {
                    duration_ms: Some(88),
                    ..Default::default()
                },
            )
            .await;

        let recent = store.get_recent_executions(Some("/fix"), 1).await.unwrap();
        assert_eq!(recent[0].outcome, Some(Outcome::Success));

        // Invalid outcome is swallowed, not panicked on
        enhancer.report_outcome(result.execution_id, "bogus", &Default::default()).await;
    }

    #[tokio::test]
    async fn test_observe_sequence_records_pattern() {
        let dir = tempdir().unwrap();
        let store = Arc::new(LearningStore::open(dir.path().join("test.db")).await.unwrap());
        let enhancer = enhancer(Arc::clone(&store));

        enhancer.observe_sequence(&["/fix".into(), "/test".into()]).await;
        enhancer.observe_sequence(&["/fix".into(), "/test".into()]).await;
        enhancer.observe_sequence(&["/solo".into()]).await; // too short, ignored

        let patterns = store.get_frequent_patterns(1).await.unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].frequency, 2);
    }

    #[tokio::test]
    async fn test_suggestions_passthrough() {
        let dir = tempdir().unwrap();
        let store = populated_store(&dir).await;
        let enhancer = enhancer(store);

        let suggestion = enhancer
            .get_suggestions(&["/fix".into()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(suggestion.next_command, "/test");
    }

    fn extract_block(text: &str) -> String {
        let start = text.find(BLOCK_START).unwrap();
        let end = text.find(BLOCK_END).unwrap();
        text[start..end].to_string()
    }

    #[test]
    fn test_inject_preserves_trailing_newline() {
        let out = inject_after_heading("# H\nbody\n", "BLOCK");
        assert!(out.ends_with('\n'));
        assert_eq!(out, "# H\n\nBLOCK\nbody\n");
    }
}
