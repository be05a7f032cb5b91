//! SQLite-backed persistent store for executions, patterns, and knowledge

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use super::{ExecutionRecord, KnowledgeEntry, Outcome, PatternRecord};

/// Optional fields attached to an execution at record or outcome time
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub user_feedback: Option<String>,
    pub project_context: Option<String>,
}

/// Aggregated execution metrics for one command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandStats {
    pub command: String,
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub avg_duration_ms: Option<f64>,
    pub min_duration_ms: Option<i64>,
    pub max_duration_ms: Option<i64>,
}

impl CommandStats {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.total as f64
        }
    }
}

/// Durable append-mostly log of command executions, frequency-counted
/// sequence patterns, and a curated knowledge base.
///
/// Designed for interactive CLI use: a single file-backed SQLite database
/// with indexes sized for hundreds to low-thousands of rows. SQLite's own
/// locking is the only cross-process concurrency guard; all upserts are
/// single atomic statements so concurrent writers cannot race a unique key
/// into duplicate rows.
#[derive(Clone)]
pub struct LearningStore {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl LearningStore {
    /// Open (or create) the store at the given path.
    ///
    /// Schema creation is idempotent: opening an existing database never
    /// drops data. Failures here are fatal; a non-functioning store cannot
    /// silently degrade.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let conn = Connection::open(&path)?;

        // WAL mode for better concurrent-reader behavior
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                command TEXT NOT NULL,
                parameters TEXT,
                timestamp TEXT NOT NULL,
                duration_ms INTEGER,
                outcome TEXT,
                error_message TEXT,
                user_feedback TEXT,
                project_context TEXT
            );

            CREATE TABLE IF NOT EXISTS patterns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sequence TEXT NOT NULL UNIQUE,
                frequency INTEGER NOT NULL DEFAULT 1,
                last_seen TEXT NOT NULL,
                suggested_command TEXT
            );

            CREATE TABLE IF NOT EXISTS knowledge (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL UNIQUE,
                value TEXT NOT NULL,
                category TEXT,
                created_at TEXT NOT NULL,
                usage_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_executions_command ON executions(command);
            CREATE INDEX IF NOT EXISTS idx_executions_timestamp ON executions(timestamp);
            CREATE INDEX IF NOT EXISTS idx_patterns_frequency ON patterns(frequency);
        "#,
        )?;

        Ok(())
    }

    /// Record a new execution; returns the assigned id.
    ///
    /// `outcome` must be one of success/failure/partial/started or the call
    /// fails with [`Error::InvalidOutcome`] and nothing is persisted.
    /// `parameters` of `None` stays SQL NULL, not the string "null".
    pub async fn record_execution(
        &self,
        command: &str,
        parameters: Option<&serde_json::Value>,
        outcome: &str,
        options: &ExecutionOptions,
    ) -> Result<i64> {
        let outcome = Outcome::from_str(outcome)?;
        let parameters = parameters.map(serde_json::to_string).transpose()?;

        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(Error::StoreClosed)?;

        conn.execute(
            r#"INSERT INTO executions
               (command, parameters, timestamp, duration_ms, outcome,
                error_message, user_feedback, project_context)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            params![
                command,
                parameters,
                now_stamp(),
                options.duration_ms,
                outcome.to_string(),
                options.error_message,
                options.user_feedback,
                options.project_context,
            ],
        )?;

        let id = conn.last_insert_rowid();
        debug!("Recorded execution {} for {}", id, command);
        Ok(id)
    }

    /// Update outcome/duration/error/feedback on an existing execution.
    ///
    /// A missing id is a no-op, not an error: outcome reporting is
    /// best-effort telemetry. The outcome string is still validated.
    pub async fn record_outcome(
        &self,
        id: i64,
        outcome: &str,
        options: &ExecutionOptions,
    ) -> Result<()> {
        let outcome = Outcome::from_str(outcome)?;

        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(Error::StoreClosed)?;

        let updated = conn.execute(
            r#"UPDATE executions SET
                 outcome = ?1,
                 duration_ms = COALESCE(?2, duration_ms),
                 error_message = COALESCE(?3, error_message),
                 user_feedback = COALESCE(?4, user_feedback),
                 project_context = COALESCE(?5, project_context)
               WHERE id = ?6"#,
            params![
                outcome.to_string(),
                options.duration_ms,
                options.error_message,
                options.user_feedback,
                options.project_context,
                id,
            ],
        )?;

        if updated == 0 {
            debug!("record_outcome for unknown execution {}, ignoring", id);
        }
        Ok(())
    }

    /// Most recent executions, newest first, optionally filtered to one command
    pub async fn get_recent_executions(
        &self,
        command: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(Error::StoreClosed)?;

        let records = match command {
            Some(command) => {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, command, parameters, timestamp, duration_ms, outcome,
                            error_message, user_feedback, project_context
                     FROM executions WHERE command = ?1
                     ORDER BY timestamp DESC, id DESC LIMIT ?2",
                )?;
                let records = stmt
                    .query_map(params![command, limit as i64], execution_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                records
            }
            None => {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, command, parameters, timestamp, duration_ms, outcome,
                            error_message, user_feedback, project_context
                     FROM executions
                     ORDER BY timestamp DESC, id DESC LIMIT ?1",
                )?;
                let records = stmt
                    .query_map(params![limit as i64], execution_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                records
            }
        };

        Ok(records)
    }

    /// Executions whose command, serialized parameters, or error message
    /// contains ANY of the whitespace-separated keywords as a case-sensitive
    /// substring. Newest first.
    ///
    /// This is a deliberately simple OR substring match, not ranked or
    /// semantic search.
    pub async fn get_similar_issues(&self, keywords: &str, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let keywords: Vec<&str> = keywords.split_whitespace().collect();
        self.get_similar_issues_any(&keywords, limit).await
    }

    /// [`get_similar_issues`](Self::get_similar_issues) with an explicit keyword list
    pub async fn get_similar_issues_any<S: AsRef<str>>(
        &self,
        keywords: &[S],
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>> {
        if keywords.is_empty() {
            return Ok(Vec::new());
        }

        // instr() instead of LIKE: LIKE case-folds ASCII and the contract
        // here is a case-sensitive substring match
        let condition = "(instr(command, ?) > 0
            OR instr(COALESCE(parameters, ''), ?) > 0
            OR instr(COALESCE(error_message, ''), ?) > 0)";
        let conditions = vec![condition; keywords.len()].join(" OR ");
        let sql = format!(
            "SELECT id, command, parameters, timestamp, duration_ms, outcome,
                    error_message, user_feedback, project_context
             FROM executions WHERE {conditions}
             ORDER BY timestamp DESC, id DESC LIMIT {limit}"
        );

        let mut bindings = Vec::with_capacity(keywords.len() * 3);
        for keyword in keywords {
            for _ in 0..3 {
                bindings.push(keyword.as_ref().to_string());
            }
        }

        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(Error::StoreClosed)?;

        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(bindings), execution_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Executions within `[now - window, now]`, ascending by timestamp.
    ///
    /// `window` is `<integer><unit>` with unit `h`, `d`, or `w`; anything
    /// else fails with [`Error::InvalidArgument`].
    pub async fn get_executions_in_window(&self, window: &str) -> Result<Vec<ExecutionRecord>> {
        let duration = parse_window(window)?;
        let cutoff = stamp(Utc::now() - duration);

        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(Error::StoreClosed)?;

        let mut stmt = conn.prepare_cached(
            "SELECT id, command, parameters, timestamp, duration_ms, outcome,
                    error_message, user_feedback, project_context
             FROM executions WHERE timestamp >= ?1
             ORDER BY timestamp ASC, id ASC",
        )?;
        let records = stmt
            .query_map(params![cutoff], execution_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Insert or update a knowledge entry.
    ///
    /// Upsert semantics: a duplicate key overwrites value/category and
    /// increments the usage count, in one atomic statement.
    pub async fn add_knowledge(&self, key: &str, value: &str, category: Option<&str>) -> Result<()> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(Error::StoreClosed)?;

        conn.execute(
            r#"INSERT INTO knowledge (key, value, category, created_at, usage_count)
               VALUES (?1, ?2, ?3, ?4, 1)
               ON CONFLICT(key) DO UPDATE SET
                 value = excluded.value,
                 category = excluded.category,
                 usage_count = usage_count + 1"#,
            params![key, value, category, now_stamp()],
        )?;

        Ok(())
    }

    /// Look up one knowledge entry by key.
    ///
    /// Read-through counter: a successful lookup increments the entry's
    /// usage count as a side effect.
    pub async fn get_knowledge(&self, key: &str) -> Result<Option<KnowledgeEntry>> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(Error::StoreClosed)?;

        let entry = conn
            .query_row(
                "UPDATE knowledge SET usage_count = usage_count + 1 WHERE key = ?1
                 RETURNING id, key, value, category, created_at, usage_count",
                params![key],
                knowledge_from_row,
            )
            .optional()?;

        Ok(entry)
    }

    /// Substring match across key/value/category, most-used first
    pub async fn search_knowledge(&self, query: &str) -> Result<Vec<KnowledgeEntry>> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(Error::StoreClosed)?;

        let mut stmt = conn.prepare_cached(
            "SELECT id, key, value, category, created_at, usage_count
             FROM knowledge
             WHERE instr(key, ?1) > 0
                OR instr(value, ?1) > 0
                OR instr(COALESCE(category, ''), ?1) > 0
             ORDER BY usage_count DESC, id ASC",
        )?;
        let entries = stmt
            .query_map(params![query], knowledge_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    /// Record one observation of a command sequence; returns the row id.
    ///
    /// First observation inserts with frequency 1; repeats atomically
    /// increment the frequency and bump `last_seen`.
    pub async fn record_pattern(&self, sequence: &str) -> Result<i64> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(Error::StoreClosed)?;

        let id = conn.query_row(
            r#"INSERT INTO patterns (sequence, frequency, last_seen)
               VALUES (?1, 1, ?2)
               ON CONFLICT(sequence) DO UPDATE SET
                 frequency = frequency + 1,
                 last_seen = excluded.last_seen
               RETURNING id"#,
            params![sequence, now_stamp()],
            |row| row.get(0),
        )?;

        Ok(id)
    }

    /// Patterns observed at least `threshold` times, by frequency then recency
    pub async fn get_frequent_patterns(&self, threshold: u32) -> Result<Vec<PatternRecord>> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(Error::StoreClosed)?;

        let mut stmt = conn.prepare_cached(
            "SELECT id, sequence, frequency, last_seen, suggested_command
             FROM patterns WHERE frequency >= ?1
             ORDER BY frequency DESC, last_seen DESC",
        )?;
        let patterns = stmt
            .query_map(params![threshold], pattern_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(patterns)
    }

    /// Per-command aggregates over the execution log, most-run first
    pub async fn command_stats(&self, command: Option<&str>) -> Result<Vec<CommandStats>> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(Error::StoreClosed)?;

        let sql = "SELECT command,
                          COUNT(*),
                          COALESCE(SUM(outcome = 'success'), 0),
                          COALESCE(SUM(outcome = 'failure'), 0),
                          AVG(duration_ms), MIN(duration_ms), MAX(duration_ms)
                   FROM executions
                   WHERE ?1 IS NULL OR command = ?1
                   GROUP BY command
                   ORDER BY COUNT(*) DESC, command ASC";

        let mut stmt = conn.prepare_cached(sql)?;
        let stats = stmt
            .query_map(params![command], |row| {
                Ok(CommandStats {
                    command: row.get(0)?,
                    total: row.get::<_, i64>(1)? as u64,
                    succeeded: row.get::<_, i64>(2)? as u64,
                    failed: row.get::<_, i64>(3)? as u64,
                    avg_duration_ms: row.get(4)?,
                    min_duration_ms: row.get(5)?,
                    max_duration_ms: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(stats)
    }

    /// Age-based retention: delete executions and patterns older than
    /// `days` and reclaim the space. Returns the number of rows removed.
    pub async fn cleanup_older_than(&self, days: u32) -> Result<usize> {
        let cutoff = stamp(Utc::now() - chrono::Duration::days(days as i64));

        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(Error::StoreClosed)?;

        let executions = conn.execute(
            "DELETE FROM executions WHERE timestamp < ?1",
            params![cutoff],
        )?;
        let patterns = conn.execute(
            "DELETE FROM patterns WHERE last_seen < ?1",
            params![cutoff],
        )?;

        conn.execute("VACUUM", [])?;

        debug!(
            "Retention cleanup removed {} executions, {} patterns",
            executions, patterns
        );
        Ok(executions + patterns)
    }

    /// Release the underlying connection. Safe to call more than once;
    /// operations after close fail with [`Error::StoreClosed`].
    pub async fn close(&self) {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.take() {
            if let Err((_, err)) = conn.close() {
                warn!("Failed to close learning store cleanly: {}", err);
            }
        }
    }
}

/// Fixed-width timestamps so lexicographic TEXT comparison in SQL matches
/// chronological order
fn now_stamp() -> String {
    stamp(Utc::now())
}

fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_stamp(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text)
        .map(|at| at.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn execution_from_row(row: &Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    let timestamp: String = row.get(3)?;
    let outcome: Option<String> = row.get(5)?;
    Ok(ExecutionRecord {
        id: row.get(0)?,
        command: row.get(1)?,
        parameters: row.get(2)?,
        timestamp: parse_stamp(&timestamp),
        duration_ms: row.get(4)?,
        outcome: outcome.and_then(|value| Outcome::from_str(&value).ok()),
        error_message: row.get(6)?,
        user_feedback: row.get(7)?,
        project_context: row.get(8)?,
    })
}

fn knowledge_from_row(row: &Row<'_>) -> rusqlite::Result<KnowledgeEntry> {
    let created_at: String = row.get(4)?;
    Ok(KnowledgeEntry {
        id: row.get(0)?,
        key: row.get(1)?,
        value: row.get(2)?,
        category: row.get(3)?,
        created_at: parse_stamp(&created_at),
        usage_count: row.get::<_, i64>(5)? as u32,
    })
}

fn pattern_from_row(row: &Row<'_>) -> rusqlite::Result<PatternRecord> {
    let last_seen: String = row.get(3)?;
    Ok(PatternRecord {
        id: row.get(0)?,
        sequence: row.get(1)?,
        frequency: row.get::<_, i64>(2)? as u32,
        last_seen: parse_stamp(&last_seen),
        suggested_command: row.get(4)?,
    })
}

/// Parse a time window like "24h", "7d", or "2w".
///
/// The unit set is deliberately closed; anything else is rejected so
/// callers get a hard error instead of a silently-defaulted window.
fn parse_window(window: &str) -> Result<chrono::Duration> {
    let invalid = || Error::InvalidArgument(format!("invalid time window: {window:?}"));

    let unit = window.chars().last().ok_or_else(invalid)?;
    let digits = &window[..window.len() - unit.len_utf8()];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let count: i64 = digits.parse().map_err(|_| invalid())?;
    if count == 0 {
        return Err(invalid());
    }

    match unit {
        'h' => Ok(chrono::Duration::hours(count)),
        'd' => Ok(chrono::Duration::days(count)),
        'w' => Ok(chrono::Duration::weeks(count)),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    async fn open_store(dir: &tempfile::TempDir) -> LearningStore {
        LearningStore::open(dir.path().join("test.db")).await.unwrap()
    }

    /// Backdate a row so window/retention tests have old data to work with
    async fn backdate_execution(store: &LearningStore, id: i64, at: DateTime<Utc>) {
        let guard = store.conn.lock().await;
        let conn = guard.as_ref().unwrap();
        conn.execute(
            "UPDATE executions SET timestamp = ?1 WHERE id = ?2",
            params![stamp(at), id],
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_record_and_fetch_execution() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;

        let id = store
            .record_execution(
                "/fix",
                Some(&json!({"file": "main.rs"})),
                "success",
                &ExecutionOptions {
                    duration_ms: Some(420),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(id > 0);

        let recent = store.get_recent_executions(None, 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].command, "/fix");
        assert_eq!(recent[0].outcome, Some(Outcome::Success));
        assert_eq!(recent[0].duration_ms, Some(420));
        assert!(recent[0].parameters.as_deref().unwrap().contains("main.rs"));
    }

    #[tokio::test]
    async fn test_null_parameters_stay_null() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;

        store
            .record_execution("/fix", None, "started", &Default::default())
            .await
            .unwrap();
        let recent = store.get_recent_executions(None, 1).await.unwrap();
        assert_eq!(recent[0].parameters, None);
    }

    #[tokio::test]
    async fn test_invalid_outcome_persists_nothing() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;

        let err = store
            .record_execution("/fix", None, "bogus-outcome", &Default::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOutcome(_)));
        assert!(store.get_recent_executions(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_outcome_updates_and_ignores_unknown_id() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;

        let id = store
            .record_execution("/fix", None, "started", &Default::default())
            .await
            .unwrap();
        store
            .record_outcome(
                id,
                "failure",
                &ExecutionOptions {
                    duration_ms: Some(99),
                    error_message: Some("compile error".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let recent = store.get_recent_executions(None, 1).await.unwrap();
        assert_eq!(recent[0].outcome, Some(Outcome::Failure));
        assert_eq!(recent[0].error_message.as_deref(), Some("compile error"));

        // Unknown id: no-op, not an error
        store
            .record_outcome(999_999, "success", &Default::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_recent_executions_order_and_filter() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;

        let a = store.record_execution("/fix", None, "success", &Default::default()).await.unwrap();
        let b = store.record_execution("/fix", None, "success", &Default::default()).await.unwrap();
        let c = store.record_execution("/fix", None, "success", &Default::default()).await.unwrap();
        store.record_execution("/test", None, "success", &Default::default()).await.unwrap();

        let recent = store.get_recent_executions(Some("/fix"), 2).await.unwrap();
        assert_eq!(recent.iter().map(|r| r.id).collect::<Vec<_>>(), vec![c, b]);
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn test_similar_issues_substring_or_match() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;

        store
            .record_execution(
                "/fix",
                None,
                "failure",
                &ExecutionOptions {
                    error_message: Some("Timeout waiting for server".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .record_execution("/deploy", Some(&json!({"target": "staging"})), "success", &Default::default())
            .await
            .unwrap();

        let hits = store.get_similar_issues("Timeout staging", 5).await.unwrap();
        assert_eq!(hits.len(), 2);

        // Case-sensitive: lowercase "timeout" matches nothing
        let hits = store.get_similar_issues("timeout", 5).await.unwrap();
        assert!(hits.is_empty());

        let hits = store.get_similar_issues_any(&["/deploy"], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].command, "/deploy");

        let none: Vec<&str> = Vec::new();
        assert!(store.get_similar_issues_any(&none, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_knowledge_upsert_and_read_through() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;

        store.add_knowledge("deploy-order", "migrate before deploy", Some("ops")).await.unwrap();
        store.add_knowledge("deploy-order", "migrate, then deploy", Some("deploy")).await.unwrap();

        let entry = store.get_knowledge("deploy-order").await.unwrap().unwrap();
        assert_eq!(entry.value, "migrate, then deploy");
        assert_eq!(entry.category.as_deref(), Some("deploy"));
        // Two upserts (1 + 1) plus the read-through increment
        assert_eq!(entry.usage_count, 3);

        let again = store.get_knowledge("deploy-order").await.unwrap().unwrap();
        assert_eq!(again.usage_count, 4);

        assert!(store.get_knowledge("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_knowledge_orders_by_usage() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;

        store.add_knowledge("alpha", "retry flaky tests", None).await.unwrap();
        store.add_knowledge("beta", "retry with backoff", Some("net")).await.unwrap();
        store.get_knowledge("beta").await.unwrap();

        let results = store.search_knowledge("retry").await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].key, "beta");

        assert!(store.search_knowledge("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pattern_upsert_counts() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;

        let first = store.record_pattern("/fix,/test,/commit").await.unwrap();
        for _ in 0..4 {
            let id = store.record_pattern("/fix,/test,/commit").await.unwrap();
            assert_eq!(id, first);
        }

        let patterns = store.get_frequent_patterns(1).await.unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].frequency, 5);
    }

    #[tokio::test]
    async fn test_frequent_patterns_threshold_and_order() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;

        for _ in 0..5 {
            store.record_pattern("/fix,/test,/commit").await.unwrap();
        }
        for _ in 0..2 {
            store.record_pattern("/build,/test").await.unwrap();
        }

        let frequent = store.get_frequent_patterns(3).await.unwrap();
        assert_eq!(frequent.len(), 1);
        assert_eq!(frequent[0].sequence, "/fix,/test,/commit");
        assert_eq!(frequent[0].frequency, 5);

        let all = store.get_frequent_patterns(1).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].sequence, "/fix,/test,/commit");
        assert_eq!(all[1].sequence, "/build,/test");
    }

    #[tokio::test]
    async fn test_window_queries() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;

        let old = store.record_execution("/fix", None, "success", &Default::default()).await.unwrap();
        let fresh = store.record_execution("/test", None, "success", &Default::default()).await.unwrap();
        backdate_execution(&store, old, Utc::now() - chrono::Duration::days(10)).await;

        let in_week = store.get_executions_in_window("7d").await.unwrap();
        assert_eq!(in_week.iter().map(|r| r.id).collect::<Vec<_>>(), vec![fresh]);

        let in_month = store.get_executions_in_window("5w").await.unwrap();
        assert_eq!(in_month.len(), 2);
        // Ascending order
        assert_eq!(in_month[0].id, old);

        for bad in ["xyz", "7", "d", "", "7m", "-3d", "0h", "7.5d"] {
            let err = store.get_executions_in_window(bad).await.unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)), "accepted {bad:?}");
        }
    }

    #[tokio::test]
    async fn test_command_stats() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;

        for outcome in ["success", "success", "failure"] {
            store
                .record_execution(
                    "/fix",
                    None,
                    outcome,
                    &ExecutionOptions {
                        duration_ms: Some(100),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }
        store.record_execution("/test", None, "started", &Default::default()).await.unwrap();

        let stats = store.command_stats(None).await.unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].command, "/fix");
        assert_eq!(stats[0].total, 3);
        assert_eq!(stats[0].succeeded, 2);
        assert_eq!(stats[0].failed, 1);
        assert!((stats[0].success_rate() - 2.0 / 3.0).abs() < 1e-9);

        let only_test = store.command_stats(Some("/test")).await.unwrap();
        assert_eq!(only_test.len(), 1);
        assert_eq!(only_test[0].avg_duration_ms, None);
    }

    #[tokio::test]
    async fn test_retention_cleanup() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;

        let old = store.record_execution("/fix", None, "success", &Default::default()).await.unwrap();
        store.record_execution("/test", None, "success", &Default::default()).await.unwrap();
        backdate_execution(&store, old, Utc::now() - chrono::Duration::days(120)).await;

        let removed = store.cleanup_older_than(90).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.get_recent_executions(None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let store = LearningStore::open(&path).await.unwrap();
        store.record_execution("/fix", None, "success", &Default::default()).await.unwrap();
        store.close().await;

        // Schema init on an existing database must not drop rows
        let reopened = LearningStore::open(&path).await.unwrap();
        assert_eq!(reopened.get_recent_executions(None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_use() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;

        store.close().await;
        store.close().await;

        let err = store.get_recent_executions(None, 1).await.unwrap_err();
        assert!(matches!(err, Error::StoreClosed));
        let err = store.record_pattern("/a,/b").await.unwrap_err();
        assert!(matches!(err, Error::StoreClosed));
    }

    #[test]
    fn test_parse_window_units() {
        assert_eq!(parse_window("24h").unwrap(), chrono::Duration::hours(24));
        assert_eq!(parse_window("7d").unwrap(), chrono::Duration::days(7));
        assert_eq!(parse_window("2w").unwrap(), chrono::Duration::weeks(2));
        assert!(parse_window("7 d").is_err());
    }
}
