//! SQLite timeline backend.
//!
//! Uses a single SQLite database file with three tables:
//! - `sessions`: one row per conversation
//! - `timeline_entries`: conversational turns, FK to `sessions`
//! - `tool_usage`: tool invocations, FK to `sessions`
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings (microsecond
//! precision) so lexical order on the column equals chronological order.
//! Unbounded lookbacks start at `DateTime::<Utc>::MIN_UTC`, whose leading
//! `-` sorts before every stored year.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use crate::history::{Timeframe, TimeframeUnit};
use chronicle_core::error::MemoryError;
use chronicle_core::message::Role;
use chronicle_core::timeline::{
    EntryQuery, PurgeReport, Session, SessionSummary, TimelineEntry, TimelineStats,
    TimelineStore, ToolUsageEntry, ToolUsageQuery,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// Every list query returns rows in this order.
const TIMELINE_ORDER: &str = "ORDER BY timestamp ASC, sequence_number ASC";

/// A SQLite-backed [`TimelineStore`].
pub struct SqliteTimeline {
    pool: SqlitePool,
}

impl SqliteTimeline {
    /// Open (or create) a timeline database.
    ///
    /// The database and all tables/indexes are created automatically.
    /// Pass `"sqlite::memory:"` for an ephemeral database shared by the pool (useful for tests).
    pub async fn new(path: &str) -> Result<Self, MemoryError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| MemoryError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to open SQLite: {e}")))?;

        let timeline = Self { pool };
        timeline.run_migrations().await?;
        info!("SQLite timeline initialized at {path}");
        Ok(timeline)
    }

    async fn run_migrations(&self) -> Result<(), MemoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id          TEXT PRIMARY KEY,
                start_time  TEXT NOT NULL,
                end_time    TEXT,
                title       TEXT,
                summary     TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("sessions table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS timeline_entries (
                id              TEXT PRIMARY KEY,
                timestamp       TEXT NOT NULL,
                session_id      TEXT NOT NULL REFERENCES sessions(id),
                role            TEXT NOT NULL CHECK (role IN ('user', 'assistant', 'system')),
                content         TEXT NOT NULL,
                tool_calls      TEXT,
                tool_results    TEXT,
                sequence_number INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("timeline_entries table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tool_usage (
                id              TEXT PRIMARY KEY,
                timestamp       TEXT NOT NULL,
                session_id      TEXT NOT NULL REFERENCES sessions(id),
                tool_name       TEXT NOT NULL,
                parameters      TEXT NOT NULL DEFAULT '{}',
                result          TEXT,
                execution_time  REAL NOT NULL DEFAULT 0.0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("tool_usage table: {e}")))?;

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_entries_timestamp ON timeline_entries(timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_entries_session ON timeline_entries(session_id)",
            "CREATE INDEX IF NOT EXISTS idx_tool_usage_timestamp ON tool_usage(timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_tool_usage_session ON tool_usage(session_id)",
            "CREATE INDEX IF NOT EXISTS idx_sessions_start ON sessions(start_time)",
        ];
        for ddl in indexes {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(|e| MemoryError::MigrationFailed(format!("index: {e}")))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<Session, MemoryError> {
        let start: String = column(row, "start_time")?;
        let end: Option<String> = column(row, "end_time")?;
        Ok(Session {
            id: column(row, "id")?,
            start_time: parse_timestamp(&start)?,
            end_time: end.as_deref().map(parse_timestamp).transpose()?,
            title: column(row, "title")?,
            summary: column(row, "summary")?,
        })
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<TimelineEntry, MemoryError> {
        let timestamp: String = column(row, "timestamp")?;
        let role: String = column(row, "role")?;
        let tool_calls: Option<String> = column(row, "tool_calls")?;
        let tool_results: Option<String> = column(row, "tool_results")?;

        Ok(TimelineEntry {
            id: column(row, "id")?,
            timestamp: parse_timestamp(&timestamp)?,
            session_id: column(row, "session_id")?,
            role: Role::from_str(&role).map_err(MemoryError::QueryFailed)?,
            content: column(row, "content")?,
            tool_calls: tool_calls.as_deref().map(parse_json).transpose()?,
            tool_results: tool_results.as_deref().map(parse_json).transpose()?,
            sequence: column(row, "sequence_number")?,
        })
    }

    fn row_to_tool_usage(row: &sqlx::sqlite::SqliteRow) -> Result<ToolUsageEntry, MemoryError> {
        let timestamp: String = column(row, "timestamp")?;
        let parameters: String = column(row, "parameters")?;
        let result: Option<String> = column(row, "result")?;

        Ok(ToolUsageEntry {
            id: column(row, "id")?,
            timestamp: parse_timestamp(&timestamp)?,
            session_id: column(row, "session_id")?,
            tool_name: column(row, "tool_name")?,
            parameters: parse_json(&parameters)?,
            result: result.as_deref().map(parse_json).transpose()?,
            latency_secs: column(row, "execution_time")?,
        })
    }

    async fn count(&self, sql: &str) -> Result<u64, MemoryError> {
        let row = sqlx::query(sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("COUNT: {e}")))?;
        let cnt: i64 = column(&row, "cnt")?;
        Ok(cnt as u64)
    }
}

/// Canonical text form of a timestamp.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, MemoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MemoryError::QueryFailed(format!("bad timestamp '{raw}': {e}")))
}

fn parse_json(raw: &str) -> Result<serde_json::Value, MemoryError> {
    serde_json::from_str(raw).map_err(|e| MemoryError::QueryFailed(format!("bad JSON column: {e}")))
}

fn to_json(value: &serde_json::Value) -> Result<String, MemoryError> {
    serde_json::to_string(value).map_err(|e| MemoryError::Storage(format!("JSON serialization: {e}")))
}

fn column<'r, T>(row: &'r sqlx::sqlite::SqliteRow, name: &str) -> Result<T, MemoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| MemoryError::QueryFailed(format!("{name} column: {e}")))
}

/// `%kw%` with LIKE wildcards escaped (escape char is `\`).
fn like_pattern(keyword: &str) -> String {
    let escaped = keyword
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX))
}

#[async_trait]
impl TimelineStore for SqliteTimeline {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create_session(&self, title: Option<&str>) -> Result<String, MemoryError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO sessions (id, start_time, title) VALUES (?1, ?2, ?3)")
            .bind(&id)
            .bind(format_timestamp(&Utc::now()))
            .bind(title)
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("INSERT session failed: {e}")))?;

        debug!(session_id = %id, "Created session");
        Ok(id)
    }

    async fn end_session(&self, session_id: &str, summary: Option<&str>) -> Result<(), MemoryError> {
        let result = sqlx::query("UPDATE sessions SET end_time = ?1, summary = ?2 WHERE id = ?3")
            .bind(format_timestamp(&Utc::now()))
            .bind(summary)
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("UPDATE session failed: {e}")))?;

        if result.rows_affected() == 0 {
            debug!(session_id, "end_session on unknown session ignored");
        }
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, MemoryError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("GET session: {e}")))?;

        row.as_ref().map(Self::row_to_session).transpose()
    }

    async fn append_entry(&self, entry: &TimelineEntry) -> Result<(), MemoryError> {
        let tool_calls = entry.tool_calls.as_ref().map(to_json).transpose()?;
        let tool_results = entry.tool_results.as_ref().map(to_json).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO timeline_entries
                (id, timestamp, session_id, role, content, tool_calls, tool_results, sequence_number)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&entry.id)
        .bind(format_timestamp(&entry.timestamp))
        .bind(&entry.session_id)
        .bind(entry.role.as_str())
        .bind(&entry.content)
        .bind(tool_calls)
        .bind(tool_results)
        .bind(entry.sequence)
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("INSERT entry failed: {e}")))?;

        debug!(session_id = %entry.session_id, sequence = entry.sequence, role = %entry.role, "Appended entry");
        Ok(())
    }

    async fn append_tool_usage(&self, entry: &ToolUsageEntry) -> Result<(), MemoryError> {
        let parameters = to_json(&entry.parameters)?;
        let result = entry.result.as_ref().map(to_json).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO tool_usage
                (id, timestamp, session_id, tool_name, parameters, result, execution_time)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&entry.id)
        .bind(format_timestamp(&entry.timestamp))
        .bind(&entry.session_id)
        .bind(&entry.tool_name)
        .bind(parameters)
        .bind(result)
        .bind(entry.latency_secs)
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("INSERT tool usage failed: {e}")))?;

        debug!(session_id = %entry.session_id, tool = %entry.tool_name, "Recorded tool usage");
        Ok(())
    }

    async fn query_entries(&self, query: &EntryQuery) -> Result<Vec<TimelineEntry>, MemoryError> {
        let mut conditions: Vec<&str> = Vec::new();
        let mut binds: Vec<String> = Vec::new();

        if let Some(session_id) = &query.session_id {
            conditions.push("session_id = ?");
            binds.push(session_id.clone());
        }
        if let Some(start) = &query.start_time {
            conditions.push("timestamp >= ?");
            binds.push(format_timestamp(start));
        }
        if let Some(end) = &query.end_time {
            conditions.push("timestamp <= ?");
            binds.push(format_timestamp(end));
        }
        if let Some(role) = &query.role {
            conditions.push("role = ?");
            binds.push(role.as_str().to_string());
        }
        if let Some(tool) = &query.tool_name {
            conditions.push("session_id IN (SELECT DISTINCT session_id FROM tool_usage WHERE tool_name = ?)");
            binds.push(tool.clone());
        }
        for keyword in query.keywords.iter().filter(|k| !k.is_empty()) {
            conditions.push("content LIKE ? ESCAPE '\\'");
            binds.push(like_pattern(keyword));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let sql = format!("SELECT * FROM timeline_entries {where_clause} {TIMELINE_ORDER} LIMIT ?");

        let mut db_query = sqlx::query(&sql);
        for value in &binds {
            db_query = db_query.bind(value);
        }
        let rows = db_query
            .bind(sql_limit(query.limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("query_entries: {e}")))?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn recent_entries(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TimelineEntry>, MemoryError> {
        let sql = format!(
            r#"
            SELECT * FROM (
                SELECT * FROM timeline_entries
                WHERE timestamp >= ?1
                ORDER BY timestamp DESC, sequence_number DESC
                LIMIT ?2
            ) {TIMELINE_ORDER}
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(format_timestamp(&since))
            .bind(sql_limit(Some(limit)))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("recent_entries: {e}")))?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn query_tool_usage(&self, query: &ToolUsageQuery) -> Result<Vec<ToolUsageEntry>, MemoryError> {
        let mut conditions: Vec<&str> = Vec::new();
        let mut binds: Vec<String> = Vec::new();

        if let Some(tool) = &query.tool_name {
            conditions.push("tool_name = ?");
            binds.push(tool.clone());
        }
        if let Some(start) = &query.start_time {
            conditions.push("timestamp >= ?");
            binds.push(format_timestamp(start));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        // No sequence column here; rowid keeps insert order on timestamp ties.
        let sql = format!("SELECT * FROM tool_usage {where_clause} ORDER BY timestamp ASC, rowid ASC LIMIT ?");

        let mut db_query = sqlx::query(&sql);
        for value in &binds {
            db_query = db_query.bind(value);
        }
        let rows = db_query
            .bind(sql_limit(query.limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("query_tool_usage: {e}")))?;

        rows.iter().map(Self::row_to_tool_usage).collect()
    }

    async fn session_summary(&self, session_id: &str) -> Result<Option<SessionSummary>, MemoryError> {
        let Some(session) = self.get_session(session_id).await? else {
            return Ok(None);
        };

        let stats = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total_messages,
                MIN(timestamp) AS first_message,
                MAX(timestamp) AS last_message,
                COUNT(CASE WHEN role = 'user' THEN 1 END) AS user_messages,
                COUNT(CASE WHEN role = 'assistant' THEN 1 END) AS assistant_messages,
                COUNT(CASE WHEN role = 'system' THEN 1 END) AS system_messages
            FROM timeline_entries
            WHERE session_id = ?1
            "#,
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("session stats: {e}")))?;

        let tool_stats = sqlx::query(
            r#"
            SELECT COUNT(*) AS tool_calls, COUNT(DISTINCT tool_name) AS unique_tools
            FROM tool_usage
            WHERE session_id = ?1
            "#,
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("session tool stats: {e}")))?;

        let first: Option<String> = column(&stats, "first_message")?;
        let last: Option<String> = column(&stats, "last_message")?;
        let count = |row: &sqlx::sqlite::SqliteRow, name: &str| -> Result<u64, MemoryError> {
            column::<i64>(row, name).map(|n| n as u64)
        };

        Ok(Some(SessionSummary {
            session,
            total_messages: count(&stats, "total_messages")?,
            user_messages: count(&stats, "user_messages")?,
            assistant_messages: count(&stats, "assistant_messages")?,
            system_messages: count(&stats, "system_messages")?,
            first_message: first.as_deref().map(parse_timestamp).transpose()?,
            last_message: last.as_deref().map(parse_timestamp).transpose()?,
            tool_calls: count(&tool_stats, "tool_calls")?,
            unique_tools: count(&tool_stats, "unique_tools")?,
        }))
    }

    async fn purge_older_than(&self, retention_days: u32) -> Result<PurgeReport, MemoryError> {
        let cutoff = Timeframe::new(TimeframeUnit::Days, retention_days).start_from(Utc::now());
        let cutoff = format_timestamp(&cutoff);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MemoryError::Storage(format!("BEGIN purge: {e}")))?;

        let entries = sqlx::query("DELETE FROM timeline_entries WHERE timestamp < ?1")
            .bind(&cutoff)
            .execute(&mut *tx)
            .await
            .map_err(|e| MemoryError::Storage(format!("purge entries: {e}")))?
            .rows_affected();

        let tool_usages = sqlx::query("DELETE FROM tool_usage WHERE timestamp < ?1")
            .bind(&cutoff)
            .execute(&mut *tx)
            .await
            .map_err(|e| MemoryError::Storage(format!("purge tool usage: {e}")))?
            .rows_affected();

        let sessions = sqlx::query(
            r#"
            DELETE FROM sessions
            WHERE id NOT IN (SELECT DISTINCT session_id FROM timeline_entries)
              AND id NOT IN (SELECT DISTINCT session_id FROM tool_usage)
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| MemoryError::Storage(format!("purge sessions: {e}")))?
        .rows_affected();

        tx.commit()
            .await
            .map_err(|e| MemoryError::Storage(format!("COMMIT purge: {e}")))?;

        info!(retention_days, entries, tool_usages, sessions, "Purged old timeline data");
        Ok(PurgeReport {
            entries,
            tool_usages,
            sessions,
        })
    }

    async fn stats(&self) -> Result<TimelineStats, MemoryError> {
        Ok(TimelineStats {
            sessions: self.count("SELECT COUNT(*) AS cnt FROM sessions").await?,
            entries: self.count("SELECT COUNT(*) AS cnt FROM timeline_entries").await?,
            tool_usages: self.count("SELECT COUNT(*) AS cnt FROM tool_usage").await?,
        })
    }
}
