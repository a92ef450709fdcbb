//! Timeline trait: the durable, append-only conversation log.
//!
//! Three record kinds live in a timeline:
//! - [`Session`]: a bounded conversation, opened and closed by the orchestrator
//! - [`TimelineEntry`]: one conversational turn, sequenced within its session
//! - [`ToolUsageEntry`]: one external action performed on behalf of a session
//!
//! Entries are immutable once written. The only delete path is
//! [`TimelineStore::purge_older_than`], a maintenance operation.

use crate::error::MemoryError;
use crate::message::Role;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A bounded conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Closing summary, set by `end_session`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// One conversational turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub role: Role,
    pub content: String,

    /// Tool calls the assistant requested on this turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<serde_json::Value>,

    /// Tool results attached to this turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<serde_json::Value>,

    /// Per-session sequence number, starting at 1
    pub sequence: i64,
}

impl TimelineEntry {
    /// A new entry stamped with the current time.
    pub fn new(
        session_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
        sequence: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            session_id: session_id.into(),
            role,
            content: content.into(),
            tool_calls: None,
            tool_results: None,
            sequence,
        }
    }

    pub fn with_tool_calls(mut self, calls: serde_json::Value) -> Self {
        self.tool_calls = Some(calls);
        self
    }

    pub fn with_tool_results(mut self, results: serde_json::Value) -> Self {
        self.tool_results = Some(results);
        self
    }

    /// Names of the tools this turn requested, whichever shape they were recorded in.
    pub fn tool_names(&self) -> Vec<String> {
        match &self.tool_calls {
            Some(serde_json::Value::Array(calls)) => calls
                .iter()
                .map(|c| {
                    c.get("name")
                        .and_then(|n| n.as_str())
                        .unwrap_or("unknown")
                        .to_string()
                })
                .collect(),
            Some(serde_json::Value::Object(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }
}

/// One external action performed on behalf of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUsageEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub tool_name: String,
    pub parameters: serde_json::Value,
    /// Absent when the tool produced nothing to record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Wall-clock execution time in seconds.
    pub latency_secs: f64,
}

impl ToolUsageEntry {
    pub fn new(
        session_id: impl Into<String>,
        tool_name: impl Into<String>,
        parameters: serde_json::Value,
        result: Option<serde_json::Value>,
        latency_secs: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            session_id: session_id.into(),
            tool_name: tool_name.into(),
            parameters,
            result,
            latency_secs,
        }
    }
}

/// Filters for [`TimelineStore::query_entries`]. Every field narrows the result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryQuery {
    pub session_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Applied after ordering.
    pub limit: Option<usize>,
    /// An entry matches only if its text contains every keyword.
    pub keywords: Vec<String>,
    /// Session-level filter: the owning session used this tool at least once.
    pub tool_name: Option<String>,
    pub role: Option<Role>,
}

impl EntryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn since(mut self, start: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self
    }

    pub fn until(mut self, end: DateTime<Utc>) -> Self {
        self.end_time = Some(end);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    pub fn role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }
}

/// Filters for [`TimelineStore::query_tool_usage`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolUsageQuery {
    pub tool_name: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Session metadata plus message and tool counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session: Session,
    pub total_messages: u64,
    pub user_messages: u64,
    pub assistant_messages: u64,
    pub system_messages: u64,
    pub first_message: Option<DateTime<Utc>>,
    pub last_message: Option<DateTime<Utc>>,
    pub tool_calls: u64,
    pub unique_tools: u64,
}

/// Row counts across the whole store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineStats {
    pub sessions: u64,
    pub entries: u64,
    pub tool_usages: u64,
}

/// What a purge removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    pub entries: u64,
    pub tool_usages: u64,
    pub sessions: u64,
}

/// The relevance gate's verdict for one incoming message. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceDecision {
    pub is_relevant: bool,
    /// In `[0, 1]`.
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_context: Option<String>,
    /// Suggested lookback window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe_hours: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

impl RelevanceDecision {
    pub fn irrelevant(reasoning: impl Into<String>) -> Self {
        Self {
            is_relevant: false,
            confidence: 0.0,
            reasoning: reasoning.into(),
            suggested_context: None,
            timeframe_hours: None,
            keywords: Vec::new(),
        }
    }
}

/// The timeline storage backend.
///
/// Implementations: SQLite (production and tests, via `sqlite::memory:`).
/// Ordering contract for every list: timestamp ascending, then sequence ascending.
#[async_trait]
pub trait TimelineStore: Send + Sync {
    /// The backend name (e.g., "sqlite").
    fn name(&self) -> &str;

    /// Open a new session starting now. Returns its id.
    async fn create_session(&self, title: Option<&str>) -> std::result::Result<String, MemoryError>;

    /// Close a session. Last write wins; an unknown id is a silent no-op.
    async fn end_session(
        &self,
        session_id: &str,
        summary: Option<&str>,
    ) -> std::result::Result<(), MemoryError>;

    async fn get_session(&self, session_id: &str) -> std::result::Result<Option<Session>, MemoryError>;

    async fn append_entry(&self, entry: &TimelineEntry) -> std::result::Result<(), MemoryError>;

    async fn append_tool_usage(&self, entry: &ToolUsageEntry) -> std::result::Result<(), MemoryError>;

    async fn query_entries(
        &self,
        query: &EntryQuery,
    ) -> std::result::Result<Vec<TimelineEntry>, MemoryError>;

    /// The newest `limit` entries at or after `since`, returned oldest first.
    async fn recent_entries(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> std::result::Result<Vec<TimelineEntry>, MemoryError>;

    async fn query_tool_usage(
        &self,
        query: &ToolUsageQuery,
    ) -> std::result::Result<Vec<ToolUsageEntry>, MemoryError>;

    /// `None` if the session is unknown.
    async fn session_summary(
        &self,
        session_id: &str,
    ) -> std::result::Result<Option<SessionSummary>, MemoryError>;

    /// Delete entries and tool usage older than the cutoff, then every
    /// session left without entries.
    async fn purge_older_than(&self, retention_days: u32) -> std::result::Result<PurgeReport, MemoryError>;

    async fn stats(&self) -> std::result::Result<TimelineStats, MemoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_query_builder_accumulates_filters() {
        let query = EntryQuery::new()
            .session("S1")
            .limit(10)
            .keywords(["email", "report"])
            .role(Role::User);
        assert_eq!(query.session_id.as_deref(), Some("S1"));
        assert_eq!(query.limit, Some(10));
        assert_eq!(query.keywords, vec!["email", "report"]);
        assert_eq!(query.role, Some(Role::User));
        assert!(query.tool_name.is_none());
    }

    #[test]
    fn tool_names_from_list_and_map_shapes() {
        let entry = TimelineEntry::new("S1", Role::Assistant, "done", 2)
            .with_tool_calls(serde_json::json!([{"name": "send_email"}, {"id": "x"}]));
        assert_eq!(entry.tool_names(), vec!["send_email", "unknown"]);

        let entry = TimelineEntry::new("S1", Role::Assistant, "done", 3)
            .with_tool_calls(serde_json::json!({"get_tasks": {}}));
        assert_eq!(entry.tool_names(), vec!["get_tasks"]);
    }

    #[test]
    fn decision_parses_minimal_classifier_json() {
        let decision: RelevanceDecision =
            serde_json::from_str(r#"{"is_relevant": true, "confidence": 0.9}"#).unwrap();
        assert!(decision.is_relevant);
        assert!(decision.keywords.is_empty());
        assert!(decision.timeframe_hours.is_none());
    }

    #[test]
    fn decision_parses_full_classifier_json() {
        let decision: RelevanceDecision = serde_json::from_str(
            r#"{
                "is_relevant": true,
                "confidence": 0.85,
                "reasoning": "asks about the email sent earlier",
                "suggested_context": "email to Bob",
                "timeframe_hours": 48,
                "keywords": ["email", "Bob"]
            }"#,
        )
        .unwrap();
        assert_eq!(decision.timeframe_hours, Some(48));
        assert_eq!(decision.keywords, vec!["email", "Bob"]);
        assert_eq!(decision.suggested_context.as_deref(), Some("email to Bob"));
    }
}
