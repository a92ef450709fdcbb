//! History tools: `retrieve_history`, `get_recent_context`, `search_tool_usage`.
//!
//! Arguments arrive as loose JSON from the model. They are decoded into a
//! [`HistoryRequest`] first, so an unknown timeframe unit or a negative limit
//! is rejected as [`ToolError::InvalidArguments`] and never reaches the store.

use async_trait::async_trait;
use chronicle_core::error::{MemoryError, ToolError};
use chronicle_core::tool::{Tool, ToolResult};
use chronicle_memory::history::{DEFAULT_RECENT_HOURS, DEFAULT_RECENT_LIMIT};
use chronicle_memory::{HistoryQuery, RecentContextArgs, RetrieveHistoryArgs, SearchToolUsageArgs};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

/// A decoded history tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "arguments", rename_all = "snake_case")]
pub enum HistoryRequest {
    RetrieveHistory(RetrieveHistoryArgs),
    GetRecentContext(RecentContextArgs),
    SearchToolUsage(SearchToolUsageArgs),
}

impl HistoryRequest {
    /// Decode a tool name and its raw arguments.
    ///
    /// A `null` argument payload is treated as "no arguments".
    pub fn parse(name: &str, arguments: Value) -> Result<Self, ToolError> {
        let arguments = match arguments {
            Value::Null => json!({}),
            other => other,
        };
        serde_json::from_value(json!({ "name": name, "arguments": arguments }))
            .map_err(|e| ToolError::InvalidArguments(format!("{name}: {e}")))
    }

    pub fn kind(&self) -> HistoryToolKind {
        match self {
            Self::RetrieveHistory(_) => HistoryToolKind::RetrieveHistory,
            Self::GetRecentContext(_) => HistoryToolKind::GetRecentContext,
            Self::SearchToolUsage(_) => HistoryToolKind::SearchToolUsage,
        }
    }

    /// Run the request against the history facade.
    pub async fn run(&self, history: &HistoryQuery) -> Result<String, MemoryError> {
        match self {
            Self::RetrieveHistory(args) => history.retrieve_history(args).await,
            Self::GetRecentContext(args) => {
                history
                    .get_recent_context(
                        args.hours.unwrap_or(DEFAULT_RECENT_HOURS),
                        args.limit.unwrap_or(DEFAULT_RECENT_LIMIT),
                    )
                    .await
            }
            Self::SearchToolUsage(args) => history.search_tool_usage(args).await,
        }
    }
}

/// Which history read a [`HistoryTool`] exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryToolKind {
    RetrieveHistory,
    GetRecentContext,
    SearchToolUsage,
}

impl HistoryToolKind {
    pub const ALL: [HistoryToolKind; 3] = [
        HistoryToolKind::RetrieveHistory,
        HistoryToolKind::GetRecentContext,
        HistoryToolKind::SearchToolUsage,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::RetrieveHistory => "retrieve_history",
            Self::GetRecentContext => "get_recent_context",
            Self::SearchToolUsage => "search_tool_usage",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::RetrieveHistory => {
                "Retrieve conversation history filtered by timeframe, keywords, tool usage, role or conversation. \
                 Use when the user refers to something discussed or done before."
            }
            Self::GetRecentContext => {
                "Get the most recent conversation entries from the last N hours. \
                 Use to re-establish what was being discussed recently."
            }
            Self::SearchToolUsage => {
                "Search past tool invocations, optionally for one tool and within a timeframe. \
                 Use when the user asks what actions were taken earlier."
            }
        }
    }

    pub fn schema(&self) -> Value {
        let timeframe_unit = json!({
            "type": "string",
            "enum": ["hours", "days", "weeks", "months"],
            "description": "Unit of the timeframe (a month counts as 30 days)"
        });
        let timeframe_value = json!({
            "type": "integer",
            "minimum": 1,
            "description": "Number of timeframe units to look back"
        });

        match self {
            Self::RetrieveHistory => json!({
                "type": "object",
                "properties": {
                    "timeframe_unit": timeframe_unit,
                    "timeframe_value": timeframe_value,
                    "limit": {
                        "type": "integer",
                        "minimum": 1,
                        "description": "Maximum number of entries (default 50)"
                    },
                    "keywords": {
                        "type": "string",
                        "description": "Comma-separated keywords; every keyword must appear"
                    },
                    "tool_name": {
                        "type": "string",
                        "description": "Only conversations where this tool was used"
                    },
                    "role": {
                        "type": "string",
                        "enum": ["user", "assistant", "system"],
                        "description": "Only entries from this speaker"
                    },
                    "session_id": {
                        "type": "string",
                        "description": "Only entries from this conversation"
                    }
                }
            }),
            Self::GetRecentContext => json!({
                "type": "object",
                "properties": {
                    "hours": {
                        "type": "integer",
                        "minimum": 0,
                        "description": "How many hours to look back (default 24)"
                    },
                    "limit": {
                        "type": "integer",
                        "minimum": 1,
                        "description": "Maximum number of entries (default 20)"
                    }
                }
            }),
            Self::SearchToolUsage => json!({
                "type": "object",
                "properties": {
                    "tool_name": {
                        "type": "string",
                        "description": "Only invocations of this tool"
                    },
                    "timeframe_unit": timeframe_unit,
                    "timeframe_value": timeframe_value,
                    "limit": {
                        "type": "integer",
                        "minimum": 1,
                        "description": "Maximum number of records (default 20)"
                    }
                }
            }),
        }
    }
}

/// One history read exposed as a [`Tool`].
pub struct HistoryTool {
    kind: HistoryToolKind,
    history: HistoryQuery,
}

impl HistoryTool {
    pub fn new(kind: HistoryToolKind, history: HistoryQuery) -> Self {
        Self { kind, history }
    }

    pub fn kind(&self) -> HistoryToolKind {
        self.kind
    }
}

#[async_trait]
impl Tool for HistoryTool {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn description(&self) -> &str {
        self.kind.description()
    }

    fn parameters_schema(&self) -> Value {
        self.kind.schema()
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        let request = HistoryRequest::parse(self.kind.name(), arguments)?;
        debug!(tool = self.kind.name(), ?request, "Running history tool");

        let output = request
            .run(&self.history)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.kind.name().to_string(),
                reason: e.to_string(),
            })?;

        Ok(ToolResult::ok(String::new(), output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history_registry;
    use chrono::{Duration, Utc};
    use chronicle_core::message::Role;
    use chronicle_core::timeline::{TimelineEntry, TimelineStore, ToolUsageEntry};
    use chronicle_core::tool::ToolCall;
    use chronicle_memory::{SqliteTimeline, TimeframeUnit};
    use std::sync::Arc;

    async fn seeded() -> (HistoryQuery, Arc<dyn TimelineStore>) {
        let store: Arc<dyn TimelineStore> =
            Arc::new(SqliteTimeline::new("sqlite::memory:").await.unwrap());
        let session = store.create_session(Some("Morning")).await.unwrap();
        store
            .append_entry(&TimelineEntry::new(&session, Role::User, "Email Bob about the budget", 1))
            .await
            .unwrap();
        store
            .append_entry(&TimelineEntry::new(&session, Role::Assistant, "Email sent to Bob.", 2))
            .await
            .unwrap();
        store
            .append_tool_usage(&ToolUsageEntry::new(
                &session,
                "send_email",
                json!({"to": "bob@example.com"}),
                Some(json!("sent")),
                0.25,
            ))
            .await
            .unwrap();
        (HistoryQuery::new(store.clone()), store)
    }

    #[test]
    fn parse_decodes_each_tool() {
        let req = HistoryRequest::parse(
            "retrieve_history",
            json!({"timeframe_unit": "days", "timeframe_value": 3, "keywords": "budget"}),
        )
        .unwrap();
        match req {
            HistoryRequest::RetrieveHistory(args) => {
                assert_eq!(args.timeframe_unit, Some(TimeframeUnit::Days));
                assert_eq!(args.timeframe_value, Some(3));
                assert_eq!(args.keywords.as_deref(), Some("budget"));
            }
            other => panic!("unexpected request: {other:?}"),
        }

        let req = HistoryRequest::parse("get_recent_context", Value::Null).unwrap();
        assert_eq!(req, HistoryRequest::GetRecentContext(RecentContextArgs::default()));
        assert_eq!(req.kind(), HistoryToolKind::GetRecentContext);

        let req = HistoryRequest::parse("search_tool_usage", json!({"tool_name": "send_email"})).unwrap();
        assert_eq!(req.kind(), HistoryToolKind::SearchToolUsage);
    }

    #[test]
    fn parse_accepts_legacy_argument_names() {
        let req = HistoryRequest::parse(
            "retrieve_history",
            json!({"timeframe": "weeks", "timeframe_value": 1, "role_filter": "user", "conversation_id": "abc"}),
        )
        .unwrap();
        let HistoryRequest::RetrieveHistory(args) = req else {
            panic!("expected retrieve_history");
        };
        assert_eq!(args.timeframe_unit, Some(TimeframeUnit::Weeks));
        assert_eq!(args.role, Some(Role::User));
        assert_eq!(args.session_id.as_deref(), Some("abc"));
    }

    #[test]
    fn parse_rejects_bad_arguments() {
        let err = HistoryRequest::parse("retrieve_history", json!({"timeframe_unit": "fortnights"}))
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));

        let err = HistoryRequest::parse("get_recent_context", json!({"limit": -3})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));

        let err = HistoryRequest::parse("forget_everything", json!({})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn schemas_are_objects() {
        for kind in HistoryToolKind::ALL {
            let schema = kind.schema();
            assert_eq!(schema["type"], "object");
            assert!(schema["properties"].is_object(), "{}", kind.name());
        }
        let schema = HistoryToolKind::RetrieveHistory.schema();
        assert_eq!(schema["properties"]["timeframe_unit"]["enum"][3], "months");
    }

    #[tokio::test]
    async fn registry_exposes_three_tools() {
        let (history, _) = seeded().await;
        let registry = history_registry(&history);
        assert_eq!(
            registry.names(),
            vec!["get_recent_context", "retrieve_history", "search_tool_usage"]
        );
        assert_eq!(registry.definitions().len(), 3);
    }

    #[tokio::test]
    async fn retrieve_history_through_registry() {
        let (history, _) = seeded().await;
        let registry = history_registry(&history);

        let call = ToolCall {
            id: "call_1".into(),
            name: "retrieve_history".into(),
            arguments: json!({"keywords": "budget"}),
        };
        let result = registry.execute(&call).await.unwrap();
        assert!(result.success);
        assert_eq!(result.call_id, "call_1");
        assert!(result.output.contains("Email Bob about the budget"));
        assert!(!result.output.contains("Email sent to Bob."));
    }

    #[tokio::test]
    async fn recent_context_uses_defaults() {
        let (history, _) = seeded().await;
        let tool = HistoryTool::new(HistoryToolKind::GetRecentContext, history);
        let result = tool.execute(json!({})).await.unwrap();
        assert!(result.output.contains("Email sent to Bob."));
    }

    #[tokio::test]
    async fn search_tool_usage_reports_empty_filters() {
        let (history, _) = seeded().await;
        let tool = HistoryTool::new(HistoryToolKind::SearchToolUsage, history);

        let found = tool.execute(json!({"tool_name": "send_email"})).await.unwrap();
        assert!(found.output.contains("send_email"));

        let missing = tool
            .execute(json!({"tool_name": "calendar", "timeframe_unit": "days", "timeframe_value": 2}))
            .await
            .unwrap();
        assert_eq!(
            missing.output,
            "No tool usage found for tool 'calendar' in the last 2 days."
        );
    }

    #[tokio::test]
    async fn oversized_lookbacks_cover_all_history() {
        let (history, _) = seeded().await;

        let retrieve = HistoryTool::new(HistoryToolKind::RetrieveHistory, history.clone());
        let result = retrieve
            .execute(json!({"timeframe_unit": "months", "timeframe_value": 10_000_000}))
            .await
            .unwrap();
        assert!(result.output.contains("Email Bob about the budget"));

        let recent = HistoryTool::new(HistoryToolKind::GetRecentContext, history.clone());
        let result = recent.execute(json!({"hours": 4_000_000_000u32})).await.unwrap();
        assert!(result.output.contains("Email sent to Bob."));

        let usage = HistoryTool::new(HistoryToolKind::SearchToolUsage, history);
        let result = usage
            .execute(json!({"timeframe_unit": "weeks", "timeframe_value": u32::MAX, "limit": u64::MAX}))
            .await
            .unwrap();
        assert!(result.output.contains("send_email"));
    }

    #[tokio::test]
    async fn old_entries_fall_outside_timeframe() {
        let (history, store) = seeded().await;
        let session = store.create_session(None).await.unwrap();
        let mut old = TimelineEntry::new(&session, Role::User, "ancient budget talk", 1);
        old.timestamp = Utc::now() - Duration::days(10);
        store.append_entry(&old).await.unwrap();

        let tool = HistoryTool::new(HistoryToolKind::RetrieveHistory, history);
        let result = tool
            .execute(json!({"keywords": "budget", "timeframe_unit": "days", "timeframe_value": 3}))
            .await
            .unwrap();
        assert!(!result.output.contains("ancient"));
        assert!(result.output.contains("Email Bob"));
    }
}
