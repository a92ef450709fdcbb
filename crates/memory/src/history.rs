//! History query facade.
//!
//! Turns loosely-typed requests ("last 3 days", "email, report", a tool
//! name) into [`TimelineStore`] queries and renders the rows as text an
//! agent can read. An empty result is a normal answer, not an error.
//!
//! These are the only reads the generation model can trigger on demand; the
//! argument structs deserialize straight from its tool-call JSON.

use crate::render::{local, truncate, value_text};
use chrono::{DateTime, Duration, Utc};
use chronicle_core::error::MemoryError;
use chronicle_core::message::Role;
use chronicle_core::timeline::{
    EntryQuery, SessionSummary, TimelineEntry, TimelineStore, ToolUsageEntry, ToolUsageQuery,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const DEFAULT_RECENT_HOURS: u32 = 24;
pub const DEFAULT_RECENT_LIMIT: usize = 20;
pub const DEFAULT_TOOL_USAGE_LIMIT: usize = 20;

const TIMELINE_MESSAGE_CHARS: usize = 200;
const RECENT_MESSAGE_CHARS: usize = 150;
const RECENT_SHOWN: usize = 10;
const TOOL_RESULT_CHARS: usize = 100;

/// Parameters never echoed back in tool usage listings.
const HIDDEN_PARAMETERS: &[&str] = &["attachment_path"];

/// Unit of a relative lookback window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeframeUnit {
    Hours,
    Days,
    Weeks,
    /// Always 30 days, not calendar months.
    Months,
}

impl TimeframeUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeframeUnit::Hours => "hours",
            TimeframeUnit::Days => "days",
            TimeframeUnit::Weeks => "weeks",
            TimeframeUnit::Months => "months",
        }
    }

    /// `None` when `value` units do not fit in a [`Duration`].
    fn span(&self, value: u32) -> Option<Duration> {
        let value = i64::from(value);
        match self {
            TimeframeUnit::Hours => Duration::try_hours(value),
            TimeframeUnit::Days => Duration::try_days(value),
            TimeframeUnit::Weeks => Duration::try_weeks(value),
            TimeframeUnit::Months => Duration::try_days(value * 30),
        }
    }
}

impl FromStr for TimeframeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hours" | "hour" | "h" => Ok(TimeframeUnit::Hours),
            "days" | "day" | "d" => Ok(TimeframeUnit::Days),
            "weeks" | "week" | "w" => Ok(TimeframeUnit::Weeks),
            "months" | "month" | "m" => Ok(TimeframeUnit::Months),
            other => Err(format!(
                "invalid timeframe '{other}'. Valid options: hours, days, weeks, months"
            )),
        }
    }
}

impl fmt::Display for TimeframeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved lookback window such as "last 3 days".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeframe {
    pub unit: TimeframeUnit,
    pub value: u32,
}

impl Timeframe {
    pub fn new(unit: TimeframeUnit, value: u32) -> Self {
        Self { unit, value }
    }

    /// A window exists only when both halves are given and the value is positive.
    pub fn resolve(unit: Option<TimeframeUnit>, value: Option<u32>) -> Option<Self> {
        match (unit, value) {
            (Some(unit), Some(value)) if value > 0 => Some(Self::new(unit, value)),
            _ => None,
        }
    }

    pub fn span(&self) -> Option<Duration> {
        self.unit.span(self.value)
    }

    /// Absolute start of the window, counted back from `now`.
    ///
    /// Windows reaching past the earliest representable instant start there.
    pub fn start_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.span()
            .and_then(|span| now.checked_sub_signed(span))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Start of a lookback of `hours` ending at `now`.
pub fn hours_before(now: DateTime<Utc>, hours: u32) -> DateTime<Utc> {
    Timeframe::new(TimeframeUnit::Hours, hours).start_from(now)
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "last {} {}", self.value, self.unit)
    }
}

/// Arguments of `retrieve_history`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrieveHistoryArgs {
    #[serde(default, alias = "timeframe", skip_serializing_if = "Option::is_none")]
    pub timeframe_unit: Option<TimeframeUnit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe_value: Option<u32>,
    /// Defaults to 50.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Comma-separated; every keyword must appear.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, alias = "role_filter", skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, alias = "conversation_id", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Arguments of `get_recent_context`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecentContextArgs {
    /// Defaults to 24.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours: Option<u32>,
    /// Defaults to 20.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// Arguments of `search_tool_usage`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchToolUsageArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, alias = "timeframe", skip_serializing_if = "Option::is_none")]
    pub timeframe_unit: Option<TimeframeUnit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe_value: Option<u32>,
    /// Defaults to 20.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// Split a comma-separated keyword string, dropping blanks.
pub fn split_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect()
}

/// Read-oriented facade over a [`TimelineStore`].
#[derive(Clone)]
pub struct HistoryQuery {
    store: Arc<dyn TimelineStore>,
}

impl HistoryQuery {
    pub fn new(store: Arc<dyn TimelineStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn TimelineStore> {
        &self.store
    }

    /// Filtered timeline, grouped by day.
    pub async fn retrieve_history(&self, args: &RetrieveHistoryArgs) -> Result<String, MemoryError> {
        let timeframe = Timeframe::resolve(args.timeframe_unit, args.timeframe_value);
        let mut query = EntryQuery::new().limit(args.limit.unwrap_or(DEFAULT_HISTORY_LIMIT));
        if let Some(tf) = &timeframe {
            query = query.since(tf.start_from(Utc::now()));
        }
        if let Some(raw) = &args.keywords {
            query = query.keywords(split_keywords(raw));
        }
        query.tool_name = args.tool_name.clone();
        query.role = args.role;
        query.session_id = args.session_id.clone();

        let entries = self.store.query_entries(&query).await?;
        debug!(results = entries.len(), "retrieve_history");

        if entries.is_empty() {
            return Ok("No conversation history found matching the specified criteria.".into());
        }
        Ok(render_timeline(&entries, timeframe.as_ref()))
    }

    /// The newest entries of the last `hours`.
    pub async fn get_recent_context(&self, hours: u32, limit: usize) -> Result<String, MemoryError> {
        let since = hours_before(Utc::now(), hours);
        let entries = self.store.recent_entries(since, limit).await?;

        if entries.is_empty() {
            return Ok(format!(
                "No conversation history found in the last {hours} hours."
            ));
        }
        Ok(render_recent(&entries, hours))
    }

    /// Tool invocations with their latency and result.
    pub async fn search_tool_usage(&self, args: &SearchToolUsageArgs) -> Result<String, MemoryError> {
        let timeframe = Timeframe::resolve(args.timeframe_unit, args.timeframe_value);
        let query = ToolUsageQuery {
            tool_name: args.tool_name.clone(),
            start_time: timeframe.map(|tf| tf.start_from(Utc::now())),
            limit: Some(args.limit.unwrap_or(DEFAULT_TOOL_USAGE_LIMIT)),
        };

        let records = self.store.query_tool_usage(&query).await?;
        debug!(results = records.len(), "search_tool_usage");

        if records.is_empty() {
            let tool_filter = args
                .tool_name
                .as_ref()
                .map(|t| format!(" for tool '{t}'"))
                .unwrap_or_default();
            let time_filter = timeframe
                .map(|tf| format!(" in the {tf}"))
                .unwrap_or_default();
            return Ok(format!("No tool usage found{tool_filter}{time_filter}."));
        }
        Ok(render_tool_usage(
            &records,
            args.tool_name.as_deref(),
            timeframe.as_ref(),
        ))
    }

    pub async fn conversation_summary(&self, session_id: &str) -> Result<String, MemoryError> {
        match self.store.session_summary(session_id).await? {
            Some(summary) => Ok(render_summary(&summary)),
            None => Ok(format!("No conversation found with ID: {session_id}")),
        }
    }
}

fn has_content(value: &Option<serde_json::Value>) -> bool {
    match value {
        None | Some(serde_json::Value::Null) => false,
        Some(serde_json::Value::Object(map)) => !map.is_empty(),
        Some(serde_json::Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    }
}

pub fn render_timeline(entries: &[TimelineEntry], timeframe: Option<&Timeframe>) -> String {
    let desc = timeframe
        .map(|tf| tf.to_string())
        .unwrap_or_else(|| "matching criteria".into());
    let mut out = vec![
        format!("📅 CONVERSATION TIMELINE ({desc})"),
        "=".repeat(50),
    ];

    let mut current_date = None;
    for entry in entries {
        let ts = local(&entry.timestamp);
        let date = ts.date_naive();
        if current_date != Some(date) {
            current_date = Some(date);
            out.push(format!("\n📅 {}", ts.format("%B %d, %Y (%A)")));
            out.push("-".repeat(30));
        }

        out.push(format!(
            "{} {} {}: {}",
            ts.format("%H:%M:%S"),
            entry.role.icon(),
            entry.role.as_str().to_uppercase(),
            truncate(entry.content.trim(), TIMELINE_MESSAGE_CHARS)
        ));

        let tools = entry.tool_names();
        if !tools.is_empty() {
            out.push(format!("    🔧 Used tools: {}", tools.join(", ")));
        }
        if has_content(&entry.tool_results) {
            out.push("    ✅ Tool results available".into());
        }
    }

    out.push(format!("\n📊 Total entries: {}", entries.len()));
    out.join("\n")
}

pub fn render_recent(entries: &[TimelineEntry], hours: u32) -> String {
    let mut out = vec![
        format!("🕐 RECENT CONTEXT (last {hours} hours)"),
        "=".repeat(40),
    ];
    let skip = entries.len().saturating_sub(RECENT_SHOWN);
    for entry in &entries[skip..] {
        out.push(format!(
            "{} {} {}",
            local(&entry.timestamp).format("%H:%M"),
            entry.role.icon(),
            truncate(entry.content.trim(), RECENT_MESSAGE_CHARS)
        ));
    }
    out.join("\n")
}

pub fn render_tool_usage(
    records: &[ToolUsageEntry],
    tool_name: Option<&str>,
    timeframe: Option<&Timeframe>,
) -> String {
    let tool_desc = tool_name
        .map(|t| format!("for {t}"))
        .unwrap_or_else(|| "all tools".into());
    let time_desc = timeframe
        .map(|tf| tf.to_string())
        .unwrap_or_else(|| "matching criteria".into());
    let mut out = vec![
        format!("🔧 TOOL USAGE TIMELINE ({tool_desc} - {time_desc})"),
        "=".repeat(50),
    ];

    for record in records {
        out.push(format!(
            "{} - {}",
            local(&record.timestamp).format("%Y-%m-%d %H:%M:%S"),
            record.tool_name
        ));
        out.push(format!("    ⏱️  Execution time: {:.2}s", record.latency_secs));

        if let Some(params) = record.parameters.as_object() {
            let shown: Vec<String> = params
                .iter()
                .filter(|(k, _)| !HIDDEN_PARAMETERS.contains(&k.as_str()))
                .map(|(k, v)| format!("{k}={}", value_text(v)))
                .collect();
            if !shown.is_empty() {
                out.push(format!("    📝 Parameters: {}", shown.join(", ")));
            }
        }

        if let Some(result) = record.result.as_ref().filter(|r| !r.is_null()) {
            out.push(format!(
                "    ✅ Result: {}",
                truncate(&value_text(result), TOOL_RESULT_CHARS)
            ));
        }
        out.push(String::new());
    }

    out.push(format!("📊 Total tool calls: {}", records.len()));
    out.join("\n")
}

fn format_duration(span: Duration) -> String {
    let secs = span.num_seconds().max(0);
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

pub fn render_summary(summary: &SessionSummary) -> String {
    let session = &summary.session;
    let mut out = vec!["📋 CONVERSATION SUMMARY".to_string(), "=".repeat(30)];
    out.push(format!("Session ID: {}", session.id));
    if let Some(title) = &session.title {
        out.push(format!("Title: {title}"));
    }

    out.push(format!(
        "Started: {}",
        local(&session.start_time).format("%Y-%m-%d %H:%M:%S")
    ));
    if let Some(end) = &session.end_time {
        out.push(format!("Ended: {}", local(end).format("%Y-%m-%d %H:%M:%S")));
        out.push(format!("Duration: {}", format_duration(*end - session.start_time)));
    }

    out.push("\n📊 Statistics:".into());
    out.push(format!("  Total messages: {}", summary.total_messages));
    out.push(format!("  User messages: {}", summary.user_messages));
    out.push(format!("  Assistant messages: {}", summary.assistant_messages));
    out.push(format!("  Tool calls: {}", summary.tool_calls));
    out.push(format!("  Unique tools used: {}", summary.unique_tools));

    if let Some(text) = &session.summary {
        out.push(format!("\n📝 Summary: {text}"));
    }
    out.join("\n")
}
