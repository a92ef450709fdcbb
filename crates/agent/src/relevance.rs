//! The relevance gate.
//!
//! Before each turn the gate decides whether past conversation should be
//! injected into the prompt. It works in two phases:
//!
//! 1. **Summarize** the last few timeline entries into a compact digest.
//! 2. **Classify** the incoming message against that digest with a small
//!    model that answers in JSON.
//!
//! A malformed reply is scanned for indicator words instead. A failed call
//! (timeout, transport error, storage error while building the digest) falls
//! back to a purely local scan of the user's message. `analyze_relevance`
//! therefore always produces a decision.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use chronicle_config::RelevancePolicy;
use chronicle_core::error::{MemoryError, ProviderError};
use chronicle_core::message::Message;
use chronicle_core::provider::{Provider, ProviderRequest};
use chronicle_core::timeline::{EntryQuery, RelevanceDecision, TimelineEntry, TimelineStore};
use chronicle_memory::hours_before;
use chronicle_memory::render::{local, truncate};
use serde::Deserialize;
use tracing::{debug, info, warn};

const CLASSIFIER_PROMPT: &str = r#"You are a relevance detection AI for Friday, an AI assistant. Your job is to analyze incoming user messages and determine if chat history is relevant.

IMPORTANT: Friday should start fresh (no history) unless history is clearly necessary. This prevents hallucinations and confusion.

Analyze the user message and recent activity summary, then decide:
1. Is chat history relevant? (true/false)
2. Confidence level (0.0-1.0)
3. Brief reasoning
4. If relevant, suggest what timeframe and keywords to include

Chat history is RELEVANT when:
- User refers to "previous conversation", "earlier", "before", "last time"
- User asks about past actions, results, or ongoing tasks
- User mentions "remember", "recall", "you said", "we discussed"
- User asks for status updates on previous requests
- User continues a multi-step task or conversation thread
- User asks about tool usage results or actions taken

Chat history is NOT RELEVANT when:
- User asks general questions not related to past interactions
- User starts a completely new topic
- User asks for basic information or explanations
- User makes simple requests that don't depend on context
- User asks "what can you do" or similar capability questions

Respond with JSON only:
{
    "is_relevant": boolean,
    "confidence": float (0.0-1.0),
    "reasoning": "brief explanation",
    "suggested_context": "summary of what context to include" (optional),
    "timeframe_hours": integer (optional - hours to look back),
    "keywords": ["keyword1", "keyword2"] (optional - relevant keywords)
}"#;

const RELEVANCE_WORDS: &[&str] = &[
    "true", "relevant", "yes", "history", "context", "previous", "remember",
];
const IRRELEVANCE_WORDS: &[&str] = &["false", "not relevant", "no", "fresh", "new", "independent"];

const CONTEXT_HEADER: &str = "=== RELEVANT CONVERSATION CONTEXT ===";
const CONTEXT_FOOTER: &str = "=== END CONTEXT ===\n";
const CONTEXT_MESSAGE_CHARS: usize = 150;
const FALLBACK_REASONING_CHARS: usize = 100;

/// Flow analysis looks at no more than this many entries.
const FLOW_WINDOW: usize = 10;
const FLOW_LOOKBACK_HOURS: u32 = 2;

/// Why the classifier could not be consulted. Never leaves this module.
#[derive(Debug, thiserror::Error)]
enum ClassificationError {
    #[error("{0}")]
    Storage(#[from] MemoryError),

    #[error("{0}")]
    Provider(#[from] ProviderError),

    #[error("classification timed out after {0}s")]
    Timeout(u64),
}

/// Shape of the classifier's JSON answer. Every field is optional on the wire.
#[derive(Debug, Deserialize)]
struct ClassifierReply {
    #[serde(default)]
    is_relevant: bool,
    #[serde(default)]
    confidence: f64,
    #[serde(default = "default_reasoning")]
    reasoning: String,
    #[serde(default)]
    suggested_context: Option<String>,
    #[serde(default)]
    timeframe_hours: Option<u32>,
    #[serde(default)]
    keywords: Option<Vec<String>>,
}

fn default_reasoning() -> String {
    "No reasoning provided".into()
}

impl From<ClassifierReply> for RelevanceDecision {
    fn from(reply: ClassifierReply) -> Self {
        Self {
            is_relevant: reply.is_relevant,
            confidence: reply.confidence.clamp(0.0, 1.0),
            reasoning: reply.reasoning,
            suggested_context: reply.suggested_context.filter(|s| !s.trim().is_empty()),
            timeframe_hours: reply.timeframe_hours.filter(|h| *h > 0),
            keywords: reply
                .keywords
                .unwrap_or_default()
                .into_iter()
                .filter(|k| !k.trim().is_empty())
                .collect(),
        }
    }
}

/// How the current conversation relates to the last recorded activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationType {
    /// Nothing recorded yet.
    New,
    /// Last activity under five minutes ago.
    Continuation,
    /// Last activity under an hour ago.
    Recent,
    Distant,
}

impl ConversationType {
    pub fn from_idle(idle: Duration) -> Self {
        if idle < Duration::minutes(5) {
            Self::Continuation
        } else if idle < Duration::hours(1) {
            Self::Recent
        } else {
            Self::Distant
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Continuation => "continuation",
            Self::Recent => "recent",
            Self::Distant => "distant",
        }
    }
}

impl std::fmt::Display for ConversationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlowAnalysis {
    pub conversation_type: ConversationType,
    pub message_count: usize,
    pub has_tool_usage: bool,
    pub last_activity: Option<DateTime<Utc>>,
}

impl FlowAnalysis {
    fn new_conversation() -> Self {
        Self {
            conversation_type: ConversationType::New,
            message_count: 0,
            has_tool_usage: false,
            last_activity: None,
        }
    }

    fn from_entries(entries: &[TimelineEntry], now: DateTime<Utc>) -> Self {
        let Some(last) = entries.last() else {
            return Self::new_conversation();
        };
        Self {
            conversation_type: ConversationType::from_idle(now - last.timestamp),
            message_count: entries.len(),
            has_tool_usage: entries.iter().any(|e| !e.tool_names().is_empty()),
            last_activity: Some(last.timestamp),
        }
    }
}

/// Decides per message whether history belongs in the prompt.
pub struct RelevanceGate {
    store: Arc<dyn TimelineStore>,
    provider: Arc<dyn Provider>,
    model: String,
    policy: RelevancePolicy,
}

impl RelevanceGate {
    pub fn new(
        store: Arc<dyn TimelineStore>,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        policy: RelevancePolicy,
    ) -> Self {
        Self {
            store,
            provider,
            model: model.into(),
            policy,
        }
    }

    pub fn policy(&self) -> &RelevancePolicy {
        &self.policy
    }

    /// Classify `message`. Never fails; see the module docs for the fallbacks.
    pub async fn analyze_relevance(&self, message: &str) -> RelevanceDecision {
        match self.classify(message).await {
            Ok(decision) => {
                info!(
                    relevant = decision.is_relevant,
                    confidence = decision.confidence,
                    "Relevance decided"
                );
                decision
            }
            Err(e) => {
                warn!(error = %e, "Relevance classification failed, using local heuristic");
                self.local_fallback(message, &e.to_string())
            }
        }
    }

    async fn classify(&self, message: &str) -> Result<RelevanceDecision, ClassificationError> {
        let digest = self.digest().await?;
        let prompt = format!(
            "User Message: \"{message}\"\n\nRecent Activity Summary:\n{digest}\n\n\
             Analyze if chat history is relevant for this user message."
        );

        let request = ProviderRequest::new(
            &self.model,
            vec![Message::system(CLASSIFIER_PROMPT), Message::user(prompt)],
        )
        .with_temperature(self.policy.classifier_temperature)
        .with_max_tokens(self.policy.classifier_max_tokens);

        let secs = self.policy.classification_timeout_secs;
        let response = tokio::time::timeout(
            StdDuration::from_secs(secs),
            self.provider.complete(request),
        )
        .await
        .map_err(|_| ClassificationError::Timeout(secs))??;

        Ok(self.parse_reply(response.message.content.trim()))
    }

    /// One line per recent entry: `HH:MM role: text`.
    async fn digest(&self) -> Result<String, MemoryError> {
        let since = hours_before(Utc::now(), self.policy.digest_window_hours);
        let entries = self
            .store
            .recent_entries(since, self.policy.digest_fetch_limit)
            .await?;
        Ok(render_digest(
            &entries,
            self.policy.digest_entries,
            self.policy.digest_message_chars,
        ))
    }

    /// Turn the classifier's raw answer into a decision.
    pub fn parse_reply(&self, raw: &str) -> RelevanceDecision {
        match serde_json::from_str::<ClassifierReply>(strip_code_fence(raw)) {
            Ok(reply) => reply.into(),
            Err(e) => {
                debug!(error = %e, "Classifier reply is not valid JSON, scanning text");
                self.heuristic_parse(raw)
            }
        }
    }

    fn heuristic_parse(&self, raw: &str) -> RelevanceDecision {
        let lower = raw.to_lowercase();
        let is_relevant = RELEVANCE_WORDS.iter().any(|w| lower.contains(w))
            && !IRRELEVANCE_WORDS.iter().any(|w| lower.contains(w));

        let confidence = if lower.contains("high") {
            self.policy.high_confidence
        } else if lower.contains("low") {
            self.policy.low_confidence
        } else {
            self.policy.heuristic_confidence
        };

        let head: String = raw.chars().take(FALLBACK_REASONING_CHARS).collect();
        RelevanceDecision {
            is_relevant,
            confidence,
            reasoning: format!("Fallback analysis: {head}..."),
            suggested_context: None,
            timeframe_hours: Some(self.policy.default_timeframe_hours),
            keywords: Vec::new(),
        }
    }

    fn local_fallback(&self, message: &str, cause: &str) -> RelevanceDecision {
        let lower = message.to_lowercase();
        let is_relevant = self
            .policy
            .strong_indicators
            .iter()
            .any(|phrase| lower.contains(&phrase.to_lowercase()));

        RelevanceDecision {
            is_relevant,
            confidence: self.policy.local_fallback_confidence,
            reasoning: format!("Analysis failed ({cause}), using conservative approach"),
            suggested_context: None,
            timeframe_hours: Some(self.policy.default_timeframe_hours),
            keywords: Vec::new(),
        }
    }

    /// Fetch and render the history a decision asks for.
    ///
    /// Returns `None` when the decision is not relevant, when the window is
    /// empty, or when the store cannot be read.
    pub async fn get_relevant_context(&self, decision: &RelevanceDecision) -> Option<String> {
        if !decision.is_relevant {
            return None;
        }

        let hours = decision
            .timeframe_hours
            .unwrap_or(self.policy.default_timeframe_hours);
        let since = hours_before(Utc::now(), hours);
        let entries = match self
            .store
            .recent_entries(since, self.policy.context_fetch_limit)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Could not load context for relevant message");
                return None;
            }
        };

        let selected = select_context_entries(entries, &decision.keywords, &self.policy);
        if selected.is_empty() {
            return None;
        }
        debug!(entries = selected.len(), hours, "Injecting relevant context");
        Some(render_context(&selected, decision))
    }

    /// Classify the conversation by how long it has been idle.
    ///
    /// With a session id the session's own entries are used, otherwise
    /// whatever happened in the last two hours.
    pub async fn analyze_flow(&self, session_id: Option<&str>) -> FlowAnalysis {
        let entries = match session_id {
            Some(id) => self
                .store
                .query_entries(&EntryQuery::new().session(id))
                .await
                .map(|mut all| {
                    let skip = all.len().saturating_sub(FLOW_WINDOW);
                    all.drain(..skip);
                    all
                }),
            None => {
                self.store
                    .recent_entries(hours_before(Utc::now(), FLOW_LOOKBACK_HOURS), FLOW_WINDOW)
                    .await
            }
        };

        match entries {
            Ok(entries) => FlowAnalysis::from_entries(&entries, Utc::now()),
            Err(e) => {
                warn!(error = %e, "Flow analysis failed");
                FlowAnalysis::new_conversation()
            }
        }
    }
}

/// Models like to wrap JSON in a markdown fence.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn render_digest(entries: &[TimelineEntry], count: usize, chars: usize) -> String {
    if entries.is_empty() {
        return "No recent activity.".into();
    }
    let skip = entries.len().saturating_sub(count);
    entries[skip..]
        .iter()
        .map(|e| {
            let text: String = e.content.chars().take(chars).collect();
            format!("{} {}: {}", local(&e.timestamp).format("%H:%M"), e.role, text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Any-keyword filter that gives up when it leaves too little to go on.
fn select_context_entries(
    entries: Vec<TimelineEntry>,
    keywords: &[String],
    policy: &RelevancePolicy,
) -> Vec<TimelineEntry> {
    let limit = policy.context_render_limit;
    let selected = if keywords.is_empty() {
        entries
    } else {
        let needles: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
        let matching: Vec<TimelineEntry> = entries
            .iter()
            .filter(|e| {
                let text = e.content.to_lowercase();
                needles.iter().any(|k| text.contains(k.as_str()))
            })
            .cloned()
            .collect();
        if matching.len() < policy.keyword_min_matches {
            debug!(
                matches = matching.len(),
                "Keyword filter too narrow, using recent history"
            );
            entries
        } else {
            matching
        }
    };

    let skip = selected.len().saturating_sub(limit);
    selected.into_iter().skip(skip).collect()
}

fn render_context(entries: &[TimelineEntry], decision: &RelevanceDecision) -> String {
    let mut out = vec![
        CONTEXT_HEADER.to_string(),
        format!("Relevance: {}", decision.reasoning),
        format!("Confidence: {:.1}", decision.confidence),
    ];
    if let Some(suggested) = &decision.suggested_context {
        out.push(format!("Context: {suggested}"));
    }
    out.push("\n--- Recent Timeline ---".into());

    for entry in entries {
        out.push(format!(
            "{} {} {}: {}",
            local(&entry.timestamp).format("%m/%d %H:%M"),
            entry.role.icon(),
            entry.role,
            truncate(&entry.content, CONTEXT_MESSAGE_CHARS)
        ));
        let tools = entry.tool_names();
        if !tools.is_empty() {
            out.push(format!("    🔧 Tools used: {}", tools.join(", ")));
        }
    }

    out.push(CONTEXT_FOOTER.into());
    out.join("\n")
}
