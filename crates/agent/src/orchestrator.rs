//! The per-message turn loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chronicle_config::{AgentSettings, AppConfig};
use chronicle_core::error::{Error, MemoryError, ProviderError, ToolError};
use chronicle_core::message::{Message, MessageToolCall, Role};
use chronicle_core::provider::{Provider, ProviderRequest, ProviderResponse};
use chronicle_core::timeline::{TimelineEntry, TimelineStore, ToolUsageEntry};
use chronicle_core::tool::{ToolCall, ToolRegistry, ToolResult};
use chronicle_memory::HistoryQuery;
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::relevance::{FlowAnalysis, RelevanceGate};

/// The open session and the sequence number its next entry gets.
struct SessionState {
    session_id: Option<String>,
    next_sequence: i64,
}

impl SessionState {
    fn open(&mut self, session_id: String) {
        self.session_id = Some(session_id);
        self.next_sequence = 1;
    }
}

/// What the assistant turn will record.
struct Reply {
    text: String,
    tool_calls: Option<Value>,
    tool_results: Option<Value>,
}

impl Reply {
    fn text(text: String) -> Self {
        Self {
            text,
            tool_calls: None,
            tool_results: None,
        }
    }
}

/// One executed tool call, as fed back to the model.
struct ToolOutcome {
    name: String,
    result: String,
}

/// Runs one user message through persistence, gating, generation and tools.
///
/// Turns are serialized: the session state lock is held for the whole turn so
/// sequence numbers within a session never interleave.
pub struct TurnOrchestrator {
    store: Arc<dyn TimelineStore>,
    history: HistoryQuery,
    gate: RelevanceGate,
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    settings: AgentSettings,
    state: Mutex<SessionState>,
}

impl TurnOrchestrator {
    /// Build an orchestrator that uses `provider` for both generation and
    /// relevance classification.
    pub fn new(
        store: Arc<dyn TimelineStore>,
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        config: &AppConfig,
    ) -> Self {
        let gate = RelevanceGate::new(
            store.clone(),
            provider.clone(),
            config.classification_model.clone(),
            config.relevance.clone(),
        );
        Self {
            history: HistoryQuery::new(store.clone()),
            store,
            gate,
            provider,
            tools,
            model: config.generation_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            settings: config.agent.clone(),
            state: Mutex::new(SessionState {
                session_id: None,
                next_sequence: 1,
            }),
        }
    }

    /// Replace the relevance gate, e.g. to classify with a different provider.
    pub fn with_gate(mut self, gate: RelevanceGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn gate(&self) -> &RelevanceGate {
        &self.gate
    }

    pub fn history(&self) -> &HistoryQuery {
        &self.history
    }

    /// Open a new session; subsequent turns are recorded under it.
    pub async fn start_session(&self, title: Option<&str>) -> Result<String, Error> {
        let mut state = self.state.lock().await;
        let id = self.store.create_session(title).await?;
        info!(session_id = %id, "Started session");
        state.open(id.clone());
        Ok(id)
    }

    /// Close the current session, if any.
    pub async fn end_session(&self, summary: Option<&str>) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        if let Some(id) = state.session_id.take() {
            self.store.end_session(&id, summary).await?;
            info!(session_id = %id, "Ended session");
        }
        state.next_sequence = 1;
        Ok(())
    }

    pub async fn current_session(&self) -> Option<String> {
        self.state.lock().await.session_id.clone()
    }

    /// How the current session relates to its last recorded activity.
    pub async fn conversation_flow(&self) -> FlowAnalysis {
        let session_id = self.current_session().await;
        self.gate.analyze_flow(session_id.as_deref()).await
    }

    /// Answer one user message.
    ///
    /// With `force_context` the relevance gate is skipped and recent history
    /// is always injected. Generation failures become a persisted apology and
    /// still return `Ok`. Storage failures propagate.
    pub async fn respond(&self, message: &str, force_context: bool) -> Result<String, Error> {
        let mut state = self.state.lock().await;

        let session_id = match state.session_id.clone() {
            Some(id) => id,
            None => {
                let id = self.store.create_session(None).await?;
                info!(session_id = %id, "Started session");
                state.open(id.clone());
                id
            }
        };

        let flow = self.gate.analyze_flow(Some(&session_id)).await;
        let user_turn = TimelineEntry::new(&session_id, Role::User, message, 0);
        self.record(&mut state, user_turn).await?;
        info!(
            session_id = %session_id,
            force_context,
            flow = %flow.conversation_type,
            prior_messages = flow.message_count,
            "Processing message"
        );

        let reply = match self.generate_reply(&session_id, message, force_context).await {
            Ok(reply) => reply,
            Err(Error::Memory(e)) => {
                warn!(session_id = %session_id, error = %e, "Storage failed mid-turn");
                let apology = self.apology(&e);
                let entry = TimelineEntry::new(&session_id, Role::Assistant, apology, 0);
                if let Err(write_err) = self.record(&mut state, entry).await {
                    warn!(error = %write_err, "Could not record apology");
                }
                return Err(Error::Memory(e));
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Generation failed");
                Reply::text(self.apology(&e))
            }
        };

        let mut entry = TimelineEntry::new(&session_id, Role::Assistant, reply.text.as_str(), 0);
        entry.tool_calls = reply.tool_calls;
        entry.tool_results = reply.tool_results;
        self.record(&mut state, entry).await?;

        Ok(reply.text)
    }

    /// Append with the next sequence number, advancing it only on success.
    async fn record(
        &self,
        state: &mut SessionState,
        mut entry: TimelineEntry,
    ) -> Result<(), MemoryError> {
        entry.sequence = state.next_sequence;
        self.store.append_entry(&entry).await?;
        state.next_sequence += 1;
        Ok(())
    }

    fn apology(&self, error: &dyn std::fmt::Display) -> String {
        format!("{} {error}", self.settings.apology_prefix)
    }

    async fn generate_reply(
        &self,
        session_id: &str,
        message: &str,
        force_context: bool,
    ) -> Result<Reply, Error> {
        let context = if force_context {
            Some(
                self.history
                    .get_recent_context(
                        self.settings.force_context_hours,
                        self.settings.force_context_limit,
                    )
                    .await?,
            )
        } else {
            let decision = self.gate.analyze_relevance(message).await;
            if decision.is_relevant
                && decision.confidence > self.gate.policy().injection_min_confidence
            {
                self.gate.get_relevant_context(&decision).await
            } else {
                debug!(
                    relevant = decision.is_relevant,
                    confidence = decision.confidence,
                    "Starting fresh"
                );
                None
            }
        };

        let messages = self.build_messages(context.as_deref(), message);
        let request = ProviderRequest::new(&self.model, messages.clone())
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
            .with_tools(self.tools.definitions());
        let response = self.generate(request).await?;

        let calls = response.message.tool_calls.clone();
        if calls.is_empty() {
            return Ok(Reply::text(response.message.content));
        }

        debug!(count = calls.len(), "Executing tool calls");
        let outcomes = self.execute_tools(session_id, &calls).await?;

        let mut followup = messages;
        followup.push(Message::system(tool_summary(&outcomes)));
        let request = ProviderRequest::new(&self.model, followup)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);
        let final_response = self.generate(request).await?;

        let text = if final_response.message.content.trim().is_empty() {
            response.message.content
        } else {
            final_response.message.content
        };

        Ok(Reply {
            text,
            tool_calls: Some(tool_calls_json(&calls)),
            tool_results: Some(tool_results_json(&outcomes)),
        })
    }

    /// System message (context, then persona) followed by the user message.
    fn build_messages(&self, context: Option<&str>, message: &str) -> Vec<Message> {
        let system = match context {
            Some(context) => format!("{context}\n\n{}", self.settings.persona),
            None => self.settings.persona.clone(),
        };
        vec![Message::system(system), Message::user(message)]
    }

    async fn generate(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let secs = self.settings.generation_timeout_secs;
        tokio::time::timeout(Duration::from_secs(secs), self.provider.complete(request))
            .await
            .map_err(|_| ProviderError::Timeout(format!("generation took longer than {secs}s")))?
    }

    async fn run_tool(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        let secs = self.settings.tool_timeout_secs;
        tokio::time::timeout(Duration::from_secs(secs), self.tools.execute(call))
            .await
            .map_err(|_| ToolError::Timeout {
                tool_name: call.name.clone(),
                timeout_secs: secs,
            })?
    }

    /// Run each call in order, recording one tool-usage entry per call.
    async fn execute_tools(
        &self,
        session_id: &str,
        calls: &[MessageToolCall],
    ) -> Result<Vec<ToolOutcome>, MemoryError> {
        let mut outcomes = Vec::with_capacity(calls.len());

        for tc in calls {
            let start = Instant::now();
            let (parameters, outcome) = match ToolCall::from_message(tc) {
                Ok(call) => {
                    let outcome = self.run_tool(&call).await;
                    (call.arguments, outcome)
                }
                Err(e) => (Value::String(tc.arguments.clone()), Err(e)),
            };
            let latency = start.elapsed();

            let (success, result) = match outcome {
                Ok(r) if r.success => (true, r.output),
                Ok(r) => (false, format!("Error: {}", r.output)),
                Err(e) => (false, format!("Error: {e}")),
            };
            if success {
                info!(tool = %tc.name, latency_ms = latency.as_millis() as u64, "Tool executed");
            } else {
                warn!(tool = %tc.name, latency_ms = latency.as_millis() as u64, %result, "Tool failed");
            }

            let usage = ToolUsageEntry::new(
                session_id,
                tc.name.as_str(),
                parameters,
                Some(Value::String(result.clone())),
                latency.as_secs_f64(),
            );
            self.store.append_tool_usage(&usage).await?;

            outcomes.push(ToolOutcome {
                name: tc.name.clone(),
                result,
            });
        }

        Ok(outcomes)
    }
}

fn tool_summary(outcomes: &[ToolOutcome]) -> String {
    let lines: Vec<String> = outcomes
        .iter()
        .map(|o| format!("Tool '{}' executed with result: {}", o.name, o.result))
        .collect();
    format!("Tool execution results:\n{}", lines.join("\n"))
}

fn tool_calls_json(calls: &[MessageToolCall]) -> Value {
    Value::Array(
        calls
            .iter()
            .map(|c| json!({"id": c.id, "name": c.name, "arguments": c.arguments}))
            .collect(),
    )
}

/// Keyed by tool name; a repeated tool keeps its last result.
fn tool_results_json(outcomes: &[ToolOutcome]) -> Value {
    let map: Map<String, Value> = outcomes
        .iter()
        .map(|o| (o.name.clone(), Value::String(o.result.clone())))
        .collect();
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{
        FailingProvider, SequentialMockProvider, SlowProvider, make_text_response, make_tool_call,
        make_tool_call_response,
    };
    use async_trait::async_trait;
    use chronicle_config::RelevancePolicy;
    use chronicle_core::timeline::{EntryQuery, ToolUsageQuery};
    use chronicle_core::tool::Tool;
    use crate::relevance::ConversationType;
    use chronicle_memory::SqliteTimeline;

    struct SendEmailTool;

    #[async_trait]
    impl Tool for SendEmailTool {
        fn name(&self) -> &str {
            "send_email"
        }
        fn description(&self) -> &str {
            "Send an email"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {"to": {"type": "string"}}})
        }
        async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
            match arguments["to"].as_str() {
                Some(to) => Ok(ToolResult::ok("", format!("Email sent to {to}"))),
                None => Err(ToolError::InvalidArguments("missing 'to'".into())),
            }
        }
    }

    struct StuckTool;

    #[async_trait]
    impl Tool for StuckTool {
        fn name(&self) -> &str {
            "book_flight"
        }
        fn description(&self) -> &str {
            "Book a flight"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _arguments: Value) -> Result<ToolResult, ToolError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ToolResult::ok("", "booked"))
        }
    }

    async fn store() -> Arc<dyn TimelineStore> {
        Arc::new(SqliteTimeline::new("sqlite::memory:").await.unwrap())
    }

    fn tools() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(SendEmailTool));
        Arc::new(registry)
    }

    fn quiet_gate(store: &Arc<dyn TimelineStore>) -> RelevanceGate {
        RelevanceGate::new(
            store.clone(),
            Arc::new(SequentialMockProvider::new(
                (0..8)
                    .map(|_| make_text_response(r#"{"is_relevant": false, "confidence": 0.9}"#))
                    .collect(),
            )),
            "nano",
            RelevancePolicy::default(),
        )
    }

    fn orchestrator(
        store: &Arc<dyn TimelineStore>,
        provider: Arc<dyn Provider>,
    ) -> TurnOrchestrator {
        TurnOrchestrator::new(store.clone(), provider, tools(), &AppConfig::default())
            .with_gate(quiet_gate(store))
    }

    async fn entries(store: &Arc<dyn TimelineStore>, session: &str) -> Vec<TimelineEntry> {
        store
            .query_entries(&EntryQuery::new().session(session))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn simple_turn_is_recorded_in_order() {
        let store = store().await;
        let provider = Arc::new(SequentialMockProvider::single_text("Hello sir"));
        let agent = orchestrator(&store, provider.clone());

        let reply = agent.respond("Hello Friday", false).await.unwrap();
        assert_eq!(reply, "Hello sir");

        let session = agent.current_session().await.unwrap();
        let recorded = entries(&store, &session).await;
        assert_eq!(recorded.len(), 2);
        assert_eq!((recorded[0].role, recorded[0].sequence), (Role::User, 1));
        assert_eq!((recorded[1].role, recorded[1].sequence), (Role::Assistant, 2));
        assert_eq!(recorded[1].content, "Hello sir");

        let request = &provider.requests()[0];
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].content, AgentSettings::default().persona);
        assert_eq!(request.messages[1].content, "Hello Friday");
        assert_eq!(request.tools.len(), 1);
    }

    #[tokio::test]
    async fn sequence_continues_across_turns() {
        let store = store().await;
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_text_response("one"),
            make_text_response("two"),
        ]));
        let agent = orchestrator(&store, provider);

        agent.respond("first", false).await.unwrap();
        agent.respond("second", false).await.unwrap();

        let session = agent.current_session().await.unwrap();
        let sequences: Vec<i64> = entries(&store, &session).await.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn tool_calls_are_executed_and_recorded() {
        let store = store().await;
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(
                vec![make_tool_call("send_email", json!({"to": "bob@example.com"}))],
                "",
            ),
            make_text_response("Email sent, sir."),
        ]));
        let agent = orchestrator(&store, provider.clone());

        let reply = agent.respond("Email Bob", false).await.unwrap();
        assert_eq!(reply, "Email sent, sir.");

        let usage = store
            .query_tool_usage(&ToolUsageQuery {
                tool_name: Some("send_email".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].parameters, json!({"to": "bob@example.com"}));
        assert_eq!(usage[0].result, Some(json!("Email sent to bob@example.com")));

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].tools.is_empty());
        let followup = requests[1].messages.last().unwrap();
        assert_eq!(followup.role, Role::System);
        assert_eq!(
            followup.content,
            "Tool execution results:\nTool 'send_email' executed with result: Email sent to bob@example.com"
        );

        let session = agent.current_session().await.unwrap();
        let recorded = entries(&store, &session).await;
        assert_eq!(recorded[1].tool_names(), vec!["send_email"]);
        assert_eq!(
            recorded[1].tool_results,
            Some(json!({"send_email": "Email sent to bob@example.com"}))
        );
    }

    #[tokio::test]
    async fn tool_failures_are_recorded_as_text() {
        let store = store().await;
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(
                vec![
                    make_tool_call("send_email", json!({})),
                    make_tool_call("launch_rocket", json!({})),
                    MessageToolCall {
                        id: "call_bad".into(),
                        name: "send_email".into(),
                        arguments: "not json".into(),
                    },
                ],
                "",
            ),
            make_text_response("Some actions failed, sir."),
        ]));
        let agent = orchestrator(&store, provider);

        let reply = agent.respond("Do things", false).await.unwrap();
        assert_eq!(reply, "Some actions failed, sir.");

        let usage = store.query_tool_usage(&ToolUsageQuery::default()).await.unwrap();
        assert_eq!(usage.len(), 3);
        for record in &usage {
            let text = record.result.as_ref().and_then(|r| r.as_str()).unwrap();
            assert!(text.starts_with("Error: "), "{text}");
        }
        assert_eq!(usage[1].tool_name, "launch_rocket");
        assert_eq!(usage[2].parameters, json!("not json"));
    }

    #[tokio::test]
    async fn stuck_tool_is_recorded_as_timed_out() {
        let store = store().await;
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(StuckTool));
        let mut config = AppConfig::default();
        config.agent.tool_timeout_secs = 1;
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(vec![make_tool_call("book_flight", json!({}))], ""),
            make_text_response("The booking service is not answering, sir."),
        ]));
        let agent = TurnOrchestrator::new(store.clone(), provider, Arc::new(registry), &config)
            .with_gate(quiet_gate(&store));

        let reply = agent.respond("Book my flight", false).await.unwrap();
        assert_eq!(reply, "The booking service is not answering, sir.");

        let usage = store.query_tool_usage(&ToolUsageQuery::default()).await.unwrap();
        assert_eq!(usage.len(), 1);
        let text = usage[0].result.as_ref().and_then(|r| r.as_str()).unwrap();
        assert_eq!(text, "Error: Tool timed out: book_flight after 1s");
        assert!(usage[0].latency_secs < 5.0);
    }

    #[tokio::test]
    async fn generation_failure_becomes_apology() {
        let store = store().await;
        let agent = orchestrator(&store, Arc::new(FailingProvider::network()));

        let reply = agent.respond("Hello", false).await.unwrap();
        assert!(reply.starts_with("I apologize, sir. An error occurred:"));
        assert!(reply.contains("connection refused"));

        let session = agent.current_session().await.unwrap();
        let recorded = entries(&store, &session).await;
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[1].content, reply);
    }

    #[tokio::test]
    async fn slow_generation_times_out() {
        let store = store().await;
        let mut config = AppConfig::default();
        config.agent.generation_timeout_secs = 1;
        let agent = TurnOrchestrator::new(
            store.clone(),
            Arc::new(SlowProvider::new(Duration::from_secs(30))),
            tools(),
            &config,
        )
        .with_gate(quiet_gate(&store));

        let reply = agent.respond("Hello", false).await.unwrap();
        assert!(reply.contains("longer than 1s"));
    }

    #[tokio::test]
    async fn force_context_skips_gate() {
        let store = store().await;
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_text_response("Noted."),
            make_text_response("You asked me to note the budget."),
        ]));
        // A gate that would panic if consulted.
        let gate = RelevanceGate::new(
            store.clone(),
            Arc::new(SequentialMockProvider::new(Vec::new())),
            "nano",
            RelevancePolicy::default(),
        );
        let agent = TurnOrchestrator::new(store.clone(), provider.clone(), tools(), &AppConfig::default())
            .with_gate(gate);

        agent.respond("Note the budget", true).await.unwrap();
        agent.respond("What did I ask?", true).await.unwrap();

        assert_eq!(provider.call_count(), 2);
        let system = &provider.requests()[1].messages[0].content;
        assert!(system.contains("Note the budget"));
        assert!(system.ends_with(&AgentSettings::default().persona));
    }

    #[tokio::test]
    async fn relevant_message_gets_context() {
        let store = store().await;
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_text_response("Budget noted."),
            make_text_response("The budget was 5k, sir."),
        ]));
        let classifier = Arc::new(SequentialMockProvider::new(vec![
            make_text_response(r#"{"is_relevant": false, "confidence": 0.9, "reasoning": "new"}"#),
            make_text_response(
                r#"{"is_relevant": true, "confidence": 0.9, "reasoning": "asks about earlier budget"}"#,
            ),
        ]));
        let gate = RelevanceGate::new(store.clone(), classifier, "nano", RelevancePolicy::default());
        let agent = TurnOrchestrator::new(store.clone(), provider.clone(), tools(), &AppConfig::default())
            .with_gate(gate);

        agent.respond("The budget is 5k", false).await.unwrap();
        agent.respond("What was the budget again?", false).await.unwrap();

        let requests = provider.requests();
        assert_eq!(requests[0].messages[0].content, AgentSettings::default().persona);
        let system = &requests[1].messages[0].content;
        assert!(system.starts_with("=== RELEVANT CONVERSATION CONTEXT ==="));
        assert!(system.contains("Relevance: asks about earlier budget"));
        assert!(system.contains("The budget is 5k"));
    }

    #[tokio::test]
    async fn low_confidence_is_not_injected() {
        let store = store().await;
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_text_response("ok"),
            make_text_response("ok again"),
        ]));
        let classifier = Arc::new(SequentialMockProvider::new(vec![
            make_text_response(r#"{"is_relevant": true, "confidence": 0.2}"#),
            make_text_response(r#"{"is_relevant": true, "confidence": 0.2}"#),
        ]));
        let gate = RelevanceGate::new(store.clone(), classifier, "nano", RelevancePolicy::default());
        let agent = TurnOrchestrator::new(store.clone(), provider.clone(), tools(), &AppConfig::default())
            .with_gate(gate);

        agent.respond("first", false).await.unwrap();
        agent.respond("second", false).await.unwrap();
        assert_eq!(
            provider.requests()[1].messages[0].content,
            AgentSettings::default().persona
        );
    }

    #[tokio::test]
    async fn conversation_flow_follows_the_session() {
        let store = store().await;
        let provider = Arc::new(SequentialMockProvider::single_text("At your service, sir."));
        let agent = orchestrator(&store, provider);

        agent.start_session(None).await.unwrap();
        let flow = agent.conversation_flow().await;
        assert_eq!(flow.conversation_type, ConversationType::New);
        assert_eq!(flow.message_count, 0);

        agent.respond("Hello", false).await.unwrap();
        let flow = agent.conversation_flow().await;
        assert_eq!(flow.conversation_type, ConversationType::Continuation);
        assert_eq!(flow.message_count, 2);
        assert!(!flow.has_tool_usage);
        assert!(flow.last_activity.is_some());
    }

    #[tokio::test]
    async fn session_lifecycle() {
        let store = store().await;
        let provider = Arc::new(SequentialMockProvider::single_text("Hi"));
        let agent = orchestrator(&store, provider);

        assert!(agent.current_session().await.is_none());
        let id = agent.start_session(Some("Morning")).await.unwrap();
        assert_eq!(agent.current_session().await.as_deref(), Some(id.as_str()));

        agent.respond("Hello", false).await.unwrap();
        agent.end_session(Some("Said hello")).await.unwrap();
        assert!(agent.current_session().await.is_none());

        let session = store.get_session(&id).await.unwrap().unwrap();
        assert_eq!(session.title.as_deref(), Some("Morning"));
        assert_eq!(session.summary.as_deref(), Some("Said hello"));
        assert!(session.end_time.is_some());

        // Ending with nothing open is fine.
        agent.end_session(None).await.unwrap();
    }
}
