//! The conversational turn loop for chronicle.
//!
//! Each incoming message goes through the same steps:
//!
//! 1. **Record** the user turn in the timeline
//! 2. **Gate**: ask the [`RelevanceGate`] whether past conversation matters,
//!    or skip straight to recent history when the operator forces it
//! 3. **Generate** a reply with the persona prompt, any injected context and
//!    the registered tools
//! 4. **Act**: run requested tools in order, record each one, then ask the
//!    model once more to summarize the results
//! 5. **Record** the assistant turn, an apology if generation failed

pub mod orchestrator;
pub mod relevance;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use orchestrator::TurnOrchestrator;
pub use relevance::{ConversationType, FlowAnalysis, RelevanceGate};
