//! Tools the generation model can call to pull history on demand.
//!
//! The three history reads are the only way the model reaches the timeline
//! outside automatic injection. Requests are decoded into a typed
//! [`HistoryRequest`] before anything touches storage.

pub mod history;

use chronicle_core::tool::ToolRegistry;
use chronicle_memory::HistoryQuery;

pub use history::{HistoryRequest, HistoryTool, HistoryToolKind};

/// Register `retrieve_history`, `get_recent_context` and `search_tool_usage`.
pub fn register_history_tools(registry: &mut ToolRegistry, history: &HistoryQuery) {
    for kind in HistoryToolKind::ALL {
        registry.register(Box::new(HistoryTool::new(kind, history.clone())));
    }
}

/// A registry holding only the history tools.
pub fn history_registry(history: &HistoryQuery) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    register_history_tools(&mut registry, history);
    registry
}
