//! # Chronicle Core
//!
//! Domain types, traits, and error definitions for the chronicle
//! conversation-timeline memory. This crate has **no storage or network
//! dependencies**; it defines the model every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every seam is a trait here, implementations live in their own crates:
//! - [`TimelineStore`]: durable log of sessions, turns and tool usage
//! - [`Provider`]: generation and classification model boundary
//! - [`Tool`]: externally implemented actions, held in an explicit [`ToolRegistry`]
//!
//! Tests substitute scripted providers, fake tools, and in-memory SQLite.

pub mod error;
pub mod message;
pub mod provider;
pub mod timeline;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use message::{Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition};
pub use timeline::{
    EntryQuery, PurgeReport, RelevanceDecision, Session, SessionSummary, TimelineEntry, TimelineStats,
    TimelineStore, ToolUsageEntry, ToolUsageQuery,
};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
