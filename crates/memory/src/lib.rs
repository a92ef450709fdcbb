//! Timeline storage and history rendering for chronicle.
//!
//! - [`SqliteTimeline`]: the durable [`TimelineStore`](chronicle_core::TimelineStore)
//! - [`HistoryQuery`]: caller-friendly reads rendered as agent-readable text

pub mod history;
pub mod render;
pub mod sqlite;

pub use history::{
    HistoryQuery, RecentContextArgs, hours_before, RetrieveHistoryArgs, SearchToolUsageArgs, Timeframe,
    TimeframeUnit,
};
pub use sqlite::SqliteTimeline;
