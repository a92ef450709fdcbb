//! chronicle CLI: the main entry point.
//!
//! Commands:
//! - `onboard`: Write a default config
//! - `chat`: Interactive chat or single-message mode
//! - `history`: Browse the timeline
//! - `tools`: Browse recorded tool usage
//! - `summary`: Summarize one conversation
//! - `stats`: Show store statistics
//! - `purge`: Delete history past the retention window

use chronicle_core::message::Role;
use chronicle_memory::TimeframeUnit;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "chronicle",
    about = "chronicle — an assistant that remembers when it matters",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Onboard,

    /// Chat with the assistant
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Always inject recent history, skipping the relevance check
        #[arg(short, long)]
        force_context: bool,

        /// Title for the new session
        #[arg(short, long)]
        title: Option<String>,
    },

    /// Show conversation history
    History {
        /// Timeframe unit: hours, days, weeks or months
        #[arg(long)]
        timeframe: Option<TimeframeUnit>,

        /// Number of timeframe units to look back
        #[arg(long)]
        value: Option<u32>,

        /// Comma-separated keywords; every one must match
        #[arg(short, long)]
        keywords: Option<String>,

        /// Only conversations that used this tool
        #[arg(long)]
        tool: Option<String>,

        /// Only entries from this speaker
        #[arg(long)]
        role: Option<Role>,

        /// Only entries from this session
        #[arg(short, long)]
        session: Option<String>,

        /// Maximum number of entries
        #[arg(short, long)]
        limit: Option<usize>,

        /// Show the newest entries of the last N hours instead
        #[arg(long, conflicts_with_all = ["timeframe", "value", "keywords", "tool", "role", "session"])]
        recent: Option<u32>,
    },

    /// Show recorded tool usage
    Tools {
        /// Only invocations of this tool
        #[arg(long)]
        tool: Option<String>,

        /// Timeframe unit: hours, days, weeks or months
        #[arg(long)]
        timeframe: Option<TimeframeUnit>,

        /// Number of timeframe units to look back
        #[arg(long)]
        value: Option<u32>,

        /// Maximum number of records
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Summarize one conversation
    Summary {
        /// Session id
        session_id: String,
    },

    /// Show timeline statistics
    Stats,

    /// Delete history older than the retention window
    Purge {
        /// Days to keep (defaults to memory.retention_days)
        #[arg(short, long)]
        days: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Chat {
            message,
            force_context,
            title,
        } => commands::chat::run(message, force_context, title).await?,
        Commands::History {
            timeframe,
            value,
            keywords,
            tool,
            role,
            session,
            limit,
            recent,
        } => {
            let args = chronicle_memory::RetrieveHistoryArgs {
                timeframe_unit: timeframe,
                timeframe_value: value,
                limit,
                keywords,
                tool_name: tool,
                role,
                session_id: session,
            };
            commands::history::history(args, recent).await?
        }
        Commands::Tools {
            tool,
            timeframe,
            value,
            limit,
        } => {
            let args = chronicle_memory::SearchToolUsageArgs {
                tool_name: tool,
                timeframe_unit: timeframe,
                timeframe_value: value,
                limit,
            };
            commands::history::tools(args).await?
        }
        Commands::Summary { session_id } => commands::history::summary(&session_id).await?,
        Commands::Stats => commands::stats::run().await?,
        Commands::Purge { days } => commands::purge::run(days).await?,
    }

    Ok(())
}
