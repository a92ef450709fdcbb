//! `chronicle history`, `chronicle tools`, `chronicle summary`: read-only views of the timeline.

use chronicle_memory::history::DEFAULT_RECENT_LIMIT;
use chronicle_memory::{HistoryQuery, RetrieveHistoryArgs, SearchToolUsageArgs};

use super::{load_config, open_timeline};

async fn facade() -> Result<HistoryQuery, Box<dyn std::error::Error>> {
    let config = load_config()?;
    let store = open_timeline(&config).await?;
    Ok(HistoryQuery::new(store))
}

pub async fn history(
    args: RetrieveHistoryArgs,
    recent_hours: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let history = facade().await?;
    let text = match recent_hours {
        Some(hours) => {
            history
                .get_recent_context(hours, args.limit.unwrap_or(DEFAULT_RECENT_LIMIT))
                .await?
        }
        None => history.retrieve_history(&args).await?,
    };
    println!("{text}");
    Ok(())
}

pub async fn tools(args: SearchToolUsageArgs) -> Result<(), Box<dyn std::error::Error>> {
    let text = facade().await?.search_tool_usage(&args).await?;
    println!("{text}");
    Ok(())
}

pub async fn summary(session_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let text = facade().await?.conversation_summary(session_id).await?;
    println!("{text}");
    Ok(())
}
