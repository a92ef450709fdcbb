//! `chronicle purge`: Retention cleanup.

use chronicle_config::MAX_RETENTION_DAYS;
use chronicle_core::timeline::TimelineStore;

use super::{load_config, open_timeline};

pub async fn run(days: Option<u32>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let days = days.unwrap_or(config.memory.retention_days);
    check_days(days)?;

    let store = open_timeline(&config).await?;
    let report = store.purge_older_than(days).await?;

    println!("🗑️  Purged history older than {days} days");
    println!("  Entries removed:     {}", report.entries);
    println!("  Tool calls removed:  {}", report.tool_usages);
    println!("  Sessions removed:    {}", report.sessions);

    Ok(())
}

fn check_days(days: u32) -> Result<(), String> {
    if !(1..=MAX_RETENTION_DAYS).contains(&days) {
        return Err(format!("--days must be between 1 and {MAX_RETENTION_DAYS}"));
    }
    Ok(())
}
