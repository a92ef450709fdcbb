//! `chronicle stats`: Timeline statistics.

use chronicle_core::timeline::TimelineStore;

use super::{load_config, open_timeline};

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let store = open_timeline(&config).await?;
    let stats = store.stats().await?;

    println!("🧠 Timeline Statistics");
    println!("======================");
    println!("  Sessions:     {}", stats.sessions);
    println!("  Entries:      {}", stats.entries);
    println!("  Tool calls:   {}", stats.tool_usages);
    println!("  Retention:    {} days", config.memory.retention_days);

    let db_path = std::path::Path::new(&config.memory.database_path);
    match std::fs::metadata(db_path) {
        Ok(meta) => println!(
            "  DB file:      {} ({})",
            db_path.display(),
            format_size(meta.len())
        ),
        Err(_) => println!("  DB file:      (not created yet)"),
    }

    Ok(())
}

fn format_size(bytes: u64) -> String {
    let kb = bytes as f64 / 1024.0;
    if kb < 1024.0 {
        format!("{kb:.1} KB")
    } else {
        format!("{:.2} MB", kb / 1024.0)
    }
}
