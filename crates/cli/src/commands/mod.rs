pub mod chat;
pub mod history;
pub mod onboard;
pub mod purge;
pub mod stats;

use std::path::Path;
use std::sync::Arc;

use chronicle_config::AppConfig;
use chronicle_memory::SqliteTimeline;

pub fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

/// Open the timeline database, creating its directory on first use.
pub async fn open_timeline(
    config: &AppConfig,
) -> Result<Arc<SqliteTimeline>, Box<dyn std::error::Error>> {
    let path = &config.memory.database_path;
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        if !is_memory_url(path) && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            tracing::debug!(dir = %parent.display(), "Created timeline directory");
        }
    }
    let timeline = SqliteTimeline::new(path)
        .await
        .map_err(|e| format!("Failed to open timeline at {path}: {e}"))?;
    Ok(Arc::new(timeline))
}

fn is_memory_url(path: &str) -> bool {
    path.contains(":memory:")
}
