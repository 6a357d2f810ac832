use std::sync::Arc;
use std::time::Duration;

use crate::engine::{Engine, EngineError};

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Compact the tenant's WAL once `threshold` appends have piled up since the
/// last rewrite. Returns whether a compaction ran.
pub async fn maybe_compact(engine: &Engine, threshold: u64) -> Result<bool, EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    engine.compact_wal().await?;
    tracing::info!("compacted WAL after {appends} appends");
    Ok(true)
}

/// Per-tenant background task driving `maybe_compact`.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = maybe_compact(&engine, threshold).await {
            tracing::warn!("WAL compaction failed: {e}");
        }
    }
}
