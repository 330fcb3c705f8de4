use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::WalStore;

/// Compact the log once at least `threshold` entries have been written since
/// the last compaction. Returns whether it compacted.
pub async fn compact_if_due(store: &WalStore, threshold: u64) -> bool {
    let appended = store.appends_since_compact().await;
    if appended < threshold {
        return false;
    }
    match store.compact().await {
        Ok(()) => {
            metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
            info!("compacted wal after {appended} appends");
            true
        }
        Err(e) => {
            tracing::warn!("wal compaction failed: {e}");
            false
        }
    }
}

/// Background task for long-running hosts: check the log every `every`.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        compact_if_due(&store, threshold).await;
    }
}
