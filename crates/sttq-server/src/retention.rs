use chrono::Utc;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

use crate::registry::TaskRegistry;
use crate::store::ArtifactStore;

/// Wall-clock-driven sweep over expired results. Runs for the lifetime of
/// the server at a fixed interval derived from the retention window.
pub async fn run(registry: Arc<TaskRegistry>, store: ArtifactStore, interval: Duration) {
    info!("retention sweeper started (interval={interval:?})");
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // skip the immediate first tick

    loop {
        ticker.tick().await;
        let now = Utc::now();
        let expired = registry.expired_result_ids(now);
        if expired.is_empty() {
            debug!("retention sweep: nothing expired");
            continue;
        }
        info!("retention sweep: removing {} expired result(s)", expired.len());
        store.sweep(now, &expired);
        registry.clear_expired_results(&expired);
    }
}
