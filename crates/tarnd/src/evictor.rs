//! Evictor: background task that closes engines idle past their TTL.

use std::sync::Arc;
use std::time::Duration;

use tarn_core::EngineRegistry;
use tracing::debug;

/// Spawn the evictor as a background tokio task.
pub fn spawn_evictor(registry: Arc<EngineRegistry>, ttl: Duration, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let evicted = registry.evict_idle(ttl);
            if !evicted.is_empty() {
                debug!("Evictor closed {} engine(s), {} open", evicted.len(), registry.len());
            }
        }
    });
}
