//! Staleness-bounded metrics cache
//!
//! Callers always get the last snapshot while it is younger than the staleness
//! interval. Past that, the first caller re-polls every bound backend while
//! concurrent callers wait on the same lock and then reuse its result.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::{MetricsRegistry, MetricsSnapshot, TemperatureUnits};

struct CacheEntry {
    snapshot: Arc<MetricsSnapshot>,
    polled_at: Instant,
}

pub struct MetricsCache {
    registry: Arc<MetricsRegistry>,
    staleness: Duration,
    entry: Mutex<CacheEntry>,
}

impl MetricsCache {
    /// Seeded with the readings taken during resolution
    pub fn new(registry: Arc<MetricsRegistry>, staleness: Duration) -> Self {
        let entry = CacheEntry {
            snapshot: Arc::new(registry.initial_snapshot().clone()),
            polled_at: registry.resolved_at(),
        };
        Self {
            registry,
            staleness,
            entry: Mutex::new(entry),
        }
    }

    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    pub fn staleness(&self) -> Duration {
        self.staleness
    }

    /// Raw (Celsius) snapshot, re-polled at most once per staleness window
    pub async fn snapshot(&self) -> Arc<MetricsSnapshot> {
        let mut entry = self.entry.lock().await;
        if entry.polled_at.elapsed() < self.staleness {
            return entry.snapshot.clone();
        }

        debug!("Metrics stale after {:?}, re-polling backends", entry.polled_at.elapsed());
        let fresh = self.registry.poll().await;
        entry.snapshot = Arc::new(fresh);
        entry.polled_at = Instant::now();
        entry.snapshot.clone()
    }

    /// Snapshot with temperatures converted to each device's selected unit
    pub async fn get_metrics_snapshot(&self, units: TemperatureUnits) -> MetricsSnapshot {
        self.snapshot().await.with_units(units)
    }
}
