//! Station health: status derivation from heartbeat recency, the periodic
//! sweep that re-saves every station, and cached success-rate aggregates.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::cache::{EntityKind, Metric, MetricCache};
use crate::store::types::{StationId, StationStatus};
use crate::store::EntityStore;

/// Derive the operational status of a station. Pure: the result depends
/// only on the arguments.
///
/// Offline when the heartbeat is absent or older than the window; else
/// Testing when the station is flagged for testing; else Online.
pub fn derive_status(
    last_seen: Option<DateTime<Utc>>,
    testing: bool,
    heartbeat: chrono::Duration,
    now: DateTime<Utc>,
) -> StationStatus {
    let online = match last_seen {
        Some(last_seen) => last_seen + heartbeat > now,
        None => false,
    };
    if !online {
        StationStatus::Offline
    } else if testing {
        StationStatus::Testing
    } else {
        StationStatus::Online
    }
}

pub struct StationMonitor {
    store: Arc<EntityStore>,
    cache: Arc<MetricCache>,
}

impl StationMonitor {
    pub fn new(store: Arc<EntityStore>, cache: Arc<MetricCache>) -> Self {
        Self { store, cache }
    }

    /// Re-save every station so the derived status is recomputed against the
    /// current clock. Returns how many stations changed status.
    pub async fn sweep(&self) -> usize {
        let mut changed = 0;
        for station in self.store.stations().await {
            let prior = station.status;
            match self.store.update_station(station.id, |_| {}).await {
                Ok(updated) => {
                    if updated.status != prior {
                        tracing::info!(
                            "Station {} ({}) went {} -> {}",
                            updated.id,
                            updated.name,
                            prior,
                            updated.status
                        );
                        changed += 1;
                    }
                }
                Err(e) => tracing::warn!("Station sweep skipped a station: {}", e),
            }
        }
        changed
    }

    /// Success rate over the station's non-testing vetted observations,
    /// rounded to a percentage. `None` while nothing has been vetted.
    pub async fn success_rate(&self, station_id: StationId) -> Option<i64> {
        let key = station_id.to_string();
        if let Some(rate) = self.cache.get(EntityKind::Station, &key, Metric::SuccessRate) {
            return Some(rate);
        }

        let (good, bad) = self.store.station_vet_tally(station_id).await;
        if good + bad == 0 {
            return None;
        }
        let rate = (100.0 * good as f64 / (good + bad) as f64).round() as i64;
        self.cache
            .set(EntityKind::Station, &key, Metric::SuccessRate, rate);
        Some(rate)
    }

    /// Pre-compute the success rate of every station so interactive reads
    /// hit the cache.
    pub async fn warm_rates(&self) -> usize {
        let mut warmed = 0;
        for station in self.store.stations().await {
            if self.success_rate(station.id).await.is_some() {
                warmed += 1;
            }
        }
        warmed
    }
}
