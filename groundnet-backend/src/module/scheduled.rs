//! Scheduled task manager - centralizes all periodic background work:
//! catalog sync, TLE refresh, station sweep, rate warming, cleanup,
//! telemetry sync, audio bundling and store snapshots.

use chrono::{DateTime, Timelike, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::bundle::AudioBundler;
use super::catalog::CatalogUpdater;
use super::cleanup::CleanupTask;
use super::station::StationMonitor;
use super::syncdb::SyncTask;
use super::tle::TleUpdateTask;
use crate::config::TaskIntervals;
use crate::store::EntityStore;

const CATALOG_RUN_TIMEOUT_SECONDS: u64 = 600;
const TLE_RUN_TIMEOUT_SECONDS: u64 = 300;
const SYNC_RUN_TIMEOUT_SECONDS: u64 = 600;
const SNAPSHOT_INTERVAL_MINUTES: u64 = 5;
const CLEANUP_TARGET_HOUR: u32 = 3;

pub struct ScheduledTaskManager {
    intervals: TaskIntervals,
    zip_audio_files: bool,
    store: Arc<EntityStore>,
    catalog_updater: Arc<CatalogUpdater>,
    tle_task: Arc<TleUpdateTask>,
    monitor: Arc<StationMonitor>,
    cleanup: Arc<CleanupTask>,
    sync: Arc<SyncTask>,
    bundler: Arc<AudioBundler>,
    task_handles: Vec<JoinHandle<()>>,
}

impl ScheduledTaskManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        intervals: TaskIntervals,
        zip_audio_files: bool,
        store: Arc<EntityStore>,
        catalog_updater: Arc<CatalogUpdater>,
        tle_task: Arc<TleUpdateTask>,
        monitor: Arc<StationMonitor>,
        cleanup: Arc<CleanupTask>,
        sync: Arc<SyncTask>,
        bundler: Arc<AudioBundler>,
    ) -> Self {
        Self {
            intervals,
            zip_audio_files,
            store,
            catalog_updater,
            tle_task,
            monitor,
            cleanup,
            sync,
            bundler,
            task_handles: Vec::new(),
        }
    }

    pub fn start_all(&mut self) {
        tracing::info!("Starting scheduled task manager...");

        self.task_handles.push(self.start_catalog_task());
        self.task_handles.push(self.start_tle_task());
        self.task_handles.push(self.start_station_sweep_task());
        self.task_handles.push(self.start_rate_warm_task());
        self.task_handles.push(self.start_cleanup_task());
        self.task_handles.push(self.start_sync_task());
        if self.zip_audio_files {
            self.task_handles.push(self.start_bundle_task());
        }
        self.task_handles.push(self.start_snapshot_task());

        tracing::info!("Started {} scheduled tasks", self.task_handles.len());
    }

    fn start_catalog_task(&self) -> JoinHandle<()> {
        let updater = self.catalog_updater.clone();
        let store = self.store.clone();
        let interval = Duration::from_secs(self.intervals.catalog_sync_hours * 3600);
        let initial = self.intervals.perform_initial_sync;

        tokio::spawn(async move {
            if initial {
                tracing::info!("Performing initial catalog sync...");
                Self::run_catalog_sync(&updater, &store).await;
            }
            loop {
                tokio::time::sleep(interval).await;
                Self::run_catalog_sync(&updater, &store).await;
            }
        })
    }

    async fn run_catalog_sync(updater: &Arc<CatalogUpdater>, store: &Arc<EntityStore>) {
        let timeout = Duration::from_secs(CATALOG_RUN_TIMEOUT_SECONDS);
        match tokio::time::timeout(timeout, updater.run()).await {
            Ok(_) => {
                if let Err(e) = store.persist().await {
                    tracing::error!("Snapshot after catalog sync failed: {}", e);
                }
            }
            Err(_) => tracing::error!(
                "Catalog sync timed out after {} seconds",
                timeout.as_secs()
            ),
        }
    }

    fn start_tle_task(&self) -> JoinHandle<()> {
        let task = self.tle_task.clone();
        let interval_minutes = self.intervals.tle_refresh_minutes;

        tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let next_trigger = calculate_next_trigger(now, interval_minutes);
                let sleep_duration = (next_trigger - now)
                    .to_std()
                    .unwrap_or(Duration::from_secs(60));

                tracing::debug!(
                    "Next TLE refresh at: {} (in {:.1} min)",
                    next_trigger.format("%Y-%m-%d %H:%M:%S UTC"),
                    sleep_duration.as_secs_f64() / 60.0
                );
                tokio::time::sleep(sleep_duration).await;

                let timeout = Duration::from_secs(TLE_RUN_TIMEOUT_SECONDS);
                if tokio::time::timeout(timeout, task.run()).await.is_err() {
                    tracing::error!("TLE refresh timed out after {} seconds", timeout.as_secs());
                }
            }
        })
    }

    fn start_station_sweep_task(&self) -> JoinHandle<()> {
        let monitor = self.monitor.clone();
        let interval = Duration::from_secs(self.intervals.station_sweep_minutes * 60);

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let changed = monitor.sweep().await;
                if changed > 0 {
                    tracing::info!("Station sweep: {} status changes", changed);
                }
            }
        })
    }

    fn start_rate_warm_task(&self) -> JoinHandle<()> {
        let monitor = self.monitor.clone();
        let interval = Duration::from_secs(self.intervals.rate_warm_minutes * 60);

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let warmed = monitor.warm_rates().await;
                tracing::debug!("Warmed success rates for {} stations", warmed);
            }
        })
    }

    fn start_cleanup_task(&self) -> JoinHandle<()> {
        let cleanup = self.cleanup.clone();
        let interval_hours = self.intervals.cleanup_hours;

        tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let sleep_duration = if interval_hours >= 24 {
                    // daily, in the quiet early-morning window
                    (calculate_next_daily_hour(now, CLEANUP_TARGET_HOUR) - now)
                        .to_std()
                        .unwrap_or(Duration::from_secs(3600))
                } else {
                    Duration::from_secs(interval_hours * 3600)
                };
                tokio::time::sleep(sleep_duration).await;
                cleanup.run().await;
            }
        })
    }

    fn start_sync_task(&self) -> JoinHandle<()> {
        let sync = self.sync.clone();
        let interval = Duration::from_secs(self.intervals.sync_db_minutes * 60);

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let timeout = Duration::from_secs(SYNC_RUN_TIMEOUT_SECONDS);
                if tokio::time::timeout(timeout, sync.run()).await.is_err() {
                    tracing::error!(
                        "Telemetry sync timed out after {} seconds",
                        timeout.as_secs()
                    );
                }
            }
        })
    }

    fn start_bundle_task(&self) -> JoinHandle<()> {
        let bundler = self.bundler.clone();
        let interval = Duration::from_secs(self.intervals.bundle_sweep_minutes * 60);

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                bundler.sweep().await;
            }
        })
    }

    fn start_snapshot_task(&self) -> JoinHandle<()> {
        let store = self.store.clone();
        let interval = Duration::from_secs(SNAPSHOT_INTERVAL_MINUTES * 60);

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = store.persist().await {
                    tracing::error!("Periodic store snapshot failed: {}", e);
                }
            }
        })
    }

    /// Gracefully shut down all tasks.
    pub async fn shutdown(self) {
        tracing::info!("Shutting down scheduled task manager...");
        for handle in self.task_handles {
            handle.abort();
        }
        tracing::info!("All scheduled tasks stopped");
    }
}

/// Short intervals run on fixed minutes past the hour (xx:02, xx:17,
/// xx:32, xx:47); longer ones are plain offsets from now.
fn calculate_next_trigger(now: DateTime<Utc>, interval_minutes: u64) -> DateTime<Utc> {
    if interval_minutes > 15 {
        return now + chrono::Duration::minutes(interval_minutes as i64);
    }

    const TARGET_MINUTES: [u32; 4] = [2, 17, 32, 47];
    for &target in &TARGET_MINUTES {
        if target > now.minute() {
            return now
                .with_minute(target)
                .unwrap()
                .with_second(0)
                .unwrap()
                .with_nanosecond(0)
                .unwrap();
        }
    }
    (now + chrono::Duration::hours(1))
        .with_minute(TARGET_MINUTES[0])
        .unwrap()
        .with_second(0)
        .unwrap()
        .with_nanosecond(0)
        .unwrap()
}

fn calculate_next_daily_hour(now: DateTime<Utc>, target_hour: u32) -> DateTime<Utc> {
    let candidate = now
        .with_hour(target_hour)
        .unwrap()
        .with_minute(0)
        .unwrap()
        .with_second(0)
        .unwrap()
        .with_nanosecond(0)
        .unwrap();
    if candidate > now {
        candidate
    } else {
        candidate + chrono::Duration::days(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_calculate_next_trigger_fixed_minutes() {
        // At 10:00 with a short interval the next slot is 10:02
        let now = Utc::now()
            .with_hour(10)
            .unwrap()
            .with_minute(0)
            .unwrap()
            .with_second(0)
            .unwrap();
        let next = calculate_next_trigger(now, 15);
        assert_eq!(next.minute(), 2);
        assert_eq!(next.hour(), 10);

        // At 10:50 the slots are exhausted, wrap to 11:02
        let now = now.with_minute(50).unwrap();
        let next = calculate_next_trigger(now, 15);
        assert_eq!(next.minute(), 2);
        assert_eq!(next.hour(), 11);
    }

    #[test]
    fn test_calculate_next_trigger_plain_interval() {
        let now = Utc::now();
        let next = calculate_next_trigger(now, 60);
        assert_eq!(next - now, chrono::Duration::minutes(60));
    }

    #[test]
    fn test_calculate_next_daily_hour() {
        // At 01:00 the 03:00 slot is still ahead today
        let now = Utc::now()
            .with_hour(1)
            .unwrap()
            .with_minute(0)
            .unwrap()
            .with_second(0)
            .unwrap();
        let next = calculate_next_daily_hour(now, 3);
        assert_eq!(next.hour(), 3);
        assert_eq!(next.ordinal(), now.ordinal());

        // At 05:00 it moved to tomorrow
        let now = now.with_hour(5).unwrap();
        let next = calculate_next_daily_hour(now, 3);
        assert_eq!(next.hour(), 3);
        assert_eq!((next - now).num_hours(), 22);
    }
}
