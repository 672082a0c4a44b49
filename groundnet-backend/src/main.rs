use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use groundnet_backend::cache::MetricCache;
use groundnet_backend::config::BackendConfig;
use groundnet_backend::logging;
use groundnet_backend::module::archive::{ArchiveTask, ColdStorage, S3Storage};
use groundnet_backend::module::bundle::AudioBundler;
use groundnet_backend::module::catalog::{CatalogClient, CatalogSource, CatalogUpdater};
use groundnet_backend::module::cleanup::CleanupTask;
use groundnet_backend::module::lifecycle::{LifecycleConfig, LifecycleEngine};
use groundnet_backend::module::scheduled::ScheduledTaskManager;
use groundnet_backend::module::station::StationMonitor;
use groundnet_backend::module::syncdb::{SidsClient, SyncTask, TelemetrySink};
use groundnet_backend::module::tle::TleUpdateTask;
use groundnet_backend::service::NetworkService;
use groundnet_backend::store::EntityStore;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "groundnet.toml".to_string());
    let config = if std::path::Path::new(&config_path).exists() {
        BackendConfig::from_file(&config_path)?
    } else {
        BackendConfig::default()
    };

    let _logging_guard = logging::init_logging("logs", "groundnet-backend", &config.log_level);
    tracing::info!("Groundnet backend starting ({:?})...", config.environment);

    let store = EntityStore::open(
        &config.data_dir,
        &config.media_root,
        config.station_heartbeat_minutes,
        config.tle_update_buffer_minutes,
    )
    .await?;
    let cache = Arc::new(MetricCache::new(Duration::from_secs(config.cache_ttl_seconds)));
    let catalog: Arc<dyn CatalogSource> =
        Arc::new(CatalogClient::new(&config.catalog_api_endpoint)?);

    // Archival worker, fed by the lifecycle engine and the cleanup sweep.
    let (archive_tx, archive_rx) = mpsc::unbounded_channel();
    let storage: Arc<dyn ColdStorage> = Arc::new(S3Storage::new(&config.archive)?);
    let archive_task = ArchiveTask::new(
        store.clone(),
        storage,
        config.archive.clone(),
        config.environment,
    );
    tokio::spawn(archive_task.clone().run_worker(archive_rx));

    let engine = LifecycleEngine::new(
        store.clone(),
        cache.clone(),
        LifecycleConfig {
            environment: config.environment,
            vet_excluded_modes: config.vet_excluded_modes.clone(),
            min_audio_seconds: config.min_audio_duration_seconds,
        },
        archive_tx.clone(),
    );

    let monitor = Arc::new(StationMonitor::new(store.clone(), cache.clone()));
    let catalog_updater = Arc::new(CatalogUpdater::new(store.clone(), catalog.clone()));
    let tle_task = Arc::new(TleUpdateTask::new(store.clone(), catalog));
    let cleanup = Arc::new(CleanupTask::new(
        store.clone(),
        archive_tx,
        config.observation_retention_days,
        config.environment,
    ));
    let sink: Arc<dyn TelemetrySink> =
        Arc::new(SidsClient::new(&config.telemetry_endpoint, "groundnet")?);
    let sync = Arc::new(SyncTask::new(
        store.clone(),
        sink,
        config.not_synced_modes.clone(),
    ));
    let bundler = Arc::new(AudioBundler::new(
        store.clone(),
        cache.clone(),
        config.archive.clone(),
    ));

    let mut task_manager = ScheduledTaskManager::new(
        config.tasks.clone(),
        config.archive.zip_audio_files,
        store.clone(),
        catalog_updater.clone(),
        tle_task.clone(),
        monitor.clone(),
        cleanup,
        sync,
        bundler,
    );
    task_manager.start_all();

    // The (external) presentation layer mounts on this facade.
    let _service = NetworkService::new(
        store.clone(),
        cache,
        engine,
        monitor,
        catalog_updater,
        tle_task,
    );

    tracing::info!("Groundnet backend ready");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    store.persist().await?;
    task_manager.shutdown().await;
    Ok(())
}
