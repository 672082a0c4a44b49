use serde::{Deserialize, Serialize};

/// Deployment environment. Archival only runs in production, stage applies a
/// stricter cleanup policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Stage,
    #[default]
    Development,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Root directory for per-observation artifacts (payload, waterfall,
    /// demod frames), laid out as `data_obs/<observation_id>/<filename>`.
    #[serde(default = "default_media_root")]
    pub media_root: String,

    #[serde(default)]
    pub environment: Environment,

    /// Maximum allowed heartbeat silence before a station counts as offline.
    #[serde(default = "default_heartbeat_minutes")]
    pub station_heartbeat_minutes: i64,

    /// Observations older than this are archived or removed by the cleanup
    /// sweep.
    #[serde(default = "default_retention_days")]
    pub observation_retention_days: i64,

    /// Observations starting within this buffer keep their assigned TLE.
    #[serde(default = "default_tle_buffer_minutes")]
    pub tle_update_buffer_minutes: i64,

    /// Audio payloads shorter than this are discarded as invalid.
    #[serde(default = "default_min_audio_seconds")]
    pub min_audio_duration_seconds: f64,

    /// Transmitter modes that are never vetted automatically.
    #[serde(default = "default_vet_excluded_modes")]
    pub vet_excluded_modes: Vec<String>,

    /// Transmitter modes whose demod frames are never synced externally.
    #[serde(default = "default_not_synced_modes")]
    pub not_synced_modes: Vec<String>,

    /// Satellite catalog API base URL. Empty means unconfigured; catalog
    /// driven tasks skip their run.
    #[serde(default)]
    pub catalog_api_endpoint: String,

    /// External telemetry database endpoint for demod frame sync.
    #[serde(default)]
    pub telemetry_endpoint: String,

    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,

    #[serde(default)]
    pub archive: ArchiveConfig,

    #[serde(default)]
    pub tasks: TaskIntervals,
}

/// Cold storage (archive) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// S3-style upload endpoint. Empty means unconfigured.
    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub access_key: String,

    #[serde(default)]
    pub secret_key: String,

    #[serde(default = "default_archive_collection")]
    pub collection: String,

    #[serde(default = "default_archive_item_prefix")]
    pub item_prefix: String,

    /// Base URL remote payloads are served from after archival.
    #[serde(default = "default_archive_url_base")]
    pub url_base: String,

    /// Public site URL recorded in archive item metadata.
    #[serde(default = "default_site_url")]
    pub site_url: String,

    /// Observations per archive item, grouped by id range.
    #[serde(default = "default_archive_bucket_size")]
    pub bucket_size: i64,

    /// Pack validated audio into shared zip bundles.
    #[serde(default)]
    pub zip_audio_files: bool,

    /// Observations per zip bundle.
    #[serde(default = "default_files_per_zip")]
    pub files_per_zip: i64,

    #[serde(default = "default_zip_prefix")]
    pub zip_prefix: String,

    /// Expiry of the per-bundle writer lock.
    #[serde(default = "default_zip_lock_seconds")]
    pub zip_lock_seconds: u64,
}

/// Intervals for the periodic background tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskIntervals {
    #[serde(default = "default_catalog_sync_hours")]
    pub catalog_sync_hours: u64,

    #[serde(default = "default_tle_refresh_minutes")]
    pub tle_refresh_minutes: u64,

    #[serde(default = "default_station_sweep_minutes")]
    pub station_sweep_minutes: u64,

    #[serde(default = "default_rate_warm_minutes")]
    pub rate_warm_minutes: u64,

    #[serde(default = "default_cleanup_hours")]
    pub cleanup_hours: u64,

    #[serde(default = "default_sync_db_minutes")]
    pub sync_db_minutes: u64,

    #[serde(default = "default_bundle_sweep_minutes")]
    pub bundle_sweep_minutes: u64,

    /// Run the catalog sync once at startup before entering the schedule.
    #[serde(default = "default_true")]
    pub perform_initial_sync: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_media_root() -> String {
    "media".to_string()
}

fn default_heartbeat_minutes() -> i64 {
    60
}

fn default_retention_days() -> i64 {
    30
}

fn default_tle_buffer_minutes() -> i64 {
    10
}

fn default_min_audio_seconds() -> f64 {
    1.0
}

fn default_vet_excluded_modes() -> Vec<String> {
    vec!["CW".to_string()]
}

fn default_not_synced_modes() -> Vec<String> {
    vec!["CW".to_string(), "FM".to_string()]
}

fn default_cache_ttl_seconds() -> u64 {
    3600
}

fn default_archive_collection() -> String {
    "groundnet-observations".to_string()
}

fn default_archive_item_prefix() -> String {
    "groundnet".to_string()
}

fn default_archive_url_base() -> String {
    "https://archive.org/download/".to_string()
}

fn default_site_url() -> String {
    "https://network.example.org".to_string()
}

fn default_archive_bucket_size() -> i64 {
    1000
}

fn default_files_per_zip() -> i64 {
    100
}

fn default_zip_prefix() -> String {
    "groundnet-audio".to_string()
}

fn default_zip_lock_seconds() -> u64 {
    300
}

fn default_catalog_sync_hours() -> u64 {
    24
}

fn default_tle_refresh_minutes() -> u64 {
    60
}

fn default_station_sweep_minutes() -> u64 {
    1
}

fn default_rate_warm_minutes() -> u64 {
    120
}

fn default_cleanup_hours() -> u64 {
    24
}

fn default_sync_db_minutes() -> u64 {
    60
}

fn default_bundle_sweep_minutes() -> u64 {
    15
}

fn default_true() -> bool {
    true
}

impl Default for BackendConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty config must deserialize from defaults")
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty config must deserialize from defaults")
    }
}

impl Default for TaskIntervals {
    fn default() -> Self {
        toml::from_str("").expect("empty config must deserialize from defaults")
    }
}

impl BackendConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BackendConfig = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = BackendConfig::default();
        assert_eq!(config.station_heartbeat_minutes, 60);
        assert_eq!(config.tle_update_buffer_minutes, 10);
        assert_eq!(config.vet_excluded_modes, vec!["CW".to_string()]);
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.archive.bucket_size, 1000);
        assert!(!config.archive.zip_audio_files);
    }

    #[test]
    fn partial_file_overrides_defaults() {
        let config: BackendConfig = toml::from_str(
            r#"
            log_level = "debug"
            environment = "production"
            station_heartbeat_minutes = 30

            [archive]
            endpoint = "https://s3.example.org"
            bucket_size = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.station_heartbeat_minutes, 30);
        assert_eq!(config.archive.bucket_size, 500);
        // untouched sections keep their defaults
        assert_eq!(config.observation_retention_days, 30);
        assert_eq!(config.tasks.station_sweep_minutes, 1);
    }
}
