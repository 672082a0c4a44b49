//! Long-term audio archival. Payloads are uploaded to cold storage under
//! deterministic, range-bucketed item identifiers; on verified success the
//! record flips to archived in one atomic update and the local file goes
//! away. A retry on an already-archived observation is a no-op.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::{ArchiveConfig, Environment};
use crate::store::types::ObservationId;
use crate::store::EntityStore;

const UPLOAD_TIMEOUT_SECONDS: u64 = 300;
const LICENSE_URL: &str = "http://creativecommons.org/licenses/by-sa/4.0/";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive endpoint is not configured")]
    MissingEndpoint,
    /// Credentials rejected. Distinct from transport errors but equally
    /// non-fatal: the record stays unarchived for a later retry.
    #[error("archive rejected the credentials")]
    Auth,
    #[error("archive returned HTTP {0}")]
    Status(u16),
    #[error("archive request failed: {0}")]
    Request(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct ArchiveFileMeta {
    pub name: String,
    pub observation_id: ObservationId,
    pub observation_url: String,
}

#[derive(Debug, Clone)]
pub struct ArchiveItemMeta {
    pub collection: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub remote_url: String,
}

#[async_trait]
pub trait ColdStorage: Send + Sync {
    async fn upload(
        &self,
        item_id: &str,
        bytes: Vec<u8>,
        file: &ArchiveFileMeta,
        item: &ArchiveItemMeta,
    ) -> Result<UploadReceipt, ArchiveError>;
}

/// S3-style cold storage client.
pub struct S3Storage {
    endpoint: String,
    url_base: String,
    access_key: String,
    secret_key: String,
    client: reqwest::Client,
}

impl S3Storage {
    pub fn new(config: &ArchiveConfig) -> Result<Self, ArchiveError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(UPLOAD_TIMEOUT_SECONDS))
            .build()?;
        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            url_base: config.url_base.clone(),
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            client,
        })
    }
}

#[async_trait]
impl ColdStorage for S3Storage {
    async fn upload(
        &self,
        item_id: &str,
        bytes: Vec<u8>,
        file: &ArchiveFileMeta,
        item: &ArchiveItemMeta,
    ) -> Result<UploadReceipt, ArchiveError> {
        if self.endpoint.is_empty() {
            return Err(ArchiveError::MissingEndpoint);
        }

        let url = format!("{}/{}/{}", self.endpoint, item_id, file.name);
        let response = self
            .client
            .put(&url)
            .header(
                "authorization",
                format!("LOW {}:{}", self.access_key, self.secret_key),
            )
            .header("x-archive-auto-make-bucket", "1")
            .header("x-archive-meta01-collection", item.collection.clone())
            .header("x-archive-meta02-title", item.title.clone())
            .header("x-archive-meta03-mediatype", "audio")
            .header("x-archive-meta04-licenseurl", LICENSE_URL)
            .header("x-archive-meta05-description", item.description.clone())
            .header(
                "x-archive-meta06-observation-url",
                file.observation_url.clone(),
            )
            .body(bytes)
            .send()
            .await?;

        match response.status().as_u16() {
            200 => Ok(UploadReceipt {
                remote_url: format!("{}{}/{}", self.url_base, item_id, file.name),
            }),
            401 | 403 => Err(ArchiveError::Auth),
            status => Err(ArchiveError::Status(status)),
        }
    }
}

/// Id range an observation's audio is grouped under: fixed-size buckets so
/// neighbouring observations share one storage item.
pub fn bucket_range(observation_id: ObservationId, bucket_size: i64) -> (i64, i64) {
    let group = (observation_id - 1) / bucket_size * bucket_size;
    (group + 1, group + bucket_size)
}

pub fn item_identifier(
    prefix: &str,
    environment: Environment,
    observation_id: ObservationId,
    bucket_size: i64,
) -> String {
    let suffix = match environment {
        Environment::Production => "",
        Environment::Stage => "-stage",
        Environment::Development => "-dev",
    };
    let (from, to) = bucket_range(observation_id, bucket_size);
    format!("{}{}-observations-{:09}-{:09}", prefix, suffix, from, to)
}

pub struct ArchiveTask {
    store: Arc<EntityStore>,
    storage: Arc<dyn ColdStorage>,
    config: ArchiveConfig,
    environment: Environment,
}

impl ArchiveTask {
    pub fn new(
        store: Arc<EntityStore>,
        storage: Arc<dyn ColdStorage>,
        config: ArchiveConfig,
        environment: Environment,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            storage,
            config,
            environment,
        })
    }

    /// Archive one observation's audio. Returns true when an upload was
    /// performed and committed. Already-archived records and records
    /// without a local payload short-circuit, which also covers the crash
    /// window between a committed upload and the local file removal.
    pub async fn archive_observation(&self, id: ObservationId) -> anyhow::Result<bool> {
        let observation = match self.store.get_observation(id).await {
            Some(observation) => observation,
            None => return Ok(false),
        };
        if observation.archived {
            tracing::debug!("Observation {} already archived, skipping", id);
            return Ok(false);
        }
        let path = match observation.local_payload_path(self.store.media_root()) {
            Some(path) => path,
            None => return Ok(false),
        };
        let filename = match path.file_name().and_then(|name| name.to_str()) {
            Some(filename) => filename.to_string(),
            None => return Ok(false),
        };

        let item_id = item_identifier(
            &self.config.item_prefix,
            self.environment,
            id,
            self.config.bucket_size,
        );
        let (from, to) = bucket_range(id, self.config.bucket_size);
        let file = ArchiveFileMeta {
            name: filename.clone(),
            observation_id: id,
            observation_url: format!("{}/observations/{}/", self.config.site_url, id),
        };
        let item = ArchiveItemMeta {
            collection: self.config.collection.clone(),
            title: format!("Observations {:09}-{:09}", from, to),
            description: format!(
                "Audio recordings of observations {} to {} from {}.",
                from, to, self.config.site_url
            ),
        };

        let bytes = tokio::fs::read(&path).await?;
        let receipt = match self.storage.upload(&item_id, bytes, &file, &item).await {
            Ok(receipt) => receipt,
            Err(e) => {
                // Leave the record unarchived; the next run retries.
                tracing::warn!("Upload of observation {} audio failed: {}", id, e);
                return Ok(false);
            }
        };

        self.store
            .update_observation(id, |o| {
                if !o.archived {
                    o.archived = true;
                    o.archive_identifier = Some(item_id.clone());
                    o.archive_url = Some(receipt.remote_url.clone());
                    o.payload = None;
                }
            })
            .await?;

        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!("Failed to remove archived payload {}: {}", path.display(), e);
        }
        tracing::info!("Observation {} archived as {}/{}", id, item_id, filename);
        Ok(true)
    }

    /// Drain the archival queue fed by the lifecycle engine and the cleanup
    /// sweep.
    pub async fn run_worker(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<ObservationId>) {
        while let Some(id) = rx.recv().await {
            if let Err(e) = self.archive_observation(id).await {
                tracing::error!("Archival of observation {} failed: {}", id, e);
            }
        }
        tracing::info!("Archive queue closed, worker exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::audio::write_test_wav;
    use crate::store::types::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct StubStorage {
        uploads: AtomicUsize,
        fail_with: Option<fn() -> ArchiveError>,
    }

    impl StubStorage {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                uploads: AtomicUsize::new(0),
                fail_with: None,
            })
        }

        fn failing(fail_with: fn() -> ArchiveError) -> Arc<Self> {
            Arc::new(Self {
                uploads: AtomicUsize::new(0),
                fail_with: Some(fail_with),
            })
        }
    }

    #[async_trait]
    impl ColdStorage for StubStorage {
        async fn upload(
            &self,
            item_id: &str,
            _bytes: Vec<u8>,
            file: &ArchiveFileMeta,
            _item: &ArchiveItemMeta,
        ) -> Result<UploadReceipt, ArchiveError> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            if let Some(fail_with) = self.fail_with {
                return Err(fail_with());
            }
            Ok(UploadReceipt {
                remote_url: format!("https://archive.example.org/{}/{}", item_id, file.name),
            })
        }
    }

    struct Fixture {
        _temp_dir: TempDir,
        store: Arc<EntityStore>,
        observation_id: ObservationId,
    }

    async fn fixture_with_payload() -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let store = EntityStore::open(
            temp_dir.path().join("data"),
            temp_dir.path().join("media"),
            60,
            10,
        )
        .await
        .unwrap();
        let start = Utc::now() - chrono::Duration::hours(1);
        let observation = store
            .create_observation(NewObservation {
                norad_cat_id: 25544,
                transmitter_uuid: "trx-1".to_string(),
                station_id: 1,
                author: "op".to_string(),
                start,
                end: start + chrono::Duration::minutes(10),
                rise_azimuth: None,
                max_altitude: None,
                set_azimuth: None,
                client_version: String::new(),
                client_metadata: String::new(),
            })
            .await;

        let dir = store.media_root().join(format!("data_obs/{}", observation.id));
        std::fs::create_dir_all(&dir).unwrap();
        write_test_wav(&dir.join("audio.wav"), 2.0);
        store
            .update_observation(observation.id, |o| {
                o.payload = Some(observation_file_name(o.id, "audio.wav"))
            })
            .await
            .unwrap();

        Fixture {
            _temp_dir: temp_dir,
            store,
            observation_id: observation.id,
        }
    }

    fn task(fx: &Fixture, storage: Arc<StubStorage>) -> Arc<ArchiveTask> {
        ArchiveTask::new(
            fx.store.clone(),
            storage,
            ArchiveConfig::default(),
            Environment::Production,
        )
    }

    #[test]
    fn bucketing_is_range_stable() {
        assert_eq!(bucket_range(1, 1000), (1, 1000));
        assert_eq!(bucket_range(1000, 1000), (1, 1000));
        assert_eq!(bucket_range(1001, 1000), (1001, 2000));
        assert_eq!(
            item_identifier("groundnet", Environment::Production, 1500, 1000),
            "groundnet-observations-000001001-000002000"
        );
        assert_eq!(
            item_identifier("groundnet", Environment::Stage, 3, 1000),
            "groundnet-stage-observations-000000001-000001000"
        );
    }

    #[tokio::test]
    async fn successful_upload_flips_record_and_removes_file() {
        let fx = fixture_with_payload().await;
        let storage = StubStorage::ok();
        let task = task(&fx, storage.clone());

        assert!(task.archive_observation(fx.observation_id).await.unwrap());

        let observation = fx.store.get_observation(fx.observation_id).await.unwrap();
        assert!(observation.archived);
        assert!(observation.payload.is_none());
        assert!(observation.archive_url.is_some());
        assert!(observation
            .archive_identifier
            .as_deref()
            .unwrap()
            .starts_with("groundnet-observations-"));
        assert!(!fx
            .store
            .media_root()
            .join(format!("data_obs/{}/audio.wav", fx.observation_id))
            .exists());
        assert_eq!(storage.uploads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_on_archived_observation_skips_upload() {
        let fx = fixture_with_payload().await;
        let storage = StubStorage::ok();
        let task = task(&fx, storage.clone());

        assert!(task.archive_observation(fx.observation_id).await.unwrap());
        assert!(!task.archive_observation(fx.observation_id).await.unwrap());
        assert_eq!(storage.uploads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn auth_failure_leaves_record_unarchived() {
        let fx = fixture_with_payload().await;
        let storage = StubStorage::failing(|| ArchiveError::Auth);
        let task = task(&fx, storage.clone());

        assert!(!task.archive_observation(fx.observation_id).await.unwrap());

        let observation = fx.store.get_observation(fx.observation_id).await.unwrap();
        assert!(!observation.archived);
        assert!(observation.payload.is_some());
        // eligible again on the next run
        assert!(observation
            .local_payload_path(fx.store.media_root())
            .is_some());
    }

    #[tokio::test]
    async fn transport_failure_leaves_record_unarchived() {
        let fx = fixture_with_payload().await;
        let storage = StubStorage::failing(|| ArchiveError::Status(503));
        let task = task(&fx, storage);

        assert!(!task.archive_observation(fx.observation_id).await.unwrap());
        let observation = fx.store.get_observation(fx.observation_id).await.unwrap();
        assert!(!observation.archived);
    }
}
