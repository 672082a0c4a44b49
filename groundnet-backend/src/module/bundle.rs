//! Packs validated audio payloads into shared zip bundles, one bundle per
//! observation id range. Writers to the same bundle are serialized through
//! a named lock; a held lock means the observation is simply picked up by a
//! later sweep.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::archive::bucket_range;
use crate::cache::MetricCache;
use crate::config::ArchiveConfig;
use crate::store::types::ObservationId;
use crate::store::EntityStore;

#[derive(Debug, Clone, Copy, Default)]
pub struct BundleReport {
    pub examined: usize,
    pub bundled: usize,
    pub deferred: usize,
}

pub fn zip_file_name(prefix: &str, from: i64, to: i64) -> String {
    format!("{}-{:09}-{:09}.zip", prefix, from, to)
}

pub struct AudioBundler {
    store: Arc<EntityStore>,
    cache: Arc<MetricCache>,
    config: ArchiveConfig,
}

impl AudioBundler {
    pub fn new(store: Arc<EntityStore>, cache: Arc<MetricCache>, config: ArchiveConfig) -> Self {
        Self {
            store,
            cache,
            config,
        }
    }

    /// Bundle every finished, not-yet-zipped payload.
    pub async fn sweep(&self) -> BundleReport {
        let mut report = BundleReport::default();
        for observation in self.store.bundle_candidates().await {
            report.examined += 1;
            match self.bundle_observation(observation.id).await {
                Ok(true) => report.bundled += 1,
                Ok(false) => report.deferred += 1,
                Err(e) => {
                    tracing::warn!("Bundling of observation {} failed: {}", observation.id, e);
                }
            }
        }
        if report.bundled > 0 {
            tracing::info!(
                "Audio bundling: {} added, {} deferred",
                report.bundled,
                report.deferred
            );
        }
        report
    }

    /// Append one observation's audio to its range bundle. Returns false
    /// when there is nothing to do or the bundle lock is held.
    pub async fn bundle_observation(&self, id: ObservationId) -> Result<bool> {
        let observation = match self.store.get_observation(id).await {
            Some(observation) => observation,
            None => return Ok(false),
        };
        if observation.audio_zipped {
            return Ok(false);
        }
        let path = match observation.local_payload_path(self.store.media_root()) {
            Some(path) => path,
            None => return Ok(false),
        };

        let (from, to) = bucket_range(id, self.config.files_per_zip);
        let lock_name = format!("ziplock-{}-{}", from, to);
        let lock_ttl = Duration::from_secs(self.config.zip_lock_seconds);
        if !self.cache.try_lock(&lock_name, lock_ttl) {
            tracing::debug!(
                "Bundle {}-{} locked, deferring observation {}",
                from,
                to,
                id
            );
            return Ok(false);
        }

        let zip_path = self
            .store
            .media_root()
            .join(zip_file_name(&self.config.zip_prefix, from, to));
        let result =
            tokio::task::spawn_blocking(move || append_to_zip(&zip_path, &path)).await;
        self.cache.unlock(&lock_name);
        result??;

        self.store
            .update_observation(id, |o| o.audio_zipped = true)
            .await?;
        Ok(true)
    }
}

fn append_to_zip(zip_path: &Path, file_path: &Path) -> Result<()> {
    let arcname = file_path
        .file_name()
        .and_then(|name| name.to_str())
        .context("payload path has no file name")?;

    let mut zip = if zip_path.exists() {
        let file = OpenOptions::new().read(true).write(true).open(zip_path)?;
        ZipWriter::new_append(file).context("Failed to open bundle for append")?
    } else {
        ZipWriter::new(File::create(zip_path)?)
    };

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(arcname, options)?;
    std::io::copy(&mut File::open(file_path)?, &mut zip)?;
    zip.finish()?;
    Ok(())
}
