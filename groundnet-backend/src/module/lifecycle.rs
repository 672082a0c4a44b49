//! Observation lifecycle engine.
//!
//! Entry points are invoked by the service layer once per committed write.
//! Every derived mutation is a compare-before-write closure that re-checks
//! its precondition under the table lock, so re-running an entry point on an
//! unchanged record produces no additional writes.

use anyhow::Result;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::cache::{EntityKind, MetricCache};
use crate::config::Environment;
use crate::module::audio::{self, AudioVerdict};
use crate::store::types::{Observation, ObservationId, VettedStatus};
use crate::store::EntityStore;

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub environment: Environment,
    /// Modes where automatic vetting is unreliable (demod output exists
    /// even for garbage recordings).
    pub vet_excluded_modes: Vec<String>,
    pub min_audio_seconds: f64,
}

pub struct LifecycleEngine {
    store: Arc<EntityStore>,
    cache: Arc<MetricCache>,
    config: LifecycleConfig,
    archive_tx: mpsc::UnboundedSender<ObservationId>,
}

/// Drop the cached aggregates this observation contributes to. Called on
/// every vetting change, manual or automatic.
pub fn invalidate_vetting_aggregates(cache: &MetricCache, observation: &Observation) {
    cache.invalidate_entity(EntityKind::Station, &observation.station_id.to_string());
    cache.invalidate_entity(EntityKind::Satellite, &observation.norad_cat_id.to_string());
    cache.invalidate_entity(EntityKind::Transmitter, &observation.transmitter_uuid);
}

impl LifecycleEngine {
    pub fn new(
        store: Arc<EntityStore>,
        cache: Arc<MetricCache>,
        config: LifecycleConfig,
        archive_tx: mpsc::UnboundedSender<ObservationId>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            cache,
            config,
            archive_tx,
        })
    }

    /// Runs once, right after an observation record is first committed.
    pub async fn on_created(&self, id: ObservationId) -> Result<()> {
        let observation = match self.store.get_observation(id).await {
            Some(observation) => observation,
            None => return Ok(()),
        };

        // Observations from testing stations never count against anyone's
        // aggregates. Applied here and never re-evaluated, so a station
        // leaving testing does not rewrite history.
        if let Some(station) = self.store.get_station(observation.station_id).await {
            if station.testing && !observation.testing {
                self.store
                    .update_observation(id, |o| o.testing = true)
                    .await?;
            }
        }

        self.on_saved(id).await
    }

    /// Runs after every committed write that may have attached artifacts.
    pub async fn on_saved(&self, id: ObservationId) -> Result<()> {
        self.validate_audio(id).await?;
        self.auto_vet(id).await?;
        Ok(())
    }

    async fn validate_audio(&self, id: ObservationId) -> Result<()> {
        let observation = match self.store.get_observation(id).await {
            Some(observation) => observation,
            None => return Ok(()),
        };
        if observation.archived {
            return Ok(());
        }
        let path = match observation.local_payload_path(self.store.media_root()) {
            Some(path) => path,
            None => return Ok(()),
        };

        let min_seconds = self.config.min_audio_seconds;
        let probe_path = path.clone();
        let verdict =
            tokio::task::spawn_blocking(move || audio::inspect_payload(&probe_path, min_seconds))
                .await?;

        match verdict {
            AudioVerdict::Valid(duration) => {
                tracing::debug!(
                    "Observation {} audio validated ({:.1}s)",
                    id,
                    duration.as_secs_f64()
                );
                if self.config.environment == Environment::Production {
                    if self.archive_tx.send(id).is_err() {
                        tracing::warn!("Archive queue closed, observation {} not enqueued", id);
                    }
                }
            }
            AudioVerdict::TooShort => {
                self.discard_payload(id, path, "shorter than the minimum")
                    .await?;
            }
            AudioVerdict::Malformed => {
                self.discard_payload(id, path, "malformed container").await?;
            }
        }
        Ok(())
    }

    /// Terminal for this upload: the file goes away and the pointer is
    /// cleared, no retry.
    async fn discard_payload(&self, id: ObservationId, path: PathBuf, reason: &str) -> Result<()> {
        tracing::info!("Removing audio of observation {}: {}", id, reason);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!("Failed to remove {}: {}", path.display(), e);
        }
        self.store
            .update_observation(id, |o| o.payload = None)
            .await?;
        Ok(())
    }

    async fn auto_vet(&self, id: ObservationId) -> Result<()> {
        let observation = match self.store.get_observation(id).await {
            Some(observation) => observation,
            None => return Ok(()),
        };
        if observation.vetted_status != VettedStatus::Unknown {
            return Ok(());
        }
        if self.store.demod_count(id).await == 0 {
            return Ok(());
        }
        if let Some(mode) = &observation.transmitter_mode {
            if self.config.vet_excluded_modes.contains(mode) {
                return Ok(());
            }
        }

        // Re-check under the lock: a concurrent manual vet wins and this
        // becomes a no-op.
        let updated = self
            .store
            .update_observation(id, |o| {
                if o.vetted_status == VettedStatus::Unknown {
                    o.vetted_status = VettedStatus::Good;
                    o.vetted_datetime = Some(Utc::now());
                }
            })
            .await?;

        if updated.vetted_status != observation.vetted_status {
            tracing::info!("Observation {} auto-vetted good", id);
            invalidate_vetting_aggregates(&self.cache, &updated);
        }
        Ok(())
    }
}
