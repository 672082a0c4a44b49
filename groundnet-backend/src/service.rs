//! The API the presentation layer talks to. Write operations run the
//! lifecycle engine after commit; reads go through the store (and the
//! metric cache for aggregates).

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;

use crate::cache::{EntityKind, Metric, MetricCache};
use crate::module::catalog::CatalogUpdater;
use crate::module::lifecycle::{invalidate_vetting_aggregates, LifecycleEngine};
use crate::module::station::StationMonitor;
use crate::module::tle::TleUpdateTask;
use crate::store::types::*;
use crate::store::{EntityStore, SatelliteTally, StoreError, TransmitterTally};

pub struct NetworkService {
    store: Arc<EntityStore>,
    cache: Arc<MetricCache>,
    engine: Arc<LifecycleEngine>,
    monitor: Arc<StationMonitor>,
    catalog_updater: Arc<CatalogUpdater>,
    tle_task: Arc<TleUpdateTask>,
}

impl NetworkService {
    pub fn new(
        store: Arc<EntityStore>,
        cache: Arc<MetricCache>,
        engine: Arc<LifecycleEngine>,
        monitor: Arc<StationMonitor>,
        catalog_updater: Arc<CatalogUpdater>,
        tle_task: Arc<TleUpdateTask>,
    ) -> Self {
        Self {
            store,
            cache,
            engine,
            monitor,
            catalog_updater,
            tle_task,
        }
    }

    // ---- stations ----

    pub async fn register_station(&self, new: NewStation) -> Station {
        let station = self.store.create_station(new).await;
        tracing::info!("Station {} ({}) registered", station.id, station.name);
        station
    }

    /// Client check-in: refreshes the heartbeat, which may flip the derived
    /// status back to online/testing.
    pub async fn station_heartbeat(
        &self,
        id: StationId,
        client_version: &str,
    ) -> Result<Station, StoreError> {
        let client_version = client_version.to_string();
        self.store
            .update_station(id, move |station| {
                station.last_seen = Some(Utc::now());
                if !client_version.is_empty() {
                    station.client_version = client_version;
                }
            })
            .await
    }

    pub async fn set_station_testing(
        &self,
        id: StationId,
        testing: bool,
    ) -> Result<Station, StoreError> {
        self.store
            .update_station(id, move |station| station.testing = testing)
            .await
    }

    pub async fn stations(&self) -> Vec<Station> {
        self.store.stations().await
    }

    pub async fn get_station(&self, id: StationId) -> Option<Station> {
        self.store.get_station(id).await
    }

    pub async fn station_success_rate(&self, id: StationId) -> Option<i64> {
        self.monitor.success_rate(id).await
    }

    // ---- observations ----

    pub async fn create_observation(&self, new: NewObservation) -> Result<Observation> {
        let observation = self.store.create_observation(new).await;
        self.engine.on_created(observation.id).await?;
        Ok(self
            .store
            .get_observation(observation.id)
            .await
            .unwrap_or(observation))
    }

    pub async fn get_observation(&self, id: ObservationId) -> Option<Observation> {
        self.store.get_observation(id).await
    }

    pub async fn observations(&self, filter: &ObservationFilter) -> Vec<Observation> {
        self.store.observations(filter).await
    }

    /// Store an uploaded audio payload and run validation on it.
    pub async fn attach_audio(
        &self,
        id: ObservationId,
        filename: &str,
        bytes: &[u8],
    ) -> Result<Observation> {
        let relative = self.write_artifact(id, filename, bytes).await?;
        self.store
            .update_observation(id, move |o| o.payload = Some(relative))
            .await?;
        self.engine.on_saved(id).await?;
        Ok(self.expect_observation(id).await?)
    }

    pub async fn attach_waterfall(
        &self,
        id: ObservationId,
        filename: &str,
        bytes: &[u8],
    ) -> Result<Observation> {
        let relative = self.write_artifact(id, filename, bytes).await?;
        self.store
            .update_observation(id, move |o| o.waterfall = Some(relative))
            .await?;
        Ok(self.expect_observation(id).await?)
    }

    /// Store a decoded frame. The auto-vet evaluation that follows sees the
    /// frame count including this frame.
    pub async fn attach_demod_frame(
        &self,
        id: ObservationId,
        filename: &str,
        bytes: &[u8],
    ) -> Result<DemodData> {
        let relative = self.write_artifact(id, filename, bytes).await?;
        let frame = self.store.add_demod_frame(id, relative).await?;
        self.engine.on_saved(id).await?;
        Ok(frame)
    }

    /// Manual vetting. Setting back to unknown is rejected silently; the
    /// automatic path can never override what is recorded here.
    pub async fn vet_observation(
        &self,
        id: ObservationId,
        status: VettedStatus,
        user: &str,
    ) -> Result<Observation, StoreError> {
        if status == VettedStatus::Unknown {
            return self
                .store
                .get_observation(id)
                .await
                .ok_or(StoreError::NotFound {
                    kind: "observation",
                    id: id.to_string(),
                });
        }

        let user = user.to_string();
        let updated = self
            .store
            .update_observation(id, move |o| {
                o.vetted_status = status;
                o.vetted_datetime = Some(Utc::now());
                o.vetted_user = Some(user);
            })
            .await?;
        invalidate_vetting_aggregates(&self.cache, &updated);
        Ok(updated)
    }

    // ---- satellites / transmitters / TLEs ----

    pub async fn satellites(&self) -> Vec<Satellite> {
        self.store.satellites().await
    }

    pub async fn get_satellite(&self, norad_cat_id: NoradId) -> Option<Satellite> {
        self.store.get_satellite(norad_cat_id).await
    }

    pub async fn satellite_stats(&self, norad_cat_id: NoradId) -> SatelliteTally {
        self.store.satellite_tally(norad_cat_id).await
    }

    pub async fn transmitters_for(&self, norad_cat_id: NoradId) -> Vec<Transmitter> {
        self.store.transmitters_for(norad_cat_id).await
    }

    pub async fn transmitter_stats(&self, uuid: &str) -> TransmitterTally {
        let cached = (
            self.cache.get(EntityKind::Transmitter, uuid, Metric::GoodCount),
            self.cache.get(EntityKind::Transmitter, uuid, Metric::BadCount),
            self.cache
                .get(EntityKind::Transmitter, uuid, Metric::UnknownCount),
        );
        if let (Some(good), Some(bad), Some(unknown)) = cached {
            return TransmitterTally {
                good: good as u64,
                bad: bad as u64,
                unknown: unknown as u64,
            };
        }

        let tally = self.store.transmitter_tally(uuid).await;
        self.cache
            .set(EntityKind::Transmitter, uuid, Metric::GoodCount, tally.good as i64);
        self.cache
            .set(EntityKind::Transmitter, uuid, Metric::BadCount, tally.bad as i64);
        self.cache.set(
            EntityKind::Transmitter,
            uuid,
            Metric::UnknownCount,
            tally.unknown as i64,
        );
        tally
    }

    pub async fn set_transmitter_sync(
        &self,
        uuid: &str,
        sync_to_db: bool,
    ) -> Result<(), StoreError> {
        self.store.set_transmitter_sync(uuid, sync_to_db).await
    }

    /// Operator-supplied element set, applied even to `manual_tle`
    /// satellites.
    pub async fn add_manual_tle(&self, norad_cat_id: NoradId, set: TleSet) -> (bool, usize) {
        self.store.apply_tle_set(norad_cat_id, set, true).await
    }

    // ---- admin triggers ----

    /// Enqueue a full catalog sync outside the schedule.
    pub fn trigger_catalog_sync(&self) {
        let updater = self.catalog_updater.clone();
        tokio::spawn(async move {
            updater.run().await;
        });
    }

    /// Enqueue a TLE refresh outside the schedule.
    pub fn trigger_tle_refresh(&self) {
        let task = self.tle_task.clone();
        tokio::spawn(async move {
            task.run().await;
        });
    }

    // ---- internals ----

    async fn write_artifact(
        &self,
        id: ObservationId,
        filename: &str,
        bytes: &[u8],
    ) -> Result<String> {
        if self.store.get_observation(id).await.is_none() {
            return Err(StoreError::NotFound {
                kind: "observation",
                id: id.to_string(),
            }
            .into());
        }
        let relative = observation_file_name(id, filename);
        let path = self.store.media_root().join(&relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(relative)
    }

    async fn expect_observation(&self, id: ObservationId) -> Result<Observation, StoreError> {
        self.store
            .get_observation(id)
            .await
            .ok_or(StoreError::NotFound {
                kind: "observation",
                id: id.to_string(),
            })
    }
}
