//! Durable records and atomic read-modify-write access for every entity the
//! network tracks. All tables live behind one lock so cross-entity updates
//! (status derivation, TLE re-linking, cascade deletes) commit as a unit.

pub mod snapshot;
pub mod types;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::module::station::derive_status;
use self::types::*;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
}

fn not_found(kind: &'static str, id: impl ToString) -> StoreError {
    StoreError::NotFound {
        kind,
        id: id.to_string(),
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Tables {
    pub satellites: HashMap<NoradId, Satellite>,
    pub tles: Vec<Tle>,
    pub transmitters: HashMap<String, Transmitter>,
    pub stations: HashMap<StationId, Station>,
    pub station_logs: Vec<StationStatusLog>,
    pub observations: HashMap<ObservationId, Observation>,
    pub demoddata: HashMap<DemodDataId, DemodData>,
    pub next_station_id: StationId,
    pub next_observation_id: ObservationId,
    pub next_tle_id: TleId,
    pub next_frame_id: DemodDataId,
}

fn latest_tle_updated(tables: &Tables, norad_cat_id: NoradId) -> Option<DateTime<Utc>> {
    tables
        .tles
        .iter()
        .filter(|tle| tle.norad_cat_id == Some(norad_cat_id))
        .map(|tle| tle.set.updated)
        .max()
}

/// Per-transmitter vetting tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransmitterTally {
    pub good: u64,
    pub bad: u64,
    pub unknown: u64,
}

/// Per-satellite observation tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SatelliteTally {
    /// All observations not vetted failed.
    pub total: u64,
    pub good: u64,
    pub bad: u64,
    /// Finished but still unvetted.
    pub unknown: u64,
    pub future: u64,
}

pub struct EntityStore {
    tables: RwLock<Tables>,
    data_dir: PathBuf,
    media_root: PathBuf,
    heartbeat: chrono::Duration,
    tle_buffer: chrono::Duration,
}

impl EntityStore {
    /// Open the store, loading the previous snapshot when one exists.
    pub async fn open(
        data_dir: impl AsRef<Path>,
        media_root: impl AsRef<Path>,
        heartbeat_minutes: i64,
        tle_buffer_minutes: i64,
    ) -> Result<Arc<Self>> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let media_root = media_root.as_ref().to_path_buf();
        snapshot::ensure_data_dir(&data_dir).await?;
        if !media_root.exists() {
            tokio::fs::create_dir_all(&media_root).await?;
        }

        let tables = snapshot::load(&data_dir).await?.unwrap_or_default();

        Ok(Arc::new(Self {
            tables: RwLock::new(tables),
            data_dir,
            media_root,
            heartbeat: chrono::Duration::minutes(heartbeat_minutes),
            tle_buffer: chrono::Duration::minutes(tle_buffer_minutes),
        }))
    }

    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    pub fn tle_buffer(&self) -> chrono::Duration {
        self.tle_buffer
    }

    /// Write the current state to the snapshot file.
    pub async fn persist(&self) -> Result<()> {
        let tables = self.tables.read().await;
        snapshot::save(&self.data_dir, &tables).await
    }

    // ---- satellites / transmitters / TLEs ----

    /// Insert or refresh a satellite record. Returns true when the satellite
    /// was previously unknown.
    pub async fn upsert_satellite(&self, incoming: Satellite) -> bool {
        let mut tables = self.tables.write().await;
        match tables.satellites.entry(incoming.norad_cat_id) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                existing.name = incoming.name;
                existing.names = incoming.names;
                existing.image = incoming.image;
                existing.status = incoming.status;
                false
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(incoming);
                true
            }
        }
    }

    pub async fn get_satellite(&self, norad_cat_id: NoradId) -> Option<Satellite> {
        self.tables
            .read()
            .await
            .satellites
            .get(&norad_cat_id)
            .cloned()
    }

    pub async fn satellites(&self) -> Vec<Satellite> {
        let tables = self.tables.read().await;
        let mut all: Vec<Satellite> = tables.satellites.values().cloned().collect();
        all.sort_by_key(|satellite| satellite.norad_cat_id);
        all
    }

    pub async fn all_norad_ids(&self) -> BTreeSet<NoradId> {
        self.tables.read().await.satellites.keys().copied().collect()
    }

    /// Insert or refresh a transmitter by its external uuid. The local
    /// `sync_to_db` flag survives catalog refreshes. Returns true on insert.
    pub async fn upsert_transmitter(&self, incoming: Transmitter) -> bool {
        let mut tables = self.tables.write().await;
        match tables.transmitters.entry(incoming.uuid.clone()) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                let sync_to_db = entry.get().sync_to_db;
                let existing = entry.get_mut();
                *existing = incoming;
                existing.sync_to_db = sync_to_db;
                false
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(incoming);
                true
            }
        }
    }

    pub async fn get_transmitter(&self, uuid: &str) -> Option<Transmitter> {
        self.tables.read().await.transmitters.get(uuid).cloned()
    }

    pub async fn transmitters_for(&self, norad_cat_id: NoradId) -> Vec<Transmitter> {
        let tables = self.tables.read().await;
        let mut matching: Vec<Transmitter> = tables
            .transmitters
            .values()
            .filter(|transmitter| transmitter.norad_cat_id == Some(norad_cat_id))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        matching
    }

    pub async fn set_transmitter_sync(&self, uuid: &str, sync_to_db: bool) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let transmitter = tables
            .transmitters
            .get_mut(uuid)
            .ok_or_else(|| not_found("transmitter", uuid))?;
        transmitter.sync_to_db = sync_to_db;
        Ok(())
    }

    pub async fn latest_tle(&self, norad_cat_id: NoradId) -> Option<Tle> {
        let tables = self.tables.read().await;
        tables
            .tles
            .iter()
            .filter(|tle| tle.norad_cat_id == Some(norad_cat_id))
            .max_by_key(|tle| tle.set.updated)
            .cloned()
    }

    /// Record a new element set and re-link eligible future observations.
    ///
    /// History only grows for sets strictly newer than the latest known one.
    /// Observations are re-linked when they start beyond the buffer window
    /// and their linked set is strictly older; in-flight and past
    /// observations keep their assigned set. Satellites flagged
    /// `manual_tle` ignore catalog sets unless `override_manual` is set.
    pub async fn apply_tle_set(
        &self,
        norad_cat_id: NoradId,
        set: TleSet,
        override_manual: bool,
    ) -> (bool, usize) {
        let cutoff = Utc::now() + self.tle_buffer;
        let mut tables = self.tables.write().await;

        let manual = tables
            .satellites
            .get(&norad_cat_id)
            .map_or(false, |satellite| satellite.manual_tle);
        if manual && !override_manual {
            return (false, 0);
        }

        let inserted = if latest_tle_updated(&tables, norad_cat_id)
            .map_or(true, |updated| set.updated > updated)
        {
            tables.next_tle_id += 1;
            let id = tables.next_tle_id;
            tables.tles.push(Tle {
                id,
                norad_cat_id: Some(norad_cat_id),
                set: set.clone(),
            });
            true
        } else {
            false
        };

        let mut relinked = 0;
        for observation in tables.observations.values_mut() {
            if observation.norad_cat_id == norad_cat_id
                && observation.start > cutoff
                && observation
                    .tle
                    .as_ref()
                    .map_or(true, |current| set.updated > current.updated)
            {
                observation.tle = Some(set.clone());
                relinked += 1;
            }
        }

        (inserted, relinked)
    }

    // ---- stations ----

    /// Register a station. The initial status is derived and one status-log
    /// row is always appended.
    pub async fn create_station(&self, new: NewStation) -> Station {
        let now = Utc::now();
        let mut tables = self.tables.write().await;
        tables.next_station_id += 1;
        let id = tables.next_station_id;
        let status = derive_status(None, new.testing, self.heartbeat, now);
        let station = Station {
            id,
            name: new.name,
            lat: new.lat,
            lng: new.lng,
            alt: new.alt,
            qthlocator: new.qthlocator,
            testing: new.testing,
            last_seen: None,
            status,
            horizon: new.horizon,
            description: new.description,
            client_version: String::new(),
            target_utilization: new.target_utilization,
            created: now,
        };
        tables.stations.insert(id, station.clone());
        tables.station_logs.push(StationStatusLog {
            station_id: id,
            status,
            changed: now,
        });
        station
    }

    /// Apply a mutation and recompute the derived status before commit. A
    /// status transition appends exactly one status-log row.
    pub async fn update_station<F>(&self, id: StationId, mutate: F) -> Result<Station, StoreError>
    where
        F: FnOnce(&mut Station) + Send,
    {
        let now = Utc::now();
        let mut tables = self.tables.write().await;
        let heartbeat = self.heartbeat;
        let station = tables
            .stations
            .get_mut(&id)
            .ok_or_else(|| not_found("station", id))?;

        let prior_status = station.status;
        mutate(station);
        station.status = derive_status(station.last_seen, station.testing, heartbeat, now);
        let updated = station.clone();

        if updated.status != prior_status {
            tables.station_logs.push(StationStatusLog {
                station_id: id,
                status: updated.status,
                changed: now,
            });
        }
        Ok(updated)
    }

    pub async fn get_station(&self, id: StationId) -> Option<Station> {
        self.tables.read().await.stations.get(&id).cloned()
    }

    pub async fn stations(&self) -> Vec<Station> {
        let tables = self.tables.read().await;
        let mut all: Vec<Station> = tables.stations.values().cloned().collect();
        all.sort_by_key(|station| station.id);
        all
    }

    pub async fn station_logs(&self, station_id: StationId) -> Vec<StationStatusLog> {
        let tables = self.tables.read().await;
        tables
            .station_logs
            .iter()
            .filter(|log| log.station_id == station_id)
            .cloned()
            .collect()
    }

    /// Good/bad tallies over the station's non-testing vetted observations.
    pub async fn station_vet_tally(&self, station_id: StationId) -> (u64, u64) {
        let tables = self.tables.read().await;
        let mut good = 0;
        let mut bad = 0;
        for observation in tables.observations.values() {
            if observation.station_id != station_id || observation.testing {
                continue;
            }
            match observation.vetted_status {
                VettedStatus::Good => good += 1,
                VettedStatus::Bad => bad += 1,
                _ => {}
            }
        }
        (good, bad)
    }

    // ---- observations ----

    /// Schedule an observation: assigns an id, denormalizes the transmitter
    /// mode and links the latest known element set for reproducibility.
    pub async fn create_observation(&self, new: NewObservation) -> Observation {
        let mut tables = self.tables.write().await;
        tables.next_observation_id += 1;
        let id = tables.next_observation_id;
        let transmitter_mode = tables
            .transmitters
            .get(&new.transmitter_uuid)
            .and_then(|transmitter| transmitter.mode.clone());
        let tle = tables
            .tles
            .iter()
            .filter(|tle| tle.norad_cat_id == Some(new.norad_cat_id))
            .max_by_key(|tle| tle.set.updated)
            .map(|tle| tle.set.clone());

        let observation = Observation {
            id,
            norad_cat_id: new.norad_cat_id,
            transmitter_uuid: new.transmitter_uuid,
            transmitter_mode,
            station_id: new.station_id,
            author: new.author,
            start: new.start,
            end: new.end,
            tle,
            payload: None,
            waterfall: None,
            vetted_status: VettedStatus::Unknown,
            vetted_datetime: None,
            vetted_user: None,
            testing: false,
            rise_azimuth: new.rise_azimuth,
            max_altitude: new.max_altitude,
            set_azimuth: new.set_azimuth,
            archived: false,
            archive_identifier: None,
            archive_url: None,
            audio_zipped: false,
            client_version: new.client_version,
            client_metadata: new.client_metadata,
        };
        tables.observations.insert(id, observation.clone());
        observation
    }

    pub async fn get_observation(&self, id: ObservationId) -> Option<Observation> {
        self.tables.read().await.observations.get(&id).cloned()
    }

    /// Atomic read-modify-write on one observation. The mutation runs under
    /// the table lock, so precondition checks inside it are race-free.
    pub async fn update_observation<F>(
        &self,
        id: ObservationId,
        mutate: F,
    ) -> Result<Observation, StoreError>
    where
        F: FnOnce(&mut Observation) + Send,
    {
        let mut tables = self.tables.write().await;
        let observation = tables
            .observations
            .get_mut(&id)
            .ok_or_else(|| not_found("observation", id))?;
        mutate(observation);
        Ok(observation.clone())
    }

    /// Filtered listing, newest first.
    pub async fn observations(&self, filter: &ObservationFilter) -> Vec<Observation> {
        let tables = self.tables.read().await;
        let mut matching: Vec<Observation> = tables
            .observations
            .values()
            .filter(|observation| filter.matches(observation))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.start.cmp(&a.start).then(b.end.cmp(&a.end)));
        matching
    }

    /// Distinct satellites referenced by observations starting beyond the
    /// TLE buffer window.
    pub async fn future_norad_ids(&self) -> BTreeSet<NoradId> {
        let cutoff = Utc::now() + self.tle_buffer;
        let tables = self.tables.read().await;
        tables
            .observations
            .values()
            .filter(|observation| observation.start > cutoff)
            .map(|observation| observation.norad_cat_id)
            .collect()
    }

    /// Unarchived observations past the retention threshold that still carry
    /// a payload pointer.
    pub async fn observations_for_cleanup(&self, threshold: DateTime<Utc>) -> Vec<Observation> {
        let tables = self.tables.read().await;
        let mut matching: Vec<Observation> = tables
            .observations
            .values()
            .filter(|observation| {
                observation.end < threshold
                    && !observation.archived
                    && observation.payload.is_some()
            })
            .cloned()
            .collect();
        matching.sort_by_key(|observation| observation.id);
        matching
    }

    /// Finished observations with audio not yet packed into a zip bundle.
    pub async fn bundle_candidates(&self) -> Vec<Observation> {
        let now = Utc::now();
        let tables = self.tables.read().await;
        let mut matching: Vec<Observation> = tables
            .observations
            .values()
            .filter(|observation| {
                observation.payload.is_some()
                    && !observation.audio_zipped
                    && !observation.archived
                    && observation.is_past(now)
            })
            .cloned()
            .collect();
        matching.sort_by_key(|observation| observation.id);
        matching
    }

    /// Remove an observation and its demod frames. Artifact files are
    /// removed best-effort; a failure never blocks the record deletion.
    pub async fn delete_observation(&self, id: ObservationId) -> Result<Observation, StoreError> {
        let removed = {
            let mut tables = self.tables.write().await;
            let removed = tables
                .observations
                .remove(&id)
                .ok_or_else(|| not_found("observation", id))?;
            tables.demoddata.retain(|_, frame| frame.observation_id != id);
            removed
        };

        let artifact_dir = self.media_root.join(format!("data_obs/{}", id));
        if artifact_dir.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(&artifact_dir).await {
                tracing::warn!(
                    "Failed to remove artifacts for observation {}: {}",
                    id,
                    e
                );
            }
        }
        Ok(removed)
    }

    pub async fn satellite_tally(&self, norad_cat_id: NoradId) -> SatelliteTally {
        let now = Utc::now();
        let tables = self.tables.read().await;
        let mut tally = SatelliteTally::default();
        for observation in tables.observations.values() {
            if observation.norad_cat_id != norad_cat_id {
                continue;
            }
            if !observation.is_failed() {
                tally.total += 1;
            }
            match observation.vetted_status {
                VettedStatus::Good => tally.good += 1,
                VettedStatus::Bad => tally.bad += 1,
                VettedStatus::Unknown if observation.end <= now => tally.unknown += 1,
                _ => {}
            }
            if observation.end > now {
                tally.future += 1;
            }
        }
        tally
    }

    pub async fn transmitter_tally(&self, uuid: &str) -> TransmitterTally {
        let tables = self.tables.read().await;
        let mut tally = TransmitterTally::default();
        for observation in tables.observations.values() {
            if observation.transmitter_uuid != uuid {
                continue;
            }
            match observation.vetted_status {
                VettedStatus::Good => tally.good += 1,
                VettedStatus::Bad => tally.bad += 1,
                VettedStatus::Unknown => tally.unknown += 1,
                VettedStatus::Failed => {}
            }
        }
        tally
    }

    // ---- demod frames ----

    /// Attach a decoded frame to an observation. The frame gets a stable
    /// uuid used for external sync deduplication.
    pub async fn add_demod_frame(
        &self,
        observation_id: ObservationId,
        payload_demod: String,
    ) -> Result<DemodData, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.observations.contains_key(&observation_id) {
            return Err(not_found("observation", observation_id));
        }
        tables.next_frame_id += 1;
        let id = tables.next_frame_id;
        let frame = DemodData {
            id,
            uuid: Uuid::now_v7().to_string(),
            observation_id,
            payload_demod,
            copied_to_db: false,
        };
        tables.demoddata.insert(id, frame.clone());
        Ok(frame)
    }

    pub async fn demod_count(&self, observation_id: ObservationId) -> usize {
        let tables = self.tables.read().await;
        tables
            .demoddata
            .values()
            .filter(|frame| frame.observation_id == observation_id)
            .count()
    }

    /// Frames awaiting external sync: not yet copied, transmitter flagged
    /// for sync, mode not excluded.
    pub async fn frames_pending_sync(
        &self,
        excluded_modes: &[String],
    ) -> Vec<(DemodData, Observation)> {
        let tables = self.tables.read().await;
        let mut pending: Vec<(DemodData, Observation)> = tables
            .demoddata
            .values()
            .filter(|frame| !frame.copied_to_db)
            .filter_map(|frame| {
                tables
                    .observations
                    .get(&frame.observation_id)
                    .map(|observation| (frame.clone(), observation.clone()))
            })
            .filter(|(_, observation)| {
                let synced = tables
                    .transmitters
                    .get(&observation.transmitter_uuid)
                    .map_or(false, |transmitter| transmitter.sync_to_db);
                let excluded = observation
                    .transmitter_mode
                    .as_ref()
                    .map_or(false, |mode| excluded_modes.contains(mode));
                synced && !excluded
            })
            .collect();
        pending.sort_by_key(|(frame, _)| frame.id);
        pending
    }

    /// One-way: marks a frame as copied to the external database.
    pub async fn mark_frame_copied(&self, id: DemodDataId) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let frame = tables
            .demoddata
            .get_mut(&id)
            .ok_or_else(|| not_found("demoddata", id))?;
        frame.copied_to_db = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store(temp_dir: &TempDir) -> Arc<EntityStore> {
        EntityStore::open(
            temp_dir.path().join("data"),
            temp_dir.path().join("media"),
            60,
            10,
        )
        .await
        .unwrap()
    }

    fn new_station(testing: bool) -> NewStation {
        NewStation {
            name: "VHF yard".to_string(),
            lat: 38.01697,
            lng: 23.7314,
            alt: 120,
            qthlocator: String::new(),
            testing,
            horizon: 10,
            description: String::new(),
            target_utilization: None,
        }
    }

    fn new_observation(
        norad_cat_id: NoradId,
        station_id: StationId,
        start_offset_minutes: i64,
    ) -> NewObservation {
        let start = Utc::now() + chrono::Duration::minutes(start_offset_minutes);
        NewObservation {
            norad_cat_id,
            transmitter_uuid: "trx-1".to_string(),
            station_id,
            author: "op".to_string(),
            start,
            end: start + chrono::Duration::minutes(10),
            rise_azimuth: None,
            max_altitude: None,
            set_azimuth: None,
            client_version: String::new(),
            client_metadata: String::new(),
        }
    }

    fn tle_set(updated_offset_hours: i64) -> TleSet {
        TleSet {
            tle0: "ISS (ZARYA)".to_string(),
            tle1: "1 25544U 98067A   20029.54791435  .00016717  00000-0  10270-3 0  9004"
                .to_string(),
            tle2: "2 25544  51.6426 297.1399 0006846  88.9123 271.2873 15.49512395 10631"
                .to_string(),
            source: "catalog".to_string(),
            updated: Utc::now() + chrono::Duration::hours(updated_offset_hours),
        }
    }

    #[tokio::test]
    async fn station_creation_appends_one_log_row() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir).await;

        let station = store.create_station(new_station(false)).await;
        // no heartbeat yet, so the derived status is offline
        assert_eq!(station.status, StationStatus::Offline);
        assert_eq!(store.station_logs(station.id).await.len(), 1);
    }

    #[tokio::test]
    async fn station_status_transition_logs_exactly_once() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir).await;
        let station = store.create_station(new_station(false)).await;

        // heartbeat arrives: offline -> online, one new row
        let updated = store
            .update_station(station.id, |s| s.last_seen = Some(Utc::now()))
            .await
            .unwrap();
        assert_eq!(updated.status, StationStatus::Online);
        assert_eq!(store.station_logs(station.id).await.len(), 2);

        // unrelated save with no status change adds nothing
        store
            .update_station(station.id, |s| s.description = "rooftop".to_string())
            .await
            .unwrap();
        assert_eq!(store.station_logs(station.id).await.len(), 2);

        // heartbeat goes stale past the 60 minute window: online -> offline
        let updated = store
            .update_station(station.id, |s| {
                s.last_seen = Some(Utc::now() - chrono::Duration::minutes(61))
            })
            .await
            .unwrap();
        assert_eq!(updated.status, StationStatus::Offline);
        let logs = store.station_logs(station.id).await;
        assert_eq!(logs.len(), 3);
        assert_eq!(logs.last().unwrap().status, StationStatus::Offline);
    }

    #[tokio::test]
    async fn tle_relinks_only_far_future_observations() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir).await;
        let station = store.create_station(new_station(false)).await;

        let (inserted, _) = store.apply_tle_set(25544, tle_set(-2), false).await;
        assert!(inserted);

        let soon = store
            .create_observation(new_observation(25544, station.id, 5))
            .await;
        let far = store
            .create_observation(new_observation(25544, station.id, 30))
            .await;
        let old_updated = soon.tle.as_ref().unwrap().updated;

        let newer = tle_set(0);
        let (inserted, relinked) = store.apply_tle_set(25544, newer.clone(), false).await;
        assert!(inserted);
        assert_eq!(relinked, 1);

        // the observation starting within the buffer keeps its set
        let soon = store.get_observation(soon.id).await.unwrap();
        assert_eq!(soon.tle.unwrap().updated, old_updated);
        let far = store.get_observation(far.id).await.unwrap();
        assert_eq!(far.tle.unwrap().updated, newer.updated);
    }

    #[tokio::test]
    async fn tle_equal_timestamp_is_not_applied() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir).await;
        let set = tle_set(0);
        store.apply_tle_set(25544, set.clone(), false).await;
        let (inserted, relinked) = store.apply_tle_set(25544, set, false).await;
        assert!(!inserted);
        assert_eq!(relinked, 0);
    }

    #[tokio::test]
    async fn manual_tle_satellites_ignore_catalog_sets() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir).await;
        store
            .upsert_satellite(Satellite {
                norad_cat_id: 25544,
                name: "ISS".to_string(),
                names: String::new(),
                image: None,
                manual_tle: true,
                status: SatelliteStatus::Alive,
            })
            .await;

        let (inserted, _) = store.apply_tle_set(25544, tle_set(0), false).await;
        assert!(!inserted);
        let (inserted, _) = store.apply_tle_set(25544, tle_set(0), true).await;
        assert!(inserted);
    }

    #[tokio::test]
    async fn pending_sync_respects_flags_and_modes() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir).await;
        let station = store.create_station(new_station(false)).await;
        store
            .upsert_transmitter(Transmitter {
                uuid: "trx-1".to_string(),
                description: "telemetry".to_string(),
                alive: true,
                kind: TransmitterKind::Transmitter,
                uplink_low: None,
                uplink_high: None,
                uplink_drift: None,
                downlink_low: Some(437_500_000),
                downlink_high: None,
                downlink_drift: None,
                mode: Some("BPSK1200".to_string()),
                invert: false,
                baud: Some(1200.0),
                norad_cat_id: Some(25544),
                sync_to_db: true,
            })
            .await;

        let observation = store
            .create_observation(new_observation(25544, station.id, -30))
            .await;
        let frame = store
            .add_demod_frame(observation.id, "data_obs/1/frame0".to_string())
            .await
            .unwrap();

        let pending = store.frames_pending_sync(&[]).await;
        assert_eq!(pending.len(), 1);

        // excluded mode filters the frame out
        let pending = store
            .frames_pending_sync(&["BPSK1200".to_string()])
            .await;
        assert!(pending.is_empty());

        // copied frames never come back
        store.mark_frame_copied(frame.id).await.unwrap();
        assert!(store.frames_pending_sync(&[]).await.is_empty());
    }

    #[tokio::test]
    async fn delete_observation_cascades_frames() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir).await;
        let station = store.create_station(new_station(false)).await;
        let observation = store
            .create_observation(new_observation(25544, station.id, -30))
            .await;
        store
            .add_demod_frame(observation.id, "data_obs/1/frame0".to_string())
            .await
            .unwrap();

        store.delete_observation(observation.id).await.unwrap();
        assert!(store.get_observation(observation.id).await.is_none());
        assert_eq!(store.demod_count(observation.id).await, 0);
    }

    #[tokio::test]
    async fn transmitter_upsert_preserves_sync_flag() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir).await;
        let transmitter = Transmitter {
            uuid: "trx-1".to_string(),
            description: "beacon".to_string(),
            alive: true,
            kind: TransmitterKind::Transmitter,
            uplink_low: None,
            uplink_high: None,
            uplink_drift: None,
            downlink_low: None,
            downlink_high: None,
            downlink_drift: None,
            mode: Some("CW".to_string()),
            invert: false,
            baud: None,
            norad_cat_id: Some(25544),
            sync_to_db: false,
        };
        store.upsert_transmitter(transmitter.clone()).await;
        store.set_transmitter_sync("trx-1", true).await.unwrap();

        // catalog refresh must not clobber the locally set flag
        store.upsert_transmitter(transmitter).await;
        assert!(store.get_transmitter("trx-1").await.unwrap().sync_to_db);
    }
}
