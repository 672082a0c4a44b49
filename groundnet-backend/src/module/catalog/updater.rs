use std::sync::Arc;

use super::client::{CatalogError, CatalogSource, SatelliteRecord, TransmitterRecord};
use crate::store::types::{Satellite, SatelliteStatus, TleSet, Transmitter, TransmitterKind};
use crate::store::EntityStore;

#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogSyncReport {
    pub satellites_added: usize,
    pub satellites_updated: usize,
    pub transmitters_added: usize,
    pub transmitters_updated: usize,
    pub tle_inserted: usize,
    pub observations_relinked: usize,
}

fn satellite_from_record(record: SatelliteRecord) -> Satellite {
    let status = match record.status.as_str() {
        "dead" => SatelliteStatus::Dead,
        "re-entered" => SatelliteStatus::Reentered,
        _ => SatelliteStatus::Alive,
    };
    Satellite {
        norad_cat_id: record.norad_cat_id,
        name: record.name,
        names: record.names,
        image: record.image,
        manual_tle: false,
        status,
    }
}

fn transmitter_from_record(record: TransmitterRecord) -> Transmitter {
    let kind = match record.kind.as_deref() {
        Some("Transceiver") => TransmitterKind::Transceiver,
        Some("Transponder") => TransmitterKind::Transponder,
        _ => TransmitterKind::Transmitter,
    };
    Transmitter {
        uuid: record.uuid,
        description: record.description,
        alive: record.alive,
        kind,
        uplink_low: record.uplink_low,
        uplink_high: record.uplink_high,
        uplink_drift: record.uplink_drift,
        downlink_low: record.downlink_low,
        downlink_high: record.downlink_high,
        downlink_drift: record.downlink_drift,
        mode: record.mode,
        invert: record.invert,
        baud: record.baud,
        norad_cat_id: record.norad_cat_id,
        sync_to_db: false,
    }
}

/// Applies catalog records to the entity store: satellites upserted by
/// NORAD id, transmitters by uuid, strictly-newer TLE sets inserted (which
/// re-links eligible future observations).
pub struct CatalogUpdater {
    store: Arc<EntityStore>,
    catalog: Arc<dyn CatalogSource>,
}

impl CatalogUpdater {
    pub fn new(store: Arc<EntityStore>, catalog: Arc<dyn CatalogSource>) -> Self {
        Self { store, catalog }
    }

    pub async fn sync_satellites(
        &self,
        report: &mut CatalogSyncReport,
    ) -> Result<(), CatalogError> {
        let records = self.catalog.fetch_satellites().await?;
        for record in records {
            if self.store.upsert_satellite(satellite_from_record(record)).await {
                report.satellites_added += 1;
            } else {
                report.satellites_updated += 1;
            }
        }
        Ok(())
    }

    /// One fetch per known satellite; a failure for one satellite never
    /// aborts the rest.
    pub async fn sync_transmitters(
        &self,
        report: &mut CatalogSyncReport,
    ) -> Result<(), CatalogError> {
        for norad_cat_id in self.store.all_norad_ids().await {
            let records = match self
                .catalog
                .fetch_transmitters_by_norad_id(norad_cat_id)
                .await
            {
                Ok(records) => records,
                Err(e @ CatalogError::MissingEndpoint) => return Err(e),
                Err(e) => {
                    tracing::warn!("Transmitter fetch failed for NORAD {}: {}", norad_cat_id, e);
                    continue;
                }
            };
            for record in records {
                if self
                    .store
                    .upsert_transmitter(transmitter_from_record(record))
                    .await
                {
                    report.transmitters_added += 1;
                } else {
                    report.transmitters_updated += 1;
                }
            }
        }
        Ok(())
    }

    pub async fn sync_tle_sets(&self, report: &mut CatalogSyncReport) -> Result<(), CatalogError> {
        let norad_cat_ids = self.store.all_norad_ids().await;
        if norad_cat_ids.is_empty() {
            return Ok(());
        }
        let sets = self.catalog.fetch_tle_sets(&norad_cat_ids).await?;
        for (norad_cat_id, record) in sets {
            let set = TleSet {
                tle0: record.tle0,
                tle1: record.tle1,
                tle2: record.tle2,
                source: record.tle_source,
                updated: record.updated,
            };
            let (inserted, relinked) = self.store.apply_tle_set(norad_cat_id, set, false).await;
            if inserted {
                report.tle_inserted += 1;
            }
            report.observations_relinked += relinked;
        }
        Ok(())
    }

    /// Full sync. Catalog errors are non-fatal: the run logs, keeps whatever
    /// it applied so far and leaves the rest to the next schedule.
    pub async fn run(&self) -> CatalogSyncReport {
        let mut report = CatalogSyncReport::default();

        if let Err(e) = self.sync_satellites(&mut report).await {
            tracing::warn!("Satellite sync skipped: {}", e);
            return report;
        }
        if let Err(e) = self.sync_transmitters(&mut report).await {
            tracing::warn!("Transmitter sync stopped: {}", e);
        }
        if let Err(e) = self.sync_tle_sets(&mut report).await {
            tracing::warn!("TLE sync skipped: {}", e);
        }

        tracing::info!(
            "Catalog sync: {}/{} satellites added/updated, {}/{} transmitters, {} TLE sets, {} observations re-linked",
            report.satellites_added,
            report.satellites_updated,
            report.transmitters_added,
            report.transmitters_updated,
            report.tle_inserted,
            report.observations_relinked
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::{BTreeSet, HashMap};
    use tempfile::TempDir;

    struct StubCatalog;

    #[async_trait]
    impl CatalogSource for StubCatalog {
        async fn fetch_satellites(&self) -> Result<Vec<SatelliteRecord>, CatalogError> {
            let records = serde_json::from_value(serde_json::json!([
                {"norad_cat_id": 25544, "name": "ISS", "names": "ZARYA", "status": "alive"},
                {"norad_cat_id": 7530, "name": "OSCAR 7", "status": "re-entered"},
            ]))
            .unwrap();
            Ok(records)
        }

        async fn fetch_transmitters_by_norad_id(
            &self,
            norad_cat_id: u32,
        ) -> Result<Vec<TransmitterRecord>, CatalogError> {
            if norad_cat_id != 25544 {
                return Err(CatalogError::Status(503));
            }
            let records = serde_json::from_value(serde_json::json!([
                {"uuid": "trx-iss", "description": "APRS digipeater", "mode": "AFSK1200",
                 "downlink_low": 145_825_000i64, "norad_cat_id": 25544},
            ]))
            .unwrap();
            Ok(records)
        }

        async fn fetch_tle_sets(
            &self,
            norad_cat_ids: &BTreeSet<u32>,
        ) -> Result<HashMap<u32, super::super::TleSetRecord>, CatalogError> {
            let mut sets = HashMap::new();
            if norad_cat_ids.contains(&25544) {
                sets.insert(
                    25544,
                    serde_json::from_value(serde_json::json!({
                        "tle0": "ISS (ZARYA)",
                        "tle1": "1 25544U 98067A   20029.54791435  .00016717  00000-0  10270-3 0  9004",
                        "tle2": "2 25544  51.6426 297.1399 0006846  88.9123 271.2873 15.49512395 10631",
                        "tle_source": "catalog",
                        "updated": Utc::now().to_rfc3339(),
                    }))
                    .unwrap(),
                );
            }
            Ok(sets)
        }
    }

    async fn updater(temp_dir: &TempDir) -> CatalogUpdater {
        let store = EntityStore::open(
            temp_dir.path().join("data"),
            temp_dir.path().join("media"),
            60,
            10,
        )
        .await
        .unwrap();
        CatalogUpdater::new(store, Arc::new(StubCatalog))
    }

    #[tokio::test]
    async fn full_sync_applies_all_record_kinds() {
        let temp_dir = TempDir::new().unwrap();
        let updater = updater(&temp_dir).await;

        let report = updater.run().await;
        assert_eq!(report.satellites_added, 2);
        assert_eq!(report.transmitters_added, 1);
        assert_eq!(report.tle_inserted, 1);

        let satellite = updater.store.get_satellite(7530).await.unwrap();
        assert_eq!(satellite.status, SatelliteStatus::Reentered);
        assert!(updater.store.latest_tle(25544).await.is_some());
    }

    #[tokio::test]
    async fn second_sync_updates_instead_of_adding() {
        let temp_dir = TempDir::new().unwrap();
        let updater = updater(&temp_dir).await;

        updater.run().await;
        let report = updater.run().await;
        assert_eq!(report.satellites_added, 0);
        assert_eq!(report.satellites_updated, 2);
        assert_eq!(report.transmitters_added, 0);
        assert_eq!(report.transmitters_updated, 1);
    }

    #[tokio::test]
    async fn transmitter_failure_for_one_satellite_does_not_abort() {
        let temp_dir = TempDir::new().unwrap();
        let updater = updater(&temp_dir).await;

        // OSCAR 7 fetches fail with a 503 in the stub, ISS still syncs
        let report = updater.run().await;
        assert_eq!(report.transmitters_added, 1);
    }
}
