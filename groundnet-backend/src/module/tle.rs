//! Keeps orbital elements fresh on observations that have not started yet.
//! Observations inside the buffer window (or already running) keep the set
//! they were scheduled with, for reproducibility.

use std::sync::Arc;

use crate::module::catalog::{CatalogError, CatalogSource};
use crate::store::types::TleSet;
use crate::store::EntityStore;

#[derive(Debug, Clone, Copy, Default)]
pub struct TleRefreshReport {
    /// Distinct satellites with far-future observations.
    pub satellites: usize,
    /// Satellites the catalog returned a set for.
    pub fetched: usize,
    pub sets_inserted: usize,
    pub observations_relinked: usize,
}

pub struct TleUpdateTask {
    store: Arc<EntityStore>,
    catalog: Arc<dyn CatalogSource>,
}

impl TleUpdateTask {
    pub fn new(store: Arc<EntityStore>, catalog: Arc<dyn CatalogSource>) -> Self {
        Self { store, catalog }
    }

    /// One refresh cycle. Catalog failures are non-fatal; per-satellite
    /// fetch failures only skip that satellite.
    pub async fn run(&self) -> TleRefreshReport {
        let mut report = TleRefreshReport::default();

        let norad_cat_ids = self.store.future_norad_ids().await;
        report.satellites = norad_cat_ids.len();
        if norad_cat_ids.is_empty() {
            return report;
        }

        let sets = match self.catalog.fetch_tle_sets(&norad_cat_ids).await {
            Ok(sets) => sets,
            Err(e @ CatalogError::MissingEndpoint) => {
                tracing::warn!("TLE refresh skipped: {}", e);
                return report;
            }
            Err(e) => {
                tracing::warn!("TLE refresh deferred to next run: {}", e);
                return report;
            }
        };
        report.fetched = sets.len();

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
                report.sets_inserted += 1;
            }
            report.observations_relinked += relinked;
        }

        if report.observations_relinked > 0 {
            tracing::info!(
                "TLE refresh: {} observations re-linked across {} satellites",
                report.observations_relinked,
                report.fetched
            );
        }
        report
    }
}
