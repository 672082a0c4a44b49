//! Satellite catalog integration: the HTTP client consuming the external
//! registry and the updater that applies fetched records to the store.

mod client;
mod updater;

pub use client::{
    CatalogClient, CatalogError, CatalogSource, SatelliteRecord, TleSetRecord, TransmitterRecord,
};
pub use updater::{CatalogSyncReport, CatalogUpdater};
