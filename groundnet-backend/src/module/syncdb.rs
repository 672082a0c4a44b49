//! Forwards vetted demodulated frames to the external telemetry database.
//! Delivery is at-least-once: `copied_to_db` flips only after a confirmed
//! success, and every push carries the frame's stable uuid so the receiving
//! side can deduplicate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::store::types::NoradId;
use crate::store::EntityStore;

const REQUEST_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("telemetry endpoint is not configured")]
    MissingEndpoint,
    #[error("telemetry push failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("telemetry endpoint returned HTTP {0}")]
    Status(u16),
}

#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn push_frame(
        &self,
        frame_uuid: &str,
        norad_cat_id: NoradId,
        timestamp: DateTime<Utc>,
        payload: &[u8],
    ) -> Result<(), SyncError>;
}

fn hex_encode(payload: &[u8]) -> String {
    payload.iter().map(|byte| format!("{:02X}", byte)).collect()
}

/// SiDS-style HTTP sink: one POST per frame, hex encoded.
pub struct SidsClient {
    endpoint: String,
    source: String,
    client: reqwest::Client,
}

impl SidsClient {
    pub fn new(endpoint: &str, source: &str) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .build()?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            source: source.to_string(),
            client,
        })
    }
}

#[async_trait]
impl TelemetrySink for SidsClient {
    async fn push_frame(
        &self,
        frame_uuid: &str,
        norad_cat_id: NoradId,
        timestamp: DateTime<Utc>,
        payload: &[u8],
    ) -> Result<(), SyncError> {
        if self.endpoint.is_empty() {
            return Err(SyncError::MissingEndpoint);
        }

        let response = self
            .client
            .post(&self.endpoint)
            .form(&[
                ("frame_id", frame_uuid.to_string()),
                ("noradID", norad_cat_id.to_string()),
                ("source", self.source.clone()),
                ("timestamp", timestamp.to_rfc3339()),
                ("frame", hex_encode(payload)),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SyncError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncReport {
    pub pending: usize,
    pub pushed: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub struct SyncTask {
    store: Arc<EntityStore>,
    sink: Arc<dyn TelemetrySink>,
    not_synced_modes: Vec<String>,
}

impl SyncTask {
    pub fn new(
        store: Arc<EntityStore>,
        sink: Arc<dyn TelemetrySink>,
        not_synced_modes: Vec<String>,
    ) -> Self {
        Self {
            store,
            sink,
            not_synced_modes,
        }
    }

    /// Push every pending frame. A failed frame is left pending for the
    /// next run and never blocks the rest.
    pub async fn run(&self) -> SyncReport {
        let mut report = SyncReport::default();
        let pending = self.store.frames_pending_sync(&self.not_synced_modes).await;
        report.pending = pending.len();

        for (frame, observation) in pending {
            let path = self.store.media_root().join(&frame.payload_demod);
            let payload = match tokio::fs::read(&path).await {
                Ok(payload) => payload,
                Err(_) => {
                    report.skipped += 1;
                    continue;
                }
            };

            match self
                .sink
                .push_frame(
                    &frame.uuid,
                    observation.norad_cat_id,
                    observation.end,
                    &payload,
                )
                .await
            {
                Ok(()) => {
                    if let Err(e) = self.store.mark_frame_copied(frame.id).await {
                        tracing::warn!("Frame {} pushed but not marked: {}", frame.id, e);
                    } else {
                        report.pushed += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "Frame {} of observation {} not synced: {}",
                        frame.id,
                        observation.id,
                        e
                    );
                    report.failed += 1;
                }
            }
        }

        if report.pushed > 0 || report.failed > 0 {
            tracing::info!(
                "Telemetry sync: {} pushed, {} failed, {} skipped of {} pending",
                report.pushed,
                report.failed,
                report.skipped,
                report.pending
            );
        }
        report
    }
}
