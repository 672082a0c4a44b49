//! Retention sweep over observations that never made it to the archive.
//! Anything still holding a recoverable payload is queued for archival;
//! records whose payload is gone are deleted outright, artifacts included.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::Environment;
use crate::store::types::ObservationId;
use crate::store::EntityStore;

#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupReport {
    pub examined: usize,
    pub queued_for_archive: usize,
    pub deleted: usize,
}

pub struct CleanupTask {
    store: Arc<EntityStore>,
    archive_tx: mpsc::UnboundedSender<ObservationId>,
    retention: chrono::Duration,
    environment: Environment,
}

impl CleanupTask {
    pub fn new(
        store: Arc<EntityStore>,
        archive_tx: mpsc::UnboundedSender<ObservationId>,
        retention_days: i64,
        environment: Environment,
    ) -> Self {
        Self {
            store,
            archive_tx,
            retention: chrono::Duration::days(retention_days),
            environment,
        }
    }

    pub async fn run(&self) -> CleanupReport {
        let threshold = Utc::now() - self.retention;
        let mut report = CleanupReport::default();

        for observation in self.store.observations_for_cleanup(threshold).await {
            report.examined += 1;

            // Stage keeps nothing that was not vetted good.
            if self.environment == Environment::Stage && !observation.is_good() {
                self.delete(observation.id, &mut report).await;
                continue;
            }

            if observation
                .local_payload_path(self.store.media_root())
                .is_some()
            {
                if self.archive_tx.send(observation.id).is_ok() {
                    report.queued_for_archive += 1;
                }
            } else {
                // payload pointer without a file: nothing recoverable
                self.delete(observation.id, &mut report).await;
            }
        }

        if report.examined > 0 {
            tracing::info!(
                "Cleanup: {} examined, {} queued for archive, {} deleted",
                report.examined,
                report.queued_for_archive,
                report.deleted
            );
        }
        report
    }

    async fn delete(&self, id: ObservationId, report: &mut CleanupReport) {
        match self.store.delete_observation(id).await {
            Ok(_) => report.deleted += 1,
            Err(e) => tracing::warn!("Cleanup could not delete observation {}: {}", id, e),
        }
    }
}
