use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::MissedTickBehavior;

use crate::{
    model::{RefreshError, RefreshOutcome, StationId},
    repository::StorageError,
    updater::StationWeatherUpdater,
};

#[derive(Debug)]
pub struct StationFailure {
    pub station_id: StationId,
    pub error: RefreshError,
}

/// Tally of one pass over every station.
#[derive(Debug, Default)]
pub struct BulkSummary {
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<StationFailure>,
}

impl BulkSummary {
    pub fn total(&self) -> usize {
        self.updated + self.skipped + self.failed
    }
}

/// Runs the updater over every known station, one after another.
#[derive(Debug, Clone)]
pub struct BulkRefreshCoordinator {
    updater: Arc<StationWeatherUpdater>,
}

impl BulkRefreshCoordinator {
    pub fn new(updater: Arc<StationWeatherUpdater>) -> Self {
        Self { updater }
    }

    /// Attempt a refresh of every station. A failing station is recorded
    /// and the pass continues; only failing to list stations aborts it.
    pub async fn refresh_all(&self) -> Result<BulkSummary, StorageError> {
        let ids = self.updater.repository().station_ids().await?;
        let mut summary = BulkSummary::default();

        for station_id in ids {
            match self.updater.refresh(station_id).await {
                RefreshOutcome::Updated { .. } => summary.updated += 1,
                RefreshOutcome::Skipped { .. } => summary.skipped += 1,
                RefreshOutcome::Failed { error } => {
                    log_failure(station_id, &error);
                    summary.failed += 1;
                    summary.errors.push(StationFailure { station_id, error });
                }
            }
        }

        log_summary(&summary);
        Ok(summary)
    }
}

fn log_failure(station_id: StationId, error: &RefreshError) {
    match error {
        RefreshError::Provider(e) if e.is_systemic() => {
            tracing::error!(%station_id, kind = error.kind(), "Weather refresh failed: {error}");
        }
        _ => tracing::warn!(%station_id, kind = error.kind(), "Weather refresh failed: {error}"),
    }
}

fn log_summary(summary: &BulkSummary) {
    let (updated, skipped, failed) = (summary.updated, summary.skipped, summary.failed);

    if failed == 0 {
        tracing::info!(updated, skipped, failed, "Bulk refresh complete");
    } else if updated == 0 && skipped == 0 {
        tracing::error!(updated, skipped, failed, "Bulk refresh complete, every station failed");
    } else {
        tracing::warn!(updated, skipped, failed, "Bulk refresh complete with failures");
    }
}

/// Call `refresh_all` every `period` until `shutdown` resolves.
///
/// The first pass runs immediately. Ticks missed while a pass is running
/// are dropped, not queued.
pub async fn run_schedule<F>(coordinator: BulkRefreshCoordinator, period: Duration, shutdown: F)
where
    F: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    tracing::info!(period_secs = period.as_secs(), "Scheduled refresh started");

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                if let Err(e) = coordinator.refresh_all().await {
                    tracing::error!("Could not list stations for scheduled refresh: {e}");
                }
            }
        }
    }

    tracing::info!("Scheduled refresh stopped");
}
