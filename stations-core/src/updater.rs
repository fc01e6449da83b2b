use chrono::SubsecRound;
use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};
use tracing::instrument;

use crate::{
    clock::Clock,
    model::{NormalizedReading, RefreshError, RefreshOutcome, SkipReason, StationId},
    policy::is_due,
    provider::{UnitSystem, WeatherProvider},
    repository::{StationRepository, StorageError},
};

/// Refreshes the weather snapshot of one station at a time.
///
/// The snapshot and its timestamp are written only after both unit-system
/// fetches succeed. A station can have at most one refresh in flight; a
/// concurrent second request is skipped with `RefreshInProgress`.
#[derive(Debug)]
pub struct StationWeatherUpdater {
    repository: Arc<dyn StationRepository>,
    provider: Arc<dyn WeatherProvider>,
    clock: Arc<dyn Clock>,
    interval_hours: f64,
    in_progress: Mutex<HashSet<StationId>>,
}

/// Releases the station's in-progress claim on every exit path.
struct RefreshClaim<'a> {
    in_progress: &'a Mutex<HashSet<StationId>>,
    id: StationId,
}

impl Drop for RefreshClaim<'_> {
    fn drop(&mut self) {
        self.in_progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

impl StationWeatherUpdater {
    pub fn new(
        repository: Arc<dyn StationRepository>,
        provider: Arc<dyn WeatherProvider>,
        clock: Arc<dyn Clock>,
        interval_hours: f64,
    ) -> Self {
        Self {
            repository,
            provider,
            clock,
            interval_hours,
            in_progress: Mutex::new(HashSet::new()),
        }
    }

    pub fn repository(&self) -> &Arc<dyn StationRepository> {
        &self.repository
    }

    pub fn interval_hours(&self) -> f64 {
        self.interval_hours
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn claim(&self, id: StationId) -> Option<RefreshClaim<'_>> {
        let inserted = self
            .in_progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);

        inserted.then(|| RefreshClaim {
            in_progress: &self.in_progress,
            id,
        })
    }

    /// Refresh one station. Never panics on upstream or storage failures;
    /// they come back as `RefreshOutcome::Failed`.
    #[instrument(skip_all, fields(station_id = %id))]
    pub async fn refresh(&self, id: StationId) -> RefreshOutcome {
        let Some(_claim) = self.claim(id) else {
            tracing::info!("Refresh already running, skipping");
            return RefreshOutcome::Skipped {
                reason: SkipReason::RefreshInProgress,
            };
        };

        match self.refresh_claimed(id).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::debug!(kind = error.kind(), "Refresh failed: {error}");
                RefreshOutcome::Failed { error }
            }
        }
    }

    async fn refresh_claimed(&self, id: StationId) -> Result<RefreshOutcome, RefreshError> {
        let Some(coords) = self.repository.location(id).await? else {
            tracing::debug!("No coordinates, skipping");
            return Ok(RefreshOutcome::Skipped {
                reason: SkipReason::NoLocation,
            });
        };

        // Only the timestamp gates the refresh; an undecodable stored
        // reading is simply overwritten by the next successful fetch.
        let last_update = match self.repository.last_update(id).await {
            Ok(last_update) => last_update,
            Err(StorageError::Corrupt(e)) => {
                tracing::warn!("Stored refresh timestamp unreadable, treating station as due: {e}");
                None
            }
            Err(e) => return Err(e.into()),
        };

        if !is_due(last_update, self.interval_hours, self.clock.now()) {
            tracing::debug!(?last_update, "Not due yet");
            return Ok(RefreshOutcome::Skipped {
                reason: SkipReason::NotDue,
            });
        }

        let (metric, imperial) = tokio::try_join!(
            self.provider.fetch_current(coords, UnitSystem::Metric),
            self.provider.fetch_current(coords, UnitSystem::Imperial),
        )?;

        let reading = NormalizedReading::merge(metric, imperial);
        let updated_at = self.clock.now().trunc_subsecs(0);

        self.repository
            .save_snapshot(id, &reading, updated_at)
            .await?;

        tracing::info!(%updated_at, "Weather snapshot updated");

        Ok(RefreshOutcome::Updated {
            reading,
            updated_at,
        })
    }
}
