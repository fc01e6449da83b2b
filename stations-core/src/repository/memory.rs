use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::model::{Coordinates, NormalizedReading, StationId};

use super::{NewStation, Station, StationRepository, StorageError, StoredSnapshot};

#[derive(Debug, Default)]
struct State {
    last_id: i64,
    stations: BTreeMap<StationId, (Station, Option<StoredSnapshot>)>,
}

/// Process-local repository. Ids start at 1 and iterate in ascending order.
#[derive(Debug, Default)]
pub struct MemoryStationRepository {
    state: RwLock<State>,
}

impl MemoryStationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StationRepository for MemoryStationRepository {
    async fn station_ids(&self) -> Result<Vec<StationId>, StorageError> {
        Ok(self.state.read().await.stations.keys().copied().collect())
    }

    async fn station(&self, id: StationId) -> Result<Station, StorageError> {
        self.state
            .read()
            .await
            .stations
            .get(&id)
            .map(|(station, _)| station.clone())
            .ok_or(StorageError::NotFound(id))
    }

    async fn insert_station(&self, station: NewStation) -> Result<StationId, StorageError> {
        let mut state = self.state.write().await;
        state.last_id += 1;
        let id = StationId(state.last_id);

        let station = Station {
            id,
            name: station.name,
            address: station.address,
            coordinates: station.coordinates,
        };
        state.stations.insert(id, (station, None));

        Ok(id)
    }

    async fn save_location(
        &self,
        id: StationId,
        address: Option<String>,
        coordinates: Coordinates,
    ) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        let (station, _) = state.stations.get_mut(&id).ok_or(StorageError::NotFound(id))?;
        station.address = address;
        station.coordinates = Some(coordinates);
        Ok(())
    }

    async fn location(&self, id: StationId) -> Result<Option<Coordinates>, StorageError> {
        Ok(self.station(id).await?.coordinates)
    }

    async fn last_update(&self, id: StationId) -> Result<Option<DateTime<Utc>>, StorageError> {
        Ok(self.snapshot(id).await?.map(|snapshot| snapshot.last_update))
    }

    async fn snapshot(&self, id: StationId) -> Result<Option<StoredSnapshot>, StorageError> {
        self.state
            .read()
            .await
            .stations
            .get(&id)
            .map(|(_, snapshot)| snapshot.clone())
            .ok_or(StorageError::NotFound(id))
    }

    async fn save_snapshot(
        &self,
        id: StationId,
        reading: &NormalizedReading,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        let (_, snapshot) = state.stations.get_mut(&id).ok_or(StorageError::NotFound(id))?;
        *snapshot = Some(StoredSnapshot {
            reading: reading.clone(),
            last_update: updated_at,
        });
        Ok(())
    }
}
