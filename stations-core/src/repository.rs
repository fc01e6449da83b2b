use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::model::{Coordinates, NormalizedReading, StationId};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStationRepository;
pub use sqlite::SqliteStationRepository;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: StationId,
    pub name: String,
    pub address: Option<String>,
    pub coordinates: Option<Coordinates>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewStation {
    pub name: String,
    pub address: Option<String>,
    pub coordinates: Option<Coordinates>,
}

/// Last good reading together with the time it was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSnapshot {
    pub reading: NormalizedReading,
    pub last_update: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Station {0} not found")]
    NotFound(StationId),
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Stored data is corrupt: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Backend(e.to_string())
    }
}

/// Per-station persistent fields.
///
/// `save_snapshot` must write reading and timestamp as one unit: a reader
/// never sees the new reading with the old timestamp or the reverse.
#[async_trait]
pub trait StationRepository: Send + Sync + Debug {
    /// Every known station id, whatever its visibility.
    async fn station_ids(&self) -> Result<Vec<StationId>, StorageError>;

    async fn station(&self, id: StationId) -> Result<Station, StorageError>;

    async fn insert_station(&self, station: NewStation) -> Result<StationId, StorageError>;

    async fn save_location(
        &self,
        id: StationId,
        address: Option<String>,
        coordinates: Coordinates,
    ) -> Result<(), StorageError>;

    /// `None` unless both latitude and longitude are stored.
    async fn location(&self, id: StationId) -> Result<Option<Coordinates>, StorageError>;

    /// Timestamp of the last successful snapshot write, read without
    /// decoding the stored reading.
    async fn last_update(&self, id: StationId) -> Result<Option<DateTime<Utc>>, StorageError>;

    async fn snapshot(&self, id: StationId) -> Result<Option<StoredSnapshot>, StorageError>;

    async fn save_snapshot(
        &self,
        id: StationId,
        reading: &NormalizedReading,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
}
