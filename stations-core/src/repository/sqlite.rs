//! SQLite-backed station store.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::{path::Path, sync::Arc};

use crate::model::{Coordinates, NormalizedReading, StationId};

use super::{NewStation, Station, StationRepository, StorageError, StoredSnapshot};

/// Every statement runs on the blocking pool; the connection is never
/// touched from an async worker thread.
#[derive(Debug, Clone)]
pub struct SqliteStationRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStationRepository {
    /// Open (or create) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS stations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                address TEXT NULL,
                latitude REAL NULL,
                longitude REAL NULL,
                weather_snapshot TEXT NULL,
                last_update TEXT NULL
            );
            "#,
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&conn.lock()))
            .await
            .map_err(|e| StorageError::Backend(format!("storage task failed: {e}")))?
    }
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("last_update '{raw}': {e}")))
}

fn select_station(conn: &Connection, id: StationId) -> Result<Station, StorageError> {
    conn.query_row(
        "SELECT name, address, latitude, longitude FROM stations WHERE id = ?1",
        params![id.0],
        |row| {
            Ok(Station {
                id,
                name: row.get(0)?,
                address: row.get(1)?,
                coordinates: Coordinates::from_parts(row.get(2)?, row.get(3)?),
            })
        },
    )
    .optional()?
    .ok_or(StorageError::NotFound(id))
}

#[async_trait]
impl StationRepository for SqliteStationRepository {
    async fn station_ids(&self) -> Result<Vec<StationId>, StorageError> {
        self.run(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM stations ORDER BY id")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, i64>(0).map(StationId))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })
        .await
    }

    async fn station(&self, id: StationId) -> Result<Station, StorageError> {
        self.run(move |conn| select_station(conn, id)).await
    }

    async fn insert_station(&self, station: NewStation) -> Result<StationId, StorageError> {
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO stations (name, address, latitude, longitude) VALUES (?1, ?2, ?3, ?4)",
                params![
                    station.name,
                    station.address,
                    station.coordinates.map(|c| c.latitude),
                    station.coordinates.map(|c| c.longitude),
                ],
            )?;
            Ok(StationId(conn.last_insert_rowid()))
        })
        .await
    }

    async fn save_location(
        &self,
        id: StationId,
        address: Option<String>,
        coordinates: Coordinates,
    ) -> Result<(), StorageError> {
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE stations SET address = ?1, latitude = ?2, longitude = ?3 WHERE id = ?4",
                params![address, coordinates.latitude, coordinates.longitude, id.0],
            )?;

            if changed == 0 {
                return Err(StorageError::NotFound(id));
            }
            Ok(())
        })
        .await
    }

    async fn location(&self, id: StationId) -> Result<Option<Coordinates>, StorageError> {
        Ok(self.station(id).await?.coordinates)
    }

    async fn last_update(&self, id: StationId) -> Result<Option<DateTime<Utc>>, StorageError> {
        let raw: Option<String> = self
            .run(move |conn| {
                conn.query_row(
                    "SELECT last_update FROM stations WHERE id = ?1",
                    params![id.0],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or(StorageError::NotFound(id))
            })
            .await?;

        raw.as_deref().map(parse_timestamp).transpose()
    }

    async fn snapshot(&self, id: StationId) -> Result<Option<StoredSnapshot>, StorageError> {
        let row: (Option<String>, Option<String>) = self
            .run(move |conn| {
                conn.query_row(
                    "SELECT weather_snapshot, last_update FROM stations WHERE id = ?1",
                    params![id.0],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?
                .ok_or(StorageError::NotFound(id))
            })
            .await?;

        match row {
            (Some(json), Some(last_update)) => {
                let reading: NormalizedReading = serde_json::from_str(&json)
                    .map_err(|e| StorageError::Corrupt(format!("weather_snapshot: {e}")))?;
                Ok(Some(StoredSnapshot {
                    reading,
                    last_update: parse_timestamp(&last_update)?,
                }))
            }
            _ => Ok(None),
        }
    }

    async fn save_snapshot(
        &self,
        id: StationId,
        reading: &NormalizedReading,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let json = serde_json::to_string(reading)
            .map_err(|e| StorageError::Corrupt(format!("weather_snapshot: {e}")))?;
        let updated_at = format_timestamp(updated_at);

        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE stations SET weather_snapshot = ?1, last_update = ?2 WHERE id = ?3",
                params![json, updated_at, id.0],
            )?;

            if changed == 0 {
                return Err(StorageError::NotFound(id));
            }
            Ok(())
        })
        .await
    }
}
