use std::sync::Mutex;

use chrono::{Local, NaiveDateTime};
use log::{error, info};
use sqlx::{PgPool, Postgres, QueryBuilder, postgres::PgPoolOptions};

use crate::station::{Direction, Station, StationRecord, StoredRecord};

pub const TABLE_NAME: &str = "hsr_vis_data";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("failed to insert {record:?}: {reason}")]
    Insert { record: String, reason: String },
}

/// Optional equality filters for `GET /data`. Every field already validated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataFilter {
    pub year_month: Option<String>,
    pub station: Option<Station>,
    pub visitor_number: Option<u64>,
    pub entry_exit: Option<Direction>,
}

impl DataFilter {
    pub fn matches(&self, record: &StoredRecord) -> bool {
        self.year_month
            .as_ref()
            .is_none_or(|year_month| &record.year_month == year_month)
            && self
                .station
                .is_none_or(|station| record.station == station.name())
            && self
                .visitor_number
                .is_none_or(|n| u64::try_from(record.visitor_number) == Ok(n))
            && self
                .entry_exit
                .is_none_or(|direction| record.entry_exit == direction.label())
    }
}

/// The `hsr_vis_data` table, keyed by `(year_month, station, entry_exit)`.
#[allow(async_fn_in_trait)]
pub trait StationStore {
    async fn count_all(&self) -> Result<i64, StoreError>;

    async fn count_direction(&self, direction: Direction) -> Result<i64, StoreError>;

    async fn count_month(&self, year_month: &str) -> Result<i64, StoreError>;

    /// Writes every record or none of them. Records whose key already exists are
    /// skipped; the return value counts the rows actually written.
    async fn insert_batch(&self, records: &[StationRecord]) -> Result<u64, StoreError>;

    async fn query(&self, filter: &DataFilter) -> Result<Vec<StoredRecord>, StoreError>;
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Creates the table and its indexes. Fails if existing rows violate the key.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS hsr_vis_data (
                id SERIAL PRIMARY KEY,
                year_month VARCHAR NOT NULL,
                station_sequence INTEGER NOT NULL,
                station VARCHAR NOT NULL,
                visitor_number BIGINT NOT NULL,
                entry_exit VARCHAR NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT now()
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS ix_hsr_vis_data_year_month ON hsr_vis_data (year_month)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS ux_hsr_vis_data_key
                ON hsr_vis_data (year_month, station, entry_exit)",
        )
        .execute(&self.pool)
        .await?;
        info!("Schema for {TABLE_NAME} is in place");
        Ok(())
    }

    async fn count_where(&self, column: &str, value: &str) -> Result<i64, StoreError> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM hsr_vis_data WHERE ");
        builder.push(column).push(" = ").push_bind(value);
        let count: i64 = builder.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count)
    }
}

impl StationStore for PgStore {
    async fn count_all(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM hsr_vis_data")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_direction(&self, direction: Direction) -> Result<i64, StoreError> {
        self.count_where("entry_exit", direction.label()).await
    }

    async fn count_month(&self, year_month: &str) -> Result<i64, StoreError> {
        self.count_where("year_month", year_month).await
    }

    async fn insert_batch(&self, records: &[StationRecord]) -> Result<u64, StoreError> {
        let created_at = Local::now().naive_local();
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for record in records {
            let visitor_number =
                i64::try_from(record.visitor_number).map_err(|e| StoreError::Insert {
                    record: format!("{record:?}"),
                    reason: e.to_string(),
                })?;
            let result = sqlx::query(
                "INSERT INTO hsr_vis_data
                    (year_month, station_sequence, station, visitor_number, entry_exit, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (year_month, station, entry_exit) DO NOTHING",
            )
            .bind(&record.year_month)
            .bind(record.station_sequence)
            .bind(record.station.name())
            .bind(visitor_number)
            .bind(record.entry_exit.label())
            .bind(created_at)
            .execute(&mut *tx)
            .await;
            match result {
                Ok(done) => inserted += done.rows_affected(),
                Err(e) => {
                    error!("Failed to insert record: {record:?}: {e}");
                    // Dropping `tx` rolls the batch back.
                    return Err(StoreError::Insert {
                        record: format!("{record:?}"),
                        reason: e.to_string(),
                    });
                }
            }
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn query(&self, filter: &DataFilter) -> Result<Vec<StoredRecord>, StoreError> {
        let mut builder = QueryBuilder::<Postgres>::new(
            "SELECT id, year_month, station_sequence, station, \
             visitor_number::BIGINT AS visitor_number, entry_exit, created_at \
             FROM hsr_vis_data WHERE TRUE",
        );
        if let Some(year_month) = &filter.year_month {
            builder.push(" AND year_month = ").push_bind(year_month.clone());
        }
        if let Some(station) = filter.station {
            builder.push(" AND station = ").push_bind(station.name());
        }
        if let Some(visitor_number) = filter.visitor_number {
            let Ok(visitor_number) = i64::try_from(visitor_number) else {
                return Ok(vec![]);
            };
            builder.push(" AND visitor_number = ").push_bind(visitor_number);
        }
        if let Some(direction) = filter.entry_exit {
            builder.push(" AND entry_exit = ").push_bind(direction.label());
        }
        builder.push(" ORDER BY year_month, entry_exit, station_sequence");
        let records = builder
            .build_query_as::<StoredRecord>()
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    rows: Vec<StoredRecord>,
    unavailable: bool,
    fail_inserts_after: Option<usize>,
}

/// In-process store with the same key and batch semantics as the Postgres table.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: &[StationRecord]) -> Self {
        let store = Self::new();
        {
            let mut state = store.lock();
            let created_at = Local::now().naive_local();
            for record in records {
                push_row(&mut state.rows, record, created_at);
            }
        }
        store
    }

    /// Every call fails with `StoreError::Unavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Makes `insert_batch` fail once it has staged `n` records.
    pub fn fail_inserts_after(&self, n: Option<usize>) {
        self.lock().fail_inserts_after = n;
    }

    pub fn rows(&self) -> Vec<StoredRecord> {
        self.lock().rows.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn available(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, StoreError> {
        let state = self.lock();
        if state.unavailable {
            return Err(StoreError::Unavailable("memory store switched off".to_string()));
        }
        Ok(state)
    }
}

fn push_row(rows: &mut Vec<StoredRecord>, record: &StationRecord, created_at: NaiveDateTime) -> bool {
    let exists = rows.iter().any(|row| {
        row.year_month == record.year_month
            && row.station == record.station.name()
            && row.entry_exit == record.entry_exit.label()
    });
    if exists {
        return false;
    }
    let id = rows.len() as i32 + 1;
    rows.push(StoredRecord {
        id,
        year_month: record.year_month.clone(),
        station_sequence: record.station_sequence,
        station: record.station.name().to_string(),
        visitor_number: record.visitor_number as i64,
        entry_exit: record.entry_exit.label().to_string(),
        created_at,
    });
    true
}

impl StationStore for MemoryStore {
    async fn count_all(&self) -> Result<i64, StoreError> {
        Ok(self.available()?.rows.len() as i64)
    }

    async fn count_direction(&self, direction: Direction) -> Result<i64, StoreError> {
        let state = self.available()?;
        Ok(state
            .rows
            .iter()
            .filter(|row| row.entry_exit == direction.label())
            .count() as i64)
    }

    async fn count_month(&self, year_month: &str) -> Result<i64, StoreError> {
        let state = self.available()?;
        Ok(state
            .rows
            .iter()
            .filter(|row| row.year_month == year_month)
            .count() as i64)
    }

    async fn insert_batch(&self, records: &[StationRecord]) -> Result<u64, StoreError> {
        let mut state = self.available()?;
        let created_at = Local::now().naive_local();
        let mut staged = state.rows.clone();
        let mut inserted = 0;
        for (index, record) in records.iter().enumerate() {
            if state.fail_inserts_after == Some(index) {
                error!("Failed to insert record: {record:?}");
                return Err(StoreError::Insert {
                    record: format!("{record:?}"),
                    reason: "injected failure".to_string(),
                });
            }
            if push_row(&mut staged, record, created_at) {
                inserted += 1;
            }
        }
        state.rows = staged;
        Ok(inserted)
    }

    async fn query(&self, filter: &DataFilter) -> Result<Vec<StoredRecord>, StoreError> {
        let state = self.available()?;
        Ok(state
            .rows
            .iter()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(year_month: &str, station: Station, direction: Direction) -> StationRecord {
        StationRecord::new(year_month.to_string(), station, 42, direction)
    }

    #[tokio::test]
    async fn memory_store_skips_existing_keys() {
        let store = MemoryStore::new();
        let batch = vec![
            record("2024-01", Station::Taipei, Direction::Entry),
            record("2024-01", Station::Taipei, Direction::Exit),
        ];
        assert_eq!(store.insert_batch(&batch).await.unwrap(), 2);
        assert_eq!(store.insert_batch(&batch).await.unwrap(), 0);
        assert_eq!(store.count_all().await.unwrap(), 2);
        assert_eq!(store.count_direction(Direction::Exit).await.unwrap(), 1);
        assert_eq!(store.count_month("2024-01").await.unwrap(), 2);
        assert_eq!(store.count_month("2024-02").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_batch_leaves_store_unchanged() {
        let store = MemoryStore::with_records(&[record("2023-12", Station::Total, Direction::Entry)]);
        store.fail_inserts_after(Some(1));
        let batch = vec![
            record("2024-01", Station::Nangang, Direction::Entry),
            record("2024-01", Station::Taipei, Direction::Entry),
        ];
        assert!(store.insert_batch(&batch).await.is_err());
        assert_eq!(store.count_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn filter_matches_every_given_field() {
        let store = MemoryStore::with_records(&[
            record("2024-01", Station::Taipei, Direction::Entry),
            record("2024-01", Station::Taipei, Direction::Exit),
            record("2024-02", Station::Tainan, Direction::Exit),
        ]);
        let filter = DataFilter {
            station: Some(Station::Taipei),
            entry_exit: Some(Direction::Exit),
            ..Default::default()
        };
        let rows = store.query(&filter).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].entry_exit, "出站");

        let by_count = DataFilter {
            visitor_number: Some(42),
            ..Default::default()
        };
        assert_eq!(store.query(&by_count).await.unwrap().len(), 3);
    }
}
