use std::fmt;

use log::{info, warn};
use serde::Serialize;

use crate::{
    station::{Direction, StationRecord},
    store::{StationStore, StoreError},
};

#[derive(Debug, thiserror::Error)]
#[error("failed to persist {attempted} records: {source}")]
pub struct PersistError {
    pub attempted: usize,
    #[source]
    pub source: StoreError,
}

/// Which branch of the write policy was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistMode {
    /// The table was empty.
    Bootstrap,
    /// The caller asked for every month.
    Backfill,
    /// One direction had never been written.
    MissingDirection,
    LastMonthOnly,
}

impl fmt::Display for PersistMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PersistMode::Bootstrap => "bootstrap",
            PersistMode::Backfill => "backfill",
            PersistMode::MissingDirection => "missing direction",
            PersistMode::LastMonthOnly => "last month only",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PersistSummary {
    pub mode: PersistMode,
    pub attempted: usize,
    pub inserted: u64,
}

/// Writes `records`, or only the `target_month` slice of them once history exists.
pub async fn persist<S: StationStore>(
    store: &S,
    records: &[StationRecord],
    target_month: &str,
    save_all: bool,
) -> Result<PersistSummary, PersistError> {
    let mode = choose_mode(store, save_all)
        .await
        .map_err(|source| PersistError {
            attempted: 0,
            source,
        })?;
    info!("Persisting with policy: {mode}");

    let selected: Vec<StationRecord> = match mode {
        PersistMode::LastMonthOnly => records
            .iter()
            .filter(|record| record.year_month == target_month)
            .cloned()
            .collect(),
        _ => records.to_vec(),
    };
    if selected.is_empty() {
        info!("No records for {target_month} to insert");
        return Ok(PersistSummary {
            mode,
            attempted: 0,
            inserted: 0,
        });
    }

    let inserted = store
        .insert_batch(&selected)
        .await
        .map_err(|source| PersistError {
            attempted: selected.len(),
            source,
        })?;
    info!(
        "Inserted {inserted} of {} records ({} already stored)",
        selected.len(),
        selected.len() as u64 - inserted
    );
    Ok(PersistSummary {
        mode,
        attempted: selected.len(),
        inserted,
    })
}

async fn choose_mode<S: StationStore>(store: &S, save_all: bool) -> Result<PersistMode, StoreError> {
    let total = store.count_all().await?;
    if total == 0 {
        return Ok(PersistMode::Bootstrap);
    }
    if save_all {
        return Ok(PersistMode::Backfill);
    }
    for direction in Direction::ALL {
        if store.count_direction(direction).await? == 0 {
            // Coarse: keeps re-sending full history for as long as this direction
            // stays unwritten. The table key makes the repeat harmless.
            warn!(
                "No {direction} rows among {total} stored rows, inserting the full table"
            );
            return Ok(PersistMode::MissingDirection);
        }
    }
    Ok(PersistMode::LastMonthOnly)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{station::Station, store::MemoryStore};

    fn month(year_month: &str, direction: Direction) -> Vec<StationRecord> {
        Station::ALL
            .into_iter()
            .map(|station| StationRecord::new(year_month.to_string(), station, 100, direction))
            .collect()
    }

    fn months(year_months: &[&str], direction: Direction) -> Vec<StationRecord> {
        year_months
            .iter()
            .flat_map(|ym| month(ym, direction))
            .collect()
    }

    #[tokio::test]
    async fn empty_store_takes_everything() {
        let store = MemoryStore::new();
        let records = months(&["2023-12", "2024-01", "2024-02"], Direction::Entry);

        let summary = persist(&store, &records, "2024-02", false).await.unwrap();
        assert_eq!(summary.mode, PersistMode::Bootstrap);
        assert_eq!(summary.inserted, 39);
        assert_eq!(store.count_all().await.unwrap(), 39);
    }

    #[tokio::test]
    async fn populated_store_takes_only_target_month() {
        let mut history = months(&["2023-12", "2024-01"], Direction::Entry);
        history.extend(months(&["2023-12", "2024-01"], Direction::Exit));
        let store = MemoryStore::with_records(&history);
        let records = months(&["2023-12", "2024-01", "2024-02"], Direction::Entry);

        let summary = persist(&store, &records, "2024-02", false).await.unwrap();
        assert_eq!(summary.mode, PersistMode::LastMonthOnly);
        assert_eq!(summary.attempted, 13);
        assert_eq!(summary.inserted, 13);
        assert_eq!(store.count_month("2024-02").await.unwrap(), 13);
        assert_eq!(store.count_all().await.unwrap(), 52 + 13);
    }

    #[tokio::test]
    async fn missing_target_month_is_a_no_op() {
        let mut history = month("2024-01", Direction::Entry);
        history.extend(month("2024-01", Direction::Exit));
        let store = MemoryStore::with_records(&history);

        let summary = persist(&store, &month("2024-01", Direction::Exit), "2024-02", false)
            .await
            .unwrap();
        assert_eq!(summary.mode, PersistMode::LastMonthOnly);
        assert_eq!(summary.attempted, 0);
        assert_eq!(store.count_all().await.unwrap(), 26);
    }

    #[tokio::test]
    async fn one_direction_missing_triggers_full_insert() {
        let store = MemoryStore::with_records(&month("2024-01", Direction::Entry));
        let records = months(&["2023-12", "2024-01"], Direction::Exit);

        let summary = persist(&store, &records, "2024-02", false).await.unwrap();
        assert_eq!(summary.mode, PersistMode::MissingDirection);
        assert_eq!(summary.inserted, 26);
    }

    #[tokio::test]
    async fn save_all_backfills_without_duplicating() {
        let mut history = month("2024-01", Direction::Entry);
        history.extend(month("2024-01", Direction::Exit));
        let store = MemoryStore::with_records(&history);
        let records = months(&["2023-12", "2024-01"], Direction::Entry);

        let summary = persist(&store, &records, "2024-02", true).await.unwrap();
        assert_eq!(summary.mode, PersistMode::Backfill);
        assert_eq!(summary.attempted, 26);
        assert_eq!(summary.inserted, 13);
        assert_eq!(store.count_all().await.unwrap(), 39);
    }

    #[tokio::test]
    async fn failed_insert_rolls_back_whole_batch() {
        let store = MemoryStore::new();
        store.fail_inserts_after(Some(5));
        let records = month("2024-02", Direction::Entry);

        let err = persist(&store, &records, "2024-02", false).await.unwrap_err();
        assert_eq!(err.attempted, 13);
        assert_eq!(store.count_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unreachable_store_is_persist_error() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let err = persist(&store, &month("2024-02", Direction::Exit), "2024-02", false)
            .await
            .unwrap_err();
        assert!(matches!(err.source, StoreError::Unavailable(_)));
    }
}
