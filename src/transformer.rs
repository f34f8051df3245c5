use std::sync::LazyLock;

use log::{debug, info};
use regex::Regex;

use crate::{
    station::{Direction, Station, StationRecord},
    table_locator::RawTable,
};

static YEAR_MONTH_LABEL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})\s*[-/]\s*(\d{1,2})$").expect("static regex")
});

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("table has no header row")]
    EmptyHeader,
    #[error("expected station column {column:?} is missing (found {found:?})")]
    MissingColumn { column: String, found: Vec<String> },
    #[error("row {row}, column {column:?}: {value:?} is not a passenger count")]
    InvalidNumber {
        row: usize,
        column: String,
        value: String,
    },
    #[error("row {row}: {value:?} is not a year/month label")]
    InvalidYearMonth { row: usize, value: String },
}

/// Pivots the wide report (one row per month, one column per station) into one
/// record per month and station, all tagged with `direction`.
pub fn transform(table: &RawTable, direction: Direction) -> Result<Vec<StationRecord>, TransformError> {
    info!(
        "Transforming {direction} table, columns {:?}, shape {:?}",
        table.columns,
        table.shape()
    );
    if table.columns.is_empty() {
        return Err(TransformError::EmptyHeader);
    }

    let station_columns = Station::ALL
        .into_iter()
        .map(|station| {
            table
                .columns
                .iter()
                .position(|column| column == station.name())
                .map(|index| (station, index))
                .ok_or_else(|| TransformError::MissingColumn {
                    column: station.name().to_string(),
                    found: table.columns.clone(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut records = Vec::with_capacity(table.rows.len() * station_columns.len());
    for (row_index, row) in table.rows.iter().enumerate() {
        if row.iter().all(|cell| cell.trim().is_empty()) {
            debug!("Dropping empty row {row_index}");
            continue;
        }

        let label = row.first().map(String::as_str).unwrap_or("");
        let year_month = normalize_year_month(label).ok_or_else(|| {
            TransformError::InvalidYearMonth {
                row: row_index,
                value: label.to_string(),
            }
        })?;

        for &(station, column) in &station_columns {
            let value = row.get(column).map(String::as_str).unwrap_or("");
            let visitor_number =
                parse_count(value).ok_or_else(|| TransformError::InvalidNumber {
                    row: row_index,
                    column: station.name().to_string(),
                    value: value.to_string(),
                })?;
            records.push(StationRecord::new(
                year_month.clone(),
                station,
                visitor_number,
                direction,
            ));
        }
    }

    info!(
        "Transformed {direction} table into {} records",
        records.len()
    );
    Ok(records)
}

fn normalize_year_month(label: &str) -> Option<String> {
    let caps = YEAR_MONTH_LABEL_REGEX.captures(label.trim())?;
    let month: u32 = caps[2].parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    Some(format!("{}-{month:02}", &caps[1]))
}

fn parse_count(value: &str) -> Option<u64> {
    let digits: String = value
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}
