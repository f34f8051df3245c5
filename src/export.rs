use std::path::PathBuf;

use chrono::Local;
use log::info;

use crate::station::{Direction, StationRecord};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("could not create {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not write {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Writes each run's transformed table to a timestamped CSV file.
#[derive(Debug, Clone)]
pub struct CsvExporter {
    output_dir: PathBuf,
}

impl CsvExporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn export(&self, direction: Direction, records: &[StationRecord]) -> Result<PathBuf, ExportError> {
        std::fs::create_dir_all(&self.output_dir).map_err(|source| ExportError::Io {
            path: self.output_dir.clone(),
            source,
        })?;
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = self
            .output_dir
            .join(format!("{}_passenger_table_{timestamp}.csv", direction.slug()));

        let csv_error = |source| ExportError::Csv {
            path: path.clone(),
            source,
        };
        let mut writer = csv::Writer::from_path(&path).map_err(csv_error)?;
        writer
            .write_record([
                "year_month",
                "station",
                "visitor_number",
                "station_sequence",
                "entry_exit",
            ])
            .map_err(csv_error)?;
        for record in records {
            let visitor_number = record.visitor_number.to_string();
            let station_sequence = record.station_sequence.to_string();
            writer
                .write_record([
                    record.year_month.as_str(),
                    record.station.name(),
                    visitor_number.as_str(),
                    station_sequence.as_str(),
                    record.entry_exit.label(),
                ])
                .map_err(csv_error)?;
        }
        writer.flush().map_err(|source| ExportError::Io {
            path: path.clone(),
            source,
        })?;

        info!("Saved {} {direction} records to {}", records.len(), path.display());
        Ok(path)
    }
}
