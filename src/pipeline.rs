use std::fmt;

use chrono::{Local, NaiveDate};
use log::{debug, error, info, warn};
use serde::{Serialize, Serializer};
use tokio::sync::Mutex;

use crate::{
    export::CsvExporter,
    freshness::is_month_present,
    requests::{FetchError, RequestClient},
    station::{Direction, target_month},
    store::StationStore,
    table_locator::{self, LocateError, TabButtons},
    transformer::{self, TransformError},
    upsert::{self, PersistError, PersistSummary},
};

/// Where the report markup comes from.
#[allow(async_fn_in_trait)]
pub trait PageSource {
    async fn fetch(&self, query: &[(&str, &str)]) -> Result<String, FetchError>;
}

impl PageSource for RequestClient {
    async fn fetch(&self, query: &[(&str, &str)]) -> Result<String, FetchError> {
        self.fetch_page(query).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    CheckingFreshness,
    Fetching,
    Locating,
    Transforming,
    Persisting,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::CheckingFreshness => "checking freshness",
            Stage::Fetching => "fetching",
            Stage::Locating => "locating",
            Stage::Transforming => "transforming",
            Stage::Persisting => "persisting",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DirectionError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("no tab control for {0} on the page")]
    MissingTab(Direction),
    #[error(transparent)]
    Locate(#[from] LocateError),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

impl DirectionError {
    /// Fetch and persist failures are reported to the caller; a page that no
    /// longer matches only fails its own direction.
    pub fn is_surfaced(&self) -> bool {
        matches!(self, DirectionError::Fetch(_) | DirectionError::Persist(_))
    }
}

#[derive(Debug)]
pub enum DirectionOutcome {
    Skipped,
    Done(PersistSummary),
    Failed { stage: Stage, error: DirectionError },
}

impl Serialize for DirectionOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        #[serde(tag = "status", rename_all = "snake_case")]
        enum View<'a> {
            Skipped,
            Done(&'a PersistSummary),
            Failed { stage: Stage, error: String },
        }
        match self {
            DirectionOutcome::Skipped => View::Skipped,
            DirectionOutcome::Done(summary) => View::Done(summary),
            DirectionOutcome::Failed { stage, error } => View::Failed {
                stage: *stage,
                error: error.to_string(),
            },
        }
        .serialize(serializer)
    }
}

#[derive(Debug, Serialize)]
pub struct CrawlReport {
    pub target_month: String,
    pub entry: DirectionOutcome,
    pub exit: DirectionOutcome,
}

impl CrawlReport {
    fn skipped(target_month: String) -> Self {
        Self {
            target_month,
            entry: DirectionOutcome::Skipped,
            exit: DirectionOutcome::Skipped,
        }
    }

    pub fn outcome(&self, direction: Direction) -> &DirectionOutcome {
        match direction {
            Direction::Entry => &self.entry,
            Direction::Exit => &self.exit,
        }
    }

    pub fn is_success(&self) -> bool {
        Direction::ALL.into_iter().all(|direction| {
            !matches!(
                self.outcome(direction),
                DirectionOutcome::Failed { error, .. } if error.is_surfaced()
            )
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    #[error("could not load the report page: {0}")]
    Fetch(#[from] FetchError),
}

/// Runs the fetch → locate → transform → persist pipeline for both directions.
pub struct Crawler<S, P> {
    store: S,
    source: P,
    exporter: Option<CsvExporter>,
    // One run at a time.
    running: Mutex<()>,
}

impl<S: StationStore, P: PageSource> Crawler<S, P> {
    pub fn new(store: S, source: P) -> Self {
        Self {
            store,
            source,
            exporter: None,
            running: Mutex::new(()),
        }
    }

    pub fn with_exporter(mut self, exporter: CsvExporter) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn source(&self) -> &P {
        &self.source
    }

    pub async fn run(&self, save_all: bool) -> Result<CrawlReport, CrawlError> {
        self.run_at(Local::now().date_naive(), save_all).await
    }

    /// Targets the month before `today`. `save_all` skips the freshness gate and
    /// writes every month on the page.
    pub async fn run_at(&self, today: NaiveDate, save_all: bool) -> Result<CrawlReport, CrawlError> {
        let _guard = self.running.lock().await;
        let target_month = target_month(today);
        info!("Starting crawl for {target_month} (save_all: {save_all})");

        debug!("Stage: {}", Stage::CheckingFreshness);
        if !save_all && is_month_present(&self.store, &target_month).await {
            info!("Data for {target_month} already stored, skipping crawl");
            return Ok(CrawlReport::skipped(target_month));
        }

        debug!("Stage: {}", Stage::Fetching);
        let landing = self.source.fetch(&[]).await.inspect_err(|e| {
            error!("Could not load the report page for {target_month}: {e}");
        })?;
        let buttons = table_locator::find_tab_buttons(&landing);
        info!("Tab controls found: {buttons:?}");

        let entry = self
            .run_direction(Direction::Entry, &buttons, &target_month, save_all)
            .await;
        let exit = self
            .run_direction(Direction::Exit, &buttons, &target_month, save_all)
            .await;
        let report = CrawlReport {
            target_month,
            entry,
            exit,
        };
        info!("Crawl finished: {report:?}");
        Ok(report)
    }

    async fn run_direction(
        &self,
        direction: Direction,
        buttons: &TabButtons,
        target_month: &str,
        save_all: bool,
    ) -> DirectionOutcome {
        info!("Processing {direction} data for {target_month}");
        let mut stage = Stage::Idle;
        let result = self
            .direction_pipeline(direction, buttons, target_month, save_all, &mut stage)
            .await;
        match result {
            Ok(summary) => DirectionOutcome::Done(summary),
            Err(error) => {
                error!("{direction} pipeline for {target_month} failed while {stage}: {error}");
                DirectionOutcome::Failed { stage, error }
            }
        }
    }

    async fn direction_pipeline(
        &self,
        direction: Direction,
        buttons: &TabButtons,
        target_month: &str,
        save_all: bool,
        stage: &mut Stage,
    ) -> Result<PersistSummary, DirectionError> {
        *stage = Stage::Locating;
        let tag = buttons
            .get(direction)
            .map(|button| button.href.as_str())
            .filter(|href| !href.is_empty())
            .ok_or(DirectionError::MissingTab(direction))?;

        *stage = Stage::Fetching;
        let content = self.source.fetch(&[("type", direction.slug())]).await?;

        *stage = Stage::Locating;
        let table = table_locator::locate(&content, tag).inspect_err(|_| {
            for summary in table_locator::describe_tables(&content) {
                warn!("Table on page: {summary:?}");
            }
        })?;
        info!("Found {direction} table under {tag}, shape {:?}", table.shape());
        debug!("{direction} table: {table:?}");

        *stage = Stage::Transforming;
        let records = transformer::transform(&table, direction)?;

        if let Some(exporter) = &self.exporter {
            if let Err(e) = exporter.export(direction, &records) {
                warn!("Export of {direction} table failed, continuing: {e}");
            }
        }

        *stage = Stage::Persisting;
        Ok(upsert::persist(&self.store, &records, target_month, save_all).await?)
    }
}
