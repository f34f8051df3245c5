pub mod api;
pub mod config;
mod export;
mod freshness;
pub mod logging;
pub mod pipeline;
mod requests;
pub mod scheduler;
pub mod station;
pub mod store;
pub mod table_locator;
pub mod transformer;
pub mod upsert;

pub use config::CrawlerConfig;
pub use export::{CsvExporter, ExportError};
pub use freshness::is_month_present;
pub use pipeline::{CrawlReport, Crawler, DirectionOutcome, PageSource};
pub use requests::{FetchError, RequestClient};
pub use station::{Direction, Station, StationRecord};
pub use store::{MemoryStore, PgStore, StationStore};
