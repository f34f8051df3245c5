use log::{error, info};

use crate::store::StationStore;

/// Whether any rows for `year_month` are already stored.
///
/// A store that can't be reached counts as "not present": the crawl goes ahead
/// and the worst case is redundant work that the table's key absorbs.
pub async fn is_month_present<S: StationStore>(store: &S, year_month: &str) -> bool {
    match store.count_month(year_month).await {
        Ok(count) => {
            info!("Found {count} stored rows for {year_month}");
            count > 0
        }
        Err(e) => {
            error!("Freshness check for {year_month} failed, crawling anyway: {e}");
            false
        }
    }
}
