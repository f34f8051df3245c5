use std::time::Duration;

use actix_web::web::Data;
use log::{error, info, warn};

use crate::{
    pipeline::{Crawler, PageSource},
    store::StationStore,
};

/// Runs the crawler now and then every `interval`. The freshness gate makes
/// most ticks a single count query.
pub async fn run_periodically<S, P>(crawler: Data<Crawler<S, P>>, interval: Duration)
where
    S: StationStore,
    P: PageSource,
{
    info!("Scheduling a crawl every {interval:?}");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match crawler.run(false).await {
            Ok(report) if report.is_success() => {
                info!("Scheduled crawl for {} finished", report.target_month)
            }
            Ok(report) => warn!("Scheduled crawl for {} had failures", report.target_month),
            Err(e) => error!("Scheduled crawl failed: {e}"),
        }
    }
}
