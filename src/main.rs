use actix_web::{App, HttpServer, middleware::Logger, web::Data};
use anyhow::Context;
use clap::{Parser, Subcommand};
use hsr_crawler::{
    Crawler, CrawlerConfig, CsvExporter, PgStore, RequestClient, api, logging, scheduler,
};
use log::{error, info};

#[derive(Parser)]
#[command(about = "Crawls THSR monthly station passenger counts into Postgres")]
struct Opts {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API and crawl on the configured schedule.
    Serve,
    /// Run one crawl and exit.
    Crawl {
        /// Insert every month on the page, not just last month.
        #[arg(long)]
        save_all: bool,
    },
    /// Create the table and its indexes.
    InitDb,
}

type AppCrawler = Crawler<PgStore, RequestClient>;

async fn build_crawler(config: &CrawlerConfig) -> anyhow::Result<AppCrawler> {
    let store = PgStore::connect(&config.database_url)
        .await
        .context("failed to connect to the database")?;
    store.ensure_schema().await?;
    let client = RequestClient::new(config.fetch.clone())?;
    info!("Crawler targets {}", client.base_url());
    Ok(Crawler::new(store, client).with_exporter(CsvExporter::new(&config.output_dir)))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    let config = CrawlerConfig::new()?;
    let log_path = logging::init(&config.log_dir)?;
    info!("Logging to {}", log_path.display());

    match opts.command {
        Command::InitDb => {
            let store = PgStore::connect(&config.database_url).await?;
            store.ensure_schema().await?;
        }
        Command::Crawl { save_all } => {
            let crawler = build_crawler(&config).await?;
            let report = crawler.run(save_all).await?;
            if !report.is_success() {
                error!("Crawl for {} did not complete", report.target_month);
                anyhow::bail!("crawl for {} did not complete", report.target_month);
            }
            info!("Crawl for {} complete", report.target_month);
        }
        Command::Serve => {
            let crawler = Data::new(build_crawler(&config).await?);
            if let Some(interval) = config.crawl_interval {
                actix_web::rt::spawn(scheduler::run_periodically(crawler.clone(), interval));
            }

            info!("Starting HTTP server on {}:{}", config.host, config.port);
            HttpServer::new(move || {
                App::new()
                    .app_data(crawler.clone())
                    .configure(api::configure::<PgStore, RequestClient>)
                    .wrap(api::cors())
                    .wrap(Logger::default())
            })
            .bind((config.host.as_str(), config.port))?
            .run()
            .await?;
        }
    }
    Ok(())
}
