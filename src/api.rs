use actix_web::{
    HttpRequest, HttpResponse, Responder,
    error::{InternalError, JsonPayloadError, QueryPayloadError},
    http::{Method, StatusCode},
    middleware::DefaultHeaders,
    web::{self, Data, Json, JsonConfig, Query, QueryConfig, ServiceConfig},
};
use log::{error, info, warn};
use serde::Deserialize;
use serde_json::json;

use crate::{
    pipeline::{Crawler, PageSource},
    station::{Direction, Station, is_year_month},
    store::{DataFilter, StationStore},
};

const QUERY_PARAMS: [&str; 4] = ["year_month", "station", "visitor_number", "entry_exit"];

#[derive(Debug, Deserialize)]
pub struct CrawlRequest {
    pub year_month: String,
    #[serde(default)]
    pub save_all: bool,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("未知的查詢參數: {0}")]
    UnknownParams(String),
    #[error("year_month must be in format YYYY-MM: {0}")]
    YearMonth(String),
    #[error("無效的車站名稱: {0}")]
    Station(String),
    #[error("visitor_number must be a non-negative integer: {0}")]
    VisitorNumber(String),
    #[error("entry_exit must be '進站' or '出站': {0}")]
    EntryExit(String),
}

/// Validates the raw `/data` query. Nothing here touches storage.
pub fn parse_data_filter(pairs: &[(String, String)]) -> Result<DataFilter, QueryError> {
    let unknown: Vec<&str> = pairs
        .iter()
        .map(|(key, _)| key.as_str())
        .filter(|key| !QUERY_PARAMS.contains(key))
        .collect();
    if !unknown.is_empty() {
        return Err(QueryError::UnknownParams(unknown.join(", ")));
    }

    let mut filter = DataFilter::default();
    for (key, value) in pairs {
        if value.is_empty() {
            continue;
        }
        match key.as_str() {
            "year_month" => {
                if !is_year_month(value) {
                    return Err(QueryError::YearMonth(value.clone()));
                }
                filter.year_month = Some(value.clone());
            }
            "station" => {
                let station =
                    Station::from_name(value).ok_or_else(|| QueryError::Station(value.clone()))?;
                filter.station = Some(station);
            }
            "visitor_number" => {
                let number = value
                    .parse::<u64>()
                    .map_err(|_| QueryError::VisitorNumber(value.clone()))?;
                filter.visitor_number = Some(number);
            }
            "entry_exit" => {
                let direction = value
                    .parse::<Direction>()
                    .map_err(|_| QueryError::EntryExit(value.clone()))?;
                filter.entry_exit = Some(direction);
            }
            _ => unreachable!("unknown keys rejected above"),
        }
    }
    Ok(filter)
}

fn detail(status: StatusCode, message: impl ToString) -> HttpResponse {
    HttpResponse::build(status).json(json!({ "detail": message.to_string() }))
}

fn rejected_json(err: JsonPayloadError, req: &HttpRequest) -> actix_web::Error {
    warn!("Rejected {} body: {err}", req.path());
    let response = detail(StatusCode::UNPROCESSABLE_ENTITY, &err);
    InternalError::from_response(err, response).into()
}

fn rejected_query(err: QueryPayloadError, req: &HttpRequest) -> actix_web::Error {
    warn!("Rejected {} query: {err}", req.path());
    let response = detail(StatusCode::UNPROCESSABLE_ENTITY, &err);
    InternalError::from_response(err, response).into()
}

async fn root() -> impl Responder {
    HttpResponse::Ok().json(json!({ "message": "Welcome to HSR Crawler API" }))
}

async fn crawl<S, P>(crawler: Data<Crawler<S, P>>, request: Json<CrawlRequest>) -> HttpResponse
where
    S: StationStore + 'static,
    P: PageSource + 'static,
{
    info!("Crawl requested: {request:?}");
    if !is_year_month(&request.year_month) {
        return detail(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("year_month must be in format YYYY-MM: {}", request.year_month),
        );
    }

    match crawler.run(request.save_all).await {
        Ok(report) => {
            if report.target_month != request.year_month {
                warn!(
                    "Requested {} but runs always target the previous month ({})",
                    request.year_month, report.target_month
                );
            }
            if report.is_success() {
                HttpResponse::Ok().json(json!({
                    "message": "Data crawled and saved successfully",
                    "target_month": report.target_month,
                    "entry": report.entry,
                    "exit": report.exit,
                }))
            } else {
                error!("Crawl for {} did not complete: {report:?}", report.target_month);
                HttpResponse::InternalServerError().json(json!({
                    "detail": "crawl failed",
                    "target_month": report.target_month,
                    "entry": report.entry,
                    "exit": report.exit,
                }))
            }
        }
        Err(e) => {
            error!("Crawl failed: {e}");
            detail(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

async fn get_data<S, P>(
    crawler: Data<Crawler<S, P>>,
    query: Query<Vec<(String, String)>>,
) -> HttpResponse
where
    S: StationStore + 'static,
    P: PageSource + 'static,
{
    let filter = match parse_data_filter(&query) {
        Ok(filter) => filter,
        Err(e) => {
            warn!("Rejected /data query {:?}: {e}", query.0);
            return detail(StatusCode::UNPROCESSABLE_ENTITY, e);
        }
    };
    match crawler.store().query(&filter).await {
        Ok(records) => HttpResponse::Ok().json(records),
        Err(e) => {
            error!("Querying data failed: {e}");
            detail(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

async fn preflight() -> HttpResponse {
    HttpResponse::NoContent().finish()
}

/// Allows any origin and header on every route. Only the methods the API
/// serves are advertised.
pub fn cors() -> DefaultHeaders {
    DefaultHeaders::new()
        .add(("Access-Control-Allow-Origin", "*"))
        .add(("Access-Control-Allow-Methods", "GET, POST, OPTIONS"))
        .add(("Access-Control-Allow-Headers", "*"))
}

/// Registers `/`, `/crawl` and `/data`. The crawler goes in as app data.
/// Malformed bodies and queries answer 422 with a `detail` message.
pub fn configure<S, P>(cfg: &mut ServiceConfig)
where
    S: StationStore + 'static,
    P: PageSource + 'static,
{
    cfg.app_data(JsonConfig::default().error_handler(rejected_json))
        .app_data(QueryConfig::default().error_handler(rejected_query))
        .route("/", web::get().to(root))
        .route("/", web::method(Method::OPTIONS).to(preflight))
        .route("/crawl", web::post().to(crawl::<S, P>))
        .route("/crawl", web::method(Method::OPTIONS).to(preflight))
        .route("/data", web::get().to(get_data::<S, P>))
        .route("/data", web::method(Method::OPTIONS).to(preflight));
}
