#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::NaiveDate;
use hsr_crawler::{FetchError, PageSource};

pub const PAGE: &str = include_str!("../fixtures/passenger_page.html");

/// Serves the fixture page, counting requests. Responses per `type` can be overridden.
pub struct FixtureSource {
    pub landing: Result<String, ()>,
    pub entry: Result<String, ()>,
    pub exit: Result<String, ()>,
    calls: AtomicUsize,
}

impl FixtureSource {
    pub fn new() -> Self {
        Self {
            landing: Ok(PAGE.to_string()),
            entry: Ok(PAGE.to_string()),
            exit: Ok(PAGE.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PageSource for FixtureSource {
    async fn fetch(&self, query: &[(&str, &str)]) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = match query {
            [] => &self.landing,
            [("type", "entry")] => &self.entry,
            [("type", "exit")] => &self.exit,
            other => panic!("unexpected query {other:?}"),
        };
        response.clone().map_err(|()| FetchError::Status {
            url: "fixture".to_string(),
            status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            attempts: 1,
        })
    }
}

/// Any day in March 2024, so the target month is 2024-02.
pub fn run_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
}
