use log::{info, warn};
use reqwest::{Client, ClientBuilder, StatusCode, header};

use crate::config::FetchConfig;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} failed after {attempts} attempt(s): {source}")]
    Transport {
        url: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered {status} after {attempts} attempt(s)")]
    Status {
        url: String,
        status: StatusCode,
        attempts: u32,
    },
    #[error("could not build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

pub struct RequestClient {
    client: Client,
    config: FetchConfig,
}

impl RequestClient {
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::USER_AGENT, header::HeaderValue::from_static(USER_AGENT));
        let client = ClientBuilder::new()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { client, config })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// GETs the base URL with `query`, retrying transport failures and 5xx answers
    /// with doubling backoff. Other statuses fail straight away.
    pub async fn fetch_page(&self, query: &[(&str, &str)]) -> Result<String, FetchError> {
        let url = &self.config.base_url;
        let max_attempts = self.config.retries + 1;
        let mut backoff = self.config.backoff;
        let mut attempt = 1;
        loop {
            info!("Fetching {url} {query:?} (attempt {attempt}/{max_attempts})");
            let outcome = match self.client.get(url).query(query).send().await {
                Ok(response) if response.status().is_success() => match response.text().await {
                    Ok(body) => return Ok(body),
                    Err(source) => FetchError::Transport {
                        url: url.clone(),
                        attempts: attempt,
                        source,
                    },
                },
                Ok(response) => {
                    let status = response.status();
                    let error = FetchError::Status {
                        url: url.clone(),
                        status,
                        attempts: attempt,
                    };
                    if !status.is_server_error() {
                        return Err(error);
                    }
                    error
                }
                Err(source) => FetchError::Transport {
                    url: url.clone(),
                    attempts: attempt,
                    source,
                },
            };

            if attempt >= max_attempts {
                return Err(outcome);
            }
            warn!("{outcome}; retrying in {backoff:?}");
            tokio::time::sleep(backoff).await;
            backoff *= 2;
            attempt += 1;
        }
    }
}
