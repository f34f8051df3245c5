use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use serde::{Deserialize, de::DeserializeOwned};

pub const DEFAULT_BASE_URL: &str =
    "https://www.thsrc.com.tw/corp/9571df11-8524-4935-8a46-0d5a72e6bc7c";

/// The env vars needed to reach the database.
#[derive(Debug, Deserialize)]
pub struct DatabaseEnv {
    database_url: Option<String>,
    #[serde(default = "default_db_user")]
    db_user: String,
    #[serde(default)]
    db_password: String,
    #[serde(default = "default_db_host")]
    db_host: String,
    #[serde(default = "default_db_port")]
    db_port: u16,
    #[serde(default = "default_db_name")]
    db_name: String,
}

impl DatabaseEnv {
    /// `DATABASE_URL` wins; otherwise the URL is assembled from the `DB_*` parts.
    pub fn database_url(&self) -> String {
        match &self.database_url {
            // Some hosts still hand out the `postgres://` scheme.
            Some(url) => url.replacen("postgres://", "postgresql://", 1),
            None => format!(
                "postgresql://{}:{}@{}:{}/{}",
                self.db_user, self.db_password, self.db_host, self.db_port, self.db_name
            ),
        }
    }
}

/// The env vars needed for crawling and serving.
#[derive(Debug, Deserialize)]
pub struct CrawlerEnv {
    #[serde(default = "default_base_url")]
    hsr_base_url: String,
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_fetch_timeout_secs")]
    fetch_timeout_secs: u64,
    #[serde(default = "default_fetch_retries")]
    fetch_retries: u32,
    #[serde(default = "default_fetch_backoff_ms")]
    fetch_backoff_ms: u64,
    #[serde(default = "default_output_dir")]
    output_dir: PathBuf,
    #[serde(default = "default_log_dir")]
    log_dir: PathBuf,
    #[serde(default = "default_crawl_interval_hours")]
    crawl_interval_hours: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// Attempts after the first one.
    pub retries: u32,
    pub backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub database_url: String,
    pub fetch: FetchConfig,
    pub host: String,
    pub port: u16,
    pub output_dir: PathBuf,
    pub log_dir: PathBuf,
    /// `None` turns the in-process schedule off.
    pub crawl_interval: Option<Duration>,
}

impl CrawlerConfig {
    pub fn new() -> anyhow::Result<Self> {
        let database_env = DatabaseEnv::load_from_env()?;
        let crawler_env = CrawlerEnv::load_from_env()?;
        Ok(Self::from_env(&database_env, crawler_env))
    }

    pub fn from_env(database_env: &DatabaseEnv, crawler_env: CrawlerEnv) -> Self {
        Self {
            database_url: database_env.database_url(),
            fetch: FetchConfig {
                base_url: crawler_env.hsr_base_url,
                timeout: Duration::from_secs(crawler_env.fetch_timeout_secs),
                retries: crawler_env.fetch_retries,
                backoff: Duration::from_millis(crawler_env.fetch_backoff_ms),
            },
            host: crawler_env.host,
            port: crawler_env.port,
            output_dir: crawler_env.output_dir,
            log_dir: crawler_env.log_dir,
            crawl_interval: (crawler_env.crawl_interval_hours > 0)
                .then(|| Duration::from_secs(crawler_env.crawl_interval_hours * 60 * 60)),
        }
    }
}

fn default_db_user() -> String {
    "hsr_user".to_string()
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_name() -> String {
    "hsr_data".to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_fetch_retries() -> u32 {
    3
}

fn default_fetch_backoff_ms() -> u64 {
    500
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_crawl_interval_hours() -> u64 {
    24
}

// Extension trait.
pub trait LoadFromEnv: DeserializeOwned {
    fn load_from_env() -> anyhow::Result<Self> {
        // Don't throw an error if .env file doesn't exist.
        let _ = dotenv::dotenv();
        let config =
            envy::from_env::<Self>().context("failed to load env variables into config struct")?;
        Ok(config)
    }

    fn load_from_iter<I: IntoIterator<Item = (String, String)>>(vars: I) -> anyhow::Result<Self> {
        let config = envy::from_iter::<_, Self>(vars)
            .context("failed to load env variables into config struct")?;
        Ok(config)
    }
}

impl<T: DeserializeOwned> LoadFromEnv for T {}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn database_url_from_parts() {
        let env = DatabaseEnv::load_from_iter(vars(&[
            ("DB_PASSWORD", "secret"),
            ("DB_HOST", "db"),
        ]))
        .unwrap();
        assert_eq!(
            env.database_url(),
            "postgresql://hsr_user:secret@db:5432/hsr_data"
        );
    }

    #[test]
    fn database_url_scheme_is_rewritten() {
        let env = DatabaseEnv::load_from_iter(vars(&[(
            "DATABASE_URL",
            "postgres://u:p@host/db",
        )]))
        .unwrap();
        assert_eq!(env.database_url(), "postgresql://u:p@host/db");
    }

    #[test]
    fn crawler_defaults_and_overrides() {
        let database_env = DatabaseEnv::load_from_iter(vars(&[])).unwrap();
        let crawler_env = CrawlerEnv::load_from_iter(vars(&[
            ("PORT", "9000"),
            ("FETCH_RETRIES", "1"),
            ("CRAWL_INTERVAL_HOURS", "0"),
        ]))
        .unwrap();

        let config = CrawlerConfig::from_env(&database_env, crawler_env);
        assert_eq!(config.port, 9000);
        assert_eq!(config.fetch.retries, 1);
        assert_eq!(config.fetch.timeout, Duration::from_secs(30));
        assert_eq!(config.fetch.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.crawl_interval, None);
        assert_eq!(config.output_dir, PathBuf::from("output"));
    }
}
