use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scraper: ScraperConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Scraper configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default = "default_list_url")]
    pub list_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Politeness delay range before each request, uniform random.
    #[serde(default = "default_delay_min_ms")]
    pub delay_min_ms: u64,

    #[serde(default = "default_delay_max_ms")]
    pub delay_max_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Exponential backoff: base * multiplier^attempt, capped.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u64,

    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Stop accumulating once this many records are collected.
    #[serde(default = "default_target_count")]
    pub target_count: usize,

    /// Hard cap on pagination.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Size of the synthetic batch used when live extraction yields nothing.
    #[serde(default = "default_fallback_size")]
    pub fallback_size: usize,
}

// ── Validation ────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be positive")]
    NonPositive(&'static str),

    #[error("delay range is inverted: min {min}ms > max {max}ms")]
    DelayRange { min: u64, max: u64 },

    #[error("invalid list URL {url:?}: {source}")]
    ListUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

impl AppConfig {
    /// Fail fast before any network activity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.max_pages == 0 {
            return Err(ConfigError::NonPositive("pipeline.max_pages"));
        }
        if self.pipeline.target_count == 0 {
            return Err(ConfigError::NonPositive("pipeline.target_count"));
        }
        if self.pipeline.fallback_size == 0 {
            return Err(ConfigError::NonPositive("pipeline.fallback_size"));
        }
        if self.scraper.timeout_secs == 0 {
            return Err(ConfigError::NonPositive("scraper.timeout_secs"));
        }
        if self.scraper.delay_min_ms > self.scraper.delay_max_ms {
            return Err(ConfigError::DelayRange {
                min: self.scraper.delay_min_ms,
                max: self.scraper.delay_max_ms,
            });
        }
        Url::parse(&self.scraper.list_url).map_err(|source| ConfigError::ListUrl {
            url: self.scraper.list_url.clone(),
            source,
        })?;
        Ok(())
    }
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_list_url() -> String {
    "https://www.goodreads.com/list/show/1.Best_Books_Ever".to_string()
}
fn default_timeout_secs() -> u64 {
    25
}
fn default_delay_min_ms() -> u64 {
    800
}
fn default_delay_max_ms() -> u64 {
    2000
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_multiplier() -> u64 {
    2
}
fn default_backoff_cap_ms() -> u64 {
    15_000
}
fn default_user_agent() -> String {
    "books-etl/0.1 (list harvesting pipeline)".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/books.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_target_count() -> usize {
    1_000
}
fn default_max_pages() -> u32 {
    100
}
fn default_fallback_size() -> usize {
    2
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("BOOKS").separator("__"))
            .build()?;

        // A malformed file must fail the run, not fall back to defaults.
        let app_cfg: AppConfig = cfg
            .try_deserialize()
            .context("invalid configuration")?;
        app_cfg.validate().context("invalid configuration")?;
        Ok(app_cfg)
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            list_url: default_list_url(),
            timeout_secs: default_timeout_secs(),
            delay_min_ms: default_delay_min_ms(),
            delay_max_ms: default_delay_max_ms(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            backoff_cap_ms: default_backoff_cap_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            run_migrations: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_count: default_target_count(),
            max_pages: default_max_pages(),
            fallback_size: default_fallback_size(),
        }
    }
}
