use crate::config::ScraperConfig;
use anyhow::{Context, Result};
use rand::RngExt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, warn};

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection error, timeout, HTTP 5xx or 429 — retried with backoff.
    #[error("transient failure after {attempts} attempt(s): {last_cause}")]
    Transient { attempts: u32, last_cause: String },

    /// HTTP 4xx (other than 429) or a malformed request — no retry.
    #[error("permanent failure: {cause}")]
    Permanent { cause: String },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }

    fn transient(cause: impl Into<String>) -> Self {
        FetchError::Transient {
            attempts: 1,
            last_cause: cause.into(),
        }
    }
}

// ── Client ────────────────────────────────────────────────────────────────────

pub struct HttpClient {
    inner: reqwest::Client,
    config: ScraperConfig,
    /// Rate-limit clock: set once the first request has gone out. Every
    /// subsequent request (retries included) pays the politeness delay.
    requested_before: Mutex<bool>,
}

impl HttpClient {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner,
            config: config.clone(),
            requested_before: Mutex::new(false),
        })
    }

    /// Fetch a URL as text with rate-limiting and retry.
    ///
    /// Transient failures are retried up to `max_retries` times with
    /// exponential backoff (`base * multiplier^n`, capped, jittered).
    /// Permanent failures return immediately.
    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let strategy = ExponentialBackoff::from_millis(self.config.backoff_multiplier)
            .factor(self.config.backoff_base_ms)
            .max_delay(Duration::from_millis(self.config.backoff_cap_ms))
            .map(jitter)
            .take(self.config.max_retries as usize);

        match RetryIf::spawn(strategy, || self.attempt(url), FetchError::is_transient).await {
            Ok(body) => Ok(body),
            Err(FetchError::Transient { last_cause, .. }) => Err(FetchError::Transient {
                attempts: self.config.max_retries + 1,
                last_cause,
            }),
            Err(e) => Err(e),
        }
    }

    /// One request, classified. The politeness delay is paid up front and is
    /// not skippable on retry.
    async fn attempt(&self, url: &str) -> Result<String, FetchError> {
        self.polite_delay().await;
        debug!("GET {}", url);

        let resp = match self.inner.get(url).send().await {
            Ok(r) => r,
            Err(e) => return Err(classify_request_error(&e)),
        };

        let status = resp.status();
        if status.is_success() {
            resp.text()
                .await
                .map_err(|e| FetchError::transient(format!("body read failed: {}", e)))
        } else if status.as_u16() == 429 || status.is_server_error() {
            warn!("HTTP {} on {}", status, url);
            Err(FetchError::transient(format!("HTTP {}", status)))
        } else {
            Err(FetchError::Permanent {
                cause: format!("HTTP {}", status),
            })
        }
    }

    /// Sleep a uniform random duration within the configured delay range.
    /// Skipped only for the very first request made through this client.
    async fn polite_delay(&self) {
        {
            let mut requested = self.requested_before.lock().await;
            if !*requested {
                *requested = true;
                return;
            }
        }
        let ms = rand::rng().random_range(self.config.delay_min_ms..=self.config.delay_max_ms);
        if ms > 0 {
            sleep(Duration::from_millis(ms)).await;
        }
    }
}

fn classify_request_error(e: &reqwest::Error) -> FetchError {
    if e.is_builder() {
        FetchError::Permanent {
            cause: format!("malformed request: {}", e),
        }
    } else if e.is_timeout() {
        FetchError::transient("request timeout")
    } else if e.is_connect() {
        FetchError::transient("connection failed")
    } else {
        FetchError::transient(e.to_string())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
