pub mod cleaner;
pub mod fallback;
pub mod http_client;
pub mod parsers;

use crate::config::ScraperConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use url::Url;

use self::http_client::{FetchError, HttpClient};

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable listing source abstraction.
#[async_trait]
pub trait ListSource: Send + Sync {
    /// Fetch the markup of one listing page (1-based).
    async fn fetch_page(&self, page: u32) -> Result<String, FetchError>;
}

// ── Goodreads list scraper ────────────────────────────────────────────────────

pub struct GoodreadsScraper {
    client: HttpClient,
    list_url: Url,
}

impl GoodreadsScraper {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let list_url = Url::parse(&config.list_url)
            .with_context(|| format!("Invalid list URL {:?}", config.list_url))?;

        Ok(Self {
            client: HttpClient::new(config)?,
            list_url,
        })
    }

    /// Page 1 is the bare list URL; later pages append ?page=N.
    fn page_url(&self, page: u32) -> String {
        if page <= 1 {
            return self.list_url.to_string();
        }
        let mut url = self.list_url.clone();
        url.query_pairs_mut().append_pair("page", &page.to_string());
        url.to_string()
    }
}

#[async_trait]
impl ListSource for GoodreadsScraper {
    async fn fetch_page(&self, page: u32) -> Result<String, FetchError> {
        self.client.get_text(&self.page_url(page)).await
    }
}
