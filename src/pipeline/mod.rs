//! Pipeline orchestrator: drives the page loop and ties scraper → storage.
//!
//! One `run()` is the single unit of work the outside scheduler invokes:
//! fetch pages sequentially (politeness forbids concurrent fetches), parse
//! and normalize each page, deduplicate by (title, author), stop at the
//! record target or the page budget, fall back to synthetic data when the
//! whole run extracted nothing, then upsert the batch. Page- and
//! record-level failures are absorbed into the run statistics; only storage
//! and configuration errors fail the run. Re-running with unchanged source
//! data leaves the row count unchanged.

use crate::config::AppConfig;
use crate::models::{BookRecord, RecordKey};
use crate::scraper::{GoodreadsScraper, ListSource, cleaner, fallback, parsers};
use crate::storage::Repository;
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

pub struct Pipeline {
    config: AppConfig,
}

/// Outcome of one run, returned to the caller and written to the run log.
#[derive(Debug, Default, Clone)]
pub struct RunStats {
    pub records_loaded: usize,
    pub inserted: usize,
    pub updated: usize,
    pub pages_fetched: u32,
    pub pages_failed: u32,
    pub records_rejected: usize,
    pub duplicates_skipped: usize,
    /// The loaded batch is synthetic — live extraction yielded nothing.
    pub used_fallback: bool,
    /// The run was cancelled between page iterations; the batch is partial.
    pub cancelled: bool,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self) -> Result<RunStats> {
        self.config.validate().context("invalid configuration")?;

        let repo = Repository::open(&self.config.storage.db_path)
            .context("Failed to open DuckDB")?;
        if self.config.storage.run_migrations {
            repo.run_migrations()?;
        }

        let scraper = GoodreadsScraper::new(&self.config.scraper)
            .context("Failed to build scraper")?;

        self.execute(&scraper, &repo, &AtomicBool::new(false)).await
    }

    /// Full run against an explicit source and repository. The cancel flag is
    /// checked at every page boundary; cancellation returns the partial batch
    /// with `cancelled = true` and still upserts it (per-record upserts keep
    /// the store consistent).
    pub async fn execute(
        &self,
        source: &dyn ListSource,
        repo: &Repository,
        cancel: &AtomicBool,
    ) -> Result<RunStats> {
        self.config.validate().context("invalid configuration")?;

        let run_id = repo.begin_scrape_run().unwrap_or(0);
        let (mut books, mut stats) = self.collect(source, cancel).await;

        if books.is_empty() && !stats.cancelled {
            let n = self
                .config
                .pipeline
                .fallback_size
                .min(self.config.pipeline.target_count);
            warn!("No records extracted live; loading {} fallback record(s)", n);
            books = fallback::fallback_books(n, Utc::now().naive_utc());
            stats.used_fallback = true;
        }

        let load = match repo.upsert_books(&books) {
            Ok(l) => l,
            Err(e) => {
                // Rows commit individually, so the audit row records how much
                // of the batch is durable.
                repo.finish_scrape_run(
                    run_id,
                    stats.pages_fetched,
                    e.records_committed,
                    stats.used_fallback,
                    Some(&e.to_string()),
                )
                .ok();
                return Err(e).context("batch load failed");
            }
        };

        stats.records_loaded = books.len();
        stats.inserted = load.inserted;
        stats.updated = load.updated;

        repo.finish_scrape_run(
            run_id,
            stats.pages_fetched,
            stats.records_loaded,
            stats.used_fallback,
            None,
        )
        .ok();

        info!(
            "=== Done: {} record(s) ({} inserted, {} updated) | {} page(s), {} failed | {} rejected, {} duplicate(s) | fallback: {} ===",
            stats.records_loaded,
            stats.inserted,
            stats.updated,
            stats.pages_fetched,
            stats.pages_failed,
            stats.records_rejected,
            stats.duplicates_skipped,
            stats.used_fallback,
        );

        Ok(stats)
    }

    /// The pagination loop. Pages are fetched strictly in ascending order;
    /// dedup is first-occurrence-wins, so output order is deterministic for
    /// identical source content.
    async fn collect(
        &self,
        source: &dyn ListSource,
        cancel: &AtomicBool,
    ) -> (Vec<BookRecord>, RunStats) {
        let target = self.config.pipeline.target_count;
        let mut books: Vec<BookRecord> = Vec::new();
        let mut seen: HashSet<RecordKey> = HashSet::new();
        let mut stats = RunStats::default();
        let now = Utc::now().naive_utc();

        for page in 1..=self.config.pipeline.max_pages {
            if books.len() >= target {
                break;
            }
            if cancel.load(Ordering::Relaxed) {
                info!(
                    "Cancellation requested; stopping with {} record(s) after {} page(s)",
                    books.len(),
                    stats.pages_fetched
                );
                stats.cancelled = true;
                break;
            }

            stats.pages_fetched += 1;

            // Both fetch-error kinds mean a zero-yield page, never a dead run:
            // transient failures already exhausted their retries inside the
            // fetcher, permanent ones are not worth retrying at all.
            let html = match source.fetch_page(page).await {
                Ok(html) => html,
                Err(e) => {
                    warn!("Page {}: fetch failed: {}", page, e);
                    stats.pages_failed += 1;
                    continue;
                }
            };

            let raws = match parsers::parse_list_page(&html) {
                Ok(raws) => raws,
                Err(e) => {
                    warn!("Page {}: {}", page, e);
                    stats.pages_failed += 1;
                    continue;
                }
            };

            let mut new_on_page = 0usize;
            for raw in &raws {
                if books.len() >= target {
                    break;
                }
                match cleaner::normalize(raw, now) {
                    Ok(rec) => {
                        if seen.insert(rec.key()) {
                            books.push(rec);
                            new_on_page += 1;
                        } else {
                            stats.duplicates_skipped += 1;
                        }
                    }
                    Err(e) => {
                        warn!("Page {}: dropping entry: {}", page, e);
                        stats.records_rejected += 1;
                    }
                }
            }

            info!(
                "Page {}: {} new record(s), {} total",
                page,
                new_on_page,
                books.len()
            );

            // A page with nothing new after we already collected some means
            // the list is exhausted (or we are being served filler).
            if new_on_page == 0 && page > 1 && !books.is_empty() {
                info!("No new records on page {}; stopping early", page);
                break;
            }
        }

        (books, stats)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::http_client::FetchError;
    use async_trait::async_trait;

    enum StubPage {
        Html(String),
        FailPermanent,
        FailTransient,
    }

    struct StubSource {
        pages: Vec<StubPage>,
    }

    #[async_trait]
    impl ListSource for StubSource {
        async fn fetch_page(&self, page: u32) -> Result<String, FetchError> {
            match self.pages.get((page - 1) as usize) {
                Some(StubPage::Html(html)) => Ok(html.clone()),
                Some(StubPage::FailPermanent) => Err(FetchError::Permanent {
                    cause: "HTTP 403".to_string(),
                }),
                Some(StubPage::FailTransient) => Err(FetchError::Transient {
                    attempts: 3,
                    last_cause: "HTTP 500".to_string(),
                }),
                None => Ok(r#"<table class="tableList"></table>"#.to_string()),
            }
        }
    }

    fn page_html(entries: &[(&str, &str)]) -> StubPage {
        let rows: String = entries
            .iter()
            .map(|(title, author)| {
                format!(
                    r##"<tr><td>
                        <a class="bookTitle"><span>{title}</span></a>
                        <a class="authorName"><span>{author}</span></a>
                        <span class="minirating">4.10 avg rating — 1,000 ratings</span>
                        <a onclick="Lightbox.showBoxByID('score_explanation', 1);">score: 500</a>
                        <a href="#">100 people voted</a>
                    </td></tr>"##
                )
            })
            .collect();
        StubPage::Html(format!(r#"<table class="tableList">{rows}</table>"#))
    }

    fn test_pipeline(target_count: usize, max_pages: u32) -> Pipeline {
        let mut config = AppConfig::default();
        config.pipeline.target_count = target_count;
        config.pipeline.max_pages = max_pages;
        config.pipeline.fallback_size = 2;
        Pipeline::new(config)
    }

    fn test_repo() -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        repo
    }

    #[tokio::test]
    async fn overlapping_pages_collapse_by_key() {
        // p1 {A,B}, p2 {B,C}, p3 {C,D} → 4 unique records after 3 pages,
        // capped by the page budget before the target of 5 is reached.
        let source = StubSource {
            pages: vec![
                page_html(&[("Book A", "Jane"), ("Book B", "John")]),
                page_html(&[("Book B", "John"), ("Book C", "Jane")]),
                page_html(&[("Book C", "Jane"), ("Book D", "John")]),
            ],
        };
        let pipeline = test_pipeline(5, 3);
        let repo = test_repo();

        let stats = pipeline
            .execute(&source, &repo, &AtomicBool::new(false))
            .await
            .unwrap();

        assert_eq!(stats.records_loaded, 4);
        assert_eq!(stats.pages_fetched, 3);
        assert_eq!(stats.duplicates_skipped, 2);
        assert!(!stats.used_fallback);
        assert_eq!(repo.book_count().unwrap(), 4);
    }

    #[tokio::test]
    async fn target_count_caps_accumulation() {
        let source = StubSource {
            pages: vec![
                page_html(&[("T1", "a"), ("T2", "a"), ("T3", "a")]),
                page_html(&[("T4", "a"), ("T5", "a"), ("T6", "a")]),
                page_html(&[("T7", "a"), ("T8", "a"), ("T9", "a")]),
            ],
        };
        let pipeline = test_pipeline(4, 10);
        let repo = test_repo();

        let stats = pipeline
            .execute(&source, &repo, &AtomicBool::new(false))
            .await
            .unwrap();

        assert_eq!(stats.records_loaded, 4);
        assert!(stats.pages_fetched <= 2);
        assert_eq!(repo.book_count().unwrap(), 4);
    }

    #[tokio::test]
    async fn total_failure_loads_fallback_batch() {
        let source = StubSource {
            pages: vec![
                StubPage::FailPermanent,
                StubPage::FailTransient,
                StubPage::FailPermanent,
            ],
        };
        let pipeline = test_pipeline(100, 3);
        let repo = test_repo();

        let stats = pipeline
            .execute(&source, &repo, &AtomicBool::new(false))
            .await
            .unwrap();

        assert!(stats.used_fallback);
        assert_eq!(stats.records_loaded, 2);
        assert_eq!(stats.pages_failed, 3);
        assert_eq!(repo.book_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn parse_failures_are_zero_yield_not_fatal() {
        let source = StubSource {
            pages: vec![
                StubPage::Html("<html><p>blocked</p></html>".to_string()),
                page_html(&[("Survivor", "x")]),
            ],
        };
        let pipeline = test_pipeline(10, 2);
        let repo = test_repo();

        let stats = pipeline
            .execute(&source, &repo, &AtomicBool::new(false))
            .await
            .unwrap();

        assert_eq!(stats.pages_failed, 1);
        assert_eq!(stats.records_loaded, 1);
        assert!(!stats.used_fallback);
    }

    #[tokio::test]
    async fn rerun_with_same_source_is_idempotent() {
        let pages = || StubSource {
            pages: vec![page_html(&[("Same A", "x"), ("Same B", "y")])],
        };
        let pipeline = test_pipeline(10, 1);
        let repo = test_repo();

        let first = pipeline
            .execute(&pages(), &repo, &AtomicBool::new(false))
            .await
            .unwrap();
        let second = pipeline
            .execute(&pages(), &repo, &AtomicBool::new(false))
            .await
            .unwrap();

        assert_eq!(first.inserted, 2);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 2);
        assert_eq!(repo.book_count().unwrap(), 2);
    }

    #[test]
    fn cancellation_returns_partial_result() {
        let source = StubSource {
            pages: vec![page_html(&[("Never", "fetched")])],
        };
        let pipeline = test_pipeline(10, 5);
        let repo = test_repo();

        let cancel = AtomicBool::new(true);
        let stats = tokio_test::block_on(pipeline.execute(&source, &repo, &cancel)).unwrap();

        assert!(stats.cancelled);
        assert_eq!(stats.pages_fetched, 0);
        // Cancelled runs never substitute synthetic data.
        assert!(!stats.used_fallback);
        assert_eq!(repo.book_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn exhausted_list_stops_pagination_early() {
        let source = StubSource {
            pages: vec![
                page_html(&[("Only A", "x"), ("Only B", "y")]),
                page_html(&[("Only A", "x"), ("Only B", "y")]),
                page_html(&[("Unreached", "z")]),
            ],
        };
        let pipeline = test_pipeline(100, 10);
        let repo = test_repo();

        let stats = pipeline
            .execute(&source, &repo, &AtomicBool::new(false))
            .await
            .unwrap();

        assert_eq!(stats.pages_fetched, 2);
        assert_eq!(stats.records_loaded, 2);
    }

    #[tokio::test]
    async fn storage_failure_fails_the_run() {
        let source = StubSource {
            pages: vec![page_html(&[("Doomed", "x")])],
        };
        let pipeline = test_pipeline(10, 1);
        // No migrations: the books table is missing and the load must fail.
        let repo = Repository::open_in_memory().unwrap();

        let err = pipeline
            .execute(&source, &repo, &AtomicBool::new(false))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("batch load failed"));
    }

    #[tokio::test]
    async fn invalid_configuration_fails_fast() {
        let mut config = AppConfig::default();
        config.pipeline.max_pages = 0;
        let pipeline = Pipeline::new(config);
        let repo = test_repo();
        let source = StubSource { pages: vec![] };

        let err = pipeline
            .execute(&source, &repo, &AtomicBool::new(false))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid configuration"));
    }
}
