use crate::models::BookRecord;
use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use duckdb::{Connection, params};
use std::path::Path;
use thiserror::Error;
use tracing::info;

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS books_id_seq;

CREATE TABLE IF NOT EXISTS books (
    -- Surrogate id, implementation detail; the natural key is (title, author)
    id            BIGINT PRIMARY KEY DEFAULT nextval('books_id_seq'),
    title         VARCHAR NOT NULL,
    author        VARCHAR NOT NULL DEFAULT '',
    avg_rating    DOUBLE  NOT NULL,
    num_ratings   BIGINT  NOT NULL,
    score         BIGINT  NOT NULL,
    people_voted  BIGINT  NOT NULL,
    scraped_at    TIMESTAMP NOT NULL,
    UNIQUE (title, author)
);

CREATE TABLE IF NOT EXISTS scrape_runs (
    id              INTEGER PRIMARY KEY,
    started_at      TIMESTAMP NOT NULL,
    finished_at     TIMESTAMP,
    status          VARCHAR NOT NULL DEFAULT 'running',
    pages_fetched   INTEGER DEFAULT 0,
    records_loaded  INTEGER DEFAULT 0,
    used_fallback   BOOLEAN DEFAULT FALSE,
    error_msg       VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_books_score ON books (score);
CREATE INDEX IF NOT EXISTS idx_books_title ON books (title);
"#;

// ── Load contract ─────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, PartialEq)]
pub struct LoadResult {
    pub inserted: usize,
    pub updated: usize,
}

/// Storage failure mid-batch. Rows commit individually, so the count tells
/// the caller how much is durable; a wholesale re-run stays safe because the
/// upsert is keyed.
#[derive(Debug, Error)]
#[error("batch load failed after {records_committed} committed row(s): {source}")]
pub struct LoadError {
    pub records_committed: usize,
    #[source]
    pub source: duckdb::Error,
}

/// Summary row from the scrape_runs audit table.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub id: i64,
    pub started_at: NaiveDateTime,
    pub finished_at: Option<NaiveDateTime>,
    pub status: String,
    pub pages_fetched: i64,
    pub records_loaded: i64,
    pub used_fallback: bool,
}

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        self.conn.execute_batch(DDL).context("DDL failed")?;
        self.conn
            .execute_batch(INDEXES)
            .context("Index creation failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Books ─────────────────────────────────────────────────────────────────

    /// Upsert a batch keyed by (title, author) — idempotent, safe to re-run.
    /// Metric fields are overwritten on conflict; the surrogate id and the
    /// title/author pair never change.
    pub fn upsert_books(&self, books: &[BookRecord]) -> Result<LoadResult, LoadError> {
        if books.is_empty() {
            return Ok(LoadResult::default());
        }

        let before = self.count_books_raw().map_err(|e| LoadError {
            records_committed: 0,
            source: e,
        })?;

        let sql = r#"
            INSERT INTO books
                (title, author, avg_rating, num_ratings, score, people_voted, scraped_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (title, author) DO UPDATE SET
                avg_rating   = excluded.avg_rating,
                num_ratings  = excluded.num_ratings,
                score        = excluded.score,
                people_voted = excluded.people_voted,
                scraped_at   = excluded.scraped_at
        "#;

        let mut committed = 0usize;
        for book in books {
            self.conn
                .execute(
                    sql,
                    params![
                        book.title,
                        book.author,
                        book.avg_rating,
                        book.num_ratings,
                        book.score,
                        book.people_voted,
                        book.scraped_at,
                    ],
                )
                .map_err(|e| LoadError {
                    records_committed: committed,
                    source: e,
                })?;
            committed += 1;
        }

        let after = self.count_books_raw().map_err(|e| LoadError {
            records_committed: committed,
            source: e,
        })?;

        let inserted = (after - before) as usize;
        Ok(LoadResult {
            inserted,
            updated: books.len() - inserted,
        })
    }

    fn count_books_raw(&self) -> Result<i64, duckdb::Error> {
        self.conn
            .query_row("SELECT COUNT(*) FROM books", [], |r| r.get(0))
    }

    pub fn book_count(&self) -> Result<i64> {
        Ok(self.count_books_raw()?)
    }

    pub fn avg_rating(&self) -> Result<Option<f64>> {
        let mut s = self.conn.prepare("SELECT AVG(avg_rating) FROM books")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn list_titles(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT title FROM books ORDER BY score DESC, title")?;
        let titles: Vec<String> = stmt
            .query_map([], |r| r.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(titles)
    }

    /// Highest-scored records, for the export command.
    pub fn top_books(&self, limit: usize) -> Result<Vec<BookRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"SELECT title, author, avg_rating, num_ratings, score, people_voted, scraped_at
               FROM books ORDER BY score DESC, title LIMIT {}"#,
            limit
        ))?;
        let books: Vec<BookRecord> = stmt
            .query_map([], |r| {
                Ok(BookRecord {
                    title: r.get(0)?,
                    author: r.get(1)?,
                    avg_rating: r.get(2)?,
                    num_ratings: r.get(3)?,
                    score: r.get(4)?,
                    people_voted: r.get(5)?,
                    scraped_at: r.get(6)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(books)
    }

    /// Stored metrics for one natural key, mainly for tests and spot checks.
    pub fn find_book(&self, title: &str, author: &str) -> Result<Option<BookRecord>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT title, author, avg_rating, num_ratings, score, people_voted, scraped_at
               FROM books WHERE title = ? AND author = ?"#,
        )?;
        let mut rows = stmt.query_map(params![title, author], |r| {
            Ok(BookRecord {
                title: r.get(0)?,
                author: r.get(1)?,
                avg_rating: r.get(2)?,
                num_ratings: r.get(3)?,
                score: r.get(4)?,
                people_voted: r.get(5)?,
                scraped_at: r.get(6)?,
            })
        })?;
        Ok(rows.next().transpose()?)
    }

    // ── Scrape run log ────────────────────────────────────────────────────────

    pub fn begin_scrape_run(&self) -> Result<i64> {
        let id: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(id), 0) + 1 FROM scrape_runs",
            [],
            |r| r.get(0),
        )?;
        self.conn.execute(
            "INSERT INTO scrape_runs (id, started_at, status) VALUES (?, ?, 'running')",
            params![id, Utc::now().naive_utc()],
        )?;
        Ok(id)
    }

    pub fn finish_scrape_run(
        &self,
        run_id: i64,
        pages_fetched: u32,
        records_loaded: usize,
        used_fallback: bool,
        error: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            r#"UPDATE scrape_runs SET
               finished_at = ?, status = ?,
               pages_fetched = ?, records_loaded = ?, used_fallback = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if error.is_none() { "success" } else { "error" },
                pages_fetched as i64,
                records_loaded as i64,
                used_fallback,
                error,
                run_id,
            ],
        )?;
        Ok(())
    }

    pub fn last_run(&self) -> Result<Option<RunSummary>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT id, started_at, finished_at, status, pages_fetched, records_loaded, used_fallback
               FROM scrape_runs ORDER BY id DESC LIMIT 1"#,
        )?;
        let mut rows = stmt.query_map([], |r| {
            Ok(RunSummary {
                id: r.get(0)?,
                started_at: r.get(1)?,
                finished_at: r.get(2)?,
                status: r.get(3)?,
                pages_fetched: r.get(4)?,
                records_loaded: r.get(5)?,
                used_fallback: r.get(6)?,
            })
        })?;
        Ok(rows.next().transpose()?)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
