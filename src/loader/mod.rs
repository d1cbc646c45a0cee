//! CSV loader for bulk-importing book list dumps.
//!
//! Rows go through the same normalizer as scraped entries, so a dump import
//! can never smuggle an invalid record past validation.

use crate::models::{BookRecord, RawBookEntry};
use crate::scraper::cleaner::normalize;
use anyhow::Result;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Parse a dump CSV with the canonical column order:
/// title, author, avg_rating, num_ratings, score, people_voted
pub fn load_csv(path: &Path) -> Result<Vec<BookRecord>> {
    debug!("Loading books from {:?}", path);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let now = Utc::now().naive_utc();
    let mut books = Vec::new();

    for (i, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("Row {} in {:?}: {}", i + 1, path, e);
                continue;
            }
        };

        let raw = RawBookEntry {
            title: record.get(0).unwrap_or_default().to_string(),
            author: record.get(1).unwrap_or_default().to_string(),
            rating_text: record.get(2).unwrap_or_default().to_string(),
            ratings_text: record.get(3).unwrap_or_default().to_string(),
            score_text: record.get(4).unwrap_or_default().to_string(),
            votes_text: record.get(5).unwrap_or_default().to_string(),
        };

        match normalize(&raw, now) {
            Ok(book) => books.push(book),
            Err(e) => warn!("Row {} in {:?}: dropped: {}", i + 1, path, e),
        }
    }

    info!("{:?}: {} records loaded", path, books.len());
    Ok(books)
}

pub fn discover_csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().map(|e| e == "csv").unwrap_or(false) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
