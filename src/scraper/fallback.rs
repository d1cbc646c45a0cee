//! Deterministic synthetic records for runs where live extraction failed
//! completely. Keeps the pipeline and its consumers exercisable while the
//! source is unreachable or its markup has changed.

use crate::models::BookRecord;
use chrono::NaiveDateTime;

/// Produce `n` synthetic records. Deterministic in `n`: the same request
/// always yields the same batch, so downstream idempotence still holds.
/// Every record satisfies the canonical invariants.
pub fn fallback_books(n: usize, now: NaiveDateTime) -> Vec<BookRecord> {
    (1..=n as i64)
        .map(|i| BookRecord {
            title: format!("Fallback Book {:03}", i),
            author: format!("Placeholder Author {:02}", (i - 1) % 10 + 1),
            avg_rating: 4.5 - ((i - 1) % 10) as f64 * 0.25,
            num_ratings: 10_000 * i,
            score: 5_000 * i,
            people_voted: 1_000 * i,
            scraped_at: now,
        })
        .collect()
}
