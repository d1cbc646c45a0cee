use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ── Canonical record ──────────────────────────────────────────────────────────

/// A validated, normalized book row — the only shape that reaches storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookRecord {
    pub title: String,
    /// May be empty when the listing omits the author, never absent.
    pub author: String,
    /// Always within [0.0, 5.0] after normalization.
    pub avg_rating: f64,
    pub num_ratings: i64,
    /// The listing's ranking score, not a rating.
    pub score: i64,
    pub people_voted: i64,
    pub scraped_at: NaiveDateTime,
}

impl BookRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            title: self.title.clone(),
            author: self.author.clone(),
        }
    }
}

/// Natural dedup/upsert key, within a run and across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub title: String,
    pub author: String,
}

// ── Raw listing row ───────────────────────────────────────────────────────────

/// Unvalidated field set extracted straight from list-page markup.
/// Optional fields the page omits are left as empty strings.
#[derive(Debug, Clone, Default)]
pub struct RawBookEntry {
    pub title: String,
    pub author: String,
    /// Left half of the minirating blurb, e.g. "4.28"
    pub rating_text: String,
    /// Right half, e.g. "9,117,773 ratings"
    pub ratings_text: String,
    /// e.g. "score: 2,947,818"
    pub score_text: String,
    /// e.g. "30,210 people voted"
    pub votes_text: String,
}
