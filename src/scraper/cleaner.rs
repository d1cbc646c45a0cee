//! Field normalization: raw listing entries → canonical records.

use crate::models::{BookRecord, RawBookEntry};
use chrono::NaiveDateTime;
use thiserror::Error;

/// Record-level rejection. Logged by the caller, never fatal to a run.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("missing title")]
    MissingTitle,

    #[error("invalid numeric {field}: {value:?}")]
    InvalidNumeric { field: &'static str, value: String },
}

fn invalid(field: &'static str, value: &str) -> RecordError {
    RecordError::InvalidNumeric {
        field,
        value: value.to_string(),
    }
}

// ── Numeric extraction ────────────────────────────────────────────────────────

/// First integer in the string, thousands separators stripped.
/// "9,117,773 ratings" → 9117773 | "score: 2,947,818" → 2947818
pub fn parse_count(s: &str) -> Option<i64> {
    let mut digits = String::new();
    let mut started = false;
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            started = true;
        } else if started && c == ',' {
            // thousands separator inside the number
        } else if started {
            break;
        }
    }
    if digits.is_empty() { None } else { digits.parse().ok() }
}

/// First decimal number in the string, keeping a directly attached sign.
/// "4.28 avg rating" → 4.28 | "-1" → -1.0 | "abc" → None
pub fn parse_rating(s: &str) -> Option<f64> {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::new();
    let mut started = false;
    let mut seen_dot = false;

    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_digit() {
            if !started && i > 0 && chars[i - 1] == '-' {
                out.push('-');
            }
            started = true;
            out.push(c);
        } else if started && c == '.' && !seen_dot {
            seen_dot = true;
            out.push('.');
        } else if started {
            break;
        }
    }

    if !started {
        return None;
    }
    out.trim_end_matches('.').parse().ok()
}

// ── Normalizer ────────────────────────────────────────────────────────────────

/// Validate and coerce one raw entry into the canonical record shape.
///
/// Rating policy: unparseable or negative ratings are rejected (a minus sign
/// means the wrong token was captured); values above 5.0 are clamped to 5.0.
/// Score and votes default to 0 when the page omitted them, but non-empty
/// garbage still rejects the record.
pub fn normalize(raw: &RawBookEntry, now: NaiveDateTime) -> Result<BookRecord, RecordError> {
    let title = raw.title.trim();
    if title.is_empty() {
        return Err(RecordError::MissingTitle);
    }

    let avg_rating =
        parse_rating(&raw.rating_text).ok_or_else(|| invalid("avg_rating", &raw.rating_text))?;
    if avg_rating < 0.0 {
        return Err(invalid("avg_rating", &raw.rating_text));
    }
    let avg_rating = avg_rating.min(5.0);

    Ok(BookRecord {
        title: title.to_string(),
        author: raw.author.trim().to_string(),
        avg_rating,
        num_ratings: required_count("num_ratings", &raw.ratings_text)?,
        score: optional_count("score", &raw.score_text)?,
        people_voted: optional_count("people_voted", &raw.votes_text)?,
        scraped_at: now,
    })
}

fn required_count(field: &'static str, s: &str) -> Result<i64, RecordError> {
    parse_count(s).ok_or_else(|| invalid(field, s))
}

/// Absent in markup → 0; present but unparseable → rejected.
fn optional_count(field: &'static str, s: &str) -> Result<i64, RecordError> {
    if s.trim().is_empty() {
        return Ok(0);
    }
    parse_count(s).ok_or_else(|| invalid(field, s))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn raw(rating: &str) -> RawBookEntry {
        RawBookEntry {
            title: "Dune".to_string(),
            author: "Frank Herbert".to_string(),
            rating_text: rating.to_string(),
            ratings_text: "1,234,567 ratings".to_string(),
            score_text: "score: 98,000".to_string(),
            votes_text: "45,000 people voted".to_string(),
        }
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("9,117,773"), Some(9_117_773));
        assert_eq!(parse_count("score: 2,947,818"), Some(2_947_818));
        assert_eq!(parse_count("30,210 people voted"), Some(30_210));
        assert_eq!(parse_count("12345"), Some(12345));
        assert_eq!(parse_count("no digits here"), None);
        assert_eq!(parse_count(""), None);
    }

    #[test]
    fn test_parse_rating() {
        assert_eq!(parse_rating("4.47"), Some(4.47));
        assert_eq!(parse_rating("4.28 avg rating"), Some(4.28));
        assert_eq!(parse_rating("-1"), Some(-1.0));
        assert_eq!(parse_rating("abc"), None);
        assert_eq!(parse_rating("6.0"), Some(6.0));
    }

    #[test]
    fn well_formed_entry_normalizes() {
        let rec = normalize(&raw("4.47"), Utc::now().naive_utc()).unwrap();
        assert_eq!(rec.title, "Dune");
        assert_eq!(rec.author, "Frank Herbert");
        assert_eq!(rec.avg_rating, 4.47);
        assert_eq!(rec.num_ratings, 1_234_567);
        assert_eq!(rec.score, 98_000);
        assert_eq!(rec.people_voted, 45_000);
    }

    #[test]
    fn negative_rating_rejected() {
        let err = normalize(&raw("-1"), Utc::now().naive_utc()).unwrap_err();
        assert!(matches!(
            err,
            RecordError::InvalidNumeric { field: "avg_rating", .. }
        ));
    }

    #[test]
    fn above_range_rating_clamped() {
        let rec = normalize(&raw("6.0"), Utc::now().naive_utc()).unwrap();
        assert_eq!(rec.avg_rating, 5.0);
    }

    #[test]
    fn unparseable_rating_rejected() {
        let err = normalize(&raw("abc"), Utc::now().naive_utc()).unwrap_err();
        assert!(matches!(
            err,
            RecordError::InvalidNumeric { field: "avg_rating", .. }
        ));
    }

    #[test]
    fn blank_title_rejected() {
        let mut r = raw("4.0");
        r.title = "   ".to_string();
        assert!(matches!(
            normalize(&r, Utc::now().naive_utc()),
            Err(RecordError::MissingTitle)
        ));
    }

    #[test]
    fn empty_optional_counts_default_to_zero() {
        let mut r = raw("4.0");
        r.score_text = String::new();
        r.votes_text = "  ".to_string();
        let rec = normalize(&r, Utc::now().naive_utc()).unwrap();
        assert_eq!(rec.score, 0);
        assert_eq!(rec.people_voted, 0);
    }

    #[test]
    fn garbage_count_rejected() {
        let mut r = raw("4.0");
        r.ratings_text = "lots of ratings".to_string();
        assert!(matches!(
            normalize(&r, Utc::now().naive_utc()),
            Err(RecordError::InvalidNumeric { field: "num_ratings", .. })
        ));
    }

    #[test]
    fn missing_author_stays_empty() {
        let mut r = raw("4.0");
        r.author = String::new();
        let rec = normalize(&r, Utc::now().naive_utc()).unwrap();
        assert_eq!(rec.author, "");
    }
}
