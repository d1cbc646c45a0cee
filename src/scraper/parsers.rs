//! List-page parsing: one Goodreads-style listing page → raw book entries.

use crate::models::RawBookEntry;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::debug;

/// Page-level structural failure. Treated as a zero-yield page upstream.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unrecognised page structure: {0}")]
    Structure(String),
}

fn selector(s: &str) -> Result<Selector, ParseError> {
    Selector::parse(s).map_err(|e| ParseError::Structure(format!("selector {:?}: {:?}", s, e)))
}

fn text_of(el: ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn first_text(scope: ElementRef, sel: &Selector) -> Option<String> {
    scope
        .select(sel)
        .next()
        .map(text_of)
        .filter(|s| !s.is_empty())
}

// ── Listing page ──────────────────────────────────────────────────────────────

/// Extract every book row from one listing page.
///
/// Rows without a title are skipped; missing optional fields come back as
/// empty strings so a single bad cell never sinks the page.
pub fn parse_list_page(html: &str) -> Result<Vec<RawBookEntry>, ParseError> {
    let doc = Html::parse_document(html);

    let table_sel = selector("table.tableList")?;
    let row_sel = selector("tr")?;
    let title_span_sel = selector("a.bookTitle span")?;
    let title_sel = selector("a.bookTitle")?;
    let author_span_sel = selector("a.authorName span")?;
    let author_sel = selector("a.authorName")?;
    let minirating_sel = selector("span.minirating")?;
    let score_sel = selector(r#"a[onclick*="score_explanation"]"#)?;
    let anchor_sel = selector("a")?;

    let Some(table) = doc.select(&table_sel).next() else {
        return Err(ParseError::Structure("list table not found".to_string()));
    };

    let mut entries = Vec::new();
    for tr in table.select(&row_sel) {
        // Title is the one required field; header/filler rows have none.
        let Some(title) = first_text(tr, &title_span_sel).or_else(|| first_text(tr, &title_sel))
        else {
            continue;
        };

        let author = first_text(tr, &author_span_sel)
            .or_else(|| first_text(tr, &author_sel))
            .unwrap_or_default();

        // "4.28 avg rating — 9,117,773 ratings" → ("4.28", "9,117,773 ratings")
        let minirating = first_text(tr, &minirating_sel).unwrap_or_default();
        let (rating_text, ratings_text) = split_minirating(&minirating);

        let score_text = first_text(tr, &score_sel).unwrap_or_default();

        let votes_text = tr
            .select(&anchor_sel)
            .map(text_of)
            .find(|t| t.to_lowercase().contains("people voted"))
            .unwrap_or_default();

        entries.push(RawBookEntry {
            title,
            author,
            rating_text,
            ratings_text,
            score_text,
            votes_text,
        });
    }

    debug!("Parsed {} raw entries from page", entries.len());
    Ok(entries)
}

fn split_minirating(text: &str) -> (String, String) {
    match text.split_once("avg rating") {
        Some((rating, rest)) => (
            rating.trim().to_string(),
            rest.trim_start_matches([' ', '—', '-']).trim().to_string(),
        ),
        None => (text.trim().to_string(), String::new()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"
        <html><body>
        <table class="tableList">
          <tr>
            <td>
              <a class="bookTitle" href="/book/1"><span>The Hunger Games</span></a>
              <a class="authorName" href="/author/1"><span>Suzanne Collins</span></a>
              <span class="minirating">4.32 avg rating &mdash; 9,117,773 ratings</span>
              <a onclick="Lightbox.showBoxByID('score_explanation', 300);">score: 2,947,818</a>
              <a href="#">30,210 people voted</a>
            </td>
          </tr>
          <tr>
            <td>
              <a class="bookTitle"><span>Pride &amp; Prejudice</span></a>
              <a class="authorName"><span>Jane Austen</span></a>
              <span class="minirating">  4.28 avg rating — 4,385,167 ratings </span>
              <a onclick="Lightbox.showBoxByID('score_explanation', 2);">score: 2,524,901</a>
              <a href="#">25,770 people voted</a>
            </td>
          </tr>
        </table>
        </body></html>
    "##;

    #[test]
    fn extracts_all_well_formed_rows() {
        let entries = parse_list_page(PAGE).unwrap();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].title, "The Hunger Games");
        assert_eq!(entries[0].author, "Suzanne Collins");
        assert_eq!(entries[0].rating_text, "4.32");
        assert_eq!(entries[0].ratings_text, "9,117,773 ratings");
        assert_eq!(entries[0].score_text, "score: 2,947,818");
        assert_eq!(entries[0].votes_text, "30,210 people voted");
    }

    #[test]
    fn decodes_entities_and_trims_whitespace() {
        let entries = parse_list_page(PAGE).unwrap();
        assert_eq!(entries[1].title, "Pride & Prejudice");
        assert_eq!(entries[1].rating_text, "4.28");
        assert_eq!(entries[1].ratings_text, "4,385,167 ratings");
    }

    #[test]
    fn row_without_title_is_skipped() {
        let html = r#"
            <table class="tableList">
              <tr><td><a class="authorName"><span>Ghost Writer</span></a></td></tr>
              <tr><td><a class="bookTitle"><span>Real Book</span></a></td></tr>
            </table>
        "#;
        let entries = parse_list_page(html).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "Real Book");
    }

    #[test]
    fn missing_optional_fields_become_empty_placeholders() {
        let html = r#"
            <table class="tableList">
              <tr><td><a class="bookTitle"><span>Lone Title</span></a></td></tr>
            </table>
        "#;
        let entries = parse_list_page(html).unwrap();
        assert_eq!(entries[0].author, "");
        assert_eq!(entries[0].rating_text, "");
        assert_eq!(entries[0].score_text, "");
        assert_eq!(entries[0].votes_text, "");
    }

    #[test]
    fn missing_list_table_is_a_structure_error() {
        let err = parse_list_page("<html><body><p>blocked</p></body></html>").unwrap_err();
        assert!(matches!(err, ParseError::Structure(_)));
    }

    #[test]
    fn empty_table_yields_zero_entries() {
        let entries = parse_list_page(r#"<table class="tableList"></table>"#).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn minirating_without_marker_goes_whole_into_rating_text() {
        let (rating, ratings) = split_minirating("4.1");
        assert_eq!(rating, "4.1");
        assert_eq!(ratings, "");
    }
}
