//! Boolean query construction from citation records.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::input::CitationRecord;

/// Placeholder for a `.` while author tokens are filtered; any token carrying
/// it was an abbreviation (initials) and is dropped.
const ABBREVIATION_MARKER: &str = "***";

/// `et al` in any case, as a standalone phrase.
static ET_AL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bet\s+al\b").unwrap());

/// Words that would be read as operators inside a title search.
const BOOLEAN_WORDS: &[&str] = &["and", "near", "or", "not"];

/// Field codes understood by the search service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldTag {
    Author,
    Year,
    Source,
    Title,
    Topic,
}

impl FieldTag {
    pub fn code(self) -> &'static str {
        match self {
            FieldTag::Author => "AU",
            FieldTag::Year => "PY",
            FieldTag::Source => "SO",
            FieldTag::Title => "TI",
            FieldTag::Topic => "TS",
        }
    }
}

/// Search window, either explicit dates or a symbolic span such as `4week`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeSpan {
    Range { begin: String, end: Option<String> },
    Symbolic(String),
}

impl TimeSpan {
    pub fn new(begin: String, end: Option<String>) -> Self {
        TimeSpan::Range { begin, end }
    }

    /// End date, defaulting to today (`YYYY-MM-DD`) when open-ended.
    pub fn resolved_end(&self) -> Option<String> {
        match self {
            TimeSpan::Range { end: Some(end), .. } => Some(end.clone()),
            TimeSpan::Range { end: None, .. } => {
                Some(chrono::Local::now().date_naive().format("%Y-%m-%d").to_string())
            }
            TimeSpan::Symbolic(_) => None,
        }
    }
}

impl Default for TimeSpan {
    fn default() -> Self {
        TimeSpan::new("1900-01-01".to_string(), None)
    }
}

/// A formatted query plus the scope it is issued against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub user_query: String,
    pub database_id: String,
    pub query_language: String,
    pub time_span: TimeSpan,
}

/// Binds database scope and time window to built query strings.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    pub database_id: String,
    pub query_language: String,
    pub time_span: TimeSpan,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self {
            database_id: "WOS".to_string(),
            query_language: "en".to_string(),
            time_span: TimeSpan::default(),
        }
    }
}

impl QueryBuilder {
    /// Wrap a literal expression (e.g. a `TS=` topic query).
    pub fn literal(&self, user_query: impl Into<String>) -> SearchQuery {
        SearchQuery {
            user_query: user_query.into(),
            database_id: self.database_id.clone(),
            query_language: self.query_language.clone(),
            time_span: self.time_span.clone(),
        }
    }

    /// Build the author/year/source query for one citation.
    pub fn for_citation(&self, record: &CitationRecord) -> SearchQuery {
        self.literal(citation_query(record))
    }

    /// Same scope, different database (title searches go to the all-databases scope).
    pub fn with_database(&self, database_id: &str) -> QueryBuilder {
        QueryBuilder {
            database_id: database_id.to_string(),
            ..self.clone()
        }
    }
}

/// Surname clause for a raw author string: `"Smith, J.A., et al."` gives `(Smith)`.
///
/// Tokens of two characters or fewer are treated as initials and dropped, as
/// is any token that contained a period.
pub fn author_clause(raw: &str) -> String {
    let cleaned = raw
        .trim()
        .replace([',', ';', '"'], "")
        .replace('.', ABBREVIATION_MARKER);
    let cleaned = ET_AL_RE.replace_all(&cleaned, "");
    let surnames: Vec<&str> = cleaned
        .split_whitespace()
        .filter(|t| t.chars().count() > 2 && !t.contains(ABBREVIATION_MARKER))
        .collect();
    format!("({})", surnames.join(" AND "))
}

/// Source clause with periods turned into wildcards, word by word.
pub fn source_clause(raw: &str) -> String {
    let words: Vec<String> = raw.split_whitespace().map(|w| w.replace('.', "*")).collect();
    format!("({})", words.join(" "))
}

/// Conjunction of the non-empty AU/PY/SO clauses for one citation.
pub fn citation_query(record: &CitationRecord) -> String {
    let author = author_clause(&record.author);
    let source = source_clause(&record.source);

    let mut clauses = Vec::with_capacity(3);
    if author != "()" {
        clauses.push(format!("{}={}", FieldTag::Author.code(), author));
    }
    if let Some(year) = record.year.as_deref().map(str::trim).filter(|y| !y.is_empty()) {
        clauses.push(format!("{}={}", FieldTag::Year.code(), year));
    }
    if source != "()" {
        clauses.push(format!("{}={}", FieldTag::Source.code(), source));
    }
    if clauses.is_empty() {
        // Degenerate but well-formed.
        clauses.push(format!("{}=()", FieldTag::Author.code()));
    }
    clauses.join(" AND ")
}

/// Join tagged values as `TAG=value AND TAG=value`.
pub fn advanced_query(fields: &[(FieldTag, &str)]) -> String {
    fields
        .iter()
        .map(|(tag, value)| format!("{}={}", tag.code(), value))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Lowercased title words safe to embed in a `TI=(...)` clause.
pub fn title_terms(raw_title: &str) -> String {
    const STRIP: &[char] = &[
        '?', ';', ':', '.', ',', '-', '_', '(', ')', '[', ']', '<', '>', '{', '}', '!', '`', '\'',
    ];
    raw_title
        .split_whitespace()
        .filter(|w| !BOOLEAN_WORDS.contains(&w.to_lowercase().as_str()))
        .map(|w| {
            w.to_lowercase()
                .trim_matches(STRIP)
                .replace(['=', '(', ')', '[', ']'], "")
        })
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Title-search expressions for a hot reference, strictest first.
///
/// Levels whose year or journal is unknown are left out.
pub fn title_search_levels(title: &str, year: Option<&str>, journal: Option<&str>) -> Vec<String> {
    let title = format!("({title})");
    let year = year.map(|y| format!("({y})"));
    let journal = journal.map(|j| format!("({j})"));

    let mut levels = Vec::with_capacity(3);
    if let (Some(year), Some(journal)) = (&year, &journal) {
        levels.push(advanced_query(&[
            (FieldTag::Title, title.as_str()),
            (FieldTag::Year, year.as_str()),
            (FieldTag::Source, journal.as_str()),
        ]));
    }
    if let Some(journal) = &journal {
        levels.push(advanced_query(&[
            (FieldTag::Title, title.as_str()),
            (FieldTag::Source, journal.as_str()),
        ]));
    }
    levels.push(advanced_query(&[(FieldTag::Title, title.as_str())]));
    levels
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(year: Option<&str>, author: &str, source: &str) -> CitationRecord {
        CitationRecord {
            id: "1".into(),
            year: year.map(Into::into),
            author: author.into(),
            source: source.into(),
            volume: String::new(),
            page: String::new(),
            issue: None,
        }
    }

    #[test]
    fn author_clause_keeps_surname_drops_initials() {
        assert_eq!(author_clause("Smith, J.A., et al."), "(Smith)");
    }

    #[test]
    fn author_clause_joins_several_surnames() {
        assert_eq!(
            author_clause("Smith J; Okonkwo BA; Lee D"),
            "(Smith AND Okonkwo AND Lee)"
        );
    }

    #[test]
    fn author_clause_drops_abbreviated_tokens() {
        // "Jas." carries a period, so it is an abbreviation even though it is long.
        assert_eq!(author_clause("Jas. Whitfield"), "(Whitfield)");
    }

    #[test]
    fn author_clause_handles_uppercase_et_al() {
        assert_eq!(author_clause("Garcia ET AL"), "(Garcia)");
    }

    #[test]
    fn source_clause_wildcards_periods() {
        assert_eq!(source_clause("J. Agric. Sci."), "(J* Agric* Sci*)");
    }

    #[test]
    fn full_citation_query() {
        let q = citation_query(&record(Some("1998"), "Smith, J.A.", "Crop Sci."));
        assert_eq!(q, "AU=(Smith) AND PY=1998 AND SO=(Crop Sci*)");
    }

    #[test]
    fn missing_year_omits_year_clause() {
        let q = citation_query(&record(None, "Smith, J.A.", "Crop Sci."));
        assert_eq!(q, "AU=(Smith) AND SO=(Crop Sci*)");
        assert!(!q.contains("PY="));
    }

    #[test]
    fn all_empty_still_emits_author_clause() {
        let q = citation_query(&record(None, "J.", ""));
        assert_eq!(q, "AU=()");
    }

    #[test]
    fn builder_attaches_scope() {
        let builder = QueryBuilder::default();
        let q = builder.for_citation(&record(Some("2001"), "Lee", "Nature"));
        assert_eq!(q.database_id, "WOS");
        assert_eq!(q.user_query, "AU=(Lee) AND PY=2001 AND SO=(Nature)");
        let wok = builder.with_database("WOK").literal("TI=(x)");
        assert_eq!(wok.database_id, "WOK");
    }

    #[test]
    fn advanced_query_tags_fields() {
        let q = advanced_query(&[(FieldTag::Author, "(Lee)"), (FieldTag::Year, "2001")]);
        assert_eq!(q, "AU=(Lee) AND PY=2001");
    }

    #[test]
    fn title_terms_strip_operators_and_punctuation() {
        assert_eq!(
            title_terms("Yield AND Quality of (Perennial) Rice: a Review!"),
            "yield quality of perennial rice a review"
        );
        assert_eq!(title_terms("Wheat = Grain"), "wheat grain");
    }

    #[test]
    fn title_levels_skip_unknown_fields() {
        let all = title_search_levels("rice yield", Some("1999"), Some("Field Crops Res"));
        assert_eq!(all.len(), 3);
        assert_eq!(
            all[0],
            "TI=(rice yield) AND PY=(1999) AND SO=(Field Crops Res)"
        );
        let no_year = title_search_levels("rice yield", None, Some("Field Crops Res"));
        assert_eq!(no_year, vec![
            "TI=(rice yield) AND SO=(Field Crops Res)".to_string(),
            "TI=(rice yield)".to_string(),
        ]);
        assert_eq!(title_search_levels("rice", None, None), vec!["TI=(rice)"]);
    }

    #[test]
    fn open_time_span_resolves_to_today() {
        let span = TimeSpan::default();
        let end = span.resolved_end().unwrap();
        assert_eq!(end.len(), 10);
        assert!(TimeSpan::Symbolic("4week".into()).resolved_end().is_none());
    }
}
