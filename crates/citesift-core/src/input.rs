//! Column-mapped TSV parsing of citation records.
//!
//! Datasets differ in column order and count, so extraction is driven by a
//! declarative [`ColumnMap`] rather than per-dataset parsers.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InputError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("line {line}: {message}")]
    Malformed { line: usize, message: String },
}

/// One citation row, immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationRecord {
    pub id: String,
    /// Publication year; `None` when the column was empty.
    pub year: Option<String>,
    /// Raw author string as it appeared in the input.
    pub author: String,
    pub source: String,
    pub volume: String,
    pub page: String,
    pub issue: Option<String>,
}

impl CitationRecord {
    pub fn has_year(&self) -> bool {
        self.year.is_some()
    }
}

/// Zero-based column positions for each citation field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMap {
    /// Column holding a record id. When absent the 1-based line number is used.
    pub id: Option<usize>,
    pub year: usize,
    pub author: usize,
    pub source: usize,
    pub volume: usize,
    pub page: usize,
    pub issue: Option<usize>,
    /// Skip the first non-blank line.
    pub has_header: bool,
    /// Remove double quotes spreadsheet exports wrap around cells.
    pub strip_quotes: bool,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            id: None,
            year: 0,
            author: 1,
            source: 2,
            volume: 3,
            page: 4,
            issue: None,
            has_header: false,
            strip_quotes: true,
        }
    }
}

impl ColumnMap {
    fn highest_column(&self) -> usize {
        [
            self.id.unwrap_or(0),
            self.year,
            self.author,
            self.source,
            self.volume,
            self.page,
            self.issue.unwrap_or(0),
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

/// Parse one tab-separated line into a [`CitationRecord`].
///
/// Missing trailing columns read as empty. A line with no author, source and
/// year at all is rejected since no query could be built from it.
pub fn parse_line(
    line: &str,
    line_number: usize,
    columns: &ColumnMap,
) -> Result<CitationRecord, InputError> {
    let cells: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();
    let cell = |idx: usize| -> String {
        let raw = cells.get(idx).copied().unwrap_or("");
        let raw = if columns.strip_quotes {
            raw.trim().trim_matches('"')
        } else {
            raw
        };
        raw.trim().to_string()
    };

    if cells.len() <= columns.highest_column() {
        tracing::debug!(
            line = line_number,
            cells = cells.len(),
            "short row, missing columns read as empty"
        );
    }

    let year = cell(columns.year);
    let author = cell(columns.author);
    let source = cell(columns.source);
    if year.is_empty() && author.is_empty() && source.is_empty() {
        return Err(InputError::Malformed {
            line: line_number,
            message: "no year, author or source value".to_string(),
        });
    }

    let id = match columns.id {
        Some(idx) => {
            let id = cell(idx);
            if id.is_empty() {
                line_number.to_string()
            } else {
                id
            }
        }
        None => line_number.to_string(),
    };

    Ok(CitationRecord {
        id,
        year: (!year.is_empty()).then_some(year),
        author,
        source,
        volume: cell(columns.volume),
        page: cell(columns.page),
        issue: columns.issue.map(cell).filter(|v| !v.is_empty()),
    })
}

/// Parse a whole TSV document. Malformed rows are logged and skipped.
pub fn parse_citations(text: &str, columns: &ColumnMap) -> Vec<CitationRecord> {
    let mut records = Vec::new();
    let mut header_skipped = !columns.has_header;
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        if !header_skipped {
            header_skipped = true;
            continue;
        }
        match parse_line(line, idx + 1, columns) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(error = %e, "skipping citation row"),
        }
    }
    records
}

/// Read and parse a UTF-8 TSV file of citations.
pub fn load_citations(path: &Path, columns: &ColumnMap) -> Result<Vec<CitationRecord>, InputError> {
    let text = std::fs::read_to_string(path).map_err(|source| InputError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let records = parse_citations(&text, columns);
    tracing::info!(path = %path.display(), records = records.len(), "loaded citations");
    Ok(records)
}

/// Read a file of literal queries, one per line. Blank lines and `#` comments are skipped.
pub fn load_queries(path: &Path) -> Result<Vec<String>, InputError> {
    let text = std::fs::read_to_string(path).map_err(|source| InputError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}
