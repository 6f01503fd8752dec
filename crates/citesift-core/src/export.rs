//! TSV and JSON output of result collections.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::CoreError;
use crate::record::{Collection, MetadataRecord};

/// `<dir>/<collection>_results_<YYYY-MM-DD-HHMM>.tsv`, stamped with the local time.
pub fn default_output_path(dir: &Path, collection: Collection) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y-%m-%d-%H%M");
    dir.join(format!("{}_results_{}.tsv", collection.name(), stamp))
}

/// Render records as TSV: header from the first record's keys, one row each.
pub fn to_tsv(records: &[MetadataRecord]) -> String {
    let Some(first) = records.first() else {
        return String::new();
    };
    let mut out = first.keys().collect::<Vec<_>>().join("\t");
    out.push('\n');
    for record in records {
        out.push_str(&record.values().collect::<Vec<_>>().join("\t"));
        out.push('\n');
    }
    out
}

/// Write `records` to `path` as UTF-8 TSV.
///
/// Returns `false` and writes nothing when there are no records.
pub fn write_tsv(records: &[MetadataRecord], path: &Path) -> Result<bool, CoreError> {
    if records.is_empty() {
        tracing::info!(path = %path.display(), "no results to write");
        return Ok(false);
    }
    let mut file = std::fs::File::create(path)?;
    file.write_all(to_tsv(records).as_bytes())?;
    tracing::info!(path = %path.display(), records = records.len(), "wrote results");
    Ok(true)
}

/// Save a collection as a JSON array of flat objects.
pub fn write_json(records: &[MetadataRecord], path: &Path) -> Result<(), CoreError> {
    let json = serde_json::to_string_pretty(records)?;
    std::fs::write(path, json)?;
    tracing::info!(path = %path.display(), records = records.len(), "saved collection");
    Ok(())
}

/// Load a collection saved by [`write_json`].
pub fn load_json(path: &Path) -> Result<Vec<MetadataRecord>, CoreError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(uid: &str, title: &str) -> MetadataRecord {
        let mut r = MetadataRecord::new("TS=(rice)", "TS=(rice)");
        r.push("accession_number", uid);
        r.push("title", title);
        r
    }

    #[test]
    fn tsv_header_and_rows() {
        let tsv = to_tsv(&[record("WOS:1", "Rice"), record("WOS:2", "NONE")]);
        let lines: Vec<&str> = tsv.lines().collect();
        assert_eq!(lines[0], "query\tsource_id\taccession_number\ttitle");
        assert_eq!(lines[1], "TS=(rice)\tTS=(rice)\tWOS:1\tRice");
        assert_eq!(lines[2], "TS=(rice)\tTS=(rice)\tWOS:2\tNONE");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn empty_collection_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tsv");
        assert!(!write_tsv(&[], &path).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn json_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("search_results.json");
        let records = vec![record("WOS:1", "Rice"), record("WOS:2", "Sorghum")];
        write_json(&records, &path).unwrap();
        assert_eq!(load_json(&path).unwrap(), records);
    }

    #[test]
    fn default_name_carries_collection_and_stamp() {
        let path = default_output_path(Path::new("out"), Collection::HotRecords);
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("hot_records_results_"));
        assert!(name.ends_with(".tsv"));
        // hot_records_results_ + YYYY-MM-DD-HHMM + .tsv
        assert_eq!(name.len(), "hot_records_results_".len() + 15 + 4);
    }
}
