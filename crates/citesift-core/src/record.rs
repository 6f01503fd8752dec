//! Normalized metadata records and the named collections a run accumulates.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::NONE_VALUE;

/// Key under which the producing query is stored when flattened.
pub const QUERY_KEY: &str = "query";
/// Key under which the producing source id is stored when flattened.
pub const SOURCE_ID_KEY: &str = "source_id";

/// One normalized result row.
///
/// `fields` keeps the requested element order; every requested element is
/// present, holding [`NONE_VALUE`] when nothing was found.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetadataRecord {
    /// Query expression (or accession number) that produced this record.
    pub query: String,
    /// Id of the citation, query or accession number this record answers.
    pub source_id: String,
    pub fields: Vec<(String, String)>,
}

impl MetadataRecord {
    pub fn new(query: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            source_id: source_id.into(),
            fields: Vec::new(),
        }
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.push((key.into(), value.into()));
    }

    /// Raw value for `key`, including the `NONE` sentinel.
    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            QUERY_KEY => Some(self.query.as_str()),
            SOURCE_ID_KEY => Some(self.source_id.as_str()),
            _ => self
                .fields
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
        }
    }

    /// Value for `key` only if it carries real data (not empty, not `NONE`).
    pub fn value(&self, key: &str) -> Option<&str> {
        self.get(key)
            .map(str::trim)
            .filter(|v| !v.is_empty() && *v != NONE_VALUE)
    }

    pub fn accession_number(&self) -> Option<&str> {
        self.value("accession_number")
    }

    /// Column names in output order: query, source id, then the fields.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        [QUERY_KEY, SOURCE_ID_KEY]
            .into_iter()
            .chain(self.fields.iter().map(|(k, _)| k.as_str()))
    }

    /// Values in the same order as [`keys`](Self::keys).
    pub fn values(&self) -> impl Iterator<Item = &str> {
        [self.query.as_str(), self.source_id.as_str()]
            .into_iter()
            .chain(self.fields.iter().map(|(_, v)| v.as_str()))
    }
}

// Flattened to a single JSON object so saved collections stay readable by
// spreadsheet-minded tooling; key order is preserved both ways.
impl Serialize for MetadataRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 2))?;
        for (k, v) in self.keys().zip(self.values()) {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for MetadataRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RecordVisitor;

        impl<'de> Visitor<'de> for RecordVisitor {
            type Value = MetadataRecord;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a flat object of metadata fields")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut record = MetadataRecord::default();
                while let Some((key, value)) = access.next_entry::<String, serde_json::Value>()? {
                    let value = match value {
                        serde_json::Value::String(s) => s,
                        serde_json::Value::Null => NONE_VALUE.to_string(),
                        other => other.to_string(),
                    };
                    match key.as_str() {
                        QUERY_KEY => record.query = value,
                        SOURCE_ID_KEY => record.source_id = value,
                        _ => record.fields.push((key, value)),
                    }
                }
                Ok(record)
            }
        }

        deserializer.deserialize_map(RecordVisitor)
    }
}

/// The four named collections a run fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    SearchResults,
    ForwardCitations,
    BackwardCitations,
    HotRecords,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::SearchResults,
        Collection::ForwardCitations,
        Collection::BackwardCitations,
        Collection::HotRecords,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Collection::SearchResults => "search_results",
            Collection::ForwardCitations => "forward_citations",
            Collection::BackwardCitations => "backward_citations",
            Collection::HotRecords => "hot_records",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| format!("unknown collection '{}'", s))
    }
}

/// Append-only record store, one ordered list per [`Collection`].
#[derive(Debug, Clone, Default)]
pub struct ResultCollection {
    search_results: Vec<MetadataRecord>,
    forward_citations: Vec<MetadataRecord>,
    backward_citations: Vec<MetadataRecord>,
    hot_records: Vec<MetadataRecord>,
}

impl ResultCollection {
    pub fn push(&mut self, collection: Collection, record: MetadataRecord) {
        self.slot_mut(collection).push(record);
    }

    pub fn extend(&mut self, collection: Collection, records: impl IntoIterator<Item = MetadataRecord>) {
        self.slot_mut(collection).extend(records);
    }

    pub fn get(&self, collection: Collection) -> &[MetadataRecord] {
        match collection {
            Collection::SearchResults => &self.search_results,
            Collection::ForwardCitations => &self.forward_citations,
            Collection::BackwardCitations => &self.backward_citations,
            Collection::HotRecords => &self.hot_records,
        }
    }

    pub fn len(&self, collection: Collection) -> usize {
        self.get(collection).len()
    }

    pub fn is_empty(&self) -> bool {
        Collection::ALL.iter().all(|c| self.get(*c).is_empty())
    }

    fn slot_mut(&mut self, collection: Collection) -> &mut Vec<MetadataRecord> {
        match collection {
            Collection::SearchResults => &mut self.search_results,
            Collection::ForwardCitations => &mut self.forward_citations,
            Collection::BackwardCitations => &mut self.backward_citations,
            Collection::HotRecords => &mut self.hot_records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MetadataRecord {
        let mut r = MetadataRecord::new("AU=(Smith)", "7");
        r.push("accession_number", "WOS:1");
        r.push("title", "NONE");
        r.push("volume", " 12 ");
        r
    }

    #[test]
    fn value_hides_sentinel_but_get_does_not() {
        let r = sample();
        assert_eq!(r.get("title"), Some("NONE"));
        assert_eq!(r.value("title"), None);
        assert_eq!(r.value("volume"), Some("12"));
        assert_eq!(r.value("missing"), None);
        assert_eq!(r.get("source_id"), Some("7"));
    }

    #[test]
    fn keys_and_values_line_up() {
        let r = sample();
        let keys: Vec<_> = r.keys().collect();
        assert_eq!(keys, ["query", "source_id", "accession_number", "title", "volume"]);
        assert_eq!(r.values().nth(2), Some("WOS:1"));
    }

    #[test]
    fn json_keeps_key_order() {
        let r = sample();
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(
            json,
            r#"{"query":"AU=(Smith)","source_id":"7","accession_number":"WOS:1","title":"NONE","volume":" 12 "}"#
        );
        let back: MetadataRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn deserialize_stringifies_non_string_values() {
        let r: MetadataRecord =
            serde_json::from_str(r#"{"accession_number":"WOS:9","times_cited":4,"doi":null}"#)
                .unwrap();
        assert_eq!(r.get("times_cited"), Some("4"));
        assert_eq!(r.get("doi"), Some("NONE"));
        assert_eq!(r.source_id, "");
    }

    #[test]
    fn collections_are_separate() {
        let mut c = ResultCollection::default();
        assert!(c.is_empty());
        c.push(Collection::HotRecords, sample());
        assert_eq!(c.len(Collection::HotRecords), 1);
        assert_eq!(c.len(Collection::SearchResults), 0);
        assert_eq!("backward_citations".parse::<Collection>(), Ok(Collection::BackwardCitations));
    }
}
