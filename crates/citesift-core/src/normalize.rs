//! Mapping of raw result records into flat [`MetadataRecord`]s.
//!
//! The full endpoint returns XML records, the lite endpoint returns labelled
//! dictionaries. Both arrive as a [`RawRecord`] and go through [`normalize`],
//! so every element is looked up the same way whichever endpoint is bound.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::NONE_VALUE;
use crate::record::MetadataRecord;
use crate::xml::{ElementPath, XmlNode};

/// Metadata elements that can be requested from a result record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataElement {
    AccessionNumber,
    Authors,
    Title,
    PublicationName,
    Date,
    Volume,
    Issue,
    Page,
    Abstract,
    Doi,
    AuthorAddress,
    Keywords,
    KeywordsPlus,
    FundingAgency,
    GrantId,
    TimesCited,
    CitationCount,
}

/// How the value of a located XML node is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extract {
    Text,
    Attribute(&'static str),
    /// `value` attribute, only for identifiers typed `doi` / `xref_doi`.
    Doi,
}

/// Where an element lives in a lite record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LiteField {
    Uid,
    Group(LiteGroup, Option<&'static str>),
    Doi,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LiteGroup {
    Title,
    Authors,
    Source,
    Keywords,
}

/// Identifier types that count as a DOI.
const DOI_TYPES: &[&str] = &["doi", "xref_doi"];

impl MetadataElement {
    pub const ALL: [MetadataElement; 17] = [
        MetadataElement::AccessionNumber,
        MetadataElement::Authors,
        MetadataElement::Title,
        MetadataElement::PublicationName,
        MetadataElement::Date,
        MetadataElement::Volume,
        MetadataElement::Issue,
        MetadataElement::Page,
        MetadataElement::Abstract,
        MetadataElement::Doi,
        MetadataElement::AuthorAddress,
        MetadataElement::Keywords,
        MetadataElement::KeywordsPlus,
        MetadataElement::FundingAgency,
        MetadataElement::GrantId,
        MetadataElement::TimesCited,
        MetadataElement::CitationCount,
    ];

    /// Output key for this element.
    pub fn key(self) -> &'static str {
        match self {
            MetadataElement::AccessionNumber => "accession_number",
            MetadataElement::Authors => "authors",
            MetadataElement::Title => "title",
            MetadataElement::PublicationName => "publication_name",
            MetadataElement::Date => "date",
            MetadataElement::Volume => "volume",
            MetadataElement::Issue => "issue",
            MetadataElement::Page => "page",
            MetadataElement::Abstract => "abstract",
            MetadataElement::Doi => "doi",
            MetadataElement::AuthorAddress => "author_address",
            MetadataElement::Keywords => "keywords",
            MetadataElement::KeywordsPlus => "keywords_plus",
            MetadataElement::FundingAgency => "funding_agency",
            MetadataElement::GrantId => "grant_id",
            MetadataElement::TimesCited => "times_cited",
            MetadataElement::CitationCount => "citation_count",
        }
    }

    fn xml_path(self) -> &'static str {
        match self {
            MetadataElement::AccessionNumber => "UID",
            MetadataElement::Authors => "static_data/summary/names/name[@role='author']/full_name",
            MetadataElement::Title => "static_data/summary/titles/title[@type='item']",
            MetadataElement::PublicationName => "static_data/summary/titles/title[@type='source']",
            MetadataElement::Date | MetadataElement::Volume | MetadataElement::Issue => {
                "static_data/summary/pub_info"
            }
            MetadataElement::Page => "static_data/summary/pub_info/page",
            MetadataElement::Abstract => {
                "static_data/fullrecord_metadata/abstracts/abstract/abstract_text/p"
            }
            MetadataElement::Doi => "dynamic_data/cluster_related/identifiers/identifier",
            MetadataElement::AuthorAddress => {
                "static_data/fullrecord_metadata/addresses/address_name/address_spec/full_address"
            }
            MetadataElement::Keywords => "static_data/fullrecord_metadata/keywords/keyword",
            MetadataElement::KeywordsPlus => "static_data/item/keywords_plus/keyword",
            MetadataElement::FundingAgency => {
                "static_data/fullrecord_metadata/fund_ack/grants/grant/grant_agency"
            }
            MetadataElement::GrantId => {
                "static_data/fullrecord_metadata/fund_ack/grants/grant/grant_ids/grant_id"
            }
            MetadataElement::TimesCited => "dynamic_data/citation_related/tc_list/silo_tc",
            MetadataElement::CitationCount => "static_data/fullrecord_metadata/refs",
        }
    }

    fn extract(self) -> Extract {
        match self {
            MetadataElement::Date => Extract::Attribute("pubyear"),
            MetadataElement::Volume => Extract::Attribute("vol"),
            MetadataElement::Issue => Extract::Attribute("issue"),
            MetadataElement::TimesCited => Extract::Attribute("local_count"),
            MetadataElement::CitationCount => Extract::Attribute("count"),
            MetadataElement::Doi => Extract::Doi,
            _ => Extract::Text,
        }
    }

    fn lite_field(self) -> LiteField {
        match self {
            MetadataElement::AccessionNumber => LiteField::Uid,
            MetadataElement::Authors => LiteField::Group(LiteGroup::Authors, None),
            MetadataElement::Title => LiteField::Group(LiteGroup::Title, None),
            MetadataElement::Keywords => LiteField::Group(LiteGroup::Keywords, None),
            MetadataElement::PublicationName => {
                LiteField::Group(LiteGroup::Source, Some("SourceTitle"))
            }
            MetadataElement::Date => {
                LiteField::Group(LiteGroup::Source, Some("Published.BiblioYear"))
            }
            MetadataElement::Volume => LiteField::Group(LiteGroup::Source, Some("Volume")),
            MetadataElement::Issue => LiteField::Group(LiteGroup::Source, Some("Issue")),
            MetadataElement::Page => LiteField::Group(LiteGroup::Source, Some("Pages")),
            MetadataElement::Doi => LiteField::Doi,
            _ => LiteField::Unavailable,
        }
    }
}

impl std::str::FromStr for MetadataElement {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetadataElement::ALL
            .into_iter()
            .find(|e| e.key() == s.trim())
            .ok_or_else(|| format!("unknown metadata element '{}'", s))
    }
}

/// Compiled paths, indexed like [`MetadataElement::ALL`].
static XML_PATHS: Lazy<Vec<ElementPath>> = Lazy::new(|| {
    MetadataElement::ALL
        .iter()
        .map(|e| ElementPath::parse(e.xml_path()).expect("built-in element paths are valid"))
        .collect()
});

fn compiled_path(element: MetadataElement) -> &'static ElementPath {
    let idx = MetadataElement::ALL
        .iter()
        .position(|e| *e == element)
        .unwrap_or(0);
    &XML_PATHS[idx]
}

/// A label with its values, as the lite endpoint groups fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LabelValues {
    pub label: String,
    pub values: Vec<String>,
}

impl LabelValues {
    pub fn new(label: impl Into<String>, values: &[&str]) -> Self {
        Self {
            label: label.into(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }
}

/// A lite-endpoint record: uid plus labelled groups.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LiteRecord {
    pub uid: String,
    pub title: Vec<LabelValues>,
    pub authors: Vec<LabelValues>,
    pub source: Vec<LabelValues>,
    /// Identifiers, labelled like `Identifier.Doi`.
    pub other: Vec<LabelValues>,
    pub keywords: Vec<LabelValues>,
}

impl LiteRecord {
    fn group(&self, group: LiteGroup) -> &[LabelValues] {
        match group {
            LiteGroup::Title => &self.title,
            LiteGroup::Authors => &self.authors,
            LiteGroup::Source => &self.source,
            LiteGroup::Keywords => &self.keywords,
        }
    }
}

/// One row of a cited-reference lookup. Every field may be missing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CitedReference {
    pub doc_id: Option<String>,
    pub cited_author: Option<String>,
    pub cited_title: Option<String>,
    pub cited_work: Option<String>,
    pub hot: Option<String>,
    pub year: Option<String>,
}

impl CitedReference {
    /// Whether the service holds a resolvable full record for this reference.
    pub fn is_hot(&self) -> bool {
        self.hot
            .as_deref()
            .is_some_and(|h| h.trim().eq_ignore_ascii_case("yes"))
    }
}

/// A raw result record in either endpoint shape.
#[derive(Debug, Clone, Copy)]
pub enum RawRecord<'a> {
    Full(&'a XmlNode),
    Lite(&'a LiteRecord),
}

fn clean(value: &str) -> String {
    value.replace('\t', "")
}

fn join_or_none(values: Vec<String>) -> String {
    if values.is_empty() {
        NONE_VALUE.to_string()
    } else {
        values.join("; ")
    }
}

fn full_values(record: &XmlNode, element: MetadataElement) -> Vec<String> {
    let nodes = record.find_all(compiled_path(element));
    nodes
        .into_iter()
        .filter_map(|node| match element.extract() {
            Extract::Text => Some(node.text.as_str()),
            Extract::Attribute(name) => node.attr(name),
            Extract::Doi => node
                .attr("type")
                .filter(|t| DOI_TYPES.contains(t))
                .and_then(|_| node.attr("value")),
        })
        .map(clean)
        .collect()
}

fn lite_values(record: &LiteRecord, element: MetadataElement) -> Vec<String> {
    match element.lite_field() {
        LiteField::Uid => {
            if record.uid.is_empty() {
                vec![]
            } else {
                vec![clean(&record.uid)]
            }
        }
        LiteField::Group(group, label) => record
            .group(group)
            .iter()
            .filter(|lv| label.is_none_or(|l| lv.label == l))
            .flat_map(|lv| lv.values.iter())
            .map(|v| clean(v))
            .collect(),
        LiteField::Doi => record
            .other
            .iter()
            .filter(|lv| {
                lv.label
                    .strip_prefix("Identifier.")
                    .is_some_and(|t| DOI_TYPES.contains(&t.to_ascii_lowercase().as_str()))
            })
            .flat_map(|lv| lv.values.iter())
            .map(|v| clean(v))
            .collect(),
        LiteField::Unavailable => vec![],
    }
}

/// Normalize one raw record, producing every requested element in order.
pub fn normalize(
    raw: RawRecord<'_>,
    elements: &[MetadataElement],
    query: &str,
    source_id: &str,
) -> MetadataRecord {
    let mut record = MetadataRecord::new(query, source_id);
    for &element in elements {
        let values = match raw {
            RawRecord::Full(node) => full_values(node, element),
            RawRecord::Lite(lite) => lite_values(lite, element),
        };
        record.push(element.key(), join_or_none(values));
    }
    record
}

/// Output keys for cited-reference rows, in column order.
pub const CITED_REFERENCE_KEYS: [&str; 6] =
    ["docid", "citedAuthor", "citedTitle", "citedWork", "hot", "year"];

/// Normalize a cited-reference row; absent fields become `NONE`.
pub fn normalize_cited_reference(
    reference: &CitedReference,
    query: &str,
    source_id: &str,
) -> MetadataRecord {
    let mut record = MetadataRecord::new(query, source_id);
    let values = [
        &reference.doc_id,
        &reference.cited_author,
        &reference.cited_title,
        &reference.cited_work,
        &reference.hot,
        &reference.year,
    ];
    for (key, value) in CITED_REFERENCE_KEYS.iter().zip(values) {
        let value = value
            .as_deref()
            .map(clean)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| NONE_VALUE.to_string());
        record.push(*key, value);
    }
    record
}
