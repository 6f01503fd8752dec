//! Volume/page reconciliation of candidates against a source citation.

use crate::input::CitationRecord;
use crate::record::MetadataRecord;

/// Outcome of comparing one candidate to its source citation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchVerdict {
    /// Volume and page both agree.
    ExactMatch,
    /// At least one evaluated check agrees.
    ProbableMatch,
    NoVerifiableMatch,
}

fn volume_matches(source: &str, candidate: &str) -> bool {
    let source = source.trim();
    !source.is_empty() && source == candidate.trim()
}

fn endpoints(range: &str) -> impl Iterator<Item = &str> {
    range.split('-').map(str::trim).filter(|p| !p.is_empty())
}

/// Full-range equality, or any shared endpoint of the hyphen-split ranges.
fn page_matches(source: &str, candidate: &str) -> bool {
    let source = source.trim();
    let candidate = candidate.trim();
    if source.is_empty() {
        return false;
    }
    if source == candidate {
        return true;
    }
    let candidate_points: Vec<&str> = endpoints(candidate).collect();
    endpoints(source).any(|p| candidate_points.contains(&p))
}

/// Classify `candidate` against `source`.
///
/// A check runs only when the candidate carries the field; a field the
/// candidate lacks never counts toward a match.
pub fn assess(source: &CitationRecord, candidate: &MetadataRecord) -> MatchVerdict {
    let volume = candidate
        .value("volume")
        .map(|v| volume_matches(&source.volume, v));
    let page = candidate
        .value("page")
        .map(|p| page_matches(&source.page, p));

    match (volume, page) {
        (Some(true), Some(true)) => MatchVerdict::ExactMatch,
        (Some(true), _) | (_, Some(true)) => MatchVerdict::ProbableMatch,
        _ => MatchVerdict::NoVerifiableMatch,
    }
}

/// Result of sifting several candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiftOutcome<'a> {
    Exact(&'a MetadataRecord),
    /// Probable matches kept for manual review; empty when nothing agreed.
    Probable(Vec<&'a MetadataRecord>),
}

/// Sift candidates in order, stopping at the first exact match.
pub fn sift<'a>(source: &CitationRecord, candidates: &'a [MetadataRecord]) -> SiftOutcome<'a> {
    let mut probable = Vec::new();
    for candidate in candidates {
        match assess(source, candidate) {
            MatchVerdict::ExactMatch => return SiftOutcome::Exact(candidate),
            MatchVerdict::ProbableMatch => probable.push(candidate),
            MatchVerdict::NoVerifiableMatch => {}
        }
    }
    SiftOutcome::Probable(probable)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(volume: &str, page: &str) -> CitationRecord {
        CitationRecord {
            id: "1".into(),
            year: Some("1998".into()),
            author: "Smith".into(),
            source: "Crop Sci".into(),
            volume: volume.into(),
            page: page.into(),
            issue: None,
        }
    }

    fn candidate(uid: &str, volume: &str, page: &str) -> MetadataRecord {
        let mut r = MetadataRecord::new("q", "1");
        r.push("accession_number", uid);
        r.push("volume", volume);
        r.push("page", page);
        r
    }

    #[test]
    fn shared_start_page_and_volume_is_exact() {
        let v = assess(&source("12", "120-135"), &candidate("A", "12", "120-140"));
        assert_eq!(v, MatchVerdict::ExactMatch);
    }

    #[test]
    fn volume_only_is_probable() {
        let v = assess(&source("12", "200-210"), &candidate("A", "12", "300-310"));
        assert_eq!(v, MatchVerdict::ProbableMatch);
    }

    #[test]
    fn page_only_is_probable() {
        let v = assess(&source("12", "55"), &candidate("A", "13", "55"));
        assert_eq!(v, MatchVerdict::ProbableMatch);
    }

    #[test]
    fn absent_fields_never_match() {
        let v = assess(&source("12", "120-135"), &candidate("A", "NONE", "NONE"));
        assert_eq!(v, MatchVerdict::NoVerifiableMatch);

        let mut bare = MetadataRecord::new("q", "1");
        bare.push("accession_number", "B");
        assert_eq!(
            assess(&source("12", "120"), &bare),
            MatchVerdict::NoVerifiableMatch
        );
    }

    #[test]
    fn empty_source_fields_never_match() {
        let v = assess(&source("", ""), &candidate("A", "12", "120"));
        assert_eq!(v, MatchVerdict::NoVerifiableMatch);
    }

    #[test]
    fn sift_stops_at_first_exact() {
        let candidates = vec![
            candidate("A", "12", "999"),
            candidate("B", "12", "120-135"),
            candidate("C", "12", "120-135"),
        ];
        match sift(&source("12", "120-135"), &candidates) {
            SiftOutcome::Exact(r) => assert_eq!(r.accession_number(), Some("B")),
            other => panic!("expected exact match, got {:?}", other),
        }
    }

    #[test]
    fn sift_collects_probables() {
        let candidates = vec![
            candidate("A", "12", "999"),
            candidate("B", "7", "1-2"),
            candidate("C", "3", "120"),
        ];
        match sift(&source("12", "120-135"), &candidates) {
            SiftOutcome::Probable(r) => {
                let ids: Vec<_> = r.iter().filter_map(|c| c.accession_number()).collect();
                assert_eq!(ids, ["A", "C"]);
            }
            other => panic!("expected probable matches, got {:?}", other),
        }
    }
}
