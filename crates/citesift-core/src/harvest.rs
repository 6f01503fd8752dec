//! Batch orchestration: queries in, named result collections out.

use std::path::Path;

use serde::Serialize;

use crate::input::CitationRecord;
use crate::normalize::CitedReference;
use crate::pager::{PagedOperation, Pager, resolve_hot_reference};
use crate::query::QueryBuilder;
use crate::record::{Collection, MetadataRecord, ResultCollection};
use crate::service::{RetrieveParameters, SearchService};
use crate::session::{SessionContext, SessionError};
use crate::sift::{SiftOutcome, sift};
use crate::{Config, CoreError, export};

/// Progress events emitted while a batch runs.
#[derive(Debug, Clone)]
pub enum HarvestEvent {
    PhaseStarted {
        collection: Collection,
        total: usize,
    },
    Searching {
        index: usize,
        total: usize,
        query: String,
    },
    Completed {
        index: usize,
        total: usize,
        query: String,
        found: u64,
        stored: usize,
    },
    Reconciled {
        index: usize,
        total: usize,
        source_id: String,
        reconciliation: Box<Reconciliation>,
    },
    /// Outcome of one hot-reference title search. Not an input of its own:
    /// a failure here leaves the citing record's lookup successful.
    HotRecord {
        source_id: String,
        title: String,
        resolved: bool,
        error: Option<String>,
    },
    Failed {
        index: usize,
        total: usize,
        query: String,
        error: String,
        throttled: bool,
    },
    PhaseFinished {
        collection: Collection,
        stored: usize,
    },
}

/// How the candidates for one citation were settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// The search returned a single record; accepted without sifting.
    Unique(MetadataRecord),
    Exact(MetadataRecord),
    /// Kept for manual review.
    Probable(Vec<MetadataRecord>),
    NoVerifiableMatch { candidates: usize },
    NotFound,
}

impl Reconciliation {
    /// Records that go into the search results.
    pub fn stored(&self) -> &[MetadataRecord] {
        match self {
            Reconciliation::Unique(r) | Reconciliation::Exact(r) => std::slice::from_ref(r),
            Reconciliation::Probable(rs) => rs,
            Reconciliation::NoVerifiableMatch { .. } | Reconciliation::NotFound => &[],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Reconciliation::Unique(_) => "unique",
            Reconciliation::Exact(_) => "exact match",
            Reconciliation::Probable(_) => "probable match",
            Reconciliation::NoVerifiableMatch { .. } => "no verifiable match",
            Reconciliation::NotFound => "not found",
        }
    }
}

/// Settle the candidates returned for `source`.
pub fn reconcile(source: &CitationRecord, candidates: Vec<MetadataRecord>) -> Reconciliation {
    match candidates.len() {
        0 => Reconciliation::NotFound,
        1 => Reconciliation::Unique(candidates.into_iter().next().unwrap_or_default()),
        n => match sift(source, &candidates) {
            SiftOutcome::Exact(r) => Reconciliation::Exact(r.clone()),
            SiftOutcome::Probable(rs) if !rs.is_empty() => {
                Reconciliation::Probable(rs.into_iter().cloned().collect())
            }
            SiftOutcome::Probable(_) => Reconciliation::NoVerifiableMatch { candidates: n },
        },
    }
}

/// Aggregate counters for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub inputs_processed: usize,
    /// Inputs that failed and were skipped.
    pub errors: usize,
    /// Sum of the totals the service reported.
    pub records_found: u64,
    pub records_stored: usize,
    pub throttled: u64,
    pub reauthorizations: u64,
    pub remote_calls: u64,
    /// Hot-reference title searches that failed.
    pub hot_failures: usize,
    pub unique: usize,
    pub exact: usize,
    pub probable: usize,
    pub unverified: usize,
    pub not_found: usize,
}

/// Records fetched for one input, plus the error that cut it short, if any.
#[derive(Default)]
struct Fetched {
    found: u64,
    records: Vec<MetadataRecord>,
    references: Vec<CitedReference>,
    error: Option<SessionError>,
}

/// Runs batches against one session and accumulates the collections.
pub struct Harvester {
    config: Config,
    session: SessionContext,
    collections: ResultCollection,
    reconciliations: Vec<(String, Reconciliation)>,
    stats: RunStats,
    progress: Box<dyn Fn(HarvestEvent) + Send + Sync>,
}

impl Harvester {
    pub fn new(config: Config, service: Box<dyn SearchService>) -> Self {
        let session = SessionContext::new(service, config.session_limits());
        Self {
            config,
            session,
            collections: ResultCollection::default(),
            reconciliations: Vec::new(),
            stats: RunStats::default(),
            progress: Box::new(|_| {}),
        }
    }

    pub fn with_progress(mut self, progress: impl Fn(HarvestEvent) + Send + Sync + 'static) -> Self {
        self.progress = Box::new(progress);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn collections(&self) -> &ResultCollection {
        &self.collections
    }

    pub fn into_collections(self) -> ResultCollection {
        self.collections
    }

    /// Per-citation outcomes, keyed by citation id, in input order.
    pub fn reconciliations(&self) -> &[(String, Reconciliation)] {
        &self.reconciliations
    }

    pub fn stats(&self) -> RunStats {
        RunStats {
            throttled: self.session.throttled(),
            reauthorizations: self.session.reauthorizations(),
            remote_calls: self.session.lifetime_calls(),
            ..self.stats.clone()
        }
    }

    /// Close the remote session.
    pub async fn finish(&mut self) {
        self.session.close().await;
    }

    fn emit(&self, event: HarvestEvent) {
        (self.progress)(event);
    }

    /// Page through `operation`, keeping pages fetched before any failure.
    async fn fetch(
        &mut self,
        operation: PagedOperation,
        source_id: &str,
        retrieve: Option<RetrieveParameters>,
    ) -> Fetched {
        let mut pager = Pager::new(operation, &self.config.elements, source_id)
            .with_page_size(self.config.page_size);
        if let Some(retrieve) = retrieve {
            pager = pager.with_retrieve(RetrieveParameters {
                count: self.config.page_size,
                ..retrieve
            });
        }
        let mut fetched = Fetched::default();
        loop {
            match pager.next_page(&mut self.session).await {
                Ok(Some(page)) => {
                    fetched.found = page.total_found;
                    fetched.records.extend(page.records);
                    fetched.references.extend(page.references);
                }
                Ok(None) => break,
                Err(e) => {
                    fetched.error = Some(e);
                    break;
                }
            }
        }
        fetched
    }

    /// Count and report a failed input. Fatal errors are handed back.
    fn fail(
        &mut self,
        index: usize,
        total: usize,
        query: &str,
        error: SessionError,
    ) -> Result<(), CoreError> {
        if error.is_fatal() {
            return Err(error.into());
        }
        self.stats.errors += 1;
        tracing::warn!(query, error = %error, "query failed, continuing");
        self.emit(HarvestEvent::Failed {
            index,
            total,
            query: query.to_string(),
            error: error.to_string(),
            throttled: matches!(error, SessionError::Throttled(_)),
        });
        Ok(())
    }

    fn store(&mut self, collection: Collection, records: Vec<MetadataRecord>) -> usize {
        let n = records.len();
        self.stats.records_stored += n;
        self.collections.extend(collection, records);
        n
    }

    fn accession_numbers(records: &[MetadataRecord]) -> Vec<String> {
        records
            .iter()
            .filter_map(|r| r.accession_number().map(str::to_string))
            .collect()
    }

    /// Run literal queries into the search results.
    pub async fn search_queries(&mut self, queries: &[String]) -> Result<(), CoreError> {
        let total = queries.len();
        let builder = self.config.query_builder();
        self.emit(HarvestEvent::PhaseStarted {
            collection: Collection::SearchResults,
            total,
        });
        let before = self.collections.len(Collection::SearchResults);

        for (index, query) in queries.iter().enumerate() {
            self.emit(HarvestEvent::Searching {
                index,
                total,
                query: query.clone(),
            });
            let fetched = self
                .fetch(PagedOperation::Search(builder.literal(query.as_str())), query, None)
                .await;
            self.stats.inputs_processed += 1;
            self.stats.records_found += fetched.found;
            let stored = self.store(Collection::SearchResults, fetched.records);
            match fetched.error {
                Some(e) => self.fail(index, total, query, e)?,
                None => self.emit(HarvestEvent::Completed {
                    index,
                    total,
                    query: query.clone(),
                    found: fetched.found,
                    stored,
                }),
            }
        }

        self.finish_phase(Collection::SearchResults, before);
        Ok(())
    }

    /// Search for each citation and keep the candidates that reconcile.
    pub async fn search_citations(&mut self, records: &[CitationRecord]) -> Result<(), CoreError> {
        let total = records.len();
        let builder = self.config.query_builder();
        self.emit(HarvestEvent::PhaseStarted {
            collection: Collection::SearchResults,
            total,
        });
        let before = self.collections.len(Collection::SearchResults);

        for (index, record) in records.iter().enumerate() {
            let query = builder.for_citation(record);
            let expression = query.user_query.clone();
            self.emit(HarvestEvent::Searching {
                index,
                total,
                query: expression.clone(),
            });
            let fetched = self
                .fetch(PagedOperation::Search(query), &record.id, None)
                .await;
            self.stats.inputs_processed += 1;
            if let Some(e) = fetched.error {
                self.fail(index, total, &expression, e)?;
                continue;
            }
            self.stats.records_found += fetched.found;

            let reconciliation = reconcile(record, fetched.records);
            match &reconciliation {
                Reconciliation::Unique(_) => self.stats.unique += 1,
                Reconciliation::Exact(_) => self.stats.exact += 1,
                Reconciliation::Probable(_) => self.stats.probable += 1,
                Reconciliation::NoVerifiableMatch { .. } => self.stats.unverified += 1,
                Reconciliation::NotFound => self.stats.not_found += 1,
            }
            tracing::debug!(
                source_id = %record.id,
                query = %expression,
                outcome = reconciliation.label(),
                "citation reconciled"
            );
            let stored = self.store(
                Collection::SearchResults,
                reconciliation.stored().to_vec(),
            );
            self.emit(HarvestEvent::Completed {
                index,
                total,
                query: expression,
                found: fetched.found,
                stored,
            });
            self.emit(HarvestEvent::Reconciled {
                index,
                total,
                source_id: record.id.clone(),
                reconciliation: Box::new(reconciliation.clone()),
            });
            self.reconciliations.push((record.id.clone(), reconciliation));
        }

        self.finish_phase(Collection::SearchResults, before);
        Ok(())
    }

    /// Page the citing articles of every accession number in the search results.
    pub async fn citing_articles(&mut self) -> Result<(), CoreError> {
        let uids = Self::accession_numbers(self.collections.get(Collection::SearchResults));
        let total = uids.len();
        let builder = self.config.query_builder();
        self.emit(HarvestEvent::PhaseStarted {
            collection: Collection::ForwardCitations,
            total,
        });
        let before = self.collections.len(Collection::ForwardCitations);

        for (index, uid) in uids.iter().enumerate() {
            self.emit(HarvestEvent::Searching {
                index,
                total,
                query: uid.clone(),
            });
            let fetched = self
                .fetch(PagedOperation::citing_articles(&builder, uid.as_str()), uid, None)
                .await;
            self.stats.inputs_processed += 1;
            self.stats.records_found += fetched.found;
            let stored = self.store(Collection::ForwardCitations, fetched.records);
            match fetched.error {
                Some(e) => self.fail(index, total, uid, e)?,
                None => self.emit(HarvestEvent::Completed {
                    index,
                    total,
                    query: uid.clone(),
                    found: fetched.found,
                    stored,
                }),
            }
        }

        self.finish_phase(Collection::ForwardCitations, before);
        Ok(())
    }

    /// Page the cited references of every accession number, taken from the
    /// search results or from a saved JSON collection.
    ///
    /// With `get_full_records`, hot references are resolved by title search
    /// into the hot records.
    pub async fn cited_references(
        &mut self,
        get_full_records: bool,
        resume_from: Option<&Path>,
    ) -> Result<(), CoreError> {
        let uids = match resume_from {
            Some(path) => Self::accession_numbers(&export::load_json(path)?),
            None => Self::accession_numbers(self.collections.get(Collection::SearchResults)),
        };
        let total = uids.len();
        let builder = self.config.query_builder();
        self.emit(HarvestEvent::PhaseStarted {
            collection: Collection::BackwardCitations,
            total,
        });
        let before = self.collections.len(Collection::BackwardCitations);

        for (index, uid) in uids.iter().enumerate() {
            self.emit(HarvestEvent::Searching {
                index,
                total,
                query: uid.clone(),
            });
            let retrieve = RetrieveParameters::new(1, self.config.page_size).with_option("Hot", "On");
            let fetched = self
                .fetch(
                    PagedOperation::cited_references(&builder, uid.as_str()),
                    uid,
                    Some(retrieve),
                )
                .await;
            self.stats.inputs_processed += 1;
            self.stats.records_found += fetched.found;
            let stored = self.store(Collection::BackwardCitations, fetched.records);

            if get_full_records {
                for reference in fetched.references.iter().filter(|r| r.is_hot()) {
                    self.resolve_hot(&builder, reference, uid).await?;
                }
            }

            match fetched.error {
                Some(e) => self.fail(index, total, uid, e)?,
                None => self.emit(HarvestEvent::Completed {
                    index,
                    total,
                    query: uid.clone(),
                    found: fetched.found,
                    stored,
                }),
            }
        }

        self.finish_phase(Collection::BackwardCitations, before);
        Ok(())
    }

    async fn resolve_hot(
        &mut self,
        builder: &QueryBuilder,
        reference: &CitedReference,
        uid: &str,
    ) -> Result<(), CoreError> {
        let title = reference.cited_title.clone().unwrap_or_default();
        match resolve_hot_reference(
            &mut self.session,
            builder,
            reference,
            &self.config.elements,
            uid,
        )
        .await
        {
            Ok(found) => {
                let resolved = found.is_some();
                if let Some(record) = found {
                    self.store(Collection::HotRecords, vec![record]);
                }
                self.emit(HarvestEvent::HotRecord {
                    source_id: uid.to_string(),
                    title,
                    resolved,
                    error: None,
                });
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                self.stats.hot_failures += 1;
                tracing::warn!(source_id = uid, title = %title, error = %e, "hot reference search failed");
                self.emit(HarvestEvent::HotRecord {
                    source_id: uid.to_string(),
                    title,
                    resolved: false,
                    error: Some(e.to_string()),
                });
                Ok(())
            }
        }
    }

    fn finish_phase(&self, collection: Collection, before: usize) {
        let stored = self.collections.len(collection) - before;
        tracing::info!(
            collection = %collection,
            stored,
            calls = self.session.lifetime_calls(),
            "phase complete"
        );
        self.emit(HarvestEvent::PhaseFinished { collection, stored });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn citation(volume: &str, page: &str) -> CitationRecord {
        CitationRecord {
            id: "c1".into(),
            year: Some("1998".into()),
            author: "Smith".into(),
            source: "Crop Sci".into(),
            volume: volume.into(),
            page: page.into(),
            issue: None,
        }
    }

    fn candidate(uid: &str, volume: &str, page: &str) -> MetadataRecord {
        let mut r = MetadataRecord::new("q", "c1");
        r.push("accession_number", uid);
        r.push("volume", volume);
        r.push("page", page);
        r
    }

    #[test]
    fn single_candidate_is_unique_without_sifting() {
        let r = reconcile(&citation("12", "1"), vec![candidate("A", "99", "500")]);
        assert!(matches!(r, Reconciliation::Unique(_)));
        assert_eq!(r.stored().len(), 1);
    }

    #[test]
    fn no_candidates_is_not_found() {
        assert_eq!(reconcile(&citation("12", "1"), vec![]), Reconciliation::NotFound);
    }

    #[test]
    fn several_candidates_are_sifted() {
        let exact = reconcile(
            &citation("12", "120-135"),
            vec![candidate("A", "3", "7"), candidate("B", "12", "120-140")],
        );
        assert_eq!(exact.stored()[0].accession_number(), Some("B"));
        assert!(matches!(exact, Reconciliation::Exact(_)));

        let none = reconcile(
            &citation("12", "120-135"),
            vec![candidate("A", "3", "7"), candidate("B", "4", "8")],
        );
        assert_eq!(none, Reconciliation::NoVerifiableMatch { candidates: 2 });
        assert!(none.stored().is_empty());
    }
}
