//! Lazy, finite paging over one remote result set.

use std::collections::VecDeque;

use futures_util::Stream;
use futures_util::stream;

use crate::normalize::{
    CitedReference, MetadataElement, RawRecord, normalize, normalize_cited_reference,
};
use crate::query::{QueryBuilder, SearchQuery, TimeSpan, title_search_levels, title_terms};
use crate::record::MetadataRecord;
use crate::service::{Request, ResultRecords, RetrieveParameters, ServiceError};
use crate::session::{SessionContext, SessionError};
use crate::xml::parse_document;

/// Records requested per page; the service caps this at 100.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Database scope for hot-reference title searches (all databases).
pub const HOT_SEARCH_DATABASE: &str = "WOK";

/// A paged remote operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagedOperation {
    Search(SearchQuery),
    CitingArticles {
        database_id: String,
        uid: String,
        time_span: TimeSpan,
        query_language: String,
    },
    CitedReferences {
        database_id: String,
        uid: String,
        query_language: String,
    },
}

impl PagedOperation {
    /// Citing articles of `uid`, scoped like `builder`.
    pub fn citing_articles(builder: &QueryBuilder, uid: impl Into<String>) -> Self {
        PagedOperation::CitingArticles {
            database_id: builder.database_id.clone(),
            uid: uid.into(),
            time_span: builder.time_span.clone(),
            query_language: builder.query_language.clone(),
        }
    }

    pub fn cited_references(builder: &QueryBuilder, uid: impl Into<String>) -> Self {
        PagedOperation::CitedReferences {
            database_id: builder.database_id.clone(),
            uid: uid.into(),
            query_language: builder.query_language.clone(),
        }
    }

    /// The query expression, or the accession number for citation lookups.
    pub fn label(&self) -> &str {
        match self {
            PagedOperation::Search(q) => &q.user_query,
            PagedOperation::CitingArticles { uid, .. }
            | PagedOperation::CitedReferences { uid, .. } => uid,
        }
    }

    fn first_request(&self, retrieve: RetrieveParameters) -> Request {
        match self.clone() {
            PagedOperation::Search(query) => Request::Search { query, retrieve },
            PagedOperation::CitingArticles {
                database_id,
                uid,
                time_span,
                query_language,
            } => Request::CitingArticles {
                database_id,
                uid,
                time_span,
                query_language,
                retrieve,
            },
            PagedOperation::CitedReferences {
                database_id,
                uid,
                query_language,
            } => Request::CitedReferences {
                database_id,
                uid,
                query_language,
                retrieve,
            },
        }
    }

    fn continuation(&self, query_id: &str, retrieve: RetrieveParameters) -> Request {
        let query_id = query_id.to_string();
        match self {
            PagedOperation::CitedReferences { .. } => {
                Request::CitedReferencesRetrieve { query_id, retrieve }
            }
            _ => Request::Retrieve { query_id, retrieve },
        }
    }
}

/// Position within a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalCursor {
    pub query_id: String,
    /// 1-based index of the next page's first record.
    pub first_record_index: u32,
    pub page_size: u32,
    pub total_found: u64,
    pub total_searched: u64,
}

impl RetrievalCursor {
    pub fn total_pages(&self) -> u64 {
        self.total_found.div_ceil(u64::from(self.page_size.max(1)))
    }

    pub fn is_exhausted(&self) -> bool {
        u64::from(self.first_record_index) > self.total_found
    }

    /// Move to the next page. Returns `false` when no page remains, including
    /// when the next index would not fit the service's 32-bit record index.
    pub fn advance(&mut self, page_size: u32) -> bool {
        match self.first_record_index.checked_add(page_size) {
            Some(next) => {
                self.first_record_index = next;
                !self.is_exhausted()
            }
            None => {
                tracing::warn!(
                    query_id = %self.query_id,
                    total_found = self.total_found,
                    "record index out of range; stopping"
                );
                false
            }
        }
    }
}

/// One fetched page.
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// 1-based page number.
    pub number: u64,
    pub total_found: u64,
    pub records: Vec<MetadataRecord>,
    /// Raw rows of a cited-reference page, for hot-record resolution.
    pub references: Vec<CitedReference>,
}

#[derive(Debug)]
enum PagerState {
    Idle,
    MorePages(RetrievalCursor),
    Done,
}

/// Normalize a page of records of any shape.
pub fn normalize_records(
    records: &ResultRecords,
    elements: &[MetadataElement],
    query: &str,
    source_id: &str,
) -> Result<Vec<MetadataRecord>, ServiceError> {
    Ok(match records {
        ResultRecords::Full(xml) => {
            let root = parse_document(xml).map_err(|e| ServiceError::Parse(e.to_string()))?;
            root.children
                .iter()
                .filter(|rec| rec.name == "REC")
                .map(|rec| normalize(RawRecord::Full(rec), elements, query, source_id))
                .collect()
        }
        ResultRecords::Lite(recs) => recs
            .iter()
            .map(|rec| normalize(RawRecord::Lite(rec), elements, query, source_id))
            .collect(),
        ResultRecords::References(refs) => refs
            .iter()
            .map(|r| normalize_cited_reference(r, query, source_id))
            .collect(),
        ResultRecords::Empty => Vec::new(),
    })
}

/// Pages through one operation's results. Not restartable: once it reports
/// done, or after any error, it yields nothing more.
pub struct Pager {
    operation: PagedOperation,
    retrieve: RetrieveParameters,
    elements: Vec<MetadataElement>,
    source_id: String,
    state: PagerState,
    pages_fetched: u64,
}

impl Pager {
    pub fn new(
        operation: PagedOperation,
        elements: &[MetadataElement],
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            retrieve: RetrieveParameters::new(1, DEFAULT_PAGE_SIZE),
            elements: elements.to_vec(),
            source_id: source_id.into(),
            state: PagerState::Idle,
            pages_fetched: 0,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.retrieve.count = page_size.max(1);
        self
    }

    /// Sort/view/option parameters carried on every page.
    pub fn with_retrieve(mut self, retrieve: RetrieveParameters) -> Self {
        let count = if retrieve.count == 0 {
            self.retrieve.count
        } else {
            retrieve.count
        };
        self.retrieve = RetrieveParameters { count, ..retrieve };
        self
    }

    pub fn operation(&self) -> &PagedOperation {
        &self.operation
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, PagerState::Done)
    }

    pub fn pages_fetched(&self) -> u64 {
        self.pages_fetched
    }

    /// Fetch the next page, or `None` once the result set is consumed.
    pub async fn next_page(
        &mut self,
        session: &mut SessionContext,
    ) -> Result<Option<Page>, SessionError> {
        let page_size = self.retrieve.count;
        // Left as Done until the page succeeds, so failures end the pager.
        let (request, cursor) = match std::mem::replace(&mut self.state, PagerState::Done) {
            PagerState::Done => return Ok(None),
            PagerState::Idle => (self.operation.first_request(self.retrieve.at(1)), None),
            PagerState::MorePages(cursor) => {
                tracing::debug!(
                    query = self.operation.label(),
                    page = self.pages_fetched + 1,
                    of = cursor.total_pages(),
                    "fetching result page"
                );
                let request = self
                    .operation
                    .continuation(&cursor.query_id, self.retrieve.at(cursor.first_record_index));
                (request, Some(cursor))
            }
        };

        let response = session.call(&request).await?;

        let mut cursor = match cursor {
            Some(cursor) => cursor,
            None => {
                tracing::info!(
                    query = self.operation.label(),
                    found = response.records_found,
                    searched = response.records_searched,
                    "search returned"
                );
                RetrievalCursor {
                    query_id: response.query_id.clone(),
                    first_record_index: 1,
                    page_size,
                    total_found: response.records_found,
                    total_searched: response.records_searched,
                }
            }
        };

        let records = normalize_records(
            &response.records,
            &self.elements,
            self.operation.label(),
            &self.source_id,
        )?;
        let references = match response.records {
            ResultRecords::References(refs) => refs,
            _ => Vec::new(),
        };

        self.pages_fetched += 1;
        let total_found = cursor.total_found;
        if cursor.advance(page_size) {
            self.state = PagerState::MorePages(cursor);
        }

        Ok(Some(Page {
            number: self.pages_fetched,
            total_found,
            records,
            references,
        }))
    }

    /// Drain every page into one list.
    pub async fn collect_all(
        mut self,
        session: &mut SessionContext,
    ) -> Result<Vec<MetadataRecord>, SessionError> {
        let mut out = Vec::new();
        while let Some(page) = self.next_page(session).await? {
            out.extend(page.records);
        }
        Ok(out)
    }

    /// Records one at a time, fetching pages on demand. An error is yielded
    /// once and ends the stream.
    pub fn into_stream(
        self,
        session: &mut SessionContext,
    ) -> impl Stream<Item = Result<MetadataRecord, SessionError>> + '_ {
        stream::unfold(
            (self, session, VecDeque::new(), false),
            |(mut pager, session, mut buffer, failed)| async move {
                if failed {
                    return None;
                }
                loop {
                    if let Some(record) = buffer.pop_front() {
                        return Some((Ok(record), (pager, session, buffer, false)));
                    }
                    match pager.next_page(session).await {
                        Ok(Some(page)) => buffer.extend(page.records),
                        Ok(None) => return None,
                        Err(e) => return Some((Err(e), (pager, session, buffer, true))),
                    }
                }
            },
        )
    }
}

/// Find the full record behind a hot cited reference by title search.
///
/// Levels run strictest first and stop at the first with any hit. A record
/// is returned only when that search found exactly one.
pub async fn resolve_hot_reference(
    session: &mut SessionContext,
    builder: &QueryBuilder,
    reference: &CitedReference,
    elements: &[MetadataElement],
    source_id: &str,
) -> Result<Option<MetadataRecord>, SessionError> {
    let title = reference
        .cited_title
        .as_deref()
        .map(title_terms)
        .unwrap_or_default();
    if title.is_empty() {
        return Ok(None);
    }
    let known = |v: &Option<String>| {
        v.as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty() && *s != crate::NONE_VALUE)
            .map(str::to_string)
    };
    let year = known(&reference.year);
    let journal = known(&reference.cited_work);

    let scope = builder.with_database(HOT_SEARCH_DATABASE);
    for expression in title_search_levels(&title, year.as_deref(), journal.as_deref()) {
        let request = Request::Search {
            query: scope.literal(expression.as_str()),
            retrieve: RetrieveParameters::new(1, 1),
        };
        let response = session.call(&request).await?;
        match response.records_found {
            0 => continue,
            1 => {
                let records = normalize_records(&response.records, elements, &title, source_id)?;
                return Ok(records.into_iter().next());
            }
            n => {
                tracing::debug!(query = %expression, found = n, "ambiguous title search, skipping");
                return Ok(None);
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::mock::{MockResultSet, MockService, full_record};
    use crate::session::SessionLimits;
    use futures_util::StreamExt;

    fn session(mock: &MockService) -> SessionContext {
        SessionContext::new(Box::new(mock.clone()), SessionLimits::default())
    }

    fn first_records(mock: &MockService) -> Vec<(&'static str, u32)> {
        mock.requests()
            .iter()
            .map(|r| (r.operation(), r.retrieve().first_record))
            .collect()
    }

    #[test]
    fn total_pages_rounds_up() {
        let cursor = RetrievalCursor {
            query_id: "1".into(),
            first_record_index: 1,
            page_size: 100,
            total_found: 250,
            total_searched: 0,
        };
        assert_eq!(cursor.total_pages(), 3);
        assert_eq!(
            RetrievalCursor {
                total_found: 200,
                ..cursor
            }
            .total_pages(),
            2
        );
    }

    #[test]
    fn advance_stops_at_index_overflow() {
        let mut cursor = RetrievalCursor {
            query_id: "1".into(),
            first_record_index: 1,
            page_size: 100,
            total_found: 250,
            total_searched: 0,
        };
        assert!(cursor.advance(100));
        assert!(cursor.advance(100));
        assert_eq!(cursor.first_record_index, 201);
        assert!(!cursor.advance(100));

        let mut huge = RetrievalCursor {
            first_record_index: u32::MAX - 50,
            total_found: u64::from(u32::MAX) + 1000,
            ..cursor
        };
        assert!(!huge.advance(100));
        assert_eq!(huge.first_record_index, u32::MAX - 50);
    }

    #[tokio::test(start_paused = true)]
    async fn pages_until_index_passes_total() {
        let mock = MockService::new().with_search("TS=(rice)", MockResultSet::synthetic(250));
        let mut session = session(&mock);
        let op = PagedOperation::Search(QueryBuilder::default().literal("TS=(rice)"));
        let mut pager = Pager::new(op, &[MetadataElement::AccessionNumber], "TS=(rice)");

        let mut sizes = Vec::new();
        while let Some(page) = pager.next_page(&mut session).await.unwrap() {
            sizes.push(page.records.len());
        }
        assert_eq!(sizes, [100, 100, 50]);
        assert_eq!(
            first_records(&mock),
            [("search", 1), ("retrieve", 101), ("retrieve", 201)]
        );
        assert!(pager.is_done());
        assert!(pager.next_page(&mut session).await.unwrap().is_none());
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exact_multiple_needs_no_extra_call() {
        let mock = MockService::new().with_search("q", MockResultSet::synthetic(200));
        let mut session = session(&mock);
        let op = PagedOperation::Search(QueryBuilder::default().literal("q"));
        let records = Pager::new(op, &MetadataElement::ALL, "q")
            .collect_all(&mut session)
            .await
            .unwrap();
        assert_eq!(records.len(), 200);
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_result_is_one_call() {
        let mock = MockService::new();
        let mut session = session(&mock);
        let op = PagedOperation::Search(QueryBuilder::default().literal("TS=(nothing)"));
        let records = Pager::new(op, &MetadataElement::ALL, "x")
            .collect_all(&mut session)
            .await
            .unwrap();
        assert!(records.is_empty());
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cited_references_continue_with_their_own_retrieve() {
        let refs: Vec<CitedReference> = (0..3)
            .map(|i| CitedReference {
                doc_id: Some(i.to_string()),
                ..CitedReference::default()
            })
            .collect();
        let mock = MockService::new().with_references("WOS:1", refs);
        let mut session = session(&mock);
        let op = PagedOperation::cited_references(&QueryBuilder::default(), "WOS:1");
        let mut pager = Pager::new(op, &[], "WOS:1")
            .with_page_size(2)
            .with_retrieve(RetrieveParameters::new(1, 2).with_option("Hot", "On"));

        let first = pager.next_page(&mut session).await.unwrap().unwrap();
        assert_eq!(first.references.len(), 2);
        assert_eq!(first.records[0].get("docid"), Some("0"));
        assert_eq!(first.records[0].source_id, "WOS:1");
        pager.next_page(&mut session).await.unwrap().unwrap();

        let requests = mock.requests();
        assert_eq!(requests[1].operation(), "citedReferencesRetrieve");
        assert_eq!(requests[1].retrieve().first_record, 3);
        assert_eq!(
            requests[1].retrieve().options,
            vec![("Hot".to_string(), "On".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failure_ends_the_pager() {
        let mock = MockService::new().fail_on("q", ServiceError::Fault("Invalid query".into()));
        let mut session = session(&mock);
        let op = PagedOperation::Search(QueryBuilder::default().literal("q"));
        let mut pager = Pager::new(op, &MetadataElement::ALL, "q");
        assert!(pager.next_page(&mut session).await.is_err());
        assert!(pager.is_done());
        assert!(pager.next_page(&mut session).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stream_yields_every_record() {
        let mock = MockService::new().with_search("q", MockResultSet::synthetic(5));
        let mut session = session(&mock);
        let op = PagedOperation::Search(QueryBuilder::default().literal("q"));
        let pager = Pager::new(op, &[MetadataElement::AccessionNumber], "q").with_page_size(2);
        let ids: Vec<String> = pager
            .into_stream(&mut session)
            .map(|r| r.unwrap().get("accession_number").unwrap_or_default().to_string())
            .collect()
            .await;
        assert_eq!(ids, ["WOS:1", "WOS:2", "WOS:3", "WOS:4", "WOS:5"]);
        assert_eq!(mock.call_count(), 3);
    }

    fn hot(title: &str, work: Option<&str>, year: Option<&str>) -> CitedReference {
        CitedReference {
            cited_title: Some(title.into()),
            cited_work: work.map(Into::into),
            year: year.map(Into::into),
            hot: Some("yes".into()),
            ..CitedReference::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hot_search_loosens_until_a_hit() {
        let mock = MockService::new().with_search(
            "TI=(rice yield) AND SO=(Crop Sci)",
            MockResultSet::Full(vec![full_record("WOS:77", "Rice yield", "3", "1-9")]),
        );
        let mut session = session(&mock);
        let found = resolve_hot_reference(
            &mut session,
            &QueryBuilder::default(),
            &hot("Rice AND Yield", Some("Crop Sci"), Some("1999")),
            &MetadataElement::ALL,
            "WOS:1",
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(found.accession_number(), Some("WOS:77"));
        assert_eq!(found.query, "rice yield");
        assert_eq!(found.source_id, "WOS:1");

        let requests = mock.requests();
        assert_eq!(requests.len(), 2);
        match &requests[0] {
            Request::Search { query, retrieve } => {
                assert_eq!(query.database_id, HOT_SEARCH_DATABASE);
                assert_eq!(retrieve.count, 1);
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ambiguous_hot_search_stores_nothing() {
        let mock = MockService::new().with_search("TI=(rice)", MockResultSet::synthetic(4));
        let mut session = session(&mock);
        let found = resolve_hot_reference(
            &mut session,
            &QueryBuilder::default(),
            &hot("Rice", None, None),
            &MetadataElement::ALL,
            "WOS:1",
        )
        .await
        .unwrap();
        assert!(found.is_none());
        assert_eq!(mock.call_count(), 1);
    }
}
