//! Scriptable in-process [`SearchService`] for tests and dry runs.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use quick_xml::escape::escape;

use super::{Request, ResultRecords, SearchResponse, SearchService, ServiceError};
use crate::normalize::{CitedReference, LiteRecord};

/// A scripted result set returned for one query or accession number.
#[derive(Debug, Clone)]
pub enum MockResultSet {
    /// Serialized `<REC>` fragments, paged and wrapped in `<records>`.
    Full(Vec<String>),
    Lite(Vec<LiteRecord>),
    References(Vec<CitedReference>),
}

impl MockResultSet {
    /// `n` full records with accession numbers `WOS:1` .. `WOS:n`.
    pub fn synthetic(n: usize) -> Self {
        MockResultSet::Full(
            (1..=n)
                .map(|i| full_record(&format!("WOS:{}", i), &format!("Record {}", i), "", ""))
                .collect(),
        )
    }

    fn len(&self) -> usize {
        match self {
            MockResultSet::Full(r) => r.len(),
            MockResultSet::Lite(r) => r.len(),
            MockResultSet::References(r) => r.len(),
        }
    }

    fn page(&self, first_record: u32, count: u32) -> ResultRecords {
        let start = (first_record.max(1) - 1) as usize;
        let end = start.saturating_add(count as usize);
        fn window<T: Clone>(items: &[T], start: usize, end: usize) -> Vec<T> {
            items
                .get(start..end.min(items.len()))
                .map(<[T]>::to_vec)
                .unwrap_or_default()
        }
        match self {
            MockResultSet::Full(r) => {
                ResultRecords::Full(format!("<records>{}</records>", window(r, start, end).concat()))
            }
            MockResultSet::Lite(r) => ResultRecords::Lite(window(r, start, end)),
            MockResultSet::References(r) => ResultRecords::References(window(r, start, end)),
        }
    }
}

/// One `<REC>` fragment with the fields the sifter and hot search look at.
pub fn full_record(uid: &str, title: &str, volume: &str, page: &str) -> String {
    format!(
        "<REC><UID>{uid}</UID><static_data><summary>\
         <pub_info pubyear=\"2000\" vol=\"{vol}\"><page>{page}</page></pub_info>\
         <titles><title type=\"item\">{title}</title></titles>\
         </summary></static_data></REC>",
        uid = escape(uid),
        vol = escape(volume),
        page = escape(page),
        title = escape(title),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Kind {
    Search,
    Citing,
    References,
}

#[derive(Default)]
struct MockState {
    results: HashMap<(Kind, String), MockResultSet>,
    default_search: Option<MockResultSet>,
    errors_by_key: HashMap<String, ServiceError>,
    errors_by_page: HashMap<(String, u32), ServiceError>,
    queued_errors: VecDeque<ServiceError>,
    fail_auth: Option<String>,
    open_queries: HashMap<String, (Kind, String)>,
    expired_tokens: HashSet<String>,
    last_token: Option<String>,
    next_query: u64,
    authentications: usize,
    closed_sessions: Vec<String>,
    requests: Vec<Request>,
}

/// A [`SearchService`] answering from scripted result sets.
///
/// Unknown queries return an empty result set. Clones share state, so a test
/// can keep a handle for inspection after boxing one into a session.
#[derive(Clone, Default)]
pub struct MockService {
    state: Arc<Mutex<MockState>>,
}

impl MockService {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Results for a search whose query text is exactly `query`.
    pub fn with_search(self, query: impl Into<String>, results: MockResultSet) -> Self {
        self.state().results.insert((Kind::Search, query.into()), results);
        self
    }

    /// Results for any search not scripted with [`with_search`](Self::with_search).
    pub fn with_default_search(self, results: MockResultSet) -> Self {
        self.state().default_search = Some(results);
        self
    }

    pub fn with_citing(self, uid: impl Into<String>, results: MockResultSet) -> Self {
        self.state().results.insert((Kind::Citing, uid.into()), results);
        self
    }

    pub fn with_references(self, uid: impl Into<String>, references: Vec<CitedReference>) -> Self {
        self.state().results.insert(
            (Kind::References, uid.into()),
            MockResultSet::References(references),
        );
        self
    }

    /// Fail every first-page request keyed by `key` (query text or uid).
    pub fn fail_on(self, key: impl Into<String>, error: ServiceError) -> Self {
        self.state().errors_by_key.insert(key.into(), error);
        self
    }

    /// Fail the page of `key` starting at `first_record`, once.
    pub fn fail_page(self, key: impl Into<String>, first_record: u32, error: ServiceError) -> Self {
        self.state()
            .errors_by_page
            .insert((key.into(), first_record), error);
        self
    }

    /// Fail the next call, whatever it is.
    pub fn push_error(&self, error: ServiceError) {
        self.state().queued_errors.push_back(error);
    }

    pub fn fail_auth(self, message: impl Into<String>) -> Self {
        self.state().fail_auth = Some(message.into());
        self
    }

    /// Invalidate the most recently issued token.
    pub fn expire_session(&self) {
        let mut state = self.state();
        if let Some(token) = state.last_token.clone() {
            state.expired_tokens.insert(token);
        }
    }

    pub fn authentications(&self) -> usize {
        self.state().authentications
    }

    pub fn closed_sessions(&self) -> Vec<String> {
        self.state().closed_sessions.clone()
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<Request> {
        self.state().requests.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state().requests.len()
    }

    fn respond(&self, token: &str, request: &Request) -> Result<SearchResponse, ServiceError> {
        let mut state = self.state();
        state.requests.push(request.clone());

        if state.expired_tokens.contains(token) {
            return Err(ServiceError::SessionExpired(format!(
                "session {} is no longer valid",
                token
            )));
        }
        if let Some(err) = state.queued_errors.pop_front() {
            return Err(err);
        }

        let (kind, key) = match request {
            Request::Search { query, .. } => (Kind::Search, query.user_query.clone()),
            Request::CitingArticles { uid, .. } => (Kind::Citing, uid.clone()),
            Request::CitedReferences { uid, .. } => (Kind::References, uid.clone()),
            Request::Retrieve { query_id, .. } | Request::CitedReferencesRetrieve { query_id, .. } => {
                state
                    .open_queries
                    .get(query_id)
                    .cloned()
                    .ok_or_else(|| ServiceError::Fault(format!("unknown query id {}", query_id)))?
            }
        };

        let first_page = !matches!(
            request,
            Request::Retrieve { .. } | Request::CitedReferencesRetrieve { .. }
        );
        if first_page
            && let Some(err) = state.errors_by_key.get(&key)
        {
            return Err(err.clone());
        }
        let first_record = request.retrieve().first_record;
        if let Some(err) = state.errors_by_page.remove(&(key.clone(), first_record)) {
            return Err(err);
        }

        let results = state.results.get(&(kind, key.clone())).cloned().or_else(|| {
            (kind == Kind::Search)
                .then(|| state.default_search.clone())
                .flatten()
        });

        let query_id = if first_page {
            state.next_query += 1;
            let id = state.next_query.to_string();
            state.open_queries.insert(id.clone(), (kind, key));
            id
        } else {
            match request {
                Request::Retrieve { query_id, .. }
                | Request::CitedReferencesRetrieve { query_id, .. } => query_id.clone(),
                _ => String::new(),
            }
        };

        let rp = request.retrieve();
        let (found, records) = match &results {
            Some(set) => (set.len() as u64, set.page(rp.first_record, rp.count)),
            None => (0, ResultRecords::Empty),
        };
        Ok(SearchResponse {
            query_id,
            records_found: found,
            records_searched: found.max(1) * 1000,
            records,
        })
    }
}

impl SearchService for MockService {
    fn name(&self) -> &str {
        "mock"
    }

    fn authenticate<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<String, ServiceError>> + Send + 'a>> {
        let result = {
            let mut state = self.state();
            match &state.fail_auth {
                Some(msg) => Err(ServiceError::Fault(msg.clone())),
                None => {
                    state.authentications += 1;
                    let token = format!("mock-session-{}", state.authentications);
                    state.last_token = Some(token.clone());
                    Ok(token)
                }
            }
        };
        Box::pin(async move { result })
    }

    fn close_session<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ServiceError>> + Send + 'a>> {
        self.state().closed_sessions.push(token.to_string());
        Box::pin(async move { Ok(()) })
    }

    fn call<'a>(
        &'a self,
        token: &'a str,
        request: &'a Request,
    ) -> Pin<Box<dyn Future<Output = Result<SearchResponse, ServiceError>> + Send + 'a>> {
        let result = self.respond(token, request);
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryBuilder;
    use crate::service::RetrieveParameters;

    fn search(query: &str, first: u32, count: u32) -> Request {
        Request::Search {
            query: QueryBuilder::default().literal(query),
            retrieve: RetrieveParameters::new(first, count),
        }
    }

    #[tokio::test]
    async fn pages_scripted_results() {
        let mock = MockService::new().with_search("TS=(rice)", MockResultSet::synthetic(5));
        let token = mock.authenticate().await.unwrap();

        let first = mock.call(&token, &search("TS=(rice)", 1, 2)).await.unwrap();
        assert_eq!(first.records_found, 5);
        assert_eq!(first.records.len(), 2);

        let next = Request::Retrieve {
            query_id: first.query_id.clone(),
            retrieve: RetrieveParameters::new(5, 2),
        };
        let last = mock.call(&token, &next).await.unwrap();
        assert_eq!(last.records.len(), 1);
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn page_failure_fires_once() {
        let mock = MockService::new()
            .with_search("TS=(rice)", MockResultSet::synthetic(5))
            .fail_page("TS=(rice)", 3, ServiceError::Fault("busy".into()));
        let token = mock.authenticate().await.unwrap();
        let first = mock.call(&token, &search("TS=(rice)", 1, 2)).await.unwrap();
        let next = Request::Retrieve {
            query_id: first.query_id.clone(),
            retrieve: RetrieveParameters::new(3, 2),
        };
        assert!(mock.call(&token, &next).await.is_err());
        assert_eq!(mock.call(&token, &next).await.unwrap().records.len(), 2);
    }

    #[tokio::test]
    async fn unknown_query_is_empty() {
        let mock = MockService::new();
        let token = mock.authenticate().await.unwrap();
        let resp = mock.call(&token, &search("TS=(nothing)", 1, 100)).await.unwrap();
        assert_eq!(resp.records_found, 0);
        assert!(resp.records.is_empty());
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let mock = MockService::new();
        let token = mock.authenticate().await.unwrap();
        mock.expire_session();
        let err = mock.call(&token, &search("x", 1, 1)).await.unwrap_err();
        assert!(matches!(err, ServiceError::SessionExpired(_)));
        let fresh = mock.authenticate().await.unwrap();
        assert!(mock.call(&fresh, &search("x", 1, 1)).await.is_ok());
    }

    #[tokio::test]
    async fn auth_failure() {
        let mock = MockService::new().fail_auth("bad credentials");
        assert!(mock.authenticate().await.is_err());
        assert_eq!(mock.authentications(), 0);
    }
}
