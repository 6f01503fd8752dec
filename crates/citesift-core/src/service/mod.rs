//! Remote search service trait, request/response types and implementations.

pub mod mock;
pub mod soap;

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::normalize::{CitedReference, LiteRecord};
use crate::query::{SearchQuery, TimeSpan};

pub use mock::MockService;
pub use soap::SoapService;

/// Which search endpoint a run is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMode {
    /// XML full records.
    #[default]
    Full,
    /// Labelled dictionaries with a reduced field set.
    Lite,
}

impl std::str::FromStr for ServiceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" | "search" => Ok(ServiceMode::Full),
            "lite" => Ok(ServiceMode::Lite),
            other => Err(format!("unknown service mode '{}' (expected full or lite)", other)),
        }
    }
}

/// Error from a single remote call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The service answered with a fault.
    #[error("service fault: {0}")]
    Fault(String),
    /// The session token is no longer accepted.
    #[error("session expired: {0}")]
    SessionExpired(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unreadable response: {0}")]
    Parse(String),
}

impl ServiceError {
    /// Throttling-class errors are recognised by their text.
    pub fn is_throttle(&self) -> bool {
        self.to_string().to_lowercase().contains("throttle")
    }
}

/// Paging, sort and view parameters sent with every search-style request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrieveParameters {
    /// 1-based index of the first record of the page.
    pub first_record: u32,
    pub count: u32,
    /// `(field, ascending)` pairs.
    pub sort_fields: Vec<(String, bool)>,
    pub view_fields: Vec<String>,
    /// Key/value options, e.g. `("Hot", "On")` for cited references.
    pub options: Vec<(String, String)>,
}

impl RetrieveParameters {
    pub fn new(first_record: u32, count: u32) -> Self {
        Self {
            first_record,
            count,
            sort_fields: Vec::new(),
            view_fields: Vec::new(),
            options: Vec::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.push((key.into(), value.into()));
        self
    }

    /// Same sort/view/option parameters for the page starting at `first_record`.
    pub fn at(&self, first_record: u32) -> Self {
        Self {
            first_record,
            ..self.clone()
        }
    }
}

/// One remote operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Search {
        query: SearchQuery,
        retrieve: RetrieveParameters,
    },
    /// Continuation of a search or citing-articles result set.
    Retrieve {
        query_id: String,
        retrieve: RetrieveParameters,
    },
    CitingArticles {
        database_id: String,
        uid: String,
        time_span: TimeSpan,
        query_language: String,
        retrieve: RetrieveParameters,
    },
    CitedReferences {
        database_id: String,
        uid: String,
        query_language: String,
        retrieve: RetrieveParameters,
    },
    /// Continuation of a cited-references result set.
    CitedReferencesRetrieve {
        query_id: String,
        retrieve: RetrieveParameters,
    },
}

impl Request {
    /// SOAP operation name.
    pub fn operation(&self) -> &'static str {
        match self {
            Request::Search { .. } => "search",
            Request::Retrieve { .. } => "retrieve",
            Request::CitingArticles { .. } => "citingArticles",
            Request::CitedReferences { .. } => "citedReferences",
            Request::CitedReferencesRetrieve { .. } => "citedReferencesRetrieve",
        }
    }

    pub fn retrieve(&self) -> &RetrieveParameters {
        match self {
            Request::Search { retrieve, .. }
            | Request::Retrieve { retrieve, .. }
            | Request::CitingArticles { retrieve, .. }
            | Request::CitedReferences { retrieve, .. }
            | Request::CitedReferencesRetrieve { retrieve, .. } => retrieve,
        }
    }
}

/// Records carried by one response page.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ResultRecords {
    /// Serialized XML `<records>` document from the full endpoint.
    Full(String),
    Lite(Vec<LiteRecord>),
    References(Vec<CitedReference>),
    #[default]
    Empty,
}

impl ResultRecords {
    pub fn len(&self) -> usize {
        match self {
            ResultRecords::Full(xml) => crate::xml::parse_document(xml)
                .map(|root| root.children.len())
                .unwrap_or(0),
            ResultRecords::Lite(records) => records.len(),
            ResultRecords::References(refs) => refs.len(),
            ResultRecords::Empty => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchResponse {
    pub query_id: String,
    pub records_found: u64,
    pub records_searched: u64,
    pub records: ResultRecords,
}

/// A remote search service.
pub trait SearchService: Send + Sync {
    /// Short name for logs (e.g. "soap", "mock").
    fn name(&self) -> &str;

    /// Open a session and return its token.
    fn authenticate<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<String, ServiceError>> + Send + 'a>>;

    fn close_session<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ServiceError>> + Send + 'a>>;

    /// Issue one request on the session identified by `token`.
    fn call<'a>(
        &'a self,
        token: &'a str,
        request: &'a Request,
    ) -> Pin<Box<dyn Future<Output = Result<SearchResponse, ServiceError>> + Send + 'a>>;
}
