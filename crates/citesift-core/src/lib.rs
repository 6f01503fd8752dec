use std::time::Duration;
use thiserror::Error;

pub mod config_file;
pub mod export;
pub mod harvest;
pub mod input;
pub mod normalize;
pub mod pager;
pub mod query;
pub mod record;
pub mod service;
pub mod session;
pub mod sift;
pub mod xml;

// Re-export for convenience
pub use harvest::{HarvestEvent, Harvester, Reconciliation, RunStats};
pub use input::{CitationRecord, ColumnMap, InputError};
pub use normalize::{MetadataElement, RawRecord};
pub use pager::{PagedOperation, Pager, RetrievalCursor};
pub use query::{QueryBuilder, SearchQuery, TimeSpan};
pub use record::{Collection, MetadataRecord, ResultCollection};
pub use service::{SearchService, ServiceError, ServiceMode};
pub use session::{SessionContext, SessionError, SessionLimits};
pub use sift::MatchVerdict;

/// Sentinel stored for every requested metadata element that could not be located.
pub const NONE_VALUE: &str = "NONE";

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("input error: {0}")]
    Input(#[from] InputError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

/// Runtime configuration for a harvest run.
#[derive(Clone)]
pub struct Config {
    /// Which endpoint variant to bind (full XML records or lite dictionaries).
    pub mode: ServiceMode,
    pub auth_url: String,
    pub search_url: String,
    pub search_lite_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub request_timeout_secs: u64,
    /// Fixed pause after every remote call.
    pub call_delay: Duration,
    /// Pause after a throttling-class error.
    pub throttle_cooldown: Duration,
    /// Calls allowed on one session before it is closed and renewed.
    pub session_call_limit: u64,
    pub page_size: u32,
    pub database_id: String,
    pub query_language: String,
    pub time_begin: String,
    /// `None` means "today" at the time the query is built.
    pub time_end: Option<String>,
    /// Relative window such as `4week`; replaces the date range when set.
    pub symbolic_time_span: Option<String>,
    pub elements: Vec<MetadataElement>,
    pub columns: ColumnMap,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("mode", &self.mode)
            .field("auth_url", &self.auth_url)
            .field("search_url", &self.search_url)
            .field("search_lite_url", &self.search_lite_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("call_delay", &self.call_delay)
            .field("throttle_cooldown", &self.throttle_cooldown)
            .field("session_call_limit", &self.session_call_limit)
            .field("page_size", &self.page_size)
            .field("database_id", &self.database_id)
            .field("query_language", &self.query_language)
            .field("time_begin", &self.time_begin)
            .field("time_end", &self.time_end)
            .field("symbolic_time_span", &self.symbolic_time_span)
            .field("elements", &self.elements)
            .field("columns", &self.columns)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: ServiceMode::Full,
            auth_url: service::soap::DEFAULT_AUTH_URL.to_string(),
            search_url: service::soap::DEFAULT_SEARCH_URL.to_string(),
            search_lite_url: service::soap::DEFAULT_SEARCH_LITE_URL.to_string(),
            username: None,
            password: None,
            request_timeout_secs: 60,
            call_delay: Duration::from_secs(1),
            throttle_cooldown: Duration::from_secs(60),
            session_call_limit: session::DEFAULT_SESSION_CALL_LIMIT,
            page_size: pager::DEFAULT_PAGE_SIZE,
            database_id: "WOS".to_string(),
            query_language: "en".to_string(),
            time_begin: "1900-01-01".to_string(),
            time_end: None,
            symbolic_time_span: None,
            elements: MetadataElement::ALL.to_vec(),
            columns: ColumnMap::default(),
        }
    }
}

impl Config {
    /// Session limits derived from this configuration.
    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            call_limit: self.session_call_limit,
            call_delay: self.call_delay,
            throttle_cooldown: self.throttle_cooldown,
        }
    }

    /// Query builder bound to this configuration's database scope and time window.
    pub fn query_builder(&self) -> QueryBuilder {
        QueryBuilder {
            database_id: self.database_id.clone(),
            query_language: self.query_language.clone(),
            time_span: match &self.symbolic_time_span {
                Some(span) => TimeSpan::Symbolic(span.clone()),
                None => TimeSpan::new(self.time_begin.clone(), self.time_end.clone()),
            },
        }
    }

    /// Endpoint URL for the configured search mode.
    pub fn search_endpoint(&self) -> &str {
        match self.mode {
            ServiceMode::Full => &self.search_url,
            ServiceMode::Lite => &self.search_lite_url,
        }
    }
}
