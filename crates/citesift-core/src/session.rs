//! Session token ownership, call accounting and re-authorization.
//!
//! Every remote call goes through [`SessionContext::call`], which makes sure a
//! live session exists, renews it once the per-session call limit is passed,
//! and spaces calls by a fixed delay. Callers never handle tokens.

use std::time::Duration;

use thiserror::Error;

use crate::service::{Request, SearchResponse, SearchService, ServiceError};

/// Calls allowed on one session before it is closed and renewed.
pub const DEFAULT_SESSION_CALL_LIMIT: u64 = 2000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Authentication failed. Fatal for the run.
    #[error("authentication failed: {0}")]
    Authentication(ServiceError),
    /// The call hit a throttling error; the cooldown has already elapsed.
    #[error("throttled: {0}")]
    Throttled(ServiceError),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl SessionError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Authentication(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    pub call_limit: u64,
    pub call_delay: Duration,
    pub throttle_cooldown: Duration,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            call_limit: DEFAULT_SESSION_CALL_LIMIT,
            call_delay: Duration::from_secs(1),
            throttle_cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionState {
    Unauthenticated,
    Active { token: String },
    Expired,
}

/// Owns the service handle, the current token and the call counters.
pub struct SessionContext {
    service: Box<dyn SearchService>,
    limits: SessionLimits,
    state: SessionState,
    calls_since_auth: u64,
    lifetime_calls: u64,
    reauthorizations: u64,
    throttled: u64,
}

impl SessionContext {
    pub fn new(service: Box<dyn SearchService>, limits: SessionLimits) -> Self {
        Self {
            service,
            limits,
            state: SessionState::Unauthenticated,
            calls_since_auth: 0,
            lifetime_calls: 0,
            reauthorizations: 0,
            throttled: 0,
        }
    }

    pub fn limits(&self) -> &SessionLimits {
        &self.limits
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Active { .. })
    }

    /// Calls made on the current session.
    pub fn calls_since_auth(&self) -> u64 {
        self.calls_since_auth
    }

    /// Calls made over the life of this context, across sessions.
    pub fn lifetime_calls(&self) -> u64 {
        self.lifetime_calls
    }

    pub fn reauthorizations(&self) -> u64 {
        self.reauthorizations
    }

    pub fn throttled(&self) -> u64 {
        self.throttled
    }

    /// Open a session. The authenticate call itself is not counted.
    pub async fn authorize(&mut self) -> Result<(), SessionError> {
        match self.service.authenticate().await {
            Ok(token) => {
                tracing::info!(service = self.service.name(), "search client authorized");
                self.state = SessionState::Active { token };
                self.calls_since_auth = 0;
                Ok(())
            }
            Err(e) => {
                tracing::error!(service = self.service.name(), error = %e, "authentication failed");
                self.state = SessionState::Unauthenticated;
                Err(SessionError::Authentication(e))
            }
        }
    }

    /// Close the current session, if any. Close errors are logged and dropped.
    pub async fn close(&mut self) {
        let state = std::mem::replace(&mut self.state, SessionState::Unauthenticated);
        if let SessionState::Active { token } = state
            && let Err(e) = self.service.close_session(&token).await
        {
            tracing::warn!(error = %e, "failed to close session");
        }
    }

    async fn reauthorize(&mut self) -> Result<(), SessionError> {
        self.close().await;
        self.reauthorizations += 1;
        self.authorize().await
    }

    async fn ensure_session(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Unauthenticated => self.authorize().await,
            SessionState::Expired => {
                tracing::info!("session expired, re-authorizing");
                self.reauthorize().await
            }
            SessionState::Active { .. } if self.calls_since_auth > self.limits.call_limit => {
                tracing::info!(
                    calls = self.calls_since_auth,
                    limit = self.limits.call_limit,
                    "session call limit reached, re-authorizing"
                );
                self.reauthorize().await
            }
            SessionState::Active { .. } => Ok(()),
        }
    }

    /// One counted remote call followed by the inter-call delay.
    async fn dispatch(&mut self, request: &Request) -> Result<SearchResponse, ServiceError> {
        let token = match &self.state {
            SessionState::Active { token } => token.clone(),
            _ => return Err(ServiceError::SessionExpired("no active session".to_string())),
        };
        self.calls_since_auth += 1;
        self.lifetime_calls += 1;
        tracing::trace!(
            op = request.operation(),
            first_record = request.retrieve().first_record,
            calls = self.calls_since_auth,
            "remote call"
        );
        let result = self.service.call(&token, request).await;
        tokio::time::sleep(self.limits.call_delay).await;
        result
    }

    /// Issue `request` on a live session.
    ///
    /// An expired session is renewed and the call retried once. Throttling
    /// errors are counted, followed by the cooldown, and returned as
    /// [`SessionError::Throttled`].
    pub async fn call(&mut self, request: &Request) -> Result<SearchResponse, SessionError> {
        self.ensure_session().await?;

        let result = match self.dispatch(request).await {
            Err(ServiceError::SessionExpired(msg)) => {
                tracing::warn!(op = request.operation(), reason = %msg, "session expired mid-run");
                self.state = SessionState::Expired;
                self.ensure_session().await?;
                self.dispatch(request).await
            }
            other => other,
        };

        match result {
            Ok(resp) => Ok(resp),
            Err(e) if e.is_throttle() => {
                self.throttled += 1;
                tracing::warn!(
                    op = request.operation(),
                    error = %e,
                    cooldown_secs = self.limits.throttle_cooldown.as_secs(),
                    "throttled, cooling down"
                );
                tokio::time::sleep(self.limits.throttle_cooldown).await;
                Err(SessionError::Throttled(e))
            }
            Err(e) => Err(SessionError::Service(e)),
        }
    }
}
