//! Authorization module
//!
//! Decides whether a verified identity may perform a request. Requests are
//! described as [`Attributes`] and evaluated by a tree of [`Authorizer`]s:
//!
//! - [`path::PathAuthorizer`]: allow-list / ignore-list on the raw path
//! - [`static_rules::StaticAuthorizer`]: configured allow rules
//! - [`delegate::DelegateAuthorizer`]: bounded call into the
//!   SubjectAccessReview backend ([`sar::SubjectAccessReviewAuthorizer`])
//! - [`union::UnionAuthorizer`]: first explicit opinion wins
//! - [`rewrite::RewritingAuthorizer`]: every generated attribute set must be
//!   allowed
//!
//! [`builder`] wires them together from configuration.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

pub mod attributes;
pub mod builder;
pub mod delegate;
pub mod path;
pub mod retry;
pub mod rewrite;
pub mod sar;
pub mod static_rules;
pub mod union;

pub use attributes::{Attributes, ResourceAttributes, Verb};

/// Authorization errors
///
/// Every error means the request is not allowed. The variants keep apart
/// "the request was malformed" from "the system is broken".
#[derive(Error, Debug)]
pub enum AuthzError {
    #[error("bad request: the request or configuration is malformed")]
    MalformedRequest,

    #[error("backend error: {0}")]
    Backend(String),

    #[error("authorization timed out after {0:?}")]
    Timeout(Duration),

    #[error("authorization cancelled")]
    Cancelled,

    #[error("authorization error ({attributes}): {source}")]
    Attributes {
        attributes: String,
        #[source]
        source: Box<AuthzError>,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Coarse classification of an [`AuthzError`] for the HTTP layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The client sent something we cannot map to attributes (4xx)
    BadRequest,
    /// The backend did not answer in time (5xx)
    Unavailable,
    /// Backend or configuration failure (5xx)
    Internal,
}

impl AuthzError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthzError::MalformedRequest => ErrorKind::BadRequest,
            AuthzError::Timeout(_) | AuthzError::Cancelled => ErrorKind::Unavailable,
            AuthzError::Backend(_) | AuthzError::Config(_) => ErrorKind::Internal,
            AuthzError::Attributes { source, .. } => source.kind(),
        }
    }
}

/// Tri-state authorizer verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny,
    /// Abstain, letting another authorizer decide
    NoOpinion,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Allow => "allow",
            Verdict::Deny => "deny",
            Verdict::NoOpinion => "no_opinion",
        }
    }
}

/// A verdict with its human-readable reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub verdict: Verdict,
    pub reason: String,
}

impl Decision {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Allow,
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Deny,
            reason: reason.into(),
        }
    }

    pub fn no_opinion() -> Self {
        Self {
            verdict: Verdict::NoOpinion,
            reason: String::new(),
        }
    }

    pub fn is_allow(&self) -> bool {
        self.verdict == Verdict::Allow
    }
}

/// Per-request state threaded from the HTTP filter into the authorizers.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    rewrite_params: Vec<String>,
    deadline: Option<Instant>,
    cancelled: Option<watch::Receiver<bool>>,
}

/// Cancels every [`RequestContext`] bound to it
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self(watch::channel(false).0)
    }

    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the values extracted from the configured rewrite source
    #[must_use]
    pub fn with_rewrite_params(mut self, params: Vec<String>) -> Self {
        self.rewrite_params = params;
        self
    }

    /// Abandon delegate calls still running at `deadline`
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Make the context cancellable from the outside
    pub fn cancellable(self) -> (Self, CancelHandle) {
        let handle = CancelHandle::new();
        (self.cancelled_by(&handle), handle)
    }

    /// Cancel this context together with everything else bound to `handle`
    #[must_use]
    pub fn cancelled_by(mut self, handle: &CancelHandle) -> Self {
        self.cancelled = Some(handle.0.subscribe());
        self
    }

    pub fn rewrite_params(&self) -> &[String] {
        &self.rewrite_params
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolves once the context is cancelled; never resolves otherwise.
    pub async fn cancelled(&self) {
        if let Some(mut rx) = self.cancelled.clone() {
            if rx.wait_for(|cancelled| *cancelled).await.is_ok() {
                return;
            }
        }
        std::future::pending::<()>().await
    }
}

/// Authorizer trait
///
/// Implementations must not fail on well-formed attributes; they return
/// [`Verdict::NoOpinion`] when they have nothing to say.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(
        &self,
        ctx: &RequestContext,
        attributes: &Attributes,
    ) -> Result<Decision, AuthzError>;
}
