//! Delegate boundary
//!
//! Wraps the external SubjectAccessReview client. The core only relies on
//! "authorize one attribute set" with bounded latency: a call still running
//! at the request deadline, or when the request is cancelled, is dropped and
//! reported as an error rather than as a denial.

use super::{Attributes, Authorizer, AuthzError, Decision, RequestContext};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Bounded call into the authorization backend
pub struct DelegateAuthorizer {
    backend: Arc<dyn Authorizer>,
    timeout: Option<Duration>,
}

impl DelegateAuthorizer {
    pub fn new(backend: Arc<dyn Authorizer>) -> Self {
        Self {
            backend,
            timeout: None,
        }
    }

    /// Bound every call, independent of any request deadline
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn deadline(&self, ctx: &RequestContext) -> Option<Instant> {
        let own = self.timeout.map(|timeout| Instant::now() + timeout);
        match (ctx.deadline(), own) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

#[async_trait]
impl Authorizer for DelegateAuthorizer {
    async fn authorize(
        &self,
        ctx: &RequestContext,
        attributes: &Attributes,
    ) -> Result<Decision, AuthzError> {
        let call = self.backend.authorize(ctx, attributes);

        let Some(deadline) = self.deadline(ctx) else {
            return tokio::select! {
                biased;
                _ = ctx.cancelled() => Err(AuthzError::Cancelled),
                result = call => result,
            };
        };

        let budget = deadline.saturating_duration_since(Instant::now());
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(AuthzError::Cancelled),
            result = tokio::time::timeout_at(deadline, call) => match result {
                Ok(result) => result,
                Err(_) => {
                    warn!(attributes = %attributes, budget_ms = budget.as_millis() as u64, "Delegate authorization timed out");
                    Err(AuthzError::Timeout(budget))
                }
            },
        }
    }
}
