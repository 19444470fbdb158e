//! Composition root
//!
//! Wires the strategies into the single entry point the HTTP filter holds:
//!
//! ```text
//! Union[ path strategy,
//!        AND(generator, Union[ static rules, delegate ]) ]
//! ```
//!
//! The path strategy sees the caller's raw path. Static rules and the
//! delegate see every generated attribute set. Whatever abstains all the
//! way out is denied.

use super::delegate::DelegateAuthorizer;
use super::path::PathAuthorizer;
use super::rewrite::{
    extract_params, AttributesGenerator, RewriteAttributesConfig, RewriteSource,
    RewritingAuthorizer,
};
use super::static_rules::{StaticAuthorizer, StaticRule};
use super::union::UnionAuthorizer;
use super::{
    Attributes, Authorizer, AuthzError, Decision, ErrorKind, RequestContext, Verb, Verdict,
};
use crate::auth::Identity;
use crate::metrics;
use hyper::{HeaderMap, Uri};
use percent_encoding::percent_decode_str;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Builder for [`RequestAuthorizer`]
#[derive(Default)]
pub struct RequestAuthorizerBuilder {
    allow_paths: Vec<String>,
    ignore_paths: Vec<String>,
    static_rules: Vec<StaticRule>,
    rewrite: RewriteAttributesConfig,
    delegate: Option<Arc<dyn Authorizer>>,
    timeout: Option<Duration>,
}

impl RequestAuthorizerBuilder {
    /// Paths outside this list are denied before anything else runs
    pub fn allow_paths(mut self, paths: Vec<String>) -> Self {
        self.allow_paths = paths;
        self
    }

    /// Paths in this list are allowed without further checks
    pub fn ignore_paths(mut self, paths: Vec<String>) -> Self {
        self.ignore_paths = paths;
        self
    }

    pub fn static_rules(mut self, rules: Vec<StaticRule>) -> Self {
        self.static_rules = rules;
        self
    }

    pub fn rewrite(mut self, rewrite: RewriteAttributesConfig) -> Self {
        self.rewrite = rewrite;
        self
    }

    /// Backend consulted when no static rule allows the request
    pub fn delegate(mut self, delegate: Arc<dyn Authorizer>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Deadline for the whole authorization of one request
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<RequestAuthorizer, AuthzError> {
        let path = match (self.allow_paths.is_empty(), self.ignore_paths.is_empty()) {
            (false, false) => {
                return Err(AuthzError::Config(
                    "allow_paths and ignore_paths are mutually exclusive".into(),
                ))
            }
            (false, true) => Some(PathAuthorizer::allow_list(&self.allow_paths)?),
            (true, false) => Some(PathAuthorizer::ignore_list(&self.ignore_paths)?),
            (true, true) => None,
        };

        if self.rewrite.rewrites.is_some() && self.rewrite.resource_attributes.is_none() {
            return Err(AuthzError::Config(
                "rewrites require resourceAttributes to be set".into(),
            ));
        }
        if self
            .rewrite
            .rewrites
            .as_ref()
            .is_some_and(|rewrites| rewrites.is_ambiguous())
        {
            warn!("Both byQueryParameter and byHttpHeader are set, the header is ignored");
        }

        let generator = AttributesGenerator::from_config(&self.rewrite);
        if let AttributesGenerator::Rewriting(template) = &generator {
            for (field, err) in template.errors() {
                warn!(field, error = %err, "Invalid resourceAttributes template, field renders empty");
            }
        }
        let source = match &generator {
            AttributesGenerator::Rewriting(_) => self.rewrite.source(),
            _ => None,
        };

        let mut targets: Vec<Arc<dyn Authorizer>> = Vec::new();
        if !self.static_rules.is_empty() {
            targets.push(Arc::new(StaticAuthorizer::new(self.static_rules)?));
        }
        if let Some(delegate) = self.delegate {
            targets.push(Arc::new(DelegateAuthorizer::new(delegate)));
        }

        info!(
            generator = generator.name(),
            path_strategy = path.as_ref().map(|p| p.mode().as_str()).unwrap_or("none"),
            authorizers = targets.len(),
            "Authorizer configured"
        );

        let mut strategies: Vec<Arc<dyn Authorizer>> = Vec::new();
        if let Some(path) = path {
            strategies.push(Arc::new(path));
        }
        strategies.push(Arc::new(RewritingAuthorizer::new(
            generator,
            Arc::new(UnionAuthorizer::new(targets)),
        )));

        if let Some(timeout) = self.timeout {
            if Instant::now().checked_add(timeout).is_none() {
                return Err(AuthzError::Config(format!(
                    "authorization timeout {:?} is out of range",
                    timeout
                )));
            }
        }

        Ok(RequestAuthorizer {
            authorizer: Arc::new(UnionAuthorizer::new(strategies)),
            source,
            timeout: self.timeout,
        })
    }
}

/// Entry point of the HTTP filter
///
/// Never returns [`Verdict::NoOpinion`].
pub struct RequestAuthorizer {
    authorizer: Arc<dyn Authorizer>,
    source: Option<RewriteSource>,
    timeout: Option<Duration>,
}

impl RequestAuthorizer {
    pub fn builder() -> RequestAuthorizerBuilder {
        RequestAuthorizerBuilder::default()
    }

    /// Rewrite source in effect, if the rewriting generator is selected
    pub fn rewrite_source(&self) -> Option<&RewriteSource> {
        self.source.as_ref()
    }

    /// Per-request context: extracted rewrite values and the deadline
    pub fn context_for(&self, uri: &Uri, headers: &HeaderMap) -> RequestContext {
        let ctx = RequestContext::new().with_rewrite_params(extract_params(
            self.source.as_ref(),
            uri.query(),
            headers,
        ));
        match self
            .timeout
            .and_then(|timeout| Instant::now().checked_add(timeout))
        {
            Some(deadline) => ctx.with_deadline(deadline),
            None => ctx,
        }
    }

    /// Authorize one HTTP request made by `identity`.
    pub async fn authorize_request(
        &self,
        identity: &Identity,
        method: &str,
        uri: &Uri,
        headers: &HeaderMap,
    ) -> Result<Decision, AuthzError> {
        let ctx = self.context_for(uri, headers);
        self.authorize_in(&ctx, identity, method, uri).await
    }

    /// Like [`authorize_request`](Self::authorize_request), with a context
    /// prepared by the caller, e.g. one bound to a [`CancelHandle`].
    ///
    /// [`CancelHandle`]: super::CancelHandle
    pub async fn authorize_in(
        &self,
        ctx: &RequestContext,
        identity: &Identity,
        method: &str,
        uri: &Uri,
    ) -> Result<Decision, AuthzError> {
        let attributes = Attributes::non_resource(
            Some(identity.clone()),
            Verb::from_method(method),
            decoded_path(uri),
        );
        self.authorize(ctx, &attributes).await
    }

    /// Evaluate prepared attributes, folding a residual abstention into a
    /// denial.
    pub async fn authorize(
        &self,
        ctx: &RequestContext,
        attributes: &Attributes,
    ) -> Result<Decision, AuthzError> {
        let decision = match self.authorizer.authorize(ctx, attributes).await {
            Ok(decision) => decision,
            Err(err) => {
                metrics::record_decision_error();
                match err.kind() {
                    ErrorKind::BadRequest => {
                        debug!(attributes = %attributes, error = %err, "Malformed authorization request")
                    }
                    ErrorKind::Unavailable => {
                        warn!(attributes = %attributes, error = %err, "Authorization did not complete")
                    }
                    ErrorKind::Internal => {
                        error!(attributes = %attributes, error = %err, "Authorization error")
                    }
                }
                return Err(err);
            }
        };

        let decision = match decision.verdict {
            Verdict::NoOpinion => Decision::deny(if decision.reason.is_empty() {
                format!("Forbidden ({}): no authorizer had an opinion", attributes)
            } else {
                decision.reason
            }),
            _ => decision,
        };

        metrics::record_decision(decision.verdict);
        if decision.is_allow() {
            debug!(user = attributes.user_name(), verb = %attributes.verb, path = %attributes.path, "Request allowed");
        } else {
            debug!(user = attributes.user_name(), verb = %attributes.verb, path = %attributes.path, reason = %decision.reason, "Request denied");
        }
        Ok(decision)
    }
}

/// Percent-decoded request path; a path that does not decode to UTF-8 is
/// kept as sent.
fn decoded_path(uri: &Uri) -> String {
    percent_decode_str(uri.path())
        .decode_utf8()
        .map(|path| path.into_owned())
        .unwrap_or_else(|_| uri.path().to_string())
}
