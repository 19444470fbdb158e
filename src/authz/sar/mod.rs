//! SubjectAccessReview authorization
//!
//! Asks the Kubernetes API server whether a user may perform an action by
//! POSTing a `SubjectAccessReview`. Decisions are cached per review body and
//! transient failures are retried with backoff.
//!
//! # Example
//!
//! ```no_run
//! use kube_rbac_gate::authz::sar::SubjectAccessReviewAuthorizer;
//! use std::time::Duration;
//!
//! let authorizer = SubjectAccessReviewAuthorizer::builder()
//!     .url("https://kubernetes.default.svc")
//!     .token_file("/var/run/secrets/kubernetes.io/serviceaccount/token")
//!     .timeout(Duration::from_secs(10))
//!     .allow_cache_ttl(Duration::from_secs(300))
//!     .deny_cache_ttl(Duration::from_secs(30))
//!     .build()
//!     .expect("valid config");
//! ```

use super::retry::{retry_with_backoff, RetryConfig};
use super::{Attributes, Authorizer, AuthzError, Decision, RequestContext, Verdict};
use crate::metrics;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error};

const REVIEW_PATH: &str = "/apis/authorization.k8s.io/v1/subjectaccessreviews";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_ALLOW_CACHE_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_DENY_CACHE_TTL: Duration = Duration::from_secs(30);

/// Upper bound for the request timeout
pub const MAX_TIMEOUT: Duration = Duration::from_secs(300);
/// Upper bound for either cache TTL
pub const MAX_CACHE_TTL: Duration = Duration::from_secs(86_400);

/// Maximum cache size to prevent unbounded memory growth
const MAX_CACHE_SIZE: usize = 10_000;

/// SubjectAccessReview client configuration
#[derive(Debug, Clone)]
pub struct SubjectAccessReviewConfig {
    /// API server base URL (e.g., "https://kubernetes.default.svc")
    pub url: String,
    /// Bearer token presented to the API server
    pub token: Option<String>,
    /// Per HTTP request timeout
    pub timeout: Duration,
    /// Zero disables caching of allowed decisions
    pub allow_cache_ttl: Duration,
    /// Zero disables caching of denied and no-opinion decisions
    pub deny_cache_ttl: Duration,
    pub retry: RetryConfig,
}

impl Default for SubjectAccessReviewConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: None,
            timeout: DEFAULT_TIMEOUT,
            allow_cache_ttl: DEFAULT_ALLOW_CACHE_TTL,
            deny_cache_ttl: DEFAULT_DENY_CACHE_TTL,
            retry: RetryConfig::default(),
        }
    }
}

struct CachedDecision {
    decision: Decision,
    cached_at: Instant,
    expires_at: Instant,
}

/// SubjectAccessReview authorizer
pub struct SubjectAccessReviewAuthorizer {
    config: SubjectAccessReviewConfig,
    endpoint: String,
    client: reqwest::Client,
    /// Keyed by the serialized review spec
    cache: Arc<RwLock<HashMap<String, CachedDecision>>>,
}

/// Builder for SubjectAccessReviewAuthorizer
#[derive(Default)]
pub struct SubjectAccessReviewAuthorizerBuilder {
    url: Option<String>,
    token: Option<String>,
    token_file: Option<PathBuf>,
    timeout: Option<Duration>,
    allow_cache_ttl: Option<Duration>,
    deny_cache_ttl: Option<Duration>,
    retry: Option<RetryConfig>,
}

impl SubjectAccessReviewAuthorizerBuilder {
    pub fn url(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }

    pub fn token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Read the bearer token from a file at build time. An explicit
    /// [`token`](Self::token) takes precedence.
    pub fn token_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_file = Some(path.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn allow_cache_ttl(mut self, ttl: Duration) -> Self {
        self.allow_cache_ttl = Some(ttl);
        self
    }

    pub fn deny_cache_ttl(mut self, ttl: Duration) -> Self {
        self.deny_cache_ttl = Some(ttl);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn build(self) -> Result<SubjectAccessReviewAuthorizer, AuthzError> {
        let url = self
            .url
            .ok_or_else(|| AuthzError::Config("SubjectAccessReview URL is required".into()))?;

        let token = match (self.token, self.token_file) {
            (Some(token), _) => Some(token),
            (None, Some(path)) => {
                let token = std::fs::read_to_string(&path).map_err(|e| {
                    AuthzError::Config(format!(
                        "failed to read token file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Some(token.trim().to_string())
            }
            (None, None) => None,
        };

        let defaults = SubjectAccessReviewConfig::default();
        SubjectAccessReviewAuthorizer::new(SubjectAccessReviewConfig {
            url,
            token,
            timeout: self.timeout.unwrap_or(defaults.timeout),
            allow_cache_ttl: self.allow_cache_ttl.unwrap_or(defaults.allow_cache_ttl),
            deny_cache_ttl: self.deny_cache_ttl.unwrap_or(defaults.deny_cache_ttl),
            retry: self.retry.unwrap_or(defaults.retry),
        })
    }
}

/// Review request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubjectAccessReview<'a> {
    api_version: &'static str,
    kind: &'static str,
    spec: &'a ReviewSpec,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReviewSpec {
    user: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    groups: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource_attributes: Option<ReviewResourceAttributes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    non_resource_attributes: Option<ReviewNonResourceAttributes>,
}

#[derive(Debug, Serialize)]
struct ReviewResourceAttributes {
    namespace: String,
    verb: String,
    group: String,
    version: String,
    resource: String,
    subresource: String,
    name: String,
}

#[derive(Debug, Serialize)]
struct ReviewNonResourceAttributes {
    path: String,
    verb: String,
}

impl ReviewSpec {
    fn from_attributes(attributes: &Attributes) -> Self {
        let verb = attributes.verb.as_str().to_string();
        let (resource_attributes, non_resource_attributes) = if attributes.resource_request {
            (
                Some(ReviewResourceAttributes {
                    namespace: attributes.namespace.clone(),
                    verb,
                    group: attributes.api_group.clone(),
                    version: attributes.api_version.clone(),
                    resource: attributes.resource.clone(),
                    subresource: attributes.subresource.clone(),
                    name: attributes.name.clone(),
                }),
                None,
            )
        } else {
            (
                None,
                Some(ReviewNonResourceAttributes {
                    path: attributes.path.clone(),
                    verb,
                }),
            )
        };

        Self {
            user: attributes.user_name().to_string(),
            groups: attributes
                .user
                .as_ref()
                .map(|identity| identity.groups().to_vec())
                .unwrap_or_default(),
            resource_attributes,
            non_resource_attributes,
        }
    }
}

/// Review response
#[derive(Debug, Deserialize)]
struct ReviewResponse {
    #[serde(default)]
    status: ReviewStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewStatus {
    #[serde(default)]
    allowed: bool,
    #[serde(default)]
    denied: bool,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    evaluation_error: String,
}

impl ReviewStatus {
    fn into_decision(self) -> Decision {
        if self.allowed {
            return Decision::allow(self.reason);
        }
        if self.denied {
            return Decision::deny(self.reason);
        }
        let mut decision = Decision::no_opinion();
        decision.reason = if self.evaluation_error.is_empty() {
            self.reason
        } else {
            format!("{} (evaluation error: {})", self.reason, self.evaluation_error)
        };
        decision
    }
}

/// Failure of a single review round trip
#[derive(Error, Debug)]
enum ReviewError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API server returned status {0}")]
    Status(StatusCode),

    #[error("invalid SubjectAccessReview response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ReviewError {
    /// Transport failures, throttling and server errors are worth retrying.
    fn is_transient(&self) -> bool {
        match self {
            ReviewError::Transport(_) => true,
            ReviewError::Status(status) => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            ReviewError::Decode(_) => false,
        }
    }
}

impl SubjectAccessReviewAuthorizer {
    pub fn new(config: SubjectAccessReviewConfig) -> Result<Self, AuthzError> {
        if config.timeout.is_zero() || config.timeout > MAX_TIMEOUT {
            return Err(AuthzError::Config(format!(
                "SubjectAccessReview timeout must be between 1ms and {}s, got {:?}",
                MAX_TIMEOUT.as_secs(),
                config.timeout
            )));
        }
        for (name, ttl) in [
            ("allow", config.allow_cache_ttl),
            ("deny", config.deny_cache_ttl),
        ] {
            if ttl > MAX_CACHE_TTL {
                return Err(AuthzError::Config(format!(
                    "{} cache TTL must be at most {}s, got {:?}",
                    name,
                    MAX_CACHE_TTL.as_secs(),
                    ttl
                )));
            }
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AuthzError::Config(format!("failed to build HTTP client: {}", e)))?;
        let endpoint = format!("{}{}", config.url.trim_end_matches('/'), REVIEW_PATH);

        Ok(Self {
            config,
            endpoint,
            client,
            cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn builder() -> SubjectAccessReviewAuthorizerBuilder {
        SubjectAccessReviewAuthorizerBuilder::default()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn check_cache(&self, key: &str) -> Option<Decision> {
        let cache = self.cache.read().await;
        cache
            .get(key)
            .filter(|cached| cached.expires_at > Instant::now())
            .map(|cached| cached.decision.clone())
    }

    async fn store_cache(&self, key: String, decision: &Decision) {
        let ttl = match decision.verdict {
            Verdict::Allow => self.config.allow_cache_ttl,
            Verdict::Deny | Verdict::NoOpinion => self.config.deny_cache_ttl,
        };
        if ttl.is_zero() {
            return;
        }

        let now = Instant::now();
        let Some(expires_at) = now.checked_add(ttl) else {
            return;
        };

        let mut cache = self.cache.write().await;
        evict(&mut cache, now);
        cache.insert(
            key,
            CachedDecision {
                decision: decision.clone(),
                cached_at: now,
                expires_at,
            },
        );
    }

    /// Clear all cached authorization decisions
    pub async fn clear_cache(&self) {
        self.cache.write().await.clear();
    }

    pub async fn cache_size(&self) -> usize {
        self.cache.read().await.len()
    }

    async fn review(&self, body: &SubjectAccessReview<'_>) -> Result<Decision, ReviewError> {
        let mut request = self.client.post(&self.endpoint).json(body);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ReviewError::Status(status));
        }

        let bytes = response.bytes().await?;
        let review: ReviewResponse = serde_json::from_slice(&bytes)?;
        Ok(review.status.into_decision())
    }
}

/// Drop expired entries when full, then the oldest tenth if still full.
fn evict(cache: &mut HashMap<String, CachedDecision>, now: Instant) {
    if cache.len() >= MAX_CACHE_SIZE {
        cache.retain(|_, v| v.expires_at > now);
    }

    if cache.len() >= MAX_CACHE_SIZE {
        let to_remove = MAX_CACHE_SIZE / 10;
        let mut entries: Vec<_> = cache
            .iter()
            .map(|(k, v)| (k.clone(), v.cached_at))
            .collect();
        entries.sort_by_key(|(_, t)| *t);
        for (key, _) in entries.into_iter().take(to_remove) {
            cache.remove(&key);
        }
    }
}

#[async_trait]
impl Authorizer for SubjectAccessReviewAuthorizer {
    async fn authorize(
        &self,
        _ctx: &RequestContext,
        attributes: &Attributes,
    ) -> Result<Decision, AuthzError> {
        let spec = ReviewSpec::from_attributes(attributes);
        let cache_key = serde_json::to_string(&spec)
            .map_err(|e| AuthzError::Backend(format!("failed to encode review: {}", e)))?;

        if let Some(decision) = self.check_cache(&cache_key).await {
            metrics::record_sar_cache(true);
            debug!(
                decision = decision.verdict.as_str(),
                "SubjectAccessReview decision (cached)"
            );
            return Ok(decision);
        }
        metrics::record_sar_cache(false);

        let body = SubjectAccessReview {
            api_version: "authorization.k8s.io/v1",
            kind: "SubjectAccessReview",
            spec: &spec,
        };

        let decision = retry_with_backoff(
            &self.config.retry,
            "subject_access_review",
            ReviewError::is_transient,
            || self.review(&body),
        )
        .await
        .map_err(|e| {
            metrics::record_sar_request("error");
            error!(attributes = %attributes, error = %e, "SubjectAccessReview failed");
            AuthzError::Backend(e.to_string())
        })?;

        metrics::record_sar_request(decision.verdict.as_str());
        debug!(
            attributes = %attributes,
            decision = decision.verdict.as_str(),
            reason = %decision.reason,
            "SubjectAccessReview decision"
        );

        self.store_cache(cache_key, &decision).await;
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Identity;
    use crate::authz::{ResourceAttributes, Verb};

    #[test]
    fn test_builder_pattern() {
        let authorizer = SubjectAccessReviewAuthorizer::builder()
            .url("https://kubernetes.default.svc/")
            .token("secret")
            .timeout(Duration::from_secs(5))
            .allow_cache_ttl(Duration::from_secs(60))
            .build()
            .unwrap();
        assert_eq!(
            authorizer.endpoint(),
            "https://kubernetes.default.svc/apis/authorization.k8s.io/v1/subjectaccessreviews"
        );
        assert_eq!(authorizer.config.deny_cache_ttl, DEFAULT_DENY_CACHE_TTL);
    }

    #[test]
    fn test_builder_missing_url() {
        let result = SubjectAccessReviewAuthorizer::builder().build();
        assert!(matches!(result, Err(AuthzError::Config(_))));
    }

    #[test]
    fn test_builder_rejects_unbounded_durations() {
        let result = SubjectAccessReviewAuthorizer::builder()
            .url("https://kubernetes.default.svc")
            .timeout(Duration::from_secs(u64::MAX))
            .build();
        assert!(matches!(result, Err(AuthzError::Config(_))));

        let result = SubjectAccessReviewAuthorizer::builder()
            .url("https://kubernetes.default.svc")
            .allow_cache_ttl(Duration::from_secs(u64::MAX))
            .build();
        assert!(matches!(result, Err(AuthzError::Config(_))));

        let result = SubjectAccessReviewAuthorizer::builder()
            .url("https://kubernetes.default.svc")
            .deny_cache_ttl(MAX_CACHE_TTL)
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_builder_missing_token_file() {
        let result = SubjectAccessReviewAuthorizer::builder()
            .url("https://kubernetes.default.svc")
            .token_file("/nonexistent/token")
            .build();
        assert!(matches!(result, Err(AuthzError::Config(_))));
    }

    #[test]
    fn test_resource_review_body() {
        let attributes = Attributes::resource(
            Some(Identity::new("bob", vec!["dev".to_string()])),
            Verb::Get,
            ResourceAttributes {
                namespace: "ns1".into(),
                api_group: "monitoring.coreos.com".into(),
                resource: "prometheusrules".into(),
                ..Default::default()
            },
        );
        let spec = ReviewSpec::from_attributes(&attributes);
        let json = serde_json::to_value(SubjectAccessReview {
            api_version: "authorization.k8s.io/v1",
            kind: "SubjectAccessReview",
            spec: &spec,
        })
        .unwrap();

        assert_eq!(json["kind"], "SubjectAccessReview");
        assert_eq!(json["spec"]["user"], "bob");
        assert_eq!(json["spec"]["groups"][0], "dev");
        assert_eq!(json["spec"]["resourceAttributes"]["namespace"], "ns1");
        assert_eq!(json["spec"]["resourceAttributes"]["group"], "monitoring.coreos.com");
        assert_eq!(json["spec"]["resourceAttributes"]["verb"], "get");
        assert!(json["spec"].get("nonResourceAttributes").is_none());
    }

    #[test]
    fn test_non_resource_review_body() {
        let attributes = Attributes::non_resource(None, Verb::Any, "/metrics");
        let json = serde_json::to_value(ReviewSpec::from_attributes(&attributes)).unwrap();

        assert_eq!(json["user"], "");
        assert!(json.get("groups").is_none());
        assert_eq!(json["nonResourceAttributes"]["path"], "/metrics");
        assert_eq!(json["nonResourceAttributes"]["verb"], "*");
        assert!(json.get("resourceAttributes").is_none());
    }

    #[test]
    fn test_status_to_decision() {
        let parse = |json: &str| {
            serde_json::from_str::<ReviewResponse>(json)
                .unwrap()
                .status
                .into_decision()
        };

        let allowed = parse(r#"{"status":{"allowed":true,"reason":"RBAC: allowed"}}"#);
        assert_eq!(allowed, Decision::allow("RBAC: allowed"));

        let denied = parse(r#"{"status":{"allowed":false,"denied":true,"reason":"nope"}}"#);
        assert_eq!(denied.verdict, Verdict::Deny);

        let abstained = parse(r#"{"status":{"allowed":false}}"#);
        assert_eq!(abstained.verdict, Verdict::NoOpinion);

        let missing = parse(r#"{}"#);
        assert_eq!(missing.verdict, Verdict::NoOpinion);
    }

    #[test]
    fn test_transient_statuses() {
        assert!(ReviewError::Status(StatusCode::TOO_MANY_REQUESTS).is_transient());
        assert!(ReviewError::Status(StatusCode::SERVICE_UNAVAILABLE).is_transient());
        assert!(!ReviewError::Status(StatusCode::FORBIDDEN).is_transient());
        assert!(!ReviewError::Status(StatusCode::BAD_REQUEST).is_transient());
    }

    #[test]
    fn test_evict_when_full() {
        let now = Instant::now();
        let mut cache = HashMap::new();
        for i in 0..MAX_CACHE_SIZE {
            cache.insert(
                format!("key-{i}"),
                CachedDecision {
                    decision: Decision::allow(""),
                    cached_at: now,
                    expires_at: now + Duration::from_secs(60),
                },
            );
        }

        evict(&mut cache, now);
        assert_eq!(cache.len(), MAX_CACHE_SIZE - MAX_CACHE_SIZE / 10);
    }

    #[test]
    fn test_evict_prefers_expired() {
        let now = Instant::now();
        let mut cache = HashMap::new();
        for i in 0..MAX_CACHE_SIZE {
            let expires_at = if i % 2 == 0 {
                now
            } else {
                now + Duration::from_secs(60)
            };
            cache.insert(
                format!("key-{i}"),
                CachedDecision {
                    decision: Decision::deny(""),
                    cached_at: now,
                    expires_at,
                },
            );
        }

        evict(&mut cache, now);
        assert_eq!(cache.len(), MAX_CACHE_SIZE / 2);
    }
}
