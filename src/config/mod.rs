//! Configuration module for kube-rbac-gate
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation at startup. Every problem
//! found here aborts startup; nothing is degraded at request time.

use crate::auth::jwt::{JwtAuthenticator, DEFAULT_GROUPS_CLAIM};
use crate::authz::builder::RequestAuthorizer;
use crate::authz::path::PathAuthorizer;
use crate::authz::retry::RetryConfig;
use crate::authz::rewrite::RewriteAttributesConfig;
use crate::authz::sar::{SubjectAccessReviewAuthorizer, MAX_CACHE_TTL, MAX_TIMEOUT};
use crate::authz::static_rules::StaticRule;
use crate::authz::Authorizer;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub authentication: AuthenticationConfig,
    #[serde(default)]
    pub authorization: AuthorizationConfig,
    /// Only these paths may be requested; exclusive with `ignore_paths`
    #[serde(default)]
    pub allow_paths: Vec<String>,
    /// These paths skip authorization entirely
    #[serde(default)]
    pub ignore_paths: Vec<String>,
    #[serde(default)]
    pub subject_access_review: Option<SubjectAccessReviewSettings>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.address.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "server.address cannot be empty".into(),
            ));
        }

        match &self.authentication.jwt {
            Some(jwt) => jwt.validate()?,
            None => {
                return Err(ConfigError::ValidationError(
                    "authentication.jwt must be configured".into(),
                ))
            }
        }

        for rule in &self.authorization.static_rules {
            rule.validate()
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        }

        if !self.allow_paths.is_empty() && !self.ignore_paths.is_empty() {
            return Err(ConfigError::ValidationError(
                "allow_paths and ignore_paths are mutually exclusive".into(),
            ));
        }
        PathAuthorizer::allow_list(&self.allow_paths)
            .and_then(|_| PathAuthorizer::ignore_list(&self.ignore_paths))
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        let rewrite = &self.authorization.rewrite;
        if rewrite.rewrites.is_some() && rewrite.resource_attributes.is_none() {
            return Err(ConfigError::ValidationError(
                "authorization.rewrites requires authorization.resourceAttributes".into(),
            ));
        }

        if let Some(sar) = &self.subject_access_review {
            sar.validate()?;
        }

        Ok(())
    }

    /// Build the authorizer chain; `delegate` is the SubjectAccessReview
    /// backend, if one is configured.
    pub fn request_authorizer(
        &self,
        delegate: Option<Arc<dyn Authorizer>>,
    ) -> Result<RequestAuthorizer, ConfigError> {
        let mut builder = RequestAuthorizer::builder()
            .allow_paths(self.allow_paths.clone())
            .ignore_paths(self.ignore_paths.clone())
            .static_rules(self.authorization.static_rules.clone())
            .rewrite(self.authorization.rewrite.clone());

        if let Some(delegate) = delegate {
            builder = builder.delegate(delegate);
        }
        if let Some(sar) = &self.subject_access_review {
            builder = builder.timeout(sar.timeout());
        }

        builder
            .build()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: String,
    #[serde(default)]
    pub auth_headers: AuthHeadersConfig,
}

/// Identity headers added to allowed responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthHeadersConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_user_field_name")]
    pub user_field_name: String,
    #[serde(default = "default_groups_field_name")]
    pub groups_field_name: String,
    #[serde(default = "default_group_separator")]
    pub group_separator: String,
}

impl Default for AuthHeadersConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            user_field_name: default_user_field_name(),
            groups_field_name: default_groups_field_name(),
            group_separator: default_group_separator(),
        }
    }
}

fn default_user_field_name() -> String {
    "x-remote-user".to_string()
}

fn default_groups_field_name() -> String {
    "x-remote-groups".to_string()
}

fn default_group_separator() -> String {
    "|".to_string()
}

/// Authentication configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthenticationConfig {
    #[serde(default)]
    pub jwt: Option<JwtConfig>,
}

/// JWT configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// Shared secret for HS256, PEM public key for RS256 and ES256
    pub secret: String,
    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default = "default_groups_claim")]
    pub groups_claim: String,
}

fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}

fn default_groups_claim() -> String {
    DEFAULT_GROUPS_CLAIM.to_string()
}

impl JwtConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self.algorithm.as_str() {
            "HS256" | "RS256" | "ES256" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Unsupported JWT algorithm '{}': must be HS256, RS256 or ES256",
                    other
                )))
            }
        }
        if self.secret.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "authentication.jwt.secret cannot be empty".into(),
            ));
        }
        Ok(())
    }

    /// Build the authenticator described by this configuration
    pub fn authenticator(&self) -> Result<JwtAuthenticator, ConfigError> {
        let authenticator = match self.algorithm.as_str() {
            "HS256" => JwtAuthenticator::new_hs256(&self.secret),
            "RS256" => JwtAuthenticator::new_rs256(&self.secret)
                .map_err(|e| ConfigError::ValidationError(format!("Invalid RS256 key: {}", e)))?,
            "ES256" => JwtAuthenticator::new_es256(&self.secret)
                .map_err(|e| ConfigError::ValidationError(format!("Invalid ES256 key: {}", e)))?,
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Unsupported JWT algorithm '{}'",
                    other
                )))
            }
        };

        let mut authenticator = authenticator.with_groups_claim(&self.groups_claim);
        if let Some(issuer) = &self.issuer {
            authenticator = authenticator.with_issuer(issuer);
        }
        if let Some(audience) = &self.audience {
            authenticator = authenticator.with_audience(audience);
        }
        Ok(authenticator)
    }
}

/// Authorization targets and static rules
///
/// Keys keep the Kubernetes camelCase spelling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorizationConfig {
    #[serde(flatten)]
    pub rewrite: RewriteAttributesConfig,
    #[serde(default, rename = "static")]
    pub static_rules: Vec<StaticRule>,
}

/// SubjectAccessReview backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectAccessReviewSettings {
    /// API server base URL
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
    /// Read when `token` is not set
    #[serde(default)]
    pub token_file: Option<String>,
    #[serde(default = "default_sar_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_allow_cache_ttl")]
    pub allow_cache_ttl_seconds: u64,
    #[serde(default = "default_deny_cache_ttl")]
    pub deny_cache_ttl_seconds: u64,
    #[serde(default)]
    pub retry: RetrySettings,
}

fn default_sar_timeout() -> u64 {
    10
}

fn default_allow_cache_ttl() -> u64 {
    300
}

fn default_deny_cache_ttl() -> u64 {
    30
}

impl SubjectAccessReviewSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_http_url(&self.url) {
            return Err(ConfigError::ValidationError(
                "Invalid subject_access_review.url: must start with http:// or https://".into(),
            ));
        }
        if self.timeout_seconds == 0 || self.timeout_seconds > MAX_TIMEOUT.as_secs() {
            return Err(ConfigError::ValidationError(format!(
                "Invalid subject_access_review.timeout_seconds {}: must be between 1 and {}",
                self.timeout_seconds,
                MAX_TIMEOUT.as_secs()
            )));
        }
        for (field, ttl) in [
            ("allow_cache_ttl_seconds", self.allow_cache_ttl_seconds),
            ("deny_cache_ttl_seconds", self.deny_cache_ttl_seconds),
        ] {
            if ttl > MAX_CACHE_TTL.as_secs() {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid subject_access_review.{} {}: must be at most {}",
                    field,
                    ttl,
                    MAX_CACHE_TTL.as_secs()
                )));
            }
        }
        self.retry.validate()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Build the HTTP client for this backend
    pub fn authorizer(&self) -> Result<SubjectAccessReviewAuthorizer, ConfigError> {
        let mut builder = SubjectAccessReviewAuthorizer::builder()
            .url(&self.url)
            .timeout(self.timeout())
            .allow_cache_ttl(Duration::from_secs(self.allow_cache_ttl_seconds))
            .deny_cache_ttl(Duration::from_secs(self.deny_cache_ttl_seconds))
            .retry(self.retry.to_retry_config());

        if let Some(token) = &self.token {
            builder = builder.token(token);
        }
        if let Some(path) = &self.token_file {
            builder = builder.token_file(path);
        }

        builder
            .build()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

/// Backoff for transient SubjectAccessReview failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_millis: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_millis: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_millis: default_initial_delay(),
            max_delay_millis: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> u64 {
    500
}

fn default_max_delay() -> u64 {
    5000
}

fn default_backoff_multiplier() -> f64 {
    1.5
}

impl RetrySettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "Invalid retry.backoff_multiplier {}: must be at least 1.0",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }

    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_millis),
            max_delay: Duration::from_millis(self.max_delay_millis),
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}
