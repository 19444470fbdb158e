//! JWT Authentication
//!
//! Supports HS256, RS256 and ES256 bearer tokens. The `sub` claim becomes the
//! identity name and a configurable claim (default `groups`) supplies groups.

use super::{AuthError, AuthRequest, Authenticator, Identity};
use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Claim read for group membership unless configured otherwise
pub const DEFAULT_GROUPS_CLAIM: &str = "groups";

/// JWT Claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    #[serde(default)]
    pub iat: Option<usize>,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub aud: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// JWT Authenticator
///
/// # Example
///
/// ```
/// use kube_rbac_gate::auth::jwt::JwtAuthenticator;
///
/// let auth = JwtAuthenticator::new_hs256("my-secret")
///     .with_issuer("https://auth.example.com")
///     .with_audience("my-api")
///     .with_groups_claim("roles");
/// ```
pub struct JwtAuthenticator {
    decoding_key: DecodingKey,
    validation: Validation,
    groups_claim: String,
}

impl JwtAuthenticator {
    fn with_key(decoding_key: DecodingKey, algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.validate_exp = true;
        validation.validate_aud = false; // Only validate aud when explicitly set

        Self {
            decoding_key,
            validation,
            groups_claim: DEFAULT_GROUPS_CLAIM.to_string(),
        }
    }

    /// Create a new JWT authenticator with a secret key (HS256)
    pub fn new_hs256(secret: &str) -> Self {
        Self::with_key(DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256)
    }

    /// Create a new JWT authenticator with an RSA public key (RS256)
    pub fn new_rs256(public_key_pem: &str) -> Result<Self, AuthError> {
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        Ok(Self::with_key(decoding_key, Algorithm::RS256))
    }

    /// Create a new JWT authenticator with an EC public key (ES256)
    pub fn new_es256(public_key_pem: &str) -> Result<Self, AuthError> {
        let decoding_key = DecodingKey::from_ec_pem(public_key_pem.as_bytes())
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        Ok(Self::with_key(decoding_key, Algorithm::ES256))
    }

    /// Set the required issuer (`iss` claim)
    #[must_use]
    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self
    }

    /// Set the required audience (`aud` claim)
    #[must_use]
    pub fn with_audience(mut self, audience: &str) -> Self {
        self.validation.set_audience(&[audience]);
        self.validation.validate_aud = true;
        self
    }

    /// Read groups from `claim` instead of `groups`
    #[must_use]
    pub fn with_groups_claim(mut self, claim: &str) -> Self {
        self.groups_claim = claim.to_string();
        self
    }

    fn extract_token(request: &AuthRequest) -> Option<&str> {
        request
            .headers
            .get("authorization")
            .and_then(|auth| auth.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    /// A string claim yields one group, an array yields its string members.
    fn groups_from(&self, claims: &Claims) -> Vec<String> {
        match claims.extra.get(&self.groups_claim) {
            Some(serde_json::Value::String(group)) => vec![group.clone()],
            Some(serde_json::Value::Array(groups)) => groups
                .iter()
                .filter_map(|g| g.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, AuthError> {
        let token = Self::extract_token(request).ok_or(AuthError::MissingAuth)?;

        let token_data =
            decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| match e
                .kind()
            {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::InvalidToken(e.to_string()),
            })?;

        let groups = self.groups_from(&token_data.claims);
        debug!(subject = %token_data.claims.sub, groups = groups.len(), "JWT authentication successful");

        Ok(Identity::new(token_data.claims.sub, groups))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with(headers: &[(&str, &str)]) -> AuthRequest {
        AuthRequest {
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            method: "GET".into(),
            path: "/metrics".into(),
        }
    }

    #[tokio::test]
    async fn test_missing_token() {
        let auth = JwtAuthenticator::new_hs256("secret");
        let result = auth.authenticate(&request_with(&[])).await;
        assert!(matches!(result, Err(AuthError::MissingAuth)));
    }

    #[tokio::test]
    async fn test_non_bearer_scheme_is_missing_auth() {
        let auth = JwtAuthenticator::new_hs256("secret");
        let result = auth
            .authenticate(&request_with(&[("authorization", "Basic Zm9vOmJhcg==")]))
            .await;
        assert!(matches!(result, Err(AuthError::MissingAuth)));
    }

    #[tokio::test]
    async fn test_garbage_token_is_invalid() {
        let auth = JwtAuthenticator::new_hs256("secret");
        let result = auth
            .authenticate(&request_with(&[("authorization", "Bearer not-a-jwt")]))
            .await;
        assert!(matches!(result, Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn test_groups_claim_shapes() {
        let auth = JwtAuthenticator::new_hs256("secret").with_groups_claim("roles");
        let mut claims = Claims {
            sub: "alice".into(),
            exp: 0,
            iat: None,
            iss: None,
            aud: None,
            extra: HashMap::new(),
        };
        assert!(auth.groups_from(&claims).is_empty());

        claims
            .extra
            .insert("roles".into(), serde_json::json!(["dev", 7, "ops"]));
        assert_eq!(auth.groups_from(&claims), vec!["dev", "ops"]);

        claims.extra.insert("roles".into(), serde_json::json!("admin"));
        assert_eq!(auth.groups_from(&claims), vec!["admin"]);
    }
}
