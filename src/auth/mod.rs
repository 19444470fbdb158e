//! Authentication module
//!
//! Turns an incoming request into a verified [`Identity`]. The authorizer
//! only ever sees identities produced here.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

pub mod jwt;

/// Authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid signature")]
    InvalidSignature,
}

/// A verified caller.
///
/// Groups keep the order in which the token listed them; duplicates are
/// dropped on construction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Identity {
    name: String,
    groups: Vec<String>,
}

impl Identity {
    pub fn new(name: impl Into<String>, groups: impl IntoIterator<Item = String>) -> Self {
        let mut unique: Vec<String> = Vec::new();
        for group in groups {
            if !unique.contains(&group) {
                unique.push(group);
            }
        }
        Self {
            name: name.into(),
            groups: unique,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

/// Authenticator trait
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Authenticate a request
    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, AuthError>;
}

/// Authentication request context
///
/// Header names are lowercased.
#[derive(Debug)]
pub struct AuthRequest {
    pub headers: HashMap<String, String>,
    pub method: String,
    pub path: String,
}
