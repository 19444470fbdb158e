//! Access-review attributes
//!
//! [`Attributes`] describes who wants to do what to which resource. It is the
//! unit every authorizer evaluates and the payload of a SubjectAccessReview.

use crate::auth::Identity;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kubernetes verb derived from the HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Create,
    Update,
    Patch,
    Delete,
    /// HTTP method without a verb mapping
    Any,
}

impl Verb {
    /// Map an HTTP method onto a verb.
    pub fn from_method(method: &str) -> Self {
        match method {
            "GET" => Verb::Get,
            "POST" => Verb::Create,
            "PUT" => Verb::Update,
            "PATCH" => Verb::Patch,
            "DELETE" => Verb::Delete,
            _ => Verb::Any,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "get",
            Verb::Create => "create",
            Verb::Update => "update",
            Verb::Patch => "patch",
            Verb::Delete => "delete",
            Verb::Any => "*",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource coordinates of a resource request.
///
/// Used both as the configured target of bound/rewritten authorization and,
/// for rewriting, as a set of templates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAttributes {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub api_group: String,
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub subresource: String,
    #[serde(default)]
    pub name: String,
}

/// One authorization query.
///
/// Empty strings mean "unspecified". `path` is only meaningful when
/// `resource_request` is false; use the constructors to keep the two shapes
/// apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attributes {
    pub user: Option<Identity>,
    pub verb: Verb,
    pub namespace: String,
    pub api_group: String,
    pub api_version: String,
    pub resource: String,
    pub subresource: String,
    pub name: String,
    pub resource_request: bool,
    pub path: String,
}

impl Attributes {
    /// A raw-path query.
    pub fn non_resource(user: Option<Identity>, verb: Verb, path: impl Into<String>) -> Self {
        Self {
            user,
            verb,
            namespace: String::new(),
            api_group: String::new(),
            api_version: String::new(),
            resource: String::new(),
            subresource: String::new(),
            name: String::new(),
            resource_request: false,
            path: path.into(),
        }
    }

    /// A resource query against the given coordinates.
    pub fn resource(user: Option<Identity>, verb: Verb, target: ResourceAttributes) -> Self {
        Self {
            user,
            verb,
            namespace: target.namespace,
            api_group: target.api_group,
            api_version: target.api_version,
            resource: target.resource,
            subresource: target.subresource,
            name: target.name,
            resource_request: true,
            path: String::new(),
        }
    }

    /// Name of the user, or empty when the request is anonymous.
    pub fn user_name(&self) -> &str {
        self.user.as_ref().map(Identity::name).unwrap_or_default()
    }
}

/// Audit form used in denial reasons and logs. Never carries credentials.
impl fmt::Display for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user={}, verb={}", self.user_name(), self.verb)?;
        if !self.resource_request {
            return write!(f, ", path={}", self.path);
        }
        write!(
            f,
            ", namespace={}, apiGroup={}, apiVersion={}, resource={}, subresource={}, name={}",
            self.namespace,
            self.api_group,
            self.api_version,
            self.resource,
            self.subresource,
            self.name
        )
    }
}
