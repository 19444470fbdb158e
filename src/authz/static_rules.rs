//! Static authorization rules
//!
//! Rules are additive grants: the first matching rule allows the request,
//! and no match means no opinion. An empty field in a rule matches any value.

use super::{Attributes, Authorizer, AuthzError, Decision, RequestContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// User selector of a static rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMatch {
    #[serde(default)]
    pub name: String,
    /// Every listed group must be held by the identity
    #[serde(default)]
    pub groups: Vec<String>,
}

/// A single static allow rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticRule {
    #[serde(default)]
    pub user: UserMatch,
    #[serde(default)]
    pub verb: String,
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
    #[serde(default)]
    pub resource_request: bool,
    #[serde(default)]
    pub path: String,
}

fn field_matches(rule: &str, value: &str) -> bool {
    rule.is_empty() || rule == value
}

impl StaticRule {
    /// Resource rules must not carry a path and path rules must carry one.
    pub fn validate(&self) -> Result<(), AuthzError> {
        if self.resource_request != self.path.is_empty() {
            return Err(AuthzError::Config(format!(
                "static rule must set either resourceRequest or path, not both or neither (resourceRequest={}, path={:?})",
                self.resource_request, self.path
            )));
        }
        Ok(())
    }

    /// `resource_request` is compared exactly; every other field is a
    /// wildcard when empty.
    pub fn matches(&self, attributes: &Attributes) -> bool {
        let user_matches = field_matches(&self.user.name, attributes.user_name())
            && self.user.groups.iter().all(|group| {
                attributes
                    .user
                    .as_ref()
                    .is_some_and(|identity| identity.in_group(group))
            });

        user_matches
            && field_matches(&self.verb, attributes.verb.as_str())
            && field_matches(&self.namespace, &attributes.namespace)
            && field_matches(&self.api_group, &attributes.api_group)
            && field_matches(&self.api_version, &attributes.api_version)
            && field_matches(&self.resource, &attributes.resource)
            && field_matches(&self.subresource, &attributes.subresource)
            && field_matches(&self.name, &attributes.name)
            && field_matches(&self.path, &attributes.path)
            && self.resource_request == attributes.resource_request
    }
}

/// Evaluates static rules in configuration order
#[derive(Debug, Default)]
pub struct StaticAuthorizer {
    rules: Vec<StaticRule>,
}

impl StaticAuthorizer {
    /// Validate every rule up front; a single bad rule rejects the whole list.
    pub fn new(rules: Vec<StaticRule>) -> Result<Self, AuthzError> {
        for rule in &rules {
            rule.validate()?;
        }
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn authorize(
        &self,
        _ctx: &RequestContext,
        attributes: &Attributes,
    ) -> Result<Decision, AuthzError> {
        if self.rules.iter().any(|rule| rule.matches(attributes)) {
            return Ok(Decision::allow("found corresponding static auth config"));
        }
        Ok(Decision::no_opinion())
    }
}
