//! SubjectAccessReview rewriting
//!
//! Maps an HTTP request onto the attribute sets that are sent for review:
//!
//! - [`RewriteAttributesConfig`] names the target resource (possibly
//!   templated) and where client-supplied rewrite values come from
//! - [`RewriteSource::extract`] pulls those values out of the request
//! - [`AttributesGenerator`] turns the original attributes plus the extracted
//!   values into the attribute sets to authorize
//! - [`RewritingAuthorizer`] requires every generated set to be allowed
//!
//! Rewriting feeds client input into authorization targets. Only enable it
//! when the upstream service interprets the same parameter the same way.

use super::ResourceAttributes;
use hyper::HeaderMap;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

mod authorizer;
mod generator;
mod template;

pub use authorizer::RewritingAuthorizer;
pub use generator::AttributesGenerator;
pub use template::{ResourceTemplate, TemplateError, ValueTemplate};

/// Authorization target configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewriteAttributesConfig {
    #[serde(default)]
    pub rewrites: Option<SubjectAccessReviewRewrites>,
    #[serde(default)]
    pub resource_attributes: Option<ResourceAttributes>,
}

impl RewriteAttributesConfig {
    /// The configured rewrite source, if any
    pub fn source(&self) -> Option<RewriteSource> {
        self.rewrites.as_ref().and_then(SubjectAccessReviewRewrites::source)
    }
}

/// Where rewrite values may be taken from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAccessReviewRewrites {
    #[serde(default)]
    pub by_query_parameter: Option<NamedSource>,
    #[serde(default)]
    pub by_http_header: Option<NamedSource>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedSource {
    #[serde(default)]
    pub name: String,
}

impl SubjectAccessReviewRewrites {
    /// A named query parameter takes precedence over a named header.
    pub fn source(&self) -> Option<RewriteSource> {
        let named = |source: &Option<NamedSource>| {
            source
                .as_ref()
                .map(|s| s.name.trim().to_string())
                .filter(|name| !name.is_empty())
        };

        named(&self.by_query_parameter)
            .map(RewriteSource::QueryParameter)
            .or_else(|| named(&self.by_http_header).map(|n| RewriteSource::Header(n.to_ascii_lowercase())))
    }

    /// Whether both a query parameter and a header are named
    pub fn is_ambiguous(&self) -> bool {
        let has = |source: &Option<NamedSource>| {
            source.as_ref().is_some_and(|s| !s.name.trim().is_empty())
        };
        has(&self.by_query_parameter) && has(&self.by_http_header)
    }
}

/// A single rewrite source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteSource {
    QueryParameter(String),
    /// Lowercased header name
    Header(String),
}

impl RewriteSource {
    /// All values found at this source, in the order the request carried
    /// them. Values that are not valid UTF-8 are skipped.
    pub fn extract(&self, query: Option<&str>, headers: &HeaderMap) -> Vec<String> {
        match self {
            RewriteSource::QueryParameter(name) => query
                .map(|query| query_values(query, name))
                .unwrap_or_default(),
            RewriteSource::Header(name) => headers
                .get_all(name.as_str())
                .iter()
                .filter_map(|value| value.to_str().ok())
                .map(str::to_string)
                .collect(),
        }
    }
}

/// Extract rewrite values for an optional source; no source yields nothing.
pub fn extract_params(
    source: Option<&RewriteSource>,
    query: Option<&str>,
    headers: &HeaderMap,
) -> Vec<String> {
    source
        .map(|source| source.extract(query, headers))
        .unwrap_or_default()
}

fn query_values(query: &str, wanted: &str) -> Vec<String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            if decode_component(key)? == wanted {
                decode_component(value)
            } else {
                None
            }
        })
        .collect()
}

fn decode_component(raw: &str) -> Option<String> {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .ok()
        .map(|decoded| decoded.into_owned())
}
