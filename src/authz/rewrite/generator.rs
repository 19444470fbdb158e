use super::template::ResourceTemplate;
use super::RewriteAttributesConfig;
use crate::authz::{Attributes, RequestContext, ResourceAttributes};

/// Produces the attribute sets to authorize for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributesGenerator {
    /// Identity, verb and path only
    Default,
    /// Fixed target resource, copied verbatim
    Bound(ResourceAttributes),
    /// One target per extracted rewrite value
    Rewriting(ResourceTemplate),
}

impl AttributesGenerator {
    /// Pick the strategy from the shape of the configuration.
    pub fn from_config(config: &RewriteAttributesConfig) -> Self {
        match (&config.resource_attributes, config.source()) {
            (None, _) => AttributesGenerator::Default,
            (Some(target), None) => AttributesGenerator::Bound(target.clone()),
            (Some(target), Some(_)) => {
                AttributesGenerator::Rewriting(ResourceTemplate::parse(target))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AttributesGenerator::Default => "default",
            AttributesGenerator::Bound(_) => "bound",
            AttributesGenerator::Rewriting(_) => "rewriting",
        }
    }

    /// An empty result means the request carried nothing to authorize.
    pub fn generate(&self, ctx: &RequestContext, original: &Attributes) -> Vec<Attributes> {
        match self {
            AttributesGenerator::Default => vec![Attributes::non_resource(
                original.user.clone(),
                original.verb,
                original.path.clone(),
            )],
            AttributesGenerator::Bound(target) => vec![Attributes::resource(
                original.user.clone(),
                original.verb,
                target.clone(),
            )],
            AttributesGenerator::Rewriting(template) => ctx
                .rewrite_params()
                .iter()
                .map(|value| {
                    Attributes::resource(original.user.clone(), original.verb, template.render(value))
                })
                .collect(),
        }
    }
}
