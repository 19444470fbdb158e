use super::AttributesGenerator;
use crate::authz::{Attributes, Authorizer, AuthzError, Decision, RequestContext};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// AND-combinator over a generator's output
///
/// Generated sets are authorized one after another, in generation order.
/// The first set that is not allowed decides the request.
pub struct RewritingAuthorizer {
    generator: AttributesGenerator,
    authorizer: Arc<dyn Authorizer>,
}

impl RewritingAuthorizer {
    pub fn new(generator: AttributesGenerator, authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            generator,
            authorizer,
        }
    }

    pub fn generator(&self) -> &AttributesGenerator {
        &self.generator
    }
}

#[async_trait]
impl Authorizer for RewritingAuthorizer {
    async fn authorize(
        &self,
        ctx: &RequestContext,
        attributes: &Attributes,
    ) -> Result<Decision, AuthzError> {
        let generated = self.generator.generate(ctx, attributes);
        if generated.is_empty() {
            debug!(
                generator = self.generator.name(),
                attributes = %attributes,
                "No attributes generated for request"
            );
            return Err(AuthzError::MalformedRequest);
        }

        let mut reason = String::new();
        for target in &generated {
            let decision = self
                .authorizer
                .authorize(ctx, target)
                .await
                .map_err(|source| AuthzError::Attributes {
                    attributes: target.to_string(),
                    source: Box::new(source),
                })?;

            if !decision.is_allow() {
                return Ok(Decision::deny(format!(
                    "Forbidden ({}): {}",
                    target, decision.reason
                )));
            }
            reason = decision.reason;
        }

        Ok(Decision::allow(reason))
    }
}
