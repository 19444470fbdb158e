//! OR-combinator
//!
//! Asks each authorizer in turn and returns the first explicit opinion,
//! allow or deny. Errors stop the evaluation as well. Only when everyone
//! abstains does the union abstain.

use super::{Attributes, Authorizer, AuthzError, Decision, RequestContext, Verdict};
use async_trait::async_trait;
use std::sync::Arc;

/// First-explicit-opinion-wins composition of authorizers
#[derive(Default)]
pub struct UnionAuthorizer {
    authorizers: Vec<Arc<dyn Authorizer>>,
}

impl UnionAuthorizer {
    pub fn new(authorizers: Vec<Arc<dyn Authorizer>>) -> Self {
        Self { authorizers }
    }

    pub fn len(&self) -> usize {
        self.authorizers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.authorizers.is_empty()
    }
}

#[async_trait]
impl Authorizer for UnionAuthorizer {
    async fn authorize(
        &self,
        ctx: &RequestContext,
        attributes: &Attributes,
    ) -> Result<Decision, AuthzError> {
        for authorizer in &self.authorizers {
            let decision = authorizer.authorize(ctx, attributes).await?;
            if decision.verdict != Verdict::NoOpinion {
                return Ok(decision);
            }
        }
        Ok(Decision::no_opinion())
    }
}
