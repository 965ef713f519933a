//! Plain parent validator.

use super::CandidateTargetValidator;
use crate::candidate::PublishCandidate;
use crate::errors::PipelineError;
use crate::repository::TargetIndex;
use async_trait::async_trait;
use std::sync::Arc;

/// Accepts a candidate when its parent already exists on the target.
///
/// Root nodes have nothing to hang from and are always accepted.
#[derive(Clone)]
pub struct ParentValidator {
    target: Arc<dyn TargetIndex>,
}

impl ParentValidator {
    /// Creates a validator over one target index.
    #[must_use]
    pub fn new(target: Arc<dyn TargetIndex>) -> Self {
        Self { target }
    }
}

impl std::fmt::Debug for ParentValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParentValidator").finish_non_exhaustive()
    }
}

#[async_trait]
impl CandidateTargetValidator for ParentValidator {
    async fn is_valid(&self, candidate: &PublishCandidate) -> Result<bool, PipelineError> {
        let Some(parent) = candidate.parent_id() else {
            return Ok(true);
        };
        self.target.contains(parent).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{ContentNode, TemplateId};
    use crate::testing::InMemoryTargetIndex;

    #[tokio::test]
    async fn test_root_is_always_valid() {
        let validator = ParentValidator::new(Arc::new(InMemoryTargetIndex::new()));
        let root = PublishCandidate::existing(ContentNode::root("sitecore", TemplateId::new()));

        assert!(validator.is_valid(&root).await.unwrap());
    }

    #[tokio::test]
    async fn test_parent_must_exist_on_target() {
        let template = TemplateId::new();
        let root = ContentNode::root("content", template);
        let home = ContentNode::child_of(&root, "home", template);
        let page = ContentNode::child_of(&home, "page", template);

        let target = Arc::new(InMemoryTargetIndex::new());
        target.insert(root.id);
        let validator = ParentValidator::new(target.clone());
        let home = PublishCandidate::existing(home);
        let page = PublishCandidate::existing(page);

        assert!(validator.is_valid(&home).await.unwrap());
        assert!(!validator.is_valid(&page).await.unwrap());

        target.insert(home.id());
        assert!(validator.is_valid(&page).await.unwrap());
    }

    #[tokio::test]
    async fn test_index_failure_propagates() {
        let target = Arc::new(InMemoryTargetIndex::new());
        target.fail_with("index offline");
        let validator = ParentValidator::new(target);

        let root = ContentNode::root("content", TemplateId::new());
        let child = ContentNode::child_of(&root, "home", root.template_id);
        let err = validator
            .is_valid(&PublishCandidate::existing(child))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Repository(_)));
    }
}
