//! Bucket-aware parent validator.

use super::CandidateTargetValidator;
use crate::candidate::{PublishCandidate, TemplateId};
use crate::errors::PipelineError;
use crate::repository::{CandidateSource, TargetIndex};
use async_trait::async_trait;
use std::sync::Arc;

/// Accepts a candidate whose missing ancestors are all bucket containers.
///
/// Bucket containers are structural: they are created on the target as part
/// of the publish. Walking up from the parent, every ancestor absent from the
/// target must be a container, until an ancestor present on the target (or
/// the root) is reached.
#[derive(Clone)]
pub struct BucketParentValidator {
    source: Arc<dyn CandidateSource>,
    target: Arc<dyn TargetIndex>,
    bucket_template: TemplateId,
}

impl BucketParentValidator {
    /// Creates a validator for one target and bucket container template.
    #[must_use]
    pub fn new(
        source: Arc<dyn CandidateSource>,
        target: Arc<dyn TargetIndex>,
        bucket_template: TemplateId,
    ) -> Self {
        Self {
            source,
            target,
            bucket_template,
        }
    }
}

impl std::fmt::Debug for BucketParentValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketParentValidator")
            .field("bucket_template", &self.bucket_template)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CandidateTargetValidator for BucketParentValidator {
    async fn is_valid(&self, candidate: &PublishCandidate) -> Result<bool, PipelineError> {
        let mut ancestor = candidate.parent_id();

        while let Some(id) = ancestor {
            if self.target.contains(id).await? {
                return Ok(true);
            }

            match self.source.node(id).await? {
                Some(node) if node.template_id == self.bucket_template => {
                    ancestor = node.parent_id();
                }
                _ => return Ok(false),
            }
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::ContentNode;
    use crate::testing::{InMemoryContentTree, InMemoryTargetIndex};

    struct Fixture {
        tree: Arc<InMemoryContentTree>,
        target: Arc<InMemoryTargetIndex>,
        bucket: TemplateId,
        root: ContentNode,
        news: ContentNode,
        year: ContentNode,
        month: ContentNode,
        article: ContentNode,
    }

    // content / news / 2024 / 05 / article, with 2024 and 05 as containers.
    fn fixture() -> Fixture {
        let page = TemplateId::new();
        let bucket = TemplateId::new();
        let root = ContentNode::root("content", page);
        let news = ContentNode::child_of(&root, "news", page);
        let year = ContentNode::child_of(&news, "2024", bucket);
        let month = ContentNode::child_of(&year, "05", bucket);
        let article = ContentNode::child_of(&month, "article", page);

        let tree = Arc::new(InMemoryContentTree::new());
        for node in [&root, &news, &year, &month, &article] {
            tree.insert(node.clone());
        }
        let target = Arc::new(InMemoryTargetIndex::new());
        target.insert(root.id);

        Fixture {
            tree,
            target,
            bucket,
            root,
            news,
            year,
            month,
            article,
        }
    }

    fn validator(f: &Fixture) -> BucketParentValidator {
        BucketParentValidator::new(f.tree.clone(), f.target.clone(), f.bucket)
    }

    #[tokio::test]
    async fn test_missing_containers_are_tolerated() {
        let f = fixture();
        f.target.insert(f.news.id);

        let candidate = PublishCandidate::existing(f.article.clone());
        assert!(validator(&f).is_valid(&candidate).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_bucket_root_rejects() {
        let f = fixture();

        let candidate = PublishCandidate::existing(f.article.clone());
        assert!(!validator(&f).is_valid(&candidate).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_plain_parent_rejects() {
        let f = fixture();
        let orphan = ContentNode::child_of(&f.news, "orphan", f.root.template_id);

        let candidate = PublishCandidate::existing(orphan);
        assert!(!validator(&f).is_valid(&candidate).await.unwrap());
    }

    #[tokio::test]
    async fn test_present_parent_short_circuits() {
        let f = fixture();
        f.target.insert(f.month.id);

        let candidate = PublishCandidate::existing(f.article.clone());
        assert!(validator(&f).is_valid(&candidate).await.unwrap());
        let year = PublishCandidate::existing(f.year.clone());
        assert!(!validator(&f).is_valid(&year).await.unwrap());
    }

    #[tokio::test]
    async fn test_root_is_always_valid() {
        let f = fixture();
        let candidate = PublishCandidate::existing(f.root.clone());
        assert!(validator(&f).is_valid(&candidate).await.unwrap());
    }
}
