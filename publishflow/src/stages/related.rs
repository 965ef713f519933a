//! Source stage for related items.
//!
//! Related items are referenced by the published content but live anywhere
//! in the tree, so consecutive items share no ancestor. Downstream parent
//! validation must treat this stream as a [`StreamTopology::RelatedForest`].
//!
//! [`StreamTopology::RelatedForest`]: crate::stream::StreamTopology::RelatedForest

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use super::base::{StageCore, StageEmitter};
use crate::cancellation::{CancellationController, CancellationToken};
use crate::candidate::{CandidateValidationContext, NodeId, PublishCandidate};
use crate::errors::PipelineError;
use crate::events::EventSink;
use crate::repository::{CandidateSource, PublishRule};
use crate::stream::{Observable, Subscriber, Subscription};

/// Default stage name used in diagnostics.
pub const RELATED_NODES_STAGE: &str = "related-nodes";

/// Emits a fixed list of nodes, once each, in the given order.
pub struct RelatedNodesSourceStage {
    core: StageCore,
    source: Arc<dyn CandidateSource>,
    ids: Vec<NodeId>,
    rule: Arc<dyn PublishRule>,
}

impl RelatedNodesSourceStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(
        source: Arc<dyn CandidateSource>,
        ids: Vec<NodeId>,
        rule: Arc<dyn PublishRule>,
        controller: CancellationController,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            core: StageCore::new(RELATED_NODES_STAGE, controller, sink),
            source,
            ids,
            rule,
        }
    }

    async fn emit_all(&self, emitter: &mut StageEmitter<'_>) -> Result<(), PipelineError> {
        let mut seen = HashSet::with_capacity(self.ids.len());

        for &id in &self.ids {
            emitter.check_cancelled()?;
            if !seen.insert(id) {
                continue;
            }

            match self.source.node(id).await? {
                Some(node) if self.rule.is_publishable(&node) => {
                    emitter
                        .emit(CandidateValidationContext::valid(PublishCandidate::existing(node)))
                        .await?;
                }
                _ => emitter.emit_invalid(id).await?,
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for RelatedNodesSourceStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelatedNodesSourceStage")
            .field("core", &self.core)
            .field("ids", &self.ids.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Observable<CandidateValidationContext> for RelatedNodesSourceStage {
    fn name(&self) -> &str {
        self.core.name()
    }

    async fn subscribe(
        &self,
        subscriber: &mut dyn Subscriber<CandidateValidationContext>,
        cancel: &CancellationToken,
    ) -> Result<Subscription, PipelineError> {
        let mut emitter = self.core.emitter(subscriber, cancel);

        match self.emit_all(&mut emitter).await {
            Ok(()) => emitter.completed().await,
            Err(e) => emitter.fail(e, None).await?,
        }
        Ok(emitter.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{ContentNode, TemplateId};
    use crate::events::NoOpEventSink;
    use crate::repository::PublishAll;
    use crate::testing::{InMemoryContentTree, RecordingSubscriber};
    use pretty_assertions::assert_eq;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_missing_and_rejected_nodes_are_invalid() {
        let template = TemplateId::new();
        let hidden = TemplateId::new();
        let content = ContentNode::root("content", template);
        let logo = ContentNode::child_of(&content, "logo", template);
        let draft = ContentNode::child_of(&content, "draft", hidden);
        let missing = NodeId::new();
        let tree = Arc::new(InMemoryContentTree::with_nodes([&content, &logo, &draft]));
        let rule: Arc<dyn PublishRule> =
            Arc::new(move |node: &ContentNode| node.template_id != hidden);
        let controller = CancellationController::new();
        let stage = RelatedNodesSourceStage::new(
            tree,
            vec![logo.id, missing, draft.id, logo.id],
            rule,
            controller.clone(),
            Arc::new(NoOpEventSink),
        );
        let mut recorder = RecordingSubscriber::new();

        assert_ok!(stage.subscribe(&mut recorder, &controller.token()).await);

        assert_eq!(
            recorder.items(),
            vec![
                CandidateValidationContext::valid(PublishCandidate::existing(logo.clone())),
                CandidateValidationContext::invalid(missing),
                CandidateValidationContext::invalid(draft.id),
            ]
        );
        assert!(recorder.terminated_cleanly());
    }

    #[tokio::test]
    async fn test_lookup_failure_is_a_fault() {
        let tree = Arc::new(InMemoryContentTree::new());
        tree.fail_with("tree unavailable");
        let controller = CancellationController::new();
        let stage = RelatedNodesSourceStage::new(
            tree,
            vec![NodeId::new()],
            Arc::new(PublishAll),
            controller.clone(),
            Arc::new(NoOpEventSink),
        );
        let mut recorder = RecordingSubscriber::new();

        let result = stage.subscribe(&mut recorder, &controller.token()).await;

        assert!(matches!(result, Err(PipelineError::Repository(_))));
        assert_eq!(recorder.error_count(), 1);
        assert!(controller.is_cancelled());
    }
}
