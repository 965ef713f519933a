//! Source stage walking a subtree of the source content tree.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;

use super::base::{StageCore, StageEmitter};
use crate::cancellation::{CancellationController, CancellationToken};
use crate::candidate::{CandidateValidationContext, ContentNode, NodeId, PublishCandidate};
use crate::errors::PipelineError;
use crate::events::EventSink;
use crate::repository::{CandidateSource, PublishRule};
use crate::stream::{Observable, Subscriber, Subscription};

/// Default stage name used in diagnostics.
pub const TREE_SOURCE_STAGE: &str = "tree-source";

/// Emits the start node and, optionally, its descendants in breadth-first
/// order.
///
/// Children are read from the source in pages of `batch_size`. A node the
/// publish rule rejects is emitted as an invalid marker, and so is every node
/// below it.
pub struct TreeSourceStage {
    core: StageCore,
    source: Arc<dyn CandidateSource>,
    start: ContentNode,
    rule: Arc<dyn PublishRule>,
    descendants: bool,
    batch_size: usize,
}

impl TreeSourceStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(
        source: Arc<dyn CandidateSource>,
        start: ContentNode,
        rule: Arc<dyn PublishRule>,
        descendants: bool,
        batch_size: usize,
        controller: CancellationController,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            core: StageCore::new(TREE_SOURCE_STAGE, controller, sink),
            source,
            start,
            rule,
            descendants,
            batch_size: batch_size.max(1),
        }
    }

    /// Returns the node the walk starts from.
    #[must_use]
    pub const fn start(&self) -> &ContentNode {
        &self.start
    }

    /// Walks the subtree, leaving the node being processed in `current` so a
    /// failed children read can be attributed to it.
    async fn walk(
        &self,
        emitter: &mut StageEmitter<'_>,
        current: &mut Option<NodeId>,
    ) -> Result<(), PipelineError> {
        let mut pending = VecDeque::from([(self.start.clone(), true)]);

        while let Some((node, parent_publishable)) = pending.pop_front() {
            emitter.check_cancelled()?;

            let id = node.id;
            *current = Some(id);
            let publishable = parent_publishable && self.rule.is_publishable(&node);
            if publishable {
                emitter
                    .emit(CandidateValidationContext::valid(PublishCandidate::existing(node)))
                    .await?;
            } else {
                emitter.emit_invalid(id).await?;
            }

            if !self.descendants {
                break;
            }

            let mut offset = 0;
            loop {
                emitter.check_cancelled()?;
                let page = self.source.children(id, offset, self.batch_size).await?;
                let fetched = page.len();
                pending.extend(page.into_iter().map(|child| (child, publishable)));
                if fetched < self.batch_size {
                    break;
                }
                offset += fetched;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for TreeSourceStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeSourceStage")
            .field("core", &self.core)
            .field("start", &self.start.id)
            .field("descendants", &self.descendants)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Observable<CandidateValidationContext> for TreeSourceStage {
    fn name(&self) -> &str {
        self.core.name()
    }

    async fn subscribe(
        &self,
        subscriber: &mut dyn Subscriber<CandidateValidationContext>,
        cancel: &CancellationToken,
    ) -> Result<Subscription, PipelineError> {
        let mut emitter = self.core.emitter(subscriber, cancel);
        let mut current = None;

        match self.walk(&mut emitter, &mut current).await {
            Ok(()) => emitter.completed().await,
            Err(e) => emitter.fail(e, current).await?,
        }
        Ok(emitter.finish())
    }
}
