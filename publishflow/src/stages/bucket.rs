//! Bucket expansion.
//!
//! Items stored in buckets live under generated container folders that do
//! not exist on the target until something inside them is published. When a
//! publish starts from inside a bucket, the containers between the start node
//! and the first real ancestor are emitted ahead of the subtree so the target
//! receives them first.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use super::base::{StageCore, StageEmitter};
use crate::cancellation::{CancellationController, CancellationToken};
use crate::candidate::{
    CandidateValidationContext, ContentNode, NodeId, PublishCandidate, TemplateId,
};
use crate::errors::PipelineError;
use crate::events::EventSink;
use crate::repository::CandidateSource;
use crate::stream::{CandidateStream, Observable, Subscriber, Subscription};

/// Default stage name used in diagnostics.
pub const BUCKET_EXPANSION_STAGE: &str = "bucket-expansion";

/// Prepends the bucket containers above the start node to an upstream.
pub struct BucketExpansionStage {
    core: StageCore,
    upstream: CandidateStream,
    source: Arc<dyn CandidateSource>,
    start: ContentNode,
    bucket_template: TemplateId,
}

impl BucketExpansionStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(
        upstream: CandidateStream,
        source: Arc<dyn CandidateSource>,
        start: ContentNode,
        bucket_template: TemplateId,
        controller: CancellationController,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            core: StageCore::new(BUCKET_EXPANSION_STAGE, controller, sink),
            upstream,
            source,
            start,
            bucket_template,
        }
    }

    /// Returns the containers above the start node, outermost first.
    async fn containers(&self) -> Result<Vec<ContentNode>, PipelineError> {
        let mut containers = Vec::new();
        let mut next = self.start.parent_id();

        while let Some(id) = next {
            match self.source.node(id).await? {
                Some(node) if node.template_id == self.bucket_template => {
                    next = node.parent_id();
                    containers.push(node);
                }
                _ => break,
            }
        }

        containers.reverse();
        Ok(containers)
    }

    async fn emit_containers(
        &self,
        emitter: &mut StageEmitter<'_>,
        expanded: &mut HashSet<NodeId>,
    ) -> Result<(), PipelineError> {
        let containers = self.containers().await?;
        debug!(
            stage = %self.core.name(),
            start = %self.start.id,
            containers = containers.len(),
            "Expanding bucket"
        );

        for node in containers {
            emitter.check_cancelled()?;
            expanded.insert(node.id);
            emitter
                .emit(CandidateValidationContext::valid(PublishCandidate::existing(node)))
                .await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for BucketExpansionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketExpansionStage")
            .field("core", &self.core)
            .field("upstream", &self.upstream.name())
            .field("start", &self.start.id)
            .field("bucket_template", &self.bucket_template)
            .finish_non_exhaustive()
    }
}

struct BucketHandler<'a> {
    emitter: StageEmitter<'a>,
    expanded: HashSet<NodeId>,
}

#[async_trait]
impl Subscriber<CandidateValidationContext> for BucketHandler<'_> {
    async fn on_item(&mut self, ctx: CandidateValidationContext) -> Result<(), PipelineError> {
        if self.emitter.is_terminal() {
            return Ok(());
        }

        let id = ctx.id();
        if self.expanded.contains(&id) {
            return Ok(());
        }
        match self.emitter.emit(ctx).await {
            Ok(()) => Ok(()),
            Err(e) => self.emitter.fail(e, Some(id)).await,
        }
    }

    async fn on_error(&mut self, error: PipelineError) {
        self.emitter.upstream_errored(error).await;
    }

    async fn on_completed(&mut self) {
        self.emitter.completed().await;
    }
}

#[async_trait]
impl Observable<CandidateValidationContext> for BucketExpansionStage {
    fn name(&self) -> &str {
        self.core.name()
    }

    async fn subscribe(
        &self,
        subscriber: &mut dyn Subscriber<CandidateValidationContext>,
        cancel: &CancellationToken,
    ) -> Result<Subscription, PipelineError> {
        let mut emitter = self.core.emitter(subscriber, cancel);
        let mut expanded = HashSet::new();

        if let Err(e) = self.emit_containers(&mut emitter, &mut expanded).await {
            emitter.fail(e, None).await?;
            return Ok(emitter.finish());
        }

        let mut handler = BucketHandler { emitter, expanded };
        let upstream_token = self.core.controller().token();
        self.upstream
            .subscribe(&mut handler, &upstream_token)
            .await?;
        Ok(handler.emitter.finish())
    }
}
