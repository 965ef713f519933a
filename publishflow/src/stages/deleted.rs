//! Deleted-node injection.
//!
//! Nodes deleted from the source since their last publish are no longer
//! reachable by a tree walk, but the target still holds them. This stage
//! replays the publisher's operation log once upstream completes and appends
//! a synthetic deleted candidate for every such node.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use super::base::{StageCore, StageEmitter};
use crate::cancellation::{CancellationController, CancellationToken};
use crate::candidate::{CandidateValidationContext, NodeId, PublishCandidate};
use crate::errors::PipelineError;
use crate::events::EventSink;
use crate::repository::{
    OperationKind, OperationQuery, PublisherOperation, PublisherOperationSource,
};
use crate::stream::{CandidateStream, Observable, Subscriber, Subscription};

/// Default stage name used in diagnostics.
pub const DELETED_NODES_STAGE: &str = "deleted-nodes";

/// Decides whether a recorded deletion belongs to the published subtree.
pub type OperationFilter = Arc<dyn Fn(&PublisherOperation) -> bool + Send + Sync>;

/// Appends deleted candidates to an upstream once it completes.
pub struct DeletedNodesStage {
    core: StageCore,
    upstream: CandidateStream,
    operations: Arc<dyn PublisherOperationSource>,
    query: OperationQuery,
    batch_size: usize,
    filter: OperationFilter,
}

impl DeletedNodesStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(
        upstream: CandidateStream,
        operations: Arc<dyn PublisherOperationSource>,
        query: OperationQuery,
        batch_size: usize,
        filter: OperationFilter,
        controller: CancellationController,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            core: StageCore::new(DELETED_NODES_STAGE, controller, sink),
            upstream,
            operations,
            query,
            batch_size: batch_size.max(1),
            filter,
        }
    }

    /// Returns the operation query.
    #[must_use]
    pub const fn query(&self) -> &OperationQuery {
        &self.query
    }
}

impl std::fmt::Debug for DeletedNodesStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeletedNodesStage")
            .field("core", &self.core)
            .field("upstream", &self.upstream.name())
            .field("query", &self.query)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

struct DeletedNodesHandler<'a> {
    stage: &'a DeletedNodesStage,
    emitter: StageEmitter<'a>,
    seen: HashSet<NodeId>,
    fault: Option<PipelineError>,
}

impl DeletedNodesHandler<'_> {
    async fn inject(&mut self) -> Result<usize, PipelineError> {
        let stage = self.stage;
        let mut injected = 0;
        let mut offset = 0;

        loop {
            self.emitter.check_cancelled()?;
            let page = stage
                .operations
                .operations(&stage.query, offset, stage.batch_size)
                .await?;
            let fetched = page.len();

            for op in page {
                if op.kind != OperationKind::Deleted || !(stage.filter)(&op) {
                    continue;
                }
                if !self.seen.insert(op.node_id) {
                    continue;
                }
                let candidate = PublishCandidate::deleted(op.to_node());
                self.emitter
                    .emit(CandidateValidationContext::valid(candidate))
                    .await?;
                injected += 1;
            }

            if fetched < stage.batch_size {
                return Ok(injected);
            }
            offset += fetched;
        }
    }
}

#[async_trait]
impl Subscriber<CandidateValidationContext> for DeletedNodesHandler<'_> {
    async fn on_item(&mut self, ctx: CandidateValidationContext) -> Result<(), PipelineError> {
        if self.emitter.is_terminal() {
            return Ok(());
        }

        let id = ctx.id();
        self.seen.insert(id);
        match self.emitter.emit(ctx).await {
            Ok(()) => Ok(()),
            Err(e) => self.emitter.fail(e, Some(id)).await,
        }
    }

    async fn on_error(&mut self, error: PipelineError) {
        self.emitter.upstream_errored(error).await;
    }

    async fn on_completed(&mut self) {
        if self.emitter.is_terminal() {
            return;
        }
        // Upstream stopped early; the walk is incomplete so nothing can be
        // inferred about deletions.
        if self.emitter.is_cancelled() {
            self.emitter.completed().await;
            return;
        }

        match self.inject().await {
            Ok(injected) => {
                debug!(
                    stage = %self.stage.core.name(),
                    injected,
                    "Injected deleted nodes"
                );
                self.emitter.completed().await;
            }
            Err(e) => {
                if let Err(fault) = self.emitter.fail(e, None).await {
                    self.fault = Some(fault);
                }
            }
        }
    }
}

#[async_trait]
impl Observable<CandidateValidationContext> for DeletedNodesStage {
    fn name(&self) -> &str {
        self.core.name()
    }

    async fn subscribe(
        &self,
        subscriber: &mut dyn Subscriber<CandidateValidationContext>,
        cancel: &CancellationToken,
    ) -> Result<Subscription, PipelineError> {
        let mut handler = DeletedNodesHandler {
            stage: self,
            emitter: self.core.emitter(subscriber, cancel),
            seen: HashSet::new(),
            fault: None,
        };

        let upstream_token = self.core.controller().token();
        self.upstream
            .subscribe(&mut handler, &upstream_token)
            .await?;
        // The completion callback has no fault channel of its own.
        if let Some(fault) = handler.fault {
            return Err(fault);
        }
        Ok(handler.emitter.finish())
    }
}
