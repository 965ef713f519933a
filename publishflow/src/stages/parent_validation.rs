//! Parent-validity stage.
//!
//! A candidate may only reach the target if its ancestor is acceptable there.
//! Checking the ancestor of every candidate is wasteful when the stream walks
//! one subtree, so the first valid candidate of a subscription becomes the
//! anchor: its validator answer gates every later candidate. Streams that
//! interleave unrelated subtrees re-check the anchor on every item.

use async_trait::async_trait;
use std::sync::Arc;

use super::base::{StageCore, StageEmitter};
use crate::cancellation::{CancellationController, CancellationToken};
use crate::candidate::{CandidateValidationContext, NodeId};
use crate::errors::PipelineError;
use crate::events::{self, EventSink};
use crate::stream::{CandidateStream, Observable, StreamTopology, Subscriber, Subscription};
use crate::validators::CandidateTargetValidator;

/// Default stage name used in diagnostics.
pub const PARENT_VALIDATION_STAGE: &str = "parent-validation";

/// Suppresses candidates whose anchor is not valid on the target.
pub struct ParentValidationStage {
    core: StageCore,
    upstream: CandidateStream,
    validator: Arc<dyn CandidateTargetValidator>,
    topology: StreamTopology,
}

impl ParentValidationStage {
    /// Creates the stage.
    ///
    /// `topology` must be [`StreamTopology::RelatedForest`] when consecutive
    /// upstream items can belong to unrelated subtrees.
    #[must_use]
    pub fn new(
        upstream: CandidateStream,
        validator: Arc<dyn CandidateTargetValidator>,
        topology: StreamTopology,
        controller: CancellationController,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            core: StageCore::new(PARENT_VALIDATION_STAGE, controller, sink),
            upstream,
            validator,
            topology,
        }
    }
}

impl std::fmt::Debug for ParentValidationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParentValidationStage")
            .field("core", &self.core)
            .field("upstream", &self.upstream.name())
            .field("topology", &self.topology)
            .finish_non_exhaustive()
    }
}

/// Anchor state of one subscription.
#[derive(Debug, Default, Clone, Copy)]
struct Anchor {
    validated: bool,
    valid: bool,
}

struct ParentValidationHandler<'a> {
    stage: &'a ParentValidationStage,
    emitter: StageEmitter<'a>,
    anchor: Anchor,
    suppressed: usize,
}

impl ParentValidationHandler<'_> {
    async fn process(&mut self, ctx: CandidateValidationContext) -> Result<(), PipelineError> {
        self.emitter.check_cancelled()?;

        if !self.anchor.validated || self.stage.topology == StreamTopology::RelatedForest {
            if let Some(candidate) = ctx.as_valid() {
                let answer = self.stage.validator.is_valid(candidate).await;
                let valid = answer.map_err(|e| self.validation_fault(e, ctx.id()))?;
                self.anchor.valid = valid;
                self.anchor.validated = true;
            } else {
                // Nothing to validate; the anchor stays open for the next
                // valid candidate.
                self.anchor.valid = false;
            }
        }

        if self.anchor.valid || !ctx.is_valid() {
            self.emitter.emit(ctx).await
        } else {
            let id = ctx.id();
            self.suppressed += 1;
            let data = serde_json::json!({
                "stage": self.stage.core.name(),
                "node": id.to_string(),
            });
            let sink = self.stage.core.sink();
            sink.try_emit(events::CANDIDATE_SUPPRESSED, Some(data));
            self.emitter.emit_invalid(id).await
        }
    }

    fn validation_fault(&self, error: PipelineError, id: NodeId) -> PipelineError {
        if error.is_cancellation() {
            error
        } else {
            PipelineError::validator(self.stage.core.name(), id, error)
        }
    }
}

#[async_trait]
impl Subscriber<CandidateValidationContext> for ParentValidationHandler<'_> {
    async fn on_item(&mut self, ctx: CandidateValidationContext) -> Result<(), PipelineError> {
        if self.emitter.is_terminal() {
            return Ok(());
        }

        let id = ctx.id();
        match self.process(ctx).await {
            Ok(()) => Ok(()),
            Err(e) => self.emitter.fail(e, Some(id)).await,
        }
    }

    async fn on_error(&mut self, error: PipelineError) {
        self.emitter.upstream_errored(error).await;
    }

    async fn on_completed(&mut self) {
        tracing::debug!(
            stage = %self.stage.core.name(),
            suppressed = self.suppressed,
            "Upstream completed"
        );
        self.emitter.completed().await;
    }
}

#[async_trait]
impl Observable<CandidateValidationContext> for ParentValidationStage {
    fn name(&self) -> &str {
        self.core.name()
    }

    async fn subscribe(
        &self,
        subscriber: &mut dyn Subscriber<CandidateValidationContext>,
        cancel: &CancellationToken,
    ) -> Result<Subscription, PipelineError> {
        let mut handler = ParentValidationHandler {
            stage: self,
            emitter: self.core.emitter(subscriber, cancel),
            anchor: Anchor::default(),
            suppressed: 0,
        };

        let upstream_token = self.core.controller().token();
        self.upstream
            .subscribe(&mut handler, &upstream_token)
            .await?;
        Ok(handler.emitter.finish())
    }
}
