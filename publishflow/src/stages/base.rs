//! Contract shared by every pipeline stage.
//!
//! A stage owns a [`StageCore`] (its name, the run's cancellation controller
//! and the diagnostic sink) and creates one [`StageEmitter`] per
//! subscription. The emitter is the only way a stage talks to its downstream
//! subscriber.

use crate::cancellation::{CancellationController, CancellationToken};
use crate::candidate::{CandidateValidationContext, NodeId};
use crate::errors::PipelineError;
use crate::events::{self, EventSink};
use crate::stream::{Subscriber, Subscription, Termination};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Name, cancellation controller and diagnostic sink of one stage.
#[derive(Clone)]
pub struct StageCore {
    name: String,
    controller: CancellationController,
    sink: Arc<dyn EventSink>,
}

impl StageCore {
    /// Creates a new stage core.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        controller: CancellationController,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            name: name.into(),
            controller,
            sink,
        }
    }

    /// Returns the stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the shared cancellation controller.
    #[must_use]
    pub const fn controller(&self) -> &CancellationController {
        &self.controller
    }

    /// Returns the diagnostic sink.
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    /// Starts a subscription towards `downstream`.
    pub fn emitter<'a>(
        &'a self,
        downstream: &'a mut dyn Subscriber<CandidateValidationContext>,
        cancel: &CancellationToken,
    ) -> StageEmitter<'a> {
        StageEmitter {
            core: self,
            downstream,
            cancel: cancel.clone(),
            termination: None,
            downstream_failed: false,
            valid: 0,
            invalid: 0,
        }
    }
}

impl std::fmt::Debug for StageCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageCore")
            .field("name", &self.name)
            .field("controller", &self.controller)
            .finish_non_exhaustive()
    }
}

/// Per-subscription output side of a stage.
///
/// Every primitive is a no-op once the subscription is terminal, so a fault
/// path racing with normal completion cannot produce a second terminal event.
pub struct StageEmitter<'a> {
    core: &'a StageCore,
    downstream: &'a mut dyn Subscriber<CandidateValidationContext>,
    cancel: CancellationToken,
    termination: Option<Termination>,
    downstream_failed: bool,
    valid: usize,
    invalid: usize,
}

impl<'a> StageEmitter<'a> {
    /// Returns the owning stage.
    #[must_use]
    pub const fn core(&self) -> &'a StageCore {
        self.core
    }

    /// Returns true if either the run's controller or the subscription's
    /// token has been triggered.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.core.controller.is_cancelled() || self.cancel.is_cancelled()
    }

    /// Fails with a cancellation error if the signal has been observed.
    pub fn check_cancelled(&self) -> Result<(), PipelineError> {
        self.core.controller.token().check(&self.core.name)?;
        self.cancel.check(&self.core.name)
    }

    /// Returns true once no further item or terminal event may be delivered.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.termination.is_some() || self.downstream_failed
    }

    /// Forwards a context downstream unchanged.
    pub async fn emit(&mut self, ctx: CandidateValidationContext) -> Result<(), PipelineError> {
        if self.is_terminal() {
            return Ok(());
        }
        self.check_cancelled()?;

        let valid = ctx.is_valid();
        if let Err(e) = self.downstream.on_item(ctx).await {
            // The downstream subscriber has already terminated itself.
            self.downstream_failed = true;
            return Err(e);
        }

        if valid {
            self.valid += 1;
        } else {
            self.invalid += 1;
        }
        Ok(())
    }

    /// Emits an invalid marker for `id`.
    pub async fn emit_invalid(&mut self, id: NodeId) -> Result<(), PipelineError> {
        self.emit(CandidateValidationContext::invalid(id)).await
    }

    /// Signals the normal end of the stream.
    pub async fn completed(&mut self) {
        if self.is_terminal() {
            return;
        }

        let termination = if self.is_cancelled() {
            Termination::Cancelled
        } else {
            Termination::Completed
        };
        self.termination = Some(termination);

        debug!(
            stage = %self.core.name,
            valid = self.valid,
            invalid = self.invalid,
            termination = %termination,
            "Stage finished"
        );
        let event_type = if termination == Termination::Cancelled {
            events::STAGE_CANCELLED
        } else {
            events::STAGE_COMPLETED
        };
        self.core.sink.try_emit(
            event_type,
            Some(json!({
                "stage": self.core.name,
                "valid": self.valid,
                "invalid": self.invalid,
            })),
        );

        self.downstream.on_completed().await;
    }

    /// Signals the abnormal end of the stream.
    pub async fn errored(&mut self, error: PipelineError) {
        self.deliver_error(error, None).await;
    }

    async fn deliver_error(&mut self, error: PipelineError, node: Option<NodeId>) {
        if self.is_terminal() {
            return;
        }
        self.termination = Some(Termination::Errored);

        let mut data = error.to_event_data();
        data["stage"] = json!(self.core.name);
        data["valid"] = json!(self.valid);
        data["invalid"] = json!(self.invalid);
        if let Some(node) = node {
            data["node"] = json!(node.to_string());
        }
        self.core.sink.try_emit(events::STAGE_ERRORED, Some(data));

        self.downstream.on_error(error).await;
    }

    /// Forwards an upstream error verbatim and triggers the shared controller.
    pub async fn upstream_errored(&mut self, error: PipelineError) {
        self.core
            .controller
            .cancel(format!("upstream of {} failed: {error}", self.core.name));
        self.errored(error).await;
    }

    /// Applies the stage fault policy to `error`.
    ///
    /// A cancellation observed while the signal is set completes the stream
    /// and returns `Ok`. Any other error is delivered downstream, triggers the
    /// shared controller and is returned for the fault channel. `node` is the
    /// node being processed when the error surfaced, if known.
    pub async fn fail(
        &mut self,
        error: PipelineError,
        node: Option<NodeId>,
    ) -> Result<(), PipelineError> {
        if error.is_cancellation() && self.is_cancelled() {
            trace!(stage = %self.core.name, "{} cancelled.", self.core.name);
            self.completed().await;
            return Ok(());
        }

        if self.downstream_failed {
            self.core
                .controller
                .cancel(format!("downstream of {} failed: {error}", self.core.name));
            return Err(error);
        }

        error!(
            stage = %self.core.name,
            node = node.map(tracing::field::display),
            error = %error,
            "Error in the {}", self.core.name
        );

        self.deliver_error(error.clone(), node).await;
        self.core
            .controller
            .cancel(format!("{} failed: {error}", self.core.name));
        Err(error)
    }

    /// Closes the subscription and returns its summary.
    #[must_use]
    pub fn finish(self) -> Subscription {
        Subscription {
            stage: self.core.name.clone(),
            valid: self.valid,
            invalid: self.invalid,
            termination: self.termination,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{ContentNode, PublishCandidate, TemplateId};
    use crate::events::CollectingEventSink;
    use crate::testing::{RecordingSubscriber, StreamEvent};
    use tokio_test::{assert_err, assert_ok};

    fn core(controller: &CancellationController, sink: Arc<CollectingEventSink>) -> StageCore {
        StageCore::new("test-stage", controller.clone(), sink)
    }

    fn valid_ctx() -> CandidateValidationContext {
        CandidateValidationContext::valid(PublishCandidate::existing(ContentNode::root(
            "home",
            TemplateId::new(),
        )))
    }

    #[tokio::test]
    async fn test_emit_and_complete() {
        let controller = CancellationController::new();
        let sink = Arc::new(CollectingEventSink::new());
        let core = core(&controller, sink.clone());
        let mut recorder = RecordingSubscriber::new();
        let token = controller.token();

        let mut emitter = core.emitter(&mut recorder, &token);
        let ctx = valid_ctx();
        let id = NodeId::new();
        emitter.emit(ctx.clone()).await.unwrap();
        emitter.emit_invalid(id).await.unwrap();
        emitter.completed().await;
        let summary = emitter.finish();

        assert_eq!(summary.valid, 1);
        assert_eq!(summary.invalid, 1);
        assert_eq!(summary.termination, Some(Termination::Completed));
        assert_eq!(
            recorder.events(),
            &[
                StreamEvent::Item(ctx),
                StreamEvent::Item(CandidateValidationContext::invalid(id)),
                StreamEvent::Completed,
            ]
        );
        assert_eq!(sink.events_of_type(events::STAGE_COMPLETED).len(), 1);
    }

    #[tokio::test]
    async fn test_post_terminal_calls_are_noops() {
        let controller = CancellationController::new();
        let core = core(&controller, Arc::new(CollectingEventSink::new()));
        let mut recorder = RecordingSubscriber::new();
        let token = controller.token();

        let mut emitter = core.emitter(&mut recorder, &token);
        emitter.errored(PipelineError::repository("boom")).await;
        emitter.completed().await;
        emitter.errored(PipelineError::repository("again")).await;
        emitter.emit(valid_ctx()).await.unwrap();
        let summary = emitter.finish();

        assert_eq!(summary.termination, Some(Termination::Errored));
        assert_eq!(summary.delivered(), 0);
        assert_eq!(recorder.error_count(), 1);
        assert_eq!(recorder.completion_count(), 0);
    }

    #[tokio::test]
    async fn test_emit_after_cancel_fails_with_cancellation() {
        let controller = CancellationController::new();
        let core = core(&controller, Arc::new(CollectingEventSink::new()));
        let mut recorder = RecordingSubscriber::new();
        let token = controller.token();

        let mut emitter = core.emitter(&mut recorder, &token);
        controller.cancel("job aborted");
        let err = emitter.emit(valid_ctx()).await.unwrap_err();
        assert!(err.is_cancellation());

        emitter.fail(err, None).await.unwrap();
        let summary = emitter.finish();

        assert_eq!(summary.termination, Some(Termination::Cancelled));
        assert!(recorder.items().is_empty());
        assert_eq!(recorder.completion_count(), 1);
    }

    #[tokio::test]
    async fn test_fail_triggers_controller_once() {
        let controller = CancellationController::new();
        let sink = Arc::new(CollectingEventSink::new());
        let core = core(&controller, sink.clone());
        let mut recorder = RecordingSubscriber::new();
        let token = controller.token();

        let mut emitter = core.emitter(&mut recorder, &token);
        let node = NodeId::new();
        let err = emitter
            .fail(PipelineError::repository("index offline"), Some(node))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Repository(_)));
        assert!(controller.is_cancelled());
        assert_eq!(recorder.error_count(), 1);
        let errored = sink.events_of_type(events::STAGE_ERRORED);
        assert_eq!(errored.len(), 1);
        let data = errored[0].clone().unwrap();
        assert_eq!(data["node"], json!(node.to_string()));
    }

    #[tokio::test]
    async fn test_check_cancelled_carries_controller_reason() {
        let controller = CancellationController::new();
        let core = core(&controller, Arc::new(CollectingEventSink::new()));
        let mut recorder = RecordingSubscriber::new();
        let token = controller.token();

        let emitter = core.emitter(&mut recorder, &token);
        assert_ok!(emitter.check_cancelled());
        controller.cancel("job aborted");
        let err = assert_err!(emitter.check_cancelled());

        assert!(err.is_cancellation());
        assert!(err.to_string().contains("job aborted"));
    }

    #[tokio::test]
    async fn test_check_cancelled_observes_subscription_token() {
        let controller = CancellationController::new();
        let core = core(&controller, Arc::new(CollectingEventSink::new()));
        let mut recorder = RecordingSubscriber::new();
        let caller = CancellationController::new();
        let token = caller.token();

        let emitter = core.emitter(&mut recorder, &token);
        caller.cancel("caller gave up");

        assert!(emitter.is_cancelled());
        assert!(assert_err!(emitter.check_cancelled()).is_cancellation());
        assert!(!controller.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancellation_error_without_signal_is_a_fault() {
        let controller = CancellationController::new();
        let core = core(&controller, Arc::new(CollectingEventSink::new()));
        let mut recorder = RecordingSubscriber::new();
        let token = controller.token();

        let mut emitter = core.emitter(&mut recorder, &token);
        let result = emitter
            .fail(PipelineError::cancelled("validator", "foreign token"), None)
            .await;

        assert!(result.is_err());
        assert!(controller.is_cancelled());
        assert_eq!(recorder.error_count(), 1);
    }

    #[tokio::test]
    async fn test_downstream_failure_marks_terminal() {
        let controller = CancellationController::new();
        let core = core(&controller, Arc::new(CollectingEventSink::new()));
        let mut recorder = RecordingSubscriber::new().failing_on_item(0);
        let token = controller.token();

        let mut emitter = core.emitter(&mut recorder, &token);
        let err = emitter.emit(valid_ctx()).await.unwrap_err();
        assert!(emitter.is_terminal());

        // No second error event goes to a subscriber that already failed.
        assert!(emitter.fail(err, None).await.is_err());
        assert_eq!(emitter.finish().termination, None);
        assert_eq!(recorder.error_count(), 0);
        assert!(controller.is_cancelled());
    }
}
