//! A subscriber recording what a stage delivers.

use async_trait::async_trait;

use crate::cancellation::CancellationController;
use crate::candidate::{CandidateValidationContext, NodeId};
use crate::errors::PipelineError;
use crate::stream::Subscriber;

/// One delivery observed by a [`RecordingSubscriber`].
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// An item.
    Item(CandidateValidationContext),
    /// The error terminal event.
    Error(PipelineError),
    /// The completion terminal event.
    Completed,
}

impl PartialEq for StreamEvent {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Item(a), Self::Item(b)) => a == b,
            (Self::Error(a), Self::Error(b)) => a.to_string() == b.to_string(),
            (Self::Completed, Self::Completed) => true,
            _ => false,
        }
    }
}

/// Records every item and terminal event it receives.
#[derive(Debug, Default)]
pub struct RecordingSubscriber {
    events: Vec<StreamEvent>,
    received: usize,
    fail_on_item: Option<usize>,
    cancel_after: Option<(usize, CancellationController)>,
}

impl RecordingSubscriber {
    /// Creates a recorder accepting everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects the item at zero-based position `index`.
    #[must_use]
    pub const fn failing_on_item(mut self, index: usize) -> Self {
        self.fail_on_item = Some(index);
        self
    }

    /// Triggers `controller` once `count` items have been recorded.
    #[must_use]
    pub fn cancelling_after(mut self, count: usize, controller: CancellationController) -> Self {
        self.cancel_after = Some((count, controller));
        self
    }

    /// Returns everything recorded, in order.
    #[must_use]
    pub fn events(&self) -> &[StreamEvent] {
        &self.events
    }

    /// Returns the recorded items.
    #[must_use]
    pub fn items(&self) -> Vec<CandidateValidationContext> {
        self.events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Item(ctx) => Some(ctx.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the ids of recorded valid items.
    #[must_use]
    pub fn valid_ids(&self) -> Vec<NodeId> {
        self.items()
            .iter()
            .filter(|ctx| ctx.is_valid())
            .map(CandidateValidationContext::id)
            .collect()
    }

    /// Returns the ids of recorded invalid items.
    #[must_use]
    pub fn invalid_ids(&self) -> Vec<NodeId> {
        self.items()
            .iter()
            .filter(|ctx| !ctx.is_valid())
            .map(CandidateValidationContext::id)
            .collect()
    }

    /// Returns the recorded errors.
    #[must_use]
    pub fn errors(&self) -> Vec<PipelineError> {
        self.events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Error(err) => Some(err.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of error events.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.errors().len()
    }

    /// Number of completion events.
    #[must_use]
    pub fn completion_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, StreamEvent::Completed))
            .count()
    }

    /// Returns true if exactly one terminal event was recorded and nothing
    /// followed it.
    #[must_use]
    pub fn terminated_cleanly(&self) -> bool {
        let terminal = self.error_count() + self.completion_count();
        terminal == 1
            && matches!(
                self.events.last(),
                Some(StreamEvent::Completed | StreamEvent::Error(_))
            )
    }
}

#[async_trait]
impl Subscriber<CandidateValidationContext> for RecordingSubscriber {
    async fn on_item(&mut self, item: CandidateValidationContext) -> Result<(), PipelineError> {
        let index = self.received;
        self.received += 1;

        if self.fail_on_item == Some(index) {
            return Err(PipelineError::stage("recorder", format!("rejected item {}", item.id())));
        }

        self.events.push(StreamEvent::Item(item));

        if let Some((count, controller)) = &self.cancel_after {
            if self.received == *count {
                controller.cancel("recorder cancelled the run");
            }
        }
        Ok(())
    }

    async fn on_error(&mut self, error: PipelineError) {
        self.events.push(StreamEvent::Error(error));
    }

    async fn on_completed(&mut self) {
        self.events.push(StreamEvent::Completed);
    }
}
