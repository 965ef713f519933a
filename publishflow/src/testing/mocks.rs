//! Scripted streams and validators for testing stages in isolation.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::cancellation::{CancellationController, CancellationToken};
use crate::candidate::{CandidateValidationContext, NodeId, PublishCandidate};
use crate::errors::PipelineError;
use crate::stream::{Observable, Subscriber, Subscription, Termination};
use crate::validators::CandidateTargetValidator;

/// An upstream that replays a fixed list of contexts on every subscription,
/// then completes or fails.
#[derive(Debug)]
pub struct StaticStream {
    name: String,
    items: Vec<CandidateValidationContext>,
    error: Option<PipelineError>,
    subscriptions: AtomicUsize,
}

impl StaticStream {
    /// Creates a stream that completes after `items`.
    #[must_use]
    pub fn new(items: Vec<CandidateValidationContext>) -> Self {
        Self {
            name: "static-source".to_string(),
            items,
            error: None,
            subscriptions: AtomicUsize::new(0),
        }
    }

    /// Fails with `error` instead of completing.
    #[must_use]
    pub fn failing_with(mut self, error: PipelineError) -> Self {
        self.error = Some(error);
        self
    }

    /// Number of subscriptions served so far.
    #[must_use]
    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Observable<CandidateValidationContext> for StaticStream {
    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(
        &self,
        subscriber: &mut dyn Subscriber<CandidateValidationContext>,
        cancel: &CancellationToken,
    ) -> Result<Subscription, PipelineError> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let mut summary = Subscription {
            stage: self.name.clone(),
            valid: 0,
            invalid: 0,
            termination: None,
        };

        for item in &self.items {
            if cancel.is_cancelled() {
                subscriber.on_completed().await;
                summary.termination = Some(Termination::Cancelled);
                return Ok(summary);
            }

            let valid = item.is_valid();
            subscriber.on_item(item.clone()).await?;
            if valid {
                summary.valid += 1;
            } else {
                summary.invalid += 1;
            }
        }

        if let Some(error) = &self.error {
            subscriber.on_error(error.clone()).await;
            summary.termination = Some(Termination::Errored);
        } else {
            subscriber.on_completed().await;
            summary.termination = Some(Termination::Completed);
        }
        Ok(summary)
    }
}

/// A validator answering from a script and recording every query.
#[derive(Debug)]
pub struct ScriptedValidator {
    default: bool,
    answers: RwLock<HashMap<NodeId, bool>>,
    failures: RwLock<HashMap<NodeId, PipelineError>>,
    cancel_on: RwLock<Option<(NodeId, CancellationController)>>,
    calls: Mutex<Vec<NodeId>>,
}

impl ScriptedValidator {
    /// Creates a validator answering `default` for every candidate.
    #[must_use]
    pub fn answering(default: bool) -> Self {
        Self {
            default,
            answers: RwLock::new(HashMap::new()),
            failures: RwLock::new(HashMap::new()),
            cancel_on: RwLock::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answers `valid` for `id`.
    #[must_use]
    pub fn with_answer(self, id: NodeId, valid: bool) -> Self {
        self.answers.write().insert(id, valid);
        self
    }

    /// Fails with `error` when queried for `id`.
    #[must_use]
    pub fn with_failure(self, id: NodeId, error: PipelineError) -> Self {
        self.failures.write().insert(id, error);
        self
    }

    /// Triggers `controller` and fails with a cancellation when queried for
    /// `id`, as a validator observing an aborted job would.
    #[must_use]
    pub fn cancelling_on(self, id: NodeId, controller: CancellationController) -> Self {
        *self.cancel_on.write() = Some((id, controller));
        self
    }

    /// Returns the candidates queried so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<NodeId> {
        self.calls.lock().clone()
    }

    /// Returns the number of queries so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl CandidateTargetValidator for ScriptedValidator {
    async fn is_valid(&self, candidate: &PublishCandidate) -> Result<bool, PipelineError> {
        let id = candidate.id();
        self.calls.lock().push(id);

        if let Some((cancel_id, controller)) = self.cancel_on.read().as_ref() {
            if *cancel_id == id {
                controller.cancel("validator observed job abort");
                return Err(PipelineError::cancelled("validator", "job aborted"));
            }
        }
        if let Some(error) = self.failures.read().get(&id) {
            return Err(error.clone());
        }
        let answer = self.answers.read().get(&id).copied();
        Ok(answer.unwrap_or(self.default))
    }
}
