//! Push stream abstraction shared by every stage.
//!
//! A producer drives delivery from inside [`Observable::subscribe`]: the
//! returned future resolves once the subscription reached its terminal
//! state. Exactly one of [`Subscriber::on_error`] and
//! [`Subscriber::on_completed`] fires per subscription, and no item follows
//! it. The `Err` arm of `subscribe` is the fault channel: it carries the
//! failure of a subscriber's `on_item` back to whoever started the run.

use crate::cancellation::CancellationToken;
use crate::candidate::CandidateValidationContext;
use crate::errors::PipelineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Receives the items and the terminal event of one subscription.
#[async_trait]
pub trait Subscriber<T: Send + 'static>: Send {
    /// Handles one item.
    ///
    /// Returning an error tells the producer to stop delivering and to report
    /// the error on its fault channel.
    async fn on_item(&mut self, item: T) -> Result<(), PipelineError>;

    /// The stream ended abnormally.
    async fn on_error(&mut self, error: PipelineError);

    /// The stream ended normally, or was cancelled.
    async fn on_completed(&mut self);
}

/// A stream that can be subscribed to any number of times.
///
/// Every subscription receives the full sequence; there is no shared cursor.
#[async_trait]
pub trait Observable<T: Send + 'static>: Send + Sync {
    /// Returns the name used in diagnostics.
    fn name(&self) -> &str;

    /// Subscribes and drives delivery until the subscription is terminal.
    async fn subscribe(
        &self,
        subscriber: &mut dyn Subscriber<T>,
        cancel: &CancellationToken,
    ) -> Result<Subscription, PipelineError>;
}

/// A shared handle to a stream of candidate contexts.
pub type CandidateStream = Arc<dyn Observable<CandidateValidationContext>>;

/// Whether a stream walks one subtree or interleaves unrelated subtrees.
///
/// Chosen by whoever assembles the pipeline; stages never infer it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamTopology {
    /// Items are one start node and its descendants.
    #[default]
    SingleTree,
    /// Consecutive items may belong to unrelated subtrees.
    RelatedForest,
}

/// How a subscription ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// `on_completed` after the producer ran out of items.
    Completed,
    /// `on_completed` after the shared cancellation signal was observed.
    Cancelled,
    /// `on_error`.
    Errored,
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

/// Summary of one finished subscription, as seen by the stage that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// The producing stage.
    pub stage: String,
    /// Valid contexts delivered downstream.
    pub valid: usize,
    /// Invalid contexts delivered downstream.
    pub invalid: usize,
    /// The terminal event, or `None` if the downstream subscriber failed
    /// before one could be produced.
    pub termination: Option<Termination>,
}

impl Subscription {
    /// Total items delivered downstream.
    #[must_use]
    pub const fn delivered(&self) -> usize {
        self.valid + self.invalid
    }

    /// Returns true if the subscription ended through `on_completed`.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(
            self.termination,
            Some(Termination::Completed | Termination::Cancelled)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_counts() {
        let sub = Subscription {
            stage: "tree-source".to_string(),
            valid: 3,
            invalid: 2,
            termination: Some(Termination::Cancelled),
        };

        assert_eq!(sub.delivered(), 5);
        assert!(sub.is_completed());
    }

    #[test]
    fn test_errored_is_not_completed() {
        let sub = Subscription {
            stage: "parent-validation".to_string(),
            valid: 0,
            invalid: 0,
            termination: Some(Termination::Errored),
        };

        assert!(!sub.is_completed());
        assert_eq!(Termination::Errored.to_string(), "errored");
    }

    #[test]
    fn test_topology_default_and_serde() {
        assert_eq!(StreamTopology::default(), StreamTopology::SingleTree);
        let json = serde_json::to_string(&StreamTopology::RelatedForest).unwrap();
        assert_eq!(json, "\"related_forest\"");
    }
}
