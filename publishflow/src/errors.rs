//! Error types for the publish candidate pipeline.
//!
//! Only one kind is recoverable: a cancellation observed after the shared
//! controller was triggered. Every other variant is a fault that aborts the
//! pipeline run.

use crate::candidate::NodeId;
use thiserror::Error;

/// The main error type for pipeline operations.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// The shared cancellation signal was observed mid-operation.
    #[error("Stage '{stage}' cancelled: {reason}")]
    Cancelled {
        /// The stage that observed the cancellation.
        stage: String,
        /// The reason recorded on the controller.
        reason: String,
    },

    /// A target validator failed while checking a candidate.
    #[error("Validator failed in stage '{stage}' for node {node}: {source}")]
    Validator {
        /// The stage that queried the validator.
        stage: String,
        /// The candidate being validated.
        node: NodeId,
        /// The underlying failure.
        #[source]
        source: Box<PipelineError>,
    },

    /// A collaborator repository failed.
    #[error("Repository error: {0}")]
    Repository(String),

    /// The publish was started from a node that does not exist.
    #[error("The publish could not be performed from a start item that doesn't exist: {0}")]
    StartNodeNotFound(NodeId),

    /// A generic stage failure.
    #[error("Stage '{stage}' failed: {message}")]
    Stage {
        /// The failing stage.
        stage: String,
        /// What went wrong.
        message: String,
    },

    /// Invalid pipeline configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Cancelled {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    /// Wraps a validator failure with the stage and node it happened on.
    #[must_use]
    pub fn validator(stage: impl Into<String>, node: NodeId, source: Self) -> Self {
        Self::Validator {
            stage: stage.into(),
            node,
            source: Box::new(source),
        }
    }

    /// Creates a repository error.
    #[must_use]
    pub fn repository(message: impl Into<String>) -> Self {
        Self::Repository(message.into())
    }

    /// Creates a generic stage error.
    #[must_use]
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Returns true for cancellation-kind errors.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns a short type tag used in diagnostic events.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Cancelled { .. } => "Cancelled",
            Self::Validator { .. } => "ValidatorFault",
            Self::Repository(_) => "RepositoryFault",
            Self::StartNodeNotFound(_) => "StartNodeNotFound",
            Self::Stage { .. } => "StageFault",
            Self::Config(_) => "ConfigError",
        }
    }

    /// Converts to a JSON payload for the diagnostic event sink.
    #[must_use]
    pub fn to_event_data(&self) -> serde_json::Value {
        let mut data = serde_json::json!({
            "type": self.kind(),
            "message": self.to_string(),
        });

        match self {
            Self::Cancelled { stage, .. } | Self::Stage { stage, .. } => {
                data["stage"] = serde_json::json!(stage);
            }
            Self::Validator { stage, node, .. } => {
                data["stage"] = serde_json::json!(stage);
                data["node"] = serde_json::json!(node.to_string());
            }
            Self::StartNodeNotFound(node) => {
                data["node"] = serde_json::json!(node.to_string());
            }
            Self::Repository(_) | Self::Config(_) => {}
        }

        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_cancellation_kind() {
        assert!(PipelineError::cancelled("tree-source", "job aborted").is_cancellation());
        assert!(!PipelineError::repository("connection reset").is_cancellation());
        assert!(!PipelineError::config("bad batch size").is_cancellation());
    }

    #[test]
    fn test_validator_error_keeps_source() {
        let node = NodeId::new();
        let err = PipelineError::validator(
            "parent-validation",
            node,
            PipelineError::repository("index offline"),
        );

        assert!(err.to_string().contains("parent-validation"));
        assert!(err.to_string().contains(&node.to_string()));
        assert!(err.source().is_some());
        assert!(!err.is_cancellation());
    }

    #[test]
    fn test_event_data() {
        let node = NodeId::new();
        let source = PipelineError::repository("x");
        let data = PipelineError::validator("parent-validation", node, source).to_event_data();

        assert_eq!(data["type"], "ValidatorFault");
        assert_eq!(data["stage"], "parent-validation");
        assert_eq!(data["node"], node.to_string());

        let data = PipelineError::config("zero batch").to_event_data();
        assert_eq!(data["type"], "ConfigError");
        assert!(data.get("stage").is_none());
    }
}
