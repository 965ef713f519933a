//! Collaborator contracts consumed by the pipeline.
//!
//! Durable stores live outside this crate. Stages and validators only see
//! these traits; [`crate::testing`] provides in-memory implementations.

use crate::candidate::{ContentNode, NodeId, NodePath, TemplateId};
use crate::errors::PipelineError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Read access to the source content tree.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Loads one node, `None` if it does not exist.
    async fn node(&self, id: NodeId) -> Result<Option<ContentNode>, PipelineError>;

    /// Loads one page of the children of `parent`, in a stable order.
    async fn children(
        &self,
        parent: NodeId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ContentNode>, PipelineError>;
}

/// Index of the nodes present on one publish target.
#[async_trait]
pub trait TargetIndex: Send + Sync {
    /// Returns true if the node exists on the target.
    async fn contains(&self, id: NodeId) -> Result<bool, PipelineError>;
}

/// Decides whether a source node may be published at all.
pub trait PublishRule: Send + Sync {
    /// Returns true if the node is publishable.
    fn is_publishable(&self, node: &ContentNode) -> bool;
}

impl<F> PublishRule for F
where
    F: Fn(&ContentNode) -> bool + Send + Sync,
{
    fn is_publishable(&self, node: &ContentNode) -> bool {
        self(node)
    }
}

/// Accepts every node.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublishAll;

impl PublishRule for PublishAll {
    fn is_publishable(&self, _node: &ContentNode) -> bool {
        true
    }
}

/// Kind of a recorded change to the source tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// A node was created.
    Created,
    /// A node was changed.
    Modified,
    /// A node was moved.
    Moved,
    /// A node was deleted.
    Deleted,
}

/// A change recorded by the publisher for a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherOperation {
    /// Operation identity.
    pub id: Uuid,
    /// The node the operation applies to.
    pub node_id: NodeId,
    /// Template of the node at the time of the operation.
    pub template_id: TemplateId,
    /// Name of the node at the time of the operation.
    pub name: String,
    /// Ancestor chain of the node at the time of the operation.
    pub path: NodePath,
    /// What happened.
    pub kind: OperationKind,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Affected language.
    pub language: String,
    /// Targets the operation is relevant for.
    pub targets: Vec<String>,
    /// Publish type the operation belongs to.
    pub publish_type: String,
}

impl PublisherOperation {
    /// Rebuilds the node as it was when the operation was recorded.
    #[must_use]
    pub fn to_node(&self) -> ContentNode {
        ContentNode {
            id: self.node_id,
            template_id: self.template_id,
            name: self.name.clone(),
            path: self.path.clone(),
        }
    }
}

/// Selects the recorded operations relevant for one publish job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationQuery {
    /// Only operations recorded at or before this instant.
    pub until: DateTime<Utc>,
    /// Accepted languages; empty accepts all.
    #[serde(default)]
    pub languages: Vec<String>,
    /// Accepted targets; empty accepts all.
    #[serde(default)]
    pub targets: Vec<String>,
    /// Accepted publish types; empty accepts all.
    #[serde(default)]
    pub publish_types: Vec<String>,
}

impl OperationQuery {
    /// Creates a query accepting everything recorded up to `until`.
    #[must_use]
    pub const fn until(until: DateTime<Utc>) -> Self {
        Self {
            until,
            languages: Vec::new(),
            targets: Vec::new(),
            publish_types: Vec::new(),
        }
    }

    /// Restricts languages.
    #[must_use]
    pub fn with_languages(mut self, languages: Vec<String>) -> Self {
        self.languages = languages;
        self
    }

    /// Restricts targets.
    #[must_use]
    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.targets = targets;
        self
    }

    /// Restricts publish types.
    #[must_use]
    pub fn with_publish_types(mut self, publish_types: Vec<String>) -> Self {
        self.publish_types = publish_types;
        self
    }

    /// Returns true if `op` satisfies every filter.
    #[must_use]
    pub fn matches(&self, op: &PublisherOperation) -> bool {
        op.timestamp <= self.until
            && (self.languages.is_empty() || self.languages.contains(&op.language))
            && (self.targets.is_empty() || op.targets.iter().any(|t| self.targets.contains(t)))
            && (self.publish_types.is_empty() || self.publish_types.contains(&op.publish_type))
    }
}

/// Read access to the publisher's operation log.
#[async_trait]
pub trait PublisherOperationSource: Send + Sync {
    /// Loads one page of operations matching `query`, oldest first.
    async fn operations(
        &self,
        query: &OperationQuery,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<PublisherOperation>, PipelineError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn op(language: &str, targets: &[&str], publish_type: &str) -> PublisherOperation {
        PublisherOperation {
            id: Uuid::new_v4(),
            node_id: NodeId::new(),
            template_id: TemplateId::new(),
            name: "page".to_string(),
            path: NodePath::root(),
            kind: OperationKind::Deleted,
            timestamp: Utc::now() - Duration::minutes(5),
            language: language.to_string(),
            targets: targets.iter().map(ToString::to_string).collect(),
            publish_type: publish_type.to_string(),
        }
    }

    #[test]
    fn test_query_filters() {
        let query = OperationQuery::until(Utc::now())
            .with_languages(vec!["en".to_string()])
            .with_targets(vec!["internet".to_string()])
            .with_publish_types(vec!["tree".to_string()]);

        assert!(query.matches(&op("en", &["internet", "preview"], "tree")));
        assert!(!query.matches(&op("da", &["internet"], "tree")));
        assert!(!query.matches(&op("en", &["preview"], "tree")));
        assert!(!query.matches(&op("en", &["internet"], "full")));
    }

    #[test]
    fn test_query_excludes_later_operations() {
        let query = OperationQuery::until(Utc::now() - Duration::hours(1));
        assert!(!query.matches(&op("en", &["internet"], "tree")));
    }

    #[test]
    fn test_operation_to_node() {
        let operation = op("en", &["internet"], "tree");
        let node = operation.to_node();
        assert_eq!(node.id, operation.node_id);
        assert_eq!(node.name, "page");
    }

    #[test]
    fn test_closure_publish_rule() {
        let rule = |node: &ContentNode| node.name != "hidden";
        let template = TemplateId::new();
        assert!(rule.is_publishable(&ContentNode::root("home", template)));
        assert!(!rule.is_publishable(&ContentNode::root("hidden", template)));
        assert!(PublishAll.is_publishable(&ContentNode::root("hidden", template)));
    }
}
