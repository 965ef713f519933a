//! Candidate records flowing through the pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Opaque identity of a content node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Creates a new random node id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of the template a node is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(Uuid);

impl TemplateId {
    /// Creates a new random template id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl Default for TemplateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Ancestor chain of a node, root first, not including the node itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePath {
    ancestors: Vec<NodeId>,
}

impl NodePath {
    /// Creates a path from ancestor ids ordered root first.
    #[must_use]
    pub fn new(ancestors: Vec<NodeId>) -> Self {
        Self { ancestors }
    }

    /// The path of a root node.
    #[must_use]
    pub const fn root() -> Self {
        Self {
            ancestors: Vec::new(),
        }
    }

    /// Returns the ancestor ids, root first.
    #[must_use]
    pub fn ancestors(&self) -> &[NodeId] {
        &self.ancestors
    }

    /// Returns the direct parent, if any.
    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.ancestors.last().copied()
    }

    /// Returns true if `id` is an ancestor on this path.
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.ancestors.contains(&id)
    }

    /// Returns the path a child of `parent` would have, given this is the
    /// parent's own path.
    #[must_use]
    pub fn child_path(&self, parent: NodeId) -> Self {
        let mut ancestors = self.ancestors.clone();
        ancestors.push(parent);
        Self { ancestors }
    }

    /// Number of ancestors.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.ancestors.len()
    }
}

/// A node of the source content tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentNode {
    /// Node identity.
    pub id: NodeId,
    /// Template the node is built from.
    pub template_id: TemplateId,
    /// Display name.
    pub name: String,
    /// Ancestor chain.
    pub path: NodePath,
}

impl ContentNode {
    /// Creates a root node.
    #[must_use]
    pub fn root(name: impl Into<String>, template_id: TemplateId) -> Self {
        Self {
            id: NodeId::new(),
            template_id,
            name: name.into(),
            path: NodePath::root(),
        }
    }

    /// Creates a new node under `parent`.
    #[must_use]
    pub fn child_of(parent: &Self, name: impl Into<String>, template_id: TemplateId) -> Self {
        Self {
            id: NodeId::new(),
            template_id,
            name: name.into(),
            path: parent.path.child_path(parent.id),
        }
    }

    /// Returns the parent id, or `None` for a root.
    #[must_use]
    pub fn parent_id(&self) -> Option<NodeId> {
        self.path.parent()
    }
}

/// Whether a candidate describes a live source node or a removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateKind {
    /// The node exists in the source.
    #[default]
    Existing,
    /// The node was deleted from the source and must be removed from targets.
    Deleted,
}

/// A node considered for inclusion in a publish operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishCandidate {
    /// The node being published.
    pub node: ContentNode,
    /// Live node or synthesized deletion.
    pub kind: CandidateKind,
}

impl PublishCandidate {
    /// Creates a candidate for a live source node.
    #[must_use]
    pub const fn existing(node: ContentNode) -> Self {
        Self {
            node,
            kind: CandidateKind::Existing,
        }
    }

    /// Creates a synthetic candidate for a deleted node.
    #[must_use]
    pub const fn deleted(node: ContentNode) -> Self {
        Self {
            node,
            kind: CandidateKind::Deleted,
        }
    }

    /// Returns the node id.
    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.node.id
    }

    /// Returns the parent id.
    #[must_use]
    pub fn parent_id(&self) -> Option<NodeId> {
        self.node.parent_id()
    }

    /// Returns the ancestor path.
    #[must_use]
    pub const fn path(&self) -> &NodePath {
        &self.node.path
    }

    /// Returns true for synthesized deletions.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.kind == CandidateKind::Deleted
    }
}

/// The value passed between stages: one node under validation.
///
/// An invalid context carries only the identity; a valid one always carries
/// the candidate payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateValidationContext {
    /// The candidate passed validation so far.
    Valid(Arc<PublishCandidate>),
    /// The candidate was rejected.
    Invalid {
        /// The rejected node.
        id: NodeId,
    },
}

impl CandidateValidationContext {
    /// Creates a valid context.
    #[must_use]
    pub fn valid(candidate: PublishCandidate) -> Self {
        Self::Valid(Arc::new(candidate))
    }

    /// Creates an invalid marker.
    #[must_use]
    pub const fn invalid(id: NodeId) -> Self {
        Self::Invalid { id }
    }

    /// Returns the node id.
    #[must_use]
    pub fn id(&self) -> NodeId {
        match self {
            Self::Valid(candidate) => candidate.id(),
            Self::Invalid { id } => *id,
        }
    }

    /// Returns true if the context carries a candidate.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    /// Returns the candidate of a valid context.
    #[must_use]
    pub fn as_valid(&self) -> Option<&PublishCandidate> {
        match self {
            Self::Valid(candidate) => Some(candidate.as_ref()),
            Self::Invalid { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_path() {
        let template = TemplateId::new();
        let root = ContentNode::root("content", template);
        let home = ContentNode::child_of(&root, "home", template);
        let page = ContentNode::child_of(&home, "page", template);

        assert_eq!(root.parent_id(), None);
        assert_eq!(home.parent_id(), Some(root.id));
        assert_eq!(page.path.ancestors(), &[root.id, home.id]);
        assert!(page.path.contains(root.id));
        assert!(!page.path.contains(page.id));
        assert_eq!(page.path.depth(), 2);
    }

    #[test]
    fn test_invalid_context_has_no_payload() {
        let id = NodeId::new();
        let ctx = CandidateValidationContext::invalid(id);

        assert!(!ctx.is_valid());
        assert!(ctx.as_valid().is_none());
        assert_eq!(ctx.id(), id);
    }

    #[test]
    fn test_valid_context_exposes_candidate() {
        let node = ContentNode::root("home", TemplateId::new());
        let id = node.id;
        let ctx = CandidateValidationContext::valid(PublishCandidate::existing(node));

        assert!(ctx.is_valid());
        assert_eq!(ctx.id(), id);
        assert_eq!(ctx.as_valid().map(PublishCandidate::id), Some(id));
        assert!(!ctx.as_valid().is_some_and(PublishCandidate::is_deleted));
    }

    #[test]
    fn test_node_id_serializes_as_uuid() {
        let id = NodeId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }
}
