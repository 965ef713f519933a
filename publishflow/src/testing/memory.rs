//! In-memory collaborators.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

use crate::candidate::{ContentNode, NodeId};
use crate::errors::PipelineError;
use crate::repository::{
    CandidateSource, OperationKind, OperationQuery, PublisherOperation, PublisherOperationSource,
    TargetIndex,
};

/// A source content tree held in memory.
///
/// Children are returned in insertion order.
#[derive(Debug, Default)]
pub struct InMemoryContentTree {
    nodes: RwLock<HashMap<NodeId, ContentNode>>,
    children: RwLock<HashMap<NodeId, Vec<NodeId>>>,
    failure: RwLock<Option<String>>,
    page_reads: AtomicUsize,
}

impl InMemoryContentTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tree holding `nodes`.
    #[must_use]
    pub fn with_nodes<'a>(nodes: impl IntoIterator<Item = &'a ContentNode>) -> Self {
        let tree = Self::new();
        for node in nodes {
            tree.insert(node.clone());
        }
        tree
    }

    /// Adds a node.
    pub fn insert(&self, node: ContentNode) {
        if let Some(parent) = node.parent_id() {
            let mut children = self.children.write();
            children.entry(parent).or_default().push(node.id);
        }
        self.nodes.write().insert(node.id, node);
    }

    /// Removes a node; its descendants become unreachable.
    pub fn remove(&self, id: NodeId) {
        if let Some(node) = self.nodes.write().remove(&id) {
            if let Some(parent) = node.parent_id() {
                if let Some(siblings) = self.children.write().get_mut(&parent) {
                    siblings.retain(|s| *s != id);
                }
            }
        }
    }

    /// Makes every subsequent read fail.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.write() = Some(message.into());
    }

    /// Number of `children` pages read so far.
    #[must_use]
    pub fn page_reads(&self) -> usize {
        self.page_reads.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), PipelineError> {
        if let Some(message) = self.failure.read().as_ref() {
            return Err(PipelineError::repository(message.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl CandidateSource for InMemoryContentTree {
    async fn node(&self, id: NodeId) -> Result<Option<ContentNode>, PipelineError> {
        self.check()?;
        Ok(self.nodes.read().get(&id).cloned())
    }

    async fn children(
        &self,
        parent: NodeId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ContentNode>, PipelineError> {
        self.check()?;
        self.page_reads.fetch_add(1, Ordering::SeqCst);

        let nodes = self.nodes.read();
        let children = self.children.read();
        let page = children
            .get(&parent)
            .into_iter()
            .flatten()
            .skip(offset)
            .take(limit)
            .filter_map(|id| nodes.get(id).cloned())
            .collect();
        Ok(page)
    }
}

/// The set of nodes present on a target.
#[derive(Debug, Default)]
pub struct InMemoryTargetIndex {
    present: RwLock<HashSet<NodeId>>,
    failure: RwLock<Option<String>>,
    lookups: AtomicUsize,
}

impl InMemoryTargetIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a node as present.
    pub fn insert(&self, id: NodeId) {
        self.present.write().insert(id);
    }

    /// Marks a node as absent.
    pub fn remove(&self, id: NodeId) {
        self.present.write().remove(&id);
    }

    /// Makes every subsequent lookup fail.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.write() = Some(message.into());
    }

    /// Number of lookups served so far.
    #[must_use]
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TargetIndex for InMemoryTargetIndex {
    async fn contains(&self, id: NodeId) -> Result<bool, PipelineError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.failure.read().as_ref() {
            return Err(PipelineError::repository(message.clone()));
        }
        Ok(self.present.read().contains(&id))
    }
}

/// A publisher operation log held in memory.
#[derive(Debug, Default)]
pub struct InMemoryOperationLog {
    operations: RwLock<Vec<PublisherOperation>>,
    failure: RwLock<Option<String>>,
    page_reads: AtomicUsize,
}

impl InMemoryOperationLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an operation.
    pub fn record(&self, operation: PublisherOperation) {
        self.operations.write().push(operation);
    }

    /// Makes every subsequent read fail.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.write() = Some(message.into());
    }

    /// Number of pages read so far.
    #[must_use]
    pub fn page_reads(&self) -> usize {
        self.page_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PublisherOperationSource for InMemoryOperationLog {
    async fn operations(
        &self,
        query: &OperationQuery,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<PublisherOperation>, PipelineError> {
        if let Some(message) = self.failure.read().as_ref() {
            return Err(PipelineError::repository(message.clone()));
        }
        self.page_reads.fetch_add(1, Ordering::SeqCst);

        let mut matching: Vec<_> = self
            .operations
            .read()
            .iter()
            .filter(|op| query.matches(op))
            .cloned()
            .collect();
        matching.sort_by_key(|op| op.timestamp);

        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }
}

/// Builds a deletion record for `node` in language "en" for `target`.
#[must_use]
pub fn deletion_of(
    node: &ContentNode,
    target: &str,
    publish_type: &str,
    timestamp: DateTime<Utc>,
) -> PublisherOperation {
    PublisherOperation {
        id: Uuid::new_v4(),
        node_id: node.id,
        template_id: node.template_id,
        name: node.name.clone(),
        path: node.path.clone(),
        kind: OperationKind::Deleted,
        timestamp,
        language: "en".to_string(),
        targets: vec![target.to_string()],
        publish_type: publish_type.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::TemplateId;

    #[tokio::test]
    async fn test_children_paging() {
        let template = TemplateId::new();
        let root = ContentNode::root("content", template);
        let tree = InMemoryContentTree::new();
        tree.insert(root.clone());
        let kids: Vec<_> = (0..5)
            .map(|i| ContentNode::child_of(&root, format!("child-{i}"), template))
            .collect();
        for kid in &kids {
            tree.insert(kid.clone());
        }

        let first = tree.children(root.id, 0, 2).await.unwrap();
        let last = tree.children(root.id, 4, 2).await.unwrap();

        let first_ids: Vec<_> = first.iter().map(|n| n.id).collect();
        assert_eq!(first_ids, vec![kids[0].id, kids[1].id]);
        assert_eq!(last.len(), 1);
        assert_eq!(tree.page_reads(), 2);
    }

    #[tokio::test]
    async fn test_remove_detaches_from_parent() {
        let template = TemplateId::new();
        let root = ContentNode::root("content", template);
        let child = ContentNode::child_of(&root, "home", template);
        let tree = InMemoryContentTree::with_nodes([&root, &child]);

        tree.remove(child.id);

        assert!(tree.node(child.id).await.unwrap().is_none());
        assert!(tree.children(root.id, 0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_operation_log_orders_by_time() {
        let node = ContentNode::root("page", TemplateId::new());
        let now = Utc::now();
        let log = InMemoryOperationLog::new();
        let earlier = now - chrono::Duration::minutes(1);
        log.record(deletion_of(&node, "internet", "tree", now));
        log.record(deletion_of(&node, "internet", "tree", earlier));

        let query = OperationQuery::until(now);
        let ops = log.operations(&query, 0, 10).await.unwrap();

        assert_eq!(ops.len(), 2);
        assert!(ops[0].timestamp < ops[1].timestamp);
    }
}
