//! Assembly of tree publish pipelines.

use std::sync::Arc;
use tracing::{debug, info};

use super::{PipelineConfig, PublishOptions};
use crate::cancellation::CancellationController;
use crate::candidate::{ContentNode, NodeId, TemplateId};
use crate::errors::PipelineError;
use crate::events::{EventSink, NoOpEventSink};
use crate::repository::{
    CandidateSource, PublishAll, PublishRule, PublisherOperation, PublisherOperationSource,
    TargetIndex,
};
use crate::stages::{
    BucketExpansionStage, DeletedNodesStage, ParentValidationStage, RelatedNodesSourceStage,
    TreeSourceStage,
};
use crate::stream::{CandidateStream, StreamTopology};
use crate::validators::{BucketParentValidator, CandidateTargetValidator, ParentValidator};

/// Wires the stages of a tree publish for one target.
///
/// Every stream built by one instance shares its cancellation controller, so
/// a fault anywhere stops the whole run.
#[derive(Clone)]
pub struct TreePublishPipeline {
    config: PipelineConfig,
    source: Arc<dyn CandidateSource>,
    target: Arc<dyn TargetIndex>,
    operations: Arc<dyn PublisherOperationSource>,
    rule: Arc<dyn PublishRule>,
    controller: CancellationController,
    sink: Arc<dyn EventSink>,
}

impl TreePublishPipeline {
    /// Creates a pipeline with default configuration, publishing every node.
    #[must_use]
    pub fn new(
        source: Arc<dyn CandidateSource>,
        target: Arc<dyn TargetIndex>,
        operations: Arc<dyn PublisherOperationSource>,
    ) -> Self {
        Self {
            config: PipelineConfig::default(),
            source,
            target,
            operations,
            rule: Arc::new(PublishAll),
            controller: CancellationController::new(),
            sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_config(mut self, config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Sets the publishability rule applied by source stages.
    #[must_use]
    pub fn with_rule(mut self, rule: Arc<dyn PublishRule>) -> Self {
        self.rule = rule;
        self
    }

    /// Uses an existing controller, e.g. one shared with other targets of
    /// the same job.
    #[must_use]
    pub fn with_controller(mut self, controller: CancellationController) -> Self {
        self.controller = controller;
        self
    }

    /// Sets the diagnostic event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Returns the run's cancellation controller.
    #[must_use]
    pub const fn controller(&self) -> &CancellationController {
        &self.controller
    }

    /// Builds the source side: the subtree walk, bucket containers above
    /// the start node when it lives in a bucket, then deleted nodes under
    /// the start node.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::StartNodeNotFound`] if the start node does
    /// not exist, or a repository error.
    pub async fn source_stream(
        &self,
        options: &PublishOptions,
    ) -> Result<CandidateStream, PipelineError> {
        let start = self
            .source
            .node(options.item_id)
            .await?
            .ok_or(PipelineError::StartNodeNotFound(options.item_id))?;

        let mut stream: CandidateStream = Arc::new(TreeSourceStage::new(
            Arc::clone(&self.source),
            start.clone(),
            Arc::clone(&self.rule),
            options.descendants,
            self.config.source_tree_reader_batch_size,
            self.controller.clone(),
            Arc::clone(&self.sink),
        ));

        if let Some(bucket_template) = options.bucket_template {
            if self.in_bucket(&start, bucket_template).await? {
                debug!(start = %start.id, "Start node lives in a bucket");
                stream = Arc::new(BucketExpansionStage::new(
                    stream,
                    Arc::clone(&self.source),
                    start.clone(),
                    bucket_template,
                    self.controller.clone(),
                    Arc::clone(&self.sink),
                ));
            }
        }

        let item_id = options.item_id;
        stream = Arc::new(DeletedNodesStage::new(
            stream,
            Arc::clone(&self.operations),
            options.operation_query(),
            self.config.unpublished_operations_loading_batch_size,
            Arc::new(move |op: &PublisherOperation| op.path.contains(item_id)),
            self.controller.clone(),
            Arc::clone(&self.sink),
        ));

        Ok(stream)
    }

    /// Decorates `upstream` with parent validation against the target.
    #[must_use]
    pub fn target_stream(
        &self,
        upstream: CandidateStream,
        options: &PublishOptions,
    ) -> CandidateStream {
        Arc::new(ParentValidationStage::new(
            upstream,
            self.validator(options),
            StreamTopology::SingleTree,
            self.controller.clone(),
            Arc::clone(&self.sink),
        ))
    }

    /// Builds the complete stream for one target.
    ///
    /// # Errors
    ///
    /// See [`source_stream`](Self::source_stream).
    pub async fn build(&self, options: &PublishOptions) -> Result<CandidateStream, PipelineError> {
        info!(
            item = %options.item_id,
            descendants = options.descendants,
            buckets = options.buckets_enabled(),
            "Building tree publish pipeline"
        );
        let source = self.source_stream(options).await?;
        Ok(self.target_stream(source, options))
    }

    /// Builds the stream for related items referenced by the published
    /// content. Consecutive items belong to unrelated subtrees.
    #[must_use]
    pub fn related_stream(&self, ids: Vec<NodeId>, options: &PublishOptions) -> CandidateStream {
        let source: CandidateStream = Arc::new(RelatedNodesSourceStage::new(
            Arc::clone(&self.source),
            ids,
            Arc::clone(&self.rule),
            self.controller.clone(),
            Arc::clone(&self.sink),
        ));
        Arc::new(ParentValidationStage::new(
            source,
            self.validator(options),
            StreamTopology::RelatedForest,
            self.controller.clone(),
            Arc::clone(&self.sink),
        ))
    }

    fn validator(&self, options: &PublishOptions) -> Arc<dyn CandidateTargetValidator> {
        match options.bucket_template {
            Some(bucket_template) => Arc::new(BucketParentValidator::new(
                Arc::clone(&self.source),
                Arc::clone(&self.target),
                bucket_template,
            )),
            None => Arc::new(ParentValidator::new(Arc::clone(&self.target))),
        }
    }

    async fn in_bucket(
        &self,
        start: &ContentNode,
        bucket_template: TemplateId,
    ) -> Result<bool, PipelineError> {
        let Some(parent_id) = start.parent_id() else {
            return Ok(start.template_id == bucket_template);
        };
        Ok(self
            .source
            .node(parent_id)
            .await?
            .is_some_and(|parent| parent.template_id == bucket_template))
    }
}

impl std::fmt::Debug for TreePublishPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreePublishPipeline")
            .field("config", &self.config)
            .field("controller", &self.controller)
            .finish_non_exhaustive()
    }
}
