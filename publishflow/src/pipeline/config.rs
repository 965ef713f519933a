//! Configuration types for publish pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::candidate::{NodeId, TemplateId};
use crate::errors::PipelineError;
use crate::repository::OperationQuery;

/// Handler-level settings shared by every publish job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Page size used when reading children from the source tree.
    #[serde(default = "default_batch_size")]
    pub source_tree_reader_batch_size: usize,
    /// Page size used when loading recorded publisher operations.
    #[serde(default = "default_batch_size")]
    pub unpublished_operations_loading_batch_size: usize,
}

fn default_batch_size() -> usize {
    1000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_tree_reader_batch_size: default_batch_size(),
            unpublished_operations_loading_batch_size: default_batch_size(),
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates a JSON configuration. Missing fields take their
    /// defaults.
    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PipelineError::config(format!("malformed pipeline config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the source tree page size.
    #[must_use]
    pub const fn with_source_tree_reader_batch_size(mut self, size: usize) -> Self {
        self.source_tree_reader_batch_size = size;
        self
    }

    /// Sets the operation log page size.
    #[must_use]
    pub const fn with_unpublished_operations_loading_batch_size(mut self, size: usize) -> Self {
        self.unpublished_operations_loading_batch_size = size;
        self
    }

    /// Checks that every page size is positive.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.source_tree_reader_batch_size == 0 {
            return Err(PipelineError::config(
                "source_tree_reader_batch_size must be greater than 0",
            ));
        }
        if self.unpublished_operations_loading_batch_size == 0 {
            return Err(PipelineError::config(
                "unpublished_operations_loading_batch_size must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Options of one tree publish job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOptions {
    /// The node the publish starts from.
    pub item_id: NodeId,
    /// Whether the subtree below the start node is published too.
    #[serde(default)]
    pub descendants: bool,
    /// Published languages; empty means all.
    #[serde(default)]
    pub languages: Vec<String>,
    /// Publishing targets; empty means all.
    #[serde(default)]
    pub targets: Vec<String>,
    /// Publish type recorded with operations.
    #[serde(default = "default_publish_type")]
    pub publish_type: String,
    /// Template of bucket containers. Buckets are disabled when absent.
    #[serde(default)]
    pub bucket_template: Option<TemplateId>,
    /// When the job started. Only operations recorded up to this instant
    /// are considered.
    #[serde(default = "Utc::now")]
    pub started_at: DateTime<Utc>,
}

fn default_publish_type() -> String {
    "tree".to_string()
}

impl PublishOptions {
    /// Creates options publishing only `item_id`.
    #[must_use]
    pub fn new(item_id: NodeId) -> Self {
        Self {
            item_id,
            descendants: false,
            languages: Vec::new(),
            targets: Vec::new(),
            publish_type: default_publish_type(),
            bucket_template: None,
            started_at: Utc::now(),
        }
    }

    /// Includes the subtree below the start node.
    #[must_use]
    pub const fn with_descendants(mut self, descendants: bool) -> Self {
        self.descendants = descendants;
        self
    }

    /// Restricts the published languages.
    #[must_use]
    pub fn with_languages(
        mut self,
        languages: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.languages = languages.into_iter().map(Into::into).collect();
        self
    }

    /// Restricts the publishing targets.
    #[must_use]
    pub fn with_targets(mut self, targets: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.targets = targets.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the publish type.
    #[must_use]
    pub fn with_publish_type(mut self, publish_type: impl Into<String>) -> Self {
        self.publish_type = publish_type.into();
        self
    }

    /// Enables item buckets with the given container template.
    #[must_use]
    pub const fn with_bucket_template(mut self, template: TemplateId) -> Self {
        self.bucket_template = Some(template);
        self
    }

    /// Sets the job start time.
    #[must_use]
    pub const fn started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    /// Returns true if item buckets are enabled.
    #[must_use]
    pub const fn buckets_enabled(&self) -> bool {
        self.bucket_template.is_some()
    }

    /// Builds the operation log query for this job.
    #[must_use]
    pub fn operation_query(&self) -> OperationQuery {
        OperationQuery::until(self.started_at)
            .with_languages(self.languages.clone())
            .with_targets(self.targets.clone())
            .with_publish_types(vec![self.publish_type.clone()])
    }
}
