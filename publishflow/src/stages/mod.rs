//! Stage implementations.
//!
//! Every stage is an [`Observable`](crate::stream::Observable) of
//! [`CandidateValidationContext`](crate::candidate::CandidateValidationContext)
//! built on [`StageCore`]. Source stages read from repositories; the other
//! stages decorate an upstream stream.

mod base;
mod bucket;
mod deleted;
mod parent_validation;
mod related;
mod tree_source;

pub use base::{StageCore, StageEmitter};
pub use bucket::{BucketExpansionStage, BUCKET_EXPANSION_STAGE};
pub use deleted::{DeletedNodesStage, OperationFilter, DELETED_NODES_STAGE};
pub use parent_validation::{ParentValidationStage, PARENT_VALIDATION_STAGE};
pub use related::{RelatedNodesSourceStage, RELATED_NODES_STAGE};
pub use tree_source::{TreeSourceStage, TREE_SOURCE_STAGE};
