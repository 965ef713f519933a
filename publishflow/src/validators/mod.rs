//! Target validators queried by the parent-validity stage.

mod bucket;
mod parent;

pub use bucket::BucketParentValidator;
pub use parent::ParentValidator;

use crate::candidate::PublishCandidate;
use crate::errors::PipelineError;
use async_trait::async_trait;

/// Decides whether a candidate is acceptable on a publish target.
///
/// Implementations hold no per-call state: the same validator is queried
/// concurrently for different candidates and in no particular order.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CandidateTargetValidator: Send + Sync {
    /// Returns whether `candidate` may be written to the target.
    async fn is_valid(&self, candidate: &PublishCandidate) -> Result<bool, PipelineError>;
}
