//! # Publishflow
//!
//! Push-based validation of publish candidates on their way from a source
//! content tree to a publishing target.
//!
//! Publishflow provides:
//!
//! - **Stages**: composable producers that walk the source tree, expand
//!   bucket containers, inject deleted nodes and validate parents
//! - **Shared cancellation**: one controller per run, so a fault in any stage
//!   stops every other stage cleanly
//! - **Diagnostics**: `tracing` logs plus an event sink receiving each
//!   stage's terminal event
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use publishflow::prelude::*;
//!
//! let pipeline = TreePublishPipeline::new(source, target, operations)
//!     .with_config(PipelineConfig::from_json(config_json)?)?;
//! let options = PublishOptions::new(item_id).with_descendants(true);
//!
//! let stream = pipeline.build(&options).await?;
//! let summary = stream
//!     .subscribe(&mut manifest_writer, &pipeline.controller().token())
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, missing_docs, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod candidate;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod repository;
pub mod stages;
pub mod stream;
pub mod testing;
pub mod validators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{CancellationController, CancellationToken};
    pub use crate::candidate::{
        CandidateKind, CandidateValidationContext, ContentNode, NodeId, NodePath, PublishCandidate,
        TemplateId,
    };
    pub use crate::errors::PipelineError;
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{PipelineConfig, PublishOptions, TreePublishPipeline};
    pub use crate::repository::{
        CandidateSource, PublishRule, PublisherOperationSource, TargetIndex,
    };
    pub use crate::stages::{
        BucketExpansionStage, DeletedNodesStage, ParentValidationStage, RelatedNodesSourceStage,
        TreeSourceStage,
    };
    pub use crate::stream::{CandidateStream, Observable, StreamTopology, Subscriber, Subscription};
    pub use crate::validators::{BucketParentValidator, CandidateTargetValidator, ParentValidator};
}
