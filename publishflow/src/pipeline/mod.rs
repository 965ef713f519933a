//! Pipeline configuration and assembly.
//!
//! This module provides:
//! - Handler configuration and per-job publish options
//! - The tree publish pipeline builder

mod builder;
mod config;


pub use builder::TreePublishPipeline;
pub use config::{PipelineConfig, PublishOptions};
