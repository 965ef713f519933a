//! Testing utilities for publish pipelines.
//!
//! This module provides:
//! - In-memory source tree, target index and operation log
//! - A static upstream stream and a scripted validator
//! - A subscriber recording everything a stage delivers

mod memory;
mod mocks;
mod recorder;

pub use memory::{deletion_of, InMemoryContentTree, InMemoryOperationLog, InMemoryTargetIndex};
pub use mocks::{ScriptedValidator, StaticStream};
pub use recorder::{RecordingSubscriber, StreamEvent};
