//! Shared fail-fast cancellation for one pipeline run.
//!
//! This module provides:
//! - [`CancellationController`], owned by the run and handed to every stage
//! - [`CancellationToken`], the observe-only view passed to subscriptions

mod token;

pub use token::{CancelCallback, CancellationController, CancellationToken};
