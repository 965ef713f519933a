//! Diagnostic event sinks.
//!
//! Every stage reports its terminal event to an [`EventSink`] alongside the
//! `tracing` log, so the host can keep a diagnostic trail of a publish run.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A stage completed normally.
pub const STAGE_COMPLETED: &str = "stage.completed";
/// A stage observed the shared cancellation signal and completed.
pub const STAGE_CANCELLED: &str = "stage.cancelled";
/// A stage failed.
pub const STAGE_ERRORED: &str = "stage.errored";
/// The parent-validity stage suppressed a candidate.
pub const CANDIDATE_SUPPRESSED: &str = "candidate.suppressed";
