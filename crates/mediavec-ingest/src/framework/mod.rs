//! Bounded-concurrency ingestion framework
//!
//! A [`Pipeline`] pulls records from a [`RecordSource`], runs each through a
//! [`RemoteProcessor`] and a [`Persister`], and never holds more than the
//! [`ConcurrencyGate`] limit in flight. A [`JobOrchestrator`] fans a list of
//! file jobs out over isolated pipelines, `P` at a time.

pub mod gate;
pub mod lifecycle;
pub mod orchestrator;
pub mod pipeline;
pub mod traits;

// Re-export commonly used types
pub use gate::{ConcurrencyGate, GateStats, InFlightSlot};
pub use lifecycle::{RecordLifecycle, RecordOutcome, RecordState};
pub use orchestrator::{
    Job, JobOrchestrator, JobOutcome, JobRunner, JobStatus, OrchestratorReport, TaskRunner,
};
pub use pipeline::{Pipeline, PipelineReport};
pub use traits::{Persister, RecordSource, RemoteProcessor};
