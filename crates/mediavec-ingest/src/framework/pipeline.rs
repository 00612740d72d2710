//! Bounded-concurrency streaming pipeline
//!
//! One pipeline drives one source to exhaustion. Each loop iteration takes a
//! gate slot first and only then pulls the next record, so the source is
//! paused exactly while the gate is saturated. Admitted records run as tasks
//! in a [`JoinSet`]; each one processes, persists, and releases its slot on
//! every exit path.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use mediavec_common::error_log::ErrorLog;
use mediavec_common::types::{Record, RecordId};

use super::gate::{ConcurrencyGate, GateStats};
use super::lifecycle::{RecordLifecycle, RecordOutcome};
use super::traits::{Persister, RecordSource, RemoteProcessor};
use crate::error::{IngestError, Result, SourceError};

/// Counts for one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub name: String,
    /// Records handed to a processor
    pub admitted: u64,
    pub committed: u64,
    pub failed: u64,
    /// Malformed or repeated rows dropped before admission
    pub skipped: u64,
    pub rows_written: u64,
    pub peak_in_flight: usize,
    pub pauses: u64,
    pub elapsed_ms: u64,
}

impl PipelineReport {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    fn absorb(&mut self, outcome: &RecordOutcome) {
        if outcome.is_committed() {
            self.committed += 1;
            self.rows_written += outcome.rows_written as u64;
        } else {
            self.failed += 1;
        }
    }

    fn finish(&mut self, stats: GateStats, started: Instant) {
        self.peak_in_flight = stats.peak_in_flight;
        self.pauses = stats.pauses;
        self.elapsed_ms = started.elapsed().as_millis() as u64;
    }

    /// Combine per-job reports into a run total
    pub fn merge(&mut self, other: &PipelineReport) {
        self.admitted += other.admitted;
        self.committed += other.committed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.rows_written += other.rows_written;
        self.peak_in_flight = self.peak_in_flight.max(other.peak_in_flight);
        self.pauses += other.pauses;
        self.elapsed_ms = self.elapsed_ms.max(other.elapsed_ms);
    }
}

/// Wires a processor and a persister behind a concurrency gate
pub struct Pipeline<R, P>
where
    R: RemoteProcessor,
    P: Persister<R::Output>,
{
    name: String,
    processor: Arc<R>,
    persister: Arc<P>,
    gate: ConcurrencyGate,
    error_log: Option<ErrorLog>,
}

impl<R, P> Pipeline<R, P>
where
    R: RemoteProcessor,
    P: Persister<R::Output>,
{
    pub fn new(
        name: impl Into<String>,
        processor: Arc<R>,
        persister: Arc<P>,
        gate: ConcurrencyGate,
    ) -> Self {
        Self {
            name: name.into(),
            processor,
            persister,
            gate,
            error_log: None,
        }
    }

    /// Append every abandoned record to `error_log`
    pub fn with_error_log(mut self, error_log: ErrorLog) -> Self {
        self.error_log = Some(error_log);
        self
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    /// Drive `source` to exhaustion.
    ///
    /// Per-record failures are logged and counted. A record whose id was
    /// already seen in this run is skipped. A stream failure stops admission,
    /// waits for in-flight records, and returns [`IngestError::Source`]
    /// carrying the partial report.
    #[instrument(skip_all, fields(pipeline = %self.name))]
    pub async fn run<S: RecordSource>(&self, source: &mut S) -> Result<PipelineReport> {
        let started = Instant::now();
        let mut report = PipelineReport::new(&self.name);
        let mut tasks: JoinSet<RecordOutcome> = JoinSet::new();
        let mut source_error: Option<SourceError> = None;
        // A record id is processed at most once per run
        let mut seen: HashSet<RecordId> = HashSet::new();

        info!(
            source = %source.describe(),
            limit = self.gate.limit(),
            "Pipeline started"
        );

        loop {
            while let Some(joined) = tasks.try_join_next() {
                self.collect(&mut report, joined);
            }

            let slot = match self.gate.try_admit() {
                Some(slot) => slot,
                None => {
                    if self.gate.pause() {
                        debug!(in_flight = self.gate.in_flight(), "Pool saturated");
                        // The last release may have landed before the pause
                        if !self.gate.is_saturated() {
                            self.gate.resume();
                        }
                    }
                    self.gate.admit().await?
                },
            };

            let record = match source.next_record().await {
                None => break,
                Some(Ok(record)) => record,
                Some(Err(e)) if e.is_recoverable() => {
                    report.skipped += 1;
                    warn!(error = %e, "Skipping malformed row");
                    if let Some(log) = &self.error_log {
                        log.record(format!("Skipping row from {}", source.describe()), &e);
                    }
                    continue;
                },
                Some(Err(e)) => {
                    error!(error = %e, in_flight = tasks.len(), "Record source failed, draining");
                    source_error = Some(e);
                    break;
                },
            };

            if !seen.insert(record.id.clone()) {
                report.skipped += 1;
                warn!(
                    record_id = %record.id,
                    locator = %record.locator,
                    "Skipping duplicate record"
                );
                if let Some(log) = &self.error_log {
                    let e = SourceError::DuplicateRecord {
                        id: record.id.to_string(),
                    };
                    log.record(format!("Skipping duplicate record {}", record.id), &e);
                }
                continue;
            }

            report.admitted += 1;
            let lifecycle = RecordLifecycle::admitted(record.id.clone(), slot);
            tasks.spawn(process_record(
                record,
                lifecycle,
                Arc::clone(&self.processor),
                Arc::clone(&self.persister),
                self.error_log.clone(),
            ));
        }

        while let Some(joined) = tasks.join_next().await {
            self.collect(&mut report, joined);
        }

        report.finish(self.gate.stats(), started);

        if let Some(source) = source_error {
            return Err(IngestError::Source { source, report });
        }

        info!(
            admitted = report.admitted,
            committed = report.committed,
            failed = report.failed,
            skipped = report.skipped,
            rows_written = report.rows_written,
            peak_in_flight = report.peak_in_flight,
            elapsed_ms = report.elapsed_ms,
            "Pipeline finished"
        );

        Ok(report)
    }

    fn collect(&self, report: &mut PipelineReport, joined: std::result::Result<RecordOutcome, JoinError>) {
        match joined {
            Ok(outcome) => report.absorb(&outcome),
            Err(e) => {
                // The slot was dropped during unwinding; only the count is left to fix up
                report.failed += 1;
                error!(error = %e, "Record task panicked");
                if let Some(log) = &self.error_log {
                    log.record("Record task panicked", &e);
                }
            },
        }
    }
}

async fn process_record<R, P>(
    record: Record,
    mut lifecycle: RecordLifecycle,
    processor: Arc<R>,
    persister: Arc<P>,
    error_log: Option<ErrorLog>,
) -> RecordOutcome
where
    R: RemoteProcessor,
    P: Persister<R::Output>,
{
    lifecycle.start_processing();
    let output = match processor.process(&record).await {
        Ok(output) => output,
        Err(e) => {
            warn!(
                record_id = %record.id,
                locator = %record.locator,
                error = %e,
                "Remote processing failed, abandoning record"
            );
            if let Some(log) = &error_log {
                log.record(format!("Error processing record {}", record.id), &e);
            }
            lifecycle.fail();
            return lifecycle.release();
        },
    };

    lifecycle.start_persisting();
    match persister.persist(&record, &output).await {
        Ok(rows) => {
            lifecycle.commit(rows);
            debug!(record_id = %record.id, rows, "Record committed");
        },
        Err(e) => {
            warn!(record_id = %record.id, error = %e, "Persist failed, abandoning record");
            if let Some(log) = &error_log {
                log.record(format!("Error persisting record {}", record.id), &e);
            }
            lifecycle.fail();
        },
    }

    lifecycle.release()
}
