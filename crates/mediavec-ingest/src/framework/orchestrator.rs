//! File-partitioned job orchestration
//!
//! A fixed list of jobs (one per input file) is launched in batches of `P`.
//! Each batch runs to completion before the next starts. A failed job is
//! recorded and never cancels its siblings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use mediavec_common::error_log::ErrorLog;

use super::pipeline::PipelineReport;
use crate::error::{IngestError, JobError, Result};

/// One independent partition of the workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub source: PathBuf,
}

impl Job {
    /// A job for one input file, named after the file
    pub fn for_file(path: impl Into<PathBuf>) -> Self {
        let source = path.into();
        let id = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.display().to_string());
        Self { id, source }
    }
}

/// Runs one job in some isolated context and reports its terminal outcome
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run_job(&self, job: &Job) -> std::result::Result<PipelineReport, JobError>;
}

type JobFn = dyn Fn(Job) -> BoxFuture<'static, anyhow::Result<PipelineReport>> + Send + Sync;

/// Runs each job as its own tokio task
#[derive(Clone)]
pub struct TaskRunner {
    job_fn: Arc<JobFn>,
}

impl TaskRunner {
    pub fn new<F>(job_fn: F) -> Self
    where
        F: Fn(Job) -> BoxFuture<'static, anyhow::Result<PipelineReport>> + Send + Sync + 'static,
    {
        Self {
            job_fn: Arc::new(job_fn),
        }
    }
}

#[async_trait]
impl JobRunner for TaskRunner {
    async fn run_job(&self, job: &Job) -> std::result::Result<PipelineReport, JobError> {
        let handle = tokio::spawn((self.job_fn)(job.clone()));

        match handle.await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => Err(JobError::failed(&job.id, format!("{:#}", e))),
            Err(e) => Err(JobError::Panicked {
                job: job.id.clone(),
                message: e.to_string(),
            }),
        }
    }
}

/// Terminal status of one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JobStatus {
    Completed { report: PipelineReport },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id: String,
    /// 1-based batch the job ran in
    pub batch: usize,
    pub status: JobStatus,
}

impl JobOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, JobStatus::Failed { .. })
    }
}

/// Outcomes of every job, in launch order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub outcomes: Vec<JobOutcome>,
    pub batches: usize,
}

impl OrchestratorReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_failed()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failed()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &JobOutcome> {
        self.outcomes.iter().filter(|o| o.is_failed())
    }

    /// Sum of the record counts of every completed job
    pub fn totals(&self) -> PipelineReport {
        let mut total = PipelineReport {
            name: "total".to_string(),
            ..Default::default()
        };
        for outcome in &self.outcomes {
            if let JobStatus::Completed { report } = &outcome.status {
                total.merge(report);
            }
        }
        total
    }
}

/// Launches jobs in batches of at most `parallelism`
pub struct JobOrchestrator {
    parallelism: usize,
    error_log: Option<ErrorLog>,
}

impl JobOrchestrator {
    pub fn new(parallelism: usize) -> Result<Self> {
        if parallelism == 0 {
            return Err(IngestError::Config(
                "job parallelism must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            parallelism,
            error_log: None,
        })
    }

    /// Append every failed job to `error_log`
    pub fn with_error_log(mut self, error_log: ErrorLog) -> Self {
        self.error_log = Some(error_log);
        self
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Run every job, `parallelism` at a time, batch by batch.
    ///
    /// Fails with [`IngestError::AllJobsFailed`] only when there was at least
    /// one job and none of them succeeded.
    #[instrument(skip_all, fields(run_id = tracing::field::Empty, jobs = jobs.len(), parallelism = self.parallelism))]
    pub async fn run<R: JobRunner>(&self, jobs: Vec<Job>, runner: &R) -> Result<OrchestratorReport> {
        let mut report = OrchestratorReport {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            ..Default::default()
        };
        tracing::Span::current().record("run_id", tracing::field::display(report.run_id));

        for (index, batch) in jobs.chunks(self.parallelism).enumerate() {
            let batch_number = index + 1;
            info!(
                batch = batch_number,
                jobs = ?batch.iter().map(|j| j.id.as_str()).collect::<Vec<_>>(),
                "Launching job batch"
            );

            let results = join_all(batch.iter().map(|job| runner.run_job(job))).await;

            for (job, result) in batch.iter().zip(results) {
                let status = match result {
                    Ok(job_report) => {
                        info!(
                            job = %job.id,
                            committed = job_report.committed,
                            failed = job_report.failed,
                            "Job completed"
                        );
                        JobStatus::Completed { report: job_report }
                    },
                    Err(e) => {
                        error!(job = %job.id, error = %e, "Job failed");
                        if let Some(log) = &self.error_log {
                            log.record(format!("Error processing file {}", job.source.display()), &e);
                        }
                        JobStatus::Failed {
                            error: e.to_string(),
                        }
                    },
                };

                report.outcomes.push(JobOutcome {
                    job_id: job.id.clone(),
                    batch: batch_number,
                    status,
                });
            }
            report.batches = batch_number;
        }

        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            batches = report.batches,
            "All jobs finished"
        );

        if !jobs.is_empty() && report.succeeded() == 0 {
            return Err(IngestError::AllJobsFailed(jobs.len()));
        }

        Ok(report)
    }
}
