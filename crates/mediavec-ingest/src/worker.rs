//! Process-isolated job execution
//!
//! [`ProcessRunner`] re-invokes the current executable as `mediavec worker`,
//! writes a [`WorkerPayload`] as one JSON line on the child's stdin, and
//! expects exactly one [`WorkerMessage`] as the last line of its stdout.
//! The child logs to stderr, which is inherited.

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::error::JobError;
use crate::framework::{Job, JobRunner, PipelineReport};

/// Startup message for a worker process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPayload {
    pub job: Job,
    pub import_concurrency: usize,
}

/// Terminal message a worker prints before exiting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    Completed { job_id: String, report: PipelineReport },
    Failed { job_id: String, error: String },
}

/// Runs each job in a child process
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: PathBuf,
    args: Vec<String>,
    import_concurrency: usize,
}

impl ProcessRunner {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, import_concurrency: usize) -> Self {
        Self {
            program: program.into(),
            args,
            import_concurrency,
        }
    }

    /// Re-invoke this executable's hidden `worker` subcommand
    pub fn current_exe(import_concurrency: usize) -> std::io::Result<Self> {
        Ok(Self::new(
            std::env::current_exe()?,
            vec!["worker".to_string()],
            import_concurrency,
        ))
    }
}

#[async_trait]
impl JobRunner for ProcessRunner {
    #[instrument(skip_all, fields(job = %job.id))]
    async fn run_job(&self, job: &Job) -> Result<PipelineReport, JobError> {
        let spawn_error = |source: std::io::Error| JobError::Spawn {
            job: job.id.clone(),
            source,
        };

        let payload = WorkerPayload {
            job: job.clone(),
            import_concurrency: self.import_concurrency,
        };
        let mut line = serde_json::to_vec(&payload)
            .map_err(|e| JobError::failed(&job.id, format!("failed to encode payload: {}", e)))?;
        line.push(b'\n');

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        debug!(pid = ?child.id(), "Worker started");

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&line).await.map_err(spawn_error)?;
            // Dropping stdin closes the pipe so the worker sees EOF
        }

        let output = child.wait_with_output().await.map_err(spawn_error)?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        match last_message(&stdout) {
            Some(WorkerMessage::Failed { error, .. }) => Err(JobError::failed(&job.id, error)),
            // A non-zero exit fails the job even after a completion message
            Some(WorkerMessage::Completed { .. }) | None if !output.status.success() => {
                warn!(status = %output.status, "Worker exited unsuccessfully");
                Err(JobError::Exit {
                    job: job.id.clone(),
                    code: output.status.code(),
                })
            },
            Some(WorkerMessage::Completed { report, .. }) => Ok(report),
            None => Err(JobError::MissingCompletion {
                job: job.id.clone(),
            }),
        }
    }
}

fn last_message(stdout: &str) -> Option<WorkerMessage> {
    stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .and_then(|line| serde_json::from_str(line).ok())
}

/// Worker side: read one payload, run it, print one terminal message.
///
/// Returns whether the job completed.
pub async fn serve_one<R, W, F, Fut>(mut input: R, mut output: W, run: F) -> anyhow::Result<bool>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnOnce(WorkerPayload) -> Fut,
    Fut: Future<Output = anyhow::Result<PipelineReport>>,
{
    let mut raw = String::new();
    input
        .read_to_string(&mut raw)
        .await
        .context("Failed to read worker payload")?;
    let payload: WorkerPayload =
        serde_json::from_str(raw.trim()).context("Failed to parse worker payload")?;
    let job_id = payload.job.id.clone();

    let message = match run(payload).await {
        Ok(report) => WorkerMessage::Completed { job_id, report },
        Err(e) => WorkerMessage::Failed {
            job_id,
            error: format!("{:#}", e),
        },
    };
    let completed = matches!(message, WorkerMessage::Completed { .. });

    let mut line = serde_json::to_vec(&message)?;
    line.push(b'\n');
    output.write_all(&line).await?;
    output.flush().await?;

    Ok(completed)
}
