//! Batch launching and failure isolation of the job orchestrator

#![allow(clippy::unwrap_used, clippy::expect_used)]

use futures::FutureExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use mediavec_common::error_log::{read_entries, ErrorLog};
use mediavec_ingest::error::IngestError;
use mediavec_ingest::framework::{Job, JobOrchestrator, JobStatus, PipelineReport, TaskRunner};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Start(String),
    End(String),
}

fn recording_runner(events: Arc<Mutex<Vec<Event>>>, failing: &'static str) -> TaskRunner {
    TaskRunner::new(move |job: Job| {
        let events = Arc::clone(&events);
        async move {
            events.lock().unwrap().push(Event::Start(job.id.clone()));
            // Jobs finish out of launch order
            let delay = if job.id.starts_with('a') || job.id.starts_with('c') { 30 } else { 5 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            events.lock().unwrap().push(Event::End(job.id.clone()));

            if job.id == failing {
                anyhow::bail!("unreadable file {}", job.source.display());
            }
            Ok::<_, anyhow::Error>(PipelineReport {
                name: job.id,
                admitted: 3,
                committed: 3,
                rows_written: 3,
                ..Default::default()
            })
        }
        .boxed()
    })
}

fn position(events: &[Event], event: &Event) -> usize {
    events.iter().position(|e| e == event).unwrap()
}

#[tokio::test]
async fn test_batches_run_to_completion_in_order() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("error.log");
    let error_log = ErrorLog::open(&log_path).unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let runner = recording_runner(Arc::clone(&events), "b.tsv");
    let orchestrator = JobOrchestrator::new(2).unwrap().with_error_log(error_log.clone());

    let jobs = ["a.tsv", "b.tsv", "c.tsv", "d.tsv"]
        .iter()
        .map(|name| Job::for_file(dir.path().join(name)))
        .collect();
    let report = orchestrator.run(jobs, &runner).await.unwrap();

    assert_eq!(report.batches, 2);
    let batches: Vec<_> = report.outcomes.iter().map(|o| (o.job_id.as_str(), o.batch)).collect();
    assert_eq!(batches, vec![("a.tsv", 1), ("b.tsv", 1), ("c.tsv", 2), ("d.tsv", 2)]);

    // The second batch starts only after both jobs of the first have ended
    let events = events.lock().unwrap().clone();
    let first_batch_done = position(&events, &Event::End("a.tsv".into()))
        .max(position(&events, &Event::End("b.tsv".into())));
    assert!(position(&events, &Event::Start("c.tsv".into())) > first_batch_done);
    assert!(position(&events, &Event::Start("d.tsv".into())) > first_batch_done);

    assert_eq!(report.succeeded(), 3);
    assert_eq!(report.failed(), 1);
    let failure = report.failures().next().unwrap();
    assert_eq!(failure.job_id, "b.tsv");
    assert!(matches!(&failure.status, JobStatus::Failed { error } if error.contains("unreadable file")));
    assert_eq!(report.totals().committed, 9);

    drop(orchestrator);
    drop(error_log);
    let entries = read_entries(&log_path).unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].message.starts_with("Error processing file"));
    assert!(entries[0].message.ends_with("b.tsv"));
}

#[tokio::test]
async fn test_short_last_batch() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let runner = recording_runner(Arc::clone(&events), "none");
    let jobs = vec![Job::for_file("a.tsv"), Job::for_file("b.tsv"), Job::for_file("c.tsv")];

    let report = JobOrchestrator::new(2).unwrap().run(jobs, &runner).await.unwrap();
    assert_eq!(report.batches, 2);
    assert_eq!(report.outcomes.last().unwrap().batch, 2);
    assert_eq!(report.failed(), 0);
}

#[tokio::test]
async fn test_parallelism_larger_than_job_count() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let runner = recording_runner(Arc::clone(&events), "none");
    let jobs = vec![Job::for_file("a.tsv"), Job::for_file("b.tsv")];

    let report = JobOrchestrator::new(10).unwrap().run(jobs, &runner).await.unwrap();
    assert_eq!(report.batches, 1);

    // Both started before either ended
    let events = events.lock().unwrap().clone();
    assert!(matches!(events[0], Event::Start(_)));
    assert!(matches!(events[1], Event::Start(_)));
}

#[tokio::test]
async fn test_every_job_failing_is_fatal() {
    let runner = TaskRunner::new(|job: Job| {
        async move { Err::<PipelineReport, _>(anyhow::anyhow!("no such file {}", job.id)) }.boxed()
    });
    let jobs = vec![Job::for_file("x.tsv"), Job::for_file("y.tsv"), Job::for_file("z.tsv")];

    let err = JobOrchestrator::new(2).unwrap().run(jobs, &runner).await.unwrap_err();
    assert!(matches!(err, IngestError::AllJobsFailed(3)));
}
