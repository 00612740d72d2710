//! Admission, release, and failure isolation of the record pipeline

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use common::{image_record, MemoryObjectStore, MemoryVectorStore, ObservedSource};
use mediavec_common::error_log::{read_entries, ErrorLog};
use mediavec_common::types::{Locator, Record};
use mediavec_ingest::error::{IngestError, RemoteError, SourceError};
use mediavec_ingest::framework::{ConcurrencyGate, Pipeline, RemoteProcessor};
use mediavec_ingest::processors::{ImportProcessor, MediaPersister};

type ImportPipeline = Pipeline<ImportProcessor<MemoryObjectStore>, MediaPersister<MemoryVectorStore>>;

fn import_pipeline(
    objects: MemoryObjectStore,
    vectors: Arc<MemoryVectorStore>,
    gate: ConcurrencyGate,
) -> (ImportPipeline, Arc<MemoryObjectStore>) {
    let objects = Arc::new(objects);
    let pipeline = Pipeline::new(
        "test-import",
        Arc::new(ImportProcessor::new(Arc::clone(&objects))),
        Arc::new(MediaPersister::new(vectors)),
        gate,
    );
    (pipeline, objects)
}

#[tokio::test]
async fn test_in_flight_never_exceeds_limit() {
    let mut objects = MemoryObjectStore::new();
    let mut records = Vec::new();
    for i in 0..40 {
        let name = format!("r{}", i);
        objects = objects.delayed(&name, Duration::from_millis((i % 7) as u64 * 3));
        if i % 5 == 0 {
            objects = objects.failing(&name);
        }
        records.push(image_record(&name));
    }

    let vectors = Arc::new(MemoryVectorStore::new());
    vectors.poison("r3");
    vectors.poison("r17");

    let gate = ConcurrencyGate::new(4).unwrap();
    let (pipeline, objects) = import_pipeline(objects, Arc::clone(&vectors), gate.clone());
    let mut source = ObservedSource::records(records, gate.clone());

    let report = pipeline.run(&mut source).await.unwrap();

    assert_eq!(report.admitted, 40);
    assert_eq!(report.committed + report.failed, 40);
    assert_eq!(report.failed, 8 + 2);
    assert!(report.peak_in_flight <= 4);
    assert!(objects.peak_in_flight.load(std::sync::atomic::Ordering::SeqCst) <= 4);
    assert!(source.pulls.lock().unwrap().iter().all(|p| p.in_flight <= 4));
    assert_eq!(vectors.ids().len(), 30);
}

#[tokio::test]
async fn test_every_admitted_slot_is_released() {
    let objects = MemoryObjectStore::new().failing("fetch-fails");
    let vectors = Arc::new(MemoryVectorStore::new());
    vectors.poison("persist-fails");

    let gate = ConcurrencyGate::new(2).unwrap();
    let (pipeline, _) = import_pipeline(objects, Arc::clone(&vectors), gate.clone());
    let mut source = ObservedSource::records(
        vec![
            image_record("fetch-fails"),
            image_record("persist-fails"),
            image_record("ok"),
        ],
        gate.clone(),
    );

    let report = pipeline.run(&mut source).await.unwrap();
    let stats = gate.stats();

    assert_eq!(report.committed, 1);
    assert_eq!(report.failed, 2);
    assert_eq!(stats.admitted, stats.released);
    assert_eq!(stats.in_flight, 0);
    assert!(!gate.is_paused());
}

#[tokio::test]
async fn test_source_is_never_pulled_while_paused() {
    let mut objects = MemoryObjectStore::new();
    let mut records = Vec::new();
    for i in 0..6 {
        let name = format!("slow{}", i);
        objects = objects.delayed(&name, Duration::from_millis(20));
        records.push(image_record(&name));
    }

    let gate = ConcurrencyGate::new(2).unwrap();
    let (pipeline, _) = import_pipeline(objects, Arc::new(MemoryVectorStore::new()), gate.clone());
    let mut source = ObservedSource::records(records, gate.clone());

    let report = pipeline.run(&mut source).await.unwrap();
    let stats = gate.stats();

    assert_eq!(report.committed, 6);
    assert!(stats.pauses >= 1, "a saturated gate must pause");
    assert_eq!(stats.pauses, stats.resumes);
    assert_eq!(report.pauses, stats.pauses);

    let pulls = source.pulls.lock().unwrap();
    assert!(pulls.iter().all(|p| !p.paused));
    // Every pull past the first two had to wait for a release
    for (index, pull) in pulls.iter().enumerate().skip(2) {
        assert!(pull.released >= (index as u64) - 1, "pull {} saw {:?}", index, pull);
    }
}

#[tokio::test]
async fn test_one_failed_record_does_not_affect_its_neighbours() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("error.log");
    let error_log = ErrorLog::open(&log_path).unwrap();

    let objects = MemoryObjectStore::new()
        .delayed("r1", Duration::from_millis(50))
        .failing("r2");
    let vectors = Arc::new(MemoryVectorStore::new());

    let gate = ConcurrencyGate::new(2).unwrap();
    let (pipeline, objects) = import_pipeline(objects, Arc::clone(&vectors), gate.clone());
    let pipeline = pipeline.with_error_log(error_log.clone());
    let mut source = ObservedSource::records(
        vec![image_record("r1"), image_record("r2"), image_record("r3")],
        gate.clone(),
    );

    let report = pipeline.run(&mut source).await.unwrap();
    assert_eq!(report.committed, 2);
    assert_eq!(report.failed, 1);

    // r3 is only pulled once r1 or r2 has given its slot back
    let pulls = source.pulls.lock().unwrap().clone();
    assert_eq!(pulls.len(), 4);
    assert!(pulls[2].released >= 1);

    assert_eq!(vectors.ids(), vec!["r1", "r3"]);
    assert_eq!(objects.keys(), vec!["r1.jpg", "r3.jpg"]);

    drop(pipeline);
    drop(error_log);
    let entries = read_entries(&log_path).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].message, "Error processing record r2");
    assert!(entries[0].stack.contains("404"));
}

#[tokio::test]
async fn test_rerunning_the_same_records_is_idempotent() {
    let vectors = Arc::new(MemoryVectorStore::new());
    let records = || vec![image_record("a"), image_record("b")];

    for _ in 0..2 {
        let gate = ConcurrencyGate::new(2).unwrap();
        let (pipeline, _) = import_pipeline(MemoryObjectStore::new(), Arc::clone(&vectors), gate.clone());
        let report = pipeline.run(&mut ObservedSource::records(records(), gate)).await.unwrap();
        assert_eq!(report.committed, 2);
    }

    let rows = vectors.snapshot();
    assert_eq!(rows.len(), 2);
    let a = &rows["a"];
    assert_eq!(a.image_url.as_deref(), Some("https://origin.example/a.jpg"));
    assert_eq!(a.storage_path.as_deref(), Some("s3://test-bucket/a.jpg"));
    assert_eq!(a.description.as_deref(), Some("description of a"));
}

#[tokio::test]
async fn test_source_failure_drains_and_returns_partial_report() {
    let objects = MemoryObjectStore::new()
        .delayed("first", Duration::from_millis(20))
        .delayed("second", Duration::from_millis(20));
    let vectors = Arc::new(MemoryVectorStore::new());

    let gate = ConcurrencyGate::new(4).unwrap();
    let (pipeline, _) = import_pipeline(objects, Arc::clone(&vectors), gate.clone());
    let mut source = ObservedSource::new(
        vec![
            Ok(image_record("first")),
            Ok(image_record("second")),
            Err(SourceError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "cursor lost",
            ))),
            Ok(image_record("never")),
        ],
        gate.clone(),
    );

    let err = pipeline.run(&mut source).await.unwrap_err();
    match err {
        IngestError::Source { source, report } => {
            assert!(matches!(source, SourceError::Io(_)));
            assert_eq!(report.admitted, 2);
            assert_eq!(report.committed, 2);
        },
        other => panic!("expected source error, got {:?}", other),
    }

    // In-flight records finished before the error surfaced
    assert_eq!(vectors.ids(), vec!["first", "second"]);
    assert_eq!(gate.in_flight(), 0);
}

#[tokio::test]
async fn test_malformed_rows_are_skipped() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("error.log");
    let error_log = ErrorLog::open(&log_path).unwrap();

    let gate = ConcurrencyGate::new(2).unwrap();
    let vectors = Arc::new(MemoryVectorStore::new());
    let (pipeline, _) = import_pipeline(MemoryObjectStore::new(), Arc::clone(&vectors), gate.clone());
    let pipeline = pipeline.with_error_log(error_log.clone());
    let mut source = ObservedSource::new(
        vec![
            Ok(image_record("good")),
            Err(SourceError::malformed(2, "missing description")),
            Ok(image_record("also-good")),
        ],
        gate.clone(),
    );

    let report = pipeline.run(&mut source).await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.committed, 2);
    assert_eq!(gate.stats().admitted, gate.stats().released);

    drop(pipeline);
    drop(error_log);
    let entries = read_entries(&log_path).unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].stack.contains("missing description"));
}

#[tokio::test]
async fn test_repeated_id_is_processed_once() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("error.log");
    let error_log = ErrorLog::open(&log_path).unwrap();

    let mut repeat = image_record("same");
    repeat.locator = Locator::parse("https://mirror.example/other.jpg").unwrap();

    let gate = ConcurrencyGate::new(2).unwrap();
    let vectors = Arc::new(MemoryVectorStore::new());
    let (pipeline, objects) = import_pipeline(
        MemoryObjectStore::new().delayed("same", Duration::from_millis(20)),
        Arc::clone(&vectors),
        gate.clone(),
    );
    let pipeline = pipeline.with_error_log(error_log.clone());
    let mut source = ObservedSource::records(
        vec![image_record("same"), repeat, image_record("next")],
        gate.clone(),
    );

    let report = pipeline.run(&mut source).await.unwrap();
    assert_eq!(report.admitted, 2);
    assert_eq!(report.committed, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(vectors.transactions.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_eq!(objects.keys(), vec!["next.jpg", "same.jpg"]);
    // The repeat's origin was never fetched
    assert_eq!(
        objects.objects.lock().unwrap()["same.jpg"],
        bytes::Bytes::from("bytes of same.jpg")
    );
    assert_eq!(
        vectors.row("same").unwrap().image_url.as_deref(),
        Some("https://origin.example/same.jpg")
    );
    assert_eq!(gate.stats().admitted, gate.stats().released);

    drop(pipeline);
    drop(error_log);
    let entries = read_entries(&log_path).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].message, "Skipping duplicate record same");
}

struct PanickingProcessor;

#[async_trait]
impl RemoteProcessor for PanickingProcessor {
    type Output = ();

    async fn process(&self, record: &Record) -> Result<(), RemoteError> {
        if record.id.as_str() == "boom" {
            panic!("processor bug");
        }
        Ok(())
    }
}

struct NoopPersister;

#[async_trait]
impl mediavec_ingest::framework::Persister<()> for NoopPersister {
    async fn persist(
        &self,
        _record: &Record,
        _output: &(),
    ) -> Result<usize, mediavec_ingest::error::PersistError> {
        Ok(1)
    }
}

#[tokio::test]
async fn test_panicking_record_releases_its_slot() {
    let gate = ConcurrencyGate::new(1).unwrap();
    let pipeline = Pipeline::new(
        "panics",
        Arc::new(PanickingProcessor),
        Arc::new(NoopPersister),
        gate.clone(),
    );
    let mut source = ObservedSource::records(
        vec![image_record("before"), image_record("boom"), image_record("after")],
        gate.clone(),
    );

    let report = pipeline.run(&mut source).await.unwrap();
    assert_eq!(report.committed, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(gate.in_flight(), 0);
}

#[test]
fn test_zero_limit_is_rejected() {
    assert!(matches!(ConcurrencyGate::new(0), Err(IngestError::ZeroLimit)));
}
