//! Shared fakes for mediavec-ingest integration tests
//!
//! Everything here is in-memory: an object store, a vector store with
//! all-or-nothing writes and failure injection, an embedding service, and a
//! record source that remembers what the gate looked like at every pull.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mediavec_common::types::{Locator, MediaKind, Record, RecordId};
use mediavec_ingest::embedding::{Embedding, EmbeddingService};
use mediavec_ingest::error::{PersistError, RemoteError, SourceError};
use mediavec_ingest::framework::{ConcurrencyGate, RecordSource};
use mediavec_ingest::store::{MediaFilter, MediaRow, ObjectStore, StoredObject, VectorStore};

pub fn image_record(id: &str) -> Record {
    Record::new(
        RecordId::new(id).unwrap(),
        Locator::parse(&format!("https://origin.example/{}.jpg", id)).unwrap(),
        MediaKind::Image,
    )
    .with_description(format!("description of {}", id))
}

// ============================================================================
// Object store
// ============================================================================

/// Origin fetches are scripted per URL path; uploads land in a map
#[derive(Default)]
pub struct MemoryObjectStore {
    pub objects: Mutex<BTreeMap<String, Bytes>>,
    failing: HashSet<String>,
    delays: HashMap<String, Duration>,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetching any locator whose file name is `{name}.jpg` fails
    pub fn failing(mut self, name: &str) -> Self {
        self.failing.insert(format!("{}.jpg", name));
        self
    }

    pub fn delayed(mut self, name: &str, delay: Duration) -> Self {
        self.delays.insert(format!("{}.jpg", name), delay);
        self
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn fetch(&self, locator: &Locator) -> Result<Bytes, RemoteError> {
        let held = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(held, Ordering::SeqCst);

        let name = locator.file_name().unwrap_or_default().to_string();
        if let Some(delay) = self.delays.get(&name) {
            tokio::time::sleep(*delay).await;
        } else {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(&name) {
            return Err(RemoteError::Status {
                status: 404,
                url: locator.to_string(),
            });
        }
        Ok(Bytes::from(format!("bytes of {}", name)))
    }

    async fn put(&self, data: Bytes, name: &str, _content_type: &str) -> Result<StoredObject, RemoteError> {
        let size = data.len() as u64;
        self.objects.lock().unwrap().insert(name.to_string(), data);
        Ok(StoredObject {
            locator: Locator::s3("test-bucket", name),
            size,
            checksum: String::new(),
        })
    }
}

// ============================================================================
// Vector store
// ============================================================================

/// Rows keyed by id; an update touching a poisoned id writes nothing
#[derive(Default)]
pub struct MemoryVectorStore {
    rows: Mutex<BTreeMap<String, MediaRow>>,
    poisoned: Mutex<HashSet<String>>,
    pub transactions: AtomicUsize,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn poison(&self, id: &str) {
        self.poisoned.lock().unwrap().insert(id.to_string());
    }

    pub fn seed(&self, row: MediaRow) {
        self.rows.lock().unwrap().insert(row.id.to_string(), row);
    }

    pub fn ids(&self) -> Vec<String> {
        self.rows.lock().unwrap().keys().cloned().collect()
    }

    pub fn row(&self, id: &str) -> Option<MediaRow> {
        self.rows.lock().unwrap().get(id).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, MediaRow> {
        self.rows.lock().unwrap().clone()
    }
}

fn merge(existing: &mut MediaRow, update: &MediaRow) {
    if update.image_url.is_some() {
        existing.image_url = update.image_url.clone();
    }
    if update.storage_path.is_some() {
        existing.storage_path = update.storage_path.clone();
    }
    if update.description.is_some() {
        existing.description = update.description.clone();
    }
    if update.embedding.is_some() {
        existing.embedding = update.embedding.clone();
    }
    if update.segment.is_some() {
        existing.segment = update.segment;
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    fn query_stream(&self, filter: MediaFilter) -> BoxStream<'_, Result<Record, SourceError>> {
        let MediaFilter::PendingEmbedding = filter;
        let pending: Vec<_> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|row| row.embedding.is_none() && row.segment.is_none())
            .filter_map(|row| {
                let locator = Locator::parse(row.storage_path.as_deref()?).ok()?;
                Some(Ok(Record::new(row.id.clone(), locator, MediaKind::Image)))
            })
            .collect();
        stream::iter(pending).boxed()
    }

    async fn transactional_update(&self, rows: &[MediaRow]) -> Result<usize, PersistError> {
        tokio::task::yield_now().await;

        let poisoned = self.poisoned.lock().unwrap().clone();
        if let Some(bad) = rows.iter().find(|row| poisoned.contains(row.id.as_str())) {
            return Err(PersistError::Rejected(format!("constraint violated by {}", bad.id)));
        }

        let mut table = self.rows.lock().unwrap();
        for row in rows {
            table
                .entry(row.id.to_string())
                .and_modify(|existing| merge(existing, row))
                .or_insert_with(|| row.clone());
        }
        self.transactions.fetch_add(1, Ordering::SeqCst);
        Ok(rows.len())
    }
}

// ============================================================================
// Embedding service
// ============================================================================

#[derive(Default)]
pub struct FakeEmbeddingService {
    responses: Mutex<HashMap<String, Vec<Embedding>>>,
    pub calls: AtomicUsize,
}

impl FakeEmbeddingService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, locator: &str, embeddings: Vec<Embedding>) {
        self.responses
            .lock()
            .unwrap()
            .insert(locator.to_string(), embeddings);
    }
}

#[async_trait]
impl EmbeddingService for FakeEmbeddingService {
    async fn embed(&self, locator: &Locator, _kind: MediaKind) -> Result<Vec<Embedding>, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.responses
            .lock()
            .unwrap()
            .get(&locator.to_string())
            .cloned()
            .ok_or_else(|| RemoteError::Status {
                status: 500,
                url: locator.to_string(),
            })
    }
}

// ============================================================================
// Record source
// ============================================================================

/// What the gate looked like when the pipeline pulled
#[derive(Debug, Clone, Copy)]
pub struct PullObservation {
    pub paused: bool,
    pub in_flight: usize,
    pub released: u64,
}

/// Yields a fixed list of items and records the gate state at every pull
pub struct ObservedSource {
    items: std::vec::IntoIter<Result<Record, SourceError>>,
    gate: ConcurrencyGate,
    pub pulls: Arc<Mutex<Vec<PullObservation>>>,
}

impl ObservedSource {
    pub fn new(items: Vec<Result<Record, SourceError>>, gate: ConcurrencyGate) -> Self {
        Self {
            items: items.into_iter(),
            gate,
            pulls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn records(records: Vec<Record>, gate: ConcurrencyGate) -> Self {
        Self::new(records.into_iter().map(Ok).collect(), gate)
    }
}

#[async_trait]
impl RecordSource for ObservedSource {
    async fn next_record(&mut self) -> Option<Result<Record, SourceError>> {
        let stats = self.gate.stats();
        self.pulls.lock().unwrap().push(PullObservation {
            paused: self.gate.is_paused(),
            in_flight: stats.in_flight,
            released: stats.released,
        });
        self.items.next()
    }

    fn describe(&self) -> String {
        "observed".to_string()
    }
}
