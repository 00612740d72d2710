//! Remote processors and persisters for the two record pipelines

pub mod embed;
pub mod import;

pub use embed::{EmbeddingPersister, EmbeddingProcessor};
pub use import::{ImportProcessor, MediaPersister, StoredMedia};
