//! mediavec ingestion library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Streams media records through a bounded-concurrency pipeline: each record
//! is fetched or embedded remotely, then written to Postgres in its own
//! transaction.
//!
//! # Jobs
//!
//! - **import**: TSV files of `image_url<TAB>description`, copied into an S3 bucket
//! - **embed-images**: fills in embeddings for every stored image that lacks one
//! - **embed-video**: one row per video segment, written atomically
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mediavec_ingest::{config::Config, db, jobs, store::{PgVectorStore, S3MediaStore}};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pool = db::create_pool(&config.database).await?;
//!     let objects = Arc::new(S3MediaStore::new(&config.storage, std::time::Duration::from_secs(5))?);
//!     let vectors = Arc::new(PgVectorStore::new(pool));
//!
//!     let report = jobs::import_file("./cc12m_part01.tsv".as_ref(), objects, vectors, 4, None).await?;
//!     println!("{} rows imported", report.committed);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod framework;
pub mod jobs;
pub mod processors;
pub mod sources;
pub mod store;
pub mod worker;

pub use error::{IngestError, Result};
