//! mediavec common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, identifiers, and logging for the mediavec workspace.
//!
//! # Overview
//!
//! - **Types**: records, media kinds, storage locators and derived embeddings
//! - **Checksums**: deterministic content identifiers and upload checksums
//! - **Logging**: tracing subscriber setup and the append-only failure log
//!
//! # Example
//!
//! ```
//! use mediavec_common::checksum::content_id;
//! use mediavec_common::types::{Locator, MediaKind, Record};
//!
//! let id = content_id("a red bicycle leaning on a wall");
//! let record = Record::new(id, Locator::parse("https://example.com/bike.jpg").unwrap(), MediaKind::Image);
//! assert_eq!(record.id.as_str().len(), 32);
//! ```

pub mod checksum;
pub mod error;
pub mod error_log;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CommonError, Result};
