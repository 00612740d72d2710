//! Record sources: TSV files and query streams

pub mod stream;
pub mod tsv;

pub use stream::StreamSource;
pub use tsv::TsvSource;
