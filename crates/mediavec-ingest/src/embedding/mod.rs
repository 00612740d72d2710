//! Embedding service client and its credentials

pub mod client;
pub mod credentials;

pub use client::{Embedding, EmbeddingClient, EmbeddingService};
pub use credentials::{Anonymous, CommandToken, CredentialSupplier, StaticToken};
