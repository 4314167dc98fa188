//! # DocQA Core
//!
//! Shared retrieval-engine logic for DocQA: data models, chunking,
//! vector indexing, nearest-neighbor retrieval, context assembly, and
//! the capability traits for embedding and generation backends.
//!
//! This crate contains no tokio, HTTP, or filesystem dependencies. The
//! application crate (`docqa`) provides configuration, the content
//! cache, concrete embedding/generation providers, snapshot
//! persistence, and the pipeline orchestrator.

pub mod assembler;
pub mod chunker;
pub mod error;
pub mod index;
pub mod models;
pub mod provider;
pub mod retriever;

pub use error::{CoreError, Result};
