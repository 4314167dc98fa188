//! # DocQA
//!
//! Retrieval-augmented question answering over a local document corpus.
//!
//! DocQA chunks ingested documents into overlapping fragments, embeds
//! them through a pluggable provider (with a content-hash cache that
//! never computes the same embedding twice), indexes the vectors for
//! exact nearest-neighbor search, and assembles budget-bounded context
//! windows for a generation backend to answer questions and produce
//! summaries.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌─────────────────┐   ┌──────────────┐
//! │  Chunker  │──▶│  Content Cache   │──▶│ Vector Index │
//! │ (docqa-   │   │ (single-flight,  │   │ (generation  │
//! │   core)   │   │  bounded LRU)    │   │    swap)     │
//! └───────────┘   └─────────────────┘   └──────┬───────┘
//!                                              │
//!                     ┌────────────────────────┤
//!                     ▼                        ▼
//!               ┌───────────┐          ┌──────────────┐
//!               │ Retriever │─────────▶│  Assembler   │──▶ prompt ──▶ answer
//!               │ (k-NN +   │          │ (budgeted    │
//!               │ diversity)│          │  window)     │
//!               └───────────┘          └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`cache`] | Content-hash embedding cache |
//! | [`providers`] | Embedding/generation backends (HTTP + stubs) |
//! | [`pipeline`] | Ingest/query orchestration |
//! | [`snapshot`] | Durable index snapshots |
//! | [`commands`] | CLI command implementations |

pub mod cache;
pub mod commands;
pub mod config;
pub mod pipeline;
pub mod providers;
pub mod snapshot;
