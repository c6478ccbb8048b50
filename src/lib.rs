//! # Study Distill
//!
//! Turns long study material (lecture notes, textbook chapters, papers)
//! into dense, cited, quality-checked study summaries.
//!
//! Input is chunked and classified, each chunk is summarized by an external
//! content generator under a bounded fan-out, the partial results are
//! merged under a density policy chosen by input volume, and the merged
//! summary is scored and repaired field by field until it is final-ready
//! or the repair budget runs out. Results are memoized in a SQLite cache
//! keyed by a fingerprint of the normalized request.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌──────────────┐
//! │  distill CLI │──▶│    Distiller     │──▶│ ResultCache  │──▶ SQLite
//! │  (main.rs)   │   │   (pipeline)     │   │ single-flight│
//! └──────────────┘   └────────┬─────────┘   └──────────────┘
//!                             │
//!              ┌──────────────┼───────────────┐
//!              ▼              ▼               ▼
//!        ┌───────────┐  ┌───────────┐  ┌─────────────┐
//!        │ synthesis │  │   merge   │  │ self_repair │
//!        │ (fan-out) │  │  (core)   │  │  (bounded)  │
//!        └─────┬─────┘  └───────────┘  └──────┬──────┘
//!              └──────────┬────────────────────┘
//!                         ▼
//!                ContentGenerator (OpenAI-compatible HTTP)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! distill init                            # create the cache database
//! distill run notes.md                    # summarize a file
//! distill run notes.md --dry-run          # show the plan only
//! distill cache stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Typed generation and pipeline errors |
//! | [`logging`] | Tracing subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite cache backend |
//! | [`cache`] | Result cache with single-flight |
//! | [`generation`] | Content generator abstraction |
//! | [`synthesis`] | Map stage: retrying, bounded fan-out |
//! | [`self_repair`] | Targeted regeneration loop |
//! | [`pipeline`] | The [`pipeline::Distiller`] service |
//! | [`summarize_cmd`] | `distill run` |
//! | [`cache_cmd`] | `distill cache` |
//!
//! Pure logic (chunking, classification, merge, validation, repair
//! planning) lives in the `study-distill-core` crate.

pub mod cache;
pub mod cache_cmd;
pub mod config;
pub mod db;
pub mod error;
pub mod generation;
pub mod logging;
pub mod migrate;
pub mod pipeline;
pub mod self_repair;
pub mod sqlite_store;
pub mod summarize_cmd;
pub mod synthesis;
