//! # Study Distill Core
//!
//! Runtime-free logic for Study Distill: data models, chunking, domain
//! classification, fingerprinting, tolerant response parsing, the merge
//! engine, quality validation, self-repair planning and the cache store
//! abstraction.
//!
//! This crate contains no tokio, sqlx, network or filesystem I/O. The
//! application crate drives these pieces from its async pipeline.
//!
//! | Module | Role |
//! |--------|------|
//! | [`text`] | Normalization, token estimates, sentence and key helpers |
//! | [`chunk`] | Token-bounded, order-preserving chunker |
//! | [`classify`] | Quantitative / qualitative / mixed labelling |
//! | [`fingerprint`] | Deterministic request digests for the cache |
//! | [`parse`] | Generator response → tagged [`parse::GenerationOutcome`] |
//! | [`merge`] | Reduce stage under three density policies |
//! | [`quality`] | Six-metric score and defect scan |
//! | [`repair`] | Typed repair targets, patches and the bounded state machine |
//! | [`store`] | [`store::CacheStore`] trait and in-memory backend |

pub mod chunk;
pub mod classify;
pub mod fingerprint;
pub mod merge;
pub mod models;
pub mod parse;
pub mod quality;
pub mod repair;
pub mod settings;
pub mod store;
pub mod text;
