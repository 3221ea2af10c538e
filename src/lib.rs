//! carechat — a retrieval-grounded chat service for childcare
//! assistance questions.
//!
//! The crate indexes a directory of policy documents into SQLite (FTS5
//! for sparse retrieval, stored vectors for dense retrieval) and
//! answers questions through a staged pipeline:
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────┐   ┌────────┐   ┌──────────┐
//! │ classify │──▶│ reformulate │──▶│ retrieve │──▶│ rerank │──▶│ generate │
//! └──────────┘   └─────────────┘   └──────────┘   └────────┘   └──────────┘
//!   intent tag     query rewrite     SQLite index   precision     grounded
//!                                    (fts/vector)   pass          answer
//! ```
//!
//! Every AI-backed stage resolves its backend through the
//! [`providers::ProviderRegistry`], so vendors can be swapped per
//! capability (and per request for the LLM stages) without touching
//! pipeline logic. The `builtin` provider keeps everything runnable
//! offline.

pub mod chunk;
pub mod config;
pub mod corpus;
pub mod db;
pub mod embedding;
pub mod error;
pub mod generate;
pub mod intent;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod providers;
pub mod reformulate;
pub mod rerank;
pub mod retrieve;
pub mod server;
pub mod session;
