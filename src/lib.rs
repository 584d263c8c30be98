//! # paperchat
//!
//! Conversational question answering over an uploaded PDF.
//!
//! A document is partitioned into typed elements, chunked by section,
//! enriched (chunks with tables or images are replaced by a searchable
//! summary), and indexed for hybrid keyword + semantic retrieval. Questions
//! are reformulated against the session's chat history, answered from the
//! reranked context, and appended to that history.
//!
//! ## Architecture
//!
//! ```text
//!  PDF ──▶ partition ──▶ chunk ──▶ enrich ──▶ index
//!                                    │          │
//!                                 vision     BM25 + vectors
//!                                               │
//!                                               ▼
//!  question ──▶ engine ──▶ hybrid retrieval (RRF) ──▶ rerank ──▶ answer
//!                 ▲                                              │
//!                 └──────────────── session history ◀────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`partition`] | Page-selective PDF partitioning |
//! | [`chunk`] | Title-aware chunking |
//! | [`vision`] | Memoized image description |
//! | [`enrich`] | Table/image chunk summarization |
//! | [`index`] | BM25 and vector indexes |
//! | [`retrieval`] | Retriever trait and rank fusion |
//! | [`rerank`] | Cross-encoder reranking |
//! | [`engine`] | Conversational query engine |
//! | [`session`] | Per-session chat histories |
//! | [`pipeline`] | Upload / query / clear boundary |
//! | [`summary`] | Whole-document summary |
//! | [`llm`] | Text generation and vision providers |
//! | [`embedding`] | Embedding providers |
//! | [`server`] | HTTP API |

pub mod chunk;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod enrich;
pub mod error;
pub mod index;
pub mod llm;
pub mod models;
pub mod partition;
pub mod pipeline;
pub mod prompts;
pub mod rerank;
pub mod retrieval;
pub mod server;
pub mod session;
pub mod summary;
pub mod vision;
