//! # Caseline
//!
//! An AI-assisted backend for analyzing probation and parole violations.
//!
//! Caseline serves a JSON HTTP API for retrieval-augmented chat and one-shot
//! violation text analysis, backed by a SQLite store (FTS5 for lexical
//! search, BLOB-encoded vectors for similarity) and an OpenAI-compatible
//! language model.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────────┐   ┌──────────────┐
//! │ HTTP (axum)  │──▶│ Chat orchestrator │──▶│ SQLite store │
//! │ /v1/chat     │   │ Analysis service  │   │ FTS5 + vecs  │
//! │ /v1/analysis │   └─────────┬─────────┘   └──────────────┘
//! └──────────────┘             │
//!                              ▼
//!                     ┌────────────────┐
//!                     │ Language model │
//!                     │ chat + embed   │
//!                     └────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! caseline init                 # create database
//! caseline seed                 # load sample records and guidance
//! caseline serve                # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types and the analysis contract |
//! | [`error`] | Error taxonomy with stable wire codes |
//! | [`store`] | Typed store adapter over SQLite |
//! | [`search_index`] | Lexical + vector hybrid search |
//! | [`llm`] | Language-model adapter (chat, embeddings) |
//! | [`chat`] | Conversation orchestrator |
//! | [`analysis`] | Violation analysis service |
//! | [`server`] | HTTP API |
//! | [`seed`] | Sample data loader |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod analysis;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod search_index;
pub mod seed;
pub mod server;
pub mod store;
