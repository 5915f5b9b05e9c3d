//! # ipvec
//!
//! Ingests legal and patent JSON corpora into a partitioned vector store.
//!
//! Source files hold arrays of records whose shape varies by dataset. Each
//! record is normalized into labelled text plus a fixed metadata schema,
//! given a stable id derived from its source position, embedded with a local
//! or remote model, and upserted into its category's collection.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌───────────┐   ┌──────────┐   ┌───────────┐   ┌──────────────┐
//! │ discover  │──▶│ normalize │──▶│ identity │──▶│ embedding │──▶│ collections  │
//! │ globs     │   │ matchers  │   │ SHA-256  │   │ local/API │   │ store backend│
//! └───────────┘   └───────────┘   └──────────┘   └───────────┘   └──────────────┘
//!                         orchestrated per file by `ingest`
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ipvec init                    # create collections
//! ipvec sources                 # check globs and file counts
//! ipvec ingest --dry-run        # normalize only
//! ipvec ingest                  # embed and upsert
//! ipvec stats                   # point counts per collection
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`models`] | Records, ids, points and collection schemas |
//! | [`error`] | Error taxonomy |
//! | [`normalize`] | Raw JSON item → canonical record |
//! | [`identity`] | Stable point ids |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector store abstraction and backends |
//! | [`collections`] | Per-category collection lifecycle |
//! | [`discover`] | Corpus walking |
//! | [`ingest`] | Pipeline orchestration |
//! | [`progress`] | Progress reporting |
//! | [`sources`] | `ipvec sources` listing |
//! | [`stats`] | `ipvec stats` listing |
//! | [`embed_cmd`] | `ipvec embed` preview |
//! | [`logging`] | Tracing setup |

pub mod collections;
pub mod config;
pub mod discover;
pub mod embed_cmd;
pub mod embedding;
pub mod error;
pub mod identity;
pub mod ingest;
pub mod logging;
pub mod models;
pub mod normalize;
pub mod progress;
pub mod sources;
pub mod stats;
pub mod store;
