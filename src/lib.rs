//! # docflow
//!
//! A document processing service: register a URL, fetch and segment its
//! content, then derive a summary and entity relations from it with a local
//! language model. Every derived output is cached in a content-addressed
//! store, and every task execution is recorded in a durable SQLite registry.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌───────────┐   ┌──────────────┐   ┌────────────┐
//! │ CLI / HTTP│──▶│ Workflow  │──▶│ Orchestrator │──▶│ Containers │
//! └───────────┘   └─────┬─────┘   └──────┬───────┘   └─────┬──────┘
//!                       │                │                 │
//!                       ▼                ▼                 ▼
//!                ┌────────────┐   ┌────────────┐   ┌──────────────┐
//!                │ Documents  │   │   Tasks    │   │ ContentStore │
//!                │  (SQLite)  │   │  (SQLite)  │   │ (disk/memory)│
//!                └────────────┘   └────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docflow init
//! docflow register https://arxiv.org/abs/2305.05003
//! docflow tasks --filter failed
//! docflow summary <hash>
//! docflow serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`urls`] | URL canonicalization and document hashes |
//! | [`store`] | Content-addressed segment and artifact storage |
//! | [`tasks`] | Durable task registry |
//! | [`documents`] | Registered documents and loader-spec dedup |
//! | [`container`] | Cache-or-produce containers per content type |
//! | [`orchestrator`] | Deadline-bounded task execution |
//! | [`loaders`] | arXiv, PDF, and web page loaders |
//! | [`extract`] | PDF, Atom, and HTML text extraction |
//! | [`chunk`] | Text segmentation |
//! | [`analysis`] | Summarization and relation extraction providers |
//! | [`workflow`] | Registration, scheduling, and queries |
//! | [`worker`] | Background worker pool |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod analysis;
pub mod chunk;
pub mod config;
pub mod container;
pub mod db;
pub mod documents;
pub mod error;
pub mod extract;
pub mod get;
pub mod loaders;
pub mod migrate;
pub mod models;
pub mod orchestrator;
pub mod server;
pub mod stats;
pub mod store;
pub mod tasks;
pub mod traits;
pub mod urls;
pub mod worker;
pub mod workflow;
