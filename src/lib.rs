//! # Catalog Harness
//!
//! Fetch, reconcile, archive and publish affiliate catalog records keyed by
//! content id (CID).
//!
//! Each CID is looked up in two places: the commerce API, which is the
//! authority for catalog metadata, and the rendered product page, which is
//! the only place review text and measurements appear. The two are merged
//! into one enriched record, appended to append-only JSON Lines logs, and
//! later turned into Markdown drafts and published into SQLite.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌───────────────┐   ┌────────────────┐
//! │ API fetcher │──▶│ Merge engine  │──▶│ history.jsonl  │
//! │ Page prober │   │ URL filter    │   │ daily/*.jsonl  │
//! │ Samples     │   │ Size upgrade  │   │ latest, export │
//! └─────────────┘   └───────────────┘   └───────┬────────┘
//!                                               ▼
//!                   ┌───────────────┐   ┌────────────────┐
//!                   │ SQLite posts  │◀──│ drafts + queue │
//!                   └───────────────┘   └────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cath init                      # create the posts database
//! cath run --cids sweet101       # fetch, merge and archive one CID
//! cath run                       # pick the next unseen CID automatically
//! cath draft latest              # draft + queue the newest record
//! cath publish                   # import queued drafts
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Raw and enriched record types |
//! | [`error`] | Fetch and record error types |
//! | [`traits`] | Source traits and the [`traits::Sources`] bundle |
//! | [`source_api`] | Commerce API fetcher and CID listings |
//! | [`browser`] | Headless-browser HTTP client |
//! | [`source_probe`] | Product page prober |
//! | [`source_samples`] | Focused sample-image fetcher |
//! | [`url_filter`] | Sample-image URL filter |
//! | [`upgrade`] | Size-upgrade resolver |
//! | [`merge`] | Merge engine |
//! | [`jsonl`] | JSON Lines reading and appending |
//! | [`archive`] | History, daily and snapshot policies |
//! | [`processed`] | Processed-CID set and automatic selection |
//! | [`pipeline`] | Run orchestration |
//! | [`draft`] | Markdown drafts and publish queue |
//! | [`publish`] | Publish importer |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`stats`], [`sources`], [`show`], [`export`], [`inspect`] | Inspection commands |
//! | [`logging`] | Tracing subscriber setup |

pub mod archive;
pub mod browser;
pub mod config;
pub mod db;
pub mod draft;
pub mod error;
pub mod export;
pub mod inspect;
pub mod jsonl;
pub mod logging;
pub mod merge;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod processed;
pub mod publish;
pub mod show;
pub mod source_api;
pub mod source_probe;
pub mod source_samples;
pub mod sources;
pub mod stats;
pub mod traits;
pub mod upgrade;
pub mod url_filter;
