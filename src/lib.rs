//! # ES Remapper
//!
//! Change the mapping of a live Elasticsearch index without downtime.
//!
//! A remap creates a new index with the desired mapping, copies every
//! document into it with a server-side reindex (optionally through an ingest
//! pipeline), verifies the copy is complete, restores normal index settings,
//! and finally moves an alias from the old index to the new one in a single
//! atomic request.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────────────┐
//! │   CLI    │──▶│  Remapper   │──▶│  Store (facade)  │
//! │ (remap)  │   │ stage runner│   │ Elastic / Memory │
//! └──────────┘   └──────┬──────┘   └──────────────────┘
//!                       │
//!               ┌───────┴────────┐
//!               ▼                ▼
//!        ┌────────────┐   ┌────────────┐
//!        │  progress  │   │ alias swap │
//!        └────────────┘   └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! remap check
//! remap mapping show products --out products.json
//! # edit products.json
//! remap pipeline test add-tags --index products
//! remap run --source products --target products_v2 --mapping products.json \
//!     --pipeline add-tags --move-alias products-live
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Request, task and outcome types |
//! | [`error`] | Store and operation errors, failure kinds |
//! | [`store`] | Store facade trait, Elasticsearch and in-memory backends |
//! | [`schema`] | Mapping inspection, pretty-printing and drafts |
//! | [`pipeline`] | Ingest pipeline dry runs |
//! | [`remap`] | The remap workflow |
//! | [`alias`] | Atomic alias swap |
//! | [`catalog`] | Cluster listings for the CLI |
//! | [`progress`] | Copy progress reporters |
//! | [`logging`] | `tracing` subscriber setup |

pub mod alias;
pub mod catalog;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod remap;
pub mod schema;
pub mod store;
