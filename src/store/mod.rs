//! Store facade for the remap workflow.
//!
//! The [`Store`] trait defines every remote operation the orchestrator, alias
//! swap, pipeline tester and schema inspector need, so the workflow can run
//! against a live cluster ([`elastic::ElasticStore`]) or an in-process fake
//! ([`memory::InMemoryStore`]).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod elastic;
pub mod memory;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreResult;
use crate::models::{AliasAction, BulkCopySpec, CopyTask, SchemaDocument, TaskId};

/// Settings key for the near-real-time refresh interval.
pub const REFRESH_INTERVAL: &str = "index.refresh_interval";
/// Settings key for the replica count.
pub const NUMBER_OF_REPLICAS: &str = "index.number_of_replicas";

/// Abstract remote data store.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ping`](Store::ping) | Connectivity check |
/// | [`list_collections`](Store::list_collections) | Names matching a pattern, system ones excluded |
/// | [`get_aliases`](Store::get_aliases) | Aliases attached to one collection |
/// | [`list_pipelines`](Store::list_pipelines) | Transform pipeline ids by prefix |
/// | [`collection_exists`](Store::collection_exists) | Existence check |
/// | [`create_collection`](Store::create_collection) | Create with a schema |
/// | [`delete_collection`](Store::delete_collection) | Delete |
/// | [`get_schema`](Store::get_schema) | Current schema |
/// | [`put_setting`](Store::put_setting) | Update one dynamic setting |
/// | [`submit_bulk_copy`](Store::submit_bulk_copy) | Start an async copy, returns a task id |
/// | [`get_task_status`](Store::get_task_status) | Poll a copy task |
/// | [`update_aliases`](Store::update_aliases) | Atomic compound alias update |
/// | [`add_alias`](Store::add_alias) | Attach one alias |
/// | [`simulate_pipeline`](Store::simulate_pipeline) | Dry-run a pipeline on one record |
/// | [`sample_one`](Store::sample_one) | Fetch an arbitrary record |
#[async_trait]
pub trait Store: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;

    /// Collection names matching `pattern`, sorted, system collections excluded.
    ///
    /// A pattern that matches nothing gives an empty list. Any other store
    /// failure is an error.
    async fn list_collections(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// Aliases of `collection`, never including the collection's own name.
    async fn get_aliases(&self, collection: &str) -> StoreResult<Vec<String>>;

    /// Pipeline ids starting with `prefix`.
    async fn list_pipelines(&self, prefix: &str) -> StoreResult<Vec<String>>;

    async fn collection_exists(&self, name: &str) -> StoreResult<bool>;

    async fn create_collection(&self, name: &str, schema: &SchemaDocument) -> StoreResult<()>;

    async fn delete_collection(&self, name: &str) -> StoreResult<()>;

    async fn get_schema(&self, name: &str) -> StoreResult<SchemaDocument>;

    async fn put_setting(&self, name: &str, key: &str, value: &Value) -> StoreResult<()>;

    /// Start a bulk copy without waiting for it to finish.
    async fn submit_bulk_copy(&self, spec: &BulkCopySpec) -> StoreResult<TaskId>;

    async fn get_task_status(&self, task: &TaskId) -> StoreResult<CopyTask>;

    /// Apply all actions in one atomic request.
    async fn update_aliases(&self, actions: &[AliasAction]) -> StoreResult<()>;

    async fn add_alias(&self, collection: &str, alias: &str) -> StoreResult<()>;

    /// Run `sample` through `pipeline` without writing anything.
    async fn simulate_pipeline(&self, pipeline: &str, sample: &Value) -> StoreResult<Value>;

    /// One arbitrary record from `collection`, or `None` when it is empty.
    async fn sample_one(&self, collection: &str) -> StoreResult<Option<Value>>;
}
