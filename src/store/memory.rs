//! In-memory [`Store`] implementation for tests and offline runs.
//!
//! Collections, aliases and pipelines live in maps behind `std::sync::RwLock`.
//! Every facade call is recorded so tests can assert which operations ran,
//! failures can be injected per operation, and the progress a copy task
//! reports can be scripted tick by tick.
//!
//! Without a script, a submitted copy runs to completion immediately: the
//! records are copied (through the pipeline, if any) and the first status
//! poll reports `done` with `processed == total`. Scripted tasks only report
//! the scripted statuses and copy nothing.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::error::{StoreError, StoreResult};
use crate::models::{AliasAction, BulkCopySpec, CopyTask, SchemaDocument, TaskId};

use super::Store;

/// Facade operation, used for call recording and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Ping,
    ListCollections,
    GetAliases,
    ListPipelines,
    CollectionExists,
    CreateCollection,
    DeleteCollection,
    GetSchema,
    PutSetting,
    SubmitBulkCopy,
    GetTaskStatus,
    UpdateAliases,
    AddAlias,
    SimulatePipeline,
    SampleOne,
}

/// A recorded facade call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: Op,
    /// Collection, task or pipeline the call addressed.
    pub target: String,
    /// Extra detail, e.g. `index.refresh_interval=-1` for settings.
    pub detail: String,
}

/// One scripted status observation of a copy task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStep {
    pub total: u64,
    pub processed: u64,
    pub done: bool,
    pub error: Option<String>,
}

impl TaskStep {
    pub fn running(processed: u64, total: u64) -> Self {
        Self {
            total,
            processed,
            done: false,
            error: None,
        }
    }

    pub fn done(processed: u64, total: u64) -> Self {
        Self {
            total,
            processed,
            done: true,
            error: None,
        }
    }

    pub fn failed(processed: u64, total: u64, error: &str) -> Self {
        Self {
            total,
            processed,
            done: false,
            error: Some(error.to_string()),
        }
    }
}

struct StoredCollection {
    schema: SchemaDocument,
    settings: Map<String, Value>,
    records: Vec<Value>,
}

struct FailRule {
    op: Op,
    detail: Option<String>,
    error: StoreError,
}

/// In-memory store for tests and offline runs.
pub struct InMemoryStore {
    collections: RwLock<BTreeMap<String, StoredCollection>>,
    /// alias -> collections it resolves to
    aliases: RwLock<BTreeMap<String, BTreeSet<String>>>,
    /// pipeline id -> fields the pipeline sets on every record
    pipelines: RwLock<BTreeMap<String, Map<String, Value>>>,
    pending_script: Mutex<Option<Vec<TaskStep>>>,
    tasks: Mutex<HashMap<String, VecDeque<TaskStep>>>,
    failures: Mutex<Vec<FailRule>>,
    calls: Mutex<Vec<Call>>,
    next_task: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(BTreeMap::new()),
            aliases: RwLock::new(BTreeMap::new()),
            pipelines: RwLock::new(BTreeMap::new()),
            pending_script: Mutex::new(None),
            tasks: Mutex::new(HashMap::new()),
            failures: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            next_task: AtomicU64::new(1),
        }
    }

    /// Seed a collection with a schema and records.
    pub fn seed_collection(&self, name: &str, schema: Value, records: Vec<Value>) {
        self.collections.write().unwrap().insert(
            name.to_string(),
            StoredCollection {
                schema: SchemaDocument::new(schema),
                settings: Map::new(),
                records,
            },
        );
    }

    /// Seed an alias binding without recording a call.
    pub fn seed_alias(&self, alias: &str, collection: &str) {
        self.aliases
            .write()
            .unwrap()
            .entry(alias.to_string())
            .or_default()
            .insert(collection.to_string());
    }

    /// Register a pipeline that sets `fields` on every record it sees.
    pub fn seed_pipeline(&self, id: &str, fields: Value) {
        let fields = fields.as_object().cloned().unwrap_or_default();
        self.pipelines
            .write()
            .unwrap()
            .insert(id.to_string(), fields);
    }

    /// Script the statuses reported by the next submitted copy task.
    ///
    /// Each poll consumes one step; the last step repeats once the script is
    /// exhausted.
    pub fn script_copy(&self, steps: Vec<TaskStep>) {
        *self.pending_script.lock().unwrap() = Some(steps);
    }

    /// Make every call to `op` fail with `error`.
    pub fn fail_on(&self, op: Op, error: StoreError) {
        self.failures.lock().unwrap().push(FailRule {
            op,
            detail: None,
            error,
        });
    }

    /// Make calls to `op` whose detail contains `detail` fail with `error`.
    pub fn fail_on_detail(&self, op: Op, detail: &str, error: StoreError) {
        self.failures.lock().unwrap().push(FailRule {
            op,
            detail: Some(detail.to_string()),
            error,
        });
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, op: Op) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.op == op).count()
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.collections.read().unwrap().contains_key(name)
    }

    pub fn records(&self, name: &str) -> Vec<Value> {
        self.collections
            .read()
            .unwrap()
            .get(name)
            .map(|c| c.records.clone())
            .unwrap_or_default()
    }

    pub fn schema_of(&self, name: &str) -> Option<SchemaDocument> {
        self.collections
            .read()
            .unwrap()
            .get(name)
            .map(|c| c.schema.clone())
    }

    pub fn setting(&self, name: &str, key: &str) -> Option<Value> {
        self.collections
            .read()
            .unwrap()
            .get(name)
            .and_then(|c| c.settings.get(key).cloned())
    }

    /// Collections an alias currently resolves to.
    pub fn resolve_alias(&self, alias: &str) -> Vec<String> {
        self.aliases
            .read()
            .unwrap()
            .get(alias)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn record(&self, op: Op, target: &str, detail: String) -> StoreResult<()> {
        self.calls.lock().unwrap().push(Call {
            op,
            target: target.to_string(),
            detail: detail.clone(),
        });
        let failures = self.failures.lock().unwrap();
        let hit = failures.iter().find(|rule| {
            rule.op == op
                && rule
                    .detail
                    .as_deref()
                    .map_or(true, |d| detail.contains(d))
        });
        match hit {
            Some(rule) => Err(rule.error.clone()),
            None => Ok(()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(kind: &str, name: &str) -> StoreError {
    StoreError::Rejected {
        status: 404,
        body: format!("{} [{}]", kind, name),
    }
}

/// Minimal `*` wildcard matching, as used by index patterns.
fn wildcard_match(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }
    let mut rest = name;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

fn apply_pipeline(fields: &Map<String, Value>, record: &mut Value) {
    if let Some(obj) = record.as_object_mut() {
        for (k, v) in fields {
            obj.insert(k.clone(), v.clone());
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        self.record(Op::Ping, "", String::new())
    }

    async fn list_collections(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.record(Op::ListCollections, pattern, String::new())?;
        let collections = self.collections.read().unwrap();
        Ok(collections
            .keys()
            .filter(|name| !name.starts_with('.'))
            .filter(|name| {
                pattern
                    .split(',')
                    .map(str::trim)
                    .any(|p| wildcard_match(p, name))
            })
            .cloned()
            .collect())
    }

    async fn get_aliases(&self, collection: &str) -> StoreResult<Vec<String>> {
        self.record(Op::GetAliases, collection, String::new())?;
        if !self.has_collection(collection) {
            return Err(not_found("index_not_found_exception", collection));
        }
        let aliases = self.aliases.read().unwrap();
        Ok(aliases
            .iter()
            .filter(|(alias, targets)| targets.contains(collection) && *alias != collection)
            .map(|(alias, _)| alias.clone())
            .collect())
    }

    async fn list_pipelines(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.record(Op::ListPipelines, prefix, String::new())?;
        let pipelines = self.pipelines.read().unwrap();
        Ok(pipelines
            .keys()
            .filter(|id| id.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn collection_exists(&self, name: &str) -> StoreResult<bool> {
        self.record(Op::CollectionExists, name, String::new())?;
        Ok(self.has_collection(name))
    }

    async fn create_collection(&self, name: &str, schema: &SchemaDocument) -> StoreResult<()> {
        self.record(Op::CreateCollection, name, String::new())?;
        let mut collections = self.collections.write().unwrap();
        if collections.contains_key(name) {
            return Err(StoreError::Rejected {
                status: 400,
                body: format!("resource_already_exists_exception: index [{}] already exists", name),
            });
        }
        collections.insert(
            name.to_string(),
            StoredCollection {
                schema: schema.clone(),
                settings: Map::new(),
                records: Vec::new(),
            },
        );
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> StoreResult<()> {
        self.record(Op::DeleteCollection, name, String::new())?;
        let mut collections = self.collections.write().unwrap();
        if collections.remove(name).is_none() {
            return Err(not_found("index_not_found_exception", name));
        }
        let mut aliases = self.aliases.write().unwrap();
        for targets in aliases.values_mut() {
            targets.remove(name);
        }
        aliases.retain(|_, targets| !targets.is_empty());
        Ok(())
    }

    async fn get_schema(&self, name: &str) -> StoreResult<SchemaDocument> {
        self.record(Op::GetSchema, name, String::new())?;
        self.schema_of(name)
            .ok_or_else(|| not_found("index_not_found_exception", name))
    }

    async fn put_setting(&self, name: &str, key: &str, value: &Value) -> StoreResult<()> {
        self.record(Op::PutSetting, name, format!("{}={}", key, value))?;
        let mut collections = self.collections.write().unwrap();
        let coll = collections
            .get_mut(name)
            .ok_or_else(|| not_found("index_not_found_exception", name))?;
        coll.settings.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn submit_bulk_copy(&self, spec: &BulkCopySpec) -> StoreResult<TaskId> {
        self.record(
            Op::SubmitBulkCopy,
            spec.dest.as_str(),
            format!(
                "source={} size={} slices={} max_docs={} pipeline={}",
                spec.source,
                spec.batch_size,
                spec.slices,
                spec.max_records.map(|n| n.to_string()).unwrap_or_default(),
                spec.pipeline.as_deref().unwrap_or("")
            ),
        )?;

        let task_id = format!("mem:{}", self.next_task.fetch_add(1, Ordering::SeqCst));
        let scripted = self.pending_script.lock().unwrap().take();

        let steps = match scripted {
            Some(steps) => steps,
            None => {
                let pipeline = match spec.pipeline.as_deref() {
                    Some(id) => Some(
                        self.pipelines
                            .read()
                            .unwrap()
                            .get(id)
                            .cloned()
                            .ok_or_else(|| not_found("resource_not_found_exception", id))?,
                    ),
                    None => None,
                };
                let mut collections = self.collections.write().unwrap();
                let mut copied: Vec<Value> = collections
                    .get(spec.source.as_str())
                    .ok_or_else(|| not_found("index_not_found_exception", spec.source.as_str()))?
                    .records
                    .clone();
                if let Some(limit) = spec.max_records {
                    copied.truncate(limit as usize);
                }
                if let Some(fields) = &pipeline {
                    for record in copied.iter_mut() {
                        apply_pipeline(fields, record);
                    }
                }
                let n = copied.len() as u64;
                let dest = collections
                    .get_mut(spec.dest.as_str())
                    .ok_or_else(|| not_found("index_not_found_exception", spec.dest.as_str()))?;
                dest.records.extend(copied);
                vec![TaskStep::done(n, n)]
            }
        };

        self.tasks
            .lock()
            .unwrap()
            .insert(task_id.clone(), steps.into_iter().collect());
        Ok(TaskId(task_id))
    }

    async fn get_task_status(&self, task: &TaskId) -> StoreResult<CopyTask> {
        self.record(Op::GetTaskStatus, &task.0, String::new())?;
        let mut tasks = self.tasks.lock().unwrap();
        let steps = tasks
            .get_mut(&task.0)
            .ok_or_else(|| not_found("resource_not_found_exception", &task.0))?;
        let step = if steps.len() > 1 {
            steps.pop_front()
        } else {
            steps.front().cloned()
        }
        .ok_or_else(|| StoreError::Decode(format!("task {} has no status", task)))?;
        Ok(CopyTask {
            task_id: task.clone(),
            total: step.total,
            processed: step.processed,
            done: step.done,
            error: step.error,
        })
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> StoreResult<()> {
        let detail = actions
            .iter()
            .map(|a| match a {
                AliasAction::Remove { collection, alias } => format!("-{}@{}", alias, collection),
                AliasAction::Add { collection, alias } => format!("+{}@{}", alias, collection),
            })
            .collect::<Vec<_>>()
            .join(" ");
        self.record(Op::UpdateAliases, "", detail)?;

        let collections = self.collections.read().unwrap();
        let mut aliases = self.aliases.write().unwrap();

        // Validate everything before touching the map so the update is all-or-nothing.
        for action in actions {
            match action {
                AliasAction::Remove { collection, alias } => {
                    let bound = aliases
                        .get(alias)
                        .is_some_and(|t| t.contains(collection.as_str()));
                    if !bound {
                        return Err(not_found("aliases_not_found_exception", alias));
                    }
                }
                AliasAction::Add { collection, .. } => {
                    if !collections.contains_key(collection.as_str()) {
                        return Err(not_found("index_not_found_exception", collection.as_str()));
                    }
                }
            }
        }

        for action in actions {
            match action {
                AliasAction::Remove { collection, alias } => {
                    if let Some(targets) = aliases.get_mut(alias) {
                        targets.remove(collection.as_str());
                    }
                }
                AliasAction::Add { collection, alias } => {
                    aliases
                        .entry(alias.clone())
                        .or_default()
                        .insert(collection.to_string());
                }
            }
        }
        aliases.retain(|_, targets| !targets.is_empty());
        Ok(())
    }

    async fn add_alias(&self, collection: &str, alias: &str) -> StoreResult<()> {
        self.record(Op::AddAlias, collection, alias.to_string())?;
        let collections = self.collections.read().unwrap();
        if !collections.contains_key(collection) {
            return Err(not_found("index_not_found_exception", collection));
        }
        self.aliases
            .write()
            .unwrap()
            .entry(alias.to_string())
            .or_default()
            .insert(collection.to_string());
        Ok(())
    }

    async fn simulate_pipeline(&self, pipeline: &str, sample: &Value) -> StoreResult<Value> {
        self.record(Op::SimulatePipeline, pipeline, String::new())?;
        let pipelines = self.pipelines.read().unwrap();
        let fields = pipelines
            .get(pipeline)
            .ok_or_else(|| not_found("resource_not_found_exception", pipeline))?;
        let mut doc = sample.clone();
        match doc.get_mut("_source") {
            Some(source) => apply_pipeline(fields, source),
            None => apply_pipeline(fields, &mut doc),
        }
        Ok(doc)
    }

    async fn sample_one(&self, collection: &str) -> StoreResult<Option<Value>> {
        self.record(Op::SampleOne, collection, String::new())?;
        let collections = self.collections.read().unwrap();
        let coll = collections
            .get(collection)
            .ok_or_else(|| not_found("index_not_found_exception", collection))?;
        Ok(coll.records.first().map(|record| {
            json!({
                "_index": collection,
                "_id": "0",
                "_source": record,
            })
        }))
    }
}
