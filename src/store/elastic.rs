//! Elasticsearch REST implementation of [`Store`].
//!
//! Talks to the cluster with `reqwest` and JSON bodies. Non-success statuses
//! become [`StoreError::Rejected`] with the response body attached, so the
//! orchestrator can report the store's own error text verbatim.
//!
//! | Facade call | Request |
//! |-------------|---------|
//! | `ping` | `GET /` |
//! | `list_collections` | `GET /{pattern},-.*/_alias` |
//! | `get_aliases` | `GET /{index}/_alias` |
//! | `list_pipelines` | `GET /_ingest/pipeline/{prefix}*` |
//! | `collection_exists` | `HEAD /{index}` |
//! | `create_collection` | `PUT /{index}` with `{"mappings": ...}` |
//! | `delete_collection` | `DELETE /{index}` |
//! | `get_schema` | `GET /{index}/_mapping` |
//! | `put_setting` | `PUT /{index}/_settings` |
//! | `submit_bulk_copy` | `POST /_reindex?wait_for_completion=false&slices=N` |
//! | `get_task_status` | `GET /_tasks/{id}` |
//! | `update_aliases` | `POST /_aliases` |
//! | `add_alias` | `PUT /{index}/_alias/{alias}` |
//! | `simulate_pipeline` | `POST /_ingest/pipeline/{id}/_simulate` |
//! | `sample_one` | `POST /{index}/_search` with `size = 1` |

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Response, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::error::{StoreError, StoreResult};
use crate::models::{AliasAction, BulkCopySpec, CopyTask, SchemaDocument, TaskId};

use super::Store;

/// Elasticsearch client.
pub struct ElasticStore {
    client: Client,
    base_url: String,
}

impl ElasticStore {
    pub fn new(base_url: &str, authorization: Option<&str>, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(auth) = authorization {
            let mut value =
                HeaderValue::from_str(auth).context("API key contains invalid header characters")?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(conn: &ConnectionConfig) -> Result<Self> {
        let endpoint = conn.endpoint()?;
        let auth = conn.authorization();
        Self::new(
            &endpoint,
            auth.as_deref(),
            Duration::from_secs(conn.timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> StoreResult<Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.request(method.clone(), &url);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await?;
        debug!(%method, path, status = resp.status().as_u16(), "elasticsearch request");
        Ok(resp)
    }

    async fn call(&self, method: Method, path: &str, body: Option<&Value>) -> StoreResult<Value> {
        let resp = self.send(method, path, body).await?;
        into_json(resp).await
    }

    /// Like [`call`](Self::call) but maps 404 to `None`.
    async fn call_optional(&self, method: Method, path: &str) -> StoreResult<Option<Value>> {
        let resp = self.send(method, path, None).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        into_json(resp).await.map(Some)
    }
}

async fn into_json(resp: Response) -> StoreResult<Value> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(StoreError::Rejected {
            status: status.as_u16(),
            body,
        });
    }
    resp.json::<Value>()
        .await
        .map_err(|e| StoreError::Decode(e.to_string()))
}

fn require_ack(resp: &Value, what: &str) -> StoreResult<()> {
    match resp.get("acknowledged").and_then(Value::as_bool) {
        Some(false) => Err(StoreError::Remote(format!("{} was not acknowledged", what))),
        _ => Ok(()),
    }
}

/// Query string for a reindex submission.
pub(crate) fn reindex_path(spec: &BulkCopySpec) -> String {
    let mut path = format!(
        "/_reindex?wait_for_completion=false&slices={}",
        spec.slices
    );
    if let Some(max) = spec.max_records {
        path.push_str(&format!("&max_docs={}", max));
    }
    path
}

/// Request body for a reindex submission.
pub(crate) fn reindex_body(spec: &BulkCopySpec) -> Value {
    let mut body = json!({
        "source": {
            "index": spec.source.as_str(),
            "size": spec.batch_size,
        },
        "dest": {
            "index": spec.dest.as_str(),
        }
    });
    if let Some(pipeline) = spec.pipeline.as_deref().filter(|p| !p.is_empty()) {
        body["dest"]["pipeline"] = json!(pipeline);
    }
    body
}

pub(crate) fn alias_actions_body(actions: &[AliasAction]) -> Value {
    let actions: Vec<Value> = actions
        .iter()
        .map(|a| match a {
            AliasAction::Remove { collection, alias } => {
                json!({ "remove": { "index": collection.as_str(), "alias": alias } })
            }
            AliasAction::Add { collection, alias } => {
                json!({ "add": { "index": collection.as_str(), "alias": alias } })
            }
        })
        .collect();
    json!({ "actions": actions })
}

/// Convert a `GET /_tasks/{id}` response into a [`CopyTask`].
///
/// `processed` counts created plus updated records.
pub(crate) fn parse_task_status(task_id: &TaskId, resp: &Value) -> StoreResult<CopyTask> {
    let status = resp
        .get("task")
        .and_then(|t| t.get("status"))
        .ok_or_else(|| StoreError::Decode(format!("task {} response has no status", task_id)))?;

    let count = |key: &str| status.get(key).and_then(Value::as_u64).unwrap_or(0);
    let total = count("total");
    let processed = count("created") + count("updated");
    let done = resp
        .get("completed")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Ok(CopyTask {
        task_id: task_id.clone(),
        total,
        processed,
        done,
        error: task_error(resp),
    })
}

fn task_error(resp: &Value) -> Option<String> {
    if let Some(err) = resp.get("error").filter(|e| !e.is_null()) {
        let reason = err
            .get("reason")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Some(reason);
    }
    let failures = resp
        .get("response")
        .and_then(|r| r.get("failures"))
        .and_then(Value::as_array)
        .filter(|f| !f.is_empty())?;
    let first = failures[0]
        .get("cause")
        .and_then(|c| c.get("reason"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| failures[0].to_string());
    Some(format!("{} record failures, first: {}", failures.len(), first))
}

/// Alias names from a `GET .../_alias` response, minus `exclude`.
fn alias_names(resp: &Value, exclude: &str) -> Vec<String> {
    let mut names: Vec<String> = resp
        .as_object()
        .into_iter()
        .flat_map(|indices| indices.values())
        .filter_map(|entry| entry.get("aliases").and_then(Value::as_object))
        .flat_map(|aliases| aliases.keys().cloned())
        .filter(|alias| alias != exclude)
        .collect();
    names.sort();
    names.dedup();
    names
}

fn object_keys(resp: &Value) -> Vec<String> {
    let mut keys: Vec<String> = resp
        .as_object()
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default();
    keys.sort();
    keys
}

#[async_trait]
impl Store for ElasticStore {
    async fn ping(&self) -> StoreResult<()> {
        self.call(Method::GET, "/", None).await.map(|_| ())
    }

    async fn list_collections(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let pattern = if pattern.trim().is_empty() { "*" } else { pattern };
        let path = format!("/{},-.*/_alias", pattern);
        // A concrete name with no match answers 404; treat that as no indices.
        let resp = self.call_optional(Method::GET, &path).await?;
        Ok(resp
            .map(|v| object_keys(&v))
            .unwrap_or_default()
            .into_iter()
            .filter(|name| !name.starts_with('.'))
            .collect())
    }

    async fn get_aliases(&self, collection: &str) -> StoreResult<Vec<String>> {
        let resp = self
            .call(Method::GET, &format!("/{}/_alias", collection), None)
            .await?;
        Ok(alias_names(&resp, collection))
    }

    async fn list_pipelines(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let path = format!("/_ingest/pipeline/{}*", prefix);
        let resp = self.call_optional(Method::GET, &path).await?;
        Ok(resp.map(|v| object_keys(&v)).unwrap_or_default())
    }

    async fn collection_exists(&self, name: &str) -> StoreResult<bool> {
        let resp = self.send(Method::HEAD, &format!("/{}", name), None).await?;
        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(StoreError::Rejected {
                status: s.as_u16(),
                body: String::new(),
            }),
        }
    }

    async fn create_collection(&self, name: &str, schema: &SchemaDocument) -> StoreResult<()> {
        let body = json!({ "mappings": schema.as_value() });
        let resp = self
            .call(Method::PUT, &format!("/{}", name), Some(&body))
            .await?;
        require_ack(&resp, "index creation")
    }

    async fn delete_collection(&self, name: &str) -> StoreResult<()> {
        let resp = self.call(Method::DELETE, &format!("/{}", name), None).await?;
        require_ack(&resp, "index deletion")
    }

    async fn get_schema(&self, name: &str) -> StoreResult<SchemaDocument> {
        let resp = self
            .call(Method::GET, &format!("/{}/_mapping", name), None)
            .await?;
        // Keyed by the concrete index, which differs from `name` for aliases.
        let entry = resp
            .get(name)
            .or_else(|| resp.as_object().and_then(|m| m.values().next()))
            .ok_or_else(|| StoreError::Decode(format!("no mapping returned for {}", name)))?;
        let mappings = entry
            .get("mappings")
            .cloned()
            .ok_or_else(|| StoreError::Decode(format!("mapping for {} has no mappings", name)))?;
        Ok(SchemaDocument::new(mappings))
    }

    async fn put_setting(&self, name: &str, key: &str, value: &Value) -> StoreResult<()> {
        let body = json!({ key: value });
        let resp = self
            .call(Method::PUT, &format!("/{}/_settings", name), Some(&body))
            .await?;
        require_ack(&resp, "settings update")
    }

    async fn submit_bulk_copy(&self, spec: &BulkCopySpec) -> StoreResult<TaskId> {
        let body = reindex_body(spec);
        let resp = self
            .call(Method::POST, &reindex_path(spec), Some(&body))
            .await?;
        resp.get("task")
            .and_then(Value::as_str)
            .map(|t| TaskId(t.to_string()))
            .ok_or_else(|| StoreError::Decode("reindex response has no task id".to_string()))
    }

    async fn get_task_status(&self, task: &TaskId) -> StoreResult<CopyTask> {
        let resp = self
            .call(Method::GET, &format!("/_tasks/{}", task.0), None)
            .await?;
        parse_task_status(task, &resp)
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> StoreResult<()> {
        let body = alias_actions_body(actions);
        let resp = self.call(Method::POST, "/_aliases", Some(&body)).await?;
        require_ack(&resp, "alias update")
    }

    async fn add_alias(&self, collection: &str, alias: &str) -> StoreResult<()> {
        let resp = self
            .call(
                Method::PUT,
                &format!("/{}/_alias/{}", collection, alias),
                None,
            )
            .await?;
        require_ack(&resp, "alias creation")
    }

    async fn simulate_pipeline(&self, pipeline: &str, sample: &Value) -> StoreResult<Value> {
        let body = json!({ "docs": [sample] });
        let resp = self
            .call(
                Method::POST,
                &format!("/_ingest/pipeline/{}/_simulate", pipeline),
                Some(&body),
            )
            .await?;
        let first = resp
            .get("docs")
            .and_then(Value::as_array)
            .and_then(|docs| docs.first())
            .ok_or_else(|| StoreError::Decode("simulate response has no docs".to_string()))?;
        if let Some(err) = first.get("error") {
            let reason = err
                .get("reason")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string());
            return Err(StoreError::Remote(reason));
        }
        first
            .get("doc")
            .cloned()
            .ok_or_else(|| StoreError::Decode("simulate response has no doc".to_string()))
    }

    async fn sample_one(&self, collection: &str) -> StoreResult<Option<Value>> {
        let body = json!({ "size": 1 });
        let resp = self
            .call(Method::POST, &format!("/{}/_search", collection), Some(&body))
            .await?;
        Ok(resp
            .get("hits")
            .and_then(|h| h.get("hits"))
            .and_then(Value::as_array)
            .and_then(|hits| hits.first())
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CollectionRef;

    fn spec(max_records: Option<u64>, pipeline: Option<&str>) -> BulkCopySpec {
        BulkCopySpec {
            source: CollectionRef::from("docs_v1"),
            dest: CollectionRef::from("docs_v2"),
            batch_size: 5000,
            slices: 3,
            max_records,
            pipeline: pipeline.map(str::to_string),
        }
    }

    #[test]
    fn reindex_request_shape() {
        let s = spec(None, None);
        assert_eq!(reindex_path(&s), "/_reindex?wait_for_completion=false&slices=3");
        let body = reindex_body(&s);
        assert_eq!(body["source"]["index"], "docs_v1");
        assert_eq!(body["source"]["size"], 5000);
        assert_eq!(body["dest"]["index"], "docs_v2");
        assert!(body["dest"].get("pipeline").is_none());

        let s = spec(Some(100), Some("enrich"));
        assert_eq!(
            reindex_path(&s),
            "/_reindex?wait_for_completion=false&slices=3&max_docs=100"
        );
        assert_eq!(reindex_body(&s)["dest"]["pipeline"], "enrich");
    }

    #[test]
    fn task_status_counts_created_and_updated() {
        let id = TaskId("node:1".into());
        let resp = json!({
            "completed": false,
            "task": { "status": { "total": 100, "created": 40, "updated": 2 } }
        });
        let task = parse_task_status(&id, &resp).unwrap();
        assert_eq!(task.total, 100);
        assert_eq!(task.processed, 42);
        assert!(!task.done);
        assert_eq!(task.error, None);
    }

    #[test]
    fn task_status_surfaces_errors() {
        let id = TaskId("node:1".into());
        let resp = json!({
            "completed": true,
            "task": { "status": { "total": 10, "created": 0 } },
            "error": { "type": "index_not_found_exception", "reason": "no such index [x]" }
        });
        let task = parse_task_status(&id, &resp).unwrap();
        assert_eq!(task.error.as_deref(), Some("no such index [x]"));

        let resp = json!({
            "completed": true,
            "task": { "status": { "total": 10, "created": 8 } },
            "response": { "failures": [ { "cause": { "reason": "mapper_parsing_exception" } } ] }
        });
        let task = parse_task_status(&id, &resp).unwrap();
        assert!(task.error.unwrap().contains("mapper_parsing_exception"));
    }

    #[test]
    fn task_status_without_task_is_decode_error() {
        let id = TaskId("node:1".into());
        assert!(matches!(
            parse_task_status(&id, &json!({"completed": true})),
            Err(StoreError::Decode(_))
        ));
    }

    #[test]
    fn alias_body_keeps_action_order() {
        let body = alias_actions_body(&[
            AliasAction::Remove {
                collection: "old".into(),
                alias: "live".into(),
            },
            AliasAction::Add {
                collection: "new".into(),
                alias: "live".into(),
            },
        ]);
        assert_eq!(body["actions"][0]["remove"]["index"], "old");
        assert_eq!(body["actions"][1]["add"]["index"], "new");
    }

    #[test]
    fn alias_names_exclude_index_itself() {
        let resp = json!({
            "docs_v1": { "aliases": { "docs": {}, "docs_v1": {}, "search": {} } }
        });
        assert_eq!(alias_names(&resp, "docs_v1"), vec!["docs", "search"]);
    }
}
