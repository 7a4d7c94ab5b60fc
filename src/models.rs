//! Core data types for a remap run.
//!
//! These are the values that flow between the CLI, the orchestrator in
//! [`remap`](crate::remap), and the [`Store`](crate::store::Store) facade.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorKind;

/// Name of a collection (Elasticsearch index) in the remote store.
///
/// Surrounding whitespace is stripped on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct CollectionRef(String);

impl CollectionRef {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        if name.trim().len() == name.len() {
            Self(name)
        } else {
            Self(name.trim().to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CollectionRef {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CollectionRef {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<CollectionRef> for String {
    fn from(c: CollectionRef) -> Self {
        c.0
    }
}

/// A collection's schema (Elasticsearch `mappings` body).
///
/// Opaque to the orchestrator; see [`schema`](crate::schema) for the text form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaDocument(Value);

impl SchemaDocument {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// True when the schema is a JSON object with at least one entry.
    pub fn is_usable(&self) -> bool {
        self.0.as_object().is_some_and(|m| !m.is_empty())
    }
}

/// One remap invocation.
#[derive(Debug, Clone)]
pub struct RemapRequest {
    pub source: CollectionRef,
    pub target: CollectionRef,
    pub target_schema: SchemaDocument,
    pub replace_if_exists: bool,
    pub transform_pipeline: Option<String>,
    /// Records fetched per scroll batch.
    pub batch_size: u32,
    /// Number of concurrent copy slices inside the store.
    pub parallelism: u32,
    /// `None` or negative means no limit. Zero is rejected.
    pub max_records: Option<i64>,
    pub alias_to_move: Option<String>,
    /// Additional alias to attach to the target. Setting it is the request to create it.
    pub new_alias: Option<String>,
}

impl RemapRequest {
    /// Copy limit to pass to the store, `None` meaning unlimited.
    pub fn record_limit(&self) -> Option<u64> {
        match self.max_records {
            Some(n) if n > 0 => Some(n as u64),
            _ => None,
        }
    }

    /// Pipeline name, ignoring blank values.
    pub fn pipeline(&self) -> Option<&str> {
        non_blank(self.transform_pipeline.as_deref())
    }

    pub fn alias_to_move(&self) -> Option<&str> {
        non_blank(self.alias_to_move.as_deref())
    }

    pub fn new_alias(&self) -> Option<&str> {
        non_blank(self.new_alias.as_deref())
    }

    pub fn wants_alias_update(&self) -> bool {
        self.alias_to_move().is_some() || self.new_alias().is_some()
    }
}

pub(crate) fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// Parameters of an asynchronous bulk copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkCopySpec {
    pub source: CollectionRef,
    pub dest: CollectionRef,
    pub batch_size: u32,
    pub slices: u32,
    pub max_records: Option<u64>,
    pub pipeline: Option<String>,
}

/// Identifier of a store-side task (`node:id` for Elasticsearch).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(pub String);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Observed state of a bulk-copy task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyTask {
    pub task_id: TaskId,
    pub total: u64,
    pub processed: u64,
    pub done: bool,
    pub error: Option<String>,
}

/// A single entry of a compound alias update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasAction {
    Remove { collection: CollectionRef, alias: String },
    Add { collection: CollectionRef, alias: String },
}

/// Step of the remap workflow, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Precondition,
    Create,
    Configure,
    CopySubmit,
    CopyPoll,
    FinalizeSettings,
    AliasSwap,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Precondition => "precondition",
            Stage::Create => "create",
            Stage::Configure => "configure",
            Stage::CopySubmit => "copy-submit",
            Stage::CopyPoll => "copy-poll",
            Stage::FinalizeSettings => "finalize-settings",
            Stage::AliasSwap => "alias-swap",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Details of the stage that stopped a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub reason: String,
    /// The target collection may exist in a partially configured or populated state.
    pub target_may_exist: bool,
    /// Set when the copy itself completed before the failure.
    pub records_copied: Option<u64>,
}

impl StageFailure {
    /// Whether the failed stage can be finished alone without a full re-run.
    pub fn is_recoverable_alone(&self) -> bool {
        matches!(self.stage, Stage::FinalizeSettings | Stage::AliasSwap)
    }

    /// Operator-facing suggestion for what to do next.
    pub fn remediation(&self) -> &'static str {
        match self.kind {
            ErrorKind::Precondition => "fix the request and run again",
            ErrorKind::AlreadyExists => "pick another target name or allow replacing it",
            ErrorKind::PartialCopy | ErrorKind::TaskError => {
                "inspect the target, then re-run with replace enabled"
            }
            ErrorKind::Cancelled if self.stage != Stage::CopyPoll => {
                if self.target_may_exist {
                    "no copy was started; delete the target or re-run with replace enabled"
                } else {
                    "no copy was started; run again when ready"
                }
            }
            ErrorKind::Cancelled | ErrorKind::TimedOut => {
                "the copy task may still be running in the store; check it before re-running"
            }
            ErrorKind::FinalizeFailed => {
                "records were copied; restore refresh interval and replicas on the target by hand"
            }
            ErrorKind::AliasSwapFailed => {
                "records were copied; re-run `remap alias move` to finish the alias update"
            }
            ErrorKind::StoreUnavailable | ErrorKind::StoreRejected | ErrorKind::NoSampleData => {
                if self.target_may_exist {
                    "check the store, then delete the target or re-run with replace enabled"
                } else {
                    "check the store and run again"
                }
            }
        }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.stage, self.kind, self.reason)
    }
}

/// Result of a remap run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemapOutcome {
    Success { records_copied: u64 },
    Failed(StageFailure),
}

impl RemapOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RemapOutcome::Success { .. })
    }

    pub fn failure(&self) -> Option<&StageFailure> {
        match self {
            RemapOutcome::Success { .. } => None,
            RemapOutcome::Failed(f) => Some(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collection_names_are_trimmed() {
        let padded = CollectionRef::from(" products ");
        assert_eq!(padded.as_str(), "products");
        assert_eq!(padded, CollectionRef::from("products"));
        assert!(CollectionRef::from(String::from("   ")).is_empty());

        let parsed: CollectionRef = serde_json::from_value(json!(" logs")).unwrap();
        assert_eq!(parsed.as_str(), "logs");
        assert_eq!(serde_json::to_value(&parsed).unwrap(), json!("logs"));
    }

    fn request(max_records: Option<i64>) -> RemapRequest {
        RemapRequest {
            source: "docs_v1".into(),
            target: "docs_v1_remapped".into(),
            target_schema: SchemaDocument::new(json!({"properties": {}})),
            replace_if_exists: false,
            transform_pipeline: Some("  ".to_string()),
            batch_size: 1000,
            parallelism: 2,
            max_records,
            alias_to_move: None,
            new_alias: Some(String::new()),
        }
    }

    #[test]
    fn record_limit_treats_unset_and_negative_as_unlimited() {
        assert_eq!(request(None).record_limit(), None);
        assert_eq!(request(Some(-1)).record_limit(), None);
        assert_eq!(request(Some(0)).record_limit(), None);
        assert_eq!(request(Some(250)).record_limit(), Some(250));
    }

    #[test]
    fn blank_optionals_are_ignored() {
        let req = request(None);
        assert_eq!(req.pipeline(), None);
        assert!(!req.wants_alias_update());
    }

    #[test]
    fn stage_names() {
        assert_eq!(Stage::CopyPoll.to_string(), "copy-poll");
        assert_eq!(Stage::FinalizeSettings.as_str(), "finalize-settings");
        assert!(Stage::Create < Stage::AliasSwap);
    }

    #[test]
    fn empty_schema_is_not_usable() {
        assert!(!SchemaDocument::new(json!({})).is_usable());
        assert!(!SchemaDocument::new(json!([1])).is_usable());
        assert!(SchemaDocument::new(json!({"dynamic": false})).is_usable());
    }

    #[test]
    fn cancel_remediation_depends_on_whether_a_copy_started() {
        let cancelled = |stage| StageFailure {
            stage,
            kind: ErrorKind::Cancelled,
            reason: "cancelled".into(),
            target_may_exist: true,
            records_copied: None,
        };
        assert!(cancelled(Stage::CopySubmit).remediation().starts_with("no copy was started"));
        assert!(cancelled(Stage::CopyPoll).remediation().contains("may still be running"));
    }
}
