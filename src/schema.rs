//! Schema inspection and the editable text form of a schema.
//!
//! Schemas are exchanged as JSON text with four-space indentation and the
//! key order of the store preserved, so a draft can be edited by hand and
//! diffed against the live mapping. [`parse`] and [`render_schema`] round-trip
//! exactly when no edits were made.
//!
//! [`SchemaDraft`] keeps a user-edited draft alongside the live schema and
//! only replaces the draft when the inspected collection changes.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::OpError;
use crate::models::{CollectionRef, SchemaDocument};
use crate::store::elastic::ElasticStore;
use crate::store::Store;

const INDENT: &[u8] = b"    ";

/// Pretty-print any JSON value with the schema indentation.
pub fn render(value: &Value) -> String {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(INDENT));
    if value.serialize(&mut ser).is_err() {
        return value.to_string();
    }
    String::from_utf8_lossy(&buf).into_owned()
}

pub fn render_schema(schema: &SchemaDocument) -> String {
    render(schema.as_value())
}

/// Parse the text form of a schema. It must be a JSON object.
pub fn parse(text: &str) -> Result<SchemaDocument, OpError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| OpError::Precondition(format!("schema is not valid JSON: {}", e)))?;
    if !value.is_object() {
        return Err(OpError::Precondition(
            "schema must be a JSON object".to_string(),
        ));
    }
    Ok(SchemaDocument::new(value))
}

/// Whether the selected collection differs from the one last inspected.
///
/// Pure comparison; a caller uses it to decide whether an in-progress draft
/// may be overwritten.
pub fn collection_changed(previous: Option<&str>, current: &str) -> bool {
    previous != Some(current)
}

/// Default name for the remapped collection, `<source><suffix>`.
pub fn default_target_name(source: &str, suffix: &str) -> String {
    if source.is_empty() {
        String::new()
    } else {
        format!("{}{}", source, suffix)
    }
}

/// A fetched schema with its rendered text.
#[derive(Debug, Clone)]
pub struct InspectedSchema {
    pub collection: CollectionRef,
    pub document: SchemaDocument,
    pub text: String,
}

/// Fetch and pretty-print a collection's current schema.
pub async fn fetch(store: &dyn Store, collection: &CollectionRef) -> Result<InspectedSchema, OpError> {
    if collection.is_empty() {
        return Err(OpError::Precondition(
            "collection name must not be empty".to_string(),
        ));
    }
    let document = store.get_schema(collection.as_str()).await?;
    let text = render_schema(&document);
    debug!(collection = %collection, bytes = text.len(), "fetched schema");
    Ok(InspectedSchema {
        collection: collection.clone(),
        document,
        text,
    })
}

/// Live schema plus an editable draft for one selected collection.
#[derive(Debug, Clone, Default)]
pub struct SchemaDraft {
    inspected: Option<String>,
    current_text: String,
    draft_text: String,
}

impl SchemaDraft {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-read the live schema of `collection`.
    ///
    /// The draft is replaced only when `collection` differs from the one
    /// inspected last. Returns whether the draft was replaced.
    pub async fn refresh(
        &mut self,
        store: &dyn Store,
        collection: &CollectionRef,
    ) -> Result<bool, OpError> {
        let inspected = fetch(store, collection).await?;
        let changed = collection_changed(self.inspected.as_deref(), collection.as_str());
        self.current_text = inspected.text;
        if changed {
            self.inspected = Some(collection.to_string());
            self.draft_text = self.current_text.clone();
        }
        Ok(changed)
    }

    pub fn edit(&mut self, text: impl Into<String>) {
        self.draft_text = text.into();
    }

    pub fn inspected(&self) -> Option<&str> {
        self.inspected.as_deref()
    }

    pub fn current_text(&self) -> &str {
        &self.current_text
    }

    pub fn draft_text(&self) -> &str {
        &self.draft_text
    }

    pub fn is_edited(&self) -> bool {
        self.draft_text != self.current_text
    }

    pub fn parse_draft(&self) -> Result<SchemaDocument, OpError> {
        parse(&self.draft_text)
    }
}

/// Read a schema file from disk.
pub fn read_schema_file(path: &Path) -> Result<SchemaDocument> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read mapping file: {}", path.display()))?;
    parse(&text).with_context(|| format!("Invalid mapping file: {}", path.display()))
}

/// CLI entry point for `remap mapping show`.
pub async fn run_mapping_show(config: &Config, index: &str, out: Option<PathBuf>) -> Result<()> {
    let store = ElasticStore::from_config(&config.connection)?;
    let inspected = fetch(&store, &CollectionRef::from(index))
        .await
        .with_context(|| format!("Failed to fetch mapping for '{}'", index))?;

    match out {
        Some(path) => {
            std::fs::write(&path, format!("{}\n", inspected.text))
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(index = %index, path = %path.display(), "mapping written");
            println!("wrote mapping of {} to {}", index, path.display());
        }
        None => println!("{}", inspected.text),
    }
    Ok(())
}

/// CLI entry point for `remap mapping fmt`.
pub fn run_mapping_fmt(path: &Path) -> Result<()> {
    let schema = read_schema_file(path)?;
    println!("{}", render_schema(&schema));
    Ok(())
}
