//! Dry-run a transform pipeline against one sample record.
//!
//! Nothing is written: the sample comes from a size-1 search and the
//! transformation runs through the store's simulate endpoint.

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::info;

use crate::config::Config;
use crate::error::OpError;
use crate::models::CollectionRef;
use crate::schema;
use crate::store::elastic::ElasticStore;
use crate::store::Store;

/// A sample record and what the pipeline turned it into.
#[derive(Debug, Clone)]
pub struct PipelineTrial {
    pub sample: Value,
    pub transformed: Value,
}

/// Run `pipeline` on one arbitrary record of `source`.
pub async fn simulate(
    store: &dyn Store,
    pipeline: &str,
    source: &CollectionRef,
) -> Result<PipelineTrial, OpError> {
    if pipeline.trim().is_empty() {
        return Err(OpError::Precondition(
            "pipeline name must not be empty".to_string(),
        ));
    }
    if source.is_empty() {
        return Err(OpError::Precondition(
            "source collection must not be empty".to_string(),
        ));
    }

    let sample = store
        .sample_one(source.as_str())
        .await?
        .ok_or_else(|| OpError::NoSampleData(source.to_string()))?;

    let transformed = store.simulate_pipeline(pipeline, &sample).await?;
    info!(pipeline, collection = %source, "pipeline simulated");

    Ok(PipelineTrial {
        sample,
        transformed,
    })
}

/// CLI entry point for `remap pipeline test`.
pub async fn run_pipeline_test(config: &Config, pipeline: &str, index: &str) -> Result<()> {
    let store = ElasticStore::from_config(&config.connection)?;
    let trial = simulate(&store, pipeline, &index.into())
        .await
        .with_context(|| format!("Failed to test pipeline '{}' on '{}'", pipeline, index))?;

    println!("--- Sample ({}) ---", index);
    println!("{}", schema::render(&trial.sample));
    println!();
    println!("--- Pipeline output ({}) ---", pipeline);
    println!("{}", schema::render(&trial.transformed));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{InMemoryStore, Op};
    use serde_json::json;

    #[tokio::test]
    async fn transforms_one_sample() {
        let store = InMemoryStore::new();
        store.seed_collection(
            "docs",
            json!({}),
            vec![json!({"title": "a"}), json!({"title": "b"})],
        );
        store.seed_pipeline("tag", json!({"tagged": true}));

        let trial = simulate(&store, "tag", &"docs".into()).await.unwrap();
        assert_eq!(trial.transformed["_source"]["tagged"], json!(true));
        assert_eq!(trial.transformed["_source"]["title"], json!("a"));
        assert!(trial.sample["_source"].get("tagged").is_none());
        // source untouched
        assert!(store.records("docs")[0].get("tagged").is_none());
    }

    #[tokio::test]
    async fn empty_collection_has_no_sample() {
        let store = InMemoryStore::new();
        store.seed_collection("empty", json!({}), vec![]);
        store.seed_pipeline("tag", json!({"tagged": true}));

        let err = simulate(&store, "tag", &"empty".into()).await.unwrap_err();
        assert!(matches!(err, OpError::NoSampleData(ref c) if c == "empty"));
        assert_eq!(store.count(Op::SimulatePipeline), 0);
        let writes = store.calls().into_iter().filter(|c| {
            matches!(
                c.op,
                Op::CreateCollection
                    | Op::DeleteCollection
                    | Op::PutSetting
                    | Op::SubmitBulkCopy
                    | Op::UpdateAliases
                    | Op::AddAlias
            )
        });
        assert_eq!(writes.count(), 0);
    }

    #[tokio::test]
    async fn unknown_pipeline_is_a_store_error() {
        let store = InMemoryStore::new();
        store.seed_collection("docs", json!({}), vec![json!({"title": "a"})]);
        let err = simulate(&store, "missing", &"docs".into()).await.unwrap_err();
        assert!(matches!(err, OpError::Store(_)));
    }

    #[tokio::test]
    async fn blank_pipeline_is_rejected() {
        let store = InMemoryStore::new();
        let err = simulate(&store, " ", &"docs".into()).await.unwrap_err();
        assert!(matches!(err, OpError::Precondition(_)));
        assert!(store.calls().is_empty());
    }
}
