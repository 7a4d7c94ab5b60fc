//! Read-only views of the cluster: connectivity, collections, aliases, pipelines.
//!
//! These back the `check`, `indices`, `aliases` and `pipelines` commands and
//! are what an operator looks at before picking a source and a mapping.

use anyhow::{Context, Result};

use crate::config::Config;
use crate::error::StoreResult;
use crate::store::elastic::ElasticStore;
use crate::store::Store;

/// One collection with the aliases pointing at it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSummary {
    pub name: String,
    pub aliases: Vec<String>,
}

/// Collections matching `pattern`, each with its aliases.
pub async fn index_overview(store: &dyn Store, pattern: &str) -> StoreResult<Vec<IndexSummary>> {
    let names = store.list_collections(pattern).await?;
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let aliases = store.get_aliases(&name).await?;
        out.push(IndexSummary { name, aliases });
    }
    Ok(out)
}

pub async fn run_check(config: &Config) -> Result<()> {
    let store = ElasticStore::from_config(&config.connection)?;
    store
        .ping()
        .await
        .with_context(|| format!("Cannot reach {}", store.base_url()))?;
    println!("connected to {}", store.base_url());
    Ok(())
}

pub async fn run_indices(config: &Config, pattern: &str) -> Result<()> {
    let store = ElasticStore::from_config(&config.connection)?;
    let indices = index_overview(&store, pattern)
        .await
        .context("Failed to list indices")?;

    if indices.is_empty() {
        println!("No indices match '{}'.", pattern);
        return Ok(());
    }

    let width = indices
        .iter()
        .map(|i| i.name.len())
        .max()
        .unwrap_or(0)
        .max("INDEX".len());
    println!("{:<width$}  ALIASES", "INDEX", width = width);
    for index in &indices {
        let aliases = if index.aliases.is_empty() {
            "-".to_string()
        } else {
            index.aliases.join(", ")
        };
        println!("{:<width$}  {}", index.name, aliases, width = width);
    }
    Ok(())
}

pub async fn run_aliases(config: &Config, index: &str) -> Result<()> {
    let store = ElasticStore::from_config(&config.connection)?;
    let aliases = store
        .get_aliases(index)
        .await
        .with_context(|| format!("Failed to get aliases of '{}'", index))?;
    if aliases.is_empty() {
        println!("{} has no aliases", index);
    }
    for alias in aliases {
        println!("{}", alias);
    }
    Ok(())
}

pub async fn run_pipelines(config: &Config, prefix: &str) -> Result<()> {
    let store = ElasticStore::from_config(&config.connection)?;
    let pipelines = store
        .list_pipelines(prefix)
        .await
        .context("Failed to list ingest pipelines")?;
    if pipelines.is_empty() {
        println!("No pipelines found.");
    }
    for id in pipelines {
        println!("{}", id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::memory::{InMemoryStore, Op};
    use serde_json::json;

    #[tokio::test]
    async fn overview_lists_user_indices_with_aliases() {
        let store = InMemoryStore::new();
        store.seed_collection("logs_v1", json!({}), vec![]);
        store.seed_collection("logs_v2", json!({}), vec![]);
        store.seed_collection(".kibana", json!({}), vec![]);
        store.seed_alias("logs", "logs_v2");

        let overview = index_overview(&store, "*").await.unwrap();
        assert_eq!(
            overview,
            vec![
                IndexSummary {
                    name: "logs_v1".into(),
                    aliases: vec![],
                },
                IndexSummary {
                    name: "logs_v2".into(),
                    aliases: vec!["logs".into()],
                },
            ]
        );
    }

    #[tokio::test]
    async fn listing_failure_is_an_error() {
        let store = InMemoryStore::new();
        store.fail_on(Op::ListCollections, StoreError::Unavailable("down".into()));
        assert!(index_overview(&store, "*").await.is_err());
        assert_eq!(store.count(Op::GetAliases), 0);
    }
}
