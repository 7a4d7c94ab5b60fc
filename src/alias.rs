//! Alias swap between an old and a new collection.
//!
//! Moving an alias is always one compound `update_aliases` request (remove
//! from old, add to new), never two calls, so readers of the alias see either
//! the old collection or the new one and nothing in between.

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::error::OpError;
use crate::models::{non_blank, AliasAction, CollectionRef};
use crate::store::elastic::ElasticStore;
use crate::store::Store;

/// What an alias swap changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasSwap {
    pub moved: Option<String>,
    pub added: Option<String>,
}

impl AliasSwap {
    pub fn is_noop(&self) -> bool {
        self.moved.is_none() && self.added.is_none()
    }
}

/// Move `alias_to_move` from `old` to `new` and/or attach `new_alias` to `new`.
///
/// Returns immediately when neither alias is given. Blank alias names count
/// as absent.
pub async fn move_alias(
    store: &dyn Store,
    old: &CollectionRef,
    new: &CollectionRef,
    alias_to_move: Option<&str>,
    new_alias: Option<&str>,
) -> Result<AliasSwap, OpError> {
    let alias_to_move = non_blank(alias_to_move);
    let new_alias = non_blank(new_alias);

    if alias_to_move.is_none() && new_alias.is_none() {
        return Ok(AliasSwap::default());
    }
    if old.is_empty() || new.is_empty() {
        return Err(OpError::Precondition(
            "alias swap needs both the old and the new collection".to_string(),
        ));
    }

    let mut swap = AliasSwap::default();

    if let Some(alias) = alias_to_move {
        let actions = [
            AliasAction::Remove {
                collection: old.clone(),
                alias: alias.to_string(),
            },
            AliasAction::Add {
                collection: new.clone(),
                alias: alias.to_string(),
            },
        ];
        store.update_aliases(&actions).await?;
        info!(alias, from = %old, to = %new, "alias moved");
        swap.moved = Some(alias.to_string());
    }

    if let Some(alias) = new_alias {
        store.add_alias(new.as_str(), alias).await?;
        info!(alias, collection = %new, "alias added");
        swap.added = Some(alias.to_string());
    }

    Ok(swap)
}

/// CLI entry point for `remap alias move`.
pub async fn run_alias_move(
    config: &Config,
    from: &str,
    to: &str,
    alias: Option<&str>,
    new_alias: Option<&str>,
) -> Result<()> {
    let store = ElasticStore::from_config(&config.connection)?;
    let swap = move_alias(&store, &from.into(), &to.into(), alias, new_alias)
        .await
        .with_context(|| format!("Failed to update aliases from '{}' to '{}'", from, to))?;

    if swap.is_noop() {
        println!("nothing to do: no alias given");
    }
    if let Some(a) = &swap.moved {
        println!("moved alias {}: {} -> {}", a, from, to);
    }
    if let Some(a) = &swap.added {
        println!("added alias {} to {}", a, to);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::memory::{InMemoryStore, Op};
    use serde_json::json;
    use std::sync::Arc;

    fn store() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.seed_collection("docs_v1", json!({}), vec![]);
        store.seed_collection("docs_v2", json!({}), vec![]);
        store.seed_alias("docs", "docs_v1");
        store
    }

    #[tokio::test]
    async fn moves_alias_in_one_request() {
        let store = store();
        let swap = move_alias(&store, &"docs_v1".into(), &"docs_v2".into(), Some("docs"), None)
            .await
            .unwrap();
        assert_eq!(swap.moved.as_deref(), Some("docs"));
        assert_eq!(store.resolve_alias("docs"), vec!["docs_v2".to_string()]);
        assert_eq!(store.count(Op::UpdateAliases), 1);
        assert_eq!(store.count(Op::AddAlias), 0);
    }

    #[tokio::test]
    async fn adds_new_alias() {
        let store = store();
        let swap = move_alias(&store, &"docs_v1".into(), &"docs_v2".into(), None, Some("fresh"))
            .await
            .unwrap();
        assert_eq!(swap.added.as_deref(), Some("fresh"));
        assert_eq!(store.resolve_alias("fresh"), vec!["docs_v2".to_string()]);
        assert_eq!(store.resolve_alias("docs"), vec!["docs_v1".to_string()]);
    }

    #[tokio::test]
    async fn noop_without_aliases() {
        let store = store();
        let swap = move_alias(&store, &"".into(), &"".into(), None, Some("  "))
            .await
            .unwrap();
        assert!(swap.is_noop());
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn rejects_empty_collections() {
        let store = store();
        let err = move_alias(&store, &"".into(), &"docs_v2".into(), Some("docs"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, OpError::Precondition(_)));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_update_leaves_alias_on_old() {
        let store = store();
        store.fail_on(Op::UpdateAliases, StoreError::Unavailable("reset".into()));
        let err = move_alias(&store, &"docs_v1".into(), &"docs_v2".into(), Some("docs"), Some("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, OpError::Store(StoreError::Unavailable(_))));
        assert_eq!(store.resolve_alias("docs"), vec!["docs_v1".to_string()]);
        assert_eq!(store.count(Op::AddAlias), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_readers_never_see_a_dangling_alias() {
        let store = Arc::new(store());
        let reader = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                for _ in 0..500 {
                    let targets = store.resolve_alias("docs");
                    assert_eq!(targets.len(), 1, "alias resolved to {:?}", targets);
                    tokio::task::yield_now().await;
                }
            })
        };
        move_alias(store.as_ref(), &"docs_v1".into(), &"docs_v2".into(), Some("docs"), None)
            .await
            .unwrap();
        reader.await.unwrap();
        assert_eq!(store.resolve_alias("docs"), vec!["docs_v2".to_string()]);
    }
}
