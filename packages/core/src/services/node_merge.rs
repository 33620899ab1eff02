//! Node Merge Engine
//!
//! Create-or-reuse of a node keyed by `(label, id)`. Existing attributes
//! are never overwritten: a merge only fills attributes the node does not
//! have yet. A stored blank (null or empty string) counts as "not yet"
//! for a populated incoming value, while a blank incoming value can only
//! add a key that is missing. Either way the final node does not depend
//! on the order rows arrive in.

use crate::db::{GraphTransaction, StorageError};
use crate::models::{is_blank, Label, MergeOutcome, NodeRecord, NodeRef, Properties};

/// Result of one node merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeMerge {
    pub node: NodeRef,
    pub outcome: MergeOutcome,
    /// Attributes written onto an existing node
    pub attributes_filled: usize,
}

/// Upsert the node `(label, id)` inside `txn`
///
/// A new node is created with `id` and every attribute in `attrs`. If a
/// concurrent writer created the same key first, the create fails with a
/// constraint violation and the winner's node is fetched and merged into
/// instead.
pub async fn merge_node(
    txn: &mut dyn GraphTransaction,
    label: &Label,
    id: i64,
    attrs: &Properties,
) -> Result<NodeMerge, StorageError> {
    if let Some(existing) = txn.find_node(label, id).await? {
        return fill_absent(txn, &existing, attrs).await;
    }

    match txn.create_node(label, id, attrs).await {
        Ok(created) => {
            tracing::debug!("Created node {}({})", label, id);
            Ok(NodeMerge {
                node: created.node_ref,
                outcome: MergeOutcome::Created,
                attributes_filled: 0,
            })
        }
        Err(e) if e.is_constraint_violation() => {
            tracing::debug!("Lost create race for node {}({}), re-fetching", label, id);
            match txn.find_node(label, id).await? {
                Some(existing) => fill_absent(txn, &existing, attrs).await,
                None => Err(e),
            }
        }
        Err(e) => Err(e),
    }
}

async fn fill_absent(
    txn: &mut dyn GraphTransaction,
    existing: &NodeRecord,
    attrs: &Properties,
) -> Result<NodeMerge, StorageError> {
    let mut filled = 0;
    for (key, value) in attrs {
        let writable = if is_blank(value) {
            !existing.properties.contains_key(key)
        } else {
            existing.attribute_absent(key)
        };
        if !writable {
            continue;
        }
        if txn.set_attr_if_absent(existing.node_ref, key, value).await? {
            filled += 1;
        }
    }

    tracing::debug!(
        "Reused node {}({}), filled {} attribute(s)",
        existing.label,
        existing.id,
        filled
    );

    Ok(NodeMerge {
        node: existing.node_ref,
        outcome: MergeOutcome::Reused,
        attributes_filled: filled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{GraphDatabase, GraphStore, LibsqlGraphStore};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn create_store() -> (LibsqlGraphStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = GraphDatabase::new(temp_dir.path().join("graph.db"))
            .await
            .unwrap();
        (LibsqlGraphStore::new(Arc::new(db), 1), temp_dir)
    }

    fn concept(value: &str) -> Properties {
        let mut props = Properties::new();
        props.insert("concept".to_string(), json!(value));
        props
    }

    #[tokio::test]
    async fn test_merge_creates_then_reuses() {
        let (store, _dir) = create_store().await;
        let label = Label::new_unchecked("Paper");

        let mut txn = store.begin().await.unwrap();
        let first = merge_node(txn.as_mut(), &label, 1, &concept("")).await.unwrap();
        let second = merge_node(txn.as_mut(), &label, 1, &concept("")).await.unwrap();
        txn.commit().await.unwrap();

        assert_eq!(first.outcome, MergeOutcome::Created);
        assert_eq!(second.outcome, MergeOutcome::Reused);
        assert_eq!(first.node, second.node);
        assert_eq!(store.stats().await.unwrap().nodes, 1);
    }

    #[tokio::test]
    async fn test_merge_never_overwrites_populated_attribute() {
        let (store, _dir) = create_store().await;
        let label = Label::new_unchecked("Paper");

        let mut txn = store.begin().await.unwrap();
        merge_node(txn.as_mut(), &label, 1, &concept("X")).await.unwrap();
        let blank = merge_node(txn.as_mut(), &label, 1, &concept("")).await.unwrap();
        let other = merge_node(txn.as_mut(), &label, 1, &concept("Y")).await.unwrap();
        let stored = txn.find_node(&label, 1).await.unwrap().unwrap();
        txn.commit().await.unwrap();

        assert_eq!(blank.attributes_filled, 0);
        assert_eq!(other.attributes_filled, 0);
        assert_eq!(stored.properties.get("concept"), Some(&json!("X")));
    }

    #[tokio::test]
    async fn test_merge_fills_blank_attribute() {
        let (store, _dir) = create_store().await;
        let label = Label::new_unchecked("Paper");

        let mut txn = store.begin().await.unwrap();
        merge_node(txn.as_mut(), &label, 1, &concept("")).await.unwrap();
        let filled = merge_node(txn.as_mut(), &label, 1, &concept("X")).await.unwrap();
        let stored = txn.find_node(&label, 1).await.unwrap().unwrap();
        txn.commit().await.unwrap();

        assert_eq!(filled.outcome, MergeOutcome::Reused);
        assert_eq!(filled.attributes_filled, 1);
        assert_eq!(stored.properties.get("concept"), Some(&json!("X")));
    }

    #[tokio::test]
    async fn test_blank_attribute_added_only_when_missing() {
        let (store, _dir) = create_store().await;
        let label = Label::new_unchecked("Paper");

        let mut txn = store.begin().await.unwrap();
        merge_node(txn.as_mut(), &label, 1, &Properties::new()).await.unwrap();
        let added = merge_node(txn.as_mut(), &label, 1, &concept("")).await.unwrap();
        let again = merge_node(txn.as_mut(), &label, 1, &concept("")).await.unwrap();
        let stored = txn.find_node(&label, 1).await.unwrap().unwrap();
        txn.commit().await.unwrap();

        assert_eq!(added.attributes_filled, 1);
        assert_eq!(again.attributes_filled, 0);
        assert_eq!(stored.properties.get("concept"), Some(&json!("")));
    }

    #[tokio::test]
    async fn test_same_id_different_label_is_different_node() {
        let (store, _dir) = create_store().await;

        let mut txn = store.begin().await.unwrap();
        let paper = merge_node(txn.as_mut(), &Label::new_unchecked("Paper"), 1, &Properties::new())
            .await
            .unwrap();
        let dataset = merge_node(txn.as_mut(), &Label::new_unchecked("Dataset"), 1, &Properties::new())
            .await
            .unwrap();
        txn.commit().await.unwrap();

        assert_ne!(paper.node, dataset.node);
        assert_eq!(dataset.outcome, MergeOutcome::Created);
    }
}
