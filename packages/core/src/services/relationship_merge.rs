//! Relationship Merge Engine
//!
//! Create-or-reuse of a directed edge keyed by
//! `(type, from, to, match properties)`. The match properties are the
//! edge's entire property set, so a matched edge is never updated.

use crate::db::{GraphTransaction, StorageError};
use crate::models::{EdgeRef, MergeOutcome, NodeRef, Properties, RelationType};

/// Result of one relationship merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeMerge {
    pub edge: EdgeRef,
    pub outcome: MergeOutcome,
}

/// Upsert the `rel_type` edge `from -> to` carrying exactly `match_props`
///
/// Direction matters: an edge `to -> from` never matches. `from` and `to`
/// may be the same node.
pub async fn merge_relationship(
    txn: &mut dyn GraphTransaction,
    from: NodeRef,
    rel_type: &RelationType,
    match_props: &Properties,
    to: NodeRef,
) -> Result<EdgeMerge, StorageError> {
    if let Some(existing) = txn.find_edge(rel_type, from, to, match_props).await? {
        tracing::debug!("Reused {} edge {}", rel_type, existing.edge_ref.handle());
        return Ok(EdgeMerge {
            edge: existing.edge_ref,
            outcome: MergeOutcome::Reused,
        });
    }

    match txn.create_edge(rel_type, from, to, match_props).await {
        Ok(created) => {
            tracing::debug!(
                "Created {} edge {} -> {}",
                rel_type,
                from.handle(),
                to.handle()
            );
            Ok(EdgeMerge {
                edge: created.edge_ref,
                outcome: MergeOutcome::Created,
            })
        }
        Err(e) if e.is_constraint_violation() => {
            tracing::debug!("Lost create race for {} edge, re-fetching", rel_type);
            match txn.find_edge(rel_type, from, to, match_props).await? {
                Some(existing) => Ok(EdgeMerge {
                    edge: existing.edge_ref,
                    outcome: MergeOutcome::Reused,
                }),
                None => Err(e),
            }
        }
        Err(e) => Err(e),
    }
}
