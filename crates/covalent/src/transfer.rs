//! Moving CoValues in bulk: export with everything they need, import the
//! result elsewhere, and deep loading along schema references.

use std::collections::BTreeSet;
use std::sync::Arc;

use covalent_core::{CoValueContent, CoValueId};
use covalent_store::Storage;
use covalent_sync::SyncHost;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{NodeError, Result};
use crate::node::Node;
use crate::replica::View;
use crate::schema::{Schema, SchemaRef};

impl<S: Storage> Node<S> {
    // ─────────────────────────────────────────────────────────────────────────
    // Export and Import
    // ─────────────────────────────────────────────────────────────────────────

    /// Content of `id`, its dependencies and every CoValue it refers to,
    /// dependencies first.
    pub async fn export(&mut self, id: CoValueId) -> Result<Vec<CoValueContent>> {
        let mut order = Vec::new();
        let mut visited = BTreeSet::new();
        // (id, children pushed)
        let mut stack = vec![(id, false)];
        while let Some((next, expanded)) = stack.pop() {
            if expanded {
                order.push(next);
                continue;
            }
            if !visited.insert(next) {
                continue;
            }
            if let Err(e) = self.load(next).await {
                if next == id {
                    return Err(e);
                }
                warn!(covalue = %next, error = %e, "skipping unavailable reference in export");
                continue;
            }
            stack.push((next, true));
            for dep in self.references(&next) {
                if !visited.contains(&dep) {
                    stack.push((dep, false));
                }
            }
        }

        let max = self.config.sync.max_piece_bytes;
        let pieces = order
            .iter()
            .flat_map(|id| self.replica.new_content_since(id, None, max))
            .collect::<Vec<_>>();
        debug!(covalue = %id, covalues = order.len(), pieces = pieces.len(), "exported");
        Ok(pieces)
    }

    pub async fn export_json(&mut self, id: CoValueId) -> Result<String> {
        let pieces = self.export(id).await?;
        serde_json::to_string(&pieces)
            .map_err(|e| NodeError::InvalidOperation(format!("cannot encode export: {e}")))
    }

    /// Merge exported content. Returns the CoValues that changed.
    pub async fn import(&mut self, pieces: &[CoValueContent]) -> Result<Vec<CoValueId>> {
        let mut changed = Vec::new();
        for piece in pieces {
            let outcome = self.replica.merge_content(piece);
            for (session, reason) in &outcome.rejected {
                warn!(covalue = %piece.id, %session, %reason, "imported content rejected");
            }
            if !outcome.gaps.is_empty() {
                warn!(covalue = %piece.id, gaps = outcome.gaps.len(), "imported content has gaps");
            }
            if self.replica.contains(&piece.id) && !changed.contains(&piece.id) {
                changed.push(piece.id);
            }
        }
        for id in &changed {
            self.after_local_change(*id).await?;
        }
        Ok(changed)
    }

    pub async fn import_json(&mut self, json: &str) -> Result<Vec<CoValueId>> {
        let pieces: Vec<CoValueContent> = serde_json::from_str(json)
            .map_err(|e| NodeError::InvalidOperation(format!("cannot decode import: {e}")))?;
        self.import(&pieces).await
    }

    /// Load `id` and everything reachable through the reference fields of
    /// `schema`. Returns every CoValue visited.
    pub async fn load_deep(&mut self, id: CoValueId, schema: &Arc<Schema>) -> Result<Vec<CoValueId>> {
        let mut visited = Vec::new();
        let mut queue = vec![SchemaRef::Map(id, Arc::clone(schema))];
        while let Some(next) = queue.pop() {
            let next_id = next.id();
            if visited.contains(&next_id) {
                continue;
            }
            self.load(next_id).await?;
            visited.push(next_id);
            match next {
                SchemaRef::Map(id, schema) => {
                    let map = self.map(id)?;
                    queue.extend(schema.refs(&map));
                }
                SchemaRef::List(id, schema) => {
                    let list = self.list(id)?;
                    queue.extend(
                        (0..list.len())
                            .filter_map(|i| list.get_ref(i))
                            .map(|item| SchemaRef::Map(item, Arc::clone(&schema))),
                    );
                }
            }
        }
        Ok(visited)
    }

    /// Dependencies of `id` plus ids mentioned in its content.
    fn references(&mut self, id: &CoValueId) -> Vec<CoValueId> {
        let mut refs: BTreeSet<CoValueId> = self.replica.dependencies(id).into_iter().collect();
        let content = match self.replica.view(id) {
            Ok(View::Map(map)) => map.to_json(),
            Ok(View::List(list)) => list.to_json(),
            Ok(View::Stream(stream)) => stream.to_json(),
            Ok(View::Opaque) | Err(_) => Value::Null,
        };
        collect_ids(&content, &mut refs);
        refs.remove(id);
        refs.into_iter().collect()
    }
}

fn collect_ids(value: &Value, out: &mut BTreeSet<CoValueId>) {
    match value {
        Value::String(s) => {
            if let Ok(id) = s.parse() {
                out.insert(id);
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_ids(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_ids(v, out)),
        _ => {}
    }
}
