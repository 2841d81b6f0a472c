//! # Normalization Resolver
//!
//! When an update applied from the shared document leaves two equal text
//! nodes side by side, the editor merges them on commit. The shared document
//! still has both markers; the merged text already sits in one contiguous
//! run. Deleting the dead leaves' marker units makes the run belong to the
//! survivor, which is all the reconciliation needed.

use crate::binding::Binding;
use crate::error::SyncError;
use crate::mirror::MirrorId;
use crate::shared;
use folio_editor::{EditorState, NodeKey};
use std::collections::HashSet;
use yrs::TransactionMut;

impl Binding {
    pub(crate) fn resolve_normalization(
        &mut self,
        txn: &mut TransactionMut,
        state: &EditorState,
        normalized: &HashSet<NodeKey>,
    ) -> Result<(), SyncError> {
        let mut keys: Vec<&NodeKey> = normalized.iter().collect();
        keys.sort();

        let mut survivors: Vec<(MirrorId, String)> = Vec::new();
        let mut dead: Vec<(MirrorId, MirrorId, u32)> = Vec::new();

        for key in keys {
            let Some(id) = self.mirror.by_key(key) else {
                continue;
            };
            let mirror = self.mirror.node(id)?;
            if !mirror.is_text() {
                continue;
            }
            match state.node(key) {
                Some(node) if state.is_attached(key) => {
                    survivors.push((id, node.text().to_string()));
                }
                _ => {
                    let parent = mirror.parent().ok_or_else(|| {
                        SyncError::invariant(format!("merged leaf {} has no parent", key))
                    })?;
                    // Offsets are taken before any marker is deleted.
                    let offset = self.mirror.offset_of_child(parent, id).ok_or_else(|| {
                        SyncError::invariant(format!("merged leaf {} not found in its parent", key))
                    })?;
                    dead.push((id, parent, offset));
                }
            }
        }

        dead.sort_by(|a, b| b.2.cmp(&a.2));
        for (id, parent, offset) in dead {
            let xml = self.mirror.container_xml(parent)?;
            shared::remove_range(txn, &xml, offset, 1);
            self.mirror.remove_child(parent, id)?;
            self.stats.normalization_deletes += 1;
        }

        for (id, text) in survivors {
            self.mirror.set_text(id, text);
        }
        tracing::debug!(
            merged = normalized.len(),
            deletes = self.stats.normalization_deletes,
            "resolved normalization"
        );
        Ok(())
    }
}
