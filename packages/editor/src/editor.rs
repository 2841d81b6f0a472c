//! # Editor
//!
//! Owns the committed [`EditorState`] and runs updates against it.
//!
//! ```text
//! update(tag, f)
//!   ├─ f(&mut UpdateTxn)          mutate a pending copy
//!   │    └─ Err → discarded       committed state untouched
//!   ├─ normalize dirty text       merges / empty-node removal
//!   ├─ collect garbage            unreachable nodes dropped
//!   └─ commit → UpdateRecord      prev state + dirty sets + normalized keys
//! ```

use crate::errors::EditorError;
use crate::mutations::{UpdateRecord, UpdateTag, UpdateTxn};
use crate::normalization::normalize_text_nodes;
use crate::registry::NodeRegistry;
use crate::state::EditorState;
use std::sync::Arc;

pub struct Editor {
    state: EditorState,
    registry: Arc<NodeRegistry>,
    next_key: u64,
}

impl Editor {
    /// An editor holding only the root element.
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self {
            state: EditorState::empty(),
            registry,
            next_key: 0,
        }
    }

    pub fn state(&self) -> &EditorState {
        &self.state
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Runs `f` as one transaction. On error nothing is committed.
    pub fn update<E, F>(&mut self, tag: UpdateTag, f: F) -> Result<UpdateRecord, E>
    where
        E: From<EditorError>,
        F: FnOnce(&mut UpdateTxn<'_>) -> Result<(), E>,
    {
        let (pending, dirty_elements, dirty_leaves, normalized_nodes) = {
            let mut txn = UpdateTxn::new(&self.state, &self.registry, &mut self.next_key, tag);
            f(&mut txn)?;

            let normalized = normalize_text_nodes(&mut txn);
            txn.collect_garbage();
            if !txn.state().is_selection_valid() {
                tracing::debug!("dropping selection that no longer resolves");
                txn.set_selection(None);
            }
            let (pending, dirty_elements, dirty_leaves) = txn.into_parts();
            (pending, dirty_elements, dirty_leaves, normalized)
        };

        let prev_state = std::mem::replace(&mut self.state, pending);
        tracing::debug!(
            ?tag,
            dirty_elements = dirty_elements.len(),
            dirty_leaves = dirty_leaves.len(),
            "committed update"
        );

        Ok(UpdateRecord {
            tag,
            prev_state,
            dirty_elements,
            dirty_leaves,
            normalized_nodes,
        })
    }
}
