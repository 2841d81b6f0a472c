//! # Local → Shared
//!
//! Replays a committed local update into the shared document. Only dirty
//! subtrees are visited; everything happens in one transaction tagged with
//! the binding's origin so the capture side can drop the echo.
//!
//! ## Child lists
//!
//! Previous and next child keys are walked with two pointers:
//!
//! ```text
//! prev == next                  → recurse, advance both
//! prev ∉ next and next ∉ prev   → replace in place, advance both
//! prev ∉ next                   → remove, advance prev
//! next ∈ prev                   → replace with a fresh construct, advance both
//! otherwise                     → insert, advance next
//! ```
//!
//! Leftovers are appended (next) or removed from the tail (prev).

use crate::binding::Binding;
use crate::error::SyncError;
use crate::mirror::MirrorId;
use crate::presence::Awareness;
use crate::shared::{self, prop_to_any, SharedHandle};
use crate::text_diff::diff_with_cursor;
use folio_editor::{EditorState, Node, NodeKey, NodeKind, PointKind, PropValue, UpdateRecord};
use std::collections::HashSet;
use yrs::{In, Transact, TransactionMut};

impl Binding {
    /// Mirrors `record` (committed as `state`) into the shared document.
    ///
    /// Updates that came from the shared document only get their text
    /// normalization reconciled and their selection republished; everything
    /// else about them is already there.
    pub fn sync_local_to_shared(
        &mut self,
        state: &EditorState,
        record: &UpdateRecord,
        awareness: Option<&dyn Awareness>,
    ) -> Result<(), SyncError> {
        if record.tag.is_remote() && record.normalized_nodes.is_empty() && awareness.is_none() {
            return Ok(());
        }

        let doc = self.shared.doc().clone();
        let mut txn = doc.transact_mut_with(self.origin.clone());

        if record.tag.is_remote() {
            if !record.normalized_nodes.is_empty() {
                self.resolve_normalization(&mut txn, state, &record.normalized_nodes)?;
            }
            // Markers are settled, so the selection encodes against the final sequence.
            if let Some(awareness) = awareness {
                self.sync_selection_to_shared(
                    &mut txn,
                    state,
                    record.prev_state.selection(),
                    awareness,
                );
            }
            return Ok(());
        }

        if record.is_root_dirty() {
            let root = self.mirror.root();
            let next = state
                .root()
                .ok_or_else(|| SyncError::MissingNode(NodeKey::root()))?;
            let handle = self.mirror.node(root)?.handle();
            self.sync_props_to_shared(&mut txn, &handle, record.prev_state.root(), next);
            self.sync_children_to_shared(&mut txn, state, record, root, &NodeKey::root())?;
        }

        if let Some(awareness) = awareness {
            self.sync_selection_to_shared(
                &mut txn,
                state,
                record.prev_state.selection(),
                awareness,
            );
        }

        tracing::debug!(stats = ?self.stats, "synced local update");
        Ok(())
    }

    /// Writes every replicated property of `next` whose value differs from
    /// `prev`. With no `prev` every set property is written.
    pub(crate) fn sync_props_to_shared(
        &mut self,
        txn: &mut TransactionMut,
        handle: &SharedHandle,
        prev: Option<&Node>,
        next: &Node,
    ) {
        let names = self.property_names(next.node_type());
        for name in names.iter() {
            let next_value = next.prop(name);
            let prev_value = prev.and_then(|p| p.prop(name));
            if prev.is_some() && prev_value == next_value {
                continue;
            }
            match next_value {
                Some(value) => {
                    let Some(value) = self.value_to_shared(value) else {
                        tracing::warn!(
                            node = %next.key(),
                            property = %name,
                            "property value has no shared form, skipping"
                        );
                        continue;
                    };
                    if !handle.set(txn, name, value) {
                        tracing::warn!(
                            node = %next.key(),
                            property = %name,
                            "shared types cannot be stored on containers, skipping"
                        );
                        continue;
                    }
                }
                None if prev_value.is_some() => handle.remove(txn, name),
                None => continue,
            }
            self.stats.property_writes += 1;
        }
    }

    fn value_to_shared(&self, value: &PropValue) -> Option<In> {
        match value {
            PropValue::SubDocument(guid) => self.sub_documents.get(guid).cloned().map(In::Doc),
            other => prop_to_any(other).map(In::Any),
        }
    }

    fn sync_children_to_shared(
        &mut self,
        txn: &mut TransactionMut,
        state: &EditorState,
        record: &UpdateRecord,
        id: MirrorId,
        key: &NodeKey,
    ) -> Result<(), SyncError> {
        let prev_children: Vec<NodeKey> = record
            .prev_state
            .node(key)
            .map(|n| n.children().to_vec())
            .unwrap_or_default();
        let next_children = state.children(key);

        let mut prev_set: Option<HashSet<&NodeKey>> = None;
        let mut next_set: Option<HashSet<&NodeKey>> = None;
        let (mut prev_index, mut next_index) = (0, 0);

        while prev_index < prev_children.len() && next_index < next_children.len() {
            let prev_key = &prev_children[prev_index];
            let next_key = &next_children[next_index];

            if prev_key == next_key {
                self.sync_child_to_shared(txn, state, record, id, next_index, next_key)?;
                prev_index += 1;
                next_index += 1;
                continue;
            }

            let next_has_prev = next_set
                .get_or_insert_with(|| next_children.iter().collect())
                .contains(prev_key);
            let prev_has_next = prev_set
                .get_or_insert_with(|| prev_children.iter().collect())
                .contains(next_key);

            if !next_has_prev && !prev_has_next {
                self.splice(txn, state, id, next_index, true, Some(next_key))?;
                prev_index += 1;
                next_index += 1;
            } else if !next_has_prev {
                self.splice(txn, state, id, next_index, true, None)?;
                prev_index += 1;
            } else if prev_has_next {
                self.splice(txn, state, id, next_index, true, Some(next_key))?;
                prev_index += 1;
                next_index += 1;
            } else {
                self.splice(txn, state, id, next_index, false, Some(next_key))?;
                next_index += 1;
            }
        }

        let append_new = prev_index >= prev_children.len();
        let remove_old = next_index >= next_children.len();
        if append_new && !remove_old {
            for (index, child) in next_children.iter().enumerate().skip(next_index) {
                self.splice(txn, state, id, index, false, Some(child))?;
            }
        } else if remove_old && !append_new {
            let len = self.mirror.children(id).len();
            for index in (next_index..len).rev() {
                self.splice(txn, state, id, index, true, None)?;
            }
        }
        Ok(())
    }

    /// Visits a child whose key is unchanged at `index`.
    fn sync_child_to_shared(
        &mut self,
        txn: &mut TransactionMut,
        state: &EditorState,
        record: &UpdateRecord,
        parent: MirrorId,
        index: usize,
        key: &NodeKey,
    ) -> Result<(), SyncError> {
        let child = *self
            .mirror
            .children(parent)
            .get(index)
            .ok_or_else(|| SyncError::MissingMirror(key.clone()))?;
        if self.mirror.key_of(child) != Some(key) {
            return Err(SyncError::invariant(format!(
                "mirror child {} of {:?} does not represent {}",
                index, parent, key
            )));
        }
        let node = state
            .node(key)
            .ok_or_else(|| SyncError::MissingNode(key.clone()))?;
        let prev = record.prev_state.node(key);
        let mirror = self.mirror.node(child)?;
        let handle = mirror.handle();
        if mirror.node_kind() != node.kind() {
            return Err(SyncError::invariant(format!(
                "mirror of {} is a {:?}, node is a {:?}",
                key,
                mirror.node_kind(),
                node.kind()
            )));
        }

        match node.kind() {
            NodeKind::Element => {
                if record.dirty_elements.contains(key) {
                    self.sync_props_to_shared(txn, &handle, prev, node);
                    self.sync_children_to_shared(txn, state, record, child, key)?;
                }
            }
            NodeKind::Text => {
                if record.dirty_leaves.contains(key) {
                    self.sync_props_to_shared(txn, &handle, prev, node);
                    self.sync_text_to_shared(txn, state, child, node)?;
                }
            }
            NodeKind::Decorator => {
                if record.dirty_leaves.contains(key) {
                    self.sync_props_to_shared(txn, &handle, prev, node);
                }
            }
            NodeKind::LineBreak => {}
        }
        Ok(())
    }

    /// Rewrites a leaf's run with a single diff against the cached text.
    fn sync_text_to_shared(
        &mut self,
        txn: &mut TransactionMut,
        state: &EditorState,
        id: MirrorId,
        node: &Node,
    ) -> Result<(), SyncError> {
        let mirror = self.mirror.node(id)?;
        let cached = mirror.text().unwrap_or_default();
        let next = node.text();
        if cached == next {
            return Ok(());
        }

        let cursor = match state.selection() {
            Some(sel)
                if sel.is_collapsed()
                    && sel.anchor.kind == PointKind::Text
                    && &sel.anchor.key == node.key() =>
            {
                sel.anchor.offset
            }
            _ => next.chars().count(),
        };
        let diff = diff_with_cursor(cached, next, cursor);
        let (start, delete) = diff.to_units(cached);

        let parent = mirror
            .parent()
            .ok_or_else(|| SyncError::invariant(format!("text leaf {} has no parent", node.key())))?;
        let xml = self.mirror.container_xml(parent)?;
        let offset = self.mirror.offset_of_child(parent, id).ok_or_else(|| {
            SyncError::invariant(format!("text leaf {} not found in its parent", node.key()))
        })?;

        let at = offset + 1 + start;
        shared::remove_range(txn, &xml, at, delete);
        shared::insert_text(txn, &xml, at, &diff.insert);
        self.mirror.set_text(id, next.to_string());
        self.stats.text_edits += 1;
        Ok(())
    }

    /// Removes child `index` (when `remove`) and/or inserts a construct for
    /// `insert` at `index`, as one splice.
    fn splice(
        &mut self,
        txn: &mut TransactionMut,
        state: &EditorState,
        parent: MirrorId,
        index: usize,
        remove: bool,
        insert: Option<&NodeKey>,
    ) -> Result<(), SyncError> {
        if remove {
            let old = *self.mirror.children(parent).get(index).ok_or_else(|| {
                SyncError::invariant(format!("no child {} to remove from {:?}", index, parent))
            })?;
            let xml = self.mirror.container_xml(parent)?;
            let offset = self.mirror.offset_of_index(parent, index);
            shared::remove_range(txn, &xml, offset, self.mirror.size(old));
            self.mirror.remove_child(parent, old)?;
        }
        if let Some(key) = insert {
            self.create_from_local(txn, state, parent, index, key)?;
        }
        self.stats.splices += 1;
        Ok(())
    }
}
