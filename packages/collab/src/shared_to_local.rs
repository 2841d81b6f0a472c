//! # Shared → Local
//!
//! Applies a batch of captured shared events to the mirror and reconciles
//! the local tree, all inside one update tagged `Collaboration` (or
//! `Historic`). The update's own outbound pass then only runs the
//! normalization resolver and publishes the repaired selection.
//!
//! ## Delta walk
//!
//! A container delta is replayed against the mirror's children with a unit
//! cursor:
//!
//! ```text
//! retain n         cursor += n
//! delete n         remove / trim children at cursor, one at a time
//! insert "text"    extend the text leaf ending at cursor, else delete the run
//! insert embed     new child at cursor, splitting a text leaf it lands in
//! ```
//!
//! Deleting a text leaf's marker without its whole run, or splitting a leaf,
//! leaves characters without an owner. They are carried as pending text until
//! the next text leaf created at the cursor takes them, the preceding text
//! leaf absorbs them, or they are deleted from the shared sequence.

use crate::binding::Binding;
use crate::error::SyncError;
use crate::mirror::MirrorId;
use crate::offset_view::OffsetView;
use crate::presence::Awareness;
use crate::shared::{self, any_to_prop, BatchKind, Delta, SharedBatch, SharedEvent, TYPE_KEY};
use crate::text_diff::{unit_len, unit_to_byte};
use folio_editor::{
    Editor, EditorState, NodeKey, NodeKind, Point, PropValue, RangeSelection, UpdateRecord,
    UpdateTag, UpdateTxn,
};
use std::collections::HashSet;
use yrs::{Any, Out, Transact, TransactionMut, XmlTextRef};

/// What happened to the local selection during an inbound pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionRepair {
    Unchanged,
    /// Moved to a valid point
    Repaired,
    /// Nothing to place it on; the document has no children left
    Lost,
}

#[derive(Debug)]
pub struct InboundOutcome {
    pub record: UpdateRecord,
    pub selection: SelectionRepair,
}

#[derive(Debug, Default)]
struct DeltaWalk {
    cursor: u32,
    /// Units of the next retain already removed from the sequence
    skip: u32,
    pending: Option<String>,
}

impl Binding {
    /// Applies `batch` to the mirror and `editor` in one local update.
    pub fn sync_shared_to_local(
        &mut self,
        editor: &mut Editor,
        batch: &SharedBatch,
        awareness: Option<&dyn Awareness>,
    ) -> Result<InboundOutcome, SyncError> {
        let tag = match batch.kind {
            BatchKind::Remote => UpdateTag::Collaboration,
            BatchKind::Historic => UpdateTag::Historic,
        };
        let events = self.order_events(&batch.events);

        let doc = self.shared.doc().clone();
        let mut ytxn = doc.transact_mut_with(self.origin.clone());
        self.fresh.clear();

        let mut repair = SelectionRepair::Unchanged;
        let record = editor.update(tag, |txn| {
            for event in events {
                self.apply_event(&mut ytxn, txn, event)?;
            }
            repair = self.repair_selection(&ytxn, txn, awareness)?;
            Ok::<(), SyncError>(())
        })?;

        drop(ytxn);

        tracing::debug!(
            ?tag,
            events = batch.events.len(),
            dirty_elements = record.dirty_elements.len(),
            dirty_leaves = record.dirty_leaves.len(),
            selection = ?repair,
            "applied shared batch"
        );
        Ok(InboundOutcome {
            record,
            selection: repair,
        })
    }

    /// Builds the local tree from the whole shared document.
    pub(crate) fn hydrate(&mut self, editor: &mut Editor) -> Result<UpdateRecord, SyncError> {
        let doc = self.shared.doc().clone();
        let record = {
            let mut ytxn = doc.transact_mut_with(self.origin.clone());
            self.fresh.clear();
            let root = self.mirror.root();
            editor.update(UpdateTag::Collaboration, |txn| {
                self.sync_props_from_shared(&mut ytxn, txn, root, &NodeKey::root(), None)?;
                if !self.mirror.is_hydrated(root) {
                    let xml = self.mirror.container_xml(root)?;
                    let delta = shared::snapshot_delta(&ytxn, &xml);
                    self.apply_delta(&mut ytxn, root, &delta)?;
                    self.mirror.set_hydrated(root);
                }
                self.sync_children_from_shared(&mut ytxn, txn, root, &NodeKey::root())
            })?
        };
        self.sync_local_to_shared(editor.state(), &record, None)?;
        tracing::debug!(mirrors = self.mirror.len(), "hydrated from shared document");
        Ok(record)
    }

    /// Parents before children, so a child's event is skipped when its
    /// parent's delta already removed it.
    fn order_events<'b>(&self, events: &'b [SharedEvent]) -> Vec<&'b SharedEvent> {
        let mut ordered: Vec<(usize, &SharedEvent)> = events
            .iter()
            .map(|event| {
                let depth = self
                    .mirror
                    .by_branch(&event.target_id)
                    .map_or(usize::MAX, |id| self.depth(id));
                (depth, event)
            })
            .collect();
        ordered.sort_by_key(|(depth, _)| *depth);
        ordered.into_iter().map(|(_, event)| event).collect()
    }

    fn depth(&self, id: MirrorId) -> usize {
        let mut depth = 0;
        let mut current = self.mirror.get(id).and_then(|n| n.parent());
        while let Some(parent) = current {
            depth += 1;
            current = self.mirror.get(parent).and_then(|n| n.parent());
        }
        depth
    }

    fn apply_event(
        &mut self,
        ytxn: &mut TransactionMut,
        txn: &mut UpdateTxn<'_>,
        event: &SharedEvent,
    ) -> Result<(), SyncError> {
        let Some(id) = self.mirror.by_branch(&event.target_id) else {
            tracing::debug!(branch = ?event.target_id, "event for unknown construct, skipping");
            return Ok(());
        };
        if self.fresh.contains(&id) {
            return Ok(());
        }
        let Some(key) = self.mirror.key_of(id).cloned() else {
            tracing::debug!(mirror = ?id, "event for unbound mirror, skipping");
            return Ok(());
        };
        if txn.node(&key).is_none() {
            tracing::debug!(node = %key, "event for removed node, skipping");
            return Ok(());
        }

        if !event.keys_changed.is_empty() {
            self.sync_props_from_shared(ytxn, txn, id, &key, Some(event.keys_changed.as_slice()))?;
        }
        let kind = self.mirror.node(id)?.node_kind();
        if kind == NodeKind::Element && !event.delta.is_empty() {
            self.apply_delta(ytxn, id, &event.delta)?;
            self.sync_children_from_shared(ytxn, txn, id, &key)?;
        }
        Ok(())
    }

    /// Replays `delta` against the children of `container`.
    pub(crate) fn apply_delta(
        &mut self,
        ytxn: &mut TransactionMut,
        container: MirrorId,
        delta: &[Delta],
    ) -> Result<(), SyncError> {
        let xml = self.mirror.container_xml(container)?;
        let mut walk = DeltaWalk::default();

        for op in delta {
            match op {
                Delta::Retain(len, _) => {
                    self.settle_pending(ytxn, &xml, container, &mut walk)?;
                    let skipped = walk.skip.min(*len);
                    walk.skip -= skipped;
                    walk.cursor += len - skipped;
                }
                Delta::Deleted(len) => {
                    self.settle_pending(ytxn, &xml, container, &mut walk)?;
                    self.delete_units(container, *len, &mut walk)?;
                }
                Delta::Inserted(Out::Any(Any::String(text)), _) => {
                    self.insert_run(ytxn, &xml, container, text, &mut walk)?;
                }
                Delta::Inserted(value, _) => {
                    self.insert_embed(ytxn, container, value, &mut walk)?;
                }
            }
        }
        self.settle_pending(ytxn, &xml, container, &mut walk)
    }

    fn delete_units(
        &mut self,
        container: MirrorId,
        len: u32,
        walk: &mut DeltaWalk,
    ) -> Result<(), SyncError> {
        let mut remaining = len;
        while remaining > 0 {
            let pos = self
                .mirror
                .position_in_container(container, walk.cursor, false);
            let Some(child) = pos.node else {
                return Err(SyncError::invariant(format!(
                    "delete of {} units at {} runs past the last child of {:?}",
                    remaining, walk.cursor, container
                )));
            };
            let (text, size) = {
                let node = self.mirror.node(child)?;
                (node.text().map(str::to_string), node.size())
            };

            match text {
                None => {
                    self.mirror.remove_child(container, child)?;
                    remaining -= 1;
                }
                Some(text) if pos.at_marker => {
                    let deleted = remaining.min(size);
                    if deleted < size {
                        // The marker went but part of the run stayed.
                        let at = unit_to_byte(&text, deleted - 1);
                        walk.pending = Some(text[at..].to_string());
                    }
                    self.mirror.remove_child(container, child)?;
                    remaining -= deleted;
                }
                Some(mut text) => {
                    let deleted = remaining.min(pos.length);
                    let start = unit_to_byte(&text, pos.offset);
                    let end = unit_to_byte(&text, pos.offset + deleted);
                    text.replace_range(start..end, "");
                    self.mirror.set_text(child, text);
                    remaining -= deleted;
                }
            }
        }
        Ok(())
    }

    fn insert_run(
        &mut self,
        ytxn: &mut TransactionMut,
        xml: &XmlTextRef,
        container: MirrorId,
        run: &str,
        walk: &mut DeltaWalk,
    ) -> Result<(), SyncError> {
        let pos = self
            .mirror
            .position_in_container(container, walk.cursor, true);
        let owner = match pos.node {
            Some(child) if !pos.at_marker => self.mirror.node(child)?.text().map(|t| (child, t)),
            _ => None,
        };

        match owner {
            Some((child, current)) => {
                let at = unit_to_byte(current, pos.offset);
                let mut text = current.to_string();
                text.insert_str(at, run);
                self.mirror.set_text(child, text);
                walk.cursor += unit_len(run);
            }
            None => {
                tracing::debug!(cursor = walk.cursor, "deleting text run without a leaf");
                shared::remove_range(ytxn, xml, walk.cursor, unit_len(run));
                self.stats.orphan_deletes += 1;
            }
        }
        Ok(())
    }

    fn insert_embed(
        &mut self,
        ytxn: &mut TransactionMut,
        container: MirrorId,
        value: &Out,
        walk: &mut DeltaWalk,
    ) -> Result<(), SyncError> {
        let child = self.create_from_shared(&*ytxn, value, container)?;
        let pos = self
            .mirror
            .position_in_container(container, walk.cursor, false);

        let mut index = pos.node_index;
        if let Some(existing) = pos.node {
            let split = match self.mirror.node(existing)?.text() {
                Some(text) if !pos.at_marker => Some(text.to_string()),
                _ => None,
            };
            if let Some(text) = split {
                if walk.pending.is_some() {
                    return Err(SyncError::invariant(format!(
                        "embed splits {:?} while text is still pending",
                        existing
                    )));
                }
                let at = unit_to_byte(&text, pos.offset);
                walk.pending = Some(text[at..].to_string());
                self.mirror.set_text(existing, text[..at].to_string());
                index += 1;
            }
        }

        self.mirror.children_mut(container)?.insert(index, child);
        if self.mirror.node(child)?.is_text() {
            if let Some(text) = walk.pending.take() {
                self.mirror.set_text(child, text);
            }
        }
        walk.cursor += 1;
        Ok(())
    }

    /// Hands pending text to the text leaf ending at the cursor, or deletes it.
    fn settle_pending(
        &mut self,
        ytxn: &mut TransactionMut,
        xml: &XmlTextRef,
        container: MirrorId,
        walk: &mut DeltaWalk,
    ) -> Result<(), SyncError> {
        let Some(pending) = walk.pending.take() else {
            return Ok(());
        };
        let pos = self
            .mirror
            .position_in_container(container, walk.cursor, true);
        let owner = match pos.node {
            Some(child) if !pos.at_marker => self
                .mirror
                .node(child)?
                .text()
                .filter(|text| unit_len(text) == pos.offset)
                .map(|text| (child, text.to_string())),
            _ => None,
        };

        match owner {
            Some((child, mut text)) => {
                text.push_str(&pending);
                self.mirror.set_text(child, text);
            }
            None => {
                let len = unit_len(&pending);
                tracing::warn!(
                    cursor = walk.cursor,
                    len,
                    "deleting text left without a leaf"
                );
                shared::remove_range(ytxn, xml, walk.cursor, len);
                walk.skip += len;
                self.stats.orphan_deletes += 1;
            }
        }
        Ok(())
    }

    /// Makes the local children of `key` match the mirror children of `id`.
    fn sync_children_from_shared(
        &mut self,
        ytxn: &mut TransactionMut,
        txn: &mut UpdateTxn<'_>,
        id: MirrorId,
        key: &NodeKey,
    ) -> Result<(), SyncError> {
        let children: Vec<MirrorId> = self.mirror.children(id).to_vec();
        let prev_keys: Vec<NodeKey> = txn.state().children(key).to_vec();
        let mirror_keys: HashSet<NodeKey> = children
            .iter()
            .filter_map(|child| self.mirror.key_of(*child).cloned())
            .collect();

        let mut next_keys = Vec::with_capacity(children.len());
        let mut visited: HashSet<NodeKey> = HashSet::new();
        let mut prev_index = 0;

        for child in children {
            // Local children the mirror no longer has are already gone.
            while prev_index < prev_keys.len() && !mirror_keys.contains(&prev_keys[prev_index]) {
                prev_index += 1;
            }
            let child_key = self.mirror.key_of(child).cloned();
            match child_key {
                Some(child_key) if prev_keys.get(prev_index) == Some(&child_key) => {
                    if let Some(text) = self.mirror.node(child)?.text() {
                        txn.set_text(&child_key, text)?;
                    }
                    visited.insert(child_key.clone());
                    next_keys.push(child_key);
                    prev_index += 1;
                }
                _ => {
                    let created = self.create_local_from_mirror(ytxn, txn, child)?;
                    next_keys.push(created);
                }
            }
        }

        txn.set_children(key, &next_keys)?;

        for old in prev_keys.iter().filter(|k| !visited.contains(*k)) {
            if let Some(stale) = self.mirror.by_key(old) {
                if !self.mirror.children(id).contains(&stale) {
                    self.mirror.destroy(stale);
                }
            }
        }
        Ok(())
    }

    /// Creates a local node (and subtree) for a mirror child and binds them.
    fn create_local_from_mirror(
        &mut self,
        ytxn: &mut TransactionMut,
        txn: &mut UpdateTxn<'_>,
        id: MirrorId,
    ) -> Result<NodeKey, SyncError> {
        let (node_type, kind) = {
            let node = self.mirror.node(id)?;
            (node.node_type().to_string(), node.node_kind())
        };
        let key = txn.create_node(&node_type)?;
        self.mirror.bind_key(id, key.clone());
        self.sync_props_from_shared(ytxn, txn, id, &key, None)?;

        match kind {
            NodeKind::Element => {
                if !self.mirror.is_hydrated(id) {
                    let xml = self.mirror.container_xml(id)?;
                    let delta = shared::snapshot_delta(&*ytxn, &xml);
                    self.apply_delta(ytxn, id, &delta)?;
                    self.mirror.set_hydrated(id);
                    self.fresh.insert(id);
                }
                self.sync_children_from_shared(ytxn, txn, id, &key)?;
            }
            NodeKind::Text => {
                let text = self.mirror.node(id)?.text().unwrap_or_default().to_string();
                txn.set_text(&key, &text)?;
            }
            NodeKind::LineBreak | NodeKind::Decorator => {}
        }
        Ok(key)
    }

    /// Copies shared attributes onto the local node. With `keys` only those
    /// names are looked at; otherwise every key the construct holds.
    fn sync_props_from_shared(
        &mut self,
        ytxn: &mut TransactionMut,
        txn: &mut UpdateTxn<'_>,
        id: MirrorId,
        key: &NodeKey,
        keys: Option<&[String]>,
    ) -> Result<(), SyncError> {
        let (handle, node_type) = {
            let node = self.mirror.node(id)?;
            (node.handle(), node.node_type().to_string())
        };
        let registry = self.registry.clone();
        let Some(spec) = registry.get(&node_type) else {
            return Err(SyncError::UnknownNodeType(node_type));
        };
        let names = match keys {
            Some(keys) => keys.to_vec(),
            None => handle.keys(&*ytxn),
        };

        for name in names {
            if name == TYPE_KEY
                || spec.excluded.contains(&name)
                || self.config.excluded_properties.contains(&name)
            {
                continue;
            }
            if !spec.declares(&name) {
                tracing::warn!(node_type = %node_type, property = %name, "ignoring undeclared property");
                continue;
            }
            match handle.get(&*ytxn, &name) {
                None => txn.remove_prop(key, &name)?,
                Some(Out::Any(value)) => {
                    let value = any_to_prop(&value, spec.defaults.get(&name));
                    txn.set_prop(key, &name, value)?;
                }
                Some(Out::YDoc(doc)) => {
                    let guid = doc.guid().to_string();
                    self.sub_documents.insert(guid.clone(), doc);
                    txn.set_prop(key, &name, PropValue::SubDocument(guid))?;
                }
                Some(_) => {
                    tracing::warn!(property = %name, "ignoring property holding a shared type");
                }
            }
        }
        Ok(())
    }

    fn repair_selection(
        &self,
        ytxn: &TransactionMut,
        txn: &mut UpdateTxn<'_>,
        awareness: Option<&dyn Awareness>,
    ) -> Result<SelectionRepair, SyncError> {
        let Some(current) = txn.selection().cloned() else {
            return Ok(SelectionRepair::Unchanged);
        };

        if txn.state().is_selection_valid() {
            return Ok(match self.followed_selection(ytxn, txn.state(), &current, awareness) {
                Some(own) if own != current => {
                    txn.set_selection(Some(own));
                    SelectionRepair::Repaired
                }
                _ => SelectionRepair::Unchanged,
            });
        }

        let by_offsets = txn.prev_state().selection().and_then(|prev| {
            let (anchor, focus) = OffsetView::new(txn.prev_state()).offsets_from_selection(prev)?;
            let selection = OffsetView::new(txn.state()).selection_from_offsets(anchor, focus)?;
            let valid = txn.state().is_point_valid(&selection.anchor)
                && txn.state().is_point_valid(&selection.focus);
            valid.then_some(selection)
        });
        let repaired =
            by_offsets.or_else(|| self.own_selection(ytxn, txn.state(), awareness));

        if let Some(selection) = repaired {
            txn.set_selection(Some(selection));
            return Ok(SelectionRepair::Repaired);
        }
        if !txn.state().children(&NodeKey::root()).is_empty() {
            txn.select_end(&NodeKey::root())?;
            return Ok(SelectionRepair::Repaired);
        }
        txn.set_selection(None);
        Ok(SelectionRepair::Lost)
    }

    /// The broadcast selection, when the batch moved the content it is
    /// anchored to away from where `current` points.
    fn followed_selection(
        &self,
        ytxn: &TransactionMut,
        state: &EditorState,
        current: &RangeSelection,
        awareness: Option<&dyn Awareness>,
    ) -> Option<RangeSelection> {
        let presence = awareness?.local_state()?;
        let anchor = presence.anchor_pos.as_deref()?;
        let focus = presence.focus_pos.as_deref()?;
        let moved = |point: &Point, encoded: &[u8]| {
            let published = shared::resolve_sticky(ytxn, encoded);
            let local = self
                .point_offset(state, point)
                .map(|(container, index)| (shared::branch_id(&container), index));
            published != local
        };
        if !moved(&current.anchor, anchor) && !moved(&current.focus, focus) {
            return None;
        }
        self.own_selection(ytxn, state, awareness)
    }

    /// The selection this client last broadcast, resolved against `state`.
    fn own_selection(
        &self,
        ytxn: &TransactionMut,
        state: &EditorState,
        awareness: Option<&dyn Awareness>,
    ) -> Option<RangeSelection> {
        let presence = awareness?.local_state()?;
        let anchor = self.resolve_point(ytxn, presence.anchor_pos.as_deref()?, state)?;
        let focus = self.resolve_point(ytxn, presence.focus_pos.as_deref()?, state)?;
        Some(RangeSelection::new(anchor, focus))
    }
}
