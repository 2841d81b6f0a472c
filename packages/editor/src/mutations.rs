//! # Update Transactions
//!
//! Every change to the tree goes through an [`UpdateTxn`], handed out by
//! [`Editor::update`](crate::Editor::update). The transaction works on a
//! pending copy of the state and tracks exactly which nodes were touched.
//!
//! ## Dirty tracking
//!
//! - Mutating a leaf (text, line break, decorator) marks it in `dirty_leaves`
//! - Mutating an element (props or child list) marks it in `dirty_elements`
//! - Every ancestor of a mutated node is marked in `dirty_elements`
//!
//! Detaching a node marks its old parent, attaching marks the node itself, so
//! the root ends up dirty for any change that is visible from the root.
//!
//! ## Tags
//!
//! Each update carries an [`UpdateTag`] describing where the change came
//! from. Synchronizers read the tag to avoid sending a change back to the
//! place it came from.

use crate::errors::EditorError;
use crate::node::{Node, NodeKey, NodeKind, PropValue};
use crate::registry::NodeRegistry;
use crate::selection::RangeSelection;
use crate::state::EditorState;
use std::collections::HashSet;

/// Origin of an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateTag {
    /// Produced by the local user
    Local,
    /// Applied from a peer through the shared document
    Collaboration,
    /// Replayed from undo/redo history of the shared document
    Historic,
}

impl UpdateTag {
    /// Changes that already exist in the shared document.
    pub fn is_remote(&self) -> bool {
        matches!(self, UpdateTag::Collaboration | UpdateTag::Historic)
    }
}

/// What a committed update changed.
#[derive(Debug, Clone)]
pub struct UpdateRecord {
    pub tag: UpdateTag,
    /// State before the update
    pub prev_state: EditorState,
    pub dirty_elements: HashSet<NodeKey>,
    pub dirty_leaves: HashSet<NodeKey>,
    /// Keys merged or removed by text normalization
    pub normalized_nodes: HashSet<NodeKey>,
}

impl UpdateRecord {
    pub fn is_empty(&self) -> bool {
        self.dirty_elements.is_empty()
            && self.dirty_leaves.is_empty()
            && self.normalized_nodes.is_empty()
    }

    pub fn is_root_dirty(&self) -> bool {
        self.dirty_elements.contains(&NodeKey::root())
    }
}

/// A pending edit. Mutations are only visible to readers after commit.
pub struct UpdateTxn<'a> {
    pub(crate) prev: &'a EditorState,
    pub(crate) pending: EditorState,
    pub(crate) registry: &'a NodeRegistry,
    pub(crate) dirty_elements: HashSet<NodeKey>,
    pub(crate) dirty_leaves: HashSet<NodeKey>,
    next_key: &'a mut u64,
    tag: UpdateTag,
}

impl<'a> UpdateTxn<'a> {
    pub(crate) fn new(
        prev: &'a EditorState,
        registry: &'a NodeRegistry,
        next_key: &'a mut u64,
        tag: UpdateTag,
    ) -> Self {
        Self {
            prev,
            pending: prev.clone(),
            registry,
            dirty_elements: HashSet::new(),
            dirty_leaves: HashSet::new(),
            next_key,
            tag,
        }
    }

    pub fn tag(&self) -> UpdateTag {
        self.tag
    }

    /// State as it was when the update started.
    pub fn prev_state(&self) -> &EditorState {
        self.prev
    }

    /// State including every mutation made so far.
    pub fn state(&self) -> &EditorState {
        &self.pending
    }

    pub fn registry(&self) -> &NodeRegistry {
        self.registry
    }

    pub fn node(&self, key: &NodeKey) -> Option<&Node> {
        self.pending.node(key)
    }

    pub fn selection(&self) -> Option<&RangeSelection> {
        self.pending.selection()
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Creates a detached node of a registered type with its default props.
    pub fn create_node(&mut self, node_type: &str) -> Result<NodeKey, EditorError> {
        let spec = self
            .registry
            .get(node_type)
            .ok_or_else(|| EditorError::UnknownNodeType(node_type.to_string()))?;
        *self.next_key += 1;
        let key = NodeKey::new(self.next_key.to_string());
        let node = Node::new(key.clone(), node_type, spec.kind, spec.defaults.clone());
        self.pending.nodes.insert(key.clone(), node);
        self.mark_dirty(&key);
        Ok(key)
    }

    /// Creates a detached `text` node holding `text`.
    pub fn create_text(&mut self, text: &str) -> Result<NodeKey, EditorError> {
        let key = self.create_node("text")?;
        self.node_mut(&key)?.text = text.to_string();
        Ok(key)
    }

    // ------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------

    pub fn append(&mut self, parent: &NodeKey, child: &NodeKey) -> Result<(), EditorError> {
        let len = self.pending.children(parent).len();
        let already_here = self.pending.parent(child) == Some(parent);
        let index = if already_here { len - 1 } else { len };
        self.insert_child(parent, index, child)
    }

    /// Inserts `child` at `index` of `parent`, detaching it from its current
    /// parent first. `index` addresses the child list after that detach.
    pub fn insert_child(
        &mut self,
        parent: &NodeKey,
        index: usize,
        child: &NodeKey,
    ) -> Result<(), EditorError> {
        self.check_attachable(parent, child)?;
        let mut len = self.pending.children(parent).len();
        if self.pending.parent(child) == Some(parent) {
            len -= 1;
        }
        if index > len {
            return Err(EditorError::IndexOutOfBounds {
                key: parent.clone(),
                index,
            });
        }

        self.detach(child)?;
        self.node_mut(parent)?.children.insert(index, child.clone());
        self.node_mut(child)?.parent = Some(parent.clone());
        self.mark_dirty(parent);
        self.mark_dirty(child);
        Ok(())
    }

    /// Inserts `child` directly before `sibling`.
    pub fn insert_before(&mut self, sibling: &NodeKey, child: &NodeKey) -> Result<(), EditorError> {
        let parent = self
            .pending
            .parent(sibling)
            .cloned()
            .ok_or_else(|| EditorError::InvalidStructure(format!("{} has no parent", sibling)))?;
        self.check_attachable(&parent, child)?;
        self.detach(child)?;
        let index = self
            .pending
            .index_in_parent(sibling)
            .ok_or_else(|| EditorError::NodeNotFound(sibling.clone()))?;
        self.insert_child(&parent, index, child)
    }

    /// Inserts `child` directly after `sibling`.
    pub fn insert_after(&mut self, sibling: &NodeKey, child: &NodeKey) -> Result<(), EditorError> {
        let parent = self
            .pending
            .parent(sibling)
            .cloned()
            .ok_or_else(|| EditorError::InvalidStructure(format!("{} has no parent", sibling)))?;
        self.check_attachable(&parent, child)?;
        self.detach(child)?;
        let index = self
            .pending
            .index_in_parent(sibling)
            .ok_or_else(|| EditorError::NodeNotFound(sibling.clone()))?;
        self.insert_child(&parent, index + 1, child)
    }

    /// Detaches a node. It is garbage-collected on commit unless re-attached.
    pub fn remove(&mut self, key: &NodeKey) -> Result<(), EditorError> {
        if key.is_root() {
            return Err(EditorError::CannotDetachRoot);
        }
        if !self.pending.contains(key) {
            return Err(EditorError::NodeNotFound(key.clone()));
        }
        self.detach(key)
    }

    /// Puts `new` where `old` is and detaches `old`.
    pub fn replace(&mut self, old: &NodeKey, new: &NodeKey) -> Result<(), EditorError> {
        if old == new {
            return Ok(());
        }
        if old.is_root() {
            return Err(EditorError::CannotDetachRoot);
        }
        let parent = self
            .pending
            .parent(old)
            .cloned()
            .ok_or_else(|| EditorError::InvalidStructure(format!("{} has no parent", old)))?;
        self.check_attachable(&parent, new)?;
        self.detach(new)?;
        let index = self
            .pending
            .index_in_parent(old)
            .ok_or_else(|| EditorError::NodeNotFound(old.clone()))?;
        self.detach(old)?;
        self.insert_child(&parent, index, new)
    }

    /// Removes `delete_count` children starting at `start` and inserts `insert` there.
    pub fn splice_children(
        &mut self,
        parent: &NodeKey,
        start: usize,
        delete_count: usize,
        insert: &[NodeKey],
    ) -> Result<(), EditorError> {
        let node = self
            .pending
            .node(parent)
            .ok_or_else(|| EditorError::NodeNotFound(parent.clone()))?;
        if !node.is_element() {
            return Err(EditorError::NotAnElement(parent.clone()));
        }
        if start + delete_count > node.children.len() {
            return Err(EditorError::IndexOutOfBounds {
                key: parent.clone(),
                index: start + delete_count,
            });
        }

        let removed: Vec<NodeKey> = node.children[start..start + delete_count].to_vec();
        for key in &removed {
            self.detach(key)?;
        }
        let mut index = start;
        for key in insert {
            let mut at = index;
            if let Some(current) = self.pending.index_in_parent(key) {
                if self.pending.parent(key) == Some(parent) && current < index {
                    at -= 1;
                }
            }
            self.insert_child(parent, at, key)?;
            index = at + 1;
        }
        Ok(())
    }

    /// Replaces the whole child list of `parent` when it differs from `children`.
    pub fn set_children(&mut self, parent: &NodeKey, children: &[NodeKey]) -> Result<(), EditorError> {
        let current = self.pending.children(parent);
        if current == children {
            return Ok(());
        }
        let len = current.len();
        self.splice_children(parent, 0, len, children)
    }

    // ------------------------------------------------------------------
    // Content
    // ------------------------------------------------------------------

    pub fn set_text(&mut self, key: &NodeKey, text: &str) -> Result<(), EditorError> {
        let node = self.node_mut(key)?;
        if node.kind != NodeKind::Text {
            return Err(EditorError::NotText(key.clone()));
        }
        if node.text != text {
            node.text = text.to_string();
            self.mark_dirty(key);
        }
        Ok(())
    }

    /// Sets a declared property. Undeclared names are rejected.
    pub fn set_prop(
        &mut self,
        key: &NodeKey,
        name: &str,
        value: impl Into<PropValue>,
    ) -> Result<(), EditorError> {
        let value = value.into();
        let node_type = self
            .pending
            .node(key)
            .map(|n| n.node_type.clone())
            .ok_or_else(|| EditorError::NodeNotFound(key.clone()))?;
        let declared = self
            .registry
            .get(&node_type)
            .map_or(false, |spec| spec.declares(name));
        if !declared {
            return Err(EditorError::UnknownProperty {
                node_type,
                name: name.to_string(),
            });
        }

        let node = self.node_mut(key)?;
        if node.props.get(name) != Some(&value) {
            node.props.insert(name.to_string(), value);
            self.mark_dirty(key);
        }
        Ok(())
    }

    pub fn remove_prop(&mut self, key: &NodeKey, name: &str) -> Result<(), EditorError> {
        let node = self.node_mut(key)?;
        if node.props.remove(name).is_some() {
            self.mark_dirty(key);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    pub fn set_selection(&mut self, selection: Option<RangeSelection>) {
        self.pending.selection = selection;
    }

    /// Collapses the selection at the end of `key`'s subtree.
    pub fn select_end(&mut self, key: &NodeKey) -> Result<(), EditorError> {
        let point = self
            .pending
            .end_point(key)
            .ok_or_else(|| EditorError::NodeNotFound(key.clone()))?;
        self.pending.selection = Some(RangeSelection::collapsed(point));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    pub(crate) fn node_mut(&mut self, key: &NodeKey) -> Result<&mut Node, EditorError> {
        self.pending
            .nodes
            .get_mut(key)
            .ok_or_else(|| EditorError::NodeNotFound(key.clone()))
    }

    pub(crate) fn mark_dirty(&mut self, key: &NodeKey) {
        let Some(node) = self.pending.nodes.get(key) else {
            return;
        };
        if node.is_element() {
            self.dirty_elements.insert(key.clone());
        } else {
            self.dirty_leaves.insert(key.clone());
        }
        let mut current = node.parent.clone();
        while let Some(parent) = current {
            current = self.pending.parent(&parent).cloned();
            self.dirty_elements.insert(parent);
        }
    }

    fn check_attachable(&self, parent: &NodeKey, child: &NodeKey) -> Result<(), EditorError> {
        let parent_node = self
            .pending
            .node(parent)
            .ok_or_else(|| EditorError::NodeNotFound(parent.clone()))?;
        if !parent_node.is_element() {
            return Err(EditorError::NotAnElement(parent.clone()));
        }
        if !self.pending.contains(child) {
            return Err(EditorError::NodeNotFound(child.clone()));
        }
        if child.is_root() {
            return Err(EditorError::CannotDetachRoot);
        }

        let mut current = Some(parent.clone());
        while let Some(key) = current {
            if &key == child {
                return Err(EditorError::CycleDetected(child.clone()));
            }
            current = self.pending.parent(&key).cloned();
        }
        Ok(())
    }

    fn detach(&mut self, key: &NodeKey) -> Result<(), EditorError> {
        let Some(parent) = self.pending.parent(key).cloned() else {
            return Ok(());
        };
        self.node_mut(&parent)?.children.retain(|k| k != key);
        self.node_mut(key)?.parent = None;
        self.mark_dirty(&parent);
        Ok(())
    }

    /// Drops nodes that are no longer reachable from the root and prunes the
    /// dirty sets to surviving nodes.
    pub(crate) fn collect_garbage(&mut self) {
        let attached = self.pending.attached_keys();
        self.pending.nodes.retain(|key, _| attached.contains(key));
        self.dirty_elements.retain(|key| attached.contains(key));
        self.dirty_leaves.retain(|key| attached.contains(key));
    }

    pub(crate) fn into_parts(self) -> (EditorState, HashSet<NodeKey>, HashSet<NodeKey>) {
        (self.pending, self.dirty_elements, self.dirty_leaves)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn_fixture<'a>(
        state: &'a EditorState,
        registry: &'a NodeRegistry,
        next_key: &'a mut u64,
    ) -> UpdateTxn<'a> {
        UpdateTxn::new(state, registry, next_key, UpdateTag::Local)
    }

    #[test]
    fn test_append_marks_ancestors_dirty() {
        let state = EditorState::empty();
        let registry = NodeRegistry::with_defaults();
        let mut next_key = 0;
        let mut txn = txn_fixture(&state, &registry, &mut next_key);

        let para = txn.create_node("paragraph").unwrap();
        txn.append(&NodeKey::root(), &para).unwrap();
        let text = txn.create_text("hi").unwrap();
        txn.append(&para, &text).unwrap();

        assert!(txn.dirty_elements.contains(&NodeKey::root()));
        assert!(txn.dirty_elements.contains(&para));
        assert!(txn.dirty_leaves.contains(&text));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let state = EditorState::empty();
        let registry = NodeRegistry::with_defaults();
        let mut next_key = 0;
        let mut txn = txn_fixture(&state, &registry, &mut next_key);

        let outer = txn.create_node("quote").unwrap();
        let inner = txn.create_node("quote").unwrap();
        txn.append(&NodeKey::root(), &outer).unwrap();
        txn.append(&outer, &inner).unwrap();

        assert_eq!(
            txn.append(&inner, &outer),
            Err(EditorError::CycleDetected(outer.clone()))
        );
    }

    #[test]
    fn test_move_within_parent() {
        let state = EditorState::empty();
        let registry = NodeRegistry::with_defaults();
        let mut next_key = 0;
        let mut txn = txn_fixture(&state, &registry, &mut next_key);

        let a = txn.create_node("paragraph").unwrap();
        let b = txn.create_node("paragraph").unwrap();
        let c = txn.create_node("paragraph").unwrap();
        let root = NodeKey::root();
        txn.splice_children(&root, 0, 0, &[a.clone(), b.clone(), c.clone()])
            .unwrap();
        txn.insert_child(&root, 2, &a).unwrap();

        assert_eq!(txn.state().children(&root), &[b, c, a]);
    }

    #[test]
    fn test_unknown_property_rejected() {
        let state = EditorState::empty();
        let registry = NodeRegistry::with_defaults();
        let mut next_key = 0;
        let mut txn = txn_fixture(&state, &registry, &mut next_key);

        let para = txn.create_node("paragraph").unwrap();
        let err = txn.set_prop(&para, "colour", "red").unwrap_err();
        assert!(matches!(err, EditorError::UnknownProperty { .. }));
    }
}
