//! # Shadow Mirror
//!
//! A tree of [`MirrorNode`]s that pairs every local node with the shared
//! construct representing it. Nodes live in an arena owned by the binding and
//! refer to each other through [`MirrorId`] handles; ownership runs from
//! parent to child through `children` only.
//!
//! ## Sizes
//!
//! A child occupies units of its parent's sequence:
//!
//! | Kind       | Units                 |
//! |------------|-----------------------|
//! | Container  | 1 (the embed)         |
//! | Text       | 1 + UTF-16 text units |
//! | LineBreak  | 1                     |
//! | Opaque     | 1                     |

use crate::binding::Binding;
use crate::error::SyncError;
use crate::shared::{self, SharedHandle, TYPE_KEY};
use crate::text_diff::unit_len;
use folio_editor::{EditorState, NodeKey, NodeKind};
use std::collections::HashMap;
use yrs::branch::BranchID;
use yrs::{Any, In, MapRef, Out, ReadTxn, TransactionMut, XmlTextRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MirrorId(u64);

#[derive(Debug, Clone)]
pub enum MirrorKind {
    Container {
        xml: XmlTextRef,
        children: Vec<MirrorId>,
        /// Whether `children` reflects the construct's content
        hydrated: bool,
    },
    Text {
        map: MapRef,
        /// Last text known to be in sync with the shared sequence
        text: String,
    },
    LineBreak {
        map: MapRef,
    },
    Opaque {
        map: MapRef,
    },
}

#[derive(Debug, Clone)]
pub struct MirrorNode {
    pub(crate) kind: MirrorKind,
    pub(crate) parent: Option<MirrorId>,
    pub(crate) key: Option<NodeKey>,
    pub(crate) node_type: String,
}

impl MirrorNode {
    pub fn kind(&self) -> &MirrorKind {
        &self.kind
    }

    pub fn parent(&self) -> Option<MirrorId> {
        self.parent
    }

    /// Local key, unset until the node is hydrated locally.
    pub fn key(&self) -> Option<&NodeKey> {
        self.key.as_ref()
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    pub fn is_text(&self) -> bool {
        matches!(self.kind, MirrorKind::Text { .. })
    }

    pub fn is_container(&self) -> bool {
        matches!(self.kind, MirrorKind::Container { .. })
    }

    /// Kind of the local node this mirror stands for.
    pub fn node_kind(&self) -> NodeKind {
        match self.kind {
            MirrorKind::Container { .. } => NodeKind::Element,
            MirrorKind::Text { .. } => NodeKind::Text,
            MirrorKind::LineBreak { .. } => NodeKind::LineBreak,
            MirrorKind::Opaque { .. } => NodeKind::Decorator,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            MirrorKind::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn handle(&self) -> SharedHandle {
        match &self.kind {
            MirrorKind::Container { xml, .. } => SharedHandle::Container(xml.clone()),
            MirrorKind::Text { map, .. }
            | MirrorKind::LineBreak { map }
            | MirrorKind::Opaque { map } => SharedHandle::Leaf(map.clone()),
        }
    }

    /// Units occupied in the parent sequence.
    pub fn size(&self) -> u32 {
        match &self.kind {
            MirrorKind::Text { text, .. } => unit_len(text) + 1,
            _ => 1,
        }
    }
}

/// Result of locating a unit offset among a container's children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildPosition {
    /// Child covering the offset, `None` past the last child
    pub node: Option<MirrorId>,
    pub node_index: usize,
    /// Unit offset into a text child, otherwise the child's own unit offset
    pub offset: u32,
    /// Units of a text child from the offset to its end
    pub length: u32,
    /// Offset addresses a text child's marker unit rather than its text
    pub at_marker: bool,
}

impl ChildPosition {
    fn empty(node_index: usize, offset: u32) -> Self {
        Self {
            node: None,
            node_index,
            offset,
            length: 0,
            at_marker: false,
        }
    }
}

/// Arena of mirror nodes plus the key and construct registries.
#[derive(Debug)]
pub struct MirrorTree {
    nodes: HashMap<MirrorId, MirrorNode>,
    by_key: HashMap<NodeKey, MirrorId>,
    by_branch: HashMap<BranchID, MirrorId>,
    next_id: u64,
    root: MirrorId,
}

impl MirrorTree {
    /// A tree holding only the root container, bound to the local root.
    pub fn new(root: XmlTextRef) -> Self {
        let mut tree = Self {
            nodes: HashMap::new(),
            by_key: HashMap::new(),
            by_branch: HashMap::new(),
            next_id: 0,
            root: MirrorId(0),
        };
        let root = tree.insert(MirrorNode {
            kind: MirrorKind::Container {
                xml: root,
                children: Vec::new(),
                hydrated: false,
            },
            parent: None,
            key: None,
            node_type: "root".to_string(),
        });
        tree.bind_key(root, NodeKey::root());
        tree.root = root;
        tree
    }

    pub fn root(&self) -> MirrorId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: MirrorId) -> Option<&MirrorNode> {
        self.nodes.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: MirrorId) -> Option<&mut MirrorNode> {
        self.nodes.get_mut(&id)
    }

    pub(crate) fn node(&self, id: MirrorId) -> Result<&MirrorNode, SyncError> {
        self.nodes
            .get(&id)
            .ok_or_else(|| SyncError::invariant(format!("mirror {:?} is not registered", id)))
    }

    pub fn by_key(&self, key: &NodeKey) -> Option<MirrorId> {
        self.by_key.get(key).copied()
    }

    pub fn by_branch(&self, branch: &BranchID) -> Option<MirrorId> {
        self.by_branch.get(branch).copied()
    }

    pub fn key_of(&self, id: MirrorId) -> Option<&NodeKey> {
        self.nodes.get(&id).and_then(|n| n.key.as_ref())
    }

    pub(crate) fn insert(&mut self, node: MirrorNode) -> MirrorId {
        let id = MirrorId(self.next_id);
        self.next_id += 1;
        self.by_branch.insert(node.handle().branch_id(), id);
        if let Some(key) = &node.key {
            self.by_key.insert(key.clone(), id);
        }
        self.nodes.insert(id, node);
        id
    }

    /// Records that `id` now represents the local node `key`.
    pub(crate) fn bind_key(&mut self, id: MirrorId, key: NodeKey) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        if let Some(old) = node.key.replace(key.clone()) {
            if self.by_key.get(&old) == Some(&id) {
                self.by_key.remove(&old);
            }
        }
        self.by_key.insert(key, id);
    }

    pub fn children(&self, id: MirrorId) -> &[MirrorId] {
        match self.nodes.get(&id).map(|n| &n.kind) {
            Some(MirrorKind::Container { children, .. }) => children,
            _ => &[],
        }
    }

    pub(crate) fn children_mut(&mut self, id: MirrorId) -> Result<&mut Vec<MirrorId>, SyncError> {
        match self.nodes.get_mut(&id).map(|n| &mut n.kind) {
            Some(MirrorKind::Container { children, .. }) => Ok(children),
            _ => Err(SyncError::invariant(format!(
                "mirror {:?} is not a container",
                id
            ))),
        }
    }

    pub(crate) fn container_xml(&self, id: MirrorId) -> Result<XmlTextRef, SyncError> {
        match self.nodes.get(&id).map(|n| &n.kind) {
            Some(MirrorKind::Container { xml, .. }) => Ok(xml.clone()),
            _ => Err(SyncError::invariant(format!(
                "mirror {:?} is not a container",
                id
            ))),
        }
    }

    pub(crate) fn is_hydrated(&self, id: MirrorId) -> bool {
        matches!(
            self.nodes.get(&id).map(|n| &n.kind),
            Some(MirrorKind::Container { hydrated: true, .. })
        )
    }

    pub(crate) fn set_hydrated(&mut self, id: MirrorId) {
        if let Some(MirrorKind::Container { hydrated, .. }) =
            self.nodes.get_mut(&id).map(|n| &mut n.kind)
        {
            *hydrated = true;
        }
    }

    pub(crate) fn set_text(&mut self, id: MirrorId, value: String) {
        if let Some(MirrorKind::Text { text, .. }) = self.nodes.get_mut(&id).map(|n| &mut n.kind) {
            *text = value;
        }
    }

    pub fn size(&self, id: MirrorId) -> u32 {
        self.nodes.get(&id).map_or(0, MirrorNode::size)
    }

    /// Units occupied by all children of a container.
    pub fn content_len(&self, id: MirrorId) -> u32 {
        self.children(id).iter().map(|child| self.size(*child)).sum()
    }

    /// Unit offset of `child` inside `parent`, `None` if it is not a child.
    pub fn offset_of_child(&self, parent: MirrorId, child: MirrorId) -> Option<u32> {
        let mut offset = 0;
        for id in self.children(parent) {
            if *id == child {
                return Some(offset);
            }
            offset += self.size(*id);
        }
        None
    }

    /// Unit offset of the `index`th child, or the container's length when
    /// `index` is past the end.
    pub fn offset_of_index(&self, parent: MirrorId, index: usize) -> u32 {
        self.children(parent)
            .iter()
            .take(index)
            .map(|child| self.size(*child))
            .sum()
    }

    pub fn index_of_child(&self, parent: MirrorId, child: MirrorId) -> Option<usize> {
        self.children(parent).iter().position(|id| *id == child)
    }

    /// Finds the child covering unit `offset` of `container`.
    ///
    /// A text child matches when the offset falls inside its span; with
    /// `boundary_is_edge` its end boundary matches too, so an insertion there
    /// extends that text. Any other child matches only on its own unit. Past
    /// the last child the result has no node and `node_index == len`.
    pub fn position_in_container(
        &self,
        container: MirrorId,
        offset: u32,
        boundary_is_edge: bool,
    ) -> ChildPosition {
        let children = self.children(container);
        let mut index = 0u32;
        for (i, child) in children.iter().enumerate() {
            let child_offset = index;
            let size = self.size(*child);
            index += size;
            let is_text = self.nodes.get(child).map_or(false, MirrorNode::is_text);

            let covers = if boundary_is_edge {
                index >= offset
            } else {
                index > offset
            };
            if covers && is_text {
                return ChildPosition {
                    node: Some(*child),
                    node_index: i,
                    offset: offset.saturating_sub(child_offset + 1),
                    length: index - offset,
                    at_marker: offset <= child_offset,
                };
            }
            if index > offset {
                return ChildPosition {
                    node: Some(*child),
                    node_index: i,
                    offset: child_offset,
                    length: 0,
                    at_marker: false,
                };
            }
            if i == children.len() - 1 {
                return ChildPosition::empty(i + 1, child_offset + 1);
            }
        }
        ChildPosition::empty(0, 0)
    }

    /// Removes `id` and its subtree from the arena and the registries.
    /// Registry entries that were re-bound to another node are left alone.
    pub(crate) fn destroy(&mut self, id: MirrorId) {
        let Some(node) = self.nodes.remove(&id) else {
            return;
        };
        if let MirrorKind::Container { children, .. } = &node.kind {
            for child in children {
                self.destroy(*child);
            }
        }
        if let Some(key) = &node.key {
            if self.by_key.get(key) == Some(&id) {
                self.by_key.remove(key);
            }
        }
        let branch = node.handle().branch_id();
        if self.by_branch.get(&branch) == Some(&id) {
            self.by_branch.remove(&branch);
        }
    }

    /// Takes `child` out of `parent`'s child list and destroys it.
    pub(crate) fn remove_child(&mut self, parent: MirrorId, child: MirrorId) -> Result<(), SyncError> {
        self.children_mut(parent)?.retain(|id| *id != child);
        self.destroy(child);
        Ok(())
    }
}

impl Binding {
    /// Embeds a construct for local node `key` as child `index` of `parent`,
    /// writing its type, properties, text and, for elements, its subtree.
    pub(crate) fn create_from_local(
        &mut self,
        txn: &mut TransactionMut,
        state: &EditorState,
        parent: MirrorId,
        index: usize,
        key: &NodeKey,
    ) -> Result<MirrorId, SyncError> {
        let node = state
            .node(key)
            .ok_or_else(|| SyncError::MissingNode(key.clone()))?;
        let parent_xml = self.mirror.container_xml(parent)?;
        let offset = self.mirror.offset_of_index(parent, index);

        let kind = match node.kind() {
            NodeKind::Element => MirrorKind::Container {
                xml: shared::insert_container(txn, &parent_xml, offset),
                children: Vec::new(),
                hydrated: true,
            },
            NodeKind::Text => MirrorKind::Text {
                map: shared::insert_leaf(txn, &parent_xml, offset),
                text: String::new(),
            },
            NodeKind::LineBreak => MirrorKind::LineBreak {
                map: shared::insert_leaf(txn, &parent_xml, offset),
            },
            NodeKind::Decorator => MirrorKind::Opaque {
                map: shared::insert_leaf(txn, &parent_xml, offset),
            },
        };
        let id = self.mirror.insert(MirrorNode {
            kind,
            parent: Some(parent),
            key: Some(key.clone()),
            node_type: node.node_type().to_string(),
        });
        self.mirror.children_mut(parent)?.insert(index, id);

        let handle = self.mirror.node(id)?.handle();
        handle.set(txn, TYPE_KEY, In::Any(Any::String(node.node_type().into())));
        self.sync_props_to_shared(txn, &handle, None, node);

        match node.kind() {
            NodeKind::Text => {
                shared::insert_text(txn, &parent_xml, offset + 1, node.text());
                self.mirror.set_text(id, node.text().to_string());
            }
            NodeKind::Element => {
                for (i, child) in node.children().iter().enumerate() {
                    self.create_from_local(txn, state, id, i, child)?;
                }
            }
            NodeKind::LineBreak | NodeKind::Decorator => {}
        }
        Ok(id)
    }

    /// Registers a mirror for an embed found in a container's content.
    /// The node stays unbound until it is hydrated locally.
    pub(crate) fn create_from_shared<T: ReadTxn>(
        &mut self,
        txn: &T,
        value: &Out,
        parent: MirrorId,
    ) -> Result<MirrorId, SyncError> {
        let (handle, container) = match value {
            Out::YXmlText(xml) => (SharedHandle::Container(xml.clone()), true),
            Out::YMap(map) => (SharedHandle::Leaf(map.clone()), false),
            other => {
                return Err(SyncError::invariant(format!(
                    "unsupported embed in container: {:?}",
                    other
                )))
            }
        };

        if let Some(existing) = self.mirror.by_branch(&handle.branch_id()) {
            tracing::debug!(?existing, "reusing mirror for re-inserted construct");
            if let Some(old_parent) = self.mirror.get(existing).and_then(|n| n.parent) {
                self.mirror.children_mut(old_parent)?.retain(|id| *id != existing);
            }
            if let Some(node) = self.mirror.get_mut(existing) {
                node.parent = Some(parent);
            }
            return Ok(existing);
        }

        let node_type = handle
            .node_type(txn)
            .ok_or_else(|| SyncError::UnknownNodeType(format!("<missing {}>", TYPE_KEY)))?;
        let kind = self
            .registry
            .kind_of(&node_type)
            .ok_or_else(|| SyncError::UnknownNodeType(node_type.clone()))?;

        let kind = match (handle, kind) {
            (SharedHandle::Container(xml), NodeKind::Element) => MirrorKind::Container {
                xml,
                children: Vec::new(),
                hydrated: false,
            },
            (SharedHandle::Leaf(map), NodeKind::Text) => MirrorKind::Text {
                map,
                text: String::new(),
            },
            (SharedHandle::Leaf(map), NodeKind::LineBreak) => MirrorKind::LineBreak { map },
            (SharedHandle::Leaf(map), NodeKind::Decorator) => MirrorKind::Opaque { map },
            (_, kind) => {
                return Err(SyncError::invariant(format!(
                    "{} of kind {:?} stored in a {} construct",
                    node_type,
                    kind,
                    if container { "sequence" } else { "map" }
                )))
            }
        };

        Ok(self.mirror.insert(MirrorNode {
            kind,
            parent: Some(parent),
            key: None,
            node_type,
        }))
    }
}
