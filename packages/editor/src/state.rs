//! # Editor State
//!
//! An immutable snapshot of the tree plus the selection. Every committed
//! update produces a new `EditorState`; the previous one is handed back in the
//! [`UpdateRecord`](crate::UpdateRecord) so synchronizers can diff the two.

use crate::node::{Node, NodeKey, NodeKind, Props};
use crate::selection::{Point, PointKind, RangeSelection};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub struct EditorState {
    pub(crate) nodes: HashMap<NodeKey, Node>,
    pub(crate) selection: Option<RangeSelection>,
}

impl EditorState {
    /// A state holding only the root element.
    pub fn empty() -> Self {
        let root = Node::new(NodeKey::root(), "root", NodeKind::Element, Props::new());
        let mut nodes = HashMap::new();
        nodes.insert(root.key.clone(), root);
        Self {
            nodes,
            selection: None,
        }
    }

    pub fn root(&self) -> Option<&Node> {
        self.nodes.get(&NodeKey::root())
    }

    pub fn node(&self, key: &NodeKey) -> Option<&Node> {
        self.nodes.get(key)
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn selection(&self) -> Option<&RangeSelection> {
        self.selection.as_ref()
    }

    /// Child keys of an element; empty for leaves and unknown keys.
    pub fn children(&self, key: &NodeKey) -> &[NodeKey] {
        self.nodes.get(key).map(|n| n.children()).unwrap_or(&[])
    }

    pub fn parent(&self, key: &NodeKey) -> Option<&NodeKey> {
        self.nodes.get(key).and_then(|n| n.parent.as_ref())
    }

    pub fn index_in_parent(&self, key: &NodeKey) -> Option<usize> {
        let parent = self.parent(key)?;
        self.children(parent).iter().position(|k| k == key)
    }

    pub fn next_sibling(&self, key: &NodeKey) -> Option<&NodeKey> {
        let parent = self.parent(key)?;
        let index = self.index_in_parent(key)?;
        self.children(parent).get(index + 1)
    }

    pub fn previous_sibling(&self, key: &NodeKey) -> Option<&NodeKey> {
        let parent = self.parent(key)?;
        let index = self.index_in_parent(key)?;
        index.checked_sub(1).and_then(|i| self.children(parent).get(i))
    }

    /// Whether `key` is reachable from the root through parent links.
    pub fn is_attached(&self, key: &NodeKey) -> bool {
        let mut current = key;
        let mut seen = HashSet::new();
        loop {
            if current.is_root() {
                return self.nodes.contains_key(current);
            }
            if !seen.insert(current) {
                return false;
            }
            match self.parent(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Keys of every node reachable from the root, root included.
    pub(crate) fn attached_keys(&self) -> HashSet<NodeKey> {
        let mut attached = HashSet::new();
        let mut stack = vec![NodeKey::root()];
        while let Some(key) = stack.pop() {
            if let Some(node) = self.nodes.get(&key) {
                stack.extend(node.children.iter().cloned());
                attached.insert(key);
            }
        }
        attached
    }

    /// Plain text of a subtree. Blocks under the root are separated by a blank line.
    pub fn text_content(&self, key: &NodeKey) -> String {
        let Some(node) = self.nodes.get(key) else {
            return String::new();
        };
        match node.kind {
            NodeKind::Text => node.text.clone(),
            NodeKind::LineBreak => "\n".to_string(),
            NodeKind::Decorator => String::new(),
            NodeKind::Element => {
                let separator = if node.key.is_root() { "\n\n" } else { "" };
                node.children
                    .iter()
                    .map(|child| self.text_content(child))
                    .collect::<Vec<_>>()
                    .join(separator)
            }
        }
    }

    /// A point is valid when it references an attached node of the matching
    /// kind and its offset does not exceed that node's length.
    pub fn is_point_valid(&self, point: &Point) -> bool {
        let Some(node) = self.nodes.get(&point.key) else {
            return false;
        };
        if !self.is_attached(&point.key) {
            return false;
        }
        match point.kind {
            PointKind::Text => node.kind == NodeKind::Text && point.offset <= node.text_len(),
            PointKind::Element => {
                node.kind == NodeKind::Element && point.offset <= node.children.len()
            }
        }
    }

    pub fn is_selection_valid(&self) -> bool {
        match &self.selection {
            Some(sel) => self.is_point_valid(&sel.anchor) && self.is_point_valid(&sel.focus),
            None => true,
        }
    }

    /// The point at the very end of a subtree: the end of its last text
    /// descendant, or the child count of the deepest last element.
    pub fn end_point(&self, key: &NodeKey) -> Option<Point> {
        let node = self.nodes.get(key)?;
        match node.kind {
            NodeKind::Text => Some(Point::text(key.clone(), node.text_len())),
            NodeKind::Element => match node.children.last() {
                Some(last) => {
                    let last_node = self.nodes.get(last)?;
                    match last_node.kind {
                        NodeKind::Text | NodeKind::Element => self.end_point(last),
                        NodeKind::LineBreak | NodeKind::Decorator => {
                            Some(Point::element(key.clone(), node.children.len()))
                        }
                    }
                }
                None => Some(Point::element(key.clone(), 0)),
            },
            NodeKind::LineBreak | NodeKind::Decorator => {
                let parent = node.parent.as_ref()?;
                let index = self.index_in_parent(key)?;
                Some(Point::element(parent.clone(), index + 1))
            }
        }
    }

    /// Key-free copy of the attached tree.
    pub fn export(&self) -> ExportedNode {
        self.export_node(&NodeKey::root())
            .unwrap_or_else(|| ExportedNode::element("root"))
    }

    fn export_node(&self, key: &NodeKey) -> Option<ExportedNode> {
        let node = self.nodes.get(key)?;
        Some(ExportedNode {
            node_type: node.node_type.clone(),
            text: (node.kind == NodeKind::Text).then(|| node.text.clone()),
            props: node.props.clone(),
            children: node
                .children
                .iter()
                .filter_map(|child| self.export_node(child))
                .collect(),
        })
    }
}

impl Default for EditorState {
    fn default() -> Self {
        Self::empty()
    }
}

/// Serializable tree without node keys, used for structural comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedNode {
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Props::is_empty")]
    pub props: Props,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ExportedNode>,
}

impl ExportedNode {
    pub fn element(node_type: &str) -> Self {
        Self {
            node_type: node_type.to_string(),
            text: None,
            props: Props::new(),
            children: Vec::new(),
        }
    }
}
