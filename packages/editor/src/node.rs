//! # Tree Nodes
//!
//! The unit of the local document tree. Every node has a stable key, a type
//! tag resolved through the [`NodeRegistry`](crate::NodeRegistry), a kind,
//! a parent link and a property bag. Elements own an ordered child list,
//! text nodes own a text payload.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Key of the document root. Every editor has exactly one node with this key.
pub const ROOT_KEY: &str = "root";

/// Opaque node identifier, unique within one editor session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey(String);

impl NodeKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn root() -> Self {
        Self(ROOT_KEY.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT_KEY
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for NodeKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// The closed set of node shapes the tree knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Container with ordered children (root, paragraph, heading, ...)
    Element,
    /// Leaf carrying a text payload
    Text,
    /// Hard line break inside a block
    LineBreak,
    /// Opaque leaf rendered by the host (images, rules, embeds)
    Decorator,
}

/// A property value stored on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<PropValue>),
    Map(BTreeMap<String, PropValue>),
    /// Handle to a nested collaborative document, identified by its guid
    SubDocument(String),
}

impl PropValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::String(value.to_string())
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::String(value)
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        PropValue::Int(value)
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        PropValue::Float(value)
    }
}

/// Named properties of a node, ordered for stable iteration.
pub type Props = BTreeMap<String, PropValue>;

/// One node of the local document tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub(crate) key: NodeKey,
    pub(crate) node_type: String,
    pub(crate) kind: NodeKind,
    pub(crate) parent: Option<NodeKey>,
    pub(crate) children: Vec<NodeKey>,
    pub(crate) text: String,
    pub(crate) props: Props,
}

impl Node {
    pub(crate) fn new(key: NodeKey, node_type: &str, kind: NodeKind, props: Props) -> Self {
        Self {
            key,
            node_type: node_type.to_string(),
            kind,
            parent: None,
            children: Vec::new(),
            text: String::new(),
            props,
        }
    }

    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn parent(&self) -> Option<&NodeKey> {
        self.parent.as_ref()
    }

    /// Ordered child keys. Always empty for leaves.
    pub fn children(&self) -> &[NodeKey] {
        &self.children
    }

    /// Text payload. Always empty for non-text nodes.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn props(&self) -> &Props {
        &self.props
    }

    pub fn prop(&self, name: &str) -> Option<&PropValue> {
        self.props.get(name)
    }

    pub fn is_element(&self) -> bool {
        self.kind == NodeKind::Element
    }

    pub fn is_text(&self) -> bool {
        self.kind == NodeKind::Text
    }

    /// Number of characters in the text payload.
    pub fn text_len(&self) -> usize {
        self.text.chars().count()
    }

    /// Plain text nodes may be merged with equal neighbours during normalization.
    pub fn is_simple_text(&self) -> bool {
        self.kind == NodeKind::Text
            && self
                .props
                .get("mode")
                .and_then(PropValue::as_str)
                .map_or(true, |mode| mode == "normal")
    }
}
