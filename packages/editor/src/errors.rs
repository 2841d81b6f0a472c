//! Error types for the editor

use crate::node::NodeKey;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EditorError {
    #[error("Node not found: {0}")]
    NodeNotFound(NodeKey),

    #[error("Node is not an element: {0}")]
    NotAnElement(NodeKey),

    #[error("Node is not text: {0}")]
    NotText(NodeKey),

    #[error("Would create cycle: {0}")]
    CycleDetected(NodeKey),

    #[error("The root node cannot be detached")]
    CannotDetachRoot,

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Unknown property {name} on {node_type}")]
    UnknownProperty { node_type: String, name: String },

    #[error("Index {index} out of bounds for {key}")]
    IndexOutOfBounds { key: NodeKey, index: usize },

    #[error("Invalid structure: {0}")]
    InvalidStructure(String),
}
