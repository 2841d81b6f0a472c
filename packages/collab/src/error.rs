//! Error types for the synchronization core

use folio_editor::{EditorError, NodeKey};
use thiserror::Error;

/// Failures that abort a synchronization pass.
///
/// Everything except `DecodeError`, `ApplyError` and `Config` is a broken
/// invariant between the mirror, the shared document and the local tree.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("No mirror registered for node: {0}")]
    MissingMirror(NodeKey),

    #[error("Node not found in local tree: {0}")]
    MissingNode(NodeKey),

    #[error("Shared construct has unregistered type: {0}")]
    UnknownNodeType(String),

    #[error("Failed to decode: {0}")]
    DecodeError(String),

    #[error("Failed to apply update: {0}")]
    ApplyError(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Tree error: {0}")]
    Tree(#[from] EditorError),
}

impl SyncError {
    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        SyncError::Invariant(message.into())
    }
}
