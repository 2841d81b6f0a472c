//! # Folio Editor
//!
//! The local document model for Folio: a versioned tree of rich-text nodes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ registry: type tag → kind + declared props  │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ editor: EditorState lifecycle               │
//! │  - Transactional updates (UpdateTxn)        │
//! │  - Dirty-set reporting per update           │
//! │  - Text normalization + garbage collection  │
//! │  - Selection validity                       │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ folio-collab: mirrors every committed       │
//! │ update into the shared document             │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Core Principles
//!
//! 1. **Snapshots are immutable**: an update produces a new state, the previous
//!    one is returned in the [`UpdateRecord`]
//! 2. **Dirty sets are exact**: a node is reported only if it or a descendant
//!    changed
//! 3. **Keys are local**: node keys are never reused within an editor and never
//!    leave it
//!
//! ## Usage
//!
//! ```rust,ignore
//! use folio_editor::{Editor, EditorError, NodeKey, NodeRegistry, UpdateTag};
//! use std::sync::Arc;
//!
//! let mut editor = Editor::new(Arc::new(NodeRegistry::with_defaults()));
//! let record = editor.update::<EditorError, _>(UpdateTag::Local, |txn| {
//!     let para = txn.create_node("paragraph")?;
//!     let text = txn.create_text("Hello")?;
//!     txn.append(&para, &text)?;
//!     txn.append(&NodeKey::root(), &para)?;
//!     txn.select_end(&text)
//! })?;
//! assert!(record.is_root_dirty());
//! ```

mod editor;
mod errors;
mod mutations;
mod node;
mod normalization;
mod registry;
mod selection;
mod state;

pub use editor::Editor;
pub use errors::EditorError;
pub use mutations::{UpdateRecord, UpdateTag, UpdateTxn};
pub use node::{Node, NodeKey, NodeKind, PropValue, Props, ROOT_KEY};
pub use registry::{NodeRegistry, NodeSpec};
pub use selection::{Point, PointKind, RangeSelection};
pub use state::{EditorState, ExportedNode};
