//! # Folio Collab
//!
//! Keeps a [`folio_editor`] tree and a `yrs` document in sync in both
//! directions, and replicates selections between peers.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  dirty sets   ┌──────────────────────────┐   one txn    ┌─────────┐
//! │ Editor       │ ────────────► │ Binding                  │ ───────────► │ yrs Doc │
//! │ (local tree) │               │  MirrorTree (arena)      │              │         │
//! │              │ ◄──────────── │  by_key / by_branch      │ ◄─────────── │         │
//! └──────────────┘ Collaboration └──────────────────────────┘ owned deltas └─────────┘
//!        ▲                                   │
//!        │ selection repair                  │ sticky indices
//!        │                                   ▼
//!        └────────────────────────── Awareness (presence)
//! ```
//!
//! - [`local_to_shared`]: walks dirty subtrees, splices children, diffs text
//! - [`shared_to_local`]: replays deltas on the mirror, reconciles the tree
//! - [`normalization`]: drops markers of leaves merged by local normalization
//! - [`position`]: local points ↔ sticky indices
//! - [`cursor`]: publishes the local selection, tracks remote cursors
//!
//! ## Anti-echo
//!
//! The binding writes under its own `Origin`, which the capture observer
//! skips. Updates it applies locally are tagged `Collaboration` (or
//! `Historic`), and the outbound pass only reconciles normalization and
//! republishes the selection for them.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use folio_collab::{CollabConfig, CollabSession, PresenceHub};
//! use folio_editor::NodeRegistry;
//! use std::sync::Arc;
//!
//! let hub = PresenceHub::new();
//! let registry = Arc::new(NodeRegistry::with_defaults());
//! let mut alice = CollabSession::bootstrap(CollabConfig::default(), registry.clone(), hub.connect(1))?;
//! let mut bob = CollabSession::join(
//!     CollabConfig::default(),
//!     registry,
//!     hub.connect(2),
//!     &alice.encode_state_as_update(),
//! )?;
//! ```

pub mod binding;
pub mod config;
pub mod cursor;
pub mod error;
pub mod local_to_shared;
pub mod mirror;
pub mod normalization;
pub mod offset_view;
pub mod position;
pub mod presence;
pub mod session;
pub mod shared;
pub mod shared_to_local;
pub mod text_diff;

pub use binding::{Binding, SyncStats};
pub use config::CollabConfig;
pub use cursor::{CursorEvent, CursorReplicator, CursorSelection, RemoteCursor};
pub use error::SyncError;
pub use mirror::{MirrorId, MirrorKind, MirrorNode, MirrorTree};
pub use offset_view::OffsetView;
pub use position::ResolvedPosition;
pub use presence::{Awareness, MemoryAwareness, PresenceChange, PresenceHub, PresenceState};
pub use session::CollabSession;
pub use shared::{BatchKind, SharedBatch, SharedDocument, SharedEvent, SharedHandle};
pub use shared_to_local::{InboundOutcome, SelectionRepair};
pub use text_diff::{diff_with_cursor, TextDiff};
