//! # Collaboration Session
//!
//! Wires one [`Editor`] to one shared document and one presence channel.
//!
//! ```text
//! update(f) ──► Editor (Local) ──► Binding::sync_local_to_shared
//!
//! apply_remote_update(bytes) ──► yrs ──► observer ──► inbox
//!                                                      │
//! flush() ◄────────────────────────────────────────────┘
//!   ├─ Binding::sync_shared_to_local     one update per batch
//!   ├─ Binding::sync_local_to_shared     normalization only
//!   ├─ default block if the root emptied
//!   └─ CursorReplicator                  when presence or content moved
//! ```
//!
//! Only one peer should `bootstrap` a document; every other peer `join`s it
//! from an existing state, so the document has a single root container.

use crate::binding::{Binding, SyncStats};
use crate::config::CollabConfig;
use crate::cursor::{CursorEvent, CursorReplicator, RemoteCursor};
use crate::error::SyncError;
use crate::presence::{Awareness, PresenceChange, PresenceState, SubscriptionId};
use crate::shared::{new_doc, SharedBatch, SharedDocument};
use folio_editor::{Editor, NodeKey, NodeRegistry, UpdateRecord, UpdateTag, UpdateTxn};
use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use yrs::{Origin, Subscription};

pub struct CollabSession<A: Awareness> {
    editor: Editor,
    binding: Binding,
    awareness: A,
    inbox: Arc<Mutex<VecDeque<SharedBatch>>>,
    _subscription: Subscription,
    presence_subscription: SubscriptionId,
    presence_dirty: Rc<Cell<bool>>,
    cursors: CursorReplicator,
    cursor_events: Vec<CursorEvent>,
}

impl<A: Awareness> CollabSession<A> {
    /// Starts a new document holding one default block.
    pub fn bootstrap(
        config: CollabConfig,
        registry: Arc<NodeRegistry>,
        awareness: A,
    ) -> Result<Self, SyncError> {
        let shared = SharedDocument::open(new_doc(awareness.client_id()), &config.root_name);
        let mut session = Self::open(shared, config, registry, awareness)?;
        session.ensure_default_block()?;
        Ok(session)
    }

    /// Joins a document from a peer's full state.
    pub fn join(
        config: CollabConfig,
        registry: Arc<NodeRegistry>,
        awareness: A,
        update: &[u8],
    ) -> Result<Self, SyncError> {
        let shared = SharedDocument::load(awareness.client_id(), &config.root_name, update)?;
        Self::open(shared, config, registry, awareness)
    }

    fn open(
        shared: SharedDocument,
        config: CollabConfig,
        registry: Arc<NodeRegistry>,
        awareness: A,
    ) -> Result<Self, SyncError> {
        let binding = Binding::new(shared, registry.clone(), config.clone());
        let inbox = Arc::new(Mutex::new(VecDeque::new()));
        let historic = config.historic_origin.as_deref().map(Origin::from);
        let subscription =
            binding
                .shared()
                .capture_batches(binding.origin().clone(), historic, inbox.clone());

        let presence_dirty = Rc::new(Cell::new(false));
        let flag = presence_dirty.clone();
        let presence_subscription =
            awareness.subscribe(Box::new(move |_: &PresenceChange| flag.set(true)));
        awareness.set_local_state(Some(PresenceState::new(
            config.name.clone(),
            config.color.clone(),
        )));

        let mut session = Self {
            editor: Editor::new(registry),
            binding,
            awareness,
            inbox,
            _subscription: subscription,
            presence_subscription,
            presence_dirty,
            cursors: CursorReplicator::new(),
            cursor_events: Vec::new(),
        };
        session.binding.hydrate(&mut session.editor)?;
        tracing::info!(
            client = session.awareness.client_id(),
            nodes = session.editor.state().node_count(),
            "collaboration session opened"
        );
        Ok(session)
    }

    /// Runs a local edit and mirrors it into the shared document.
    pub fn update<F>(&mut self, f: F) -> Result<UpdateRecord, SyncError>
    where
        F: FnOnce(&mut UpdateTxn<'_>) -> Result<(), SyncError>,
    {
        let record = self.editor.update(UpdateTag::Local, f)?;
        let awareness: &dyn Awareness = &self.awareness;
        self.binding
            .sync_local_to_shared(self.editor.state(), &record, Some(awareness))?;
        Ok(record)
    }

    /// Applies a peer's update and reconciles the local tree. Returns the
    /// number of batches processed.
    pub fn apply_remote_update(&mut self, update: &[u8]) -> Result<usize, SyncError> {
        self.binding.shared().apply_update(update)?;
        self.flush()
    }

    /// Processes every captured batch, then refreshes remote cursors.
    pub fn flush(&mut self) -> Result<usize, SyncError> {
        let mut processed = 0;
        while let Some(batch) = self.next_batch()? {
            let awareness: &dyn Awareness = &self.awareness;
            let outcome =
                self.binding
                    .sync_shared_to_local(&mut self.editor, &batch, Some(awareness))?;
            self.binding
                .sync_local_to_shared(self.editor.state(), &outcome.record, Some(awareness))?;
            processed += 1;
        }

        if processed > 0 && self.editor.state().children(&NodeKey::root()).is_empty() {
            self.ensure_default_block()?;
        }

        let presence_changed = self.presence_dirty.replace(false);
        if processed > 0 || presence_changed {
            let events = self.cursors.sync_cursor_positions(
                &self.binding,
                self.editor.state(),
                &self.awareness,
            );
            self.cursor_events.extend(events);
        }
        Ok(processed)
    }

    fn next_batch(&self) -> Result<Option<SharedBatch>, SyncError> {
        self.inbox
            .lock()
            .map(|mut inbox| inbox.pop_front())
            .map_err(|_| SyncError::invariant("shared batch inbox poisoned"))
    }

    /// Appends the configured default block when the root has no children
    /// and puts the selection at the end.
    fn ensure_default_block(&mut self) -> Result<(), SyncError> {
        let block_type = self.binding.config().default_block_type.clone();
        self.update(|txn| {
            if txn.state().children(&NodeKey::root()).is_empty() {
                let block = txn.create_node(&block_type)?;
                txn.append(&NodeKey::root(), &block)?;
            }
            txn.select_end(&NodeKey::root())?;
            Ok(())
        })?;
        tracing::debug!(block_type = %block_type, "inserted default block");
        Ok(())
    }

    /// Publishes whether this client's editor has focus.
    pub fn set_focus(&self, focusing: bool) {
        if let Some(mut state) = self.awareness.local_state() {
            if state.focusing != focusing {
                state.focusing = focusing;
                self.awareness.set_local_state(Some(state));
            }
        }
    }

    pub fn encode_state_as_update(&self) -> Vec<u8> {
        self.binding.shared().encode_state_as_update()
    }

    pub fn encode_diff(&self, state_vector: &[u8]) -> Result<Vec<u8>, SyncError> {
        self.binding.shared().encode_diff(state_vector)
    }

    pub fn state_vector(&self) -> Vec<u8> {
        self.binding.shared().state_vector()
    }

    pub fn remote_cursors(&self) -> impl Iterator<Item = &RemoteCursor> {
        self.cursors.cursors()
    }

    /// Cursor transitions reported since the last call.
    pub fn take_cursor_events(&mut self) -> Vec<CursorEvent> {
        std::mem::take(&mut self.cursor_events)
    }

    pub fn editor(&self) -> &Editor {
        &self.editor
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    pub fn awareness(&self) -> &A {
        &self.awareness
    }

    pub fn stats(&self) -> SyncStats {
        self.binding.stats()
    }
}

impl<A: Awareness> Drop for CollabSession<A> {
    fn drop(&mut self) {
        self.awareness.unsubscribe(self.presence_subscription);
        self.awareness.set_local_state(None);
    }
}
