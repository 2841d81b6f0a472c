//! # Cursors
//!
//! Outbound, the local selection is published through presence as a pair of
//! sticky indices whenever it moves. Inbound, every other client's published
//! pair is resolved against the local tree and tracked as a [`RemoteCursor`].
//!
//! ```text
//! no selection ──► selection, unfocused ──► selection, focused
//!                                           (shown / moved / hidden)
//! ```
//!
//! Only the focused state is visible; entering it reports
//! [`CursorEvent::Shown`], changes while in it report [`CursorEvent::Moved`],
//! and leaving it (blur, lost position, client gone) reports
//! [`CursorEvent::Hidden`].

use crate::binding::Binding;
use crate::presence::Awareness;
use folio_editor::{EditorState, Point, RangeSelection};
use std::collections::BTreeMap;
use yrs::{Transact, TransactionMut};

impl Binding {
    /// Publishes the selection of `state` if its encoded positions differ
    /// from what this client last published.
    pub(crate) fn sync_selection_to_shared(
        &self,
        txn: &mut TransactionMut,
        state: &EditorState,
        prev: Option<&RangeSelection>,
        awareness: &dyn Awareness,
    ) {
        let Some(mut presence) = awareness.local_state() else {
            return;
        };
        let next = state.selection();
        if prev.is_none() && next.is_none() {
            return;
        }

        let (anchor_pos, focus_pos) = match next {
            Some(selection) => (
                self.relative_position(txn, state, &selection.anchor),
                self.relative_position(txn, state, &selection.focus),
            ),
            None => (None, None),
        };
        if presence.anchor_pos == anchor_pos && presence.focus_pos == focus_pos {
            return;
        }
        presence.anchor_pos = anchor_pos;
        presence.focus_pos = focus_pos;
        awareness.set_local_state(Some(presence));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorSelection {
    pub anchor: Point,
    pub focus: Point,
}

impl CursorSelection {
    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.focus
    }
}

/// Another client's cursor as seen locally.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCursor {
    pub client_id: u64,
    pub name: String,
    pub color: String,
    pub focusing: bool,
    /// Resolved selection, `None` when unset or not resolvable
    pub selection: Option<CursorSelection>,
}

impl RemoteCursor {
    pub fn is_visible(&self) -> bool {
        self.focusing && self.selection.is_some()
    }

    fn visible_selection(&self) -> Option<&CursorSelection> {
        self.selection.as_ref().filter(|_| self.focusing)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CursorEvent {
    Shown {
        client_id: u64,
        selection: CursorSelection,
    },
    Moved {
        client_id: u64,
        selection: CursorSelection,
    },
    Hidden {
        client_id: u64,
    },
}

/// Remote cursors keyed by client id.
#[derive(Debug, Default)]
pub struct CursorReplicator {
    cursors: BTreeMap<u64, RemoteCursor>,
}

impl CursorReplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursors(&self) -> impl Iterator<Item = &RemoteCursor> {
        self.cursors.values()
    }

    pub fn get(&self, client_id: u64) -> Option<&RemoteCursor> {
        self.cursors.get(&client_id)
    }

    /// Re-resolves every remote client's published selection and reports
    /// visibility transitions.
    pub fn sync_cursor_positions(
        &mut self,
        binding: &Binding,
        state: &EditorState,
        awareness: &dyn Awareness,
    ) -> Vec<CursorEvent> {
        let own = awareness.client_id();
        let states = awareness.states();
        let doc = binding.shared().doc().clone();
        let txn = doc.transact();
        let mut events = Vec::new();

        for (client_id, presence) in states.iter().filter(|(id, _)| **id != own) {
            let selection = match (&presence.anchor_pos, &presence.focus_pos) {
                (Some(anchor), Some(focus)) => binding
                    .resolve_point(&txn, anchor, state)
                    .zip(binding.resolve_point(&txn, focus, state))
                    .map(|(anchor, focus)| CursorSelection { anchor, focus }),
                _ => None,
            };

            let cursor = self
                .cursors
                .entry(*client_id)
                .or_insert_with(|| RemoteCursor {
                    client_id: *client_id,
                    name: presence.name.clone(),
                    color: presence.color.clone(),
                    focusing: false,
                    selection: None,
                });
            let before = cursor.visible_selection().cloned();
            cursor.name = presence.name.clone();
            cursor.color = presence.color.clone();
            cursor.focusing = presence.focusing;
            cursor.selection = selection;

            match (before, cursor.visible_selection()) {
                (None, Some(selection)) => events.push(CursorEvent::Shown {
                    client_id: *client_id,
                    selection: selection.clone(),
                }),
                (Some(old), Some(selection)) if &old != selection => {
                    events.push(CursorEvent::Moved {
                        client_id: *client_id,
                        selection: selection.clone(),
                    })
                }
                (Some(_), None) => events.push(CursorEvent::Hidden {
                    client_id: *client_id,
                }),
                _ => {}
            }
        }

        let gone: Vec<u64> = self
            .cursors
            .keys()
            .filter(|id| !states.contains_key(id) || **id == own)
            .copied()
            .collect();
        for client_id in gone {
            if let Some(cursor) = self.cursors.remove(&client_id) {
                if cursor.is_visible() {
                    events.push(CursorEvent::Hidden { client_id });
                }
            }
        }

        if !events.is_empty() {
            tracing::debug!(events = events.len(), "remote cursors changed");
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollabConfig;
    use crate::presence::{PresenceHub, PresenceState};
    use crate::shared::SharedDocument;
    use folio_editor::{Editor, EditorError, NodeKey, NodeRegistry, UpdateTag};
    use std::sync::Arc;

    #[test]
    fn test_published_selection_shows_then_hides() {
        let registry = Arc::new(NodeRegistry::with_defaults());
        let hub = PresenceHub::new();
        let me = hub.connect(1);
        let peer = hub.connect(2);
        me.set_local_state(Some(PresenceState::new("Me", "#000000")));

        let mut editor = Editor::new(registry.clone());
        let mut binding = Binding::new(SharedDocument::new(1), registry, CollabConfig::default());
        let mut text = NodeKey::root();
        let record = editor
            .update::<EditorError, _>(UpdateTag::Local, |txn| {
                let para = txn.create_node("paragraph")?;
                text = txn.create_text("hello")?;
                txn.append(&para, &text)?;
                txn.append(&NodeKey::root(), &para)?;
                txn.set_selection(Some(RangeSelection::collapsed(Point::text(text.clone(), 2))));
                Ok(())
            })
            .unwrap();
        binding
            .sync_local_to_shared(editor.state(), &record, Some(&me as &dyn Awareness))
            .unwrap();

        let mine = me.local_state().unwrap();
        assert!(mine.anchor_pos.is_some());

        // The peer publishes the same spot.
        peer.set_local_state(Some(PresenceState {
            anchor_pos: mine.anchor_pos.clone(),
            focus_pos: mine.focus_pos.clone(),
            ..PresenceState::new("Peer", "#ff0000")
        }));

        let mut cursors = CursorReplicator::new();
        let events = cursors.sync_cursor_positions(&binding, editor.state(), &me);
        let expected = CursorSelection {
            anchor: Point::text(text.clone(), 2),
            focus: Point::text(text.clone(), 2),
        };
        assert_eq!(
            events,
            vec![CursorEvent::Shown {
                client_id: 2,
                selection: expected.clone(),
            }]
        );
        assert_eq!(cursors.get(2).unwrap().name, "Peer");
        assert!(cursors.get(1).is_none());

        assert!(cursors
            .sync_cursor_positions(&binding, editor.state(), &me)
            .is_empty());

        let mut blurred = peer.local_state().unwrap();
        blurred.focusing = false;
        peer.set_local_state(Some(blurred));
        assert_eq!(
            cursors.sync_cursor_positions(&binding, editor.state(), &me),
            vec![CursorEvent::Hidden { client_id: 2 }]
        );
        assert_eq!(cursors.get(2).unwrap().selection, Some(expected));

        peer.set_local_state(None);
        assert!(cursors
            .sync_cursor_positions(&binding, editor.state(), &me)
            .is_empty());
        assert_eq!(cursors.cursors().count(), 0);
    }

    #[test]
    fn test_unchanged_selection_is_not_republished() {
        let registry = Arc::new(NodeRegistry::with_defaults());
        let hub = PresenceHub::new();
        let me = hub.connect(1);
        me.set_local_state(Some(PresenceState::new("Me", "#000000")));

        let mut editor = Editor::new(registry.clone());
        let mut binding = Binding::new(SharedDocument::new(1), registry, CollabConfig::default());
        let record = editor
            .update::<EditorError, _>(UpdateTag::Local, |txn| {
                let para = txn.create_node("paragraph")?;
                txn.append(&NodeKey::root(), &para)?;
                txn.select_end(&para)
            })
            .unwrap();
        binding
            .sync_local_to_shared(editor.state(), &record, Some(&me as &dyn Awareness))
            .unwrap();
        let published = me.local_state().unwrap();
        assert!(published.anchor_pos.is_some());

        let record = editor
            .update::<EditorError, _>(UpdateTag::Local, |_| Ok(()))
            .unwrap();
        binding
            .sync_local_to_shared(editor.state(), &record, Some(&me as &dyn Awareness))
            .unwrap();
        assert_eq!(me.local_state().unwrap(), published);
        assert_eq!(binding.stats().splices, 1);
    }
}
