//! # Presence
//!
//! Per-client ephemeral state (selection, name, color) shared outside the
//! document. [`Awareness`] is the seam a network transport plugs into;
//! [`PresenceHub`] is an in-process implementation connecting several
//! sessions directly.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

pub type SubscriptionId = u32;

/// What one client broadcasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceState {
    /// Encoded sticky index of the selection anchor
    pub anchor_pos: Option<Vec<u8>>,
    /// Encoded sticky index of the selection focus
    pub focus_pos: Option<Vec<u8>>,
    pub name: String,
    pub color: String,
    pub focusing: bool,
    #[serde(default)]
    pub awareness_data: serde_json::Value,
}

impl PresenceState {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            anchor_pos: None,
            focus_pos: None,
            name: name.into(),
            color: color.into(),
            focusing: true,
            awareness_data: serde_json::Value::Null,
        }
    }
}

/// Client ids whose state changed in one notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceChange {
    pub added: Vec<u64>,
    pub updated: Vec<u64>,
    pub removed: Vec<u64>,
}

pub trait Awareness {
    fn client_id(&self) -> u64;

    fn local_state(&self) -> Option<PresenceState>;

    /// Publishes (or with `None`, withdraws) this client's state.
    fn set_local_state(&self, state: Option<PresenceState>);

    /// Every known client's state, including this one.
    fn states(&self) -> BTreeMap<u64, PresenceState>;

    fn subscribe(&self, handler: Box<dyn Fn(&PresenceChange)>) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);
}

type Handler = Rc<dyn Fn(&PresenceChange)>;

#[derive(Default)]
struct HubState {
    states: BTreeMap<u64, PresenceState>,
    handlers: BTreeMap<SubscriptionId, Handler>,
    next_subscription: SubscriptionId,
}

/// Shared presence table for clients living in one process.
#[derive(Clone, Default)]
pub struct PresenceHub {
    inner: Rc<RefCell<HubState>>,
}

impl PresenceHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle acting as client `client_id`.
    pub fn connect(&self, client_id: u64) -> MemoryAwareness {
        MemoryAwareness {
            client_id,
            hub: self.clone(),
        }
    }

    pub fn states(&self) -> BTreeMap<u64, PresenceState> {
        self.inner.borrow().states.clone()
    }

    fn notify(&self, change: PresenceChange) {
        // Handlers may call back into the hub.
        let handlers: Vec<Handler> = self.inner.borrow().handlers.values().cloned().collect();
        for handler in handlers {
            handler(&change);
        }
    }
}

pub struct MemoryAwareness {
    client_id: u64,
    hub: PresenceHub,
}

impl MemoryAwareness {
    pub fn hub(&self) -> &PresenceHub {
        &self.hub
    }
}

impl Awareness for MemoryAwareness {
    fn client_id(&self) -> u64 {
        self.client_id
    }

    fn local_state(&self) -> Option<PresenceState> {
        self.hub.inner.borrow().states.get(&self.client_id).cloned()
    }

    fn set_local_state(&self, state: Option<PresenceState>) {
        let change = {
            let mut inner = self.hub.inner.borrow_mut();
            let mut change = PresenceChange::default();
            match state {
                Some(state) => match inner.states.insert(self.client_id, state.clone()) {
                    Some(prev) if prev == state => return,
                    Some(_) => change.updated.push(self.client_id),
                    None => change.added.push(self.client_id),
                },
                None => match inner.states.remove(&self.client_id) {
                    Some(_) => change.removed.push(self.client_id),
                    None => return,
                },
            }
            change
        };
        self.hub.notify(change);
    }

    fn states(&self) -> BTreeMap<u64, PresenceState> {
        self.hub.states()
    }

    fn subscribe(&self, handler: Box<dyn Fn(&PresenceChange)>) -> SubscriptionId {
        let mut inner = self.hub.inner.borrow_mut();
        let id = inner.next_subscription;
        inner.next_subscription += 1;
        inner.handlers.insert(id, Rc::from(handler));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.hub.inner.borrow_mut().handlers.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_changes_reach_all_subscribers() {
        let hub = PresenceHub::new();
        let alice = hub.connect(1);
        let bob = hub.connect(2);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let sub = bob.subscribe(Box::new(move |change: &PresenceChange| {
            sink.borrow_mut().push(change.clone())
        }));

        alice.set_local_state(Some(PresenceState::new("Alice", "#f00")));
        let mut moved = PresenceState::new("Alice", "#f00");
        moved.anchor_pos = Some(vec![1, 2, 3]);
        alice.set_local_state(Some(moved.clone()));
        alice.set_local_state(Some(moved));
        alice.set_local_state(None);

        let seen = seen.borrow();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].added, vec![1]);
        assert_eq!(seen[1].updated, vec![1]);
        assert_eq!(seen[2].removed, vec![1]);
        assert!(bob.states().is_empty());
        bob.unsubscribe(sub);
    }

    #[test]
    fn test_unsubscribed_handler_is_not_called() {
        let hub = PresenceHub::new();
        let client = hub.connect(7);
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let sub = client.subscribe(Box::new(move |_: &PresenceChange| counter.set(counter.get() + 1)));
        client.unsubscribe(sub);

        client.set_local_state(Some(PresenceState::new("x", "#000")));
        assert_eq!(calls.get(), 0);
        assert_eq!(client.local_state().unwrap().name, "x");
    }

    #[test]
    fn test_state_serializes_camel_case() {
        let state = PresenceState::new("Ada", "#123456");
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["anchorPos"], serde_json::Value::Null);
        assert_eq!(json["focusing"], true);
        let back: PresenceState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
