//! # Shared Document Adapter
//!
//! Everything that touches `yrs` directly lives here: root discovery, embed
//! creation, attribute access, event capture, sticky positions and update
//! encoding. The rest of the crate only sees [`SharedDocument`],
//! [`SharedHandle`] and owned [`SharedBatch`]es.
//!
//! ## Layout
//!
//! ```text
//! XmlFragment "root"
//!   └─ XmlText (root container)
//!        ├─ embed XmlText      child container   (size 1)
//!        ├─ embed Map + chars  text leaf         (size 1 + text units)
//!        ├─ embed Map          line break        (size 1)
//!        └─ embed Map          decorator         (size 1)
//! ```
//!
//! Offsets count UTF-16 units (`OffsetKind::Utf16`), the same unit deltas
//! are reported in.

use crate::error::SyncError;
use folio_editor::PropValue;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use yrs::branch::{Branch, BranchID};
use yrs::types::text::YChange;
use yrs::types::Event;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{
    Any, Assoc, DeepObservable, Doc, In, IndexedSequence, Map, MapPrelim, MapRef, OffsetKind,
    Options, Origin, Out, ReadTxn, StateVector, StickyIndex, Subscription, Text, Transact,
    TransactionMut, Update, Xml, XmlFragment, XmlOut, XmlTextPrelim, XmlTextRef,
};

pub use yrs::types::Delta;

/// Attribute/key under which every construct stores its node type.
pub const TYPE_KEY: &str = "__type";

/// A document plus its root container.
#[derive(Clone)]
pub struct SharedDocument {
    doc: Doc,
    root: XmlTextRef,
}

impl SharedDocument {
    /// Creates an empty document for `client_id`.
    pub fn new(client_id: u64) -> Self {
        Self::open(new_doc(client_id), "root")
    }

    /// Creates a document for `client_id` from a peer's full state. The
    /// update is applied before the root is looked up so that an existing
    /// root is found instead of a second one being created.
    pub fn load(client_id: u64, root_name: &str, update: &[u8]) -> Result<Self, SyncError> {
        let doc = new_doc(client_id);
        let update =
            Update::decode_v1(update).map_err(|e| SyncError::DecodeError(e.to_string()))?;
        doc.transact_mut()
            .apply_update(update)
            .map_err(|e| SyncError::ApplyError(e.to_string()))?;
        Ok(Self::open(doc, root_name))
    }

    /// Gets or creates the root container: the `XmlText` at index 0 of the
    /// named fragment.
    pub fn open(doc: Doc, root_name: &str) -> Self {
        let fragment = doc.get_or_insert_xml_fragment(root_name);
        let existing = {
            let txn = doc.transact();
            match fragment.get(&txn, 0) {
                Some(XmlOut::Text(text)) => Some(text),
                _ => None,
            }
        };
        let root = match existing {
            Some(root) => root,
            None => {
                let mut txn = doc.transact_mut();
                fragment.insert(&mut txn, 0, XmlTextPrelim::new(""))
            }
        };
        Self { doc, root }
    }

    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    pub fn root(&self) -> &XmlTextRef {
        &self.root
    }

    pub fn client_id(&self) -> u64 {
        self.doc.client_id()
    }

    /// Encode the full document state.
    pub fn encode_state_as_update(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Get the current state vector (for delta sync).
    pub fn state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Clock of one client in the local state vector.
    pub fn clock_of(&self, client_id: u64) -> u32 {
        let txn = self.doc.transact();
        txn.state_vector().get(&client_id)
    }

    /// Encode delta since a given state vector.
    pub fn encode_diff(&self, state_vector: &[u8]) -> Result<Vec<u8>, SyncError> {
        let sv = StateVector::decode_v1(state_vector)
            .map_err(|e| SyncError::DecodeError(e.to_string()))?;
        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    /// Apply an update produced by a peer.
    pub fn apply_update(&self, update: &[u8]) -> Result<(), SyncError> {
        let update =
            Update::decode_v1(update).map_err(|e| SyncError::DecodeError(e.to_string()))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| SyncError::ApplyError(e.to_string()))
    }

    /// Captures every change below the root into `inbox`, skipping
    /// transactions made under `own`.
    pub fn capture_batches(
        &self,
        own: Origin,
        historic: Option<Origin>,
        inbox: Arc<Mutex<VecDeque<SharedBatch>>>,
    ) -> Subscription {
        self.root.observe_deep(move |txn, events| {
            let origin = txn.origin();
            if origin == Some(&own) {
                return;
            }
            let kind = match (&historic, origin) {
                (Some(historic), Some(origin)) if historic == origin => BatchKind::Historic,
                _ => BatchKind::Remote,
            };
            let events: Vec<SharedEvent> = events
                .iter()
                .filter_map(|event| SharedEvent::capture(txn, event))
                .collect();
            if events.is_empty() {
                return;
            }
            match inbox.lock() {
                Ok(mut inbox) => inbox.push_back(SharedBatch { kind, events }),
                Err(_) => tracing::warn!("inbox poisoned, dropping shared batch"),
            }
        })
    }
}

/// Where a captured batch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    Remote,
    Historic,
}

/// All events of one foreign transaction, owned.
#[derive(Debug, Clone)]
pub struct SharedBatch {
    pub kind: BatchKind,
    pub events: Vec<SharedEvent>,
}

/// One changed construct.
#[derive(Debug, Clone)]
pub struct SharedEvent {
    pub target_id: BranchID,
    pub target: SharedHandle,
    pub delta: Vec<Delta>,
    pub keys_changed: Vec<String>,
}

impl SharedEvent {
    fn capture(txn: &TransactionMut, event: &Event) -> Option<Self> {
        match event {
            Event::XmlText(e) => {
                let target = e.target().clone();
                let mut keys_changed: Vec<String> =
                    e.keys(txn).keys().map(|k| k.to_string()).collect();
                keys_changed.sort();
                Some(Self {
                    target_id: branch_id(&target),
                    target: SharedHandle::Container(target),
                    delta: e.delta(txn).to_vec(),
                    keys_changed,
                })
            }
            Event::Map(e) => {
                let target = e.target().clone();
                let mut keys_changed: Vec<String> =
                    e.keys(txn).keys().map(|k| k.to_string()).collect();
                keys_changed.sort();
                Some(Self {
                    target_id: branch_id(&target),
                    target: SharedHandle::Leaf(target),
                    delta: Vec::new(),
                    keys_changed,
                })
            }
            _ => {
                tracing::debug!("ignoring event on unsupported shared type");
                None
            }
        }
    }
}

/// A construct that carries node properties.
#[derive(Debug, Clone)]
pub enum SharedHandle {
    Container(XmlTextRef),
    Leaf(MapRef),
}

impl SharedHandle {
    pub fn branch_id(&self) -> BranchID {
        match self {
            SharedHandle::Container(xml) => branch_id(xml),
            SharedHandle::Leaf(map) => branch_id(map),
        }
    }

    /// Writes `value` under `name`. Container attributes only hold strings,
    /// so plain values are stored there as JSON and shared types are
    /// rejected. Returns whether anything was written.
    pub fn set(&self, txn: &mut TransactionMut, name: &str, value: In) -> bool {
        match (self, value) {
            (SharedHandle::Container(xml), In::Any(value)) => match serde_json::to_string(&value) {
                Ok(encoded) => {
                    xml.insert_attribute(txn, name, encoded);
                    true
                }
                Err(e) => {
                    tracing::warn!(attribute = %name, error = %e, "attribute value not encodable");
                    false
                }
            },
            (SharedHandle::Container(_), _) => false,
            (SharedHandle::Leaf(map), value) => {
                map.insert(txn, name, value);
                true
            }
        }
    }

    pub fn get<T: ReadTxn>(&self, txn: &T, name: &str) -> Option<Out> {
        match self {
            SharedHandle::Container(xml) => {
                let raw = xml.get_attribute(txn, name)?;
                // Attributes written by other clients may be bare strings.
                let value = serde_json::from_str::<Any>(&raw)
                    .unwrap_or_else(|_| Any::String(raw.as_str().into()));
                Some(Out::Any(value))
            }
            SharedHandle::Leaf(map) => map.get(txn, name),
        }
    }

    pub fn remove(&self, txn: &mut TransactionMut, name: &str) {
        match self {
            SharedHandle::Container(xml) => xml.remove_attribute(txn, &name),
            SharedHandle::Leaf(map) => {
                map.remove(txn, name);
            }
        }
    }

    /// Sorted names of every key currently set.
    pub fn keys<T: ReadTxn>(&self, txn: &T) -> Vec<String> {
        let mut keys: Vec<String> = match self {
            SharedHandle::Container(xml) => xml
                .attributes(txn)
                .map(|(name, _)| name.to_string())
                .collect(),
            SharedHandle::Leaf(map) => map.keys(txn).map(|k| k.to_string()).collect(),
        };
        keys.sort();
        keys
    }

    pub fn node_type<T: ReadTxn>(&self, txn: &T) -> Option<String> {
        match self.get(txn, TYPE_KEY)? {
            Out::Any(Any::String(s)) => Some(s.to_string()),
            _ => None,
        }
    }
}

/// A document whose offsets count UTF-16 units.
pub fn new_doc(client_id: u64) -> Doc {
    Doc::with_options(Options {
        client_id,
        offset_kind: OffsetKind::Utf16,
        ..Options::default()
    })
}

pub fn branch_id<T: AsRef<Branch>>(shared: &T) -> BranchID {
    shared.as_ref().id()
}

pub fn insert_container(txn: &mut TransactionMut, parent: &XmlTextRef, index: u32) -> XmlTextRef {
    parent.insert_embed(txn, index, XmlTextPrelim::new(""))
}

pub fn insert_leaf(txn: &mut TransactionMut, parent: &XmlTextRef, index: u32) -> MapRef {
    parent.insert_embed(txn, index, MapPrelim::default())
}

pub fn insert_text(txn: &mut TransactionMut, parent: &XmlTextRef, index: u32, text: &str) {
    if !text.is_empty() {
        parent.insert(txn, index, text);
    }
}

pub fn remove_range(txn: &mut TransactionMut, parent: &XmlTextRef, index: u32, len: u32) {
    if len > 0 {
        parent.remove_range(txn, index, len);
    }
}

/// The whole content of a container expressed as insert operations.
pub fn snapshot_delta<T: ReadTxn>(txn: &T, xml: &XmlTextRef) -> Vec<Delta> {
    xml.diff(txn, YChange::identity)
        .into_iter()
        .map(|diff| Delta::Inserted(diff.insert, None))
        .collect()
}

/// Encoded sticky index at `index` of `container`, bound to the unit after
/// it. At the end of the sequence there is no such unit, so the index binds
/// to the unit before it instead.
pub fn sticky_index(txn: &mut TransactionMut, container: &XmlTextRef, index: u32) -> Option<Vec<u8>> {
    container
        .sticky_index(txn, index, Assoc::After)
        .or_else(|| container.sticky_index(txn, index, Assoc::Before))
        .map(|sticky: StickyIndex| sticky.encode_v1())
}

/// Resolves an encoded sticky index to (container branch, unit offset).
pub fn resolve_sticky<T: ReadTxn>(txn: &T, encoded: &[u8]) -> Option<(BranchID, u32)> {
    let sticky = StickyIndex::decode_v1(encoded).ok()?;
    let offset = sticky.get_offset(txn)?;
    Some((offset.branch.id(), offset.index))
}

/// Converts a property value to its shared form. Sub-documents are handled
/// by the caller, which owns the document table.
pub fn prop_to_any(value: &PropValue) -> Option<Any> {
    Some(match value {
        PropValue::Null => Any::Null,
        PropValue::Bool(b) => Any::Bool(*b),
        PropValue::Int(i) => Any::BigInt(*i),
        PropValue::Float(f) => Any::Number(*f),
        PropValue::String(s) => Any::String(s.as_str().into()),
        PropValue::List(items) => {
            let items: Option<Vec<Any>> = items.iter().map(prop_to_any).collect();
            Any::Array(items?.into())
        }
        PropValue::Map(entries) => {
            let mut map = HashMap::with_capacity(entries.len());
            for (k, v) in entries {
                map.insert(k.clone(), prop_to_any(v)?);
            }
            Any::Map(Arc::new(map))
        }
        PropValue::SubDocument(_) => return None,
    })
}

/// Converts a shared value back. `hint` is the property's declared default
/// and decides whether an integral number becomes an `Int`.
pub fn any_to_prop(value: &Any, hint: Option<&PropValue>) -> PropValue {
    match value {
        Any::Null | Any::Undefined => PropValue::Null,
        Any::Bool(b) => PropValue::Bool(*b),
        Any::BigInt(i) => PropValue::Int(*i),
        Any::Number(n) => match hint {
            Some(PropValue::Int(_)) if n.fract() == 0.0 => PropValue::Int(*n as i64),
            _ => PropValue::Float(*n),
        },
        Any::String(s) => PropValue::String(s.to_string()),
        Any::Buffer(bytes) => PropValue::List(
            bytes.iter().map(|b| PropValue::Int(i64::from(*b))).collect(),
        ),
        Any::Array(items) => PropValue::List(items.iter().map(|v| any_to_prop(v, None)).collect()),
        Any::Map(entries) => PropValue::Map(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), any_to_prop(v, None)))
                .collect::<BTreeMap<_, _>>(),
        ),
    }
}
