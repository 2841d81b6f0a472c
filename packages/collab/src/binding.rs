//! # Binding
//!
//! One [`Binding`] pairs one editor with one shared document for the length
//! of a session. It owns every piece of synchronization state:
//!
//! - the [`MirrorTree`] and its key/construct registries
//! - the per-type cache of replicated property names
//! - sub-documents referenced from node properties
//! - the transaction [`Origin`] used to recognize its own writes
//!
//! The synchronizers are `impl Binding` blocks in their own modules.

use crate::config::CollabConfig;
use crate::mirror::{MirrorId, MirrorTree};
use crate::shared::SharedDocument;
use folio_editor::{NodeRegistry, PropValue};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use yrs::{Doc, Origin};

/// Counters of shared-document writes made by a binding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Child constructs removed, inserted or replaced
    pub splices: u64,
    /// Text diffs applied to a leaf's run
    pub text_edits: u64,
    /// Attribute writes and removals
    pub property_writes: u64,
    /// Character runs deleted because no local leaf owns them
    pub orphan_deletes: u64,
    /// Marker units deleted after a local text merge
    pub normalization_deletes: u64,
}

impl SyncStats {
    /// Total number of shared-document writes.
    pub fn shared_writes(&self) -> u64 {
        self.splices
            + self.text_edits
            + self.property_writes
            + self.orphan_deletes
            + self.normalization_deletes
    }
}

pub struct Binding {
    pub(crate) shared: SharedDocument,
    pub(crate) origin: Origin,
    pub(crate) mirror: MirrorTree,
    pub(crate) registry: Arc<NodeRegistry>,
    pub(crate) config: CollabConfig,
    property_cache: HashMap<String, Arc<[String]>>,
    pub(crate) sub_documents: HashMap<String, Doc>,
    /// Containers hydrated from a full snapshot during the current batch
    pub(crate) fresh: HashSet<MirrorId>,
    pub(crate) stats: SyncStats,
}

impl Binding {
    pub fn new(shared: SharedDocument, registry: Arc<NodeRegistry>, config: CollabConfig) -> Self {
        let origin = Origin::from(format!("folio-binding-{}", shared.client_id()).as_str());
        let mirror = MirrorTree::new(shared.root().clone());
        Self {
            shared,
            origin,
            mirror,
            registry,
            config,
            property_cache: HashMap::new(),
            sub_documents: HashMap::new(),
            fresh: HashSet::new(),
            stats: SyncStats::default(),
        }
    }

    pub fn shared(&self) -> &SharedDocument {
        &self.shared
    }

    pub fn mirror(&self) -> &MirrorTree {
        &self.mirror
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn config(&self) -> &CollabConfig {
        &self.config
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// Makes `doc` available to node properties. Returns the property value
    /// referencing it.
    pub fn register_sub_document(&mut self, doc: Doc) -> PropValue {
        let guid = doc.guid().to_string();
        self.sub_documents.insert(guid.clone(), doc);
        PropValue::SubDocument(guid)
    }

    pub fn sub_document(&self, guid: &str) -> Option<&Doc> {
        self.sub_documents.get(guid)
    }

    /// Names of the properties of `node_type` that are replicated, computed
    /// once per type.
    pub(crate) fn property_names(&mut self, node_type: &str) -> Arc<[String]> {
        if let Some(names) = self.property_cache.get(node_type) {
            return names.clone();
        }
        let names: Arc<[String]> = self
            .registry
            .replicated_properties(node_type)
            .into_iter()
            .filter(|name| !self.config.excluded_properties.contains(name))
            .collect::<Vec<_>>()
            .into();
        self.property_cache
            .insert(node_type.to_string(), names.clone());
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_editor::NodeSpec;

    #[test]
    fn test_property_names_skip_local_and_configured_exclusions() {
        let mut registry = NodeRegistry::with_defaults();
        registry.register(
            NodeSpec::element("callout")
                .with_prop("tone", "info")
                .with_prop("indent", 0i64)
                .with_local_prop("collapsed", false),
        );
        let config = CollabConfig {
            excluded_properties: vec!["indent".into()],
            ..CollabConfig::default()
        };
        let mut binding = Binding::new(SharedDocument::new(1), Arc::new(registry), config);

        assert_eq!(&*binding.property_names("callout"), &["tone".to_string()]);
        assert!(binding.property_names("unknown").is_empty());
    }

    #[test]
    fn test_origin_is_per_client() {
        let a = Binding::new(
            SharedDocument::new(1),
            Arc::new(NodeRegistry::with_defaults()),
            CollabConfig::default(),
        );
        let b = Binding::new(
            SharedDocument::new(2),
            Arc::new(NodeRegistry::with_defaults()),
            CollabConfig::default(),
        );
        assert_ne!(a.origin(), b.origin());
        assert_eq!(a.stats().shared_writes(), 0);
    }
}
