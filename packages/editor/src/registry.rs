//! # Node Registry
//!
//! Maps a type tag to the shape of node it constructs: its [`NodeKind`], the
//! properties it declares (with defaults) and the properties that must never
//! leave the local tree.
//!
//! The registry is the only place that knows which property names exist for a
//! type. Both directions of synchronization consult it, so an unregistered type
//! or property coming from a peer is dropped instead of being fabricated.

use crate::node::{NodeKind, PropValue, Props};
use std::collections::{BTreeSet, HashMap};

/// Declaration of one node type.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpec {
    pub node_type: String,
    pub kind: NodeKind,
    /// Declared properties and the value a fresh node starts with
    pub defaults: Props,
    /// Declared properties that stay local
    pub excluded: BTreeSet<String>,
}

impl NodeSpec {
    pub fn new(node_type: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            node_type: node_type.into(),
            kind,
            defaults: Props::new(),
            excluded: BTreeSet::new(),
        }
    }

    pub fn element(node_type: impl Into<String>) -> Self {
        Self::new(node_type, NodeKind::Element)
    }

    pub fn text(node_type: impl Into<String>) -> Self {
        Self::new(node_type, NodeKind::Text)
    }

    pub fn line_break(node_type: impl Into<String>) -> Self {
        Self::new(node_type, NodeKind::LineBreak)
    }

    pub fn decorator(node_type: impl Into<String>) -> Self {
        Self::new(node_type, NodeKind::Decorator)
    }

    pub fn with_prop(mut self, name: impl Into<String>, default: impl Into<PropValue>) -> Self {
        self.defaults.insert(name.into(), default.into());
        self
    }

    /// Declares a property that is never replicated.
    pub fn with_local_prop(mut self, name: impl Into<String>, default: impl Into<PropValue>) -> Self {
        let name = name.into();
        self.excluded.insert(name.clone());
        self.defaults.insert(name, default.into());
        self
    }

    pub fn declares(&self, name: &str) -> bool {
        self.defaults.contains_key(name)
    }
}

/// Type tag → node specification.
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    specs: HashMap<String, NodeSpec>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in rich-text node types.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(NodeSpec::element("root"));
        registry.register(NodeSpec::element("paragraph").with_prop("indent", 0i64));
        registry.register(
            NodeSpec::element("heading")
                .with_prop("tag", "h1")
                .with_prop("indent", 0i64),
        );
        registry.register(NodeSpec::element("quote"));
        registry.register(
            NodeSpec::text("text")
                .with_prop("format", 0i64)
                .with_prop("style", "")
                .with_prop("mode", "normal")
                .with_prop("detail", 0i64),
        );
        registry.register(NodeSpec::line_break("linebreak"));
        registry.register(NodeSpec::decorator("horizontalrule"));
        registry.register(
            NodeSpec::decorator("image")
                .with_prop("src", "")
                .with_prop("alt", "")
                .with_local_prop("loading", false),
        );
        registry
    }

    /// Adds or replaces a type.
    pub fn register(&mut self, spec: NodeSpec) {
        self.specs.insert(spec.node_type.clone(), spec);
    }

    pub fn get(&self, node_type: &str) -> Option<&NodeSpec> {
        self.specs.get(node_type)
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.specs.contains_key(node_type)
    }

    pub fn kind_of(&self, node_type: &str) -> Option<NodeKind> {
        self.specs.get(node_type).map(|spec| spec.kind)
    }

    /// Declared property names of a type, minus its local-only ones, sorted.
    pub fn replicated_properties(&self, node_type: &str) -> Vec<String> {
        self.specs
            .get(node_type)
            .map(|spec| {
                spec.defaults
                    .keys()
                    .filter(|name| !spec.excluded.contains(*name))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_types() {
        let registry = NodeRegistry::with_defaults();
        assert_eq!(registry.kind_of("paragraph"), Some(NodeKind::Element));
        assert_eq!(registry.kind_of("text"), Some(NodeKind::Text));
        assert_eq!(registry.kind_of("linebreak"), Some(NodeKind::LineBreak));
        assert_eq!(registry.kind_of("image"), Some(NodeKind::Decorator));
        assert_eq!(registry.kind_of("table"), None);
    }

    #[test]
    fn test_replicated_properties_skip_local_ones() {
        let registry = NodeRegistry::with_defaults();
        assert_eq!(registry.replicated_properties("image"), vec!["alt", "src"]);
        assert_eq!(
            registry.replicated_properties("text"),
            vec!["detail", "format", "mode", "style"]
        );
        assert!(registry.replicated_properties("unknown").is_empty());
    }
}
