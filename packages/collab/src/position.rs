//! # Position Translation
//!
//! Selection points travel between peers as encoded sticky indices into a
//! container's sequence. This module maps a local [`Point`] to such an index
//! and a resolved (container, unit offset) pair back to a local point.
//!
//! ```text
//! text point (leaf, 2)          → parent seq @ offset(leaf) + 1 + units(2)
//! element point (container, N)  → container seq @ units of first N children
//! ```

use crate::binding::Binding;
use crate::mirror::MirrorId;
use crate::shared;
use crate::text_diff::{char_to_unit, unit_len, unit_to_char};
use folio_editor::{EditorState, NodeKey, NodeKind, Point, PointKind};
use yrs::{ReadTxn, TransactionMut, XmlTextRef};

/// A shared offset expressed against the local tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedPosition {
    /// Inside (or at the edge of) a text leaf
    Text { key: NodeKey, char_offset: usize },
    /// Directly before child `index` of a container
    Child { container_key: NodeKey, index: usize },
    /// After the last child of a container
    End { container_key: NodeKey },
}

impl ResolvedPosition {
    pub fn into_point(self, state: &EditorState) -> Option<Point> {
        let point = match self {
            ResolvedPosition::Text { key, char_offset } => Point::text(key, char_offset),
            ResolvedPosition::Child {
                container_key,
                index,
            } => Point::element(container_key, index),
            ResolvedPosition::End { container_key } => {
                let len = state.children(&container_key).len();
                Point::element(container_key, len)
            }
        };
        state.is_point_valid(&point).then_some(point)
    }
}

impl Binding {
    /// Encodes `point` as a sticky index, or `None` when the point's node has
    /// no mirror yet.
    pub(crate) fn relative_position(
        &self,
        txn: &mut TransactionMut,
        state: &EditorState,
        point: &Point,
    ) -> Option<Vec<u8>> {
        let (container, index) = self.point_offset(state, point)?;
        shared::sticky_index(txn, &container, index)
    }

    /// The container sequence `point` falls in and its unit offset there.
    pub(crate) fn point_offset(&self, state: &EditorState, point: &Point) -> Option<(XmlTextRef, u32)> {
        let id = self.mirror.by_key(&point.key)?;
        let node = self.mirror.get(id)?;
        let local = state.node(&point.key)?;

        match (point.kind, local.kind()) {
            (PointKind::Text, NodeKind::Text) => {
                let parent = node.parent()?;
                let container = self.mirror.container_xml(parent).ok()?;
                let leaf_offset = self.mirror.offset_of_child(parent, id)?;
                let units = char_to_unit(local.text(), point.offset);
                Some((container, leaf_offset + 1 + units))
            }
            (PointKind::Element, NodeKind::Element) => {
                let container = self.mirror.container_xml(id).ok()?;
                let units: u32 = state
                    .children(&point.key)
                    .iter()
                    .take(point.offset)
                    .filter_map(|child| state.node(child))
                    .map(|child| match child.kind() {
                        NodeKind::Text => unit_len(child.text()) + 1,
                        _ => 1,
                    })
                    .sum();
                Some((container, units))
            }
            _ => None,
        }
    }

    /// Maps unit `offset` of `container` to a local position.
    pub fn resolve_absolute(&self, container: MirrorId, offset: u32) -> Option<ResolvedPosition> {
        let container_key = self.mirror.key_of(container)?.clone();
        let pos = self.mirror.position_in_container(container, offset, true);
        let Some(child) = pos.node else {
            return Some(ResolvedPosition::End { container_key });
        };

        let node = self.mirror.get(child)?;
        match node.text() {
            Some(text) => Some(ResolvedPosition::Text {
                key: node.key()?.clone(),
                char_offset: unit_to_char(text, pos.offset),
            }),
            None => Some(ResolvedPosition::Child {
                container_key,
                index: pos.node_index,
            }),
        }
    }

    /// Resolves an encoded sticky index against the current document.
    pub fn resolve_relative<T: ReadTxn>(&self, txn: &T, encoded: &[u8]) -> Option<ResolvedPosition> {
        let (branch, index) = shared::resolve_sticky(txn, encoded)?;
        let container = self.mirror.by_branch(&branch)?;
        if !self.mirror.get(container)?.is_container() {
            return None;
        }
        self.resolve_absolute(container, index)
    }

    pub(crate) fn resolve_point<T: ReadTxn>(
        &self,
        txn: &T,
        encoded: &[u8],
        state: &EditorState,
    ) -> Option<Point> {
        self.resolve_relative(txn, encoded)?.into_point(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollabConfig;
    use crate::shared::SharedDocument;
    use folio_editor::{Editor, EditorError, NodeRegistry, UpdateTag};
    use std::sync::Arc;
    use yrs::Transact;

    #[test]
    fn test_end_resolves_to_child_count() {
        let mut editor = Editor::new(Arc::new(NodeRegistry::with_defaults()));
        editor
            .update::<EditorError, _>(UpdateTag::Local, |txn| {
                for _ in 0..2 {
                    let p = txn.create_node("paragraph")?;
                    txn.append(&NodeKey::root(), &p)?;
                }
                Ok(())
            })
            .unwrap();

        let end = ResolvedPosition::End {
            container_key: NodeKey::root(),
        };
        assert_eq!(
            end.into_point(editor.state()),
            Some(Point::element(NodeKey::root(), 2))
        );

        let dangling = ResolvedPosition::Text {
            key: NodeKey::new("missing"),
            char_offset: 0,
        };
        assert_eq!(dangling.into_point(editor.state()), None);
    }

    #[test]
    fn test_caret_at_sequence_end_encodes_and_resolves() {
        let registry = Arc::new(NodeRegistry::with_defaults());
        let mut editor = Editor::new(registry.clone());
        let mut binding = Binding::new(SharedDocument::new(1), registry, CollabConfig::default());
        let (mut leaf, mut empty) = (NodeKey::root(), NodeKey::root());
        let record = editor
            .update::<EditorError, _>(UpdateTag::Local, |txn| {
                let para = txn.create_node("paragraph")?;
                leaf = txn.create_text("hello")?;
                txn.append(&para, &leaf)?;
                txn.append(&NodeKey::root(), &para)?;
                empty = txn.create_node("paragraph")?;
                txn.append(&NodeKey::root(), &empty)?;
                Ok(())
            })
            .unwrap();
        binding
            .sync_local_to_shared(editor.state(), &record, None)
            .unwrap();

        let doc = binding.shared().doc().clone();
        let mut txn = doc.transact_mut();
        let state = editor.state();
        for point in [
            Point::text(leaf.clone(), 5),
            Point::element(empty.clone(), 0),
            Point::element(NodeKey::root(), 2),
        ] {
            let encoded = binding
                .relative_position(&mut txn, state, &point)
                .unwrap_or_else(|| panic!("{:?} has no sticky index", point));
            assert_eq!(binding.resolve_point(&txn, &encoded, state), Some(point));
        }

        let mid = Point::text(leaf.clone(), 2);
        let encoded = binding.relative_position(&mut txn, state, &mid).unwrap();
        assert_eq!(binding.resolve_point(&txn, &encoded, state), Some(mid));
    }
}
