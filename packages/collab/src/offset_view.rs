//! Flat character offsets over a whole tree, used to carry a selection from
//! one snapshot to another when the nodes it pointed at are gone.
//!
//! Text contributes its char length, line breaks and decorators contribute 1,
//! and sibling elements are separated by one position.

use folio_editor::{EditorState, NodeKey, NodeKind, Point, PointKind, RangeSelection};
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct Leaf {
    key: NodeKey,
    kind: NodeKind,
    parent: Option<NodeKey>,
    index: usize,
    start: usize,
    len: usize,
}

#[derive(Debug, Clone)]
pub struct OffsetView {
    leaves: Vec<Leaf>,
    elements: HashMap<NodeKey, (usize, usize)>,
    child_starts: HashMap<NodeKey, Vec<usize>>,
}

impl OffsetView {
    pub fn new(state: &EditorState) -> Self {
        let mut view = Self {
            leaves: Vec::new(),
            elements: HashMap::new(),
            child_starts: HashMap::new(),
        };
        let mut pos = 0;
        view.visit(state, &NodeKey::root(), None, 0, &mut pos);
        view
    }

    fn visit(
        &mut self,
        state: &EditorState,
        key: &NodeKey,
        parent: Option<&NodeKey>,
        index: usize,
        pos: &mut usize,
    ) {
        let Some(node) = state.node(key) else {
            return;
        };
        match node.kind() {
            NodeKind::Element => {
                let start = *pos;
                let mut starts = Vec::with_capacity(node.children().len());
                let mut prev_element = false;
                for (i, child) in node.children().iter().enumerate() {
                    let is_element = state.node(child).map_or(false, |c| c.is_element());
                    if is_element && prev_element {
                        *pos += 1;
                    }
                    prev_element = is_element;
                    starts.push(*pos);
                    self.visit(state, child, Some(key), i, pos);
                }
                self.elements.insert(key.clone(), (start, *pos));
                self.child_starts.insert(key.clone(), starts);
            }
            kind => {
                let len = if kind == NodeKind::Text {
                    node.text_len()
                } else {
                    1
                };
                self.leaves.push(Leaf {
                    key: key.clone(),
                    kind,
                    parent: parent.cloned(),
                    index,
                    start: *pos,
                    len,
                });
                *pos += len;
            }
        }
    }

    /// Total length of the document.
    pub fn len(&self) -> usize {
        self.elements.get(&NodeKey::root()).map_or(0, |(_, end)| *end)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn offset_of_point(&self, point: &Point) -> Option<usize> {
        match point.kind {
            PointKind::Text => self
                .leaves
                .iter()
                .find(|leaf| leaf.key == point.key && leaf.kind == NodeKind::Text)
                .map(|leaf| leaf.start + point.offset.min(leaf.len)),
            PointKind::Element => {
                let (_, end) = self.elements.get(&point.key)?;
                let starts = self.child_starts.get(&point.key)?;
                Some(starts.get(point.offset).copied().unwrap_or(*end))
            }
        }
    }

    /// Global (start, end) offsets of a selection's anchor and focus.
    pub fn offsets_from_selection(&self, selection: &RangeSelection) -> Option<(usize, usize)> {
        Some((
            self.offset_of_point(&selection.anchor)?,
            self.offset_of_point(&selection.focus)?,
        ))
    }

    /// The point at global `offset`, preferring text.
    pub fn point_at(&self, offset: usize) -> Option<Point> {
        let text = self
            .leaves
            .iter()
            .find(|leaf| leaf.kind == NodeKind::Text && leaf.start <= offset && offset <= leaf.start + leaf.len);
        if let Some(leaf) = text {
            return Some(Point::text(leaf.key.clone(), offset - leaf.start));
        }
        let leaf = self
            .leaves
            .iter()
            .find(|leaf| leaf.start <= offset && offset <= leaf.start + leaf.len)?;
        let parent = leaf.parent.clone()?;
        let index = if offset > leaf.start { leaf.index + 1 } else { leaf.index };
        Some(Point::element(parent, index))
    }

    pub fn selection_from_offsets(&self, anchor: usize, focus: usize) -> Option<RangeSelection> {
        Some(RangeSelection::new(self.point_at(anchor)?, self.point_at(focus)?))
    }
}
