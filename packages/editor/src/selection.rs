//! Selection endpoints.

use crate::node::NodeKey;
use serde::{Deserialize, Serialize};

/// What a point's offset counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointKind {
    /// Character offset into a text node
    Text,
    /// Child index into an element
    Element,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub key: NodeKey,
    pub offset: usize,
    pub kind: PointKind,
}

impl Point {
    pub fn text(key: impl Into<NodeKey>, offset: usize) -> Self {
        Self {
            key: key.into(),
            offset,
            kind: PointKind::Text,
        }
    }

    pub fn element(key: impl Into<NodeKey>, offset: usize) -> Self {
        Self {
            key: key.into(),
            offset,
            kind: PointKind::Element,
        }
    }
}

/// Anchor/focus pair. A collapsed selection has both ends on the same point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RangeSelection {
    pub anchor: Point,
    pub focus: Point,
}

impl RangeSelection {
    pub fn new(anchor: Point, focus: Point) -> Self {
        Self { anchor, focus }
    }

    pub fn collapsed(point: Point) -> Self {
        Self {
            anchor: point.clone(),
            focus: point,
        }
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.focus
    }

    /// True when either endpoint references `key`.
    pub fn touches(&self, key: &NodeKey) -> bool {
        &self.anchor.key == key || &self.focus.key == key
    }

    pub(crate) fn points_mut(&mut self) -> [&mut Point; 2] {
        [&mut self.anchor, &mut self.focus]
    }
}
