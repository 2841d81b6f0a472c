//! # Text Normalization
//!
//! Runs on commit over every dirty text node:
//!
//! - adjacent simple text nodes with identical props merge into the earlier one
//! - empty simple text nodes are removed unless the selection sits on them
//!
//! Both the surviving and the disappearing keys are reported, because the
//! merge bypasses the regular child-list diff.

use crate::mutations::UpdateTxn;
use crate::node::NodeKey;
use crate::selection::PointKind;
use std::collections::HashSet;

pub(crate) fn normalize_text_nodes(txn: &mut UpdateTxn<'_>) -> HashSet<NodeKey> {
    let mut normalized = HashSet::new();
    let mut candidates: Vec<NodeKey> = txn.dirty_leaves.iter().cloned().collect();
    candidates.sort();

    for key in candidates {
        let Some(node) = txn.pending.node(&key) else {
            continue;
        };
        if !node.is_simple_text() || node.parent.is_none() {
            continue;
        }

        if node.text.is_empty() {
            let selected = txn
                .pending
                .selection
                .as_ref()
                .map_or(false, |sel| sel.touches(&key));
            if !selected && remove_empty(txn, &key) {
                normalized.insert(key);
            }
            continue;
        }

        let mut survivor = key;
        while let Some(prev) = txn.pending.previous_sibling(&survivor).cloned() {
            if !mergeable(txn, &prev, &survivor) {
                break;
            }
            merge_into(txn, &prev, &survivor);
            normalized.insert(prev.clone());
            normalized.insert(survivor.clone());
            survivor = prev;
        }
        while let Some(next) = txn.pending.next_sibling(&survivor).cloned() {
            if !mergeable(txn, &survivor, &next) {
                break;
            }
            merge_into(txn, &survivor, &next);
            normalized.insert(survivor.clone());
            normalized.insert(next);
        }
    }

    if !normalized.is_empty() {
        tracing::debug!(count = normalized.len(), "normalized text nodes");
    }
    normalized
}

fn mergeable(txn: &UpdateTxn<'_>, left: &NodeKey, right: &NodeKey) -> bool {
    match (txn.pending.node(left), txn.pending.node(right)) {
        (Some(l), Some(r)) => {
            l.is_simple_text()
                && r.is_simple_text()
                && l.node_type == r.node_type
                && l.props == r.props
        }
        _ => false,
    }
}

/// Appends `source`'s text to `target`, moves selection points over and
/// detaches `source`.
fn merge_into(txn: &mut UpdateTxn<'_>, target: &NodeKey, source: &NodeKey) {
    let Some(target_len) = txn.pending.node(target).map(|n| n.text_len()) else {
        return;
    };
    let source_text = txn
        .pending
        .node(source)
        .map(|n| n.text.clone())
        .unwrap_or_default();
    let parent = txn.pending.parent(source).cloned();
    let index = txn.pending.index_in_parent(source);

    if let Ok(node) = txn.node_mut(target) {
        node.text.push_str(&source_text);
    }
    txn.mark_dirty(target);

    if let Some(selection) = txn.pending.selection.as_mut() {
        for point in selection.points_mut() {
            if &point.key == source && point.kind == PointKind::Text {
                point.key = target.clone();
                point.offset += target_len;
            } else if Some(&point.key) == parent.as_ref()
                && point.kind == PointKind::Element
                && index.map_or(false, |i| point.offset > i)
            {
                point.offset -= 1;
            }
        }
    }

    detach_leaf(txn, source);
}

fn remove_empty(txn: &mut UpdateTxn<'_>, key: &NodeKey) -> bool {
    let parent = txn.pending.parent(key).cloned();
    let index = txn.pending.index_in_parent(key);
    if let (Some(parent), Some(index), Some(selection)) =
        (parent.as_ref(), index, txn.pending.selection.as_mut())
    {
        for point in selection.points_mut() {
            if &point.key == parent && point.kind == PointKind::Element && point.offset > index {
                point.offset -= 1;
            }
        }
    }
    detach_leaf(txn, key)
}

fn detach_leaf(txn: &mut UpdateTxn<'_>, key: &NodeKey) -> bool {
    let Some(parent) = txn.pending.parent(key).cloned() else {
        return false;
    };
    if let Ok(node) = txn.node_mut(&parent) {
        node.children.retain(|k| k != key);
    }
    if let Ok(node) = txn.node_mut(key) {
        node.parent = None;
    }
    txn.mark_dirty(&parent);
    true
}
