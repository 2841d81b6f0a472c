//! Two-peer scenarios run through `CollabSession`.

use folio_collab::shared::remove_range;
use folio_collab::{
    diff_with_cursor, Awareness, CollabConfig, CollabSession, CursorEvent, MemoryAwareness,
    MirrorKind, PresenceHub,
};
use folio_editor::{NodeKey, NodeRegistry, Point, PropValue, RangeSelection};
use std::sync::Arc;
use yrs::{Any, In, Map, Origin, Text, Transact, Xml, XmlTextRef};

type Session = CollabSession<MemoryAwareness>;

fn config(name: &str) -> CollabConfig {
    CollabConfig::default().with_identity(name, "#336699")
}

fn registry() -> Arc<NodeRegistry> {
    Arc::new(NodeRegistry::with_defaults())
}

fn bootstrap(hub: &PresenceHub) -> Session {
    CollabSession::bootstrap(config("alice"), registry(), hub.connect(1)).unwrap()
}

fn join(hub: &PresenceHub, from: &Session, client_id: u64) -> Session {
    CollabSession::join(
        config("bob"),
        registry(),
        hub.connect(client_id),
        &from.encode_state_as_update(),
    )
    .unwrap()
}

/// Sends `from` everything `to` has that it is missing.
fn send(from: &Session, to: &mut Session) {
    let diff = from.encode_diff(&to.state_vector()).unwrap();
    to.apply_remote_update(&diff).unwrap();
}

fn exchange(a: &mut Session, b: &mut Session) {
    send(a, b);
    send(b, a);
}

fn first_paragraph(session: &Session) -> NodeKey {
    session.editor().state().children(&NodeKey::root())[0].clone()
}

fn paragraph_xml(session: &Session, key: &NodeKey) -> XmlTextRef {
    let id = session.binding().mirror().by_key(key).unwrap();
    match session.binding().mirror().get(id).unwrap().kind() {
        MirrorKind::Container { xml, .. } => xml.clone(),
        other => panic!("expected a container, got {:?}", other),
    }
}

/// Fills the default paragraph with one text leaf and returns its key.
fn type_text(session: &mut Session, text: &str) -> NodeKey {
    let para = first_paragraph(session);
    let mut leaf = NodeKey::root();
    session
        .update(|txn| {
            leaf = txn.create_text(text)?;
            txn.append(&para, &leaf)?;
            txn.select_end(&leaf)?;
            Ok(())
        })
        .unwrap();
    leaf
}

#[test]
fn test_join_and_incremental_updates_converge() {
    let hub = PresenceHub::new();
    let mut alice = bootstrap(&hub);
    alice
        .update(|txn| {
            let root = NodeKey::root();
            let heading = txn.create_node("heading")?;
            txn.set_prop(&heading, "tag", "h2")?;
            let title = txn.create_text("Notes")?;
            txn.append(&heading, &title)?;
            txn.insert_child(&root, 0, &heading)?;

            let para = txn.state().children(&root)[1].clone();
            let bold = txn.create_text("bold")?;
            txn.set_prop(&bold, "format", 1i64)?;
            let plain = txn.create_text(" plain")?;
            let br = txn.create_node("linebreak")?;
            txn.append(&para, &bold)?;
            txn.append(&para, &plain)?;
            txn.append(&para, &br)?;

            let image = txn.create_node("image")?;
            txn.set_prop(&image, "src", "cat.png")?;
            let figure = txn.create_node("paragraph")?;
            txn.append(&figure, &image)?;
            txn.append(&root, &figure)?;
            txn.select_end(&plain)?;
            Ok(())
        })
        .unwrap();

    let mut bob = join(&hub, &alice, 2);
    assert_eq!(bob.editor().state().export(), alice.editor().state().export());

    let para = bob.editor().state().children(&NodeKey::root())[1].clone();
    bob.update(|txn| {
        let plain = txn.state().children(&para)[1].clone();
        txn.set_text(&plain, " plain text")?;
        let quote = txn.create_node("quote")?;
        let cite = txn.create_text("cited")?;
        txn.append(&quote, &cite)?;
        txn.append(&NodeKey::root(), &quote)?;
        Ok(())
    })
    .unwrap();
    send(&bob, &mut alice);

    let exported = alice.editor().state().export();
    assert_eq!(exported, bob.editor().state().export());
    assert_eq!(exported.children.len(), 4);
    assert_eq!(exported.children[3].node_type, "quote");
    assert_eq!(
        exported.children[1].children[1].text.as_deref(),
        Some(" plain text")
    );
    assert_eq!(
        exported.children[2].children[0].props.get("src"),
        Some(&PropValue::String("cat.png".into()))
    );
}

#[test]
fn test_concurrent_typing_in_one_leaf_converges() {
    let hub = PresenceHub::new();
    let mut alice = bootstrap(&hub);
    let leaf = type_text(&mut alice, "hello");
    let mut bob = join(&hub, &alice, 2);

    alice
        .update(|txn| {
            txn.set_text(&leaf, "hello world")?;
            txn.select_end(&leaf)?;
            Ok(())
        })
        .unwrap();
    let bob_para = first_paragraph(&bob);
    let bob_leaf = bob.editor().state().children(&bob_para)[0].clone();
    bob.update(|txn| {
        txn.set_text(&bob_leaf, "Xhello")?;
        txn.set_selection(Some(RangeSelection::collapsed(Point::text(bob_leaf.clone(), 1))));
        Ok(())
    })
    .unwrap();

    exchange(&mut alice, &mut bob);
    assert_eq!(alice.editor().state().export(), bob.editor().state().export());
    assert_eq!(alice.editor().state().text_content(&NodeKey::root()), "Xhello world");
}

#[test]
fn test_no_op_update_writes_nothing() {
    let hub = PresenceHub::new();
    let mut alice = bootstrap(&hub);
    type_text(&mut alice, "steady");

    let vector = alice.state_vector();
    let writes = alice.stats().shared_writes();
    alice.update(|_| Ok(())).unwrap();

    assert_eq!(alice.state_vector(), vector);
    assert_eq!(alice.stats().shared_writes(), writes);
}

#[test]
fn test_remote_changes_are_not_echoed() {
    let hub = PresenceHub::new();
    let mut alice = bootstrap(&hub);
    let mut bob = join(&hub, &alice, 2);

    type_text(&mut alice, "typed by alice");
    let writes = bob.stats().shared_writes();
    send(&alice, &mut bob);

    assert_eq!(bob.stats().shared_writes(), writes);
    assert_eq!(bob.binding().shared().clock_of(2), 0);
    assert_eq!(
        bob.binding().shared().clock_of(1),
        alice.binding().shared().clock_of(1)
    );
    assert_eq!(bob.editor().state().export(), alice.editor().state().export());
}

#[test]
fn test_own_origin_is_not_captured() {
    let hub = PresenceHub::new();
    let mut alice = bootstrap(&hub);
    type_text(&mut alice, "hello");
    let para = first_paragraph(&alice);
    let xml = paragraph_xml(&alice, &para);

    let doc = alice.binding().shared().doc().clone();
    {
        let mut txn = doc.transact_mut_with(alice.binding().origin().clone());
        xml.insert(&mut txn, 3, "Z");
    }
    assert_eq!(alice.flush().unwrap(), 0);
    assert_eq!(alice.editor().state().text_content(&para), "hello");
}

#[test]
fn test_historic_origin_is_applied() {
    let hub = PresenceHub::new();
    let config = CollabConfig {
        historic_origin: Some("folio-undo".into()),
        ..config("alice")
    };
    let mut alice = CollabSession::bootstrap(config, registry(), hub.connect(1)).unwrap();
    type_text(&mut alice, "hello");
    let para = first_paragraph(&alice);
    let xml = paragraph_xml(&alice, &para);

    let doc = alice.binding().shared().doc().clone();
    {
        let mut txn = doc.transact_mut_with(Origin::from("folio-undo"));
        xml.insert(&mut txn, 3, "X");
    }
    assert_eq!(alice.flush().unwrap(), 1);
    assert_eq!(alice.editor().state().text_content(&para), "heXllo");
}

#[test]
fn test_replace_middle_child_is_one_splice() {
    let hub = PresenceHub::new();
    let mut alice = bootstrap(&hub);
    let para = first_paragraph(&alice);
    let mut keys = Vec::new();
    alice
        .update(|txn| {
            for (text, format) in [("a", 1i64), ("b", 2), ("c", 3)] {
                let leaf = txn.create_text(text)?;
                txn.set_prop(&leaf, "format", format)?;
                txn.append(&para, &leaf)?;
                keys.push(leaf);
            }
            Ok(())
        })
        .unwrap();

    let mirror_a = alice.binding().mirror().by_key(&keys[0]).unwrap();
    let mirror_c = alice.binding().mirror().by_key(&keys[2]).unwrap();
    let splices = alice.stats().splices;

    let mut replacement = NodeKey::root();
    alice
        .update(|txn| {
            replacement = txn.create_text("x")?;
            txn.set_prop(&replacement, "format", 4i64)?;
            txn.replace(&keys[1], &replacement)?;
            Ok(())
        })
        .unwrap();

    assert_eq!(alice.stats().splices - splices, 1);
    let mirror = alice.binding().mirror();
    let container = mirror.by_key(&para).unwrap();
    let mirror_x = mirror.by_key(&replacement).unwrap();
    assert_eq!(mirror.children(container), &[mirror_a, mirror_x, mirror_c]);
    assert_eq!(mirror.by_key(&keys[0]), Some(mirror_a));
    assert_eq!(mirror.by_key(&keys[2]), Some(mirror_c));
    assert!(mirror.by_key(&keys[1]).is_none());
}

#[test]
fn test_deleted_marker_merges_run_into_previous_leaf() {
    let hub = PresenceHub::new();
    let mut alice = bootstrap(&hub);
    let para = first_paragraph(&alice);
    let mut second = NodeKey::root();
    alice
        .update(|txn| {
            let first = txn.create_text("ab")?;
            txn.set_prop(&first, "format", 1i64)?;
            second = txn.create_text("cd")?;
            txn.append(&para, &first)?;
            txn.append(&para, &second)?;
            Ok(())
        })
        .unwrap();

    let mirror_second = alice.binding().mirror().by_key(&second).unwrap();
    let map = match alice.binding().mirror().get(mirror_second).unwrap().kind() {
        MirrorKind::Text { map, .. } => map.clone(),
        other => panic!("expected a text leaf, got {:?}", other),
    };
    let xml = paragraph_xml(&alice, &para);
    let doc = alice.binding().shared().doc().clone();

    // A peer clears the attributes of the second leaf, then drops its marker.
    {
        let mut txn = doc.transact_mut();
        let keys: Vec<String> = map.keys(&txn).map(str::to_string).collect();
        for key in keys {
            map.remove(&mut txn, &key);
        }
    }
    alice.flush().unwrap();
    {
        let mut txn = doc.transact_mut();
        remove_range(&mut txn, &xml, 3, 1);
    }
    alice.flush().unwrap();

    let state = alice.editor().state();
    let children = state.children(&para);
    assert_eq!(children.len(), 1);
    assert_eq!(state.node(&children[0]).unwrap().text(), "abcd");
    assert!(!state.contains(&second));

    let mirror = alice.binding().mirror();
    assert_eq!(mirror.children(mirror.by_key(&para).unwrap()).len(), 1);
}

#[test]
fn test_selection_in_removed_block_is_repaired() {
    let hub = PresenceHub::new();
    let mut alice = bootstrap(&hub);
    let first = type_text(&mut alice, "hello");
    let mut doomed = NodeKey::root();
    alice
        .update(|txn| {
            doomed = txn.create_node("paragraph")?;
            let text = txn.create_text("world")?;
            txn.append(&doomed, &text)?;
            txn.append(&NodeKey::root(), &doomed)?;
            txn.select_end(&first)?;
            Ok(())
        })
        .unwrap();

    let mut bob = join(&hub, &alice, 2);
    let bob_block = bob.editor().state().children(&NodeKey::root())[1].clone();
    let bob_text = bob.editor().state().children(&bob_block)[0].clone();
    bob.update(|txn| {
        txn.set_selection(Some(RangeSelection::collapsed(Point::text(bob_text.clone(), 3))));
        Ok(())
    })
    .unwrap();

    alice
        .update(|txn| {
            txn.remove(&doomed)?;
            Ok(())
        })
        .unwrap();
    send(&alice, &mut bob);

    let state = bob.editor().state();
    assert!(!state.contains(&bob_block));
    let selection = state.selection().expect("selection is repaired");
    assert!(state.is_selection_valid());
    assert!(!selection.touches(&bob_text));
    assert!(!selection.touches(&bob_block));
}

#[test]
fn test_emptied_root_gets_default_block() {
    let hub = PresenceHub::new();
    let mut alice = bootstrap(&hub);
    type_text(&mut alice, "gone soon");
    let mut bob = join(&hub, &alice, 2);

    alice
        .update(|txn| {
            txn.set_children(&NodeKey::root(), &[])?;
            txn.set_selection(None);
            Ok(())
        })
        .unwrap();
    send(&alice, &mut bob);

    let root = bob.editor().state().children(&NodeKey::root()).to_vec();
    assert_eq!(root.len(), 1);
    assert_eq!(bob.editor().state().node(&root[0]).unwrap().node_type(), "paragraph");

    send(&bob, &mut alice);
    assert_eq!(alice.editor().state().export(), bob.editor().state().export());
}

#[test]
fn test_remote_cursor_follows_presence() {
    let hub = PresenceHub::new();
    let mut alice = bootstrap(&hub);
    let mut bob = join(&hub, &alice, 2);

    let leaf = type_text(&mut alice, "hello");
    alice
        .update(|txn| {
            txn.set_selection(Some(RangeSelection::collapsed(Point::text(leaf.clone(), 2))));
            Ok(())
        })
        .unwrap();
    send(&alice, &mut bob);
    bob.take_cursor_events();
    bob.flush().unwrap();

    let bob_para = first_paragraph(&bob);
    let bob_leaf = bob.editor().state().children(&bob_para)[0].clone();
    let cursor = bob.remote_cursors().find(|c| c.client_id == 1).unwrap();
    assert_eq!(cursor.name, "alice");
    assert!(cursor.is_visible());
    let selection = cursor.selection.clone().unwrap();
    assert_eq!(selection.anchor, Point::text(bob_leaf.clone(), 2));
    assert!(selection.is_collapsed());

    alice.set_focus(false);
    bob.flush().unwrap();
    assert_eq!(
        bob.take_cursor_events(),
        vec![CursorEvent::Hidden { client_id: 1 }]
    );

    drop(alice);
    bob.flush().unwrap();
    assert_eq!(bob.remote_cursors().count(), 0);
    assert!(bob.take_cursor_events().is_empty());
}

#[test]
fn test_diff_prefers_cursor_position() {
    let diff = diff_with_cursor("hello", "hello world", 5);
    assert_eq!(diff.index, 5);
    assert_eq!(diff.delete_count, 0);
    assert_eq!(diff.insert, " world");
}

#[test]
fn test_integer_element_prop_round_trips() {
    let hub = PresenceHub::new();
    let mut alice = bootstrap(&hub);
    let para = first_paragraph(&alice);
    alice
        .update(|txn| {
            txn.set_prop(&para, "indent", 2i64)?;
            Ok(())
        })
        .unwrap();

    let xml = paragraph_xml(&alice, &para);
    {
        let txn = alice.binding().shared().doc().transact();
        assert_eq!(xml.get_attribute(&txn, "indent").as_deref(), Some("2"));
    }

    let mut bob = join(&hub, &alice, 2);
    let exported = bob.editor().state().export();
    assert_eq!(exported, alice.editor().state().export());
    assert_eq!(
        exported.children[0].props.get("indent"),
        Some(&PropValue::Int(2))
    );

    let bob_para = first_paragraph(&bob);
    bob.update(|txn| {
        txn.set_prop(&bob_para, "indent", 3i64)?;
        Ok(())
    })
    .unwrap();
    send(&bob, &mut alice);
    assert_eq!(
        alice.editor().state().node(&para).unwrap().prop("indent"),
        Some(&PropValue::Int(3))
    );
}

#[test]
fn test_caret_at_end_is_published() {
    let hub = PresenceHub::new();
    let mut alice = bootstrap(&hub);
    type_text(&mut alice, "hello");
    let published = alice.awareness().local_state().unwrap();
    assert!(published.anchor_pos.is_some());
    assert!(published.focus_pos.is_some());

    let mut empty = NodeKey::root();
    alice
        .update(|txn| {
            empty = txn.create_node("paragraph")?;
            txn.append(&NodeKey::root(), &empty)?;
            txn.set_selection(Some(RangeSelection::collapsed(Point::element(empty.clone(), 0))));
            Ok(())
        })
        .unwrap();
    let published = alice.awareness().local_state().unwrap();
    assert!(published.anchor_pos.is_some());

    let mut bob = join(&hub, &alice, 2);
    bob.flush().unwrap();
    let bob_empty = bob.editor().state().children(&NodeKey::root())[1].clone();
    let cursor = bob.remote_cursors().find(|c| c.client_id == 1).unwrap();
    assert_eq!(
        cursor.selection.clone().unwrap().anchor,
        Point::element(bob_empty, 0)
    );
}

#[test]
fn test_text_inserted_without_leaf_is_deleted() {
    let hub = PresenceHub::new();
    let mut alice = bootstrap(&hub);
    let para = first_paragraph(&alice);
    let xml = paragraph_xml(&alice, &para);
    let doc = alice.binding().shared().doc().clone();
    let orphans = alice.stats().orphan_deletes;

    {
        let mut txn = doc.transact_mut();
        xml.insert(&mut txn, 0, "xy");
    }
    alice.flush().unwrap();

    assert_eq!(xml.len(&doc.transact()), 0);
    assert!(alice.editor().state().children(&para).is_empty());
    assert_eq!(alice.stats().orphan_deletes - orphans, 1);
}

#[test]
fn test_remote_format_change_merges_and_deletes_marker() {
    let hub = PresenceHub::new();
    let mut alice = bootstrap(&hub);
    let para = first_paragraph(&alice);
    let mut second = NodeKey::root();
    alice
        .update(|txn| {
            let first = txn.create_text("ab")?;
            txn.set_prop(&first, "format", 1i64)?;
            second = txn.create_text("cd")?;
            txn.append(&para, &first)?;
            txn.append(&para, &second)?;
            Ok(())
        })
        .unwrap();
    let mut bob = join(&hub, &alice, 2);

    let mirror_second = alice.binding().mirror().by_key(&second).unwrap();
    let map = match alice.binding().mirror().get(mirror_second).unwrap().kind() {
        MirrorKind::Text { map, .. } => map.clone(),
        other => panic!("expected a text leaf, got {:?}", other),
    };
    let xml = paragraph_xml(&alice, &para);
    let doc = alice.binding().shared().doc().clone();
    let deletes = alice.stats().normalization_deletes;

    {
        let mut txn = doc.transact_mut();
        map.insert(&mut txn, "format", In::Any(Any::BigInt(1)));
    }
    alice.flush().unwrap();

    let state = alice.editor().state();
    let children = state.children(&para);
    assert_eq!(children.len(), 1);
    assert_eq!(state.node(&children[0]).unwrap().text(), "abcd");
    assert_eq!(xml.len(&doc.transact()), 5);
    assert_eq!(alice.stats().normalization_deletes - deletes, 1);

    send(&alice, &mut bob);
    assert_eq!(bob.editor().state().export(), alice.editor().state().export());
    let carol = join(&hub, &alice, 3);
    assert_eq!(carol.editor().state().export(), alice.editor().state().export());
}

#[test]
fn test_element_caret_survives_unrelated_remote_edit() {
    let hub = PresenceHub::new();
    let mut alice = bootstrap(&hub);
    let para = first_paragraph(&alice);
    type_text(&mut alice, "hello");
    alice
        .update(|txn| {
            let other = txn.create_node("paragraph")?;
            let text = txn.create_text("elsewhere")?;
            txn.append(&other, &text)?;
            txn.append(&NodeKey::root(), &other)?;
            txn.set_selection(Some(RangeSelection::collapsed(Point::element(para.clone(), 1))));
            Ok(())
        })
        .unwrap();

    let mut bob = join(&hub, &alice, 2);
    let bob_other = bob.editor().state().children(&NodeKey::root())[1].clone();
    let bob_text = bob.editor().state().children(&bob_other)[0].clone();
    bob.update(|txn| {
        txn.set_text(&bob_text, "elsewhere too")?;
        txn.select_end(&bob_text)?;
        Ok(())
    })
    .unwrap();
    send(&bob, &mut alice);

    let selection = alice.editor().state().selection().unwrap();
    assert_eq!(selection.anchor, Point::element(para.clone(), 1));
    assert!(selection.is_collapsed());
}

#[test]
fn test_caret_follows_remote_insert_before_it() {
    let hub = PresenceHub::new();
    let mut alice = bootstrap(&hub);
    let leaf = type_text(&mut alice, "hello");
    let mut bob = join(&hub, &alice, 2);
    alice
        .update(|txn| {
            txn.set_selection(Some(RangeSelection::collapsed(Point::text(leaf.clone(), 3))));
            Ok(())
        })
        .unwrap();

    let bob_para = first_paragraph(&bob);
    let bob_leaf = bob.editor().state().children(&bob_para)[0].clone();
    bob.update(|txn| {
        txn.set_text(&bob_leaf, "XYhello")?;
        txn.set_selection(Some(RangeSelection::collapsed(Point::text(bob_leaf.clone(), 2))));
        Ok(())
    })
    .unwrap();
    send(&bob, &mut alice);

    let state = alice.editor().state();
    assert_eq!(state.node(&leaf).unwrap().text(), "XYhello");
    let selection = state.selection().unwrap();
    assert_eq!(selection.anchor, Point::text(leaf.clone(), 5));
    assert_eq!(selection.focus, Point::text(leaf, 5));
}
