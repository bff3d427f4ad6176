//! End-to-end scenarios over small simulated meshes.

use std::collections::HashSet;

use crdt_doc::{Document, ReplicatedDoc};
use crdt_net::{NetworkInterface, NodeId, Transmission};
use crdt_sync::codec;
use crdt_sync::{Mesh, MeshConfig, Message, Payload, SessionId, SyncConfig, SyncError};
use serde_json::{json, Value};

fn named_mesh(names: &[&str], edges: &[(&str, &str)], config: MeshConfig) -> Mesh {
    let mut mesh: Mesh = Mesh::with_config(config);
    for name in names {
        mesh.add_named_node(*name).unwrap();
    }
    for (a, b) in edges {
        mesh.connect(&NodeId::from(*a), &NodeId::from(*b)).unwrap();
    }
    mesh.settle().unwrap();
    mesh
}

fn init(mesh: &mut Mesh, node: &str, message: &str) -> SessionId {
    let session = mesh
        .node_mut(&NodeId::from(node))
        .unwrap()
        .init_shared_data(|d| d.put("message", message))
        .unwrap();
    mesh.settle().unwrap();
    session
}

fn update(mesh: &mut Mesh, node: &str, key: &str, value: impl Into<Value>) {
    let value = value.into();
    mesh.node_mut(&NodeId::from(node))
        .unwrap()
        .update_data(move |d| d.put(key, value))
        .unwrap();
    mesh.settle().unwrap();
}

fn message_at(mesh: &Mesh, node: &str) -> Option<String> {
    mesh.node(&NodeId::from(node))
        .and_then(|e| e.shared_data())
        .and_then(|d| d.get_str("message"))
        .map(str::to_string)
}

fn wire(t: &Transmission) -> Value {
    serde_json::from_slice(&t.payload).unwrap()
}

/// Each message id crosses each directed edge at most once.
fn assert_flood_bounded(mesh: &Mesh) {
    let mut seen = HashSet::new();
    for t in mesh.network().transmissions() {
        let msg_id = wire(&t)["msgId"].as_str().unwrap().to_string();
        assert!(
            seen.insert((t.from.clone(), t.to.clone(), msg_id.clone())),
            "{msg_id} sent twice from {} to {}",
            t.from,
            t.to
        );
    }
}

#[test]
fn two_nodes_exchange_edits() {
    let mut mesh = named_mesh(&["a", "b"], &[("a", "b")], MeshConfig::default());

    let session = init(&mut mesh, "a", "initialized from A");
    assert_eq!(message_at(&mesh, "b").as_deref(), Some("initialized from A"));
    assert_eq!(mesh.node(&NodeId::from("b")).unwrap().session_id(), Some(&session));

    update(&mut mesh, "a", "message", "updated from A");
    assert_eq!(message_at(&mesh, "b").as_deref(), Some("updated from A"));

    update(&mut mesh, "b", "message", "updated from B");
    assert_eq!(message_at(&mesh, "a").as_deref(), Some("updated from B"));

    assert!(mesh.is_converged());
    assert_flood_bounded(&mesh);
}

#[test]
fn ring_converges_without_echo() {
    let mut mesh = named_mesh(
        &["a", "b", "c"],
        &[("a", "b"), ("b", "c"), ("c", "a")],
        MeshConfig::default(),
    );

    init(&mut mesh, "a", "initialized from A");
    update(&mut mesh, "c", "message", "updated from C");

    for node in ["a", "b", "c"] {
        assert_eq!(message_at(&mesh, node).as_deref(), Some("updated from C"));
    }
    assert!(mesh.is_converged());
    assert_flood_bounded(&mesh);
}

#[test]
fn chain_edit_crosses_two_relays() {
    let mut mesh = named_mesh(
        &["a", "b", "c", "d"],
        &[("a", "b"), ("b", "c"), ("c", "d")],
        MeshConfig::default(),
    );

    init(&mut mesh, "a", "initialized from A");
    assert_eq!(message_at(&mesh, "d").as_deref(), Some("initialized from A"));

    mesh.network().clear_transmissions();
    update(&mut mesh, "a", "message", "updated from A");
    assert_eq!(message_at(&mesh, "d").as_deref(), Some("updated from A"));

    // One hop per link, and every copy keeps a as origin.
    let sent = mesh.network().transmissions();
    assert_eq!(sent.len(), 3);
    for t in &sent {
        let msg = wire(t);
        assert_eq!(msg["type"], "changes");
        assert_eq!(msg["originId"], "a");
        assert_eq!(msg["relay"], json!(t.from.as_str() != "a"));
    }

    update(&mut mesh, "d", "message", "updated from D");
    assert_eq!(message_at(&mesh, "a").as_deref(), Some("updated from D"));
    assert!(mesh.is_converged());
}

#[test]
fn concurrent_edits_converge() {
    let mut mesh = named_mesh(
        &["a", "b", "c", "d"],
        &[("a", "b"), ("b", "c"), ("c", "d")],
        MeshConfig::default(),
    );
    init(&mut mesh, "a", "start");

    for (node, value) in [("a", "from a"), ("d", "from d")] {
        mesh.node_mut(&NodeId::from(node))
            .unwrap()
            .update_data(|d| {
                d.put("message", value);
                d.put(format!("by_{node}"), true);
            })
            .unwrap();
    }
    mesh.settle().unwrap();

    assert!(mesh.is_converged());
    let doc = mesh.node(&NodeId::from("b")).unwrap().shared_data().unwrap();
    assert_eq!(doc.get("by_a"), Some(&json!(true)));
    assert_eq!(doc.get("by_d"), Some(&json!(true)));
    assert!(matches!(doc.get_str("message"), Some("from a") | Some("from d")));
}

#[test]
fn delete_propagates() {
    let mut mesh = named_mesh(&["a", "b", "c"], &[("a", "b"), ("b", "c")], MeshConfig::default());
    init(&mut mesh, "a", "temporary");

    mesh.node_mut(&NodeId::from("c"))
        .unwrap()
        .update_data(|d| d.delete("message"))
        .unwrap();
    mesh.settle().unwrap();

    assert_eq!(message_at(&mesh, "a"), None);
    assert!(mesh.is_converged());
}

#[test]
fn late_joiner_bootstraps_on_connect() {
    let mut mesh = named_mesh(&["a", "b"], &[("a", "b")], MeshConfig::default());
    let session = init(&mut mesh, "a", "initialized from A");
    update(&mut mesh, "b", "count", 3);

    let late = mesh.add_named_node("late").unwrap();
    mesh.connect(&late, &NodeId::from("b")).unwrap();
    mesh.settle().unwrap();

    let engine = mesh.node(&late).unwrap();
    assert_eq!(engine.session_id(), Some(&session));
    let doc = engine.shared_data().unwrap();
    assert_eq!(doc.get_str("message"), Some("initialized from A"));
    assert_eq!(doc.get("count"), Some(&json!(3)));
    assert!(mesh.is_converged());
}

#[test]
fn request_sync_travels_through_uninitialized_relays() {
    let config = MeshConfig {
        sync: SyncConfig {
            request_on_connect: false,
        },
        ..MeshConfig::default()
    };
    let mut mesh = named_mesh(&["a", "b", "c"], &[], config);
    init(&mut mesh, "a", "initialized from A");

    mesh.connect(&NodeId::from("a"), &NodeId::from("b")).unwrap();
    mesh.connect(&NodeId::from("b"), &NodeId::from("c")).unwrap();
    mesh.settle().unwrap();
    assert!(mesh.network().transmissions().is_empty());

    mesh.node_mut(&NodeId::from("c"))
        .unwrap()
        .request_shared_data_sync()
        .unwrap();
    mesh.settle().unwrap();

    assert!(mesh.is_converged());
    let replies: Vec<_> = mesh
        .network()
        .transmissions()
        .into_iter()
        .filter(|t| t.from.as_str() == "a")
        .map(|t| wire(&t))
        .collect();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0]["type"], "initSession");
    assert_eq!(replies[0]["relay"], false);
}

#[test]
fn update_before_session_is_an_error() {
    let mut mesh = named_mesh(&["a", "b"], &[("a", "b")], MeshConfig::default());
    let before = mesh.network().transmission_count();

    let err = mesh
        .node_mut(&NodeId::from("b"))
        .unwrap()
        .update_data(|d| d.put("message", "nobody home"))
        .unwrap_err();
    mesh.settle().unwrap();

    assert!(matches!(err, SyncError::NotInitialized));
    assert_eq!(mesh.network().transmission_count(), before);
    assert!(mesh.nodes().all(|e| e.shared_data().is_none()));
}

#[test]
fn first_session_stays_authoritative() {
    let mut mesh = named_mesh(&["a", "b"], &[("a", "b")], MeshConfig::default());
    let session = init(&mut mesh, "a", "first");

    let err = mesh
        .node_mut(&NodeId::from("b"))
        .unwrap()
        .init_shared_data(|d| d.put("message", "second"))
        .unwrap_err();
    mesh.settle().unwrap();

    assert!(matches!(err, SyncError::AlreadyInitialized));
    for node in ["a", "b"] {
        let engine = mesh.node(&NodeId::from(node)).unwrap();
        assert_eq!(engine.session_id(), Some(&session));
        assert_eq!(message_at(&mesh, node).as_deref(), Some("first"));
    }
}

#[test]
fn foreign_session_changes_are_fenced() {
    let mut mesh = named_mesh(&["a", "b", "c"], &[("a", "b"), ("b", "c")], MeshConfig::default());
    init(&mut mesh, "a", "ours");

    let foreign = Document::init("intruder")
        .change(|d| d.put("message", "theirs"))
        .unwrap();
    let mut message = Message::new(Payload::Changes {
        changes: foreign.last_local_change().unwrap().clone(),
    });
    message.session_id = Some(SessionId::from("some-other-session"));
    message.msg_id = Some("foreign-1".into());
    message.origin_id = Some(NodeId::from("intruder"));
    let bytes = codec::encode(&message).unwrap();

    let mut intruder = mesh.network().join_as("intruder").unwrap();
    let link = intruder.connect_to(&NodeId::from("b")).unwrap();
    intruder.send(&link, &bytes).unwrap();
    mesh.settle().unwrap();

    for node in ["a", "b", "c"] {
        assert_eq!(message_at(&mesh, node).as_deref(), Some("ours"));
    }

    // Still relayed, with its own session id.
    let relayed: Vec<_> = mesh
        .network()
        .transmissions()
        .into_iter()
        .map(|t| wire(&t))
        .filter(|m| m["msgId"] == "foreign-1")
        .collect();
    assert_eq!(relayed.len(), 3);
    assert!(relayed.iter().all(|m| m["sessionId"] == "some-other-session"));
}

#[test]
fn unrecognized_messages_are_relayed_intact() {
    let mut mesh = named_mesh(&["a", "b", "c"], &[("a", "b"), ("b", "c")], MeshConfig::default());
    init(&mut mesh, "a", "steady");
    let before = mesh.node(&NodeId::from("c")).unwrap().shared_data().cloned();

    let mut outsider = mesh.network().join_as("outsider").unwrap();
    let link = outsider.connect_to(&NodeId::from("a")).unwrap();
    let ping = json!({"type": "ping", "note": "hi", "nested": {"n": 1}, "msgId": "ping-1"});
    outsider
        .send(&link, &serde_json::to_vec(&ping).unwrap())
        .unwrap();
    mesh.settle().unwrap();

    let at_c: Vec<_> = mesh
        .network()
        .transmissions()
        .into_iter()
        .filter(|t| t.to.as_str() == "c")
        .map(|t| wire(&t))
        .filter(|m| m["type"] == "ping")
        .collect();
    assert_eq!(at_c.len(), 1);
    assert_eq!(at_c[0]["note"], "hi");
    assert_eq!(at_c[0]["nested"], json!({"n": 1}));
    assert_eq!(at_c[0]["msgId"], "ping-1");
    assert_eq!(at_c[0]["originId"], "a");
    assert_eq!(at_c[0]["relay"], true);

    let after = mesh.node(&NodeId::from("c")).unwrap().shared_data().cloned();
    assert_eq!(before, after);
}

#[test]
fn garbage_payloads_are_ignored() {
    let mut mesh = named_mesh(&["a", "b"], &[("a", "b")], MeshConfig::default());
    init(&mut mesh, "a", "steady");

    let mut outsider = mesh.network().join_as("outsider").unwrap();
    let link = outsider.connect_to(&NodeId::from("a")).unwrap();
    let before = mesh.network().transmission_count();
    let garbage: [&[u8]; 4] = [
        b"not json",
        b"[1,2,3]",
        br#"{"type": 5}"#,
        br#"{"type":"changes","changes":7}"#,
    ];
    for payload in garbage {
        outsider.send(&link, payload).unwrap();
    }
    mesh.settle().unwrap();

    assert_eq!(mesh.network().transmission_count(), before + 4);
    assert_eq!(message_at(&mesh, "b").as_deref(), Some("steady"));
}

#[test]
fn listeners_fire_on_remote_edits() {
    use std::cell::RefCell;
    use std::rc::Rc;

    let mut mesh = named_mesh(&["a", "b", "c"], &[("a", "b"), ("b", "c")], MeshConfig::default());
    let log: Rc<RefCell<Vec<String>>> = Rc::default();
    let sink = Rc::clone(&log);
    mesh.node_mut(&NodeId::from("c"))
        .unwrap()
        .on_change(move |change| {
            for patch in &change.patches {
                sink.borrow_mut().push(patch.key.clone());
            }
        });

    init(&mut mesh, "a", "one");
    update(&mut mesh, "b", "other", 1);
    update(&mut mesh, "a", "message", "two");

    assert_eq!(
        log.borrow().as_slice(),
        &["__", "message", "other", "message"].map(String::from)
    );
}

#[test]
fn repeated_request_is_answered_once() {
    let mut mesh = named_mesh(&["a", "b"], &[("a", "b")], MeshConfig::default());
    init(&mut mesh, "a", "steady");

    let mut outsider = mesh.network().join_as("outsider").unwrap();
    let link = outsider.connect_to(&NodeId::from("a")).unwrap();
    let request = json!({"type": "requestSessionInit", "msgId": "req-1", "originId": "outsider"});
    let bytes = serde_json::to_vec(&request).unwrap();
    outsider.send(&link, &bytes).unwrap();
    outsider.send(&link, &bytes).unwrap();
    mesh.settle().unwrap();

    let replies = mesh
        .network()
        .transmissions()
        .into_iter()
        .filter(|t| t.to.as_str() == "outsider")
        .map(|t| wire(&t))
        .filter(|m| m["type"] == "initSession")
        .count();
    assert_eq!(replies, 1);
}

#[test]
fn ring_bootstrap_requests_are_bounded() {
    let mut mesh = named_mesh(
        &["a", "b", "c"],
        &[("a", "b"), ("b", "c"), ("c", "a")],
        MeshConfig::default(),
    );
    let requests = mesh
        .network()
        .transmissions()
        .into_iter()
        .filter(|t| wire(t)["type"] == "requestSessionInit")
        .count();
    assert!(requests > 0);
    assert_flood_bounded(&mesh);

    init(&mut mesh, "b", "after bootstrap");
    assert!(mesh.is_converged());
    assert_flood_bounded(&mesh);
}

#[test]
fn request_relayed_before_init_is_answered_after() {
    let config = MeshConfig {
        sync: SyncConfig {
            request_on_connect: false,
        },
        ..MeshConfig::default()
    };
    let mut mesh = named_mesh(&["a"], &[], config);

    let mut outsider = mesh.network().join_as("outsider").unwrap();
    let link = outsider.connect_to(&NodeId::from("a")).unwrap();
    let request = json!({"type": "requestSessionInit", "msgId": "req-1", "originId": "outsider"});
    let bytes = serde_json::to_vec(&request).unwrap();
    outsider.send(&link, &bytes).unwrap();
    mesh.settle().unwrap();

    init(&mut mesh, "a", "late");
    let replies_to_outsider = |mesh: &Mesh, skip: usize| {
        mesh.network()
            .transmissions()
            .into_iter()
            .skip(skip)
            .filter(|t| t.from.as_str() == "a" && t.to.as_str() == "outsider")
            .filter(|t| wire(t)["type"] == "initSession")
            .count()
    };

    let mark = mesh.network().transmission_count();
    outsider.send(&link, &bytes).unwrap();
    mesh.settle().unwrap();
    assert_eq!(replies_to_outsider(&mesh, mark), 1);

    let mark = mesh.network().transmission_count();
    outsider.send(&link, &bytes).unwrap();
    mesh.settle().unwrap();
    assert_eq!(replies_to_outsider(&mesh, mark), 0);
}
