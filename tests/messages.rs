mod common;

use std::sync::{Arc, Mutex};

use common::{init_tracing, labels, log, received, Countdown, Failing, Listener, Mailbox, Script};
use klingt_pd::{atoms, Engine, GraphError};

#[test]
/// A -> [B, C] with B -> D: D must see the message before C does
fn fan_out_is_depth_first() {
    init_tracing();
    let mut engine = Engine::default();
    let patch = engine.create_patch();
    let log = log();

    let a = engine.add_node(patch, "mailbox", Mailbox::new("a", &log)).unwrap();
    let b = engine.add_node(patch, "mailbox", Mailbox::new("b", &log)).unwrap();
    let c = engine.add_node(patch, "mailbox", Mailbox::new("c", &log)).unwrap();
    let d = engine.add_node(patch, "mailbox", Mailbox::new("d", &log)).unwrap();
    engine.connect(patch, a, 0, b, 0).unwrap();
    engine.connect(patch, a, 0, c, 0).unwrap();
    engine.connect(patch, b, 0, d, 0).unwrap();

    engine.message(a.inlet(0), &atoms!["bang"]).unwrap();
    assert_eq!(labels(&log), vec!["a", "b", "d", "c"]);
}

#[test]
fn deliver_message_runs_outlet_connections_in_order() {
    let mut engine = Engine::default();
    let patch = engine.create_patch();
    let log = log();

    let source = engine.add_node(patch, "mailbox", Mailbox::new("source", &log)).unwrap();
    let second = engine.add_node(patch, "mailbox", Mailbox::new("second", &log)).unwrap();
    let first = engine.add_node(patch, "mailbox", Mailbox::new("first", &log)).unwrap();
    engine.connect_ports(source.outlet(0), first.inlet(0)).unwrap();
    engine.connect_ports(source.outlet(0), second.inlet(0)).unwrap();

    engine.deliver_message(source.outlet(0), &atoms![1, 2]).unwrap();
    assert_eq!(labels(&log), vec!["first", "second"]);
    assert_eq!(received(&log, "second"), vec![atoms![1, 2]]);
}

#[test]
/// The Pd counter idiom: a node wired into itself
fn feedback_into_the_same_node() {
    let mut engine = Engine::default();
    let patch = engine.create_patch();
    let log = log();

    let countdown = engine.add_node(patch, "countdown", Countdown).unwrap();
    let mailbox = engine.add_node(patch, "mailbox", Mailbox::new("out", &log)).unwrap();
    engine.connect(patch, countdown, 0, countdown, 0).unwrap();
    engine.connect(patch, countdown, 0, mailbox, 0).unwrap();

    engine.message(countdown.inlet(0), &atoms![3]).unwrap();
    assert_eq!(received(&log, "out"), vec![atoms![0], atoms![1], atoms![2]]);
}

#[test]
fn fan_in_invokes_handler_per_connection() {
    let mut engine = Engine::default();
    let patch = engine.create_patch();
    let log = log();

    let a = engine.add_node(patch, "mailbox", Mailbox::new("a", &log)).unwrap();
    let b = engine.add_node(patch, "mailbox", Mailbox::new("b", &log)).unwrap();
    let sink = engine.add_node(patch, "mailbox", Mailbox::new("sink", &log)).unwrap();
    engine.connect(patch, a, 0, sink, 0).unwrap();
    engine.connect(patch, b, 0, sink, 0).unwrap();
    engine.connect(patch, a, 0, b, 0).unwrap();

    engine.message(a.inlet(0), &atoms!["x"]).unwrap();
    assert_eq!(received(&log, "sink").len(), 2);
}

#[test]
fn disconnect_is_idempotent() {
    let mut engine = Engine::default();
    let patch = engine.create_patch();
    let log = log();

    let a = engine.add_node(patch, "mailbox", Mailbox::new("a", &log)).unwrap();
    let b = engine.add_node(patch, "mailbox", Mailbox::new("b", &log)).unwrap();
    let connection = engine.connect(patch, a, 0, b, 0).unwrap();

    engine.disconnect(connection);
    engine.disconnect(connection);
    engine.message(a.inlet(0), &atoms![1]).unwrap();
    assert!(received(&log, "b").is_empty());
}

#[test]
fn send_and_receive_through_the_graph() {
    let mut engine = Engine::default();
    let patch = engine.create_patch();
    let receive = engine.create_object(patch, "receive", &atoms!["in"]).unwrap();
    let send = engine.create_object(patch, "send", &atoms!["out"]).unwrap();
    engine.connect(patch, receive, 0, send, 0).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    engine.receive("out", move |atoms| sink.lock().unwrap().push(atoms.to_vec()));

    engine.send("in", &atoms!["x", 1]).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![atoms!["x", 1]]);

    // Nobody listening
    engine.send("nowhere", &atoms![1]).unwrap();
}

#[test]
fn send_reaches_every_receiver_of_its_name() {
    let mut engine = Engine::default();
    let patch = engine.create_patch();
    let log = log();

    let send1 = engine.create_object(patch, "send", &atoms!["no1"]).unwrap();
    let _send2 = engine.create_object(patch, "s", &atoms!["no2"]).unwrap();
    for (label, name) in [("one", "no1"), ("one-bis", "no1"), ("two", "no2")] {
        let receive = engine.create_object(patch, "receive", &atoms![name]).unwrap();
        let mailbox = engine.add_node(patch, "mailbox", Mailbox::new(label, &log)).unwrap();
        engine.connect(patch, receive, 0, mailbox, 0).unwrap();
    }

    engine.message(send1.inlet(0), &atoms!["bla", "bli", "blu"]).unwrap();
    assert_eq!(received(&log, "one"), vec![atoms!["bla", "bli", "blu"]]);
    assert_eq!(received(&log, "one-bis"), vec![atoms!["bla", "bli", "blu"]]);
    assert!(received(&log, "two").is_empty());

    let host = Arc::new(Mutex::new(Vec::new()));
    let sink = host.clone();
    engine.receive("no2", move |atoms| sink.lock().unwrap().push(atoms.to_vec()));
    engine.send("no2", &atoms!["bla", 888]).unwrap();
    assert_eq!(received(&log, "two"), vec![atoms!["bla", 888]]);
    assert_eq!(*host.lock().unwrap(), vec![atoms!["bla", 888]]);
}

#[test]
fn renaming_moves_the_route() {
    let mut engine = Engine::default();
    let patch = engine.create_patch();
    let log = log();

    let send = engine.create_object(patch, "send", &atoms!["no1"]).unwrap();
    let receive = engine.create_object(patch, "receive", &atoms!["no1"]).unwrap();
    let mailbox = engine.add_node(patch, "mailbox", Mailbox::new("mb", &log)).unwrap();
    engine.connect(patch, receive, 0, mailbox, 0).unwrap();

    // Only the receiver moves
    engine.rename(receive, "num1").unwrap();
    engine.message(send.inlet(0), &atoms!["blop", "blep", "blup"]).unwrap();
    assert!(received(&log, "mb").is_empty());

    // The sender follows through its right inlet
    engine.message(send.inlet(1), &atoms!["symbol", "num1"]).unwrap();
    engine.message(send.inlet(0), &atoms![1, 11, 111]).unwrap();
    assert_eq!(received(&log, "mb"), vec![atoms![1, 11, 111]]);

    assert!(engine.registry().senders("no1").is_empty());
    assert!(engine.registry().receivers("no1").is_empty());
}

#[test]
/// One fan-out renames a send through its right inlet, then sends through its left
fn rename_inside_a_fan_out_applies_to_the_next_send() {
    let mut engine = Engine::default();
    let patch = engine.create_patch();

    let script = engine
        .add_node(
            patch,
            "script",
            Script::new(vec![(0, atoms!["symbol", "b"]), (1, atoms!["payload"])]),
        )
        .unwrap();
    let send = engine.create_object(patch, "send", &atoms!["a"]).unwrap();
    engine.connect(patch, script, 0, send, 1).unwrap();
    engine.connect(patch, script, 1, send, 0).unwrap();

    let on_a = Arc::new(Mutex::new(Vec::new()));
    let on_b = Arc::new(Mutex::new(Vec::new()));
    let sink = on_a.clone();
    engine.receive("a", move |atoms| sink.lock().unwrap().push(atoms.to_vec()));
    let sink = on_b.clone();
    engine.receive("b", move |atoms| sink.lock().unwrap().push(atoms.to_vec()));

    engine.message(script.inlet(0), &atoms!["bang"]).unwrap();
    assert!(on_a.lock().unwrap().is_empty());
    assert_eq!(*on_b.lock().unwrap(), vec![atoms!["payload"]]);
    assert_eq!(engine.registry().senders("b"), &[send]);
}

#[test]
/// The first receiver on "x" moves the second one to "y" while "x" is being delivered
fn receiver_renamed_mid_send_still_gets_that_message() {
    let mut engine = Engine::default();
    let patch = engine.create_patch();
    let log = log();

    let first = engine.create_object(patch, "receive", &atoms!["x"]).unwrap();
    let mover = engine.add_node(patch, "script", Script::new(vec![(0, atoms!["y"])])).unwrap();
    let listener = engine
        .add_node(patch, "listener", Listener::new("x", "listener", &log))
        .unwrap();
    engine.connect(patch, first, 0, mover, 0).unwrap();
    engine.connect(patch, mover, 0, listener, 0).unwrap();

    engine.send("x", &atoms![1]).unwrap();
    assert_eq!(received(&log, "listener"), vec![atoms![1]]);

    engine.send("x", &atoms![2]).unwrap();
    engine.send("y", &atoms![3]).unwrap();
    assert_eq!(received(&log, "listener"), vec![atoms![1], atoms![3]]);
}

#[test]
fn removed_nodes_stop_receiving() {
    let mut engine = Engine::default();
    let patch = engine.create_patch();
    let log = log();

    let receive = engine.create_object(patch, "r", &atoms!["gone"]).unwrap();
    let mailbox = engine.add_node(patch, "mailbox", Mailbox::new("mb", &log)).unwrap();
    engine.connect(patch, receive, 0, mailbox, 0).unwrap();

    engine.remove(receive).unwrap();
    engine.send("gone", &atoms![1]).unwrap();
    assert!(received(&log, "mb").is_empty());
    assert_eq!(engine.registry().names().count(), 0);
    assert!(matches!(engine.remove(receive), Err(GraphError::NodeNotFound(_))));
}

#[test]
fn node_errors_reach_the_caller() {
    let mut engine = Engine::default();
    let patch = engine.create_patch();
    let log = log();

    let mailbox = engine.add_node(patch, "mailbox", Mailbox::new("mb", &log)).unwrap();
    let failing = engine.add_node(patch, "failing", Failing).unwrap();
    engine.connect(patch, mailbox, 0, failing, 0).unwrap();

    let err = engine.message(mailbox.inlet(0), &atoms![1]).unwrap_err();
    assert_eq!(
        err,
        GraphError::Node {
            node: failing,
            source: klingt_pd::NodeError::new("boom")
        }
    );
    // The graph is left as it was
    assert_eq!(received(&log, "mb"), vec![atoms![1]]);
}

#[test]
fn control_queue_is_drained_on_tick() {
    let mut engine = Engine::new(klingt_pd::EngineConfig::default().with_control_queue_size(2));
    let mut control = engine.control_sender().unwrap();
    assert!(engine.control_sender().is_none());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    engine.receive("volume", move |atoms| sink.lock().unwrap().push(atoms.to_vec()));

    control.send("volume", atoms![0.5f32]).unwrap();
    control.send("volume", atoms![0.25f32]).unwrap();
    assert!(control.send("volume", atoms![1]).is_err());
    assert!(seen.lock().unwrap().is_empty());

    // Delivered even while stopped
    engine.tick(64).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![atoms![0.5f32], atoms![0.25f32]]);
    assert_eq!(control.available(), 2);
}
