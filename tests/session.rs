//! The numbered end-to-end scenarios from the protocol negotiation and
//! session testable-properties list: a literal swap request/response, a
//! bind-but-no-client shutdown, a duplicate connect while already
//! connected, and an unsupported-protocol handshake failure.

use std::net::{TcpListener, TcpStream};
use std::time::Duration;

use sparklink::net::TcpMessenger;
use sparklink::process::{attach, detach, receive};
use sparklink::service::Session;
use sparklink::value::Value;
use sparklink::wire::{negotiate, Role};
use sparklink::Message;

fn recv_with_tag(tag: &str) -> Message {
    loop {
        let m = receive().unwrap();
        if m.tag() == tag {
            return m;
        }
    }
}

/// Scenario 1: server binds, client connects, client sends a `swap` request
/// and receives the server's response addressed to the same transaction.
#[test]
fn swap_request_round_trip() {
    let _ = env_logger::try_init();
    let pid = attach(Some("scenario-swap")).unwrap();

    let mut server = Session::new();
    server.messenger().listening.subscribe(Some(pid));
    server.messenger().connected.subscribe(Some(pid));
    server.messenger().protocol_negotiated.subscribe(Some(pid));
    server.bind("127.0.0.1:0".parse().unwrap());

    let bound = match recv_with_tag("listening").params()[0] {
        Value::Addr(addr) => addr,
        _ => unreachable!(),
    };

    let mut client = Session::new();
    client.messenger().connected.subscribe(Some(pid));
    client.messenger().protocol_negotiated.subscribe(Some(pid));
    client.connect(bound);

    // Two peers, two events each (connected, protocol-negotiated).
    let mut remaining = 4;
    while remaining > 0 {
        let m = receive().unwrap();
        if m.tag() == "connected" || m.tag() == "protocol-negotiated" {
            remaining -= 1;
        }
    }

    let trans_id = client.send_request("swap", vec![Value::from("foo"), Value::from("bar")]);
    let request = recv_with_tag("swap");
    assert_eq!(request.trans_id(), Some(trans_id));
    assert_eq!(request.params(), &[Value::from("foo"), Value::from("bar")]);

    server.send_response("swap", trans_id, vec![Value::from("bar"), Value::from("foo")]);
    let response = receive().unwrap();
    match response {
        Message::Response { tag, trans_id: rid, params } => {
            assert_eq!(tag, "swap");
            assert_eq!(rid, trans_id);
            assert_eq!(params, vec![Value::from("bar"), Value::from("foo")]);
        }
        other => panic!("expected a swap Response, got {other:?}"),
    }

    server.disconnect();
    client.disconnect();
    detach().unwrap();
}

/// Scenario 2: a server binds and starts accepting, but is told to
/// disconnect before any client connects. No `accept-error` event should
/// ever be emitted — the pending accept is simply abandoned, not treated as
/// a failure — and the listening socket itself must be genuinely shut down
/// so the helper blocked in `accept()` actually unblocks, rather than being
/// leaked forever.
#[test]
fn disconnect_before_any_client_connects_emits_no_accept_error() {
    let pid = attach(Some("scenario-no-client")).unwrap();

    let messenger = TcpMessenger::new();
    messenger.listening.subscribe(Some(pid));

    messenger.listen("127.0.0.1:0".parse().unwrap());
    let bound = match recv_with_tag("listening").params()[0] {
        Value::Addr(addr) => addr,
        _ => unreachable!(),
    };
    messenger.accept();
    messenger.disconnect();

    // Give the (still outstanding) accept helper a window in which an
    // errant `accept-error` would have to show up.
    let nothing_arrived = crate_no_message_within(Duration::from_millis(150));
    assert!(nothing_arrived, "disconnect with no connected client must not raise accept-error");

    // The helper's blocked accept() only returns if the listening socket
    // was genuinely torn down, not merely dropped out from under a
    // surviving dup'd fd. Proof: the address is no longer bound to
    // anything, so a fresh bind can reclaim it.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    let mut reclaimed = false;
    while std::time::Instant::now() < deadline {
        if TcpListener::bind(bound).is_ok() {
            reclaimed = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(reclaimed, "the listening socket must be shut down, not leaked, once the pending accept is cancelled");

    detach().unwrap();
}

fn crate_no_message_within(budget: Duration) -> bool {
    let deadline = std::time::Instant::now() + budget;
    while std::time::Instant::now() < deadline {
        if let Some(m) = sparklink::process::try_receive().unwrap() {
            if m.tag() == "accept-error" {
                return false;
            }
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    true
}

/// Scenario 3: issuing a second `connect` while already connected fails
/// immediately with `connection-error("invalid-state")`; the first
/// connection is unaffected and keeps working.
#[test]
fn duplicate_connect_while_connected_is_rejected() {
    let pid = attach(Some("scenario-duplicate-connect")).unwrap();

    let server = TcpMessenger::new();
    server.listening.subscribe(Some(pid));
    server.connected.subscribe(Some(pid));

    server.listen("127.0.0.1:0".parse().unwrap());
    let bound = match recv_with_tag("listening").params()[0] {
        Value::Addr(addr) => addr,
        _ => unreachable!(),
    };
    server.accept();

    let client = TcpMessenger::new();
    client.connected.subscribe(Some(pid));
    client.connect(bound);

    recv_with_tag("connected");
    recv_with_tag("connected");

    // Already connected: a second connect must be rejected immediately
    // rather than torn down and retried.
    client.connect(bound);
    let rejection = recv_with_tag("connection-error");
    assert_eq!(rejection.params(), &[Value::from("invalid-state")]);

    // The original connection still works.
    client.send_message(&Message::command("ping", vec![]));
    server.close();
    client.close();
    detach().unwrap();
}

/// Scenario 4: when the two peers advertise disjoint protocol sets, the
/// handshake fails as a negotiation error on both sides and no typed
/// message is ever exchanged. Driven directly at the wire layer since the
/// real messenger only ever offers SPARKv1 itself; here the client plays a
/// peer that proposes a protocol (`SPARKv2`) the responder does not
/// support, and both sides must observe the handshake breaking down rather
/// than silently agreeing on something.
#[test]
fn disjoint_protocol_sets_fail_negotiation() {
    use sparklink::wire::write_frame;

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let responder = std::thread::spawn(move || {
        let (mut sock, _) = listener.accept().unwrap();
        negotiate(&mut sock, Role::Responder)
    });

    let mut client = TcpStream::connect(addr).unwrap();
    write_frame(&mut client, b"supports SPARKv2").unwrap();
    // The responder finds nothing it supports in the proposal and fails
    // without ever writing a `protocol` reply; the client observes that
    // breakdown as the connection closing before any reply arrives.
    let client_saw_no_reply = sparklink::wire::read_frame(&mut client).is_err();
    let responder_result = responder.join().unwrap();

    assert!(client_saw_no_reply, "a responder that supports nothing proposed must not send a protocol reply");
    assert!(
        matches!(responder_result, Err(sparklink::error::WireError::Negotiation(_))),
        "responder must fail negotiation, not silently pick an unsupported protocol"
    );
}
