//! Negotiation round-trip property over a real socket: when both peers
//! support SPARKv1, both return it, and neither writes a typed message
//! before the handshake completes.

use std::net::{TcpListener, TcpStream};
use std::thread;

use sparklink::wire::{negotiate, Role, SPARK_V1};

#[test]
fn both_peers_settle_on_sparkv1() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let responder = thread::spawn(move || {
        let (mut sock, _) = listener.accept().unwrap();
        negotiate(&mut sock, Role::Responder).unwrap()
    });

    let mut client = TcpStream::connect(addr).unwrap();
    let client_choice = negotiate(&mut client, Role::Initiator).unwrap();
    let responder_choice = responder.join().unwrap();

    assert_eq!(client_choice, SPARK_V1);
    assert_eq!(responder_choice, SPARK_V1);
}

#[test]
fn eof_mid_handshake_is_a_negotiation_failure_not_a_panic() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let responder = thread::spawn(move || {
        let (mut sock, _) = listener.accept().unwrap();
        negotiate(&mut sock, Role::Responder)
    });

    // Connect and immediately hang up without proposing anything.
    let client = TcpStream::connect(addr).unwrap();
    drop(client);

    assert!(responder.join().unwrap().is_err());
}
