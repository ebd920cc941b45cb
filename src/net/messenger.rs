use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use socket2::{Domain, Protocol, SockAddr, SockRef, Socket, Type};

use crate::config::MessengerConfig;
use crate::message::{message_pattern, Message};
use crate::notifier::EventSender;
use crate::process::{current, logger, receive, send, spawn, try_send, Loop, Pid, ProcessResult};
use crate::value::{Pattern, Value};
use crate::wire::{decode_message, encode_message, negotiate, read_frame, write_frame, Role};

/// Whether the messenger currently has an established peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// A live TCP socket handed from an accept/connect helper process to the
/// messenger, once the socket exists but before the messenger has decided
/// whether to keep it.
struct Handoff {
    stream: Mutex<Option<TcpStream>>,
}

#[derive(Clone)]
struct Events {
    listening: Arc<EventSender>,
    connected: Arc<EventSender>,
    protocol_negotiated: Arc<EventSender>,
    disconnected: Arc<EventSender>,
}

/// A process that owns at most one TCP connection at a time: dialing out,
/// listening and accepting, negotiating a protocol, and ferrying decoded
/// [`Message`]s to and from whichever process is subscribed.
///
/// Every public method here sends a command to the messenger's own
/// process and returns immediately; the outcome (or an error) arrives
/// later as an event to the caller's mailbox.
pub struct TcpMessenger {
    pid: Pid,
    pub listening: Arc<EventSender>,
    pub connected: Arc<EventSender>,
    pub protocol_negotiated: Arc<EventSender>,
    pub disconnected: Arc<EventSender>,
}

impl TcpMessenger {
    pub fn new() -> Self {
        Self::with_config(MessengerConfig::default())
    }

    pub fn with_config(config: MessengerConfig) -> Self {
        let listening = Arc::new(EventSender::new("listening", 1));
        let connected = Arc::new(EventSender::new("connected", 1));
        let protocol_negotiated = Arc::new(EventSender::new("protocol-negotiated", 1));
        let disconnected = Arc::new(EventSender::new("disconnected", 0));
        let events = Events {
            listening: listening.clone(),
            connected: connected.clone(),
            protocol_negotiated: protocol_negotiated.clone(),
            disconnected: disconnected.clone(),
        };
        let pid = spawn(move || run_messenger(events, config), Some("TcpMessenger"));
        Self { pid, listening, connected, protocol_negotiated, disconnected }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn connect(&self, addr: SocketAddr) {
        let sender = current().expect("connect() must be called from within a process");
        let _ = send(self.pid, Message::command("connect", vec![Value::Addr(addr), Value::Pid(sender)]));
    }

    pub fn listen(&self, addr: SocketAddr) {
        let sender = current().expect("listen() must be called from within a process");
        let _ = send(self.pid, Message::command("listen", vec![Value::Addr(addr), Value::Pid(sender)]));
    }

    pub fn accept(&self) {
        let sender = current().expect("accept() must be called from within a process");
        let _ = send(self.pid, Message::command("accept", vec![Value::Pid(sender)]));
    }

    pub fn disconnect(&self) {
        let _ = send(self.pid, Message::command("disconnect", vec![]));
    }

    /// Encode `message` and queue it for transmission over the current
    /// connection. A no-op if there is none; the messenger reports that
    /// back to the caller as a `send-error` event.
    pub fn send_message(&self, message: &Message) {
        let sender = current().expect("send_message() must be called from within a process");
        let bytes = encode_message(message);
        let _ = send(self.pid, Message::command("send", vec![Value::Bytes(bytes), Value::Pid(sender)]));
    }

    pub fn close(&self) {
        let _ = try_send(self.pid, Message::command("stop", vec![]));
    }
}

impl Default for TcpMessenger {
    fn default() -> Self {
        Self::new()
    }
}

struct MessengerState {
    events: Events,
    config: MessengerConfig,
    conn_state: ConnectionState,
    server: Option<Arc<TcpListener>>,
    conn: Option<TcpStream>,
    remote_addr: Option<SocketAddr>,
    protocol: Option<String>,
    session: Option<Pid>,
    accept_receiver: Option<Pid>,
    connect_receiver: Option<Pid>,
    accept_cancel: Option<Arc<AtomicBool>>,
    pending_handoff: Option<Arc<Handoff>>,
}

fn run_messenger(events: Events, config: MessengerConfig) -> ProcessResult {
    let mut state = MessengerState {
        events,
        config,
        conn_state: ConnectionState::Disconnected,
        server: None,
        conn: None,
        remote_addr: None,
        protocol: None,
        session: None,
        accept_receiver: None,
        connect_receiver: None,
        accept_cancel: None,
        pending_handoff: None,
    };

    let mut lp: Loop<MessengerState> = Loop::new();
    lp.add_pattern(message_pattern("Command", "connect", vec![Pattern::Any, Pattern::Any]), |s, m| {
        do_connect(s, param_addr(m, 0), param_pid(m, 1));
    });
    lp.add_pattern(message_pattern("Command", "listen", vec![Pattern::Any, Pattern::Any]), |s, m| {
        do_listen(s, param_addr(m, 0), param_pid(m, 1));
    });
    lp.add_pattern(message_pattern("Command", "accept", vec![Pattern::Any]), |s, m| {
        do_accept(s, param_pid(m, 0));
    });
    lp.add_pattern(message_pattern("Command", "disconnect", vec![]), |s, _| close_connection(s));
    lp.add_pattern(message_pattern("Command", "send", vec![Pattern::Any, Pattern::Any]), |s, m| {
        do_send(s, param_bytes(m, 0), param_pid(m, 1));
    });
    lp.add_stop(message_pattern("Command", "stop", vec![]));
    lp.add_pattern(message_pattern("Event", "connected", vec![Pattern::Any, Pattern::Any]), |s, m| {
        on_connected(s, param_addr(m, 0), param_bool(m, 1));
    });
    lp.add_pattern(message_pattern("Event", "end-of-stream", vec![Pattern::Any]), |s, _| {
        close_connection(s);
        s.events.disconnected.send(vec![]);
    });

    let result = lp.run(&mut state);
    close_connection(&mut state);
    close_server(&mut state);
    result
}

fn param_addr(m: &Message, idx: usize) -> SocketAddr {
    match &m.params()[idx] {
        Value::Addr(addr) => *addr,
        other => panic!("expected an address param, got {other:?}"),
    }
}

fn param_pid(m: &Message, idx: usize) -> Pid {
    match &m.params()[idx] {
        Value::Pid(pid) => *pid,
        other => panic!("expected a pid param, got {other:?}"),
    }
}

fn param_bool(m: &Message, idx: usize) -> bool {
    match &m.params()[idx] {
        Value::Bool(b) => *b,
        other => panic!("expected a bool param, got {other:?}"),
    }
}

fn param_bytes(m: &Message, idx: usize) -> Vec<u8> {
    match &m.params()[idx] {
        Value::Bytes(bytes) => bytes.clone(),
        other => panic!("expected a bytes param, got {other:?}"),
    }
}

/// Bind a listening socket with `backlog` passed straight through to
/// `listen(2)`, which `std::net::TcpListener::bind` has no way to express.
fn bind_with_backlog(addr: SocketAddr, backlog: i32) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SockAddr::from(addr))?;
    socket.listen(backlog)?;
    Ok(socket.into())
}

fn do_listen(state: &mut MessengerState, addr: SocketAddr, sender: Pid) {
    if state.server.is_some() {
        let _ = send(sender, Message::event("listen-error", vec![Value::from("invalid-state")]));
        return;
    }
    match bind_with_backlog(addr, state.config.accept_backlog as i32) {
        Ok(listener) => {
            let bound = listener.local_addr().unwrap_or(addr);
            logger().info(format!("listening for incoming connections on {bound}"));
            state.server = Some(Arc::new(listener));
            state.events.listening.send(vec![Value::Addr(bound)]);
        }
        Err(e) => {
            let _ = send(sender, Message::event("listen-error", vec![Value::from(e.to_string())]));
        }
    }
}

fn do_accept(state: &mut MessengerState, sender: Pid) {
    if state.accept_receiver.is_some() {
        let _ = send(sender, Message::event("accept-error", vec![Value::from("invalid-state")]));
        return;
    }
    if state.conn_state != ConnectionState::Disconnected || state.server.is_none() {
        let _ = send(sender, Message::event("accept-error", vec![Value::from("invalid-state")]));
        return;
    }
    // Share the one listening socket with the helper instead of dup-ing its
    // fd: a `try_clone`'d fd keeps the underlying socket alive even after
    // our own handle is dropped, which would leave a helper blocked in
    // `accept()` with nothing left to ever interrupt it.
    let server = Arc::clone(state.server.as_ref().unwrap());
    let cancel = Arc::new(AtomicBool::new(false));
    state.accept_cancel = Some(cancel.clone());
    let handoff = Arc::new(Handoff { stream: Mutex::new(None) });
    state.pending_handoff = Some(handoff.clone());
    let messenger_pid = current().expect("the messenger process must be attached");
    let pid = spawn(move || accept_helper(server, cancel, sender, messenger_pid, handoff), Some("TcpServer"));
    state.accept_receiver = Some(pid);
}

/// Shut down the listening socket out from under a pending accept, if one
/// is outstanding, so its helper's blocked `accept()` call returns instead
/// of leaking a thread forever. Shutting down the shared `Arc<TcpListener>`
/// directly (rather than a clone) reaches the exact fd the helper is
/// parked on.
fn cancel_pending_accept(state: &mut MessengerState) {
    let Some(cancel) = state.accept_cancel.take() else { return };
    cancel.store(true, Ordering::SeqCst);
    if let Some(server) = &state.server {
        let _ = SockRef::from(server.as_ref()).shutdown(Shutdown::Both);
    }
}

fn do_connect(state: &mut MessengerState, addr: SocketAddr, sender: Pid) {
    if state.conn_state != ConnectionState::Disconnected || state.connect_receiver.is_some() {
        let _ = send(sender, Message::event("connection-error", vec![Value::from("invalid-state")]));
        return;
    }
    let handoff = Arc::new(Handoff { stream: Mutex::new(None) });
    state.pending_handoff = Some(handoff.clone());
    let messenger_pid = current().expect("the messenger process must be attached");
    let pid = spawn(move || connect_helper(addr, sender, messenger_pid, handoff), Some("TcpClient"));
    state.connect_receiver = Some(pid);
}

fn do_send(state: &mut MessengerState, bytes: Vec<u8>, sender: Pid) {
    if state.conn_state != ConnectionState::Connected || state.protocol.is_none() {
        let _ = send(sender, Message::event("send-error", vec![Value::from("invalid-state")]));
        return;
    }
    if bytes.len() > state.config.max_frame_payload {
        let _ = send(
            sender,
            Message::event(
                "send-error",
                vec![Value::from(format!(
                    "message of {} bytes exceeds the configured maximum of {} bytes",
                    bytes.len(),
                    state.config.max_frame_payload
                ))],
            ),
        );
        return;
    }
    if let Err(e) = write_frame(state.conn.as_mut().unwrap(), &bytes) {
        logger().error(format!("failed to send a message: {e}"));
        let _ = send(sender, Message::event("send-error", vec![Value::from(e.to_string())]));
    }
}

fn on_connected(state: &mut MessengerState, remote_addr: SocketAddr, initiating: bool) {
    let receiver = if initiating { state.connect_receiver.take() } else { state.accept_receiver.take() };
    if !initiating {
        state.accept_cancel = None;
    }
    let handoff = state.pending_handoff.take();
    let (Some(receiver), Some(handoff)) = (receiver, handoff) else { return };
    let stream = handoff.stream.lock().unwrap().take().expect("handoff populated before the connected event");

    if state.session.is_some() {
        logger().info(format!("dropping redundant connection to {remote_addr}"));
        let _ = send(receiver, Message::command("close", vec![]));
        return;
    }

    let role = if initiating { Role::Initiator } else { Role::Responder };
    let mut stream = stream;
    match negotiate(&mut stream, role) {
        Ok(protocol) => {
            logger().info(format!("connected to {remote_addr}, negotiated protocol '{protocol}'"));
            state.conn_state = ConnectionState::Connected;
            state.remote_addr = Some(remote_addr);
            state.session = Some(receiver);
            state.protocol = Some(protocol.clone());
            state.conn = Some(stream);
            state.events.connected.send(vec![Value::Addr(remote_addr)]);
            state.events.protocol_negotiated.send(vec![Value::from(protocol)]);
            let _ = send(receiver, Message::command("receive", vec![]));
        }
        Err(e) => {
            logger().error(format!("protocol negotiation with {remote_addr} failed: {e}"));
            let _ = send(receiver, Message::command("close", vec![]));
        }
    }
}

fn close_connection(state: &mut MessengerState) {
    if let Some(conn) = state.conn.take() {
        logger().info(format!("disconnecting from {:?}", state.remote_addr));
        let _ = conn.shutdown(Shutdown::Both);
    }
    // `disconnect` unblocks any outstanding accept the same way it unblocks
    // an established connection's receive loop: nothing to do if none is
    // pending.
    cancel_pending_accept(state);
    state.protocol = None;
    state.remote_addr = None;
    state.session = None;
    state.conn_state = ConnectionState::Disconnected;
}

fn close_server(state: &mut MessengerState) {
    if let Some(server) = state.server.take() {
        let _ = SockRef::from(&*server).shutdown(Shutdown::Both);
        drop(server);
    }
}

fn accept_helper(
    server: Arc<TcpListener>,
    cancel: Arc<AtomicBool>,
    sender: Pid,
    messenger_pid: Pid,
    handoff: Arc<Handoff>,
) -> ProcessResult {
    logger().info("waiting for an incoming connection");
    match server.accept() {
        Ok((conn, remote_addr)) => start_session(conn, remote_addr, false, sender, messenger_pid, handoff),
        Err(e) => {
            // A shutdown we ourselves triggered (via `cancel_pending_accept`)
            // surfaces here as a plain accept() error indistinguishable at
            // the OS level from a real failure; the cancellation flag is
            // what tells them apart, so only a genuine failure gets reported.
            if !cancel.load(Ordering::SeqCst) {
                let _ = send(sender, Message::event("accept-error", vec![Value::from(e.to_string())]));
            } else {
                logger().info("pending accept cancelled by disconnect/stop");
            }
            Ok(())
        }
    }
}

fn connect_helper(addr: SocketAddr, sender: Pid, messenger_pid: Pid, handoff: Arc<Handoff>) -> ProcessResult {
    logger().info(format!("connecting to {addr}"));
    match TcpStream::connect(addr) {
        Ok(conn) => start_session(conn, addr, true, sender, messenger_pid, handoff),
        Err(e) => {
            let _ = send(sender, Message::event("connection-error", vec![Value::from(e.to_string())]));
            Ok(())
        }
    }
}

/// Hand the new socket's write half to the messenger via `handoff`, notify
/// it, then wait to be told whether to start reading or to drop the
/// connection as redundant.
fn start_session(
    conn: TcpStream,
    remote_addr: SocketAddr,
    initiating: bool,
    sender: Pid,
    messenger_pid: Pid,
    handoff: Arc<Handoff>,
) -> ProcessResult {
    let messenger_handle = conn
        .try_clone()
        .map_err(|e| crate::process::Exit::Reason(Some(format!("failed to clone the socket: {e}"))))?;
    *handoff.stream.lock().unwrap() = Some(messenger_handle);
    send(messenger_pid, Message::event("connected", vec![Value::Addr(remote_addr), Value::Bool(initiating)]))?;

    let reply = receive()?;
    if reply.tag() == "receive" {
        read_loop(conn, sender, messenger_pid)
    } else {
        Ok(())
    }
}

fn read_loop(mut conn: TcpStream, sender: Pid, messenger_pid: Pid) -> ProcessResult {
    loop {
        match read_frame(&mut conn) {
            Ok(payload) => match decode_message(&payload) {
                Ok(message) => {
                    let _ = send(sender, message);
                }
                Err(e) => logger().warn(format!("dropping an unreadable message: {e}")),
            },
            Err(_) => break,
        }
    }
    let _ = try_send(messenger_pid, Message::event("end-of-stream", vec![Value::Pid(sender)]));
    Ok(())
}
