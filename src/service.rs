//! A thin façade over a [`TcpMessenger`]: transaction ID allocation and
//! bind/connect/disconnect orchestration for a request/response session.
//!
//! `Session` does not spawn a process of its own. A caller's own process —
//! already attached or spawned — owns one directly; because `bind`/
//! `connect`/`accept` resolve the calling process as the messenger's
//! `senderPid`, every decoded `Request`/`Response`/`Notification`/`Block`
//! lands in that same process' mailbox, right alongside whatever other
//! patterns its own [`crate::process::Loop`] dispatches on.

use std::net::SocketAddr;

use crate::message::Message;
use crate::net::TcpMessenger;
use crate::value::Value;

/// Session-level orchestration over one [`TcpMessenger`]: which address (if
/// any) it is bound to, and the next transaction ID to hand out.
pub struct Session {
    messenger: TcpMessenger,
    bind_addr: Option<SocketAddr>,
    next_trans_id: u64,
}

impl Session {
    pub fn new() -> Self {
        Self { messenger: TcpMessenger::new(), bind_addr: None, next_trans_id: 1 }
    }

    pub fn messenger(&self) -> &TcpMessenger {
        &self.messenger
    }

    /// Bind as a server on `addr` and start accepting, if not already
    /// bound. A no-op on a second call, matching the original's
    /// "first bind wins" behavior.
    pub fn bind(&mut self, addr: SocketAddr) {
        if self.bind_addr.is_none() {
            self.bind_addr = Some(addr);
            self.messenger.listen(addr);
            self.messenger.accept();
        }
    }

    pub fn connect(&self, addr: SocketAddr) {
        self.messenger.connect(addr);
    }

    pub fn disconnect(&self) {
        self.messenger.disconnect();
    }

    /// Call upon observing the messenger's `disconnected` event: if this
    /// session is a bound server, re-arm `accept` for the next client.
    pub fn on_disconnected(&self) {
        if self.bind_addr.is_some() {
            self.messenger.accept();
        }
    }

    fn next_trans_id(&mut self) -> u64 {
        let id = self.next_trans_id;
        self.next_trans_id += 1;
        id
    }

    /// Send a request, tagging it with a freshly allocated transaction ID,
    /// and return that ID so the caller can match the eventual response.
    pub fn send_request(&mut self, tag: impl Into<String>, params: Vec<Value>) -> u64 {
        let trans_id = self.next_trans_id();
        self.messenger.send_message(&Message::request(tag, trans_id, params));
        trans_id
    }

    /// Answer a request, reusing its transaction ID.
    pub fn send_response(&self, tag: impl Into<String>, trans_id: u64, params: Vec<Value>) {
        self.messenger.send_message(&Message::response(tag, trans_id, params));
    }

    pub fn send_notification(&mut self, tag: impl Into<String>, params: Vec<Value>) -> u64 {
        let trans_id = self.next_trans_id();
        self.messenger.send_message(&Message::notification(tag, trans_id, params));
        trans_id
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
