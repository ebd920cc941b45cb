//! Fan-out notifications: subscribe a PID, then broadcast a [`Message`] to
//! every subscriber without holding a lock across the send.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::message::Message;
use crate::process::{current, send, Pid};
use crate::value::Value;

/// Broadcasts a message to whichever processes have subscribed.
#[derive(Default)]
pub struct Notifier {
    subscribers: Mutex<HashSet<Pid>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self { subscribers: Mutex::new(HashSet::new()) }
    }

    /// Subscribe `pid` (or the current process, if `None`) to future
    /// notifications.
    pub fn subscribe(&self, pid: Option<Pid>) -> Option<Pid> {
        let pid = pid.or_else(current)?;
        self.subscribers.lock().unwrap().insert(pid);
        Some(pid)
    }

    pub fn unsubscribe(&self, pid: Option<Pid>) -> Option<Pid> {
        let pid = pid.or_else(current)?;
        self.subscribers.lock().unwrap().remove(&pid);
        Some(pid)
    }

    /// Send `message` to every subscriber. Subscribers are copied out from
    /// under the lock first so a slow or blocked recipient can't hold up
    /// the others; a send that fails (the recipient already exited) is
    /// silently ignored, matching the fire-and-forget nature of a
    /// notification.
    pub fn notify(&self, message: Message) {
        let subscribers = self.subscribers.lock().unwrap().clone();
        for pid in subscribers {
            let _ = send(pid, message.clone());
        }
    }
}

/// An [`Notifier`] restricted to a single event tag and parameter arity,
/// so every notification it sends has the same shape.
pub struct EventSender {
    tag: String,
    arity: usize,
    notifier: Notifier,
}

impl EventSender {
    pub fn new(tag: impl Into<String>, arity: usize) -> Self {
        Self { tag: tag.into(), arity, notifier: Notifier::new() }
    }

    pub fn subscribe(&self, pid: Option<Pid>) -> Option<Pid> {
        self.notifier.subscribe(pid)
    }

    pub fn unsubscribe(&self, pid: Option<Pid>) -> Option<Pid> {
        self.notifier.unsubscribe(pid)
    }

    /// Send `Event(tag, params...)` to every subscriber. Panics if
    /// `params.len()` doesn't match the arity fixed at construction, the
    /// same contract violation the original's `EventSender.__call__`
    /// raises a `TypeError` for.
    pub fn send(&self, params: Vec<Value>) {
        assert_eq!(
            params.len(),
            self.arity,
            "event '{}' expects {} parameter(s), got {}",
            self.tag,
            self.arity,
            params.len()
        );
        self.notifier.notify(Message::event(self.tag.clone(), params));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{attach, detach, receive};

    #[test]
    fn subscriber_receives_notifications() {
        let notifier = Notifier::new();
        let pid = attach(Some("subscriber")).unwrap();
        notifier.subscribe(Some(pid));
        notifier.notify(Message::event("tick", vec![]));
        let msg = receive().unwrap();
        assert_eq!(msg.tag(), "tick");
        detach().unwrap();
    }

    #[test]
    fn unsubscribed_process_receives_nothing() {
        let notifier = Notifier::new();
        let pid = attach(Some("bystander")).unwrap();
        notifier.subscribe(Some(pid));
        notifier.unsubscribe(Some(pid));
        notifier.notify(Message::event("tick", vec![]));
        assert!(crate::process::try_receive().unwrap().is_none());
        detach().unwrap();
    }

    #[test]
    #[should_panic(expected = "expects 1 parameter")]
    fn event_sender_rejects_the_wrong_arity() {
        let sender = EventSender::new("protocol-negotiated", 1);
        sender.send(vec![]);
    }
}
