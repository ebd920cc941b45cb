//! Structural messages exchanged between processes and, for a subset of
//! kinds, across the wire.

use crate::value::{Pattern, Value};

/// One 1024-byte (or shorter, for the last one) chunk of a file transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub transfer_id: u32,
    pub block_id: u32,
    pub data: Vec<u8>,
}

/// A message passed between processes, or (for the `Request`/`Response`/
/// `Notification`/`Block` kinds) across the wire once a protocol has been
/// negotiated.
///
/// `Command` and `Event` never leave the process that produced them; they
/// are the vocabulary processes use to talk to each other locally (e.g. a
/// caller telling the messenger to `connect`, or the messenger telling a
/// subscriber it is `listening`).
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Command { tag: String, params: Vec<Value> },
    Event { tag: String, params: Vec<Value> },
    Request { tag: String, trans_id: u64, params: Vec<Value> },
    Response { tag: String, trans_id: u64, params: Vec<Value> },
    Notification { tag: String, trans_id: u64, params: Vec<Value> },
    Block(Block),
}

impl Message {
    pub fn command(tag: impl Into<String>, params: impl Into<Vec<Value>>) -> Self {
        Message::Command { tag: tag.into(), params: params.into() }
    }

    pub fn event(tag: impl Into<String>, params: impl Into<Vec<Value>>) -> Self {
        Message::Event { tag: tag.into(), params: params.into() }
    }

    pub fn request(tag: impl Into<String>, trans_id: u64, params: impl Into<Vec<Value>>) -> Self {
        Message::Request { tag: tag.into(), trans_id, params: params.into() }
    }

    pub fn response(tag: impl Into<String>, trans_id: u64, params: impl Into<Vec<Value>>) -> Self {
        Message::Response { tag: tag.into(), trans_id, params: params.into() }
    }

    pub fn notification(tag: impl Into<String>, trans_id: u64, params: impl Into<Vec<Value>>) -> Self {
        Message::Notification { tag: tag.into(), trans_id, params: params.into() }
    }

    pub fn tag(&self) -> &str {
        match self {
            Message::Command { tag, .. }
            | Message::Event { tag, .. }
            | Message::Request { tag, .. }
            | Message::Response { tag, .. }
            | Message::Notification { tag, .. } => tag,
            Message::Block(_) => "block",
        }
    }

    pub fn params(&self) -> &[Value] {
        match self {
            Message::Command { params, .. }
            | Message::Event { params, .. }
            | Message::Request { params, .. }
            | Message::Response { params, .. }
            | Message::Notification { params, .. } => params,
            Message::Block(_) => &[],
        }
    }

    pub fn trans_id(&self) -> Option<u64> {
        match self {
            Message::Request { trans_id, .. }
            | Message::Response { trans_id, .. }
            | Message::Notification { trans_id, .. } => Some(*trans_id),
            _ => None,
        }
    }

    /// Turn this message into a [`Value::Seq`] so it can be matched
    /// against a [`Pattern`] the same way every other structural value is.
    pub fn as_value(&self) -> Value {
        let kind = match self {
            Message::Command { .. } => "Command",
            Message::Event { .. } => "Event",
            Message::Request { .. } => "Request",
            Message::Response { .. } => "Response",
            Message::Notification { .. } => "Notification",
            Message::Block(_) => "Block",
        };
        let mut items = vec![Value::Str(kind.into()), Value::Str(self.tag().into())];
        items.extend(self.params().iter().cloned());
        Value::Seq(items)
    }
}

/// Build a pattern matching a message shape: `(kind, tag, param patterns...)`.
pub fn message_pattern(kind: &str, tag: &str, params: Vec<Pattern>) -> Pattern {
    let mut items = vec![
        Pattern::Exact(Value::Str(kind.into())),
        Pattern::Exact(Value::Str(tag.into())),
    ];
    items.extend(params);
    Pattern::Seq(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{matches, ValueKind};

    #[test]
    fn command_pattern_matches_shape() {
        let m = Message::command("stop", vec![]);
        let p = message_pattern("Command", "stop", vec![]);
        assert!(matches(&p, &m.as_value()));
    }

    #[test]
    fn request_carries_trans_id_separately_from_params() {
        let m = Message::request("swap", 1, vec![Value::from("foo"), Value::from("bar")]);
        assert_eq!(m.trans_id(), Some(1));
        assert_eq!(m.params().len(), 2);
        let p = message_pattern(
            "Request",
            "swap",
            vec![Pattern::OfType(ValueKind::Str), Pattern::OfType(ValueKind::Str)],
        );
        assert!(matches(&p, &m.as_value()));
    }
}
