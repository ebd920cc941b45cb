use std::io::{Read, Write};

use crate::error::WireError;

use super::frame::{read_frame, write_frame};
use super::SPARK_V1;

/// Which side of the connection initiated it. The two sides run mirrored
/// but distinct handshakes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Negotiate a protocol version over `stream`, returning the agreed name
/// on success. Both sides only ever agree on [`super::SPARK_V1`]; the
/// handshake still exchanges a proposed/supported list so a future second
/// protocol version could be added without changing the wire shape.
pub fn negotiate<S: Read + Write>(stream: &mut S, role: Role) -> Result<String, WireError> {
    match role {
        Role::Initiator => initiator_handshake(stream),
        Role::Responder => responder_handshake(stream),
    }
}

fn initiator_handshake<S: Read + Write>(stream: &mut S) -> Result<String, WireError> {
    write_text(stream, &format!("supports {SPARK_V1}"))?;
    let remote_choice = read_protocol_message(stream)?;
    if remote_choice != SPARK_V1 {
        return Err(WireError::Negotiation(format!(
            "protocol '{remote_choice}' is not supported"
        )));
    }
    write_text(stream, &format!("protocol {remote_choice}"))?;
    Ok(remote_choice)
}

fn responder_handshake<S: Read + Write>(stream: &mut S) -> Result<String, WireError> {
    let proposed = read_supported_message(stream)?;
    let choice = proposed
        .iter()
        .find(|name| name.as_str() == SPARK_V1)
        .cloned()
        .ok_or_else(|| WireError::Negotiation("no protocol in the proposed list is supported".into()))?;
    write_text(stream, &format!("protocol {choice}"))?;
    let remote_choice = read_protocol_message(stream)?;
    if remote_choice != choice {
        return Err(WireError::Negotiation(format!(
            "the remote peer chose another protocol: '{remote_choice}' (was '{choice}')"
        )));
    }
    Ok(remote_choice)
}

fn write_text<S: Write>(stream: &mut S, text: &str) -> Result<(), WireError> {
    write_frame(stream, text.as_bytes())
}

fn read_text<S: Read>(stream: &mut S) -> Result<String, WireError> {
    let bytes = read_frame(stream)?;
    if bytes.is_empty() {
        return Err(WireError::Eof);
    }
    String::from_utf8(bytes).map_err(|_| WireError::Malformed("negotiation message is not UTF-8".into()))
}

fn read_supported_message<S: Read>(stream: &mut S) -> Result<Vec<String>, WireError> {
    let text = read_text(stream)?;
    let mut chunks = text.split(' ');
    match chunks.next() {
        Some("supports") => {
            let names: Vec<String> = chunks.map(str::to_owned).collect();
            if names.is_empty() {
                Err(WireError::Negotiation("expected at least one protocol name".into()))
            } else {
                Ok(names)
            }
        }
        Some("not-supported") => Err(WireError::Negotiation("the remote peer returned an error".into())),
        Some(other) => Err(WireError::Negotiation(format!("expected 'supports', read '{other}'"))),
        None => Err(WireError::Negotiation("empty negotiation message".into())),
    }
}

fn read_protocol_message<S: Read>(stream: &mut S) -> Result<String, WireError> {
    let text = read_text(stream)?;
    let mut chunks = text.split(' ');
    match chunks.next() {
        Some("protocol") => chunks
            .next()
            .map(str::to_owned)
            .ok_or_else(|| WireError::Negotiation("expected a protocol name".into())),
        Some("not-supported") => Err(WireError::Negotiation("the remote peer returned an error".into())),
        Some(other) => Err(WireError::Negotiation(format!("expected 'protocol', read '{other}'"))),
        None => Err(WireError::Negotiation("empty negotiation message".into())),
    }
}
