//! SPARKv1's typed-message codec: how a [`Message`] becomes (and comes
//! back from) the bytes carried by one wire frame.
//!
//! Every value serializes to a single whitespace-free token, so a whole
//! message is one space-separated line. Strings and byte strings are
//! hex-encoded to keep that property; everything else has an obvious
//! ASCII representation.

use crate::error::WireError;
use crate::message::{Block, Message};
use crate::process::Pid;
use crate::value::Value;

pub fn encode_message(message: &Message) -> Vec<u8> {
    let mut tokens = Vec::new();
    match message {
        Message::Command { tag, params } => {
            tokens.push("Command".to_string());
            tokens.push(tag.clone());
            encode_params(params, &mut tokens);
        }
        Message::Event { tag, params } => {
            tokens.push("Event".to_string());
            tokens.push(tag.clone());
            encode_params(params, &mut tokens);
        }
        Message::Request { tag, trans_id, params } => {
            tokens.push("Request".to_string());
            tokens.push(tag.clone());
            tokens.push(trans_id.to_string());
            encode_params(params, &mut tokens);
        }
        Message::Response { tag, trans_id, params } => {
            tokens.push("Response".to_string());
            tokens.push(tag.clone());
            tokens.push(trans_id.to_string());
            encode_params(params, &mut tokens);
        }
        Message::Notification { tag, trans_id, params } => {
            tokens.push("Notification".to_string());
            tokens.push(tag.clone());
            tokens.push(trans_id.to_string());
            encode_params(params, &mut tokens);
        }
        Message::Block(block) => {
            tokens.push("Block".to_string());
            tokens.push(block.transfer_id.to_string());
            tokens.push(block.block_id.to_string());
            tokens.push(hex_encode(&block.data));
        }
    }
    tokens.join(" ").into_bytes()
}

pub fn decode_message(payload: &[u8]) -> Result<Message, WireError> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| WireError::Malformed("message payload is not UTF-8".into()))?;
    let mut tokens = text.split(' ').filter(|t| !t.is_empty());

    let kind = tokens.next().ok_or_else(|| WireError::Malformed("empty message".into()))?;
    match kind {
        "Command" => {
            let tag = next_token(&mut tokens)?;
            Ok(Message::Command { tag, params: decode_params(&mut tokens)? })
        }
        "Event" => {
            let tag = next_token(&mut tokens)?;
            Ok(Message::Event { tag, params: decode_params(&mut tokens)? })
        }
        "Request" => {
            let tag = next_token(&mut tokens)?;
            let trans_id = next_token(&mut tokens)?
                .parse()
                .map_err(|_| WireError::Malformed("bad transaction id".into()))?;
            Ok(Message::Request { tag, trans_id, params: decode_params(&mut tokens)? })
        }
        "Response" => {
            let tag = next_token(&mut tokens)?;
            let trans_id = next_token(&mut tokens)?
                .parse()
                .map_err(|_| WireError::Malformed("bad transaction id".into()))?;
            Ok(Message::Response { tag, trans_id, params: decode_params(&mut tokens)? })
        }
        "Notification" => {
            let tag = next_token(&mut tokens)?;
            let trans_id = next_token(&mut tokens)?
                .parse()
                .map_err(|_| WireError::Malformed("bad transaction id".into()))?;
            Ok(Message::Notification { tag, trans_id, params: decode_params(&mut tokens)? })
        }
        "Block" => {
            let transfer_id = next_token(&mut tokens)?
                .parse()
                .map_err(|_| WireError::Malformed("bad transfer id".into()))?;
            let block_id = next_token(&mut tokens)?
                .parse()
                .map_err(|_| WireError::Malformed("bad block id".into()))?;
            let data = hex_decode(&next_token(&mut tokens)?)?;
            Ok(Message::Block(Block { transfer_id, block_id, data }))
        }
        other => Err(WireError::Malformed(format!("unknown message kind '{other}'"))),
    }
}

fn next_token<'a, I: Iterator<Item = &'a str>>(tokens: &mut I) -> Result<String, WireError> {
    tokens
        .next()
        .map(str::to_owned)
        .ok_or_else(|| WireError::Malformed("message ended early".into()))
}

fn encode_params(params: &[Value], tokens: &mut Vec<String>) {
    for param in params {
        encode_value(param, tokens);
    }
}

fn decode_params<'a, I: Iterator<Item = &'a str>>(tokens: &mut I) -> Result<Vec<Value>, WireError> {
    let mut params = Vec::new();
    let mut tokens = tokens.peekable();
    while tokens.peek().is_some() {
        params.push(decode_value(&mut tokens)?);
    }
    Ok(params)
}

fn encode_value(value: &Value, tokens: &mut Vec<String>) {
    match value {
        Value::Unit => tokens.push("U".to_string()),
        Value::Bool(b) => tokens.push(format!("B:{}", if *b { 1 } else { 0 })),
        Value::Int(i) => tokens.push(format!("I:{i}")),
        Value::UInt(u) => tokens.push(format!("N:{u}")),
        Value::Str(s) => tokens.push(format!("S:{}", hex_encode(s.as_bytes()))),
        Value::Bytes(b) => tokens.push(format!("Y:{}", hex_encode(b))),
        Value::Addr(addr) => tokens.push(format!("A:{addr}")),
        Value::Pid(pid) => tokens.push(format!("P:{}", pid.as_u64())),
        Value::Seq(items) => {
            tokens.push(format!("Q:{}", items.len()));
            for item in items {
                encode_value(item, tokens);
            }
        }
    }
}

fn decode_value<'a, I: Iterator<Item = &'a str>>(
    tokens: &mut std::iter::Peekable<I>,
) -> Result<Value, WireError> {
    let token = tokens.next().ok_or_else(|| WireError::Malformed("missing value".into()))?;
    let (tag, rest) = token.split_once(':').unwrap_or((token, ""));
    match tag {
        "U" => Ok(Value::Unit),
        "B" => Ok(Value::Bool(rest == "1")),
        "I" => rest.parse().map(Value::Int).map_err(|_| WireError::Malformed(format!("bad int '{rest}'"))),
        "N" => rest.parse().map(Value::UInt).map_err(|_| WireError::Malformed(format!("bad uint '{rest}'"))),
        "S" => {
            let bytes = hex_decode(rest)?;
            String::from_utf8(bytes)
                .map(Value::Str)
                .map_err(|_| WireError::Malformed("string value is not UTF-8".into()))
        }
        "Y" => hex_decode(rest).map(Value::Bytes),
        "A" => rest.parse().map(Value::Addr).map_err(|_| WireError::Malformed(format!("bad address '{rest}'"))),
        "P" => rest
            .parse::<u64>()
            .map(|n| Value::Pid(Pid(n)))
            .map_err(|_| WireError::Malformed(format!("bad pid '{rest}'"))),
        "Q" => {
            let count: usize = rest.parse().map_err(|_| WireError::Malformed(format!("bad seq length '{rest}'")))?;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(decode_value(tokens)?);
            }
            Ok(Value::Seq(items))
        }
        other => Err(WireError::Malformed(format!("unknown value tag '{other}'"))),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        s.push_str(&format!("{byte:02x}"));
    }
    s
}

fn hex_decode(s: &str) -> Result<Vec<u8>, WireError> {
    if s.len() % 2 != 0 {
        return Err(WireError::Malformed("odd-length hex string".into()));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| WireError::Malformed(format!("bad hex byte '{}'", &s[i..i + 2]))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_round_trips() {
        let m = Message::command("stop", vec![]);
        let bytes = encode_message(&m);
        assert_eq!(decode_message(&bytes).unwrap(), m);
    }

    #[test]
    fn request_with_mixed_params_round_trips() {
        let m = Message::request(
            "swap",
            7,
            vec![Value::from("alice"), Value::Int(-3), Value::Bool(true), Value::Unit],
        );
        let bytes = encode_message(&m);
        assert_eq!(decode_message(&bytes).unwrap(), m);
    }

    #[test]
    fn nested_seq_round_trips() {
        let m = Message::event(
            "batch",
            vec![Value::Seq(vec![Value::Int(1), Value::Int(2), Value::Str("x".into())])],
        );
        let bytes = encode_message(&m);
        assert_eq!(decode_message(&bytes).unwrap(), m);
    }

    #[test]
    fn block_round_trips_binary_data() {
        let data: Vec<u8> = (0..=255u8).collect();
        let m = Message::Block(Block { transfer_id: 4, block_id: 9, data });
        let bytes = encode_message(&m);
        assert_eq!(decode_message(&bytes).unwrap(), m);
    }

    #[test]
    fn string_with_spaces_round_trips() {
        let m = Message::command("greet", vec![Value::from("hello world")]);
        let bytes = encode_message(&m);
        assert_eq!(decode_message(&bytes).unwrap(), m);
    }

    #[test]
    fn unknown_kind_is_malformed() {
        assert!(matches!(decode_message(b"Bogus foo"), Err(WireError::Malformed(_))));
    }
}
