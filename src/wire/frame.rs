use std::io::{Read, Write};

use crate::error::WireError;

/// Largest payload a single frame may carry. The length field is 4 hex
/// digits and counts `<space><payload><CR><LF>`, so the hard ceiling is
/// `0xFFFF - 3`.
pub const MAX_FRAME_PAYLOAD: usize = 0xFFFC;

/// Write one frame: a 4-hex-digit length (counting the space, payload and
/// trailing CRLF that follow), then `<space><payload>\r\n`.
pub fn write_frame<W: Write>(mut writer: W, payload: &[u8]) -> Result<(), WireError> {
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(WireError::FrameTooLarge { max: MAX_FRAME_PAYLOAD });
    }
    let framed_len = 1 + payload.len() + 2;
    writer.write_all(format!("{framed_len:04x}").as_bytes())?;
    writer.write_all(b" ")?;
    writer.write_all(payload)?;
    writer.write_all(b"\r\n")?;
    Ok(())
}

/// Read one frame, returning its payload with the leading space and
/// trailing CRLF stripped off.
pub fn read_frame<R: Read>(mut reader: R) -> Result<Vec<u8>, WireError> {
    let mut len_hex = [0u8; 4];
    if reader.read_exact(&mut len_hex).is_err() {
        return Err(WireError::Eof);
    }
    let len_str = std::str::from_utf8(&len_hex)
        .map_err(|_| WireError::Malformed("length field is not ASCII".into()))?;
    let framed_len = usize::from_str_radix(len_str, 16)
        .map_err(|_| WireError::Malformed(format!("bad length field {len_str:?}")))?;

    let mut body = vec![0u8; framed_len];
    reader.read_exact(&mut body).map_err(|_| WireError::Eof)?;

    if body.len() < 3 || body[0] != b' ' || &body[body.len() - 2..] != b"\r\n" {
        return Err(WireError::Malformed("frame body missing delimiters".into()));
    }
    Ok(body[1..body.len() - 2].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_a_short_payload() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").unwrap();
        assert_eq!(buf, b"0008 hello\r\n");
        let payload = read_frame(Cursor::new(buf)).unwrap();
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn rejects_a_payload_over_the_limit() {
        let payload = vec![0u8; MAX_FRAME_PAYLOAD + 1];
        let mut buf = Vec::new();
        assert!(matches!(
            write_frame(&mut buf, &payload),
            Err(WireError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn accepts_a_payload_right_at_the_limit() {
        let payload = vec![b'x'; MAX_FRAME_PAYLOAD];
        let mut buf = Vec::new();
        write_frame(&mut buf, &payload).unwrap();
        let read_back = read_frame(Cursor::new(buf)).unwrap();
        assert_eq!(read_back, payload);
    }

    #[test]
    fn empty_stream_is_eof() {
        let buf: Vec<u8> = Vec::new();
        assert!(matches!(read_frame(Cursor::new(buf)), Err(WireError::Eof)));
    }

    #[test]
    fn truncated_stream_is_eof() {
        let buf = b"0020 too-sh".to_vec();
        assert!(matches!(read_frame(Cursor::new(buf)), Err(WireError::Eof)));
    }
}
