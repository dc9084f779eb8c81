//! Length-prefixed framing for envelopes and array payloads.
//!
//! Every frame is a 4-byte **little-endian** `u32` length followed by that
//! many bytes. A message is one JSON envelope frame, then one raw array
//! frame when the envelope sets `has_A`.
//!
//! ```text
//! +----------------+---------------+   +----------------+-------------+
//! | Length (4B LE) | JSON envelope |   | Length (4B LE) | array bytes |
//! +----------------+---------------+   +----------------+-------------+
//!                                        (only when has_A is true)
//! ```

use std::io::{ErrorKind, Read, Write};

use crate::array::ArrayPayload;
use crate::protocol::{Envelope, MAX_MESSAGE_SIZE, Message, ProxyError};

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// Read one frame.
///
/// Returns `Ok(None)` if the stream reaches EOF before the length prefix
/// (clean disconnect).
pub fn read_frame(reader: &mut impl Read) -> Result<Option<Vec<u8>>, ProxyError> {
    let mut len_buf = [0_u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(ProxyError::Io(e)),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(ProxyError::PayloadTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut data = vec![0_u8; len];
    reader.read_exact(&mut data).map_err(eof_is_truncation)?;
    Ok(Some(data))
}

/// Write one frame. Does not flush.
pub fn write_frame(writer: &mut impl Write, data: &[u8]) -> Result<(), ProxyError> {
    let too_large = || ProxyError::PayloadTooLarge {
        size: data.len(),
        max: MAX_MESSAGE_SIZE,
    };
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(too_large());
    }
    let len = u32::try_from(data.len()).map_err(|_| too_large())?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(data)?;
    Ok(())
}

fn eof_is_truncation(e: std::io::Error) -> ProxyError {
    if e.kind() == ErrorKind::UnexpectedEof {
        ProxyError::UnexpectedEof
    } else {
        ProxyError::Io(e)
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Read an envelope and, if it declares one, the array after it.
///
/// Returns `Ok(None)` on a clean disconnect before the envelope.
pub fn read_message(reader: &mut impl Read) -> Result<Option<Message>, ProxyError> {
    let Some(frame) = read_frame(reader)? else {
        return Ok(None);
    };
    let envelope: Envelope = serde_json::from_slice(&frame)?;

    let payload = if envelope.has_array {
        let (dtype, shape) = envelope.array_meta()?;
        ArrayPayload::byte_len(dtype, &shape)?;
        let data = read_frame(reader)?.ok_or(ProxyError::UnexpectedEof)?;
        Some(ArrayPayload::from_bytes(dtype, shape, data)?)
    } else {
        None
    };

    Ok(Some(Message { envelope, payload }))
}

/// Write `message`, deriving `has_A`/`A_dtype`/`A_shape` from its payload,
/// then flush.
pub fn write_message(writer: &mut impl Write, message: &Message) -> Result<(), ProxyError> {
    let mut envelope = message.envelope.clone();
    envelope.describe(message.payload.as_ref());

    write_frame(writer, &serde_json::to_vec(&envelope)?)?;
    if let Some(payload) = &message.payload {
        write_frame(writer, payload.as_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::array::DType;
    use crate::protocol::Command;

    fn encode(message: &Message) -> Vec<u8> {
        let mut buf = Vec::new();
        write_message(&mut buf, message).unwrap();
        buf
    }

    #[test]
    fn envelope_only_message() {
        let msg = Message::new(Envelope::request(Command::Reset));
        let buf = encode(&msg);

        let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(len, buf.len() - 4);

        let back = read_message(&mut Cursor::new(&buf)).unwrap().unwrap();
        assert_eq!(back.envelope.cmd.as_deref(), Some("reset"));
        assert!(back.payload.is_none());
    }

    #[test]
    fn array_follows_envelope() {
        let values = [1.5_f32, -2.25, 3.0, f32::EPSILON];
        let msg = Message::new(Envelope::request(Command::Step))
            .with_payload(ArrayPayload::from_slice(&values));
        let buf = encode(&msg);

        let back = read_message(&mut Cursor::new(&buf)).unwrap().unwrap();
        assert!(back.envelope.has_array);
        let payload = back.payload.unwrap();
        assert_eq!(payload.dtype(), DType::Float32);
        assert_eq!(payload.shape(), &[4]);
        let bits: Vec<u32> = payload.to_vec::<f32>().unwrap().iter().map(|v| v.to_bits()).collect();
        let expected: Vec<u32> = values.iter().map(|v| v.to_bits()).collect();
        assert_eq!(bits, expected);
    }

    #[test]
    fn messages_in_sequence_then_eof() {
        let mut buf = encode(&Message::new(Envelope::request(Command::Setup)));
        buf.extend(encode(
            &Message::new(Envelope::request(Command::Seed)).with_payload(ArrayPayload::scalar(7_u64)),
        ));

        let mut cursor = Cursor::new(&buf);
        let first = read_message(&mut cursor).unwrap().unwrap();
        let second = read_message(&mut cursor).unwrap().unwrap();
        assert_eq!(first.envelope.cmd.as_deref(), Some("setup"));
        assert_eq!(second.payload.unwrap().to_scalar::<u64>().unwrap(), 7);
        assert!(read_message(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn missing_array_frame_is_unexpected_eof() {
        let mut envelope = Envelope::request(Command::Step);
        envelope.describe(Some(&ArrayPayload::from_slice(&[1.0_f64])));
        let mut buf = Vec::new();
        write_frame(&mut buf, &serde_json::to_vec(&envelope).unwrap()).unwrap();

        let err = read_message(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, ProxyError::UnexpectedEof));
    }

    #[test]
    fn truncated_frame_is_unexpected_eof() {
        let mut buf = 10_u32.to_le_bytes().to_vec();
        buf.extend_from_slice(b"abc");
        let err = read_frame(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, ProxyError::UnexpectedEof));
    }

    #[test]
    fn oversized_length_is_rejected() {
        let fake_len = (u32::try_from(MAX_MESSAGE_SIZE).unwrap() + 1).to_le_bytes();
        let err = read_frame(&mut Cursor::new(fake_len.to_vec())).unwrap_err();
        assert!(matches!(err, ProxyError::PayloadTooLarge { .. }));
    }

    #[test]
    fn invalid_json_is_an_error() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"not json at all").unwrap();
        let err = read_message(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, ProxyError::Json(_)));
    }

    #[test]
    fn overflowing_declared_shape_is_an_array_error() {
        let mut buf = Vec::new();
        write_frame(
            &mut buf,
            br#"{"cmd":"step","has_A":true,"A_dtype":"float64","A_shape":[4294967296,4294967296]}"#,
        )
        .unwrap();
        write_frame(&mut buf, &[0_u8; 8]).unwrap();

        let err = read_message(&mut Cursor::new(&buf)).unwrap_err();
        assert!(
            matches!(err, ProxyError::Array(crate::array::ArrayError::ShapeOverflow(_))),
            "{err:?}"
        );
    }

    #[test]
    fn byte_count_must_match_declared_shape() {
        let mut envelope = Envelope::request(Command::Step);
        envelope.describe(Some(&ArrayPayload::from_slice(&[1.0_f64, 2.0])));
        let mut buf = Vec::new();
        write_frame(&mut buf, &serde_json::to_vec(&envelope).unwrap()).unwrap();
        write_frame(&mut buf, &[0_u8; 8]).unwrap();

        let err = read_message(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, ProxyError::Array(_)));
    }
}
