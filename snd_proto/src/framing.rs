//! Length-prefixed framing over the control socket: `{length: u32, id: u32,
//! payload}`, little-endian, where `length` counts the whole frame.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{ProtoError, Result};
use crate::message::{MessageId, HEADER_LEN};

pub struct Frame {
    pub id: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(id: MessageId, payload: Vec<u8>) -> Self {
        Self { id: id as u32, payload }
    }

    pub fn write_to(&self, w: &mut impl Write) -> Result<()> {
        let total_len = HEADER_LEN + self.payload.len();
        w.write_u32::<LittleEndian>(total_len as u32)?;
        w.write_u32::<LittleEndian>(self.id)?;
        w.write_all(&self.payload)?;
        Ok(())
    }

    /// Reads one frame. A short read on the header itself (peer closed
    /// mid-header) surfaces as [`ProtoError::Truncated`], distinct from a
    /// clean EOF before any bytes arrive, which callers should treat as
    /// "no more messages" rather than a protocol violation.
    pub fn read_from(r: &mut impl Read) -> Result<Option<Self>> {
        let mut len_buf = [0u8; 4];
        match read_exact_or_eof(r, &mut len_buf)? {
            false => return Ok(None),
            true => {}
        }
        let total_len = u32::from_le_bytes(len_buf) as usize;
        if total_len < HEADER_LEN {
            return Err(ProtoError::Truncated);
        }
        let id = r.read_u32::<LittleEndian>().map_err(|_| ProtoError::Truncated)?;
        let payload_len = total_len - HEADER_LEN;
        let mut payload = vec![0u8; payload_len];
        r.read_exact(&mut payload).map_err(|_| ProtoError::Truncated)?;
        Ok(Some(Frame { id, payload }))
    }
}

/// Like `Read::read_exact`, but a zero-byte read before any data lands is
/// reported as a clean EOF (`Ok(false)`) instead of an error.
fn read_exact_or_eof(r: &mut impl Read, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..])?;
        if n == 0 {
            return if filled == 0 { Ok(false) } else { Err(ProtoError::Truncated) };
        }
        filled += n;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frame_round_trips_through_a_buffer() {
        let frame = Frame::new(MessageId::DisconnectStream, vec![1, 2, 3, 4]);
        let mut buf = Vec::new();
        frame.write_to(&mut buf).unwrap();

        let mut cursor = Cursor::new(buf);
        let read = Frame::read_from(&mut cursor).unwrap().unwrap();
        assert_eq!(read.id, MessageId::DisconnectStream as u32);
        assert_eq!(read.payload, vec![1, 2, 3, 4]);
    }

    #[test]
    fn clean_eof_before_any_bytes_is_not_an_error() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(Frame::read_from(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn truncated_header_is_an_error() {
        let mut cursor = Cursor::new(vec![1u8, 2, 3]);
        assert!(Frame::read_from(&mut cursor).is_err());
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&100u32.to_le_bytes());
        buf.extend_from_slice(&(MessageId::ConnectStream as u32).to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]);
        let mut cursor = Cursor::new(buf);
        assert!(Frame::read_from(&mut cursor).is_err());
    }
}
