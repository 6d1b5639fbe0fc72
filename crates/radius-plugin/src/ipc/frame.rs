//! Frame codec shared by both ends of a worker channel
//!
//! Every message is one frame: a 4-byte big-endian payload length followed
//! by the payload. A payload is a sequence of tagged primitives:
//!
//! ```text
//! 0x01 | i32 (4 bytes, big-endian)
//! 0x02 | u32 length | UTF-8 bytes
//! 0x03 | u32 length | opaque bytes (may be empty)
//! ```

use thiserror::Error;

/// Upper bound on a frame payload; larger prefixes mean the stream is desynchronized.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

const TAG_INT: u8 = 0x01;
const TAG_STR: u8 = 0x02;
const TAG_BUF: u8 = 0x03;

/// Payload decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("payload truncated: needed {needed} bytes, {available} left")]
    Truncated { needed: usize, available: usize },

    #[error("expected {expected} field, found tag {found:#04x}")]
    UnexpectedTag { expected: &'static str, found: u8 },

    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: i64 },

    #[error("unknown opcode: {0}")]
    UnknownOpcode(i32),

    #[error("unknown status: {0}")]
    UnknownStatus(i32),

    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),

    #[error("payload too large: {0} bytes")]
    TooLarge(usize),
}

/// Builds one frame payload.
#[derive(Debug, Default)]
pub struct FrameWriter {
    payload: Vec<u8>,
}

impl FrameWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_int(&mut self, value: i32) -> &mut Self {
        self.payload.push(TAG_INT);
        self.payload.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn put_str(&mut self, value: &str) -> &mut Self {
        self.put_bytes(TAG_STR, value.as_bytes())
    }

    pub fn put_buf(&mut self, value: &[u8]) -> &mut Self {
        self.put_bytes(TAG_BUF, value)
    }

    fn put_bytes(&mut self, tag: u8, value: &[u8]) -> &mut Self {
        self.payload.push(tag);
        self.payload
            .extend_from_slice(&(value.len() as u32).to_be_bytes());
        self.payload.extend_from_slice(value);
        self
    }

    /// The finished payload, checked against [`MAX_FRAME_LEN`].
    pub fn finish(self) -> Result<Vec<u8>, FrameError> {
        if self.payload.len() > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge(self.payload.len()));
        }
        Ok(self.payload)
    }
}

/// Reads primitives back out of a payload, in order.
#[derive(Debug)]
pub struct FrameReader<'a> {
    data: &'a [u8],
}

impl<'a> FrameReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        FrameReader { data }
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], FrameError> {
        if self.data.len() < needed {
            return Err(FrameError::Truncated {
                needed,
                available: self.data.len(),
            });
        }
        let (head, rest) = self.data.split_at(needed);
        self.data = rest;
        Ok(head)
    }

    fn expect_tag(&mut self, tag: u8, expected: &'static str) -> Result<(), FrameError> {
        let found = self.take(1)?[0];
        if found != tag {
            return Err(FrameError::UnexpectedTag { expected, found });
        }
        Ok(())
    }

    fn take_u32(&mut self) -> Result<u32, FrameError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn get_int(&mut self) -> Result<i32, FrameError> {
        self.expect_tag(TAG_INT, "int")?;
        Ok(self.take_u32()? as i32)
    }

    pub fn get_str(&mut self) -> Result<String, FrameError> {
        self.expect_tag(TAG_STR, "string")?;
        let len = self.take_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| FrameError::InvalidUtf8)
    }

    pub fn get_buf(&mut self) -> Result<Vec<u8>, FrameError> {
        self.expect_tag(TAG_BUF, "buffer")?;
        let len = self.take_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Fail if anything is left unread.
    pub fn finish(self) -> Result<(), FrameError> {
        if self.data.is_empty() {
            Ok(())
        } else {
            Err(FrameError::TrailingBytes(self.data.len()))
        }
    }
}

/// Length prefix for a payload about to be written.
pub fn length_prefix(payload: &[u8]) -> [u8; 4] {
    (payload.len() as u32).to_be_bytes()
}

/// Validate a received length prefix.
pub fn parse_length_prefix(prefix: [u8; 4]) -> Option<usize> {
    let len = u32::from_be_bytes(prefix) as usize;
    (len <= MAX_FRAME_LEN).then_some(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_fields() {
        let mut writer = FrameWriter::new();
        writer.put_int(-7).put_str("héllo").put_buf(&[]).put_buf(&[0, 255]);
        let payload = writer.finish().unwrap();

        let mut reader = FrameReader::new(&payload);
        assert_eq!(reader.get_int().unwrap(), -7);
        assert_eq!(reader.get_str().unwrap(), "héllo");
        assert!(reader.get_buf().unwrap().is_empty());
        assert_eq!(reader.get_buf().unwrap(), vec![0, 255]);
        assert!(reader.finish().is_ok());
    }

    #[test]
    fn test_wire_layout() {
        let mut writer = FrameWriter::new();
        writer.put_int(1).put_str("ab");
        assert_eq!(
            writer.finish().unwrap(),
            vec![0x01, 0, 0, 0, 1, 0x02, 0, 0, 0, 2, b'a', b'b']
        );
    }

    #[test]
    fn test_type_mismatch() {
        let mut writer = FrameWriter::new();
        writer.put_str("1");
        let payload = writer.finish().unwrap();
        assert_eq!(
            FrameReader::new(&payload).get_int(),
            Err(FrameError::UnexpectedTag {
                expected: "int",
                found: 0x02
            })
        );
    }

    #[test]
    fn test_truncated_string() {
        let payload = [0x02, 0, 0, 0, 9, b'a'];
        assert!(matches!(
            FrameReader::new(&payload).get_str(),
            Err(FrameError::Truncated { needed: 9, available: 1 })
        ));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut writer = FrameWriter::new();
        writer.put_int(1).put_int(2);
        let payload = writer.finish().unwrap();
        let mut reader = FrameReader::new(&payload);
        reader.get_int().unwrap();
        assert_eq!(reader.finish(), Err(FrameError::TrailingBytes(5)));
    }

    #[test]
    fn test_oversized_payload() {
        let mut writer = FrameWriter::new();
        writer.put_buf(&vec![0u8; MAX_FRAME_LEN]);
        assert!(matches!(writer.finish(), Err(FrameError::TooLarge(_))));
        assert_eq!(parse_length_prefix((MAX_FRAME_LEN as u32 + 1).to_be_bytes()), None);
        assert_eq!(parse_length_prefix(12u32.to_be_bytes()), Some(12));
    }
}
