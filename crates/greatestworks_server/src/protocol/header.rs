//! Fixed-width binary message header.

use super::types::{MessageFlags, MessageType};
use crate::error::ProtocolError;

/// Sentinel at the start of every header ("GWMS").
pub const MESSAGE_MAGIC: u32 = 0x4757_4D53;

/// Encoded header length in bytes.
pub const HEADER_SIZE: usize = 44;

/// Message header, encoded big-endian in field order.
///
/// | field | type |
/// |---|---|
/// | magic | u32 |
/// | message_id | u64 |
/// | message_type | u32 |
/// | flags | u32 |
/// | player_id | u64 |
/// | timestamp | i64 (unix seconds) |
/// | sequence | u64 |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub magic: u32,
    /// Correlates a reply with its request
    pub message_id: u64,
    pub message_type: MessageType,
    pub flags: MessageFlags,
    /// Originating or target player, 0 before authentication
    pub player_id: u64,
    pub timestamp: i64,
    /// Per-connection counter used to detect gaps
    pub sequence: u64,
}

impl MessageHeader {
    /// Creates a request header stamped with the current time.
    pub fn new(message_type: MessageType, message_id: u64, player_id: u64) -> Self {
        Self {
            magic: MESSAGE_MAGIC,
            message_id,
            message_type,
            flags: MessageFlags::NONE,
            player_id,
            timestamp: current_timestamp(),
            sequence: 0,
        }
    }

    pub fn is_response(&self) -> bool {
        self.flags.is_response()
    }

    /// Appends the encoded header to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.reserve(HEADER_SIZE);
        buf.extend_from_slice(&self.magic.to_be_bytes());
        buf.extend_from_slice(&self.message_id.to_be_bytes());
        buf.extend_from_slice(&self.message_type.code().to_be_bytes());
        buf.extend_from_slice(&self.flags.bits().to_be_bytes());
        buf.extend_from_slice(&self.player_id.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.sequence.to_be_bytes());
    }

    /// Decodes the header at the start of `bytes`.
    ///
    /// The magic is checked before any other field is interpreted.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_SIZE {
            return Err(ProtocolError::Truncated { len: bytes.len() });
        }

        let mut cursor = Cursor { bytes, pos: 0 };
        let magic = cursor.u32();
        if magic != MESSAGE_MAGIC {
            return Err(ProtocolError::BadMagic(magic));
        }

        Ok(Self {
            magic,
            message_id: cursor.u64(),
            message_type: MessageType(cursor.u32()),
            flags: MessageFlags(cursor.u32()),
            player_id: cursor.u64(),
            timestamp: cursor.u64() as i64,
            sequence: cursor.u64(),
        })
    }
}

/// Reads fixed-width integers from a slice already checked to hold a header.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u32(&mut self) -> u32 {
        u32::from_be_bytes(self.take())
    }

    fn u64(&mut self) -> u64 {
        u64::from_be_bytes(self.take())
    }
}

/// Current unix time in seconds.
pub fn current_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = MessageHeader {
            magic: MESSAGE_MAGIC,
            message_id: 42,
            message_type: MessageType::CHAT_MESSAGE,
            flags: MessageFlags::RESPONSE,
            player_id: 7,
            timestamp: -1,
            sequence: 3,
        };
        let mut buf = Vec::new();
        header.encode_into(&mut buf);

        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(&buf[0..4], b"GWMS");
        assert_eq!(&buf[4..12], &42u64.to_be_bytes());
        assert_eq!(&buf[12..16], &0x0201u32.to_be_bytes());
        assert_eq!(&buf[16..20], &1u32.to_be_bytes());
        assert_eq!(MessageHeader::decode(&buf).unwrap(), header);
    }

    #[test]
    fn test_short_input_is_rejected() {
        let mut buf = Vec::new();
        MessageHeader::new(MessageType::PLAYER_LOGIN, 1, 0).encode_into(&mut buf);

        let err = MessageHeader::decode(&buf[..HEADER_SIZE - 1]).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { len: 43 }));
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let mut buf = Vec::new();
        MessageHeader::new(MessageType::PLAYER_LOGIN, 1, 0).encode_into(&mut buf);
        buf[0] = b'X';

        assert!(matches!(
            MessageHeader::decode(&buf),
            Err(ProtocolError::BadMagic(_))
        ));
    }
}
