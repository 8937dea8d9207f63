//! Header + JSON payload envelope.

use super::header::{MessageHeader, HEADER_SIZE};
use super::types::{BaseResponse, MessageFlags, MessageType};
use crate::error::ProtocolError;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A decoded protocol message.
///
/// The payload stays a generic JSON value until a handler asks for a
/// concrete type with [`Message::payload_as`]; routing only ever looks at
/// the header.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub header: MessageHeader,
    pub payload: Value,
}

impl Message {
    pub fn new(message_type: MessageType, message_id: u64, player_id: u64, payload: Value) -> Self {
        Self {
            header: MessageHeader::new(message_type, message_id, player_id),
            payload,
        }
    }

    /// Builds the reply envelope for a request.
    ///
    /// The reply carries the request's type, message id, player id and
    /// timestamp, has the response flag set and a sequence of 0.
    pub fn response_to(request: &MessageHeader, payload: Value) -> Self {
        let mut flags = request.flags;
        flags.insert(MessageFlags::RESPONSE);

        Self {
            header: MessageHeader {
                flags,
                sequence: 0,
                ..*request
            },
            payload,
        }
    }

    /// Reply envelope carrying an acknowledgment payload.
    pub fn ack(request: &MessageHeader, response: BaseResponse) -> Self {
        Self::response_to(request, response.into_value())
    }

    pub fn message_type(&self) -> MessageType {
        self.header.message_type
    }

    /// Encodes the header followed by the compact JSON payload.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + 64);
        self.header.encode_into(&mut buf);
        serde_json::to_writer(&mut buf, &self.payload).map_err(ProtocolError::Payload)?;
        Ok(buf)
    }

    /// Decodes one message. An empty body decodes to a `null` payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let header = MessageHeader::decode(bytes)?;
        let body = &bytes[HEADER_SIZE..];
        let payload = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(body).map_err(ProtocolError::Payload)?
        };
        Ok(Self { header, payload })
    }

    /// Deserializes the payload into a typed request.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        T::deserialize(&self.payload).map_err(ProtocolError::Payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MESSAGE_MAGIC;
    use serde_json::json;

    #[test]
    fn test_round_trip() {
        let mut message = Message::new(
            MessageType::PLAYER_MOVE,
            9001,
            77,
            json!({"x": 1.5, "y": -2.0, "z": 0.25, "tags": ["a", "b"]}),
        );
        message.header.sequence = 12;

        let decoded = Message::decode(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_round_trip_preserves_arbitrary_floats() {
        // xorshift64 over raw bit patterns covers subnormals and extreme exponents.
        let mut state = 0x9E37_79B9_7F4A_7C15u64;
        let mut checked = 0;
        while checked < 20_000 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let value = f64::from_bits(state);
            if !value.is_finite() {
                continue;
            }

            let message = Message::new(
                MessageType::PLAYER_MOVE,
                checked,
                1,
                json!({"x": value, "y": [value, -value]}),
            );
            let decoded = Message::decode(&message.encode().unwrap()).unwrap();
            assert_eq!(decoded, message, "float {value:e} did not survive encoding");
            assert_eq!(decoded.payload["x"].as_f64().map(f64::to_bits), Some(value.to_bits()));
            checked += 1;
        }
    }

    #[test]
    fn test_unknown_type_decodes() {
        let message = Message::new(MessageType(0x7777), 1, 0, Value::Null);
        let decoded = Message::decode(&message.encode().unwrap()).unwrap();

        assert_eq!(decoded.message_type(), MessageType(0x7777));
        assert!(!decoded.message_type().is_known());
    }

    #[test]
    fn test_empty_body_is_null() {
        let mut bytes = Vec::new();
        MessageHeader::new(MessageType::TEAM_INFO, 5, 0).encode_into(&mut bytes);

        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(decoded.payload, Value::Null);
    }

    #[test]
    fn test_bad_magic_returns_no_message() {
        let mut message = Message::new(MessageType::CHAT_MESSAGE, 1, 0, json!({"text": "hi"}));
        message.header.magic = MESSAGE_MAGIC ^ 0xFF;

        let result = Message::decode(&message.encode().unwrap());
        assert!(matches!(result, Err(ProtocolError::BadMagic(_))));
    }

    #[test]
    fn test_malformed_payload_is_rejected() {
        let mut bytes = Vec::new();
        MessageHeader::new(MessageType::CHAT_MESSAGE, 1, 0).encode_into(&mut bytes);
        bytes.extend_from_slice(b"{not json");

        assert!(matches!(Message::decode(&bytes), Err(ProtocolError::Payload(_))));
    }

    #[test]
    fn test_response_copies_correlation_fields() {
        let mut request = MessageHeader::new(MessageType::TEAM_JOIN, 42, 8);
        request.timestamp = 1_700_000_000;
        request.sequence = 99;

        let reply = Message::ack(&request, BaseResponse::ok("team joined"));

        assert_eq!(reply.header.message_id, 42);
        assert_eq!(reply.header.player_id, 8);
        assert_eq!(reply.header.timestamp, 1_700_000_000);
        assert_eq!(reply.header.message_type, MessageType::TEAM_JOIN);
        assert_eq!(reply.header.sequence, 0);
        assert!(reply.header.is_response());
        assert_eq!(reply.payload, json!({"success": true, "message": "team joined"}));
    }

    #[test]
    fn test_payload_as() {
        #[derive(serde::Deserialize)]
        struct Login {
            username: String,
        }

        let message = Message::new(MessageType::PLAYER_LOGIN, 1, 0, json!({"username": "ayla"}));
        let login: Login = message.payload_as().unwrap();
        assert_eq!(login.username, "ayla");

        let empty = Message::new(MessageType::PLAYER_LOGIN, 1, 0, Value::Null);
        assert!(empty.payload_as::<Login>().is_err());
    }
}
