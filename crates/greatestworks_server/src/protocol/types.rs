//! Message type codes, header flags and the acknowledgment payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// 32-bit code discriminating payload semantics.
///
/// Codes outside the known table are still valid on the wire: they decode
/// normally and are rejected by the dispatcher instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageType(pub u32);

impl MessageType {
    pub const PLAYER_LOGIN: Self = Self(0x0101);
    pub const PLAYER_LOGOUT: Self = Self(0x0102);
    pub const PLAYER_MOVE: Self = Self(0x0103);
    pub const PLAYER_STATUS: Self = Self(0x0104);
    pub const PLAYER_STATS: Self = Self(0x0105);
    pub const CHAT_MESSAGE: Self = Self(0x0201);
    pub const TEAM_CREATE: Self = Self(0x0301);
    pub const TEAM_JOIN: Self = Self(0x0302);
    pub const TEAM_LEAVE: Self = Self(0x0303);
    pub const TEAM_INFO: Self = Self(0x0304);

    /// Every type this build knows how to route.
    pub const KNOWN: [MessageType; 10] = [
        Self::PLAYER_LOGIN,
        Self::PLAYER_LOGOUT,
        Self::PLAYER_MOVE,
        Self::PLAYER_STATUS,
        Self::PLAYER_STATS,
        Self::CHAT_MESSAGE,
        Self::TEAM_CREATE,
        Self::TEAM_JOIN,
        Self::TEAM_LEAVE,
        Self::TEAM_INFO,
    ];

    pub fn code(self) -> u32 {
        self.0
    }

    /// Human-readable name, or `None` for codes outside the known table.
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::PLAYER_LOGIN => "player_login",
            Self::PLAYER_LOGOUT => "player_logout",
            Self::PLAYER_MOVE => "player_move",
            Self::PLAYER_STATUS => "player_status",
            Self::PLAYER_STATS => "player_stats",
            Self::CHAT_MESSAGE => "chat_message",
            Self::TEAM_CREATE => "team_create",
            Self::TEAM_JOIN => "team_join",
            Self::TEAM_LEAVE => "team_leave",
            Self::TEAM_INFO => "team_info",
            _ => return None,
        };
        Some(name)
    }

    pub fn is_known(self) -> bool {
        self.name().is_some()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}({:#06x})", self.0),
            None => write!(f, "{:#06x}", self.0),
        }
    }
}

/// Header flag bitset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageFlags(pub u32);

impl MessageFlags {
    pub const NONE: Self = Self(0);
    /// Set on every reply sent by the server
    pub const RESPONSE: Self = Self(1 << 0);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn is_response(self) -> bool {
        self.contains(Self::RESPONSE)
    }
}

/// Acknowledgment payload carried by replies.
///
/// Serializes as `{"success": bool, "message": string}` plus `data` when
/// present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl BaseResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Converts into the JSON value placed in a message payload.
    pub fn into_value(self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("success".to_string(), Value::Bool(self.success));
        map.insert("message".to_string(), Value::String(self.message));
        if let Some(data) = self.data {
            map.insert("data".to_string(), data);
        }
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_known_types_have_names() {
        for message_type in MessageType::KNOWN {
            assert!(message_type.is_known(), "{message_type} should be known");
        }
        assert_eq!(MessageType::CHAT_MESSAGE.name(), Some("chat_message"));
        assert_eq!(MessageType(0xBEEF).name(), None);
        assert_eq!(MessageType(0xBEEF).to_string(), "0xbeef");
    }

    #[test]
    fn test_flags() {
        let mut flags = MessageFlags::NONE;
        assert!(!flags.is_response());

        flags.insert(MessageFlags::RESPONSE);
        assert!(flags.is_response());
        assert_eq!(flags.bits(), 1);
    }

    #[test]
    fn test_base_response_payload_shape() {
        assert_eq!(
            BaseResponse::ok("team joined").into_value(),
            json!({"success": true, "message": "team joined"})
        );
        assert_eq!(
            BaseResponse::error("not authenticated")
                .with_data(json!({"retry": false}))
                .into_value(),
            json!({"success": false, "message": "not authenticated", "data": {"retry": false}})
        );
    }
}
