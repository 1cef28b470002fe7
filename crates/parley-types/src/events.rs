use serde::{Deserialize, Serialize};

use crate::models::{MessageView, Role};

/// Events sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Subscribe to a room's channel. Silently ignored for non-members.
    JoinRoom(i64),

    /// Unsubscribe from a room's channel. Always succeeds.
    LeaveRoom(i64),

    /// Send a new message to a room.
    Message {
        room_id: i64,
        text: String,
        #[serde(rename = "type", default)]
        kind: Option<String>,
        #[serde(default)]
        reply_to: Option<i64>,
    },

    /// Edit one of the caller's own messages.
    MessageEdit { message_id: i64, text: String },

    /// Delete a message (sender or admin).
    MessageDelete { message_id: i64 },

    /// Acknowledge having read a message. Idempotent.
    MarkRead { message_id: i64 },

    /// Typing indicator; relayed, never persisted.
    Typing { room_id: i64 },
}

/// Events sent FROM server TO clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    UserOnline {
        user_id: i64,
    },

    UserOffline {
        user_id: i64,
    },

    /// A new message, fully joined with its sender.
    Message(MessageView),

    MessageEdited {
        message_id: i64,
        text: String,
        room_id: i64,
    },

    MessageDeleted {
        message_id: i64,
        room_id: i64,
    },

    MessageRead {
        message_id: i64,
        user_id: i64,
    },

    Typing {
        room_id: i64,
        user_id: i64,
        username: String,
        display_name: String,
    },

    /// Confirms a successful JoinRoom subscription.
    JoinedRoom {
        room_id: i64,
    },

    /// Human-readable rejection of a client event (policy violations).
    Error {
        message: String,
    },
}

/// Identity attached to every connection, decoded from the JWT once at
/// upgrade time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: i64,
    pub username: String,
    pub display_name: String,
    pub role: Role,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_use_wire_names() {
        let ev: ClientEvent =
            serde_json::from_str(r#"{"type":"join_room","data":7}"#).unwrap();
        assert!(matches!(ev, ClientEvent::JoinRoom(7)));

        let ev: ClientEvent = serde_json::from_str(
            r#"{"type":"message","data":{"room_id":7,"text":"hello"}}"#,
        )
        .unwrap();
        match ev {
            ClientEvent::Message {
                room_id,
                text,
                kind,
                reply_to,
            } => {
                assert_eq!(room_id, 7);
                assert_eq!(text, "hello");
                assert!(kind.is_none());
                assert!(reply_to.is_none());
            }
            other => panic!("wrong variant: {other:?}"),
        }

        let ev: ClientEvent = serde_json::from_str(
            r#"{"type":"mark_read","data":{"message_id":42}}"#,
        )
        .unwrap();
        assert!(matches!(ev, ClientEvent::MarkRead { message_id: 42 }));
    }

    #[test]
    fn server_events_tag_as_snake_case() {
        let json =
            serde_json::to_value(ServerEvent::UserOnline { user_id: 3 }).unwrap();
        assert_eq!(json["type"], "user_online");
        assert_eq!(json["data"]["user_id"], 3);

        let json = serde_json::to_value(ServerEvent::MessageRead {
            message_id: 9,
            user_id: 3,
        })
        .unwrap();
        assert_eq!(json["type"], "message_read");
    }
}
