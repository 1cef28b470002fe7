use serde::{Deserialize, Serialize};

/// Account role. Admins bypass per-user policy checks; agents are
/// automated members that other users need an explicit grant to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
    Agent,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
            Role::Agent => "agent",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "admin" => Some(Role::Admin),
            "user" => Some(Role::User),
            "agent" => Some(Role::Agent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomType {
    Direct,
    Group,
    Channel,
}

impl RoomType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomType::Direct => "direct",
            RoomType::Group => "group",
            RoomType::Channel => "channel",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    File,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::File => "file",
            MessageKind::System => "system",
        }
    }
}

/// A message joined with its sender, as delivered over the wire and the
/// history API. One shape everywhere so clients render broadcasts and
/// fetched pages identically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    pub id: i64,
    pub room_id: i64,
    pub sender_id: i64,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<i64>,
    pub is_edited: bool,
    pub created_at: String,
    pub sender_username: String,
    pub sender_name: String,
    pub sender_role: Role,
}

/// A room row as returned by the detail and create endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: RoomType,
    pub is_archived: bool,
    pub created_by: Option<i64>,
    pub created_at: String,
}

/// A room as seen in the caller's room list, with derived counters.
#[derive(Debug, Clone, Serialize)]
pub struct RoomView {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: RoomType,
    pub is_archived: bool,
    pub created_by: Option<i64>,
    pub created_at: String,
    pub my_role: String,
    pub member_count: i64,
    pub last_message: Option<String>,
    pub last_message_at: Option<String>,
    pub last_message_sender: Option<String>,
    pub unread_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomMemberView {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub is_online: bool,
    pub room_role: String,
}
