//! Database row types mapping directly to SQLite rows. Joined
//! projections (message + sender, room list entries) are returned as the
//! shared view types from parley-types instead, since those cross table
//! boundaries anyway.

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub password_hash: String,
    pub role: String,
    pub is_online: bool,
    pub last_seen: Option<String>,
    pub created_at: String,
}

pub struct RoomRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub kind: String,
    pub is_archived: bool,
    pub created_by: Option<i64>,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: i64,
    pub room_id: i64,
    pub sender_id: i64,
    pub text: String,
    pub kind: String,
    pub created_at: String,
}

pub struct PushSubscriptionRow {
    pub id: i64,
    pub user_id: i64,
    pub endpoint: String,
    pub keys: String,
}
