use serde::{Deserialize, Serialize};

use crate::models::{MessageView, Role, RoomMemberView, RoomSummary, RoomView};

// -- JWT Claims --

/// JWT claims shared across parley-api (REST middleware) and
/// parley-gateway (WebSocket upgrade authentication). Canonical
/// definition lives here to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub display_name: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: i64,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: i64,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub token: String,
}

// -- Messages --

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<MessageView>,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub messages: Vec<MessageView>,
    pub query: String,
}

// -- Rooms --

#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub member_ids: Option<Vec<i64>>,
}

#[derive(Debug, Serialize)]
pub struct RoomListResponse {
    pub rooms: Vec<RoomView>,
}

#[derive(Debug, Serialize)]
pub struct RoomDetailResponse {
    pub room: RoomSummary,
    pub members: Vec<RoomMemberView>,
}

#[derive(Debug, Serialize)]
pub struct RoomResponse {
    pub room: RoomSummary,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: i64,
}

// -- Push subscriptions --

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub endpoint: String,
    #[serde(default)]
    pub keys: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeRequest {
    pub endpoint: String,
}
