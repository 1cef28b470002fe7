use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use parley_types::api::{
    AddMemberRequest, Claims, CreateRoomRequest, RoomDetailResponse, RoomListResponse,
    RoomResponse,
};
use parley_types::models::{Role, RoomSummary, RoomType};

use crate::AppState;
use crate::messages::{db_err, join_err};

/// GET /rooms — the caller's rooms with previews and unread counts.
pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let rooms = tokio::task::spawn_blocking(move || db.rooms_for_user(claims.sub).map_err(db_err))
        .await
        .map_err(join_err)??;
    Ok(Json(RoomListResponse { rooms }))
}

/// POST /rooms — admin only. Direct rooms are deduplicated per unordered
/// user pair.
pub async fn create(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if claims.role != Role::Admin {
        return Err(StatusCode::FORBIDDEN);
    }
    if req.name.is_empty() || req.name.len() > 80 {
        return Err(StatusCode::BAD_REQUEST);
    }
    let kind = match req.kind.as_deref() {
        None | Some("group") => RoomType::Group,
        Some("direct") => RoomType::Direct,
        Some("channel") => RoomType::Channel,
        Some(_) => return Err(StatusCode::BAD_REQUEST),
    };

    let db = state.db.clone();
    let room_id = tokio::task::spawn_blocking(move || {
        let member_ids = req.member_ids.unwrap_or_default();

        if kind == RoomType::Direct && member_ids.len() == 1 {
            if let Some(existing) = db
                .find_direct_room(claims.sub, member_ids[0])
                .map_err(db_err)?
            {
                return Ok(existing);
            }
        }

        db.create_room(
            &req.name,
            req.description.as_deref(),
            kind.as_str(),
            claims.sub,
            &member_ids,
        )
        .map_err(db_err)
    })
    .await
    .map_err(join_err)??;

    let room = fetch_room(&state, room_id).await?;
    Ok(Json(RoomResponse { room }))
}

/// GET /rooms/{room_id} — room details plus member list.
pub async fn detail(
    State(state): State<AppState>,
    Path(room_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let (room, members) = tokio::task::spawn_blocking(move || {
        if !db.is_member(room_id, claims.sub).map_err(db_err)? {
            return Err(StatusCode::FORBIDDEN);
        }
        let room = db
            .get_room(room_id)
            .map_err(db_err)?
            .ok_or(StatusCode::NOT_FOUND)?;
        let members = db.room_members(room_id).map_err(db_err)?;
        Ok((room, members))
    })
    .await
    .map_err(join_err)??;

    Ok(Json(RoomDetailResponse {
        room: summarize(room),
        members,
    }))
}

/// POST /rooms/{room_id}/members — owner or admin.
pub async fn add_member(
    State(state): State<AppState>,
    Path(room_id): Path<i64>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AddMemberRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || {
        require_owner_or_admin(&db, room_id, &claims)?;
        if db.get_user_by_id(req.user_id).map_err(db_err)?.is_none() {
            return Err(StatusCode::NOT_FOUND);
        }
        db.add_member(room_id, req.user_id, "member").map_err(db_err)
    })
    .await
    .map_err(join_err)??;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /rooms/{room_id}/members/{user_id} — owner, admin, or the
/// member removing themselves.
pub async fn remove_member(
    State(state): State<AppState>,
    Path((room_id, user_id)): Path<(i64, i64)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || {
        if user_id != claims.sub {
            require_owner_or_admin(&db, room_id, &claims)?;
        }
        db.remove_member(room_id, user_id).map_err(db_err)
    })
    .await
    .map_err(join_err)??;
    Ok(StatusCode::NO_CONTENT)
}

fn require_owner_or_admin(
    db: &parley_db::Database,
    room_id: i64,
    claims: &Claims,
) -> Result<(), StatusCode> {
    if claims.role == Role::Admin {
        return Ok(());
    }
    match db.member_role(room_id, claims.sub).map_err(db_err)? {
        Some(role) if role == "owner" => Ok(()),
        _ => Err(StatusCode::FORBIDDEN),
    }
}

async fn fetch_room(state: &AppState, room_id: i64) -> Result<RoomSummary, StatusCode> {
    let db = state.db.clone();
    let room = tokio::task::spawn_blocking(move || db.get_room(room_id).map_err(db_err))
        .await
        .map_err(join_err)??
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(summarize(room))
}

fn summarize(room: parley_db::models::RoomRow) -> RoomSummary {
    RoomSummary {
        id: room.id,
        name: room.name,
        description: room.description,
        kind: match room.kind.as_str() {
            "direct" => RoomType::Direct,
            "channel" => RoomType::Channel,
            _ => RoomType::Group,
        },
        is_archived: room.is_archived,
        created_by: room.created_by,
        created_at: room.created_at,
    }
}
