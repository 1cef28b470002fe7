use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::error;

use parley_types::api::{Claims, HistoryResponse, SearchResponse};

use crate::AppState;

const MAX_PAGE: u32 = 100;
const MAX_SEARCH: u32 = 50;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor: the id of the oldest message from the previous page;
    /// restricts the next page to strictly lower ids.
    pub before: Option<i64>,
}

fn default_limit() -> u32 {
    50
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

/// GET /rooms/{room_id}/messages — one page of history, oldest-first
/// within the page. `has_more` is the page-full approximation, not an
/// exact count.
pub async fn history(
    State(state): State<AppState>,
    Path(room_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let limit = query.limit.clamp(1, MAX_PAGE);
    let before = query.before;
    let db = state.db.clone();
    let user_id = claims.sub;

    // Run blocking DB work off the async runtime
    let messages = tokio::task::spawn_blocking(move || {
        if !db.is_member(room_id, user_id).map_err(db_err)? {
            return Err(StatusCode::FORBIDDEN);
        }
        db.history(room_id, before, limit).map_err(db_err)
    })
    .await
    .map_err(join_err)??;

    let has_more = messages.len() as u32 == limit;
    Ok(Json(HistoryResponse { messages, has_more }))
}

/// GET /rooms/{room_id}/search?q= — substring match, most recent first.
pub async fn search(
    State(state): State<AppState>,
    Path(room_id): Path<i64>,
    Query(query): Query<SearchQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let q = query.q.trim().to_string();
    if q.len() < 2 {
        return Err(StatusCode::BAD_REQUEST);
    }
    let limit = query.limit.clamp(1, MAX_SEARCH);
    let db = state.db.clone();
    let user_id = claims.sub;

    let messages = tokio::task::spawn_blocking({
        let q = q.clone();
        move || {
            if !db.is_member(room_id, user_id).map_err(db_err)? {
                return Err(StatusCode::FORBIDDEN);
            }
            db.search_messages(room_id, &q, limit).map_err(db_err)
        }
    })
    .await
    .map_err(join_err)??;

    Ok(Json(SearchResponse { messages, query: q }))
}

pub(crate) fn db_err(e: anyhow::Error) -> StatusCode {
    error!("database error: {}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}

pub(crate) fn join_err(e: tokio::task::JoinError) -> StatusCode {
    error!("spawn_blocking join error: {}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}
