use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};

use parley_types::api::{Claims, SubscribeRequest, UnsubscribeRequest};

use crate::AppState;
use crate::messages::{db_err, join_err};

/// POST /push/subscribe — register (or refresh) a push subscription for
/// the caller. One row per (user, endpoint).
pub async fn subscribe(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SubscribeRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.endpoint.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let keys = req.keys.to_string();

    let db = state.db.clone();
    tokio::task::spawn_blocking(move || {
        db.upsert_push_subscription(claims.sub, &req.endpoint, &keys)
            .map_err(db_err)
    })
    .await
    .map_err(join_err)??;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /push/unsubscribe — drop the caller's subscription for one
/// endpoint.
pub async fn unsubscribe(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UnsubscribeRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.endpoint.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || {
        db.delete_push_subscription(claims.sub, &req.endpoint)
            .map_err(db_err)
    })
    .await
    .map_err(join_err)??;
    Ok(StatusCode::NO_CONTENT)
}
