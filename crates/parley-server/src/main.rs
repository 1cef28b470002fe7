use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_api::{AppState, AppStateInner, auth, messages, middleware::require_auth, push, rooms};
use parley_gateway::{GatewayState, connection, dispatcher::Dispatcher, notify::Notifier};
use parley_types::api::Claims;
use parley_types::events::Identity;
use parley_types::models::Role;

#[derive(Clone)]
struct ServerState {
    gateway: GatewayState,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("PARLEY_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("PARLEY_DB_PATH").unwrap_or_else(|_| "parley.db".into());
    let host = std::env::var("PARLEY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PARLEY_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let push_timeout: u64 = std::env::var("PARLEY_PUSH_TIMEOUT_SECS")
        .unwrap_or_else(|_| "10".into())
        .parse()?;

    // Init database
    let db = Arc::new(parley_db::Database::open(&PathBuf::from(&db_path))?);
    db.reset_presence()?;
    seed_admin(&db)?;

    // Shared state
    let dispatcher = Dispatcher::new();
    let notifier = Notifier::new(db.clone(), Duration::from_secs(push_timeout))?;
    let gateway = GatewayState {
        db: db.clone(),
        dispatcher,
        notifier,
    };
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: jwt_secret.clone(),
    });
    let server_state = ServerState {
        gateway,
        jwt_secret,
    };

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/rooms", get(rooms::list))
        .route("/rooms", post(rooms::create))
        .route("/rooms/{room_id}", get(rooms::detail))
        .route("/rooms/{room_id}/messages", get(messages::history))
        .route("/rooms/{room_id}/search", get(messages::search))
        .route("/rooms/{room_id}/members", post(rooms::add_member))
        .route(
            "/rooms/{room_id}/members/{user_id}",
            delete(rooms::remove_member),
        )
        .route("/push/subscribe", post(push::subscribe))
        .route("/push/unsubscribe", post(push::unsubscribe))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(server_state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the initial admin account if none exists, so room creation is
/// possible on a fresh database.
fn seed_admin(db: &parley_db::Database) -> anyhow::Result<()> {
    if db.get_user_by_username("admin")?.is_some() {
        return Ok(());
    }
    let password =
        std::env::var("PARLEY_ADMIN_PASSWORD").unwrap_or_else(|_| "admin123".into());
    let hash = auth::hash_password(&password)?;
    db.create_user("admin", "Administrator", &hash, Role::Admin)?;
    tracing::warn!("seeded default admin account; change its password");
    Ok(())
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// Authenticate the token at the upgrade layer; a missing or invalid
/// token refuses the connection before any event is processed.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let token = query.token.ok_or(StatusCode::UNAUTHORIZED)?;
    let token_data = decode::<Claims>(
        &token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let claims = token_data.claims;
    let identity = Identity {
        user_id: claims.sub,
        username: claims.username,
        display_name: claims.display_name,
        role: claims.role,
    };

    Ok(ws.on_upgrade(move |socket| connection::handle_connection(socket, state.gateway, identity)))
}
