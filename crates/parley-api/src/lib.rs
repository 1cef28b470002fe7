pub mod auth;
pub mod messages;
pub mod middleware;
pub mod push;
pub mod rooms;

use std::sync::Arc;

use parley_db::Database;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
}
