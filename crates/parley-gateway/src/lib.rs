pub mod authz;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod notify;

use std::sync::Arc;

use parley_db::Database;

use crate::dispatcher::Dispatcher;
use crate::notify::Notifier;

/// Everything a connection needs to service client events.
#[derive(Clone)]
pub struct GatewayState {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub notifier: Notifier,
}
