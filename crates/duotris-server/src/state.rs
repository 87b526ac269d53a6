use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::manager::SessionManager;

/// Shared application state.
pub struct AppState {
    pub db: SqlitePool,
    pub manager: Arc<SessionManager>,
    pub config: Config,
}
