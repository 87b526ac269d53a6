pub mod auth;
pub mod config;
pub mod db;
pub mod manager;
pub mod routes;
pub mod state;
pub mod ws;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use sqlx::sqlite::SqlitePoolOptions;
use tower_http::cors::CorsLayer;

use crate::config::Config;
use crate::db::SqliteStore;
use crate::manager::SessionManager;
use crate::state::AppState;

/// Build a fully configured Router + shared state.
pub async fn build_app(config: Config) -> (Router, Arc<AppState>) {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    db::init_db(&pool)
        .await
        .expect("Failed to initialize database");

    let store = Arc::new(SqliteStore::new(pool.clone()));
    let manager = SessionManager::new(
        store.clone(),
        store,
        config.allow_parallel_connections,
    );

    let state = Arc::new(AppState {
        db: pool,
        manager,
        config,
    });

    let game_routes = Router::new()
        .route("/api/game/room/passcode/{passcode}/join", post(routes::join_room))
        .route("/api/game/room/passcode/{passcode}/status", get(routes::room_status))
        .route("/api/game/room/passcode/{passcode}", delete(routes::delete_room))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_identity,
        ));

    let app = Router::new()
        .route("/health", get(routes::health))
        .merge(game_routes)
        .route("/api/game/ws/{passcode}", get(routes::ws_upgrade))
        .route("/api/results", get(routes::top_results))
        .route("/api/results/user/{user_id}", get(routes::user_result))
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    (app, state)
}
