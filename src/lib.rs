pub mod challenge;
pub mod client;
pub mod clock;
pub mod config;
pub mod game;
pub mod protocol;
pub mod room;
mod ws_handler;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade, ws::WebSocket},
    response::Response,
    routing::{get, post},
};
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;

use challenge::ChallengeRepository;
use game::GameRegistry;
use room::RoomRegistry;

async fn health() -> &'static str {
    "ok"
}

#[derive(Clone)]
pub struct AppState {
    pub rooms: Arc<RoomRegistry>,
    pub games: Arc<GameRegistry>,
    pub challenges: ChallengeRepository,
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    ws_handler::handle_connection(socket, state).await;
}

pub fn app(pool: SqlitePool) -> Router {
    let state = AppState {
        rooms: Arc::new(RoomRegistry::new()),
        games: Arc::new(GameRegistry::new()),
        challenges: ChallengeRepository::new(pool),
    };

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .route("/room/:code", get(game::http::get_room))
        .route("/game/submit", post(game::http::submit_test_code))
        .route("/game/:id", get(game::http::get_game))
        .route("/game/:id/end", post(game::http::end_game))
        .route(
            "/game/:id/submission/:player_id",
            get(game::http::last_submission),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}
