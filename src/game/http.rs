use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::game::{SubmitError, Submission};
use crate::protocol::{GameSnapshot, RoomSnapshot};
use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game: Option<GameSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndGameResponse {
    pub success: bool,
    #[serde(default)]
    pub already_finished: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub game_id: Uuid,
    pub player_id: Uuid,
    pub test_code: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission: Option<Submission>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn get_game(
    State(state): State<AppState>,
    Path(game_id): Path<Uuid>,
) -> (StatusCode, Json<GameResponse>) {
    match state.games.snapshot(game_id) {
        Some(game) => (
            StatusCode::OK,
            Json(GameResponse {
                success: true,
                game: Some(game),
                error: None,
            }),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(GameResponse {
                success: false,
                game: None,
                error: Some("game not found".to_string()),
            }),
        ),
    }
}

/// End a game. Idempotent by design: clients that independently observe the
/// deadline all call this, and only the first call transitions the game.
pub async fn end_game(
    State(state): State<AppState>,
    Path(game_id): Path<Uuid>,
) -> (StatusCode, Json<EndGameResponse>) {
    match state.games.end_game(game_id) {
        Some(outcome) => {
            if !outcome.already_finished {
                state.rooms.finish_room(&outcome.room_code);
            }
            (
                StatusCode::OK,
                Json(EndGameResponse {
                    success: true,
                    already_finished: outcome.already_finished,
                    error: None,
                }),
            )
        }
        None => {
            warn!(%game_id, "End requested for unknown game");
            (
                StatusCode::NOT_FOUND,
                Json(EndGameResponse {
                    success: false,
                    already_finished: false,
                    error: Some("game not found".to_string()),
                }),
            )
        }
    }
}

pub async fn submit_test_code(
    State(state): State<AppState>,
    Json(req): Json<SubmitRequest>,
) -> (StatusCode, Json<SubmitResponse>) {
    match state.games.submit(req.game_id, req.player_id, &req.test_code) {
        Some(Ok(())) => (
            StatusCode::OK,
            Json(SubmitResponse {
                success: true,
                error: None,
            }),
        ),
        Some(Err(SubmitError::GameFinished)) => (
            StatusCode::CONFLICT,
            Json(SubmitResponse {
                success: false,
                error: Some("game has already finished".to_string()),
            }),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(SubmitResponse {
                success: false,
                error: Some("game not found".to_string()),
            }),
        ),
    }
}

pub async fn last_submission(
    State(state): State<AppState>,
    Path((game_id, player_id)): Path<(Uuid, Uuid)>,
) -> (StatusCode, Json<SubmissionResponse>) {
    match state.games.last_submission(game_id, player_id) {
        Some(submission) => (
            StatusCode::OK,
            Json(SubmissionResponse {
                success: true,
                submission: Some(submission),
                error: None,
            }),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(SubmissionResponse {
                success: false,
                submission: None,
                error: Some("no submission".to_string()),
            }),
        ),
    }
}

pub async fn get_room(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> (StatusCode, Json<RoomResponse>) {
    match state.rooms.room_snapshot(&code) {
        Some(room) => (
            StatusCode::OK,
            Json(RoomResponse {
                success: true,
                room: Some(room),
                error: None,
            }),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(RoomResponse {
                success: false,
                room: None,
                error: Some("room not found".to_string()),
            }),
        ),
    }
}
