use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A command sent by a client over the session transport. Every command
/// carries a connection-local request id so the acknowledgement can be
/// matched back to the caller.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ClientCommand {
    pub id: u64,
    #[serde(flatten)]
    pub kind: CommandKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandKind {
    /// Introduce a new player to the authority.
    Register { name: String },
    /// Re-announce presence after a reconnect. Idempotent: re-binds the
    /// event channel for an already-known player without creating a
    /// duplicate member.
    Rejoin { player_id: Uuid },
    CreateRoom { player_name: String, max_players: u8 },
    JoinRoom { room_code: String },
    SetReady { is_ready: bool },
    LeaveRoom,
    StartGame { room_code: String },
    GetPlayerRoomInfo,
}

/// Everything the authority pushes down a connection: acknowledgements for
/// the connection's own commands, plus room events broadcast to every
/// member. Events always carry the full room snapshot so a client that
/// missed intermediate events reaches a consistent view from the latest one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Ack {
        id: u64,
        result: CommandOutcome,
    },
    RoomUpdated {
        room: RoomSnapshot,
    },
    PlayerJoined {
        room: RoomSnapshot,
        player_id: Uuid,
    },
    PlayerLeft {
        room: RoomSnapshot,
        player_id: Uuid,
    },
    PlayerReadyChanged {
        room: RoomSnapshot,
        player_id: Uuid,
        is_ready: bool,
    },
    GameStarted {
        room: RoomSnapshot,
        game_id: Uuid,
    },
    Error {
        message: String,
    },
}

/// Request/acknowledgement result: the caller can tell "rejected by the
/// authority" apart from a transport failure, which surfaces as an error on
/// the connection itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommandOutcome {
    Accepted { payload: AckPayload },
    Rejected { code: RejectCode },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AckPayload {
    Registered { player_id: Uuid },
    Room { room: RoomSnapshot },
    RoomInfo { room: Option<RoomSnapshot> },
    GameStarted { game_id: Uuid },
    Ack,
}

/// Rejection codes for room and game commands, mirrored on both sides of
/// the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum RejectCode {
    #[error("player is already in a room")]
    AlreadyInRoom,
    #[error("max players outside the allowed range")]
    InvalidCapacity,
    #[error("no room with that code")]
    RoomNotFound,
    #[error("room is full")]
    RoomFull,
    #[error("game already started")]
    GameAlreadyStarted,
    #[error("room code must be 6 alphanumeric characters")]
    InvalidCodeFormat,
    #[error("player is not in a room")]
    NotInRoom,
    #[error("only the host may do that")]
    NotHost,
    #[error("not all players are ready")]
    NotAllReady,
    #[error("at least two players are required")]
    InsufficientPlayers,
    #[error("connection has not registered a player")]
    NotRegistered,
    #[error("no challenge available to play")]
    NoChallengeAvailable,
}

/// Full current state of a room. Field names follow the JSON the authority
/// has always served, hence camelCase on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub code: String,
    pub host_id: Uuid,
    pub max_players: u8,
    pub players: Vec<PlayerSnapshot>,
    pub game_state: RoomPhase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub id: Uuid,
    pub name: String,
    pub is_ready: bool,
    pub is_host: bool,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomPhase {
    Waiting,
    Playing,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    Playing,
    Finished,
}

/// Game state as served over HTTP. `remaining_seconds` is derived from
/// `started_at` on every request, never stored as a countdown.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    pub id: Uuid,
    pub room_code: String,
    pub challenge_id: i64,
    pub host_id: Uuid,
    pub game_state: GamePhase,
    pub started_at: DateTime<Utc>,
    pub total_duration: u64,
    pub remaining_seconds: u64,
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_serializes_with_flattened_type_tag() {
        let cmd = ClientCommand {
            id: 7,
            kind: CommandKind::JoinRoom {
                room_code: "ABC123".to_string(),
            },
        };
        let json = serde_json::to_string(&cmd).unwrap();

        assert!(json.contains("\"id\":7"));
        assert!(json.contains("\"type\":\"join_room\""));
        assert!(json.contains("\"room_code\":\"ABC123\""));
    }

    #[test]
    fn reject_code_round_trips_as_snake_case() {
        let json = serde_json::to_string(&RejectCode::GameAlreadyStarted).unwrap();
        assert_eq!(json, "\"game_already_started\"");

        let code: RejectCode = serde_json::from_str(&json).unwrap();
        assert_eq!(code, RejectCode::GameAlreadyStarted);
    }

    #[test]
    fn ack_round_trips() {
        let msg = ServerMessage::Ack {
            id: 3,
            result: CommandOutcome::Rejected {
                code: RejectCode::RoomFull,
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}
